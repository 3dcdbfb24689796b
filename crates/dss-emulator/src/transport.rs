//! Transport seam between a role and the physical link.

use crate::error::{EmulatorError, EmulatorResult};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Lifecycle of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Not started, or stopped.
    Stopped,
    /// Carrying traffic.
    Active,
    /// Temporarily refusing traffic.
    Paused,
}

/// Byte transport consumed by the protocol engine.
///
/// Outbound bytes go through [`send_bytes`](Transport::send_bytes). Inbound
/// bytes are delivered by whoever owns the link, by calling the role's
/// `receive` or running [`pump`](crate::engine::pump).
pub trait Transport: Send + Sync {
    /// Write bytes to the peer.
    fn send_bytes(&self, bytes: &[u8]) -> EmulatorResult<()>;

    /// Start carrying traffic.
    fn start(&self) -> EmulatorResult<()>;

    /// Stop carrying traffic until resumed.
    fn pause(&self);

    /// Resume after a pause.
    fn resume(&self);

    /// Shut the link down.
    fn stop(&self);

    /// Whether traffic is currently carried.
    fn is_active(&self) -> bool;
}

/// One end of an in-memory duplex link.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    name: String,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    state: Arc<Mutex<LinkState>>,
}

/// A transport together with the receiver of bytes sent by its peer.
#[derive(Debug)]
pub struct ChannelLink {
    /// Outbound half.
    pub transport: ChannelTransport,
    /// Bytes sent by the other end.
    pub inbound: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl ChannelTransport {
    /// Create a connected pair of active links.
    pub fn pair(a: &str, b: &str) -> (ChannelLink, ChannelLink) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        let end = |name: &str, outbound, inbound| ChannelLink {
            transport: ChannelTransport {
                name: name.to_string(),
                outbound,
                state: Arc::new(Mutex::new(LinkState::Active)),
            },
            inbound,
        };
        (end(a, a_tx, a_rx), end(b, b_tx, b_rx))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LinkState {
        *self.state.lock()
    }
}

impl Transport for ChannelTransport {
    fn send_bytes(&self, bytes: &[u8]) -> EmulatorResult<()> {
        match self.state() {
            LinkState::Active => {}
            state => {
                return Err(EmulatorError::Transport(format!(
                    "{} link is {:?}",
                    self.name, state
                )))
            }
        }
        self.outbound
            .send(bytes.to_vec())
            .map_err(|_| EmulatorError::Transport(format!("{} peer has gone away", self.name)))
    }

    fn start(&self) -> EmulatorResult<()> {
        if self.outbound.is_closed() {
            return Err(EmulatorError::Transport(format!(
                "{} peer has gone away",
                self.name
            )));
        }
        *self.state.lock() = LinkState::Active;
        Ok(())
    }

    fn pause(&self) {
        let mut state = self.state.lock();
        if *state == LinkState::Active {
            *state = LinkState::Paused;
        }
    }

    fn resume(&self) {
        let mut state = self.state.lock();
        if *state == LinkState::Paused {
            *state = LinkState::Active;
        }
    }

    fn stop(&self) {
        *self.state.lock() = LinkState::Stopped;
    }

    fn is_active(&self) -> bool {
        self.state() == LinkState::Active
    }
}
