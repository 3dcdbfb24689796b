//! TCP links between the two roles.
//!
//! Each connection runs one task that copies socket reads into an inbound
//! channel and drains an outbound queue into the socket. The role sends
//! through [`TcpTransport`] and consumes the inbound channel with
//! [`pump`].

use crate::config::SimConfig;
use crate::error::RunnerResult;
use dss_emulator::{
    pump, race_with_cancellation, CancelFlag, Clock, Device, EmulatorError, EmulatorResult,
    LinkState, Transport,
};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// ============================================================================
// Transport
// ============================================================================

/// Outbound half of a TCP connection.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    peer: String,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    state: Arc<Mutex<LinkState>>,
    shutdown: Arc<Notify>,
}

impl TcpTransport {
    /// Address of the remote end.
    pub fn peer(&self) -> &str {
        &self.peer
    }
}

impl Transport for TcpTransport {
    fn send_bytes(&self, bytes: &[u8]) -> EmulatorResult<()> {
        let state = *self.state.lock();
        if state != LinkState::Active {
            return Err(EmulatorError::Transport(format!(
                "link to {} is {:?}",
                self.peer, state
            )));
        }
        self.outbound
            .send(bytes.to_vec())
            .map_err(|_| EmulatorError::Transport(format!("connection to {} closed", self.peer)))
    }

    fn start(&self) -> EmulatorResult<()> {
        if self.outbound.is_closed() {
            return Err(EmulatorError::Transport(format!(
                "connection to {} closed",
                self.peer
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
        self.shutdown.notify_one();
    }

    fn is_active(&self) -> bool {
        *self.state.lock() == LinkState::Active && !self.outbound.is_closed()
    }
}

/// An established connection.
#[derive(Debug)]
pub struct TcpLink {
    /// Outbound half.
    pub transport: TcpTransport,
    /// Bytes read from the socket.
    pub inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    /// The socket task; finishes when either side closes.
    pub task: JoinHandle<io::Result<()>>,
}

impl TcpLink {
    /// Take over an accepted or connected stream.
    pub fn spawn(stream: TcpStream) -> io::Result<Self> {
        let peer = stream.peer_addr()?.to_string();
        stream.set_nodelay(true)?;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(run_connection(
            stream,
            outbound_rx,
            inbound_tx,
            Arc::clone(&shutdown),
        ));
        Ok(TcpLink {
            transport: TcpTransport {
                peer,
                outbound: outbound_tx,
                state: Arc::new(Mutex::new(LinkState::Active)),
                shutdown,
            },
            inbound: inbound_rx,
            task,
        })
    }

    /// Connect to a listening device.
    pub async fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Self::spawn(stream)
    }
}

async fn run_connection(
    mut stream: TcpStream,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    inbound: mpsc::UnboundedSender<Vec<u8>>,
    shutdown: Arc<Notify>,
) -> io::Result<()> {
    let (mut reader, mut writer) = stream.split();
    let mut read_buf = [0u8; 1024];

    loop {
        tokio::select! {
            result = reader.read(&mut read_buf) => {
                let n = result?;
                if n == 0 {
                    return Ok(());
                }
                if inbound.send(read_buf[..n].to_vec()).is_err() {
                    return Ok(());
                }
            }

            data = outbound.recv() => match data {
                Some(data) => {
                    writer.write_all(&data).await?;
                    writer.flush().await?;
                }
                // Every transport clone is gone; queued bytes were written.
                None => return Ok(()),
            },

            _ = shutdown.notified() => return Ok(()),
        }
    }
}

// ============================================================================
// Device server
// ============================================================================

/// Serve the device role to one controller at a time until cancelled.
///
/// Every connection gets a fresh device built from `config`.
pub async fn serve_device(
    listener: TcpListener,
    config: &SimConfig,
    clock: Arc<dyn Clock>,
    cancel: &CancelFlag,
) -> RunnerResult<()> {
    info!("device listening on {}", listener.local_addr()?);
    loop {
        let Some(accepted) = race_with_cancellation(listener.accept(), cancel).await else {
            info!("device server stopping");
            return Ok(());
        };
        let (stream, peer) = accepted?;
        info!("controller connected from {}", peer);

        let link = TcpLink::spawn(stream)?;
        let device = Device::new(
            config.emulator.device.clone(),
            &config.emulator.link,
            Arc::new(link.transport),
            Arc::clone(&clock),
        )?;
        let served = race_with_cancellation(pump(Arc::clone(&device), link.inbound), cancel).await;
        device.shutdown();
        debug!("{}", device.status());

        if served.is_none() {
            info!("device server stopping");
            return Ok(());
        }
        match link.task.await {
            Ok(Ok(())) => info!("controller {} disconnected", peer),
            Ok(Err(err)) => warn!("connection to {} failed: {}", peer, err),
            Err(err) => warn!("connection task for {} ended abnormally: {}", peer, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pair() -> (TcpLink, TcpLink) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpLink::connect(addr), listener.accept());
        let server = TcpLink::spawn(accepted.unwrap().0).unwrap();
        (client.unwrap(), server)
    }

    #[tokio::test]
    async fn test_bytes_cross_the_socket() {
        let (client, mut server) = pair().await;
        client.transport.send_bytes(b"#I001,UDB,RC-RI,GI,").unwrap();
        client.transport.send_bytes(b"*0000\r\n").unwrap();

        let mut received = Vec::new();
        while received.len() < 26 {
            received.extend(server.inbound.recv().await.unwrap());
        }
        assert_eq!(received, b"#I001,UDB,RC-RI,GI,*0000\r\n");
    }

    #[tokio::test]
    async fn test_pause_and_stop() {
        let (client, mut server) = pair().await;
        client.transport.pause();
        assert!(!client.transport.is_active());
        assert!(client.transport.send_bytes(b"x").is_err());
        client.transport.resume();
        client.transport.send_bytes(b"y").unwrap();
        assert_eq!(server.inbound.recv().await.unwrap(), b"y");

        client.transport.stop();
        assert!(client.transport.send_bytes(b"z").is_err());
        assert!(client.task.await.unwrap().is_ok());
        // The server sees the socket close.
        assert!(server.inbound.recv().await.is_none());
    }
}
