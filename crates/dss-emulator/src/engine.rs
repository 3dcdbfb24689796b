//! Protocol engine shared by the controller and the device.
//!
//! The engine owns everything that does not depend on the role: frame ids,
//! the outbound path through a [`Transport`], inbound decoding, the command
//! history and the single pending-acknowledgement slot. Roles implement
//! [`Role`] to receive the decoded frames.

use crate::error::{EmulatorError, EmulatorResult};
use crate::history::{CommandHistory, HistoryDirection};
use crate::transport::Transport;
use dss_metrics::{metric_defs, MetricLabels};
use dss_protocol::{Frame, FrameCodec, FrameError, Request, Response};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Highest frame sequence number before ids wrap back to `I001`.
pub const MAX_SEQUENCE: u32 = 999;

// ============================================================================
// Pending acknowledgement
// ============================================================================

struct PendingAck {
    id: String,
    sender: oneshot::Sender<Response>,
    since: Instant,
}

impl PendingAck {
    fn is_waiting(&self) -> bool {
        !self.sender.is_closed()
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Role-independent half of a protocol participant.
pub struct ProtocolEngine {
    self_id: String,
    peer_id: String,
    transport: Arc<dyn Transport>,
    codec: Mutex<FrameCodec>,
    history: CommandHistory,
    pending: Mutex<Option<PendingAck>>,
    sequence: AtomicU32,
    labels: MetricLabels,
}

impl ProtocolEngine {
    /// Create an engine for `self_id` talking to `peer_id`.
    ///
    /// `role` is the metric label (`controller` or `device`).
    pub fn new(
        self_id: impl Into<String>,
        peer_id: impl Into<String>,
        role: &str,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let self_id = self_id.into();
        ProtocolEngine {
            labels: MetricLabels::new(self_id.clone(), role),
            self_id,
            peer_id: peer_id.into(),
            transport,
            codec: Mutex::new(FrameCodec::new()),
            history: CommandHistory::new(),
            pending: Mutex::new(None),
            sequence: AtomicU32::new(0),
        }
    }

    /// This role's protocol id.
    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// The peer's protocol id.
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Frames exchanged so far.
    pub fn history(&self) -> &CommandHistory {
        &self.history
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Metric labels for this role.
    pub fn labels(&self) -> &MetricLabels {
        &self.labels
    }

    /// Allocate the next frame id, `I001` through `I999`.
    pub fn next_id(&self) -> String {
        let n = self.sequence.fetch_add(1, Ordering::Relaxed) % MAX_SEQUENCE + 1;
        format!("I{:03}", n)
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    /// Encode and transmit a frame.
    pub fn send_frame(&self, frame: &Frame) -> EmulatorResult<()> {
        trace!("{}: TX {}", self.self_id, frame);
        self.transport.send_bytes(&frame.encode())?;
        self.history.record(HistoryDirection::Sent, frame.to_string());
        let labels = self
            .labels
            .with(&[("opcode", frame.opcode.as_str().to_string())]);
        dss_metrics::metrics::counter!(metric_defs::FRAMES_TX.name, &labels).increment(1);
        Ok(())
    }

    /// Send a request under a fresh id and return that id.
    pub fn send_request(&self, request: &Request) -> EmulatorResult<String> {
        let id = self.next_id();
        self.send_frame(&request.to_frame(&id, &self.peer_id, &self.self_id))?;
        Ok(id)
    }

    /// Answer the request carrying `id`.
    pub fn respond(&self, id: &str, response: &Response) -> EmulatorResult<()> {
        self.send_frame(&response.to_frame(id, &self.peer_id, &self.self_id))
    }

    /// Send a request whose `OK`/`NO`/`ACK`/`NAK` answer is awaited.
    ///
    /// Only one such request may be outstanding. While an earlier receiver is
    /// still alive this fails with [`EmulatorError::AckBusy`]; dropping the
    /// receiver (e.g. after a timeout) frees the slot.
    pub fn request_with_ack(
        &self,
        request: &Request,
    ) -> EmulatorResult<oneshot::Receiver<Response>> {
        let (sender, receiver) = oneshot::channel();
        let id = self.next_id();
        {
            let mut pending = self.pending.lock();
            if pending.as_ref().is_some_and(PendingAck::is_waiting) {
                return Err(EmulatorError::AckBusy);
            }
            *pending = Some(PendingAck {
                id: id.clone(),
                sender,
                since: Instant::now(),
            });
        }

        let frame = request.to_frame(&id, &self.peer_id, &self.self_id);
        if let Err(err) = self.send_frame(&frame) {
            let mut pending = self.pending.lock();
            if pending.as_ref().is_some_and(|p| p.id == id) {
                *pending = None;
            }
            return Err(err);
        }
        Ok(receiver)
    }

    /// Hand an acknowledgement to whoever is waiting.
    ///
    /// Returns `true` if a waiter received it. The slot is cleared either way,
    /// and an answer carrying another id still resolves it.
    pub fn resolve_ack(&self, id: &str, response: Response) -> bool {
        let Some(pending) = self.pending.lock().take() else {
            debug!(
                "{}: {} for {} with nothing pending",
                self.self_id,
                response.opcode(),
                id
            );
            return false;
        };
        if pending.id != id {
            warn!(
                "{}: {} for {} resolves pending {}",
                self.self_id,
                response.opcode(),
                id,
                pending.id
            );
            dss_metrics::metrics::counter!(
                metric_defs::ACK_ID_MISMATCH.name,
                &self.labels.to_labels()
            )
            .increment(1);
        }
        let latency_ms = pending.since.elapsed().as_secs_f64() * 1000.0;
        dss_metrics::metrics::histogram!(metric_defs::ACK_LATENCY.name, &self.labels.to_labels())
            .record(latency_ms);
        pending.sender.send(response).is_ok()
    }

    /// Whether a live waiter occupies the acknowledgement slot.
    pub fn has_pending_ack(&self) -> bool {
        self.pending.lock().as_ref().is_some_and(PendingAck::is_waiting)
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    /// Feed transport bytes and return the frames addressed to this role.
    ///
    /// Malformed frames and frames for other ids are logged and dropped.
    pub fn receive_frames(&self, bytes: &[u8]) -> Vec<Frame> {
        let results = {
            let mut codec = self.codec.lock();
            codec.push(bytes);
            codec.decode_all()
        };

        let mut frames = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(frame) if frame.destination != self.self_id => {
                    debug!(
                        "{}: ignoring frame for {}: {}",
                        self.self_id, frame.destination, frame
                    );
                    self.count_dropped("address");
                }
                Ok(frame) => {
                    trace!("{}: RX {}", self.self_id, frame);
                    self.history
                        .record(HistoryDirection::Received, frame.to_string());
                    let labels = self
                        .labels
                        .with(&[("opcode", frame.opcode.as_str().to_string())]);
                    dss_metrics::metrics::counter!(metric_defs::FRAMES_RX.name, &labels)
                        .increment(1);
                    frames.push(frame);
                }
                Err(err) => {
                    warn!("{}: dropping frame: {}", self.self_id, err);
                    self.count_dropped(drop_reason(&err));
                }
            }
        }
        frames
    }

    pub(crate) fn count_dropped(&self, reason: &'static str) {
        let labels = self.labels.with(&[("reason", reason.to_string())]);
        dss_metrics::metrics::counter!(metric_defs::FRAMES_DROPPED.name, &labels).increment(1);
    }
}

impl std::fmt::Debug for ProtocolEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("self_id", &self.self_id)
            .field("peer_id", &self.peer_id)
            .field("pending_ack", &self.has_pending_ack())
            .finish()
    }
}

fn drop_reason(err: &FrameError) -> &'static str {
    match err {
        FrameError::Format(_) => "format",
        FrameError::Checksum { .. } => "checksum",
        FrameError::UnknownOpcode(_) => "opcode",
        FrameError::FieldCount { .. } => "field_count",
        FrameError::InvalidField { .. } => "invalid_field",
        FrameError::BufferOverflow { .. } => "overflow",
    }
}

// ============================================================================
// Roles
// ============================================================================

/// A protocol participant built on a [`ProtocolEngine`].
pub trait Role: Send + Sync + 'static {
    /// The shared engine.
    fn engine(&self) -> &ProtocolEngine;

    /// Handle one decoded frame addressed to this role.
    fn handle_frame(self: &Arc<Self>, frame: Frame) -> EmulatorResult<()>;

    /// Deliver transport bytes. Handler errors are logged, never propagated.
    fn receive(self: &Arc<Self>, bytes: &[u8]) {
        for frame in self.engine().receive_frames(bytes) {
            let summary = format!("{} {}", frame.opcode, frame.data.join(","));
            if let Err(err) = self.handle_frame(frame) {
                warn!(
                    "{}: failed to handle {}: {}",
                    self.engine().self_id(),
                    summary.trim_end(),
                    err
                );
                self.engine().count_dropped("handler");
            }
        }
    }
}

/// Deliver everything arriving on `inbound` to `role` until the link closes.
pub async fn pump<R: Role>(role: Arc<R>, mut inbound: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(bytes) = inbound.recv().await {
        role.receive(&bytes);
    }
    debug!("{}: inbound link closed", role.engine().self_id());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;
    use dss_protocol::Opcode;

    fn engine() -> (ProtocolEngine, crate::transport::ChannelLink) {
        let (local, remote) = ChannelTransport::pair("RC-RI", "UDB");
        let engine = ProtocolEngine::new("RC-RI", "UDB", "controller", Arc::new(local.transport));
        (engine, remote)
    }

    #[test]
    fn test_ids_wrap() {
        let (engine, _peer) = engine();
        assert_eq!(engine.next_id(), "I001");
        for _ in 0..997 {
            engine.next_id();
        }
        assert_eq!(engine.next_id(), "I999");
        assert_eq!(engine.next_id(), "I001");
    }

    #[test]
    fn test_send_request_reaches_peer() {
        let (engine, mut peer) = engine();
        let id = engine.send_request(&Request::GetIdentity).unwrap();
        let bytes = peer.inbound.try_recv().unwrap();
        let frame = Frame::parse(&bytes).unwrap();
        assert_eq!(frame.id, id);
        assert_eq!(frame.destination, "UDB");
        assert_eq!(frame.source, "RC-RI");
        assert_eq!(frame.opcode, Opcode::GetIdentity);
        assert_eq!(engine.history().len(), 1);
    }

    #[test]
    fn test_single_ack_slot() {
        let (engine, _peer) = engine();
        let mut first = engine
            .request_with_ack(&Request::LoadLine { line: "A".into() })
            .unwrap();
        assert!(matches!(
            engine.request_with_ack(&Request::FactoryTest),
            Err(EmulatorError::AckBusy)
        ));

        assert!(engine.resolve_ack("I001", Response::Ack));
        assert_eq!(first.try_recv().unwrap(), Response::Ack);
        assert!(!engine.has_pending_ack());
    }

    #[test]
    fn test_mismatched_ack_still_resolves_slot() {
        let (engine, _peer) = engine();
        let mut waiting = engine.request_with_ack(&Request::FactoryTest).unwrap();
        assert!(engine.resolve_ack("I777", Response::Nak));
        assert_eq!(waiting.try_recv().unwrap(), Response::Nak);
        assert!(!engine.has_pending_ack());
        assert!(!engine.resolve_ack("I001", Response::Ack));
    }

    #[test]
    fn test_dropped_receiver_frees_slot() {
        let (engine, _peer) = engine();
        let first = engine.request_with_ack(&Request::FactoryTest).unwrap();
        drop(first);
        assert!(!engine.has_pending_ack());
        assert!(engine.request_with_ack(&Request::FactoryTest).is_ok());
    }

    #[test]
    fn test_failed_send_clears_slot() {
        let (engine, peer) = engine();
        drop(peer);
        assert!(engine.request_with_ack(&Request::FactoryTest).is_err());
        assert!(!engine.has_pending_ack());
        assert!(!engine.resolve_ack("I001", Response::Ok));
    }

    #[test]
    fn test_receive_filters_and_drops() {
        let (engine, _peer) = engine();
        let mut bytes = Response::Ok.to_frame("I001", "RC-RI", "UDB").encode();
        bytes.extend(Response::Ok.to_frame("I002", "OTHER", "UDB").encode());
        bytes.extend(b"#I003,RC-RI,UDB,OK,*0000\r\n");

        let frames = engine.receive_frames(&bytes);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id, "I001");
        assert_eq!(engine.history().len(), 1);
    }
}
