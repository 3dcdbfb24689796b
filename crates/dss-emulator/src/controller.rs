//! The RC-RI role: a hand-held controller that requests release operations.
//!
//! Each trigger checks the current [`ReleaseState`], writes `RSTATE_REQ` and
//! the operation's parameters to the device with `ST` frames, and moves to
//! the operation's `*_REQ` state straight away. The device answers with
//! `RM` notifications; the controller pulls every changed register with
//! `GT` and advances its state whenever `RSTATE_RPT` comes back.

use crate::cancel::CancelFlag;
use crate::clock::Clock;
use crate::config::{ControllerConfig, LinkConfig, TransferConfig};
use crate::engine::{ProtocolEngine, Role};
use crate::error::{EmulatorError, EmulatorResult, TransferError};
use crate::events::ControllerEvent;
use crate::firmware::{FirmwareTransfer, Progress, TransferReport};
use crate::history::HistoryDirection;
use crate::state::{transition, Alert, Operation, ReleaseState, Transition};
use crate::transport::Transport;
use dss_metrics::metric_defs;
use dss_protocol::{Frame, Message, Request, Response};
use dss_registers::{catalog, RegisterDef, RegisterTable, RegisterValue};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

struct ControllerInner {
    registers: RegisterTable,
    state: ReleaseState,
}

/// Snapshot of the controller for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerStatus {
    /// Tracked release state.
    pub state: ReleaseState,
    /// Last value written to `RSTATE_REQ`.
    pub requested: i64,
    /// Last `RSTATE_RPT` pulled from the device.
    pub reported: i64,
    /// `RR_CTR`.
    pub attempts: i64,
    /// `RR_MISS`.
    pub misses: i64,
    /// `RRR_VAL`, in centimetres.
    pub range: i64,
}

impl fmt::Display for ControllerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (request {:#04x}, report {:#04x}, {} attempts, {} missed, range {} cm)",
            self.state, self.requested, self.reported, self.attempts, self.misses, self.range
        )
    }
}

/// What a pulled register value means for the controller.
enum Applied {
    Nothing,
    Range(i64),
    State {
        from: ReleaseState,
        transition: Transition,
        misses: i64,
    },
    Unmatched {
        state: ReleaseState,
        code: i64,
    },
}

/// The controller role.
pub struct Controller {
    engine: ProtocolEngine,
    config: ControllerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<ControllerInner>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ControllerEvent>>>,
}

impl Controller {
    /// Create a controller sending through `transport`.
    pub fn new(
        config: ControllerConfig,
        link: &LinkConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Controller {
            engine: ProtocolEngine::new(
                &link.controller_id,
                &link.device_id,
                "controller",
                transport,
            ),
            config,
            clock,
            inner: Mutex::new(ControllerInner {
                registers: RegisterTable::standard(),
                state: ReleaseState::default(),
            }),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// The controller configuration.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ControllerEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.lock().push(sender);
        receiver
    }

    fn publish(&self, event: ControllerEvent) {
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Tracked release state.
    pub fn state(&self) -> ReleaseState {
        self.inner.lock().state
    }

    fn int(&self, def: &RegisterDef) -> i64 {
        self.inner.lock().registers.get_int(def).unwrap_or_default()
    }

    /// Consecutive misses reported by the device.
    pub fn retry_count(&self) -> i64 {
        self.int(&catalog::RR_MISS)
    }

    /// Last range reported by the device, in centimetres.
    pub fn current_range(&self) -> i64 {
        self.int(&catalog::RRR_VAL)
    }

    /// Local copy of a register.
    pub fn register_value(&self, name: impl AsRef<str>) -> EmulatorResult<RegisterValue> {
        Ok(self.inner.lock().registers.get(name)?.clone())
    }

    /// Diagnostics snapshot.
    pub fn status(&self) -> ControllerStatus {
        let inner = self.inner.lock();
        let int = |def: &RegisterDef| inner.registers.get_int(def).unwrap_or_default();
        ControllerStatus {
            state: inner.state,
            requested: int(&catalog::RSTATE_REQ),
            reported: int(&catalog::RSTATE_RPT),
            attempts: int(&catalog::RR_CTR),
            misses: int(&catalog::RR_MISS),
            range: int(&catalog::RRR_VAL),
        }
    }

    fn ready_for(&self, operation: Operation) -> bool {
        operation.allowed_from(self.state())
    }

    /// Whether single or continuous ranging may start.
    pub fn is_ready_for_ranging(&self) -> bool {
        self.ready_for(Operation::SingleRange)
    }

    /// Whether the release may be armed and triggered.
    pub fn is_ready_for_trigger(&self) -> bool {
        self.ready_for(Operation::Trigger)
    }

    /// Whether public interrogation may start.
    pub fn is_ready_for_public_interrogate(&self) -> bool {
        self.ready_for(Operation::QuickId)
    }

    pub fn is_ready_for_broadcast(&self) -> bool {
        self.ready_for(Operation::Broadcast)
    }

    pub fn is_ready_for_noise_test(&self) -> bool {
        self.ready_for(Operation::NoiseTest)
    }

    pub fn is_ready_for_reboot(&self) -> bool {
        self.ready_for(Operation::Reboot)
    }

    // ========================================================================
    // Operation triggers
    // ========================================================================

    /// Return the device to idle. Allowed from any state.
    pub fn idle(&self) -> EmulatorResult<()> {
        self.request(Operation::Idle, Vec::new())
    }

    /// Initialize the release with the configured identity and limits.
    pub fn initialize(&self) -> EmulatorResult<()> {
        let params = vec![
            (&catalog::AR_MFG, RegisterValue::from(self.config.manufacturer.as_str())),
            (&catalog::AR_MODEL, RegisterValue::from(self.config.model.as_str())),
            (&catalog::SOUNDSPEED, RegisterValue::from(self.config.sound_speed)),
            (&catalog::RANGE_MAX, RegisterValue::from(self.config.range_max)),
        ];
        self.request(Operation::Init, params)
    }

    /// Connect to the release addressed by the configured PIN.
    pub fn connect(&self) -> EmulatorResult<()> {
        let params = vec![(&catalog::PIN_ID, RegisterValue::from(self.config.pin_id))];
        self.request(Operation::Connect, params)
    }

    pub fn single_range(&self) -> EmulatorResult<()> {
        self.request(Operation::SingleRange, reset_counters())
    }

    pub fn continuous_range(&self) -> EmulatorResult<()> {
        self.request(Operation::ContinuousRange, reset_counters())
    }

    /// Arm and fire the release.
    pub fn trigger_release(&self) -> EmulatorResult<()> {
        self.request(Operation::Trigger, reset_counters())
    }

    /// Broadcast to every release in `group_id`.
    pub fn broadcast(&self, group_id: i64) -> EmulatorResult<()> {
        let params = vec![
            (&catalog::GROUP_ID, RegisterValue::from(group_id)),
            (&catalog::RR_CTR, RegisterValue::from(0i64)),
        ];
        self.request(Operation::Broadcast, params)
    }

    pub fn quick_id(&self) -> EmulatorResult<()> {
        self.request(Operation::QuickId, reset_counters())
    }

    pub fn full_id(&self) -> EmulatorResult<()> {
        self.request(Operation::FullId, reset_counters())
    }

    pub fn noise_test(&self) -> EmulatorResult<()> {
        self.request(Operation::NoiseTest, reset_counters())
    }

    /// Ask the device to reboot through the operation state machine.
    pub fn reboot(&self) -> EmulatorResult<()> {
        self.request(Operation::Reboot, Vec::new())
    }

    fn request(
        &self,
        operation: Operation,
        params: Vec<(&'static RegisterDef, RegisterValue)>,
    ) -> EmulatorResult<()> {
        let requested = operation.requested_state();
        let previous = {
            let mut inner = self.inner.lock();
            let current = inner.state;
            if !operation.allowed_from(current) {
                return Err(EmulatorError::Precondition {
                    operation: operation.name(),
                    required: operation.required_states().unwrap_or_default(),
                    current,
                });
            }
            for (def, value) in &params {
                inner.registers.set(def, value.clone())?;
            }
            inner.registers.set(&catalog::RSTATE_REQ, operation.code())?;
            inner.state = requested;
            current
        };

        info!("{}: requesting {}", self.engine.self_id(), operation);
        self.engine
            .history()
            .record(HistoryDirection::Marker, format!("request {}", operation));
        self.state_changed(previous, requested);

        let writes = params
            .iter()
            .map(|(def, value)| (def.name, value.to_string()))
            .chain(std::iter::once((
                catalog::RSTATE_REQ.name,
                operation.code().to_string(),
            )));
        for (name, value) in writes {
            let sent = self.engine.send_request(&Request::SetRegister {
                name: name.to_string(),
                value,
            });
            if let Err(err) = sent {
                self.revert(requested, previous);
                return Err(err);
            }
        }
        Ok(())
    }

    fn revert(&self, requested: ReleaseState, previous: ReleaseState) {
        let reverted = {
            let mut inner = self.inner.lock();
            let unchanged = inner.state == requested;
            if unchanged {
                inner.state = previous;
            }
            unchanged
        };
        if reverted {
            warn!(
                "{}: request not sent, back to {}",
                self.engine.self_id(),
                previous
            );
            self.state_changed(requested, previous);
        }
    }

    fn state_changed(&self, from: ReleaseState, to: ReleaseState) {
        debug!("{}: state {} -> {}", self.engine.self_id(), from, to);
        let labels = self
            .engine
            .labels()
            .with(&[("state", to.as_str().to_string())]);
        dss_metrics::metrics::counter!(metric_defs::STATE_TRANSITIONS.name, &labels).increment(1);
        self.publish(ControllerEvent::StateChanged { from, to });
    }

    // ========================================================================
    // Manual access
    // ========================================================================

    /// Ask the device for a register's value.
    pub fn get_register(&self, name: &str) -> EmulatorResult<()> {
        self.inner.lock().registers.lookup(name)?;
        self.engine.send_request(&Request::GetRegister {
            name: name.to_string(),
        })?;
        Ok(())
    }

    /// Write a register locally and on the device.
    pub fn set_register(&self, name: &str, value: impl Into<RegisterValue>) -> EmulatorResult<()> {
        let value = value.into();
        let text = value.to_string();
        self.inner.lock().registers.set(name, value)?;
        self.engine.send_request(&Request::SetRegister {
            name: name.to_string(),
            value: text,
        })?;
        Ok(())
    }

    /// Write any device register behind the device password.
    pub fn set_protected(&self, password: &str, name: &str, value: &str) -> EmulatorResult<()> {
        self.engine.send_request(&Request::SetProtected {
            password: password.to_string(),
            name: name.to_string(),
            value: value.to_string(),
        })?;
        Ok(())
    }

    /// Ask the device for its serial number.
    pub fn get_identity(&self) -> EmulatorResult<()> {
        self.engine.send_request(&Request::GetIdentity)?;
        Ok(())
    }

    /// Replace the device serial number.
    pub fn set_identity(&self, password: &str, serial: &str) -> EmulatorResult<()> {
        self.engine.send_request(&Request::SetIdentity {
            password: password.to_string(),
            serial: serial.to_string(),
        })?;
        Ok(())
    }

    pub fn factory_test(&self) -> EmulatorResult<()> {
        self.engine.send_request(&Request::FactoryTest)?;
        Ok(())
    }

    /// Send a raw `RB`, bypassing the operation state machine.
    pub fn reboot_device(&self) -> EmulatorResult<()> {
        self.engine.send_request(&Request::Reboot)?;
        Ok(())
    }

    /// Send `request` and wait for its `OK`/`NO`/`ACK`/`NAK`.
    ///
    /// `timeout` is wall time and does not follow the simulation speed.
    pub async fn execute(&self, request: &Request, timeout: Duration) -> EmulatorResult<Response> {
        let receiver = self.engine.request_with_ack(request)?;
        tokio::select! {
            response = receiver => response.map_err(|_| {
                EmulatorError::Protocol("acknowledgement slot released without an answer".to_string())
            }),
            _ = tokio::time::sleep(timeout) => Err(EmulatorError::Timeout(timeout)),
        }
    }

    /// Like [`execute`](Self::execute) with the configured request timeout.
    pub async fn execute_default(&self, request: &Request) -> EmulatorResult<Response> {
        self.execute(request, self.config.request_timeout()).await
    }

    /// Upload a firmware image and request a reboot.
    pub async fn upload_firmware<I, S>(
        &self,
        lines: I,
        transfer: &TransferConfig,
        cancel: &CancelFlag,
        progress: impl FnMut(Progress),
    ) -> Result<TransferReport, TransferError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FirmwareTransfer::new(&self.engine, Arc::clone(&self.clock), transfer.clone())
            .run(lines, cancel, progress)
            .await
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    fn apply_register(&self, name: &str, value: &str) -> EmulatorResult<()> {
        let applied = {
            let mut inner = self.inner.lock();
            inner.registers.set_value_string(name, value)?;
            if name == catalog::RSTATE_RPT.name {
                let code = inner.registers.get_int(&catalog::RSTATE_RPT)?;
                let current = inner.state;
                match transition(current, code) {
                    Some(transition) => {
                        inner.state = transition.next;
                        Applied::State {
                            from: current,
                            transition,
                            misses: inner.registers.get_int(&catalog::RR_MISS)?,
                        }
                    }
                    None => Applied::Unmatched {
                        state: current,
                        code,
                    },
                }
            } else if name == catalog::RRR_VAL.name {
                Applied::Range(inner.registers.get_int(&catalog::RRR_VAL)?)
            } else {
                Applied::Nothing
            }
        };

        match applied {
            Applied::Nothing => {}
            Applied::Range(range) => self.publish(ControllerEvent::RangeReceived { range }),
            Applied::Unmatched { state, code } => warn!(
                "{}: report {:#04x} does not apply in {}",
                self.engine.self_id(),
                code,
                state
            ),
            Applied::State {
                from,
                transition,
                misses,
            } => {
                self.state_changed(from, transition.next);
                match transition.alert {
                    Some(Alert::Detection) => {
                        info!("{}: detection in {}", self.engine.self_id(), transition.next);
                        self.publish(ControllerEvent::DetectionAlert {
                            state: transition.next,
                        });
                    }
                    Some(Alert::Release) => {
                        info!("{}: release fired", self.engine.self_id());
                        self.publish(ControllerEvent::ReleaseAlert);
                    }
                    Some(Alert::Retry) => {
                        warn!(
                            "{}: {} ({} missed)",
                            self.engine.self_id(),
                            transition.next,
                            misses
                        );
                        self.publish(ControllerEvent::RetryCountChanged { misses });
                    }
                    None => {}
                }
            }
        }
        Ok(())
    }

    /// Pull every register named in an `RM` bitmap, lowest bit first.
    fn pull_changes(&self, bitmap: u64) -> EmulatorResult<()> {
        let names: Vec<&'static str> = self
            .inner
            .lock()
            .registers
            .registers_in(bitmap)
            .map(|reg| reg.name())
            .collect();
        if names.is_empty() {
            debug!(
                "{}: change map {:#x} names no known register",
                self.engine.self_id(),
                bitmap
            );
        }
        for name in names {
            self.engine.send_request(&Request::GetRegister {
                name: name.to_string(),
            })?;
        }
        Ok(())
    }

    fn apply_identity(&self, serial: String) {
        let stored = self
            .inner
            .lock()
            .registers
            .set_value_string(&catalog::SN, &serial);
        if let Err(err) = stored {
            debug!("{}: serial {:?} kept as text only: {}", self.engine.self_id(), serial, err);
        }
        info!("{}: device serial {}", self.engine.self_id(), serial);
        self.publish(ControllerEvent::IdentityReceived { serial });
    }
}

impl Role for Controller {
    fn engine(&self) -> &ProtocolEngine {
        &self.engine
    }

    fn handle_frame(self: &Arc<Self>, frame: Frame) -> EmulatorResult<()> {
        match Message::from_frame(&frame)? {
            Message::Response(Response::RegisterValue { name, value }) => {
                self.apply_register(&name, &value)
            }
            Message::Response(Response::Identity { serial }) => {
                self.apply_identity(serial);
                Ok(())
            }
            Message::Response(ack) => {
                self.engine.resolve_ack(&frame.id, ack);
                Ok(())
            }
            Message::Request(Request::RegisterMap { bitmap }) => self.pull_changes(bitmap),
            Message::Request(request) => Err(EmulatorError::Protocol(format!(
                "unexpected {} request from {}",
                request.opcode(),
                frame.source
            ))),
        }
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("engine", &self.engine)
            .field("status", &self.status())
            .finish()
    }
}

fn reset_counters() -> Vec<(&'static RegisterDef, RegisterValue)> {
    vec![
        (&catalog::RR_MISS, RegisterValue::from(0i64)),
        (&catalog::RR_CTR, RegisterValue::from(0i64)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::transport::{ChannelLink, ChannelTransport};

    fn controller() -> (Arc<Controller>, ChannelLink) {
        let (local, remote) = ChannelTransport::pair("RC-RI", "UDB");
        let controller = Controller::new(
            ControllerConfig::default(),
            &LinkConfig::default(),
            Arc::new(local.transport),
            Arc::new(TokioClock),
        );
        (controller, remote)
    }

    fn sent(peer: &mut ChannelLink) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(bytes) = peer.inbound.try_recv() {
            frames.push(Frame::parse(&bytes).unwrap());
        }
        frames
    }

    fn rt(controller: &Arc<Controller>, name: &str, value: &str) {
        let frame = Response::RegisterValue {
            name: name.into(),
            value: value.into(),
        }
        .to_frame("I001", "RC-RI", "UDB");
        controller.receive(&frame.encode());
    }

    #[test]
    fn test_initialize_writes_parameters_then_request() {
        let (controller, mut peer) = controller();
        rt(&controller, "RSTATE_RPT", "1");
        assert_eq!(controller.state(), ReleaseState::IdleAck);

        controller.initialize().unwrap();
        assert_eq!(controller.state(), ReleaseState::InitReq);

        let frames = sent(&mut peer);
        let writes: Vec<(&str, &str)> = frames
            .iter()
            .map(|f| (f.data[0].as_str(), f.data[1].as_str()))
            .collect();
        assert_eq!(
            writes,
            vec![
                ("AR_MFG", "ASH"),
                ("AR_MODEL", "ARC1-12"),
                ("SOUNDSPEED", "1"),
                ("RANGE_MAX", "1"),
                ("RSTATE_REQ", "16"),
            ]
        );
    }

    #[test]
    fn test_register_map_pulls_in_bit_order() {
        let (controller, mut peer) = controller();
        let bitmap = catalog::RSTATE_RPT.mask() | catalog::RR_MISS.mask() | catalog::RRR_VAL.mask();
        let frame = Request::RegisterMap { bitmap }.to_frame("I004", "RC-RI", "UDB");
        controller.receive(&frame.encode());

        let names: Vec<String> = sent(&mut peer).into_iter().map(|f| f.data[0].clone()).collect();
        assert_eq!(names, vec!["RR_MISS", "RRR_VAL", "RSTATE_RPT"]);
    }

    #[test]
    fn test_events_for_range_and_failure() {
        let (controller, _peer) = controller();
        let mut events = controller.subscribe();
        rt(&controller, "RSTATE_RPT", "1");
        controller.initialize().unwrap();
        rt(&controller, "RSTATE_RPT", "0x11");
        rt(&controller, "RR_MISS", "2");
        rt(&controller, "RRR_VAL", "3456");
        rt(&controller, "RSTATE_RPT", "0x13");

        let mut received = Vec::new();
        while let Ok(event) = events.try_recv() {
            received.push(event);
        }
        assert!(received.contains(&ControllerEvent::RangeReceived { range: 3456 }));
        assert!(received.contains(&ControllerEvent::RetryCountChanged { misses: 2 }));
        assert_eq!(controller.state(), ReleaseState::InitFail);
        assert_eq!(controller.retry_count(), 2);
        assert_eq!(controller.current_range(), 3456);
    }

    #[test]
    fn test_unmatched_report_keeps_state() {
        let (controller, _peer) = controller();
        rt(&controller, "RSTATE_RPT", "0x55");
        assert_eq!(controller.state(), ReleaseState::IdleReq);
        assert_eq!(controller.status().reported, 0x55);
    }

    #[test]
    fn test_failed_send_reverts_state() {
        let (controller, peer) = controller();
        drop(peer);
        assert!(matches!(controller.idle(), Err(EmulatorError::Transport(_))));
        assert_eq!(controller.state(), ReleaseState::IdleReq);

        rt(&controller, "RSTATE_RPT", "1");
        assert!(controller.initialize().is_err());
        assert_eq!(controller.state(), ReleaseState::IdleAck);
    }

    #[test]
    fn test_identity_event() {
        let (controller, _peer) = controller();
        let mut events = controller.subscribe();
        let frame = Response::Identity {
            serial: "24680".into(),
        }
        .to_frame("I002", "RC-RI", "UDB");
        controller.receive(&frame.encode());
        assert_eq!(
            events.try_recv().unwrap(),
            ControllerEvent::IdentityReceived {
                serial: "24680".into()
            }
        );
        assert_eq!(
            controller.register_value("SN").unwrap(),
            RegisterValue::Integer(24680)
        );
    }

    #[test]
    fn test_manual_access_validates_locally() {
        let (controller, mut peer) = controller();
        assert!(matches!(
            controller.get_register("BOGUS"),
            Err(EmulatorError::Register(_))
        ));
        assert!(controller.set_register("PIN_ID", "text").is_err());
        assert!(sent(&mut peer).is_empty());

        controller.set_register("PIN_ID", 777i64).unwrap();
        let frames = sent(&mut peer);
        assert_eq!(frames[0].data, vec!["PIN_ID", "777"]);
    }
}
