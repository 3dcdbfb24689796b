//! In-memory walkthrough of a release session.
//!
//! The controller and device share a [`ChannelTransport`] pair. The demo
//! drives idle, init, connect, single range and trigger, waiting for each
//! operation to settle before starting the next, and can finish with a
//! firmware upload.

use crate::config::SimConfig;
use crate::error::{RunnerError, RunnerResult};
use dss_emulator::{
    pump, CancelFlag, ChannelTransport, Clock, Controller, ControllerEvent, ControllerStatus,
    Device, DeviceStatus, EmulatorResult, Progress, ReleaseState, TransferReport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use ReleaseState::*;

/// Simulated time allowed for one step to settle.
const STEP_LIMIT: Duration = Duration::from_secs(600);

type Trigger = fn(&Controller) -> EmulatorResult<()>;

struct Step {
    name: &'static str,
    trigger: Trigger,
    success: ReleaseState,
    failures: &'static [ReleaseState],
}

const STEPS: [Step; 5] = [
    Step {
        name: "idle",
        trigger: Controller::idle,
        success: IdleAck,
        failures: &[],
    },
    Step {
        name: "initialize",
        trigger: Controller::initialize,
        success: InitOk,
        failures: &[InitFail],
    },
    Step {
        name: "connect",
        trigger: Controller::connect,
        success: ConOk,
        failures: &[],
    },
    Step {
        name: "single range",
        trigger: Controller::single_range,
        success: RngSingleOk,
        failures: &[RngSingleFail],
    },
    Step {
        name: "trigger release",
        trigger: Controller::trigger_release,
        success: AtTrgOk,
        failures: &[AtArmFail, AtTrgFail],
    },
];

/// Receives what happens during the demo.
pub trait DemoObserver {
    /// A controller event was published.
    fn event(&mut self, _event: &ControllerEvent) {}

    /// A firmware line was acknowledged.
    fn progress(&mut self, _progress: Progress) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default)]
pub struct Quiet;

impl DemoObserver for Quiet {}

/// Final state of a demo run.
#[derive(Debug, Clone)]
pub struct DemoSummary {
    /// Controller snapshot after the last step.
    pub controller: ControllerStatus,
    /// Device snapshot after the last step.
    pub device: DeviceStatus,
    /// Upload result, when a firmware image was given.
    pub transfer: Option<TransferReport>,
}

/// Run the walkthrough. `firmware`, when given, is uploaded after the
/// release fires.
pub async fn run_demo(
    config: &SimConfig,
    firmware: Option<Vec<String>>,
    cancel: &CancelFlag,
    observer: &mut dyn DemoObserver,
) -> RunnerResult<DemoSummary> {
    let emulator = &config.emulator;
    let clock: Arc<dyn Clock> = Arc::new(config.clock()?);
    let (rc, udb) =
        ChannelTransport::pair(&emulator.link.controller_id, &emulator.link.device_id);
    let controller = Controller::new(
        emulator.controller.clone(),
        &emulator.link,
        Arc::new(rc.transport),
        Arc::clone(&clock),
    );
    let device = Device::new(
        emulator.device.clone(),
        &emulator.link,
        Arc::new(udb.transport),
        Arc::clone(&clock),
    )?;
    let mut events = controller.subscribe();
    let pumps = [
        tokio::spawn(pump(Arc::clone(&controller), rc.inbound)),
        tokio::spawn(pump(Arc::clone(&device), udb.inbound)),
    ];

    let outcome = match walk(&controller, &mut events, clock.as_ref(), cancel, observer).await {
        Ok(()) => match firmware {
            Some(lines) => {
                info!("uploading {} firmware lines", lines.len());
                let report = controller
                    .upload_firmware(lines, &emulator.transfer, cancel, |p| observer.progress(p))
                    .await;
                // Let the device answer the trailing RB.
                clock.sleep(Duration::from_millis(100)).await;
                report.map(Some).map_err(RunnerError::from)
            }
            None => Ok(None),
        },
        Err(err) => Err(err),
    };
    while let Ok(event) = events.try_recv() {
        observer.event(&event);
    }

    device.shutdown();
    for task in pumps {
        task.abort();
    }
    let transfer = outcome?;
    Ok(DemoSummary {
        controller: controller.status(),
        device: device.status(),
        transfer,
    })
}

async fn walk(
    controller: &Controller,
    events: &mut mpsc::UnboundedReceiver<ControllerEvent>,
    clock: &dyn Clock,
    cancel: &CancelFlag,
    observer: &mut dyn DemoObserver,
) -> RunnerResult<()> {
    for step in &STEPS {
        info!("demo: {}", step.name);
        (step.trigger)(controller)?;
        let reached = settle(step, events, clock, cancel, observer).await?;
        if reached != step.success {
            warn!("demo: {} ended in {}", step.name, reached);
            return Err(RunnerError::Demo {
                state: reached,
                reason: format!("{} failed", step.name),
            });
        }
    }
    Ok(())
}

/// Wait until the controller reaches the step's success or failure state.
async fn settle(
    step: &Step,
    events: &mut mpsc::UnboundedReceiver<ControllerEvent>,
    clock: &dyn Clock,
    cancel: &CancelFlag,
    observer: &mut dyn DemoObserver,
) -> RunnerResult<ReleaseState> {
    let mut deadline = clock.sleep(STEP_LIMIT);
    let mut last = step.success;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RunnerError::Interrupted),
            _ = &mut deadline => {
                return Err(RunnerError::Demo {
                    state: last,
                    reason: format!("{} did not settle", step.name),
                });
            }
            event = events.recv() => {
                let Some(event) = event else {
                    return Err(RunnerError::Demo {
                        state: last,
                        reason: "controller stopped publishing".to_string(),
                    });
                };
                observer.event(&event);
                if let ControllerEvent::StateChanged { to, .. } = event {
                    last = to;
                    if to == step.success || step.failures.contains(&to) {
                        return Ok(to);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dss_emulator::DeviceConfig;

    #[derive(Default)]
    struct Recorder {
        events: Vec<ControllerEvent>,
        percents: Vec<u8>,
    }

    impl DemoObserver for Recorder {
        fn event(&mut self, event: &ControllerEvent) {
            self.events.push(event.clone());
        }

        fn progress(&mut self, progress: Progress) {
            self.percents.push(progress.percent);
        }
    }

    fn fast(device: DeviceConfig) -> SimConfig {
        let mut config = SimConfig::default();
        config.emulator.device = device;
        config.emulator.speed = 1000.0;
        config
    }

    #[tokio::test]
    async fn test_demo_fires_the_release() {
        let dir = tempfile::tempdir().unwrap();
        let config = fast(DeviceConfig {
            seed: Some(3),
            firmware_dir: dir.path().to_path_buf(),
            ..DeviceConfig::default()
        });
        let mut recorder = Recorder::default();
        let firmware = vec![":10000000AA".to_string(), ":00000001FF".to_string()];

        let summary = run_demo(&config, Some(firmware), &CancelFlag::new(), &mut recorder)
            .await
            .unwrap();

        assert_eq!(summary.controller.state, AtTrgOk);
        assert!(recorder.events.contains(&ControllerEvent::ReleaseAlert));
        assert_eq!(recorder.percents, vec![50, 100]);
        assert_eq!(summary.transfer.unwrap().lines_sent, 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_demo_stops_on_failure() {
        let config = fast(DeviceConfig {
            seed: Some(4),
            simulate_failures: true,
            failure_rate: 1.0,
            ..DeviceConfig::default()
        });
        let err = run_demo(&config, None, &CancelFlag::new(), &mut Quiet)
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Demo { state: InitFail, .. }));
    }

    #[tokio::test]
    async fn test_demo_cancelled() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = run_demo(&fast(DeviceConfig::default()), None, &cancel, &mut Quiet)
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Interrupted));
    }
}
