//! Controller and device protocol engines for the DSS acoustic-release link.
//!
//! Two roles talk over a byte [`Transport`]:
//!
//! - [`Controller`] (RC-RI) requests operations and tracks a
//!   [`ReleaseState`] from the reports it pulls back.
//! - [`Device`] (UDB) executes operations on background tasks, simulating
//!   latency, failures and sensor telemetry.
//!
//! Both are built on a [`ProtocolEngine`] and receive bytes through the
//! [`Role`] trait, either by calling [`Role::receive`] directly or by running
//! [`pump`] on a channel.
//!
//! ```no_run
//! use dss_emulator::{pump, ChannelTransport, Controller, Device, EmulatorConfig, TokioClock};
//! use std::sync::Arc;
//!
//! # async fn demo() -> dss_emulator::EmulatorResult<()> {
//! let config = EmulatorConfig::default();
//! let (rc, udb) = ChannelTransport::pair("RC-RI", "UDB");
//! let clock = Arc::new(TokioClock);
//! let controller = Controller::new(
//!     config.controller.clone(),
//!     &config.link,
//!     Arc::new(rc.transport),
//!     clock.clone(),
//! );
//! let device = Device::new(config.device.clone(), &config.link, Arc::new(udb.transport), clock)?;
//! tokio::spawn(pump(controller.clone(), rc.inbound));
//! tokio::spawn(pump(device.clone(), udb.inbound));
//!
//! controller.idle()?;
//! # Ok(())
//! # }
//! ```

mod cancel;
mod clock;
pub mod config;
mod controller;
mod device;
mod engine;
mod error;
mod events;
mod firmware;
mod history;
pub mod state;
mod telemetry;
mod transport;

pub use cancel::{race_with_cancellation, CancelFlag};
pub use clock::{Clock, ScaledClock, Sleep, TokioClock};
pub use config::{
    ControllerConfig, DetectionConfig, DeviceConfig, EmulatorConfig, LinkConfig,
    OperationTimings, TransferConfig,
};
pub use controller::{Controller, ControllerStatus};
pub use device::{Device, DeviceStatus};
pub use engine::{pump, ProtocolEngine, Role, MAX_SEQUENCE};
pub use error::{EmulatorError, EmulatorResult, TransferError};
pub use events::ControllerEvent;
pub use firmware::{FirmwareTransfer, Progress, TransferReport};
pub use history::{CommandHistory, HistoryDirection, HistoryRecord};
pub use state::{Alert, Operation, ReleaseState, Transition};
pub use telemetry::{SensorOverrides, SensorReadings};
pub use transport::{ChannelLink, ChannelTransport, LinkState, Transport};
