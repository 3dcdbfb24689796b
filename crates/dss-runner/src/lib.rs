//! Runner for the DSS acoustic release emulator.
//!
//! Provides the pieces behind the `dss-sim` binary:
//!
//! - [`SimConfig`]: YAML configuration with command-line overrides.
//! - [`run_demo`]: an in-memory controller/device session.
//! - [`serve_device`] and [`upload_file`]: the two roles over TCP.
//! - [`log_filter`] and [`init_logging`]: tracing setup.

pub mod config;
pub mod demo;
pub mod error;
pub mod logging;
pub mod tcp;
pub mod upload;

pub use config::{ConfigOverrides, SimConfig};
pub use demo::{run_demo, DemoObserver, DemoSummary, Quiet};
pub use error::{RunnerError, RunnerResult};
pub use logging::{init_logging, log_filter, DEFAULT_LOG_LEVEL};
pub use tcp::{serve_device, TcpLink, TcpTransport};
pub use upload::{read_firmware, upload_file};
