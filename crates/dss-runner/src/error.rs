//! Error types for the runner.

use dss_emulator::{EmulatorError, ReleaseState, TransferError};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while configuring or running a simulation.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Invalid configuration or command line.
    #[error("configuration error: {0}")]
    Config(String),

    /// A file named on the command line could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The config document is not valid YAML for [`SimConfig`](crate::SimConfig).
    #[error("invalid config document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Socket or filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The emulator refused a request.
    #[error(transparent)]
    Emulator(#[from] EmulatorError),

    /// A firmware transfer failed.
    #[error("firmware transfer failed: {0}")]
    Transfer(#[from] TransferError),

    /// The demo stopped before the release fired.
    #[error("demo stopped in {state}: {reason}")]
    Demo {
        /// Controller state when the demo stopped.
        state: ReleaseState,
        /// What went wrong.
        reason: String,
    },

    /// Ctrl-C was pressed.
    #[error("interrupted")]
    Interrupted,
}

/// Result type alias for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;
