//! Error types for the emulator.

use crate::state::ReleaseState;
use dss_protocol::FrameError;
use dss_registers::RegisterError;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the protocol engine and the two roles.
#[derive(Debug, Error)]
pub enum EmulatorError {
    /// A frame failed to parse or did not fit its opcode.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// A register access failed.
    #[error("register error: {0}")]
    Register(#[from] RegisterError),

    /// A controller trigger was invoked in the wrong state.
    #[error("{operation} requires {}, current state is {current}", describe_states(.required))]
    Precondition {
        /// Name of the rejected operation.
        operation: &'static str,
        /// States the operation may start from.
        required: &'static [ReleaseState],
        /// State at the time of the call.
        current: ReleaseState,
    },

    /// A valid frame arrived that the role cannot handle.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Another acknowledgement-correlated command is still outstanding.
    #[error("an acknowledgement is already pending")]
    AckBusy,

    /// A correlated request was not answered in time.
    #[error("no acknowledgement within {0:?}")]
    Timeout(Duration),

    /// The transport refused or lost outbound bytes.
    #[error("transport error: {0}")]
    Transport(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O failure, e.g. while persisting firmware.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_states(states: &[ReleaseState]) -> String {
    match states {
        [single] => single.to_string(),
        _ => {
            let names: Vec<String> = states.iter().map(ToString::to_string).collect();
            format!("one of {}", names.join(", "))
        }
    }
}

/// Result type alias for emulator operations.
pub type EmulatorResult<T> = Result<T, EmulatorError>;

/// Why a firmware transfer stopped.
#[derive(Debug, Error)]
pub enum TransferError {
    /// A line was refused or unanswered on every attempt.
    #[error("line {line_index} not acknowledged after {attempts} attempts")]
    RetryExhausted {
        /// Position of the failing line in the source.
        line_index: usize,
        /// Attempts made for that line.
        attempts: u32,
    },

    /// The transfer was cancelled before completing.
    #[error("transfer cancelled at line {line_index}")]
    Cancelled {
        /// Position of the line that would have been sent next.
        line_index: usize,
    },

    /// The engine failed underneath the transfer.
    #[error(transparent)]
    Emulator(#[from] EmulatorError),
}
