//! Error types for the DSS frame codec.

use thiserror::Error;

/// Errors that can occur when decoding or interpreting a DSS frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The frame text is structurally malformed.
    #[error("malformed frame: {0}")]
    Format(String),

    /// The trailing checksum does not match the frame body.
    #[error("checksum mismatch: frame carries {received:04X}, body sums to {computed:04X}")]
    Checksum {
        /// Checksum carried by the frame.
        received: u16,
        /// Checksum computed over the frame body.
        computed: u16,
    },

    /// The opcode is not a known request or response code.
    #[error("unknown opcode: {0:?}")]
    UnknownOpcode(String),

    /// The number of data fields does not match the opcode.
    #[error("{opcode} expects {expected} data field(s), got {actual}")]
    FieldCount {
        /// Opcode mnemonic.
        opcode: &'static str,
        /// Required number of data fields.
        expected: usize,
        /// Number of data fields present.
        actual: usize,
    },

    /// A data field could not be interpreted (e.g. a non-numeric bitmap).
    #[error("invalid {field} field: {value:?}")]
    InvalidField {
        /// Field being interpreted.
        field: &'static str,
        /// Offending text.
        value: String,
    },

    /// A line grew past the maximum frame length before a terminator arrived.
    #[error("buffer overflow: max {max} bytes, got {actual}")]
    BufferOverflow { max: usize, actual: usize },
}

/// Result type alias for codec operations.
pub type FrameResult<T> = Result<T, FrameError>;
