//! Error types for the register table.

use crate::value::DataType;
use thiserror::Error;

/// Errors that can occur when working with registers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegisterError {
    /// No register with this name exists in the table.
    #[error("unknown register: {0}")]
    UnknownRegister(String),

    /// A wire value could not be converted to the register's type.
    #[error("invalid value {value:?} for {data_type} register {name}")]
    InvalidValue {
        /// Register name.
        name: String,
        /// Register data type.
        data_type: DataType,
        /// Offending text.
        value: String,
    },

    /// A typed value does not match the register's type.
    #[error("register {name} holds {expected} values, got {actual}")]
    TypeMismatch {
        /// Register name.
        name: String,
        /// Register data type.
        expected: DataType,
        /// Type of the supplied value.
        actual: DataType,
    },

    /// Two definitions share a change-map bit.
    #[error("change-map bit {bit} is used by both {first} and {second}")]
    DuplicateBit {
        /// Conflicting bit.
        bit: u8,
        /// First register using it.
        first: &'static str,
        /// Second register using it.
        second: &'static str,
    },

    /// Two definitions share a name.
    #[error("register {0} is defined twice")]
    DuplicateName(&'static str),

    /// A change-map bit does not fit in 64 bits.
    #[error("register {name} uses change-map bit {bit}, maximum is 63")]
    BitOutOfRange {
        /// Register name.
        name: &'static str,
        /// Requested bit.
        bit: u8,
    },

    /// The definitions lack the bitmap register that accumulates changes.
    #[error("register set has no {0} bitmap register")]
    MissingChangeMap(&'static str),
}

/// Result type alias for register operations.
pub type RegisterResult<T> = Result<T, RegisterError>;
