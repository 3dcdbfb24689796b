//! Register definitions and metadata.

use crate::value::{DataType, RegisterDefault, RegisterValue};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of the link writes a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Written by the controller, read by the device.
    ControllerToDevice,
    /// Written by the device, read by the controller.
    DeviceToController,
    /// Written by either side.
    Both,
}

impl Direction {
    /// Whether the controller may write this register with `ST`.
    pub fn controller_writable(&self) -> bool {
        matches!(self, Direction::ControllerToDevice | Direction::Both)
    }

    /// Whether the device reports changes to this register.
    pub fn device_reported(&self) -> bool {
        matches!(self, Direction::DeviceToController | Direction::Both)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ControllerToDevice => write!(f, "RC-RI->UDB"),
            Direction::DeviceToController => write!(f, "UDB->RC-RI"),
            Direction::Both => write!(f, "both"),
        }
    }
}

/// Static metadata for one register.
///
/// Definitions are `Copy` and usable in const contexts so the standard
/// catalog can be declared as a list of constants.
#[derive(Debug, Clone, Copy)]
pub struct RegisterDef {
    /// Wire name (e.g. `RSTATE_RPT`).
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// Which side writes the register.
    pub direction: Direction,
    /// Initial value; also fixes the register's data type.
    pub default: RegisterDefault,
    /// Position in the change map.
    pub bit: u8,
}

impl RegisterDef {
    /// Create an integer register definition with a zero default.
    pub const fn integer(
        name: &'static str,
        description: &'static str,
        direction: Direction,
        bit: u8,
    ) -> Self {
        Self {
            name,
            description,
            direction,
            default: RegisterDefault::Integer(0),
            bit,
        }
    }

    /// Create a text register definition with an empty default.
    pub const fn text(
        name: &'static str,
        description: &'static str,
        direction: Direction,
        bit: u8,
    ) -> Self {
        Self {
            name,
            description,
            direction,
            default: RegisterDefault::Text(""),
            bit,
        }
    }

    /// Create a bitmap register definition with an empty default.
    pub const fn bitmap(
        name: &'static str,
        description: &'static str,
        direction: Direction,
        bit: u8,
    ) -> Self {
        Self {
            name,
            description,
            direction,
            default: RegisterDefault::Bitmap(0),
            bit,
        }
    }

    /// Replace the default value.
    pub const fn with_default(mut self, default: RegisterDefault) -> Self {
        self.default = default;
        self
    }

    /// The register's data type.
    pub const fn data_type(&self) -> DataType {
        self.default.data_type()
    }

    /// Mask with only this register's change-map bit set.
    pub const fn mask(&self) -> u64 {
        1u64 << self.bit
    }

    /// Get the default value as a RegisterValue.
    pub fn default_value(&self) -> RegisterValue {
        self.default.to_value()
    }
}

impl PartialEq for RegisterDef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for RegisterDef {}

impl std::hash::Hash for RegisterDef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl AsRef<str> for RegisterDef {
    fn as_ref(&self) -> &str {
        self.name
    }
}

/// A register definition together with its current value.
#[derive(Debug, Clone, PartialEq)]
pub struct Register {
    def: RegisterDef,
    value: RegisterValue,
}

impl Register {
    pub(crate) fn new(def: RegisterDef) -> Self {
        Self {
            value: def.default_value(),
            def,
        }
    }

    /// The register's definition.
    pub fn def(&self) -> &RegisterDef {
        &self.def
    }

    /// Wire name.
    pub fn name(&self) -> &'static str {
        self.def.name
    }

    /// Change-map bit.
    pub fn bit(&self) -> u8 {
        self.def.bit
    }

    /// Which side writes the register.
    pub fn direction(&self) -> Direction {
        self.def.direction
    }

    /// Current value.
    pub fn value(&self) -> &RegisterValue {
        &self.value
    }

    pub(crate) fn value_mut(&mut self) -> &mut RegisterValue {
        &mut self.value
    }
}
