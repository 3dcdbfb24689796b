//! Register model shared by the DSS controller and device roles.
//!
//! Each role owns a [`RegisterTable`]: a fixed set of named, typed registers
//! with a dedicated change map. Setting a register's bit in the change map
//! marks it for the next `RM` notification, and [`RegisterTable::take_changes`]
//! drains the map atomically so each change is announced once.
//!
//! # Example
//!
//! ```
//! use dss_registers::{catalog, RegisterTable};
//!
//! let mut table = RegisterTable::standard();
//! table.update(&catalog::FIRMWARE, 7).unwrap();
//! table.update(&catalog::AR_THOLD_DB, 60).unwrap();
//! assert_eq!(table.take_changes(), Some(0b100100));
//! assert_eq!(table.take_changes(), None);
//! ```

pub mod catalog;
mod error;
mod table;
mod types;
mod value;

pub use error::{RegisterError, RegisterResult};
pub use table::RegisterTable;
pub use types::{Direction, Register, RegisterDef};
pub use value::{DataType, RegisterDefault, RegisterValue};
