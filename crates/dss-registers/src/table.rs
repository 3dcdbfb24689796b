//! The register table owned by each role.

use crate::catalog::{CHANGE_MAP, REG_MAP, STANDARD_REGISTERS};
use crate::error::{RegisterError, RegisterResult};
use crate::types::{Register, RegisterDef};
use crate::value::{DataType, RegisterValue};
use std::collections::{HashMap, HashSet};

/// A named, typed set of registers with a change map.
///
/// Registers are kept in ascending bit order. Changes are recorded by
/// setting the register's bit in the `REG_MAP` bitmap register, and
/// [`take_changes`](Self::take_changes) reads and clears it in one step.
#[derive(Debug, Clone)]
pub struct RegisterTable {
    registers: Vec<Register>,
    index: HashMap<&'static str, usize>,
    change_map: usize,
}

impl RegisterTable {
    /// Create a table holding the standard register set.
    pub fn standard() -> Self {
        Self::build(STANDARD_REGISTERS)
    }

    /// Create a table from custom definitions.
    ///
    /// Names and bits must be unique, bits must fit in 64, and the set must
    /// include the `REG_MAP` bitmap register.
    pub fn with_definitions(defs: &[RegisterDef]) -> RegisterResult<Self> {
        let mut names: HashSet<&'static str> = HashSet::new();
        let mut bits: HashMap<u8, &'static str> = HashMap::new();
        for def in defs {
            if def.bit > 63 {
                return Err(RegisterError::BitOutOfRange {
                    name: def.name,
                    bit: def.bit,
                });
            }
            if !names.insert(def.name) {
                return Err(RegisterError::DuplicateName(def.name));
            }
            if let Some(first) = bits.insert(def.bit, def.name) {
                return Err(RegisterError::DuplicateBit {
                    bit: def.bit,
                    first,
                    second: def.name,
                });
            }
        }
        let has_change_map = defs
            .iter()
            .any(|def| def.name == CHANGE_MAP && def.data_type() == DataType::Bitmap);
        if !has_change_map {
            return Err(RegisterError::MissingChangeMap(CHANGE_MAP));
        }
        Ok(Self::build(defs))
    }

    fn build(defs: &[RegisterDef]) -> Self {
        let mut registers: Vec<Register> = defs.iter().copied().map(Register::new).collect();
        if !registers.iter().any(|reg| reg.name() == CHANGE_MAP) {
            registers.push(Register::new(REG_MAP));
        }
        registers.sort_by_key(Register::bit);
        let index: HashMap<_, _> = registers
            .iter()
            .enumerate()
            .map(|(i, reg)| (reg.name(), i))
            .collect();
        let change_map = index.get(CHANGE_MAP).copied().unwrap_or_default();
        Self {
            registers,
            index,
            change_map,
        }
    }

    fn position(&self, name: &str) -> RegisterResult<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| RegisterError::UnknownRegister(name.to_string()))
    }

    /// Look up a register by name.
    pub fn lookup(&self, name: impl AsRef<str>) -> RegisterResult<&Register> {
        let pos = self.position(name.as_ref())?;
        Ok(&self.registers[pos])
    }

    /// Whether a register with this name exists.
    pub fn contains(&self, name: impl AsRef<str>) -> bool {
        self.index.contains_key(name.as_ref())
    }

    /// Iterate registers in ascending bit order.
    pub fn iter(&self) -> impl Iterator<Item = &Register> {
        self.registers.iter()
    }

    /// Current value of a register.
    pub fn get(&self, name: impl AsRef<str>) -> RegisterResult<&RegisterValue> {
        self.lookup(name).map(Register::value)
    }

    /// Integer value of a register.
    pub fn get_int(&self, name: impl AsRef<str>) -> RegisterResult<i64> {
        let reg = self.lookup(name)?;
        reg.value()
            .as_i64()
            .ok_or_else(|| mismatch(reg, DataType::Integer))
    }

    /// Bitmap value of a register.
    pub fn get_bitmap(&self, name: impl AsRef<str>) -> RegisterResult<u64> {
        let reg = self.lookup(name)?;
        reg.value()
            .as_bitmap()
            .ok_or_else(|| mismatch(reg, DataType::Bitmap))
    }

    /// Text value of a register.
    pub fn get_text(&self, name: impl AsRef<str>) -> RegisterResult<&str> {
        let reg = self.lookup(name)?;
        reg.value()
            .as_str()
            .ok_or_else(|| mismatch(reg, DataType::Text))
    }

    /// Store a typed value. The value's type must match the register's.
    pub fn set(
        &mut self,
        name: impl AsRef<str>,
        value: impl Into<RegisterValue>,
    ) -> RegisterResult<()> {
        let pos = self.position(name.as_ref())?;
        let value = value.into();
        let reg = &mut self.registers[pos];
        let expected = reg.def().data_type();
        if value.data_type() != expected {
            return Err(RegisterError::TypeMismatch {
                name: reg.name().to_string(),
                expected,
                actual: value.data_type(),
            });
        }
        *reg.value_mut() = value;
        Ok(())
    }

    /// Wire representation of a register's value.
    pub fn value_string(&self, name: impl AsRef<str>) -> RegisterResult<String> {
        self.get(name).map(ToString::to_string)
    }

    /// Parse a wire value according to the register's type and store it.
    pub fn set_value_string(&mut self, name: impl AsRef<str>, text: &str) -> RegisterResult<()> {
        let pos = self.position(name.as_ref())?;
        let reg = &mut self.registers[pos];
        let data_type = reg.def().data_type();
        let value =
            RegisterValue::parse(data_type, text).ok_or_else(|| RegisterError::InvalidValue {
                name: reg.name().to_string(),
                data_type,
                value: text.to_string(),
            })?;
        *reg.value_mut() = value;
        Ok(())
    }

    /// Mark a register as changed by setting its bit in the change map.
    pub fn dispatch_change(&mut self, name: impl AsRef<str>) -> RegisterResult<()> {
        let mask = self.lookup(name)?.def().mask();
        let map = self.change_map_mut();
        if let RegisterValue::Bitmap(bits) = map {
            *bits |= mask;
        }
        Ok(())
    }

    /// Store a value and mark the register as changed.
    pub fn update(
        &mut self,
        name: impl AsRef<str>,
        value: impl Into<RegisterValue>,
    ) -> RegisterResult<()> {
        let name = name.as_ref();
        self.set(name, value)?;
        self.dispatch_change(name)
    }

    /// Pending change bits without clearing them.
    pub fn change_map(&self) -> u64 {
        self.registers[self.change_map]
            .value()
            .as_bitmap()
            .unwrap_or(0)
    }

    /// Read and clear the change map.
    ///
    /// Returns `None` when nothing changed since the last call.
    pub fn take_changes(&mut self) -> Option<u64> {
        let bits = match self.change_map_mut() {
            RegisterValue::Bitmap(bits) => std::mem::take(bits),
            _ => 0,
        };
        (bits != 0).then_some(bits)
    }

    fn change_map_mut(&mut self) -> &mut RegisterValue {
        self.registers[self.change_map].value_mut()
    }

    /// Registers whose bits are set in `bitmap`, ascending by bit.
    ///
    /// Bits without a register are ignored.
    pub fn registers_in(&self, bitmap: u64) -> impl Iterator<Item = &Register> {
        self.registers
            .iter()
            .filter(move |reg| bitmap & reg.def().mask() != 0)
    }

    /// Reset every register to its default value.
    pub fn reset(&mut self) {
        for reg in &mut self.registers {
            *reg.value_mut() = reg.def().default_value();
        }
    }
}

impl Default for RegisterTable {
    fn default() -> Self {
        Self::standard()
    }
}

fn mismatch(reg: &Register, expected: DataType) -> RegisterError {
    RegisterError::TypeMismatch {
        name: reg.name().to_string(),
        expected,
        actual: reg.value().data_type(),
    }
}
