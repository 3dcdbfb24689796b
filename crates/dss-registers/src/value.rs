//! Register value types and their wire representation.
//!
//! This module provides:
//! - [`DataType`] - The type of value a register holds
//! - [`RegisterValue`] - The dynamic value stored in a register
//! - [`RegisterDefault`] - Default values usable in const contexts

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Data Type
// ============================================================================

/// The type of value a register holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Signed integer.
    Integer,
    /// 64-bit bitmap.
    Bitmap,
    /// Free text.
    Text,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Integer => write!(f, "integer"),
            DataType::Bitmap => write!(f, "bitmap"),
            DataType::Text => write!(f, "text"),
        }
    }
}

// ============================================================================
// Register Value
// ============================================================================

/// A value held by a register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegisterValue {
    /// Integer value.
    Integer(i64),
    /// Bitmap value.
    Bitmap(u64),
    /// Text value.
    Text(String),
}

impl RegisterValue {
    /// The data type of this value.
    pub fn data_type(&self) -> DataType {
        match self {
            RegisterValue::Integer(_) => DataType::Integer,
            RegisterValue::Bitmap(_) => DataType::Bitmap,
            RegisterValue::Text(_) => DataType::Text,
        }
    }

    /// Convert to i64 if this is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RegisterValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Convert to u64 if this is a bitmap.
    pub fn as_bitmap(&self) -> Option<u64> {
        match self {
            RegisterValue::Bitmap(v) => Some(*v),
            _ => None,
        }
    }

    /// Borrow the text if this is a text value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RegisterValue::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Parse a wire value as the given type.
    ///
    /// Numbers are decimal, or hexadecimal with a `0x` prefix. Returns `None`
    /// if the text does not fit the type.
    pub fn parse(data_type: DataType, text: &str) -> Option<RegisterValue> {
        match data_type {
            DataType::Integer => parse_i64(text.trim()).map(RegisterValue::Integer),
            DataType::Bitmap => parse_u64(text.trim()).map(RegisterValue::Bitmap),
            DataType::Text => Some(RegisterValue::Text(text.to_string())),
        }
    }
}

/// Digits after a `0x` prefix. A sign after the prefix is not a hex number.
fn hex_digits(text: &str) -> Option<&str> {
    text.strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .filter(|digits| !digits.starts_with(['+', '-']))
}

fn parse_i64(text: &str) -> Option<i64> {
    let (negative, magnitude) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    match hex_digits(magnitude) {
        Some(digits) => {
            let value = i64::from_str_radix(digits, 16).ok()?;
            Some(if negative { -value } else { value })
        }
        None => text.parse().ok(),
    }
}

fn parse_u64(text: &str) -> Option<u64> {
    match hex_digits(text) {
        Some(digits) => u64::from_str_radix(digits, 16).ok(),
        None => text.parse().ok(),
    }
}

impl fmt::Display for RegisterValue {
    /// Wire representation: integers and bitmaps in decimal, text verbatim.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterValue::Integer(v) => write!(f, "{}", v),
            RegisterValue::Bitmap(v) => write!(f, "{}", v),
            RegisterValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for RegisterValue {
    fn from(v: i64) -> Self {
        RegisterValue::Integer(v)
    }
}

impl From<i32> for RegisterValue {
    fn from(v: i32) -> Self {
        RegisterValue::Integer(i64::from(v))
    }
}

impl From<u64> for RegisterValue {
    fn from(v: u64) -> Self {
        RegisterValue::Bitmap(v)
    }
}

impl From<&str> for RegisterValue {
    fn from(v: &str) -> Self {
        RegisterValue::Text(v.to_string())
    }
}

impl From<String> for RegisterValue {
    fn from(v: String) -> Self {
        RegisterValue::Text(v)
    }
}

// ============================================================================
// Register Default (const-compatible)
// ============================================================================

/// The default value for a register, usable in const contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterDefault {
    /// Integer value.
    Integer(i64),
    /// Bitmap value.
    Bitmap(u64),
    /// Text value (static str for const compatibility).
    Text(&'static str),
}

impl RegisterDefault {
    /// Convert to a RegisterValue.
    pub fn to_value(self) -> RegisterValue {
        match self {
            RegisterDefault::Integer(v) => RegisterValue::Integer(v),
            RegisterDefault::Bitmap(v) => RegisterValue::Bitmap(v),
            RegisterDefault::Text(v) => RegisterValue::Text(v.to_string()),
        }
    }

    /// The data type of this default.
    pub const fn data_type(&self) -> DataType {
        match self {
            RegisterDefault::Integer(_) => DataType::Integer,
            RegisterDefault::Bitmap(_) => DataType::Bitmap,
            RegisterDefault::Text(_) => DataType::Text,
        }
    }
}

impl From<RegisterDefault> for RegisterValue {
    fn from(d: RegisterDefault) -> Self {
        d.to_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decimal_and_hex() {
        assert_eq!(
            RegisterValue::parse(DataType::Integer, "66"),
            Some(RegisterValue::Integer(66))
        );
        assert_eq!(
            RegisterValue::parse(DataType::Integer, "0x42"),
            Some(RegisterValue::Integer(0x42))
        );
        assert_eq!(
            RegisterValue::parse(DataType::Integer, "-12"),
            Some(RegisterValue::Integer(-12))
        );
        assert_eq!(
            RegisterValue::parse(DataType::Bitmap, "0X24"),
            Some(RegisterValue::Bitmap(36))
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(RegisterValue::parse(DataType::Integer, "twelve"), None);
        assert_eq!(RegisterValue::parse(DataType::Bitmap, "-1"), None);
        assert_eq!(RegisterValue::parse(DataType::Integer, "0x"), None);
        assert_eq!(RegisterValue::parse(DataType::Integer, "0x-5"), None);
        assert_eq!(RegisterValue::parse(DataType::Integer, "0x+5"), None);
        assert_eq!(RegisterValue::parse(DataType::Integer, "-0x+5"), None);
        assert_eq!(RegisterValue::parse(DataType::Bitmap, "0x+5"), None);
    }

    #[test]
    fn test_text_kept_verbatim() {
        assert_eq!(
            RegisterValue::parse(DataType::Text, " Range 1 "),
            Some(RegisterValue::Text(" Range 1 ".to_string()))
        );
    }

    #[test]
    fn test_wire_display() {
        assert_eq!(RegisterValue::Integer(0x42).to_string(), "66");
        assert_eq!(RegisterValue::Bitmap(1 << 33).to_string(), "8589934592");
        assert_eq!(RegisterValue::from("ASH").to_string(), "ASH");
    }

    #[test]
    fn test_serde_untagged() {
        let json = serde_json::to_string(&RegisterValue::Integer(5)).unwrap();
        assert_eq!(json, "5");
        let text: RegisterValue = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(text, RegisterValue::Text("abc".to_string()));
    }
}
