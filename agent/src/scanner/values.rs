//! Typed values for scan materialisation and refinement.
//!
//! Scalar layout follows the host architecture (`to_ne_bytes`); wide
//! strings are UTF-16LE, which zero-pads the high bytes for ASCII input.

use serde_json::Value;
use shared::constants::FLOAT_SCAN_EPSILON;
use shared::errors::{MemoryError, ScanError};
use strum_macros::Display;
use toolkit::Address;
use toolkit::capabilities::Toolkit;
use toolkit::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub(crate) enum ValueType {
    #[strum(to_string = "int8")]
    Int8,
    #[strum(to_string = "int16")]
    Int16,
    #[strum(to_string = "int32")]
    Int32,
    #[strum(to_string = "int64")]
    Int64,
    #[strum(to_string = "float")]
    Float,
    #[strum(to_string = "double")]
    Double,
    #[strum(to_string = "string")]
    Utf8,
    #[strum(to_string = "wstring")]
    Utf16,
}

impl ValueType {
    pub(crate) fn parse(name: &str) -> Result<ValueType, ScanError> {
        Ok(match name.to_lowercase().as_str() {
            "int8" | "byte" => ValueType::Int8,
            "int16" | "short" => ValueType::Int16,
            "int32" | "int" => ValueType::Int32,
            "int64" | "long" => ValueType::Int64,
            "float" => ValueType::Float,
            "double" => ValueType::Double,
            "string" => ValueType::Utf8,
            "wstring" => ValueType::Utf16,
            _ => return Err(ScanError::UnknownType { name: name.to_string() }),
        })
    }

    /// Fixed byte width; `None` for the string types, whose width is the
    /// length of the scanned text.
    pub(crate) fn width(self) -> Option<usize> {
        match self {
            ValueType::Int8 => Some(1),
            ValueType::Int16 => Some(2),
            ValueType::Int32 | ValueType::Float => Some(4),
            ValueType::Int64 | ValueType::Double => Some(8),
            ValueType::Utf8 | ValueType::Utf16 => None,
        }
    }

    /// Materialise the byte pattern an initial scan searches for.
    pub(crate) fn encode(self, raw: &Value) -> Result<Vec<u8>, ScanError> {
        match self {
            ValueType::Int8 => {
                let v = int_in_range(raw, i8::MIN as i64, u8::MAX as i64)?;
                Ok(vec![v as u8])
            }
            ValueType::Int16 => {
                let v = int_in_range(raw, i16::MIN as i64, u16::MAX as i64)?;
                Ok((v as i16).to_ne_bytes().to_vec())
            }
            ValueType::Int32 => {
                let v = int_in_range(raw, i32::MIN as i64, u32::MAX as i64)?;
                Ok((v as i32).to_ne_bytes().to_vec())
            }
            ValueType::Int64 => {
                let v = parse_int(raw)?;
                Ok(v.to_ne_bytes().to_vec())
            }
            ValueType::Float => {
                let v = parse_float(raw)?;
                Ok((v as f32).to_ne_bytes().to_vec())
            }
            ValueType::Double => {
                let v = parse_float(raw)?;
                Ok(v.to_ne_bytes().to_vec())
            }
            ValueType::Utf8 => Ok(parse_text(raw)?.into_bytes()),
            ValueType::Utf16 => Ok(parse_text(raw)?
                .encode_utf16()
                .flat_map(u16::to_le_bytes)
                .collect()),
        }
    }

    /// Parse the comparison target for a refinement step.
    pub(crate) fn parse_target(self, raw: &Value) -> Result<TypedValue, ScanError> {
        Ok(match self {
            ValueType::Int8 | ValueType::Int16 | ValueType::Int32 | ValueType::Int64 => {
                TypedValue::Signed(parse_int(raw)?)
            }
            ValueType::Float | ValueType::Double => TypedValue::Float(parse_float(raw)?),
            ValueType::Utf8 | ValueType::Utf16 => TypedValue::Text(parse_text(raw)?),
        })
    }

    /// Live re-read at a prior result. `size_hint` is the hit size, which
    /// is what bounds string reads.
    pub(crate) fn read(
        self,
        toolkit: &dyn Toolkit,
        addr: Address,
        size_hint: usize,
    ) -> Result<TypedValue, MemoryError> {
        let width = self.width().unwrap_or(size_hint);
        let bytes = toolkit.read_bytes(addr, width)?;
        let fixed = |n: usize| -> Result<&[u8], MemoryError> {
            bytes
                .get(..n)
                .ok_or(MemoryError::Unreadable { address: addr.get(), len: n })
        };
        Ok(match self {
            ValueType::Int8 => TypedValue::Signed(bytes[0] as i8 as i64),
            ValueType::Int16 => {
                TypedValue::Signed(i16::from_ne_bytes(fixed(2)?.try_into().unwrap()) as i64)
            }
            ValueType::Int32 => {
                TypedValue::Signed(i32::from_ne_bytes(fixed(4)?.try_into().unwrap()) as i64)
            }
            ValueType::Int64 => {
                TypedValue::Signed(i64::from_ne_bytes(fixed(8)?.try_into().unwrap()))
            }
            ValueType::Float => {
                TypedValue::Float(f32::from_ne_bytes(fixed(4)?.try_into().unwrap()) as f64)
            }
            ValueType::Double => {
                TypedValue::Float(f64::from_ne_bytes(fixed(8)?.try_into().unwrap()))
            }
            ValueType::Utf8 => TypedValue::Text(String::from_utf8_lossy(&bytes).into_owned()),
            ValueType::Utf16 => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect();
                TypedValue::Text(String::from_utf16_lossy(&units))
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TypedValue {
    Signed(i64),
    Float(f64),
    Text(String),
}

impl TypedValue {
    /// Equality with the approximate-float rule.
    pub(crate) fn approx_eq(&self, other: &TypedValue) -> bool {
        match (self, other) {
            (TypedValue::Signed(a), TypedValue::Signed(b)) => a == b,
            (TypedValue::Float(a), TypedValue::Float(b)) => (a - b).abs() < FLOAT_SCAN_EPSILON,
            (TypedValue::Text(a), TypedValue::Text(b)) => a == b,
            _ => false,
        }
    }

    pub(crate) fn compare(&self, target: &TypedValue, cmp: Comparison) -> bool {
        use std::cmp::Ordering;
        match cmp {
            Comparison::Eq => self.approx_eq(target),
            Comparison::Ne => !self.approx_eq(target),
            _ => {
                let ord = match (self, target) {
                    (TypedValue::Signed(a), TypedValue::Signed(b)) => Some(a.cmp(b)),
                    (TypedValue::Float(a), TypedValue::Float(b)) => a.partial_cmp(b),
                    (TypedValue::Text(a), TypedValue::Text(b)) => Some(a.cmp(b)),
                    _ => None,
                };
                match ord {
                    Some(Ordering::Greater) => matches!(cmp, Comparison::Gt | Comparison::Ge),
                    Some(Ordering::Less) => matches!(cmp, Comparison::Lt | Comparison::Le),
                    Some(Ordering::Equal) => matches!(cmp, Comparison::Ge | Comparison::Le),
                    None => false,
                }
            }
        }
    }

    pub(crate) fn display(&self) -> String {
        match self {
            TypedValue::Signed(v) => v.to_string(),
            TypedValue::Float(v) => v.to_string(),
            TypedValue::Text(v) => v.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub(crate) enum Comparison {
    #[strum(to_string = "eq")]
    Eq,
    #[strum(to_string = "ne")]
    Ne,
    #[strum(to_string = "gt")]
    Gt,
    #[strum(to_string = "lt")]
    Lt,
    #[strum(to_string = "ge")]
    Ge,
    #[strum(to_string = "le")]
    Le,
}

impl Comparison {
    pub(crate) fn parse(name: &str) -> Result<Comparison, ScanError> {
        Ok(match name.to_lowercase().as_str() {
            "eq" => Comparison::Eq,
            "ne" => Comparison::Ne,
            "gt" => Comparison::Gt,
            "lt" => Comparison::Lt,
            "ge" => Comparison::Ge,
            "le" => Comparison::Le,
            _ => return Err(ScanError::UnknownComparison { name: name.to_string() }),
        })
    }
}

fn parse_int(raw: &Value) -> Result<i64, ScanError> {
    let parsed = match raw {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            let s = s.trim();
            if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                u64::from_str_radix(hex, 16).ok().map(|u| u as i64)
            } else {
                s.parse().ok()
            }
        }
        _ => None,
    };
    parsed.ok_or_else(|| ScanError::BadValue {
        message: format!("`{raw}` is not an integer"),
    })
}

fn int_in_range(raw: &Value, min: i64, max: i64) -> Result<i64, ScanError> {
    let v = parse_int(raw)?;
    if v < min || v > max {
        return Err(ScanError::BadValue {
            message: format!("{v} does not fit the requested width"),
        });
    }
    Ok(v)
}

fn parse_float(raw: &Value) -> Result<f64, ScanError> {
    let parsed = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| ScanError::BadValue {
        message: format!("`{raw}` is not a number"),
    })
}

fn parse_text(raw: &Value) -> Result<String, ScanError> {
    raw.as_str()
        .map(str::to_string)
        .ok_or_else(|| ScanError::BadValue {
            message: format!("`{raw}` is not a string"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn type_aliases_parse() {
        assert_eq!(ValueType::parse("byte").unwrap(), ValueType::Int8);
        assert_eq!(ValueType::parse("SHORT").unwrap(), ValueType::Int16);
        assert_eq!(ValueType::parse("int").unwrap(), ValueType::Int32);
        assert_eq!(ValueType::parse("long").unwrap(), ValueType::Int64);
        assert!(ValueType::parse("quad").is_err());
    }

    #[test]
    fn integer_encodings_are_native_width() {
        assert_eq!(ValueType::Int8.encode(&json!(0x41)).unwrap(), vec![0x41]);
        assert_eq!(
            ValueType::Int32.encode(&json!(42)).unwrap(),
            42i32.to_ne_bytes().to_vec()
        );
        assert_eq!(
            ValueType::Int64.encode(&json!("0xdeadbeef")).unwrap(),
            0xdead_beefi64.to_ne_bytes().to_vec()
        );
        assert!(ValueType::Int8.encode(&json!(4000)).is_err());
    }

    #[test]
    fn wide_strings_zero_pad_ascii() {
        assert_eq!(
            ValueType::Utf16.encode(&json!("AB")).unwrap(),
            vec![0x41, 0x00, 0x42, 0x00]
        );
    }

    #[test]
    fn float_equality_is_approximate() {
        let a = TypedValue::Float(1.00001);
        let b = TypedValue::Float(1.00002);
        assert!(a.approx_eq(&b));
        assert!(!TypedValue::Float(1.0).approx_eq(&TypedValue::Float(1.1)));
        assert!(a.compare(&b, Comparison::Eq));
        assert!(TypedValue::Float(2.0).compare(&TypedValue::Float(1.0), Comparison::Gt));
    }

    #[test]
    fn comparisons_on_signed_values() {
        let v = TypedValue::Signed(10);
        assert!(v.compare(&TypedValue::Signed(10), Comparison::Eq));
        assert!(v.compare(&TypedValue::Signed(11), Comparison::Lt));
        assert!(v.compare(&TypedValue::Signed(10), Comparison::Ge));
        assert!(!v.compare(&TypedValue::Signed(10), Comparison::Ne));
    }
}
