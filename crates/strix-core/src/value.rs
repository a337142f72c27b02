//! Runtime values carried by snapshot records and context labels

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Primitive type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttrType {
    Int,
    Uint,
    Double,
    Addr,
    Bool,
    Str,
    Type,
}

/// Runtime value.
///
/// `Null` is the empty value used by synthetic context nodes; measurement
/// data always carries one of the typed variants.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub enum Value {
    #[default]
    Null,
    Int(i64),
    Uint(u64),
    Double(f64),
    Addr(u64),
    Bool(bool),
    Str(Arc<str>),
    Type(AttrType),
}

impl Value {
    pub fn attr_type(&self) -> Option<AttrType> {
        match self {
            Value::Null => None,
            Value::Int(_) => Some(AttrType::Int),
            Value::Uint(_) => Some(AttrType::Uint),
            Value::Double(_) => Some(AttrType::Double),
            Value::Addr(_) => Some(AttrType::Addr),
            Value::Bool(_) => Some(AttrType::Bool),
            Value::Str(_) => Some(AttrType::Str),
            Value::Type(_) => Some(AttrType::Type),
        }
    }

    /// Numeric coercion used by the aggregation kernels.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Uint(n) => Some(*n as f64),
            Value::Double(n) => Some(*n),
            Value::Addr(n) => Some(*n as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Uint(n) | Value::Addr(n) => Some(*n),
            Value::Int(n) => u64::try_from(*n).ok(),
            _ => None,
        }
    }

    /// 8-byte reinterpretation for key encoding.
    ///
    /// Strings have no fixed-width rendering and cannot participate in keys;
    /// they yield `None` and the caller drops the entry.
    pub fn to_key_bits(&self) -> Option<u64> {
        match self {
            Value::Null => None,
            Value::Int(n) => Some(*n as u64),
            Value::Uint(n) => Some(*n),
            Value::Double(n) => Some(n.to_bits()),
            Value::Addr(n) => Some(*n),
            Value::Bool(b) => Some(*b as u64),
            Value::Str(_) => None,
            Value::Type(t) => Some(*t as u64),
        }
    }

    /// Typed re-interpretation of key bits at re-emit.
    pub fn from_key_bits(ty: AttrType, bits: u64) -> Option<Value> {
        match ty {
            AttrType::Int => Some(Value::Int(bits as i64)),
            AttrType::Uint => Some(Value::Uint(bits)),
            AttrType::Double => Some(Value::Double(f64::from_bits(bits))),
            AttrType::Addr => Some(Value::Addr(bits)),
            AttrType::Bool => Some(Value::Bool(bits != 0)),
            AttrType::Str => None,
            AttrType::Type => None,
        }
    }
}

// Bit-pattern equality: doubles compare by bits so the context-tree intern
// map satisfies the Eq/Hash contract (NaN == NaN, -0.0 != 0.0).
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Uint(a), Value::Uint(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Addr(a), Value::Addr(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Int(n) => n.hash(state),
            Value::Uint(n) | Value::Addr(n) => n.hash(state),
            Value::Double(n) => n.to_bits().hash(state),
            Value::Bool(b) => b.hash(state),
            Value::Str(s) => s.hash(state),
            Value::Type(t) => t.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Uint(n) => write!(f, "{}", n),
            Value::Double(n) => write!(f, "{}", n),
            Value::Addr(n) => write!(f, "{:#x}", n),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Str(s) => write!(f, "\"{}\"", s),
            Value::Type(t) => write!(f, "{:?}", t),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Uint(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Double(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_double() {
        assert_eq!(Value::Int(-3).as_double(), Some(-3.0));
        assert_eq!(Value::Uint(7).as_double(), Some(7.0));
        assert_eq!(Value::Double(2.5).as_double(), Some(2.5));
        assert_eq!(Value::Bool(true).as_double(), Some(1.0));
        assert_eq!(Value::from("x").as_double(), None);
        assert_eq!(Value::Null.as_double(), None);
    }

    #[test]
    fn test_key_bits_roundtrip() {
        let cases = [
            (Value::Int(-42), AttrType::Int),
            (Value::Uint(42), AttrType::Uint),
            (Value::Double(3.25), AttrType::Double),
            (Value::Addr(0xdead_beef), AttrType::Addr),
            (Value::Bool(true), AttrType::Bool),
        ];
        for (v, ty) in cases {
            let bits = v.to_key_bits().unwrap();
            assert_eq!(Value::from_key_bits(ty, bits), Some(v));
        }
    }

    #[test]
    fn test_strings_have_no_key_bits() {
        assert_eq!(Value::from("phase").to_key_bits(), None);
        assert_eq!(Value::from_key_bits(AttrType::Str, 0), None);
    }

    #[test]
    fn test_bitwise_equality() {
        assert_eq!(Value::Double(f64::NAN), Value::Double(f64::NAN));
        assert_ne!(Value::Double(0.0), Value::Double(-0.0));
        assert_ne!(Value::Int(1), Value::Uint(1));
    }
}
