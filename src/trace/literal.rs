use serde::{Deserialize, Serialize};
use std::fmt;

/// Parsed numeric literal (integer or floating)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Number::Int(i) => Some(i),
            Number::Float(_) => None,
        }
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a == b,
            _ => {
                let (a, b) = (self.as_f64(), other.as_f64());
                // NaN equals NaN so literal equality stays reflexive
                a == b || (a.is_nan() && b.is_nan())
            }
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(i) => write!(f, "{}", i),
            Number::Float(v) => write!(f, "{}", v),
        }
    }
}

/// A literal value as it appeared in a trace line
///
/// Each variant carries the parsed semantic `value` and the original `raw`
/// text. Equality compares semantic values only, so `0x10` and `16` are the
/// same literal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Literal {
    /// Quoted string argument (escapes decoded)
    String { value: String, raw: String },
    /// Integer or floating point number
    Number { value: Number, raw: String },
    /// `NULL`
    Null { raw: String },
    /// Symbolic constant or anything without a richer shape
    /// (`O_RDONLY|O_CLOEXEC`, `ENOENT`, `{st_mode=...}`, `[3, 4]`)
    Identifier { value: String, raw: String },
}

impl Literal {
    pub fn string(value: impl Into<String>) -> Self {
        let value = value.into();
        let raw = format!("{:?}", value);
        Literal::String { value, raw }
    }

    pub fn int(value: i64) -> Self {
        Literal::Number {
            value: Number::Int(value),
            raw: value.to_string(),
        }
    }

    pub fn float(value: f64) -> Self {
        Literal::Number {
            value: Number::Float(value),
            raw: value.to_string(),
        }
    }

    pub fn null() -> Self {
        Literal::Null {
            raw: "NULL".to_string(),
        }
    }

    pub fn identifier(value: impl Into<String>) -> Self {
        let value = value.into();
        Literal::Identifier {
            raw: value.clone(),
            value,
        }
    }

    /// Original textual form
    pub fn raw(&self) -> &str {
        match self {
            Literal::String { raw, .. }
            | Literal::Number { raw, .. }
            | Literal::Null { raw }
            | Literal::Identifier { raw, .. } => raw,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::String { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<Number> {
        match self {
            Literal::Number { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Semantic value rendered as text, used for parameter value lookup
    pub fn value_text(&self) -> String {
        match self {
            Literal::String { value, .. } | Literal::Identifier { value, .. } => value.clone(),
            Literal::Number { value, .. } => value.to_string(),
            Literal::Null { .. } => "NULL".to_string(),
        }
    }

    /// Stable text key that agrees with semantic equality
    ///
    /// Two literals that compare equal produce the same key; the variant is
    /// part of the key so `"3"` and `3` stay distinct.
    pub fn key(&self) -> String {
        match self {
            Literal::String { value, .. } => format!("s:{:?}", value),
            Literal::Number { value, .. } => format!("n:{}", number_key(*value)),
            Literal::Null { .. } => "null".to_string(),
            Literal::Identifier { value, .. } => format!("i:{}", value),
        }
    }
}

fn number_key(number: Number) -> String {
    match number {
        Number::Int(i) => i.to_string(),
        Number::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => (f as i64).to_string(),
        Number::Float(f) => f.to_string(),
    }
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Literal::String { value: a, .. }, Literal::String { value: b, .. }) => a == b,
            (Literal::Number { value: a, .. }, Literal::Number { value: b, .. }) => a == b,
            (Literal::Null { .. }, Literal::Null { .. }) => true,
            (Literal::Identifier { value: a, .. }, Literal::Identifier { value: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String { value, .. } => write!(f, "{:?}", value),
            Literal::Number { value, .. } => write!(f, "{}", value),
            Literal::Null { .. } => write!(f, "NULL"),
            Literal::Identifier { value, .. } => write!(f, "{}", value),
        }
    }
}

/// Placeholder for an argument expected to vary between equivalent runs
///
/// Two holes are equal iff their indices are equal. Holes carry no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hole {
    pub index: usize,
}

impl Hole {
    pub fn new(index: usize) -> Self {
        Hole { index }
    }
}

impl fmt::Display for Hole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.index)
    }
}

/// Argument or return value: either a literal or a hole
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Hole(Hole),
    Literal(Literal),
}

impl Value {
    pub fn is_hole(&self) -> bool {
        matches!(self, Value::Hole(_))
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Value::Literal(lit) => Some(lit),
            Value::Hole(_) => None,
        }
    }

    /// Stable text key, see [`Literal::key`]; holes key by index
    pub fn key(&self) -> String {
        match self {
            Value::Literal(lit) => lit.key(),
            Value::Hole(hole) => format!("?{}", hole.index),
        }
    }

    /// Text for rendering back into strace form (raw literal text, `?N` for holes)
    pub fn raw_text(&self) -> String {
        match self {
            Value::Literal(lit) => lit.raw().to_string(),
            Value::Hole(hole) => hole.to_string(),
        }
    }
}

impl From<Literal> for Value {
    fn from(lit: Literal) -> Self {
        Value::Literal(lit)
    }
}

impl From<Hole> for Value {
    fn from(hole: Hole) -> Self {
        Value::Hole(hole)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Literal(lit) => write!(f, "{}", lit),
            Value::Hole(hole) => write!(f, "{}", hole),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_literal_creation() {
        let literal = Literal::String {
            value: "hello".to_string(),
            raw: "\"hello\"".to_string(),
        };
        assert_eq!(literal.as_str(), Some("hello"));
        assert_eq!(literal.raw(), "\"hello\"");
    }

    #[test]
    fn test_number_literal_int_and_float() {
        let int = Literal::int(42);
        assert_eq!(int.as_number(), Some(Number::Int(42)));
        assert_eq!(int.raw(), "42");

        let float = Literal::float(2.5);
        assert_eq!(float.as_number(), Some(Number::Float(2.5)));
    }

    #[test]
    fn test_null_and_identifier() {
        assert_eq!(Literal::null().raw(), "NULL");
        let ident = Literal::identifier("EINVAL");
        assert_eq!(ident.value_text(), "EINVAL");
        assert_eq!(ident.raw(), "EINVAL");
    }

    #[test]
    fn test_equality_ignores_raw() {
        let hex = Literal::Number {
            value: Number::Int(16),
            raw: "0x10".to_string(),
        };
        assert_eq!(hex, Literal::int(16));
        assert_ne!(Literal::int(16), Literal::string("16"));
    }

    #[test]
    fn test_mixed_number_equality() {
        assert_eq!(Number::Int(3), Number::Float(3.0));
        assert_ne!(Number::Int(3), Number::Float(3.5));
    }

    #[test]
    fn test_nan_literal_is_reflexive() {
        let nan = Literal::float(f64::NAN);
        assert_eq!(nan, nan.clone());
        assert_eq!(Number::Float(f64::NAN), Number::Float(f64::NAN));
        assert_ne!(Number::Float(f64::NAN), Number::Int(0));
        assert_eq!(Number::Float(0.0), Number::Float(-0.0));
    }

    #[test]
    fn test_key_agrees_with_equality() {
        assert_eq!(Literal::int(3).key(), Literal::float(3.0).key());
        assert_ne!(Literal::int(3).key(), Literal::string("3").key());
        assert_ne!(Literal::identifier("x").key(), Literal::string("x").key());
        assert_eq!(Value::Hole(Hole::new(1)).key(), "?1");
    }

    #[test]
    fn test_hole_equality() {
        assert_eq!(Hole::new(1), Hole::new(1));
        assert_ne!(Hole::new(1), Hole::new(2));
        assert_eq!(Hole::new(5).index, 5);
    }

    #[test]
    fn test_hole_never_equals_literal() {
        let hole: Value = Hole::new(0).into();
        let lit: Value = Literal::int(0).into();
        assert_ne!(hole, lit);
    }

    #[test]
    fn test_value_serde_roundtrip_shape() {
        let value: Value = Literal::string("/etc/hosts").into();
        let json = serde_json::to_string(&value).unwrap();
        assert!(json.contains("\"kind\":\"string\""));
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);

        let hole: Value = Hole::new(2).into();
        let json = serde_json::to_string(&hole).unwrap();
        assert_eq!(json, "{\"index\":2}");
    }
}
