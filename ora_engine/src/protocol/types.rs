use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Wire-type tag the provider uses to interpret a bound buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WireType {
    Int,
    Uint,
    BFloat,
    BDouble,
    #[default]
    Chr,
    Bin,
    Number,
    Dat,
    TimestampTz,
    IntervalYm,
    IntervalDs,
    Rset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Text,
    Bool,
    Bytes,
    Num,
    Date,
    Timestamp,
    IntervalYM,
    IntervalDS,
}

impl ScalarKind {
    pub fn wire(self) -> WireType {
        match self {
            ScalarKind::I8 | ScalarKind::I16 | ScalarKind::I32 | ScalarKind::I64 => WireType::Int,
            ScalarKind::U8 | ScalarKind::U16 | ScalarKind::U32 | ScalarKind::U64 => WireType::Uint,
            ScalarKind::F32 => WireType::BFloat,
            ScalarKind::F64 => WireType::BDouble,
            // Booleans travel as a one-character string.
            ScalarKind::Text | ScalarKind::Bool => WireType::Chr,
            ScalarKind::Bytes => WireType::Bin,
            ScalarKind::Num => WireType::Number,
            ScalarKind::Date => WireType::Dat,
            ScalarKind::Timestamp => WireType::TimestampTz,
            ScalarKind::IntervalYM => WireType::IntervalYm,
            ScalarKind::IntervalDS => WireType::IntervalDs,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ScalarKind::I8
                | ScalarKind::I16
                | ScalarKind::I32
                | ScalarKind::I64
                | ScalarKind::U8
                | ScalarKind::U16
                | ScalarKind::U32
                | ScalarKind::U64
        )
    }
}

/// Year-to-month interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntervalYM {
    pub years: i32,
    pub months: i32,
}

/// Day-to-second interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntervalDS {
    pub days: i32,
    pub hours: i32,
    pub minutes: i32,
    pub seconds: i32,
    pub nanos: i32,
}

/// Decimal number carried as text so no precision is lost.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Num(pub String);

impl Num {
    pub fn new(s: impl Into<String>) -> Self {
        Num(s.into())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Text(String),
    Bool(bool),
    Bytes(Vec<u8>),
    Num(String),
    Date(NaiveDateTime),
    Timestamp(DateTime<FixedOffset>),
    IntervalYM(IntervalYM),
    IntervalDS(IntervalDS),
}

impl Value {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Value::I8(_) => ScalarKind::I8,
            Value::I16(_) => ScalarKind::I16,
            Value::I32(_) => ScalarKind::I32,
            Value::I64(_) => ScalarKind::I64,
            Value::U8(_) => ScalarKind::U8,
            Value::U16(_) => ScalarKind::U16,
            Value::U32(_) => ScalarKind::U32,
            Value::U64(_) => ScalarKind::U64,
            Value::F32(_) => ScalarKind::F32,
            Value::F64(_) => ScalarKind::F64,
            Value::Text(_) => ScalarKind::Text,
            Value::Bool(_) => ScalarKind::Bool,
            Value::Bytes(_) => ScalarKind::Bytes,
            Value::Num(_) => ScalarKind::Num,
            Value::Date(_) => ScalarKind::Date,
            Value::Timestamp(_) => ScalarKind::Timestamp,
            Value::IntervalYM(_) => ScalarKind::IntervalYM,
            Value::IntervalDS(_) => ScalarKind::IntervalDS,
        }
    }

    /// Integer view of the value, including numeric strings.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Value::I8(n) => Some(i128::from(*n)),
            Value::I16(n) => Some(i128::from(*n)),
            Value::I32(n) => Some(i128::from(*n)),
            Value::I64(n) => Some(i128::from(*n)),
            Value::U8(n) => Some(i128::from(*n)),
            Value::U16(n) => Some(i128::from(*n)),
            Value::U32(n) => Some(i128::from(*n)),
            Value::U64(n) => Some(i128::from(*n)),
            Value::Num(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F32(n) => Some(f64::from(*n)),
            Value::F64(n) => Some(*n),
            Value::Num(s) => s.trim().parse().ok(),
            other => other.as_i128().map(|n| n as f64),
        }
    }

    /// Byte length the value occupies in a character or binary buffer.
    pub fn byte_len(&self) -> usize {
        match self {
            Value::Text(s) | Value::Num(s) => s.len(),
            Value::Bytes(b) => b.len(),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tags() {
        assert_eq!(ScalarKind::I32.wire(), WireType::Int);
        assert_eq!(ScalarKind::U64.wire(), WireType::Uint);
        assert_eq!(ScalarKind::Bool.wire(), WireType::Chr);
        assert_eq!(ScalarKind::Bytes.wire(), WireType::Bin);
        assert_eq!(ScalarKind::Num.wire(), WireType::Number);
        assert_eq!(ScalarKind::IntervalDS.wire(), WireType::IntervalDs);
    }

    #[test]
    fn test_value_kind() {
        assert_eq!(Value::Text("x".to_string()).kind(), ScalarKind::Text);
        assert_eq!(Value::Num("1.5".to_string()).kind(), ScalarKind::Num);
        assert_eq!(
            Value::IntervalYM(IntervalYM { years: 1, months: 2 }).kind(),
            ScalarKind::IntervalYM
        );
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(Value::U16(7).as_i128(), Some(7));
        assert_eq!(Value::Num(" 42 ".to_string()).as_i128(), Some(42));
        assert_eq!(Value::Text("42".to_string()).as_i128(), None);
        assert_eq!(Value::I32(3).as_f64(), Some(3.0));
        assert_eq!(Value::Num("2.5".to_string()).as_f64(), Some(2.5));
    }
}
