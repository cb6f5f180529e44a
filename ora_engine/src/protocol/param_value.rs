use super::types::{IntervalDS, IntervalYM, Num, ScalarKind, Value};
use crate::engine::result_set::ResultSet;
use crate::error::{OraError, Result};
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use std::any::Any;
use std::sync::Arc;

/// Host type with a direct scalar representation.
pub trait SqlScalar: Clone + 'static {
    const KIND: ScalarKind;

    fn into_value(self) -> Value;
    fn from_value(value: Value) -> Option<Self>;
}

macro_rules! sql_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {$(
        impl SqlScalar for $ty {
            const KIND: ScalarKind = ScalarKind::$variant;

            fn into_value(self) -> Value {
                Value::$variant(self)
            }

            fn from_value(value: Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    )*};
}

sql_scalar!(
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    String => Text,
    bool => Bool,
    Vec<u8> => Bytes,
    NaiveDateTime => Date,
    DateTime<FixedOffset> => Timestamp,
    IntervalYM => IntervalYM,
    IntervalDS => IntervalDS,
);

impl SqlScalar for Num {
    const KIND: ScalarKind = ScalarKind::Num;

    fn into_value(self) -> Value {
        Value::Num(self.0)
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Num(s) => Some(Num(s)),
            _ => None,
        }
    }
}

/// Caller-owned location an output bind is copied back into.
pub trait OutTarget {
    fn kind(&self) -> ScalarKind;
    fn is_batch(&self) -> bool;
    /// Current contents, sent as the input half of an IN OUT bind.
    fn snapshot(&self) -> Vec<Option<Value>>;
    fn store(&mut self, values: Vec<Option<Value>>) -> Result<()>;
}

/// Homogeneous array parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub kind: ScalarKind,
    pub nullable: bool,
    pub values: Vec<Option<Value>>,
}

impl Batch {
    pub fn of<T: SqlScalar>(values: Vec<T>) -> Self {
        Self {
            kind: T::KIND,
            nullable: false,
            values: values.into_iter().map(|v| Some(v.into_value())).collect(),
        }
    }

    pub fn of_nullable<T: SqlScalar>(values: Vec<Option<T>>) -> Self {
        Self {
            kind: T::KIND,
            nullable: true,
            values: values
                .into_iter()
                .map(|v| v.map(SqlScalar::into_value))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

macro_rules! resolve_as {
    ($value:expr; $($ty:ty),* $(,)?) => {$(
        if let Some(v) = $value.downcast_ref::<$ty>() {
            return Some(Param::from(v.clone()));
        }
    )*};
}

/// Value whose concrete type is only known at runtime.
pub struct DynValue {
    type_name: &'static str,
    value: Box<dyn Any + Send>,
}

impl DynValue {
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            value: Box::new(value),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub(crate) fn resolve<'a>(&self, index: usize) -> Result<Param<'a>> {
        let type_name = self.type_name;
        let value: &(dyn Any + Send) = self.value.as_ref();
        if value.is::<Vec<Box<dyn Any + Send>>>() {
            return Err(OraError::invalid_bind(
                index,
                type_name,
                "sequence of untyped values",
            ));
        }
        if value.is::<()>() {
            return Ok(Param::Null);
        }
        if let Some(v) = value.downcast_ref::<&'static str>() {
            return Ok(Param::from(*v));
        }
        resolve_scalar_shape(value)
            .or_else(|| resolve_batch_shape(value))
            .ok_or_else(|| {
                OraError::invalid_bind(index, type_name, "unsupported parameter type")
            })
    }
}

/// One statement parameter, in bind order.
pub enum Param<'a> {
    /// Absent value, bound as a character NULL.
    Null,
    Scalar(Value),
    /// Nullable wrapper; `None` binds NULL with the kind's wire tag.
    Nullable(ScalarKind, Option<Value>),
    Batch(Batch),
    Output(&'a mut dyn OutTarget),
    /// Nested cursor returned by a stored procedure.
    Cursor(&'a mut Option<Arc<ResultSet>>),
    Dynamic(DynValue),
}

impl<'a> Param<'a> {
    pub fn null_of(kind: ScalarKind) -> Self {
        Param::Nullable(kind, None)
    }

    pub fn dynamic<T: Any + Send>(value: T) -> Self {
        Param::Dynamic(DynValue::new(value))
    }

    pub fn is_output(&self) -> bool {
        matches!(self, Param::Output(_) | Param::Cursor(_))
    }

    /// Short description of the parameter's shape for error messages.
    pub fn describe(&self) -> String {
        match self {
            Param::Null => "null".to_string(),
            Param::Scalar(v) => format!("{:?}", v.kind()),
            Param::Nullable(kind, _) => format!("Option<{:?}>", kind),
            Param::Batch(b) if b.nullable => format!("Vec<Option<{:?}>>", b.kind),
            Param::Batch(b) => format!("Vec<{:?}>", b.kind),
            Param::Output(t) if t.is_batch() => format!("&mut Vec<{:?}>", t.kind()),
            Param::Output(t) => format!("&mut {:?}", t.kind()),
            Param::Cursor(_) => "&mut ResultSet".to_string(),
            Param::Dynamic(d) => d.type_name().to_string(),
        }
    }
}

impl<'a> From<Value> for Param<'a> {
    fn from(v: Value) -> Self {
        Param::Scalar(v)
    }
}

impl<'a, 'b> From<&'b str> for Param<'a> {
    fn from(v: &'b str) -> Self {
        Param::Scalar(Value::Text(v.to_string()))
    }
}

impl<'a> From<Batch> for Param<'a> {
    fn from(v: Batch) -> Self {
        Param::Batch(v)
    }
}

impl<'a> From<DynValue> for Param<'a> {
    fn from(v: DynValue) -> Self {
        Param::Dynamic(v)
    }
}

impl<'a> From<&'a mut Option<Arc<ResultSet>>> for Param<'a> {
    fn from(v: &'a mut Option<Arc<ResultSet>>) -> Self {
        Param::Cursor(v)
    }
}

fn convert<T: SqlScalar>(value: Value) -> Result<T> {
    let got = value.kind();
    T::from_value(value).ok_or_else(|| {
        OraError::InvalidState(format!(
            "output of type {:?} cannot be stored as {:?}",
            got,
            T::KIND
        ))
    })
}

fn store_one<T: SqlScalar>(slot: &mut T, values: Vec<Option<Value>>) -> Result<()> {
    // NULL leaves a non-nullable target untouched.
    if let Some(v) = values.into_iter().next().flatten() {
        *slot = convert(v)?;
    }
    Ok(())
}

fn store_option<T: SqlScalar>(slot: &mut Option<T>, values: Vec<Option<Value>>) -> Result<()> {
    *slot = values.into_iter().next().flatten().map(convert).transpose()?;
    Ok(())
}

fn store_batch<T: SqlScalar>(slot: &mut Vec<T>, values: Vec<Option<Value>>) -> Result<()> {
    let mut out = Vec::with_capacity(values.len());
    for (row, v) in values.into_iter().enumerate() {
        match v {
            Some(v) => out.push(convert(v)?),
            None => {
                return Err(OraError::InvalidState(format!(
                    "NULL at row {} of a non-nullable {:?} batch output",
                    row,
                    T::KIND
                )))
            }
        }
    }
    *slot = out;
    Ok(())
}

fn store_nullable_batch<T: SqlScalar>(
    slot: &mut Vec<Option<T>>,
    values: Vec<Option<Value>>,
) -> Result<()> {
    *slot = values
        .into_iter()
        .map(|v| v.map(convert).transpose())
        .collect::<Result<Vec<_>>>()?;
    Ok(())
}

macro_rules! scalar_shapes {
    ($($ty:ty),* $(,)?) => {$(
        impl OutTarget for $ty {
            fn kind(&self) -> ScalarKind {
                <$ty as SqlScalar>::KIND
            }
            fn is_batch(&self) -> bool {
                false
            }
            fn snapshot(&self) -> Vec<Option<Value>> {
                vec![Some(self.clone().into_value())]
            }
            fn store(&mut self, values: Vec<Option<Value>>) -> Result<()> {
                store_one(self, values)
            }
        }

        impl OutTarget for Option<$ty> {
            fn kind(&self) -> ScalarKind {
                <$ty as SqlScalar>::KIND
            }
            fn is_batch(&self) -> bool {
                false
            }
            fn snapshot(&self) -> Vec<Option<Value>> {
                vec![self.clone().map(SqlScalar::into_value)]
            }
            fn store(&mut self, values: Vec<Option<Value>>) -> Result<()> {
                store_option(self, values)
            }
        }

        impl OutTarget for Vec<Option<$ty>> {
            fn kind(&self) -> ScalarKind {
                <$ty as SqlScalar>::KIND
            }
            fn is_batch(&self) -> bool {
                true
            }
            fn snapshot(&self) -> Vec<Option<Value>> {
                self.iter().map(|v| v.clone().map(SqlScalar::into_value)).collect()
            }
            fn store(&mut self, values: Vec<Option<Value>>) -> Result<()> {
                store_nullable_batch(self, values)
            }
        }

        impl<'a> From<$ty> for Param<'a> {
            fn from(v: $ty) -> Self {
                Param::Scalar(v.into_value())
            }
        }

        impl<'a> From<Option<$ty>> for Param<'a> {
            fn from(v: Option<$ty>) -> Self {
                Param::Nullable(<$ty as SqlScalar>::KIND, v.map(SqlScalar::into_value))
            }
        }

        impl<'a> From<Vec<Option<$ty>>> for Param<'a> {
            fn from(v: Vec<Option<$ty>>) -> Self {
                Param::Batch(Batch::of_nullable(v))
            }
        }

        impl<'a> From<&'a mut $ty> for Param<'a> {
            fn from(v: &'a mut $ty) -> Self {
                Param::Output(v)
            }
        }

        impl<'a> From<&'a mut Option<$ty>> for Param<'a> {
            fn from(v: &'a mut Option<$ty>) -> Self {
                Param::Output(v)
            }
        }

        impl<'a> From<&'a mut Vec<Option<$ty>>> for Param<'a> {
            fn from(v: &'a mut Vec<Option<$ty>>) -> Self {
                Param::Output(v)
            }
        }
    )*

        /// Runtime counterpart of the `From` impls above.
        fn resolve_scalar_shape<'a>(value: &(dyn Any + Send)) -> Option<Param<'a>> {
            $(resolve_as!(value; $ty, Option<$ty>, Vec<Option<$ty>>);)*
            None
        }
    };
}

// Vec<u8> is a bytes scalar, so u8 has no plain batch shape.
macro_rules! batch_shapes {
    ($($ty:ty),* $(,)?) => {$(
        impl OutTarget for Vec<$ty> {
            fn kind(&self) -> ScalarKind {
                <$ty as SqlScalar>::KIND
            }
            fn is_batch(&self) -> bool {
                true
            }
            fn snapshot(&self) -> Vec<Option<Value>> {
                self.iter().map(|v| Some(v.clone().into_value())).collect()
            }
            fn store(&mut self, values: Vec<Option<Value>>) -> Result<()> {
                store_batch(self, values)
            }
        }

        impl<'a> From<Vec<$ty>> for Param<'a> {
            fn from(v: Vec<$ty>) -> Self {
                Param::Batch(Batch::of(v))
            }
        }

        impl<'a> From<&'a mut Vec<$ty>> for Param<'a> {
            fn from(v: &'a mut Vec<$ty>) -> Self {
                Param::Output(v)
            }
        }
    )*

        fn resolve_batch_shape<'a>(value: &(dyn Any + Send)) -> Option<Param<'a>> {
            $(resolve_as!(value; Vec<$ty>);)*
            None
        }
    };
}

scalar_shapes!(
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    f32,
    f64,
    String,
    bool,
    Vec<u8>,
    Num,
    NaiveDateTime,
    DateTime<FixedOffset>,
    IntervalYM,
    IntervalDS,
);

batch_shapes!(
    i8,
    i16,
    i32,
    i64,
    u16,
    u32,
    u64,
    f32,
    f64,
    String,
    bool,
    Vec<u8>,
    Num,
    NaiveDateTime,
    DateTime<FixedOffset>,
    IntervalYM,
    IntervalDS,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_from() {
        match Param::from(42i64) {
            Param::Scalar(Value::I64(42)) => (),
            _ => panic!("Expected I64 scalar"),
        }
        match Param::from("abc") {
            Param::Scalar(Value::Text(s)) => assert_eq!(s, "abc"),
            _ => panic!("Expected Text scalar"),
        }
    }

    #[test]
    fn test_bytes_are_scalar() {
        match Param::from(vec![1u8, 2, 3]) {
            Param::Scalar(Value::Bytes(b)) => assert_eq!(b, vec![1, 2, 3]),
            _ => panic!("Expected Bytes scalar"),
        }
    }

    #[test]
    fn test_nullable_from() {
        match Param::from(None::<i32>) {
            Param::Nullable(ScalarKind::I32, None) => (),
            _ => panic!("Expected null I32"),
        }
        match Param::from(Some(1.5f64)) {
            Param::Nullable(ScalarKind::F64, Some(Value::F64(v))) => assert_eq!(v, 1.5),
            _ => panic!("Expected F64"),
        }
    }

    #[test]
    fn test_batch_from() {
        match Param::from(vec![1i32, 2, 3]) {
            Param::Batch(b) => {
                assert_eq!(b.kind, ScalarKind::I32);
                assert!(!b.nullable);
                assert_eq!(b.len(), 3);
            }
            _ => panic!("Expected batch"),
        }
        match Param::from(vec![Some("a".to_string()), None]) {
            Param::Batch(b) => {
                assert!(b.nullable);
                assert_eq!(b.values[1], None);
            }
            _ => panic!("Expected nullable batch"),
        }
    }

    #[test]
    fn test_output_store() {
        let mut n = 0i64;
        n.store(vec![Some(Value::I64(17))]).unwrap();
        assert_eq!(n, 17);

        n.store(vec![None]).unwrap();
        assert_eq!(n, 17);

        let mut s: Option<String> = Some("x".to_string());
        s.store(vec![None]).unwrap();
        assert_eq!(s, None);

        let mut batch: Vec<i32> = vec![0; 2];
        batch
            .store(vec![Some(Value::I32(4)), Some(Value::I32(5))])
            .unwrap();
        assert_eq!(batch, vec![4, 5]);
        assert!(batch.store(vec![None]).is_err());
    }

    #[test]
    fn test_output_store_type_mismatch() {
        let mut n = 0i64;
        let err = n.store(vec![Some(Value::Text("x".to_string()))]).unwrap_err();
        assert!(matches!(err, OraError::InvalidState(_)));
    }

    #[test]
    fn test_dynamic_resolves_known_types() {
        match DynValue::new(5u16).resolve(0).unwrap() {
            Param::Scalar(Value::U16(5)) => (),
            _ => panic!("Expected U16 scalar"),
        }
        match DynValue::new(vec![Some(1i64), None]).resolve(0).unwrap() {
            Param::Batch(b) => assert_eq!(b.len(), 2),
            _ => panic!("Expected batch"),
        }
        assert!(matches!(DynValue::new(()).resolve(0).unwrap(), Param::Null));
    }

    fn resolved_batch(value: DynValue) -> Batch {
        match value.resolve(0) {
            Ok(Param::Batch(b)) => b,
            Ok(other) => panic!("Expected batch, got {}", other.describe()),
            Err(e) => panic!("Expected batch, got {}", e),
        }
    }

    #[test]
    fn test_dynamic_resolves_every_batch_shape() {
        let b = resolved_batch(DynValue::new(vec![Some(1.0f32), None]));
        assert_eq!((b.kind, b.nullable, b.len()), (ScalarKind::F32, true, 2));
        let b = resolved_batch(DynValue::new(vec![Some(Num::new("1.5")), None]));
        assert_eq!((b.kind, b.nullable), (ScalarKind::Num, true));
        let b = resolved_batch(DynValue::new(vec![None, Some(vec![1u8])]));
        assert_eq!((b.kind, b.nullable), (ScalarKind::Bytes, true));
        let b = resolved_batch(DynValue::new(vec![None::<NaiveDateTime>]));
        assert_eq!(b.kind, ScalarKind::Date);
        let b = resolved_batch(DynValue::new(vec![None::<DateTime<FixedOffset>>]));
        assert_eq!(b.kind, ScalarKind::Timestamp);
        let b = resolved_batch(DynValue::new(vec![Some(IntervalYM::default())]));
        assert_eq!((b.kind, b.nullable), (ScalarKind::IntervalYM, true));
        let b = resolved_batch(DynValue::new(vec![None::<IntervalDS>]));
        assert_eq!(b.kind, ScalarKind::IntervalDS);
        let b = resolved_batch(DynValue::new(vec![IntervalYM::default(); 3]));
        assert_eq!((b.kind, b.nullable, b.len()), (ScalarKind::IntervalYM, false, 3));
        let b = resolved_batch(DynValue::new(vec![IntervalDS::default()]));
        assert_eq!((b.kind, b.nullable), (ScalarKind::IntervalDS, false));

        match DynValue::new(vec![1u8, 2]).resolve(0).unwrap() {
            Param::Scalar(Value::Bytes(b)) => assert_eq!(b, vec![1, 2]),
            other => panic!("Expected Bytes scalar, got {}", other.describe()),
        }
        match DynValue::new("abc").resolve(0).unwrap() {
            Param::Scalar(Value::Text(s)) => assert_eq!(s, "abc"),
            other => panic!("Expected Text scalar, got {}", other.describe()),
        }
    }

    #[test]
    fn test_dynamic_rejects_untyped_sequence() {
        let untyped: Vec<Box<dyn Any + Send>> = vec![Box::new(1i32), Box::new("x")];
        match DynValue::new(untyped).resolve(4) {
            Err(OraError::InvalidBindParameter { index, reason, .. }) => {
                assert_eq!(index, 4);
                assert!(reason.contains("untyped"));
            }
            _ => panic!("Expected InvalidBindParameter"),
        }
    }

    #[test]
    fn test_dynamic_rejects_unknown_type() {
        match DynValue::new(std::time::Duration::from_secs(1)).resolve(1) {
            Err(OraError::InvalidBindParameter { index, type_name, .. }) => {
                assert_eq!(index, 1);
                assert!(type_name.contains("Duration"));
            }
            _ => panic!("Expected InvalidBindParameter"),
        }
    }

    #[test]
    fn test_describe() {
        assert_eq!(Param::from(vec![1u32]).describe(), "Vec<U32>");
        let mut out = 0i8;
        assert_eq!(Param::from(&mut out).describe(), "&mut I8");
        assert_eq!(Param::null_of(ScalarKind::Date).describe(), "Option<Date>");
    }
}
