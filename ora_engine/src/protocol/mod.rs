pub mod param_value;
pub mod types;

pub use param_value::{Batch, DynValue, OutTarget, Param, SqlScalar};
pub use types::{IntervalDS, IntervalYM, Num, ScalarKind, Value, WireType};
