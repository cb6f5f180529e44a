use super::bind_descriptor::{BindDescriptor, BindKind};
use crate::engine::config::{ByteSliceMode, StmtCfg};
use crate::error::{OraError, Result};
use crate::pool::POOLS;
use crate::protocol::{Batch, Param, ScalarKind, Value, WireType};
use crate::provider::{Provider, RawHandle};

pub struct BindOptions<'c> {
    /// Bind batches as one PL/SQL array instead of iterating over them.
    pub assoc_array: bool,
    /// Parameter index that receives the generated identity of an
    /// `INSERT ... RETURNING ... INTO`. May equal `params.len()`, in which
    /// case the slot is appended.
    pub identity: Option<usize>,
    pub cfg: &'c StmtCfg,
}

/// Builds and installs one descriptor per parameter, left to right, and
/// returns the iteration count for the execute.
///
/// The descriptor previously installed at an index goes back to its pool
/// before the new one takes its place. On the first failure, descriptors
/// before the failing index stay installed and everything from it onwards
/// is released, so `binds` always describes exactly what the provider
/// holds.
pub fn bind_all(
    provider: &dyn Provider,
    stmt: RawHandle,
    binds: &mut Vec<BindDescriptor>,
    params: &[Param<'_>],
    opts: &BindOptions<'_>,
) -> Result<u32> {
    let total = match opts.identity {
        Some(i) if i == params.len() => params.len() + 1,
        _ => params.len(),
    };

    let mut iterations = None;
    for index in 0..total {
        let built = if opts.identity == Some(index) {
            Ok(identity_descriptor(index))
        } else {
            build_descriptor(index, &params[index], opts)
        };
        let desc = match built {
            Ok(desc) => desc,
            Err(e) => {
                release_from(binds, index);
                return Err(e);
            }
        };

        if iterations.is_none() && sets_iterations(&desc) {
            match u32::try_from(desc.len()) {
                Ok(n) => iterations = Some(n),
                Err(_) => {
                    let e = OraError::invalid_bind(
                        index,
                        &params[index].describe(),
                        "batch longer than the provider can iterate",
                    );
                    POOLS.binds.release(desc);
                    release_from(binds, index);
                    return Err(e);
                }
            }
        }

        if let Err(e) = provider.bind(stmt, &desc) {
            POOLS.binds.release(desc);
            release_from(binds, index);
            return Err(e.into());
        }
        install(binds, index, desc);
    }
    release_from(binds, total);

    Ok(iterations.unwrap_or(1))
}

/// Returns every installed descriptor at or past `from` to its pool.
pub fn release_from(binds: &mut Vec<BindDescriptor>, from: usize) {
    if from >= binds.len() {
        return;
    }
    for desc in binds.drain(from..) {
        POOLS.binds.release(desc);
    }
}

fn install(binds: &mut Vec<BindDescriptor>, index: usize, desc: BindDescriptor) {
    if index < binds.len() {
        let old = std::mem::replace(&mut binds[index], desc);
        POOLS.binds.release(old);
    } else {
        binds.push(desc);
    }
}

fn sets_iterations(desc: &BindDescriptor) -> bool {
    desc.kind.is_batch() && !desc.assoc_array
}

fn identity_descriptor(index: usize) -> BindDescriptor {
    let mut desc = POOLS.binds.acquire(BindKind::Output);
    desc.position = index + 1;
    desc.wire = WireType::Int;
    desc.scalar = Some(ScalarKind::I64);
    desc.values.push(None);
    desc
}

/// Maps one parameter to a descriptor drawn from the pool for its kind.
pub fn build_descriptor(
    index: usize,
    param: &Param<'_>,
    opts: &BindOptions<'_>,
) -> Result<BindDescriptor> {
    let cfg = opts.cfg;
    match param {
        Param::Null => Ok(null_descriptor(index, WireType::Chr, None)),
        Param::Scalar(Value::Bytes(bytes)) if cfg.byte_slice == ByteSliceMode::NumericArray => {
            let batch = Batch {
                kind: ScalarKind::U8,
                nullable: false,
                values: bytes.iter().map(|b| Some(Value::U8(*b))).collect(),
            };
            Ok(batch_descriptor(index, &batch, opts))
        }
        Param::Scalar(value) => Ok(scalar_descriptor(index, value, cfg)),
        Param::Nullable(kind, None) => Ok(null_descriptor(index, kind.wire(), Some(*kind))),
        Param::Nullable(kind, Some(value)) => {
            if value.kind() != *kind {
                return Err(OraError::invalid_bind(
                    index,
                    &param.describe(),
                    format!("holds a {:?} value", value.kind()),
                ));
            }
            build_descriptor(index, &Param::Scalar(value.clone()), opts)
        }
        Param::Batch(batch) => {
            validate_batch(index, batch, param)?;
            Ok(batch_descriptor(index, batch, opts))
        }
        Param::Output(target) => {
            let kind = target.kind();
            let bind_kind = if target.is_batch() {
                BindKind::BatchOutput
            } else {
                BindKind::Output
            };
            let mut desc = POOLS.binds.acquire(bind_kind);
            desc.position = index + 1;
            desc.wire = kind.wire();
            desc.scalar = Some(kind);
            desc.assoc_array = opts.assoc_array && target.is_batch();
            desc.values = target
                .snapshot()
                .into_iter()
                .map(|v| v.map(|v| marshal(v, cfg)))
                .collect();
            desc.max_len = output_buffer_len(kind, cfg);
            Ok(desc)
        }
        Param::Cursor(_) => {
            let mut desc = POOLS.binds.acquire(BindKind::Cursor);
            desc.position = index + 1;
            desc.wire = WireType::Rset;
            Ok(desc)
        }
        Param::Dynamic(value) => {
            let resolved = value.resolve(index)?;
            build_descriptor(index, &resolved, opts)
        }
    }
}

fn null_descriptor(index: usize, wire: WireType, kind: Option<ScalarKind>) -> BindDescriptor {
    let mut desc = POOLS.binds.acquire(BindKind::Null);
    desc.position = index + 1;
    desc.wire = wire;
    desc.scalar = kind;
    desc.values.push(None);
    desc
}

fn scalar_descriptor(index: usize, value: &Value, cfg: &StmtCfg) -> BindDescriptor {
    let kind = value.kind();
    let value = marshal(value.clone(), cfg);
    let mut desc = POOLS.binds.acquire(BindKind::Scalar);
    desc.position = index + 1;
    desc.wire = kind.wire();
    desc.scalar = Some(kind);
    desc.max_len = value.byte_len();
    desc.values.push(Some(value));
    desc
}

fn validate_batch(index: usize, batch: &Batch, param: &Param<'_>) -> Result<()> {
    for (row, value) in batch.values.iter().enumerate() {
        match value {
            Some(v) if v.kind() != batch.kind => {
                return Err(OraError::invalid_bind(
                    index,
                    &param.describe(),
                    format!("element {} is {:?}", row, v.kind()),
                ))
            }
            None if !batch.nullable => {
                return Err(OraError::invalid_bind(
                    index,
                    &param.describe(),
                    format!("element {} is NULL", row),
                ))
            }
            _ => {}
        }
    }
    Ok(())
}

fn batch_descriptor(index: usize, batch: &Batch, opts: &BindOptions<'_>) -> BindDescriptor {
    let kind = if batch.nullable {
        BindKind::NullableBatch
    } else {
        BindKind::Batch
    };
    let mut desc = POOLS.binds.acquire(kind);
    desc.position = index + 1;
    desc.wire = batch.kind.wire();
    desc.scalar = Some(batch.kind);
    desc.assoc_array = opts.assoc_array;
    desc.values.extend(
        batch
            .values
            .iter()
            .map(|v| v.clone().map(|v| marshal(v, opts.cfg))),
    );
    desc.max_len = desc
        .values
        .iter()
        .flatten()
        .map(Value::byte_len)
        .max()
        .unwrap_or(0);
    desc
}

fn output_buffer_len(kind: ScalarKind, cfg: &StmtCfg) -> usize {
    match kind {
        ScalarKind::Text | ScalarKind::Num => cfg.string_ptr_buffer_size as usize,
        ScalarKind::Bool => 1,
        ScalarKind::Bytes => cfg.lob_buffer_size as usize,
        _ => 0,
    }
}

fn rune(b: bool, cfg: &StmtCfg) -> char {
    if b {
        cfg.true_rune
    } else {
        cfg.false_rune
    }
}

/// Host value to wire value. Booleans become a one-character string.
pub(crate) fn marshal(value: Value, cfg: &StmtCfg) -> Value {
    match value {
        Value::Bool(b) => Value::Text(rune(b, cfg).to_string()),
        other => other,
    }
}

/// Wire value back to the host kind an output target expects.
pub(crate) fn unmarshal(kind: ScalarKind, value: Value, cfg: &StmtCfg) -> Result<Value> {
    let got = value.kind();
    if got == kind {
        return Ok(value);
    }
    let converted = match (kind, value) {
        (ScalarKind::Bool, Value::Text(s)) => Some(Value::Bool(s.starts_with(cfg.true_rune))),
        (ScalarKind::Text, Value::Bool(b)) => Some(Value::Text(rune(b, cfg).to_string())),
        (ScalarKind::Text, Value::Num(s)) => Some(Value::Text(s)),
        (ScalarKind::Num, Value::Text(s)) => Some(Value::Num(s)),
        (ScalarKind::F32, v) => v.as_f64().map(|f| Value::F32(f as f32)),
        (ScalarKind::F64, v) => v.as_f64().map(Value::F64),
        (ScalarKind::Num, v) => v.as_i128().map(|n| Value::Num(n.to_string())),
        (k, v) if k.is_integer() => v.as_i128().and_then(|n| integer_value(k, n)),
        _ => None,
    };
    converted.ok_or_else(|| {
        OraError::InvalidState(format!("cannot convert {:?} output to {:?}", got, kind))
    })
}

fn integer_value(kind: ScalarKind, n: i128) -> Option<Value> {
    match kind {
        ScalarKind::I8 => i8::try_from(n).ok().map(Value::I8),
        ScalarKind::I16 => i16::try_from(n).ok().map(Value::I16),
        ScalarKind::I32 => i32::try_from(n).ok().map(Value::I32),
        ScalarKind::I64 => i64::try_from(n).ok().map(Value::I64),
        ScalarKind::U8 => u8::try_from(n).ok().map(Value::U8),
        ScalarKind::U16 => u16::try_from(n).ok().map(Value::U16),
        ScalarKind::U32 => u32::try_from(n).ok().map(Value::U32),
        ScalarKind::U64 => u64::try_from(n).ok().map(Value::U64),
        _ => None,
    }
}

/// Outcome of copying output binds back into the caller's locations.
#[derive(Debug, Default)]
pub struct CopyBack {
    /// Nested cursor handles by parameter index, still to be wrapped in
    /// result sets by the statement.
    pub cursors: Vec<(usize, RawHandle)>,
    /// First failure. Every output is still attempted.
    pub error: Option<OraError>,
}

pub fn copy_back(
    provider: &dyn Provider,
    stmt: RawHandle,
    params: &mut [Param<'_>],
    cfg: &StmtCfg,
) -> CopyBack {
    let mut out = CopyBack::default();
    for (index, param) in params.iter_mut().enumerate() {
        let position = index + 1;
        let result = match param {
            Param::Output(target) => provider
                .output_values(stmt, position)
                .map_err(OraError::from)
                .and_then(|values| {
                    let kind = target.kind();
                    let values = values
                        .into_iter()
                        .map(|v| v.map(|v| unmarshal(kind, v, cfg)).transpose())
                        .collect::<Result<Vec<_>>>()?;
                    target.store(values)
                }),
            Param::Cursor(_) => provider
                .output_cursor(stmt, position)
                .map(|handle| out.cursors.push((index, handle)))
                .map_err(OraError::from),
            _ => Ok(()),
        };
        if let Err(e) = result {
            log::debug!("copy back of parameter {} failed: {}", index, e);
            out.error.get_or_insert(e);
        }
    }
    out
}

/// Generated identity written to the slot at `index`.
pub fn read_identity(
    provider: &dyn Provider,
    stmt: RawHandle,
    index: usize,
    cfg: &StmtCfg,
) -> Result<Option<i64>> {
    let values = provider.output_values(stmt, index + 1)?;
    match values.into_iter().next().flatten() {
        Some(v) => match unmarshal(ScalarKind::I64, v, cfg)? {
            Value::I64(n) => Ok(Some(n)),
            other => Err(OraError::InvalidState(format!(
                "identity returned as {:?}",
                other.kind()
            ))),
        },
        None => Ok(None),
    }
}
