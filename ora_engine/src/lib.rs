//! Client runtime for Oracle-style database providers.
//!
//! Resources form a tree, Environment > Server > Session > Statement >
//! ResultSet, opened top-down and closed in cascade. Parameters are bound
//! through a typed dispatcher that understands scalars, nullable values,
//! batches, outputs and nested cursors. The native layer sits behind the
//! [`Provider`] trait.

pub mod engine;
mod error;
mod handles;
pub mod observability;
pub mod pool;
pub mod protocol;
pub mod provider;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use engine::{
    config::{drv_cfg, set_drv_cfg},
    ByteSliceMode, Context, DrvCfg, EnvCfg, Environment, ExecResult, ResultSet, Server, SesCfg,
    Session, SrvCfg, Statement, StmtCfg, StmtKind, Transaction,
};
pub use error::{ErrorCategory, ErrorList, MultiError, OraError, Result};
pub use pool::{PoolState, PooledSession, SessionPool};
pub use protocol::{
    Batch, DynValue, IntervalDS, IntervalYM, Num, OutTarget, Param, ScalarKind, SqlScalar, Value,
    WireType,
};
pub use provider::{Provider, ProviderError, RawHandle, SessionMode};
