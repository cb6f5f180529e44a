//! The native call surface the engine drives. Implementations own the wire
//! protocol; the engine only ever holds the opaque handles they return.

use crate::engine::core::bind_descriptor::BindDescriptor;
use crate::protocol::{Value, WireType};
use std::num::NonZeroU64;
use thiserror::Error;

/// Opaque native handle. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(NonZeroU64);

impl RawHandle {
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(RawHandle)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Env,
    Error,
    Server,
    Service,
    Session,
    Statement,
    Transaction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attr {
    Username,
    Password,
    Server,
    Session,
    DriverName,
    LobPrefetchSize,
    StmtCacheSize,
    PrefetchRows,
    PrefetchMemory,
    RowCount,
    BindCount,
    CharsetId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    U32(u32),
    U64(u64),
    Text(String),
    Handle(RawHandle),
}

impl AttrValue {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            AttrValue::U32(n) => Some(u64::from(*n)),
            AttrValue::U64(n) => Some(*n),
            _ => None,
        }
    }
}

/// How a session authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    /// Operating-system or wallet credentials.
    External,
    /// Username and password set on the session handle.
    Rdbms,
}

/// Role a session is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    #[default]
    Default,
    SysDba,
    SysOper,
}

pub const MODE_DEFAULT: u32 = 0x0;
pub const MODE_SYSDBA: u32 = 0x2;
pub const MODE_SYSOPER: u32 = 0x4;

impl SessionMode {
    /// Role flag OR'd into the session-begin mode.
    pub fn flags(self) -> u32 {
        match self {
            SessionMode::Default => MODE_DEFAULT,
            SessionMode::SysDba => MODE_DEFAULT | MODE_SYSDBA,
            SessionMode::SysOper => MODE_DEFAULT | MODE_SYSOPER,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    Default,
    CommitOnSuccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    Success,
    SuccessWithInfo,
    NoData,
}

/// Failure reported by the native layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ProviderError {
    pub code: i32,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDesc {
    pub name: String,
    pub wire: WireType,
    pub nullable: bool,
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

pub trait Provider: Send + Sync {
    fn alloc_env(&self) -> ProviderResult<RawHandle>;
    fn free_env(&self, env: RawHandle) -> ProviderResult<()>;

    fn alloc_handle(&self, env: RawHandle, kind: HandleKind) -> ProviderResult<RawHandle>;
    fn free_handle(&self, handle: RawHandle, kind: HandleKind) -> ProviderResult<()>;

    fn attach(&self, server: RawHandle, dblink: &str) -> ProviderResult<()>;
    fn detach(&self, server: RawHandle) -> ProviderResult<()>;

    fn get_attr(&self, handle: RawHandle, kind: HandleKind, attr: Attr)
        -> ProviderResult<AttrValue>;
    fn set_attr(
        &self,
        handle: RawHandle,
        kind: HandleKind,
        attr: Attr,
        value: AttrValue,
    ) -> ProviderResult<()>;

    fn begin_session(
        &self,
        service: RawHandle,
        session: RawHandle,
        credentials: CredentialKind,
        mode: u32,
    ) -> ProviderResult<()>;
    fn end_session(&self, service: RawHandle, session: RawHandle) -> ProviderResult<()>;

    fn server_version(&self, service: RawHandle) -> ProviderResult<String>;

    fn prepare(&self, service: RawHandle, sql: &str) -> ProviderResult<RawHandle>;
    fn release_stmt(&self, stmt: RawHandle) -> ProviderResult<()>;

    fn bind(&self, stmt: RawHandle, desc: &BindDescriptor) -> ProviderResult<()>;

    fn execute(
        &self,
        service: RawHandle,
        stmt: RawHandle,
        iterations: u32,
        mode: ExecMode,
    ) -> ProviderResult<ExecStatus>;

    /// Interrupts a call in flight on `service`.
    fn break_execution(&self, _service: RawHandle) -> ProviderResult<()> {
        Ok(())
    }

    /// Values the server wrote to the output bind at `position` (1-based),
    /// one per iteration.
    fn output_values(&self, stmt: RawHandle, position: usize)
        -> ProviderResult<Vec<Option<Value>>>;

    /// Statement handle of the nested cursor returned at `position`.
    fn output_cursor(&self, stmt: RawHandle, position: usize) -> ProviderResult<RawHandle>;

    fn describe(&self, stmt: RawHandle) -> ProviderResult<Vec<ColumnDesc>>;

    /// Next row of an executed query, `None` once exhausted.
    fn fetch_row(&self, stmt: RawHandle) -> ProviderResult<Option<Vec<Option<Value>>>>;

    fn trans_start(&self, service: RawHandle, tx: RawHandle) -> ProviderResult<()>;
    fn trans_commit(&self, service: RawHandle, tx: RawHandle) -> ProviderResult<()>;
    fn trans_rollback(&self, service: RawHandle, tx: RawHandle) -> ProviderResult<()>;

    /// Most recent diagnostic recorded on the error handle.
    fn fetch_error(&self, err: RawHandle) -> ProviderError;
}
