use crate::handles::ConfigCell;
use crate::observability::logging::LogDrvCfg;
use crate::provider::SessionMode;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

pub const DEFAULT_PREFETCH_MEMORY_SIZE: u32 = 134_217_728;
pub const DEFAULT_LOB_BUFFER_SIZE: u32 = 16_777_216;
pub const DEFAULT_STRING_PTR_BUFFER_SIZE: u32 = 4000;

/// How a `Vec<u8>` parameter is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteSliceMode {
    /// One binary value.
    #[default]
    Binary,
    /// An array of unsigned 8-bit numbers.
    NumericArray,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StmtCfg {
    pub auto_commit: bool,
    pub prefetch_row_count: u32,
    pub prefetch_memory_size: u32,
    pub lob_buffer_size: u32,
    pub string_ptr_buffer_size: u32,
    pub byte_slice: ByteSliceMode,
    pub true_rune: char,
    pub false_rune: char,
}

impl Default for StmtCfg {
    fn default() -> Self {
        Self {
            auto_commit: true,
            prefetch_row_count: 0,
            prefetch_memory_size: DEFAULT_PREFETCH_MEMORY_SIZE,
            lob_buffer_size: DEFAULT_LOB_BUFFER_SIZE,
            string_ptr_buffer_size: DEFAULT_STRING_PTR_BUFFER_SIZE,
            byte_slice: ByteSliceMode::Binary,
            true_rune: '1',
            false_rune: '0',
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvCfg {
    pub stmt: Option<StmtCfg>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SrvCfg {
    pub dblink: String,
    pub stmt: Option<StmtCfg>,
}

impl SrvCfg {
    pub fn new(dblink: impl Into<String>) -> Self {
        Self {
            dblink: dblink.into(),
            stmt: None,
        }
    }
}

#[derive(Clone)]
pub struct SesCfg {
    pub username: String,
    pub password: Zeroizing<String>,
    pub mode: SessionMode,
    pub stmt: Option<StmtCfg>,
}

impl SesCfg {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
            mode: SessionMode::Default,
            stmt: None,
        }
    }

    /// Session authenticated by the operating system or a wallet.
    pub fn external() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: SessionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() || !self.password.is_empty()
    }
}

impl Default for SesCfg {
    fn default() -> Self {
        Self::new(String::new(), String::new())
    }
}

impl fmt::Debug for SesCfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SesCfg")
            .field("username", &self.username)
            .field("password", &"***")
            .field("mode", &self.mode)
            .field("stmt", &self.stmt)
            .finish()
    }
}

/// Process-wide defaults: statement settings every unset level falls back
/// to, and the per-operation log toggles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DrvCfg {
    pub stmt: StmtCfg,
    pub log: LogDrvCfg,
}

lazy_static! {
    static ref DRV_CFG: ConfigCell<DrvCfg> = ConfigCell::default();
}

pub fn drv_cfg() -> Arc<DrvCfg> {
    DRV_CFG.get()
}

pub fn set_drv_cfg(cfg: DrvCfg) {
    DRV_CFG.set(cfg);
}

/// Picks the statement configuration in effect.
///
/// A shared environment's setting always wins, even over a more specific
/// session or server setting. Otherwise `overrides` is walked from the most
/// specific level outwards and the first one set is used, then the
/// environment's, then the driver default.
pub fn resolve_stmt_cfg(
    shared_env: bool,
    overrides: &[Option<&StmtCfg>],
    env: Option<&StmtCfg>,
    drv: &StmtCfg,
) -> StmtCfg {
    if shared_env {
        return env.unwrap_or(drv).clone();
    }
    overrides
        .iter()
        .copied()
        .flatten()
        .next()
        .or(env)
        .unwrap_or(drv)
        .clone()
}
