use crate::engine::config::drv_cfg;
use serde::{Deserialize, Serialize};

macro_rules! log_toggles {
    ($(#[$meta:meta])* $name:ident { $($op:ident),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct $name {
            $(pub $op: bool,)*
        }

        impl Default for $name {
            fn default() -> Self {
                Self { $($op: true,)* }
            }
        }
    };
}

log_toggles!(LogEnvCfg { close, open_srv });
log_toggles!(LogSrvCfg { close, open_ses, version });
log_toggles!(LogSesCfg { close, prep, start_tx });
log_toggles!(LogStmtCfg { close, exe, qry, bind });
log_toggles!(LogTxCfg { commit, rollback });
log_toggles!(LogRsetCfg { close, open });

/// Per-node, per-operation log switches behind one master flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogDrvCfg {
    pub enabled: bool,
    pub env: LogEnvCfg,
    pub srv: LogSrvCfg,
    pub ses: LogSesCfg,
    pub stmt: LogStmtCfg,
    pub tx: LogTxCfg,
    pub rset: LogRsetCfg,
}

impl Default for LogDrvCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            env: LogEnvCfg::default(),
            srv: LogSrvCfg::default(),
            ses: LogSesCfg::default(),
            stmt: LogStmtCfg::default(),
            tx: LogTxCfg::default(),
            rset: LogRsetCfg::default(),
        }
    }
}

impl LogDrvCfg {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

pub(crate) fn should_log(pick: fn(&LogDrvCfg) -> bool) -> bool {
    let cfg = drv_cfg();
    cfg.log.enabled && pick(&cfg.log)
}

/// Logs `op` against a node's system name when its toggle is on.
pub(crate) fn log_op(pick: fn(&LogDrvCfg) -> bool, sys_name: &str, op: &str) {
    if should_log(pick) {
        log::info!("{} {}", sys_name, op);
    }
}
