pub mod config;
pub mod context;
pub mod core;
pub mod environment;
pub mod result_set;
pub mod server;
pub mod session;
pub mod statement;
pub mod transaction;

pub use config::{ByteSliceMode, DrvCfg, EnvCfg, SesCfg, SrvCfg, StmtCfg};
pub use context::Context;
pub use self::core::{BindDescriptor, BindKind};
pub use environment::Environment;
pub use result_set::{ResultSet, Row};
pub use server::Server;
pub use session::Session;
pub use statement::{exec_mode, ExecResult, Statement, StmtKind};
pub use transaction::Transaction;
