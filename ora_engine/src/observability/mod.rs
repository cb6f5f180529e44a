pub mod logging;

pub use logging::LogDrvCfg;
