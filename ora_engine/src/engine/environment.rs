use super::config::{drv_cfg, resolve_stmt_cfg, EnvCfg, SrvCfg, StmtCfg};
use super::server::Server;
use crate::error::{ErrorList, OraError, Result};
use crate::handles::{close_children, ensure_id, sys_name, ConfigCell, ENV_IDS};
use crate::observability::logging::log_op;
use crate::pool::POOLS;
use crate::provider::{HandleKind, Provider, RawHandle};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Default)]
pub(crate) struct EnvBody {
    pub(crate) id: u64,
    pub(crate) sys_name: String,
    pub(crate) srvs: HashMap<u64, Arc<Server>>,
}

impl EnvBody {
    fn reset(&mut self) {
        self.sys_name.clear();
        self.srvs.clear();
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct EnvHandles {
    pub(crate) env: RawHandle,
    pub(crate) err: RawHandle,
}

struct EnvState {
    handles: EnvHandles,
    body: Box<EnvBody>,
}

/// Root of the resource tree. Owns the native environment and error
/// handles and every Server opened from it.
pub struct Environment {
    state: RwLock<Option<EnvState>>,
    cfg: ConfigCell<EnvCfg>,
    shared: bool,
    provider: Arc<dyn Provider>,
}

impl Environment {
    pub fn open(provider: Arc<dyn Provider>, cfg: EnvCfg) -> Result<Arc<Self>> {
        Self::open_with(provider, cfg, false)
    }

    /// Opens the process-wide shared environment. Its statement
    /// configuration overrides anything set on servers, sessions or
    /// statements beneath it.
    pub fn open_shared(provider: Arc<dyn Provider>, cfg: EnvCfg) -> Result<Arc<Self>> {
        Self::open_with(provider, cfg, true)
    }

    fn open_with(provider: Arc<dyn Provider>, cfg: EnvCfg, shared: bool) -> Result<Arc<Self>> {
        let env = provider.alloc_env()?;
        let err = match provider.alloc_handle(env, HandleKind::Error) {
            Ok(h) => h,
            Err(e) => {
                let _ = provider.free_env(env);
                return Err(e.into());
            }
        };

        let mut body = POOLS.env.acquire();
        let id = ensure_id(&mut body.id, &ENV_IDS);
        body.sys_name = sys_name("", 'E', id);
        log::debug!("{} open (shared={})", body.sys_name, shared);

        Ok(Arc::new(Self {
            state: RwLock::new(Some(EnvState {
                handles: EnvHandles { env, err },
                body,
            })),
            cfg: ConfigCell::new(cfg),
            shared,
            provider,
        }))
    }

    pub fn is_open(&self) -> bool {
        self.state.read().map(|s| s.is_some()).unwrap_or(false)
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    pub fn cfg(&self) -> Arc<EnvCfg> {
        self.cfg.get()
    }

    pub fn set_cfg(&self, cfg: EnvCfg) {
        self.cfg.set(cfg);
    }

    /// Statement configuration in effect at this level.
    pub fn stmt_cfg(&self) -> StmtCfg {
        self.resolve_below(&[])
    }

    pub(crate) fn resolve_below(&self, overrides: &[Option<&StmtCfg>]) -> StmtCfg {
        let own = self.cfg.get();
        resolve_stmt_cfg(self.shared, overrides, own.stmt.as_ref(), &drv_cfg().stmt)
    }

    pub fn sys_name(&self) -> String {
        match self.state.read() {
            Ok(guard) => guard
                .as_ref()
                .map(|s| s.body.sys_name.clone())
                .unwrap_or_else(|| "E_".to_string()),
            Err(_) => "E_".to_string(),
        }
    }

    pub fn num_srv(&self) -> usize {
        self.state
            .read()
            .map(|s| s.as_ref().map_or(0, |s| s.body.srvs.len()))
            .unwrap_or(0)
    }

    pub fn open_server(self: &Arc<Self>, cfg: SrvCfg) -> Result<Arc<Server>> {
        Server::open(self, cfg)
    }

    pub(crate) fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub(crate) fn handles(&self) -> Result<(EnvHandles, String)> {
        let guard = self.state.read().map_err(|_| OraError::poisoned("Env"))?;
        let state = guard.as_ref().ok_or(OraError::AlreadyClosed("Env"))?;
        Ok((state.handles, state.body.sys_name.clone()))
    }

    pub(crate) fn register_srv(&self, id: u64, srv: Arc<Server>) -> Result<()> {
        let mut guard = self.state.write().map_err(|_| OraError::poisoned("Env"))?;
        let state = guard.as_mut().ok_or(OraError::AlreadyClosed("Env"))?;
        state.body.srvs.insert(id, srv);
        Ok(())
    }

    pub(crate) fn remove_srv(&self, id: u64) {
        if let Ok(mut guard) = self.state.write() {
            if let Some(state) = guard.as_mut() {
                state.body.srvs.remove(&id);
            }
        }
    }

    /// Closes every Server, then frees the native handles. All failures are
    /// collected; teardown never stops early.
    pub fn close(&self) -> Result<()> {
        let state = {
            let mut guard = self.state.write().map_err(|_| OraError::poisoned("Env"))?;
            guard.take().ok_or(OraError::AlreadyClosed("Env"))?
        };
        let EnvState { handles, mut body } = state;

        let mut errs = ErrorList::new();
        close_children(
            &mut body.srvs,
            &mut errs,
            "close server",
            Server::close_from_parent,
        );
        errs.guard("free error handle", || {
            self.provider
                .free_handle(handles.err, HandleKind::Error)
                .map_err(OraError::from)
        });
        errs.guard("free environment", || {
            self.provider.free_env(handles.env).map_err(OraError::from)
        });

        log_op(|l| l.env.close, &body.sys_name, "close");
        self.cfg.clear();
        body.reset();
        POOLS.env.release(body);
        errs.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;

    #[test]
    fn test_open_and_close() {
        let mock = Arc::new(MockProvider::new());
        let env = Environment::open(mock.clone(), EnvCfg::default()).unwrap();
        assert!(env.is_open());
        assert!(!env.is_shared());
        assert!(env.sys_name().starts_with('E'));
        assert_eq!(mock.live_handles(), 2);

        env.close().unwrap();
        assert!(!env.is_open());
        assert_eq!(env.sys_name(), "E_");
        assert_eq!(mock.live_handles(), 0);
    }

    #[test]
    fn test_second_close_reports_already_closed() {
        let env = Environment::open(Arc::new(MockProvider::new()), EnvCfg::default()).unwrap();
        env.close().unwrap();
        match env.close() {
            Err(OraError::AlreadyClosed("Env")) => (),
            other => panic!("Expected AlreadyClosed, got {:?}", other),
        }
    }

    #[test]
    fn test_close_clears_config() {
        let cfg = EnvCfg {
            stmt: Some(StmtCfg {
                prefetch_row_count: 10,
                ..StmtCfg::default()
            }),
        };
        let env = Environment::open(Arc::new(MockProvider::new()), cfg).unwrap();
        assert_eq!(env.stmt_cfg().prefetch_row_count, 10);
        env.close().unwrap();
        assert!(env.cfg().stmt.is_none());
    }

    #[test]
    fn test_open_server_on_closed_env() {
        let env = Environment::open(Arc::new(MockProvider::new()), EnvCfg::default()).unwrap();
        env.close().unwrap();
        assert!(matches!(
            env.open_server(SrvCfg::new("db")),
            Err(OraError::AlreadyClosed("Env"))
        ));
    }
}
