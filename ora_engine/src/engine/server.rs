use super::config::{drv_cfg, resolve_stmt_cfg, SesCfg, SrvCfg, StmtCfg};
use super::environment::{EnvHandles, Environment};
use super::session::Session;
use crate::error::{ErrorList, OraError, Result};
use crate::handles::{close_children, ensure_id, sys_name, ConfigCell, SRV_IDS};
use crate::observability::logging::log_op;
use crate::pool::POOLS;
use crate::provider::{Attr, HandleKind, Provider, RawHandle};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

/// Character set ids that mean the client talks UTF-8.
const AL32UTF8: u64 = 873;
const UTF8: u64 = 871;

#[derive(Default)]
pub(crate) struct SrvBody {
    pub(crate) id: u64,
    pub(crate) sys_name: String,
    pub(crate) sess: HashMap<u64, Arc<Session>>,
    pub(crate) is_utf8: bool,
}

impl SrvBody {
    fn reset(&mut self) {
        self.sys_name.clear();
        self.sess.clear();
        self.is_utf8 = false;
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SrvHandles {
    pub(crate) env: RawHandle,
    pub(crate) err: RawHandle,
    pub(crate) server: RawHandle,
}

struct SrvState {
    handles: SrvHandles,
    body: Box<SrvBody>,
}

/// One attached backend connection. Closing detaches it for good; a new
/// Server has to be opened to reconnect.
pub struct Server {
    state: RwLock<Option<SrvState>>,
    cfg: ConfigCell<SrvCfg>,
    env: Weak<Environment>,
    provider: Arc<dyn Provider>,
}

impl Server {
    pub(crate) fn open(env: &Arc<Environment>, cfg: SrvCfg) -> Result<Arc<Server>> {
        let (EnvHandles { env: env_h, err }, env_name) = env.handles()?;
        let provider = Arc::clone(env.provider());

        let server = provider.alloc_handle(env_h, HandleKind::Server)?;
        if let Err(e) = provider.attach(server, &cfg.dblink) {
            let _ = provider.free_handle(server, HandleKind::Server);
            return Err(e.into());
        }
        let charset = provider
            .get_attr(env_h, HandleKind::Env, Attr::CharsetId)
            .ok()
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        let mut body = POOLS.srv.acquire();
        let id = ensure_id(&mut body.id, &SRV_IDS);
        body.sys_name = sys_name(&env_name, 'S', id);
        body.is_utf8 = charset == AL32UTF8 || charset == UTF8;
        let name = body.sys_name.clone();

        let srv = Arc::new(Server {
            state: RwLock::new(Some(SrvState {
                handles: SrvHandles {
                    env: env_h,
                    err,
                    server,
                },
                body,
            })),
            cfg: ConfigCell::new(cfg),
            env: Arc::downgrade(env),
            provider,
        });
        if let Err(e) = env.register_srv(id, Arc::clone(&srv)) {
            let _ = srv.close();
            return Err(e);
        }
        log_op(|l| l.env.open_srv, &name, "open server");
        Ok(srv)
    }

    pub fn is_open(&self) -> bool {
        self.state.read().map(|s| s.is_some()).unwrap_or(false)
    }

    pub fn cfg(&self) -> Arc<SrvCfg> {
        self.cfg.get()
    }

    pub fn set_cfg(&self, cfg: SrvCfg) {
        self.cfg.set(cfg);
    }

    pub fn stmt_cfg(&self) -> StmtCfg {
        self.resolve_below(&[])
    }

    pub(crate) fn resolve_below(&self, overrides: &[Option<&StmtCfg>]) -> StmtCfg {
        let own = self.cfg.get();
        let mut chain = overrides.to_vec();
        chain.push(own.stmt.as_ref());
        match self.env.upgrade() {
            Some(env) => env.resolve_below(&chain),
            None => resolve_stmt_cfg(false, &chain, None, &drv_cfg().stmt),
        }
    }

    pub fn environment(&self) -> Option<Arc<Environment>> {
        self.env.upgrade()
    }

    pub fn sys_name(&self) -> String {
        match self.state.read() {
            Ok(guard) => guard
                .as_ref()
                .map(|s| s.body.sys_name.clone())
                .unwrap_or_else(|| "S_".to_string()),
            Err(_) => "S_".to_string(),
        }
    }

    /// Whether the client character set is UTF-8. False once closed.
    pub fn is_utf8(&self) -> bool {
        self.state
            .read()
            .map(|s| s.as_ref().is_some_and(|s| s.body.is_utf8))
            .unwrap_or(false)
    }

    pub fn num_ses(&self) -> usize {
        self.state
            .read()
            .map(|s| s.as_ref().map_or(0, |s| s.body.sess.len()))
            .unwrap_or(0)
    }

    pub fn open_session(self: &Arc<Self>, cfg: SesCfg) -> Result<Arc<Session>> {
        Session::open(self, cfg)
    }

    /// Server release banner. Needs at least one open Session to ask through.
    pub fn version(&self) -> Result<String> {
        let (ses, name) = {
            let guard = self.state.read().map_err(|_| OraError::poisoned("Srv"))?;
            let state = guard.as_ref().ok_or(OraError::AlreadyClosed("Srv"))?;
            let ses = state
                .body
                .sess
                .values()
                .find(|s| s.is_open())
                .cloned()
                .ok_or_else(|| {
                    OraError::InvalidState("server version requires an open session".to_string())
                })?;
            (ses, state.body.sys_name.clone())
        };
        let version = ses.server_version()?;
        log_op(|l| l.srv.version, &name, "version");
        Ok(version)
    }

    pub(crate) fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub(crate) fn handles(&self) -> Result<(SrvHandles, String)> {
        let guard = self.state.read().map_err(|_| OraError::poisoned("Srv"))?;
        let state = guard.as_ref().ok_or(OraError::AlreadyClosed("Srv"))?;
        Ok((state.handles, state.body.sys_name.clone()))
    }

    pub(crate) fn register_ses(&self, id: u64, ses: Arc<Session>) -> Result<()> {
        let mut guard = self.state.write().map_err(|_| OraError::poisoned("Srv"))?;
        let state = guard.as_mut().ok_or(OraError::AlreadyClosed("Srv"))?;
        state.body.sess.insert(id, ses);
        Ok(())
    }

    pub(crate) fn remove_ses(&self, id: u64) {
        if let Ok(mut guard) = self.state.write() {
            if let Some(state) = guard.as_mut() {
                state.body.sess.remove(&id);
            }
        }
    }

    fn take_state(&self) -> Result<SrvState> {
        let mut guard = self.state.write().map_err(|_| OraError::poisoned("Srv"))?;
        guard.take().ok_or(OraError::AlreadyClosed("Srv"))
    }

    /// Closes every Session, then detaches from the backend and frees the
    /// server handle.
    pub fn close(&self) -> Result<()> {
        let state = self.take_state()?;
        if let Some(env) = self.env.upgrade() {
            env.remove_srv(state.body.id);
        }
        self.close_state(state)
    }

    pub(crate) fn close_from_parent(&self) -> Result<()> {
        let state = self.take_state()?;
        self.close_state(state)
    }

    fn close_state(&self, state: SrvState) -> Result<()> {
        let SrvState { handles, mut body } = state;

        let mut errs = ErrorList::new();
        close_children(
            &mut body.sess,
            &mut errs,
            "close session",
            Session::close_from_parent,
        );
        errs.guard("detach server", || {
            self.provider.detach(handles.server).map_err(OraError::from)
        });
        errs.guard("free server handle", || {
            self.provider
                .free_handle(handles.server, HandleKind::Server)
                .map_err(OraError::from)
        });

        log_op(|l| l.srv.close, &body.sys_name, "close");
        self.cfg.clear();
        body.reset();
        POOLS.srv.release(body);
        errs.finish()
    }
}
