use super::config::{SesCfg, StmtCfg};
use super::server::{Server, SrvHandles};
use super::statement::Statement;
use super::transaction::Transaction;
use crate::error::{ErrorList, OraError, Result};
use crate::handles::{close_children, ensure_id, sys_name, ConfigCell, SES_IDS};
use crate::observability::logging::log_op;
use crate::pool::POOLS;
use crate::provider::{
    Attr, AttrValue, CredentialKind, HandleKind, Provider, ProviderError, RawHandle,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

pub const DRIVER_NAME: &str = concat!("ora_engine : ", env!("CARGO_PKG_VERSION"));

#[derive(Default)]
pub(crate) struct SesBody {
    pub(crate) id: u64,
    pub(crate) sys_name: String,
    pub(crate) stmts: HashMap<u64, Arc<Statement>>,
    pub(crate) txs: HashMap<u64, Arc<Transaction>>,
}

impl SesBody {
    fn reset(&mut self) {
        self.sys_name.clear();
        self.stmts.clear();
        self.txs.clear();
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SesHandles {
    pub(crate) env: RawHandle,
    pub(crate) err: RawHandle,
    pub(crate) service: RawHandle,
    pub(crate) session: RawHandle,
}

struct SesState {
    handles: SesHandles,
    body: Box<SesBody>,
}

/// An authenticated session on a Server, with its own service context.
pub struct Session {
    state: RwLock<Option<SesState>>,
    cfg: ConfigCell<SesCfg>,
    srv: Weak<Server>,
    provider: Arc<dyn Provider>,
}

impl Session {
    pub(crate) fn open(srv: &Arc<Server>, cfg: SesCfg) -> Result<Arc<Session>> {
        let (srv_handles, srv_name) = srv.handles()?;
        let provider = Arc::clone(srv.provider());
        let lob_size = srv.resolve_below(&[cfg.stmt.as_ref()]).lob_buffer_size;

        let (service, session) = begin(&*provider, srv_handles, &cfg, lob_size)?;

        let mut body = POOLS.ses.acquire();
        let id = ensure_id(&mut body.id, &SES_IDS);
        body.sys_name = sys_name(&srv_name, 'S', id);
        let name = body.sys_name.clone();

        let ses = Arc::new(Session {
            state: RwLock::new(Some(SesState {
                handles: SesHandles {
                    env: srv_handles.env,
                    err: srv_handles.err,
                    service,
                    session,
                },
                body,
            })),
            cfg: ConfigCell::new(cfg),
            srv: Arc::downgrade(srv),
            provider,
        });
        if let Err(e) = srv.register_ses(id, Arc::clone(&ses)) {
            let _ = ses.close();
            return Err(e);
        }
        log_op(|l| l.srv.open_ses, &name, "open session");
        Ok(ses)
    }

    pub fn is_open(&self) -> bool {
        self.state.read().map(|s| s.is_some()).unwrap_or(false)
    }

    pub fn cfg(&self) -> Arc<SesCfg> {
        self.cfg.get()
    }

    pub fn set_cfg(&self, cfg: SesCfg) {
        self.cfg.set(cfg);
    }

    pub fn stmt_cfg(&self) -> StmtCfg {
        self.resolve_below(&[])
    }

    pub(crate) fn resolve_below(&self, overrides: &[Option<&StmtCfg>]) -> StmtCfg {
        let own = self.cfg.get();
        let mut chain = overrides.to_vec();
        chain.push(own.stmt.as_ref());
        match self.srv.upgrade() {
            Some(srv) => srv.resolve_below(&chain),
            None => super::config::resolve_stmt_cfg(
                false,
                &chain,
                None,
                &super::config::drv_cfg().stmt,
            ),
        }
    }

    pub fn server(&self) -> Option<Arc<Server>> {
        self.srv.upgrade()
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

    pub fn num_stmt(&self) -> usize {
        self.state
            .read()
            .map(|s| s.as_ref().map_or(0, |s| s.body.stmts.len()))
            .unwrap_or(0)
    }

    /// Open transactions. Drives the auto-commit decision of every execute.
    pub fn num_tx(&self) -> usize {
        self.state
            .read()
            .map(|s| s.as_ref().map_or(0, |s| s.body.txs.len()))
            .unwrap_or(0)
    }

    pub fn prepare(self: &Arc<Self>, sql: &str) -> Result<Arc<Statement>> {
        Statement::open(self, sql)
    }

    pub fn start_tx(self: &Arc<Self>) -> Result<Arc<Transaction>> {
        Transaction::start(self)
    }

    pub(crate) fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub(crate) fn handles(&self) -> Result<(SesHandles, String)> {
        let guard = self.state.read().map_err(|_| OraError::poisoned("Ses"))?;
        let state = guard.as_ref().ok_or(OraError::AlreadyClosed("Ses"))?;
        Ok((state.handles, state.body.sys_name.clone()))
    }

    pub(crate) fn server_version(&self) -> Result<String> {
        let guard = self.state.read().map_err(|_| OraError::poisoned("Ses"))?;
        let state = guard.as_ref().ok_or(OraError::AlreadyClosed("Ses"))?;
        Ok(self.provider.server_version(state.handles.service)?)
    }

    pub(crate) fn register_stmt(&self, id: u64, stmt: Arc<Statement>) -> Result<()> {
        let mut guard = self.state.write().map_err(|_| OraError::poisoned("Ses"))?;
        let state = guard.as_mut().ok_or(OraError::AlreadyClosed("Ses"))?;
        state.body.stmts.insert(id, stmt);
        Ok(())
    }

    pub(crate) fn remove_stmt(&self, id: u64) {
        if let Ok(mut guard) = self.state.write() {
            if let Some(state) = guard.as_mut() {
                state.body.stmts.remove(&id);
            }
        }
    }

    pub(crate) fn register_tx(&self, id: u64, tx: Arc<Transaction>) -> Result<()> {
        let mut guard = self.state.write().map_err(|_| OraError::poisoned("Ses"))?;
        let state = guard.as_mut().ok_or(OraError::AlreadyClosed("Ses"))?;
        state.body.txs.insert(id, tx);
        Ok(())
    }

    pub(crate) fn remove_tx(&self, id: u64) {
        if let Ok(mut guard) = self.state.write() {
            if let Some(state) = guard.as_mut() {
                state.body.txs.remove(&id);
            }
        }
    }

    fn take_state(&self) -> Result<SesState> {
        let mut guard = self.state.write().map_err(|_| OraError::poisoned("Ses"))?;
        guard.take().ok_or(OraError::AlreadyClosed("Ses"))
    }

    /// Closes every Statement, rolls back open transactions and ends the
    /// native session.
    pub fn close(&self) -> Result<()> {
        let state = self.take_state()?;
        if let Some(srv) = self.srv.upgrade() {
            srv.remove_ses(state.body.id);
        }
        self.close_state(state)
    }

    pub(crate) fn close_from_parent(&self) -> Result<()> {
        let state = self.take_state()?;
        self.close_state(state)
    }

    fn close_state(&self, state: SesState) -> Result<()> {
        let SesState { handles, mut body } = state;

        let mut errs = ErrorList::new();
        close_children(
            &mut body.stmts,
            &mut errs,
            "close statement",
            Statement::close_from_parent,
        );
        close_children(
            &mut body.txs,
            &mut errs,
            "rollback transaction",
            Transaction::rollback_from_parent,
        );
        errs.guard("end session", || {
            self.provider
                .end_session(handles.service, handles.session)
                .map_err(OraError::from)
        });
        errs.guard("free session handle", || {
            self.provider
                .free_handle(handles.session, HandleKind::Session)
                .map_err(OraError::from)
        });
        errs.guard("free service handle", || {
            self.provider
                .free_handle(handles.service, HandleKind::Service)
                .map_err(OraError::from)
        });

        log_op(|l| l.ses.close, &body.sys_name, "close");
        self.cfg.clear();
        body.reset();
        POOLS.ses.release(body);
        errs.finish()
    }
}

/// Allocates the service context and session handles, authenticates and
/// attaches the session. Whatever was allocated is freed again on failure.
fn begin(
    provider: &dyn Provider,
    srv: SrvHandles,
    cfg: &SesCfg,
    lob_size: u32,
) -> Result<(RawHandle, RawHandle)> {
    let service = provider.alloc_handle(srv.env, HandleKind::Service)?;
    let session = match provider.alloc_handle(srv.env, HandleKind::Session) {
        Ok(h) => h,
        Err(e) => {
            let _ = provider.free_handle(service, HandleKind::Service);
            return Err(e.into());
        }
    };

    let mut begun = false;
    let result = (|| -> std::result::Result<(), ProviderError> {
        provider.set_attr(
            service,
            HandleKind::Service,
            Attr::Server,
            AttrValue::Handle(srv.server),
        )?;
        let credentials = if cfg.has_credentials() {
            provider.set_attr(
                session,
                HandleKind::Session,
                Attr::Username,
                AttrValue::Text(cfg.username.clone()),
            )?;
            provider.set_attr(
                session,
                HandleKind::Session,
                Attr::Password,
                AttrValue::Text(cfg.password.to_string()),
            )?;
            CredentialKind::Rdbms
        } else {
            CredentialKind::External
        };
        provider.set_attr(
            session,
            HandleKind::Session,
            Attr::DriverName,
            AttrValue::Text(DRIVER_NAME.to_string()),
        )?;
        provider.set_attr(
            session,
            HandleKind::Session,
            Attr::LobPrefetchSize,
            AttrValue::U32(lob_size),
        )?;
        provider.begin_session(service, session, credentials, cfg.mode.flags())?;
        begun = true;
        provider.set_attr(
            service,
            HandleKind::Service,
            Attr::Session,
            AttrValue::Handle(session),
        )?;
        // Statements are pooled client-side; the server cache stays off.
        provider.set_attr(
            service,
            HandleKind::Service,
            Attr::StmtCacheSize,
            AttrValue::U32(0),
        )
    })();

    match result {
        Ok(()) => Ok((service, session)),
        Err(e) => {
            if begun {
                let _ = provider.end_session(service, session);
            }
            let _ = provider.free_handle(session, HandleKind::Session);
            let _ = provider.free_handle(service, HandleKind::Service);
            Err(e.into())
        }
    }
}
