use super::config::StmtCfg;
use super::statement::Statement;
use crate::error::{ErrorList, OraError, Result};
use crate::handles::{ensure_id, sys_name, ConfigCell, RSET_IDS};
use crate::observability::logging::log_op;
use crate::pool::POOLS;
use crate::protocol::Value;
use crate::provider::{ColumnDesc, HandleKind, Provider, RawHandle};
use std::sync::{Arc, RwLock, Weak};

pub type Row = Vec<Option<Value>>;

#[derive(Default)]
pub(crate) struct RsetBody {
    pub(crate) id: u64,
    pub(crate) sys_name: String,
    pub(crate) columns: Vec<ColumnDesc>,
    pub(crate) fetched: u64,
}

impl RsetBody {
    fn reset(&mut self) {
        self.sys_name.clear();
        self.columns.clear();
        self.fetched = 0;
    }
}

struct RsetState {
    handle: RawHandle,
    /// Set for nested cursors, whose statement handle belongs to this
    /// result set rather than to the parent statement.
    owned: bool,
    body: Box<RsetBody>,
}

/// Forward-only cursor over the rows of a query or a returned cursor.
pub struct ResultSet {
    state: RwLock<Option<RsetState>>,
    cfg: ConfigCell<Option<StmtCfg>>,
    stmt: Weak<Statement>,
    provider: Arc<dyn Provider>,
}

impl std::fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSet").finish_non_exhaustive()
    }
}

impl ResultSet {
    pub(crate) fn open(
        stmt: &Arc<Statement>,
        handle: RawHandle,
        owned: bool,
    ) -> Result<Arc<ResultSet>> {
        let (_, stmt_name) = stmt.handles()?;
        let provider = Arc::clone(stmt.provider());

        let mut body = POOLS.rset.acquire();
        let id = ensure_id(&mut body.id, &RSET_IDS);
        body.sys_name = sys_name(&stmt_name, 'R', id);
        let name = body.sys_name.clone();

        let rset = Arc::new(ResultSet {
            state: RwLock::new(Some(RsetState {
                handle,
                owned,
                body,
            })),
            cfg: ConfigCell::default(),
            stmt: Arc::downgrade(stmt),
            provider,
        });
        if let Err(e) = rset.describe() {
            let _ = rset.close();
            return Err(e);
        }
        if let Err(e) = stmt.register_rset(id, Arc::clone(&rset)) {
            let _ = rset.close();
            return Err(e);
        }
        log_op(|l| l.rset.open, &name, "open");
        Ok(rset)
    }

    fn describe(&self) -> Result<()> {
        let mut guard = self.state.write().map_err(|_| OraError::poisoned("Rset"))?;
        let state = guard.as_mut().ok_or(OraError::AlreadyClosed("Rset"))?;
        state.body.columns = self.provider.describe(state.handle)?;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.state.read().map(|s| s.is_some()).unwrap_or(false)
    }

    pub fn cfg(&self) -> StmtCfg {
        let own = self.cfg.get();
        match self.stmt.upgrade() {
            Some(stmt) => stmt.resolve_below(&[(*own).as_ref()]),
            None => (*own)
                .clone()
                .unwrap_or_else(|| super::config::drv_cfg().stmt.clone()),
        }
    }

    pub fn set_cfg(&self, cfg: StmtCfg) {
        self.cfg.set(Some(cfg));
    }

    pub fn sys_name(&self) -> String {
        match self.state.read() {
            Ok(guard) => guard
                .as_ref()
                .map(|s| s.body.sys_name.clone())
                .unwrap_or_else(|| "R_".to_string()),
            Err(_) => "R_".to_string(),
        }
    }

    pub fn columns(&self) -> Result<Vec<ColumnDesc>> {
        let guard = self.state.read().map_err(|_| OraError::poisoned("Rset"))?;
        let state = guard.as_ref().ok_or(OraError::AlreadyClosed("Rset"))?;
        Ok(state.body.columns.clone())
    }

    pub fn rows_fetched(&self) -> u64 {
        self.state
            .read()
            .map(|s| s.as_ref().map_or(0, |s| s.body.fetched))
            .unwrap_or(0)
    }

    /// Next row, or `None` once the cursor is exhausted. Exhaustion closes
    /// the result set.
    pub fn next_row(&self) -> Result<Option<Row>> {
        let row = {
            let mut guard = self.state.write().map_err(|_| OraError::poisoned("Rset"))?;
            let state = guard.as_mut().ok_or(OraError::AlreadyClosed("Rset"))?;
            let row = self.provider.fetch_row(state.handle)?;
            if row.is_some() {
                state.body.fetched += 1;
            }
            row
        };
        if row.is_none() {
            match self.close() {
                Err(e) if !e.is_already_closed() => return Err(e),
                _ => {}
            }
        }
        Ok(row)
    }

    fn take_state(&self) -> Result<RsetState> {
        let mut guard = self.state.write().map_err(|_| OraError::poisoned("Rset"))?;
        guard.take().ok_or(OraError::AlreadyClosed("Rset"))
    }

    pub fn close(&self) -> Result<()> {
        let state = self.take_state()?;
        if let Some(stmt) = self.stmt.upgrade() {
            stmt.remove_rset(state.body.id);
        }
        self.close_state(state)
    }

    pub(crate) fn close_from_parent(&self) -> Result<()> {
        let state = self.take_state()?;
        self.close_state(state)
    }

    fn close_state(&self, state: RsetState) -> Result<()> {
        let RsetState {
            handle,
            owned,
            mut body,
        } = state;

        let mut errs = ErrorList::new();
        if owned {
            errs.guard("free cursor handle", || {
                self.provider
                    .free_handle(handle, HandleKind::Statement)
                    .map_err(OraError::from)
            });
        }

        log_op(|l| l.rset.close, &body.sys_name, "close");
        self.cfg.clear();
        body.reset();
        POOLS.rset.release(body);
        errs.finish()
    }
}
