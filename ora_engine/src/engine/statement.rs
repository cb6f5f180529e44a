use super::config::StmtCfg;
use super::context::Context;
use super::core::bind_descriptor::BindDescriptor;
use super::core::bind_dispatch::{bind_all, copy_back, read_identity, release_from, BindOptions};
use super::result_set::ResultSet;
use super::session::Session;
use crate::error::{ErrorList, OraError, Result};
use crate::handles::{close_children, ensure_id, sys_name, ConfigCell, STMT_IDS};
use crate::observability::logging::{log_op, should_log};
use crate::pool::POOLS;
use crate::protocol::Param;
use crate::provider::{Attr, AttrValue, ExecMode, ExecStatus, HandleKind, Provider, RawHandle};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

/// Statement category, fixed from the leading keyword of the SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StmtKind {
    Select,
    Insert,
    Update,
    Delete,
    #[default]
    Other,
}

impl StmtKind {
    pub fn from_sql(sql: &str) -> Self {
        let head = sql.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        let word: String = head
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect();
        match word.to_ascii_uppercase().as_str() {
            "SELECT" | "WITH" => StmtKind::Select,
            "INSERT" => StmtKind::Insert,
            "UPDATE" => StmtKind::Update,
            "DELETE" => StmtKind::Delete,
            _ => StmtKind::Other,
        }
    }

    pub fn is_mutating(self) -> bool {
        self != StmtKind::Select
    }
}

/// Placeholder a trailing `RETURNING <expr> INTO <placeholder>` writes to,
/// when there is exactly one.
pub fn returning_into_placeholder(sql: &str) -> Option<&str> {
    const RETURNING: &str = "RETURNING";
    let at = sql.to_ascii_uppercase().rfind(RETURNING)?;
    let mut tokens = sql[at + RETURNING.len()..].split_whitespace();
    tokens.by_ref().find(|t| t.eq_ignore_ascii_case("INTO"))?;
    let target = tokens.next()?.trim_end_matches(';');
    if tokens.next().is_some() {
        return None;
    }
    let named = target.len() > 1 && (target.starts_with(':') || target.starts_with('?'));
    if named || target == "?" {
        Some(target)
    } else {
        None
    }
}

/// Commit-on-success applies only to mutating statements run outside an
/// explicit transaction with auto-commit on.
pub fn exec_mode(kind: StmtKind, open_txs: usize, auto_commit: bool) -> ExecMode {
    if kind.is_mutating() && open_txs == 0 && auto_commit {
        ExecMode::CommitOnSuccess
    } else {
        ExecMode::Default
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Identity returned by an `INSERT ... RETURNING ... INTO`.
    pub last_insert_id: Option<i64>,
}

#[derive(Default)]
pub(crate) struct StmtBody {
    pub(crate) id: u64,
    pub(crate) sys_name: String,
    pub(crate) sql: String,
    pub(crate) kind: StmtKind,
    pub(crate) binds: Vec<BindDescriptor>,
    pub(crate) has_output_bind: bool,
    pub(crate) rsets: HashMap<u64, Arc<ResultSet>>,
}

impl StmtBody {
    fn reset(&mut self) {
        self.sys_name.clear();
        self.sql.clear();
        self.kind = StmtKind::Other;
        release_from(&mut self.binds, 0);
        self.has_output_bind = false;
        self.rsets.clear();
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct StmtHandles {
    pub(crate) err: RawHandle,
    pub(crate) service: RawHandle,
    pub(crate) stmt: RawHandle,
}

struct StmtState {
    handles: StmtHandles,
    body: Box<StmtBody>,
}

/// A prepared SQL statement. Parameters are rebound on every call.
///
/// One execute at a time: the caller must not run `exec` and `query`
/// concurrently on the same Statement.
pub struct Statement {
    state: RwLock<Option<StmtState>>,
    cfg: ConfigCell<Option<StmtCfg>>,
    ses: Weak<Session>,
    provider: Arc<dyn Provider>,
}

impl Statement {
    pub(crate) fn open(ses: &Arc<Session>, sql: &str) -> Result<Arc<Statement>> {
        if sql.trim().is_empty() {
            return Err(OraError::InvalidParameter("SQL text is empty".to_string()));
        }
        let (ses_handles, ses_name) = ses.handles()?;
        let provider = Arc::clone(ses.provider());
        let stmt = provider.prepare(ses_handles.service, sql)?;

        let mut body = POOLS.stmt.acquire();
        let id = ensure_id(&mut body.id, &STMT_IDS);
        body.sys_name = sys_name(&ses_name, 'S', id);
        body.sql.push_str(sql);
        body.kind = StmtKind::from_sql(sql);
        let name = body.sys_name.clone();

        let st = Arc::new(Statement {
            state: RwLock::new(Some(StmtState {
                handles: StmtHandles {
                    err: ses_handles.err,
                    service: ses_handles.service,
                    stmt,
                },
                body,
            })),
            cfg: ConfigCell::default(),
            ses: Arc::downgrade(ses),
            provider,
        });
        if let Err(e) = ses.register_stmt(id, Arc::clone(&st)) {
            let _ = st.close();
            return Err(e);
        }
        log_op(|l| l.ses.prep, &name, "prepare");
        Ok(st)
    }

    pub fn is_open(&self) -> bool {
        self.state.read().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Statement configuration in effect: this statement's override, else
    /// the nearest one up the tree.
    pub fn cfg(&self) -> StmtCfg {
        self.resolve_below(&[])
    }

    pub fn set_cfg(&self, cfg: StmtCfg) {
        self.cfg.set(Some(cfg));
    }

    pub fn clear_cfg(&self) {
        self.cfg.clear();
    }

    pub(crate) fn resolve_below(&self, overrides: &[Option<&StmtCfg>]) -> StmtCfg {
        let own = self.cfg.get();
        let mut chain = overrides.to_vec();
        chain.push((*own).as_ref());
        match self.ses.upgrade() {
            Some(ses) => ses.resolve_below(&chain),
            None => super::config::resolve_stmt_cfg(
                false,
                &chain,
                None,
                &super::config::drv_cfg().stmt,
            ),
        }
    }

    pub fn session(&self) -> Option<Arc<Session>> {
        self.ses.upgrade()
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

    pub fn kind(&self) -> Result<StmtKind> {
        self.read_body(|b| b.kind)
    }

    pub fn sql(&self) -> Result<String> {
        self.read_body(|b| b.sql.clone())
    }

    pub fn num_rset(&self) -> usize {
        self.read_body(|b| b.rsets.len()).unwrap_or(0)
    }

    /// Descriptors installed by the last bind pass.
    pub fn num_binds(&self) -> usize {
        self.read_body(|b| b.binds.len()).unwrap_or(0)
    }

    pub fn has_output_bind(&self) -> bool {
        self.read_body(|b| b.has_output_bind).unwrap_or(false)
    }

    fn read_body<T>(&self, f: impl FnOnce(&StmtBody) -> T) -> Result<T> {
        let guard = self.state.read().map_err(|_| OraError::poisoned("Stmt"))?;
        let state = guard.as_ref().ok_or(OraError::AlreadyClosed("Stmt"))?;
        Ok(f(&state.body))
    }

    pub fn exec(self: &Arc<Self>, params: &mut [Param<'_>]) -> Result<ExecResult> {
        self.exec_with(None, params, false)
    }

    /// Executes with batches bound as PL/SQL associative arrays.
    pub fn exec_assoc(self: &Arc<Self>, params: &mut [Param<'_>]) -> Result<ExecResult> {
        self.exec_with(None, params, true)
    }

    pub fn exec_context(
        self: &Arc<Self>,
        ctx: &Context,
        params: &mut [Param<'_>],
    ) -> Result<ExecResult> {
        self.exec_with(Some(ctx), params, false)
    }

    pub fn query(self: &Arc<Self>, params: &mut [Param<'_>]) -> Result<Arc<ResultSet>> {
        self.query_with(None, params)
    }

    pub fn query_context(
        self: &Arc<Self>,
        ctx: &Context,
        params: &mut [Param<'_>],
    ) -> Result<Arc<ResultSet>> {
        self.query_with(Some(ctx), params)
    }

    fn exec_with(
        self: &Arc<Self>,
        ctx: Option<&Context>,
        params: &mut [Param<'_>],
        assoc_array: bool,
    ) -> Result<ExecResult> {
        check(ctx)?;
        let cfg = self.cfg();
        let open_txs = self.ses.upgrade().map_or(0, |s| s.num_tx());

        let (handles, kind, name, identity) = {
            let guard = self.state.read().map_err(|_| OraError::poisoned("Stmt"))?;
            let state = guard.as_ref().ok_or(OraError::AlreadyClosed("Stmt"))?;
            let identity = if state.body.kind == StmtKind::Insert
                && returning_into_placeholder(&state.body.sql).is_some()
            {
                self.identity_slot(state.handles.stmt, params)?
            } else {
                None
            };
            (
                state.handles,
                state.body.kind,
                state.body.sys_name.clone(),
                identity,
            )
        };

        let opts = BindOptions {
            assoc_array,
            identity,
            cfg: &cfg,
        };
        let iterations = self.bind(params, &opts, &name)?;
        if let Err(e) = check(ctx) {
            self.release_binds();
            return Err(e);
        }
        self.set_prefetch(handles.stmt, &cfg)?;

        let mode = exec_mode(kind, open_txs, cfg.auto_commit);
        if should_log(|l| l.stmt.exe) {
            log::info!(
                "{} exec iterations={} mode={:?} assoc_array={}",
                name,
                iterations,
                mode,
                assoc_array
            );
        }
        if iterations == 0 {
            return Ok(ExecResult::default());
        }

        let status = self.run(ctx, iterations, mode)?;
        let rows_affected = match kind {
            StmtKind::Other => {
                if status == ExecStatus::NoData {
                    return Err(OraError::Provider(self.provider.fetch_error(handles.err)));
                }
                0
            }
            _ => self
                .provider
                .get_attr(handles.stmt, HandleKind::Statement, Attr::RowCount)?
                .as_u64()
                .unwrap_or(0),
        };

        let last_insert_id = match identity {
            Some(index) => read_identity(&*self.provider, handles.stmt, index, &cfg)?,
            None => None,
        };
        self.copy_outputs(handles.stmt, params, &cfg)?;

        Ok(ExecResult {
            rows_affected,
            last_insert_id,
        })
    }

    fn query_with(
        self: &Arc<Self>,
        ctx: Option<&Context>,
        params: &mut [Param<'_>],
    ) -> Result<Arc<ResultSet>> {
        check(ctx)?;
        let cfg = self.cfg();
        let (handles, name) = self.handles()?;

        let opts = BindOptions {
            assoc_array: false,
            identity: None,
            cfg: &cfg,
        };
        self.bind(params, &opts, &name)?;
        if let Err(e) = check(ctx) {
            self.release_binds();
            return Err(e);
        }
        self.set_prefetch(handles.stmt, &cfg)?;

        log_op(|l| l.stmt.qry, &name, "query");
        self.run(ctx, 0, ExecMode::Default)?;
        self.copy_outputs(handles.stmt, params, &cfg)?;
        ResultSet::open(self, handles.stmt, false)
    }

    /// Placeholder slot for the generated identity: appended when the caller
    /// supplied exactly one parameter fewer than the statement has
    /// placeholders, otherwise the last parameter unless it is already an
    /// output.
    fn identity_slot(&self, stmt: RawHandle, params: &[Param<'_>]) -> Result<Option<usize>> {
        let placeholders = self
            .provider
            .get_attr(stmt, HandleKind::Statement, Attr::BindCount)?
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0);
        match placeholders.saturating_sub(params.len()) {
            0 => {}
            1 => return Ok(Some(params.len())),
            missing => {
                return Err(OraError::InvalidParameter(format!(
                    "{} parameters missing; only the RETURNING INTO target may be omitted",
                    missing
                )))
            }
        }
        match params.last() {
            Some(last) if !last.is_output() => Ok(Some(params.len() - 1)),
            _ => Ok(None),
        }
    }

    fn bind(&self, params: &[Param<'_>], opts: &BindOptions<'_>, name: &str) -> Result<u32> {
        let mut guard = self.state.write().map_err(|_| OraError::poisoned("Stmt"))?;
        let state = guard.as_mut().ok_or(OraError::AlreadyClosed("Stmt"))?;
        let result = bind_all(
            &*self.provider,
            state.handles.stmt,
            &mut state.body.binds,
            params,
            opts,
        );
        state.body.has_output_bind = state.body.binds.iter().any(|d| d.kind.is_output());
        if should_log(|l| l.stmt.bind) {
            log::info!(
                "{} bind params={} installed={}",
                name,
                params.len(),
                state.body.binds.len()
            );
        }
        result
    }

    fn release_binds(&self) {
        if let Ok(mut guard) = self.state.write() {
            if let Some(state) = guard.as_mut() {
                release_from(&mut state.body.binds, 0);
                state.body.has_output_bind = false;
            }
        }
    }

    fn set_prefetch(&self, stmt: RawHandle, cfg: &StmtCfg) -> Result<()> {
        if cfg.prefetch_row_count > 0 {
            self.provider.set_attr(
                stmt,
                HandleKind::Statement,
                Attr::PrefetchRows,
                AttrValue::U32(cfg.prefetch_row_count),
            )?;
        } else if cfg.prefetch_memory_size > 0 {
            self.provider.set_attr(
                stmt,
                HandleKind::Statement,
                Attr::PrefetchMemory,
                AttrValue::U32(cfg.prefetch_memory_size),
            )?;
        }
        Ok(())
    }

    /// Runs the execute under the read lock. With a context, a watcher
    /// breaks the call if the context is cancelled or expires meanwhile.
    /// A failed execute on a done context reports the context's error after
    /// dropping the installed descriptors; an execute that completed is
    /// reported as such, since it may already have committed.
    fn run(&self, ctx: Option<&Context>, iterations: u32, mode: ExecMode) -> Result<ExecStatus> {
        let result = {
            let guard = self.state.read().map_err(|_| OraError::poisoned("Stmt"))?;
            let state = guard.as_ref().ok_or(OraError::AlreadyClosed("Stmt"))?;
            let h = state.handles;
            let execute = || self.provider.execute(h.service, h.stmt, iterations, mode);
            match ctx {
                Some(ctx) => ctx.watch(execute, || {
                    if let Err(e) = self.provider.break_execution(h.service) {
                        log::warn!("break execution failed: {}", e);
                    }
                }),
                None => execute(),
            }
        };
        match result {
            Ok(status) => Ok(status),
            Err(e) => match ctx.and_then(Context::err) {
                Some(done) => {
                    log::debug!("execute interrupted: {}", e);
                    self.release_binds();
                    Err(done)
                }
                None => Err(e.into()),
            },
        }
    }

    /// Copies outputs back into the caller's parameters and opens a result
    /// set over every returned cursor. All outputs are attempted; the first
    /// failure is returned.
    fn copy_outputs(
        self: &Arc<Self>,
        stmt: RawHandle,
        params: &mut [Param<'_>],
        cfg: &StmtCfg,
    ) -> Result<()> {
        if !self.has_output_bind() {
            return Ok(());
        }
        let outcome = {
            let guard = self.state.read().map_err(|_| OraError::poisoned("Stmt"))?;
            guard.as_ref().ok_or(OraError::AlreadyClosed("Stmt"))?;
            copy_back(&*self.provider, stmt, params, cfg)
        };
        let mut first = outcome.error;
        for (index, handle) in outcome.cursors {
            match ResultSet::open(self, handle, true) {
                Ok(rset) => {
                    if let Some(Param::Cursor(slot)) = params.get_mut(index) {
                        **slot = Some(rset);
                    }
                }
                Err(e) => {
                    first.get_or_insert(e);
                }
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub(crate) fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub(crate) fn handles(&self) -> Result<(StmtHandles, String)> {
        let guard = self.state.read().map_err(|_| OraError::poisoned("Stmt"))?;
        let state = guard.as_ref().ok_or(OraError::AlreadyClosed("Stmt"))?;
        Ok((state.handles, state.body.sys_name.clone()))
    }

    pub(crate) fn register_rset(&self, id: u64, rset: Arc<ResultSet>) -> Result<()> {
        let mut guard = self.state.write().map_err(|_| OraError::poisoned("Stmt"))?;
        let state = guard.as_mut().ok_or(OraError::AlreadyClosed("Stmt"))?;
        state.body.rsets.insert(id, rset);
        Ok(())
    }

    pub(crate) fn remove_rset(&self, id: u64) {
        if let Ok(mut guard) = self.state.write() {
            if let Some(state) = guard.as_mut() {
                state.body.rsets.remove(&id);
            }
        }
    }

    fn take_state(&self) -> Result<StmtState> {
        let mut guard = self.state.write().map_err(|_| OraError::poisoned("Stmt"))?;
        guard.take().ok_or(OraError::AlreadyClosed("Stmt"))
    }

    /// Closes open result sets, releases bind descriptors and the native
    /// statement.
    pub fn close(&self) -> Result<()> {
        let state = self.take_state()?;
        if let Some(ses) = self.ses.upgrade() {
            ses.remove_stmt(state.body.id);
        }
        self.close_state(state)
    }

    pub(crate) fn close_from_parent(&self) -> Result<()> {
        let state = self.take_state()?;
        self.close_state(state)
    }

    fn close_state(&self, state: StmtState) -> Result<()> {
        let StmtState { handles, mut body } = state;

        let mut errs = ErrorList::new();
        close_children(
            &mut body.rsets,
            &mut errs,
            "close result set",
            ResultSet::close_from_parent,
        );
        errs.guard("release binds", || {
            release_from(&mut body.binds, 0);
            Ok(())
        });
        errs.guard("release statement", || {
            self.provider
                .release_stmt(handles.stmt)
                .map_err(OraError::from)
        });

        log_op(|l| l.stmt.close, &body.sys_name, "close");
        self.cfg.clear();
        body.reset();
        POOLS.stmt.release(body);
        errs.finish()
    }
}

fn check(ctx: Option<&Context>) -> Result<()> {
    match ctx {
        Some(ctx) => ctx.check(),
        None => Ok(()),
    }
}
