//! In-memory [`Provider`] for tests: hands out counted handles, records
//! what the engine asks for and replays scripted results and failures.

use crate::engine::core::bind_descriptor::{BindDescriptor, BindKind};
use crate::protocol::{ScalarKind, Value, WireType};
use crate::provider::{
    Attr, AttrValue, ColumnDesc, CredentialKind, ExecMode, ExecStatus, HandleKind, Provider,
    ProviderError, ProviderResult, RawHandle,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub type Row = Vec<Option<Value>>;

const AL32UTF8: u64 = 873;
pub const CANCEL_CODE: i32 = 1013;

/// One recorded execute.
#[derive(Debug, Clone)]
pub struct ExecCall {
    pub sql: String,
    pub iterations: u32,
    pub mode: ExecMode,
    pub binds: Vec<BindDescriptor>,
}

#[derive(Default)]
struct MockStmt {
    sql: String,
    binds: Vec<BindDescriptor>,
    outputs: HashMap<usize, Vec<Option<Value>>>,
    columns: Vec<ColumnDesc>,
    rows: VecDeque<Row>,
    row_count: u64,
}

#[derive(Default)]
struct Failures {
    attach: Option<ProviderError>,
    detach: Option<ProviderError>,
    end_session: Option<ProviderError>,
    release_stmt: Option<ProviderError>,
    execute_at: Option<(u32, ProviderError)>,
    bind_at: Option<(usize, ProviderError)>,
    describe: Option<ProviderError>,
    panic_release_stmt: bool,
}

#[derive(Default)]
struct Inner {
    next_handle: u64,
    live: HashMap<u64, HandleKind>,
    charset: Option<u64>,
    attrs: HashMap<Attr, AttrValue>,
    stmts: HashMap<u64, MockStmt>,
    failures: Failures,
    scripted_outputs: HashMap<usize, Vec<Option<Value>>>,
    scripted_rows: Option<(Vec<ColumnDesc>, Vec<Row>)>,
    scripted_cursors: HashMap<usize, (Vec<ColumnDesc>, Vec<Row>)>,
    scripted_status: Option<ExecStatus>,
    executes: Vec<ExecCall>,
    sessions_begun: Vec<(CredentialKind, u32)>,
    tx_log: Vec<&'static str>,
    next_identity: i64,
    block_next_execute: bool,
    delay_next_execute: Option<Duration>,
    breaks: usize,
}

impl Inner {
    fn alloc(&mut self, kind: HandleKind) -> ProviderResult<RawHandle> {
        self.next_handle += 1;
        let handle = RawHandle::new(self.next_handle)
            .ok_or_else(|| ProviderError::new(-1, "handle space exhausted"))?;
        self.live.insert(handle.get(), kind);
        Ok(handle)
    }

    fn free(&mut self, handle: RawHandle) -> ProviderResult<()> {
        self.stmts.remove(&handle.get());
        match self.live.remove(&handle.get()) {
            Some(_) => Ok(()),
            None => Err(ProviderError::new(-2, "invalid handle")),
        }
    }
}

#[derive(Default)]
pub struct MockProvider {
    inner: Mutex<Inner>,
    wake: Condvar,
}

fn is_identity_slot(desc: &BindDescriptor) -> bool {
    desc.kind == BindKind::Output
        && desc.wire == WireType::Int
        && desc.scalar == Some(ScalarKind::I64)
        && desc.values.iter().all(Option::is_none)
}

/// Counts `?` and `:name` placeholders, skipping quoted text and `:=`.
fn count_placeholders(sql: &str) -> u64 {
    let mut count = 0;
    let mut quoted = false;
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' => quoted = !quoted,
            '?' if !quoted => count += 1,
            ':' if !quoted => {
                if chars.peek().is_some_and(|n| n.is_alphanumeric() || *n == '_') {
                    count += 1;
                }
            }
            _ => {}
        }
    }
    count
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_identity: 1000,
                ..Inner::default()
            }),
            wake: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handles allocated and not yet freed.
    pub fn live_handles(&self) -> usize {
        self.lock().live.len()
    }

    pub fn set_charset(&self, id: u64) {
        self.lock().charset = Some(id);
    }

    pub fn fail_attach(&self, code: i32, message: &str) {
        self.lock().failures.attach = Some(ProviderError::new(code, message));
    }

    pub fn fail_detach(&self, code: i32, message: &str) {
        self.lock().failures.detach = Some(ProviderError::new(code, message));
    }

    pub fn fail_end_session(&self, code: i32, message: &str) {
        self.lock().failures.end_session = Some(ProviderError::new(code, message));
    }

    pub fn fail_release_stmt(&self, code: i32, message: &str) {
        self.lock().failures.release_stmt = Some(ProviderError::new(code, message));
    }

    /// Next describe of a result set fails.
    pub fn fail_describe(&self, code: i32, message: &str) {
        self.lock().failures.describe = Some(ProviderError::new(code, message));
    }

    /// Next statement release panics after freeing the handle.
    pub fn panic_on_release_stmt(&self) {
        self.lock().failures.panic_release_stmt = true;
    }

    /// Next execute running at least `iteration` iterations fails there.
    pub fn fail_execute_at(&self, iteration: u32, code: i32, message: &str) {
        self.lock().failures.execute_at = Some((iteration, ProviderError::new(code, message)));
    }

    /// Next bind at the 1-based `position` fails.
    pub fn fail_bind_at(&self, position: usize, code: i32, message: &str) {
        self.lock().failures.bind_at = Some((position, ProviderError::new(code, message)));
    }

    /// Next execute blocks until `break_execution` is called, then fails
    /// with ORA-01013.
    pub fn block_next_execute(&self) {
        self.lock().block_next_execute = true;
    }

    /// Next execute takes at least `delay` and then completes normally,
    /// whether or not `break_execution` was called meanwhile.
    pub fn delay_next_execute(&self, delay: Duration) {
        self.lock().delay_next_execute = Some(delay);
    }

    pub fn breaks(&self) -> usize {
        self.lock().breaks
    }

    /// Values the next execute reports for the output at `position`.
    pub fn script_output(&self, position: usize, values: Vec<Option<Value>>) {
        self.lock().scripted_outputs.insert(position, values);
    }

    /// Rows the next executed statement yields.
    pub fn script_rows(&self, columns: Vec<ColumnDesc>, rows: Vec<Row>) {
        self.lock().scripted_rows = Some((columns, rows));
    }

    /// Nested cursor returned for the output at `position`.
    pub fn script_cursor(&self, position: usize, columns: Vec<ColumnDesc>, rows: Vec<Row>) {
        self.lock().scripted_cursors.insert(position, (columns, rows));
    }

    pub fn script_status(&self, status: ExecStatus) {
        self.lock().scripted_status = Some(status);
    }

    pub fn executes(&self) -> Vec<ExecCall> {
        self.lock().executes.clone()
    }

    pub fn last_execute(&self) -> Option<ExecCall> {
        self.lock().executes.last().cloned()
    }

    pub fn sessions_begun(&self) -> Vec<(CredentialKind, u32)> {
        self.lock().sessions_begun.clone()
    }

    pub fn tx_log(&self) -> Vec<&'static str> {
        self.lock().tx_log.clone()
    }

    /// Last value set for `attr` on any handle.
    pub fn last_attr(&self, attr: Attr) -> Option<AttrValue> {
        self.lock().attrs.get(&attr).cloned()
    }

    pub fn stmt_cache_size(&self) -> Option<u64> {
        self.last_attr(Attr::StmtCacheSize).and_then(|v| v.as_u64())
    }

    pub fn lob_prefetch_size(&self) -> Option<u64> {
        self.last_attr(Attr::LobPrefetchSize).and_then(|v| v.as_u64())
    }
}

impl Provider for MockProvider {
    fn alloc_env(&self) -> ProviderResult<RawHandle> {
        self.lock().alloc(HandleKind::Env)
    }

    fn free_env(&self, env: RawHandle) -> ProviderResult<()> {
        self.lock().free(env)
    }

    fn alloc_handle(&self, _env: RawHandle, kind: HandleKind) -> ProviderResult<RawHandle> {
        self.lock().alloc(kind)
    }

    fn free_handle(&self, handle: RawHandle, _kind: HandleKind) -> ProviderResult<()> {
        self.lock().free(handle)
    }

    fn attach(&self, _server: RawHandle, _dblink: &str) -> ProviderResult<()> {
        match self.lock().failures.attach.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn detach(&self, _server: RawHandle) -> ProviderResult<()> {
        match self.lock().failures.detach.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn get_attr(
        &self,
        handle: RawHandle,
        _kind: HandleKind,
        attr: Attr,
    ) -> ProviderResult<AttrValue> {
        let inner = self.lock();
        match attr {
            Attr::CharsetId => Ok(AttrValue::U64(inner.charset.unwrap_or(AL32UTF8))),
            Attr::BindCount => {
                let sql = inner
                    .stmts
                    .get(&handle.get())
                    .map(|s| s.sql.as_str())
                    .unwrap_or("");
                Ok(AttrValue::U64(count_placeholders(sql)))
            }
            Attr::RowCount => Ok(AttrValue::U64(
                inner.stmts.get(&handle.get()).map_or(0, |s| s.row_count),
            )),
            other => inner
                .attrs
                .get(&other)
                .cloned()
                .ok_or_else(|| ProviderError::new(24315, "ORA-24315: illegal attribute type")),
        }
    }

    fn set_attr(
        &self,
        _handle: RawHandle,
        _kind: HandleKind,
        attr: Attr,
        value: AttrValue,
    ) -> ProviderResult<()> {
        self.lock().attrs.insert(attr, value);
        Ok(())
    }

    fn begin_session(
        &self,
        _service: RawHandle,
        _session: RawHandle,
        credentials: CredentialKind,
        mode: u32,
    ) -> ProviderResult<()> {
        self.lock().sessions_begun.push((credentials, mode));
        Ok(())
    }

    fn end_session(&self, _service: RawHandle, _session: RawHandle) -> ProviderResult<()> {
        match self.lock().failures.end_session.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn server_version(&self, _service: RawHandle) -> ProviderResult<String> {
        Ok("Oracle Database 19c Enterprise Edition Release 19.0.0.0.0 - Production".to_string())
    }

    fn prepare(&self, _service: RawHandle, sql: &str) -> ProviderResult<RawHandle> {
        let mut inner = self.lock();
        let handle = inner.alloc(HandleKind::Statement)?;
        inner.stmts.insert(
            handle.get(),
            MockStmt {
                sql: sql.to_string(),
                ..MockStmt::default()
            },
        );
        Ok(handle)
    }

    fn release_stmt(&self, stmt: RawHandle) -> ProviderResult<()> {
        let mut inner = self.lock();
        let failure = inner.failures.release_stmt.take();
        inner.free(stmt)?;
        if std::mem::take(&mut inner.failures.panic_release_stmt) {
            drop(inner);
            panic!("driver fault releasing statement {}", stmt.get());
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn bind(&self, stmt: RawHandle, desc: &BindDescriptor) -> ProviderResult<()> {
        let mut inner = self.lock();
        if matches!(&inner.failures.bind_at, Some((p, _)) if *p == desc.position) {
            if let Some((_, e)) = inner.failures.bind_at.take() {
                return Err(e);
            }
        }
        let entry = inner.stmts.entry(stmt.get()).or_default();
        entry.binds.truncate(desc.position.saturating_sub(1));
        entry.binds.push(desc.clone());
        Ok(())
    }

    fn execute(
        &self,
        _service: RawHandle,
        stmt: RawHandle,
        iterations: u32,
        mode: ExecMode,
    ) -> ProviderResult<ExecStatus> {
        let delay = self.lock().delay_next_execute.take();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let mut inner = self.lock();
        let (sql, binds) = inner
            .stmts
            .get(&stmt.get())
            .map(|s| (s.sql.clone(), s.binds.clone()))
            .unwrap_or_default();
        inner.executes.push(ExecCall {
            sql,
            iterations,
            mode,
            binds: binds.clone(),
        });

        if inner.block_next_execute {
            inner.block_next_execute = false;
            let seen = inner.breaks;
            while inner.breaks == seen {
                inner = self.wake.wait(inner).unwrap_or_else(PoisonError::into_inner);
            }
            return Err(ProviderError::new(
                CANCEL_CODE,
                "ORA-01013: user requested cancel of current operation",
            ));
        }

        if matches!(&inner.failures.execute_at, Some((at, _)) if iterations >= *at) {
            if let Some((_, e)) = inner.failures.execute_at.take() {
                return Err(e);
            }
        }

        let mut outputs = HashMap::new();
        for desc in binds.iter().filter(|d| d.kind.is_output()) {
            let values = match inner.scripted_outputs.remove(&desc.position) {
                Some(values) => values,
                None if is_identity_slot(desc) => {
                    inner.next_identity += 1;
                    vec![Some(Value::I64(inner.next_identity))]
                }
                None => desc.values.clone(),
            };
            outputs.insert(desc.position, values);
        }
        let scripted_rows = inner.scripted_rows.take();
        let status = inner.scripted_status.take().unwrap_or(ExecStatus::Success);

        let entry = inner.stmts.entry(stmt.get()).or_default();
        entry.row_count = u64::from(iterations);
        entry.outputs = outputs;
        if let Some((columns, rows)) = scripted_rows {
            entry.columns = columns;
            entry.rows = rows.into();
        }
        Ok(status)
    }

    fn break_execution(&self, _service: RawHandle) -> ProviderResult<()> {
        self.lock().breaks += 1;
        self.wake.notify_all();
        Ok(())
    }

    fn output_values(
        &self,
        stmt: RawHandle,
        position: usize,
    ) -> ProviderResult<Vec<Option<Value>>> {
        let mut inner = self.lock();
        if let Some(values) = inner
            .stmts
            .get(&stmt.get())
            .and_then(|s| s.outputs.get(&position))
        {
            return Ok(values.clone());
        }
        inner
            .scripted_outputs
            .remove(&position)
            .ok_or_else(|| ProviderError::new(1008, "ORA-01008: not all variables bound"))
    }

    fn output_cursor(&self, _stmt: RawHandle, position: usize) -> ProviderResult<RawHandle> {
        let mut inner = self.lock();
        let (columns, rows) = inner
            .scripted_cursors
            .remove(&position)
            .unwrap_or_default();
        let handle = inner.alloc(HandleKind::Statement)?;
        inner.stmts.insert(
            handle.get(),
            MockStmt {
                columns,
                rows: rows.into(),
                ..MockStmt::default()
            },
        );
        Ok(handle)
    }

    fn describe(&self, stmt: RawHandle) -> ProviderResult<Vec<ColumnDesc>> {
        let mut inner = self.lock();
        if let Some(e) = inner.failures.describe.take() {
            return Err(e);
        }
        Ok(inner
            .stmts
            .get(&stmt.get())
            .map(|s| s.columns.clone())
            .unwrap_or_default())
    }

    fn fetch_row(&self, stmt: RawHandle) -> ProviderResult<Option<Row>> {
        Ok(self
            .lock()
            .stmts
            .get_mut(&stmt.get())
            .and_then(|s| s.rows.pop_front()))
    }

    fn trans_start(&self, _service: RawHandle, _tx: RawHandle) -> ProviderResult<()> {
        self.lock().tx_log.push("start");
        Ok(())
    }

    fn trans_commit(&self, _service: RawHandle, _tx: RawHandle) -> ProviderResult<()> {
        self.lock().tx_log.push("commit");
        Ok(())
    }

    fn trans_rollback(&self, _service: RawHandle, _tx: RawHandle) -> ProviderResult<()> {
        self.lock().tx_log.push("rollback");
        Ok(())
    }

    fn fetch_error(&self, _err: RawHandle) -> ProviderError {
        ProviderError::new(1403, "ORA-01403: no data found")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_placeholders() {
        assert_eq!(count_placeholders("SELECT 1 FROM dual"), 0);
        assert_eq!(count_placeholders("INSERT INTO t VALUES (:1, :name, ?)"), 3);
        assert_eq!(count_placeholders("BEGIN x := :a; END;"), 1);
        assert_eq!(count_placeholders("SELECT ':x' FROM dual WHERE a = :1"), 1);
    }

    #[test]
    fn test_handles_are_counted() {
        let mock = MockProvider::new();
        let env = mock.alloc_env().unwrap();
        let err = mock.alloc_handle(env, HandleKind::Error).unwrap();
        assert_eq!(mock.live_handles(), 2);
        mock.free_handle(err, HandleKind::Error).unwrap();
        mock.free_env(env).unwrap();
        assert_eq!(mock.live_handles(), 0);
        assert!(mock.free_env(env).is_err());
    }
}
