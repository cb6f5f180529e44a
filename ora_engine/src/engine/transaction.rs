use super::session::Session;
use crate::error::{ErrorList, OraError, Result};
use crate::handles::{ensure_id, sys_name, TX_IDS};
use crate::observability::logging::{log_op, LogDrvCfg};
use crate::pool::POOLS;
use crate::provider::{HandleKind, Provider, RawHandle};
use std::sync::{Arc, RwLock, Weak};

#[derive(Default)]
pub(crate) struct TxBody {
    pub(crate) id: u64,
    pub(crate) sys_name: String,
}

impl TxBody {
    fn reset(&mut self) {
        self.sys_name.clear();
    }
}

struct TxState {
    service: RawHandle,
    tx: RawHandle,
    body: Box<TxBody>,
}

/// Explicit transaction on a Session. While any is open, statements on
/// that session never auto-commit.
pub struct Transaction {
    state: RwLock<Option<TxState>>,
    ses: Weak<Session>,
    provider: Arc<dyn Provider>,
}

impl Transaction {
    pub(crate) fn start(ses: &Arc<Session>) -> Result<Arc<Transaction>> {
        let (handles, ses_name) = ses.handles()?;
        let provider = Arc::clone(ses.provider());

        let tx = provider.alloc_handle(handles.env, HandleKind::Transaction)?;
        if let Err(e) = provider.trans_start(handles.service, tx) {
            let _ = provider.free_handle(tx, HandleKind::Transaction);
            return Err(e.into());
        }

        let mut body = POOLS.tx.acquire();
        let id = ensure_id(&mut body.id, &TX_IDS);
        body.sys_name = sys_name(&ses_name, 'T', id);
        let name = body.sys_name.clone();

        let txn = Arc::new(Transaction {
            state: RwLock::new(Some(TxState {
                service: handles.service,
                tx,
                body,
            })),
            ses: Arc::downgrade(ses),
            provider,
        });
        if let Err(e) = ses.register_tx(id, Arc::clone(&txn)) {
            let _ = txn.rollback();
            return Err(e);
        }
        log_op(|l| l.ses.start_tx, &name, "start transaction");
        Ok(txn)
    }

    pub fn is_open(&self) -> bool {
        self.state.read().map(|s| s.is_some()).unwrap_or(false)
    }

    pub fn sys_name(&self) -> String {
        match self.state.read() {
            Ok(guard) => guard
                .as_ref()
                .map(|s| s.body.sys_name.clone())
                .unwrap_or_else(|| "T_".to_string()),
            Err(_) => "T_".to_string(),
        }
    }

    pub fn commit(&self) -> Result<()> {
        let state = self.detach()?;
        self.finish(state, Outcome::Commit)
    }

    pub fn rollback(&self) -> Result<()> {
        let state = self.detach()?;
        self.finish(state, Outcome::Rollback)
    }

    pub(crate) fn rollback_from_parent(&self) -> Result<()> {
        let state = self.take_state()?;
        self.finish(state, Outcome::Rollback)
    }

    fn take_state(&self) -> Result<TxState> {
        let mut guard = self.state.write().map_err(|_| OraError::poisoned("Tx"))?;
        guard.take().ok_or(OraError::AlreadyClosed("Tx"))
    }

    fn detach(&self) -> Result<TxState> {
        let state = self.take_state()?;
        if let Some(ses) = self.ses.upgrade() {
            ses.remove_tx(state.body.id);
        }
        Ok(state)
    }

    fn finish(&self, state: TxState, outcome: Outcome) -> Result<()> {
        let TxState {
            service,
            tx,
            mut body,
        } = state;

        let mut errs = ErrorList::new();
        errs.guard(outcome.step(), || {
            match outcome {
                Outcome::Commit => self.provider.trans_commit(service, tx),
                Outcome::Rollback => self.provider.trans_rollback(service, tx),
            }
            .map_err(OraError::from)
        });
        errs.guard("free transaction handle", || {
            self.provider
                .free_handle(tx, HandleKind::Transaction)
                .map_err(OraError::from)
        });

        log_op(outcome.toggle(), &body.sys_name, outcome.step());
        body.reset();
        POOLS.tx.release(body);
        errs.finish()
    }
}

#[derive(Clone, Copy)]
enum Outcome {
    Commit,
    Rollback,
}

impl Outcome {
    fn step(self) -> &'static str {
        match self {
            Outcome::Commit => "commit",
            Outcome::Rollback => "rollback",
        }
    }

    fn toggle(self) -> fn(&LogDrvCfg) -> bool {
        match self {
            Outcome::Commit => |l: &LogDrvCfg| l.tx.commit,
            Outcome::Rollback => |l: &LogDrvCfg| l.tx.rollback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::{EnvCfg, SesCfg, SrvCfg};
    use crate::engine::environment::Environment;
    use crate::testing::MockProvider;

    fn open_ses(mock: &Arc<MockProvider>) -> (Arc<Environment>, Arc<Session>) {
        let env = Environment::open(mock.clone(), EnvCfg::default()).unwrap();
        let srv = env.open_server(SrvCfg::new("orcl")).unwrap();
        let ses = srv.open_session(SesCfg::new("scott", "tiger")).unwrap();
        (env, ses)
    }

    #[test]
    fn test_commit_detaches_from_session() {
        let mock = Arc::new(MockProvider::new());
        let (env, ses) = open_ses(&mock);
        let tx = ses.start_tx().unwrap();
        assert!(tx.is_open());
        assert_eq!(ses.num_tx(), 1);

        tx.commit().unwrap();
        assert_eq!(ses.num_tx(), 0);
        assert_eq!(mock.tx_log(), vec!["start", "commit"]);
        assert!(matches!(tx.commit(), Err(OraError::AlreadyClosed("Tx"))));
        env.close().unwrap();
    }

    #[test]
    fn test_session_close_rolls_back_open_tx() {
        let mock = Arc::new(MockProvider::new());
        let (env, ses) = open_ses(&mock);
        let tx = ses.start_tx().unwrap();
        ses.close().unwrap();
        assert!(!tx.is_open());
        assert_eq!(mock.tx_log(), vec!["start", "rollback"]);
        env.close().unwrap();
    }

    #[test]
    fn test_handles_released_after_rollback() {
        let mock = Arc::new(MockProvider::new());
        let (env, ses) = open_ses(&mock);
        let live = mock.live_handles();
        let tx = ses.start_tx().unwrap();
        assert_eq!(mock.live_handles(), live + 1);
        tx.rollback().unwrap();
        assert_eq!(mock.live_handles(), live);
        env.close().unwrap();
    }
}
