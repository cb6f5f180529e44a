/// Resource tree lifecycle: cascading close, error aggregation, concurrent close.
mod helpers;
use helpers::{column, open_tree};
use ora_engine::{OraError, Value, WireType};
use std::sync::Arc;
use std::thread;

#[test]
fn test_env_close_cascades_to_every_node() {
    let t = open_tree();
    let stmt = t.ses.prepare("SELECT a FROM t").unwrap();
    t.mock.script_rows(
        vec![column("A", WireType::Int)],
        vec![vec![Some(Value::I64(1))]],
    );
    let rset = stmt.query(&mut []).unwrap();
    let tx = t.ses.start_tx().unwrap();

    t.env.close().unwrap();

    assert!(!t.env.is_open());
    assert!(!t.srv.is_open());
    assert!(!t.ses.is_open());
    assert!(!stmt.is_open());
    assert!(!rset.is_open());
    assert!(!tx.is_open());
    assert_eq!(t.mock.live_handles(), 0);
    assert_eq!(t.mock.tx_log(), vec!["start", "rollback"]);
}

#[test]
fn test_second_close_is_observable_at_every_level() {
    let t = open_tree();
    let stmt = t.ses.prepare("SELECT 1 FROM dual").unwrap();
    stmt.close().unwrap();
    assert!(matches!(stmt.close(), Err(OraError::AlreadyClosed("Stmt"))));

    t.ses.close().unwrap();
    assert!(matches!(t.ses.close(), Err(OraError::AlreadyClosed("Ses"))));

    t.srv.close().unwrap();
    assert!(matches!(t.srv.close(), Err(OraError::AlreadyClosed("Srv"))));

    t.env.close().unwrap();
    assert!(matches!(t.env.close(), Err(OraError::AlreadyClosed("Env"))));
}

#[test]
fn test_child_close_detaches_from_parent() {
    let t = open_tree();
    let a = t.ses.prepare("SELECT 1 FROM dual").unwrap();
    let b = t.ses.prepare("SELECT 2 FROM dual").unwrap();
    assert_eq!(t.ses.num_stmt(), 2);

    a.close().unwrap();
    assert_eq!(t.ses.num_stmt(), 1);
    assert!(b.is_open());

    t.ses.close().unwrap();
    assert!(!b.is_open());
    assert_eq!(t.srv.num_ses(), 0);
    t.env.close().unwrap();
}

#[test]
fn test_detach_failure_is_the_only_reported_cause() {
    let t = open_tree();
    let stmt = t.ses.prepare("SELECT 1 FROM dual").unwrap();
    let rset = stmt.query(&mut []).unwrap();
    t.mock
        .fail_detach(3113, "ORA-03113: end-of-file on communication channel");

    let err = t.srv.close().unwrap_err();
    match &err {
        OraError::Multi(multi) => {
            assert_eq!(multi.len(), 1);
            assert_eq!(multi.errors()[0].code(), 3113);
        }
        other => panic!("Expected Multi, got {:?}", other),
    }
    assert!(err.is_connection_error());

    assert!(!t.srv.is_open());
    assert!(!t.ses.is_open());
    assert!(!stmt.is_open());
    assert!(!rset.is_open());
    t.env.close().unwrap();
}

#[test]
fn test_session_close_reports_only_its_own_release_failure() {
    let t = open_tree();
    let stmt = t.ses.prepare("SELECT a FROM t").unwrap();
    t.mock.script_rows(
        vec![column("A", WireType::Int)],
        vec![vec![Some(Value::I64(1))]],
    );
    let rset = stmt.query(&mut []).unwrap();
    t.mock.fail_end_session(3135, "ORA-03135: connection lost contact");

    let err = t.ses.close().unwrap_err();
    let causes = err.causes();
    assert_eq!(causes.len(), 1);
    assert_eq!(causes[0].code(), 3135);
    assert!(!stmt.is_open());
    assert!(!rset.is_open());
    assert_eq!(t.srv.num_ses(), 0);
    t.env.close().unwrap();
}

#[test]
fn test_failures_at_several_levels_are_all_collected() {
    let t = open_tree();
    let _stmt = t.ses.prepare("SELECT 1 FROM dual").unwrap();
    t.mock.fail_release_stmt(3114, "ORA-03114: not connected to ORACLE");
    t.mock.fail_end_session(3135, "ORA-03135: connection lost contact");
    t.mock.fail_detach(3113, "ORA-03113: end-of-file on communication channel");

    let err = t.env.close().unwrap_err();
    let mut codes: Vec<i32> = err.causes().iter().map(|e| e.code()).collect();
    codes.sort_unstable();
    assert_eq!(codes, vec![3113, 3114, 3135]);
    assert_eq!(t.mock.live_handles(), 0);
}

#[test]
fn test_panicking_release_is_recovered_during_cascade() {
    let t = open_tree();
    let stmts: Vec<_> = (0..3)
        .map(|_| t.ses.prepare("SELECT a FROM t").unwrap())
        .collect();
    let tx = t.ses.start_tx().unwrap();
    t.mock.panic_on_release_stmt();

    let err = t.env.close().unwrap_err();
    let causes = err.causes();
    assert_eq!(causes.len(), 1);
    match causes[0] {
        OraError::RecoveredFault(msg) => {
            assert!(msg.contains("driver fault releasing statement"), "{}", msg)
        }
        other => panic!("Expected RecoveredFault, got {:?}", other),
    }
    assert!(stmts.iter().all(|s| !s.is_open()));
    assert!(!tx.is_open());
    assert!(!t.ses.is_open());
    assert!(!t.env.is_open());
    assert_eq!(t.mock.tx_log(), vec!["start", "rollback"]);
    assert_eq!(t.mock.live_handles(), 0);
}

#[test]
fn test_sys_names_nest() {
    let t = open_tree();
    let stmt = t.ses.prepare("SELECT 1 FROM dual").unwrap();
    let name = stmt.sys_name();
    assert!(name.starts_with(&t.ses.sys_name()));
    assert!(t.ses.sys_name().starts_with(&t.srv.sys_name()));
    assert!(t.srv.sys_name().starts_with(&t.env.sys_name()));

    t.env.close().unwrap();
    assert_eq!(stmt.sys_name(), "S_");
}

#[test]
fn test_concurrent_child_and_parent_close() {
    for _ in 0..20 {
        let t = open_tree();
        let stmts: Vec<_> = (0..8)
            .map(|i| t.ses.prepare(&format!("SELECT {} FROM dual", i)).unwrap())
            .collect();

        let closers: Vec<_> = stmts
            .iter()
            .map(|stmt| {
                let stmt = Arc::clone(stmt);
                thread::spawn(move || stmt.close())
            })
            .collect();
        let ses = Arc::clone(&t.ses);
        let ses_closer = thread::spawn(move || ses.close());

        for h in closers {
            match h.join().unwrap() {
                Ok(()) | Err(OraError::AlreadyClosed(_)) => {}
                Err(e) => panic!("unexpected close error: {}", e),
            }
        }
        ses_closer.join().unwrap().unwrap();

        assert!(stmts.iter().all(|s| !s.is_open()));
        t.env.close().unwrap();
        assert_eq!(t.mock.live_handles(), 0);
    }
}
