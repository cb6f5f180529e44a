/// Cancellation and deadlines on context-aware calls.
mod helpers;
use helpers::open_tree;
use ora_engine::provider::ExecMode;
use ora_engine::{Context, OraError, Param};
use std::thread;
use std::time::{Duration, Instant};

const INSERT: &str = "INSERT INTO t (a) VALUES (:1)";

#[test]
fn test_cancelled_context_skips_execute() {
    let t = open_tree();
    let stmt = t.ses.prepare(INSERT).unwrap();
    let ctx = Context::background();
    ctx.cancel();

    let err = stmt
        .exec_context(&ctx, &mut [Param::from(1i32)])
        .unwrap_err();
    assert!(matches!(err, OraError::Cancelled));
    assert!(t.mock.executes().is_empty());
    assert!(matches!(
        stmt.query_context(&ctx, &mut []),
        Err(OraError::Cancelled)
    ));
    t.env.close().unwrap();
}

#[test]
fn test_cancel_interrupts_running_execute() {
    let t = open_tree();
    let stmt = t.ses.prepare(INSERT).unwrap();
    t.mock.block_next_execute();

    let ctx = Context::background();
    let canceller = {
        let ctx = ctx.clone();
        let mock = t.mock.clone();
        thread::spawn(move || {
            while mock.executes().is_empty() {
                thread::sleep(Duration::from_millis(1));
            }
            ctx.cancel();
        })
    };

    let err = stmt
        .exec_context(&ctx, &mut [Param::from(vec![1i64, 2, 3])])
        .unwrap_err();
    canceller.join().unwrap();

    assert!(matches!(err, OraError::Cancelled));
    assert_eq!(t.mock.breaks(), 1);
    assert_eq!(stmt.num_binds(), 0);
    assert!(stmt.is_open());
    t.env.close().unwrap();
}

#[test]
fn test_deadline_interrupts_running_execute() {
    let t = open_tree();
    let stmt = t.ses.prepare(INSERT).unwrap();
    t.mock.block_next_execute();

    let ctx = Context::with_timeout(Duration::from_millis(50));
    let started = Instant::now();
    let err = stmt
        .exec_context(&ctx, &mut [Param::from(1i32)])
        .unwrap_err();

    assert!(matches!(err, OraError::DeadlineExceeded));
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(t.mock.breaks(), 1);
    assert!(err.is_retryable());
    t.env.close().unwrap();
}

#[test]
fn test_completed_execute_is_reported_after_deadline() {
    let t = open_tree();
    let stmt = t.ses.prepare(INSERT).unwrap();
    t.mock.delay_next_execute(Duration::from_millis(80));

    let ctx = Context::with_timeout(Duration::from_millis(20));
    let result = stmt
        .exec_context(&ctx, &mut [Param::from(1i32)])
        .unwrap();

    assert_eq!(result.rows_affected, 1);
    assert!(matches!(ctx.err(), Some(OraError::DeadlineExceeded)));
    assert_eq!(t.mock.breaks(), 1);
    assert_eq!(t.mock.last_execute().unwrap().mode, ExecMode::CommitOnSuccess);
    assert_eq!(stmt.num_binds(), 1);
    t.env.close().unwrap();
}

#[test]
fn test_expired_deadline_fails_before_bind() {
    let t = open_tree();
    let stmt = t.ses.prepare(INSERT).unwrap();
    let ctx = Context::with_deadline(Instant::now());
    assert!(matches!(
        stmt.exec_context(&ctx, &mut [Param::from(1i32)]),
        Err(OraError::DeadlineExceeded)
    ));
    assert_eq!(stmt.num_binds(), 0);
    t.env.close().unwrap();
}

#[test]
fn test_live_context_behaves_like_plain_exec() {
    let t = open_tree();
    let stmt = t.ses.prepare(INSERT).unwrap();
    let ctx = Context::with_timeout(Duration::from_secs(30));
    let result = stmt
        .exec_context(&ctx, &mut [Param::from(vec![1i64, 2])])
        .unwrap();
    assert_eq!(result.rows_affected, 2);
    assert_eq!(t.mock.breaks(), 0);
    assert!(ctx.err().is_none());

    let rset = stmt
        .query_context(&Context::background(), &mut [Param::from(1i64)])
        .unwrap();
    assert!(rset.is_open());
    t.env.close().unwrap();
}
