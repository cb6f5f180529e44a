/// Session reuse through the r2d2-backed pool.
mod helpers;
use helpers::open_tree;
use ora_engine::{OraError, Param, SesCfg, SessionPool};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_pooled_sessions_are_usable_and_reused() {
    let t = open_tree();
    let pool = SessionPool::new(&t.srv, SesCfg::new("scott", "tiger"), 4).unwrap();
    assert_eq!(pool.max_size(), 4);

    for i in 0i64..3 {
        let ses = pool.get().unwrap();
        let stmt = ses.prepare("INSERT INTO t (a) VALUES (:1)").unwrap();
        assert_eq!(stmt.exec(&mut [Param::from(i)]).unwrap().rows_affected, 1);
        stmt.close().unwrap();
    }
    // The tree's own session plus the one pooled session.
    assert_eq!(t.srv.num_ses(), 2);
    assert_eq!(pool.state().size, 1);
    assert_eq!(pool.state().idle, 1);
    t.env.close().unwrap();
}

#[test]
fn test_dropped_pool_releases_server_sessions() {
    let t = open_tree();
    let live = t.mock.live_handles();
    let pool = SessionPool::new(&t.srv, SesCfg::new("scott", "tiger"), 2).unwrap();
    {
        let first = pool.get().unwrap();
        let second = pool.get().unwrap();
        assert_ne!(first.sys_name(), second.sys_name());
    }
    assert_eq!(t.srv.num_ses(), 3);

    drop(pool);
    assert_eq!(t.srv.num_ses(), 1);
    assert_eq!(t.mock.live_handles(), live);
    t.env.close().unwrap();
}

#[test]
fn test_exhausted_pool_times_out() {
    let t = open_tree();
    let pool = SessionPool::with_timeout(
        &t.srv,
        SesCfg::new("scott", "tiger"),
        1,
        Duration::from_millis(100),
    )
    .unwrap();
    let held = pool.get().unwrap();
    assert!(matches!(pool.get(), Err(OraError::PoolError(_))));
    drop(held);
    assert!(pool.get().is_ok());
    t.env.close().unwrap();
}

#[test]
fn test_server_close_closes_pooled_sessions() {
    let t = open_tree();
    let pool = SessionPool::with_timeout(
        &t.srv,
        SesCfg::new("scott", "tiger"),
        2,
        Duration::from_millis(100),
    )
    .unwrap();
    let ses = Arc::clone(pool.get().unwrap().session());
    t.srv.close().unwrap();
    assert!(!ses.is_open());
    assert!(pool.get().is_err());
    t.env.close().unwrap();
}

#[test]
fn test_pool_shared_across_threads() {
    let t = open_tree();
    let pool = Arc::new(SessionPool::new(&t.srv, SesCfg::new("scott", "tiger"), 3).unwrap());

    let workers: Vec<_> = (0i64..6)
        .map(|i| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let ses = pool.get().unwrap();
                let stmt = ses.prepare("INSERT INTO t (a) VALUES (:1)").unwrap();
                let rows = stmt.exec(&mut [Param::from(vec![i; 2])]).unwrap().rows_affected;
                stmt.close().unwrap();
                rows
            })
        })
        .collect();
    let total: u64 = workers.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(total, 12);
    assert!(pool.state().size <= 3);
    t.env.close().unwrap();
}
