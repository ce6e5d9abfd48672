use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use sql_sessions::error::SqlSessionError;
use sql_sessions::pool::{MIN_POOL_CONNECTIONS, Pool, PoolConfig};
use sql_sessions::testing::{ScriptedDriver, registry_with};

#[test]
fn capacity_cannot_go_below_the_floor() {
    let pool = Pool::new(
        Arc::new(ScriptedDriver::new()),
        registry_with(&["main"]),
        PoolConfig::default().with_max_connections(2),
    );
    assert_eq!(pool.max_connections(), MIN_POOL_CONNECTIONS);

    pool.set_max_connections(1);
    assert_eq!(pool.max_connections(), MIN_POOL_CONNECTIONS);

    pool.set_max_connections(40);
    assert_eq!(pool.max_connections(), 40);
}

#[test]
fn exhausted_pool_reports_the_attempt_budget() {
    let driver = ScriptedDriver::new();
    let config = PoolConfig::default()
        .with_retry_attempts(1)
        .with_retry_wait(Duration::from_millis(10));
    let pool = Pool::new(Arc::new(driver), registry_with(&["main"]), config);

    let _held: Vec<_> = (0..pool.max_connections())
        .map(|_| pool.lease("main").unwrap())
        .collect();

    match pool.lease("main") {
        Err(SqlSessionError::MaxConnectionsReached { attempts }) => {
            // Initial try, one try after aggressive cleanup, one after a wait.
            assert_eq!(attempts, 3);
        }
        other => panic!("expected MaxConnectionsReached, got {other:?}"),
    }
}

#[test]
fn capacity_is_shared_across_names() {
    let driver = ScriptedDriver::new();
    let config = PoolConfig::default()
        .with_retry_attempts(0)
        .with_retry_wait(Duration::from_millis(5));
    let pool = Pool::new(Arc::new(driver), registry_with(&["a", "b"]), config);

    let _held: Vec<_> = (0..pool.max_connections())
        .map(|_| pool.lease("a").unwrap())
        .collect();

    assert!(matches!(
        pool.lease("b"),
        Err(SqlSessionError::MaxConnectionsReached { .. })
    ));
}

#[test]
fn waiting_lease_is_unblocked_by_a_return() {
    let driver = ScriptedDriver::new();
    let config = PoolConfig::default()
        .with_retry_attempts(100)
        .with_retry_wait(Duration::from_millis(20));
    let pool = Pool::new(Arc::new(driver), registry_with(&["main"]), config);

    let mut held: Vec<_> = (0..pool.max_connections())
        .map(|_| pool.lease("main").unwrap())
        .collect();
    let released_identity = held.last().map(|l| l.connection()).unwrap();

    let (started_tx, started_rx) = mpsc::channel();
    let (got_tx, got_rx) = mpsc::channel();
    std::thread::scope(|scope| {
        scope.spawn(|| {
            started_tx.send(()).unwrap();
            let lease = pool.lease("main").unwrap();
            got_tx.send(lease.connection()).unwrap();
        });

        started_rx.recv().unwrap();
        // Give the waiter time to block at capacity, then free one slot.
        std::thread::sleep(Duration::from_millis(60));
        drop(held.pop());

        let got = got_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(Arc::ptr_eq(&got, &released_identity));
    });
}
