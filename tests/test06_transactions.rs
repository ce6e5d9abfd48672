use std::sync::Arc;

use sql_sessions::error::SqlSessionError;
use sql_sessions::pool::{Pool, PoolConfig};
use sql_sessions::testing::{ScriptedDriver, registry_with};

fn make_pool(driver: &ScriptedDriver) -> Pool<ScriptedDriver> {
    Pool::new(
        Arc::new(driver.clone()),
        registry_with(&["main"]),
        PoolConfig::default(),
    )
}

#[test]
fn outermost_commit_reaches_the_physical_session() {
    let driver = ScriptedDriver::new();
    let pool = make_pool(&driver);
    let lease = pool.lease("main").unwrap();

    let tx = lease.begin().unwrap();
    assert_eq!(lease.transaction_depth(), 1);
    tx.commit().unwrap();
    assert_eq!(driver.commit_count(), 1);
    assert_eq!(lease.transaction_depth(), 0);
}

#[test]
fn dropped_transaction_rolls_back() {
    let driver = ScriptedDriver::new();
    let pool = make_pool(&driver);
    let lease = pool.lease("main").unwrap();

    {
        let _tx = lease.begin().unwrap();
    }
    assert_eq!(driver.rollback_count(), 1);
    assert_eq!(driver.commit_count(), 0);
}

#[test]
fn nested_levels_use_savepoints() {
    let driver = ScriptedDriver::new();
    let pool = make_pool(&driver);
    let lease = pool.lease("main").unwrap();

    let outer = lease.begin().unwrap();
    let inner = lease.begin().unwrap();
    assert_eq!(lease.transaction_depth(), 2);

    inner.commit().unwrap();
    outer.commit().unwrap();

    let executed = driver.executed();
    assert!(executed.contains(&"SAVEPOINT sp_2".to_owned()));
    assert!(executed.contains(&"RELEASE SAVEPOINT sp_2".to_owned()));
    // Only the outermost level touches the physical transaction.
    assert_eq!(driver.commit_count(), 1);
}

#[test]
fn inner_rollback_goes_to_the_savepoint() {
    let driver = ScriptedDriver::new();
    let pool = make_pool(&driver);
    let lease = pool.lease("main").unwrap();

    let outer = lease.begin().unwrap();
    let inner = lease.begin().unwrap();
    inner.rollback().unwrap();
    outer.commit().unwrap();

    let executed = driver.executed();
    assert!(executed.contains(&"ROLLBACK TO SAVEPOINT sp_2".to_owned()));
    assert_eq!(driver.rollback_count(), 0);
    assert_eq!(driver.commit_count(), 1);
}

#[test]
fn outer_rollback_invalidates_inner_levels() {
    let driver = ScriptedDriver::new();
    let pool = make_pool(&driver);
    let lease = pool.lease("main").unwrap();

    let outer = lease.begin().unwrap();
    let inner = lease.begin().unwrap();
    outer.rollback().unwrap();
    assert_eq!(lease.transaction_depth(), 0);
    assert_eq!(driver.rollback_count(), 1);

    match inner.commit() {
        Err(SqlSessionError::ExecutionError(msg)) => {
            assert!(msg.contains("no longer active"));
        }
        other => panic!("expected invalidated transaction, got {other:?}"),
    }
    // The stale guard must not have rolled anything else back.
    assert_eq!(driver.rollback_count(), 1);
}

#[test]
fn only_the_innermost_level_may_commit() {
    let driver = ScriptedDriver::new();
    let pool = make_pool(&driver);
    let lease = pool.lease("main").unwrap();

    let outer = lease.begin().unwrap();
    let inner = lease.begin().unwrap();
    assert!(matches!(
        outer.commit(),
        Err(SqlSessionError::ExecutionError(_))
    ));
    inner.rollback().unwrap();
}

#[test]
fn closing_a_connection_rolls_back_open_transactions() {
    let driver = ScriptedDriver::new();
    let pool = make_pool(&driver);
    let lease = pool.lease("main").unwrap();

    let tx = lease.begin().unwrap();
    lease.close().unwrap();
    assert_eq!(driver.rollback_count(), 1);
    assert!(!lease.is_open());

    // The guard's ids are gone; resolving it is an error, not a second
    // rollback.
    assert!(tx.commit().is_err());
    assert_eq!(driver.rollback_count(), 1);
}
