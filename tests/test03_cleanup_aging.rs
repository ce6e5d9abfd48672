use std::sync::Arc;
use std::time::Duration;

use sql_sessions::error::SqlSessionError;
use sql_sessions::pool::{Pool, PoolConfig};
use sql_sessions::testing::{ScriptedDriver, registry_with};

#[test]
fn aggressive_cleanup_only_touches_free_connections() {
    let driver = ScriptedDriver::new();
    let pool = Pool::new(
        Arc::new(driver.clone()),
        registry_with(&["main"]),
        PoolConfig::default(),
    );

    let held = pool.lease("main").unwrap();
    drop(pool.lease("main").unwrap());
    assert_eq!(pool.open_connections(), 2);
    assert_eq!(pool.free_connections("main"), 1);

    pool.cleanup(true);
    assert_eq!(pool.open_connections(), 1);
    assert_eq!(pool.free_connections("main"), 0);
    assert!(held.is_open());
    assert_eq!(driver.open_session_count(), 1);
}

#[test]
fn routine_cleanup_respects_the_idle_threshold() {
    let driver = ScriptedDriver::new();
    let pool = Pool::new(
        Arc::new(driver),
        registry_with(&["main"]),
        PoolConfig::default().with_idle_threshold(Duration::from_millis(50)),
    );

    drop(pool.lease("main").unwrap());

    // Young enough to survive a routine pass.
    pool.cleanup(false);
    assert_eq!(pool.open_connections(), 1);

    std::thread::sleep(Duration::from_millis(80));
    pool.cleanup(false);
    assert_eq!(pool.open_connections(), 0);
}

#[test]
fn close_all_is_idempotent_and_leases_fail_fast_after() {
    let driver = ScriptedDriver::new();
    let pool = Pool::new(
        Arc::new(driver.clone()),
        registry_with(&["main"]),
        PoolConfig::default(),
    );
    drop(pool.lease("main").unwrap());

    pool.close_all();
    pool.close_all();

    assert!(!pool.is_open());
    assert_eq!(pool.open_connections(), 0);
    assert_eq!(driver.open_session_count(), 0);
    assert!(matches!(pool.lease("main"), Err(SqlSessionError::PoolClosed)));
}

#[test]
fn returning_a_lease_to_a_closed_pool_reports_the_error() {
    let pool = Pool::new(
        Arc::new(ScriptedDriver::new()),
        registry_with(&["main"]),
        PoolConfig::default(),
    );
    let lease = pool.lease("main").unwrap();
    pool.close_all();
    assert!(matches!(lease.release(), Err(SqlSessionError::PoolClosed)));
}
