use std::io::Write;
use std::sync::Arc;

use sql_sessions::error::SqlSessionError;
use sql_sessions::pool::{Pool, PoolConfig};
use sql_sessions::registry::FileRegistry;
use sql_sessions::testing::{ScriptedDriver, registry_with};

fn make_pool(driver: &ScriptedDriver, names: &[&str]) -> Pool<ScriptedDriver> {
    Pool::new(
        Arc::new(driver.clone()),
        registry_with(names),
        PoolConfig::default(),
    )
}

#[test]
fn lease_and_release_reuse_the_same_connection() {
    let driver = ScriptedDriver::new();
    let pool = make_pool(&driver, &["main"]);

    let first = {
        let lease = pool.lease("main").unwrap();
        lease.connection()
    };
    assert_eq!(pool.free_connections("main"), 1);

    let lease = pool.lease("main").unwrap();
    assert!(Arc::ptr_eq(&first, &lease.connection()));
    assert_eq!(driver.connect_count(), 1);
}

#[test]
fn names_are_case_insensitive() {
    let driver = ScriptedDriver::new();
    let pool = make_pool(&driver, &["main"]);

    drop(pool.lease("Main").unwrap());
    drop(pool.lease("MAIN").unwrap());
    assert_eq!(pool.open_connections(), 1);
    assert_eq!(driver.connect_count(), 1);
}

#[test]
fn unknown_name_fails_with_a_dedicated_error() {
    let driver = ScriptedDriver::new();
    let pool = make_pool(&driver, &["main"]);

    match pool.lease("nowhere") {
        Err(SqlSessionError::UnknownDataSource(name)) => assert_eq!(name, "nowhere"),
        other => panic!("expected UnknownDataSource, got {other:?}"),
    }
    assert_eq!(pool.open_connections(), 0);
}

#[test]
fn stale_connection_is_reopened_in_place() {
    let driver = ScriptedDriver::new();
    let pool = make_pool(&driver, &["main"]);

    let first = {
        let lease = pool.lease("main").unwrap();
        lease.connection()
    };
    // Server drops every session behind our back.
    driver.invalidate_sessions();

    let lease = pool.lease("main").unwrap();
    assert!(
        Arc::ptr_eq(&first, &lease.connection()),
        "reopen must keep the connection identity"
    );
    assert!(lease.is_open());
    assert_eq!(driver.connect_count(), 2);
    assert_eq!(pool.open_connections(), 1);
}

#[test]
fn resolution_miss_triggers_a_registry_reload() {
    let driver = ScriptedDriver::new();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"[{{"name":"first","datasource":"d1","username":"u"}}]"#
    )
    .unwrap();
    file.flush().unwrap();

    let registry = Arc::new(FileRegistry::open(file.path()).unwrap());
    let pool = Pool::new(Arc::new(driver.clone()), registry, PoolConfig::default());

    assert!(matches!(
        pool.lease("second"),
        Err(SqlSessionError::UnknownDataSource(_))
    ));

    // A definition appears in backing storage; the next miss picks it up.
    let mut handle = std::fs::File::create(file.path()).unwrap();
    write!(
        handle,
        r#"[{{"name":"first","datasource":"d1","username":"u"}},
           {{"name":"second","datasource":"d2","username":"u"}}]"#
    )
    .unwrap();
    handle.flush().unwrap();

    let lease = pool.lease("second").unwrap();
    assert_eq!(lease.datasource(), "d2");
}

#[test]
fn failed_connect_does_not_leak_capacity() {
    let driver = ScriptedDriver::new();
    let pool = make_pool(&driver, &["main"]);

    driver.fail_next_connects(1);
    assert!(pool.lease("main").is_err());
    assert_eq!(pool.open_connections(), 0);

    // The next attempt succeeds and occupies the first slot.
    let lease = pool.lease("main").unwrap();
    assert!(lease.is_open());
    assert_eq!(pool.open_connections(), 1);
}
