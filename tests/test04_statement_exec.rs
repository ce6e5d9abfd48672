use std::str::FromStr;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use sql_sessions::driver::LengthPolicy;
use sql_sessions::error::SqlSessionError;
use sql_sessions::pool::{Pool, PoolConfig};
use sql_sessions::statement::{Statement, StatementConfig};
use sql_sessions::testing::{
    ScriptedDriver, col_bytes, col_date, col_int, col_numeric, col_text, col_time, col_timestamp,
    registry_with,
};
use sql_sessions::values::SqlValue;

fn make_pool(driver: &ScriptedDriver) -> Pool<ScriptedDriver> {
    Pool::new(
        Arc::new(driver.clone()),
        registry_with(&["main"]),
        PoolConfig::default(),
    )
}

#[test]
fn parameters_round_trip_through_an_echoing_select() {
    let driver = ScriptedDriver::new();
    driver.script_echo(
        "SELECT ?, ?, ?",
        vec![col_int("n"), col_text("s", 64), col_numeric("d", 10, 2)],
    );
    let pool = make_pool(&driver);
    let lease = pool.lease("main").unwrap();

    let amount = Decimal::from_str("123.45").unwrap();
    let mut stmt = Statement::new(&lease);
    stmt.set_parameter(1, 42i64);
    stmt.set_parameter(2, "hello");
    stmt.set_parameter(3, SqlValue::Decimal(amount));
    stmt.do_sql_statement("SELECT ?, ?, ?").unwrap();

    assert!(stmt.is_select());
    assert!(stmt.get_record().unwrap());
    assert_eq!(stmt.column(1).and_then(SqlValue::as_int), Some(42));
    assert_eq!(stmt.column(2).and_then(SqlValue::as_text), Some("hello"));
    assert_eq!(stmt.column(3).and_then(SqlValue::as_decimal), Some(amount));

    // Past the end the answer stays false without error.
    assert!(!stmt.get_record().unwrap());
    assert!(!stmt.get_record().unwrap());
}

#[test]
fn every_value_kind_round_trips() {
    let sql = "SELECT ?, ?, ?, ?, ?, ?, ?, ?";
    let driver = ScriptedDriver::new();
    driver.script_echo(
        sql,
        vec![
            col_int("a"),
            col_int("b"),
            col_text("c", 64),
            col_bytes("d", 64),
            col_date("e"),
            col_time("f"),
            col_timestamp("g"),
            col_text("h", 16),
        ],
    );
    let pool = make_pool(&driver);
    let lease = pool.lease("main").unwrap();

    let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
    let time = NaiveTime::from_hms_opt(12, 30, 45).unwrap();
    let ts = date.and_time(time);

    let mut stmt = Statement::new(&lease);
    stmt.set_parameter(1, -5i64);
    stmt.set_parameter(2, 5u64);
    stmt.set_parameter(3, "text");
    stmt.set_parameter(4, vec![0xde_u8, 0xad]);
    stmt.set_parameter(5, date);
    stmt.set_parameter(6, time);
    stmt.set_parameter(7, ts);
    stmt.set_parameter(8, SqlValue::Null);
    stmt.do_sql_statement(sql).unwrap();

    assert!(stmt.get_record().unwrap());
    assert_eq!(stmt.column(1).and_then(SqlValue::as_int), Some(-5));
    assert_eq!(stmt.column(2).and_then(SqlValue::as_uint), Some(5));
    assert_eq!(stmt.column(3).and_then(SqlValue::as_text), Some("text"));
    assert_eq!(
        stmt.column(4).and_then(SqlValue::as_bytes),
        Some(&[0xde_u8, 0xad][..])
    );
    assert_eq!(stmt.column(5).and_then(SqlValue::as_date), Some(date));
    assert_eq!(stmt.column(6).and_then(SqlValue::as_time), Some(time));
    assert_eq!(stmt.column(7).and_then(SqlValue::as_timestamp), Some(ts));
    assert!(stmt.is_null(8));
}

#[test]
fn length_policy_travels_to_the_driver() {
    let driver = ScriptedDriver::new();
    driver.script_update("UPDATE t SET x = 1", 1);
    let pool = make_pool(&driver);
    let lease = pool.lease("main").unwrap();
    lease.set_length_policy(LengthPolicy::ExactPlusOne);

    let mut stmt = Statement::new(&lease);
    stmt.do_sql_statement("UPDATE t SET x = 1").unwrap();
    assert_eq!(driver.last_length_policy(), Some(LengthPolicy::ExactPlusOne));
}

#[test]
fn cursor_name_is_best_effort() {
    let driver = ScriptedDriver::new();
    driver.script_select("SELECT 1", vec![col_int("one")], vec![vec![SqlValue::Int(1)]]);
    let pool = make_pool(&driver);

    {
        let lease = pool.lease("main").unwrap();
        let mut stmt = Statement::new(&lease);
        stmt.do_sql_statement("SELECT 1").unwrap();
        // The driver does not expose cursor names; execution still succeeds.
        assert_eq!(stmt.cursor_name(), None);
    }

    driver.enable_cursor_names();
    let lease = pool.lease("main").unwrap();
    let mut stmt = Statement::new(&lease);
    stmt.do_sql_statement("SELECT 1").unwrap();
    assert!(stmt.cursor_name().is_some());
}

#[test]
fn non_select_statements_report_affected_rows() {
    let driver = ScriptedDriver::new();
    driver.script_update("UPDATE t SET x = 1", 3);
    let pool = make_pool(&driver);
    let lease = pool.lease("main").unwrap();

    let mut stmt = Statement::new(&lease);
    stmt.do_sql_statement("UPDATE t SET x = 1").unwrap();
    assert!(!stmt.is_select());
    assert_eq!(stmt.rows_affected(), 3);
    assert!(!stmt.get_record().unwrap());
}

#[test]
fn columns_are_reachable_by_name_case_insensitively() {
    let driver = ScriptedDriver::new();
    driver.script_select(
        "SELECT id, label FROM t",
        vec![col_int("Id"), col_text("Label", 32)],
        vec![vec![SqlValue::Int(7), SqlValue::Text("seven".into())]],
    );
    let pool = make_pool(&driver);
    let lease = pool.lease("main").unwrap();

    let mut stmt = Statement::new(&lease);
    stmt.do_sql_statement("SELECT id, label FROM t").unwrap();
    assert!(stmt.get_record().unwrap());
    assert_eq!(stmt.column_by_name("ID").and_then(SqlValue::as_int), Some(7));
    assert_eq!(
        stmt.column_by_name("label").and_then(SqlValue::as_text),
        Some("seven")
    );
    assert_eq!(stmt.column_name(1), Some("Id"));
    assert!(stmt.is_null(99));
}

#[test]
fn row_limit_caps_the_fetch_loop() {
    let driver = ScriptedDriver::new();
    driver.script_select(
        "SELECT n FROM t",
        vec![col_int("n")],
        vec![
            vec![SqlValue::Int(1)],
            vec![SqlValue::Int(2)],
            vec![SqlValue::Int(3)],
        ],
    );
    let pool = make_pool(&driver);
    let lease = pool.lease("main").unwrap();

    let mut stmt = Statement::with_config(&lease, StatementConfig::new().with_max_rows(1));
    stmt.do_sql_statement("SELECT n FROM t").unwrap();
    assert!(stmt.get_record().unwrap());
    assert!(!stmt.get_record().unwrap());
}

#[test]
fn empty_statement_text_is_a_configuration_error() {
    let driver = ScriptedDriver::new();
    let pool = make_pool(&driver);
    let lease = pool.lease("main").unwrap();

    let mut stmt = Statement::new(&lease);
    assert!(matches!(
        stmt.do_sql_statement("   \n"),
        Err(SqlSessionError::ConfigError(_))
    ));
}

#[test]
fn trailing_whitespace_is_trimmed_before_execution() {
    let driver = ScriptedDriver::new();
    driver.script_select("SELECT 1", vec![col_int("one")], vec![vec![SqlValue::Int(1)]]);
    let pool = make_pool(&driver);
    let lease = pool.lease("main").unwrap();

    let mut stmt = Statement::new(&lease);
    stmt.do_sql_statement("SELECT 1   \n\t").unwrap();
    assert!(stmt.get_record().unwrap());
    assert_eq!(driver.executed(), vec!["SELECT 1".to_owned()]);
}

#[test]
fn multibyte_text_near_the_select_prefix_classifies_cleanly() {
    let driver = ScriptedDriver::new();
    // The sixth byte of this text lands inside a multi-byte character.
    driver.script_update("во имя 1", 1);
    driver.script_select(
        "select 'й'",
        vec![col_text("s", 8)],
        vec![vec![SqlValue::Text("й".into())]],
    );
    let pool = make_pool(&driver);
    let lease = pool.lease("main").unwrap();

    let mut stmt = Statement::new(&lease);
    stmt.do_sql_statement("во имя 1").unwrap();
    assert!(!stmt.is_select());
    assert_eq!(stmt.rows_affected(), 1);

    stmt.do_sql_statement("select 'й'").unwrap();
    assert!(stmt.is_select());
    assert!(stmt.get_record().unwrap());
}

#[test]
fn prepare_execute_rebinds_changed_parameters() {
    let driver = ScriptedDriver::new();
    driver.script_echo("SELECT ?", vec![col_text("s", 64)]);
    let pool = make_pool(&driver);
    let lease = pool.lease("main").unwrap();

    let mut stmt = Statement::new(&lease);
    stmt.do_sql_prepare("SELECT ?").unwrap();

    stmt.set_parameter(1, "first");
    stmt.do_sql_execute().unwrap();
    assert!(stmt.get_record().unwrap());
    assert_eq!(stmt.column(1).and_then(SqlValue::as_text), Some("first"));

    stmt.set_parameter(1, "second");
    stmt.do_sql_execute().unwrap();
    assert!(stmt.get_record().unwrap());
    assert_eq!(stmt.column(1).and_then(SqlValue::as_text), Some("second"));
}

#[test]
fn reset_keeps_parameters_and_drops_columns() {
    let driver = ScriptedDriver::new();
    driver.script_echo("SELECT ?", vec![col_text("s", 64)]);
    let pool = make_pool(&driver);
    let lease = pool.lease("main").unwrap();

    let mut stmt = Statement::new(&lease);
    stmt.set_parameter(1, "sticky");
    stmt.do_sql_statement("SELECT ?").unwrap();
    assert!(stmt.get_record().unwrap());

    stmt.reset().unwrap();
    assert_eq!(stmt.column_count(), 0);
    assert_eq!(stmt.parameter(1).and_then(SqlValue::as_text), Some("sticky"));

    stmt.do_sql_statement("SELECT ?").unwrap();
    assert!(stmt.get_record().unwrap());
    assert_eq!(stmt.column(1).and_then(SqlValue::as_text), Some("sticky"));
}

#[test]
fn macro_hook_rewrites_statement_text() {
    let driver = ScriptedDriver::new();
    driver.script_select(
        "SELECT 1 FROM accounts",
        vec![col_int("one")],
        vec![vec![SqlValue::Int(1)]],
    );
    let pool = make_pool(&driver);
    let lease = pool.lease("main").unwrap();
    lease.set_macro_hook(|sql| sql.replace("$TABLE$", "accounts"));

    let mut stmt = Statement::new(&lease);
    stmt.do_sql_statement("SELECT 1 FROM $TABLE$").unwrap();
    assert!(stmt.get_record().unwrap());
}

#[test]
fn rebind_tables_are_frozen_while_a_statement_is_open() {
    use sql_sessions::values::{NativeType, SqlType};

    let driver = ScriptedDriver::new();
    let pool = make_pool(&driver);
    let lease = pool.lease("main").unwrap();

    let stmt = Statement::new(&lease);
    assert!(
        lease
            .set_parameter_rebind(SqlType::Text, NativeType::WVarChar)
            .is_err()
    );
    drop(stmt);
    assert!(
        lease
            .set_parameter_rebind(SqlType::Text, NativeType::WVarChar)
            .is_ok()
    );
}

#[test]
fn column_rebind_widens_the_bound_buffer() {
    use sql_sessions::values::{NativeType, SqlType};

    let long = "y".repeat(60);
    let driver = ScriptedDriver::new();
    driver.script_select(
        "SELECT s FROM t",
        vec![col_text("s", 40)],
        vec![vec![SqlValue::Text(long.clone())]],
    );
    let pool = make_pool(&driver);
    let lease = pool.lease("main").unwrap();

    {
        let mut stmt = Statement::new(&lease);
        stmt.do_sql_statement("SELECT s FROM t").unwrap();
        assert!(stmt.get_record().unwrap());
        // The declared width wins; the bound buffer truncates.
        assert_eq!(stmt.column(1).and_then(SqlValue::as_text), Some("y".repeat(40).as_str()));
    }

    lease
        .set_column_rebind(SqlType::Text, NativeType::WVarChar)
        .unwrap();
    let mut stmt = Statement::new(&lease);
    stmt.do_sql_statement("SELECT s FROM t").unwrap();
    assert!(stmt.get_record().unwrap());
    // Wide buffers reserve double the width, so the value fits whole.
    assert_eq!(stmt.column(1).and_then(SqlValue::as_text), Some(long.as_str()));
}

#[test]
fn procedure_call_harvests_the_return_value() {
    let driver = ScriptedDriver::new();
    driver.script(
        "{?=call next_id(?)}",
        sql_sessions::testing::Script {
            rows_affected: 0,
            output_values: vec![(0, SqlValue::Int(99))],
            ..Default::default()
        },
    );
    let pool = make_pool(&driver);
    let lease = pool.lease("main").unwrap();

    let mut stmt = Statement::new(&lease);
    stmt.set_parameter(1, 5i64);
    stmt.do_sql_call("next_id", true).unwrap();
    assert_eq!(stmt.parameter(0).and_then(SqlValue::as_int), Some(99));
}
