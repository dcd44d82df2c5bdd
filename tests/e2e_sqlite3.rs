//! End-to-end tests against a real `sqlite3` shell.
//!
//! Run with: `cargo test --test e2e_sqlite3 --features e2e`
//!
//! **Requirements**: sqlite3 must be installed and in PATH.

#![cfg(feature = "e2e")]

use std::time::Duration;

use shelldb::{Connection, Driver, ShellError, ShellSettings, Value};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn sqlite3_available() -> bool {
    let check = std::process::Command::new("sqlite3")
        .arg("-version")
        .output();
    match check {
        Ok(output) if output.status.success() => true,
        _ => {
            eprintln!("SKIP: sqlite3 not found in PATH");
            false
        }
    }
}

fn scratch_db() -> (TempDir, String) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("test.db").display().to_string();
    (dir, path)
}

async fn insert_many(
    conn: &Connection,
    cancel: &CancellationToken,
    who: &str,
) -> Result<(), ShellError> {
    for n in 0..20 {
        conn.execute(
            cancel,
            "INSERT INTO c VALUES (?, ?)",
            &[Value::Text(who.to_string()), Value::Integer(n)],
        )
        .await?;
    }
    Ok(())
}

async fn within<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(20), fut)
        .await
        .expect("step timed out")
}

#[tokio::test]
async fn typed_values_round_trip() {
    if !sqlite3_available() {
        return;
    }
    let (_dir, db) = scratch_db();
    let driver = Driver::new(ShellSettings::default());
    let cancel = CancellationToken::new();
    let conn = within(driver.open(&cancel, &db)).await.unwrap();

    within(conn.execute(
        &cancel,
        "CREATE TABLE t (id INTEGER, name TEXT, score REAL, data BLOB, note TEXT)",
        &[],
    ))
    .await
    .unwrap();
    within(conn.execute(
        &cancel,
        "INSERT INTO t VALUES (?, ?, ?, ?, ?)",
        &[
            Value::Integer(-7),
            Value::Text("O'Brien".to_string()),
            Value::Real(2.75),
            Value::Blob(vec![0x01, 0x02, 0xff]),
            Value::Null,
        ],
    ))
    .await
    .unwrap();

    let rows = within(conn.query(&cancel, "SELECT id, name, score, data, note FROM t", &[]))
        .await
        .unwrap()
        .collect_all()
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(
        row.columns().names(),
        ["id", "name", "score", "data", "note"]
    );
    assert_eq!(row.get_named("id"), Some(&Value::Integer(-7)));
    assert_eq!(
        row.get_named("name"),
        Some(&Value::Text("O'Brien".to_string()))
    );
    assert_eq!(row.get_named("score"), Some(&Value::Real(2.75)));
    assert_eq!(
        row.get_named("data"),
        Some(&Value::Blob(vec![0x01, 0x02, 0xff]))
    );
    assert_eq!(row.get_named("note"), Some(&Value::Null));

    within(conn.close()).await.unwrap();
}

#[tokio::test]
async fn exponent_literal_reads_back_as_real() {
    if !sqlite3_available() {
        return;
    }
    let (_dir, db) = scratch_db();
    let driver = Driver::new(ShellSettings::default());
    let cancel = CancellationToken::new();
    let conn = within(driver.open(&cancel, &db)).await.unwrap();

    let rows = within(conn.query(&cancel, "SELECT 1.5e3 AS x", &[]))
        .await
        .unwrap()
        .collect_all()
        .await
        .unwrap();
    assert_eq!(rows[0].get(0), Some(&Value::Real(1500.0)));
    within(conn.close()).await.unwrap();
}

#[tokio::test]
async fn statement_without_rows_has_no_columns() {
    if !sqlite3_available() {
        return;
    }
    let (_dir, db) = scratch_db();
    let driver = Driver::new(ShellSettings::default());
    let cancel = CancellationToken::new();
    let conn = within(driver.open(&cancel, &db)).await.unwrap();

    within(conn.execute(&cancel, "CREATE TABLE e (x)", &[]))
        .await
        .unwrap();
    let mut rows = within(conn.query(&cancel, "SELECT x FROM e", &[]))
        .await
        .unwrap();
    assert!(rows.columns().is_empty());
    assert!(within(rows.next()).await.unwrap().is_none());
    within(conn.close()).await.unwrap();
}

#[tokio::test]
async fn shell_errors_are_request_scoped() {
    if !sqlite3_available() {
        return;
    }
    let (_dir, db) = scratch_db();
    let driver = Driver::new(ShellSettings::default());
    let cancel = CancellationToken::new();
    let conn = within(driver.open(&cancel, &db)).await.unwrap();

    let err = within(conn.execute(&cancel, "SELEC 1", &[]))
        .await
        .unwrap_err();
    assert!(matches!(err, ShellError::Shell { .. }), "{err:?}");

    within(conn.execute(&cancel, "CREATE TABLE u (id INTEGER PRIMARY KEY)", &[]))
        .await
        .unwrap();
    within(conn.execute(&cancel, "INSERT INTO u VALUES (1)", &[]))
        .await
        .unwrap();
    let err = within(conn.execute(&cancel, "INSERT INTO u VALUES (1)", &[]))
        .await
        .unwrap_err();
    match &err {
        ShellError::Shell { message, .. } => {
            assert!(message.contains("UNIQUE"), "{message}");
        }
        other => panic!("expected shell error, got {other:?}"),
    }

    within(conn.ping(&cancel)).await.unwrap();
    within(conn.close()).await.unwrap();
}

#[tokio::test]
async fn concurrent_writers_share_one_database() {
    if !sqlite3_available() {
        return;
    }
    let (_dir, db) = scratch_db();
    let driver = Driver::new(ShellSettings::default());
    let cancel = CancellationToken::new();
    let setup = within(driver.open(&cancel, &db)).await.unwrap();
    within(setup.execute(&cancel, "CREATE TABLE c (who TEXT, n INTEGER)", &[]))
        .await
        .unwrap();
    let other = within(driver.open(&cancel, &db)).await.unwrap();

    let (a, b) = within(async {
        tokio::join!(
            insert_many(&setup, &cancel, "a"),
            insert_many(&other, &cancel, "b")
        )
    })
    .await;
    a.unwrap();
    b.unwrap();

    let rows = within(other.query(&cancel, "SELECT count(*) AS total FROM c", &[]))
        .await
        .unwrap()
        .collect_all()
        .await
        .unwrap();
    assert_eq!(rows[0].get_named("total"), Some(&Value::Integer(40)));

    within(setup.close()).await.unwrap();
    within(other.close()).await.unwrap();
}

#[tokio::test]
async fn text_with_line_breaks_keeps_requests_apart() {
    if !sqlite3_available() {
        return;
    }
    let (_dir, db) = scratch_db();
    let driver = Driver::new(ShellSettings::default());
    let cancel = CancellationToken::new();
    let conn = within(driver.open(&cancel, &db)).await.unwrap();

    within(conn.execute(&cancel, "CREATE TABLE t (s TEXT)", &[]))
        .await
        .unwrap();
    within(conn.execute(
        &cancel,
        "INSERT INTO t VALUES (?), (?), (?)",
        &[
            Value::from("a\n'"),
            Value::from("crlf\r\n"),
            Value::from("ctl\u{1}"),
        ],
    ))
    .await
    .unwrap();

    let rows = within(conn.query(&cancel, "SELECT s FROM t ORDER BY rowid", &[]))
        .await
        .unwrap()
        .collect_all()
        .await
        .unwrap();
    let values: Vec<_> = rows.iter().map(|row| row.get(0).cloned()).collect();
    assert_eq!(
        values,
        vec![
            Some(Value::from("a\n'")),
            Some(Value::from("crlf\r\n")),
            Some(Value::from("ctl\u{1}")),
        ]
    );

    for (sql, expected) in [("SELECT 42 AS answer", 42), ("SELECT 7 AS seven", 7)] {
        let rows = within(conn.query(&cancel, sql, &[]))
            .await
            .unwrap()
            .collect_all()
            .await
            .unwrap();
        assert_eq!(rows.len(), 1, "{sql}");
        assert_eq!(rows[0].get(0), Some(&Value::Integer(expected)), "{sql}");
    }
    within(conn.close()).await.unwrap();
}
