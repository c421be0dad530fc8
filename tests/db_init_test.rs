mod helpers;

use motif::db;
use motif::db::migrations::{get_index_params, get_schema_version, CURRENT_SCHEMA_VERSION};
use motif::pattern::QueryContext;
use tempfile::TempDir;

#[test]
fn open_creates_new_db_at_nonexistent_path() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("subdir").join("new.db");
    assert!(!db_path.exists());

    let conn = db::open_database(&db_path).unwrap();
    assert!(db_path.exists());

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM patterns", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 0);
    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
}

#[test]
fn connection_pragmas_are_set() {
    let tmp = TempDir::new().unwrap();
    let conn = db::open_database(helpers::db_path(&tmp)).unwrap();

    let timeout: i64 = conn
        .pragma_query_value(None, "busy_timeout", |row| row.get(0))
        .unwrap();
    assert_eq!(timeout, 5000);

    let mode: String = conn
        .pragma_query_value(None, "journal_mode", |row| row.get(0))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");

    let fk: i64 = conn
        .pragma_query_value(None, "foreign_keys", |row| row.get(0))
        .unwrap();
    assert_eq!(fk, 1);
}

#[test]
fn reopening_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let path = helpers::db_path(&tmp);
    drop(db::open_database(&path).unwrap());
    let conn = db::open_database(&path).unwrap();
    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
}

#[tokio::test]
async fn v1_database_with_content_upgrades_and_indexes() {
    let tmp = TempDir::new().unwrap();
    let path = helpers::db_path(&tmp);

    {
        // a v1 database: content and statistics, no bucket table
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        db::schema::init_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO patterns (id, kind, payload, tags, created_at) VALUES \
             (1, 'project_fact', \
              '{\"kind\":\"project_fact\",\"fact\":\"tests run with nextest\"}', \
              '[\"ci\"]', '2026-01-05 10:00:00+00:00')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO pattern_stats (pattern_id, usage_count, weight) VALUES (1, 3, 0.7)",
            [],
        )
        .unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 1);
    }

    let engine = helpers::file_engine(&path, helpers::test_config());
    assert!(engine.restore_report().rebuilt);

    let found = engine
        .retrieve("tests run with nextest", &QueryContext::new(), 5)
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].pattern.usage_count(), 3);
    assert_eq!(found[0].pattern.weight(), 0.7);

    // new ids continue past the existing content
    let next = engine
        .store_pattern(helpers::fact("another fact"), vec![])
        .await
        .unwrap();
    assert_eq!(next.0, 2);
    engine.shutdown().await.unwrap();

    let conn = rusqlite::Connection::open(&path).unwrap();
    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    assert_eq!(get_index_params(&conn).unwrap(), Some((1_000_000, 3)));
}
