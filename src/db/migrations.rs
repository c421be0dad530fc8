//! Forward-only schema migration framework.
//!
//! Tracks the schema version in `schema_meta` and runs sequential migrations
//! to bring the database up to [`CURRENT_SCHEMA_VERSION`].

use rusqlite::{params, Connection, OptionalExtension};

/// The schema version that the current binary expects.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Get the current schema version from the database.
pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'schema_version'",
        [],
        |row| {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().unwrap_or(0))
        },
    )
}

/// Update the stored schema version.
fn update_schema_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE schema_meta SET value = ?1 WHERE key = 'schema_version'",
        [version.to_string()],
    )?;
    Ok(())
}

fn get_meta(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM schema_meta WHERE key = ?1",
        [key],
        |row| row.get::<_, String>(0),
    )
    .optional()
}

fn set_meta(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_meta (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

/// The next id the pattern store will hand out. Starts at 1.
pub fn get_next_pattern_id(conn: &Connection) -> rusqlite::Result<u64> {
    Ok(get_meta(conn, "next_pattern_id")?
        .and_then(|v| v.parse().ok())
        .unwrap_or(1))
}

pub fn set_next_pattern_id(conn: &Connection, next: u64) -> rusqlite::Result<()> {
    set_meta(conn, "next_pattern_id", &next.to_string())
}

/// `(bucket_count, ngram_size)` the persisted bucket table was built with, if any.
pub fn get_index_params(conn: &Connection) -> rusqlite::Result<Option<(usize, usize)>> {
    let buckets = get_meta(conn, "index_bucket_count")?.and_then(|v| v.parse().ok());
    let ngram = get_meta(conn, "index_ngram_size")?.and_then(|v| v.parse().ok());
    Ok(buckets.zip(ngram))
}

pub fn set_index_params(
    conn: &Connection,
    bucket_count: usize,
    ngram_size: usize,
) -> rusqlite::Result<()> {
    set_meta(conn, "index_bucket_count", &bucket_count.to_string())?;
    set_meta(conn, "index_ngram_size", &ngram_size.to_string())
}

/// Run any pending forward-only migrations. Each migration runs in a transaction.
pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    let mut version = get_schema_version(conn)?;
    tracing::debug!(
        schema_version = version,
        target = CURRENT_SCHEMA_VERSION,
        "checking migrations"
    );

    while version < CURRENT_SCHEMA_VERSION {
        let next = version + 1;
        tracing::info!(from = version, to = next, "running migration");

        conn.execute_batch("BEGIN")?;
        let step = match next {
            2 => migrate_v1_to_v2(conn),
            _ => {
                tracing::error!(version = next, "unknown migration target");
                conn.execute_batch("ROLLBACK")?;
                break;
            }
        };
        match step.and_then(|_| update_schema_version(conn, next)) {
            Ok(()) => conn.execute_batch("COMMIT")?,
            Err(e) => {
                conn.execute_batch("ROLLBACK")?;
                return Err(e);
            }
        }
        version = next;
    }

    Ok(())
}

/// Migration v1 → v2: persist the bucket table so startup can skip rehashing.
///
/// No index parameters are recorded here, so the first open after this
/// migration rebuilds the table from the content table.
fn migrate_v1_to_v2(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS pattern_index (
    bucket INTEGER NOT NULL,
    pattern_id INTEGER NOT NULL REFERENCES patterns(id) ON DELETE CASCADE,
    PRIMARY KEY (bucket, pattern_id)
);
CREATE INDEX IF NOT EXISTS idx_pattern_index_pattern ON pattern_index(pattern_id);
"#,
    )
}
