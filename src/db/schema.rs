//! SQL DDL for the content and statistics tables.
//!
//! Defines `patterns` (content), `pattern_stats` (statistics) and `schema_meta`.
//! The persisted bucket table arrives in migration v2. All DDL uses
//! `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- Content table: one row per pattern, immutable after insert
CREATE TABLE IF NOT EXISTS patterns (
    id INTEGER PRIMARY KEY,
    kind TEXT NOT NULL CHECK(kind IN ('code_snippet','error_solution','best_practice','project_fact')),
    payload TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_patterns_kind ON patterns(kind);
CREATE INDEX IF NOT EXISTS idx_patterns_created ON patterns(created_at);

-- Statistics table: learned weight and usage, rewritten by feedback
CREATE TABLE IF NOT EXISTS pattern_stats (
    pattern_id INTEGER PRIMARY KEY REFERENCES patterns(id) ON DELETE CASCADE,
    usage_count INTEGER NOT NULL DEFAULT 0 CHECK(usage_count >= 0),
    weight REAL NOT NULL CHECK(weight >= 0.0 AND weight <= 1.0),
    last_used_at TEXT
);

-- Schema metadata and id counter
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('next_pattern_id', '1')",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"patterns".to_string()));
        assert!(tables.contains(&"pattern_stats".to_string()));
        assert!(tables.contains(&"schema_meta".to_string()));
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap(); // second call should not error
    }

    #[test]
    fn weight_outside_unit_interval_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO patterns (id, kind, payload, created_at) \
             VALUES (1, 'project_fact', '{}', 'now')",
            [],
        )
        .unwrap();
        let result = conn.execute(
            "INSERT INTO pattern_stats (pattern_id, usage_count, weight) VALUES (1, 0, 1.5)",
            [],
        );
        assert!(result.is_err());
    }
}
