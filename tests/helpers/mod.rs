#![allow(dead_code)]

use motif::config::MotifConfig;
use motif::db;
use motif::pattern::{PatternEngine, Payload};
use std::path::{Path, PathBuf};

/// Default configuration.
pub fn test_config() -> MotifConfig {
    MotifConfig::default()
}

/// A single bucket, so every stored pattern is a candidate for every query.
pub fn single_bucket_config() -> MotifConfig {
    let mut config = MotifConfig::default();
    config.index.bucket_count = 1;
    config
}

pub fn memory_engine(config: MotifConfig) -> PatternEngine {
    PatternEngine::in_memory(config).unwrap()
}

/// Engine persisted at `path`, created if missing.
pub fn file_engine(path: &Path, config: MotifConfig) -> PatternEngine {
    let conn = db::open_database(path).unwrap();
    PatternEngine::builder(config).database(conn).build().unwrap()
}

pub fn db_path(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("patterns.db")
}

pub fn tags(values: &[&str]) -> Vec<String> {
    values.iter().map(|t| t.to_string()).collect()
}

pub fn practice(text: &str) -> Payload {
    Payload::BestPractice {
        guideline: text.into(),
        rationale: None,
    }
}

pub fn fact(text: &str) -> Payload {
    Payload::ProjectFact { fact: text.into() }
}

pub fn snippet(code: &str, language: &str) -> Payload {
    Payload::CodeSnippet {
        code: code.into(),
        language: language.into(),
    }
}

pub fn error_fix(signature: &str, fix: &str) -> Payload {
    Payload::ErrorSolution {
        error_signature: signature.into(),
        fix: fix.into(),
    }
}

/// Count rows in a table through a fresh connection.
pub fn count_rows(path: &Path, table: &str) -> i64 {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .unwrap()
}
