pub mod feedback;
pub mod maintenance;
pub mod search;
pub mod stats;
pub mod store;

use anyhow::{Context, Result};
use serde::Serialize;

use motif::config::MotifConfig;
use motif::pattern::{PatternEngine, PatternId, QueryContext};

/// Open the configured database and start an engine over it.
pub fn open_engine(config: MotifConfig) -> Result<PatternEngine> {
    let db_path = config.resolved_db_path();
    PatternEngine::open(config)
        .with_context(|| format!("failed to open pattern database at {}", db_path.display()))
}

/// Build a query context from command-line flags.
pub fn context(
    file_kind: Option<String>,
    task: Option<String>,
    recent: Vec<PatternId>,
) -> QueryContext {
    let mut context = QueryContext::new().with_recent(recent);
    if let Some(file_kind) = file_kind {
        context = context.with_file_kind(file_kind);
    }
    if let Some(task) = task {
        context = context.with_task(task);
    }
    context
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// First `max` characters of `text` on one line.
pub fn preview(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > max {
        let cut: String = flat.chars().take(max).collect();
        format!("{cut}...")
    } else {
        flat
    }
}
