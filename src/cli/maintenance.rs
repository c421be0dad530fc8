//! CLI maintenance commands: `evict`, `cleanup` and `reindex`.

use anyhow::Result;
use chrono::{Duration, Utc};
use serde_json::json;

use motif::config::MotifConfig;
use motif::pattern::PatternId;

pub async fn evict(config: MotifConfig, id: PatternId, json: bool) -> Result<()> {
    let engine = super::open_engine(config)?;
    let result = engine.evict_pattern(id).await;
    engine.shutdown().await?;
    let removed = result?;

    if json {
        return super::print_json(&json!({ "id": id, "evicted": removed }));
    }
    if removed {
        println!("Evicted pattern {id}.");
    } else {
        println!("Pattern {id} not found.");
    }
    Ok(())
}

/// Evict patterns created more than `older_than_days` ago with at most
/// `max_usage` recorded uses.
pub async fn cleanup(
    config: MotifConfig,
    older_than_days: i64,
    max_usage: u64,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let engine = super::open_engine(config)?;
    let cutoff = Utc::now() - Duration::days(older_than_days);
    let candidates = engine.stale_patterns(cutoff, max_usage);

    let mut rows = Vec::with_capacity(candidates.len());
    for id in &candidates {
        if let Ok(p) = engine.get_pattern(*id) {
            rows.push((p.id, p.kind(), p.usage_count(), super::preview(p.primary_text(), 60)));
        }
    }

    let mut evicted = 0usize;
    if !dry_run {
        for id in &candidates {
            match engine.evict_pattern(*id).await {
                Ok(true) => evicted += 1,
                Ok(false) => {}
                Err(e) => {
                    engine.shutdown().await?;
                    return Err(e.into());
                }
            }
        }
    }
    engine.shutdown().await?;

    if json {
        return super::print_json(&json!({
            "dry_run": dry_run,
            "candidates": candidates,
            "evicted": evicted,
        }));
    }

    if rows.is_empty() {
        println!("No stale patterns found.");
        return Ok(());
    }

    if dry_run {
        println!(
            "Found {} candidate(s) for cleanup (dry run, nothing evicted):\n",
            rows.len()
        );
        println!("{:<10} {:<16} {:<6} {}", "ID", "Kind", "Used", "Preview");
        println!("{}", "-".repeat(80));
        for (id, kind, used, preview) in &rows {
            println!("{:<10} {:<16} {:<6} {}", id.to_string(), kind.as_str(), used, preview);
        }
    } else {
        println!("Evicted {evicted} stale pattern(s).");
    }
    Ok(())
}

pub async fn reindex(config: MotifConfig, json: bool) -> Result<()> {
    let engine = super::open_engine(config)?;
    let result = engine.rebuild_index().await;
    engine.shutdown().await?;
    let indexed = result?;

    if json {
        return super::print_json(&json!({ "indexed": indexed }));
    }
    println!("Rebuilt bucket table: {indexed} pattern(s) indexed.");
    Ok(())
}
