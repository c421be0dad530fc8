use anyhow::Result;

use motif::config::MotifConfig;
use motif::pattern::{PatternId, QueryContext};

/// Record one success or failure for a pattern.
///
/// Failure clusters live in memory, so a single invocation only contributes
/// one failure to a cluster that starts empty.
pub async fn feedback(
    config: MotifConfig,
    id: PatternId,
    context: &QueryContext,
    success: bool,
    json: bool,
) -> Result<()> {
    let engine = super::open_engine(config)?;
    let result = engine.record_usage(id, context, success).await;
    engine.shutdown().await?;
    let update = result?;

    if json {
        return super::print_json(&update);
    }
    let outcome = if success { "success" } else { "failure" };
    println!(
        "Recorded {outcome} for pattern {id}: weight {:.4} -> {:.4}, used {} time(s).",
        update.old_weight, update.new_weight, update.usage_count
    );
    Ok(())
}
