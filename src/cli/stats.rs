use anyhow::Result;

use motif::config::MotifConfig;

/// Display engine statistics in the terminal.
pub async fn stats(config: MotifConfig, json: bool) -> Result<()> {
    let engine = super::open_engine(config)?;
    let stats = engine.stats();
    let restore = engine.restore_report().clone();
    engine.shutdown().await?;

    if json {
        return super::print_json(&stats);
    }

    println!("Pattern Statistics");
    println!("{}", "=".repeat(40));
    println!("  Total patterns:      {}", stats.total_patterns);
    println!("  Total usage:         {}", stats.total_usage);
    match stats.mean_weight {
        Some(w) => println!("  Mean weight:         {w:.4}"),
        None => println!("  Mean weight:         -"),
    }
    println!();

    println!("By Kind:");
    for (kind, count) in &stats.by_kind {
        println!("  {:<16} {}", kind, count);
    }
    println!();

    println!("Index:");
    println!("  Indexed ids:         {}", stats.indexed_ids);
    println!(
        "  Occupied buckets:    {} of {}",
        stats.occupied_buckets, stats.bucket_count
    );
    if restore.rebuilt {
        println!(
            "  Rebuilt on open:     yes ({} corrupt bucket(s))",
            restore.corrupt_buckets.len()
        );
    }

    Ok(())
}
