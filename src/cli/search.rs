use anyhow::Result;

use motif::config::MotifConfig;
use motif::pattern::QueryContext;

/// Run a retrieval from the terminal.
pub async fn query(
    config: MotifConfig,
    query: &str,
    context: &QueryContext,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let max_results = limit.unwrap_or(config.ranking.default_max_results);
    let engine = super::open_engine(config)?;
    let result = engine.retrieve(query, context, max_results);
    engine.shutdown().await?;
    let ranked = result?;

    if json {
        return super::print_json(&ranked);
    }

    if ranked.is_empty() {
        println!("No matching patterns.");
        return Ok(());
    }

    println!("Found {} pattern(s)\n", ranked.len());
    for (i, r) in ranked.iter().enumerate() {
        let p = &r.pattern;
        println!(
            "  {}. [{}] #{} (score: {:.4}, weight: {:.2}, used: {})",
            i + 1,
            p.kind(),
            p.id,
            r.score,
            p.weight(),
            p.usage_count()
        );
        println!("     {}", super::preview(p.primary_text(), 120));
        if !p.tags.is_empty() {
            let tags: Vec<&str> = p.tags.iter().map(String::as_str).collect();
            println!("     tags: {}", tags.join(", "));
        }
    }
    Ok(())
}
