use anyhow::Result;
use serde_json::json;

use motif::config::MotifConfig;
use motif::pattern::{PatternKind, Payload};

/// Assemble a payload from the `store` flags. Flags irrelevant to `kind` are ignored.
pub fn build_payload(
    kind: PatternKind,
    text: String,
    language: String,
    fix: String,
    rationale: Option<String>,
) -> Payload {
    match kind {
        PatternKind::CodeSnippet => Payload::CodeSnippet {
            code: text,
            language,
        },
        PatternKind::ErrorSolution => Payload::ErrorSolution {
            error_signature: text,
            fix,
        },
        PatternKind::BestPractice => Payload::BestPractice {
            guideline: text,
            rationale,
        },
        PatternKind::ProjectFact => Payload::ProjectFact { fact: text },
    }
}

pub async fn store(
    config: MotifConfig,
    payload: Payload,
    tags: Vec<String>,
    json: bool,
) -> Result<()> {
    let engine = super::open_engine(config)?;
    let kind = payload.kind();
    let result = engine.store_pattern(payload, tags).await;
    engine.shutdown().await?;
    let id = result?;

    if json {
        super::print_json(&json!({ "id": id, "kind": kind }))?;
    } else {
        println!("Stored {kind} pattern {id}.");
    }
    Ok(())
}
