mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use motif::config::MotifConfig;
use motif::pattern::{PatternId, PatternKind};

#[derive(Parser)]
#[command(name = "motif", version, about = "Pattern memory and adaptive retrieval")]
struct Cli {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store a new pattern
    Store {
        /// code_snippet, error_solution, best_practice or project_fact
        #[arg(long)]
        kind: PatternKind,
        /// Primary text: the code, error signature, guideline or fact
        #[arg(long)]
        text: String,
        /// Language of a code snippet
        #[arg(long, default_value = "text")]
        language: String,
        /// Fix for an error solution
        #[arg(long, default_value = "")]
        fix: String,
        /// Rationale for a best practice
        #[arg(long)]
        rationale: Option<String>,
        /// Tag to attach (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Retrieve the best patterns for a query
    Query {
        query: String,
        /// File kind of the current context, matched against tags
        #[arg(long)]
        file_kind: Option<String>,
        /// Current task description
        #[arg(long)]
        task: Option<String>,
        /// Recently used pattern id (repeatable)
        #[arg(long = "recent")]
        recent: Vec<PatternId>,
        /// Maximum results (defaults to ranking.default_max_results)
        #[arg(long, short = 'n')]
        limit: Option<usize>,
    },
    /// Report whether a pattern helped
    Feedback {
        id: PatternId,
        /// Record a failure instead of a success
        #[arg(long)]
        failed: bool,
        #[arg(long)]
        file_kind: Option<String>,
        #[arg(long)]
        task: Option<String>,
    },
    /// Remove a pattern
    Evict { id: PatternId },
    /// Show engine statistics
    Stats,
    /// Evict old, rarely used patterns
    Cleanup {
        /// Only patterns created more than this many days ago
        #[arg(long, default_value_t = 30)]
        older_than_days: i64,
        /// Only patterns used at most this many times
        #[arg(long, default_value_t = 0)]
        max_usage: u64,
        /// List candidates without evicting
        #[arg(long)]
        dry_run: bool,
    },
    /// Rebuild the bucket table from stored patterns
    Reindex,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = MotifConfig::load()?;

    // stderr keeps stdout clean for command output
    let filter = EnvFilter::try_new(&config.general.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let json = cli.json;
    match cli.command {
        Command::Store {
            kind,
            text,
            language,
            fix,
            rationale,
            tags,
        } => {
            let payload = cli::store::build_payload(kind, text, language, fix, rationale);
            cli::store::store(config, payload, tags, json).await?;
        }
        Command::Query {
            query,
            file_kind,
            task,
            recent,
            limit,
        } => {
            let context = cli::context(file_kind, task, recent);
            cli::search::query(config, &query, &context, limit, json).await?;
        }
        Command::Feedback {
            id,
            failed,
            file_kind,
            task,
        } => {
            let context = cli::context(file_kind, task, Vec::new());
            cli::feedback::feedback(config, id, &context, !failed, json).await?;
        }
        Command::Evict { id } => {
            cli::maintenance::evict(config, id, json).await?;
        }
        Command::Stats => {
            cli::stats::stats(config, json).await?;
        }
        Command::Cleanup {
            older_than_days,
            max_usage,
            dry_run,
        } => {
            cli::maintenance::cleanup(config, older_than_days, max_usage, dry_run, json).await?;
        }
        Command::Reindex => {
            cli::maintenance::reindex(config, json).await?;
        }
    }

    Ok(())
}
