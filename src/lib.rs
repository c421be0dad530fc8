//! Pattern memory and adaptive retrieval for coding assistants.
//!
//! Motif stores short knowledge fragments (code snippets, error/fix pairs, best
//! practices, project facts) and retrieves the most relevant ones for a query
//! and usage context. Ranking adapts to success/failure feedback, and recurring
//! failures are clustered and raised as alerts.
//!
//! | Kind | Primary text |
//! |------|--------------|
//! | **CodeSnippet** | the code |
//! | **ErrorSolution** | the error signature |
//! | **BestPractice** | the guideline |
//! | **ProjectFact** | the fact |
//!
//! # Architecture
//!
//! - **Storage**: SQLite content and statistics tables, loaded into a concurrent
//!   in-memory store at startup
//! - **Index**: fixed-size bucket table keyed by an xxh3 n-gram digest of the
//!   primary text; lookups probe a bucket and its two neighbours
//! - **Ranking**: lexical overlap, context match, learned weight and recency
//! - **Writes**: a bounded queue drained by one writer thread, so feedback for a
//!   pattern is applied in arrival order
//!
//! # Modules
//!
//! - [`config`]: configuration loading from TOML files and environment variables
//! - [`db`]: SQLite initialization, schema and migrations
//! - [`error`]: the library error type
//! - [`pattern`]: the engine and its components

pub mod config;
pub mod db;
pub mod error;
pub mod pattern;

pub use error::{MotifError, Result};
pub use pattern::{PatternEngine, PatternId, Payload, QueryContext};
