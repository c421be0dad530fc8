//! Pattern memory: storage, n-gram indexing, ranking, feedback learning and
//! failure detection for short reusable knowledge fragments.

pub mod cache;
pub mod detect;
pub mod engine;
pub mod index;
pub mod learn;
pub mod queue;
pub mod rank;
pub mod stats;
pub mod store;
pub mod types;

pub use engine::{EngineBuilder, PatternEngine};
pub use rank::RankedPattern;
pub use types::{Pattern, PatternId, PatternKind, Payload, QueryContext, UsageEvent};
