//! Feedback learning. The learner is the only writer of a pattern's learned weight.
//!
//! Each usage event moves the weight toward 1.0 (success) or 0.0 (failure) by an
//! exponential moving average. The update does not commute, so events for one
//! pattern must be applied in arrival order; the update queue guarantees that.

use serde::Serialize;
use tracing::debug;

use super::store::PatternStore;
use super::types::{PatternId, UsageEvent};
use crate::error::Result;

/// What a single usage event did to a pattern.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightUpdate {
    pub pattern_id: PatternId,
    pub old_weight: f64,
    pub new_weight: f64,
    pub usage_count: u64,
}

pub struct UsageLearner {
    learning_rate: f64,
}

impl UsageLearner {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate: learning_rate.clamp(f64::MIN_POSITIVE, 1.0),
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Apply one event: EMA weight update and usage increment, written together.
    pub fn on_usage(&self, store: &PatternStore, event: &UsageEvent) -> Result<WeightUpdate> {
        let pattern = store.get(event.pattern_id)?;
        let old_weight = pattern.weight();
        let target = if event.success { 1.0 } else { 0.0 };
        let new_weight = ema(old_weight, target, self.learning_rate);

        let stats = store.apply_usage(event.pattern_id, new_weight, event.timestamp)?;
        let usage_count = stats.usage_count;

        debug!(
            pattern_id = %event.pattern_id,
            success = event.success,
            old_weight,
            new_weight,
            usage_count,
            "weight updated"
        );

        Ok(WeightUpdate {
            pattern_id: event.pattern_id,
            old_weight,
            new_weight,
            usage_count,
        })
    }
}

/// `weight + lr * (target - weight)`, clamped to `[0, 1]`.
pub fn ema(weight: f64, target: f64, learning_rate: f64) -> f64 {
    (weight + learning_rate * (target - weight)).clamp(0.0, 1.0)
}
