//! Search engine configuration.

use serde::{Deserialize, Serialize};

/// Tunable parameters of one search invocation.
///
/// Defaults follow the values the engine was tuned with in production:
/// 100 iterations, UCB1 exploration weight 1.4 (≈ √2) and a selection
/// depth cap of 10.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Upper bound on search iterations.
    pub iterations: usize,

    /// UCB1 exploration weight; 0 degenerates to greedy exploitation.
    pub exploration_weight: f64,

    /// Safety cap on selection depth, preventing unbounded descent when the
    /// enumerator keeps offering actions.
    pub max_depth: usize,

    /// Stop before `iterations` once a high-confidence score has stopped
    /// improving. A speed/quality trade-off, not a correctness requirement.
    pub early_termination: bool,

    /// Score above which a result counts as high-confidence.
    pub score_threshold: f64,

    /// Consecutive non-improving iterations tolerated after the threshold
    /// is reached.
    pub patience: usize,

    /// Capacity of each attached event channel; emission drops events
    /// instead of blocking once a consumer falls this far behind.
    pub event_buffer: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            iterations: 100,
            exploration_weight: 1.4,
            max_depth: 10,
            early_termination: true,
            score_threshold: 0.95,
            patience: 3,
            event_buffer: 256,
        }
    }
}

impl SearchConfig {
    /// Configuration with early termination disabled, for runs that must
    /// use the full iteration budget.
    pub fn exhaustive(iterations: usize) -> Self {
        SearchConfig {
            iterations,
            early_termination: false,
            ..SearchConfig::default()
        }
    }
}
