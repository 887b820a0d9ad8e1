//! Scoring-oracle contract consumed by the search engine.

pub mod llm;

use async_trait::async_trait;

pub use llm::{LlmOracle, LlmOracleConfig};

/// Errors surfaced by a scoring oracle once its own retry budget is spent.
///
/// Transient failures (network blips, throttling) are retried inside the
/// oracle and never reach the engine; anything that does reach the engine
/// is fatal to the running search.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("oracle transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("oracle API returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("oracle call failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        source: Box<OracleError>,
    },

    #[error("oracle response was malformed: {0}")]
    Malformed(String),

    #[error("oracle API key is missing")]
    MissingApiKey,
}

/// External scoring capability the engine is built against.
///
/// Implementations own their caching, rate limiting and retry policy; calls
/// must not block indefinitely. Both methods take the opaque textual state
/// description the engine renders from its state type.
#[async_trait]
pub trait ScoringOracle: Send + Sync {
    /// Scalar desirability of a state, in `[0, 1]`.
    async fn evaluate(&self, state_description: &str) -> Result<f64, OracleError>;

    /// Up to `count` distinct candidate actions for a state. Fewer than
    /// `count`, or none at all, are both valid results.
    async fn generate_actions(
        &self,
        state_description: &str,
        count: usize,
    ) -> Result<Vec<String>, OracleError>;
}
