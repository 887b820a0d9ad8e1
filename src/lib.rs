//! # Negotiation Copilot Library
//!
//! Backend library for an LLM-guided negotiation assistant.
//!
//! ## Features
//!
//! - **Search Engine**: Monte Carlo Tree Search over candidate replies, scored by an LLM oracle
//! - **Event Stream**: structured exploration events for live tree rendering
//! - **Oracle Client**: chat-completions client with caching, rate limiting and bounded retries
//! - **Server Components**: HTTP API and websocket streaming for frontend clients
//!
//! ## Usage
//!
//! ```rust,no_run
//! use negotiation_copilot::{
//!     mcts::{EventSink, SearchConfig},
//!     services::NegotiationService,
//!     servers::{WebApiServer, WebApiConfig},
//! };
//! ```

// ============================================================================
// PUBLIC API MODULES
// ============================================================================

/// Monte Carlo Tree Search engine and event stream
pub mod mcts;

/// Scoring-oracle contract and LLM-backed implementation
pub mod oracle;

/// Server components (HTTP API, websocket streaming)
pub mod servers;

/// Negotiation domain: conversation states, transitions, search orchestration
pub mod services;

/// Logging configuration
pub mod logging;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use mcts::{CancelFlag, EventSink, SearchConfig, SearchError, SearchOutcome, SearchTree};
pub use oracle::{OracleError, ScoringOracle};
pub use servers::{WebApiConfig, WebApiServer, WebSocketConfig, WebSocketServer};
pub use services::{NegotiationRequest, NegotiationResponse, NegotiationService};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Main error type for the negotiation copilot library
#[derive(Debug, thiserror::Error)]
pub enum CopilotError {
    #[error("Search error: {0}")]
    Search(#[from] mcts::SearchError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] oracle::OracleError),

    #[error("Server error: {0}")]
    Server(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, CopilotError>;

// ============================================================================
// LIBRARY VERSION INFO
// ============================================================================

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Library description
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
