//! Negotiation domain on top of the search engine.
//!
//! A conversation state is a goal, a message history and a turn counter;
//! its textual rendering is the opaque state description the oracle sees.
//! The service wires request parameters, the LLM oracle and the search
//! engine together and shapes the outcome for the transport layers.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::mcts::{
    mcts_search, ActionEnumerator, CancelFlag, EventSink, SearchConfig, SearchError,
    StateTransition,
};
use crate::oracle::{OracleError, ScoringOracle};

/// Candidate replies requested from the oracle per state.
const DEFAULT_BRANCHING: usize = 3;

/// Conversation horizon: states at this turn count are terminal.
const DEFAULT_MAX_TURNS: usize = 5;

// ============================================================================
// REQUEST / RESPONSE MODELS
// ============================================================================

/// Search request as received from clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationRequest {
    pub goal: String,
    pub messages: Vec<String>,
    #[serde(default)]
    pub current_turn: usize,
}

/// Response of the one-shot `/negotiate` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationResponse {
    pub options: Vec<String>,
    pub state_evaluation: f64,
}

/// Result of a full tree search over a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationOutcome {
    /// Reply of the most-visited root child; `None` when the conversation
    /// has no viable continuation.
    pub best_reply: Option<String>,

    /// Runner-up replies ranked by visit count, best first.
    pub alternatives: Vec<String>,

    /// Mean backpropagated value of the root.
    pub state_evaluation: f64,

    pub total_nodes: usize,
    pub max_depth: usize,
    pub iterations_run: usize,
    pub cancelled: bool,
}

// ============================================================================
// CONVERSATION STATE
// ============================================================================

/// A point in a goal-oriented conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub goal: String,
    pub messages: Vec<String>,
    pub max_turns: usize,
    pub current_turn: usize,
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let history = if self.messages.is_empty() {
            "No messages".to_string()
        } else {
            self.messages.join("\n  ")
        };
        write!(
            f,
            "Goal: {}\nHistory:\n  {}\nTurn: {}/{}",
            self.goal, history, self.current_turn, self.max_turns
        )
    }
}

/// Appends the chosen reply and advances the turn counter.
pub struct ConversationTransition;

impl StateTransition<ConversationState, String> for ConversationTransition {
    fn apply(&self, state: &ConversationState, action: &String) -> ConversationState {
        let mut messages = state.messages.clone();
        messages.push(action.clone());
        ConversationState {
            goal: state.goal.clone(),
            messages,
            max_turns: state.max_turns,
            current_turn: state.current_turn + 1,
        }
    }
}

/// Asks the oracle for candidate replies; terminal past the turn horizon.
pub struct LlmActionEnumerator {
    oracle: Arc<dyn ScoringOracle>,
    branching: usize,
}

impl LlmActionEnumerator {
    pub fn new(oracle: Arc<dyn ScoringOracle>, branching: usize) -> Self {
        LlmActionEnumerator { oracle, branching }
    }
}

#[async_trait]
impl ActionEnumerator<ConversationState, String> for LlmActionEnumerator {
    async fn enumerate(&self, state: &ConversationState) -> Result<Vec<String>, OracleError> {
        if state.current_turn >= state.max_turns {
            return Ok(Vec::new());
        }
        self.oracle
            .generate_actions(&state.to_string(), self.branching)
            .await
    }
}

// ============================================================================
// SERVICE
// ============================================================================

/// Orchestrates oracle and search engine for the server layers.
pub struct NegotiationService {
    oracle: Arc<dyn ScoringOracle>,
    search_config: SearchConfig,
    branching: usize,
    max_turns: usize,
}

impl NegotiationService {
    pub fn new(oracle: Arc<dyn ScoringOracle>, search_config: SearchConfig) -> Self {
        NegotiationService {
            oracle,
            search_config,
            branching: DEFAULT_BRANCHING,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    /// Overrides branching factor and conversation horizon.
    pub fn with_limits(mut self, branching: usize, max_turns: usize) -> Self {
        self.branching = branching;
        self.max_turns = max_turns;
        self
    }

    pub fn search_config(&self) -> &SearchConfig {
        &self.search_config
    }

    fn initial_state(&self, request: &NegotiationRequest) -> ConversationState {
        ConversationState {
            goal: request.goal.clone(),
            messages: request.messages.clone(),
            max_turns: self.max_turns,
            current_turn: request.current_turn,
        }
    }

    /// Runs the full tree search for a request, streaming events into
    /// `sink`. The partial tree of a failed search is logged and dropped;
    /// callers only see the error.
    pub async fn run_search(
        &self,
        request: &NegotiationRequest,
        sink: EventSink,
        cancel: CancelFlag,
    ) -> Result<NegotiationOutcome, SearchError> {
        let enumerator = LlmActionEnumerator::new(Arc::clone(&self.oracle), self.branching);
        let state = self.initial_state(request);
        log::info!(
            "starting search: goal={:?}, {} prior messages, turn {}",
            request.goal,
            request.messages.len(),
            request.current_turn
        );

        let outcome = mcts_search(
            state,
            &enumerator,
            &ConversationTransition,
            self.oracle.as_ref(),
            &self.search_config,
            &sink,
            &cancel,
        )
        .await
        .map_err(|failure| {
            log::error!(
                "search failed with {} nodes built: {}",
                failure.partial_tree.len(),
                failure.error
            );
            failure.error
        })?;

        let tree = &outcome.tree;
        let root = tree.root();
        let alternatives = tree
            .ranked_root_children()
            .into_iter()
            .take(self.branching)
            .filter_map(|child| tree.get(child).action_taken.clone())
            .collect();

        Ok(NegotiationOutcome {
            best_reply: outcome.best_action,
            alternatives,
            state_evaluation: tree.get(root).average_value(),
            total_nodes: tree.len(),
            max_depth: outcome.max_depth_seen,
            iterations_run: outcome.iterations_run,
            cancelled: outcome.cancelled,
        })
    }

    /// One-shot evaluation plus candidate generation, without a search.
    pub async fn evaluate_options(
        &self,
        request: &NegotiationRequest,
    ) -> Result<NegotiationResponse, OracleError> {
        let state = self.initial_state(request);
        let description = state.to_string();
        let state_evaluation = self.oracle.evaluate(&description).await?;
        let options = self
            .oracle
            .generate_actions(&description, self.branching)
            .await?;
        Ok(NegotiationResponse {
            options,
            state_evaluation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcts::EventSink;

    /// Scores states containing "accept" at 1.0 and offers a fixed slate.
    struct StubOracle;

    #[async_trait]
    impl ScoringOracle for StubOracle {
        async fn evaluate(&self, state_description: &str) -> Result<f64, OracleError> {
            Ok(if state_description.contains("accept") {
                1.0
            } else {
                0.2
            })
        }

        async fn generate_actions(
            &self,
            _state_description: &str,
            count: usize,
        ) -> Result<Vec<String>, OracleError> {
            Ok(["I accept your offer.", "I must reject this.", "Let me counter."]
                .iter()
                .take(count)
                .map(|s| s.to_string())
                .collect())
        }
    }

    fn request() -> NegotiationRequest {
        NegotiationRequest {
            goal: "Extend the deadline".to_string(),
            messages: vec!["Hello, can we talk about the timeline?".to_string()],
            current_turn: 0,
        }
    }

    #[test]
    fn test_state_rendering_matches_wire_format() {
        let state = ConversationState {
            goal: "Extend the deadline".to_string(),
            messages: vec!["Hi".to_string(), "Hello".to_string()],
            max_turns: 5,
            current_turn: 2,
        };
        assert_eq!(
            state.to_string(),
            "Goal: Extend the deadline\nHistory:\n  Hi\n  Hello\nTurn: 2/5"
        );
    }

    #[test]
    fn test_empty_history_renders_placeholder() {
        let state = ConversationState {
            goal: "g".to_string(),
            messages: Vec::new(),
            max_turns: 5,
            current_turn: 0,
        };
        assert!(state.to_string().contains("No messages"));
    }

    #[test]
    fn test_transition_appends_and_advances() {
        let state = ConversationState {
            goal: "g".to_string(),
            messages: vec!["a".to_string()],
            max_turns: 5,
            current_turn: 1,
        };
        let next = ConversationTransition.apply(&state, &"b".to_string());
        assert_eq!(next.messages, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(next.current_turn, 2);
        // The input state is untouched.
        assert_eq!(state.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_enumerator_is_terminal_past_horizon() {
        let enumerator = LlmActionEnumerator::new(Arc::new(StubOracle), 3);
        let mut state = ConversationState {
            goal: "g".to_string(),
            messages: Vec::new(),
            max_turns: 5,
            current_turn: 5,
        };
        assert!(enumerator.enumerate(&state).await.unwrap().is_empty());

        state.current_turn = 4;
        assert_eq!(enumerator.enumerate(&state).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_run_search_recommends_accepting_reply() {
        let service =
            NegotiationService::new(Arc::new(StubOracle), SearchConfig::exhaustive(25));

        let outcome = service
            .run_search(&request(), EventSink::disabled(), CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(outcome.best_reply.as_deref(), Some("I accept your offer."));
        assert_eq!(outcome.alternatives[0], "I accept your offer.");
        assert_eq!(outcome.iterations_run, 25);
        assert!(outcome.total_nodes > 3);
        assert!(!outcome.cancelled);
    }

    #[tokio::test]
    async fn test_evaluate_options_skips_the_search() {
        let service = NegotiationService::new(Arc::new(StubOracle), SearchConfig::default());
        let response = service.evaluate_options(&request()).await.unwrap();
        assert_eq!(response.options.len(), 3);
        assert!((response.state_evaluation - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_request_defaults_current_turn() {
        let request: NegotiationRequest =
            serde_json::from_str(r#"{"goal":"g","messages":[]}"#).unwrap();
        assert_eq!(request.current_turn, 0);
    }
}
