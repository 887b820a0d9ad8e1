//! Injection points of the search engine.
//!
//! The engine never knows where candidate actions or successor states come
//! from: it is handed an enumerator and a transition at call time. The
//! production enumerator asks the LLM oracle, tests plug in deterministic
//! stubs.

use async_trait::async_trait;

use crate::oracle::OracleError;

/// Produces the candidate actions available from a state.
///
/// The enumeration may differ between calls for the same state (the LLM
/// behind it is not deterministic); callers must treat each result as
/// authoritative only for the call that produced it. An empty result marks
/// a terminal state and is not an error.
#[async_trait]
pub trait ActionEnumerator<S, A>: Send + Sync {
    async fn enumerate(&self, state: &S) -> Result<Vec<A>, OracleError>;
}

/// Applies an action to a state, producing the successor state.
///
/// Transitions are pure: the input state is never mutated in place.
pub trait StateTransition<S, A>: Send + Sync {
    fn apply(&self, state: &S, action: &A) -> S;
}
