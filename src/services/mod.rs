pub mod negotiation;

pub use negotiation::{
    ConversationState, ConversationTransition, LlmActionEnumerator, NegotiationOutcome,
    NegotiationRequest, NegotiationResponse, NegotiationService,
};
