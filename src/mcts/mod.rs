pub mod config;
pub mod contract;
pub mod events;
pub mod node;
pub mod search;

pub use config::SearchConfig;
pub use contract::{ActionEnumerator, StateTransition};
pub use events::{EventSink, EventType, ExplorationEvent, NodeSnapshot};
pub use node::{MctsNode, NodeId, NodeStatus, SearchTree};
pub use search::{mcts_search, CancelFlag, SearchError, SearchFailure, SearchOutcome};
