//! Exploration event stream.
//!
//! Every notable tree mutation produces one [`ExplorationEvent`]; observers
//! reconstruct the tree incrementally from the stream without ever needing a
//! full snapshot. Emission is fire-and-forget: a slow or disconnected
//! consumer loses events, it never stalls the search.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::mcts::node::{NodeId, NodeStatus, SearchTree};

/// Kind of tree mutation an event describes.
///
/// Within one iteration events always arrive in the order
/// selection* → expansion? → evaluation ×2 → backprop*.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Initialization,
    Selection,
    Expansion,
    Evaluation,
    Backprop,
    Complete,
    Error,
}

/// Wire representation of a single node at the moment of emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub node_id: NodeId,
    pub parent_id: Option<NodeId>,
    pub state: String,
    pub visits: usize,
    pub value: f64,
    pub action_taken: Option<String>,
    pub depth: usize,
    pub children_ids: Vec<NodeId>,
    pub status: NodeStatus,
    pub evaluation_score: Option<f64>,
}

impl NodeSnapshot {
    /// Captures the current wire view of `id`.
    pub fn capture<S, A>(tree: &SearchTree<S, A>, id: NodeId) -> Self
    where
        S: fmt::Display,
        A: fmt::Display + Clone + PartialEq,
    {
        let node = tree.get(id);
        NodeSnapshot {
            node_id: id,
            parent_id: node.parent,
            state: node.state.to_string(),
            visits: node.visits,
            value: node.value,
            action_taken: node.action_taken.as_ref().map(|a| a.to_string()),
            depth: tree.depth(id),
            children_ids: node.children.clone(),
            status: node.status,
            evaluation_score: node.evaluation_score,
        }
    }
}

/// One structured progress event of a running search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorationEvent {
    pub event_type: EventType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeSnapshot>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,

    /// Nodes created so far, across the whole tree.
    pub total_nodes: usize,

    /// Deepest node seen so far.
    pub max_depth: usize,
}

impl ExplorationEvent {
    /// Terminal event carrying the final recommendation.
    pub fn complete(metadata: serde_json::Value, total_nodes: usize, max_depth: usize) -> Self {
        ExplorationEvent {
            event_type: EventType::Complete,
            node: None,
            metadata: Some(metadata),
            total_nodes,
            max_depth,
        }
    }

    /// Terminal event reporting a failed search.
    pub fn error(message: &str) -> Self {
        ExplorationEvent {
            event_type: EventType::Error,
            node: None,
            metadata: Some(serde_json::json!({ "message": message })),
            total_nodes: 0,
            max_depth: 0,
        }
    }
}

/// Outbound channel fan-out for exploration events.
///
/// Zero or more bounded channels can be attached; a sink with none attached
/// is free to emit into. Senders use `try_send`, so a full channel drops the
/// event for that consumer rather than blocking the search.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    senders: Vec<mpsc::Sender<ExplorationEvent>>,
}

impl EventSink {
    /// A sink with no observers attached.
    pub fn disabled() -> Self {
        EventSink::default()
    }

    /// Creates a bounded channel, registers its sender and hands back the
    /// receiving end.
    pub fn attach(&mut self, capacity: usize) -> mpsc::Receiver<ExplorationEvent> {
        let (tx, rx) = mpsc::channel(capacity);
        self.senders.push(tx);
        rx
    }

    /// Whether emitting would reach at least one observer.
    pub fn is_enabled(&self) -> bool {
        !self.senders.is_empty()
    }

    /// Best-effort delivery to every attached observer.
    pub fn emit(&self, event: ExplorationEvent) {
        for (i, sender) in self.senders.iter().enumerate() {
            match sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::debug!("observer {i} is behind, dropping {:?} event", event.event_type);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    log::debug!("observer {i} is gone, dropping {:?} event", event.event_type);
                }
            }
        }
    }
}
