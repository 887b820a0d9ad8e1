//! Arena-backed search tree for negotiation MCTS.
//!
//! Nodes live in a dense vector owned by [`SearchTree`]; a [`NodeId`] is the
//! index assigned at insertion and is the only identity ever exposed to
//! observers. Parent links are indices too, so the tree is append-only and
//! free of ownership cycles: the whole structure drops with the search that
//! built it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::mcts::contract::StateTransition;
use crate::mcts::search::SearchError;

/// Stable identifier of a node inside one [`SearchTree`].
pub type NodeId = usize;

/// Observability status of a node. Has no influence on the search itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Exploring,
    Evaluating,
    Complete,
}

/// A single vertex of the search tree.
#[derive(Debug, Clone)]
pub struct MctsNode<S, A> {
    /// Point in the conversation space this node represents.
    pub state: S,

    /// Index of the creating node; `None` for the root.
    pub parent: Option<NodeId>,

    /// Child indices in expansion order.
    pub children: Vec<NodeId>,

    /// Action whose application produced this state; `None` for the root.
    pub action_taken: Option<A>,

    /// Number of backpropagation passes through this node.
    pub visits: usize,

    /// Running sum of all backpropagated scores.
    pub value: f64,

    /// Current lifecycle status, for observers only.
    pub status: NodeStatus,

    /// Most recent score assigned directly to this node.
    pub evaluation_score: Option<f64>,
}

impl<S, A> MctsNode<S, A> {
    fn new(state: S, parent: Option<NodeId>, action_taken: Option<A>) -> Self {
        MctsNode {
            state,
            parent,
            children: Vec::new(),
            action_taken,
            visits: 0,
            value: 0.0,
            status: NodeStatus::Exploring,
            evaluation_score: None,
        }
    }

    /// Mean backpropagated value, or 0.0 before the first visit.
    pub fn average_value(&self) -> f64 {
        if self.visits == 0 {
            0.0
        } else {
            self.value / self.visits as f64
        }
    }
}

/// Append-only tree of [`MctsNode`]s rooted at the initial conversation state.
#[derive(Debug, Clone)]
pub struct SearchTree<S, A> {
    nodes: Vec<MctsNode<S, A>>,
}

impl<S, A> SearchTree<S, A>
where
    A: Clone + PartialEq,
{
    /// Creates a tree holding only the root node.
    pub fn new(root_state: S) -> Self {
        SearchTree {
            nodes: vec![MctsNode::new(root_state, None, None)],
        }
    }

    /// The root is always the first node inserted.
    pub fn root(&self) -> NodeId {
        0
    }

    /// Total number of nodes created so far.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> &MctsNode<S, A> {
        &self.nodes[id]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut MctsNode<S, A> {
        &mut self.nodes[id]
    }

    /// Distance from the root, following parent links.
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = id;
        while let Some(parent) = self.nodes[current].parent {
            depth += 1;
            current = parent;
        }
        depth
    }

    /// UCB1 score of a node.
    ///
    /// Returns `+inf` for the root and for any node (or parent) that has
    /// never been visited, which forces untried nodes to be picked first.
    /// The `2 * ln` form inside the square root is the standard UCB1
    /// formula and is not configurable.
    pub fn ucb_score(&self, id: NodeId, exploration_weight: f64) -> f64 {
        let node = &self.nodes[id];
        let parent = match node.parent {
            Some(parent) => &self.nodes[parent],
            None => return f64::INFINITY,
        };

        if node.visits == 0 || parent.visits == 0 {
            return f64::INFINITY;
        }

        let exploitation = node.value / node.visits as f64;
        let exploration = exploration_weight
            * (2.0 * (parent.visits as f64).ln() / node.visits as f64).sqrt();
        exploitation + exploration
    }

    /// Whether every action in `actions` already has a child.
    ///
    /// The enumerator behind `actions` may be non-deterministic, so this is
    /// authoritative only for the action set passed in this call.
    pub fn is_fully_expanded(&self, id: NodeId, actions: &[A]) -> bool {
        self.nodes[id].children.len() >= actions.len()
    }

    /// Creates a child for the first untried action, in enumeration order.
    ///
    /// Returns `None` when every action already has a child; that is a valid
    /// terminal outcome, not an error.
    pub fn expand<T>(&mut self, id: NodeId, actions: &[A], transition: &T) -> Option<NodeId>
    where
        T: StateTransition<S, A> + ?Sized,
    {
        let untried = actions.iter().find(|action| {
            !self.nodes[id]
                .children
                .iter()
                .any(|&child| self.nodes[child].action_taken.as_ref() == Some(*action))
        })?;

        let action = untried.clone();
        let child_state = transition.apply(&self.nodes[id].state, &action);
        let child_id = self.nodes.len();
        self.nodes
            .push(MctsNode::new(child_state, Some(id), Some(action)));
        self.nodes[id].children.push(child_id);
        Some(child_id)
    }

    /// Child with the highest UCB score.
    pub fn best_child(&self, id: NodeId, exploration_weight: f64) -> Result<NodeId, SearchError> {
        let children = &self.nodes[id].children;
        let mut best = *children.first().ok_or(SearchError::EmptyChildren)?;
        let mut best_score = self.ucb_score(best, exploration_weight);

        for &child in &children[1..] {
            let score = self.ucb_score(child, exploration_weight);
            if score > best_score {
                best = child;
                best_score = score;
            }
        }
        Ok(best)
    }

    /// Child with the most visits; ties go to the earliest-expanded child.
    pub fn most_visited_child(&self, id: NodeId) -> Result<NodeId, SearchError> {
        let children = &self.nodes[id].children;
        let mut best = *children.first().ok_or(SearchError::EmptyChildren)?;

        for &child in &children[1..] {
            if self.nodes[child].visits > self.nodes[best].visits {
                best = child;
            }
        }
        Ok(best)
    }

    /// Sole statistics mutation primitive: one visit, one value increment.
    pub fn update(&mut self, id: NodeId, value: f64) {
        let node = &mut self.nodes[id];
        node.visits += 1;
        node.value += value;
    }

    /// Root children sorted by visit count, most visited first.
    ///
    /// Used to surface alternative recommendations next to the best one.
    pub fn ranked_root_children(&self) -> Vec<NodeId> {
        let mut ranked = self.nodes[self.root()].children.clone();
        ranked.sort_by(|&a, &b| self.nodes[b].visits.cmp(&self.nodes[a].visits));
        ranked
    }
}

impl<S: fmt::Display, A> fmt::Display for MctsNode<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MctsNode(state={}, visits={}, value={:.2}, status={:?})",
            self.state, self.visits, self.value, self.status
        )
    }
}
