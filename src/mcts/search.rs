//! Core Monte Carlo Tree Search loop guided by the scoring oracle.
//!
//! One iteration runs selection, expansion, evaluation and backpropagation
//! to completion before the next starts, so every observer sees a
//! consistent tree and events arrive in a fixed per-iteration order. The
//! oracle call is the only high-latency step and the natural suspension
//! point of the loop.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;

use crate::mcts::config::SearchConfig;
use crate::mcts::contract::{ActionEnumerator, StateTransition};
use crate::mcts::events::{EventSink, EventType, ExplorationEvent, NodeSnapshot};
use crate::mcts::node::{NodeId, NodeStatus, SearchTree};
use crate::oracle::{OracleError, ScoringOracle};

/// Errors the search surfaces to its caller.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// Local precondition violation: the node has no children. Callers check
    /// `children` before asking for a best or most-visited child.
    #[error("node has no children")]
    EmptyChildren,

    /// The scoring oracle failed after its own retries were exhausted. A
    /// tree with missing evaluations is not safe to select from, so this
    /// aborts the whole search.
    #[error("scoring oracle failed: {0}")]
    Oracle(#[from] OracleError),
}

/// A failed search, still carrying the partial tree for diagnostics.
#[derive(Debug, thiserror::Error)]
#[error("search failed: {error}")]
pub struct SearchFailure<S: fmt::Debug, A: fmt::Debug> {
    pub error: SearchError,
    pub partial_tree: SearchTree<S, A>,
}

/// Cooperative cancellation handle, checked between iterations only so that
/// statistics are never left half-updated.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Result of a completed (or cancelled) search.
#[derive(Debug)]
pub struct SearchOutcome<S, A> {
    /// Action of the most-visited root child; `None` when no action was
    /// ever expandable, a valid outcome the caller must handle.
    pub best_action: Option<A>,

    /// The full tree as built, owned by the caller from here on.
    pub tree: SearchTree<S, A>,

    /// Iterations actually executed.
    pub iterations_run: usize,

    /// Best evaluation seen across the whole search.
    pub best_score_seen: f64,

    /// Deepest node created.
    pub max_depth_seen: usize,

    /// Whether the search stopped on the caller's cancel flag.
    pub cancelled: bool,
}

struct LoopOutcome<A> {
    best_action: Option<A>,
    iterations_run: usize,
    best_score_seen: f64,
    max_depth_seen: usize,
    cancelled: bool,
}

/// Event emission helper tracking the running totals every event carries.
struct Emitter<'a> {
    sink: &'a EventSink,
    max_depth_seen: usize,
}

impl Emitter<'_> {
    fn emit<S, A>(
        &mut self,
        tree: &SearchTree<S, A>,
        id: NodeId,
        event_type: EventType,
        metadata: Option<serde_json::Value>,
    ) where
        S: fmt::Display,
        A: fmt::Display + Clone + PartialEq,
    {
        self.max_depth_seen = self.max_depth_seen.max(tree.depth(id));
        if !self.sink.is_enabled() {
            return;
        }
        self.sink.emit(ExplorationEvent {
            event_type,
            node: Some(NodeSnapshot::capture(tree, id)),
            metadata,
            total_nodes: tree.len(),
            max_depth: self.max_depth_seen,
        });
    }
}

/// Runs MCTS from `initial_state` and returns the recommended action with
/// the tree that produced it.
///
/// The enumerator, transition and oracle are injected so the engine can be
/// driven by deterministic stubs in tests and by the LLM in production. On
/// an unrecoverable oracle failure the partial tree is returned inside the
/// error for inspection.
pub async fn mcts_search<S, A, E, T, O>(
    initial_state: S,
    enumerator: &E,
    transition: &T,
    oracle: &O,
    config: &SearchConfig,
    sink: &EventSink,
    cancel: &CancelFlag,
) -> Result<SearchOutcome<S, A>, SearchFailure<S, A>>
where
    S: Clone + fmt::Debug + fmt::Display + Send + Sync,
    A: Clone + PartialEq + fmt::Debug + fmt::Display + Send + Sync,
    E: ActionEnumerator<S, A> + ?Sized,
    T: StateTransition<S, A> + ?Sized,
    O: ScoringOracle + ?Sized,
{
    let mut tree = SearchTree::new(initial_state);
    match run_loop(&mut tree, enumerator, transition, oracle, config, sink, cancel).await {
        Ok(stats) => Ok(SearchOutcome {
            best_action: stats.best_action,
            tree,
            iterations_run: stats.iterations_run,
            best_score_seen: stats.best_score_seen,
            max_depth_seen: stats.max_depth_seen,
            cancelled: stats.cancelled,
        }),
        Err(error) => Err(SearchFailure {
            error,
            partial_tree: tree,
        }),
    }
}

async fn run_loop<S, A, E, T, O>(
    tree: &mut SearchTree<S, A>,
    enumerator: &E,
    transition: &T,
    oracle: &O,
    config: &SearchConfig,
    sink: &EventSink,
    cancel: &CancelFlag,
) -> Result<LoopOutcome<A>, SearchError>
where
    S: Clone + fmt::Debug + fmt::Display + Send + Sync,
    A: Clone + PartialEq + fmt::Debug + fmt::Display + Send + Sync,
    E: ActionEnumerator<S, A> + ?Sized,
    T: StateTransition<S, A> + ?Sized,
    O: ScoringOracle + ?Sized,
{
    let root = tree.root();
    let mut emitter = Emitter {
        sink,
        max_depth_seen: 0,
    };

    // Initialization: score the starting state once before the loop.
    let root_score = oracle.evaluate(&tree.get(root).state.to_string()).await?;
    tree.update(root, root_score);
    {
        let node = tree.get_mut(root);
        node.status = NodeStatus::Complete;
        node.evaluation_score = Some(root_score);
    }
    emitter.emit(tree, root, EventType::Initialization, None);

    let mut best_score_seen = root_score;
    let mut stale_iterations = 0usize;
    let mut iterations_run = 0usize;
    let mut cancelled = false;

    for iteration in 0..config.iterations {
        if cancel.is_cancelled() {
            log::info!("search cancelled after {iterations_run} iterations");
            cancelled = true;
            break;
        }

        let mut node = root;
        let mut path: Vec<NodeId> = Vec::new();

        // Selection: descend while the node is fully expanded for its
        // current enumeration, capped at max_depth.
        loop {
            if tree.get(node).children.is_empty() || tree.depth(node) >= config.max_depth {
                break;
            }
            let actions = enumerator.enumerate(&tree.get(node).state).await?;
            if !tree.is_fully_expanded(node, &actions) {
                break;
            }
            node = tree.best_child(node, config.exploration_weight)?;
            tree.get_mut(node).status = NodeStatus::Exploring;
            path.push(node);
            emitter.emit(
                tree,
                node,
                EventType::Selection,
                Some(json!({ "iteration": iteration })),
            );
        }

        // Expansion: at most one new child per iteration.
        if tree.depth(node) < config.max_depth {
            let actions = enumerator.enumerate(&tree.get(node).state).await?;
            if !tree.is_fully_expanded(node, &actions) {
                if let Some(child) = tree.expand(node, &actions, transition) {
                    node = child;
                    path.push(child);
                    emitter.emit(
                        tree,
                        child,
                        EventType::Expansion,
                        Some(json!({ "iteration": iteration })),
                    );
                }
            }
        }

        let value = evaluate_node(
            tree,
            node,
            oracle,
            &mut emitter,
            Some(json!({ "iteration": iteration })),
        )
        .await?;

        // Backpropagation over the recorded path, root side first. The root
        // itself only collects its initialization update.
        for &step in &path {
            backprop_step(tree, step, value, &mut emitter, Some(iteration));
        }

        iterations_run += 1;

        if value > best_score_seen {
            best_score_seen = value;
            stale_iterations = 0;
        } else {
            stale_iterations += 1;
        }
        if config.early_termination
            && best_score_seen > config.score_threshold
            && stale_iterations >= config.patience
        {
            log::info!(
                "early termination after {iterations_run} iterations (best score {best_score_seen:.3})"
            );
            break;
        }
    }

    // Degenerate budget (e.g. zero iterations): force one expansion and
    // evaluation before giving up on a childless root.
    if tree.get(root).children.is_empty() && !cancelled {
        let actions = enumerator.enumerate(&tree.get(root).state).await?;
        if let Some(child) = tree.expand(root, &actions, transition) {
            emitter.emit(tree, child, EventType::Expansion, None);
            let value = evaluate_node(tree, child, oracle, &mut emitter, None).await?;
            backprop_step(tree, child, value, &mut emitter, None);
            best_score_seen = best_score_seen.max(value);
        }
    }

    let best_action = if tree.get(root).children.is_empty() {
        log::warn!("no viable action found during search");
        None
    } else {
        let best = tree.most_visited_child(root)?;
        tree.get(best).action_taken.clone()
    };

    Ok(LoopOutcome {
        best_action,
        iterations_run,
        best_score_seen,
        max_depth_seen: emitter.max_depth_seen,
        cancelled,
    })
}

/// Scores one node via the oracle, emitting the evaluating/complete event
/// pair around the call.
async fn evaluate_node<S, A, O>(
    tree: &mut SearchTree<S, A>,
    node: NodeId,
    oracle: &O,
    emitter: &mut Emitter<'_>,
    metadata: Option<serde_json::Value>,
) -> Result<f64, SearchError>
where
    S: fmt::Display,
    A: fmt::Display + Clone + PartialEq,
    O: ScoringOracle + ?Sized,
{
    tree.get_mut(node).status = NodeStatus::Evaluating;
    emitter.emit(tree, node, EventType::Evaluation, metadata.clone());

    let value = oracle.evaluate(&tree.get(node).state.to_string()).await?;

    {
        let n = tree.get_mut(node);
        n.evaluation_score = Some(value);
        n.status = NodeStatus::Complete;
    }
    let mut resolved = metadata.unwrap_or_else(|| json!({}));
    resolved["evaluation_value"] = json!(value);
    emitter.emit(tree, node, EventType::Evaluation, Some(resolved));
    Ok(value)
}

fn backprop_step<S, A>(
    tree: &mut SearchTree<S, A>,
    node: NodeId,
    value: f64,
    emitter: &mut Emitter<'_>,
    iteration: Option<usize>,
) where
    S: fmt::Display,
    A: fmt::Display + Clone + PartialEq,
{
    let prev_visits = tree.get(node).visits;
    let prev_value = tree.get(node).value;
    tree.update(node, value);

    let (visits_delta, value_delta) = {
        let n = tree.get_mut(node);
        n.status = NodeStatus::Complete;
        n.evaluation_score = Some(n.value / n.visits as f64);
        (n.visits - prev_visits, n.value - prev_value)
    };
    let mut metadata = json!({
        "visits_delta": visits_delta,
        "value_delta": value_delta,
    });
    if let Some(iteration) = iteration {
        metadata["iteration"] = json!(iteration);
    }
    emitter.emit(tree, node, EventType::Backprop, Some(metadata));
}
