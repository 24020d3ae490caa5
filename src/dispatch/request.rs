//! Requests: the unit of work flowing through the dispatch engine.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatch::node::{NodeArena, NodeId};

/// Engine-visible action kinds. The concrete behavior behind each kind lives
/// in the action registry; the engine only routes on this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Recompute and write the search document for one object.
    Index,
    /// Remove the object's document from the search index.
    Delete,
    /// Re-home an object: delete at the old location, index at the new one.
    Move,
    /// Expand a container into per-member index work.
    ReindexTree,
    /// Remove index entries for members no longer present in a container.
    CleanupChildren,
    /// Run the sequential enhancement pipeline for one object.
    Enhance,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Index => write!(f, "index"),
            ActionType::Delete => write!(f, "delete"),
            ActionType::Move => write!(f, "move"),
            ActionType::ReindexTree => write!(f, "reindex_tree"),
            ActionType::CleanupChildren => write!(f, "cleanup_children"),
            ActionType::Enhance => write!(f, "enhance"),
        }
    }
}

/// Lifecycle of a request as it moves through the queue, the collision list,
/// and a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Queued,
    Active,
    InProgress,
    Blocked,
    Finished,
    Failed,
}

/// Countdown used by the countdown-block: incremented once per declared link,
/// decremented when each linked request completes. The carrying request is
/// runnable only once the count returns to zero.
#[derive(Debug, Default)]
pub struct CountdownLatch(AtomicU32);

impl CountdownLatch {
    pub fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrement, saturating at zero so a double-completion cannot wrap.
    pub fn decrement(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));
    }

    pub fn outstanding(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn is_clear(&self) -> bool {
        self.outstanding() == 0
    }
}

/// Why a request cannot run yet.
#[derive(Debug, Clone)]
pub enum Blocker {
    /// Blocked while the named node has not reached a terminal status.
    /// Sequences "index the object" after its subtree has fully settled.
    TargetComplete(NodeId),
    /// Blocked while linked requests are still outstanding. Sequences
    /// "clean up stale children" after every in-flight member update.
    Countdown(Arc<CountdownLatch>),
}

impl Blocker {
    pub fn is_blocked(&self, arena: &NodeArena) -> bool {
        match self {
            Blocker::TargetComplete(node) => !arena.is_terminal(*node),
            Blocker::Countdown(latch) => !latch.is_clear(),
        }
    }
}

/// One unit of work: a target object plus the action to take on it.
///
/// Immutable after creation except for `status` and `error`. Consumed exactly
/// once by a worker, then turned into a [`CompletedRequest`] history record.
#[derive(Debug)]
pub struct Request {
    pub id: Uuid,
    pub target_id: String,
    pub action: ActionType,
    pub message_id: Option<String>,
    /// Dependency-tree node whose completion this request reports.
    pub node: Option<NodeId>,
    blocker: Option<Blocker>,
    /// Countdown latches to decrement when this request completes.
    links: Vec<Arc<CountdownLatch>>,
    pub status: RequestStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Request {
    pub fn new(target_id: impl Into<String>, action: ActionType) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_id: target_id.into(),
            action,
            message_id: None,
            node: None,
            blocker: None,
            links: Vec::new(),
            status: RequestStatus::Queued,
            error: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_node(mut self, node: NodeId) -> Self {
        self.node = Some(node);
        self
    }

    /// Hold this request until `node` reaches a terminal status.
    pub fn blocked_until_complete(mut self, node: NodeId) -> Self {
        self.blocker = Some(Blocker::TargetComplete(node));
        self
    }

    /// Hold this request until every linked request has completed.
    pub fn blocked_on_countdown(mut self, latch: Arc<CountdownLatch>) -> Self {
        self.blocker = Some(Blocker::Countdown(latch));
        self
    }

    /// Declare that the countdown behind `latch` must wait for this request.
    pub fn link_to(mut self, latch: &Arc<CountdownLatch>) -> Self {
        latch.increment();
        self.links.push(Arc::clone(latch));
        self
    }

    /// Whether this request may be handed to a worker right now.
    pub fn is_blocked(&self, arena: &NodeArena) -> bool {
        self.blocker
            .as_ref()
            .map(|b| b.is_blocked(arena))
            .unwrap_or(false)
    }

    /// Release every declared link. Called exactly once, from the worker's
    /// completion path.
    pub(crate) fn release_links(&self) {
        for latch in &self.links {
            latch.decrement();
        }
    }
}

/// History record kept after a request leaves the engine. Observability only;
/// never consulted for correctness.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedRequest {
    pub target_id: String,
    pub action: ActionType,
    pub message_id: Option<String>,
    pub status: RequestStatus,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl CompletedRequest {
    pub fn record(request: &Request) -> Self {
        Self {
            target_id: request.target_id.clone(),
            action: request.action,
            message_id: request.message_id.clone(),
            status: request.status,
            error: request.error.clone(),
            completed_at: Utc::now(),
        }
    }
}
