//! # Message Producer
//!
//! Converts repository change messages into dispatchable requests, building
//! dependency-tree structure for recursive operations.
//!
//! The message-bus transport itself is an external collaborator; this module
//! starts at the decoded payload. Delivery is at-least-once upstream, so
//! everything here must tolerate replays: re-ingesting a message simply
//! queues fresh requests, and the engine's per-target lock serializes them.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dispatch::engine::DispatchEngine;
use crate::dispatch::node::NodeId;
use crate::dispatch::request::{ActionType, CountdownLatch, Request};
use crate::error::Result;

/// What a repository change message asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Create,
    Modify,
    Move,
    Delete,
    /// Reindex a container and every listed member.
    ReindexTree,
    /// Run the enhancement pipeline for the target.
    Enhance,
}

/// Decoded bus message: an action, a target, and optionally the member
/// identifiers of a container plus a correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryMessage {
    pub kind: MessageKind,
    pub target_id: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub message_id: Option<String>,
}

/// What one ingested message expanded into.
#[derive(Debug, Clone, Copy)]
pub struct IngestReceipt {
    /// Number of requests queued.
    pub requests: usize,
    /// Root node, for subtree operations.
    pub root: Option<NodeId>,
}

/// Expands messages into requests/nodes and offers them to the engine.
pub struct MessageProducer {
    engine: Arc<DispatchEngine>,
    /// Live subtree roots per container, so follow-up single-object work can
    /// be sequenced behind an in-flight recursive operation.
    active_subtrees: DashMap<String, NodeId>,
}

impl MessageProducer {
    pub fn new(engine: Arc<DispatchEngine>) -> Self {
        Self {
            engine,
            active_subtrees: DashMap::new(),
        }
    }

    /// Convert one message into requests and queue them.
    pub fn ingest(&self, message: RepositoryMessage) -> Result<IngestReceipt> {
        debug!(
            kind = ?message.kind,
            target_id = %message.target_id,
            members = message.members.len(),
            message_id = message.message_id.as_deref(),
            "Ingesting repository message"
        );
        match message.kind {
            MessageKind::Create | MessageKind::Modify => {
                self.single(message, ActionType::Index)
            }
            MessageKind::Move => self.single(message, ActionType::Move),
            MessageKind::Delete => self.single(message, ActionType::Delete),
            MessageKind::Enhance => self.single(message, ActionType::Enhance),
            MessageKind::ReindexTree => self.reindex_tree(message),
        }
    }

    fn single(&self, message: RepositoryMessage, action: ActionType) -> Result<IngestReceipt> {
        let mut request = Request::new(message.target_id.clone(), action);
        if let Some(message_id) = message.message_id {
            request = request.with_message_id(message_id);
        }
        request = self.sequence_after_subtree(&message.target_id, request);
        self.engine.submit(request)?;
        Ok(IngestReceipt {
            requests: 1,
            root: None,
        })
    }

    /// Expand a "reindex subtree" message: one child node and index request
    /// per member, a countdown-blocked cleanup request, and finally an index
    /// request for the container itself. The cleanup runs only after every
    /// member update has completed, so it cannot delete index entries for
    /// objects that are mid-update; the container reindex runs only after
    /// cleanup, so its member listing reflects the settled subtree.
    fn reindex_tree(&self, message: RepositoryMessage) -> Result<IngestReceipt> {
        let arena = self.engine.arena();
        let root = arena.new_root(message.message_id.as_deref());
        // Members and cleanup settle under this intermediate node. The
        // container reindex blocks on it and carries the root node itself,
        // so the root stays live until the container has been reindexed.
        let subtree = arena.add_child(root, message.message_id.as_deref());
        self.active_subtrees
            .insert(message.target_id.clone(), root);

        let latch = Arc::new(CountdownLatch::new());
        let mut requests = Vec::with_capacity(message.members.len() + 2);
        for member in &message.members {
            let node = arena.add_child(subtree, message.message_id.as_deref());
            let mut request = Request::new(member.clone(), ActionType::Index)
                .with_node(node)
                .link_to(&latch);
            if let Some(message_id) = &message.message_id {
                request = request.with_message_id(message_id.clone());
            }
            requests.push(request);
        }

        let mut cleanup = Request::new(message.target_id.clone(), ActionType::CleanupChildren)
            .with_node(subtree)
            .blocked_on_countdown(latch);
        if let Some(message_id) = &message.message_id {
            cleanup = cleanup.with_message_id(message_id.clone());
        }
        requests.push(cleanup);

        let mut reindex_container = Request::new(message.target_id.clone(), ActionType::Index)
            .with_node(root)
            .blocked_until_complete(subtree);
        if let Some(message_id) = &message.message_id {
            reindex_container = reindex_container.with_message_id(message_id.clone());
        }
        requests.push(reindex_container);

        let count = requests.len();
        self.engine.submit_all(requests)?;
        info!(
            target_id = %message.target_id,
            members = message.members.len(),
            "Subtree reindex expanded"
        );
        Ok(IngestReceipt {
            requests: count,
            root: Some(root),
        })
    }

    /// Block a single-object request behind a still-live subtree operation
    /// for the same target, so "index the object" runs only after
    /// "reindex all its children" has fully settled.
    fn sequence_after_subtree(&self, target_id: &str, request: Request) -> Request {
        let Some(entry) = self.active_subtrees.get(target_id) else {
            return request;
        };
        let root = *entry.value();
        drop(entry);
        if self.engine.arena().is_terminal(root) {
            self.active_subtrees.remove(target_id);
            request
        } else {
            debug!(
                target_id,
                "Sequencing request behind in-flight subtree operation"
            );
            request.blocked_until_complete(root)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::registry::ActionRegistry;

    fn producer() -> (Arc<DispatchEngine>, MessageProducer) {
        let engine = Arc::new(DispatchEngine::new(
            EngineConfig::default(),
            Arc::new(ActionRegistry::new()),
        ));
        let producer = MessageProducer::new(Arc::clone(&engine));
        (engine, producer)
    }

    fn message(kind: MessageKind, target: &str, members: &[&str]) -> RepositoryMessage {
        RepositoryMessage {
            kind,
            target_id: target.to_string(),
            members: members.iter().map(|m| m.to_string()).collect(),
            message_id: Some("msg-1".to_string()),
        }
    }

    #[tokio::test]
    async fn modify_becomes_a_single_index_request() {
        let (engine, producer) = producer();
        let receipt = producer
            .ingest(message(MessageKind::Modify, "obj:1", &[]))
            .unwrap();

        assert_eq!(receipt.requests, 1);
        assert!(receipt.root.is_none());
        assert_eq!(engine.status().queue_depth, 1);
    }

    #[tokio::test]
    async fn reindex_tree_fans_out_per_member_plus_cleanup_and_container() {
        let (engine, producer) = producer();
        let receipt = producer
            .ingest(message(
                MessageKind::ReindexTree,
                "coll:1",
                &["obj:a", "obj:b", "obj:c"],
            ))
            .unwrap();

        // Three member updates, the cleanup, and the container reindex.
        assert_eq!(receipt.requests, 5);
        assert_eq!(engine.status().queue_depth, 5);

        // Root node tracks the members plus the intermediate subtree node.
        let root = receipt.root.unwrap();
        assert_eq!(engine.arena().counts(root), Some((4, 0)));
    }

    #[tokio::test]
    async fn message_deserializes_with_defaulted_fields() {
        let message: RepositoryMessage =
            serde_json::from_str(r#"{"kind":"modify","target_id":"obj:9"}"#).unwrap();
        assert_eq!(message.kind, MessageKind::Modify);
        assert!(message.members.is_empty());
        assert!(message.message_id.is_none());
    }
}
