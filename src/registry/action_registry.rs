//! # Action Registry
//!
//! Pluggable handlers keyed by action type, registered at startup.
//!
//! The engine is polymorphic over anything implementing [`ActionHandler`];
//! concrete handlers (search-document builder, derivative generator, text
//! extractor) live outside this crate and talk to the repository and index
//! through their own clients. The engine guarantees only ordering and mutual
//! exclusion, never the content of handler side effects.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;

use crate::dispatch::failure::ActionFailure;
use crate::dispatch::request::ActionType;
use crate::error::{EngineError, Result};

/// Contract every pluggable action implements.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Which action type this handler serves.
    fn action(&self) -> ActionType;

    /// Stable name, used as the failure-registry key for enhancement
    /// sub-handlers and in log lines.
    fn name(&self) -> &str;

    /// Whether this handler applies to the given object at all. A handler
    /// that returns `false` is skipped without being counted as a failure.
    async fn is_applicable(&self, target_id: &str) -> bool {
        let _ = target_id;
        true
    }

    /// Perform the action. Failures carry their own severity classification.
    async fn apply(&self, target_id: &str) -> std::result::Result<(), ActionFailure>;
}

/// Map from action type to the handler instance serving it.
pub struct ActionRegistry {
    handlers: DashMap<ActionType, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Register a handler for its action type. Replacing an existing handler
    /// is an error: registration is a startup concern and a silent swap
    /// would hide a wiring mistake.
    pub fn register(&self, handler: Arc<dyn ActionHandler>) -> Result<()> {
        let action = handler.action();
        let name = handler.name().to_string();
        if self.handlers.contains_key(&action) {
            return Err(EngineError::Registry(format!(
                "Handler already registered for action '{action}'"
            )));
        }
        self.handlers.insert(action, handler);
        info!(action = %action, handler = %name, "Action handler registered");
        Ok(())
    }

    pub fn handler(&self, action: ActionType) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(&action).map(|h| Arc::clone(h.value()))
    }

    pub fn registered_actions(&self) -> Vec<ActionType> {
        self.handlers.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl ActionHandler for NoopHandler {
        fn action(&self) -> ActionType {
            ActionType::Index
        }

        fn name(&self) -> &str {
            "noop_indexer"
        }

        async fn apply(&self, _target_id: &str) -> std::result::Result<(), ActionFailure> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn lookup_returns_registered_handler() {
        let registry = ActionRegistry::new();
        registry.register(Arc::new(NoopHandler)).unwrap();

        let handler = registry.handler(ActionType::Index).unwrap();
        assert_eq!(handler.name(), "noop_indexer");
        assert!(handler.is_applicable("obj:1").await);
        assert!(registry.handler(ActionType::Delete).is_none());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = ActionRegistry::new();
        registry.register(Arc::new(NoopHandler)).unwrap();
        assert!(registry.register(Arc::new(NoopHandler)).is_err());
        assert_eq!(registry.len(), 1);
    }
}
