#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Repoindex Core
//!
//! In-memory work dispatch and dependency-tracking engine keeping a derived
//! search index and content-enhancement artifacts consistent with a
//! hierarchical content repository.
//!
//! ## Overview
//!
//! Repository changes arrive as asynchronous messages (create, modify, move,
//! delete, bulk reindex). The engine turns each into ordered units of work
//! and runs them on a bounded pool of background workers while guaranteeing:
//!
//! - **Mutual exclusion**: at most one in-flight request per target
//!   identifier, enforced by a lock set that every dispatch passes through.
//! - **No lost work**: requests that lose a lock collision wait in an
//!   arrival-ordered collision list and are re-examined on every dispatch.
//! - **Subtree accounting**: recursive operations fan out into a dependency
//!   tree whose pending/processed counts answer "is this subtree done".
//! - **Severity-classified failures**: recoverable failures retry once,
//!   unrecoverable ones are registered and skipped, fatal ones halt the
//!   pipeline until an operator resumes it.
//!
//! The actual indexing and enhancement work is external: handlers implement
//! [`registry::ActionHandler`] and are looked up per action type at dispatch
//! time. The engine guarantees ordering and exclusion, never the content of
//! handler side effects.
//!
//! ## Module Organization
//!
//! - [`dispatch`] - requests, dependency tree, dispatcher, worker pool,
//!   failure registry
//! - [`registry`] - pluggable action handler registration and lookup
//! - [`pipeline`] - sequential per-object enhancement pipeline
//! - [`messaging`] - message-to-request expansion for bus payloads
//! - [`config`] - engine configuration
//! - [`logging`] - structured logging setup
//! - [`error`] - crate error types
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use repoindex_core::config::EngineConfig;
//! use repoindex_core::dispatch::DispatchEngine;
//! use repoindex_core::messaging::{MessageKind, MessageProducer, RepositoryMessage};
//! use repoindex_core::registry::ActionRegistry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(ActionRegistry::new());
//! // registry.register(...) concrete handlers here.
//!
//! let engine = Arc::new(DispatchEngine::new(EngineConfig::from_env()?, registry));
//! engine.start();
//!
//! let producer = MessageProducer::new(Arc::clone(&engine));
//! producer.ingest(RepositoryMessage {
//!     kind: MessageKind::Modify,
//!     target_id: "obj:123".to_string(),
//!     members: vec![],
//!     message_id: Some("msg-1".to_string()),
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod pipeline;
pub mod registry;

pub use config::EngineConfig;
pub use dispatch::{
    ActionFailure, ActionType, CompletedRequest, CountdownLatch, DispatchEngine, EngineStatus,
    FailureRecord, FailureRegistry, NodeArena, NodeId, NodeStatus, Request, RequestStatus,
    Severity,
};
pub use error::{EngineError, Result};
pub use messaging::{MessageKind, MessageProducer, RepositoryMessage};
pub use pipeline::{EnhancementOutcome, EnhancementPipeline, EnhancementReport};
pub use registry::{ActionHandler, ActionRegistry};
