//! Work dispatch and dependency tracking.
//!
//! The core of the crate: requests, the dependency-tree arena, the lock-set
//! and collision-list dispatch state, failure classification, and the worker
//! pool that ties them together.

pub mod dispatcher;
pub mod engine;
pub mod failure;
pub mod node;
pub mod request;
pub mod state;

pub use dispatcher::Dispatcher;
pub use engine::{DispatchEngine, EngineStatus};
pub use failure::{ActionFailure, FailureRecord, FailureRegistry, Severity};
pub use node::{NodeArena, NodeId, NodeStatus};
pub use request::{
    ActionType, Blocker, CompletedRequest, CountdownLatch, Request, RequestStatus,
};
pub use state::FlushReport;
