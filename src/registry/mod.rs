//! Component registration and discovery.

pub mod action_registry;

pub use action_registry::{ActionHandler, ActionRegistry};
