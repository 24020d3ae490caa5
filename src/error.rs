//! Crate-wide error types.

use thiserror::Error;

/// Errors surfaced by the engine itself. Action handler failures are not
/// represented here; they travel as [`crate::dispatch::ActionFailure`] so
/// they can carry a severity classification.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Dispatch error: {0}")]
    Dispatch(String),

    #[error("Engine is shut down and no longer accepts work")]
    ShutDown,
}

pub type Result<T> = std::result::Result<T, EngineError>;
