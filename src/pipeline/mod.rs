//! Content-enhancement pipeline.

pub mod enhancement;

pub use enhancement::{EnhancementOutcome, EnhancementPipeline, EnhancementReport};
