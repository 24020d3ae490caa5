//! # Enhancement Pipeline
//!
//! Runs a single target through an ordered list of enhancement handlers
//! (derivative generation, metadata extraction, text extraction), strictly
//! sequentially: later handlers may depend on artifacts produced by earlier
//! ones, so nothing here is parallelized.
//!
//! The pipeline itself registers as the [`ActionType::Enhance`] handler, so
//! an `Enhance` request dispatched by the engine runs the whole chain under
//! the engine's per-target lock. Individual handler failures are recorded in
//! the failure registry under the handler's own name; the registry then
//! skips that handler (and only that handler) on later passes until cleared.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::dispatch::failure::{ActionFailure, FailureRegistry, Severity};
use crate::dispatch::request::ActionType;
use crate::registry::ActionHandler;

/// Per-handler result within one pipeline pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnhancementOutcome {
    Applied,
    SkippedNotApplicable,
    SkippedPermanentlyFailed,
    Failed,
}

/// What one pass over a target did, handler by handler.
#[derive(Debug, Clone, Serialize)]
pub struct EnhancementReport {
    pub target_id: String,
    pub outcomes: Vec<(String, EnhancementOutcome)>,
}

impl EnhancementReport {
    pub fn applied_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == EnhancementOutcome::Applied)
            .count()
    }
}

/// Ordered, sequential multi-handler pipeline for one object.
pub struct EnhancementPipeline {
    handlers: Vec<Arc<dyn ActionHandler>>,
    failures: Arc<FailureRegistry>,
    retry_delay_ms: u64,
}

impl EnhancementPipeline {
    pub fn new(
        handlers: Vec<Arc<dyn ActionHandler>>,
        failures: Arc<FailureRegistry>,
        retry_delay_ms: u64,
    ) -> Self {
        Self {
            handlers,
            failures,
            retry_delay_ms,
        }
    }

    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Run every handler in order against `target_id`.
    ///
    /// Non-fatal failures are recorded and the remaining handlers still run;
    /// a fatal failure stops the pass immediately and propagates so the
    /// owning engine pauses.
    pub async fn run(&self, target_id: &str) -> Result<EnhancementReport, ActionFailure> {
        let mut outcomes = Vec::with_capacity(self.handlers.len());

        for handler in &self.handlers {
            let name = handler.name();

            if self.failures.is_failed(target_id, name) {
                debug!(target_id, handler = name, "Skipping permanently failed enhancer");
                outcomes.push((name.to_string(), EnhancementOutcome::SkippedPermanentlyFailed));
                continue;
            }

            if !handler.is_applicable(target_id).await {
                debug!(target_id, handler = name, "Enhancer not applicable");
                outcomes.push((name.to_string(), EnhancementOutcome::SkippedNotApplicable));
                continue;
            }

            match self.invoke_with_retry(handler.as_ref(), target_id).await {
                Ok(()) => {
                    outcomes.push((name.to_string(), EnhancementOutcome::Applied));
                }
                Err(failure) => {
                    self.failures.record(
                        target_id,
                        name,
                        ActionType::Enhance,
                        failure.severity,
                        &failure.source.to_string(),
                    );
                    outcomes.push((name.to_string(), EnhancementOutcome::Failed));
                    if failure.severity == Severity::Fatal {
                        warn!(
                            target_id,
                            handler = name,
                            "Fatal enhancer failure, stopping pipeline pass"
                        );
                        return Err(failure);
                    }
                    warn!(
                        target_id,
                        handler = name,
                        error = %failure.source,
                        "Enhancer failed, continuing with remaining handlers"
                    );
                }
            }
        }

        let report = EnhancementReport {
            target_id: target_id.to_string(),
            outcomes,
        };
        info!(
            target_id,
            applied = report.applied_count(),
            handlers = self.handlers.len(),
            "Enhancement pass complete"
        );
        Ok(report)
    }

    async fn invoke_with_retry(
        &self,
        handler: &dyn ActionHandler,
        target_id: &str,
    ) -> Result<(), ActionFailure> {
        match handler.apply(target_id).await {
            Ok(()) => Ok(()),
            Err(failure) if failure.severity == Severity::Recoverable => {
                warn!(
                    target_id,
                    handler = handler.name(),
                    error = %failure.source,
                    "Recoverable enhancer failure, retrying once"
                );
                sleep(Duration::from_millis(self.retry_delay_ms)).await;
                handler.apply(target_id).await
            }
            Err(failure) => Err(failure),
        }
    }
}

#[async_trait]
impl ActionHandler for EnhancementPipeline {
    fn action(&self) -> ActionType {
        ActionType::Enhance
    }

    fn name(&self) -> &str {
        "enhancement_pipeline"
    }

    async fn apply(&self, target_id: &str) -> Result<(), ActionFailure> {
        self.run(target_id).await.map(|_| ())
    }
}
