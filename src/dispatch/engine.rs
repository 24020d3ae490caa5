//! # Dispatch Engine
//!
//! The worker pool plus the administrative surface around it.
//!
//! N persistent workers loop over the dispatcher: pull the next runnable
//! request, execute it through the action registry, classify any failure,
//! and always run the completion path (node accounting, link release, lock
//! release, history) regardless of outcome.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::dispatch::dispatcher::Dispatcher;
use crate::dispatch::failure::{ActionFailure, FailureRecord, FailureRegistry, Severity};
use crate::dispatch::node::{NodeArena, NodeStatus};
use crate::dispatch::request::{CompletedRequest, Request, RequestStatus};
use crate::dispatch::state::FlushReport;
use crate::error::{EngineError, Result};
use crate::registry::{ActionHandler, ActionRegistry};

/// Point-in-time snapshot for the status report.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub queue_depth: usize,
    pub collision_count: usize,
    pub lock_count: usize,
    pub active_workers: usize,
    pub worker_count: usize,
    pub paused: bool,
    pub finished_count: usize,
    pub failed_count: usize,
    pub permanent_failures: usize,
}

struct Histories {
    finished: VecDeque<CompletedRequest>,
    failed: VecDeque<CompletedRequest>,
}

impl Histories {
    fn push_bounded(deque: &mut VecDeque<CompletedRequest>, record: CompletedRequest, limit: usize) {
        if deque.len() >= limit {
            deque.pop_front();
        }
        deque.push_back(record);
    }
}

pub(crate) struct EngineCore {
    config: EngineConfig,
    dispatcher: Dispatcher,
    registry: Arc<ActionRegistry>,
    failures: Arc<FailureRegistry>,
    paused: AtomicBool,
    accepting: AtomicBool,
    draining: AtomicBool,
    active_workers: AtomicUsize,
    history: Mutex<Histories>,
}

impl EngineCore {
    async fn execute(&self, request: &mut Request) {
        request.status = RequestStatus::Active;
        if let Some(node) = request.node {
            self.dispatcher.arena().set_status(node, NodeStatus::Active);
        }

        let action_key = request.action.to_string();
        if self.failures.is_failed(&request.target_id, &action_key) {
            debug!(
                target_id = %request.target_id,
                action = %request.action,
                "Skipping action marked permanently failed"
            );
            request.status = RequestStatus::Finished;
            return;
        }

        let Some(handler) = self.registry.handler(request.action) else {
            let message = format!("No handler registered for action '{}'", request.action);
            warn!(target_id = %request.target_id, action = %request.action, "{message}");
            self.fail_request(request, Severity::Unrecoverable, &message);
            return;
        };

        if !handler.is_applicable(&request.target_id).await {
            debug!(
                target_id = %request.target_id,
                handler = %handler.name(),
                "Handler not applicable, skipping"
            );
            request.status = RequestStatus::Finished;
            return;
        }

        match handler.apply(&request.target_id).await {
            Ok(()) => {
                request.status = RequestStatus::Finished;
            }
            Err(failure) => self.handle_failure(request, handler.as_ref(), failure).await,
        }
    }

    async fn handle_failure(
        &self,
        request: &mut Request,
        handler: &dyn ActionHandler,
        failure: ActionFailure,
    ) {
        match failure.severity {
            Severity::Recoverable => {
                warn!(
                    target_id = %request.target_id,
                    action = %request.action,
                    error = %failure.source,
                    "Recoverable failure, retrying once after delay"
                );
                sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                match handler.apply(&request.target_id).await {
                    Ok(()) => {
                        info!(
                            target_id = %request.target_id,
                            action = %request.action,
                            "Retry succeeded"
                        );
                        request.status = RequestStatus::Finished;
                    }
                    Err(retry_failure) => {
                        let message = format!(
                            "Retry failed (first: {}; retry: {})",
                            failure.source, retry_failure.source
                        );
                        self.fail_request(request, retry_failure.severity, &message);
                    }
                }
            }
            Severity::Unrecoverable => {
                self.fail_request(request, Severity::Unrecoverable, &failure.source.to_string());
            }
            Severity::Fatal => {
                self.fail_request(request, Severity::Fatal, &failure.source.to_string());
            }
        }
    }

    /// Record the failure in the registry, mark the request, and on a fatal
    /// severity halt all further dispatch until an operator resumes.
    fn fail_request(&self, request: &mut Request, severity: Severity, message: &str) {
        self.failures.record(
            &request.target_id,
            &request.action.to_string(),
            request.action,
            severity,
            message,
        );
        request.status = RequestStatus::Failed;
        request.error = Some(message.to_string());
        error!(
            target_id = %request.target_id,
            action = %request.action,
            severity = ?severity,
            error = %message,
            "Request failed"
        );
        if severity == Severity::Fatal {
            self.paused.store(true, Ordering::SeqCst);
            error!("Pipeline paused after fatal failure; operator resume required");
        }
    }

    /// Completion path. Always runs, success or failure: node accounting,
    /// link release, lock release, history.
    fn finish(&self, request: Request) {
        let arena = self.dispatcher.arena();
        if let Some(node) = request.node {
            if request.status == RequestStatus::Failed {
                arena.set_status(node, NodeStatus::Failed);
            }
            arena.request_completed(node);
        }
        request.release_links();
        self.dispatcher.release(&request.target_id);

        let record = CompletedRequest::record(&request);
        let mut history = self.history.lock();
        if request.status == RequestStatus::Failed {
            Histories::push_bounded(&mut history.failed, record, self.config.history_limit);
        } else {
            Histories::push_bounded(&mut history.finished, record, self.config.history_limit);
        }
    }
}

async fn worker_loop(worker_id: usize, core: Arc<EngineCore>) {
    debug!(worker_id, "Worker started");
    loop {
        if core.paused.load(Ordering::SeqCst) {
            // A paused engine that is shutting down will never drain; exit.
            if core.draining.load(Ordering::SeqCst) {
                break;
            }
            sleep(Duration::from_millis(core.config.pause_poll_ms)).await;
            continue;
        }

        match core.dispatcher.next_request() {
            None => {
                if core.draining.load(Ordering::SeqCst) {
                    break;
                }
                sleep(Duration::from_millis(core.config.idle_delay_ms)).await;
            }
            Some(mut request) => {
                core.active_workers.fetch_add(1, Ordering::SeqCst);
                core.execute(&mut request).await;
                core.finish(request);
                core.active_workers.fetch_sub(1, Ordering::SeqCst);
                sleep(Duration::from_millis(core.config.between_delay_ms)).await;
            }
        }
    }
    debug!(worker_id, "Worker stopped");
}

/// The engine: shared dispatch state plus the pool of worker tasks.
pub struct DispatchEngine {
    core: Arc<EngineCore>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DispatchEngine {
    pub fn new(config: EngineConfig, registry: Arc<ActionRegistry>) -> Self {
        let arena = Arc::new(NodeArena::new());
        Self {
            core: Arc::new(EngineCore {
                config,
                dispatcher: Dispatcher::new(arena),
                registry,
                failures: Arc::new(FailureRegistry::new()),
                paused: AtomicBool::new(false),
                accepting: AtomicBool::new(true),
                draining: AtomicBool::new(false),
                active_workers: AtomicUsize::new(0),
                history: Mutex::new(Histories {
                    finished: VecDeque::new(),
                    failed: VecDeque::new(),
                }),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker pool. Idempotent: a running pool is left alone.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return;
        }
        for worker_id in 0..self.core.config.worker_count {
            let core = Arc::clone(&self.core);
            workers.push(tokio::spawn(worker_loop(worker_id, core)));
        }
        info!(
            worker_count = self.core.config.worker_count,
            "Dispatch engine started"
        );
    }

    /// Queue a request for dispatch.
    pub fn submit(&self, request: Request) -> Result<()> {
        if !self.core.accepting.load(Ordering::SeqCst) {
            return Err(EngineError::ShutDown);
        }
        self.core.dispatcher.offer(request);
        Ok(())
    }

    pub fn submit_all(&self, requests: impl IntoIterator<Item = Request>) -> Result<()> {
        if !self.core.accepting.load(Ordering::SeqCst) {
            return Err(EngineError::ShutDown);
        }
        self.core.dispatcher.offer_all(requests);
        Ok(())
    }

    /// Stop handing out new work. In-flight requests complete.
    pub fn pause(&self) {
        self.core.paused.store(true, Ordering::SeqCst);
        info!("Dispatch paused");
    }

    /// Re-enable dispatch, including after a fatal failure.
    pub fn resume(&self) {
        self.core.paused.store(false, Ordering::SeqCst);
        info!("Dispatch resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.core.paused.load(Ordering::SeqCst)
    }

    /// Drop all queued and deferred work and every lock.
    pub fn flush(&self) -> FlushReport {
        let report = self.core.dispatcher.flush();
        warn!(
            queued = report.queued,
            collided = report.collided,
            locks = report.locks,
            "Dispatch state flushed"
        );
        report
    }

    /// Stop accepting new work and let queued work drain, then join the
    /// workers.
    pub async fn shutdown(&self) {
        self.core.accepting.store(false, Ordering::SeqCst);
        self.core.draining.store(true, Ordering::SeqCst);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            let _ = handle.await;
        }
        info!("Dispatch engine shut down");
    }

    /// Interrupt in-flight workers and rebuild the pool. Work lost this way
    /// is not retried by the engine; the upstream producer must resubmit.
    pub async fn abort(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            let _ = handle.await;
        }
        // Aborted workers never ran their release calls.
        let orphaned = self.core.dispatcher.clear_locks();
        self.core.active_workers.store(0, Ordering::SeqCst);
        warn!(orphaned_locks = orphaned, "Worker pool aborted, rebuilding");
        if self.core.accepting.load(Ordering::SeqCst) {
            self.start();
        }
    }

    pub fn status(&self) -> EngineStatus {
        let history = self.core.history.lock();
        EngineStatus {
            queue_depth: self.core.dispatcher.queue_depth(),
            collision_count: self.core.dispatcher.collision_count(),
            lock_count: self.core.dispatcher.lock_count(),
            active_workers: self.core.active_workers.load(Ordering::SeqCst),
            worker_count: self.core.config.worker_count,
            paused: self.core.paused.load(Ordering::SeqCst),
            finished_count: history.finished.len(),
            failed_count: history.failed.len(),
            permanent_failures: self.core.failures.len(),
        }
    }

    /// Permanently failed (target, action) pairs, for the operator surface.
    pub fn failed_entries(&self) -> Vec<FailureRecord> {
        self.core.failures.records()
    }

    pub fn clear_failure(&self, target_id: &str, action_key: &str) -> bool {
        self.core.failures.clear(target_id, action_key)
    }

    pub fn clear_all_failures(&self) -> usize {
        self.core.failures.drain().len()
    }

    /// Clear every permanent failure and resubmit one request per distinct
    /// (target, action) pair. Returns how many requests were queued.
    pub fn reprocess_all_failed(&self) -> Result<usize> {
        if !self.core.accepting.load(Ordering::SeqCst) {
            return Err(EngineError::ShutDown);
        }
        let drained = self.core.failures.drain();
        let mut seen = HashSet::new();
        let mut count = 0;
        for record in drained {
            if seen.insert((record.target_id.clone(), record.action)) {
                self.core
                    .dispatcher
                    .offer(Request::new(record.target_id, record.action));
                count += 1;
            }
        }
        info!(resubmitted = count, "Reprocessing all failed entries");
        Ok(count)
    }

    pub fn finished_history(&self) -> Vec<CompletedRequest> {
        self.core.history.lock().finished.iter().cloned().collect()
    }

    pub fn failed_history(&self) -> Vec<CompletedRequest> {
        self.core.history.lock().failed.iter().cloned().collect()
    }

    /// Shared dependency-tree arena, for producers building subtree
    /// operations.
    pub fn arena(&self) -> Arc<NodeArena> {
        Arc::clone(self.core.dispatcher.arena())
    }

    pub fn failures(&self) -> Arc<FailureRegistry> {
        Arc::clone(&self.core.failures)
    }

    pub fn registry(&self) -> Arc<ActionRegistry> {
        Arc::clone(&self.core.registry)
    }
}
