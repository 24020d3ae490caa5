//! Shared helpers for dispatch engine integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration, Instant};

use repoindex_core::{ActionFailure, ActionHandler, ActionType, EngineConfig, Severity};

/// Short delays so tests finish quickly while still exercising the real
/// worker loops.
pub fn test_config(worker_count: usize) -> EngineConfig {
    EngineConfig {
        worker_count,
        idle_delay_ms: 5,
        between_delay_ms: 1,
        pause_poll_ms: 10,
        retry_delay_ms: 5,
        history_limit: 100,
    }
}

/// Poll `cond` until it holds or the deadline passes.
pub async fn wait_until(deadline_ms: u64, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_millis(deadline_ms);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    cond()
}

/// Per-target gates: a handler acquires its target's gate before finishing,
/// so a test controls exactly when each in-flight request completes.
#[derive(Default)]
pub struct GateMap {
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl GateMap {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn gate(&self, target_id: &str) -> Arc<Semaphore> {
        Arc::clone(
            self.gates
                .lock()
                .entry(target_id.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(0))),
        )
    }

    /// Let one pending call for `target_id` proceed.
    pub fn open(&self, target_id: &str) {
        self.gate(target_id).add_permits(1);
    }
}

/// Configurable test handler: optional per-target gating, a scripted failure
/// sequence, call counting, and same-target concurrency tracking.
pub struct ScriptedHandler {
    action: ActionType,
    name: String,
    gates: Option<Arc<GateMap>>,
    failures: Mutex<VecDeque<Severity>>,
    pub calls: AtomicUsize,
    active: Mutex<HashMap<String, usize>>,
    pub max_same_target: AtomicUsize,
    pub completions: Mutex<Vec<String>>,
}

impl ScriptedHandler {
    pub fn new(action: ActionType, name: &str) -> Self {
        Self {
            action,
            name: name.to_string(),
            gates: None,
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            active: Mutex::new(HashMap::new()),
            max_same_target: AtomicUsize::new(0),
            completions: Mutex::new(Vec::new()),
        }
    }

    pub fn gated(mut self, gates: &Arc<GateMap>) -> Self {
        self.gates = Some(Arc::clone(gates));
        self
    }

    /// Queue failures to return, one per call, before succeeding.
    pub fn failing_with(self, severities: &[Severity]) -> Self {
        self.failures.lock().extend(severities.iter().copied());
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn completed_targets(&self) -> Vec<String> {
        self.completions.lock().clone()
    }
}

#[async_trait]
impl ActionHandler for ScriptedHandler {
    fn action(&self) -> ActionType {
        self.action
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, target_id: &str) -> Result<(), ActionFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        {
            let mut active = self.active.lock();
            let entry = active.entry(target_id.to_string()).or_insert(0);
            *entry += 1;
            self.max_same_target.fetch_max(*entry, Ordering::SeqCst);
        }

        if let Some(gates) = &self.gates {
            let gate = gates.gate(target_id);
            gate.acquire().await.expect("gate closed").forget();
        } else {
            // Keep the request in flight long enough for collisions to form.
            sleep(Duration::from_millis(2)).await;
        }

        {
            let mut active = self.active.lock();
            if let Some(entry) = active.get_mut(target_id) {
                *entry -= 1;
            }
        }

        let scripted = self.failures.lock().pop_front();
        match scripted {
            Some(severity) => Err(ActionFailure::message(
                format!("scripted {severity:?} failure for {target_id}"),
                severity,
            )),
            None => {
                self.completions.lock().push(target_id.to_string());
                Ok(())
            }
        }
    }
}
