//! Thread-safe dispatch facade shared by producers and workers.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::dispatch::node::NodeArena;
use crate::dispatch::request::Request;
use crate::dispatch::state::{DispatchState, FlushReport};

/// Owns the queue, collision list, and lock set behind a single mutex, and
/// consults the node arena for block conditions. Every public method takes
/// and drops the mutex inside the call; nothing is ever held across an await.
pub struct Dispatcher {
    state: Mutex<DispatchState>,
    arena: Arc<NodeArena>,
}

impl Dispatcher {
    pub fn new(arena: Arc<NodeArena>) -> Self {
        Self {
            state: Mutex::new(DispatchState::new()),
            arena,
        }
    }

    pub fn arena(&self) -> &Arc<NodeArena> {
        &self.arena
    }

    pub fn offer(&self, request: Request) {
        debug!(
            target_id = %request.target_id,
            action = %request.action,
            "Request queued"
        );
        self.state.lock().offer(request);
    }

    pub fn offer_all(&self, requests: impl IntoIterator<Item = Request>) {
        let mut state = self.state.lock();
        for request in requests {
            state.offer(request);
        }
    }

    /// Hand out the next runnable request, locking its target identifier
    /// until [`Dispatcher::release`] is called for it.
    pub fn next_request(&self) -> Option<Request> {
        self.state.lock().next_request(&self.arena)
    }

    pub fn release(&self, target_id: &str) -> bool {
        self.state.lock().release(target_id)
    }

    pub fn flush(&self) -> FlushReport {
        self.state.lock().flush()
    }

    pub fn clear_locks(&self) -> usize {
        self.state.lock().clear_locks()
    }

    pub fn queue_depth(&self) -> usize {
        self.state.lock().queue_depth()
    }

    pub fn collision_count(&self) -> usize {
        self.state.lock().collision_count()
    }

    pub fn lock_count(&self) -> usize {
        self.state.lock().lock_count()
    }

    pub fn is_locked(&self, target_id: &str) -> bool {
        self.state.lock().is_locked(target_id)
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().is_empty()
    }
}
