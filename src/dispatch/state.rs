//! Shared dispatch state: the request queue, the collision list, and the
//! target-identifier lock set.
//!
//! All three structures live behind one mutex (owned by
//! [`crate::dispatch::Dispatcher`]). With a single owner there is no nested
//! lock ordering to get wrong between workers racing on `next_request`.

use std::collections::{HashSet, VecDeque};

use crate::dispatch::node::NodeArena;
use crate::dispatch::request::{Request, RequestStatus};

/// Counts returned by a flush, for the operator log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub queued: usize,
    pub collided: usize,
    pub locks: usize,
}

#[derive(Default)]
pub struct DispatchState {
    /// Main arrival-order queue.
    queue: VecDeque<Request>,
    /// Requests dequeued but deferred: target locked or request blocked.
    /// Re-examined front-to-back before the queue is polled, preserving
    /// relative order among deferred requests.
    collisions: VecDeque<Request>,
    /// Target identifiers currently assigned to exactly one worker.
    locks: HashSet<String>,
}

impl DispatchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer(&mut self, request: Request) {
        self.queue.push_back(request);
    }

    /// Select the next runnable request, locking its target identifier.
    ///
    /// 1. Scan the collision list front-to-back for the first entry whose
    ///    target is unlocked and whose blocker is clear.
    /// 2. Otherwise poll the queue; a polled request that is locked or
    ///    blocked joins the collision list and the scan restarts.
    /// 3. `None` once both structures are exhausted.
    ///
    /// Each iteration consumes one queue entry, so a call is bounded by the
    /// queue length. A request that loses a collision is retried on every
    /// subsequent call; FIFO order holds among requests that never collide,
    /// while a colliding request may be overtaken by later non-colliding
    /// ones. That reordering is deliberate: without it one hot identifier
    /// would stall every worker.
    pub fn next_request(&mut self, arena: &NodeArena) -> Option<Request> {
        loop {
            if let Some(pos) = self
                .collisions
                .iter()
                .position(|r| !self.locks.contains(&r.target_id) && !r.is_blocked(arena))
            {
                if let Some(mut request) = self.collisions.remove(pos) {
                    request.status = RequestStatus::Queued;
                    self.locks.insert(request.target_id.clone());
                    return Some(request);
                }
            }

            match self.queue.pop_front() {
                None => return None,
                Some(mut request) => {
                    if self.locks.contains(&request.target_id) || request.is_blocked(arena) {
                        request.status = RequestStatus::Blocked;
                        self.collisions.push_back(request);
                        continue;
                    }
                    self.locks.insert(request.target_id.clone());
                    return Some(request);
                }
            }
        }
    }

    /// Release a target identifier. Only the worker that locked it calls
    /// this, after its request fully completes.
    pub fn release(&mut self, target_id: &str) -> bool {
        self.locks.remove(target_id)
    }

    /// Drop all queued and deferred work and every lock.
    pub fn flush(&mut self) -> FlushReport {
        let report = FlushReport {
            queued: self.queue.len(),
            collided: self.collisions.len(),
            locks: self.locks.len(),
        };
        self.queue.clear();
        self.collisions.clear();
        self.locks.clear();
        report
    }

    /// Drop only the locks. Used when aborting in-flight workers, whose
    /// release calls will never run.
    pub fn clear_locks(&mut self) -> usize {
        let count = self.locks.len();
        self.locks.clear();
        count
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub fn collision_count(&self) -> usize {
        self.collisions.len()
    }

    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    pub fn is_locked(&self, target_id: &str) -> bool {
        self.locks.contains(target_id)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty() && self.collisions.is_empty()
    }
}
