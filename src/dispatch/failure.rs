//! Failure severity classification and the permanent-failure registry.
//!
//! Handlers return [`ActionFailure`] instead of raising typed exceptions; the
//! worker loop pattern-matches on [`Severity`] to decide retry/skip/halt.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::dispatch::request::ActionType;

/// How a failure drives the worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Retry the same request once after a fixed delay; a second failure
    /// registers the (target, action) pair as permanently failed.
    Recoverable,
    /// Register immediately; no retry. Unrelated actions for the same
    /// target may still run.
    Unrecoverable,
    /// Register, and pause the whole pipeline until an operator resumes it.
    /// Reserved for systemic failures (index or repository unreachable).
    Fatal,
}

/// A classified handler failure carrying its underlying cause.
#[derive(Debug)]
pub struct ActionFailure {
    pub severity: Severity,
    pub source: anyhow::Error,
}

impl ActionFailure {
    pub fn recoverable(source: impl Into<anyhow::Error>) -> Self {
        Self {
            severity: Severity::Recoverable,
            source: source.into(),
        }
    }

    pub fn unrecoverable(source: impl Into<anyhow::Error>) -> Self {
        Self {
            severity: Severity::Unrecoverable,
            source: source.into(),
        }
    }

    pub fn fatal(source: impl Into<anyhow::Error>) -> Self {
        Self {
            severity: Severity::Fatal,
            source: source.into(),
        }
    }

    /// Wrap an unclassified error. Treated as unrecoverable, per the default
    /// classification policy.
    pub fn unclassified(source: impl Into<anyhow::Error>) -> Self {
        Self::unrecoverable(source)
    }

    pub fn message(msg: impl Into<String>, severity: Severity) -> Self {
        Self {
            severity,
            source: anyhow::anyhow!(msg.into()),
        }
    }
}

impl std::fmt::Display for ActionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} failure: {}", self.severity, self.source)
    }
}

impl std::error::Error for ActionFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.source()
    }
}

/// One permanently failed (target, action) pair.
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub target_id: String,
    /// Registry key: the action name, or the handler name for enhancement
    /// sub-handlers.
    pub action_key: String,
    /// Action to resubmit when the operator reprocesses this entry.
    pub action: ActionType,
    pub severity: Severity,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Remembers which actions have permanently failed per target identifier.
///
/// Once a pair is registered the action is skipped for that target until the
/// entry is explicitly cleared and the object resubmitted.
pub struct FailureRegistry {
    entries: DashMap<String, HashMap<String, FailureRecord>>,
}

impl FailureRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn record(
        &self,
        target_id: &str,
        action_key: &str,
        action: ActionType,
        severity: Severity,
        error: &str,
    ) {
        let record = FailureRecord {
            target_id: target_id.to_string(),
            action_key: action_key.to_string(),
            action,
            severity,
            error: error.to_string(),
            failed_at: Utc::now(),
        };
        self.entries
            .entry(target_id.to_string())
            .or_default()
            .insert(action_key.to_string(), record);
    }

    pub fn is_failed(&self, target_id: &str, action_key: &str) -> bool {
        self.entries
            .get(target_id)
            .map(|actions| actions.contains_key(action_key))
            .unwrap_or(false)
    }

    /// Clear one pair. Returns whether an entry existed.
    pub fn clear(&self, target_id: &str, action_key: &str) -> bool {
        let Some(mut actions) = self.entries.get_mut(target_id) else {
            return false;
        };
        let removed = actions.remove(action_key).is_some();
        let now_empty = actions.is_empty();
        drop(actions);
        if now_empty {
            self.entries.remove_if(target_id, |_, v| v.is_empty());
        }
        removed
    }

    /// Clear every entry, returning the records so they can be resubmitted.
    pub fn drain(&self) -> Vec<FailureRecord> {
        let mut drained = Vec::new();
        let targets: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for target in targets {
            if let Some((_, actions)) = self.entries.remove(&target) {
                drained.extend(actions.into_values());
            }
        }
        drained
    }

    pub fn records(&self) -> Vec<FailureRecord> {
        self.entries
            .iter()
            .flat_map(|entry| entry.value().values().cloned().collect::<Vec<_>>())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FailureRegistry {
    fn default() -> Self {
        Self::new()
    }
}
