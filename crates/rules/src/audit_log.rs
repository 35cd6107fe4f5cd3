//! In-memory structured audit trail of engine runs.
//!
//! Entries are grouped by scope: one scope per rule id, plus [`ENGINE_SCOPE`]
//! for run-level events (snapshot, clustering, merge, commit). Each scope is
//! capped (default 500) with FIFO eviction. Entries survive across runs of
//! the same [`Engine`](crate::Engine), so the CLI and tests can inspect the
//! history after a run returns.

use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Scope used for run-level entries.
pub const ENGINE_SCOPE: &str = "engine";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Stage of a run that produced the entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Snapshot,
    Clustering,
    Dispatch,
    Evaluation,
    Timeout,
    Merge,
    Commit,
    Complete,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    pub scope: String,
    pub level: LogLevel,
    pub phase: RunPhase,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Filters for [`AuditLog::query`]. All fields are optional.
#[derive(Debug, Default, Deserialize)]
pub struct LogQueryParams {
    /// Minimum level, inclusive.
    pub level: Option<LogLevel>,
    pub phase: Option<RunPhase>,
    pub run_id: Option<Uuid>,
    /// Default 100.
    pub limit: Option<u32>,
    pub since: Option<DateTime<Utc>>,
}

pub struct AuditLog {
    entries: RwLock<HashMap<String, VecDeque<LogEntry>>>,
    max_entries_per_scope: usize,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::with_max_entries(500)
    }

    /// `max == 0` disables the log: nothing is recorded.
    pub fn with_max_entries(max: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries_per_scope: max,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_entries_per_scope > 0
    }

    pub fn log(
        &self,
        run_id: Uuid,
        scope: &str,
        level: LogLevel,
        phase: RunPhase,
        message: impl Into<String>,
    ) {
        self.log_with_details(run_id, scope, level, phase, message, None, None);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_with_details(
        &self,
        run_id: Uuid,
        scope: &str,
        level: LogLevel,
        phase: RunPhase,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
        duration_ms: Option<u64>,
    ) {
        if !self.is_enabled() {
            return;
        }
        let entry = LogEntry {
            timestamp: Utc::now(),
            run_id,
            scope: scope.to_string(),
            level,
            phase,
            message: message.into(),
            details,
            duration_ms,
        };

        // A panicking writer cannot leave a deque half-updated, so a
        // poisoned lock is still usable.
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let deque = guard.entry(entry.scope.clone()).or_default();
        deque.push_back(entry);
        while deque.len() > self.max_entries_per_scope {
            deque.pop_front();
        }
    }

    /// Entries for one scope, newest first.
    pub fn query(&self, scope: &str, params: &LogQueryParams) -> Vec<LogEntry> {
        let guard = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let Some(deque) = guard.get(scope) else {
            return Vec::new();
        };

        let min_level = params.level.unwrap_or(LogLevel::Debug);
        let limit = params.limit.unwrap_or(100) as usize;

        deque
            .iter()
            .rev()
            .filter(|e| e.level >= min_level)
            .filter(|e| params.phase.map_or(true, |p| e.phase == p))
            .filter(|e| params.run_id.map_or(true, |id| e.run_id == id))
            .filter(|e| params.since.map_or(true, |s| e.timestamp >= s))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Scopes with at least one entry, sorted.
    pub fn scopes(&self) -> Vec<String> {
        let guard = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut scopes: Vec<String> = guard.keys().cloned().collect();
        scopes.sort();
        scopes
    }

    pub fn clear(&self, scope: &str) {
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        guard.remove(scope);
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all() -> LogQueryParams {
        LogQueryParams::default()
    }

    #[test]
    fn entries_come_back_newest_first() {
        let log = AuditLog::new();
        let run = Uuid::new_v4();
        log.log(run, "debarment", LogLevel::Info, RunPhase::Dispatch, "started");
        log.log(run, "debarment", LogLevel::Info, RunPhase::Evaluation, "2 candidates");
        log.log(run, "debarment", LogLevel::Warning, RunPhase::Merge, "late");

        let entries = log.query("debarment", &all());
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].phase, RunPhase::Merge);
        assert_eq!(entries[2].phase, RunPhase::Dispatch);
    }

    #[test]
    fn level_phase_and_run_filters() {
        let log = AuditLog::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        log.log(a, ENGINE_SCOPE, LogLevel::Debug, RunPhase::Snapshot, "loaded");
        log.log(a, ENGINE_SCOPE, LogLevel::Error, RunPhase::Commit, "disk full");
        log.log(b, ENGINE_SCOPE, LogLevel::Info, RunPhase::Commit, "committed");

        let errors = log.query(
            ENGINE_SCOPE,
            &LogQueryParams {
                level: Some(LogLevel::Warning),
                ..all()
            },
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "disk full");

        let commits = log.query(
            ENGINE_SCOPE,
            &LogQueryParams {
                phase: Some(RunPhase::Commit),
                ..all()
            },
        );
        assert_eq!(commits.len(), 2);

        let run_b = log.query(
            ENGINE_SCOPE,
            &LogQueryParams {
                run_id: Some(b),
                ..all()
            },
        );
        assert_eq!(run_b.len(), 1);
    }

    #[test]
    fn fifo_eviction_per_scope() {
        let log = AuditLog::with_max_entries(3);
        let run = Uuid::new_v4();
        for i in 1..=4 {
            log.log(run, "r1", LogLevel::Info, RunPhase::Evaluation, format!("msg {i}"));
        }
        log.log(run, "r2", LogLevel::Info, RunPhase::Evaluation, "other");

        let entries = log.query("r1", &all());
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "msg 4");
        assert_eq!(entries[2].message, "msg 2");
        assert_eq!(log.query("r2", &all()).len(), 1);
        assert_eq!(log.scopes(), vec!["r1".to_string(), "r2".to_string()]);
    }

    #[test]
    fn zero_capacity_records_nothing() {
        let log = AuditLog::with_max_entries(0);
        assert!(!log.is_enabled());
        log.log(Uuid::new_v4(), ENGINE_SCOPE, LogLevel::Error, RunPhase::Commit, "dropped");
        assert!(log.query(ENGINE_SCOPE, &all()).is_empty());
        assert!(log.scopes().is_empty());
    }

    #[test]
    fn details_and_duration_are_kept() {
        let log = AuditLog::new();
        let details = serde_json::json!({"candidates": 4});
        log.log_with_details(
            Uuid::new_v4(),
            "ghost-vendors",
            LogLevel::Info,
            RunPhase::Evaluation,
            "finished",
            Some(details.clone()),
            Some(12),
        );
        let entries = log.query("ghost-vendors", &all());
        assert_eq!(entries[0].details, Some(details));
        assert_eq!(entries[0].duration_ms, Some(12));
        log.clear("ghost-vendors");
        assert!(log.query("ghost-vendors", &all()).is_empty());
    }
}
