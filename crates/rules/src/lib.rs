//! Fraud-detection rule engine over public-spending records.
//!
//! This crate provides:
//! - Rule evaluators (debarment, contract splitting, duplicate payments,
//!   vendor clustering, ghost vendors, employee-vendor, pay-to-play,
//!   fiscal-year rush, related-party networks, payment anomalies)
//! - The run orchestrator: snapshot, parallel dispatch with per-rule timeouts,
//!   merge and deduplication, single-commit persistence
//! - Snapshot sources and alert stores (in-memory and JSON on disk)
//! - A per-run audit log

pub mod audit_log;
pub mod engine;
pub mod evaluator;
pub mod source;
pub mod store;

pub use audit_log::{AuditLog, LogEntry, LogLevel, LogQueryParams, RunPhase};
pub use engine::{merge, parse_rule_ids, Engine, EngineError, RuleOutcome, RuleStatus, RunResult};
pub use evaluator::{builtin_evaluators, evaluator_for, EvalContext, RuleEvaluator, RuleInfo};
pub use source::{JsonDirSource, MemorySource, SnapshotSource, SourceError};
pub use store::{AlertChangeSet, AlertStore, JsonFileAlertStore, MemoryAlertStore, StoreError};
