//! Rule orchestration: snapshot, cluster, dispatch, merge, commit.
//!
//! A run reads one immutable snapshot, clusters vendors and builds the
//! related-party graph once, then evaluates the selected rules in parallel.
//! Failed or timed-out rules are reported and left out; everything else is
//! merged and committed to the alert store in a single change set. Only a
//! persistence failure (or cancellation) aborts the run, and then nothing is
//! committed.

mod merge;
mod report;
mod runner;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fraudit_compute::{cluster, ClusterParams, RelatedPartyGraph};
use fraudit_core::{ConfigError, EngineConfig, RuleId};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use merge::merge;
pub use report::{RuleOutcome, RuleStatus, RunResult};

use crate::audit_log::{AuditLog, LogLevel, RunPhase, ENGINE_SCOPE};
use crate::evaluator::{builtin_evaluators, RuleEvaluator, RuleInfo};
use crate::source::{SnapshotSource, SourceError};
use crate::store::{AlertStore, StoreError};
use runner::{JobOutcome, RunInputs};

/// Errors that abort a run. Per-rule failures are not among them; they are
/// reported in [`RunResult::per_rule_status`].
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("snapshot unavailable: {0}")]
    Source(#[from] SourceError),

    #[error("persistence failed, run rolled back: {0}")]
    Persistence(#[from] StoreError),

    #[error("run cancelled, nothing committed")]
    Cancelled,

    #[error("unknown rule '{0}'")]
    UnknownRule(String),

    #[error("worker pool: {0}")]
    WorkerPool(String),
}

/// Parse rule ids, rejecting any name that is not a known rule.
pub fn parse_rule_ids<S: AsRef<str>>(names: &[S]) -> Result<Vec<RuleId>, EngineError> {
    names
        .iter()
        .map(|n| {
            let n = n.as_ref().trim();
            n.parse::<RuleId>()
                .map_err(|_| EngineError::UnknownRule(n.to_string()))
        })
        .collect()
}

pub struct Engine {
    config: Arc<EngineConfig>,
    source: Arc<dyn SnapshotSource>,
    store: Arc<dyn AlertStore>,
    evaluators: Vec<Arc<dyn RuleEvaluator>>,
    audit: Arc<AuditLog>,
    cancel: Arc<AtomicBool>,
}

impl Engine {
    /// Build an engine with the built-in rules. The config is validated
    /// here, before any data is touched.
    pub fn new(
        config: EngineConfig,
        source: Arc<dyn SnapshotSource>,
        store: Arc<dyn AlertStore>,
    ) -> Result<Self, EngineError> {
        let config = config.validated()?;
        let audit = Arc::new(AuditLog::with_max_entries(config.engine.audit_max_entries));
        Ok(Self {
            config: Arc::new(config),
            source,
            store,
            evaluators: builtin_evaluators(),
            audit,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Replace the evaluator set. Evaluators run and report in rule order.
    pub fn with_evaluators(mut self, mut evaluators: Vec<Arc<dyn RuleEvaluator>>) -> Self {
        evaluators.sort_by_key(|e| e.id());
        self.evaluators = evaluators;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn AlertStore> {
        &self.store
    }

    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Flag that cancels the current (or next) run at the next evaluator
    /// boundary. The engine lowers it again once a run has been cancelled.
    pub fn cancel_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// The available rules, in rule order.
    pub fn list_rules(&self) -> Vec<RuleInfo> {
        self.evaluators.iter().map(|e| RuleInfo::of(e.as_ref())).collect()
    }

    /// Run against the latest watermark. `None` runs every rule.
    pub fn run(&self, rules: Option<&[RuleId]>) -> Result<RunResult, EngineError> {
        self.run_at(None, rules)
    }

    /// Run against a named watermark, or the latest one.
    pub fn run_at(
        &self,
        watermark: Option<&str>,
        rules: Option<&[RuleId]>,
    ) -> Result<RunResult, EngineError> {
        let result = self.execute(watermark, rules);
        if matches!(result, Err(EngineError::Cancelled)) {
            self.cancel.store(false, Ordering::SeqCst);
        }
        result
    }

    fn selected(&self, rules: Option<&[RuleId]>) -> Result<Vec<Arc<dyn RuleEvaluator>>, EngineError> {
        let Some(rules) = rules else {
            return Ok(self.evaluators.clone());
        };
        for rule in rules {
            if !self.evaluators.iter().any(|e| e.id() == *rule) {
                return Err(EngineError::UnknownRule(rule.to_string()));
            }
        }
        Ok(self
            .evaluators
            .iter()
            .filter(|e| rules.contains(&e.id()))
            .cloned()
            .collect())
    }

    fn check_cancelled(&self, run_id: Uuid, phase: RunPhase) -> Result<(), EngineError> {
        if self.cancel.load(Ordering::SeqCst) {
            info!(%run_id, ?phase, "run cancelled");
            self.audit
                .log(run_id, ENGINE_SCOPE, LogLevel::Warning, phase, "run cancelled, nothing committed");
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }

    fn execute(
        &self,
        watermark: Option<&str>,
        rules: Option<&[RuleId]>,
    ) -> Result<RunResult, EngineError> {
        let evaluators = self.selected(rules)?;
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let audit = &self.audit;
        self.check_cancelled(run_id, RunPhase::Snapshot)?;

        // ── Snapshot ────────────────────────────────────────────────
        let snapshot = self.source.load(watermark)?;
        info!(
            %run_id,
            watermark = snapshot.watermark(),
            as_of = %snapshot.as_of(),
            vendors = snapshot.vendors().len(),
            payments = snapshot.payments().len(),
            rules = evaluators.len(),
            "run started"
        );
        for w in snapshot.warnings() {
            debug!(%run_id, "low-confidence normalization: {w}");
        }
        audit.log_with_details(
            run_id,
            ENGINE_SCOPE,
            LogLevel::Info,
            RunPhase::Snapshot,
            format!("snapshot {} as of {}", snapshot.watermark(), snapshot.as_of()),
            Some(serde_json::json!({
                "vendors": snapshot.vendors().len(),
                "payments": snapshot.payments().len(),
                "contracts": snapshot.contracts().len(),
                "employees": snapshot.employees().len(),
                "exclusions": snapshot.exclusions().len(),
                "contributions": snapshot.contributions().len(),
                "warnings": snapshot.warnings().len(),
            })),
            None,
        );

        // ── Clustering ──────────────────────────────────────────────
        let t = self.config.thresholds();
        let clusters = cluster(
            snapshot.vendors(),
            &ClusterParams {
                name_threshold: t.vendor_name_similarity,
                min_corroboration: t.min_corroboration,
                max_bucket_size: self.config.engine.max_bucket_size,
            },
        );
        let related = RelatedPartyGraph::from_vendors(snapshot.vendors());
        let mut errors: Vec<String> = Vec::new();
        for e in clusters.errors() {
            warn!(%run_id, bucket = %e.bucket, size = e.size, "clustering bucket skipped: {}", e.reason);
            audit.log(run_id, ENGINE_SCOPE, LogLevel::Warning, RunPhase::Clustering, e.to_string());
            errors.push(format!("clustering: {e}"));
        }
        audit.log(
            run_id,
            ENGINE_SCOPE,
            LogLevel::Info,
            RunPhase::Clustering,
            format!(
                "{} cluster(s), {} ownership edge(s)",
                clusters.clusters().len(),
                related.edge_count()
            ),
        );
        self.check_cancelled(run_id, RunPhase::Dispatch)?;

        // ── Dispatch ────────────────────────────────────────────────
        let watermark = snapshot.watermark().to_string();
        let normalization_warnings = snapshot.warnings().len();
        let inputs = Arc::new(RunInputs {
            snapshot,
            config: Arc::clone(&self.config),
            clusters,
            related,
        });
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.engine.resolved_worker_threads())
            .thread_name(|i| format!("fraudit-rule-{i}"))
            .build()
            .map_err(|e| EngineError::WorkerPool(e.to_string()))?;
        let timeout = Duration::from_secs(self.config.engine.rule_timeout_seconds);

        let reports = runner::dispatch(&pool, &evaluators, inputs, timeout, &self.cancel)
            .map_err(|_| {
                audit.log(
                    run_id,
                    ENGINE_SCOPE,
                    LogLevel::Warning,
                    RunPhase::Dispatch,
                    "run cancelled, nothing committed",
                );
                EngineError::Cancelled
            })?;

        let mut candidates = Vec::new();
        let mut per_rule_status = Vec::with_capacity(reports.len());
        for report in reports {
            let rule = report.rule;
            let duration_ms = report.duration.as_millis() as u64;
            let outcome = match report.outcome {
                JobOutcome::Finished(Ok(found)) => {
                    info!(%run_id, rule_id = %rule, candidates = found.len(), duration_ms, "rule finished");
                    audit.log_with_details(
                        run_id,
                        rule.as_str(),
                        LogLevel::Info,
                        RunPhase::Evaluation,
                        format!("{} candidate(s)", found.len()),
                        None,
                        Some(duration_ms),
                    );
                    let alerts = found.len();
                    candidates.extend(found);
                    RuleOutcome::Succeeded { alerts }
                }
                JobOutcome::Finished(Err(e)) => {
                    error!(%run_id, rule_id = %rule, "rule failed: {e}");
                    audit.log(run_id, rule.as_str(), LogLevel::Error, RunPhase::Evaluation, e.to_string());
                    errors.push(e.to_string());
                    RuleOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
                JobOutcome::TimedOut => {
                    let e = fraudit_core::RuleError::Timeout {
                        rule,
                        seconds: timeout.as_secs(),
                    };
                    audit.log(run_id, rule.as_str(), LogLevel::Error, RunPhase::Timeout, e.to_string());
                    errors.push(e.to_string());
                    RuleOutcome::TimedOut
                }
            };
            per_rule_status.push(RuleStatus {
                rule,
                outcome,
                duration_ms,
            });
        }
        self.check_cancelled(run_id, RunPhase::Merge)?;

        // ── Merge ───────────────────────────────────────────────────
        let existing = self.store.load_all().map_err(|e| self.persistence_failed(run_id, e))?;
        let now = Utc::now();
        let changes = merge(&candidates, &existing, now);
        audit.log(
            run_id,
            ENGINE_SCOPE,
            LogLevel::Info,
            RunPhase::Merge,
            format!(
                "{} candidate(s) -> {} new, {} updated",
                candidates.len(),
                changes.created.len(),
                changes.updated.len()
            ),
        );
        self.check_cancelled(run_id, RunPhase::Commit)?;

        // ── Commit ──────────────────────────────────────────────────
        if !changes.is_empty() {
            self.store
                .commit(&changes)
                .map_err(|e| self.persistence_failed(run_id, e))?;
        }
        audit.log(run_id, ENGINE_SCOPE, LogLevel::Info, RunPhase::Commit, "committed");

        let result = RunResult {
            run_id,
            watermark,
            started_at,
            finished_at: Utc::now(),
            alerts_created: changes.created.len(),
            alerts_updated: changes.updated.len(),
            per_rule_status,
            errors,
            normalization_warnings,
        };
        info!(
            %run_id,
            created = result.alerts_created,
            updated = result.alerts_updated,
            failed = result.failed_rules().len(),
            "run complete"
        );
        audit.log_with_details(
            run_id,
            ENGINE_SCOPE,
            LogLevel::Info,
            RunPhase::Complete,
            "run complete",
            serde_json::to_value(&result).ok(),
            Some((result.finished_at - result.started_at).num_milliseconds().max(0) as u64),
        );
        Ok(result)
    }

    fn persistence_failed(&self, run_id: Uuid, e: StoreError) -> EngineError {
        error!(%run_id, "persistence failed, rolling back run: {e}");
        self.audit
            .log(run_id, ENGINE_SCOPE, LogLevel::Error, RunPhase::Commit, e.to_string());
        EngineError::Persistence(e)
    }
}
