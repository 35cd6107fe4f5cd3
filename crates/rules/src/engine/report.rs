//! Run results as returned to callers.

use std::fmt;

use chrono::{DateTime, Utc};
use fraudit_core::RuleId;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RuleOutcome {
    Succeeded { alerts: usize },
    Failed { reason: String },
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleStatus {
    pub rule: RuleId,
    #[serde(flatten)]
    pub outcome: RuleOutcome,
    pub duration_ms: u64,
}

impl RuleStatus {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, RuleOutcome::Succeeded { .. })
    }
}

/// Outcome of one committed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub watermark: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub alerts_created: usize,
    pub alerts_updated: usize,
    /// One entry per selected rule, in rule order.
    pub per_rule_status: Vec<RuleStatus>,
    /// Non-fatal problems: rule failures and skipped clustering buckets.
    pub errors: Vec<String>,
    /// Records normalized with low confidence.
    pub normalization_warnings: usize,
}

impl RunResult {
    pub fn status_of(&self, rule: RuleId) -> Option<&RuleStatus> {
        self.per_rule_status.iter().find(|s| s.rule == rule)
    }

    pub fn failed_rules(&self) -> Vec<RuleId> {
        self.per_rule_status
            .iter()
            .filter(|s| !s.succeeded())
            .map(|s| s.rule)
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.per_rule_status.iter().all(RuleStatus::succeeded)
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elapsed = (self.finished_at - self.started_at).num_milliseconds();
        writeln!(
            f,
            "run {} on watermark {} ({} ms): {} created, {} updated",
            self.run_id, self.watermark, elapsed, self.alerts_created, self.alerts_updated
        )?;
        for s in &self.per_rule_status {
            match &s.outcome {
                RuleOutcome::Succeeded { alerts } => {
                    writeln!(f, "  {:<20} ok       {:>5} candidate(s)  {} ms", s.rule, alerts, s.duration_ms)?
                }
                RuleOutcome::Failed { reason } => {
                    writeln!(f, "  {:<20} FAILED   {}", s.rule, reason)?
                }
                RuleOutcome::TimedOut => {
                    writeln!(f, "  {:<20} TIMEOUT  after {} ms", s.rule, s.duration_ms)?
                }
            }
        }
        if self.normalization_warnings > 0 {
            writeln!(f, "  {} low-confidence normalization(s)", self.normalization_warnings)?;
        }
        for e in &self.errors {
            writeln!(f, "  error: {e}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> RunResult {
        let now = Utc::now();
        RunResult {
            run_id: Uuid::nil(),
            watermark: "w1".into(),
            started_at: now,
            finished_at: now,
            alerts_created: 2,
            alerts_updated: 0,
            per_rule_status: vec![
                RuleStatus {
                    rule: RuleId::Debarment,
                    outcome: RuleOutcome::Succeeded { alerts: 2 },
                    duration_ms: 3,
                },
                RuleStatus {
                    rule: RuleId::EmployeeVendor,
                    outcome: RuleOutcome::Failed {
                        reason: "bad record".into(),
                    },
                    duration_ms: 1,
                },
            ],
            errors: vec!["employee-vendor: bad record".into()],
            normalization_warnings: 0,
        }
    }

    #[test]
    fn summary_lists_every_rule_and_failure() {
        let r = result();
        let text = r.to_string();
        assert!(text.contains("2 created"));
        assert!(text.contains("debarment"));
        assert!(text.contains("FAILED   bad record"));
        assert_eq!(r.failed_rules(), vec![RuleId::EmployeeVendor]);
        assert!(!r.is_clean());
    }

    #[test]
    fn status_serializes_flat() {
        let json = serde_json::to_value(&result().per_rule_status[0]).unwrap();
        assert_eq!(json["rule"], "debarment");
        assert_eq!(json["status"], "succeeded");
        assert_eq!(json["alerts"], 2);
    }
}
