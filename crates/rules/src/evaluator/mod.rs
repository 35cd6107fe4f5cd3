//! Rule evaluators: one pure detector per fraud pattern.
//!
//! Each evaluator reads the run's [`EvalContext`] (snapshot, config, vendor
//! clusters, related-party graph) and returns candidate alerts. Evaluators
//! never see each other's output and never touch the alert store.

mod contract_splitting;
mod debarment;
mod duplicate_payments;
mod employee_vendor;
mod fiscal_year_rush;
mod ghost_vendors;
mod pay_to_play;
mod payment_anomalies;
mod related_party_network;
mod vendor_clustering;

use std::sync::Arc;

use fraudit_compute::{ClusterSet, RelatedPartyGraph};
use fraudit_core::{CandidateAlert, EngineConfig, RuleError, RuleId, Severity, Snapshot, Thresholds};
use serde::Serialize;

pub use contract_splitting::ContractSplitting;
pub use debarment::Debarment;
pub use duplicate_payments::DuplicatePayments;
pub use employee_vendor::EmployeeVendor;
pub use fiscal_year_rush::FiscalYearRush;
pub use ghost_vendors::GhostVendors;
pub use pay_to_play::PayToPlay;
pub use payment_anomalies::PaymentAnomalies;
pub use related_party_network::RelatedPartyNetwork;
pub use vendor_clustering::VendorClustering;

/// Read-only inputs shared by every evaluator in a run.
pub struct EvalContext<'a> {
    pub snapshot: &'a Snapshot,
    pub config: &'a EngineConfig,
    pub clusters: &'a ClusterSet,
    pub related: &'a RelatedPartyGraph,
}

impl EvalContext<'_> {
    pub fn thresholds(&self) -> &Thresholds {
        self.config.thresholds()
    }
}

/// A fraud-pattern detector.
pub trait RuleEvaluator: Send + Sync {
    fn id(&self) -> RuleId;

    /// One-line description for `list_rules`.
    fn description(&self) -> &'static str;

    fn default_severity(&self) -> Severity;

    /// Evaluate over one snapshot. Malformed input the rule cannot work
    /// around is an error, which isolates this rule for the run.
    fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<Vec<CandidateAlert>, RuleError>;
}

/// Catalogue entry returned by `list_rules`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleInfo {
    pub id: RuleId,
    pub description: String,
    pub default_severity: Severity,
}

impl RuleInfo {
    pub fn of(evaluator: &dyn RuleEvaluator) -> Self {
        Self {
            id: evaluator.id(),
            description: evaluator.description().to_string(),
            default_severity: evaluator.default_severity(),
        }
    }
}

pub fn evaluator_for(id: RuleId) -> Arc<dyn RuleEvaluator> {
    match id {
        RuleId::Debarment => Arc::new(Debarment),
        RuleId::ContractSplitting => Arc::new(ContractSplitting),
        RuleId::DuplicatePayments => Arc::new(DuplicatePayments),
        RuleId::VendorClustering => Arc::new(VendorClustering),
        RuleId::GhostVendors => Arc::new(GhostVendors),
        RuleId::EmployeeVendor => Arc::new(EmployeeVendor),
        RuleId::PayToPlay => Arc::new(PayToPlay),
        RuleId::FiscalYearRush => Arc::new(FiscalYearRush),
        RuleId::RelatedPartyNetwork => Arc::new(RelatedPartyNetwork),
        RuleId::PaymentAnomalies => Arc::new(PaymentAnomalies),
    }
}

/// All built-in evaluators, in rule order.
pub fn builtin_evaluators() -> Vec<Arc<dyn RuleEvaluator>> {
    RuleId::ALL.into_iter().map(evaluator_for).collect()
}

/// Format a dollar amount as `$1,234,567.89`.
pub(crate) fn money(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if amount < 0.0 { "-" } else { "" };
    format!("{sign}${grouped}.{:02}", cents % 100)
}

/// Person names need at least a first and last name to identify anyone.
pub(crate) fn is_full_person_name(name: &str) -> bool {
    name.split_whitespace().count() >= 2
}

/// Surname used to block person-name comparisons.
pub(crate) fn surname(name: &str) -> &str {
    name.split_whitespace().last().unwrap_or("")
}
