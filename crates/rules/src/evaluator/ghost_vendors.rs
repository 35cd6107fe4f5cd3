//! Ghost vendors: payments to vendor ids missing from the active registry.

use std::collections::BTreeMap;

use fraudit_core::{CandidateAlert, EvidenceRef, Payment, RuleError, RuleId, Severity};

use super::{money, EvalContext, RuleEvaluator};

pub struct GhostVendors;

impl RuleEvaluator for GhostVendors {
    fn id(&self) -> RuleId {
        RuleId::GhostVendors
    }

    fn description(&self) -> &'static str {
        "Payments to vendors absent from the active vendor registry"
    }

    fn default_severity(&self) -> Severity {
        Severity::Medium
    }

    fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<Vec<CandidateAlert>, RuleError> {
        let snapshot = ctx.snapshot;
        let min_total = ctx.thresholds().ghost_vendor_min_total;

        let mut orphans: BTreeMap<&str, Vec<&Payment>> = BTreeMap::new();
        for p in snapshot.payments() {
            if !snapshot.is_active(&p.vendor_id) {
                orphans.entry(p.vendor_id.as_str()).or_default().push(p);
            }
        }

        let mut alerts = Vec::new();
        for (vendor_id, payments) in orphans {
            let total: f64 = payments.iter().map(|p| p.amount).sum();
            if total < min_total {
                continue;
            }
            let status = match snapshot.vendor(vendor_id) {
                Some(v) => format!("'{}' is registered but inactive", v.canonical_name),
                None => "is not in the vendor registry".to_string(),
            };
            let severity = if total >= 100_000.0 {
                Severity::High
            } else {
                Severity::Medium
            };
            let explanation = format!(
                "Vendor {vendor_id} {status}; {} payment(s) totalling {}",
                payments.len(),
                money(total)
            );
            alerts.push(
                CandidateAlert::new(
                    RuleId::GhostVendors,
                    severity,
                    [EvidenceRef::vendor(vendor_id)],
                    explanation,
                )
                .with_context(payments.iter().map(|p| EvidenceRef::payment(&p.id))),
            );
        }

        Ok(alerts)
    }
}
