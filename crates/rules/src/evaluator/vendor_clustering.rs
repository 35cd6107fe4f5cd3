//! Vendor clustering: one business registered several times.
//!
//! A cluster qualifies when at least two of its members hold distinct
//! registration ids and each of those members receives payments of its own.

use std::collections::BTreeSet;

use fraudit_core::{CandidateAlert, EntityKind, EvidenceRef, RuleError, RuleId, Severity};

use super::{money, EvalContext, RuleEvaluator};

pub struct VendorClustering;

impl RuleEvaluator for VendorClustering {
    fn id(&self) -> RuleId {
        RuleId::VendorClustering
    }

    fn description(&self) -> &'static str {
        "Near-identical vendors under distinct registrations that are each paid"
    }

    fn default_severity(&self) -> Severity {
        Severity::Medium
    }

    fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<Vec<CandidateAlert>, RuleError> {
        let snapshot = ctx.snapshot;
        let mut alerts = Vec::new();

        for cluster in ctx.clusters.clusters() {
            let mut paid = Vec::new();
            let mut total = 0.0;
            for id in &cluster.members {
                let received: f64 = snapshot.payments_for_vendor(id).map(|p| p.amount).sum();
                if received > 0.0 {
                    paid.push(id.as_str());
                    total += received;
                }
            }

            let registrations: BTreeSet<&str> = paid
                .iter()
                .filter_map(|id| snapshot.vendor(id))
                .map(|v| v.registration())
                .collect();
            if paid.len() < 2 || registrations.len() < 2 {
                continue;
            }

            let severity = if paid.len() >= 4 || total >= 1_000_000.0 {
                Severity::High
            } else {
                Severity::Medium
            };
            let explanation = format!(
                "Cluster '{}' has {} paid vendors under {} registrations ({} total): {}",
                cluster.representative_name,
                paid.len(),
                registrations.len(),
                money(total),
                paid.join(", ")
            );

            alerts.push(
                CandidateAlert::new(
                    RuleId::VendorClustering,
                    severity,
                    cluster.members.iter().map(EvidenceRef::vendor),
                    explanation,
                )
                .with_context([EvidenceRef::new(EntityKind::Cluster, &cluster.cluster_id)]),
            );
        }

        Ok(alerts)
    }
}

#[cfg(test)]
mod tests {
    use fraudit_core::{EngineConfig, SnapshotRecords, VendorRecord};

    use super::*;
    use crate::evaluator::test_support::*;

    const ADDR: &str = "1 Main St, Austin, TX 78701";

    fn registered(id: &str, name: &str, reg: &str) -> VendorRecord {
        let mut v = vendor(id, name);
        v.address = Some(ADDR.into());
        v.registration_id = Some(reg.into());
        v
    }

    #[test]
    fn paid_members_with_distinct_registrations_flag() {
        let records = SnapshotRecords {
            vendors: vec![
                registered("V1", "Acme Widgets LLC", "R1"),
                registered("V2", "Acme Widget Inc", "R2"),
            ],
            payments: vec![
                payment("P1", "V1", 1_000.0, date(2024, 1, 1), "DOT"),
                payment("P2", "V2", 2_000.0, date(2024, 1, 2), "HHS"),
            ],
            ..Default::default()
        };
        let alerts = run_rule(&VendorClustering, records, None, &EngineConfig::default()).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].primary_key, "vendor:V1|vendor:V2");
        assert_eq!(alerts[0].severity, Severity::Medium);
        assert_eq!(alerts[0].evidence_refs.last().map(|r| r.to_string()).as_deref(), Some("cluster:C-V1"));
    }

    #[test]
    fn unpaid_member_does_not_count() {
        let records = SnapshotRecords {
            vendors: vec![
                registered("V1", "Acme Widgets LLC", "R1"),
                registered("V2", "Acme Widget Inc", "R2"),
            ],
            payments: vec![payment("P1", "V1", 1_000.0, date(2024, 1, 1), "DOT")],
            ..Default::default()
        };
        let alerts = run_rule(&VendorClustering, records, None, &EngineConfig::default()).unwrap();
        assert!(alerts.is_empty());
    }

    #[test]
    fn shared_registration_does_not_flag() {
        let records = SnapshotRecords {
            vendors: vec![
                registered("V1", "Acme Widgets LLC", "R1"),
                registered("V2", "Acme Widget Inc", "R1"),
            ],
            payments: vec![
                payment("P1", "V1", 1_000.0, date(2024, 1, 1), "DOT"),
                payment("P2", "V2", 2_000.0, date(2024, 1, 2), "DOT"),
            ],
            ..Default::default()
        };
        let alerts = run_rule(&VendorClustering, records, None, &EngineConfig::default()).unwrap();
        assert!(alerts.is_empty());
    }
}
