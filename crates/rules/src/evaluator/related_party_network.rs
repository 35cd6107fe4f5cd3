//! Related-party networks: vendors tied together by ownership links and
//! name clusters whose combined payments are large.
//!
//! A network is a connected component over both kinds of link. Networks
//! that mix ownership with name clusters rank higher than either alone.

use std::collections::BTreeSet;

use fraudit_compute::VendorCluster;
use fraudit_core::{CandidateAlert, EntityKind, EvidenceRef, RuleError, RuleId, Severity};

use super::{money, EvalContext, RuleEvaluator};

pub struct RelatedPartyNetwork;

impl RuleEvaluator for RelatedPartyNetwork {
    fn id(&self) -> RuleId {
        RuleId::RelatedPartyNetwork
    }

    fn description(&self) -> &'static str {
        "Networks of vendors linked by ownership or name clusters with large combined payments"
    }

    fn default_severity(&self) -> Severity {
        Severity::Medium
    }

    fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<Vec<CandidateAlert>, RuleError> {
        let snapshot = ctx.snapshot;
        let t = ctx.thresholds();
        let clusters = ctx.clusters.clusters();
        let networks = ctx
            .related
            .components(clusters.iter().map(|c| c.members.as_slice()));

        let mut alerts = Vec::new();
        for members in networks {
            if members.len() < t.related_party_min_network_size as usize {
                continue;
            }
            let total: f64 = members
                .iter()
                .flat_map(|id| snapshot.payments_for_vendor(id))
                .map(|p| p.amount)
                .sum();
            if total < t.related_party_min_total {
                continue;
            }

            let member_set: BTreeSet<&str> = members.iter().map(String::as_str).collect();
            let ownership = ctx.related.links_within(&member_set);
            // Components absorb whole clusters, so one member decides.
            let inner: Vec<&VendorCluster> = clusters
                .iter()
                .filter(|c| c.members.first().is_some_and(|m| member_set.contains(m.as_str())))
                .collect();

            let mixed = ownership > 0 && !inner.is_empty();
            let severity = if members.len() >= 5 || total >= 2_000_000.0 || mixed {
                Severity::High
            } else {
                Severity::Medium
            };
            let explanation = format!(
                "Network of {} related vendors ({} ownership link(s), {} name cluster(s)) received {} combined: {}",
                members.len(),
                ownership,
                inner.len(),
                money(total),
                members.join(", ")
            );

            alerts.push(
                CandidateAlert::new(
                    RuleId::RelatedPartyNetwork,
                    severity,
                    members.iter().map(EvidenceRef::vendor),
                    explanation,
                )
                .with_context(
                    inner
                        .iter()
                        .map(|c| EvidenceRef::new(EntityKind::Cluster, &c.cluster_id)),
                ),
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

    const ADDR: &str = "9 Depot Rd, Waco, TX 76701";

    fn holding(owned: &[&str]) -> VendorRecord {
        let mut v = vendor("V1", "Summit Holdings");
        v.owned_vendor_ids = owned.iter().map(|s| s.to_string()).collect();
        v
    }

    fn at_depot(id: &str, name: &str) -> VendorRecord {
        let mut v = vendor(id, name);
        v.address = Some(ADDR.into());
        v
    }

    #[test]
    fn owned_vendors_with_large_payments_form_a_network() {
        let records = SnapshotRecords {
            vendors: vec![
                holding(&["V2", "V3"]),
                vendor("V2", "Acme Paving"),
                vendor("V3", "Bolt Electric"),
            ],
            payments: vec![
                payment("P1", "V2", 300_000.0, date(2024, 1, 5), "DOT"),
                payment("P2", "V3", 300_000.0, date(2024, 1, 9), "DOT"),
            ],
            ..Default::default()
        };
        let alerts = run_rule(&RelatedPartyNetwork, records, None, &EngineConfig::default()).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].primary_key, "vendor:V1|vendor:V2|vendor:V3");
        assert_eq!(alerts[0].severity, Severity::Medium);
        assert!(alerts[0].explanation.contains("2 ownership link(s), 0 name cluster(s)"));
    }

    #[test]
    fn small_or_cheap_networks_are_ignored() {
        let cheap = SnapshotRecords {
            vendors: vec![
                holding(&["V2", "V3"]),
                vendor("V2", "Acme Paving"),
                vendor("V3", "Bolt Electric"),
            ],
            payments: vec![payment("P1", "V2", 400_000.0, date(2024, 1, 5), "DOT")],
            ..Default::default()
        };
        assert!(run_rule(&RelatedPartyNetwork, cheap, None, &EngineConfig::default())
            .unwrap()
            .is_empty());

        let pair = SnapshotRecords {
            vendors: vec![holding(&["V2"]), vendor("V2", "Acme Paving")],
            payments: vec![payment("P1", "V2", 900_000.0, date(2024, 1, 5), "DOT")],
            ..Default::default()
        };
        assert!(run_rule(&RelatedPartyNetwork, pair, None, &EngineConfig::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn ownership_and_name_cluster_together_rank_high() {
        let records = SnapshotRecords {
            vendors: vec![
                holding(&["V2"]),
                at_depot("V2", "Acme Paving LLC"),
                at_depot("V3", "Acme Paving Inc"),
            ],
            payments: vec![
                payment("P1", "V2", 250_000.0, date(2024, 1, 5), "DOT"),
                payment("P2", "V3", 250_000.0, date(2024, 1, 9), "HHS"),
            ],
            ..Default::default()
        };
        let alerts = run_rule(&RelatedPartyNetwork, records, None, &EngineConfig::default()).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::High);
        assert!(alerts[0]
            .evidence_refs
            .contains(&EvidenceRef::new(EntityKind::Cluster, "C-V2")));
    }
}
