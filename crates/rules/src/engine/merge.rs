//! Candidate merge and cross-run deduplication.
//!
//! Candidates sharing a primary key become one composite alert carrying
//! every contributing rule. A composite is then checked against the open
//! alerts already stored under the same key: rules those alerts already
//! cover only extend their evidence, and any remaining rules form a new
//! alert. Dismissed and confirmed alerts never absorb new findings.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use fraudit_core::{Alert, AlertStatus, CandidateAlert, EvidenceRef, RuleId, Severity};
use indexmap::{IndexMap, IndexSet};
use uuid::Uuid;

use crate::store::AlertChangeSet;

/// Build a new alert from candidates that share one primary key.
fn composite(key: &str, candidates: &[&CandidateAlert], now: DateTime<Utc>) -> Alert {
    let mut rule_ids: Vec<RuleId> = candidates.iter().map(|c| c.rule_id).collect();
    rule_ids.sort();
    rule_ids.dedup();

    // Max of the contributing severities.
    let severity = candidates
        .iter()
        .map(|c| c.severity)
        .max()
        .unwrap_or(Severity::Low);

    let evidence: IndexSet<EvidenceRef> = candidates
        .iter()
        .flat_map(|c| c.evidence_refs.iter().cloned())
        .collect();

    Alert {
        id: Uuid::new_v4(),
        rule_ids,
        primary_key: key.to_string(),
        severity,
        status: AlertStatus::Open,
        evidence: evidence.into_iter().collect(),
        explanations: candidates
            .iter()
            .map(|c| format!("[{}] {}", c.rule_id, c.explanation))
            .collect(),
        created_at: now,
        updated_at: now,
    }
}

/// Decide what one run persists. `existing` is the full stored alert set,
/// in creation order.
pub fn merge(candidates: &[CandidateAlert], existing: &[Alert], now: DateTime<Utc>) -> AlertChangeSet {
    let mut sorted: Vec<&CandidateAlert> = candidates.iter().collect();
    sorted.sort_by(|a, b| {
        a.rule_id
            .cmp(&b.rule_id)
            .then_with(|| a.primary_key.cmp(&b.primary_key))
            .then_with(|| a.evidence_refs.cmp(&b.evidence_refs))
    });

    let mut by_key: BTreeMap<&str, Vec<&CandidateAlert>> = BTreeMap::new();
    for c in sorted {
        by_key.entry(c.primary_key.as_str()).or_default().push(c);
    }

    let mut open_by_key: BTreeMap<&str, Vec<&Alert>> = BTreeMap::new();
    for a in existing.iter().filter(|a| a.is_open()) {
        open_by_key.entry(a.primary_key.as_str()).or_default().push(a);
    }

    let mut changes = AlertChangeSet::default();
    let mut touched: IndexMap<Uuid, Alert> = IndexMap::new();

    for (key, group) in by_key {
        let open = open_by_key.get(key).map(Vec::as_slice).unwrap_or(&[]);

        let mut fresh: Vec<&CandidateAlert> = Vec::new();
        for c in group {
            // Oldest open alert that already carries this rule.
            let Some(owner) = open.iter().find(|a| a.rule_ids.contains(&c.rule_id)) else {
                fresh.push(c);
                continue;
            };
            let alert = touched
                .entry(owner.id)
                .or_insert_with(|| (*owner).clone());
            alert.extend_evidence(&c.evidence_refs, now);
        }

        if !fresh.is_empty() {
            changes.created.push(composite(key, &fresh, now));
        }
    }

    // Only alerts whose evidence actually grew are written back.
    changes.updated = touched
        .into_values()
        .filter(|a| existing.iter().any(|e| e.id == a.id && e.evidence != a.evidence))
        .collect();
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(rule: RuleId, severity: Severity, primary: &[EvidenceRef], context: &[EvidenceRef]) -> CandidateAlert {
        CandidateAlert::new(rule, severity, primary.iter().cloned(), format!("{rule} finding"))
            .with_context(context.iter().cloned())
    }

    fn split_and_dup() -> Vec<CandidateAlert> {
        let primary = [
            EvidenceRef::vendor("V1"),
            EvidenceRef::payment("P1"),
            EvidenceRef::payment("P2"),
        ];
        vec![
            candidate(RuleId::DuplicatePayments, Severity::Low, &primary, &[]),
            candidate(
                RuleId::ContractSplitting,
                Severity::High,
                &primary,
                &[EvidenceRef::agency("DOT")],
            ),
        ]
    }

    #[test]
    fn shared_key_becomes_one_composite() {
        let changes = merge(&split_and_dup(), &[], Utc::now());
        assert_eq!(changes.created.len(), 1);
        let alert = &changes.created[0];
        assert_eq!(alert.rule_ids, vec![RuleId::ContractSplitting, RuleId::DuplicatePayments]);
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.evidence.len(), 4);
        assert_eq!(alert.evidence.last(), Some(&EvidenceRef::agency("DOT")));
        assert_eq!(alert.explanations.len(), 2);
    }

    #[test]
    fn distinct_keys_stay_separate() {
        let candidates = vec![
            candidate(RuleId::GhostVendors, Severity::Medium, &[EvidenceRef::vendor("V1")], &[]),
            candidate(RuleId::GhostVendors, Severity::Medium, &[EvidenceRef::vendor("V2")], &[]),
        ];
        let changes = merge(&candidates, &[], Utc::now());
        assert_eq!(changes.created.len(), 2);
        assert_eq!(changes.created[0].primary_key, "vendor:V1");
    }

    #[test]
    fn rerun_against_open_alert_is_a_no_op() {
        let first = merge(&split_and_dup(), &[], Utc::now());
        let second = merge(&split_and_dup(), &first.created, Utc::now());
        assert!(second.is_empty());
    }

    #[test]
    fn new_evidence_extends_the_open_alert() {
        let first = merge(&split_and_dup(), &[], Utc::now());
        let mut again = split_and_dup();
        again[0] = again[0].clone().with_context([EvidenceRef::payment("P9")]);
        let second = merge(&again, &first.created, Utc::now());
        assert!(second.created.is_empty());
        assert_eq!(second.updated.len(), 1);
        assert_eq!(second.updated[0].id, first.created[0].id);
        assert_eq!(second.updated[0].evidence.last(), Some(&EvidenceRef::payment("P9")));
    }

    #[test]
    fn uncovered_rule_raises_a_new_alert() {
        let dup_only = vec![split_and_dup().remove(0)];
        let first = merge(&dup_only, &[], Utc::now());
        let second = merge(&split_and_dup(), &first.created, Utc::now());
        assert_eq!(second.created.len(), 1);
        assert_eq!(second.created[0].rule_ids, vec![RuleId::ContractSplitting]);
        assert!(second.updated.is_empty());
    }

    #[test]
    fn dismissed_alerts_do_not_dedupe() {
        let mut first = merge(&split_and_dup(), &[], Utc::now()).created;
        first[0].status = AlertStatus::Dismissed;
        let second = merge(&split_and_dup(), &first, Utc::now());
        assert_eq!(second.created.len(), 1);
        assert_ne!(second.created[0].id, first[0].id);
    }

    #[test]
    fn candidate_order_does_not_change_the_result() {
        let mut reversed = split_and_dup();
        reversed.reverse();
        let a = merge(&split_and_dup(), &[], Utc::now()).created;
        let b = merge(&reversed, &[], Utc::now()).created;
        assert_eq!(a[0].rule_ids, b[0].rule_ids);
        assert_eq!(a[0].evidence, b[0].evidence);
        assert_eq!(a[0].explanations, b[0].explanations);
    }
}
