//! Duplicate payments: the same amount paid to the same vendor more than
//! once within a short window.
//!
//! Payments are grouped by (vendor, amount in cents). Inside a group,
//! consecutive payments no more than `duplicate_payment_window_days` apart
//! are chained; every chain of two or more is one alert.

use std::collections::BTreeMap;

use fraudit_core::{CandidateAlert, EvidenceRef, Payment, RuleError, RuleId, Severity};

use super::{money, EvalContext, RuleEvaluator};

pub struct DuplicatePayments;

fn severity_for(count: usize, amount: f64) -> Severity {
    if count >= 5 || amount >= 50_000.0 {
        Severity::High
    } else if count >= 3 || amount >= 10_000.0 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

impl RuleEvaluator for DuplicatePayments {
    fn id(&self) -> RuleId {
        RuleId::DuplicatePayments
    }

    fn description(&self) -> &'static str {
        "Same amount paid to the same vendor more than once within a short window"
    }

    fn default_severity(&self) -> Severity {
        Severity::Medium
    }

    fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<Vec<CandidateAlert>, RuleError> {
        let t = ctx.thresholds();
        let window = t.duplicate_payment_window_days as i64;

        let mut groups: BTreeMap<(&str, i64), Vec<&Payment>> = BTreeMap::new();
        for p in ctx.snapshot.payments() {
            if p.amount > t.duplicate_payment_min_amount {
                groups
                    .entry((p.vendor_id.as_str(), p.amount_cents()))
                    .or_default()
                    .push(p);
            }
        }

        let mut alerts = Vec::new();
        for ((vendor_id, _), payments) in groups {
            let mut chains: Vec<Vec<&Payment>> = Vec::new();
            for p in payments {
                match chains.last_mut() {
                    Some(chain)
                        if chain
                            .last()
                            .is_some_and(|prev| (p.date - prev.date).num_days() <= window) =>
                    {
                        chain.push(p)
                    }
                    _ => chains.push(vec![p]),
                }
            }

            for chain in chains.into_iter().filter(|c| c.len() >= 2) {
                let amount = chain[0].amount;
                let first = chain[0].date;
                let last = chain[chain.len() - 1].date;
                let agencies: Vec<&str> = {
                    let mut a: Vec<&str> = chain.iter().map(|p| p.agency.as_str()).collect();
                    a.sort_unstable();
                    a.dedup();
                    a
                };
                let explanation = format!(
                    "{} payments of {} to vendor {} between {} and {} ({})",
                    chain.len(),
                    money(amount),
                    vendor_id,
                    first,
                    last,
                    agencies.join(", ")
                );
                let primary = std::iter::once(EvidenceRef::vendor(vendor_id))
                    .chain(chain.iter().map(|p| EvidenceRef::payment(&p.id)));
                alerts.push(CandidateAlert::new(
                    RuleId::DuplicatePayments,
                    severity_for(chain.len(), amount),
                    primary,
                    explanation,
                ));
            }
        }

        Ok(alerts)
    }
}

#[cfg(test)]
mod tests {
    use fraudit_core::{EngineConfig, SnapshotRecords};

    use super::*;
    use crate::evaluator::test_support::*;

    fn eval(payments: Vec<fraudit_core::PaymentRecord>) -> Vec<CandidateAlert> {
        let records = SnapshotRecords {
            vendors: vec![vendor("V1", "Vendor One"), vendor("V2", "Vendor Two")],
            payments,
            ..Default::default()
        };
        run_rule(&DuplicatePayments, records, None, &EngineConfig::default()).unwrap()
    }

    #[test]
    fn two_identical_payments_two_days_apart() {
        let alerts = eval(vec![
            payment("P1", "V1", 12_345.00, date(2024, 5, 1), "DOT"),
            payment("P2", "V1", 12_345.00, date(2024, 5, 3), "DOT"),
        ]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].primary_key, "payment:P1|payment:P2|vendor:V1");
        assert_eq!(alerts[0].severity, Severity::Medium);
    }

    #[test]
    fn different_vendors_or_amounts_do_not_match() {
        let alerts = eval(vec![
            payment("P1", "V1", 12_345.00, date(2024, 5, 1), "DOT"),
            payment("P2", "V2", 12_345.00, date(2024, 5, 1), "DOT"),
            payment("P3", "V1", 12_345.01, date(2024, 5, 2), "DOT"),
        ]);
        assert!(alerts.is_empty());
    }

    #[test]
    fn gaps_beyond_window_split_chains() {
        let alerts = eval(vec![
            payment("P1", "V1", 500.0, date(2024, 5, 1), "DOT"),
            payment("P2", "V1", 500.0, date(2024, 5, 5), "DOT"),
            payment("P3", "V1", 500.0, date(2024, 6, 20), "DOT"),
            payment("P4", "V1", 500.0, date(2024, 6, 21), "DOT"),
            payment("P5", "V1", 500.0, date(2024, 9, 1), "DOT"),
        ]);
        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().all(|a| a.severity == Severity::Low));
    }

    #[test]
    fn small_payments_are_ignored() {
        let alerts = eval(vec![
            payment("P1", "V1", 100.0, date(2024, 5, 1), "DOT"),
            payment("P2", "V1", 100.0, date(2024, 5, 1), "DOT"),
        ]);
        assert!(alerts.is_empty());
    }

    #[test]
    fn severity_table() {
        assert_eq!(severity_for(2, 500.0), Severity::Low);
        assert_eq!(severity_for(3, 500.0), Severity::Medium);
        assert_eq!(severity_for(2, 10_000.0), Severity::Medium);
        assert_eq!(severity_for(5, 500.0), Severity::High);
        assert_eq!(severity_for(2, 50_000.0), Severity::High);
    }
}
