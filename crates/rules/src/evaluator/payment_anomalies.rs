//! Payment anomalies.
//!
//! Three independent checks over the payment ledger:
//! - payments billed against a contract that add up to more than its value
//! - a large first payment to a vendor that is new to the data
//! - a vendor paid the same round amount over and over

use std::collections::BTreeMap;

use chrono::Duration;
use fraudit_core::{
    CandidateAlert, EvidenceRef, Payment, RuleError, RuleId, Severity, Snapshot, Thresholds,
};

use super::{money, EvalContext, RuleEvaluator};

pub struct PaymentAnomalies;

/// First payments at or above this are HIGH.
const LARGE_FIRST_HIGH: f64 = 500_000.0;

type ByVendor<'s> = BTreeMap<&'s str, Vec<&'s Payment>>;

fn over_contract(snapshot: &Snapshot, alerts: &mut Vec<CandidateAlert>) {
    let mut billed: BTreeMap<&str, Vec<&Payment>> = BTreeMap::new();
    for p in snapshot.payments() {
        if let Some(id) = p.contract_id.as_deref() {
            billed.entry(id).or_default().push(p);
        }
    }

    for contract in snapshot.contracts().iter().filter(|c| c.amount > 0.0) {
        let Some(payments) = billed.get(contract.id.as_str()) else {
            continue;
        };
        let paid_cents: i64 = payments.iter().map(|p| p.amount_cents()).sum();
        let excess_cents = paid_cents - (contract.amount * 100.0).round() as i64;
        if excess_cents <= 0 {
            continue;
        }
        let excess = excess_cents as f64 / 100.0;
        let pct = excess / contract.amount * 100.0;
        let severity = if pct >= 50.0 || excess >= 100_000.0 {
            Severity::High
        } else {
            Severity::Medium
        };
        let explanation = format!(
            "Contract {} with vendor {} is valued at {} but {} payment(s) total {} ({} or {pct:.1}% over)",
            contract.id,
            contract.vendor_id,
            money(contract.amount),
            payments.len(),
            money(paid_cents as f64 / 100.0),
            money(excess)
        );
        alerts.push(
            CandidateAlert::new(
                RuleId::PaymentAnomalies,
                severity,
                [
                    EvidenceRef::contract(&contract.id),
                    EvidenceRef::vendor(&contract.vendor_id),
                ],
                explanation,
            )
            .with_context(payments.iter().map(|p| EvidenceRef::payment(&p.id))),
        );
    }
}

fn large_first_payments(
    snapshot: &Snapshot,
    by_vendor: &ByVendor<'_>,
    t: &Thresholds,
    alerts: &mut Vec<CandidateAlert>,
) {
    let horizon = snapshot.as_of() - Duration::days(t.new_vendor_window_days as i64);

    for (vendor_id, payments) in by_vendor {
        let Some(first_date) = payments.first().map(|p| p.date) else {
            continue;
        };
        if first_date < horizon {
            continue;
        }
        // Largest payment on the first day; ties go to the smaller id.
        let Some(first) = payments
            .iter()
            .take_while(|p| p.date == first_date)
            .max_by(|a, b| a.amount.total_cmp(&b.amount).then_with(|| b.id.cmp(&a.id)))
        else {
            continue;
        };
        if first.amount < t.large_first_payment_min {
            continue;
        }

        let severity = if first.amount >= LARGE_FIRST_HIGH {
            Severity::High
        } else {
            Severity::Medium
        };
        let explanation = format!(
            "Vendor {vendor_id} received {} from {} on {} as its first payment",
            money(first.amount),
            first.agency,
            first.date
        );
        alerts.push(CandidateAlert::new(
            RuleId::PaymentAnomalies,
            severity,
            [EvidenceRef::vendor(*vendor_id), EvidenceRef::payment(&first.id)],
            explanation,
        ));
    }
}

fn round_numbers(by_vendor: &ByVendor<'_>, t: &Thresholds, alerts: &mut Vec<CandidateAlert>) {
    let mut rounds: Vec<i64> = t
        .round_number_amounts
        .iter()
        .map(|a| (a * 100.0).round() as i64)
        .collect();
    rounds.sort_unstable();
    rounds.dedup();

    for (vendor_id, payments) in by_vendor {
        for &round in &rounds {
            let hits: Vec<&Payment> = payments
                .iter()
                .copied()
                .filter(|p| p.amount_cents() == round)
                .collect();
            if hits.len() < t.round_number_min_count as usize {
                continue;
            }
            let share = hits.len() as f64 / payments.len() as f64;
            if share < t.round_number_min_share {
                continue;
            }

            let amount = round as f64 / 100.0;
            let total = amount * hits.len() as f64;
            let severity = if share >= 0.5 || total >= 500_000.0 {
                Severity::Medium
            } else {
                Severity::Low
            };
            let explanation = format!(
                "Vendor {vendor_id} was paid exactly {} {} times ({:.0}% of its {} payments, {} total)",
                money(amount),
                hits.len(),
                share * 100.0,
                payments.len(),
                money(total)
            );
            alerts.push(CandidateAlert::new(
                RuleId::PaymentAnomalies,
                severity,
                std::iter::once(EvidenceRef::vendor(*vendor_id))
                    .chain(hits.iter().map(|p| EvidenceRef::payment(&p.id))),
                explanation,
            ));
        }
    }
}

impl RuleEvaluator for PaymentAnomalies {
    fn id(&self) -> RuleId {
        RuleId::PaymentAnomalies
    }

    fn description(&self) -> &'static str {
        "Contract overbilling, large first payments to new vendors, and repeated round-number payments"
    }

    fn default_severity(&self) -> Severity {
        Severity::Medium
    }

    fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<Vec<CandidateAlert>, RuleError> {
        let snapshot = ctx.snapshot;
        let t = ctx.thresholds();

        // Payments arrive ordered by (date, id), so each list is too.
        let mut by_vendor: ByVendor<'_> = BTreeMap::new();
        for p in snapshot.payments() {
            by_vendor.entry(p.vendor_id.as_str()).or_default().push(p);
        }

        let mut alerts = Vec::new();
        over_contract(snapshot, &mut alerts);
        large_first_payments(snapshot, &by_vendor, t, &mut alerts);
        round_numbers(&by_vendor, t, &mut alerts);
        Ok(alerts)
    }
}

#[cfg(test)]
mod tests {
    use fraudit_core::{ContractRecord, EngineConfig, PaymentRecord, SnapshotRecords};

    use super::*;
    use crate::evaluator::test_support::*;

    fn billed(id: &str, amount: f64, on: chrono::NaiveDate, contract: &str) -> PaymentRecord {
        let mut p = payment(id, "V1", amount, on, "DOT");
        p.contract_id = Some(contract.into());
        p
    }

    fn contract(id: &str, amount: f64) -> ContractRecord {
        ContractRecord {
            id: id.into(),
            vendor_id: "V1".into(),
            amount,
            start_date: date(2023, 1, 1),
            end_date: None,
            agency: "DOT".into(),
        }
    }

    fn eval(records: SnapshotRecords, as_of: Option<chrono::NaiveDate>) -> Vec<CandidateAlert> {
        run_rule(&PaymentAnomalies, records, as_of, &EngineConfig::default()).unwrap()
    }

    #[test]
    fn payments_past_contract_value_flag() {
        let records = SnapshotRecords {
            vendors: vec![vendor("V1", "Acme Paving")],
            contracts: vec![contract("K1", 100_000.0), contract("K2", 100_000.0)],
            payments: vec![
                billed("P1", 60_000.0, date(2023, 2, 1), "K1"),
                billed("P2", 60_000.0, date(2023, 3, 1), "K1"),
                billed("P3", 90_000.0, date(2023, 2, 1), "K2"),
                payment("P4", "V1", 80_000.0, date(2023, 4, 1), "DOT"),
            ],
            ..Default::default()
        };
        let alerts = eval(records, Some(date(2026, 1, 1)));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].primary_key, "contract:K1|vendor:V1");
        assert_eq!(alerts[0].severity, Severity::Medium);
        assert!(alerts[0].explanation.contains("$20,000.00 or 20.0% over"), "{}", alerts[0].explanation);
        assert!(alerts[0].evidence_refs.contains(&EvidenceRef::payment("P2")));
    }

    #[test]
    fn large_first_payment_to_new_vendor() {
        let records = SnapshotRecords {
            vendors: vec![vendor("V1", "Acme Paving"), vendor("V2", "Old Reliable")],
            payments: vec![
                payment("P1", "V1", 250_000.0, date(2024, 2, 1), "DOT"),
                payment("P2", "V1", 1_000.0, date(2024, 2, 1), "DOT"),
                payment("P3", "V2", 1_000.0, date(2019, 5, 1), "DOT"),
                payment("P4", "V2", 900_000.0, date(2024, 2, 1), "DOT"),
            ],
            ..Default::default()
        };
        let alerts = eval(records, Some(date(2024, 3, 1)));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].primary_key, "payment:P1|vendor:V1");
        assert_eq!(alerts[0].severity, Severity::Medium);
    }

    #[test]
    fn first_payment_outside_window_is_not_new() {
        let records = SnapshotRecords {
            vendors: vec![vendor("V1", "Acme Paving")],
            payments: vec![payment("P1", "V1", 600_000.0, date(2021, 2, 1), "DOT")],
            ..Default::default()
        };
        assert!(eval(records.clone(), Some(date(2024, 3, 1))).is_empty());

        let alerts = eval(records, Some(date(2021, 6, 1)));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::High);
    }

    #[test]
    fn repeated_round_amounts_flag() {
        let mut payments: Vec<PaymentRecord> = (1..=5)
            .map(|i| payment(&format!("R{i}"), "V1", 25_000.0, date(2020, i, 10), "DOT"))
            .collect();
        payments.extend((1..=5).map(|i| payment(&format!("O{i}"), "V1", 1_234.56, date(2020, i, 20), "DOT")));
        let records = SnapshotRecords {
            vendors: vec![vendor("V1", "Acme Paving")],
            payments,
            ..Default::default()
        };
        let alerts = eval(records, Some(date(2026, 1, 1)));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Medium);
        assert_eq!(alerts[0].evidence_refs.len(), 6);
        assert!(alerts[0].explanation.contains("exactly $25,000.00 5 times (50%"));
    }

    #[test]
    fn round_amounts_below_share_are_ignored() {
        let mut payments: Vec<PaymentRecord> = (1..=5)
            .map(|i| payment(&format!("R{i}"), "V1", 10_000.0, date(2020, i, 10), "DOT"))
            .collect();
        payments.extend((1..=16).map(|i| payment(&format!("O{i:02}"), "V1", 999.0, date(2020, 6, i), "DOT")));
        let records = SnapshotRecords {
            vendors: vec![vendor("V1", "Acme Paving")],
            payments,
            ..Default::default()
        };
        assert!(eval(records, Some(date(2026, 1, 1))).is_empty());
    }
}
