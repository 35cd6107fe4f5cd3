//! Contract splitting: several sub-threshold payments from one agency to one
//! vendor that together land just under a procurement threshold.
//!
//! Payments per (vendor, agency) are walked in date order. From each anchor
//! payment, later payments inside the window are accumulated while the sum
//! stays at or below `contract_splitting_max`. If two or more payments put
//! the sum inside `[min, max]`, the largest such window is flagged and the
//! next anchor starts after it, so flagged windows never overlap.
//!
//! The alert key is the vendor plus the flagged payments.

use std::collections::BTreeMap;

use fraudit_core::{CandidateAlert, EvidenceRef, Payment, RuleError, RuleId, Severity};

use super::{money, EvalContext, RuleEvaluator};

pub struct ContractSplitting;

/// Severity from how close the sum sits to the upper threshold.
fn severity_for(sum: f64, min: f64, max: f64) -> Severity {
    let proximity = ((sum - min) / (max - min)).clamp(0.0, 1.0);
    if proximity >= 0.95 {
        Severity::High
    } else if proximity >= 0.5 {
        Severity::MediumHigh
    } else {
        Severity::Medium
    }
}

impl RuleEvaluator for ContractSplitting {
    fn id(&self) -> RuleId {
        RuleId::ContractSplitting
    }

    fn description(&self) -> &'static str {
        "Sub-threshold payments to one vendor that sum just under a procurement threshold"
    }

    fn default_severity(&self) -> Severity {
        Severity::MediumHigh
    }

    fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<Vec<CandidateAlert>, RuleError> {
        let t = ctx.thresholds();
        let (min, max) = (t.contract_splitting_min, t.contract_splitting_max);
        let window = t.contract_splitting_window_days as i64;

        let mut groups: BTreeMap<(&str, &str), Vec<&Payment>> = BTreeMap::new();
        for p in ctx.snapshot.payments() {
            if p.amount > 0.0 && p.amount < max {
                groups.entry((p.vendor_id.as_str(), p.agency.as_str())).or_default().push(p);
            }
        }

        let mut alerts = Vec::new();
        for ((vendor_id, agency), payments) in groups {
            let mut i = 0;
            while i < payments.len() {
                let anchor = payments[i].date;
                let mut sum = 0.0;
                let mut flagged: Option<(usize, f64)> = None;

                for (j, p) in payments.iter().enumerate().skip(i) {
                    if (p.date - anchor).num_days() >= window || sum + p.amount > max {
                        break;
                    }
                    sum += p.amount;
                    if j > i && sum >= min {
                        flagged = Some((j + 1, sum));
                    }
                }

                let Some((end, total)) = flagged else {
                    i += 1;
                    continue;
                };

                let members = &payments[i..end];
                let first = members[0].date;
                let last = members[members.len() - 1].date;
                let explanation = format!(
                    "{} payments from {} to vendor {} totalling {} between {} and {} ({} days), inside the {}-{} splitting band",
                    members.len(),
                    agency,
                    vendor_id,
                    money(total),
                    first,
                    last,
                    (last - first).num_days() + 1,
                    money(min),
                    money(max)
                );

                // Same key shape as duplicate-payments: vendor plus payments.
                let primary = std::iter::once(EvidenceRef::vendor(vendor_id))
                    .chain(members.iter().map(|p| EvidenceRef::payment(&p.id)));
                alerts.push(
                    CandidateAlert::new(
                        RuleId::ContractSplitting,
                        severity_for(total, min, max),
                        primary,
                        explanation,
                    )
                    .with_context([EvidenceRef::agency(agency)]),
                );
                i = end;
            }
        }

        Ok(alerts)
    }
}
