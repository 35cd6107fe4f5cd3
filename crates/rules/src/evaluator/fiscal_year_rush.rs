//! Fiscal-year rush: an agency's spend spikes in the last days of a fiscal
//! year compared with its own monthly run rate earlier in that year.
//!
//! The baseline is the monthly spend for every month that ends before the
//! final window, with empty months counted as zero. Days between the last
//! whole month and the window form a stub period: a long stub is its own
//! 30-day-rate sample, a short one folds into the preceding month. The final
//! window's total is scaled to a 30-day rate and scored against the
//! baseline. Only fiscal years that have closed by the snapshot date are
//! examined.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, Duration};
use fraudit_compute::stats::summarize;
use fraudit_compute::FiscalCalendar;
use fraudit_core::{CandidateAlert, EntityKind, EvidenceRef, Payment, RuleError, RuleId, Severity};

use super::{money, EvalContext, RuleEvaluator};

pub struct FiscalYearRush;

/// Standard deviation floor as a fraction of the baseline mean.
const STD_FLOOR_FRACTION: f64 = 0.1;

/// Stubs shorter than this fold into the last whole baseline month.
const MIN_STUB_DAYS: i64 = 15;

impl RuleEvaluator for FiscalYearRush {
    fn id(&self) -> RuleId {
        RuleId::FiscalYearRush
    }

    fn description(&self) -> &'static str {
        "Agency spend spikes in the final days of a fiscal year against its monthly baseline"
    }

    fn default_severity(&self) -> Severity {
        Severity::Medium
    }

    fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<Vec<CandidateAlert>, RuleError> {
        let snapshot = ctx.snapshot;
        let t = ctx.thresholds();
        let cal = FiscalCalendar::new(t.fiscal_year_start_month);
        let cutoff = t.fiscal_year_z_score;

        let mut by_agency: BTreeMap<&str, Vec<&Payment>> = BTreeMap::new();
        for p in snapshot.payments() {
            by_agency.entry(p.agency.as_str()).or_default().push(p);
        }

        let mut alerts = Vec::new();
        for (agency, payments) in by_agency {
            let years: BTreeSet<i32> = payments.iter().map(|p| cal.fiscal_year(p.date)).collect();

            for fy in years {
                if cal.end(fy) > snapshot.as_of() {
                    continue;
                }
                let (window_start, window_end) = cal.final_window(fy, t.fiscal_year_final_days);

                // Months that close before the final window opens.
                let starts = cal.month_starts(fy);
                let baseline_months = starts
                    .iter()
                    .enumerate()
                    .take_while(|(i, _)| {
                        let month_end = starts
                            .get(i + 1)
                            .map(|next| *next - Duration::days(1))
                            .unwrap_or_else(|| cal.end(fy));
                        month_end < window_start
                    })
                    .count();
                if baseline_months < t.fiscal_year_min_baseline_months as usize {
                    continue;
                }

                let mut baseline = vec![0.0; baseline_months];
                let mut stub_total = 0.0;
                let mut spike: Vec<&Payment> = Vec::new();
                for p in payments.iter().filter(|p| cal.fiscal_year(p.date) == fy) {
                    if p.date >= window_start && p.date <= window_end {
                        spike.push(p);
                    } else if let Some(i) = starts[..baseline_months]
                        .iter()
                        .position(|m| m.year() == p.date.year() && m.month() == p.date.month())
                    {
                        baseline[i] += p.amount;
                    } else if p.date < window_start {
                        stub_total += p.amount;
                    }
                }

                let stub_days = starts
                    .get(baseline_months)
                    .map_or(0, |stub_start| (window_start - *stub_start).num_days());
                if stub_days >= MIN_STUB_DAYS || (stub_days > 0 && baseline.is_empty()) {
                    baseline.push(stub_total * 30.0 / stub_days as f64);
                } else if let Some(last) = baseline.last_mut() {
                    *last += stub_total;
                }

                let final_total: f64 = spike.iter().map(|p| p.amount).sum();
                if final_total < t.fiscal_year_min_amount {
                    continue;
                }
                let Some(summary) = summarize(&baseline) else {
                    continue;
                };
                let final_days = (window_end - window_start).num_days() + 1;
                let rate = final_total * 30.0 / final_days as f64;
                let z = summary.z_score(rate, STD_FLOOR_FRACTION);
                if z <= cutoff {
                    continue;
                }

                let severity = if z >= 2.0 * cutoff {
                    Severity::High
                } else {
                    Severity::Medium
                };
                tracing::debug!(agency, fy, z, final_total, "fiscal-year spike");
                let explanation = format!(
                    "{agency} spent {} in the final {final_days} days of FY{fy} ({window_start} to {window_end}) against a monthly baseline of {} over {} months (z-score {z:.1})",
                    money(final_total),
                    money(summary.mean),
                    summary.count
                );

                alerts.push(
                    CandidateAlert::new(
                        RuleId::FiscalYearRush,
                        severity,
                        [
                            EvidenceRef::agency(agency),
                            EvidenceRef::new(EntityKind::FiscalYear, fy.to_string()),
                        ],
                        explanation,
                    )
                    .with_context(spike.iter().map(|p| EvidenceRef::payment(&p.id))),
                );
            }
        }

        Ok(alerts)
    }
}
