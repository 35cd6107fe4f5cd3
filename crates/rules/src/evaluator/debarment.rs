//! Vendors that appear on a debarment or exclusion list.
//!
//! An exact tax-id match is HIGH. Otherwise the best fuzzy name match within
//! the vendor's blocking bucket, if it clears the threshold, is MEDIUM.
//! Exclusions dated after the snapshot are not yet in force and are skipped.

use std::collections::HashMap;

use fraudit_compute::token_set_ratio;
use fraudit_core::normalize::blocking_key;
use fraudit_core::{
    CandidateAlert, EntityKind, EvidenceRef, ExclusionEntry, RuleError, RuleId, Severity,
};

use super::{EvalContext, RuleEvaluator};

pub struct Debarment;

impl RuleEvaluator for Debarment {
    fn id(&self) -> RuleId {
        RuleId::Debarment
    }

    fn description(&self) -> &'static str {
        "Vendor matches a debarment/exclusion list entry by tax id or name"
    }

    fn default_severity(&self) -> Severity {
        Severity::High
    }

    fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<Vec<CandidateAlert>, RuleError> {
        let snapshot = ctx.snapshot;
        let threshold = ctx.thresholds().debarment_name_similarity;

        let mut by_tax: HashMap<&str, &ExclusionEntry> = HashMap::new();
        let mut by_block: HashMap<&str, Vec<&ExclusionEntry>> = HashMap::new();
        for x in snapshot
            .exclusions()
            .iter()
            .filter(|x| x.exclusion_date <= snapshot.as_of())
        {
            if let Some(tax) = x.tax_id.as_deref() {
                by_tax.entry(tax).or_insert(x);
            }
            let key = blocking_key(&x.normalized_name);
            if !key.is_empty() {
                by_block.entry(key).or_default().push(x);
            }
        }

        let mut alerts = Vec::new();
        for vendor in snapshot.vendors() {
            let tax_hit = vendor.tax_id.as_deref().and_then(|t| by_tax.get(t).copied());

            let (exclusion, severity, basis) = if let Some(x) = tax_hit {
                (x, Severity::High, "tax id".to_string())
            } else {
                let key = blocking_key(&vendor.normalized_name);
                let best = by_block
                    .get(key)
                    .into_iter()
                    .flatten()
                    .map(|x| (token_set_ratio(&vendor.normalized_name, &x.normalized_name), *x))
                    .filter(|(score, _)| *score >= threshold)
                    // Highest score wins; on ties the smaller exclusion id.
                    .max_by(|(sa, xa), (sb, xb)| sa.total_cmp(sb).then_with(|| xb.id.cmp(&xa.id)));
                match best {
                    Some((score, x)) => (x, Severity::Medium, format!("name similarity {score:.2}")),
                    None => continue,
                }
            };

            let payments_after: Vec<EvidenceRef> = snapshot
                .payments_for_vendor(&vendor.id)
                .filter(|p| p.date >= exclusion.exclusion_date)
                .map(|p| EvidenceRef::payment(&p.id))
                .collect();

            let explanation = format!(
                "Vendor '{}' matches {} exclusion '{}' (excluded {}) by {}; {} payment(s) since exclusion",
                vendor.canonical_name,
                exclusion.source,
                exclusion.name,
                exclusion.exclusion_date,
                basis,
                payments_after.len()
            );

            alerts.push(
                CandidateAlert::new(
                    RuleId::Debarment,
                    severity,
                    [EvidenceRef::vendor(&vendor.id)],
                    explanation,
                )
                .with_context([EvidenceRef::new(EntityKind::Exclusion, &exclusion.id)])
                .with_context(payments_after),
            );
        }

        Ok(alerts)
    }
}
