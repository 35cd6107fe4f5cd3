//! Pay-to-play: campaign contributions from a vendor (or its officers, or a
//! related party) shortly before that vendor is awarded a contract.
//!
//! Each contributor is resolved to the vendors it could be, by business
//! name or by officer name. A contract's related set is the awarded
//! vendor's cluster, widened through the ownership graph. Contributions in
//! the window before the award that resolve into that set are chained into
//! one alert per contract.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::Duration;
use fraudit_compute::token_set_ratio;
use fraudit_core::normalize::blocking_key;
use fraudit_core::{
    CampaignContribution, CandidateAlert, EntityKind, EvidenceRef, RuleError, RuleId, Severity,
    Thresholds, Vendor,
};

use super::{is_full_person_name, money, surname, EvalContext, RuleEvaluator};

pub struct PayToPlay;

/// Vendors indexed by business-name blocking key and by officer surname.
struct ContributorIndex<'s> {
    by_block: HashMap<&'s str, Vec<&'s Vendor>>,
    by_surname: HashMap<&'s str, Vec<(&'s str, &'s Vendor)>>,
}

impl<'s> ContributorIndex<'s> {
    fn build(vendors: &'s [Vendor]) -> Self {
        let mut by_block: HashMap<&str, Vec<&Vendor>> = HashMap::new();
        let mut by_surname: HashMap<&str, Vec<(&str, &Vendor)>> = HashMap::new();
        for v in vendors {
            let key = blocking_key(&v.normalized_name);
            if !key.is_empty() {
                by_block.entry(key).or_default().push(v);
            }
            for officer in v.officers.iter().filter(|o| is_full_person_name(o)) {
                by_surname.entry(surname(officer)).or_default().push((officer.as_str(), v));
            }
        }
        Self { by_block, by_surname }
    }

    /// Vendor ids the contributor may be, by business name or officer name.
    fn resolve(&self, c: &CampaignContribution, t: &Thresholds) -> BTreeSet<&'s str> {
        let mut out = BTreeSet::new();
        let key = blocking_key(&c.contributor_name);
        for &v in self.by_block.get(key).into_iter().flatten() {
            if token_set_ratio(&c.contributor_name, &v.normalized_name) >= t.vendor_name_similarity {
                out.insert(v.id.as_str());
            }
        }
        if is_full_person_name(&c.contributor_person) {
            let person = c.contributor_person.as_str();
            for &(officer, v) in self.by_surname.get(surname(person)).into_iter().flatten() {
                if token_set_ratio(person, officer) >= t.employee_vendor_name_similarity {
                    out.insert(v.id.as_str());
                }
            }
        }
        out
    }
}

/// Severity from the return on contributions.
fn severity_for(contract_amount: f64, contributed: f64) -> Severity {
    let roi = contract_amount / contributed;
    if roi > 100.0 {
        Severity::High
    } else if roi > 10.0 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

impl RuleEvaluator for PayToPlay {
    fn id(&self) -> RuleId {
        RuleId::PayToPlay
    }

    fn description(&self) -> &'static str {
        "Campaign contributions from a vendor or related party shortly before a contract award"
    }

    fn default_severity(&self) -> Severity {
        Severity::Medium
    }

    fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<Vec<CandidateAlert>, RuleError> {
        let snapshot = ctx.snapshot;
        let t = ctx.thresholds();
        let window = Duration::days(t.pay_to_play_window_days as i64);

        let index = ContributorIndex::build(snapshot.vendors());

        let resolved: Vec<(&CampaignContribution, BTreeSet<&str>)> = snapshot
            .contributions()
            .iter()
            .filter(|c| c.amount >= t.pay_to_play_min_contribution)
            .map(|c| (c, index.resolve(c, t)))
            .filter(|(_, vendors)| !vendors.is_empty())
            .collect();
        if resolved.is_empty() {
            return Ok(Vec::new());
        }

        let mut alerts = Vec::new();
        for contract in snapshot.contracts() {
            let related: BTreeMap<String, u32> = ctx.related.related(
                ctx.clusters.members_of(&contract.vendor_id),
                t.related_party_max_depth,
            );
            let earliest = contract.start_date - window;

            let mut chain = Vec::new();
            let mut total = 0.0;
            for (c, vendors) in &resolved {
                if c.date >= contract.start_date || c.date < earliest {
                    continue;
                }
                let Some(via) = vendors.iter().find(|v| related.contains_key(**v)) else {
                    continue;
                };
                total += c.amount;
                chain.push((*c, *via));
            }
            if chain.is_empty() || total <= 0.0 {
                continue;
            }

            let mut context = Vec::with_capacity(chain.len() * 2 + 1);
            for (c, via) in &chain {
                context.push(EvidenceRef::new(EntityKind::Contribution, &c.id));
                context.push(EvidenceRef::vendor(*via));
            }
            context.push(EvidenceRef::vendor(&contract.vendor_id));

            let first = chain.iter().map(|(c, _)| c.date).min().unwrap_or(contract.start_date);
            let explanation = format!(
                "Contract {} ({}) awarded to vendor {} on {} after {} contribution(s) totalling {} from related parties since {} ({:.0}x return)",
                contract.id,
                money(contract.amount),
                contract.vendor_id,
                contract.start_date,
                chain.len(),
                money(total),
                first,
                contract.amount / total
            );

            alerts.push(
                CandidateAlert::new(
                    RuleId::PayToPlay,
                    severity_for(contract.amount, total),
                    [EvidenceRef::contract(&contract.id)],
                    explanation,
                )
                .with_context(context),
            );
        }

        Ok(alerts)
    }
}
