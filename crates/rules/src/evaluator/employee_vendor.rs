//! Employee-vendor: an agency employee who is also an officer or owner of a
//! vendor that the same agency pays or contracts with.
//!
//! Officer names are blocked by surname and compared with the token-set
//! ratio. Both names must carry at least a first and last name.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use fraudit_compute::token_set_ratio;
use fraudit_core::{
    CandidateAlert, Employee, EntityKind, EvidenceRef, RuleError, RuleId, Severity, Vendor,
};

use super::{is_full_person_name, surname, EvalContext, RuleEvaluator};

pub struct EmployeeVendor;

fn check_employee(e: &Employee) -> Result<(), RuleError> {
    let reason = if e.normalized_name.is_empty() {
        "empty name"
    } else if e.agency.is_empty() {
        "empty agency"
    } else if !e.salary.is_finite() || e.salary < 0.0 {
        "salary must be a non-negative number"
    } else {
        return Ok(());
    };
    Err(RuleError::MalformedRecord {
        rule: RuleId::EmployeeVendor,
        kind: EntityKind::Employee,
        record_id: e.id.clone(),
        reason: reason.to_string(),
    })
}

impl RuleEvaluator for EmployeeVendor {
    fn id(&self) -> RuleId {
        RuleId::EmployeeVendor
    }

    fn description(&self) -> &'static str {
        "Employee name matches an officer of a vendor paid by the employee's agency"
    }

    fn default_severity(&self) -> Severity {
        Severity::High
    }

    fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<Vec<CandidateAlert>, RuleError> {
        let snapshot = ctx.snapshot;
        let threshold = ctx.thresholds().employee_vendor_name_similarity;

        for e in snapshot.employees() {
            check_employee(e)?;
        }

        // Agencies that paid or contracted with each vendor.
        let mut vendor_agencies: HashMap<&str, BTreeSet<&str>> = HashMap::new();
        for p in snapshot.payments() {
            vendor_agencies.entry(p.vendor_id.as_str()).or_default().insert(p.agency.as_str());
        }
        for c in snapshot.contracts() {
            vendor_agencies.entry(c.vendor_id.as_str()).or_default().insert(c.agency.as_str());
        }

        let mut by_surname: HashMap<&str, Vec<(&str, &Vendor)>> = HashMap::new();
        for v in snapshot.vendors() {
            for officer in v.officers.iter().filter(|o| is_full_person_name(o)) {
                by_surname.entry(surname(officer)).or_default().push((officer.as_str(), v));
            }
        }

        let mut alerts = Vec::new();
        for e in snapshot.employees() {
            if !is_full_person_name(&e.normalized_name) {
                continue;
            }

            // Best officer score per vendor, keyed by vendor id for stable order.
            let mut matches: BTreeMap<&str, (f64, &str, &Vendor)> = BTreeMap::new();
            for &(officer, vendor) in by_surname.get(surname(&e.normalized_name)).into_iter().flatten() {
                let same_agency = vendor_agencies
                    .get(vendor.id.as_str())
                    .is_some_and(|a| a.contains(e.agency.as_str()));
                if !same_agency {
                    continue;
                }
                let score = token_set_ratio(&e.normalized_name, officer);
                if score < threshold {
                    continue;
                }
                let entry = matches.entry(vendor.id.as_str()).or_insert((score, officer, vendor));
                if score > entry.0 {
                    *entry = (score, officer, vendor);
                }
            }

            for (_, (score, officer, vendor)) in matches {
                let payments: Vec<EvidenceRef> = snapshot
                    .payments_for_vendor(&vendor.id)
                    .filter(|p| p.agency == e.agency)
                    .map(|p| EvidenceRef::payment(&p.id))
                    .collect();
                let explanation = format!(
                    "{} employee '{}' matches officer '{}' of vendor '{}' (similarity {:.2}); {} payment(s) from {}",
                    e.agency,
                    e.name,
                    officer,
                    vendor.canonical_name,
                    score,
                    payments.len(),
                    e.agency
                );
                alerts.push(
                    CandidateAlert::new(
                        RuleId::EmployeeVendor,
                        Severity::High,
                        [
                            EvidenceRef::new(EntityKind::Employee, &e.id),
                            EvidenceRef::vendor(&vendor.id),
                        ],
                        explanation,
                    )
                    .with_context([EvidenceRef::agency(&e.agency)])
                    .with_context(payments),
                );
            }
        }

        Ok(alerts)
    }
}
