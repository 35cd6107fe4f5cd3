//! Immutable, typed view of every entity collection as of one watermark.
//!
//! Built once per run from raw records. Collections are sorted by id (and
//! payments by date, then id) so every consumer iterates in a stable order.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::*;
use crate::error::NormalizationWarning;
use crate::normalize::Confidence;

/// Raw records for one watermark, as delivered by ingestion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotRecords {
    pub vendors: Vec<VendorRecord>,
    pub payments: Vec<PaymentRecord>,
    pub contracts: Vec<ContractRecord>,
    pub employees: Vec<EmployeeRecord>,
    pub exclusions: Vec<ExclusionRecord>,
    pub contributions: Vec<ContributionRecord>,
}

#[derive(Debug)]
pub struct Snapshot {
    watermark: String,
    as_of: NaiveDate,
    vendors: Vec<Vendor>,
    payments: Vec<Payment>,
    contracts: Vec<Contract>,
    employees: Vec<Employee>,
    exclusions: Vec<ExclusionEntry>,
    contributions: Vec<CampaignContribution>,
    vendor_index: HashMap<VendorId, usize>,
    payments_by_vendor: HashMap<VendorId, Vec<usize>>,
    warnings: Vec<NormalizationWarning>,
}

fn sorted_by_id<T>(mut items: Vec<T>, id: impl Fn(&T) -> &str, kind: EntityKind) -> Vec<T> {
    items.sort_by(|a, b| id(a).cmp(id(b)));
    let before = items.len();
    items.dedup_by(|a, b| id(a) == id(b));
    if items.len() < before {
        tracing::warn!(
            kind = %kind,
            dropped = before - items.len(),
            "duplicate record ids in snapshot, keeping first"
        );
    }
    items
}

impl Snapshot {
    /// Build a snapshot. `as_of` defaults to the latest record date.
    pub fn build(
        watermark: impl Into<String>,
        as_of: Option<NaiveDate>,
        records: SnapshotRecords,
    ) -> Self {
        let vendors: Vec<Vendor> = sorted_by_id(records.vendors, |v| v.id.as_str(), EntityKind::Vendor)
            .into_iter()
            .map(Vendor::from)
            .collect();

        let mut payments: Vec<Payment> =
            sorted_by_id(records.payments, |p| p.id.as_str(), EntityKind::Payment)
                .into_iter()
                .map(Payment::from)
                .collect();
        payments.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));

        let contracts: Vec<Contract> =
            sorted_by_id(records.contracts, |c| c.id.as_str(), EntityKind::Contract)
                .into_iter()
                .map(Contract::from)
                .collect();
        let employees: Vec<Employee> =
            sorted_by_id(records.employees, |e| e.id.as_str(), EntityKind::Employee)
                .into_iter()
                .map(Employee::from)
                .collect();
        let exclusions: Vec<ExclusionEntry> =
            sorted_by_id(records.exclusions, |x| x.id.as_str(), EntityKind::Exclusion)
                .into_iter()
                .map(ExclusionEntry::from)
                .collect();
        let contributions: Vec<CampaignContribution> =
            sorted_by_id(records.contributions, |c| c.id.as_str(), EntityKind::Contribution)
                .into_iter()
                .map(CampaignContribution::from)
                .collect();

        let vendor_index = vendors
            .iter()
            .enumerate()
            .map(|(i, v)| (v.id.clone(), i))
            .collect();
        let mut payments_by_vendor: HashMap<VendorId, Vec<usize>> = HashMap::new();
        for (i, p) in payments.iter().enumerate() {
            payments_by_vendor.entry(p.vendor_id.clone()).or_default().push(i);
        }

        let warnings = collect_warnings(&vendors, &exclusions);
        if !warnings.is_empty() {
            tracing::debug!(count = warnings.len(), "low-confidence normalizations");
        }

        let as_of = as_of.unwrap_or_else(|| {
            payments
                .iter()
                .map(|p| p.date)
                .chain(contracts.iter().map(|c| c.start_date))
                .chain(contributions.iter().map(|c| c.date))
                .chain(exclusions.iter().map(|x| x.exclusion_date))
                .max()
                .unwrap_or_else(|| Utc::now().date_naive())
        });

        Self {
            watermark: watermark.into(),
            as_of,
            vendors,
            payments,
            contracts,
            employees,
            exclusions,
            contributions,
            vendor_index,
            payments_by_vendor,
            warnings,
        }
    }

    pub fn watermark(&self) -> &str {
        &self.watermark
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    pub fn vendors(&self) -> &[Vendor] {
        &self.vendors
    }

    pub fn vendor(&self, id: &str) -> Option<&Vendor> {
        self.vendor_index.get(id).map(|&i| &self.vendors[i])
    }

    /// True when the vendor is in the active registry.
    pub fn is_active(&self, id: &str) -> bool {
        self.vendor(id).is_some_and(|v| v.active)
    }

    /// All payments, ordered by (date, id).
    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    /// Payments to one vendor, ordered by (date, id).
    pub fn payments_for_vendor<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a Payment> + 'a {
        self.payments_by_vendor
            .get(id)
            .into_iter()
            .flatten()
            .map(move |&i| &self.payments[i])
    }

    pub fn contracts(&self) -> &[Contract] {
        &self.contracts
    }

    pub fn employees(&self) -> &[Employee] {
        &self.employees
    }

    pub fn exclusions(&self) -> &[ExclusionEntry] {
        &self.exclusions
    }

    pub fn contributions(&self) -> &[CampaignContribution] {
        &self.contributions
    }

    pub fn warnings(&self) -> &[NormalizationWarning] {
        &self.warnings
    }
}

fn collect_warnings(vendors: &[Vendor], exclusions: &[ExclusionEntry]) -> Vec<NormalizationWarning> {
    let mut warnings = Vec::new();
    for v in vendors {
        if let Confidence::Low(reason) = v.name_confidence {
            warnings.push(NormalizationWarning {
                kind: EntityKind::Vendor,
                record_id: v.id.clone(),
                field: "name",
                raw: v.canonical_name.clone(),
                reason,
            });
        }
        if let (Some(Confidence::Low(reason)), Some(key)) = (v.address_confidence, &v.address_key) {
            warnings.push(NormalizationWarning {
                kind: EntityKind::Vendor,
                record_id: v.id.clone(),
                field: "address",
                raw: key.clone(),
                reason,
            });
        }
    }
    for x in exclusions {
        if let Confidence::Low(reason) = x.name_confidence {
            warnings.push(NormalizationWarning {
                kind: EntityKind::Exclusion,
                record_id: x.id.clone(),
                field: "name",
                raw: x.name.clone(),
                reason,
            });
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn vendor(id: &str, name: &str) -> VendorRecord {
        VendorRecord {
            id: id.into(),
            name: name.into(),
            address: None,
            tax_id: None,
            registration_id: None,
            active: true,
            officers: vec![],
            owned_vendor_ids: vec![],
        }
    }

    fn payment(id: &str, vendor_id: &str, day: u32) -> PaymentRecord {
        PaymentRecord {
            id: id.into(),
            vendor_id: vendor_id.into(),
            amount: 100.0,
            date: date(2024, 3, day),
            agency: "DOT".into(),
            contract_id: None,
        }
    }

    #[test]
    fn collections_are_sorted_and_indexed() {
        let records = SnapshotRecords {
            vendors: vec![vendor("V2", "Beta LLC"), vendor("V1", "Alpha Inc")],
            payments: vec![payment("P3", "V1", 5), payment("P1", "V2", 9), payment("P2", "V1", 1)],
            ..Default::default()
        };
        let snap = Snapshot::build("w1", None, records);
        assert_eq!(snap.vendors()[0].id, "V1");
        assert_eq!(snap.vendor("V2").map(|v| v.normalized_name.as_str()), Some("BETA"));
        let ids: Vec<&str> = snap.payments().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["P2", "P3", "P1"]);
        let v1: Vec<&str> = snap.payments_for_vendor("V1").map(|p| p.id.as_str()).collect();
        assert_eq!(v1, vec!["P2", "P3"]);
        assert_eq!(snap.payments_for_vendor("V404").count(), 0);
        assert_eq!(snap.as_of(), date(2024, 3, 9));
    }

    #[test]
    fn duplicate_ids_keep_first() {
        let records = SnapshotRecords {
            vendors: vec![vendor("V1", "Alpha"), vendor("V1", "Alpha Again")],
            ..Default::default()
        };
        let snap = Snapshot::build("w1", Some(date(2024, 1, 1)), records);
        assert_eq!(snap.vendors().len(), 1);
        assert_eq!(snap.vendors()[0].canonical_name, "Alpha");
    }

    #[test]
    fn low_confidence_names_become_warnings() {
        let mut bad = vendor("V3", "Smith, John");
        bad.address = Some("somewhere".into());
        let records = SnapshotRecords {
            vendors: vec![vendor("V1", "Acme LLC"), bad],
            ..Default::default()
        };
        let snap = Snapshot::build("w1", Some(date(2024, 1, 1)), records);
        let fields: Vec<&str> = snap.warnings().iter().map(|w| w.field).collect();
        assert_eq!(fields, vec!["name", "address"]);
        assert!(snap.warnings().iter().all(|w| w.record_id == "V3"));
    }

    #[test]
    fn inactive_vendors_are_not_active() {
        let mut gone = vendor("V2", "Gone Corp");
        gone.active = false;
        let records = SnapshotRecords {
            vendors: vec![vendor("V1", "Here"), gone],
            ..Default::default()
        };
        let snap = Snapshot::build("w1", Some(date(2024, 1, 1)), records);
        assert!(snap.is_active("V1"));
        assert!(!snap.is_active("V2"));
        assert!(!snap.is_active("V3"));
    }
}
