//! Entity records: raw serde rows as delivered by ingestion, and the typed
//! records built from them once per snapshot.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::normalize::{
    normalize_address, normalize_name, normalize_person_name, normalize_tax_id, Confidence,
};

pub type VendorId = String;

/// Kind of record an [`EvidenceRef`](crate::EvidenceRef) points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Vendor,
    Payment,
    Contract,
    Employee,
    Exclusion,
    Contribution,
    Cluster,
    Agency,
    FiscalYear,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Vendor => "vendor",
            EntityKind::Payment => "payment",
            EntityKind::Contract => "contract",
            EntityKind::Employee => "employee",
            EntityKind::Exclusion => "exclusion",
            EntityKind::Contribution => "contribution",
            EntityKind::Cluster => "cluster",
            EntityKind::Agency => "agency",
            EntityKind::FiscalYear => "fiscal_year",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "vendor" => Some(EntityKind::Vendor),
            "payment" => Some(EntityKind::Payment),
            "contract" => Some(EntityKind::Contract),
            "employee" => Some(EntityKind::Employee),
            "exclusion" => Some(EntityKind::Exclusion),
            "contribution" => Some(EntityKind::Contribution),
            "cluster" => Some(EntityKind::Cluster),
            "agency" => Some(EntityKind::Agency),
            "fiscal_year" => Some(EntityKind::FiscalYear),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Raw records ─────────────────────────────────────────────────────

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub tax_id: Option<String>,
    #[serde(default)]
    pub registration_id: Option<String>,
    /// Present in the active vendor registry.
    #[serde(default = "default_active")]
    pub active: bool,
    /// Owner and officer names.
    #[serde(default)]
    pub officers: Vec<String>,
    /// Vendors this vendor owns or controls.
    #[serde(default)]
    pub owned_vendor_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: String,
    pub vendor_id: String,
    pub amount: f64,
    pub date: NaiveDate,
    pub agency: String,
    #[serde(default)]
    pub contract_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractRecord {
    pub id: String,
    pub vendor_id: String,
    pub amount: f64,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub agency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployeeRecord {
    pub id: String,
    pub name: String,
    pub agency: String,
    pub salary: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusionRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tax_id: Option<String>,
    pub exclusion_date: NaiveDate,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributionRecord {
    pub id: String,
    pub contributor_name: String,
    pub recipient: String,
    pub amount: f64,
    pub date: NaiveDate,
}

// ── Typed records ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Vendor {
    pub id: VendorId,
    pub canonical_name: String,
    pub normalized_name: String,
    pub name_confidence: Confidence,
    pub address_key: Option<String>,
    pub address_confidence: Option<Confidence>,
    pub tax_id: Option<String>,
    pub registration_id: Option<String>,
    pub active: bool,
    /// Officer names, person-normalized.
    pub officers: Vec<String>,
    pub owned_vendor_ids: Vec<VendorId>,
}

impl From<VendorRecord> for Vendor {
    fn from(r: VendorRecord) -> Self {
        let (normalized_name, name_confidence) = normalize_name(&r.name);
        let address = r
            .address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(normalize_address);
        let mut officers: Vec<String> = r
            .officers
            .iter()
            .map(|o| normalize_person_name(o))
            .filter(|o| !o.is_empty())
            .collect();
        officers.sort();
        officers.dedup();
        let mut owned_vendor_ids = r.owned_vendor_ids;
        owned_vendor_ids.sort();
        owned_vendor_ids.dedup();

        Self {
            id: r.id,
            canonical_name: r.name.trim().to_string(),
            normalized_name,
            name_confidence,
            address_key: address.as_ref().map(|(key, _)| key.clone()),
            address_confidence: address.map(|(_, c)| c),
            tax_id: r.tax_id.as_deref().and_then(normalize_tax_id),
            registration_id: r
                .registration_id
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            active: r.active,
            officers,
            owned_vendor_ids,
        }
    }
}

impl Vendor {
    /// Registration id, falling back to the vendor id when none was recorded.
    pub fn registration(&self) -> &str {
        self.registration_id.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    pub id: String,
    pub vendor_id: VendorId,
    pub amount: f64,
    pub date: NaiveDate,
    pub agency: String,
    pub contract_id: Option<String>,
}

impl Payment {
    /// Amount in whole cents, for exact grouping.
    pub fn amount_cents(&self) -> i64 {
        (self.amount * 100.0).round() as i64
    }
}

impl From<PaymentRecord> for Payment {
    fn from(r: PaymentRecord) -> Self {
        Self {
            id: r.id,
            vendor_id: r.vendor_id,
            amount: r.amount,
            date: r.date,
            agency: r.agency.trim().to_uppercase(),
            contract_id: r.contract_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Contract {
    pub id: String,
    pub vendor_id: VendorId,
    pub amount: f64,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub agency: String,
}

impl From<ContractRecord> for Contract {
    fn from(r: ContractRecord) -> Self {
        Self {
            id: r.id,
            vendor_id: r.vendor_id,
            amount: r.amount,
            start_date: r.start_date,
            end_date: r.end_date,
            agency: r.agency.trim().to_uppercase(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Employee {
    pub id: String,
    pub name: String,
    pub normalized_name: String,
    pub agency: String,
    pub salary: f64,
}

impl From<EmployeeRecord> for Employee {
    fn from(r: EmployeeRecord) -> Self {
        Self {
            normalized_name: normalize_person_name(&r.name),
            id: r.id,
            name: r.name,
            agency: r.agency.trim().to_uppercase(),
            salary: r.salary,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExclusionEntry {
    pub id: String,
    pub name: String,
    pub normalized_name: String,
    pub name_confidence: Confidence,
    pub tax_id: Option<String>,
    pub exclusion_date: NaiveDate,
    pub source: String,
}

impl From<ExclusionRecord> for ExclusionEntry {
    fn from(r: ExclusionRecord) -> Self {
        let (normalized_name, name_confidence) = normalize_name(&r.name);
        Self {
            id: r.id,
            name: r.name,
            normalized_name,
            name_confidence,
            tax_id: r.tax_id.as_deref().and_then(normalize_tax_id),
            exclusion_date: r.exclusion_date,
            source: r.source,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CampaignContribution {
    pub id: String,
    /// Contributor name as filed.
    pub contributor_raw: String,
    /// Business-normalized contributor name.
    pub contributor_name: String,
    /// Person-normalized contributor name, for officer matching.
    pub contributor_person: String,
    pub recipient: String,
    pub amount: f64,
    pub date: NaiveDate,
}

impl From<ContributionRecord> for CampaignContribution {
    fn from(r: ContributionRecord) -> Self {
        Self {
            contributor_name: normalize_name(&r.contributor_name).0,
            contributor_person: normalize_person_name(&r.contributor_name),
            contributor_raw: r.contributor_name,
            id: r.id,
            recipient: r.recipient,
            amount: r.amount,
            date: r.date,
        }
    }
}
