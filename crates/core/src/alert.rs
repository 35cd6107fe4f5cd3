//! Alerts, candidate alerts, and the values they are built from.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::entity::EntityKind;

// ── Rule ids ────────────────────────────────────────────────────────

/// The detection rules, in evaluation and provenance order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleId {
    Debarment,
    ContractSplitting,
    DuplicatePayments,
    VendorClustering,
    GhostVendors,
    EmployeeVendor,
    PayToPlay,
    FiscalYearRush,
    RelatedPartyNetwork,
    PaymentAnomalies,
}

impl RuleId {
    pub const ALL: [RuleId; 10] = [
        RuleId::Debarment,
        RuleId::ContractSplitting,
        RuleId::DuplicatePayments,
        RuleId::VendorClustering,
        RuleId::GhostVendors,
        RuleId::EmployeeVendor,
        RuleId::PayToPlay,
        RuleId::FiscalYearRush,
        RuleId::RelatedPartyNetwork,
        RuleId::PaymentAnomalies,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::Debarment => "debarment",
            RuleId::ContractSplitting => "contract-splitting",
            RuleId::DuplicatePayments => "duplicate-payments",
            RuleId::VendorClustering => "vendor-clustering",
            RuleId::GhostVendors => "ghost-vendors",
            RuleId::EmployeeVendor => "employee-vendor",
            RuleId::PayToPlay => "pay-to-play",
            RuleId::FiscalYearRush => "fiscal-year-rush",
            RuleId::RelatedPartyNetwork => "related-party-network",
            RuleId::PaymentAnomalies => "payment-anomalies",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleId::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("unknown rule id '{s}'"))
    }
}

// ── Severity / status ───────────────────────────────────────────────

/// Alert severity. Ordered: `Low < Medium < MediumHigh < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    Low,
    Medium,
    MediumHigh,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::MediumHigh => write!(f, "MEDIUM-HIGH"),
            Severity::High => write!(f, "HIGH"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Open,
    Dismissed,
    Confirmed,
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertStatus::Open => write!(f, "open"),
            AlertStatus::Dismissed => write!(f, "dismissed"),
            AlertStatus::Confirmed => write!(f, "confirmed"),
        }
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(AlertStatus::Open),
            "dismissed" => Ok(AlertStatus::Dismissed),
            "confirmed" => Ok(AlertStatus::Confirmed),
            other => Err(format!("unknown alert status '{other}'")),
        }
    }
}

// ── Evidence ────────────────────────────────────────────────────────

/// Reference to one entity or record, written `kind:id`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EvidenceRef {
    pub kind: EntityKind,
    pub id: String,
}

impl EvidenceRef {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }

    pub fn vendor(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Vendor, id)
    }

    pub fn payment(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Payment, id)
    }

    pub fn contract(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Contract, id)
    }

    pub fn agency(id: impl Into<String>) -> Self {
        Self::new(EntityKind::Agency, id)
    }
}

impl fmt::Display for EvidenceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl FromStr for EvidenceRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("evidence ref '{s}' is not kind:id"))?;
        let kind = EntityKind::parse(kind).ok_or_else(|| format!("unknown evidence kind '{kind}'"))?;
        if id.is_empty() {
            return Err(format!("evidence ref '{s}' has an empty id"));
        }
        Ok(Self::new(kind, id))
    }
}

impl Serialize for EvidenceRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EvidenceRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Canonical merge key for a set of primary evidence refs: sorted, deduped,
/// joined by `|`.
pub fn primary_key<'a>(refs: impl IntoIterator<Item = &'a EvidenceRef>) -> String {
    let mut keys: Vec<String> = refs.into_iter().map(|r| r.to_string()).collect();
    keys.sort();
    keys.dedup();
    keys.join("|")
}

// ── Candidate alerts ────────────────────────────────────────────────

/// Unmerged finding produced by one evaluator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateAlert {
    pub rule_id: RuleId,
    pub severity: Severity,
    /// Identity of the fact this alert is about; drives merge and dedup.
    pub primary_key: String,
    /// Primary refs first (sorted), then supporting context in insertion order.
    pub evidence_refs: Vec<EvidenceRef>,
    pub explanation: String,
}

impl CandidateAlert {
    pub fn new(
        rule_id: RuleId,
        severity: Severity,
        primary: impl IntoIterator<Item = EvidenceRef>,
        explanation: impl Into<String>,
    ) -> Self {
        let mut primary: Vec<EvidenceRef> = primary.into_iter().collect();
        primary.sort();
        primary.dedup();
        Self {
            rule_id,
            severity,
            primary_key: primary_key(&primary),
            evidence_refs: primary,
            explanation: explanation.into(),
        }
    }

    /// Append supporting evidence that does not participate in the key.
    pub fn with_context(mut self, refs: impl IntoIterator<Item = EvidenceRef>) -> Self {
        for r in refs {
            if !self.evidence_refs.contains(&r) {
                self.evidence_refs.push(r);
            }
        }
        self
    }
}

// ── Alerts ──────────────────────────────────────────────────────────

/// Persisted alert. Append-only: after creation only `status` and the
/// evidence list (by extension) change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    /// Contributing rules, in rule order. Never empty.
    pub rule_ids: Vec<RuleId>,
    pub primary_key: String,
    pub severity: Severity,
    pub status: AlertStatus,
    pub evidence: Vec<EvidenceRef>,
    #[serde(default)]
    pub explanations: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Alert {
    pub fn is_open(&self) -> bool {
        self.status == AlertStatus::Open
    }

    /// Append refs not already present. Returns how many were added.
    pub fn extend_evidence<'a>(
        &mut self,
        refs: impl IntoIterator<Item = &'a EvidenceRef>,
        now: DateTime<Utc>,
    ) -> usize {
        let mut seen: IndexSet<EvidenceRef> = self.evidence.drain(..).collect();
        let before = seen.len();
        for r in refs {
            seen.insert(r.clone());
        }
        let added = seen.len() - before;
        self.evidence = seen.into_iter().collect();
        if added > 0 {
            self.updated_at = now;
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_low_to_high() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::MediumHigh);
        assert!(Severity::MediumHigh < Severity::High);
        assert_eq!(Severity::MediumHigh.to_string(), "MEDIUM-HIGH");
    }

    #[test]
    fn rule_ids_parse_from_kebab_case() {
        for rule in RuleId::ALL {
            assert_eq!(rule.as_str().parse::<RuleId>(), Ok(rule));
        }
        assert!("no-such-rule".parse::<RuleId>().is_err());
    }

    #[test]
    fn evidence_ref_serializes_as_string() {
        let r = EvidenceRef::payment("P-1");
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, "\"payment:P-1\"");
        let back: EvidenceRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
        assert!("payment".parse::<EvidenceRef>().is_err());
        assert!("widget:1".parse::<EvidenceRef>().is_err());
    }

    #[test]
    fn candidate_key_ignores_primary_order() {
        let a = CandidateAlert::new(
            RuleId::DuplicatePayments,
            Severity::Low,
            [EvidenceRef::payment("P2"), EvidenceRef::vendor("V1"), EvidenceRef::payment("P1")],
            "dup",
        );
        let b = CandidateAlert::new(
            RuleId::ContractSplitting,
            Severity::Medium,
            [EvidenceRef::payment("P1"), EvidenceRef::payment("P2"), EvidenceRef::vendor("V1")],
            "split",
        );
        assert_eq!(a.primary_key, "payment:P1|payment:P2|vendor:V1");
        assert_eq!(a.primary_key, b.primary_key);
    }

    #[test]
    fn context_refs_follow_primary_refs() {
        let c = CandidateAlert::new(RuleId::Debarment, Severity::High, [EvidenceRef::vendor("V1")], "x")
            .with_context([EvidenceRef::new(EntityKind::Exclusion, "X1"), EvidenceRef::vendor("V1")]);
        assert_eq!(c.primary_key, "vendor:V1");
        assert_eq!(c.evidence_refs.len(), 2);
        assert_eq!(c.evidence_refs[1].kind, EntityKind::Exclusion);
    }

    #[test]
    fn extend_evidence_appends_only_new_refs() {
        let t0 = Utc::now();
        let mut alert = Alert {
            id: Uuid::new_v4(),
            rule_ids: vec![RuleId::GhostVendors],
            primary_key: "vendor:V9".into(),
            severity: Severity::Medium,
            status: AlertStatus::Open,
            evidence: vec![EvidenceRef::vendor("V9"), EvidenceRef::payment("P1")],
            explanations: vec![],
            created_at: t0,
            updated_at: t0,
        };
        let later = t0 + chrono::Duration::seconds(5);
        let added = alert.extend_evidence(
            &[EvidenceRef::payment("P1"), EvidenceRef::payment("P2")],
            later,
        );
        assert_eq!(added, 1);
        assert_eq!(alert.evidence.last(), Some(&EvidenceRef::payment("P2")));
        assert_eq!(alert.updated_at, later);
        assert_eq!(alert.extend_evidence(&[EvidenceRef::payment("P2")], t0), 0);
        assert_eq!(alert.updated_at, later);
    }
}
