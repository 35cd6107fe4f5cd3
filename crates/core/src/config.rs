//! Engine configuration: detection thresholds and engine settings.
//!
//! Loaded from an optional YAML document, then overridden from the
//! environment (`FRAUDIT_<KEY>`, with `{PROFILE}_FRAUDIT_<KEY>` taking
//! precedence when `FRAUDIT_PROFILE` is set), then validated. A validated
//! [`EngineConfig`] is immutable and shared by reference.

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn override_from_env<T: std::str::FromStr>(
    profile: &str,
    name: &str,
    slot: &mut T,
) -> Result<(), ConfigError> {
    let key = format!("FRAUDIT_{}", name.to_uppercase());
    if let Some(raw) = profiled_env_opt(profile, &key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Env { key, value: raw.clone() })?;
    }
    Ok(())
}

// ── Thresholds ──────────────────────────────────────────────────────

/// Per-rule detection thresholds. Amounts are in dollars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub contract_splitting_min: f64,
    pub contract_splitting_max: f64,
    pub contract_splitting_window_days: u32,

    /// Name similarity for vendor clustering and contributor resolution.
    pub vendor_name_similarity: f64,
    pub debarment_name_similarity: f64,
    pub employee_vendor_name_similarity: f64,
    /// Corroborating identifiers (address key, tax id) required to link
    /// two similarly named vendors.
    pub min_corroboration: u8,

    pub duplicate_payment_window_days: u32,
    pub duplicate_payment_min_amount: f64,

    pub ghost_vendor_min_total: f64,

    pub pay_to_play_window_days: u32,
    pub pay_to_play_min_contribution: f64,
    pub related_party_max_depth: u32,

    pub fiscal_year_start_month: u32,
    pub fiscal_year_final_days: u32,
    pub fiscal_year_z_score: f64,
    pub fiscal_year_min_amount: f64,
    pub fiscal_year_min_baseline_months: u32,

    /// Vendors in a network of ownership links and name clusters.
    pub related_party_min_network_size: u32,
    /// Combined payments to a network.
    pub related_party_min_total: f64,

    pub large_first_payment_min: f64,
    /// A vendor whose first payment falls this close to the snapshot date
    /// is new.
    pub new_vendor_window_days: u32,
    /// Exact amounts that count as round. YAML only.
    pub round_number_amounts: Vec<f64>,
    pub round_number_min_count: u32,
    /// Fraction of a vendor's payments that must be the round amount.
    pub round_number_min_share: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            contract_splitting_min: 45_000.0,
            contract_splitting_max: 50_000.0,
            contract_splitting_window_days: 90,
            vendor_name_similarity: 0.85,
            debarment_name_similarity: 0.90,
            employee_vendor_name_similarity: 0.90,
            min_corroboration: 1,
            duplicate_payment_window_days: 7,
            duplicate_payment_min_amount: 100.0,
            ghost_vendor_min_total: 10_000.0,
            pay_to_play_window_days: 365,
            pay_to_play_min_contribution: 5_000.0,
            related_party_max_depth: 3,
            fiscal_year_start_month: 9,
            fiscal_year_final_days: 30,
            fiscal_year_z_score: 3.0,
            fiscal_year_min_amount: 100_000.0,
            fiscal_year_min_baseline_months: 3,
            related_party_min_network_size: 3,
            related_party_min_total: 500_000.0,
            large_first_payment_min: 100_000.0,
            new_vendor_window_days: 730,
            round_number_amounts: vec![10_000.0, 25_000.0, 50_000.0, 100_000.0],
            round_number_min_count: 5,
            round_number_min_share: 0.25,
        }
    }
}

impl Thresholds {
    fn apply_env(&mut self, p: &str) -> Result<(), ConfigError> {
        override_from_env(p, "contract_splitting_min", &mut self.contract_splitting_min)?;
        override_from_env(p, "contract_splitting_max", &mut self.contract_splitting_max)?;
        override_from_env(p, "contract_splitting_window_days", &mut self.contract_splitting_window_days)?;
        override_from_env(p, "vendor_name_similarity", &mut self.vendor_name_similarity)?;
        override_from_env(p, "debarment_name_similarity", &mut self.debarment_name_similarity)?;
        override_from_env(p, "employee_vendor_name_similarity", &mut self.employee_vendor_name_similarity)?;
        override_from_env(p, "min_corroboration", &mut self.min_corroboration)?;
        override_from_env(p, "duplicate_payment_window_days", &mut self.duplicate_payment_window_days)?;
        override_from_env(p, "duplicate_payment_min_amount", &mut self.duplicate_payment_min_amount)?;
        override_from_env(p, "ghost_vendor_min_total", &mut self.ghost_vendor_min_total)?;
        override_from_env(p, "pay_to_play_window_days", &mut self.pay_to_play_window_days)?;
        override_from_env(p, "pay_to_play_min_contribution", &mut self.pay_to_play_min_contribution)?;
        override_from_env(p, "related_party_max_depth", &mut self.related_party_max_depth)?;
        override_from_env(p, "fiscal_year_start_month", &mut self.fiscal_year_start_month)?;
        override_from_env(p, "fiscal_year_final_days", &mut self.fiscal_year_final_days)?;
        override_from_env(p, "fiscal_year_z_score", &mut self.fiscal_year_z_score)?;
        override_from_env(p, "fiscal_year_min_amount", &mut self.fiscal_year_min_amount)?;
        override_from_env(p, "fiscal_year_min_baseline_months", &mut self.fiscal_year_min_baseline_months)?;
        override_from_env(p, "related_party_min_network_size", &mut self.related_party_min_network_size)?;
        override_from_env(p, "related_party_min_total", &mut self.related_party_min_total)?;
        override_from_env(p, "large_first_payment_min", &mut self.large_first_payment_min)?;
        override_from_env(p, "new_vendor_window_days", &mut self.new_vendor_window_days)?;
        override_from_env(p, "round_number_min_count", &mut self.round_number_min_count)?;
        override_from_env(p, "round_number_min_share", &mut self.round_number_min_share)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub thresholds: Thresholds,
}

// ── Engine settings ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Evaluator pool size. 0 = available parallelism.
    pub worker_threads: usize,
    /// Per-evaluator timeout.
    pub rule_timeout_seconds: u64,
    /// Blocking buckets larger than this are skipped and reported.
    pub max_bucket_size: usize,
    /// Audit log entries kept per rule.
    pub audit_max_entries: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            rule_timeout_seconds: 300,
            max_bucket_size: 5_000,
            audit_max_entries: 500,
        }
    }
}

impl EngineSettings {
    /// Resolve `worker_threads`, mapping 0 to the machine's parallelism.
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.worker_threads
        }
    }

    fn apply_env(&mut self, p: &str) -> Result<(), ConfigError> {
        override_from_env(p, "worker_threads", &mut self.worker_threads)?;
        override_from_env(p, "rule_timeout_seconds", &mut self.rule_timeout_seconds)?;
        override_from_env(p, "max_bucket_size", &mut self.max_bucket_size)?;
        override_from_env(p, "audit_max_entries", &mut self.audit_max_entries)?;
        Ok(())
    }
}

// ── Top-level config ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Active profile name (empty = default).
    #[serde(skip)]
    pub profile: String,
    pub detection: DetectionConfig,
    pub engine: EngineSettings,
}

impl EngineConfig {
    /// Parse a YAML document. Missing keys take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load, override from the environment, and validate.
    ///
    /// Call [`load_dotenv`] first for `.env` support. The profile is read
    /// from `FRAUDIT_PROFILE`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_yaml_str(&yaml)?
            }
            None => Self::default(),
        };
        let profile = env_opt("FRAUDIT_PROFILE").unwrap_or_default().to_uppercase();
        config.apply_env(&profile)?;
        config.validated()
    }

    /// Apply `FRAUDIT_*` overrides for the given profile.
    pub fn apply_env(&mut self, profile: &str) -> Result<(), ConfigError> {
        self.profile = profile.to_uppercase();
        let p = self.profile.clone();
        self.detection.thresholds.apply_env(&p)?;
        self.engine.apply_env(&p)
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.detection.thresholds
    }

    /// Consume the config, returning it only if it validates.
    pub fn validated(self) -> Result<Self, ConfigError> {
        let result = self.validate();
        for w in &result.warnings {
            tracing::warn!(path = %w.path, "{}", w.message);
        }
        if result.valid {
            Ok(self)
        } else {
            Err(ConfigError::Validation(result.errors))
        }
    }

    /// Check every constraint, collecting all violations.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();
        let t = &self.detection.thresholds;
        let base = "detection.thresholds";

        if t.contract_splitting_min <= 0.0 {
            result.error(format!("{base}.contract_splitting_min"), "must be positive");
        }
        if !(t.contract_splitting_min < t.contract_splitting_max) {
            result.error(
                format!("{base}.contract_splitting_max"),
                format!(
                    "must be greater than contract_splitting_min ({} >= {})",
                    t.contract_splitting_min, t.contract_splitting_max
                ),
            );
        }

        for (name, value) in [
            ("vendor_name_similarity", t.vendor_name_similarity),
            ("debarment_name_similarity", t.debarment_name_similarity),
            ("employee_vendor_name_similarity", t.employee_vendor_name_similarity),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                result.error(format!("{base}.{name}"), format!("must be in (0, 1], got {value}"));
            } else if value < 0.5 {
                result.warn(format!("{base}.{name}"), "similarity below 0.5 will match unrelated names");
            }
        }

        for (name, value) in [
            ("contract_splitting_window_days", t.contract_splitting_window_days),
            ("duplicate_payment_window_days", t.duplicate_payment_window_days),
            ("pay_to_play_window_days", t.pay_to_play_window_days),
            ("fiscal_year_min_baseline_months", t.fiscal_year_min_baseline_months),
            ("new_vendor_window_days", t.new_vendor_window_days),
            ("round_number_min_count", t.round_number_min_count),
        ] {
            if value < 1 {
                result.error(format!("{base}.{name}"), "must be at least 1");
            }
        }

        if !(1..=120).contains(&t.fiscal_year_final_days) {
            result.error(format!("{base}.fiscal_year_final_days"), "must be between 1 and 120");
        }
        if !(1..=12).contains(&t.fiscal_year_start_month) {
            result.error(format!("{base}.fiscal_year_start_month"), "must be a month number 1-12");
        }
        if !(t.fiscal_year_z_score > 0.0) {
            result.error(format!("{base}.fiscal_year_z_score"), "must be positive");
        }
        if t.min_corroboration > 2 {
            result.error(
                format!("{base}.min_corroboration"),
                "only two corroborators exist (address key, tax id)",
            );
        }
        for (name, value) in [
            ("duplicate_payment_min_amount", t.duplicate_payment_min_amount),
            ("ghost_vendor_min_total", t.ghost_vendor_min_total),
            ("pay_to_play_min_contribution", t.pay_to_play_min_contribution),
            ("fiscal_year_min_amount", t.fiscal_year_min_amount),
            ("related_party_min_total", t.related_party_min_total),
            ("large_first_payment_min", t.large_first_payment_min),
        ] {
            if !(value >= 0.0) {
                result.error(format!("{base}.{name}"), "must not be negative");
            }
        }

        if t.related_party_min_network_size < 2 {
            result.error(format!("{base}.related_party_min_network_size"), "must be at least 2");
        }
        if !(t.round_number_min_share > 0.0 && t.round_number_min_share <= 1.0) {
            result.error(
                format!("{base}.round_number_min_share"),
                format!("must be in (0, 1], got {}", t.round_number_min_share),
            );
        }
        if t.round_number_amounts.iter().any(|a| !(*a > 0.0)) {
            result.error(format!("{base}.round_number_amounts"), "amounts must be positive");
        }

        if self.engine.rule_timeout_seconds < 1 {
            result.error("engine.rule_timeout_seconds", "must be at least 1");
        }
        if self.engine.max_bucket_size < 2 {
            result.error("engine.max_bucket_size", "must be at least 2");
        }
        if self.engine.audit_max_entries == 0 {
            result.warn("engine.audit_max_entries", "audit log disabled");
        }

        result
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print the effective thresholds for startup logs.
    pub fn log_summary(&self) {
        let t = &self.detection.thresholds;
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  splitting:   band=[{}, {}], window={}d",
            t.contract_splitting_min, t.contract_splitting_max, t.contract_splitting_window_days
        );
        tracing::info!(
            "  similarity:  vendor={}, debarment={}, employee={}, corroboration={}",
            t.vendor_name_similarity,
            t.debarment_name_similarity,
            t.employee_vendor_name_similarity,
            t.min_corroboration
        );
        tracing::info!(
            "  duplicates:  window={}d, min_amount={}",
            t.duplicate_payment_window_days, t.duplicate_payment_min_amount
        );
        tracing::info!(
            "  pay-to-play: window={}d, min_contribution={}, depth={}",
            t.pay_to_play_window_days, t.pay_to_play_min_contribution, t.related_party_max_depth
        );
        tracing::info!(
            "  fiscal year: start_month={}, final_days={}, z={}, min_amount={}",
            t.fiscal_year_start_month, t.fiscal_year_final_days, t.fiscal_year_z_score, t.fiscal_year_min_amount
        );
        tracing::info!(
            "  networks:    min_size={}, min_total={}",
            t.related_party_min_network_size, t.related_party_min_total
        );
        tracing::info!(
            "  anomalies:   first_payment={} within {}d, round={:?} x{} >= {}",
            t.large_first_payment_min,
            t.new_vendor_window_days,
            t.round_number_amounts,
            t.round_number_min_count,
            t.round_number_min_share
        );
        tracing::info!(
            "  engine:      workers={}, timeout={}s, max_bucket={}",
            self.engine.resolved_worker_threads(),
            self.engine.rule_timeout_seconds,
            self.engine.max_bucket_size
        );
    }
}

// ── Validation ──────────────────────────────────────────────────────

/// Overall validation outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

/// A blocking validation error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Dotted location, e.g. `"detection.thresholds.contract_splitting_max"`.
    pub path: String,
    pub message: String,
}

/// A non-blocking advisory warning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationResult {
    fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.valid = false;
        self.errors.push(ValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ValidationWarning {
            path: path.into(),
            message: message.into(),
        });
    }
}
