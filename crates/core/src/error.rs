use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::alert::RuleId;
use crate::config::ValidationError;
use crate::entity::EntityKind;
use crate::normalize::LowConfidence;

/// Non-fatal: a record field normalized with low confidence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizationWarning {
    pub kind: EntityKind,
    pub record_id: String,
    pub field: &'static str,
    pub raw: String,
    pub reason: LowConfidence,
}

impl std::fmt::Display for NormalizationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} {} {:?}: {}",
            self.kind, self.record_id, self.field, self.raw, self.reason
        )
    }
}

/// Failure of a single rule evaluator. Isolated to that rule.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    #[error("{rule} failed: {reason}")]
    Evaluation { rule: RuleId, reason: String },

    #[error("{rule} rejected malformed {kind} record '{record_id}': {reason}")]
    MalformedRecord {
        rule: RuleId,
        kind: EntityKind,
        record_id: String,
        reason: String,
    },

    #[error("{rule} timed out after {seconds}s")]
    Timeout { rule: RuleId, seconds: u64 },

    #[error("{rule} panicked: {message}")]
    Panicked { rule: RuleId, message: String },
}

impl RuleError {
    pub fn rule(&self) -> RuleId {
        match self {
            RuleError::Evaluation { rule, .. }
            | RuleError::MalformedRecord { rule, .. }
            | RuleError::Timeout { rule, .. }
            | RuleError::Panicked { rule, .. } => *rule,
        }
    }
}

/// Fatal at startup: configuration could not be loaded or is invalid.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid value '{value}' for {key}")]
    Env { key: String, value: String },

    #[error("invalid configuration: {}", join_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.path, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}
