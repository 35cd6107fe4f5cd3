//! Snapshot sources: the read side of the ingestion collaborator.
//!
//! A source returns every entity collection as of one named watermark. The
//! engine asks for a watermark by name, or for the latest one.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::NaiveDate;
use fraudit_core::{Snapshot, SnapshotRecords};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid records in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no watermarks available")]
    NoWatermark,

    #[error("unknown watermark '{0}'")]
    UnknownWatermark(String),

    #[error("source lock poisoned")]
    LockPoisoned,
}

pub trait SnapshotSource: Send + Sync {
    /// Build the snapshot for `watermark`, or for the latest watermark.
    fn load(&self, watermark: Option<&str>) -> Result<Snapshot, SourceError>;
}

// ── In-memory source ────────────────────────────────────────────────

/// Records held in memory, keyed by watermark.
#[derive(Default)]
pub struct MemorySource {
    batches: RwLock<BTreeMap<String, (Option<NaiveDate>, SnapshotRecords)>>,
}

impl MemorySource {
    pub fn new(watermark: impl Into<String>, records: SnapshotRecords) -> Self {
        let source = Self::default();
        source.insert(watermark, None, records);
        source
    }

    /// Add or replace a watermark. `as_of` defaults to the latest record date.
    pub fn insert(
        &self,
        watermark: impl Into<String>,
        as_of: Option<NaiveDate>,
        records: SnapshotRecords,
    ) {
        if let Ok(mut batches) = self.batches.write() {
            batches.insert(watermark.into(), (as_of, records));
        }
    }
}

impl SnapshotSource for MemorySource {
    fn load(&self, watermark: Option<&str>) -> Result<Snapshot, SourceError> {
        let batches = self.batches.read().map_err(|_| SourceError::LockPoisoned)?;
        let (name, (as_of, records)) = match watermark {
            Some(w) => batches
                .get_key_value(w)
                .ok_or_else(|| SourceError::UnknownWatermark(w.to_string()))?,
            None => batches.last_key_value().ok_or(SourceError::NoWatermark)?,
        };
        Ok(Snapshot::build(name.clone(), *as_of, records.clone()))
    }
}

// ── JSON directory source ───────────────────────────────────────────

/// Reads `<root>/<watermark>/<collection>.json`, one JSON array per entity
/// collection. A missing file is an empty collection. An optional
/// `watermark.json` (`{"as_of": "YYYY-MM-DD"}`) pins the snapshot date.
pub struct JsonDirSource {
    root: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
struct WatermarkMeta {
    #[serde(default)]
    as_of: Option<NaiveDate>,
}

fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T, SourceError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(source) => {
            return Err(SourceError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&raw).map_err(|source| SourceError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl JsonDirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Watermark directory names, sorted ascending.
    pub fn watermarks(&self) -> Result<Vec<String>, SourceError> {
        let entries = fs::read_dir(&self.root).map_err(|source| SourceError::Io {
            path: self.root.clone(),
            source,
        })?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| SourceError::Io {
                path: self.root.clone(),
                source,
            })?;
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

impl SnapshotSource for JsonDirSource {
    fn load(&self, watermark: Option<&str>) -> Result<Snapshot, SourceError> {
        let name = match watermark {
            Some(w) => w.to_string(),
            None => self.watermarks()?.pop().ok_or(SourceError::NoWatermark)?,
        };
        let dir = self.root.join(&name);
        if !dir.is_dir() {
            return Err(SourceError::UnknownWatermark(name));
        }

        let records = SnapshotRecords {
            vendors: read_json(&dir.join("vendors.json"))?,
            payments: read_json(&dir.join("payments.json"))?,
            contracts: read_json(&dir.join("contracts.json"))?,
            employees: read_json(&dir.join("employees.json"))?,
            exclusions: read_json(&dir.join("exclusions.json"))?,
            contributions: read_json(&dir.join("contributions.json"))?,
        };
        let meta: WatermarkMeta = read_json(&dir.join("watermark.json"))?;
        debug!(
            watermark = %name,
            vendors = records.vendors.len(),
            payments = records.payments.len(),
            "records loaded"
        );
        Ok(Snapshot::build(name, meta.as_of, records))
    }
}
