//! Alert persistence.
//!
//! A run's alert decisions arrive as one [`AlertChangeSet`] and are applied
//! all-or-nothing: stores stage the change on a copy and only swap it in
//! once every update has been applied.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use chrono::Utc;
use fraudit_core::{Alert, AlertStatus};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid alert file {path}: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown alert {0}")]
    UnknownAlert(Uuid),

    #[error("store lock poisoned")]
    LockPoisoned,

    /// Failure requested through [`MemoryAlertStore::fail_next_commit`].
    #[error("injected failure: {0}")]
    Injected(String),
}

/// Everything one run wants to persist.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlertChangeSet {
    pub created: Vec<Alert>,
    /// Existing alerts whose evidence grew. Only the evidence is applied;
    /// status stays whatever the stored alert says.
    pub updated: Vec<Alert>,
}

impl AlertChangeSet {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty()
    }
}

pub trait AlertStore: Send + Sync {
    /// Every alert, in creation order.
    fn load_all(&self) -> Result<Vec<Alert>, StoreError>;

    /// Apply a change set atomically.
    fn commit(&self, changes: &AlertChangeSet) -> Result<(), StoreError>;

    fn set_status(&self, id: Uuid, status: AlertStatus) -> Result<Alert, StoreError>;
}

/// Apply `changes` to `alerts` in place. Fails without partial effects
/// visible to callers that staged `alerts` as a copy.
///
/// Updates only append evidence. A status set by a reviewer after the run
/// loaded its copy is kept.
fn apply(alerts: &mut Vec<Alert>, changes: &AlertChangeSet) -> Result<(), StoreError> {
    for updated in &changes.updated {
        let slot = alerts
            .iter_mut()
            .find(|a| a.id == updated.id)
            .ok_or(StoreError::UnknownAlert(updated.id))?;
        slot.extend_evidence(&updated.evidence, updated.updated_at);
    }
    alerts.extend(changes.created.iter().cloned());
    Ok(())
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError {
    let path = path.to_path_buf();
    move |source| StoreError::Io { path, source }
}

fn update_status(alerts: &mut [Alert], id: Uuid, status: AlertStatus) -> Result<Alert, StoreError> {
    let alert = alerts
        .iter_mut()
        .find(|a| a.id == id)
        .ok_or(StoreError::UnknownAlert(id))?;
    if alert.status != status {
        alert.status = status;
        alert.updated_at = Utc::now();
    }
    Ok(alert.clone())
}

// ── In-memory store ─────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryAlertStore {
    alerts: RwLock<Vec<Alert>>,
    fail_next: AtomicBool,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `commit` fail without touching stored alerts.
    pub fn fail_next_commit(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl AlertStore for MemoryAlertStore {
    fn load_all(&self) -> Result<Vec<Alert>, StoreError> {
        let guard = self.alerts.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(guard.clone())
    }

    fn commit(&self, changes: &AlertChangeSet) -> Result<(), StoreError> {
        let mut guard = self.alerts.write().map_err(|_| StoreError::LockPoisoned)?;
        let mut staged = guard.clone();
        apply(&mut staged, changes)?;
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Injected("commit rejected".into()));
        }
        *guard = staged;
        Ok(())
    }

    fn set_status(&self, id: Uuid, status: AlertStatus) -> Result<Alert, StoreError> {
        let mut guard = self.alerts.write().map_err(|_| StoreError::LockPoisoned)?;
        update_status(&mut guard, id, status)
    }
}

// ── JSON file store ─────────────────────────────────────────────────

/// Alerts kept as one pretty-printed JSON array. Writes go to a sibling
/// `.tmp` file that is renamed over the target.
pub struct JsonFileAlertStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl JsonFileAlertStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Vec<Alert>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.path)(e)),
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw).map_err(|source| StoreError::Serde {
            path: self.path.clone(),
            source,
        })
    }

    fn write(&self, alerts: &[Alert]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let json = serde_json::to_string_pretty(alerts).map_err(|source| StoreError::Serde {
            path: self.path.clone(),
            source,
        })?;
        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, json).map_err(io_err(&temp))?;
        fs::rename(&temp, &self.path).map_err(io_err(&self.path))?;
        debug!(path = %self.path.display(), count = alerts.len(), "alerts written");
        Ok(())
    }
}

impl AlertStore for JsonFileAlertStore {
    fn load_all(&self) -> Result<Vec<Alert>, StoreError> {
        let _guard = self.lock.read().map_err(|_| StoreError::LockPoisoned)?;
        self.read()
    }

    fn commit(&self, changes: &AlertChangeSet) -> Result<(), StoreError> {
        let _guard = self.lock.write().map_err(|_| StoreError::LockPoisoned)?;
        let mut alerts = self.read()?;
        apply(&mut alerts, changes)?;
        self.write(&alerts)
    }

    fn set_status(&self, id: Uuid, status: AlertStatus) -> Result<Alert, StoreError> {
        let _guard = self.lock.write().map_err(|_| StoreError::LockPoisoned)?;
        let mut alerts = self.read()?;
        let alert = update_status(&mut alerts, id, status)?;
        self.write(&alerts)?;
        Ok(alert)
    }
}
