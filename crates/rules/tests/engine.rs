//! End-to-end runs through the engine: snapshot, dispatch, merge, commit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use fraudit_core::{
    AlertStatus, CandidateAlert, EmployeeRecord, EngineConfig, PaymentRecord, RuleError, RuleId,
    Severity, SnapshotRecords, VendorRecord,
};
use fraudit_rules::{
    evaluator_for, AlertStore, Engine, EngineError, EvalContext, JsonDirSource, JsonFileAlertStore,
    LogQueryParams, MemoryAlertStore, MemorySource, RuleEvaluator, RuleOutcome, RunPhase,
    StoreError,
};

// ── Fixtures ────────────────────────────────────────────────────────

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

fn payment(id: &str, vendor_id: &str, amount: f64, date: NaiveDate) -> PaymentRecord {
    PaymentRecord {
        id: id.into(),
        vendor_id: vendor_id.into(),
        amount,
        date,
        agency: "DOT".into(),
        contract_id: None,
    }
}

/// Three identical $16,000 payments in one week: contract splitting and
/// duplicate payments over the same vendor and payments.
fn split_records() -> SnapshotRecords {
    SnapshotRecords {
        vendors: vec![vendor("V1", "Acme Paving LLC")],
        payments: vec![
            payment("P1", "V1", 16_000.0, date(2024, 3, 1)),
            payment("P2", "V1", 16_000.0, date(2024, 3, 3)),
            payment("P3", "V1", 16_000.0, date(2024, 3, 5)),
        ],
        ..Default::default()
    }
}

fn engine_with(records: SnapshotRecords, store: Arc<MemoryAlertStore>) -> Engine {
    Engine::new(EngineConfig::default(), Arc::new(MemorySource::new("w1", records)), store).unwrap()
}

struct Sleeps(Duration);

impl RuleEvaluator for Sleeps {
    fn id(&self) -> RuleId {
        RuleId::FiscalYearRush
    }
    fn description(&self) -> &'static str {
        "sleeps"
    }
    fn default_severity(&self) -> Severity {
        Severity::Low
    }
    fn evaluate(&self, _: &EvalContext<'_>) -> Result<Vec<CandidateAlert>, RuleError> {
        std::thread::sleep(self.0);
        Ok(vec![])
    }
}

/// Raises the engine's cancellation flag mid-run.
struct Cancels(Arc<AtomicBool>);

impl RuleEvaluator for Cancels {
    fn id(&self) -> RuleId {
        RuleId::PayToPlay
    }
    fn description(&self) -> &'static str {
        "cancels"
    }
    fn default_severity(&self) -> Severity {
        Severity::Low
    }
    fn evaluate(&self, _: &EvalContext<'_>) -> Result<Vec<CandidateAlert>, RuleError> {
        self.0.store(true, Ordering::SeqCst);
        Ok(vec![])
    }
}

// ── Merge and dedup ─────────────────────────────────────────────────

#[test]
fn overlapping_rules_commit_one_composite_alert() {
    let store = Arc::new(MemoryAlertStore::new());
    let engine = engine_with(split_records(), store.clone());

    let result = engine.run(None).unwrap();
    assert!(result.is_clean(), "{result}");
    assert_eq!(result.alerts_created, 1);

    let alerts = store.load_all().unwrap();
    assert_eq!(alerts.len(), 1);
    let alert = &alerts[0];
    assert_eq!(alert.primary_key, "payment:P1|payment:P2|payment:P3|vendor:V1");
    assert_eq!(alert.rule_ids, vec![RuleId::ContractSplitting, RuleId::DuplicatePayments]);
    assert_eq!(alert.severity, Severity::MediumHigh);
    assert_eq!(alert.status, AlertStatus::Open);
}

#[test]
fn rerun_on_unchanged_snapshot_changes_nothing() {
    let store = Arc::new(MemoryAlertStore::new());
    let engine = engine_with(split_records(), store.clone());

    engine.run(None).unwrap();
    let before = store.load_all().unwrap();
    let again = engine.run(None).unwrap();

    assert_eq!(again.alerts_created, 0);
    assert_eq!(again.alerts_updated, 0);
    assert_eq!(store.load_all().unwrap(), before);
}

#[test]
fn new_watermark_extends_open_alert_evidence() {
    let store = Arc::new(MemoryAlertStore::new());
    let mut first = SnapshotRecords {
        payments: vec![payment("G1", "V9", 15_000.0, date(2024, 1, 10))],
        ..Default::default()
    };
    let source = Arc::new(MemorySource::new("w1", first.clone()));
    let engine = Engine::new(EngineConfig::default(), source.clone(), store.clone()).unwrap();

    let r1 = engine.run(Some(&[RuleId::GhostVendors])).unwrap();
    assert_eq!(r1.alerts_created, 1);

    first.payments.push(payment("G2", "V9", 9_000.0, date(2024, 2, 10)));
    source.insert("w2", None, first);
    let r2 = engine.run(Some(&[RuleId::GhostVendors])).unwrap();
    assert_eq!(r2.watermark, "w2");
    assert_eq!(r2.alerts_created, 0);
    assert_eq!(r2.alerts_updated, 1);

    let alerts = store.load_all().unwrap();
    assert_eq!(alerts.len(), 1);
    let refs: Vec<String> = alerts[0].evidence.iter().map(|r| r.to_string()).collect();
    assert!(refs.contains(&"payment:G2".to_string()), "{refs:?}");
}

#[test]
fn dismissed_alert_is_raised_again() {
    let store = Arc::new(MemoryAlertStore::new());
    let engine = engine_with(split_records(), store.clone());

    engine.run(None).unwrap();
    let first = store.load_all().unwrap().remove(0);
    engine.store().set_status(first.id, AlertStatus::Dismissed).unwrap();

    let result = engine.run(None).unwrap();
    assert_eq!(result.alerts_created, 1);
    let alerts = store.load_all().unwrap();
    assert_eq!(alerts.len(), 2);
    assert_eq!(alerts[0].status, AlertStatus::Dismissed);
    assert_eq!(alerts[1].status, AlertStatus::Open);
    assert_eq!(alerts[1].primary_key, first.primary_key);
}

// ── Isolation ───────────────────────────────────────────────────────

#[test]
fn malformed_employee_fails_only_its_rule() {
    let mut records = split_records();
    records.employees.push(EmployeeRecord {
        id: "E1".into(),
        name: "Pat Lee".into(),
        agency: "DOT".into(),
        salary: -1.0,
    });
    let store = Arc::new(MemoryAlertStore::new());
    let engine = engine_with(records, store.clone());

    let result = engine.run(None).unwrap();
    assert_eq!(result.failed_rules(), vec![RuleId::EmployeeVendor]);
    assert!(matches!(
        result.status_of(RuleId::EmployeeVendor).unwrap().outcome,
        RuleOutcome::Failed { ref reason } if reason.contains("E1")
    ));
    assert_eq!(
        result.per_rule_status.iter().filter(|s| s.succeeded()).count(),
        RuleId::ALL.len() - 1
    );
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.alerts_created, 1);
    assert_eq!(store.load_all().unwrap().len(), 1);
}

#[test]
fn slow_rule_times_out_and_the_rest_commit() {
    let mut config = EngineConfig::default();
    config.engine.rule_timeout_seconds = 1;
    config.engine.worker_threads = 2;
    let store = Arc::new(MemoryAlertStore::new());
    let engine = Engine::new(config, Arc::new(MemorySource::new("w1", split_records())), store.clone())
        .unwrap()
        .with_evaluators(vec![
            Arc::new(Sleeps(Duration::from_secs(3))),
            evaluator_for(RuleId::ContractSplitting),
            evaluator_for(RuleId::DuplicatePayments),
        ]);

    let result = engine.run(None).unwrap();
    assert_eq!(
        result.status_of(RuleId::FiscalYearRush).map(|s| &s.outcome),
        Some(&RuleOutcome::TimedOut)
    );
    assert_eq!(result.failed_rules(), vec![RuleId::FiscalYearRush]);
    assert!(result.errors[0].contains("timed out"));
    assert_eq!(store.load_all().unwrap().len(), 1);
}

// ── Aborted runs ────────────────────────────────────────────────────

#[test]
fn cancelled_run_commits_nothing() {
    let store = Arc::new(MemoryAlertStore::new());
    let engine = engine_with(split_records(), store.clone());
    let cancel = engine.cancel_signal();
    let engine = engine.with_evaluators(vec![
        evaluator_for(RuleId::ContractSplitting),
        Arc::new(Cancels(cancel)),
    ]);

    assert!(matches!(engine.run(None), Err(EngineError::Cancelled)));
    assert!(store.load_all().unwrap().is_empty());

    let log = engine.audit_log().query(
        "engine",
        &LogQueryParams {
            phase: Some(RunPhase::Dispatch),
            ..Default::default()
        },
    );
    assert_eq!(log.len(), 1);
}

#[test]
fn failed_commit_leaves_store_untouched() {
    let store = Arc::new(MemoryAlertStore::new());
    let engine = engine_with(split_records(), store.clone());

    store.fail_next_commit();
    let err = engine.run(None).unwrap_err();
    assert!(matches!(err, EngineError::Persistence(StoreError::Injected(_))));
    assert!(store.load_all().unwrap().is_empty());

    let retry = engine.run(None).unwrap();
    assert_eq!(retry.alerts_created, 1);
}

#[test]
fn unknown_watermark_is_a_source_error() {
    let engine = engine_with(split_records(), Arc::new(MemoryAlertStore::new()));
    assert!(matches!(engine.run_at(Some("w0"), None), Err(EngineError::Source(_))));
}

// ── On-disk collaborators ───────────────────────────────────────────

#[test]
fn json_snapshot_to_json_alert_file() {
    let dir = tempfile::tempdir().unwrap();
    let snap = dir.path().join("snapshots").join("2024-03-31");
    std::fs::create_dir_all(&snap).unwrap();
    let records = split_records();
    std::fs::write(snap.join("vendors.json"), serde_json::to_string(&records.vendors).unwrap()).unwrap();
    std::fs::write(snap.join("payments.json"), serde_json::to_string(&records.payments).unwrap()).unwrap();

    let alerts_path = dir.path().join("alerts.json");
    let engine = Engine::new(
        EngineConfig::default(),
        Arc::new(JsonDirSource::new(dir.path().join("snapshots"))),
        Arc::new(JsonFileAlertStore::new(&alerts_path)),
    )
    .unwrap();

    let result = engine.run(None).unwrap();
    assert_eq!(result.watermark, "2024-03-31");
    assert_eq!(result.alerts_created, 1);

    let reopened = JsonFileAlertStore::new(&alerts_path).load_all().unwrap();
    assert_eq!(reopened.len(), 1);
    assert_eq!(reopened[0].rule_ids.len(), 2);

    assert_eq!(engine.run(None).unwrap().alerts_created, 0);
}
