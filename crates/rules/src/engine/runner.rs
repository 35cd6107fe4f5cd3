//! Evaluator dispatch on a bounded rayon pool.
//!
//! Every selected evaluator is spawned as its own job. Jobs report back over
//! a channel when they start and when they finish; the dispatching thread
//! enforces the per-rule timeout from the reported start time and watches
//! the cancellation flag between events. A timed-out job keeps its worker
//! until it returns, and its late output is dropped.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fraudit_compute::{ClusterSet, RelatedPartyGraph};
use fraudit_core::{CandidateAlert, EngineConfig, RuleError, RuleId, Snapshot};
use tracing::{debug, warn};

use crate::evaluator::{EvalContext, RuleEvaluator};

/// Longest the dispatcher sleeps before re-checking cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Immutable inputs shared by every job in one run.
pub(crate) struct RunInputs {
    pub snapshot: Snapshot,
    pub config: Arc<EngineConfig>,
    pub clusters: ClusterSet,
    pub related: RelatedPartyGraph,
}

#[derive(Debug)]
pub(crate) enum JobOutcome {
    Finished(Result<Vec<CandidateAlert>, RuleError>),
    TimedOut,
}

#[derive(Debug)]
pub(crate) struct JobReport {
    pub rule: RuleId,
    pub outcome: JobOutcome,
    pub duration: Duration,
}

/// Returned when the cancellation flag was raised during dispatch.
#[derive(Debug)]
pub(crate) struct Cancelled;

enum Event {
    Started(usize),
    Finished(usize, Result<Vec<CandidateAlert>, RuleError>, Duration),
    Skipped(usize),
}

enum Slot {
    Pending,
    Running { started: Instant },
    Done(JobReport),
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn evaluate_guarded(evaluator: &dyn RuleEvaluator, inputs: &RunInputs) -> Result<Vec<CandidateAlert>, RuleError> {
    let ctx = EvalContext {
        snapshot: &inputs.snapshot,
        config: &inputs.config,
        clusters: &inputs.clusters,
        related: &inputs.related,
    };
    catch_unwind(AssertUnwindSafe(|| evaluator.evaluate(&ctx))).unwrap_or_else(|payload| {
        Err(RuleError::Panicked {
            rule: evaluator.id(),
            message: panic_message(payload.as_ref()),
        })
    })
}

/// Run `evaluators` on `pool` and collect one report per evaluator, in the
/// order given.
pub(crate) fn dispatch(
    pool: &rayon::ThreadPool,
    evaluators: &[Arc<dyn RuleEvaluator>],
    inputs: Arc<RunInputs>,
    timeout: Duration,
    cancel: &Arc<AtomicBool>,
) -> Result<Vec<JobReport>, Cancelled> {
    let (tx, rx) = mpsc::channel::<Event>();

    for (idx, evaluator) in evaluators.iter().enumerate() {
        let tx = tx.clone();
        let inputs = Arc::clone(&inputs);
        let evaluator = Arc::clone(evaluator);
        let cancel = Arc::clone(cancel);

        pool.spawn(move || {
            // Cancellation is honoured between evaluators only.
            if cancel.load(Ordering::SeqCst) {
                let _ = tx.send(Event::Skipped(idx));
                return;
            }
            let _ = tx.send(Event::Started(idx));
            let start = Instant::now();
            let result = evaluate_guarded(evaluator.as_ref(), &inputs);
            let _ = tx.send(Event::Finished(idx, result, start.elapsed()));
        });
    }
    drop(tx);

    let workers = pool.current_num_threads().max(1);
    let mut slots: Vec<Slot> = evaluators.iter().map(|_| Slot::Pending).collect();
    let mut abandoned = 0usize;

    loop {
        if cancel.load(Ordering::SeqCst) {
            return Err(Cancelled);
        }
        if slots.iter().all(|s| matches!(s, Slot::Done(_))) {
            break;
        }

        let now = Instant::now();
        let next_deadline = slots
            .iter()
            .filter_map(|s| match s {
                Slot::Running { started } => Some(*started + timeout),
                _ => None,
            })
            .min();
        let wait = next_deadline
            .map(|d| d.saturating_duration_since(now))
            .unwrap_or(POLL_INTERVAL)
            .min(POLL_INTERVAL);

        match rx.recv_timeout(wait) {
            Ok(Event::Started(idx)) => {
                if matches!(slots[idx], Slot::Pending) {
                    debug!(rule_id = %evaluators[idx].id(), "evaluator started");
                    slots[idx] = Slot::Running {
                        started: Instant::now(),
                    };
                }
            }
            Ok(Event::Finished(idx, result, duration)) => {
                if matches!(slots[idx], Slot::Done(_)) {
                    debug!(rule_id = %evaluators[idx].id(), "discarding output of timed-out evaluator");
                    abandoned = abandoned.saturating_sub(1);
                    continue;
                }
                slots[idx] = Slot::Done(JobReport {
                    rule: evaluators[idx].id(),
                    outcome: JobOutcome::Finished(result),
                    duration,
                });
            }
            Ok(Event::Skipped(_)) => return Err(Cancelled),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                // Every job has reported; anything still open lost its worker.
                for (idx, slot) in slots.iter_mut().enumerate() {
                    if !matches!(slot, Slot::Done(_)) {
                        *slot = Slot::Done(JobReport {
                            rule: evaluators[idx].id(),
                            outcome: JobOutcome::Finished(Err(RuleError::Evaluation {
                                rule: evaluators[idx].id(),
                                reason: "worker exited without a result".into(),
                            })),
                            duration: Duration::ZERO,
                        });
                    }
                }
            }
        }

        let now = Instant::now();
        for (idx, slot) in slots.iter_mut().enumerate() {
            if let Slot::Running { started } = *slot {
                if now.duration_since(started) >= timeout {
                    warn!(
                        rule_id = %evaluators[idx].id(),
                        timeout_secs = timeout.as_secs_f64(),
                        "evaluator timed out"
                    );
                    abandoned += 1;
                    *slot = Slot::Done(JobReport {
                        rule: evaluators[idx].id(),
                        outcome: JobOutcome::TimedOut,
                        duration: now.duration_since(started),
                    });
                }
            }
        }

        // With every worker stuck on a timed-out job, queued jobs never start.
        if abandoned >= workers {
            for (idx, slot) in slots.iter_mut().enumerate() {
                if matches!(slot, Slot::Pending) {
                    warn!(rule_id = %evaluators[idx].id(), "no free worker, evaluator timed out");
                    *slot = Slot::Done(JobReport {
                        rule: evaluators[idx].id(),
                        outcome: JobOutcome::TimedOut,
                        duration: Duration::ZERO,
                    });
                }
            }
        }
    }

    Ok(slots
        .into_iter()
        .filter_map(|s| match s {
            Slot::Done(report) => Some(report),
            _ => None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use fraudit_compute::{cluster, ClusterParams};
    use fraudit_core::{EvidenceRef, Severity, SnapshotRecords};

    use super::*;

    struct Fixed(RuleId);

    impl RuleEvaluator for Fixed {
        fn id(&self) -> RuleId {
            self.0
        }
        fn description(&self) -> &'static str {
            "fixed"
        }
        fn default_severity(&self) -> Severity {
            Severity::Low
        }
        fn evaluate(&self, _: &EvalContext<'_>) -> Result<Vec<CandidateAlert>, RuleError> {
            Ok(vec![CandidateAlert::new(self.0, Severity::Low, [EvidenceRef::vendor("V1")], "x")])
        }
    }

    struct Panics;

    impl RuleEvaluator for Panics {
        fn id(&self) -> RuleId {
            RuleId::GhostVendors
        }
        fn description(&self) -> &'static str {
            "panics"
        }
        fn default_severity(&self) -> Severity {
            Severity::Low
        }
        fn evaluate(&self, _: &EvalContext<'_>) -> Result<Vec<CandidateAlert>, RuleError> {
            panic!("index out of range")
        }
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

    fn inputs() -> Arc<RunInputs> {
        let snapshot = Snapshot::build("t", None, SnapshotRecords::default());
        let clusters = cluster(
            snapshot.vendors(),
            &ClusterParams {
                name_threshold: 0.85,
                min_corroboration: 1,
                max_bucket_size: 10,
            },
        );
        Arc::new(RunInputs {
            related: RelatedPartyGraph::from_vendors(snapshot.vendors()),
            snapshot,
            config: Arc::new(EngineConfig::default()),
            clusters,
        })
    }

    fn pool(n: usize) -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(n).build().unwrap()
    }

    #[test]
    fn reports_follow_evaluator_order() {
        let evaluators: Vec<Arc<dyn RuleEvaluator>> = vec![
            Arc::new(Fixed(RuleId::Debarment)),
            Arc::new(Panics),
            Arc::new(Fixed(RuleId::PayToPlay)),
        ];
        let cancel = Arc::new(AtomicBool::new(false));
        let reports =
            dispatch(&pool(2), &evaluators, inputs(), Duration::from_secs(5), &cancel).unwrap();
        let rules: Vec<RuleId> = reports.iter().map(|r| r.rule).collect();
        assert_eq!(rules, vec![RuleId::Debarment, RuleId::GhostVendors, RuleId::PayToPlay]);
        assert!(matches!(reports[0].outcome, JobOutcome::Finished(Ok(ref c)) if c.len() == 1));
        assert!(matches!(
            reports[1].outcome,
            JobOutcome::Finished(Err(RuleError::Panicked { ref message, .. })) if message.contains("index out of range")
        ));
    }

    #[test]
    fn slow_evaluator_times_out_others_finish() {
        let evaluators: Vec<Arc<dyn RuleEvaluator>> = vec![
            Arc::new(Sleeps(Duration::from_millis(800))),
            Arc::new(Fixed(RuleId::Debarment)),
        ];
        let cancel = Arc::new(AtomicBool::new(false));
        let reports =
            dispatch(&pool(2), &evaluators, inputs(), Duration::from_millis(100), &cancel).unwrap();
        assert!(matches!(reports[0].outcome, JobOutcome::TimedOut));
        assert!(matches!(reports[1].outcome, JobOutcome::Finished(Ok(_))));
    }

    #[test]
    fn raised_flag_cancels_dispatch() {
        let evaluators: Vec<Arc<dyn RuleEvaluator>> = vec![Arc::new(Fixed(RuleId::Debarment))];
        let cancel = Arc::new(AtomicBool::new(true));
        let result = dispatch(&pool(1), &evaluators, inputs(), Duration::from_secs(5), &cancel);
        assert!(result.is_err());
    }
}
