//! Scenario tests spanning hooks, savepoints, retry, observers and threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::Level;

use crate::context::{Context, ContextError};
use crate::hooks::{HookPoint, HookType, OperationEvent, OperationHookType};
use crate::observer::{Logger, MetricsObserver, Observer};
use crate::recover::PanicError;
use crate::retry::{RetryError, RetryPolicy};
use crate::transaction::{
    Compensation, DoOptions, SavepointFault, Transaction, TransactionError, TransactionStatus,
};
use crate::BoxError;

type Log = Arc<Mutex<Vec<String>>>;

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn ok(_: &Context) -> Result<(), BoxError> {
    Ok(())
}

fn undo(log: &Log, label: &str) -> Compensation {
    let log = log.clone();
    let label = label.to_string();
    Compensation::new(move |_: &Context| {
        log.lock().push(label.clone());
        Ok::<(), BoxError>(())
    })
}

fn failing_undo(log: &Log, label: &str) -> Compensation {
    let log = log.clone();
    let label = label.to_string();
    Compensation::new(move |_: &Context| {
        log.lock().push(label.clone());
        Err::<(), _>("undo failed")
    })
}

fn capture_logger() -> (Arc<Mutex<Vec<(Level, String)>>>, Arc<dyn Logger>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = lines.clone();
    let logger: Arc<dyn Logger> = Arc::new(move |level: Level, msg: &str| {
        sink.lock().push((level, msg.to_string()));
    });
    (lines, logger)
}

// ==================== Rollback ====================

#[test]
fn test_rollback_continues_past_failed_compensation() {
    let ctx = Context::background();
    let tx = Transaction::new();
    let log = new_log();

    tx.do_op(&ctx, "op1", ok, Some(undo(&log, "c1"))).unwrap();
    tx.do_op(&ctx, "op2", ok, Some(failing_undo(&log, "c2"))).unwrap();
    tx.do_op(&ctx, "op3", ok, Some(undo(&log, "c3"))).unwrap();

    let err = tx.rollback(&ctx).unwrap_err();
    let failures = err.rollback_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].index, 1);
    assert_eq!(failures[0].operation, "op2");
    assert_eq!(failures[0].source.to_string(), "undo failed");

    assert_eq!(*log.lock(), vec!["c3", "c2", "c1"]);
    assert!(tx.is_rolled_back());
}

#[test]
fn test_compensation_panic_is_reported() {
    let ctx = Context::background();
    let tx = Transaction::new();
    let log = new_log();

    tx.do_op(&ctx, "op1", ok, Some(undo(&log, "c1"))).unwrap();
    tx.do_op(
        &ctx,
        "op2",
        ok,
        Some(Compensation::new(|_: &Context| -> Result<(), BoxError> {
            panic!("undo exploded")
        })),
    )
    .unwrap();

    let err = tx.rollback(&ctx).unwrap_err();
    let failures = err.rollback_failures();
    assert_eq!(failures.len(), 1);
    let panic = failures[0].source.downcast_ref::<PanicError>().unwrap();
    assert_eq!(panic.value(), "undo exploded");
    assert_eq!(*log.lock(), vec!["c1"]);
}

#[test]
fn test_retry_exhaustion() {
    let ctx = Context::background();
    let tx = Transaction::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    let compensate = Compensation::new(move |_: &Context| {
        counter.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>("still down")
    });
    tx.do_with_options(
        &ctx,
        "notify",
        ok,
        Some(compensate),
        DoOptions::new().compensation_retry(
            RetryPolicy::new(2).initial_delay(Duration::from_millis(1)),
        ),
    )
    .unwrap();

    let err = tx.rollback(&ctx).unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let failures = err.rollback_failures();
    assert_eq!(failures.len(), 1);
    let retry = failures[0].source.downcast_ref::<RetryError>().unwrap();
    assert!(matches!(retry, RetryError::Exhausted { attempts: 3, .. }));
    assert_eq!(retry.last_error().to_string(), "still down");
}

#[test]
fn test_default_retry_policy_from_config() {
    use crate::transaction::TransactionConfig;

    let ctx = Context::background();
    let tx = Transaction::with_config(
        TransactionConfig::new()
            .default_compensation_retry(RetryPolicy::new(1).initial_delay(Duration::from_millis(1))),
    );
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    let flaky = Compensation::new(move |_: &Context| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err::<(), BoxError>("transient".into())
        } else {
            Ok(())
        }
    });
    tx.do_op(&ctx, "op", ok, Some(flaky)).unwrap();

    assert_eq!(tx.history()[0].retry_policy.as_ref().map(|p| p.max_retries), Some(1));
    tx.rollback(&ctx).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// ==================== Hooks ====================

#[test]
fn test_critical_before_commit_hook_blocks_commit() {
    let ctx = Context::background();
    let tx = Transaction::new();
    tx.add_critical_hook(HookType::BeforeCommit, |_: &Context, _: &Transaction| {
        Err::<(), _>("invariant violated")
    });

    let err = tx.commit(&ctx).unwrap_err();
    match &err {
        TransactionError::Hook(hook) => {
            assert_eq!(hook.hook, HookPoint::Lifecycle(HookType::BeforeCommit));
            assert!(hook.critical);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(tx.is_pending());
    assert_eq!(tx.status(), TransactionStatus::Active);

    // Still usable after the veto.
    tx.do_op(&ctx, "more", ok, None).unwrap();
    tx.clear_hooks(HookType::BeforeCommit);
    tx.commit(&ctx).unwrap();
}

#[test]
fn test_non_critical_hook_failure_allows_commit() {
    let ctx = Context::background();
    let tx = Transaction::new();
    let (lines, logger) = capture_logger();
    tx.set_logger(logger);

    tx.add_hook(HookType::BeforeCommit, |_: &Context, _: &Transaction| {
        Err::<(), _>("metrics push failed")
    });
    tx.add_critical_hook(HookType::AfterCommit, |_: &Context, _: &Transaction| {
        Err::<(), _>("after the fact")
    });

    tx.commit(&ctx).unwrap();
    assert!(tx.is_committed());

    let warnings = lines
        .lock()
        .iter()
        .filter(|(level, _)| *level == Level::WARN)
        .count();
    assert_eq!(warnings, 2);
}

#[test]
fn test_default_hook_criticality() {
    let ctx = Context::background();

    let tx = Transaction::new();
    tx.add_default_hook(HookType::BeforeCommit, |_: &Context, _: &Transaction| {
        Err::<(), _>("no")
    });
    assert!(tx.commit(&ctx).is_err());

    let tx = Transaction::new();
    tx.add_default_hook(HookType::AfterRollback, |_: &Context, _: &Transaction| {
        Err::<(), _>("no")
    });
    tx.rollback(&ctx).unwrap();
}

#[test]
fn test_before_rollback_hook_never_blocks() {
    let ctx = Context::background();
    let tx = Transaction::new();
    let log = new_log();

    tx.add_critical_hook(HookType::BeforeRollback, |_: &Context, _: &Transaction| {
        Err::<(), _>("ignored")
    });
    tx.do_op(&ctx, "op", ok, Some(undo(&log, "c"))).unwrap();

    tx.rollback(&ctx).unwrap();
    assert_eq!(*log.lock(), vec!["c"]);
}

#[test]
fn test_lifecycle_hook_order_and_history_access() {
    let ctx = Context::background();
    let tx = Transaction::new();
    let log = new_log();

    for hook_type in HookType::ALL {
        let log = log.clone();
        tx.add_hook(hook_type, move |_: &Context, tx: &Transaction| {
            log.lock()
                .push(format!("{}:{}", hook_type, tx.history().len()));
            Ok::<(), BoxError>(())
        });
    }
    assert_eq!(tx.hook_count(HookType::AfterCommit), 1);

    tx.do_op(&ctx, "op", ok, None).unwrap();
    tx.commit(&ctx).unwrap();

    assert_eq!(*log.lock(), vec!["before_commit:1", "after_commit:1"]);
}

#[test]
fn test_hook_cannot_start_operation_mid_commit() {
    let ctx = Context::background();
    let tx = Transaction::new();
    let seen = Arc::new(Mutex::new(None));

    let slot = seen.clone();
    tx.add_hook(HookType::BeforeCommit, move |ctx: &Context, tx: &Transaction| {
        *slot.lock() = tx.do_op(ctx, "sneaky", ok, None).err();
        Ok::<(), BoxError>(())
    });
    tx.commit(&ctx).unwrap();

    let err = seen.lock().take().unwrap();
    assert!(matches!(
        err,
        TransactionError::LifecycleInProgress {
            status: TransactionStatus::Committing,
            ..
        }
    ));
    assert_eq!(tx.operation_count(), 0);
}

#[test]
fn test_critical_before_operation_hook_blocks_operation() {
    let ctx = Context::background();
    let tx = Transaction::new();
    tx.add_critical_operation_hook(
        OperationHookType::BeforeOperation,
        |_: &Context, event: &OperationEvent<'_>| {
            if event.name == "forbidden" {
                Err::<(), BoxError>("not allowed".into())
            } else {
                Ok(())
            }
        },
    );

    let mut ran = false;
    let err = tx
        .do_op(
            &ctx,
            "forbidden",
            |_: &Context| {
                ran = true;
                Ok::<(), BoxError>(())
            },
            None,
        )
        .unwrap_err();

    assert!(matches!(err, TransactionError::Hook(_)));
    assert!(!ran);
    assert_eq!(tx.operation_count(), 0);
    assert_eq!(tx.in_flight(), 0);

    tx.do_op(&ctx, "allowed", ok, None).unwrap();
    assert_eq!(tx.operation_count(), 1);
}

#[test]
fn test_after_operation_hook_sees_outcome() {
    let ctx = Context::background();
    let tx = Transaction::new();
    let events = Arc::new(Mutex::new(Vec::new()));

    let sink = events.clone();
    tx.add_operation_hook(
        OperationHookType::AfterOperation,
        move |_: &Context, event: &OperationEvent<'_>| {
            sink.lock()
                .push((event.name.to_string(), event.failed, event.duration.is_some()));
            Err::<(), _>("ignored")
        },
    );

    tx.do_op(&ctx, "good", ok, None).unwrap();
    let _ = tx.do_op(&ctx, "bad", |_: &Context| Err::<(), _>("nope"), None);

    assert_eq!(
        *events.lock(),
        vec![
            ("good".to_string(), false, true),
            ("bad".to_string(), true, true),
        ]
    );
}

// ==================== Savepoints ====================

#[test]
fn test_savepoint_partial_rollback() {
    let ctx = Context::background();
    let tx = Transaction::new();
    let log = new_log();

    tx.do_op(&ctx, "op1", ok, Some(undo(&log, "c1"))).unwrap();
    tx.do_op(&ctx, "op2", ok, Some(undo(&log, "c2"))).unwrap();
    let sp = tx.create_savepoint("after-two");
    assert_eq!(sp.index(), 2);
    assert_eq!(sp.transaction_id(), tx.id());
    tx.do_op(&ctx, "op3", ok, Some(undo(&log, "c3"))).unwrap();
    tx.do_op(&ctx, "op4", ok, Some(undo(&log, "c4"))).unwrap();

    tx.rollback_to_savepoint(&ctx, &sp).unwrap();
    assert_eq!(*log.lock(), vec!["c4", "c3"]);
    assert_eq!(tx.operation_count(), 2);
    assert!(tx.is_pending());

    tx.commit(&ctx).unwrap();
    assert_eq!(log.lock().len(), 2);
    let names: Vec<_> = tx.history().into_iter().map(|e| e.name).collect();
    assert_eq!(names, vec!["op1", "op2"]);
}

#[test]
fn test_savepoint_rollback_reports_failures_and_stays_open() {
    let ctx = Context::background();
    let tx = Transaction::new();
    let log = new_log();

    tx.do_op(&ctx, "op1", ok, Some(undo(&log, "c1"))).unwrap();
    let sp = tx.create_savepoint("sp");
    tx.do_op(&ctx, "op2", ok, Some(failing_undo(&log, "c2"))).unwrap();

    let err = tx.rollback_to_savepoint(&ctx, &sp).unwrap_err();
    assert_eq!(err.rollback_failures()[0].index, 1);
    assert_eq!(tx.status(), TransactionStatus::Active);
    assert_eq!(tx.operation_count(), 1);
}

#[test]
fn test_savepoint_rollback_skips_lifecycle_hooks() {
    let ctx = Context::background();
    let tx = Transaction::new();
    let fired = Arc::new(AtomicUsize::new(0));

    for hook_type in [HookType::BeforeRollback, HookType::AfterRollback] {
        let fired = fired.clone();
        tx.add_hook(hook_type, move |_: &Context, _: &Transaction| {
            fired.fetch_add(1, Ordering::SeqCst);
            Ok::<(), BoxError>(())
        });
    }
    let metrics = Arc::new(MetricsObserver::new());
    tx.set_observer(metrics.clone());

    let sp = tx.create_savepoint("start");
    tx.do_op(&ctx, "op", ok, None).unwrap();
    tx.rollback_to_savepoint(&ctx, &sp).unwrap();

    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(metrics.snapshot().rollbacks, 0);
}

#[test]
fn test_stale_savepoint() {
    let ctx = Context::background();
    let tx = Transaction::new();

    tx.do_op(&ctx, "op1", ok, None).unwrap();
    let early = tx.create_savepoint("early");
    tx.do_op(&ctx, "op2", ok, None).unwrap();
    let late = tx.create_savepoint("late");
    tx.do_op(&ctx, "op3", ok, None).unwrap();

    tx.rollback_to_savepoint(&ctx, &early).unwrap();
    assert_eq!(tx.operation_count(), 1);

    let err = tx.rollback_to_savepoint(&ctx, &late).unwrap_err();
    match err {
        TransactionError::InvalidSavepoint { name, reason } => {
            assert_eq!(name, "late");
            assert_eq!(reason, SavepointFault::Stale { index: 2, len: 1 });
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(tx.status(), TransactionStatus::Active);
}

#[test]
fn test_stale_savepoint_accepted_once_log_regrows() {
    let ctx = Context::background();
    let tx = Transaction::new();
    let log = new_log();

    tx.do_op(&ctx, "op1", ok, None).unwrap();
    let early = tx.create_savepoint("early");
    tx.do_op(&ctx, "op2", ok, None).unwrap();
    let late = tx.create_savepoint("late");

    tx.rollback_to_savepoint(&ctx, &early).unwrap();
    tx.do_op(&ctx, "op2b", ok, Some(undo(&log, "c2b"))).unwrap();
    tx.do_op(&ctx, "op3", ok, Some(undo(&log, "c3"))).unwrap();

    // Only the position is checked, so "late" now lands after op2b.
    tx.rollback_to_savepoint(&ctx, &late).unwrap();
    assert_eq!(*log.lock(), vec!["c3"]);
    assert_eq!(tx.operation_count(), 2);
}

#[test]
fn test_foreign_savepoint_rejected() {
    let ctx = Context::background();
    let owner = Transaction::new();
    let other = Transaction::new();
    other.do_op(&ctx, "op", ok, None).unwrap();

    let sp = owner.create_savepoint("mine");
    let err = other.rollback_to_savepoint(&ctx, &sp).unwrap_err();
    assert!(matches!(
        err,
        TransactionError::InvalidSavepoint {
            reason: SavepointFault::ForeignTransaction { .. },
            ..
        }
    ));
    assert_eq!(other.operation_count(), 1);
}

#[test]
fn test_savepoint_on_finished_transaction() {
    let ctx = Context::background();
    let tx = Transaction::new();
    let sp = tx.create_savepoint("sp");
    tx.commit(&ctx).unwrap();

    assert!(tx.rollback_to_savepoint(&ctx, &sp).unwrap_err().is_already_committed());
}

// ==================== Observers ====================

struct PanickingObserver;

impl Observer for PanickingObserver {
    fn on_operation_start(&self, _name: &str) {
        panic!("observer bug");
    }

    fn on_commit(&self) {
        panic!("observer bug");
    }
}

#[test]
fn test_observer_panic_is_contained() {
    let ctx = Context::background();
    let tx = Transaction::new();
    let (lines, logger) = capture_logger();
    tx.set_observer(Arc::new(PanickingObserver));
    tx.set_logger(logger);

    tx.do_op(&ctx, "op", ok, None).unwrap();
    tx.commit(&ctx).unwrap();
    assert!(tx.is_committed());

    let lines = lines.lock();
    let errors: Vec<_> = lines
        .iter()
        .filter(|(level, _)| *level == Level::ERROR)
        .map(|(_, msg)| msg.as_str())
        .collect();
    assert_eq!(errors.len(), 2);
    assert!(errors[0].contains("on_operation_start"));
    assert!(errors[1].contains("on_commit"));
}

#[test]
fn test_metrics_observer_counts() {
    let ctx = Context::background();
    let tx = Transaction::new();
    let log = new_log();
    let metrics = Arc::new(MetricsObserver::new());
    tx.set_observer(metrics.clone());

    tx.do_op(&ctx, "a", ok, Some(failing_undo(&log, "ca"))).unwrap();
    let _ = tx.do_op(&ctx, "b", |_: &Context| Err::<(), _>("nope"), None);
    let _ = tx.rollback(&ctx);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.operations_started, 2);
    assert_eq!(snapshot.operations_succeeded, 1);
    assert_eq!(snapshot.operations_failed, 1);
    assert_eq!(snapshot.rollbacks, 1);
    assert_eq!(snapshot.rollbacks_with_failures, 1);
    assert_eq!(snapshot.compensation_failures, 1);
    assert_eq!(snapshot.commits, 0);
}

// ==================== Concurrency ====================

/// Start a `do_op` on another thread that blocks until the returned sender
/// fires. Returns once the operation is running.
fn blocked_operation(
    tx: &Arc<Transaction>,
) -> (mpsc::Sender<()>, thread::JoinHandle<Result<(), TransactionError>>) {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let tx = tx.clone();
    let worker = thread::spawn(move || {
        let ctx = Context::background();
        tx.do_op(
            &ctx,
            "slow",
            move |_: &Context| {
                started_tx.send(()).map_err(|e| Box::new(e) as BoxError)?;
                release_rx.recv().map_err(|e| Box::new(e) as BoxError)?;
                Ok::<(), BoxError>(())
            },
            None,
        )
    });

    started_rx.recv().unwrap();
    (release_tx, worker)
}

#[test]
fn test_commit_waits_for_in_flight_operation() {
    let tx = Arc::new(Transaction::new());
    let (release, worker) = blocked_operation(&tx);
    assert_eq!(tx.in_flight(), 1);

    let committer = {
        let tx = tx.clone();
        thread::spawn(move || tx.commit(&Context::background()))
    };

    thread::sleep(Duration::from_millis(30));
    assert!(!committer.is_finished());
    assert_eq!(tx.status(), TransactionStatus::Active);

    release.send(()).unwrap();
    worker.join().unwrap().unwrap();
    committer.join().unwrap().unwrap();

    assert!(tx.is_committed());
    assert_eq!(tx.operation_count(), 1);
}

#[test]
fn test_rollback_waits_and_compensates_late_operation() {
    let tx = Arc::new(Transaction::new());
    let log = new_log();
    tx.do_op(&Context::background(), "first", ok, Some(undo(&log, "c1")))
        .unwrap();
    let (release, worker) = blocked_operation(&tx);

    let roller = {
        let tx = tx.clone();
        thread::spawn(move || tx.rollback(&Context::background()))
    };

    thread::sleep(Duration::from_millis(20));
    release.send(()).unwrap();
    worker.join().unwrap().unwrap();
    roller.join().unwrap().unwrap();

    assert!(tx.is_rolled_back());
    assert_eq!(tx.operation_count(), 2);
    assert_eq!(*log.lock(), vec!["c1"]);
}

#[test]
fn test_commit_wait_respects_context() {
    let tx = Arc::new(Transaction::new());
    let (release, worker) = blocked_operation(&tx);

    let ctx = Context::background().with_timeout(Duration::from_millis(20));
    let err = tx.commit(&ctx).unwrap_err();
    assert!(matches!(
        err,
        TransactionError::Context(ContextError::DeadlineExceeded)
    ));
    assert!(err.is_retryable());
    assert_eq!(tx.status(), TransactionStatus::Active);

    release.send(()).unwrap();
    worker.join().unwrap().unwrap();
    tx.commit(&Context::background()).unwrap();
}

#[test]
fn test_concurrent_operations_all_recorded() {
    let tx = Arc::new(Transaction::new());
    let log = new_log();

    let workers: Vec<_> = (0..8)
        .map(|i| {
            let tx = tx.clone();
            let log = log.clone();
            thread::spawn(move || {
                let ctx = Context::background();
                let label = format!("c{i}");
                tx.do_op(&ctx, &format!("op{i}"), ok, Some(undo(&log, &label)))
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap().unwrap();
    }
    assert_eq!(tx.operation_count(), 8);

    tx.rollback(&Context::background()).unwrap();

    // Compensations run in reverse completion order.
    let expected: Vec<String> = tx
        .history()
        .iter()
        .rev()
        .map(|e| e.name.replace("op", "c"))
        .collect();
    assert_eq!(*log.lock(), expected);
}

#[test]
fn test_concurrent_rollbacks_compensate_once() {
    let tx = Arc::new(Transaction::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    tx.do_op(
        &Context::background(),
        "op",
        ok,
        Some(Compensation::new(move |_: &Context| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), BoxError>(())
        })),
    )
    .unwrap();

    let rollers: Vec<_> = (0..4)
        .map(|_| {
            let tx = tx.clone();
            thread::spawn(move || tx.rollback(&Context::background()))
        })
        .collect();
    for roller in rollers {
        roller.join().unwrap().unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_tracing_sinks_accept_full_lifecycle() {
    use crate::observer::{NoopObserver, TracingLogger, TracingObserver};

    let ctx = Context::background();
    let log = new_log();

    let traced = Transaction::new();
    traced.set_observer(Arc::new(TracingObserver));
    traced.set_logger(Arc::new(TracingLogger));
    traced.do_op(&ctx, "op", ok, Some(failing_undo(&log, "c"))).unwrap();
    let _ = traced.do_op(&ctx, "bad", |_: &Context| Err::<(), _>("nope"), None);
    assert_eq!(traced.rollback(&ctx).unwrap_err().rollback_failures().len(), 1);

    let quiet = Transaction::new();
    quiet.set_observer(Arc::new(NoopObserver));
    quiet.do_op(&ctx, "op", ok, None).unwrap();
    quiet.commit(&ctx).unwrap();
    assert!(quiet.is_committed());
}

// ==================== Cancelled contexts ====================

fn cancelled() -> Context {
    let (ctx, cancel) = Context::background().with_cancel();
    cancel.cancel();
    ctx
}

#[test]
fn test_rollback_with_cancelled_context_still_compensates() {
    let tx = Transaction::new();
    let log = new_log();
    tx.do_op(&Context::background(), "create-file", ok, Some(undo(&log, "remove-file")))
        .unwrap();

    let ctx = cancelled();
    tx.rollback(&ctx).unwrap();
    assert!(tx.is_rolled_back());
    assert_eq!(*log.lock(), vec!["remove-file"]);

    // Idempotent under the same dead context.
    tx.rollback(&ctx).unwrap();
    assert_eq!(log.lock().len(), 1);
    assert!(tx.commit(&ctx).unwrap_err().is_already_rolled_back());
}

#[test]
fn test_commit_with_cancelled_context_and_nothing_in_flight() {
    let ctx = cancelled();
    let tx = Transaction::new();
    tx.do_op(&Context::background(), "op", ok, None).unwrap();

    tx.commit(&ctx).unwrap();
    assert!(tx.is_committed());

    assert!(tx.commit(&ctx).unwrap_err().is_already_committed());
    assert!(tx.rollback(&ctx).unwrap_err().is_already_committed());
}

#[test]
fn test_savepoint_rollback_with_cancelled_context() {
    let tx = Transaction::new();
    let log = new_log();
    let sp = tx.create_savepoint("start");
    tx.do_op(&Context::background(), "op", ok, Some(undo(&log, "c"))).unwrap();

    tx.rollback_to_savepoint(&cancelled(), &sp).unwrap();
    assert_eq!(*log.lock(), vec!["c"]);
    assert_eq!(tx.operation_count(), 0);
    assert!(tx.is_pending());
}

#[test]
fn test_cancelled_context_interrupts_compensation_retry() {
    let tx = Transaction::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    tx.do_with_options(
        &Context::background(),
        "notify",
        ok,
        Some(Compensation::new(move |_: &Context| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("down")
        })),
        DoOptions::new().compensation_retry(RetryPolicy::new(5)),
    )
    .unwrap();

    let err = tx.rollback(&cancelled()).unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let retry = err.rollback_failures()[0]
        .source
        .downcast_ref::<RetryError>()
        .unwrap();
    assert!(matches!(
        retry,
        RetryError::Interrupted {
            attempts: 1,
            cause: ContextError::Canceled,
            ..
        }
    ));
    assert!(tx.is_rolled_back());
}

// ==================== Diagnostics ====================

#[test]
fn test_hook_diagnostics_use_transaction_name() {
    use crate::transaction::TransactionConfig;

    let ctx = Context::background();
    let tx = Transaction::with_config(TransactionConfig::new().name("orders"));
    let (lines, logger) = capture_logger();
    tx.set_logger(logger);

    tx.add_hook(HookType::AfterCommit, |_: &Context, _: &Transaction| {
        Err::<(), _>("audit down")
    });
    tx.add_operation_hook(
        OperationHookType::AfterOperation,
        |_: &Context, _: &OperationEvent<'_>| Err::<(), _>("tap down"),
    );

    tx.do_op(&ctx, "reserve", ok, None).unwrap();
    tx.commit(&ctx).unwrap();

    let lines = lines.lock();
    let warnings: Vec<_> = lines
        .iter()
        .filter(|(level, _)| *level == Level::WARN)
        .map(|(_, msg)| msg.as_str())
        .collect();
    assert_eq!(warnings.len(), 2);
    assert!(warnings.iter().all(|msg| msg.starts_with("tx orders: ")));
    assert!(lines.iter().all(|(_, msg)| !msg.contains(tx.id())));
}
