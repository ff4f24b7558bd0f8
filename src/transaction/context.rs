//! Transaction context: the operation log and its lifecycle.
//!
//! ```text
//!              do_op ──► Active ◄───────────────────────┐
//!                          │                            │ BeforeCommit veto,
//!             commit ──────┼──► Committing ──► Committed │ savepoint rollback done
//!                          │                            │
//!   rollback / savepoint ──┴──► RollingBack ──► RolledBack
//! ```
//!
//! `Committing` and `RollingBack` are only entered once no `do_op` is in
//! flight, and no new `do_op` may start while either is held.

use std::error::Error as StdError;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::Level;
use ulid::Ulid;

use crate::context::Context;
use crate::hooks::runner::{run_hooks, run_operation_hooks, Enforcement};
use crate::hooks::{
    Hook, HookRegistry, HookType, OperationEvent, OperationHook, OperationHookType,
};
use crate::observer::logger::{emit, Logger};
use crate::observer::Observer;
use crate::recover::{guard, recover};
use crate::retry::compensate_with_retry;
use crate::transaction::config::{DoOptions, TransactionConfig};
use crate::transaction::error::{
    CompensationFailure, RollbackError, SavepointFault, TransactionError, TransactionResult,
};
use crate::transaction::record::{Compensation, HistoryEntry, OperationRecord};
use crate::transaction::savepoint::Savepoint;
use crate::BoxError;

/// Where a transaction is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    /// Accepting operations.
    Active,
    /// Running BeforeCommit hooks; falls back to `Active` on a veto.
    Committing,
    /// Compensating, for a full rollback or a savepoint rollback.
    RollingBack,
    Committed,
    RolledBack,
}

impl TransactionStatus {
    /// Neither committed nor rolled back.
    pub fn is_pending(&self) -> bool {
        !self.is_terminal()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Committed | TransactionStatus::RolledBack)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Active => "active",
            TransactionStatus::Committing => "committing",
            TransactionStatus::RollingBack => "rolling back",
            TransactionStatus::Committed => "committed",
            TransactionStatus::RolledBack => "rolled back",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work: operations run in order, each paired with an optional
/// compensation that rollback runs newest-first.
///
/// Thread-safe: share it with `Arc<Transaction>` and call `do_op` from as many
/// threads as needed. History order is the order operations *finished*.
pub struct Transaction {
    id: String,
    created_at: DateTime<Utc>,
    config: TransactionConfig,
    state: RwLock<TxState>,
    /// `do_op` calls currently between their precondition check and return.
    executing: AtomicUsize,
}

struct TxState {
    status: TransactionStatus,
    operations: Vec<OperationRecord>,
    hooks: HookRegistry,
    observer: Option<Arc<dyn Observer>>,
    logger: Option<Arc<dyn Logger>>,
}

/// Keeps `executing` raised for as long as it lives.
struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self { counter }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction {
    /// Create a pending transaction with the default configuration.
    pub fn new() -> Self {
        Self::with_config(TransactionConfig::default())
    }

    /// Create a pending transaction with a specific configuration.
    pub fn with_config(config: TransactionConfig) -> Self {
        Self {
            id: Ulid::new().to_string().to_lowercase(),
            created_at: Utc::now(),
            config,
            state: RwLock::new(TxState {
                status: TransactionStatus::Active,
                operations: Vec::new(),
                hooks: HookRegistry::new(),
                observer: None,
                logger: None,
            }),
            executing: AtomicUsize::new(0),
        }
    }

    /// Get the transaction ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the configured label, if any.
    pub fn name(&self) -> Option<&str> {
        self.config.name.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    pub fn status(&self) -> TransactionStatus {
        self.state.read().status
    }

    pub fn is_pending(&self) -> bool {
        self.status().is_pending()
    }

    pub fn is_committed(&self) -> bool {
        self.status() == TransactionStatus::Committed
    }

    pub fn is_rolled_back(&self) -> bool {
        self.status() == TransactionStatus::RolledBack
    }

    /// Number of recorded operations (failed ones included).
    pub fn operation_count(&self) -> usize {
        self.state.read().operations.len()
    }

    /// Number of `do_op` calls currently running.
    pub fn in_flight(&self) -> usize {
        self.executing.load(Ordering::Acquire)
    }

    /// Snapshot of the operation log, oldest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.state
            .read()
            .operations
            .iter()
            .enumerate()
            .map(|(i, record)| HistoryEntry::from_record(i, record))
            .collect()
    }

    /// The operation log rendered as JSON.
    pub fn history_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.history())
    }

    // ==================== Wiring ====================

    /// Attach the observer, replacing any previous one.
    pub fn set_observer(&self, observer: Arc<dyn Observer>) {
        self.state.write().observer = Some(observer);
    }

    /// Turn on diagnostics. Without a logger the transaction logs nothing.
    pub fn set_logger(&self, logger: Arc<dyn Logger>) {
        self.state.write().logger = Some(logger);
    }

    // ==================== Hooks ====================

    /// Register a non-critical lifecycle hook.
    pub fn add_hook<F, E>(&self, hook_type: HookType, f: F)
    where
        F: Fn(&Context, &Transaction) -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.state.write().hooks.add(hook_type, Hook::new(false, f));
    }

    /// Register a lifecycle hook whose failure aborts a BeforeCommit.
    pub fn add_critical_hook<F, E>(&self, hook_type: HookType, f: F)
    where
        F: Fn(&Context, &Transaction) -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.state.write().hooks.add(hook_type, Hook::new(true, f));
    }

    /// Register a hook that is critical for BeforeCommit and non-critical
    /// everywhere else.
    pub fn add_default_hook<F, E>(&self, hook_type: HookType, f: F)
    where
        F: Fn(&Context, &Transaction) -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        let hook = Hook::new(hook_type.default_critical(), f);
        self.state.write().hooks.add(hook_type, hook);
    }

    /// Register a non-critical per-operation hook.
    pub fn add_operation_hook<F, E>(&self, hook_type: OperationHookType, f: F)
    where
        F: Fn(&Context, &OperationEvent<'_>) -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.state
            .write()
            .hooks
            .add_operation(hook_type, OperationHook::new(false, f));
    }

    /// Register a per-operation hook; as a BeforeOperation hook its failure
    /// stops the operation from running.
    pub fn add_critical_operation_hook<F, E>(&self, hook_type: OperationHookType, f: F)
    where
        F: Fn(&Context, &OperationEvent<'_>) -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.state
            .write()
            .hooks
            .add_operation(hook_type, OperationHook::new(true, f));
    }

    pub fn clear_hooks(&self, hook_type: HookType) {
        self.state.write().hooks.clear(hook_type);
    }

    pub fn clear_operation_hooks(&self, hook_type: OperationHookType) {
        self.state.write().hooks.clear_operation(hook_type);
    }

    /// Remove every lifecycle and operation hook.
    pub fn clear_all_hooks(&self) {
        self.state.write().hooks.clear_all();
    }

    pub fn hook_count(&self, hook_type: HookType) -> usize {
        self.state.read().hooks.count(hook_type)
    }

    // ==================== Operations ====================

    /// Run `operation` once and remember `compensate` for a later rollback.
    ///
    /// A failed operation is still recorded (with its compensation) and the
    /// error is returned; nothing is rolled back automatically.
    pub fn do_op<F, E>(
        &self,
        ctx: &Context,
        name: &str,
        operation: F,
        compensate: Option<Compensation>,
    ) -> TransactionResult<()>
    where
        F: FnOnce(&Context) -> Result<(), E>,
        E: Into<BoxError>,
    {
        self.do_with_options(ctx, name, operation, compensate, DoOptions::default())
    }

    /// [`do_op`](Self::do_op) with a per-call timeout and compensation retry
    /// policy.
    pub fn do_with_options<F, E>(
        &self,
        ctx: &Context,
        name: &str,
        operation: F,
        compensate: Option<Compensation>,
        options: DoOptions,
    ) -> TransactionResult<()>
    where
        F: FnOnce(&Context) -> Result<(), E>,
        E: Into<BoxError>,
    {
        // Check and count under the lock so commit/rollback, which need the
        // write lock to leave Active, always see this call.
        let (_in_flight, before, after, observer, logger) = {
            let state = self.state.read();
            ctx.check()?;
            self.ensure_active(state.status)?;
            (
                InFlight::enter(&self.executing),
                state.hooks.operation_hooks(OperationHookType::BeforeOperation),
                state.hooks.operation_hooks(OperationHookType::AfterOperation),
                state.observer.clone(),
                state.logger.clone(),
            )
        };

        let event = OperationEvent {
            name,
            duration: None,
            failed: false,
        };
        run_operation_hooks(
            ctx,
            self.label(),
            OperationHookType::BeforeOperation,
            &before,
            &event,
            Enforcement::Critical,
            logger.as_ref(),
        )?;

        self.notify(observer.as_ref(), logger.as_ref(), "on_operation_start", |o| {
            o.on_operation_start(name)
        });

        let op_ctx = match options.effective_timeout() {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx.clone(),
        };
        let executed_at = Utc::now();
        let started = Instant::now();
        let result = guard(|| operation(&op_ctx).map_err(Into::into));
        let duration = started.elapsed();

        self.notify(observer.as_ref(), logger.as_ref(), "on_operation_end", |o| {
            let err = result
                .as_ref()
                .err()
                .map(|e| &**e as &(dyn StdError + 'static));
            o.on_operation_end(name, duration, err)
        });

        let retry = options
            .compensation_retry
            .or_else(|| self.config.default_compensation_retry.clone());
        self.state.write().operations.push(OperationRecord {
            name: name.to_string(),
            compensate,
            retry,
            executed_at,
            duration,
            error: result.as_ref().err().map(|e| e.to_string()),
        });

        let event = OperationEvent {
            name,
            duration: Some(duration),
            failed: result.is_err(),
        };
        // Best effort never returns an error.
        let _ = run_operation_hooks(
            ctx,
            self.label(),
            OperationHookType::AfterOperation,
            &after,
            &event,
            Enforcement::BestEffort,
            logger.as_ref(),
        );

        result.map_err(|source| TransactionError::Operation {
            name: name.to_string(),
            source,
        })
    }

    // ==================== Transaction Control ====================

    /// Close the transaction as successful.
    ///
    /// Waits for in-flight operations, then runs BeforeCommit hooks. A
    /// critical hook failure leaves the transaction pending and is returned.
    pub fn commit(&self, ctx: &Context) -> TransactionResult<()> {
        self.enter_phase(ctx, TransactionStatus::Committing, |_| Ok(()))?;

        let (before, after, observer, logger) = {
            let state = self.state.read();
            (
                state.hooks.hooks(HookType::BeforeCommit),
                state.hooks.hooks(HookType::AfterCommit),
                state.observer.clone(),
                state.logger.clone(),
            )
        };

        if let Err(err) = run_hooks(
            ctx,
            self,
            HookType::BeforeCommit,
            &before,
            Enforcement::Critical,
            logger.as_ref(),
        ) {
            self.state.write().status = TransactionStatus::Active;
            emit(
                logger.as_ref(),
                Level::WARN,
                format_args!("tx {}: commit aborted: {}", self.label(), err),
            );
            return Err(err.into());
        }

        let count = {
            let mut state = self.state.write();
            state.status = TransactionStatus::Committed;
            state.operations.len()
        };
        emit(
            logger.as_ref(),
            Level::DEBUG,
            format_args!("tx {}: committed {} operation(s)", self.label(), count),
        );

        self.notify(observer.as_ref(), logger.as_ref(), "on_commit", |o| o.on_commit());
        let _ = run_hooks(
            ctx,
            self,
            HookType::AfterCommit,
            &after,
            Enforcement::BestEffort,
            logger.as_ref(),
        );
        Ok(())
    }

    /// Undo every recorded operation, newest first.
    ///
    /// A failing compensation never stops earlier ones from running; all
    /// failures come back together in a [`RollbackError`]. Rolling back twice
    /// is a no-op; rolling back a committed transaction is an error.
    pub fn rollback(&self, ctx: &Context) -> TransactionResult<()> {
        match self.enter_phase(ctx, TransactionStatus::RollingBack, |_| Ok(())) {
            Ok(()) => {}
            Err(TransactionError::AlreadyRolledBack { .. }) => return Ok(()),
            Err(err) => return Err(err),
        }

        let (records, before, after, observer, logger) = {
            let state = self.state.read();
            (
                state.operations.clone(),
                state.hooks.hooks(HookType::BeforeRollback),
                state.hooks.hooks(HookType::AfterRollback),
                state.observer.clone(),
                state.logger.clone(),
            )
        };

        let _ = run_hooks(
            ctx,
            self,
            HookType::BeforeRollback,
            &before,
            Enforcement::BestEffort,
            logger.as_ref(),
        );

        let failures = self.compensate_records(ctx, &records, 0, logger.as_ref());

        self.state.write().status = TransactionStatus::RolledBack;
        emit(
            logger.as_ref(),
            Level::DEBUG,
            format_args!(
                "tx {}: rolled back {} operation(s), {} compensation failure(s)",
                self.label(),
                records.len(),
                failures.len()
            ),
        );

        self.notify(observer.as_ref(), logger.as_ref(), "on_rollback", |o| {
            o.on_rollback(&failures)
        });
        let _ = run_hooks(
            ctx,
            self,
            HookType::AfterRollback,
            &after,
            Enforcement::BestEffort,
            logger.as_ref(),
        );

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RollbackError::new(failures).into())
        }
    }

    // ==================== Savepoints ====================

    /// Remember the current end of the operation log.
    pub fn create_savepoint(&self, name: impl Into<String>) -> Savepoint {
        let index = self.state.read().operations.len();
        Savepoint {
            name: name.into(),
            index,
            tx_id: self.id.clone(),
            created_at: Utc::now(),
        }
    }

    /// Undo, newest first, every operation recorded after `savepoint`.
    ///
    /// The transaction stays pending. Lifecycle hooks and the observer's
    /// `on_rollback` are not involved.
    pub fn rollback_to_savepoint(
        &self,
        ctx: &Context,
        savepoint: &Savepoint,
    ) -> TransactionResult<()> {
        if savepoint.tx_id != self.id {
            return Err(TransactionError::InvalidSavepoint {
                name: savepoint.name.clone(),
                reason: SavepointFault::ForeignTransaction {
                    owner: savepoint.tx_id.clone(),
                },
            });
        }

        self.enter_phase(ctx, TransactionStatus::RollingBack, |state| {
            let len = state.operations.len();
            if savepoint.index > len {
                return Err(TransactionError::InvalidSavepoint {
                    name: savepoint.name.clone(),
                    reason: SavepointFault::Stale {
                        index: savepoint.index,
                        len,
                    },
                });
            }
            Ok(())
        })?;

        let (removed, logger) = {
            let mut state = self.state.write();
            (state.operations.split_off(savepoint.index), state.logger.clone())
        };
        emit(
            logger.as_ref(),
            Level::DEBUG,
            format_args!(
                "tx {}: rolling back {} operation(s) to savepoint {:?}",
                self.label(),
                removed.len(),
                savepoint.name
            ),
        );

        let failures = self.compensate_records(ctx, &removed, savepoint.index, logger.as_ref());
        self.state.write().status = TransactionStatus::Active;

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RollbackError::new(failures).into())
        }
    }

    // ==================== Internals ====================

    fn ensure_active(&self, status: TransactionStatus) -> TransactionResult<()> {
        match status {
            TransactionStatus::Active => Ok(()),
            TransactionStatus::Committed => Err(TransactionError::AlreadyCommitted {
                tx_id: self.id.clone(),
            }),
            TransactionStatus::RolledBack => Err(TransactionError::AlreadyRolledBack {
                tx_id: self.id.clone(),
            }),
            status => Err(TransactionError::LifecycleInProgress {
                tx_id: self.id.clone(),
                status,
            }),
        }
    }

    /// Wait until the transaction is Active with nothing in flight, then
    /// switch to `phase`.
    ///
    /// `validate` runs under the same write lock as the switch. The context
    /// is only consulted while waiting; cancellation then returns without
    /// touching the state.
    fn enter_phase<V>(
        &self,
        ctx: &Context,
        phase: TransactionStatus,
        validate: V,
    ) -> TransactionResult<()>
    where
        V: Fn(&TxState) -> TransactionResult<()>,
    {
        loop {
            {
                let mut state = self.state.write();
                match state.status {
                    TransactionStatus::Committed | TransactionStatus::RolledBack => {
                        return self.ensure_active(state.status);
                    }
                    TransactionStatus::Active if self.executing.load(Ordering::Acquire) == 0 => {
                        validate(&state)?;
                        state.status = phase;
                        return Ok(());
                    }
                    // In-flight operations, or another commit/rollback running.
                    _ => {}
                }
            }
            ctx.sleep(self.config.poll_interval)?;
        }
    }

    /// Compensate `records` newest first. `base` is the log index of
    /// `records[0]`.
    fn compensate_records(
        &self,
        ctx: &Context,
        records: &[OperationRecord],
        base: usize,
        logger: Option<&Arc<dyn Logger>>,
    ) -> Vec<CompensationFailure> {
        let mut failures = Vec::new();

        for (offset, record) in records.iter().enumerate().rev() {
            let index = base + offset;
            let Some(compensate) = &record.compensate else {
                emit(
                    logger,
                    Level::DEBUG,
                    format_args!(
                        "tx {}: operation {:?} (#{}) has nothing to undo",
                        self.label(),
                        record.name,
                        index
                    ),
                );
                continue;
            };

            match compensate_with_retry(ctx, |c| compensate.call(c), record.retry.as_ref(), logger) {
                Ok(()) => emit(
                    logger,
                    Level::DEBUG,
                    format_args!(
                        "tx {}: compensated operation {:?} (#{})",
                        self.label(),
                        record.name,
                        index
                    ),
                ),
                Err(source) => {
                    emit(
                        logger,
                        Level::WARN,
                        format_args!(
                            "tx {}: compensation for operation {:?} (#{}) failed: {}",
                            self.label(),
                            record.name,
                            index,
                            source
                        ),
                    );
                    failures.push(CompensationFailure {
                        index,
                        operation: record.name.clone(),
                        source,
                    });
                }
            }
        }

        failures
    }

    /// Deliver one observer notification, containing any panic.
    fn notify<F>(
        &self,
        observer: Option<&Arc<dyn Observer>>,
        logger: Option<&Arc<dyn Logger>>,
        event: &str,
        f: F,
    ) where
        F: FnOnce(&dyn Observer),
    {
        if let Some(observer) = observer {
            if let Err(panic) = recover(|| f(observer.as_ref())) {
                emit(
                    logger,
                    Level::ERROR,
                    format_args!("tx {}: observer panicked in {}: {}", self.label(), event, panic),
                );
            }
        }
    }

    /// Configured name, falling back to the ID.
    pub(crate) fn label(&self) -> &str {
        self.config.name.as_deref().unwrap_or(&self.id)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("name", &self.config.name)
            .field("status", &state.status)
            .field("operations", &state.operations.len())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
