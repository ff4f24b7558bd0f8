//! Transaction manager - hands out transactions and tracks the live ones.
//!
//! The TransactionManager is a convenience layer over [`Transaction`].
//! It handles:
//! - Creating transactions with a shared configuration, observer and logger
//! - Tracking pending transactions by ID
//! - Closure-scoped transactions that commit on success and roll back otherwise
//! - Pruning transactions that were finished outside the manager

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::Level;

use crate::context::Context;
use crate::observer::logger::{emit, Logger};
use crate::observer::Observer;
use crate::transaction::config::TransactionConfig;
use crate::transaction::context::Transaction;
use crate::transaction::error::{TransactionError, TransactionResult};

/// Transaction manager - creates and tracks transactions.
///
/// Thread-safe: can be shared across threads via Clone (uses Arc internally).
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<TransactionManagerInner>,
}

struct TransactionManagerInner {
    /// Configuration given to every new transaction.
    config: TransactionConfig,
    observer: RwLock<Option<Arc<dyn Observer>>>,
    logger: RwLock<Option<Arc<dyn Logger>>>,
    /// Pending transactions tracked by ID.
    active: RwLock<HashMap<String, Arc<Transaction>>>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new(TransactionConfig::default())
    }
}

impl TransactionManager {
    /// Create a manager whose transactions all use `config`.
    pub fn new(config: TransactionConfig) -> Self {
        Self {
            inner: Arc::new(TransactionManagerInner {
                config,
                observer: RwLock::new(None),
                logger: RwLock::new(None),
                active: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.inner.config
    }

    /// Observer attached to transactions begun from now on.
    pub fn set_observer(&self, observer: Arc<dyn Observer>) {
        *self.inner.observer.write() = Some(observer);
    }

    /// Logger attached to transactions begun from now on.
    pub fn set_logger(&self, logger: Arc<dyn Logger>) {
        *self.inner.logger.write() = Some(logger);
    }

    /// Begin a new tracked transaction.
    pub fn begin(&self) -> Arc<Transaction> {
        let tx = Arc::new(Transaction::with_config(self.inner.config.clone()));

        if let Some(observer) = self.inner.observer.read().clone() {
            tx.set_observer(observer);
        }
        let logger = self.inner.logger.read().clone();
        if let Some(logger) = &logger {
            tx.set_logger(logger.clone());
        }

        self.inner
            .active
            .write()
            .insert(tx.id().to_string(), tx.clone());

        emit(
            logger.as_ref(),
            Level::DEBUG,
            format_args!("tx {}: begun", tx.id()),
        );
        tx
    }

    /// Get the number of tracked transactions.
    pub fn active_count(&self) -> usize {
        self.inner.active.read().len()
    }

    /// List all tracked transaction IDs.
    pub fn active_transactions(&self) -> Vec<String> {
        self.inner.active.read().keys().cloned().collect()
    }

    /// Check if a transaction is tracked.
    pub fn is_active(&self, tx_id: &str) -> bool {
        self.inner.active.read().contains_key(tx_id)
    }

    /// Look up a tracked transaction.
    pub fn get(&self, tx_id: &str) -> Option<Arc<Transaction>> {
        self.inner.active.read().get(tx_id).cloned()
    }

    fn release_if_finished(&self, tx: &Transaction) {
        if !tx.is_pending() {
            self.inner.active.write().remove(tx.id());
        }
    }

    /// Commit a transaction and stop tracking it once it is terminal.
    pub fn commit(&self, ctx: &Context, tx: &Transaction) -> TransactionResult<()> {
        let result = tx.commit(ctx);
        self.release_if_finished(tx);
        result
    }

    /// Roll back a transaction and stop tracking it once it is terminal.
    pub fn rollback(&self, ctx: &Context, tx: &Transaction) -> TransactionResult<()> {
        let result = tx.rollback(ctx);
        self.release_if_finished(tx);
        result
    }

    /// Stop tracking transactions that were committed or rolled back directly.
    pub fn cleanup_finished(&self) -> usize {
        let mut active = self.inner.active.write();
        let before = active.len();
        active.retain(|_, tx| tx.is_pending());
        before - active.len()
    }

    /// Execute a function within a transaction, automatically committing or
    /// rolling back.
    ///
    /// If the function returns Ok, the transaction is committed; should the
    /// commit be vetoed it is rolled back and the commit error returned.
    /// If the function returns Err, the transaction is rolled back and the
    /// function's error returned. If it panics, the transaction is rolled back
    /// and the panic resumes.
    pub fn run<F, T, E>(&self, ctx: &Context, f: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction) -> Result<T, E>,
        E: From<TransactionError>,
    {
        let tx = self.begin();

        match panic::catch_unwind(AssertUnwindSafe(|| f(&*tx))) {
            Ok(Ok(value)) => match self.commit(ctx, &tx) {
                Ok(()) => Ok(value),
                Err(err) => {
                    self.rollback_quietly(ctx, &tx);
                    Err(err.into())
                }
            },
            Ok(Err(err)) => {
                self.rollback_quietly(ctx, &tx);
                Err(err)
            }
            Err(payload) => {
                self.rollback_quietly(ctx, &tx);
                panic::resume_unwind(payload)
            }
        }
    }

    /// Roll back on behalf of `run`, where the caller already has an error to
    /// report.
    fn rollback_quietly(&self, ctx: &Context, tx: &Transaction) {
        if let Err(err) = self.rollback(ctx, tx) {
            let logger = self.inner.logger.read().clone();
            emit(
                logger.as_ref(),
                Level::WARN,
                format_args!("tx {}: rollback after failure: {}", tx.id(), err),
            );
        }
    }
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("config", &self.inner.config)
            .field("active_count", &self.active_count())
            .finish()
    }
}
