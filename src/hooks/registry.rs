//! Hook types and the per-transaction hook tables.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::context::Context;
use crate::transaction::Transaction;
use crate::BoxError;

/// Lifecycle events a hook can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookType {
    BeforeCommit,
    AfterCommit,
    BeforeRollback,
    AfterRollback,
}

impl HookType {
    /// Every lifecycle event, in the order they can fire.
    pub const ALL: [HookType; 4] = [
        HookType::BeforeCommit,
        HookType::AfterCommit,
        HookType::BeforeRollback,
        HookType::AfterRollback,
    ];

    /// Criticality used by `add_default_hook`: only BeforeCommit can veto.
    pub fn default_critical(&self) -> bool {
        matches!(self, HookType::BeforeCommit)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HookType::BeforeCommit => "before_commit",
            HookType::AfterCommit => "after_commit",
            HookType::BeforeRollback => "before_rollback",
            HookType::AfterRollback => "after_rollback",
        }
    }
}

impl fmt::Display for HookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-operation events a hook can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationHookType {
    BeforeOperation,
    AfterOperation,
}

impl OperationHookType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationHookType::BeforeOperation => "before_operation",
            OperationHookType::AfterOperation => "after_operation",
        }
    }
}

impl fmt::Display for OperationHookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an operation hook sees.
#[derive(Debug, Clone, Copy)]
pub struct OperationEvent<'a> {
    /// Name passed to `do_op`.
    pub name: &'a str,
    /// How long the operation ran; `None` before it runs.
    pub duration: Option<Duration>,
    /// Whether the operation returned an error (always false before it runs).
    pub failed: bool,
}

type HookFn = dyn Fn(&Context, &Transaction) -> Result<(), BoxError> + Send + Sync;
type OperationHookFn = dyn Fn(&Context, &OperationEvent<'_>) -> Result<(), BoxError> + Send + Sync;

/// A lifecycle callback and its criticality.
#[derive(Clone)]
pub struct Hook {
    func: Arc<HookFn>,
    critical: bool,
}

impl Hook {
    pub fn new<F, E>(critical: bool, func: F) -> Self
    where
        F: Fn(&Context, &Transaction) -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self {
            func: Arc::new(move |ctx: &Context, tx: &Transaction| func(ctx, tx).map_err(Into::into)),
            critical,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.critical
    }

    pub(crate) fn call(&self, ctx: &Context, tx: &Transaction) -> Result<(), BoxError> {
        (self.func)(ctx, tx)
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("critical", &self.critical)
            .finish_non_exhaustive()
    }
}

/// A per-operation callback and its criticality.
#[derive(Clone)]
pub struct OperationHook {
    func: Arc<OperationHookFn>,
    critical: bool,
}

impl OperationHook {
    pub fn new<F, E>(critical: bool, func: F) -> Self
    where
        F: Fn(&Context, &OperationEvent<'_>) -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self {
            func: Arc::new(move |ctx: &Context, event: &OperationEvent<'_>| {
                func(ctx, event).map_err(Into::into)
            }),
            critical,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.critical
    }

    pub(crate) fn call(&self, ctx: &Context, event: &OperationEvent<'_>) -> Result<(), BoxError> {
        (self.func)(ctx, event)
    }
}

impl fmt::Debug for OperationHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHook")
            .field("critical", &self.critical)
            .finish_non_exhaustive()
    }
}

/// Ordered hook lists, keyed by event. Insertion order is execution order.
#[derive(Debug, Clone, Default)]
pub struct HookRegistry {
    lifecycle: HashMap<HookType, Vec<Hook>>,
    operation: HashMap<OperationHookType, Vec<OperationHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, hook_type: HookType, hook: Hook) {
        self.lifecycle.entry(hook_type).or_default().push(hook);
    }

    pub fn add_operation(&mut self, hook_type: OperationHookType, hook: OperationHook) {
        self.operation.entry(hook_type).or_default().push(hook);
    }

    /// Snapshot of the hooks for `hook_type`, safe to run without the lock.
    pub fn hooks(&self, hook_type: HookType) -> Vec<Hook> {
        self.lifecycle.get(&hook_type).cloned().unwrap_or_default()
    }

    pub fn operation_hooks(&self, hook_type: OperationHookType) -> Vec<OperationHook> {
        self.operation.get(&hook_type).cloned().unwrap_or_default()
    }

    pub fn count(&self, hook_type: HookType) -> usize {
        self.lifecycle.get(&hook_type).map_or(0, Vec::len)
    }

    pub fn operation_count(&self, hook_type: OperationHookType) -> usize {
        self.operation.get(&hook_type).map_or(0, Vec::len)
    }

    pub fn clear(&mut self, hook_type: HookType) {
        self.lifecycle.remove(&hook_type);
    }

    pub fn clear_operation(&mut self, hook_type: OperationHookType) {
        self.operation.remove(&hook_type);
    }

    /// Remove every lifecycle and operation hook.
    pub fn clear_all(&mut self) {
        self.lifecycle.clear();
        self.operation.clear();
    }
}
