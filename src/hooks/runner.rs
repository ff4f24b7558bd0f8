//! Running hook lists with the engine's failure policy.

use std::sync::Arc;

use tracing::Level;

use crate::context::Context;
use crate::hooks::error::{HookError, HookPoint};
use crate::hooks::registry::{Hook, HookType, OperationEvent, OperationHook, OperationHookType};
use crate::observer::logger::{emit, Logger};
use crate::recover::guard;
use crate::transaction::Transaction;

/// Whether a critical hook's failure stops the enclosing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enforcement {
    /// First critical failure aborts; non-critical failures are logged.
    Critical,
    /// Every failure is logged; nothing aborts.
    BestEffort,
}

pub(crate) fn run_hooks(
    ctx: &Context,
    tx: &Transaction,
    hook_type: HookType,
    hooks: &[Hook],
    enforcement: Enforcement,
    logger: Option<&Arc<dyn Logger>>,
) -> Result<(), HookError> {
    for (index, hook) in hooks.iter().enumerate() {
        if let Err(source) = guard(|| hook.call(ctx, tx)) {
            let err = HookError {
                hook: HookPoint::Lifecycle(hook_type),
                index,
                critical: hook.is_critical(),
                source,
            };
            if err.critical && enforcement == Enforcement::Critical {
                return Err(err);
            }
            emit(logger, Level::WARN, format_args!("tx {}: {}", tx.label(), err));
        }
    }
    Ok(())
}

pub(crate) fn run_operation_hooks(
    ctx: &Context,
    tx_label: &str,
    hook_type: OperationHookType,
    hooks: &[OperationHook],
    event: &OperationEvent<'_>,
    enforcement: Enforcement,
    logger: Option<&Arc<dyn Logger>>,
) -> Result<(), HookError> {
    for (index, hook) in hooks.iter().enumerate() {
        if let Err(source) = guard(|| hook.call(ctx, event)) {
            let err = HookError {
                hook: HookPoint::Operation(hook_type),
                index,
                critical: hook.is_critical(),
                source,
            };
            if err.critical && enforcement == Enforcement::Critical {
                return Err(err);
            }
            emit(
                logger,
                Level::WARN,
                format_args!("tx {}: operation {:?}: {}", tx_label, event.name, err),
            );
        }
    }
    Ok(())
}
