//! Hook error types.

use std::fmt;

use thiserror::Error;

use crate::hooks::registry::{HookType, OperationHookType};
use crate::BoxError;

/// Where a hook is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    Lifecycle(HookType),
    Operation(OperationHookType),
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPoint::Lifecycle(t) => write!(f, "{}", t),
            HookPoint::Operation(t) => write!(f, "{}", t),
        }
    }
}

/// A hook that returned an error or panicked.
#[derive(Debug, Error)]
#[error("{} {hook} hook #{index} failed: {source}", criticality(.critical))]
pub struct HookError {
    /// The event the hook was registered for.
    pub hook: HookPoint,
    /// Position of the hook within its event's list.
    pub index: usize,
    /// Whether the hook was registered as critical.
    pub critical: bool,
    /// The hook's error, or a [`PanicError`](crate::recover::PanicError).
    #[source]
    pub source: BoxError,
}

fn criticality(critical: &bool) -> &'static str {
    if *critical {
        "critical"
    } else {
        "non-critical"
    }
}
