//! Lifecycle and per-operation hooks.
//!
//! Hooks are plain callbacks registered on a transaction. Each one is either
//! critical (its failure aborts the enclosing call) or not (its failure is
//! logged and swallowed). Only events that can still be aborted honour
//! criticality:
//!
//! | Event            | Critical failure                                 |
//! |------------------|--------------------------------------------------|
//! | BeforeOperation  | `do_op` returns the error, operation never runs  |
//! | AfterOperation   | logged only                                      |
//! | BeforeCommit     | `commit` returns the error, tx stays pending     |
//! | AfterCommit      | logged only                                      |
//! | BeforeRollback   | logged only                                      |
//! | AfterRollback    | logged only                                      |

mod error;
mod registry;
pub(crate) mod runner;

pub use error::{HookError, HookPoint};
pub use registry::{Hook, HookRegistry, HookType, OperationEvent, OperationHook, OperationHookType};
