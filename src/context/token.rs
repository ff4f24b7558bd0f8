//! The cancellation token handed to every operation, compensation and hook.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::context::error::{ContextError, ContextResult};

/// A cancellable, optionally deadline-bound context.
///
/// Cheap to clone: clones share the same cancellation state. Children created
/// with [`with_cancel`](Context::with_cancel) or
/// [`with_timeout`](Context::with_timeout) observe their parent's
/// cancellation and inherit the earliest deadline along the chain.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    /// Earliest deadline of this context and all of its ancestors.
    deadline: Option<Instant>,
    state: Mutex<ContextState>,
    /// Signalled on cancellation so sleepers wake early.
    wake: Condvar,
}

#[derive(Default)]
struct ContextState {
    cause: Option<ContextError>,
    children: Vec<Weak<ContextInner>>,
}

/// Cancels the context it was created with (and all of its descendants).
#[derive(Clone)]
pub struct CancelHandle {
    inner: Arc<ContextInner>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                deadline: None,
                state: Mutex::new(ContextState::default()),
                wake: Condvar::new(),
            }),
        }
    }

    /// Derive a child context together with a handle that cancels it.
    pub fn with_cancel(&self) -> (Context, CancelHandle) {
        let child = self.child(self.inner.deadline);
        let handle = CancelHandle {
            inner: child.inner.clone(),
        };
        (child, handle)
    }

    /// Derive a child context that expires after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Context {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.child(self.inner.deadline),
        }
    }

    /// Derive a child context that expires at `deadline`.
    ///
    /// A parent deadline that comes earlier still wins.
    pub fn with_deadline(&self, deadline: Instant) -> Context {
        let effective = match self.inner.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        self.child(Some(effective))
    }

    fn child(&self, deadline: Option<Instant>) -> Context {
        let child = Context {
            inner: Arc::new(ContextInner {
                deadline,
                state: Mutex::new(ContextState::default()),
                wake: Condvar::new(),
            }),
        };

        let mut state = self.inner.state.lock();
        if let Some(cause) = state.cause {
            drop(state);
            child.inner.cancel(cause);
        } else {
            state.children.retain(|c| c.strong_count() > 0);
            state.children.push(Arc::downgrade(&child.inner));
        }
        child
    }

    /// The effective deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Time left before the deadline. `None` means no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Why the context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<ContextError> {
        if let Some(cause) = self.inner.state.lock().cause {
            return Some(cause);
        }
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Check if the context is cancelled or expired.
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// `Ok(())` while the context is live, its error otherwise.
    pub fn check(&self) -> ContextResult<()> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Sleep for `duration`, returning early with an error if the context is
    /// cancelled or its deadline passes first.
    pub fn sleep(&self, duration: Duration) -> ContextResult<()> {
        let wake_at = Instant::now().checked_add(duration);
        let mut state = self.inner.state.lock();

        loop {
            if let Some(cause) = state.cause {
                return Err(cause);
            }

            let now = Instant::now();
            if let Some(deadline) = self.inner.deadline {
                if now >= deadline {
                    return Err(ContextError::DeadlineExceeded);
                }
            }
            if let Some(wake_at) = wake_at {
                if now >= wake_at {
                    return Ok(());
                }
            }

            let until = match (wake_at, self.inner.deadline) {
                (Some(w), Some(d)) => Some(w.min(d)),
                (Some(w), None) => Some(w),
                (None, d) => d,
            };
            match until {
                Some(until) => {
                    self.inner.wake.wait_until(&mut state, until);
                }
                None => self.inner.wake.wait(&mut state),
            }
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.inner.deadline)
            .field("err", &self.err())
            .finish()
    }
}

impl ContextInner {
    fn cancel(&self, cause: ContextError) {
        let children = {
            let mut state = self.state.lock();
            if state.cause.is_some() {
                return;
            }
            state.cause = Some(cause);
            std::mem::take(&mut state.children)
        };
        self.wake.notify_all();

        for child in children {
            if let Some(child) = child.upgrade() {
                child.cancel(cause);
            }
        }
    }
}

impl CancelHandle {
    /// Cancel the context. Idempotent.
    pub fn cancel(&self) {
        let cause = match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => ContextError::DeadlineExceeded,
            _ => ContextError::Canceled,
        };
        self.inner.cancel(cause);
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle").finish_non_exhaustive()
    }
}
