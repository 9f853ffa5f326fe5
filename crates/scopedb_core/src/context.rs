//! Serialized execution contexts.
//!
//! Every transaction is bound 1:1 to a dedicated worker thread for the
//! lifetime of its mutation block. All transaction operations check the
//! binding and treat an off-context call as a precondition violation, not a
//! recoverable error.

use std::panic;
use std::thread::{self, ThreadId};
use tracing::debug;

/// Panic payload used by `Transaction::cancel` to unwind a mutation block.
///
/// Distinguished from ordinary panics at the join point: a `Cancelled`
/// unwind discards the transaction, anything else is propagated.
pub(crate) struct Cancelled;

/// Identity of the worker thread a transaction is bound to.
///
/// Captured when the transaction is constructed on its context thread and
/// compared against the calling thread by every operation.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    thread: ThreadId,
    name: String,
}

impl ExecutionContext {
    /// Binds to the calling thread.
    pub(crate) fn current(name: impl Into<String>) -> Self {
        Self {
            thread: thread::current().id(),
            name: name.into(),
        }
    }

    /// Returns the context's name (the worker thread name).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Checks whether the calling thread is the bound one.
    #[must_use]
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread
    }

    /// Panics when called from any thread other than the bound one.
    pub(crate) fn assert_current(&self, op: &str) {
        assert!(
            self.is_current(),
            "{op} must run on execution context `{}`",
            self.name
        );
    }
}

/// Runs `f` to completion on a fresh named worker thread, blocking the
/// caller until the block finishes.
///
/// Returns the closure's value, or `None` if the block unwound with
/// [`Cancelled`]. Any other panic is propagated to the caller.
pub(crate) fn run_serialized<T, F>(name: &str, f: F) -> Option<T>
where
    T: Send,
    F: FnOnce() -> T + Send,
{
    let joined = thread::scope(|scope| {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn_scoped(scope, f)
            .expect("failed to spawn execution context thread");
        handle.join()
    });

    match joined {
        Ok(value) => Some(value),
        Err(payload) => {
            if payload.downcast_ref::<Cancelled>().is_some() {
                debug!(context = name, "transaction block aborted via cancel");
                None
            } else {
                panic::resume_unwind(payload)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::panic_any;

    #[test]
    fn context_is_current_on_its_own_thread() {
        let value = run_serialized("ctx-test", || {
            let ctx = ExecutionContext::current("ctx-test");
            assert!(ctx.is_current());
            ctx
        })
        .unwrap();
        // Back on the caller's thread the binding no longer matches.
        assert!(!value.is_current());
    }

    #[test]
    fn cancelled_unwind_yields_none() {
        let result: Option<()> = run_serialized("ctx-cancel", || panic_any(Cancelled));
        assert!(result.is_none());
    }

    #[test]
    fn foreign_panic_is_propagated() {
        let result = std::panic::catch_unwind(|| {
            run_serialized("ctx-panic", || panic!("boom"));
        });
        assert!(result.is_err());
    }

    #[test]
    #[should_panic(expected = "must run on execution context")]
    fn assert_current_faults_off_context() {
        let ctx = run_serialized("ctx-bound", || ExecutionContext::current("ctx-bound")).unwrap();
        ctx.assert_current("operation");
    }
}
