//! Public batching surface (§4.5, §6 EXTERNAL INTERFACES).
//!
//! Grounded on the teacher's `SetObserverOnDrop`-style RAII guard pattern
//! in `runtime.rs` (restoring a previous tracking context on drop, even on
//! unwind): [`BatchGuard`] applies the same idea to `startBatch`/`endBatch`
//! so a batch started at the top of a function is guaranteed to end even
//! if the function returns early or panics.

use crate::runtime::{expect_runtime, RuntimeId};
use std::rc::Rc;

/// Runs `f` inside a single batch: every observable write inside `f` is
/// deferred until `f` returns, at which point affected reactions run once
/// each (§4.5 Testable Property 4).
pub fn batch<R>(runtime: RuntimeId, f: impl FnOnce() -> R) -> R {
    let _guard = BatchGuard::new(runtime);
    f()
}

/// An open batch, closed by `Drop`. Prefer [`batch`] for the common case;
/// use this directly when the batch must span more than one expression
/// (e.g. held across a loop body).
pub struct BatchGuard {
    runtime: RuntimeId,
}

impl BatchGuard {
    pub fn new(runtime: RuntimeId) -> Self {
        expect_runtime(runtime, |rt| rt.start_batch());
        Self { runtime }
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        let _ = crate::runtime::with_runtime(self.runtime, |rt| rt.end_batch());
    }
}

/// Installs a scheduler that wraps the existing one (§4.5
/// `setReactionScheduler`). Composition preserves ordering: the new
/// scheduler decides when to invoke the drain pass, which is itself
/// wrapped by whatever scheduler was installed before it.
pub fn set_reaction_scheduler(runtime: RuntimeId, wrap: impl Fn(&dyn Fn()) + 'static) {
    expect_runtime(runtime, |rt| {
        let previous = rt.current_scheduler();
        let wrap = Rc::new(wrap);
        rt.set_scheduler(Rc::new(move |drain: &dyn Fn()| {
            let previous = Rc::clone(&previous);
            wrap(&move || previous(drain));
        }));
    });
}
