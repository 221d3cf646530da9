//! Side-effecting derivations (§3 DATA MODEL "Reaction", §4.4).
//!
//! A `Reaction` is a derivation that is never itself observable: it is
//! eagerly scheduled onto the pending queue whenever it goes stale, and it
//! runs a user callback that is expected to call back into [`Reaction::track`]
//! (possibly asynchronously) to re-enter the tracked function.
//!
//! Grounded on the teacher's `Effect`/`AnyComputation` split in
//! `effect.rs`: the user function is stored once behind an `Rc` and run
//! through a small adapter that the generic runtime invokes without
//! knowing `Reaction`'s shape — here that adapter is
//! `Runtime::install_run_reaction_hook` rather than a `dyn Any` value cell.

use std::{cell::RefCell, fmt, panic::AssertUnwindSafe, rc::Rc};

use crate::{
    error::CaughtError,
    node::DerivationId,
    runtime::{expect_runtime, DerivationKind, RuntimeId},
    spy::SpyEvent,
};

struct ReactionCore {
    name: String,
    on_invalidate: Rc<dyn Fn(&Reaction)>,
    error_handler: RefCell<Option<Rc<dyn Fn(&CaughtError)>>>,
}

/// A scheduled, re-entrant side effect (§4.4).
///
/// Cloning a `Reaction` clones the handle; all clones share one place in
/// the graph and one `is_disposed` flag.
#[derive(Clone)]
pub struct Reaction {
    runtime: RuntimeId,
    derivation: DerivationId,
    core: Rc<ReactionCore>,
}

impl fmt::Debug for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reaction").field("name", &self.core.name).finish()
    }
}

impl Reaction {
    /// Creates a reaction whose `runReaction` pass invokes `on_invalidate`.
    /// `on_invalidate` is expected to call `reaction.track(...)` — directly
    /// for a synchronous `autorun`, or later (e.g. after an await) for
    /// reactions that defer their re-tracking (§4.4).
    #[track_caller]
    pub fn new(runtime: RuntimeId, name: impl Into<String>, on_invalidate: impl Fn(&Reaction) + 'static) -> Self {
        let name = name.into();
        let defined_at = crate::diagnostics::here();
        let derivation =
            expect_runtime(runtime, |rt| rt.new_derivation(name.clone(), DerivationKind::Reaction, defined_at));
        let reaction = Self {
            runtime,
            derivation,
            core: Rc::new(ReactionCore {
                name,
                on_invalidate: Rc::new(on_invalidate),
                error_handler: RefCell::new(None),
            }),
        };

        let hook_reaction = reaction.clone();
        expect_runtime(runtime, |rt| {
            rt.install_run_reaction_hook(derivation, Rc::new(move || hook_reaction.run_reaction()));
        });

        reaction
    }

    /// Convenience constructor equivalent to MobX's `autorun`: tracks `f`
    /// immediately, and re-tracks it synchronously every time it reruns.
    #[track_caller]
    pub fn autorun(runtime: RuntimeId, name: impl Into<String>, f: impl Fn() + 'static) -> Self {
        let f = Rc::new(f);
        let reaction = Self::new(runtime, name, {
            let f = Rc::clone(&f);
            move |r| {
                let f = Rc::clone(&f);
                r.track(move || f());
            }
        });
        reaction.track(move || f());
        reaction
    }

    /// Installs a per-reaction error handler, preferred over the global
    /// reaction error bus (§4.4 `reportExceptionInDerivation`).
    pub fn on_error(&self, handler: impl Fn(&CaughtError) + 'static) {
        *self.core.error_handler.borrow_mut() = Some(Rc::new(handler));
    }

    /// Pushes this reaction onto the pending queue if it isn't already
    /// there, then attempts to drain (§4.4 `schedule`).
    pub fn schedule(&self) {
        expect_runtime(self.runtime, |rt| rt.schedule_reaction(self.derivation));
    }

    /// Called by the runtime's drain pass. Resolves `POSSIBLY_STALE` via
    /// `shouldCompute`, and if the reaction turns out to really be stale,
    /// invokes `on_invalidate` (§4.4 `runReaction`).
    fn run_reaction(&self) {
        let phase = expect_runtime(self.runtime, |rt| rt.reaction_phase(self.derivation));
        if phase.is_disposed {
            return;
        }

        expect_runtime(self.runtime, |rt| rt.start_batch());

        let should_run = expect_runtime(self.runtime, |rt| rt.should_compute(self.derivation));
        if should_run {
            let mut phase = phase;
            phase.is_track_pending = true;
            expect_runtime(self.runtime, |rt| rt.set_reaction_phase(self.derivation, phase));

            let on_invalidate = Rc::clone(&self.core.on_invalidate);
            on_invalidate(self);

            let still_pending = expect_runtime(self.runtime, |rt| rt.reaction_phase(self.derivation)).is_track_pending;
            if still_pending {
                expect_runtime(self.runtime, |rt| {
                    if rt.spy.bus.is_enabled() {
                        rt.spy.bus.report(SpyEvent::ScheduledReaction {
                            name: self.core.name.clone(),
                        });
                    }
                });
            }
        }

        expect_runtime(self.runtime, |rt| rt.end_batch());
    }

    /// Runs `f` as this reaction's tracked body: begins a tracking pass,
    /// runs `f` catching any panic, binds the dependencies it read, and
    /// reports a caught panic to the error handler chain (§4.4 `track`).
    ///
    /// # Panics
    ///
    /// Panics (rather than silently nesting) if this reaction is already
    /// running — re-entrant `track` calls are a cycle (§7.1 `Cycle`).
    pub fn track(&self, f: impl FnOnce()) {
        let mut phase = expect_runtime(self.runtime, |rt| rt.reaction_phase(self.derivation));
        assert!(
            !phase.is_running,
            "Cycle detected: reaction {} is already being tracked",
            self.core.name
        );

        phase.is_running = true;
        phase.is_track_pending = false;
        expect_runtime(self.runtime, |rt| rt.set_reaction_phase(self.derivation, phase));

        expect_runtime(self.runtime, |rt| rt.start_batch());
        let prev = expect_runtime(self.runtime, |rt| rt.begin_tracking(self.derivation));
        let result = std::panic::catch_unwind(AssertUnwindSafe(f));
        expect_runtime(self.runtime, |rt| rt.end_tracking(self.derivation, prev));

        let mut phase = expect_runtime(self.runtime, |rt| rt.reaction_phase(self.derivation));
        phase.is_running = false;
        expect_runtime(self.runtime, |rt| rt.set_reaction_phase(self.derivation, phase));

        if phase.is_disposed {
            // `dispose()` was called while this pass was running and
            // deferred its teardown (§4.4 `dispose`); finish it now that
            // `track` is no longer mid-flight.
            expect_runtime(self.runtime, |rt| rt.dispose_reaction(self.derivation));
        }
        expect_runtime(self.runtime, |rt| rt.end_batch());

        match result {
            Ok(()) => {
                expect_runtime(self.runtime, |rt| {
                    if rt.spy.bus.is_enabled() {
                        rt.spy.bus.report(SpyEvent::Reaction {
                            name: self.core.name.clone(),
                        });
                    }
                });
            }
            Err(payload) => self.report_exception(CaughtError::from_panic(payload)),
        }
    }

    /// §4.4 `reportExceptionInDerivation`: prefer this reaction's own
    /// handler, otherwise fan out to the global reaction-error bus; emit a
    /// spy `error` event either way if the spy is enabled.
    fn report_exception(&self, error: CaughtError) {
        let handler = self.core.error_handler.borrow().clone();
        match handler {
            Some(handler) => handler(&error),
            None => expect_runtime(self.runtime, |rt| rt.spy.bus.dispatch_error(&error, &self.core.name)),
        }
        expect_runtime(self.runtime, |rt| {
            if rt.spy.bus.is_enabled() {
                rt.spy.bus.report(SpyEvent::Error {
                    name: self.core.name.clone(),
                    message: error.to_string(),
                });
            }
        });
    }

    /// Idempotent teardown: unsubscribes from every dependency and marks
    /// the reaction so it never runs again (§4.4, Testable Property 5).
    ///
    /// If this reaction is currently running (i.e. called from inside its
    /// own tracked closure), only the `is_disposed` flag is set here; the
    /// actual unsubscription is deferred to `track`'s own epilogue, which
    /// notices the flag once the in-flight pass finishes (§4.4 `dispose`:
    /// "if running, deferral is harmless because the next epilogue in
    /// `track` notices the flag"). Tearing down mid-run would otherwise let
    /// `track`'s epilogue re-fetch a defaulted, non-disposed phase and
    /// silently "undispose" the reaction.
    pub fn dispose(&self) {
        let mut phase = expect_runtime(self.runtime, |rt| rt.reaction_phase(self.derivation));
        if phase.is_disposed {
            return;
        }
        phase.is_disposed = true;
        let is_running = phase.is_running;
        expect_runtime(self.runtime, |rt| rt.set_reaction_phase(self.derivation, phase));
        if !is_running {
            expect_runtime(self.runtime, |rt| rt.dispose_reaction(self.derivation));
        }
    }

    pub fn is_disposed(&self) -> bool {
        expect_runtime(self.runtime, |rt| rt.reaction_phase(self.derivation)).is_disposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::create_runtime;

    // Testable Property 7 (§8): reading (tracking) a derivation while it is
    // already being tracked is a cycle, not silent reentrancy.
    #[test]
    #[should_panic(expected = "Cycle detected")]
    fn reentrant_track_panics_as_a_cycle() {
        let rt = create_runtime();
        let reaction = Reaction::new(rt, "r", |_| {});
        let inner = reaction.clone();
        reaction.track(move || {
            inner.track(|| {});
        });
    }

    // Regression test for the dispose-during-its-own-run case (§4.4
    // `dispose`: "if running, deferral is harmless because the next
    // epilogue in `track` notices the flag"). Disposing mid-run must not
    // let `track`'s epilogue re-create a non-disposed phase entry.
    #[test]
    fn disposing_from_within_its_own_tracked_closure_finishes_after_the_pass() {
        use crate::atom::ObservableValue;
        use std::cell::Cell;

        let rt = create_runtime();
        let a = ObservableValue::new(rt, "a", 1);
        let runs = Rc::new(Cell::new(0usize));

        let reaction = Reaction::new(rt, "r", |_| {});
        let inner = reaction.clone();
        let a_for_closure = a.clone();
        let runs_for_closure = Rc::clone(&runs);
        reaction.track(move || {
            a_for_closure.get();
            runs_for_closure.set(runs_for_closure.get() + 1);
            inner.dispose();
        });

        assert!(
            reaction.is_disposed(),
            "dispose() called mid-run must still report disposed once track() returns"
        );

        crate::batch::batch(rt, || a.set(2));
        assert_eq!(
            runs.get(),
            1,
            "a reaction disposed from within its own tracked closure must never run again"
        );
    }

    #[test]
    fn autorun_runs_immediately_and_reruns_on_dependency_change() {
        use crate::atom::ObservableValue;
        use std::cell::RefCell;
        use std::rc::Rc;

        let rt = create_runtime();
        let a = ObservableValue::new(rt, "a", 1);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let _r = {
            let a = a.clone();
            let seen = Rc::clone(&seen);
            Reaction::autorun(rt, "r", move || seen.borrow_mut().push(a.get()))
        };
        assert_eq!(*seen.borrow(), vec![1]);

        crate::batch::batch(rt, || a.set(2));
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }
}
