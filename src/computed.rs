//! Derived, memoized values (§3 DATA MODEL "ComputedValue", §4.3).
//!
//! A `ComputedValue<T>` is simultaneously an atom (so other derivations can
//! depend on it) and a derivation (so it can depend on other atoms). The
//! teacher flattens signals/memos/effects into one `ReactiveNode` enum; this
//! crate keeps the two halves as separate arena entries cross-linked by id
//! (SPEC_FULL.md §3.1), which is what lets `ObservableValue<T>` stay fully
//! generic instead of behind `dyn Any`.

use std::{cell::Cell, cell::RefCell, fmt, panic::AssertUnwindSafe, rc::Rc};

use crate::{
    enhancer::{Enhancer, ReferenceEnhancer},
    error::CaughtError,
    node::{AtomId, DerivationId},
    runtime::{expect_runtime, with_runtime, DerivationKind, RuntimeId},
};

type ComputeFn<T> = Rc<dyn Fn() -> T>;
type SetterFn<T> = Rc<dyn Fn(T)>;

struct ComputedCore<T> {
    value: RefCell<Option<Result<T, Rc<CaughtError>>>>,
    compute: ComputeFn<T>,
    setter: Option<SetterFn<T>>,
    /// Guards against a computed reading itself while its own `compute`
    /// closure is still running (§3 ComputedValue invariant, §4.3 "Re-entry
    /// into the same computed fails with `Cycle detected`").
    is_computing: Cell<bool>,
}

/// A lazily-evaluated, memoized derivation (§4.3).
///
/// Cloning a `ComputedValue` clones the handle, not the computation: all
/// clones share one cached value and one place in the graph.
pub struct ComputedValue<T> {
    runtime: RuntimeId,
    atom: AtomId,
    derivation: DerivationId,
    core: Rc<ComputedCore<T>>,
    recompute: Rc<dyn Fn() -> bool>,
    requires_reaction: bool,
    /// Mirrors `DerivationKind::Computed`'s `keep_alive` flag (§4.3
    /// `keepAlive`): forces `ensure_up_to_date` to always take the tracked
    /// path, so the computed subscribes to its own dependencies and stays
    /// `UP_TO_DATE` even while nothing else observes it.
    keep_alive: bool,
}

impl<T> Clone for ComputedValue<T> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime,
            atom: self.atom,
            derivation: self.derivation,
            core: Rc::clone(&self.core),
            recompute: Rc::clone(&self.recompute),
            requires_reaction: self.requires_reaction,
            keep_alive: self.keep_alive,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ComputedValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedValue")
            .field(
                "name",
                &expect_runtime(self.runtime, |rt| rt.atom_name(self.atom)),
            )
            .finish()
    }
}

/// Builder-style options for [`ComputedValue::new_with_options`] (§4.3,
/// §6 "requiresReaction", "keepAlive").
pub struct ComputedOptions<T, E> {
    pub enhancer: E,
    /// If `true`, a transient (unobserved, untracked) read panics instead
    /// of silently recomputing — mirrors `requiresReaction` guarding
    /// against reading a computed outside any reactive context (§4.3,
    /// §7.3).
    pub requires_reaction: bool,
    /// If `true`, the computed eagerly stays up to date once it has ever
    /// been read, even after its last observer unsubscribes (§4.3
    /// `keepAlive`).
    pub keep_alive: bool,
    pub setter: Option<Rc<dyn Fn(T)>>,
}

impl<T> Default for ComputedOptions<T, ReferenceEnhancer> {
    fn default() -> Self {
        Self {
            enhancer: ReferenceEnhancer,
            requires_reaction: false,
            keep_alive: false,
            setter: None,
        }
    }
}

impl<T: 'static + PartialEq> ComputedValue<T> {
    #[track_caller]
    pub fn new(runtime: RuntimeId, name: impl Into<String>, compute: impl Fn() -> T + 'static) -> Self {
        Self::new_with_options(runtime, name, compute, ComputedOptions::default())
    }

    #[track_caller]
    pub fn new_with_options<E: Enhancer<T> + 'static>(
        runtime: RuntimeId,
        name: impl Into<String>,
        compute: impl Fn() -> T + 'static,
        options: ComputedOptions<T, E>,
    ) -> Self {
        let name = name.into();
        let defined_at = crate::diagnostics::here();
        let atom = expect_runtime(runtime, |rt| rt.new_atom(name.clone(), defined_at));

        let core = Rc::new(ComputedCore {
            value: RefCell::new(None),
            compute: Rc::new(compute),
            setter: options.setter,
            is_computing: Cell::new(false),
        });
        let enhancer = Rc::new(options.enhancer);
        let requires_reaction = options.requires_reaction;
        let keep_alive = options.keep_alive;

        // `recompute` needs its own derivation id, but that id doesn't
        // exist until after `recompute` (as a `DerivationKind::Computed`
        // payload) has been handed to `new_derivation`. Close over a cell
        // filled in right after the id is minted instead of threading the
        // id through a second constructor argument.
        let derivation_slot: Rc<Cell<Option<DerivationId>>> = Rc::new(Cell::new(None));

        let recompute: Rc<dyn Fn() -> bool> = {
            let core = Rc::clone(&core);
            let enhancer = Rc::clone(&enhancer);
            let derivation_slot = Rc::clone(&derivation_slot);
            Rc::new(move || {
                let derivation = derivation_slot
                    .get()
                    .expect("recompute invoked before derivation id was installed");
                recompute_core(runtime, atom, derivation, &core, enhancer.as_ref())
            })
        };

        let derivation = expect_runtime(runtime, |rt| {
            rt.new_derivation(
                name,
                DerivationKind::Computed {
                    atom,
                    recompute: Rc::clone(&recompute),
                    keep_alive: options.keep_alive,
                },
                defined_at,
            )
        });
        derivation_slot.set(Some(derivation));
        expect_runtime(runtime, |rt| rt.register_computed_owner(atom, derivation));

        let computed = Self {
            runtime,
            atom,
            derivation,
            core,
            recompute,
            requires_reaction,
            keep_alive,
        };

        // §4.3 `keepAlive`: self-observe immediately rather than waiting for
        // a first `.get()` from inside some other tracking pass — otherwise
        // a `keep_alive` computed that is only ever read from top-level code
        // would never run `bind_dependencies` and so could never be found
        // by `on_derivation_marked`'s eager-refresh path.
        if keep_alive {
            (computed.recompute)();
        }

        computed
    }

    pub(crate) fn atom_id(&self) -> AtomId {
        self.atom
    }

    /// Reads the memoized value, recomputing first if stale (§4.3
    /// `computedValue.get()`).
    ///
    /// # Panics
    ///
    /// Re-panics with the cached message if the last recompute's user
    /// function panicked and dependencies haven't changed since (§9 "Error
    /// caching on computeds").
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.ensure_up_to_date();
        expect_runtime(self.runtime, |rt| rt.report_observed(self.atom));
        self.cached_or_panic()
    }

    /// Reads the memoized value without subscribing the current
    /// derivation (§4.1 untracked reads).
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.ensure_up_to_date();
        self.cached_or_panic()
    }

    fn cached_or_panic(&self) -> T
    where
        T: Clone,
    {
        match &*self.core.value.borrow() {
            Some(Ok(v)) => v.clone(),
            Some(Err(e)) => panic!("{e}"),
            None => unreachable!("ensure_up_to_date always leaves a cached result"),
        }
    }

    /// Like [`Self::get`], but runs `f` against a borrow of the cached
    /// value instead of requiring `T: Clone` — used by
    /// [`crate::administration::ObservableObject`], whose type-erased slots
    /// can't generically clone their `Any` payload.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.ensure_up_to_date();
        expect_runtime(self.runtime, |rt| rt.report_observed(self.atom));
        match &*self.core.value.borrow() {
            Some(Ok(v)) => f(v),
            Some(Err(e)) => panic!("{e}"),
            None => unreachable!("ensure_up_to_date always leaves a cached result"),
        }
    }

    /// Calls the setter installed via `ComputedOptions::setter`, if any
    /// (§4.3 "computed with setter").
    ///
    /// # Panics
    ///
    /// Panics if this computed has no setter.
    pub fn set(&self, value: T) {
        self.check_alive();
        match &self.core.setter {
            Some(setter) => setter(value),
            None => panic!("this ComputedValue has no setter"),
        }
    }

    /// Panics with `IllegalAccess` if this handle's underlying derivation
    /// has already been individually disposed via [`Self::dispose`] — the
    /// same stale-handle guard [`crate::atom::ObservableValue`] applies
    /// (§7.2).
    fn check_alive(&self) {
        let alive = expect_runtime(self.runtime, |rt| rt.derivation_exists(self.derivation));
        if !alive {
            panic!(
                "{}",
                crate::error::ReactiveError::IllegalAccess(format!("computed {:?}", self.derivation))
            );
        }
    }

    fn ensure_up_to_date(&self) {
        self.check_alive();
        let is_tracking = expect_runtime(self.runtime, |rt| rt.is_tracking());
        let has_observers = expect_runtime(self.runtime, |rt| rt.is_observed(self.atom));
        let already_cached = self.core.value.borrow().is_some();

        if !is_tracking && !has_observers && !self.keep_alive {
            assert!(
                !self.requires_reaction,
                "computed {:?} was read outside any reactive context, but requires_reaction is set",
                expect_runtime(self.runtime, |rt| rt.atom_name(self.atom))
            );
            // Transient read: nothing will ever subscribe to us, so skip
            // tracking/caching entirely and just run the function once
            // (§4.3 "compute transiently without caching dependencies").
            assert!(
                !self.core.is_computing.get(),
                "Cycle detected: {} is already being computed",
                expect_runtime(self.runtime, |rt| rt.atom_name(self.atom))
            );
            self.core.is_computing.set(true);
            let result = run_catching(&self.core.compute);
            self.core.is_computing.set(false);
            *self.core.value.borrow_mut() = Some(result);
            return;
        }

        let should = expect_runtime(self.runtime, |rt| rt.should_compute(self.derivation));
        if should || !already_cached {
            (self.recompute)();
        }
    }

    /// Disposes this computed's registration in the graph (both the atom
    /// and derivation halves).
    pub fn dispose(&self) {
        expect_runtime(self.runtime, |rt| {
            rt.dispose_derivation(self.derivation);
            rt.dispose_atom(self.atom);
        });
    }
}

fn run_catching<T>(f: &Rc<dyn Fn() -> T>) -> Result<T, Rc<CaughtError>> {
    let f = Rc::clone(f);
    std::panic::catch_unwind(AssertUnwindSafe(move || f()))
        .map_err(|payload| Rc::new(CaughtError::from_panic(payload)))
}

/// Runs the user function inside a tracked derivation pass, applies the
/// enhancer against the previous cached value, and reports the change to
/// the graph if the (enhanced) result differs under `PartialEq`. Shared by
/// the eager `keep_alive` path (invoked through the type-erased `recompute`
/// hook stored in the runtime) and the normal lazy `get()` path — both
/// reach it through the same `Rc<dyn Fn() -> bool>` closure. Returns
/// whether the cached value changed.
fn recompute_core<T: PartialEq, E: Enhancer<T>>(
    runtime: RuntimeId,
    atom: AtomId,
    derivation: DerivationId,
    core: &ComputedCore<T>,
    enhancer: &E,
) -> bool {
    assert!(
        !core.is_computing.get(),
        "Cycle detected: {} is already being computed",
        expect_runtime(runtime, |rt| rt.atom_name(atom))
    );
    core.is_computing.set(true);
    let prev = expect_runtime(runtime, |rt| rt.begin_tracking(derivation));
    let result = run_catching(&core.compute);
    expect_runtime(runtime, |rt| rt.end_tracking(derivation, prev));
    core.is_computing.set(false);

    let enhanced_result = match result {
        Ok(new_value) => {
            let enhanced = {
                let old_slot = core.value.borrow();
                let old = match old_slot.as_ref() {
                    Some(Ok(v)) => Some(v),
                    _ => None,
                };
                enhancer.enhance(new_value, old)
            };
            Ok(enhanced)
        }
        Err(e) => Err(e),
    };

    let mut slot = core.value.borrow_mut();
    let changed = match (&*slot, &enhanced_result) {
        (Some(Ok(old)), Ok(new)) => old != new,
        _ => true,
    };
    *slot = Some(enhanced_result);
    drop(slot);

    if changed {
        let _ = with_runtime(runtime, |rt| {
            rt.start_batch();
            rt.report_changed(atom);
            rt.end_batch();
        });
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{atom::ObservableValue, reaction::Reaction, runtime::create_runtime};

    // Testable Property 7 (§8), ComputedValue half: a computed that reads
    // itself while computing is a cycle, whether or not it is observed.
    #[test]
    #[should_panic(expected = "Cycle detected")]
    fn reading_self_while_computing_is_a_cycle() {
        let rt = create_runtime();
        let c: Rc<RefCell<Option<ComputedValue<i32>>>> = Rc::new(RefCell::new(None));
        let c_for_closure = Rc::clone(&c);
        let computed = ComputedValue::new(rt, "c", move || {
            c_for_closure.borrow().as_ref().unwrap().get() + 1
        });
        *c.borrow_mut() = Some(computed.clone());
        computed.get();
    }

    // Scenario S3 (§8 "glitch-free"): a reaction observing a computed whose
    // output doesn't change across a dependency write never reruns.
    #[test]
    fn glitch_free_recompute_skips_unchanged_downstream() {
        let rt = create_runtime();
        let x_atom = ObservableValue::new(rt, "x", 1);
        let y = {
            let x_atom = x_atom.clone();
            ComputedValue::new(rt, "y", move || x_atom.get() > 0)
        };

        let log = Rc::new(RefCell::new(Vec::new()));
        let _r = {
            let y = y.clone();
            let log = Rc::clone(&log);
            Reaction::autorun(rt, "r", move || log.borrow_mut().push(y.get()))
        };
        assert_eq!(*log.borrow(), vec![true]);

        crate::batch::batch(rt, || x_atom.set(2));
        assert_eq!(*log.borrow(), vec![true], "y's output didn't change, so r must not rerun");

        crate::batch::batch(rt, || x_atom.set(-1));
        assert_eq!(*log.borrow(), vec![true, false]);
    }

    // A computed with no observer and no tracking derivation around it
    // still recomputes correctly on each read (the "transient" path).
    #[test]
    fn unobserved_computed_recomputes_on_every_read() {
        let rt = create_runtime();
        let a = ObservableValue::new(rt, "a", 1);
        let c = {
            let a = a.clone();
            ComputedValue::new(rt, "c", move || a.get() * 2)
        };
        assert_eq!(c.get(), 2);
        a.set(5);
        assert_eq!(c.get(), 10);
    }

    // §4.3 `keepAlive`: a computed built with `keep_alive: true` stays
    // up to date purely by self-observing, even though nothing ever reads
    // it through a reaction or another computed.
    #[test]
    fn keep_alive_computed_self_observes_with_zero_external_readers() {
        let rt = create_runtime();
        let a = ObservableValue::new(rt, "a", 1);
        let runs = Rc::new(Cell::new(0usize));
        let c = {
            let a = a.clone();
            let runs = Rc::clone(&runs);
            let mut options = ComputedOptions::default();
            options.keep_alive = true;
            ComputedValue::new_with_options(
                rt,
                "c",
                move || {
                    runs.set(runs.get() + 1);
                    a.get() * 2
                },
                options,
            )
        };
        // Construction alone self-observes; no `.get()` has happened yet.
        assert_eq!(runs.get(), 1);

        crate::batch::batch(rt, || a.set(5));
        assert_eq!(
            runs.get(),
            2,
            "a keep_alive computed must refresh itself on a dependency write even with zero observers"
        );
        assert_eq!(c.get_untracked(), 10);

        // Reading the already-fresh cache must not trigger another recompute.
        assert_eq!(c.get(), 10);
        assert_eq!(runs.get(), 2);
    }
}
