//! Leaf observables (§3 DATA MODEL "Atom", "ObservableValue").
//!
//! Grounded on the teacher's `Signal`/`Trigger` handle style in
//! `signal.rs`/`trigger.rs`: a small `Copy` handle (`runtime` + id) that
//! looks up its actual storage through `with_runtime` on every access, so
//! the handle itself can be freely cloned and stored without borrowing
//! anything.

use std::{cell::RefCell, fmt, rc::Rc};

use crate::{
    enhancer::{Enhancer, ReferenceEnhancer},
    node::AtomId,
    runtime::{expect_runtime, with_runtime, RuntimeId},
    spy::SpyEvent,
};

struct AtomCell<T> {
    value: RefCell<T>,
}

/// A leaf observable holding a value of type `T` (§3 "ObservableValue").
///
/// Reading `.get()` inside a tracked derivation subscribes that derivation;
/// `.set()` reports the change to every subscriber (batched if called
/// inside `start_batch`/`end_batch`, otherwise as an implicit single-value
/// batch per §4.5).
pub struct ObservableValue<T> {
    runtime: RuntimeId,
    id: AtomId,
    cell: Rc<AtomCell<T>>,
}

impl<T> Clone for ObservableValue<T> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime,
            id: self.id,
            cell: Rc::clone(&self.cell),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ObservableValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("ObservableValue");
        out.field("name", &expect_runtime(self.runtime, |rt| rt.atom_name(self.id)))
            .field("value", &self.cell.value.borrow());
        #[cfg(debug_assertions)]
        out.field(
            "defined_at",
            &expect_runtime(self.runtime, |rt| rt.atom_defined_at(self.id)),
        );
        out.finish()
    }
}

impl<T: 'static> ObservableValue<T> {
    /// Creates a new observable in `runtime` with the reference enhancer
    /// (§6 "Enhancer contract").
    #[track_caller]
    pub fn new(runtime: RuntimeId, name: impl Into<String>, value: T) -> Self {
        Self::new_with_enhancer(runtime, name, value, ReferenceEnhancer)
    }

    /// Creates a new observable whose stored value is always first passed
    /// through `enhancer` (§6 `asReference`/`asStructure`/custom enhancers).
    #[track_caller]
    pub fn new_with_enhancer(
        runtime: RuntimeId,
        name: impl Into<String>,
        value: T,
        enhancer: impl Enhancer<T>,
    ) -> Self {
        let name = name.into();
        let value = enhancer.enhance(value, None);
        let defined_at = crate::diagnostics::here();
        let id = expect_runtime(runtime, |rt| rt.new_atom(name, defined_at));
        Self {
            runtime,
            id,
            cell: Rc::new(AtomCell {
                value: RefCell::new(value),
            }),
        }
    }

    pub(crate) fn id(&self) -> AtomId {
        self.id
    }

    pub(crate) fn runtime(&self) -> RuntimeId {
        self.runtime
    }

    /// Reads the current value, subscribing the currently tracked
    /// derivation if there is one (§4.1 `reportObserved`).
    ///
    /// `T` must be `Clone` since the borrow inside the cell cannot outlive
    /// this call; this matches the teacher's `Signal::get` cloning
    /// contract in `signal.rs`.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.track();
        self.cell.value.borrow().clone()
    }

    /// Reads the current value without tracking it as a dependency (§4.1
    /// `untracked` reads, a.k.a. `peek`).
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.check_alive();
        self.cell.value.borrow().clone()
    }

    /// Runs `f` with a borrow of the current value, tracking the read.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.cell.value.borrow())
    }

    /// Subscribes the currently tracked derivation to this atom without
    /// reading its value (used by `Trigger`-style signals and by
    /// `ComputedValue` to forward tracking to its own atom half).
    pub fn track(&self) {
        self.check_alive();
        expect_runtime(self.runtime, |rt| {
            rt.report_observed(self.id);
        });
    }

    /// Panics with `IllegalAccess` if this handle's underlying atom has
    /// already been individually disposed via [`Self::dispose`] — a stale
    /// handle reaching for a node that is no longer there, the Rust
    /// analogue of the spec's prototype-chain read/write guard (§7.2).
    fn check_alive(&self) {
        let alive = expect_runtime(self.runtime, |rt| rt.atom_exists(self.id));
        if !alive {
            panic!(
                "{}",
                crate::error::ReactiveError::IllegalAccess(format!("atom {:?}", self.id))
            );
        }
    }

    /// Whether this atom is currently observed by at least one derivation.
    pub fn is_observed(&self) -> bool {
        expect_runtime(self.runtime, |rt| rt.is_observed(self.id))
    }

    /// Replaces the stored value and notifies observers if `new_value`
    /// differs from the old one under `PartialEq` (§4.1 `setNewValue`,
    /// §6 "Equality comparator").
    pub fn set(&self, new_value: T)
    where
        T: PartialEq,
    {
        self.set_with_enhancer(new_value, ReferenceEnhancer);
    }

    /// Like [`Self::set`], but first passes the incoming value through
    /// `enhancer` together with the previous value.
    pub fn set_with_enhancer(&self, new_value: T, enhancer: impl Enhancer<T>)
    where
        T: PartialEq,
    {
        self.check_alive();
        let changed = {
            let mut current = self.cell.value.borrow_mut();
            let enhanced = enhancer.enhance(new_value, Some(&current));
            if enhanced == *current {
                false
            } else {
                *current = enhanced;
                true
            }
        };
        if changed {
            self.notify_change();
        }
    }

    /// Replaces the stored value unconditionally (skips the equality
    /// check), for values that aren't `PartialEq` or when the caller has
    /// already determined the value changed.
    pub fn set_unchecked(&self, new_value: T) {
        self.check_alive();
        *self.cell.value.borrow_mut() = new_value;
        self.notify_change();
    }

    /// Mutates the value in place via `f`, always notifying observers —
    /// useful for types where structural equality is too expensive to
    /// check on every write.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.check_alive();
        f(&mut self.cell.value.borrow_mut());
        self.notify_change();
    }

    fn notify_change(&self) {
        let runtime = self.runtime;
        let id = self.id;
        let _ = with_runtime(runtime, |rt| {
            rt.start_batch();
            rt.report_changed(id);
            if rt.spy.bus.is_enabled() {
                rt.spy.bus.report(SpyEvent::Update {
                    name: rt.atom_name(id),
                    old_value: String::new(),
                    new_value: String::new(),
                });
            }
            rt.end_batch();
        });
    }

    /// Disposes this atom's registration in the graph. Further use of any
    /// remaining clone of this handle will panic.
    pub fn dispose(&self) {
        expect_runtime(self.runtime, |rt| rt.dispose_atom(self.id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::create_runtime;

    // §7.2 `IllegalAccess`: a clone of a disposed handle is a stale handle,
    // not a live one, even though nothing about the clone itself changed.
    #[test]
    #[should_panic(expected = "Illegal access")]
    fn reading_a_clone_of_a_disposed_atom_panics() {
        let rt = create_runtime();
        let a = ObservableValue::new(rt, "a", 1);
        let clone = a.clone();
        a.dispose();
        clone.get_untracked();
    }

    #[test]
    fn disposing_an_already_disposed_atom_is_a_safe_no_op() {
        let rt = create_runtime();
        let a = ObservableValue::new(rt, "a", 1);
        a.dispose();
        a.dispose();
    }
}
