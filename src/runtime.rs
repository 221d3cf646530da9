#![forbid(unsafe_code)]
//! The `Runtime`: owns the two node arenas and the bipartite edge tables
//! that make up the dependency graph, plus the `GlobalState` batching and
//! scheduling fields (§2 SYSTEM OVERVIEW, §3.1 "Rust representation").
//!
//! Grounded on the teacher's `Runtime`/`RuntimeId`/`with_runtime` triad in
//! `runtime.rs`: a thread-local registry of arenas keyed by a `slotmap`
//! `RuntimeId`, looked up through a `with_runtime(id, |rt| ...)` helper so
//! that call sites never hold a long-lived borrow across a reentrant graph
//! operation.

use std::{
    cell::{Cell, RefCell},
    fmt,
    hash::BuildHasherDefault,
    rc::Rc,
};

use rustc_hash::{FxHashMap, FxHashSet, FxHasher};
use slotmap::{SecondaryMap, SlotMap};

use crate::{
    diagnostics::DefinedAt,
    error::ReactiveError,
    node::{AtomId, DerivationId, DerivationState, ReactionPhase},
    spy::Spy,
};

pub(crate) type FxIndexSet<T> = indexmap::IndexSet<T, BuildHasherDefault<FxHasher>>;

/// Reactions that don't converge after this many drain iterations are
/// dropped with a divergence error rather than looping forever (§4.5, §7.7).
pub const MAX_REACTION_ITERATIONS: usize = 100;

slotmap::new_key_type! {
    /// Identifies one `Runtime` among the thread-local registry.
    pub struct RuntimeId;
}

thread_local! {
    static RUNTIMES: RefCell<SlotMap<RuntimeId, Runtime>> = RefCell::new(SlotMap::with_key());
}

pub(crate) struct AtomNode {
    pub name: String,
    /// Caller location of the `ObservableValue::new`/`new_with_enhancer`
    /// call that created this atom, carried only in debug builds (§2.1
    /// "the debug-only 'defined at' caller-location tracking on graph
    /// nodes"), matching the teacher's pervasive `defined_at` diagnostic
    /// field.
    pub defined_at: DefinedAt,
}

pub(crate) enum DerivationKind {
    /// A derivation that is also an observable. `atom` is the id of its
    /// own atom half; `recompute` is a type-erased "ensure up to date and
    /// report whether the cached value changed" hook (the generic
    /// equivalent of the teacher's `AnyComputation::run`), so the untyped
    /// graph can force a recompute without knowing the computed's `T`.
    Computed {
        atom: AtomId,
        recompute: Rc<dyn Fn() -> bool>,
        keep_alive: bool,
    },
    Reaction,
}

pub(crate) struct DerivationNode {
    pub name: String,
    pub state: DerivationState,
    pub kind: DerivationKind,
    /// Caller location of the `ComputedValue::new*`/`Reaction::new` call
    /// that created this derivation, carried only in debug builds (§2.1).
    pub defined_at: DefinedAt,
}

pub(crate) struct Runtime {
    atoms: RefCell<SlotMap<AtomId, AtomNode>>,
    derivations: RefCell<SlotMap<DerivationId, DerivationNode>>,

    /// atom -> derivations that currently observe it.
    observers: RefCell<SecondaryMap<AtomId, RefCell<FxIndexSet<DerivationId>>>>,
    /// derivation -> atoms it currently observes (committed from the last
    /// completed tracking pass).
    observing: RefCell<SecondaryMap<DerivationId, RefCell<Vec<AtomId>>>>,
    /// derivation -> atoms read so far during the tracking pass in
    /// progress. May contain duplicates; deduped by `bind_dependencies`.
    new_observing: RefCell<SecondaryMap<DerivationId, RefCell<Vec<AtomId>>>>,
    /// atom -> the computed derivation whose atom half this is, if any.
    computed_owner: RefCell<SecondaryMap<AtomId, DerivationId>>,

    /// Transient dedup marker reused across `bind_dependencies` calls.
    diff_scratch: RefCell<FxHashSet<AtomId>>,

    tracking_derivation: Cell<Option<DerivationId>>,
    run_id: Cell<u64>,

    in_batch: Cell<u32>,
    pending_reactions: RefCell<Vec<DerivationId>>,
    is_running_reactions: Cell<bool>,
    reaction_phase: RefCell<SecondaryMap<DerivationId, ReactionPhase>>,
    /// The user-pluggable drain wrapper (§4.5 `setReactionScheduler`). Takes
    /// the "actually drain the queue" thunk and decides when to call it —
    /// e.g. deferring it to a animation-frame callback.
    #[allow(clippy::type_complexity)]
    scheduler: RefCell<Rc<dyn Fn(&dyn Fn())>>,
    /// `Reaction::new` installs a "run this reaction" hook here so the
    /// generic drain loop can invoke it by id alone (§4.4, §4.5).
    run_reaction_hooks: RefCell<FxHashMap<DerivationId, Rc<dyn Fn()>>>,

    pub(crate) spy: Spy,
}

fn default_scheduler() -> Rc<dyn Fn(&dyn Fn())> {
    Rc::new(|f: &dyn Fn()| f())
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            atoms: RefCell::new(SlotMap::with_key()),
            derivations: RefCell::new(SlotMap::with_key()),
            observers: RefCell::new(SecondaryMap::new()),
            observing: RefCell::new(SecondaryMap::new()),
            new_observing: RefCell::new(SecondaryMap::new()),
            computed_owner: RefCell::new(SecondaryMap::new()),
            diff_scratch: RefCell::new(FxHashSet::default()),
            tracking_derivation: Cell::new(None),
            run_id: Cell::new(0),
            in_batch: Cell::new(0),
            pending_reactions: RefCell::new(Vec::new()),
            is_running_reactions: Cell::new(false),
            reaction_phase: RefCell::new(SecondaryMap::new()),
            scheduler: RefCell::new(default_scheduler()),
            run_reaction_hooks: RefCell::new(FxHashMap::default()),
            spy: Spy::default(),
        }
    }
}

impl Runtime {
    fn new() -> Self {
        Self::default()
    }
}

/// Creates a fresh, isolated [`Runtime`] and returns a handle to it.
///
/// Per SPEC_FULL.md's "Open Question resolutions", this crate always
/// supports multiple named runtimes rather than assuming a single global
/// one — strictly more general than a bare global, and no more expensive in
/// the common single-runtime case.
pub fn create_runtime() -> RuntimeId {
    RUNTIMES.with(|runtimes| runtimes.borrow_mut().insert(Runtime::new()))
}

impl RuntimeId {
    /// Tears down this runtime, dropping every atom and derivation it owns.
    pub fn dispose(self) {
        RUNTIMES.with(|runtimes| runtimes.borrow_mut().remove(self));
    }

    /// Returns this runtime's spy bus handle, used to subscribe to
    /// introspection events and register global reaction-error handlers
    /// (§6 EXTERNAL INTERFACES "Spy bus", "Error bus").
    pub fn spy(self) -> Spy {
        expect_runtime(self, |rt| rt.spy.clone())
    }
}

pub(crate) fn with_runtime<T>(id: RuntimeId, f: impl FnOnce(&Runtime) -> T) -> Result<T, ()> {
    RUNTIMES.with(|runtimes| {
        let runtimes = runtimes.borrow();
        match runtimes.get(id) {
            None => Err(()),
            Some(runtime) => Ok(f(runtime)),
        }
    })
}

#[track_caller]
pub(crate) fn expect_runtime<T>(id: RuntimeId, f: impl FnOnce(&Runtime) -> T) -> T {
    with_runtime(id, f).expect(
        "tried to use a reactive handle whose runtime has already been disposed",
    )
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("in_batch", &self.in_batch.get())
            .field("is_running_reactions", &self.is_running_reactions.get())
            .finish()
    }
}

// ---------------------------------------------------------------------
// Atom registration and leaf read/write protocol (§4.1)
// ---------------------------------------------------------------------

impl Runtime {
    /// `defined_at` is threaded in explicitly (rather than relying on
    /// `#[track_caller]` propagation) because the public constructors that
    /// call this go through an intermediate `with_runtime` closure, across
    /// which caller-location propagation does not reach.
    pub(crate) fn new_atom(&self, name: impl Into<String>, defined_at: DefinedAt) -> AtomId {
        self.atoms.borrow_mut().insert(AtomNode {
            name: name.into(),
            defined_at,
        })
    }

    pub(crate) fn atom_name(&self, atom: AtomId) -> String {
        self.atoms
            .borrow()
            .get(atom)
            .map(|a| a.name.clone())
            .unwrap_or_else(|| "<disposed atom>".into())
    }

    /// Whether `atom` is still registered in this runtime's arena. A handle
    /// that outlives its own `dispose()` call (individually, not via whole-
    /// runtime teardown) fails this — the Rust analogue of the spec's
    /// prototype-chain read/write guard (§7.2 `IllegalAccess`).
    pub(crate) fn atom_exists(&self, atom: AtomId) -> bool {
        self.atoms.borrow().contains_key(atom)
    }

    /// The source location that created `atom`, for diagnostics (§2.1).
    pub(crate) fn atom_defined_at(&self, atom: AtomId) -> Option<DefinedAt> {
        self.atoms.borrow().get(atom).map(|a| a.defined_at)
    }

    /// Call at the start of every read (§4.1 `reportObserved`). Returns
    /// whether the atom is currently being observed by *some* derivation
    /// (not only the one tracking right now, if any).
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    pub(crate) fn report_observed(&self, atom: AtomId) -> bool {
        if let Some(d) = self.tracking_derivation.get() {
            let mut new_observing = self.new_observing.borrow_mut();
            new_observing
                .entry(d)
                .expect("tracking derivation must be alive")
                .or_default()
                .borrow_mut()
                .push(atom);
        }
        self.observers
            .borrow()
            .get(atom)
            .map(|o| !o.borrow().is_empty())
            .unwrap_or(false)
    }

    /// Call whenever an atom's stored value actually changed (§4.1
    /// `reportChanged`). Must run inside a batch.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    pub(crate) fn report_changed(&self, atom: AtomId) {
        debug_assert!(
            self.in_batch.get() > 0,
            "reportChanged must run inside startBatch/endBatch"
        );

        let observer_ids: Vec<DerivationId> = self
            .observers
            .borrow()
            .get(atom)
            .map(|o| o.borrow().iter().copied().collect())
            .unwrap_or_default();

        for d in observer_ids {
            let was_up_to_date = matches!(
                self.derivations.borrow().get(d).map(|n| n.state),
                Some(DerivationState::UpToDate)
            );
            if !was_up_to_date {
                continue;
            }
            self.set_derivation_state(d, DerivationState::Stale);
            self.on_derivation_marked(d);
        }
    }

    /// Recursive helper: a computed just moved to `Stale`/`PossiblyStale`;
    /// its own observers only need to move to `PossiblyStale`, since they
    /// must re-check (not necessarily recompute) (§4.1, §4.2).
    fn propagate_possibly_stale(&self, atom: AtomId) {
        let observer_ids: Vec<DerivationId> = self
            .observers
            .borrow()
            .get(atom)
            .map(|o| o.borrow().iter().copied().collect())
            .unwrap_or_default();

        for d in observer_ids {
            let was_up_to_date = matches!(
                self.derivations.borrow().get(d).map(|n| n.state),
                Some(DerivationState::UpToDate)
            );
            if !was_up_to_date {
                continue;
            }
            self.set_derivation_state(d, DerivationState::PossiblyStale);
            self.on_derivation_marked(d);
        }
    }

    fn set_derivation_state(&self, d: DerivationId, state: DerivationState) {
        if let Some(node) = self.derivations.borrow_mut().get_mut(d) {
            node.state = state;
        }
    }

    /// Dispatches on what kind of derivation just got marked stale:
    /// reactions get scheduled; computeds propagate onward to their own
    /// observers (and, if `keep_alive`, eagerly refresh themselves so they
    /// stay `UpToDate` without ever being read).
    fn on_derivation_marked(&self, d: DerivationId) {
        let kind_info = self.derivations.borrow().get(d).map(|n| match &n.kind {
            DerivationKind::Reaction => None,
            DerivationKind::Computed {
                atom,
                recompute,
                keep_alive,
            } => Some((*atom, Rc::clone(recompute), *keep_alive)),
        });

        match kind_info {
            Some(None) => self.schedule_reaction(d),
            Some(Some((atom, recompute, keep_alive))) => {
                if keep_alive {
                    recompute();
                }
                self.propagate_possibly_stale(atom);
            }
            None => {}
        }
    }
}

// ---------------------------------------------------------------------
// Derivation core: tracking, binding, staleness resolution (§4.2)
// ---------------------------------------------------------------------

impl Runtime {
    /// See the note on `new_atom` about why `defined_at` is an explicit
    /// parameter rather than a `#[track_caller]` capture.
    pub(crate) fn new_derivation(
        &self,
        name: impl Into<String>,
        kind: DerivationKind,
        defined_at: DefinedAt,
    ) -> DerivationId {
        self.derivations.borrow_mut().insert(DerivationNode {
            name: name.into(),
            state: DerivationState::NotTracking,
            kind,
            defined_at,
        })
    }

    /// The source location that created `d`, for diagnostics (§2.1).
    pub(crate) fn derivation_defined_at(&self, d: DerivationId) -> Option<DefinedAt> {
        self.derivations.borrow().get(d).map(|n| n.defined_at)
    }

    pub(crate) fn derivation_name(&self, d: DerivationId) -> String {
        self.derivations
            .borrow()
            .get(d)
            .map(|n| n.name.clone())
            .unwrap_or_else(|| "<disposed derivation>".into())
    }

    /// Whether `d` is still registered in this runtime's arena (§7.2
    /// `IllegalAccess`, mirroring [`Self::atom_exists`]).
    pub(crate) fn derivation_exists(&self, d: DerivationId) -> bool {
        self.derivations.borrow().contains_key(d)
    }

    pub(crate) fn derivation_state(&self, d: DerivationId) -> DerivationState {
        self.derivations
            .borrow()
            .get(d)
            .map(|n| n.state)
            .unwrap_or(DerivationState::NotTracking)
    }

    /// Begins a tracking pass for `d`: saves and replaces the globally
    /// tracked derivation, bumps `runId`, and clears its `newObserving`
    /// scratch. Returns the previous tracking derivation to restore later.
    pub(crate) fn begin_tracking(&self, d: DerivationId) -> Option<DerivationId> {
        let prev = self.tracking_derivation.replace(Some(d));
        self.run_id.set(self.run_id.get().wrapping_add(1));
        self.new_observing
            .borrow_mut()
            .entry(d)
            .expect("derivation must be alive to track")
            .or_default()
            .borrow_mut()
            .clear();
        prev
    }

    /// Ends a tracking pass: diffs `newObserving` against `observing`,
    /// subscribes/unsubscribes accordingly, and restores the previous
    /// tracking derivation (§4.2 `bindDependencies`).
    pub(crate) fn end_tracking(&self, d: DerivationId, prev: Option<DerivationId>) {
        self.bind_dependencies(d);
        self.tracking_derivation.set(prev);
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    fn bind_dependencies(&self, d: DerivationId) {
        let new_read: Vec<AtomId> = self
            .new_observing
            .borrow()
            .get(d)
            .map(|v| v.borrow().clone())
            .unwrap_or_default();

        let mut scratch = self.diff_scratch.borrow_mut();
        scratch.clear();

        let mut deduped = Vec::with_capacity(new_read.len());
        for atom in new_read {
            if scratch.insert(atom) {
                self.subscribe(d, atom);
                deduped.push(atom);
            }
        }

        let prev_observing: Vec<AtomId> = self
            .observing
            .borrow()
            .get(d)
            .map(|v| v.borrow().clone())
            .unwrap_or_default();

        for atom in prev_observing {
            if !scratch.contains(&atom) {
                self.unsubscribe(d, atom);
            }
        }
        scratch.clear();

        self.observing
            .borrow_mut()
            .entry(d)
            .expect("derivation must be alive to bind dependencies")
            .or_default()
            .replace(deduped);

        self.set_derivation_state(d, DerivationState::UpToDate);
    }

    fn subscribe(&self, d: DerivationId, atom: AtomId) {
        self.observers
            .borrow_mut()
            .entry(atom)
            .expect("atom must be alive to subscribe")
            .or_default()
            .borrow_mut()
            .insert(d);
    }

    fn unsubscribe(&self, d: DerivationId, atom: AtomId) {
        if let Some(observers) = self.observers.borrow().get(atom) {
            observers.borrow_mut().shift_remove(&d);
        }
    }

    /// §4.2 `shouldCompute`: resolves `POSSIBLY_STALE` by re-reading any
    /// upstream computed dependencies, which is what makes the graph
    /// glitch-free (Testable Property 3).
    pub(crate) fn should_compute(&self, d: DerivationId) -> bool {
        match self.derivation_state(d) {
            DerivationState::NotTracking => true,
            DerivationState::UpToDate => false,
            DerivationState::Stale => true,
            DerivationState::PossiblyStale => {
                let deps: Vec<AtomId> = self
                    .observing
                    .borrow()
                    .get(d)
                    .map(|v| v.borrow().clone())
                    .unwrap_or_default();

                let mut became_stale = false;
                for atom in deps {
                    let owner = self.computed_owner.borrow().get(atom).copied();
                    let Some(owner) = owner else { continue };
                    let recompute = self.derivations.borrow().get(owner).and_then(|n| {
                        if let DerivationKind::Computed { recompute, .. } = &n.kind {
                            Some(Rc::clone(recompute))
                        } else {
                            None
                        }
                    });
                    if let Some(recompute) = recompute {
                        if recompute() {
                            became_stale = true;
                            break;
                        }
                    }
                }

                if became_stale {
                    self.set_derivation_state(d, DerivationState::Stale);
                    true
                } else {
                    self.set_derivation_state(d, DerivationState::UpToDate);
                    false
                }
            }
        }
    }

    /// §4.2 `clearObserving`: unsubscribes `d` from every atom it reads,
    /// and resets it to `NOT_TRACKING`.
    pub(crate) fn clear_observing(&self, d: DerivationId) {
        let observing: Vec<AtomId> = self
            .observing
            .borrow_mut()
            .get(d)
            .map(|v| std::mem::take(&mut *v.borrow_mut()))
            .unwrap_or_default();
        for atom in observing {
            self.unsubscribe(d, atom);
        }
        self.set_derivation_state(d, DerivationState::NotTracking);
    }

    pub(crate) fn register_computed_owner(&self, atom: AtomId, owner: DerivationId) {
        self.computed_owner.borrow_mut().insert(atom, owner);
    }

    pub(crate) fn is_observed(&self, atom: AtomId) -> bool {
        self.observers
            .borrow()
            .get(atom)
            .map(|o| !o.borrow().is_empty())
            .unwrap_or(false)
    }

    pub(crate) fn is_tracking(&self) -> bool {
        self.tracking_derivation.get().is_some()
    }

    pub(crate) fn dispose_atom(&self, atom: AtomId) {
        if let Some(observers) = self.observers.borrow_mut().remove(atom) {
            for d in observers.borrow().iter().copied() {
                if let Some(observing) = self.observing.borrow().get(d) {
                    observing.borrow_mut().retain(|a| *a != atom);
                }
            }
        }
        self.computed_owner.borrow_mut().remove(atom);
        self.atoms.borrow_mut().remove(atom);
    }

    pub(crate) fn dispose_derivation(&self, d: DerivationId) {
        self.clear_observing(d);
        self.observing.borrow_mut().remove(d);
        self.new_observing.borrow_mut().remove(d);
        self.reaction_phase.borrow_mut().remove(d);
        self.derivations.borrow_mut().remove(d);
    }

    /// Like [`Self::dispose_derivation`], but deliberately leaves the
    /// `reaction_phase` entry in place with its `is_disposed` flag set,
    /// instead of removing it (§4.4 `dispose`, Testable Property 5). A
    /// `Reaction` is the only kind of derivation callers query `is_disposed`
    /// on after teardown; removing the entry would make that query silently
    /// read back `false` via `reaction_phase`'s `unwrap_or_default`.
    pub(crate) fn dispose_reaction(&self, d: DerivationId) {
        self.clear_observing(d);
        self.observing.borrow_mut().remove(d);
        self.new_observing.borrow_mut().remove(d);
        self.derivations.borrow_mut().remove(d);
    }
}

// ---------------------------------------------------------------------
// Batch / scheduler (§4.5)
// ---------------------------------------------------------------------

impl Runtime {
    pub(crate) fn start_batch(&self) {
        self.in_batch.set(self.in_batch.get() + 1);
    }

    pub(crate) fn end_batch(&self) {
        let depth = self.in_batch.get();
        debug_assert!(depth > 0, "endBatch called without a matching startBatch");
        self.in_batch.set(depth.saturating_sub(1));
        if self.in_batch.get() == 0 {
            self.run_reactions();
        }
    }

    pub(crate) fn in_batch(&self) -> bool {
        self.in_batch.get() > 0
    }

    pub(crate) fn reaction_phase(&self, d: DerivationId) -> ReactionPhase {
        self.reaction_phase.borrow().get(d).copied().unwrap_or_default()
    }

    pub(crate) fn set_reaction_phase(&self, d: DerivationId, phase: ReactionPhase) {
        self.reaction_phase.borrow_mut().insert(d, phase);
    }

    pub(crate) fn schedule_reaction(&self, d: DerivationId) {
        let mut phase = self.reaction_phase(d);
        if phase.is_disposed || phase.is_scheduled {
            return;
        }
        phase.is_scheduled = true;
        self.set_reaction_phase(d, phase);
        self.pending_reactions.borrow_mut().push(d);
        self.run_reactions();
    }

    pub(crate) fn set_scheduler(&self, scheduler: Rc<dyn Fn(&dyn Fn())>) {
        *self.scheduler.borrow_mut() = scheduler;
    }

    pub(crate) fn current_scheduler(&self) -> Rc<dyn Fn(&dyn Fn())> {
        Rc::clone(&self.scheduler.borrow())
    }

    /// Drains the pending-reaction queue if we're at the outermost batch
    /// and not already draining (§4.5 `runReactions`).
    pub(crate) fn run_reactions(&self) {
        if self.in_batch.get() > 0 || self.is_running_reactions.get() {
            return;
        }
        let scheduler = Rc::clone(&self.scheduler.borrow());
        scheduler(&|| self.run_reactions_helper());
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip_all))]
    fn run_reactions_helper(&self) {
        self.is_running_reactions.set(true);
        let mut iterations = 0usize;

        while !self.pending_reactions.borrow().is_empty() {
            iterations += 1;
            if iterations >= MAX_REACTION_ITERATIONS {
                let offender = self
                    .pending_reactions
                    .borrow()
                    .first()
                    .map(|d| self.derivation_name(*d))
                    .unwrap_or_else(|| "<unknown>".into());
                let error = ReactiveError::Divergence(offender.clone(), MAX_REACTION_ITERATIONS);
                cfg_if::cfg_if! {
                    if #[cfg(feature = "tracing")] {
                        tracing::error!(%error, "reaction divergence, clearing pending queue");
                    } else {
                        let _ = &error;
                    }
                }
                for d in self.pending_reactions.borrow().iter() {
                    let mut phase = self.reaction_phase(*d);
                    phase.is_scheduled = false;
                    self.set_reaction_phase(*d, phase);
                }
                self.pending_reactions.borrow_mut().clear();
                break;
            }

            let batch: Vec<DerivationId> = std::mem::take(&mut *self.pending_reactions.borrow_mut());
            for d in batch {
                self.run_one_reaction(d);
            }
        }

        self.is_running_reactions.set(false);
    }

    /// Invoked by the drain loop for each scheduled reaction id. The actual
    /// "should this run, and what should it run" logic lives on
    /// `Reaction` (§4.4 `runReaction`); the runtime only knows how to flip
    /// the `_isScheduled` flag and hand control back via the stored
    /// `on_invalidate` hook.
    fn run_one_reaction(&self, d: DerivationId) {
        let mut phase = self.reaction_phase(d);
        phase.is_scheduled = false;
        self.set_reaction_phase(d, phase);
        if let Some(hook) = self.run_reaction_hooks.borrow().get(&d).cloned() {
            hook();
        }
    }
}

impl Runtime {
    /// Installs the closure that actually runs a `Reaction` when the drain
    /// loop reaches its id, so the generic scheduler above never needs to
    /// know about `Reaction`'s fields.
    pub(crate) fn install_run_reaction_hook(&self, d: DerivationId, hook: Rc<dyn Fn()>) {
        self.run_reaction_hooks.borrow_mut().insert(d, hook);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Testable Property 1 (§8): after a tracking pass, a derivation's
    // `observing` set is exactly the distinct atoms it read, regardless of
    // how many times (or in what order) it read each one.
    #[test]
    fn dependency_minimality_dedupes_repeated_reads() {
        let id = create_runtime();
        with_runtime(id, |rt| {
            let a = rt.new_atom("a", crate::diagnostics::here());
            let b = rt.new_atom("b", crate::diagnostics::here());
            let d = rt.new_derivation("d", DerivationKind::Reaction, crate::diagnostics::here());

            let prev = rt.begin_tracking(d);
            rt.report_observed(a);
            rt.report_observed(a);
            rt.report_observed(b);
            rt.report_observed(a);
            rt.end_tracking(d, prev);

            let observing = rt.observing.borrow().get(d).unwrap().borrow().clone();
            assert_eq!(observing.len(), 2);
            assert!(observing.contains(&a) && observing.contains(&b));
            assert_eq!(rt.observers.borrow().get(a).unwrap().borrow().len(), 1);
            assert_eq!(rt.observers.borrow().get(b).unwrap().borrow().len(), 1);
        })
        .unwrap();
        id.dispose();
    }

    // Testable Property 2 (§8): `a ∈ d.observing ⇔ d ∈ a.observers`, checked
    // after a dependency set actually changes across two tracking passes
    // (the case most likely to desync the two sides if `bind_dependencies`
    // were buggy).
    #[test]
    fn observer_and_observing_sets_stay_symmetric_across_retracking() {
        let id = create_runtime();
        with_runtime(id, |rt| {
            let a = rt.new_atom("a", crate::diagnostics::here());
            let b = rt.new_atom("b", crate::diagnostics::here());
            let d = rt.new_derivation("d", DerivationKind::Reaction, crate::diagnostics::here());

            let prev = rt.begin_tracking(d);
            rt.report_observed(a);
            rt.end_tracking(d, prev);

            let prev = rt.begin_tracking(d);
            rt.report_observed(b);
            rt.end_tracking(d, prev);

            for atom in [a, b] {
                let a_observes_d = rt
                    .observers
                    .borrow()
                    .get(atom)
                    .map(|o| o.borrow().contains(&d))
                    .unwrap_or(false);
                let d_observes_a = rt
                    .observing
                    .borrow()
                    .get(d)
                    .map(|o| o.borrow().contains(&atom))
                    .unwrap_or(false);
                assert_eq!(a_observes_d, d_observes_a);
            }
            assert!(rt.observing.borrow().get(d).unwrap().borrow().contains(&b));
            assert!(!rt.observing.borrow().get(d).unwrap().borrow().contains(&a));
        })
        .unwrap();
        id.dispose();
    }

    #[test]
    fn disposing_an_atom_removes_it_from_its_observers_observing_sets() {
        let id = create_runtime();
        with_runtime(id, |rt| {
            let a = rt.new_atom("a", crate::diagnostics::here());
            let d = rt.new_derivation("d", DerivationKind::Reaction, crate::diagnostics::here());

            let prev = rt.begin_tracking(d);
            rt.report_observed(a);
            rt.end_tracking(d, prev);
            assert_eq!(rt.observing.borrow().get(d).unwrap().borrow().len(), 1);

            rt.dispose_atom(a);
            assert!(rt.observing.borrow().get(d).unwrap().borrow().is_empty());
        })
        .unwrap();
        id.dispose();
    }
}
