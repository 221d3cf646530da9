//! The two families of keys used to address the bipartite dependency graph,
//! and the staleness lattice shared by every derivation.

slotmap::new_key_type! {
    /// Unique id of a leaf observable ([`crate::atom::ObservableValue`]).
    ///
    /// A [`crate::computed::ComputedValue`] allocates one of these *and* a
    /// [`DerivationId`] and cross-links them, since a computed is
    /// simultaneously an observable and a derivation (§3 DATA MODEL).
    pub struct AtomId;
}

slotmap::new_key_type! {
    /// Unique id of a derivation: either the derivation half of a
    /// [`crate::computed::ComputedValue`] or a [`crate::reaction::Reaction`].
    pub struct DerivationId;
}

/// The staleness state machine shared by `ComputedValue` and `Reaction`
/// (§3 DATA MODEL, §4.2).
///
/// Ordered so that `state >= Stale`-style comparisons read naturally,
/// matching the teacher's `ReactiveNodeState` ordering in `node.rs`, but
/// with the spec's own four named states rather than the teacher's
/// push-pull `Clean/Check/Dirty/DirtyMarked` lattice.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DerivationState {
    /// Initial state, or the state immediately after `clear_observing`.
    /// A derivation in this state has no subscriptions and must run its
    /// function from scratch the next time it is needed.
    NotTracking,
    /// The last run's cached result (or cached exception) is valid as-is.
    UpToDate,
    /// A dependency that is itself a computed reported that *it* changed
    /// state; this derivation must re-check by re-reading those upstream
    /// computeds before it knows whether it is really stale.
    PossiblyStale,
    /// A dependency that is a plain observable changed; this derivation
    /// must recompute unconditionally.
    Stale,
}

/// Which of a [`crate::reaction::Reaction`]'s mutually-exclusive runtime
/// phases it is currently in (§4.4).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct ReactionPhase {
    pub is_scheduled: bool,
    pub is_track_pending: bool,
    pub is_running: bool,
    pub is_disposed: bool,
}
