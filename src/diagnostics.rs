//! Debug-only caller-location tracking for graph nodes (§2.1 "Diagnostics").
//!
//! Grounded on the teacher's `AccessDiagnostics` cfg(debug_assertions) split
//! in `diagnostics.rs`: a `defined_at` location is captured once, at the
//! public constructor that created an atom or derivation, and carried on
//! the node for later diagnostics (panic messages, `Debug` impls). In
//! release builds `DefinedAt` collapses to a zero-sized `()` and `here()`
//! compiles to nothing, matching the teacher's own `#[cfg(not(debug_assertions))]
//! struct AccessDiagnostics {}` posture.
//!
//! `here()` must be called directly from a `#[track_caller]` public
//! constructor (never through an intervening closure or `dyn Fn`, which
//! would break caller-location propagation) so that the location recorded
//! is the user's call site, not somewhere inside this crate.

#[cfg(debug_assertions)]
pub(crate) type DefinedAt = &'static std::panic::Location<'static>;
#[cfg(not(debug_assertions))]
pub(crate) type DefinedAt = ();

#[track_caller]
pub(crate) fn here() -> DefinedAt {
    #[cfg(debug_assertions)]
    {
        std::panic::Location::caller()
    }
    #[cfg(not(debug_assertions))]
    {}
}
