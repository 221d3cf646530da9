//! Error kinds raised by the graph (§7 ERROR HANDLING DESIGN).
//!
//! Grounded on the teacher's `thiserror`-derived error style. `InterceptorCancel`
//! is deliberately not a variant here — per its own definition it is "not an
//! error", and is modeled instead as `Option<Change>` returning `None`
//! (see `administration.rs`). `DerivationException` is likewise not a
//! variant: "an exception is a value in the domain" (Design Notes), so it is
//! cached as `Result<T, Rc<CaughtError>>` on the derivation itself rather
//! than surfaced through this enum.

use std::{error::Error as StdError, fmt};

/// Errors surfaced synchronously by graph operations.
///
/// In a release build the invariant checks that produce most of these
/// variants are skipped and the corresponding method panics instead only on
/// truly unrecoverable misuse (matching the teacher's `with_runtime(...)
/// .expect("...")` posture) — see §7 Policy.
#[derive(Debug, thiserror::Error)]
pub enum ReactiveError {
    /// A computed read itself while already computing, or a reaction's
    /// `track` was entered while it was already running.
    #[error("Cycle detected: {0} is already being computed")]
    Cycle(String),

    /// A read or write reached an atom or derivation through something
    /// other than its owning handle (§7.2 — prototype-chain guarding,
    /// realized here as a stale/foreign handle rather than a prototype
    /// chain since Rust has no prototype objects).
    #[error("Illegal access to {0}: not the owner of this reactive node")]
    IllegalAccess(String),

    /// `ObservableObject::add_observable_prop`/`add_computed_prop` was
    /// called for a key that is already present and not configurable for
    /// replacement.
    #[error("{0} is not configurable and cannot be redefined")]
    NotConfigurable(String),

    /// An attempt to attach administration state to an object that can no
    /// longer accept new keys (§7.4).
    #[error("{0} is not extensible: no new observable properties can be added")]
    NotExtensible(String),

    /// `MAX_REACTION_ITERATIONS` was exceeded while draining the pending
    /// reaction queue; the queue was cleared (§4.5, §7.7).
    #[error("Reaction {0} didn't converge after {1} iterations")]
    Divergence(String, usize),
}

/// A user-function failure captured during `track_derived_function` and
/// cached on the owning derivation until its dependencies change again
/// (§7 Policy, §9 "Error caching on computeds").
#[derive(Debug)]
pub struct CaughtError {
    pub(crate) inner: Box<dyn StdError + 'static>,
}

impl CaughtError {
    pub fn new(inner: impl StdError + 'static) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }

    pub fn inner(&self) -> &(dyn StdError + 'static) {
        self.inner.as_ref()
    }

    /// Builds a `CaughtError` out of a `std::panic::catch_unwind` payload,
    /// used by both `ComputedValue` and `Reaction` to turn a user-function
    /// panic into the cached-exception value described in §9.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "reactive function panicked".to_string()
        };
        Self::new(std::io::Error::other(message))
    }
}

impl fmt::Display for CaughtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl StdError for CaughtError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source()
    }
}
