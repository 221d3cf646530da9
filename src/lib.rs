//! A fine-grained reactivity runtime: observable atoms, derived computed
//! values, and side-effecting reactions wired into a bipartite dependency
//! graph, with batched, glitch-free recomputation.
//!
//! ## Fine-grained reactivity
//!
//! Three kinds of value make up the graph:
//!
//! - [`ObservableValue`] — a leaf piece of state. Reading it inside a
//!   tracked derivation subscribes that derivation; writing it schedules
//!   every subscriber for re-evaluation.
//! - [`ComputedValue`] — a memoized derivation that is itself observable.
//!   It recomputes lazily, at most once per dependency change, and only
//!   when something actually reads it.
//! - [`Reaction`] — a derivation that is never itself observable: it runs
//!   a side effect whenever its dependencies change, scheduled onto the
//!   pending queue and drained once the outermost [`batch`] ends.
//!
//! ```
//! use reactive_graph_core::{atom::ObservableValue, computed::ComputedValue, reaction::Reaction, runtime::create_runtime};
//!
//! let rt = create_runtime();
//! let a = ObservableValue::new(rt, "a", 1);
//! let b = ObservableValue::new(rt, "b", 2);
//!
//! let c = {
//!     let (a, b) = (a.clone(), b.clone());
//!     ComputedValue::new(rt, "c", move || a.get() + b.get())
//! };
//!
//! let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
//! let _r = {
//!     let c = c.clone();
//!     let seen = seen.clone();
//!     Reaction::autorun(rt, "r", move || seen.borrow_mut().push(c.get()))
//! };
//! assert_eq!(*seen.borrow(), vec![3]);
//!
//! a.set(10);
//! assert_eq!(*seen.borrow(), vec![3, 12]);
//! ```
//!
//! Every mutation that should be observed as a single unit — including a
//! bare call to `ObservableValue::set` — runs inside an implicit or
//! explicit [`batch`]; reactions only ever see the state after the
//! outermost batch completes (§4.5 of the design this crate implements).

pub mod administration;
pub mod atom;
pub mod batch;
pub mod computed;
mod diagnostics;
pub mod enhancer;
pub mod error;
mod node;
pub mod reaction;
pub mod runtime;
pub mod spy;

pub use administration::{Change, ObservableObject};
pub use atom::ObservableValue;
pub use batch::{batch, set_reaction_scheduler, BatchGuard};
pub use computed::{ComputedOptions, ComputedValue};
pub use enhancer::{Enhancer, ReferenceEnhancer};
pub use error::{CaughtError, ReactiveError};
pub use reaction::Reaction;
pub use runtime::{create_runtime, RuntimeId, MAX_REACTION_ITERATIONS};
pub use spy::{Spy, SpyEvent};
