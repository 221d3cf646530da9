//! The introspection spy bus and the global reaction-error bus (§6 EXTERNAL
//! INTERFACES, §4.4 `reportExceptionInDerivation`).
//!
//! Kept as a minimal listener registry distinct from the `tracing`
//! instrumentation carried elsewhere in the crate: the spec calls out the
//! spy bus as a named external-facing concept with its own event taxonomy,
//! so it is modeled directly rather than folded into `tracing` spans (see
//! SPEC_FULL.md "Open Question resolutions").

use std::{cell::RefCell, rc::Rc};

use crate::error::CaughtError;

/// One event on the spy bus.
#[derive(Debug, Clone)]
pub enum SpyEvent {
    Add {
        name: String,
        new_value: String,
    },
    Update {
        name: String,
        old_value: String,
        new_value: String,
    },
    Remove {
        name: String,
        old_value: String,
    },
    /// A reaction ran to completion.
    Reaction { name: String },
    /// A reaction was scheduled but its `on_invalidate` never called
    /// `track` synchronously (§4.4).
    ScheduledReaction { name: String },
    /// A derivation's user function raised an error.
    Error { name: String, message: String },
}

type SpyListener = Box<dyn Fn(&SpyEvent)>;
type ErrorHandler = Box<dyn Fn(&CaughtError, &str)>;

#[derive(Default)]
pub(crate) struct SpyBus {
    listeners: RefCell<Vec<SpyListener>>,
    error_handlers: RefCell<Vec<ErrorHandler>>,
}

impl SpyBus {
    pub(crate) fn subscribe(&self, listener: SpyListener) {
        self.listeners.borrow_mut().push(listener);
    }

    pub(crate) fn report(&self, event: SpyEvent) {
        for listener in self.listeners.borrow().iter() {
            listener(&event);
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        !self.listeners.borrow().is_empty()
    }

    pub(crate) fn register_error_handler(&self, handler: ErrorHandler) {
        self.error_handlers.borrow_mut().push(handler);
    }

    /// Fans an uncaught derivation exception out to every globally
    /// registered handler (§4.4 `reportExceptionInDerivation`, step 2).
    pub(crate) fn dispatch_error(&self, error: &CaughtError, derivation_name: &str) {
        let handlers = self.error_handlers.borrow();
        if handlers.is_empty() {
            cfg_if::cfg_if! {
                if #[cfg(feature = "tracing")] {
                    tracing::error!(derivation = derivation_name, %error, "uncaught error in reaction");
                } else {
                    let _ = (error, derivation_name);
                }
            }
        } else {
            for handler in handlers.iter() {
                handler(error, derivation_name);
            }
        }
    }
}

/// A cloneable handle used to register spy listeners and global reaction
/// error handlers from outside the graph.
#[derive(Clone, Default)]
pub struct Spy {
    pub(crate) bus: Rc<SpyBus>,
}

impl Spy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener invoked for every spy event emitted on this bus.
    pub fn subscribe(&self, listener: impl Fn(&SpyEvent) + 'static) {
        self.bus.subscribe(Box::new(listener));
    }

    /// Registers a global handler invoked whenever a reaction's user
    /// function throws and the reaction has no `errorHandler` of its own
    /// (§4.4, §6 "Error bus").
    pub fn on_reaction_error(&self, handler: impl Fn(&CaughtError, &str) + 'static) {
        self.bus.register_error_handler(Box::new(handler));
    }
}
