//! Observable-object administration (§3 DATA MODEL, §4.6).
//!
//! The spec's `ObservableObjectAdministration` is normally a hidden
//! side-record a host object points to; in Rust there is no host object to
//! attach a hidden field to, so per the spec's own Design Notes
//! (§9 "Lazy prototype-computed initialisation", §3.1) `ObservableObject`
//! plays both roles at once. It is grounded on the teacher's
//! `ScopeProperty` bookkeeping in `scope.rs` — a name/id-keyed registry
//! owned by one struct — adapted from a `Vec<ScopeProperty>` to a
//! name-keyed `FxHashMap<String, Slot>`.

use std::{any::Any, cell::RefCell, fmt, rc::Rc};

use rustc_hash::FxHashMap;

use crate::{
    atom::ObservableValue,
    batch::batch,
    computed::ComputedValue,
    error::ReactiveError,
    runtime::RuntimeId,
    spy::SpyEvent,
};

/// The type-erased payload stored behind every slot. Equality is pointer
/// equality on the inner `Rc`: a typed `set::<T>` always builds a fresh
/// `Rc`, so distinct writes are always "changed" unless the caller passes
/// back the exact `Rc` it read — the same conservative stance the rest of
/// the crate takes wherever a generic equality comparison isn't available
/// (see `DESIGN.md`).
#[derive(Clone)]
pub(crate) struct AnyValue(pub Rc<dyn Any>);

impl PartialEq for AnyValue {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for AnyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AnyValue(..)")
    }
}

pub(crate) enum Slot {
    Data(ObservableValue<AnyValue>),
    Computed(ComputedValue<AnyValue>),
}

impl Slot {
    fn with<R>(&self, f: impl FnOnce(&AnyValue) -> R) -> R {
        match self {
            Slot::Data(atom) => atom.with(f),
            Slot::Computed(computed) => computed.with(f),
        }
    }
}

/// A `willChange` record offered to the interceptor chain; returning
/// `None` from an interceptor is not an error, it silently cancels the
/// mutation (§7 "InterceptorCancel").
#[derive(Debug, Clone)]
pub enum Change {
    Add { name: String, new_value: Rc<dyn Any> },
    Update { name: String, old_value: Rc<dyn Any>, new_value: Rc<dyn Any> },
    Remove { name: String, old_value: Rc<dyn Any> },
}

type Interceptor = Box<dyn Fn(Change) -> Option<Change>>;
type Listener = Box<dyn Fn(&Change)>;

/// An observable host object and its own administration (§4.6).
///
/// `ObservableObject` is deliberately dynamic (name-keyed, type-erased
/// values) to match the spec's `addObservableProp`/`addComputedProp`
/// operations; reach for a plain `ObservableValue<T>` field instead
/// whenever the set of properties is known at compile time.
pub struct ObservableObject {
    runtime: RuntimeId,
    name: String,
    values: RefCell<FxHashMap<String, Slot>>,
    keys: RefCell<Option<ObservableValue<Vec<String>>>>,
    interceptors: RefCell<Vec<Interceptor>>,
    listeners: RefCell<Vec<Listener>>,
    extensible: RefCell<bool>,
}

impl ObservableObject {
    pub fn new(runtime: RuntimeId, name: impl Into<String>) -> Self {
        Self {
            runtime,
            name: name.into(),
            values: RefCell::new(FxHashMap::default()),
            keys: RefCell::new(None),
            interceptors: RefCell::new(Vec::new()),
            listeners: RefCell::new(Vec::new()),
            extensible: RefCell::new(true),
        }
    }

    /// Closes the object to further `add_observable_prop`/`add_computed_prop`
    /// calls (§7.4 `NotExtensible`).
    pub fn seal(&self) {
        *self.extensible.borrow_mut() = false;
    }

    fn run_interceptors(&self, mut change: Change) -> Option<Change> {
        for interceptor in self.interceptors.borrow().iter() {
            change = interceptor(change)?;
        }
        Some(change)
    }

    fn notify_listeners(&self, change: &Change) {
        for listener in self.listeners.borrow().iter() {
            listener(change);
        }
        if self.runtime_spy_enabled() {
            self.emit_spy(change);
        }
    }

    fn runtime_spy_enabled(&self) -> bool {
        crate::runtime::with_runtime(self.runtime, |rt| rt.spy.bus.is_enabled()).unwrap_or(false)
    }

    fn emit_spy(&self, change: &Change) {
        let _ = crate::runtime::with_runtime(self.runtime, |rt| {
            let event = match change {
                Change::Add { name, .. } => SpyEvent::Add {
                    name: name.clone(),
                    new_value: format!("{}.{}", self.name, name),
                },
                Change::Update { name, .. } => SpyEvent::Update {
                    name: name.clone(),
                    old_value: String::new(),
                    new_value: String::new(),
                },
                Change::Remove { name, .. } => SpyEvent::Remove {
                    name: name.clone(),
                    old_value: String::new(),
                },
            };
            rt.spy.bus.report(event);
        });
    }

    /// §4.6 `addObservableProp`: installs a new data slot. Running
    /// interceptors may cancel the add; a `None` return means the key was
    /// not installed (§7.4 no error, matching `InterceptorCancel`).
    pub fn add_observable_prop<T: 'static>(&self, key: impl Into<String>, value: T) -> Option<()> {
        let key = key.into();
        if !*self.extensible.borrow() {
            panic!("{}", ReactiveError::NotExtensible(self.name.clone()));
        }
        if self.values.borrow().contains_key(&key) {
            panic!("{}", ReactiveError::NotConfigurable(key));
        }

        let boxed: Rc<dyn Any> = Rc::new(value);
        let change = self.run_interceptors(Change::Add {
            name: key.clone(),
            new_value: Rc::clone(&boxed),
        })?;
        let new_value = match change {
            Change::Add { new_value, .. } => new_value,
            _ => boxed,
        };

        let notify_value = Rc::clone(&new_value);
        let atom = ObservableValue::new(self.runtime, format!("{}.{key}", self.name), AnyValue(new_value));
        self.values.borrow_mut().insert(key.clone(), Slot::Data(atom));
        if let Some(keys) = self.keys.borrow().as_ref() {
            keys.update(|v| v.push(key.clone()));
        }
        self.notify_listeners(&Change::Add {
            name: key,
            new_value: notify_value,
        });
        Some(())
    }

    /// §4.6 `addComputedProp`: installs a new computed slot with an
    /// optional setter.
    pub fn add_computed_prop<T: 'static>(
        &self,
        key: impl Into<String>,
        compute: impl Fn() -> T + 'static,
        setter: Option<Rc<dyn Fn(T)>>,
    ) -> Option<()> {
        let key = key.into();
        if !*self.extensible.borrow() {
            panic!("{}", ReactiveError::NotExtensible(self.name.clone()));
        }
        if self.values.borrow().contains_key(&key) {
            panic!("{}", ReactiveError::NotConfigurable(key));
        }

        let erased_compute = move || AnyValue(Rc::new(compute()) as Rc<dyn Any>);
        let erased_setter: Option<Rc<dyn Fn(AnyValue)>> = setter.map(|setter| {
            let setter: Rc<dyn Fn(AnyValue)> = Rc::new(move |v: AnyValue| match Rc::downcast::<T>(v.0) {
                Ok(value) => match Rc::try_unwrap(value) {
                    Ok(value) => setter(value),
                    Err(_) => panic!("computed setter payload is referenced elsewhere"),
                },
                Err(_) => panic!("computed setter received a value of the wrong type"),
            });
            setter
        });

        let mut options = crate::computed::ComputedOptions::default();
        options.setter = erased_setter;

        let computed = ComputedValue::new_with_options(
            self.runtime,
            format!("{}.{key}", self.name),
            erased_compute,
            options,
        );
        self.values.borrow_mut().insert(key, Slot::Computed(computed));
        Some(())
    }

    /// §4.6 `read`: returns a clone of the stored `T`, or `None` if the
    /// key is absent or stores a different type.
    ///
    /// # Panics
    ///
    /// Panics if the key exists but holds a value of a different type —
    /// mirroring the teacher's `downcast_mut::<Option<T>>().expect(...)`
    /// convention (`effect.rs`).
    pub fn get<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        let values = self.values.borrow();
        let slot = values.get(key)?;
        Some(slot.with(|v| {
            v.0.downcast_ref::<T>()
                .unwrap_or_else(|| panic!("property {key} is not of type {}", std::any::type_name::<T>()))
                .clone()
        }))
    }

    /// §4.6 `write`: if `key` names a computed slot, forwards to its
    /// setter. Otherwise runs interceptors, skips the write if the new
    /// value equals the old one, and notifies listeners/spy if it commits.
    /// All mutation happens inside an implicit batch (§4.6).
    ///
    /// # Panics
    ///
    /// Panics if `key` is absent, or holds a value of a different type.
    pub fn set<T: PartialEq + Clone + 'static>(&self, key: &str, new_value: T) {
        let atom = match self.values.borrow().get(key) {
            Some(Slot::Computed(computed)) => {
                computed.set(AnyValue(Rc::new(new_value)));
                return;
            }
            Some(Slot::Data(atom)) => atom.clone(),
            None => panic!("no such observable property: {key}"),
        };

        batch(self.runtime, || {
            let old_value: Rc<dyn Any> = atom.with(|v| Rc::clone(&v.0));
            let old_typed = old_value
                .downcast_ref::<T>()
                .unwrap_or_else(|| panic!("property {key} is not of type {}", std::any::type_name::<T>()));
            if *old_typed == new_value {
                return;
            }

            let new_boxed: Rc<dyn Any> = Rc::new(new_value);
            let change = match self.run_interceptors(Change::Update {
                name: key.to_string(),
                old_value: Rc::clone(&old_value),
                new_value: Rc::clone(&new_boxed),
            }) {
                Some(change) => change,
                None => return,
            };
            let new_boxed = match change {
                Change::Update { new_value, .. } => new_value,
                _ => new_boxed,
            };

            atom.set_unchecked(AnyValue(Rc::clone(&new_boxed)));
            self.notify_listeners(&Change::Update {
                name: key.to_string(),
                old_value,
                new_value: new_boxed,
            });
        });
    }

    /// §4.6 `remove`: no-op if `key` is absent. Interceptors may cancel.
    /// Emits a `remove` record to listeners/spy on success. Makes no
    /// distinction between a data slot and a computed slot — both go
    /// through the same interceptor-then-notify pipeline.
    pub fn remove(&self, key: &str) {
        if !self.values.borrow().contains_key(key) {
            return;
        }

        batch(self.runtime, || {
            let old_value = match self.values.borrow().get(key) {
                Some(slot) => slot.with(|v| Rc::clone(&v.0)),
                None => return,
            };
            let change = match self.run_interceptors(Change::Remove {
                name: key.to_string(),
                old_value: Rc::clone(&old_value),
            }) {
                Some(change) => change,
                None => return,
            };

            self.values.borrow_mut().remove(key);
            if let Some(keys) = self.keys.borrow().as_ref() {
                let key = key.to_string();
                keys.update(|v| v.retain(|k| k != &key));
            }
            self.notify_listeners(&change);
        });
    }

    /// §4.6 `observe`: registers a listener for `add|update|remove`
    /// records. Observable objects cannot replay history, so there is no
    /// `fire_immediately` parameter (unlike `ObservableValue`/`ComputedValue`
    /// observers, which could).
    pub fn observe(&self, listener: impl Fn(&Change) + 'static) {
        self.listeners.borrow_mut().push(Box::new(listener));
    }

    /// §4.6 `intercept`: registers an interceptor; handlers run in
    /// insertion order and the first to return `None` cancels the change.
    pub fn intercept(&self, interceptor: impl Fn(Change) -> Option<Change> + 'static) {
        self.interceptors.borrow_mut().push(Box::new(interceptor));
    }

    /// The lazily-created observable sequence of dynamic property names
    /// (§3 "keys"). Reading it the first time installs the backing atom
    /// and seeds it with the keys added so far.
    pub fn keys(&self) -> Vec<String> {
        let existing = self.keys.borrow().clone();
        let atom = existing.unwrap_or_else(|| {
            let seeded: Vec<String> = self.values.borrow().keys().cloned().collect();
            let atom = ObservableValue::new(self.runtime, format!("{}.keys", self.name), seeded);
            *self.keys.borrow_mut() = Some(atom.clone());
            atom
        });
        atom.get()
    }
}
