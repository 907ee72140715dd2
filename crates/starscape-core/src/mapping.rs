#![forbid(unsafe_code)]

//! Derived values computed on demand.
//!
//! A [`MappingConduit`] owns no value of its own until someone subscribes.
//! On activation it runs its setup function with the activation lifetime and
//! a [`Setter`]; the setup typically subscribes to upstream conduits with that
//! lifetime and pushes derived values through the setter.
//!
//! # State machine
//!
//! ```text
//! Inactive ──subscribe──▶ Active(computing) ──first set──▶ Active(steady)
//!    ▲                                                         │
//!    └──────────────────── last unsubscribe ◀──────────────────┘
//! ```
//!
//! Deactivation clears the cached value. Reactivation runs setup again from
//! scratch; setters handed out by an earlier activation go inert.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::conduit::{ActivationHooks, Callback, Conduit, ConduitCore, ConduitExt, Subscriber};
use crate::equality::ValuesEqual;
use crate::error::Result;
use crate::lifetime::{Lifetime, WeakLifetime};

type Setup<T> = Box<dyn Fn(&Lifetime, Setter<T>) -> Result<()>>;

struct MappingInner<T> {
    this: Weak<MappingInner<T>>,
    core: Rc<ConduitCore<T>>,
    value: RefCell<Option<T>>,
    setup: Setup<T>,
}

impl<T: Clone + ValuesEqual + 'static> MappingInner<T> {
    fn store(&self, value: T) {
        let unchanged = self
            .value
            .borrow()
            .as_ref()
            .is_some_and(|current| current.values_equal(&value));
        if unchanged {
            return;
        }
        *self.value.borrow_mut() = Some(value.clone());
        self.core.send_to_all(&value);
    }
}

impl<T: Clone + ValuesEqual + 'static> ActivationHooks<T> for MappingInner<T> {
    fn activate(&self, activation: &Lifetime) -> Result<()> {
        let this = self.this.clone();
        activation.add_callback(move || {
            if let Some(inner) = this.upgrade() {
                let stale = inner.value.borrow_mut().take();
                drop(stale);
            }
        })?;
        let setter = Setter {
            target: self.this.clone(),
            activation: activation.downgrade(),
        };
        (self.setup)(activation, setter)
    }

    fn subscriber_added(&self, subscriber: &Subscriber<T>) {
        let value = self.value.borrow().clone();
        if let Some(value) = value {
            subscriber.send(&value);
        }
    }
}

/// Pushes values into the [`MappingConduit`] that handed it out.
///
/// Only effective during the activation it was created for.
pub struct Setter<T> {
    target: Weak<MappingInner<T>>,
    activation: WeakLifetime,
}

impl<T> Clone for Setter<T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            activation: self.activation.clone(),
        }
    }
}

impl<T> fmt::Debug for Setter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setter")
            .field("live", &self.activation.is_alive())
            .finish()
    }
}

impl<T: Clone + ValuesEqual + 'static> Setter<T> {
    /// Replace the derived value. Equal consecutive values are dropped.
    pub fn set(&self, value: T) {
        if !self.activation.is_alive() {
            tracing::trace!("setter used outside its activation, ignored");
            return;
        }
        if let Some(target) = self.target.upgrade() {
            target.store(value);
        }
    }
}

/// A conduit whose value is derived by a setup function while it is active.
pub struct MappingConduit<T> {
    inner: Rc<MappingInner<T>>,
}

impl<T> Clone for MappingConduit<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for MappingConduit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingConduit")
            .field("value", &*self.inner.value.borrow())
            .field("active", &self.inner.core.is_active())
            .finish()
    }
}

impl<T: Clone + ValuesEqual + 'static> MappingConduit<T> {
    pub fn new(setup: impl Fn(&Lifetime, Setter<T>) -> Result<()> + 'static) -> Self {
        Self {
            inner: Rc::new_cyclic(|this| MappingInner {
                this: this.clone(),
                core: ConduitCore::new("mapping conduit"),
                value: RefCell::new(None),
                setup: Box::new(setup),
            }),
        }
    }

    /// Derive a conduit from `source` by applying `f` to every value.
    pub fn map<S: 'static>(
        source: impl Conduit<S> + 'static,
        f: impl Fn(&S) -> T + 'static,
    ) -> Self {
        let f = Rc::new(f);
        Self::new(move |activation, setter| {
            let f = Rc::clone(&f);
            source.subscribe(activation, move |value: &S| setter.set(f(value)))
        })
    }

    /// The last derived value, if active and computed.
    #[must_use]
    pub fn cached(&self) -> Option<T> {
        self.inner.value.borrow().clone()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.core.is_active()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.core.subscriber_count()
    }
}

impl<T: Clone + ValuesEqual + 'static> Conduit<T> for MappingConduit<T> {
    fn add_subscriber(&self, lifetime: &Lifetime, callback: Callback<T>) -> Result<()> {
        self.inner
            .core
            .subscribe(lifetime, callback, &*self.inner)
            .map(drop)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
