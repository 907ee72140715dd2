#![forbid(unsafe_code)]

//! Locally owned conduits: a value property and an action channel.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::conduit::{ActivationHooks, Callback, Conduit, ConduitCore, NoHooks, Subscriber};
use crate::equality::ValuesEqual;
use crate::error::Result;
use crate::lifetime::Lifetime;

// ---------------------------------------------------------------------------
// LocalProperty<T>
// ---------------------------------------------------------------------------

struct PropertyInner<T> {
    core: Rc<ConduitCore<T>>,
    value: RefCell<T>,
}

impl<T: Clone> ActivationHooks<T> for PropertyInner<T> {
    fn subscriber_added(&self, subscriber: &Subscriber<T>) {
        let value = self.value.borrow().clone();
        subscriber.send(&value);
    }
}

/// A local value that can be subscribed to and set.
///
/// New subscribers receive the current value immediately. [`set`](Self::set)
/// only notifies when the value actually changes according to
/// [`ValuesEqual`].
///
/// Cloning a `LocalProperty` creates a new handle to the **same** value.
pub struct LocalProperty<T> {
    inner: Rc<PropertyInner<T>>,
}

impl<T> Clone for LocalProperty<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for LocalProperty<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalProperty")
            .field("value", &*self.inner.value.borrow())
            .field("subscribers", &self.inner.core.subscriber_count())
            .finish()
    }
}

impl<T: Clone + ValuesEqual + 'static> LocalProperty<T> {
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(PropertyInner {
                core: ConduitCore::new("local property"),
                value: RefCell::new(value),
            }),
        }
    }

    /// A clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Access the current value by reference.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Replace the value, notifying subscribers if it changed. Returns whether
    /// it changed.
    pub fn set(&self, value: T) -> bool {
        if self.inner.value.borrow().values_equal(&value) {
            return false;
        }
        *self.inner.value.borrow_mut() = value.clone();
        self.inner.core.send_to_all(&value);
        true
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.core.subscriber_count()
    }
}

impl<T: Clone + ValuesEqual + 'static> Conduit<T> for LocalProperty<T> {
    fn add_subscriber(&self, lifetime: &Lifetime, callback: Callback<T>) -> Result<()> {
        self.inner
            .core
            .subscribe(lifetime, callback, &*self.inner)
            .map(drop)
    }
}

// ---------------------------------------------------------------------------
// LocalAction<T>
// ---------------------------------------------------------------------------

/// A local event channel. Every fired value reaches every current subscriber
/// once, in fire order. Nothing is queued while there are no subscribers.
pub struct LocalAction<T> {
    core: Rc<ConduitCore<T>>,
}

impl<T> Clone for LocalAction<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T> fmt::Debug for LocalAction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalAction")
            .field("subscribers", &self.core.subscriber_count())
            .finish()
    }
}

impl<T: 'static> LocalAction<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: ConduitCore::new("local action"),
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.core.subscriber_count()
    }
}

impl<T: Clone + 'static> LocalAction<T> {
    /// Deliver `value` to every current subscriber. Fired from inside a
    /// subscriber, it is delivered after the value in flight.
    pub fn fire(&self, value: T) {
        self.core.send_to_all(&value);
    }
}

impl<T: 'static> Default for LocalAction<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Conduit<T> for LocalAction<T> {
    fn add_subscriber(&self, lifetime: &Lifetime, callback: Callback<T>) -> Result<()> {
        self.core.subscribe(lifetime, callback, &NoHooks).map(drop)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
