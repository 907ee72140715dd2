#![forbid(unsafe_code)]

//! Demand-activated reactive sources.
//!
//! A conduit is anything that can be subscribed to with a [`Lifetime`] and a
//! callback: a property-like value, an event stream, or a set of members.
//! Concrete conduits share a [`ConduitCore<T>`], which tracks subscribers and
//! the *activation lifetime*.
//!
//! # Activation
//!
//! The activation lifetime exists iff the conduit has at least one
//! subscriber. It is created on the 0→1 transition, right before the
//! [`ActivationHooks::activate`] hook runs, and killed on the 1→0 transition.
//! Anything the hook wires up (upstream subscriptions, network requests,
//! caches) should hang off it, so it is torn down with it. A conduit can be
//! activated again later; nothing carries over between activations.
//!
//! # Invariants
//!
//! 1. Subscribers are notified in subscription order.
//! 2. Notification iterates over a snapshot, so callbacks may subscribe to or
//!    unsubscribe from the conduit that is notifying them.
//! 3. Delivery is never reentrant. A value sent while the conduit is already
//!    notifying is queued together with the subscribers current at send
//!    time, and delivered once the value in flight has reached every
//!    subscriber. A value for a callback that is still running is queued on
//!    that subscriber and delivered right after the callback returns. Either
//!    way every subscriber sees values in send order.
//! 4. Killing the activation lifetime disposes every remaining subscriber
//!    before subscriber storage is cleared.
//! 5. A destroyed conduit rejects new subscribers.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{CoreError, Result};
use crate::lifetime::{Disposable, Lifetime, OwnKey, WeakLifetime};

/// Boxed subscriber callback.
pub type Callback<T> = Box<dyn FnMut(&T)>;

// ---------------------------------------------------------------------------
// Subscriber<T>
// ---------------------------------------------------------------------------

/// One callback bound to one consumer lifetime and one conduit.
///
/// Owned by the lifetime and tracked by the conduit; disposing it (from
/// either side) drops the callback and detaches it from both.
pub struct Subscriber<T> {
    id: u64,
    callback: RefCell<Option<Callback<T>>>,
    pending: RefCell<VecDeque<T>>,
    alive: Cell<bool>,
    lifetime: WeakLifetime,
    own_key: Cell<Option<OwnKey>>,
    core: Weak<ConduitCore<T>>,
}

impl<T: Clone> Subscriber<T> {
    /// Deliver a value to this subscriber's callback.
    ///
    /// Called from inside this subscriber's own callback, the value is
    /// queued and delivered after the running call returns.
    pub fn send(&self, value: &T) {
        if !self.alive.get() {
            return;
        }
        let Some(mut callback) = self.callback.borrow_mut().take() else {
            tracing::trace!(subscriber = self.id, "reentrant delivery queued");
            self.pending.borrow_mut().push_back(value.clone());
            return;
        };
        callback(value);
        while self.alive.get() {
            let next = self.pending.borrow_mut().pop_front();
            let Some(next) = next else {
                break;
            };
            callback(&next);
        }
        if self.alive.get() {
            *self.callback.borrow_mut() = Some(callback);
        } else {
            self.pending.borrow_mut().clear();
        }
    }
}

impl<T> Subscriber<T> {
    /// The lifetime this subscriber was created with, if it still exists.
    #[must_use]
    pub fn lifetime(&self) -> Option<Lifetime> {
        self.lifetime.upgrade()
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.get()
    }
}

impl<T> Disposable for Subscriber<T> {
    fn dispose(&self) {
        if !self.alive.replace(false) {
            return;
        }
        let callback = self.callback.borrow_mut().take();
        drop(callback);
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        drop(pending);
        if let (Some(lifetime), Some(key)) = (self.lifetime.upgrade(), self.own_key.take()) {
            lifetime.disown(key);
        }
        if let Some(core) = self.core.upgrade() {
            core.remove_subscriber(self.id);
        }
    }
}

impl<T> fmt::Debug for Subscriber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("alive", &self.alive.get())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Per-conduit behavior invoked by [`ConduitCore::subscribe`].
pub trait ActivationHooks<T> {
    /// Called on the 0→1 transition with the fresh activation lifetime,
    /// before the new subscriber is registered.
    fn activate(&self, _activation: &Lifetime) -> Result<()> {
        Ok(())
    }

    /// Called for every new subscriber, after it is registered. Property-like
    /// conduits push their current value here.
    fn subscriber_added(&self, _subscriber: &Subscriber<T>) {}
}

/// Hooks that do nothing, for plain event streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl<T> ActivationHooks<T> for NoHooks {}

// ---------------------------------------------------------------------------
// ConduitCore<T>
// ---------------------------------------------------------------------------

/// Subscriber bookkeeping shared by every conduit implementation.
pub struct ConduitCore<T> {
    label: &'static str,
    this: Weak<ConduitCore<T>>,
    subscribers: RefCell<Vec<Rc<Subscriber<T>>>>,
    activation: RefCell<Option<Lifetime>>,
    next_subscriber_id: Cell<u64>,
    destroyed: Cell<bool>,
    dispatching: Cell<bool>,
    queued: RefCell<VecDeque<Queued<T>>>,
}

/// A value sent during another delivery, with its recipients.
struct Queued<T> {
    value: T,
    recipients: Vec<Rc<Subscriber<T>>>,
}

/// Clears the dispatching flag even if a callback unwinds.
struct Dispatching<'a>(&'a Cell<bool>);

impl Drop for Dispatching<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl<T: 'static> ConduitCore<T> {
    /// `label` names the conduit kind in errors and log fields.
    #[must_use]
    pub fn new(label: &'static str) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            label,
            this: this.clone(),
            subscribers: RefCell::new(Vec::new()),
            activation: RefCell::new(None),
            next_subscriber_id: Cell::new(0),
            destroyed: Cell::new(false),
            dispatching: Cell::new(false),
            queued: RefCell::new(VecDeque::new()),
        })
    }

    /// Register `callback` for as long as `lifetime` lives, activating the
    /// conduit if this is its first subscriber.
    pub fn subscribe(
        &self,
        lifetime: &Lifetime,
        callback: Callback<T>,
        hooks: &dyn ActivationHooks<T>,
    ) -> Result<Rc<Subscriber<T>>> {
        if self.destroyed.get() {
            return Err(CoreError::ConduitDestroyed {
                conduit: self.label,
            });
        }

        let id = self.next_subscriber_id.get();
        self.next_subscriber_id.set(id + 1);
        let subscriber = Rc::new(Subscriber {
            id,
            callback: RefCell::new(Some(callback)),
            pending: RefCell::new(VecDeque::new()),
            alive: Cell::new(true),
            lifetime: lifetime.downgrade(),
            own_key: Cell::new(None),
            core: self.this.clone(),
        });
        let key = lifetime.add(Rc::clone(&subscriber) as Rc<dyn Disposable>)?;
        subscriber.own_key.set(Some(key));

        if self.activation.borrow().is_none() {
            let activation = Lifetime::new();
            let this = self.this.clone();
            activation.add_callback(move || {
                if let Some(core) = this.upgrade() {
                    core.release_subscribers();
                }
            })?;
            *self.activation.borrow_mut() = Some(activation.clone());
            tracing::trace!(
                conduit = self.label,
                lifetime_id = activation.id(),
                "conduit activated"
            );
            if let Err(err) = hooks.activate(&activation) {
                subscriber.dispose();
                self.deactivate();
                return Err(err);
            }
        }

        if !subscriber.is_alive() {
            return Ok(subscriber);
        }
        self.subscribers.borrow_mut().push(Rc::clone(&subscriber));
        hooks.subscriber_added(&subscriber);
        Ok(subscriber)
    }
}

impl<T: Clone> ConduitCore<T> {
    /// Send `value` to every current subscriber.
    ///
    /// A send made by a callback during delivery is queued and goes out
    /// after the value in flight has reached every subscriber.
    pub fn send_to_all(&self, value: &T) {
        if self.dispatching.get() {
            tracing::trace!(conduit = self.label, "nested send queued");
            self.queued.borrow_mut().push_back(Queued {
                value: value.clone(),
                recipients: self.subscribers_snapshot(),
            });
            return;
        }
        self.dispatching.set(true);
        let _dispatching = Dispatching(&self.dispatching);
        for subscriber in self.subscribers_snapshot() {
            subscriber.send(value);
        }
        loop {
            let next = self.queued.borrow_mut().pop_front();
            let Some(next) = next else {
                break;
            };
            for subscriber in &next.recipients {
                subscriber.send(&next.value);
            }
        }
    }
}

impl<T> ConduitCore<T> {
    /// Current subscribers, in subscription order.
    #[must_use]
    pub fn subscribers_snapshot(&self) -> Vec<Rc<Subscriber<T>>> {
        self.subscribers.borrow().clone()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.activation.borrow().is_some()
    }

    /// The current activation lifetime, if active.
    #[must_use]
    pub fn activation(&self) -> Option<Lifetime> {
        self.activation.borrow().clone()
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Permanently shut the conduit down, disposing all subscribers.
    pub fn destroy(&self) {
        if self.destroyed.replace(true) {
            return;
        }
        tracing::trace!(conduit = self.label, "conduit destroyed");
        self.deactivate();
    }

    fn remove_subscriber(&self, id: u64) {
        let (removed, now_empty) = {
            let mut subscribers = self.subscribers.borrow_mut();
            let removed = subscribers
                .iter()
                .position(|s| s.id == id)
                .map(|index| subscribers.remove(index));
            (removed, subscribers.is_empty())
        };
        drop(removed);
        if now_empty {
            self.deactivate();
        }
    }

    fn deactivate(&self) {
        let activation = self.activation.borrow_mut().take();
        if let Some(activation) = activation {
            tracing::trace!(
                conduit = self.label,
                lifetime_id = activation.id(),
                "conduit deactivated"
            );
            activation.kill();
        }
    }

    fn release_subscribers(&self) {
        let remaining = self.subscribers_snapshot();
        for subscriber in &remaining {
            subscriber.dispose();
        }
        let leftover = std::mem::take(&mut *self.subscribers.borrow_mut());
        drop(leftover);
    }
}

impl<T> fmt::Debug for ConduitCore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConduitCore")
            .field("label", &self.label)
            .field("subscribers", &self.subscribers.borrow().len())
            .field("active", &self.activation.borrow().is_some())
            .field("destroyed", &self.destroyed.get())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Conduit trait
// ---------------------------------------------------------------------------

/// A subscribe-able reactive source of `T` values.
///
/// This is the object-safe core; the convenience methods live on
/// [`ConduitExt`], which is implemented for every conduit (including
/// `dyn Conduit<T>`).
pub trait Conduit<T: 'static> {
    /// Register `callback` for as long as `lifetime` lives.
    fn add_subscriber(&self, lifetime: &Lifetime, callback: Callback<T>) -> Result<()>;
}

impl<T: 'static, C: Conduit<T> + ?Sized> Conduit<T> for Rc<C> {
    fn add_subscriber(&self, lifetime: &Lifetime, callback: Callback<T>) -> Result<()> {
        (**self).add_subscriber(lifetime, callback)
    }
}

pub trait ConduitExt<T: 'static>: Conduit<T> {
    /// Subscribe a closure for as long as `lifetime` lives.
    fn subscribe(&self, lifetime: &Lifetime, callback: impl FnMut(&T) + 'static) -> Result<()> {
        self.add_subscriber(lifetime, Box::new(callback))
    }

    /// Like [`subscribe`](Self::subscribe), but each value comes with its
    /// own child lifetime, which is killed right before the next value is
    /// delivered to this subscriber (and when the subscription ends).
    fn subscribe_with_value_lifetime(
        &self,
        lifetime: &Lifetime,
        mut callback: impl FnMut(&T, &Lifetime) + 'static,
    ) -> Result<()> {
        let parent = lifetime.downgrade();
        let mut scope = ValueScope(None);
        self.add_subscriber(
            lifetime,
            Box::new(move |value| {
                scope.reset();
                let Some(parent) = parent.upgrade() else {
                    return;
                };
                match parent.new_dependent() {
                    Ok(value_lifetime) => {
                        scope.0 = Some(value_lifetime.clone());
                        callback(value, &value_lifetime);
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "value lifetime could not be created");
                    }
                }
            }),
        )
    }
}

impl<T: 'static, C: Conduit<T> + ?Sized> ConduitExt<T> for C {}

/// Kills the per-value lifetime it holds when reset or dropped.
struct ValueScope(Option<Lifetime>);

impl ValueScope {
    fn reset(&mut self) {
        if let Some(previous) = self.0.take() {
            previous.kill();
        }
    }
}

impl Drop for ValueScope {
    fn drop(&mut self) {
        self.reset();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
