#![forbid(unsafe_code)]

//! Ownership scopes with cascading, idempotent teardown.
//!
//! A [`Lifetime`] owns a set of resources (callbacks, [`Disposable`] objects
//! and dependent lifetimes). Killing it disposes everything it owns exactly
//! once and marks it dead; nothing can be added afterwards.
//!
//! # Design
//!
//! `Lifetime` is a cheaply cloneable handle (`Rc` inside). Ownership edges are
//! explicit in both directions:
//!
//! - a parent owns each dependent strongly,
//! - each dependent records its parents weakly, together with the key under
//!   which the parent owns it.
//!
//! When a dependent dies it disowns itself from every parent, so a lifetime
//! that depends on several parents is disposed once and leaves no stale
//! entries behind.
//!
//! # Invariants
//!
//! 1. `kill()` is idempotent; the second call is a no-op.
//! 2. Adding to a dead lifetime fails with [`CoreError::DeadLifetime`].
//! 3. The owned set is snapshotted before disposal starts, so disposal
//!    callbacks may freely add to or disown from other lifetimes (including
//!    this one, which is already dead and ignores them).
//! 4. No order is guaranteed among resources disposed in the same cascade.
//! 5. Dropping the last handle to a lifetime that nothing else owns kills it.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use crate::error::{CoreError, Result};

// ─── Lifetime ID generation ──────────────────────────────────────────────────

static NEXT_LIFETIME_ID: AtomicU64 = AtomicU64::new(1);

fn next_lifetime_id() -> u64 {
    NEXT_LIFETIME_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Disposable ──────────────────────────────────────────────────────────────

/// Anything that can be torn down by a [`Lifetime`].
///
/// `dispose` may be called more than once by independent owners and must be
/// idempotent.
pub trait Disposable {
    fn dispose(&self);
}

/// Handle to a resource owned by a lifetime, used to [`disown`](Lifetime::disown) it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnKey(u64);

enum Owned {
    Callback(Box<dyn FnOnce()>),
    Disposable(Rc<dyn Disposable>),
    Dependent(Rc<LifetimeInner>),
}

impl Owned {
    fn dispose(self) {
        match self {
            Self::Callback(callback) => callback(),
            Self::Disposable(disposable) => disposable.dispose(),
            Self::Dependent(child) => child.kill(),
        }
    }
}

// ─── Inner shared state ──────────────────────────────────────────────────────

struct LifetimeInner {
    id: u64,
    next_key: Cell<u64>,
    /// `None` once dead.
    owned: RefCell<Option<BTreeMap<OwnKey, Owned>>>,
    /// Lifetimes this one is a dependent of, with the key each parent holds.
    parents: RefCell<SmallVec<[(Weak<LifetimeInner>, OwnKey); 2]>>,
}

impl LifetimeInner {
    fn new() -> Self {
        Self {
            id: next_lifetime_id(),
            next_key: Cell::new(0),
            owned: RefCell::new(Some(BTreeMap::new())),
            parents: RefCell::new(SmallVec::new()),
        }
    }

    fn is_alive(&self) -> bool {
        self.owned.borrow().is_some()
    }

    fn insert(&self, owned: Owned) -> Result<OwnKey> {
        let mut slot = self.owned.borrow_mut();
        match slot.as_mut() {
            Some(map) => {
                let key = OwnKey(self.next_key.get());
                self.next_key.set(key.0 + 1);
                map.insert(key, owned);
                Ok(key)
            }
            None => Err(CoreError::DeadLifetime { lifetime: self.id }),
        }
    }

    fn disown(&self, key: OwnKey) {
        let removed = self
            .owned
            .borrow_mut()
            .as_mut()
            .and_then(|map| map.remove(&key));
        // Dropped outside the borrow: releasing a dependent may run its teardown.
        drop(removed);
    }

    fn kill(&self) {
        let Some(owned) = self.owned.borrow_mut().take() else {
            return;
        };
        tracing::trace!(lifetime_id = self.id, owned = owned.len(), "lifetime killed");

        let parents = std::mem::take(&mut *self.parents.borrow_mut());
        for (parent, key) in parents {
            if let Some(parent) = parent.upgrade() {
                parent.disown(key);
            }
        }

        for (_, resource) in owned {
            resource.dispose();
        }
    }
}

impl Drop for LifetimeInner {
    fn drop(&mut self) {
        self.kill();
    }
}

// ─── Lifetime ────────────────────────────────────────────────────────────────

/// An ownership and disposal scope.
///
/// Cloning a `Lifetime` creates another handle to the **same** scope.
#[derive(Clone)]
pub struct Lifetime {
    inner: Rc<LifetimeInner>,
}

impl Lifetime {
    /// Create a new, live, root lifetime.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(LifetimeInner::new()),
        }
    }

    /// Process-unique identifier, used in log fields.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.is_alive()
    }

    /// Fails with [`CoreError::DeadLifetime`] if this lifetime has been killed.
    pub fn verify_alive(&self) -> Result<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(CoreError::DeadLifetime {
                lifetime: self.inner.id,
            })
        }
    }

    /// Take ownership of a disposable. It is disposed when this lifetime dies
    /// unless it is [disowned](Self::disown) first.
    pub fn add(&self, disposable: Rc<dyn Disposable>) -> Result<OwnKey> {
        self.inner.insert(Owned::Disposable(disposable))
    }

    /// Run `callback` when this lifetime dies.
    pub fn add_callback(&self, callback: impl FnOnce() + 'static) -> Result<OwnKey> {
        self.inner.insert(Owned::Callback(Box::new(callback)))
    }

    /// Make `child` a dependent of this lifetime: it dies when this one dies,
    /// but may die sooner, in which case it removes itself from here.
    ///
    /// A lifetime can be a dependent of any number of parents. Adding a child
    /// that is already dead (or is this lifetime itself) does nothing.
    pub fn add_dependent(&self, child: &Lifetime) -> Result<()> {
        self.verify_alive()?;
        if Rc::ptr_eq(&self.inner, &child.inner) || !child.is_alive() {
            return Ok(());
        }
        let already = child
            .inner
            .parents
            .borrow()
            .iter()
            .any(|(parent, _)| parent.as_ptr() == Rc::as_ptr(&self.inner));
        if already {
            return Ok(());
        }
        let key = self.inner.insert(Owned::Dependent(Rc::clone(&child.inner)))?;
        child
            .inner
            .parents
            .borrow_mut()
            .push((Rc::downgrade(&self.inner), key));
        Ok(())
    }

    /// Create a new lifetime that dies with this one.
    pub fn new_dependent(&self) -> Result<Lifetime> {
        let child = Lifetime::new();
        self.add_dependent(&child)?;
        Ok(child)
    }

    /// Remove a previously added resource without disposing it. Unknown keys
    /// and dead lifetimes are ignored.
    pub fn disown(&self, key: OwnKey) {
        self.inner.disown(key);
    }

    /// Dispose everything this lifetime owns and mark it dead.
    pub fn kill(&self) {
        self.inner.kill();
    }

    /// Alias for [`kill`](Self::kill).
    pub fn dispose(&self) {
        self.kill();
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakLifetime {
        WeakLifetime {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Whether both handles refer to the same scope.
    #[must_use]
    pub fn ptr_eq(&self, other: &Lifetime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of resources currently owned (zero once dead).
    #[must_use]
    pub fn owned_count(&self) -> usize {
        self.inner.owned.borrow().as_ref().map_or(0, BTreeMap::len)
    }
}

impl Default for Lifetime {
    fn default() -> Self {
        Self::new()
    }
}

impl Disposable for Lifetime {
    fn dispose(&self) {
        self.kill();
    }
}

impl PartialEq for Lifetime {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Lifetime {}

impl fmt::Debug for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifetime")
            .field("id", &self.inner.id)
            .field("alive", &self.is_alive())
            .field("owned", &self.owned_count())
            .finish()
    }
}

/// Non-owning handle to a [`Lifetime`].
#[derive(Clone, Default)]
pub struct WeakLifetime {
    inner: Weak<LifetimeInner>,
}

impl WeakLifetime {
    #[must_use]
    pub fn upgrade(&self) -> Option<Lifetime> {
        self.inner.upgrade().map(|inner| Lifetime { inner })
    }

    /// True if the lifetime still exists and has not been killed.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.upgrade().is_some_and(|inner| inner.is_alive())
    }
}

impl fmt::Debug for WeakLifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakLifetime")
            .field("alive", &self.is_alive())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
