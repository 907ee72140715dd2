#![forbid(unsafe_code)]

//! Set conduits: reactive collections where membership is the payload.
//!
//! Subscribers receive one [`SetMember`] per member, first for every current
//! member and then for each later addition. The member's lifetime is the
//! removal signal: it dies when the member leaves the set or the subscription
//! ends, whichever comes first.
//!
//! # Invariants
//!
//! 1. A value (by [`ValuesEqual`]) is a member at most once.
//! 2. Every member has its own item lifetime, distinct from the activation
//!    lifetime. Each subscriber gets a child of it that is also a dependent of
//!    the subscriber's lifetime.
//! 3. Removing a member kills its item lifetime, which cascades to every
//!    subscriber-scoped member lifetime.
//! 4. Re-adding a removed value creates a brand-new member.
//!
//! [`SetCore`] holds the membership logic; [`LocalSet`] and
//! [`FilterSetConduit`] (and remote sets elsewhere) are built on it.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::conduit::{ActivationHooks, Callback, Conduit, ConduitCore, ConduitExt, Subscriber};
use crate::equality::ValuesEqual;
use crate::error::{CoreError, Result};
use crate::lifetime::Lifetime;

/// One set member as seen by one subscriber.
#[derive(Debug, Clone)]
pub struct SetMember<T> {
    /// Dies when the value leaves the set or the subscription ends.
    pub lifetime: Lifetime,
    pub value: T,
}

/// A conduit of set members that can also be queried.
pub trait SetConduit<T: 'static>: Conduit<SetMember<T>> {
    fn has(&self, value: &T) -> Result<bool>;

    /// Current members in insertion order.
    fn keys(&self) -> Result<Vec<T>>;
}

/// Outcome of [`SetCore::reconcile`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled<T> {
    pub added: Vec<T>,
    pub removed: Vec<T>,
    /// Values that appeared more than once in the new membership. Only the
    /// first occurrence was kept.
    pub duplicates: Vec<T>,
}

impl<T> Default for Reconciled<T> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            removed: Vec::new(),
            duplicates: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// SetCore<T>
// ---------------------------------------------------------------------------

/// Membership storage and member delivery shared by set conduits.
///
/// Membership is kept in a `Vec` compared with [`ValuesEqual`], since
/// set values (numbers, object handles) are not generally hashable.
pub struct SetCore<T> {
    conduit: Rc<ConduitCore<SetMember<T>>>,
    items: RefCell<Vec<(T, Lifetime)>>,
}

impl<T: Clone + ValuesEqual + 'static> SetCore<T> {
    #[must_use]
    pub fn new(label: &'static str) -> Self {
        Self {
            conduit: ConduitCore::new(label),
            items: RefCell::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn conduit(&self) -> &Rc<ConduitCore<SetMember<T>>> {
        &self.conduit
    }

    #[must_use]
    pub fn contains(&self, value: &T) -> bool {
        self.prune();
        self.items
            .borrow()
            .iter()
            .any(|(member, _)| member.values_equal(value))
    }

    #[must_use]
    pub fn values(&self) -> Vec<T> {
        self.prune();
        self.items
            .borrow()
            .iter()
            .map(|(value, _)| value.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.prune();
        self.items.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add `value` with a fresh root item lifetime.
    pub fn insert(&self, value: T) -> bool {
        self.insert_with_lifetime(value, Lifetime::new())
    }

    /// Add `value` with the given item lifetime. If the value is already a
    /// member nothing changes and `false` is returned; the caller still owns
    /// `lifetime`.
    pub fn insert_with_lifetime(&self, value: T, lifetime: Lifetime) -> bool {
        if self.contains(&value) || !lifetime.is_alive() {
            return false;
        }
        self.items
            .borrow_mut()
            .push((value.clone(), lifetime.clone()));
        for subscriber in self.conduit.subscribers_snapshot() {
            Self::send_member(&lifetime, &subscriber, &value);
        }
        true
    }

    /// Remove `value`, killing its item lifetime.
    pub fn remove(&self, value: &T) -> bool {
        let removed = {
            let mut items = self.items.borrow_mut();
            items
                .iter()
                .position(|(member, _)| member.values_equal(value))
                .map(|index| items.remove(index))
        };
        match removed {
            Some((_, lifetime)) => {
                lifetime.kill();
                true
            }
            None => false,
        }
    }

    /// Remove every member.
    pub fn clear(&self) {
        let removed = std::mem::take(&mut *self.items.borrow_mut());
        for (_, lifetime) in removed {
            lifetime.kill();
        }
    }

    /// Send every current member to one (new) subscriber.
    pub fn send_existing(&self, subscriber: &Subscriber<SetMember<T>>) {
        self.prune();
        let items = self.items.borrow().clone();
        for (value, lifetime) in &items {
            Self::send_member(lifetime, subscriber, value);
        }
    }

    /// Replace the whole membership with `next`.
    ///
    /// Values already present keep their item lifetime. Departed values have
    /// theirs killed before any addition is delivered. `make_lifetime` gives a
    /// new value its item lifetime; returning `None` skips that value.
    pub fn reconcile(
        &self,
        next: Vec<T>,
        mut make_lifetime: impl FnMut(&T) -> Option<Lifetime>,
    ) -> Reconciled<T> {
        self.prune();
        let mut previous: Vec<Option<(T, Lifetime)>> = std::mem::take(&mut *self.items.borrow_mut())
            .into_iter()
            .map(Some)
            .collect();
        let mut kept: Vec<(T, Lifetime)> = Vec::with_capacity(next.len());
        let mut fresh: Vec<(T, Lifetime)> = Vec::new();
        let mut outcome = Reconciled::default();

        for value in next {
            if kept.iter().any(|(member, _)| member.values_equal(&value)) {
                outcome.duplicates.push(value);
                continue;
            }
            let existing = previous.iter_mut().find_map(|slot| {
                if slot
                    .as_ref()
                    .is_some_and(|(member, _)| member.values_equal(&value))
                {
                    slot.take()
                } else {
                    None
                }
            });
            if let Some(entry) = existing {
                kept.push(entry);
            } else if let Some(lifetime) = make_lifetime(&value) {
                kept.push((value.clone(), lifetime.clone()));
                fresh.push((value, lifetime));
            }
        }

        *self.items.borrow_mut() = kept;

        for (value, lifetime) in previous.into_iter().flatten() {
            lifetime.kill();
            outcome.removed.push(value);
        }
        let subscribers = self.conduit.subscribers_snapshot();
        for (value, lifetime) in fresh {
            for subscriber in &subscribers {
                Self::send_member(&lifetime, subscriber, &value);
            }
            outcome.added.push(value);
        }
        outcome
    }

    /// Drop members whose item lifetime died on its own.
    fn prune(&self) {
        let dead = {
            let mut items = self.items.borrow_mut();
            if items.iter().all(|(_, lifetime)| lifetime.is_alive()) {
                return;
            }
            let (live, dead): (Vec<_>, Vec<_>) =
                items.drain(..).partition(|(_, lifetime)| lifetime.is_alive());
            *items = live;
            dead
        };
        drop(dead);
    }

    fn send_member(item: &Lifetime, subscriber: &Subscriber<SetMember<T>>, value: &T) {
        let Some(owner) = subscriber.lifetime() else {
            return;
        };
        let Ok(member) = item.new_dependent() else {
            return;
        };
        if owner.add_dependent(&member).is_err() {
            member.kill();
            return;
        }
        subscriber.send(&SetMember {
            lifetime: member,
            value: value.clone(),
        });
    }
}

impl<T: Clone + ValuesEqual + 'static> ActivationHooks<SetMember<T>> for SetCore<T> {
    fn subscriber_added(&self, subscriber: &Subscriber<SetMember<T>>) {
        self.send_existing(subscriber);
    }
}

impl<T: fmt::Debug> fmt::Debug for SetCore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items = self.items.borrow();
        f.debug_struct("SetCore")
            .field("label", &self.conduit.label())
            .field("items", &items.iter().map(|(v, _)| v).collect::<Vec<_>>())
            .field("subscribers", &self.conduit.subscriber_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// LocalSet<T>
// ---------------------------------------------------------------------------

/// A locally mutable set conduit.
pub struct LocalSet<T> {
    core: Rc<SetCore<T>>,
}

impl<T> Clone for LocalSet<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for LocalSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LocalSet").field(&self.core).finish()
    }
}

impl<T: Clone + ValuesEqual + 'static> LocalSet<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: Rc::new(SetCore::new("local set")),
        }
    }

    /// Add a member. Returns `false` if it was already present.
    pub fn add(&self, value: T) -> bool {
        self.core.insert(value)
    }

    /// Remove a member. Returns `false` if it was absent.
    pub fn delete(&self, value: &T) -> bool {
        self.core.remove(value)
    }

    pub fn clear(&self) {
        self.core.clear();
    }

    #[must_use]
    pub fn contains(&self, value: &T) -> bool {
        self.core.contains(value)
    }

    #[must_use]
    pub fn values(&self) -> Vec<T> {
        self.core.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.core.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.core.is_empty()
    }
}

impl<T: Clone + ValuesEqual + 'static> Default for LocalSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + ValuesEqual + 'static> Conduit<SetMember<T>> for LocalSet<T> {
    fn add_subscriber(&self, lifetime: &Lifetime, callback: Callback<SetMember<T>>) -> Result<()> {
        self.core
            .conduit()
            .subscribe(lifetime, callback, &*self.core)
            .map(drop)
    }
}

impl<T: Clone + ValuesEqual + 'static> SetConduit<T> for LocalSet<T> {
    fn has(&self, value: &T) -> Result<bool> {
        Ok(self.core.contains(value))
    }

    fn keys(&self) -> Result<Vec<T>> {
        Ok(self.core.values())
    }
}

// ---------------------------------------------------------------------------
// FilterSetConduit<T>
// ---------------------------------------------------------------------------

type Filter<T> = Box<dyn Fn(&Lifetime, &T) -> Rc<dyn Conduit<bool>>>;

struct FilterInner<T> {
    this: Weak<FilterInner<T>>,
    set: SetCore<T>,
    source: Rc<dyn SetConduit<T>>,
    filter: Filter<T>,
}

/// Removes its value from the filtered set when the per-item boolean
/// subscription is dropped. Losing the boolean conduit and losing
/// membership upstream look the same downstream.
struct RemoveOnDrop<T: Clone + ValuesEqual + 'static> {
    target: Weak<FilterInner<T>>,
    value: T,
}

impl<T: Clone + ValuesEqual + 'static> Drop for RemoveOnDrop<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.target.upgrade() {
            inner.set.remove(&self.value);
        }
    }
}

impl<T: Clone + ValuesEqual + 'static> FilterInner<T> {
    fn track(&self, member: &SetMember<T>) {
        let included = (self.filter)(&member.lifetime, &member.value);
        let guard = RemoveOnDrop {
            target: self.this.clone(),
            value: member.value.clone(),
        };
        let source_member = member.lifetime.downgrade();
        let subscribed = included.subscribe(&member.lifetime, move |&keep: &bool| {
            let Some(inner) = guard.target.upgrade() else {
                return;
            };
            if !keep {
                inner.set.remove(&guard.value);
                return;
            }
            if inner.set.contains(&guard.value) {
                return;
            }
            let Some(parent) = source_member.upgrade() else {
                return;
            };
            if let Ok(item) = parent.new_dependent() {
                inner.set.insert_with_lifetime(guard.value.clone(), item);
            }
        });
        let kept_alive = subscribed.and_then(|()| {
            member
                .lifetime
                .add_callback(move || drop(included))
                .map(drop)
        });
        if let Err(err) = kept_alive {
            tracing::warn!(error = %err, "filter predicate could not be subscribed");
        }
    }
}

impl<T: Clone + ValuesEqual + 'static> ActivationHooks<SetMember<T>> for FilterInner<T> {
    fn activate(&self, activation: &Lifetime) -> Result<()> {
        let this = self.this.clone();
        activation.add_callback(move || {
            if let Some(inner) = this.upgrade() {
                inner.set.clear();
            }
        })?;
        let this = self.this.clone();
        self.source
            .subscribe(activation, move |member: &SetMember<T>| {
                if let Some(inner) = this.upgrade() {
                    inner.track(member);
                }
            })
    }

    fn subscriber_added(&self, subscriber: &Subscriber<SetMember<T>>) {
        self.set.send_existing(subscriber);
    }
}

/// The subset of a source set whose per-item boolean conduit is `true`.
///
/// Demand-driven: the source and every predicate are only subscribed while
/// this conduit has subscribers, and [`has`](SetConduit::has) /
/// [`keys`](SetConduit::keys) fail while it has none.
pub struct FilterSetConduit<T> {
    inner: Rc<FilterInner<T>>,
}

impl<T> Clone for FilterSetConduit<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for FilterSetConduit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FilterSetConduit").field(&self.inner.set).finish()
    }
}

impl<T: Clone + ValuesEqual + 'static> FilterSetConduit<T> {
    /// `filter` is called once per source member, with that member's
    /// lifetime, and returns the conduit deciding whether it is included.
    pub fn new(
        source: Rc<dyn SetConduit<T>>,
        filter: impl Fn(&Lifetime, &T) -> Rc<dyn Conduit<bool>> + 'static,
    ) -> Self {
        Self {
            inner: Rc::new_cyclic(|this| FilterInner {
                this: this.clone(),
                set: SetCore::new("filter set"),
                source,
                filter: Box::new(filter),
            }),
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.set.conduit().is_active()
    }

    fn verify_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(CoreError::Inactive { what: "filter set" })
        }
    }
}

impl<T: Clone + ValuesEqual + 'static> Conduit<SetMember<T>> for FilterSetConduit<T> {
    fn add_subscriber(&self, lifetime: &Lifetime, callback: Callback<SetMember<T>>) -> Result<()> {
        self.inner
            .set
            .conduit()
            .subscribe(lifetime, callback, &*self.inner)
            .map(drop)
    }
}

impl<T: Clone + ValuesEqual + 'static> SetConduit<T> for FilterSetConduit<T> {
    fn has(&self, value: &T) -> Result<bool> {
        self.verify_active()?;
        Ok(self.inner.set.contains(value))
    }

    fn keys(&self) -> Result<Vec<T>> {
        self.verify_active()?;
        Ok(self.inner.set.values())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalProperty;
    use std::collections::HashMap;

    type Members<T> = Rc<RefCell<Vec<SetMember<T>>>>;

    fn collect<T: Clone + 'static>(set: &impl Conduit<SetMember<T>>, lt: &Lifetime) -> Members<T> {
        let members = Rc::new(RefCell::new(Vec::new()));
        let m = Rc::clone(&members);
        set.subscribe(lt, move |member: &SetMember<T>| m.borrow_mut().push(member.clone()))
            .unwrap();
        members
    }

    fn live_values<T: Clone>(members: &Members<T>) -> Vec<T> {
        members
            .borrow()
            .iter()
            .filter(|m| m.lifetime.is_alive())
            .map(|m| m.value.clone())
            .collect()
    }

    #[test]
    fn subscriber_receives_existing_then_new_members() {
        let set = LocalSet::new();
        set.add(1);
        set.add(2);
        let lt = Lifetime::new();
        let members = collect(&set, &lt);
        assert_eq!(live_values(&members), vec![1, 2]);
        set.add(3);
        assert_eq!(live_values(&members), vec![1, 2, 3]);
    }

    #[test]
    fn duplicate_add_is_ignored() {
        let set = LocalSet::new();
        let lt = Lifetime::new();
        let members = collect(&set, &lt);
        assert!(set.add(4));
        assert!(!set.add(4));
        assert_eq!(members.borrow().len(), 1);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn removal_kills_only_that_member() {
        let set = LocalSet::new();
        set.add("a".to_string());
        set.add("b".to_string());
        let lt = Lifetime::new();
        let members = collect(&set, &lt);
        assert!(set.delete(&"a".to_string()));
        assert!(!members.borrow()[0].lifetime.is_alive());
        assert!(members.borrow()[1].lifetime.is_alive());
        assert!(!set.delete(&"a".to_string()));
    }

    #[test]
    fn readding_creates_a_new_member() {
        let set = LocalSet::new();
        let lt = Lifetime::new();
        let members = collect(&set, &lt);
        set.add(1);
        set.delete(&1);
        set.add(1);
        let members = members.borrow();
        assert_eq!(members.len(), 2);
        assert!(!members[0].lifetime.is_alive());
        assert!(members[1].lifetime.is_alive());
        assert!(!members[0].lifetime.ptr_eq(&members[1].lifetime));
    }

    #[test]
    fn member_lifetimes_are_per_subscriber() {
        let set = LocalSet::new();
        set.add(1);
        let lt_a = Lifetime::new();
        let lt_b = Lifetime::new();
        let a = collect(&set, &lt_a);
        let b = collect(&set, &lt_b);
        lt_a.kill();
        assert!(!a.borrow()[0].lifetime.is_alive());
        assert!(b.borrow()[0].lifetime.is_alive());
        assert!(set.contains(&1));
    }

    #[test]
    fn clear_kills_every_member() {
        let set = LocalSet::new();
        set.add(1);
        set.add(2);
        let lt = Lifetime::new();
        let members = collect(&set, &lt);
        set.clear();
        assert!(live_values(&members).is_empty());
        assert!(set.is_empty());
    }

    #[test]
    fn reconcile_keeps_matches_and_reports_changes() {
        let core = SetCore::new("test");
        core.reconcile(vec![5, 7], |_| Some(Lifetime::new()));
        let outcome = core.reconcile(vec![7, 9, 9], |_| Some(Lifetime::new()));
        assert_eq!(outcome.removed, vec![5]);
        assert_eq!(outcome.added, vec![9]);
        assert_eq!(outcome.duplicates, vec![9]);
        assert_eq!(core.values(), vec![7, 9]);
    }

    #[test]
    fn reconcile_delivers_removals_before_additions() {
        let core = Rc::new(SetCore::new("test"));
        core.reconcile(vec![5, 7], |_| Some(Lifetime::new()));
        let lt = Lifetime::new();
        let events = Rc::new(RefCell::new(Vec::new()));
        let e = Rc::clone(&events);
        core.conduit()
            .subscribe(
                &lt,
                Box::new(move |member: &SetMember<i32>| {
                    let value = member.value;
                    let e2 = Rc::clone(&e);
                    member
                        .lifetime
                        .add_callback(move || e2.borrow_mut().push(format!("-{value}")))
                        .unwrap();
                    e.borrow_mut().push(format!("+{value}"));
                }),
                &*core,
            )
            .unwrap();
        events.borrow_mut().clear();
        core.reconcile(vec![7, 9], |_| Some(Lifetime::new()));
        assert_eq!(*events.borrow(), vec!["-5".to_string(), "+9".to_string()]);
    }

    #[test]
    fn member_with_dead_item_lifetime_is_pruned() {
        let core = SetCore::new("test");
        let item = Lifetime::new();
        assert!(core.insert_with_lifetime(1, item.clone()));
        item.kill();
        assert!(!core.contains(&1));
        assert!(core.insert(1));
    }

    fn filtered_fixture() -> (LocalSet<i32>, Rc<RefCell<HashMap<i32, LocalProperty<bool>>>>, FilterSetConduit<i32>) {
        let source = LocalSet::new();
        let flags: Rc<RefCell<HashMap<i32, LocalProperty<bool>>>> = Rc::default();
        let f = Rc::clone(&flags);
        let filtered = FilterSetConduit::new(Rc::new(source.clone()), move |_, value: &i32| {
            let flag = f
                .borrow_mut()
                .entry(*value)
                .or_insert_with(|| LocalProperty::new(true))
                .clone();
            Rc::new(flag) as Rc<dyn Conduit<bool>>
        });
        (source, flags, filtered)
    }

    #[test]
    fn filter_false_removes_and_true_readds() {
        let (source, flags, filtered) = filtered_fixture();
        source.add(1);
        source.add(2);
        let lt = Lifetime::new();
        let members = collect(&filtered, &lt);
        assert_eq!(filtered.keys().unwrap(), vec![1, 2]);

        flags.borrow()[&1].set(false);
        assert_eq!(filtered.keys().unwrap(), vec![2]);
        assert_eq!(live_values(&members), vec![2]);

        flags.borrow()[&1].set(true);
        assert!(filtered.has(&1).unwrap());
        assert_eq!(live_values(&members), vec![2, 1]);
    }

    #[test]
    fn filter_follows_source_removal() {
        let (source, flags, filtered) = filtered_fixture();
        source.add(1);
        let lt = Lifetime::new();
        let members = collect(&filtered, &lt);
        source.delete(&1);
        assert!(!filtered.has(&1).unwrap());
        assert!(live_values(&members).is_empty());
        assert_eq!(flags.borrow()[&1].subscriber_count(), 0);
    }

    #[test]
    fn filter_is_demand_driven() {
        let (source, flags, filtered) = filtered_fixture();
        source.add(1);
        assert_eq!(
            filtered.has(&1).unwrap_err(),
            CoreError::Inactive { what: "filter set" }
        );
        assert!(flags.borrow().is_empty());

        let lt = Lifetime::new();
        let _members = collect(&filtered, &lt);
        assert_eq!(flags.borrow()[&1].subscriber_count(), 1);

        lt.kill();
        assert!(!filtered.is_active());
        assert!(filtered.keys().is_err());
        assert_eq!(flags.borrow()[&1].subscriber_count(), 0);
    }
}
