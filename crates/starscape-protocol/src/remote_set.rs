#![forbid(unsafe_code)]

//! A set conduit mirroring a list-valued remote property.
//!
//! Each update of the property replaces the membership. Items that stay keep
//! their lifetime, items that leave have theirs killed, and new items get a
//! lifetime that also dies with the object they reference, if any.

use std::fmt;
use std::rc::{Rc, Weak};

use starscape_core::{
    ActivationHooks, Callback, Conduit, ConduitExt, CoreError, Lifetime, SetConduit, SetCore, SetMember,
    Subscriber,
};

use crate::property::Property;
use crate::value::Value;

struct RemoteSetInner {
    this: Weak<RemoteSetInner>,
    property: Property,
    set: SetCore<Value>,
}

impl RemoteSetInner {
    fn apply(&self, value: &Value, activation: &Lifetime) {
        let Some(items) = value.as_list() else {
            tracing::warn!(
                object = self.property.object_id(),
                member = self.property.name(),
                actual = value.type_name(),
                "remote set value is not a list, ignored"
            );
            return;
        };
        let outcome = self.set.reconcile(items.to_vec(), |item| {
            let lifetime = activation.new_dependent().ok()?;
            if let Value::Object(object) = item {
                if object.lifetime().add_dependent(&lifetime).is_err() {
                    lifetime.kill();
                    return None;
                }
            }
            Some(lifetime)
        });
        if !outcome.duplicates.is_empty() {
            tracing::warn!(
                object = self.property.object_id(),
                member = self.property.name(),
                duplicates = ?outcome.duplicates,
                "duplicate items in remote set update, first occurrence kept"
            );
        }
        tracing::trace!(
            object = self.property.object_id(),
            member = self.property.name(),
            added = outcome.added.len(),
            removed = outcome.removed.len(),
            "remote set reconciled"
        );
    }

    fn require_active(&self) -> starscape_core::Result<()> {
        if self.set.conduit().is_active() {
            Ok(())
        } else {
            Err(CoreError::Inactive { what: "remote set" })
        }
    }
}

impl ActivationHooks<SetMember<Value>> for RemoteSetInner {
    fn activate(&self, activation: &Lifetime) -> starscape_core::Result<()> {
        let object = self
            .property
            .object()
            .filter(|object| object.is_alive())
            .ok_or(CoreError::ConduitDestroyed { conduit: "remote set" })?;
        object.lifetime().add_dependent(activation)?;

        let this = self.this.clone();
        activation.add_callback(move || {
            if let Some(inner) = this.upgrade() {
                inner.set.clear();
            }
        })?;

        let this = self.this.clone();
        let weak_activation = activation.downgrade();
        self.property.subscribe(activation, move |value: &Value| {
            if let (Some(inner), Some(activation)) = (this.upgrade(), weak_activation.upgrade()) {
                inner.apply(value, &activation);
            }
        })
    }

    fn subscriber_added(&self, subscriber: &Subscriber<SetMember<Value>>) {
        self.set.send_existing(subscriber);
    }
}

/// Set of the items of a list-valued [`Property`].
///
/// While subscribed, the underlying property is subscribed too. Queries fail
/// with [`CoreError::Inactive`] while there are no subscribers, since the
/// membership is only known while updates flow.
#[derive(Clone)]
pub struct RemoteSet {
    inner: Rc<RemoteSetInner>,
}

impl RemoteSet {
    #[must_use]
    pub fn new(property: Property) -> Self {
        Self {
            inner: Rc::new_cyclic(|this| RemoteSetInner {
                this: this.clone(),
                property,
                set: SetCore::new("remote set"),
            }),
        }
    }

    #[must_use]
    pub fn property(&self) -> &Property {
        &self.inner.property
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.set.conduit().is_active()
    }

    pub fn len(&self) -> starscape_core::Result<usize> {
        self.inner.require_active()?;
        Ok(self.inner.set.len())
    }

    pub fn is_empty(&self) -> starscape_core::Result<bool> {
        self.len().map(|len| len == 0)
    }
}

impl Conduit<SetMember<Value>> for RemoteSet {
    fn add_subscriber(
        &self,
        lifetime: &Lifetime,
        callback: Callback<SetMember<Value>>,
    ) -> starscape_core::Result<()> {
        self.inner
            .set
            .conduit()
            .subscribe(lifetime, callback, &*self.inner)
            .map(drop)
    }
}

impl SetConduit<Value> for RemoteSet {
    fn has(&self, value: &Value) -> starscape_core::Result<bool> {
        self.inner.require_active()?;
        Ok(self.inner.set.contains(value))
    }

    fn keys(&self) -> starscape_core::Result<Vec<Value>> {
        self.inner.require_active()?;
        Ok(self.inner.set.values())
    }
}

impl fmt::Debug for RemoteSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSet")
            .field("object", &self.inner.property.object_id())
            .field("member", &self.inner.property.name())
            .field("set", &self.inner.set)
            .finish()
    }
}
