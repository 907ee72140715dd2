#![forbid(unsafe_code)]

//! Remote signals: server-pushed events.
//!
//! A signal holds a server subscription while it has local subscribers.
//! Events carry no state, so nothing is cached between deliveries.

use std::fmt;
use std::rc::{Rc, Weak};

use starscape_core::{ActivationHooks, Callback, Conduit, ConduitCore, CoreError, Lifetime};

use crate::error::{ProtocolError, Result};
use crate::message::{Request, RequestMethod};
use crate::object::{Member, MemberHandle, MemberKind, ObjectInner};
use crate::runtime_type::{RuntimeType, validate};
use crate::value::Value;

struct SignalInner {
    object: Weak<ObjectInner>,
    object_id: u64,
    name: String,
    shape: RuntimeType,
    core: Rc<ConduitCore<Value>>,
}

impl SignalInner {
    fn live_object(&self) -> Option<Rc<ObjectInner>> {
        self.object.upgrade().filter(|object| object.is_alive())
    }
}

impl ActivationHooks<Value> for SignalInner {
    fn activate(&self, activation: &Lifetime) -> starscape_core::Result<()> {
        let object = self
            .live_object()
            .ok_or(CoreError::ConduitDestroyed { conduit: "signal" })?;
        object.lifetime().add_dependent(activation)?;

        let weak = self.object.clone();
        let (object_id, name) = (self.object_id, self.name.clone());
        activation.add_callback(move || {
            let Some(object) = weak.upgrade().filter(|object| object.is_alive()) else {
                return;
            };
            if let Err(err) = object.request(Request::new(RequestMethod::Unsubscribe, object_id, name.as_str())) {
                tracing::warn!(object = object_id, member = %name, error = %err, "unsubscribe failed");
            }
        })?;

        let request = Request::new(RequestMethod::Subscribe, self.object_id, self.name.as_str());
        if let Err(err) = object.request(request) {
            tracing::warn!(object = self.object_id, member = %self.name, error = %err, "subscribe failed");
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct Signal {
    inner: Rc<SignalInner>,
}

impl Signal {
    #[must_use]
    pub fn object_id(&self) -> u64 {
        self.inner.object_id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn shape(&self) -> &RuntimeType {
        &self.inner.shape
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.core.is_active()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.core.subscriber_count()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Signal) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn handle_event(&self, value: Value) -> Result<()> {
        let inner = &self.inner;
        let value = validate(&inner.shape, value).map_err(|err| {
            ProtocolError::member_type(inner.object_id, &inner.name, MemberKind::Signal, err)
        })?;
        inner.core.send_to_all(&value);
        Ok(())
    }

    pub(crate) fn destroy(&self) {
        self.inner.core.destroy();
    }
}

impl MemberHandle for Signal {
    const KIND: MemberKind = MemberKind::Signal;

    fn create(object: &Rc<ObjectInner>, name: &str, shape: RuntimeType) -> Self {
        Self {
            inner: Rc::new(SignalInner {
                object: Rc::downgrade(object),
                object_id: object.id(),
                name: name.to_owned(),
                shape,
                core: ConduitCore::new("signal"),
            }),
        }
    }

    fn from_member(member: &Member) -> Option<Self> {
        match member {
            Member::Signal(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn into_member(self) -> Member {
        Member::Signal(self)
    }

    fn shape(&self) -> &RuntimeType {
        &self.inner.shape
    }
}

impl Conduit<Value> for Signal {
    fn add_subscriber(&self, lifetime: &Lifetime, callback: Callback<Value>) -> starscape_core::Result<()> {
        self.inner
            .core
            .subscribe(lifetime, callback, &*self.inner)
            .map(drop)
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("object", &self.inner.object_id)
            .field("name", &self.inner.name)
            .field("shape", &self.inner.shape.name())
            .field("subscribers", &self.inner.core.subscriber_count())
            .finish()
    }
}
