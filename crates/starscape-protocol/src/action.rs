#![forbid(unsafe_code)]

//! Remote actions: fire-and-forget requests.
//!
//! An action has no server subscription. Local subscribers see every value
//! fired through this handle, after the request has been handed to the
//! session.

use std::fmt;
use std::rc::{Rc, Weak};

use starscape_core::{Callback, Conduit, ConduitCore, Lifetime, NoHooks};

use crate::error::{ProtocolError, Result};
use crate::message::{Request, RequestMethod};
use crate::object::{Member, MemberHandle, MemberKind, ObjectInner};
use crate::runtime_type::{RuntimeType, validate};
use crate::value::Value;

struct ActionInner {
    object: Weak<ObjectInner>,
    object_id: u64,
    name: String,
    shape: RuntimeType,
    core: Rc<ConduitCore<Value>>,
}

#[derive(Clone)]
pub struct Action {
    inner: Rc<ActionInner>,
}

impl Action {
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
    pub fn subscriber_count(&self) -> usize {
        self.inner.core.subscriber_count()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Action) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Validate `value`, send it to the server and notify local subscribers.
    pub fn fire(&self, value: impl Into<Value>) -> Result<()> {
        let inner = &self.inner;
        let object = inner
            .object
            .upgrade()
            .filter(|object| object.is_alive())
            .ok_or(ProtocolError::ObjectDestroyed { id: inner.object_id })?;
        let value = validate(&inner.shape, value.into()).map_err(|err| {
            ProtocolError::member_type(inner.object_id, &inner.name, MemberKind::Action, err)
        })?;
        object.request(
            Request::new(RequestMethod::Fire, inner.object_id, inner.name.as_str())
                .with_value(value.clone()),
        )?;
        inner.core.send_to_all(&value);
        Ok(())
    }

    pub(crate) fn destroy(&self) {
        self.inner.core.destroy();
    }
}

impl MemberHandle for Action {
    const KIND: MemberKind = MemberKind::Action;

    fn create(object: &Rc<ObjectInner>, name: &str, shape: RuntimeType) -> Self {
        Self {
            inner: Rc::new(ActionInner {
                object: Rc::downgrade(object),
                object_id: object.id(),
                name: name.to_owned(),
                shape,
                core: ConduitCore::new("action"),
            }),
        }
    }

    fn from_member(member: &Member) -> Option<Self> {
        match member {
            Member::Action(a) => Some(a.clone()),
            _ => None,
        }
    }

    fn into_member(self) -> Member {
        Member::Action(self)
    }

    fn shape(&self) -> &RuntimeType {
        &self.inner.shape
    }
}

impl Conduit<Value> for Action {
    fn add_subscriber(&self, lifetime: &Lifetime, callback: Callback<Value>) -> starscape_core::Result<()> {
        self.inner.core.subscribe(lifetime, callback, &NoHooks).map(drop)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("object", &self.inner.object_id)
            .field("name", &self.inner.name)
            .field("shape", &self.inner.shape.name())
            .finish()
    }
}
