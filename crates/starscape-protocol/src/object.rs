#![forbid(unsafe_code)]

//! Handles to objects living on the server.
//!
//! A [`RemoteObject`] is created by the [`Connection`] the first time its id
//! is seen (or asked for), and owns its named members. Members are created
//! lazily on first request and memoized by name, so asking twice for the
//! same property returns the same conduit.
//!
//! # Invariants
//!
//! 1. A name is bound to one member kind and one shape for the lifetime of
//!    the object; asking for it as something else is an error naming both.
//! 2. The object's lifetime is a dependent of the connection's lifetime.
//!    When it dies every member is destroyed and the object stops issuing
//!    requests.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use starscape_core::Lifetime;

use crate::action::Action;
use crate::connection::{Connection, ConnectionInner};
use crate::error::{ProtocolError, Result};
use crate::message::Request;
use crate::property::Property;
use crate::runtime_type::RuntimeType;
use crate::signal::Signal;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Property,
    Action,
    Signal,
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Property => "property",
            Self::Action => "action",
            Self::Signal => "signal",
        })
    }
}

#[derive(Clone)]
pub(crate) enum Member {
    Property(Property),
    Action(Action),
    Signal(Signal),
}

impl Member {
    fn kind(&self) -> MemberKind {
        match self {
            Self::Property(_) => MemberKind::Property,
            Self::Action(_) => MemberKind::Action,
            Self::Signal(_) => MemberKind::Signal,
        }
    }

    fn destroy(&self) {
        match self {
            Self::Property(p) => p.destroy(),
            Self::Action(a) => a.destroy(),
            Self::Signal(s) => s.destroy(),
        }
    }
}

/// Typed access to one variant of [`Member`].
pub(crate) trait MemberHandle: Clone + Sized {
    const KIND: MemberKind;

    fn create(object: &Rc<ObjectInner>, name: &str, shape: RuntimeType) -> Self;
    fn from_member(member: &Member) -> Option<Self>;
    fn into_member(self) -> Member;
    fn shape(&self) -> &RuntimeType;
}

/// Which inbound message is being routed to a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Update,
    Reply,
    Event,
}

impl Delivery {
    fn mtype(self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Reply => "value",
            Self::Event => "event",
        }
    }
}

// ---------------------------------------------------------------------------
// ObjectInner
// ---------------------------------------------------------------------------

pub(crate) struct ObjectInner {
    id: u64,
    connection: Weak<ConnectionInner>,
    lifetime: Lifetime,
    members: RefCell<AHashMap<String, Member>>,
}

impl ObjectInner {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.lifetime.is_alive()
    }

    pub(crate) fn verify_alive(&self) -> Result<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(ProtocolError::ObjectDestroyed { id: self.id })
        }
    }

    /// Send a request on behalf of one of this object's members.
    pub(crate) fn request(&self, request: Request) -> Result<()> {
        self.verify_alive()?;
        let connection = self
            .connection
            .upgrade()
            .ok_or(ProtocolError::ObjectDestroyed { id: self.id })?;
        connection.send_request(&request)
    }

    fn teardown(&self) {
        let members = std::mem::take(&mut *self.members.borrow_mut());
        tracing::debug!(object = self.id, members = members.len(), "object destroyed");
        for member in members.values() {
            member.destroy();
        }
    }
}

// ---------------------------------------------------------------------------
// RemoteObject
// ---------------------------------------------------------------------------

/// A handle to an object on the server.
///
/// Cloning a `RemoteObject` creates another handle to the **same** object;
/// equality is identity.
#[derive(Clone)]
pub struct RemoteObject {
    inner: Rc<ObjectInner>,
}

impl RemoteObject {
    pub(crate) fn new(connection: Weak<ConnectionInner>, id: u64, lifetime: Lifetime) -> Result<Self> {
        let inner = Rc::new(ObjectInner {
            id,
            connection,
            lifetime,
            members: RefCell::new(AHashMap::new()),
        });
        let weak = Rc::downgrade(&inner);
        inner.lifetime.add_callback(move || {
            if let Some(inner) = weak.upgrade() {
                inner.teardown();
            }
        })?;
        Ok(Self { inner })
    }

    pub(crate) fn from_inner(inner: Rc<ObjectInner>) -> Self {
        Self { inner }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Dies when the object is destroyed or the connection closes.
    #[must_use]
    pub fn lifetime(&self) -> &Lifetime {
        &self.inner.lifetime
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.is_alive()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &RemoteObject) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn connection(&self) -> Option<Connection> {
        self.inner.connection.upgrade().map(Connection::from_inner)
    }

    /// The property `name`, created on first request.
    pub fn property(&self, name: &str, shape: RuntimeType) -> Result<Property> {
        self.member(name, shape)
    }

    /// The action `name`, created on first request.
    pub fn action(&self, name: &str, shape: RuntimeType) -> Result<Action> {
        self.member(name, shape)
    }

    /// The signal `name`, created on first request.
    pub fn signal(&self, name: &str, shape: RuntimeType) -> Result<Signal> {
        self.member(name, shape)
    }

    /// Kind of the member `name`, if it has been requested.
    #[must_use]
    pub fn member_kind(&self, name: &str) -> Option<MemberKind> {
        self.inner.members.borrow().get(name).map(Member::kind)
    }

    fn member<M: MemberHandle>(&self, name: &str, shape: RuntimeType) -> Result<M> {
        self.inner.verify_alive()?;
        let existing = self.inner.members.borrow().get(name).cloned();
        if let Some(existing) = existing {
            let Some(member) = M::from_member(&existing) else {
                return Err(ProtocolError::MemberKindMismatch {
                    id: self.inner.id,
                    name: name.to_owned(),
                    requested: M::KIND,
                    existing: existing.kind(),
                });
            };
            if *member.shape() != shape {
                return Err(ProtocolError::ShapeMismatch {
                    id: self.inner.id,
                    name: name.to_owned(),
                    kind: M::KIND,
                    requested: shape.name(),
                    existing: member.shape().name(),
                });
            }
            return Ok(member);
        }

        let member = M::create(&self.inner, name, shape);
        self.inner
            .members
            .borrow_mut()
            .insert(name.to_owned(), member.clone().into_member());
        let kind = M::KIND;
        tracing::trace!(object = self.inner.id, member = name, %kind, "member created");
        Ok(member)
    }

    /// Hand an inbound value to the member it is addressed to.
    pub(crate) fn deliver(&self, delivery: Delivery, name: &str, value: Value) -> Result<()> {
        let member = self.inner.members.borrow().get(name).cloned();
        match (delivery, member) {
            (Delivery::Update, Some(Member::Property(property))) => property.handle_update(value),
            (Delivery::Reply, Some(Member::Property(property))) => property.handle_get_reply(value),
            (Delivery::Event, Some(Member::Signal(signal))) => signal.handle_event(value),
            (delivery, Some(other)) => Err(ProtocolError::malformed(format!(
                "{}.{name} is a {}, it can not receive {}",
                self.inner.id,
                other.kind(),
                delivery.mtype()
            ))),
            (_, None) => Err(ProtocolError::UnknownMember {
                id: self.inner.id,
                name: name.to_owned(),
            }),
        }
    }
}

impl PartialEq for RemoteObject {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for RemoteObject {}

impl fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteObject")
            .field("id", &self.inner.id)
            .field("alive", &self.is_alive())
            .field("members", &self.inner.members.borrow().len())
            .finish()
    }
}
