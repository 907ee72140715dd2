#![forbid(unsafe_code)]

//! Remote properties.
//!
//! While a [`Property`] has subscribers it holds a server subscription and
//! caches the last known value. Without subscribers nothing is cached, since
//! no updates arrive to keep a cache fresh.
//!
//! # Invariants
//!
//! 1. `subscribe` is sent on the 0→1 transition and `unsubscribe` on 1→0,
//!    unless the object is already dead.
//! 2. At most one `get` is in flight; further [`Property::get_then`] calls
//!    join it and are resolved together.
//! 3. [`Property::set`] applies the new value locally right away. There is no
//!    rollback if the server rejects it.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use starscape_core::{
    ActivationHooks, Callback, Conduit, ConduitCore, ConduitExt, CoreError, Lifetime, OwnKey, Subscriber,
    ValuesEqual, WeakLifetime,
};

use crate::error::{ProtocolError, Result};
use crate::message::{Request, RequestMethod};
use crate::object::{Member, MemberHandle, MemberKind, ObjectInner, RemoteObject};
use crate::runtime_type::{RuntimeType, validate};
use crate::value::Value;

struct Waiter {
    id: u64,
    lifetime: WeakLifetime,
    key: OwnKey,
    callback: Box<dyn FnOnce(&Value)>,
}

pub(crate) struct PropertyInner {
    this: Weak<PropertyInner>,
    object: Weak<ObjectInner>,
    object_id: u64,
    name: String,
    shape: RuntimeType,
    core: Rc<ConduitCore<Value>>,
    value: RefCell<Option<Value>>,
    pending_get: Cell<bool>,
    waiters: RefCell<Vec<Waiter>>,
    next_waiter: Cell<u64>,
}

impl PropertyInner {
    fn live_object(&self) -> Result<Rc<ObjectInner>> {
        self.object
            .upgrade()
            .filter(|object| object.is_alive())
            .ok_or(ProtocolError::ObjectDestroyed { id: self.object_id })
    }

    fn request(&self, method: RequestMethod, value: Option<Value>) -> Result<()> {
        let mut request = Request::new(method, self.object_id, self.name.as_str());
        request.value = value;
        self.live_object()?.request(request)
    }

    fn apply(&self, value: Value) {
        if self.core.is_active() {
            *self.value.borrow_mut() = Some(value.clone());
        }
        self.resolve_waiters(&value);
        self.core.send_to_all(&value);
    }

    fn resolve_waiters(&self, value: &Value) {
        let waiters = std::mem::take(&mut *self.waiters.borrow_mut());
        for waiter in waiters {
            let Some(lifetime) = waiter.lifetime.upgrade().filter(Lifetime::is_alive) else {
                continue;
            };
            lifetime.disown(waiter.key);
            (waiter.callback)(value);
        }
    }

    fn cancel_waiter(&self, id: u64) {
        let removed = {
            let mut waiters = self.waiters.borrow_mut();
            waiters
                .iter()
                .position(|w| w.id == id)
                .map(|index| waiters.remove(index))
        };
        drop(removed);
    }

    fn deactivated(&self) {
        let stale = self.value.borrow_mut().take();
        drop(stale);
        if self.live_object().is_err() {
            return;
        }
        if let Err(err) = self.request(RequestMethod::Unsubscribe, None) {
            tracing::warn!(object = self.object_id, member = %self.name, error = %err, "unsubscribe failed");
        }
    }
}

impl ActivationHooks<Value> for PropertyInner {
    fn activate(&self, activation: &Lifetime) -> starscape_core::Result<()> {
        let object = self
            .live_object()
            .map_err(|_| CoreError::ConduitDestroyed { conduit: "property" })?;
        object.lifetime().add_dependent(activation)?;
        let this = self.this.clone();
        activation.add_callback(move || {
            if let Some(inner) = this.upgrade() {
                inner.deactivated();
            }
        })?;
        if let Err(err) = self.request(RequestMethod::Subscribe, None) {
            tracing::warn!(object = self.object_id, member = %self.name, error = %err, "subscribe failed");
        }
        Ok(())
    }

    fn subscriber_added(&self, subscriber: &Subscriber<Value>) {
        let value = self.value.borrow().clone();
        if let Some(value) = value {
            subscriber.send(&value);
        }
    }
}

/// A named, subscribable value on a remote object.
#[derive(Clone)]
pub struct Property {
    inner: Rc<PropertyInner>,
}

impl Property {
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
    pub fn object(&self) -> Option<RemoteObject> {
        self.inner.object.upgrade().map(RemoteObject::from_inner)
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
    pub fn ptr_eq(&self, other: &Property) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The last known value. Always `None` while unsubscribed, and right
    /// after subscribing until the first update arrives.
    pub fn cached_value(&self) -> Result<Option<Value>> {
        self.inner.live_object()?;
        Ok(self.inner.value.borrow().clone())
    }

    /// Write `value` to the server and apply it locally without waiting for
    /// confirmation. Does nothing if it equals the cached value.
    pub fn set(&self, value: impl Into<Value>) -> Result<()> {
        let inner = &self.inner;
        inner.live_object()?;
        let value = validate(&inner.shape, value.into()).map_err(|err| {
            ProtocolError::member_type(inner.object_id, &inner.name, MemberKind::Property, err)
        })?;
        let unchanged = inner
            .value
            .borrow()
            .as_ref()
            .is_some_and(|current| current.values_equal(&value));
        if unchanged {
            return Ok(());
        }
        inner.request(RequestMethod::Set, Some(value.clone()))?;
        inner.apply(value);
        Ok(())
    }

    /// Call `callback` once with the current value.
    ///
    /// A cached value is delivered immediately. Otherwise a `get` is sent (or
    /// an outstanding one joined) and `callback` runs when the reply, or an
    /// earlier update, arrives. Killing `lifetime` first abandons the
    /// callback; the request itself is not cancelled.
    pub fn get_then(&self, lifetime: &Lifetime, callback: impl FnOnce(&Value) + 'static) -> Result<()> {
        let inner = &self.inner;
        inner.live_object()?;
        lifetime.verify_alive()?;
        let cached = inner.value.borrow().clone();
        if let Some(value) = cached {
            callback(&value);
            return Ok(());
        }

        let id = inner.next_waiter.get();
        inner.next_waiter.set(id + 1);
        let weak = inner.this.clone();
        let key = lifetime.add_callback(move || {
            if let Some(inner) = weak.upgrade() {
                inner.cancel_waiter(id);
            }
        })?;
        inner.waiters.borrow_mut().push(Waiter {
            id,
            lifetime: lifetime.downgrade(),
            key,
            callback: Box::new(callback),
        });

        if !inner.pending_get.replace(true) {
            if let Err(err) = inner.request(RequestMethod::Get, None) {
                inner.pending_get.set(false);
                inner.cancel_waiter(id);
                lifetime.disown(key);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Stay subscribed for as long as `lifetime` lives and return a function
    /// reading the cached value.
    pub fn getter(&self, lifetime: &Lifetime) -> Result<impl Fn() -> Option<Value> + use<>> {
        self.inner.live_object()?;
        self.subscribe(lifetime, |_: &Value| {})?;
        let weak = Rc::downgrade(&self.inner);
        Ok(move || weak.upgrade().and_then(|inner| inner.value.borrow().clone()))
    }

    /// Number of `get_then` callbacks still waiting for a value.
    #[must_use]
    pub fn pending_callbacks(&self) -> usize {
        self.inner.waiters.borrow().len()
    }

    pub(crate) fn handle_update(&self, value: Value) -> Result<()> {
        let inner = &self.inner;
        let value = validate(&inner.shape, value).map_err(|err| {
            ProtocolError::member_type(inner.object_id, &inner.name, MemberKind::Property, err)
        })?;
        inner.apply(value);
        Ok(())
    }

    pub(crate) fn handle_get_reply(&self, value: Value) -> Result<()> {
        self.inner.pending_get.set(false);
        self.handle_update(value)
    }

    pub(crate) fn destroy(&self) {
        let inner = &self.inner;
        inner.core.destroy();
        inner.pending_get.set(false);
        let stale = inner.value.borrow_mut().take();
        drop(stale);
        let waiters = std::mem::take(&mut *inner.waiters.borrow_mut());
        for waiter in waiters {
            if let Some(lifetime) = waiter.lifetime.upgrade() {
                lifetime.disown(waiter.key);
            }
        }
    }
}

impl MemberHandle for Property {
    const KIND: MemberKind = MemberKind::Property;

    fn create(object: &Rc<ObjectInner>, name: &str, shape: RuntimeType) -> Self {
        Self {
            inner: Rc::new_cyclic(|this| PropertyInner {
                this: this.clone(),
                object: Rc::downgrade(object),
                object_id: object.id(),
                name: name.to_owned(),
                shape,
                core: ConduitCore::new("property"),
                value: RefCell::new(None),
                pending_get: Cell::new(false),
                waiters: RefCell::new(Vec::new()),
                next_waiter: Cell::new(0),
            }),
        }
    }

    fn from_member(member: &Member) -> Option<Self> {
        match member {
            Member::Property(p) => Some(p.clone()),
            _ => None,
        }
    }

    fn into_member(self) -> Member {
        Member::Property(self)
    }

    fn shape(&self) -> &RuntimeType {
        &self.inner.shape
    }
}

impl Conduit<Value> for Property {
    fn add_subscriber(&self, lifetime: &Lifetime, callback: Callback<Value>) -> starscape_core::Result<()> {
        self.inner
            .core
            .subscribe(lifetime, callback, &*self.inner)
            .map(drop)
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("object", &self.inner.object_id)
            .field("name", &self.inner.name)
            .field("shape", &self.inner.shape.name())
            .field("value", &*self.inner.value.borrow())
            .field("subscribers", &self.inner.core.subscriber_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::connection::Connection;
    use crate::session::RecordingTransport;
    use serde_json::json;

    fn setup() -> (Connection, RecordingTransport, Property) {
        let transport = RecordingTransport::new();
        let conn = Connection::new(transport.clone(), ConnectionConfig::default());
        conn.handle_open();
        let prop = conn
            .root()
            .unwrap()
            .property("name", RuntimeType::String)
            .unwrap();
        (conn, transport, prop)
    }

    fn update(conn: &Connection, mtype: &str, value: serde_json::Value) {
        let packet = json!({"mtype": mtype, "object": 1, "property": "name", "value": value});
        conn.handle_packet(packet.to_string().as_bytes());
    }

    #[test]
    fn subscribe_and_unsubscribe_requests() {
        let (_conn, transport, prop) = setup();
        let lt1 = Lifetime::new();
        let lt2 = Lifetime::new();
        prop.subscribe(&lt1, |_: &Value| {}).unwrap();
        prop.subscribe(&lt2, |_: &Value| {}).unwrap();
        assert_eq!(
            transport.take_messages(),
            vec![json!({"mtype": "subscribe", "object": 1, "property": "name"})]
        );
        lt1.kill();
        assert!(transport.take_messages().is_empty());
        lt2.kill();
        assert_eq!(
            transport.take_messages(),
            vec![json!({"mtype": "unsubscribe", "object": 1, "property": "name"})]
        );
    }

    #[test]
    fn cache_only_while_subscribed() {
        let (conn, _transport, prop) = setup();
        let lt = Lifetime::new();
        prop.subscribe(&lt, |_: &Value| {}).unwrap();
        assert_eq!(prop.cached_value().unwrap(), None);
        update(&conn, "update", json!("Foo"));
        assert_eq!(prop.cached_value().unwrap(), Some(Value::from("Foo")));
        lt.kill();
        assert_eq!(prop.cached_value().unwrap(), None);
    }

    #[test]
    fn late_subscriber_gets_cached_value() {
        let (conn, _transport, prop) = setup();
        let lt = Lifetime::new();
        prop.subscribe(&lt, |_: &Value| {}).unwrap();
        update(&conn, "update", json!("Foo"));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        prop.subscribe(&lt, move |v: &Value| s.borrow_mut().push(v.clone()))
            .unwrap();
        assert_eq!(*seen.borrow(), vec![Value::from("Foo")]);
    }

    #[test]
    fn set_is_optimistic_and_deduplicated() {
        let (conn, transport, prop) = setup();
        let lt = Lifetime::new();
        prop.subscribe(&lt, |_: &Value| {}).unwrap();
        update(&conn, "update", json!("Foo"));
        transport.take_messages();

        prop.set("Bar").unwrap();
        assert_eq!(prop.cached_value().unwrap(), Some(Value::from("Bar")));
        prop.set("Bar").unwrap();
        assert_eq!(
            transport.take_messages(),
            vec![json!({"mtype": "set", "object": 1, "property": "name", "value": "Bar"})]
        );
    }

    #[test]
    fn set_from_subscriber_reaches_every_subscriber_after_update() {
        let (conn, transport, prop) = setup();
        let lt = Lifetime::new();
        let views = Rc::new(RefCell::new(Vec::new()));
        let v = Rc::clone(&views);
        let p = prop.clone();
        prop.subscribe(&lt, move |value: &Value| {
            v.borrow_mut().push(("normalizer", value.clone()));
            if value.as_str() == Some("foo") {
                p.set("Foo").unwrap();
            }
        })
        .unwrap();
        let v = Rc::clone(&views);
        prop.subscribe(&lt, move |value: &Value| v.borrow_mut().push(("reader", value.clone())))
            .unwrap();
        transport.take_messages();

        update(&conn, "update", json!("foo"));
        assert_eq!(
            *views.borrow(),
            vec![
                ("normalizer", Value::from("foo")),
                ("reader", Value::from("foo")),
                ("normalizer", Value::from("Foo")),
                ("reader", Value::from("Foo")),
            ]
        );
        assert_eq!(prop.cached_value().unwrap(), Some(Value::from("Foo")));
        assert_eq!(
            transport.take_messages(),
            vec![json!({"mtype": "set", "object": 1, "property": "name", "value": "Foo"})]
        );
    }

    #[test]
    fn set_validates_shape() {
        let (_conn, transport, prop) = setup();
        let err = prop.set(5).unwrap_err();
        assert_eq!(err.to_string(), "1.name property: expected string, got number");
        assert!(transport.take_messages().is_empty());
    }

    #[test]
    fn get_then_coalesces_requests() {
        let (conn, transport, prop) = setup();
        let lt = Lifetime::new();
        let results = Rc::new(RefCell::new(Vec::new()));
        for tag in ["a", "b"] {
            let r = Rc::clone(&results);
            prop.get_then(&lt, move |v: &Value| r.borrow_mut().push((tag, v.clone())))
                .unwrap();
        }
        assert_eq!(
            transport.take_messages(),
            vec![json!({"mtype": "get", "object": 1, "property": "name"})]
        );
        assert_eq!(prop.pending_callbacks(), 2);

        update(&conn, "value", json!("Foo"));
        assert_eq!(
            *results.borrow(),
            vec![("a", Value::from("Foo")), ("b", Value::from("Foo"))]
        );
        assert_eq!(prop.pending_callbacks(), 0);
        assert_eq!(lt.owned_count(), 0);

        // Not subscribed, so nothing was cached and a new get goes out.
        prop.get_then(&lt, |_: &Value| {}).unwrap();
        assert_eq!(transport.take_messages().len(), 1);
    }

    #[test]
    fn get_then_uses_cache_when_subscribed() {
        let (conn, transport, prop) = setup();
        let lt = Lifetime::new();
        prop.subscribe(&lt, |_: &Value| {}).unwrap();
        update(&conn, "update", json!("Foo"));
        transport.take_messages();

        let got = Rc::new(RefCell::new(None));
        let g = Rc::clone(&got);
        prop.get_then(&lt, move |v: &Value| *g.borrow_mut() = Some(v.clone()))
            .unwrap();
        assert_eq!(*got.borrow(), Some(Value::from("Foo")));
        assert!(transport.take_messages().is_empty());
    }

    #[test]
    fn killed_lifetime_abandons_get_callback() {
        let (conn, _transport, prop) = setup();
        let lt = Lifetime::new();
        let called = Rc::new(Cell::new(false));
        let c = Rc::clone(&called);
        prop.get_then(&lt, move |_: &Value| c.set(true)).unwrap();
        lt.kill();
        assert_eq!(prop.pending_callbacks(), 0);
        update(&conn, "value", json!("Foo"));
        assert!(!called.get());
    }

    #[test]
    fn update_also_resolves_pending_get() {
        let (conn, transport, prop) = setup();
        let lt = Lifetime::new();
        let called = Rc::new(Cell::new(0));
        let c = Rc::clone(&called);
        prop.get_then(&lt, move |_: &Value| c.set(c.get() + 1)).unwrap();
        update(&conn, "update", json!("Foo"));
        assert_eq!(called.get(), 1);

        // The get is still outstanding, so no second request is sent.
        transport.take_messages();
        prop.get_then(&lt, |_: &Value| {}).unwrap();
        assert!(transport.take_messages().is_empty());
    }

    #[test]
    fn inbound_value_of_wrong_shape_is_dropped() {
        let (conn, _transport, prop) = setup();
        let lt = Lifetime::new();
        let seen = Rc::new(Cell::new(0));
        let s = Rc::clone(&seen);
        prop.subscribe(&lt, move |_: &Value| s.set(s.get() + 1)).unwrap();
        update(&conn, "update", json!(12));
        assert_eq!(seen.get(), 0);
        assert_eq!(prop.cached_value().unwrap(), None);
        update(&conn, "update", json!("ok"));
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn getter_keeps_subscription() {
        let (conn, _transport, prop) = setup();
        let lt = Lifetime::new();
        let get = prop.getter(&lt).unwrap();
        assert_eq!(get(), None);
        update(&conn, "update", json!("Foo"));
        assert_eq!(get(), Some(Value::from("Foo")));
        assert!(prop.is_active());
        lt.kill();
        assert_eq!(get(), None);
    }

    #[test]
    fn destroyed_object_stops_requests() {
        let (conn, transport, prop) = setup();
        let lt = Lifetime::new();
        prop.subscribe(&lt, |_: &Value| {}).unwrap();
        transport.take_messages();
        conn.destroy_object(1);
        assert!(transport.take_messages().is_empty());
        assert_eq!(prop.subscriber_count(), 0);
        assert!(prop.subscribe(&lt, |_: &Value| {}).is_err());
        assert!(matches!(
            prop.set("x"),
            Err(ProtocolError::ObjectDestroyed { id: 1 })
        ));
    }
}
