#![forbid(unsafe_code)]

//! The client side of one server connection.
//!
//! A [`Connection`] owns the id → object registry, turns requests from
//! members into packets for its [`Session`], and routes inbound packets to
//! the members they address. The driving layer (an event loop, a WebSocket
//! pump, a test) reports transport events through the `handle_*` methods.
//!
//! # Failure handling
//!
//! Nothing inbound can make the connection panic or return an error to the
//! driver. Undecodable packets, unknown members and badly shaped values are
//! logged at `warn` and dropped. Server `error` messages and transport
//! failures go to the [`ErrorSink`].
//!
//! # Invariants
//!
//! 1. An id maps to at most one [`RemoteObject`] for the life of the
//!    connection. Once destroyed, an id is tombstoned and never recreated.
//! 2. No registry or session borrow is held while member callbacks run, so
//!    callbacks may issue requests or look up objects.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use serde_json::Value as Json;
use starscape_core::Lifetime;

use crate::codec::decode_value;
use crate::config::ConnectionConfig;
use crate::error::{CodecError, ProtocolError, ReportedError, Result};
use crate::message::{InboundMessage, Request, parse_packet};
use crate::object::{Delivery, RemoteObject};
use crate::session::{Session, Transport};

/// Receives errors that are not tied to any local call.
pub trait ErrorSink {
    fn report(&self, error: &ReportedError);
}

impl<F: Fn(&ReportedError)> ErrorSink for F {
    fn report(&self, error: &ReportedError) {
        self(error);
    }
}

/// Default sink: logs with `tracing::error!`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogErrorSink;

impl ErrorSink for LogErrorSink {
    fn report(&self, error: &ReportedError) {
        tracing::error!(kind = ?error.kind, "{error}");
    }
}

// ---------------------------------------------------------------------------
// ConnectionInner
// ---------------------------------------------------------------------------

pub(crate) struct ConnectionInner {
    this: Weak<ConnectionInner>,
    config: ConnectionConfig,
    lifetime: Lifetime,
    session: RefCell<Session>,
    /// `None` marks a destroyed id.
    objects: RefCell<AHashMap<u64, Option<RemoteObject>>>,
    error_sink: RefCell<Rc<dyn ErrorSink>>,
}

impl ConnectionInner {
    fn object(&self, id: u64) -> Result<RemoteObject> {
        self.lifetime.verify_alive()?;
        if let Some(entry) = self.objects.borrow().get(&id) {
            return entry.clone().ok_or(ProtocolError::ObjectDestroyed { id });
        }
        let object = RemoteObject::new(self.this.clone(), id, self.lifetime.new_dependent()?)?;
        self.objects.borrow_mut().insert(id, Some(object.clone()));
        tracing::trace!(object = id, "object registered");
        Ok(object)
    }

    fn registered(&self, id: u64) -> Option<Option<RemoteObject>> {
        self.objects.borrow().get(&id).cloned()
    }

    fn destroy_object(&self, id: u64) -> bool {
        let previous = self.objects.borrow_mut().insert(id, None);
        match previous {
            Some(Some(object)) => {
                object.lifetime().kill();
                true
            }
            _ => false,
        }
    }

    fn report(&self, error: ReportedError) {
        let sink = Rc::clone(&*self.error_sink.borrow());
        sink.report(&error);
    }

    pub(crate) fn send_request(&self, request: &Request) -> Result<()> {
        self.lifetime.verify_alive()?;
        let message = request.encode()?;
        let packet = message.to_packet(self.config.newline_terminated)?;
        tracing::debug!(
            object = request.object,
            member = %request.member,
            mtype = ?message.mtype,
            "outbound request"
        );
        if self.config.log_packets {
            tracing::trace!(packet = %String::from_utf8_lossy(&packet), "outbound packet");
        }
        let sent = self.session.borrow_mut().send_packet(packet);
        if let Err(err) = sent {
            self.report(ReportedError::transport(err.to_string()));
        }
        Ok(())
    }

    fn dispatch(&self, message: InboundMessage) -> Result<()> {
        let mtype = message.mtype();
        match message {
            InboundMessage::Update {
                object,
                property,
                value,
            } => self.deliver(Delivery::Update, object, &property, &value),
            InboundMessage::Value {
                object,
                property,
                value,
            } => self.deliver(Delivery::Reply, object, &property, &value),
            InboundMessage::Event {
                object,
                property,
                value,
            } => self.deliver(Delivery::Event, object, &property, &value),
            InboundMessage::Error { text } => {
                tracing::debug!(mtype, "server error received");
                self.report(ReportedError::server(text));
                Ok(())
            }
            InboundMessage::Destroyed { object } => {
                let was_live = self.destroy_object(object);
                tracing::debug!(mtype, object, was_live, "object destroyed by server");
                Ok(())
            }
        }
    }

    fn deliver(&self, delivery: Delivery, id: u64, name: &str, json: &Json) -> Result<()> {
        let target = match self.registered(id) {
            Some(Some(object)) => object,
            Some(None) => return Err(ProtocolError::ObjectDestroyed { id }),
            None => {
                return Err(ProtocolError::UnknownMember {
                    id,
                    name: name.to_owned(),
                });
            }
        };
        if target.member_kind(name).is_none() {
            return Err(ProtocolError::UnknownMember {
                id,
                name: name.to_owned(),
            });
        }
        let value = decode_value(json, &mut |ref_id| {
            self.object(ref_id)
                .map_err(|_| CodecError::DestroyedObject(ref_id))
        })?;
        tracing::debug!(object = id, member = name, ?delivery, "inbound value");
        target.deliver(delivery, name, value)
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Handle to a connection. Clones share the same connection.
#[derive(Clone)]
pub struct Connection {
    inner: Rc<ConnectionInner>,
}

impl Connection {
    pub fn new(transport: impl Transport + 'static, config: ConnectionConfig) -> Self {
        let session = Session::new(Box::new(transport), config.max_queued_packets);
        let inner = Rc::new_cyclic(|this| ConnectionInner {
            this: this.clone(),
            config,
            lifetime: Lifetime::new(),
            session: RefCell::new(session),
            objects: RefCell::new(AHashMap::new()),
            error_sink: RefCell::new(Rc::new(LogErrorSink)),
        });
        tracing::debug!(
            lifetime_id = inner.lifetime.id(),
            transport = inner.session.borrow().transport_name(),
            "connection created"
        );
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Rc<ConnectionInner>) -> Self {
        Self { inner }
    }

    /// The well-known root object.
    pub fn root(&self) -> Result<RemoteObject> {
        self.inner.object(self.inner.config.root_object_id)
    }

    /// The object with `id`, registered on first use. Fails for destroyed
    /// ids and after [`close`](Self::close).
    pub fn object(&self, id: u64) -> Result<RemoteObject> {
        self.inner.object(id)
    }

    /// Kill the object with `id` and tombstone the id. Returns whether a
    /// live object was destroyed.
    pub fn destroy_object(&self, id: u64) -> bool {
        self.inner.destroy_object(id)
    }

    /// Dies on [`close`](Self::close); every object's lifetime depends on it.
    #[must_use]
    pub fn lifetime(&self) -> &Lifetime {
        &self.inner.lifetime
    }

    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.session.borrow().is_open()
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.lifetime.is_alive()
    }

    /// Packets waiting for the transport to open.
    #[must_use]
    pub fn queued_packets(&self) -> usize {
        self.inner.session.borrow().queued_len()
    }

    pub fn set_error_sink(&self, sink: impl ErrorSink + 'static) {
        *self.inner.error_sink.borrow_mut() = Rc::new(sink);
    }

    /// Destroy every object and stop sending.
    pub fn close(&self) {
        tracing::debug!(lifetime_id = self.inner.lifetime.id(), "connection closed");
        self.inner.session.borrow_mut().close();
        self.inner.lifetime.kill();
    }

    /// The transport is open: flush queued packets.
    pub fn handle_open(&self) {
        tracing::debug!(
            transport = self.inner.session.borrow().transport_name(),
            "transport open"
        );
        let flushed = self.inner.session.borrow_mut().open();
        if let Err(err) = flushed {
            self.inner.report(ReportedError::transport(err.to_string()));
        }
    }

    /// The transport closed. Requests queue until the next open.
    pub fn handle_closed(&self) {
        tracing::debug!("transport closed");
        self.inner.session.borrow_mut().close();
    }

    pub fn handle_transport_error(&self, message: &str) {
        self.inner.report(ReportedError::transport(message));
    }

    /// Decode and route one inbound packet.
    pub fn handle_packet(&self, packet: &[u8]) {
        let text = match std::str::from_utf8(packet) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(error = %err, bytes = packet.len(), "dropping packet that is not UTF-8");
                return;
            }
        };
        if self.inner.config.log_packets {
            tracing::trace!(packet = text, "inbound packet");
        }
        let messages = match parse_packet(text) {
            Ok(messages) => messages,
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed packet");
                return;
            }
        };
        for message in messages {
            if let Err(err) = message.and_then(|message| self.inner.dispatch(message)) {
                tracing::warn!(error = %err, inbound = err.is_inbound(), "dropping inbound message");
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("alive", &self.is_alive())
            .field("session", &*self.inner.session.borrow())
            .field("objects", &self.inner.objects.borrow().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
