#![forbid(unsafe_code)]

//! Client for the Starscape remote-object protocol.
//!
//! A [`Connection`] mirrors the part of the server's object graph the
//! application is looking at. Objects are reached through
//! [`Connection::root`] or through object references in values. Their
//! members are conduits:
//!
//! - [`Property`]: subscribable value, cached while subscribed, writable.
//! - [`Action`]: fire-and-forget request.
//! - [`Signal`]: server-pushed events.
//! - [`RemoteSet`]: set view of a list-valued property.
//!
//! Server subscriptions follow conduit activation: the first local
//! subscriber sends `subscribe`, the last one leaving sends `unsubscribe`.
//!
//! Transport is pluggable through [`Transport`]; the `websocket` feature adds
//! a `tungstenite` implementation.

pub mod action;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod object;
pub mod property;
pub mod remote_set;
pub mod runtime_type;
pub mod session;
pub mod signal;
pub mod value;
#[cfg(feature = "websocket")]
pub mod websocket;

pub use action::Action;
pub use codec::{decode_value, encode_value};
pub use config::ConnectionConfig;
#[cfg(feature = "websocket")]
pub use config::WebSocketConfig;
pub use connection::{Connection, ErrorSink, LogErrorSink};
pub use error::{CodecError, ErrorKind, ProtocolError, ReportedError, Result};
pub use message::{InboundMessage, OutboundMessage, Request, RequestKind, RequestMethod, parse_packet};
pub use object::{MemberKind, RemoteObject};
pub use property::Property;
pub use remote_set::RemoteSet;
pub use runtime_type::{RuntimeType, TypeMismatch, is_type, type_name, validate};
pub use session::{RecordingTransport, Session, Transport};
pub use signal::Signal;
pub use value::Value;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketPump, WebSocketTransport, connect};
