#![forbid(unsafe_code)]

//! JSON message envelopes.
//!
//! A packet holds one or more JSON documents. Each document is either a
//! single message object or an array of them (a batch). Messages inside a
//! packet are parsed independently, so one bad message does not take its
//! neighbours down with it.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::codec::encode_value;
use crate::error::{ProtocolError, Result};
use crate::value::Value;

/// A message from the server, with its value still in wire form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "mtype", rename_all = "lowercase")]
pub enum InboundMessage {
    /// A subscribed property changed.
    Update {
        object: u64,
        property: String,
        value: Json,
    },
    /// Reply to a `get` request.
    Value {
        object: u64,
        property: String,
        value: Json,
    },
    /// A subscribed signal fired.
    Event {
        object: u64,
        property: String,
        value: Json,
    },
    Error {
        text: String,
    },
    /// The object was destroyed on the server; its id will not be reused.
    Destroyed {
        object: u64,
    },
}

impl InboundMessage {
    #[must_use]
    pub fn mtype(&self) -> &'static str {
        match self {
            Self::Update { .. } => "update",
            Self::Value { .. } => "value",
            Self::Event { .. } => "event",
            Self::Error { .. } => "error",
            Self::Destroyed { .. } => "destroyed",
        }
    }
}

/// Request kinds as written in the `mtype` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Set,
    Get,
    Subscribe,
    Unsubscribe,
}

/// A message to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub mtype: RequestKind,
    pub object: u64,
    pub property: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Json>,
}

impl OutboundMessage {
    /// Serialize to packet bytes.
    pub fn to_packet(&self, newline_terminated: bool) -> Result<Vec<u8>> {
        let mut packet = serde_json::to_vec(self)?;
        if newline_terminated {
            packet.push(b'\n');
        }
        Ok(packet)
    }
}

/// What a member asks the server to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestMethod {
    Set,
    Get,
    Fire,
    Subscribe,
    Unsubscribe,
}

impl RequestMethod {
    /// Firing an action is written exactly like setting a property.
    #[must_use]
    pub fn wire_kind(self) -> RequestKind {
        match self {
            Self::Set | Self::Fire => RequestKind::Set,
            Self::Get => RequestKind::Get,
            Self::Subscribe => RequestKind::Subscribe,
            Self::Unsubscribe => RequestKind::Unsubscribe,
        }
    }
}

/// A request before wire encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: RequestMethod,
    pub object: u64,
    pub member: String,
    pub value: Option<Value>,
}

impl Request {
    #[must_use]
    pub fn new(method: RequestMethod, object: u64, member: impl Into<String>) -> Self {
        Self {
            method,
            object,
            member: member.into(),
            value: None,
        }
    }

    #[must_use]
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn encode(&self) -> Result<OutboundMessage> {
        let value = self.value.as_ref().map(encode_value).transpose()?;
        Ok(OutboundMessage {
            mtype: self.method.wire_kind(),
            object: self.object,
            property: self.member.clone(),
            value,
        })
    }
}

/// Parse a packet into its messages.
///
/// The outer `Err` means the packet held no valid JSON at all. Each inner
/// `Err` is one message that did not match any known shape. Invalid JSON
/// after valid documents ends the packet with a final inner `Err`, keeping
/// the messages before it.
pub fn parse_packet(text: &str) -> Result<Vec<Result<InboundMessage>>> {
    let mut messages = Vec::new();
    for document in serde_json::Deserializer::from_str(text).into_iter::<Json>() {
        match document {
            Ok(Json::Array(batch)) => messages.extend(batch.into_iter().map(parse_message)),
            Ok(single) => messages.push(parse_message(single)),
            Err(err) if messages.is_empty() => return Err(err.into()),
            Err(err) => {
                messages.push(Err(err.into()));
                break;
            }
        }
    }
    if messages.is_empty() {
        return Err(ProtocolError::malformed("empty packet"));
    }
    Ok(messages)
}

fn parse_message(json: Json) -> Result<InboundMessage> {
    if !json.is_object() {
        return Err(ProtocolError::malformed(format!(
            "message is not an object: {json}"
        )));
    }
    serde_json::from_value(json).map_err(|err| ProtocolError::malformed(err.to_string()))
}
