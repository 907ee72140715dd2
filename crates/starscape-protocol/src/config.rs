#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// Connection settings. Missing fields take their defaults when
/// deserializing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Id of the object returned by [`Connection::root`](crate::Connection::root).
    pub root_object_id: u64,
    /// Terminate each outbound packet with `\n`.
    pub newline_terminated: bool,
    /// Bound on packets queued before the transport opens. When full, the
    /// oldest packet is dropped.
    pub max_queued_packets: Option<usize>,
    /// Log raw packet text at `trace` level.
    pub log_packets: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            root_object_id: 1,
            newline_terminated: true,
            max_queued_packets: None,
            log_packets: false,
        }
    }
}

impl ConnectionConfig {
    #[must_use]
    pub fn with_root_object_id(mut self, id: u64) -> Self {
        self.root_object_id = id;
        self
    }

    #[must_use]
    pub fn with_newline_terminated(mut self, enabled: bool) -> Self {
        self.newline_terminated = enabled;
        self
    }

    #[must_use]
    pub fn with_max_queued_packets(mut self, max: Option<usize>) -> Self {
        self.max_queued_packets = max;
        self
    }

    #[must_use]
    pub fn with_log_packets(mut self, enabled: bool) -> Self {
        self.log_packets = enabled;
        self
    }
}

/// Where and how to open a WebSocket transport.
#[cfg(feature = "websocket")]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// `ws://host:port/path`
    pub url: String,
    /// Largest inbound message accepted; `None` keeps the library default.
    #[serde(default)]
    pub max_message_bytes: Option<usize>,
}

#[cfg(feature = "websocket")]
impl WebSocketConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_message_bytes: None,
        }
    }

    #[must_use]
    pub fn with_max_message_bytes(mut self, max: usize) -> Self {
        self.max_message_bytes = Some(max);
        self
    }
}
