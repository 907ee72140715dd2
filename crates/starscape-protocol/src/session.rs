#![forbid(unsafe_code)]

//! Outbound packet plumbing.
//!
//! A [`Session`] sits between a connection and its [`Transport`]. Packets
//! sent before the transport reports open are queued and flushed, in order,
//! on open.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::error::{ProtocolError, Result};

/// Anything that can carry packets to the server.
pub trait Transport {
    fn send_packet(&mut self, packet: &[u8]) -> Result<()>;

    /// Short name used in log fields.
    fn name(&self) -> &str;
}

pub struct Session {
    transport: Box<dyn Transport>,
    open: bool,
    queue: VecDeque<Vec<u8>>,
    max_queued: Option<usize>,
}

impl Session {
    #[must_use]
    pub fn new(transport: Box<dyn Transport>, max_queued: Option<usize>) -> Self {
        Self {
            transport,
            open: false,
            queue: VecDeque::new(),
            max_queued,
        }
    }

    /// Send now if open, otherwise queue.
    pub fn send_packet(&mut self, packet: Vec<u8>) -> Result<()> {
        if self.open {
            return self.transport.send_packet(&packet);
        }
        if let Some(max) = self.max_queued {
            if max == 0 {
                tracing::warn!(transport = self.transport.name(), "queue disabled, packet dropped");
                return Ok(());
            }
            while self.queue.len() >= max {
                self.queue.pop_front();
                tracing::warn!(
                    transport = self.transport.name(),
                    max_queued = max,
                    "send queue full, oldest packet dropped"
                );
            }
        }
        self.queue.push_back(packet);
        Ok(())
    }

    /// Mark the transport open and flush queued packets.
    ///
    /// If a flush fails, the session stays closed and the failed packet and
    /// everything after it stay queued.
    pub fn open(&mut self) -> Result<()> {
        let queued = self.queue.len();
        while let Some(packet) = self.queue.front() {
            self.transport.send_packet(packet)?;
            self.queue.pop_front();
        }
        self.open = true;
        if queued > 0 {
            tracing::debug!(transport = self.transport.name(), packets = queued, "flushed send queue");
        }
        Ok(())
    }

    /// Stop sending; later packets are queued again until the next open.
    pub fn close(&mut self) {
        self.open = false;
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("transport", &self.transport.name())
            .field("open", &self.open)
            .field("queued", &self.queue.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// RecordingTransport
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Recording {
    packets: Vec<Vec<u8>>,
    failing: bool,
}

/// In-memory transport that keeps every packet it is given.
///
/// Clones share the same recording, so a test can keep one handle while
/// the connection owns another.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    inner: Rc<RefCell<Recording>>,
}

impl RecordingTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn packets(&self) -> Vec<Vec<u8>> {
        self.inner.borrow().packets.clone()
    }

    pub fn take_packets(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.inner.borrow_mut().packets)
    }

    /// Drain recorded packets, parsed as JSON. Batches are flattened and a
    /// packet is read up to its first invalid document.
    pub fn take_messages(&self) -> Vec<serde_json::Value> {
        let mut messages = Vec::new();
        for packet in self.take_packets() {
            let documents = serde_json::Deserializer::from_slice(&packet).into_iter::<serde_json::Value>();
            for document in documents.map_while(std::result::Result::ok) {
                match document {
                    serde_json::Value::Array(batch) => messages.extend(batch),
                    single => messages.push(single),
                }
            }
        }
        messages
    }

    /// Make subsequent sends fail with a transport error.
    pub fn set_failing(&self, failing: bool) {
        self.inner.borrow_mut().failing = failing;
    }
}

impl Transport for RecordingTransport {
    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.failing {
            return Err(ProtocolError::transport("recording transport set to fail"));
        }
        inner.packets.push(packet.to_vec());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

impl fmt::Debug for RecordingTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingTransport")
            .field("packets", &self.inner.borrow().packets.len())
            .finish()
    }
}
