#![forbid(unsafe_code)]

//! WebSocket transport over `tungstenite`.
//!
//! [`connect`] opens a socket and splits it into a [`WebSocketTransport`],
//! handed to the [`Connection`], and a [`WebSocketPump`], kept by the event
//! loop. The socket is non-blocking; call [`WebSocketPump::pump`] whenever
//! the loop has time.

use std::cell::RefCell;
use std::io;
use std::net::TcpStream;
use std::rc::Rc;

use tungstenite::protocol::WebSocketConfig as SocketConfig;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use crate::config::WebSocketConfig;
use crate::connection::Connection;
use crate::error::{ProtocolError, Result};
use crate::session::Transport;

type SharedSocket = Rc<RefCell<WebSocket<MaybeTlsStream<TcpStream>>>>;

fn would_block(err: &tungstenite::Error) -> bool {
    matches!(err, tungstenite::Error::Io(e) if e.kind() == io::ErrorKind::WouldBlock)
}

/// Open `config.url` and return the two halves of the socket.
pub fn connect(config: &WebSocketConfig) -> Result<(WebSocketTransport, WebSocketPump)> {
    let socket_config = config
        .max_message_bytes
        .map(|max| SocketConfig::default().max_message_size(Some(max)));
    let (mut socket, response) = tungstenite::client::connect_with_config(config.url.as_str(), socket_config, 3)
        .map_err(|err| ProtocolError::transport(format!("connecting to {}: {err}", config.url)))?;
    if let MaybeTlsStream::Plain(stream) = socket.get_mut() {
        stream
            .set_nonblocking(true)
            .map_err(|err| ProtocolError::transport(format!("set_nonblocking: {err}")))?;
    }
    tracing::debug!(url = %config.url, status = response.status().as_u16(), "websocket connected");

    let socket = Rc::new(RefCell::new(socket));
    Ok((
        WebSocketTransport {
            socket: Rc::clone(&socket),
        },
        WebSocketPump {
            socket,
            opened: false,
            closed: false,
        },
    ))
}

/// Sending half: each packet becomes one binary frame.
pub struct WebSocketTransport {
    socket: SharedSocket,
}

impl Transport for WebSocketTransport {
    fn send_packet(&mut self, packet: &[u8]) -> Result<()> {
        match self.socket.borrow_mut().send(Message::binary(packet.to_vec())) {
            Ok(()) => Ok(()),
            // Buffered; the next pump flushes it.
            Err(err) if would_block(&err) => Ok(()),
            Err(err) => Err(ProtocolError::transport(err.to_string())),
        }
    }

    fn name(&self) -> &str {
        "websocket"
    }
}

/// Receiving half: feeds frames into a [`Connection`].
pub struct WebSocketPump {
    socket: SharedSocket,
    opened: bool,
    closed: bool,
}

impl WebSocketPump {
    /// Deliver every frame available right now and flush pending writes.
    ///
    /// The first call reports the transport open. Returns the number of
    /// packets delivered.
    pub fn pump(&mut self, connection: &Connection) -> usize {
        if self.closed {
            return 0;
        }
        if !self.opened {
            self.opened = true;
            connection.handle_open();
        }

        let mut packets: Vec<Vec<u8>> = Vec::new();
        let mut failure = None;
        let mut closed = false;
        {
            let mut socket = self.socket.borrow_mut();
            loop {
                match socket.read() {
                    Ok(Message::Text(text)) => packets.push(text.as_bytes().to_vec()),
                    Ok(Message::Binary(bytes)) => packets.push(bytes.to_vec()),
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(?frame, "websocket close received");
                        closed = true;
                        break;
                    }
                    Ok(_) => {}
                    Err(err) if would_block(&err) => break,
                    Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                        closed = true;
                        break;
                    }
                    Err(err) => {
                        failure = Some(err.to_string());
                        break;
                    }
                }
            }
            match socket.flush() {
                Ok(()) => {}
                Err(err) if would_block(&err) => {}
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => closed = true,
                Err(err) => {
                    failure.get_or_insert(err.to_string());
                }
            }
        }

        tracing::trace!(packets = packets.len(), "websocket pumped");
        for packet in &packets {
            connection.handle_packet(packet);
        }
        if let Some(message) = failure {
            connection.handle_transport_error(&message);
        }
        if closed {
            self.closed = true;
            connection.handle_closed();
        }
        packets.len()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
