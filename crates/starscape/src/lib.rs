#![forbid(unsafe_code)]

//! Starscape client facade.
//!
//! Re-exports the reactive runtime and the protocol client. Most programs
//! only need the prelude:
//!
//! ```
//! use starscape::prelude::*;
//!
//! let transport = RecordingTransport::new();
//! let conn = Connection::new(transport.clone(), ConnectionConfig::default());
//! conn.handle_open();
//!
//! let name = conn.root()?.property("name", RuntimeType::String)?;
//! let lifetime = Lifetime::new();
//! name.subscribe(&lifetime, |value: &Value| println!("name is {value:?}"))?;
//! assert_eq!(transport.take_messages().len(), 1);
//! # Ok::<(), ProtocolError>(())
//! ```

pub use starscape_core as core;
pub use starscape_protocol as protocol;

pub mod prelude {
    pub use starscape_core as core;
    pub use starscape_protocol as protocol;

    pub use starscape_core::{
        Conduit, ConduitExt, FilterSetConduit, Lifetime, LocalAction, LocalProperty, LocalSet, MappingConduit,
        SetConduit, SetMember, Vec3,
    };
    pub use starscape_protocol::{
        Action, Connection, ConnectionConfig, ErrorSink, Property, ProtocolError, RecordingTransport, RemoteObject,
        RemoteSet, ReportedError, RuntimeType, Signal, Transport, Value,
    };
    #[cfg(feature = "websocket")]
    pub use starscape_protocol::{WebSocketConfig, WebSocketPump, WebSocketTransport, connect};
}
