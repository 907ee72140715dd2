use std::fmt;

use starscape_core::CoreError;
use thiserror::Error;

use crate::object::MemberKind;
use crate::runtime_type::TypeMismatch;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("object {id} has been destroyed")]
    ObjectDestroyed { id: u64 },

    #[error("{id}.{name} can not be used as a {requested} because it was already created as a {existing}")]
    MemberKindMismatch {
        id: u64,
        name: String,
        requested: MemberKind,
        existing: MemberKind,
    },

    #[error("{id}.{name} {kind} can not be used as {requested} because it was already created as {existing}")]
    ShapeMismatch {
        id: u64,
        name: String,
        kind: MemberKind,
        requested: String,
        existing: String,
    },

    #[error("{context}: {source}")]
    Type {
        context: String,
        source: TypeMismatch,
    },

    #[error("invalid value: {0}")]
    Codec(#[from] CodecError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed message: {message}")]
    Malformed { message: String },

    #[error("{id}.{name} was never requested locally")]
    UnknownMember { id: u64, name: String },

    #[error("transport error: {message}")]
    Transport { message: String },
}

impl ProtocolError {
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Type mismatch on member `name` of object `id`, reported as
    /// `"<id>.<name> <kind>: <inner>"`.
    #[must_use]
    pub fn member_type(id: u64, name: &str, kind: MemberKind, source: TypeMismatch) -> Self {
        Self::Type {
            context: format!("{id}.{name} {kind}"),
            source,
        }
    }

    /// Whether this error comes from untrusted inbound data rather than a
    /// local programming mistake.
    #[must_use]
    pub fn is_inbound(&self) -> bool {
        matches!(
            self,
            Self::Codec(_) | Self::Json(_) | Self::Malformed { .. } | Self::UnknownMember { .. }
        )
    }
}

/// A wire value could not be decoded or encoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("array-wrapped value is not a number or array: {0}")]
    BadWrapped(String),

    #[error("vector contains invalid value(s): {0}")]
    BadVector(String),

    #[error("array-wrapped value has invalid length {0}")]
    BadLength(usize),

    #[error("{0} is not a valid object id")]
    BadObjectId(String),

    #[error("object {0} has already been destroyed")]
    DestroyedObject(u64),

    #[error("unsupported value: {0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// An `error` message sent by the server.
    Server,
    /// The transport reported a failure.
    Transport,
}

/// An error delivered to an [`ErrorSink`](crate::connection::ErrorSink).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ReportedError {
    #[must_use]
    pub fn server(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Server,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transport,
            message: message.into(),
        }
    }
}

impl fmt::Display for ReportedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::Server => write!(f, "error from server: {}", self.message),
            ErrorKind::Transport => write!(f, "transport error: {}", self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_type_prefixes_owner() {
        let inner = TypeMismatch::Expected {
            expected: "number".into(),
            actual: "string".into(),
        };
        let err = ProtocolError::member_type(4, "pos", MemberKind::Signal, inner);
        assert_eq!(err.to_string(), "4.pos signal: expected number, got string");
        assert!(!err.is_inbound());
    }

    #[test]
    fn kind_mismatch_names_both_kinds() {
        let err = ProtocolError::MemberKindMismatch {
            id: 1,
            name: "name".into(),
            requested: MemberKind::Action,
            existing: MemberKind::Property,
        };
        let message = err.to_string();
        assert!(message.contains("action"));
        assert!(message.contains("property"));
    }

    #[test]
    fn core_errors_are_transparent() {
        let err = ProtocolError::from(CoreError::DeadLifetime { lifetime: 3 });
        assert_eq!(err.to_string(), "lifetime 3 is dead, nothing can be added to it");
    }

    #[test]
    fn reported_error_display() {
        assert_eq!(
            ReportedError::server("boom").to_string(),
            "error from server: boom"
        );
        assert_eq!(ReportedError::transport("x").kind, ErrorKind::Transport);
    }
}
