use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Misuse of a lifetime or conduit.
///
/// These indicate a bug in the calling code (the equivalent of a
/// use-after-free), so callers normally propagate them with `?` rather than
/// recover locally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("lifetime {lifetime} is dead, nothing can be added to it")]
    DeadLifetime { lifetime: u64 },

    #[error("{conduit} has been destroyed and can not be subscribed to")]
    ConduitDestroyed { conduit: &'static str },

    #[error("{what} is only available while subscribed to")]
    Inactive { what: &'static str },
}

impl CoreError {
    #[must_use]
    pub fn is_liveness(&self) -> bool {
        matches!(
            self,
            Self::DeadLifetime { .. } | Self::ConduitDestroyed { .. }
        )
    }
}
