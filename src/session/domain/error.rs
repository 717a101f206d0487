//! Error taxonomy for the session store core.

use std::sync::Arc;

use thiserror::Error;

use super::ids::{AgentId, MessageId, SessionId};

/// Errors raised by the session repository and everything layered on it
/// (the session handle, the hook dispatcher, the viewer query engine).
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// The session does not exist.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// The agent does not exist within an otherwise valid session.
    #[error("agent {agent_id} not found in session {session_id}")]
    AgentNotFound {
        /// Session that was looked up.
        session_id: SessionId,
        /// Agent that was missing.
        agent_id: AgentId,
    },

    /// The message does not exist within an otherwise valid agent.
    #[error("message {message_id} not found for agent {agent_id} in session {session_id}")]
    MessageNotFound {
        /// Session that was looked up.
        session_id: SessionId,
        /// Agent that was looked up.
        agent_id: AgentId,
        /// Message id that was missing.
        message_id: MessageId,
    },

    /// A session with this id already exists.
    #[error("session already exists: {0}")]
    Conflict(SessionId),

    /// The underlying database driver failed (connection, timeout, query).
    #[error("storage error: {message}")]
    Storage {
        /// Human-readable description; the original error is preserved
        /// via `source` for log correlation but never rendered to callers
        /// outside the process.
        message: String,
        /// Underlying driver error, if one is available.
        #[source]
        source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },

    /// A caller supplied malformed input (e.g. the metadata tool adapter
    /// received a string it could not parse as JSON).
    #[error("validation error: {0}")]
    Validation(String),
}

impl SessionError {
    /// Wraps an arbitrary driver error as a [`SessionError::Storage`].
    #[must_use]
    pub fn storage(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Storage {
            message: err.to_string(),
            source: Some(Arc::new(err)),
        }
    }

    /// Builds a [`SessionError::Storage`] from a plain message with no
    /// underlying error value (e.g. a pool-exhaustion timeout).
    #[must_use]
    pub fn storage_msg(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Returns `true` if retrying the same operation immediately would be
    /// pointless (the error reflects a logical, not transient, condition).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::SessionNotFound(_)
                | Self::AgentNotFound { .. }
                | Self::MessageNotFound { .. }
                | Self::Conflict(_)
                | Self::Validation(_)
        )
    }
}

impl From<diesel::result::Error> for SessionError {
    fn from(err: diesel::result::Error) -> Self {
        Self::storage(err)
    }
}

/// Result alias used throughout the session store.
pub type SessionResult<T> = Result<T, SessionError>;
