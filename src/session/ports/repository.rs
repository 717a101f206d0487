//! The low-level document CRUD port implemented by every storage adapter.
//!
//! Sessions, agents, messages, metadata, and feedback, each exposed as
//! small, composable operations.
//! Higher-level orchestration (metrics extraction, hook dispatch) lives in
//! [`crate::session::handle`], which is the only caller most hosts need.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::session::domain::{
    AgentConfig, EventLoopMetrics, FeedbackEntry, MessageEntry, Metadata, Role, Session,
    SessionError, SessionId,
};
use crate::session::domain::{AgentId, MessageId};

/// Result alias used by every repository method.
pub type RepositoryResult<T> = Result<T, SessionError>;

/// Low-level, storage-agnostic CRUD over the session document shape.
///
/// # Implementation notes
///
/// - Every method performs at most one database round-trip.
/// - `created_at` fields are never rewritten by an update; only the
///   corresponding `updated_at` moves.
/// - Metadata `update`/`delete` touch only the dotted paths named in their
///   argument.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Creates the secondary indexes this adapter relies on, including one
    /// expression index per entry in `metadata_fields`. Idempotent; safe to
    /// call on every process start.
    async fn ensure_indexes(&self, metadata_fields: &[String]) -> RepositoryResult<()>;

    /// Inserts a new session document, generating its viewer password and
    /// pre-seeding `metadata_fields` with empty strings.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Conflict`] if `session_id` already exists.
    async fn create_session(
        &self,
        session_id: &SessionId,
        session_type: &str,
        application_name: Option<&str>,
        metadata_fields: &[String],
    ) -> RepositoryResult<Session>;

    /// Reads a session document, or `None` if it does not exist.
    async fn read_session(&self, session_id: &SessionId) -> RepositoryResult<Option<Session>>;

    /// Reads only the viewer password, without loading the whole document.
    async fn session_viewer_password(
        &self,
        session_id: &SessionId,
    ) -> RepositoryResult<Option<String>>;

    /// Reads only the application name, without loading the whole document.
    async fn application_name(
        &self,
        session_id: &SessionId,
    ) -> RepositoryResult<Option<Option<String>>>;

    /// Creates a fresh agent block, replacing any prior block for the same
    /// id. Bumps the session's `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionNotFound`] if the session is missing.
    async fn create_agent(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
        agent_data: Value,
    ) -> RepositoryResult<()>;

    /// Reads an agent's SDK-level state, with the derived `model` and
    /// `system_prompt` fields stripped out.
    async fn read_agent(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
    ) -> RepositoryResult<Option<Value>>;

    /// Replaces `agent_data` wholesale, preserving the block's
    /// `created_at`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AgentNotFound`] if the agent is missing.
    async fn update_agent(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
        agent_data: Value,
    ) -> RepositoryResult<()>;

    /// Returns `true` if the agent block exists.
    async fn agent_exists(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
    ) -> RepositoryResult<bool>;

    /// Reads the `{agent_id, model, system_prompt}` audit-trail view for
    /// one agent.
    async fn get_agent_config(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
    ) -> RepositoryResult<Option<AgentConfig>>;

    /// Updates the `model`/`system_prompt` audit-trail fields. Either may
    /// be `None` to leave the existing value untouched.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionNotFound`] if the session is missing.
    async fn update_agent_config(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
        model: Option<String>,
        system_prompt: Option<String>,
    ) -> RepositoryResult<()>;

    /// Lists the `{agent_id, model, system_prompt}` view for every agent in
    /// a session.
    async fn list_agent_configs(&self, session_id: &SessionId) -> RepositoryResult<Vec<AgentConfig>>;

    /// Appends a message with a caller-assigned `message_id`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AgentNotFound`] if the agent is missing.
    async fn create_message(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
        message_id: MessageId,
        role: Role,
        content: Vec<Value>,
    ) -> RepositoryResult<()>;

    /// Reads one message by id, with `event_loop_metrics` stripped to
    /// match the SDK-shaped view.
    async fn read_message(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
        message_id: MessageId,
    ) -> RepositoryResult<Option<MessageEntry>>;

    /// Replaces a message's role/content, preserving `created_at`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MessageNotFound`] if absent.
    async fn update_message(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
        message_id: MessageId,
        role: Role,
        content: Vec<Value>,
    ) -> RepositoryResult<()>;

    /// Lists messages sorted ascending by `created_at`, applying
    /// `[offset, offset + limit)` pagination.
    async fn list_messages(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
        limit: usize,
        offset: usize,
    ) -> RepositoryResult<Vec<MessageEntry>>;

    /// The id of the most recently appended message, if any.
    async fn last_message_id(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
    ) -> RepositoryResult<Option<MessageId>>;

    /// Attaches event-loop metrics to one message, located by id.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MessageNotFound`] if absent.
    async fn set_message_metrics(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
        message_id: MessageId,
        metrics: EventLoopMetrics,
    ) -> RepositoryResult<()>;

    /// The number of messages recorded for one agent; `0` if the agent is
    /// absent.
    async fn message_count(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
    ) -> RepositoryResult<usize>;

    /// Partial-update: merges `updates` into the metadata tree, touching
    /// only the dotted paths given as keys.
    async fn update_metadata(
        &self,
        session_id: &SessionId,
        updates: &BTreeMap<String, Value>,
    ) -> RepositoryResult<()>;

    /// Removes exactly the listed dotted paths from the metadata tree.
    async fn delete_metadata(
        &self,
        session_id: &SessionId,
        keys: &[String],
    ) -> RepositoryResult<()>;

    /// Reads the full metadata tree.
    async fn get_metadata(&self, session_id: &SessionId) -> RepositoryResult<Metadata>;

    /// Appends a feedback entry, stamping `created_at`.
    async fn add_feedback(
        &self,
        session_id: &SessionId,
        entry: FeedbackEntry,
    ) -> RepositoryResult<()>;

    /// Lists feedback entries in insertion order.
    async fn list_feedback(&self, session_id: &SessionId) -> RepositoryResult<Vec<FeedbackEntry>>;

    /// Whether this adapter owns its underlying client rather than
    /// borrowing one shared by the factory. Adapters that cannot
    /// meaningfully "own" a client (e.g. the in-memory adapter) keep the
    /// default.
    fn owns_client(&self) -> bool {
        false
    }

    /// Closes the underlying client, but only if [`SessionRepository::owns_client`]
    /// returns `true`; a no-op otherwise.
    async fn close(&self) -> RepositoryResult<()> {
        Ok(())
    }
}
