//! Session-scoped façade handed to the agent runtime.
//!
//! A [`SessionHandle`] binds one `session_id` to a repository and to the
//! (possibly hook-wrapped) metadata/feedback operations the factory built
//! for it. Everything the agent-SDK event loop needs across the life of a
//! conversation — appending turns, syncing per-turn metrics, reading or
//! writing metadata, recording feedback — goes through here rather than
//! directly against [`crate::session::ports::SessionRepository`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::hooks::{FeedbackOps, MetadataOps};
use crate::session::domain::{
    AgentConfig, AgentId, EventLoopMetrics, FeedbackEntry, MessageEntry, MessageId, Metadata,
    Role, SessionId, TurnMetricsSummary,
};
use crate::session::ports::repository::{RepositoryResult, SessionRepository};
use crate::tool::MetadataTool;

/// The per-session façade the agent runtime calls through.
pub struct SessionHandle {
    session_id: SessionId,
    repository: Arc<dyn SessionRepository>,
    metadata_ops: Arc<dyn MetadataOps>,
    feedback_ops: Arc<dyn FeedbackOps>,
}

impl SessionHandle {
    /// Builds a handle over an already-constructed repository and
    /// (possibly hook-decorated) operation sets. Hosts normally obtain a
    /// handle from [`crate::factory::Factory::create_session_manager`]
    /// rather than calling this directly.
    #[must_use]
    pub fn new(
        session_id: SessionId,
        repository: Arc<dyn SessionRepository>,
        metadata_ops: Arc<dyn MetadataOps>,
        feedback_ops: Arc<dyn FeedbackOps>,
    ) -> Self {
        Self {
            session_id,
            repository,
            metadata_ops,
            feedback_ops,
        }
    }

    /// The session this handle is bound to.
    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Appends a message to `agent_id`'s transcript.
    ///
    /// # Errors
    ///
    /// Returns [`crate::session::domain::SessionError::AgentNotFound`] if the agent is missing.
    pub async fn append_message(
        &self,
        agent_id: &AgentId,
        message_id: MessageId,
        role: Role,
        content: Vec<Value>,
    ) -> RepositoryResult<()> {
        self.repository
            .create_message(&self.session_id, agent_id, message_id, role, content)
            .await
    }

    /// Captures per-turn metrics and the model/system-prompt audit trail
    /// after the agent SDK flushes a turn.
    ///
    /// Only if `summary.accumulated_metrics.latency_ms > 0` does this
    /// attach `event_loop_metrics` to the agent's latest message (located
    /// by `message_id`, not position). The `model`/`system_prompt` audit
    /// fields are captured unconditionally whenever the agent block
    /// exists, independent of latency. If the agent block itself is
    /// absent, this is a no-op: no message mutation and no audit-trail
    /// write occur.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying repository calls fail.
    pub async fn sync_agent(
        &self,
        agent_id: &AgentId,
        summary: &TurnMetricsSummary,
        model: Option<String>,
        system_prompt: Option<String>,
    ) -> RepositoryResult<()> {
        if !self
            .repository
            .agent_exists(&self.session_id, agent_id)
            .await?
        {
            tracing::debug!(
                session_id = %self.session_id,
                agent_id = %agent_id,
                "sync_agent: no agent block for this id, skipping"
            );
            return Ok(());
        }

        if summary.accumulated_metrics.latency_ms > 0 {
            match self
                .repository
                .last_message_id(&self.session_id, agent_id)
                .await?
            {
                Some(message_id) => {
                    let metrics = EventLoopMetrics::from(summary);
                    self.repository
                        .set_message_metrics(&self.session_id, agent_id, message_id, metrics)
                        .await?;
                }
                None => {
                    tracing::debug!(
                        session_id = %self.session_id,
                        agent_id = %agent_id,
                        "sync_agent: agent has no messages, skipping metrics attach"
                    );
                }
            }
        }

        self.repository
            .update_agent_config(&self.session_id, agent_id, model, system_prompt)
            .await
    }

    /// Partial-updates the metadata tree, routed through a hook if one was
    /// configured for this handle.
    pub async fn update_metadata(&self, updates: &BTreeMap<String, Value>) -> RepositoryResult<()> {
        self.metadata_ops.update(&self.session_id, updates).await
    }

    /// Removes the named dotted paths from the metadata tree.
    pub async fn delete_metadata(&self, keys: &[String]) -> RepositoryResult<()> {
        self.metadata_ops.delete(&self.session_id, keys).await
    }

    /// Reads the full metadata tree.
    pub async fn get_metadata(&self) -> RepositoryResult<Metadata> {
        self.metadata_ops.get(&self.session_id).await
    }

    /// Appends a feedback entry, routed through a hook if one was
    /// configured for this handle.
    pub async fn add_feedback(&self, entry: FeedbackEntry) -> RepositoryResult<()> {
        self.feedback_ops.add(&self.session_id, entry).await
    }

    /// Lists feedback entries in insertion order.
    pub async fn get_feedbacks(&self) -> RepositoryResult<Vec<FeedbackEntry>> {
        self.feedback_ops.list(&self.session_id).await
    }

    /// Builds a tool-shaped adapter over this handle's metadata
    /// operations, suitable for registering with an agent's tool
    /// registry.
    #[must_use]
    pub fn get_metadata_tool(&self) -> MetadataTool {
        MetadataTool::new(self.session_id.clone(), Arc::clone(&self.metadata_ops))
    }

    /// Reads the `{agent_id, model, system_prompt}` audit view for one
    /// agent.
    pub async fn get_agent_config(
        &self,
        agent_id: &AgentId,
    ) -> RepositoryResult<Option<AgentConfig>> {
        self.repository
            .get_agent_config(&self.session_id, agent_id)
            .await
    }

    /// Updates the `model`/`system_prompt` audit fields directly. Either
    /// may be omitted to leave the existing value untouched.
    ///
    /// # Errors
    ///
    /// Returns [`crate::session::domain::SessionError::SessionNotFound`] if the session is missing.
    pub async fn update_agent_config(
        &self,
        agent_id: &AgentId,
        model: Option<String>,
        system_prompt: Option<String>,
    ) -> RepositoryResult<()> {
        self.repository
            .update_agent_config(&self.session_id, agent_id, model, system_prompt)
            .await
    }

    /// Lists the `{agent_id, model, system_prompt}` view for every agent.
    pub async fn list_agents(&self) -> RepositoryResult<Vec<AgentConfig>> {
        self.repository.list_agent_configs(&self.session_id).await
    }

    /// The number of messages recorded for `agent_id`; `0` if absent.
    pub async fn get_message_count(&self, agent_id: &AgentId) -> RepositoryResult<usize> {
        self.repository.message_count(&self.session_id, agent_id).await
    }

    /// Lists messages for `agent_id`, sorted ascending by `created_at`,
    /// applying `[offset, offset + limit)` pagination.
    pub async fn list_messages(
        &self,
        agent_id: &AgentId,
        limit: usize,
        offset: usize,
    ) -> RepositoryResult<Vec<MessageEntry>> {
        self.repository
            .list_messages(&self.session_id, agent_id, limit, offset)
            .await
    }

    /// Closes the underlying repository, but only if it owns its client.
    pub async fn close(&self) -> RepositoryResult<()> {
        self.repository.close().await
    }
}
