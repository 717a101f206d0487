//! The per-agent block nested inside a session document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::AgentId;
use super::message::MessageEntry;

/// One agent's state and transcript within a session.
///
/// `agent_data` carries the agent-SDK state snapshot exactly as handed in;
/// `model` and `system_prompt` are derived fields captured on every sync
/// (see [`crate::session::handle::SessionHandle::sync_agent`]) and are
/// stored alongside `agent_data` but are not part of it — `read_agent`
/// strips them back out before returning SDK-shaped state to a caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentBlock {
    agent_data: Value,
    model: Option<String>,
    system_prompt: Option<String>,
    messages: Vec<MessageEntry>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl AgentBlock {
    /// Creates a fresh agent block on first sync of a previously-unseen
    /// agent id.
    #[must_use]
    pub fn new(agent_data: Value, now: DateTime<Utc>) -> Self {
        Self {
            agent_data,
            model: None,
            system_prompt: None,
            messages: Vec::new(),
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    /// The raw agent-SDK state snapshot, sans `model`/`system_prompt`.
    #[must_use]
    pub const fn agent_data(&self) -> &Value {
        &self.agent_data
    }

    /// The model id captured on the most recent sync, if any.
    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// The system prompt captured on the most recent sync, if any.
    #[must_use]
    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// This agent's transcript, in append order.
    #[must_use]
    pub fn messages(&self) -> &[MessageEntry] {
        &self.messages
    }

    /// Mutable access to the transcript, for in-place updates by
    /// `message_id`.
    pub fn messages_mut(&mut self) -> &mut Vec<MessageEntry> {
        &mut self.messages
    }

    /// When this block was first created. `None` only for documents
    /// written before this field existed; new blocks always set it.
    #[must_use]
    pub const fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// When this block was last mutated.
    #[must_use]
    pub const fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Number of messages recorded for this agent.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Replaces `agent_data` wholesale while preserving `created_at`; used
    /// by `update_agent`.
    pub fn replace_agent_data(&mut self, agent_data: Value, now: DateTime<Utc>) {
        self.agent_data = agent_data;
        self.updated_at = Some(now);
    }

    /// Updates the derived `model`/`system_prompt` audit-trail fields.
    /// Either may be omitted to leave the existing value untouched.
    pub fn set_model_and_prompt(
        &mut self,
        model: Option<String>,
        system_prompt: Option<String>,
        now: DateTime<Utc>,
    ) {
        if let Some(model) = model {
            self.model = Some(model);
        }
        if let Some(system_prompt) = system_prompt {
            self.system_prompt = Some(system_prompt);
        }
        self.updated_at = Some(now);
    }

    /// Appends a message and touches `updated_at`.
    pub fn push_message(&mut self, message: MessageEntry, now: DateTime<Utc>) {
        self.messages.push(message);
        self.updated_at = Some(now);
    }
}

/// The `{agent_id, model, system_prompt}` view returned by
/// `get_agent_config`/`list_agents`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// The agent this config belongs to.
    pub agent_id: AgentId,
    /// The model id most recently captured for this agent.
    pub model: Option<String>,
    /// The system prompt most recently captured for this agent.
    pub system_prompt: Option<String>,
}
