//! The session aggregate: one document per `session_id`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::agent::AgentBlock;
use super::feedback::FeedbackEntry;
use super::ids::{AgentId, SessionId};
use super::metadata::Metadata;
use super::token::generate_viewer_password;

/// A session: the top-level persistent record keyed by `session_id`.
///
/// # Invariants
///
/// - `session_id` never changes after construction.
/// - `application_name` and `session_viewer_password` are set exactly once,
///   at [`Session::new`], and are never rewritten by any later mutation.
/// - `created_at <= updated_at` holds at every observable point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    session_id: SessionId,
    session_type: String,
    application_name: Option<String>,
    session_viewer_password: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    metadata: Metadata,
    agents: HashMap<AgentId, AgentBlock>,
    feedbacks: Vec<FeedbackEntry>,
}

impl Session {
    /// Creates a new session document, pre-seeding `metadata_fields` with
    /// empty strings so they are indexable from the moment the document
    /// exists, and generating a fresh 32-character viewer password.
    #[must_use]
    pub fn new(
        session_id: SessionId,
        session_type: impl Into<String>,
        application_name: Option<String>,
        metadata_fields: &[String],
        now: DateTime<Utc>,
    ) -> Self {
        let mut metadata = Metadata::default();
        for field in metadata_fields {
            metadata.seed_empty(field);
        }
        Self {
            session_id,
            session_type: session_type.into(),
            application_name,
            session_viewer_password: generate_viewer_password(),
            created_at: now,
            updated_at: now,
            metadata,
            agents: HashMap::new(),
            feedbacks: Vec::new(),
        }
    }

    /// Reconstructs a session from stored fields, as read back from the
    /// repository. Unlike [`Session::new`], this does not generate a fresh
    /// password or re-seed metadata; it is a pure data carrier.
    #[must_use]
    #[allow(clippy::too_many_arguments, reason = "mirrors the stored document shape 1:1")]
    pub const fn from_parts(
        session_id: SessionId,
        session_type: String,
        application_name: Option<String>,
        session_viewer_password: String,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        metadata: Metadata,
        agents: HashMap<AgentId, AgentBlock>,
        feedbacks: Vec<FeedbackEntry>,
    ) -> Self {
        Self {
            session_id,
            session_type,
            application_name,
            session_viewer_password,
            created_at,
            updated_at,
            metadata,
            agents,
            feedbacks,
        }
    }

    /// The primary key; equals the document's `_id`.
    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Opaque session-type tag.
    #[must_use]
    pub fn session_type(&self) -> &str {
        &self.session_type
    }

    /// The application partition this session belongs to, if any.
    #[must_use]
    pub fn application_name(&self) -> Option<&str> {
        self.application_name.as_deref()
    }

    /// The per-session viewer password, set once at creation.
    #[must_use]
    pub fn session_viewer_password(&self) -> &str {
        &self.session_viewer_password
    }

    /// When the document was first created.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When the document was last mutated.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// The metadata bag.
    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// All agent blocks keyed by `agent_id`.
    #[must_use]
    pub const fn agents(&self) -> &HashMap<AgentId, AgentBlock> {
        &self.agents
    }

    /// Feedback entries in insertion order.
    #[must_use]
    pub fn feedbacks(&self) -> &[FeedbackEntry] {
        &self.feedbacks
    }

    /// A single agent block, if present.
    #[must_use]
    pub fn agent(&self, agent_id: &AgentId) -> Option<&AgentBlock> {
        self.agents.get(agent_id)
    }

    /// Bumps `updated_at` to `now`; called by the repository on every
    /// mutating operation so `created_at <= updated_at` keeps holding.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    /// Inserts or replaces an agent block and touches the session.
    pub fn set_agent(&mut self, agent_id: AgentId, block: AgentBlock, now: DateTime<Utc>) {
        self.agents.insert(agent_id, block);
        self.touch(now);
    }

    /// Mutable access to an agent block, for in-place message/config edits.
    pub fn agent_mut(&mut self, agent_id: &AgentId) -> Option<&mut AgentBlock> {
        self.agents.get_mut(agent_id)
    }

    /// Mutable access to the metadata bag.
    pub const fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Appends a feedback entry and touches the session.
    pub fn push_feedback(&mut self, entry: FeedbackEntry, now: DateTime<Utc>) {
        self.feedbacks.push(entry);
        self.touch(now);
    }

    /// Total message count across every agent; used by viewer previews.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.agents.values().map(AgentBlock::message_count).sum()
    }
}
