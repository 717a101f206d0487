//! Read-only search, timeline, and indexed-field discovery over sessions.
//!
//! [`ViewerRepository`] is deliberately separate from
//! [`crate::session::ports::SessionRepository`]: the write-side port is a
//! small set of per-document operations any storage engine can implement
//! cheaply, while search and field discovery are whole-collection
//! operations an adapter may realize very differently (a catalog scan on
//! a relational engine, a dedicated index on a document store). Keeping
//! them on their own trait lets an adapter that only needs to serve
//! writes skip implementing this one.
//!
//! The filtering, pagination, and field-inference logic below is written
//! once against the [`Session`] aggregate and shared by every adapter, so
//! [`crate::session::adapters::memory::InMemorySessionRepository`] and
//! the `PostgreSQL` adapter agree on semantics by construction rather than
//! by convention.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::session::domain::feedback::Rating;
use crate::session::domain::{
    AgentId, EventLoopMetrics, MessageId, Role, Session, SessionId,
};
use crate::session::ports::repository::RepositoryResult;

/// Search criteria accepted by [`ViewerRepository::search`].
///
/// `session_id_contains` and the values in `metadata_contains` are matched
/// as plain, case-insensitive Rust substrings (see [`matches_filter`]); no
/// regex engine sits between the needle and the haystack, so the needle is
/// used as given, with no metacharacter escaping needed.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Case-insensitive substring match against `session_id`.
    pub session_id_contains: Option<String>,
    /// Inclusive lower bound on `created_at`.
    pub created_after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub created_before: Option<DateTime<Utc>>,
    /// Dotted metadata path -> required substring, case-insensitive.
    pub metadata_contains: BTreeMap<String, String>,
    /// Page size.
    pub limit: u32,
    /// Page offset.
    pub offset: u32,
}

/// One row of a [`SearchPage`]: a session summarized for a results list.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPreview {
    /// The session's id.
    pub session_id: SessionId,
    /// Opaque session-type tag.
    pub session_type: String,
    /// Application partition, if any.
    pub application_name: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Number of agent blocks.
    pub agent_count: usize,
    /// Total message count across every agent.
    pub message_count: usize,
    /// Number of feedback entries.
    pub feedback_count: usize,
}

/// A page of search results.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    /// Matching sessions, sorted descending by `created_at`.
    pub sessions: Vec<SessionPreview>,
    /// Total matches across every page.
    pub total: usize,
    /// The page size requested.
    pub limit: u32,
    /// The offset requested.
    pub offset: u32,
    /// Whether a further page exists beyond this one.
    pub has_more: bool,
}

/// One entry in a session's unified timeline.
#[derive(Debug, Clone, PartialEq)]
pub enum TimelineEntry {
    /// A message, projected from an agent's transcript.
    Message {
        /// When the message was appended.
        timestamp: DateTime<Utc>,
        /// The agent this message belongs to.
        agent_id: AgentId,
        /// The message's role.
        role: Role,
        /// The opaque content parts.
        content: Vec<Value>,
        /// The message's id within its agent.
        message_id: MessageId,
        /// Per-turn metrics, if captured.
        metrics: Option<EventLoopMetrics>,
    },
    /// A feedback entry.
    Feedback {
        /// When the feedback was added.
        timestamp: DateTime<Utc>,
        /// The rating, if one was given.
        rating: Option<Rating>,
        /// The free-text comment.
        comment: String,
    },
}

impl TimelineEntry {
    /// The entry's sort key.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Message { timestamp, .. } | Self::Feedback { timestamp, .. } => *timestamp,
        }
    }
}

/// Per-agent summary carried alongside a session's timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSummary {
    /// The agent's id.
    pub agent_id: AgentId,
    /// Number of messages recorded for this agent.
    pub message_count: usize,
    /// The model id most recently captured, if any.
    pub model: Option<String>,
    /// The system prompt most recently captured, if any.
    pub system_prompt: Option<String>,
    /// When this agent block was first created.
    pub created_at: Option<DateTime<Utc>>,
    /// When this agent block was last mutated.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Session detail: per-agent summaries plus the unified timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDetail {
    /// The session's id.
    pub session_id: SessionId,
    /// Summaries for every agent, in no particular order.
    pub agents: Vec<AgentSummary>,
    /// Messages and feedback merged and sorted ascending by timestamp.
    pub timeline: Vec<TimelineEntry>,
}

/// The type inferred for one indexed field by [`ViewerRepository::discover_fields`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldTypeKind {
    /// Observed as a JSON boolean.
    Boolean,
    /// Observed as a JSON number.
    Number,
    /// Named by convention (`*_at` or containing `date`), or observed as
    /// an RFC 3339 timestamp string.
    Date,
    /// Observed as a plain string, or no more specific type applies.
    String,
    /// Promoted from its base type because the distinct value count did
    /// not exceed the configured ceiling. Carries the sorted distinct
    /// values.
    Enum(Vec<String>),
}

/// One entry in the field-discovery result.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMetadata {
    /// The dotted metadata path, or a built-in column name.
    pub name: String,
    /// The inferred (or enum-promoted) type.
    pub field_type: FieldTypeKind,
}

/// Whole-collection read operations serving the viewer surface.
#[async_trait]
pub trait ViewerRepository: Send + Sync {
    /// Searches sessions matching `filter`, sorted descending by
    /// `created_at`.
    async fn search(&self, filter: &SearchFilter) -> RepositoryResult<SearchPage>;

    /// Builds the detail view (per-agent summaries and unified timeline)
    /// for one session, or `None` if it does not exist.
    async fn session_detail(&self, session_id: &SessionId) -> RepositoryResult<Option<SessionDetail>>;

    /// Lists indexed metadata fields with inferred types, promoting
    /// `enum_fields` whose distinct value count is at most
    /// `enum_max_values`. Sorted alphabetically by field name.
    async fn discover_fields(
        &self,
        enum_fields: &[String],
        enum_max_values: usize,
    ) -> RepositoryResult<Vec<FieldMetadata>>;
}

/// Escapes regex metacharacters in a caller-supplied substring.
///
/// [`matches_filter`] itself matches with a plain Rust `contains` and has
/// no use for this; it exists for an adapter that pushes a filter down
/// into a database-side regex or `LIKE` pattern instead, where an
/// unescaped needle could change the shape of the query.
#[must_use]
pub fn escape_regex(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(
            ch,
            '.' | '^' | '$' | '*' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '\\' | '|'
        ) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn contains_case_insensitive(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// `true` if `session` satisfies every clause in `filter`.
#[must_use]
pub fn matches_filter(session: &Session, filter: &SearchFilter) -> bool {
    if let Some(needle) = &filter.session_id_contains
        && !contains_case_insensitive(session.session_id().as_str(), needle)
    {
        return false;
    }
    if let Some(after) = filter.created_after
        && session.created_at() < after
    {
        return false;
    }
    if let Some(before) = filter.created_before
        && session.created_at() > before
    {
        return false;
    }
    for (path, needle) in &filter.metadata_contains {
        let Some(value) = session.metadata().get_path(path) else {
            return false;
        };
        let rendered = value_as_text(value);
        if !contains_case_insensitive(&rendered, needle) {
            return false;
        }
    }
    true
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Builds a [`SessionPreview`] from a loaded [`Session`].
#[must_use]
pub fn preview_of(session: &Session) -> SessionPreview {
    SessionPreview {
        session_id: session.session_id().clone(),
        session_type: session.session_type().to_owned(),
        application_name: session.application_name().map(ToOwned::to_owned),
        created_at: session.created_at(),
        updated_at: session.updated_at(),
        agent_count: session.agents().len(),
        message_count: session.message_count(),
        feedback_count: session.feedbacks().len(),
    }
}

/// Filters, sorts (descending by `created_at`), and paginates a candidate
/// set of sessions into a [`SearchPage`].
#[must_use]
pub fn search_in_memory(candidates: &[Session], filter: &SearchFilter) -> SearchPage {
    let mut matched: Vec<&Session> = candidates
        .iter()
        .filter(|session| matches_filter(session, filter))
        .collect();
    matched.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
    let total = matched.len();
    let limit = filter.limit.max(1) as usize;
    let offset = filter.offset as usize;
    let page: Vec<SessionPreview> = matched
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(preview_of)
        .collect();
    let has_more = offset.saturating_add(page.len()) < total;
    SearchPage {
        sessions: page,
        total,
        limit: filter.limit,
        offset: filter.offset,
        has_more,
    }
}

/// Builds the per-agent summaries and unified timeline for `session`.
#[must_use]
pub fn detail_of(session: &Session) -> SessionDetail {
    let mut timeline = Vec::new();
    let mut agents = Vec::with_capacity(session.agents().len());
    for (agent_id, agent) in session.agents() {
        agents.push(AgentSummary {
            agent_id: agent_id.clone(),
            message_count: agent.message_count(),
            model: agent.model().map(ToOwned::to_owned),
            system_prompt: agent.system_prompt().map(ToOwned::to_owned),
            created_at: agent.created_at(),
            updated_at: agent.updated_at(),
        });
        for message in agent.messages() {
            timeline.push(TimelineEntry::Message {
                timestamp: message.created_at(),
                agent_id: agent_id.clone(),
                role: message.role(),
                content: message.content().to_vec(),
                message_id: message.message_id(),
                metrics: message.event_loop_metrics().cloned(),
            });
        }
    }
    for feedback in session.feedbacks() {
        timeline.push(TimelineEntry::Feedback {
            timestamp: feedback.created_at(),
            rating: feedback.rating(),
            comment: feedback.comment().to_owned(),
        });
    }
    timeline.sort_by_key(TimelineEntry::timestamp);
    SessionDetail {
        session_id: session.session_id().clone(),
        agents,
        timeline,
    }
}

const EXCLUDED_FIELD_NAMES: [&str; 3] = ["_id", "_fts", "_ftsx"];

fn field_name_implies_date(name: &str) -> bool {
    name.contains("date") || name.ends_with("_at")
}

/// Rank used to pick the most specific type across sampled values;
/// lower is more specific, matching `boolean > number > date > string`.
fn type_rank(value: &Value) -> Option<(u8, FieldTypeKind)> {
    match value {
        Value::Bool(_) => Some((0, FieldTypeKind::Boolean)),
        Value::Number(_) => Some((1, FieldTypeKind::Number)),
        Value::String(text) => {
            if DateTime::parse_from_rfc3339(text).is_ok() {
                Some((2, FieldTypeKind::Date))
            } else {
                Some((3, FieldTypeKind::String))
            }
        }
        _ => None,
    }
}

/// Lists top-level metadata fields across `sessions`, infers a type for
/// each, and promotes `enum_fields` whose distinct-value count does not
/// exceed `enum_max_values`.
#[must_use]
pub fn discover_fields_from_sessions(
    sessions: &[Session],
    enum_fields: &[String],
    enum_max_values: usize,
) -> Vec<FieldMetadata> {
    let mut names: BTreeSet<String> = BTreeSet::new();
    for session in sessions {
        for key in session.metadata().as_map().keys() {
            names.insert(key.clone());
        }
    }

    let mut fields: Vec<FieldMetadata> = names
        .into_iter()
        .filter(|name| !name.starts_with('_') && !EXCLUDED_FIELD_NAMES.contains(&name.as_str()))
        .map(|name| {
            let field_type = if field_name_implies_date(&name) {
                FieldTypeKind::Date
            } else {
                infer_sampled_type(sessions, &name)
            };
            FieldMetadata { name, field_type }
        })
        .collect();

    for field in &mut fields {
        if !enum_fields.iter().any(|candidate| candidate == &field.name) {
            continue;
        }
        let distinct = distinct_values(sessions, &field.name);
        if distinct.len() <= enum_max_values {
            field.field_type = FieldTypeKind::Enum(distinct.into_iter().collect());
        }
    }

    fields.sort_by(|a, b| a.name.cmp(&b.name));
    fields
}

fn infer_sampled_type(sessions: &[Session], name: &str) -> FieldTypeKind {
    sessions
        .iter()
        .filter_map(|session| session.metadata().get(name))
        .take(100)
        .filter_map(type_rank)
        .min_by_key(|(rank, _)| *rank)
        .map_or(FieldTypeKind::String, |(_, kind)| kind)
}

fn distinct_values(sessions: &[Session], name: &str) -> BTreeSet<String> {
    sessions
        .iter()
        .filter_map(|session| session.metadata().get(name))
        .map(value_as_text)
        .collect()
}
