//! Message entries, per-turn metrics, and the metrics summary contract the
//! agent SDK hands to [`crate::session::handle::SessionHandle::sync_agent`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::ids::MessageId;

/// The role of a message's source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A message authored by the end user.
    User,
    /// A message authored by the agent.
    Assistant,
}

/// Token accounting for a single turn, as reported by the agent SDK.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatedUsage {
    /// Tokens in the prompt.
    pub input_tokens: u64,
    /// Tokens in the completion.
    pub output_tokens: u64,
    /// `input_tokens + output_tokens`, as reported (not recomputed).
    pub total_tokens: u64,
    /// Tokens served from the prompt cache. Defaults to 0 if absent.
    pub cache_read_input_tokens: u64,
    /// Tokens written to the prompt cache. Defaults to 0 if absent.
    pub cache_write_input_tokens: u64,
}

/// Latency accounting for a single turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatedMetrics {
    /// End-to-end latency of the turn, in milliseconds.
    pub latency_ms: u64,
    /// Time to first byte of the response, in milliseconds. Defaults to 0.
    pub time_to_first_byte_ms: u64,
}

/// Event-loop cycle accounting for a single turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleMetrics {
    /// Number of event-loop cycles the turn took.
    pub total_cycles: u64,
    /// Total wall-clock duration of all cycles, in seconds.
    pub total_duration: f64,
    /// `total_duration / total_cycles`, as reported.
    pub average_cycle_time: f64,
}

/// Execution statistics for one tool, stripped of the `tool_info` the agent
/// SDK also reports (deliberately dropped so the stored object stays flat —
/// see `TurnMetricsSummary::tool_usage`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionStats {
    /// Number of times the tool was invoked this turn.
    pub call_count: u64,
    /// Number of successful invocations.
    pub success_count: u64,
    /// Number of failed invocations.
    pub error_count: u64,
    /// Total time spent executing the tool, in seconds.
    pub total_time: f64,
    /// `total_time / call_count`, as reported.
    pub average_time: f64,
    /// `success_count / call_count`, as reported.
    pub success_rate: f64,
}

/// The structured metrics summary the agent SDK hands to
/// [`crate::session::handle::SessionHandle::sync_agent`] after each turn.
///
/// Only `execution_stats` survives into [`EventLoopMetrics::tool_usage`];
/// the `tool_info` half of the SDK's `tool_name -> {tool_info,
/// execution_stats}` mapping is read here and then discarded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnMetricsSummary {
    /// Token accounting for the turn.
    pub accumulated_usage: AccumulatedUsage,
    /// Latency accounting for the turn.
    pub accumulated_metrics: AccumulatedMetrics,
    /// Cycle accounting for the turn.
    pub cycle_metrics: CycleMetrics,
    /// Per-tool execution stats, keyed by tool name.
    pub tool_usage: BTreeMap<String, ToolExecutionStats>,
}

/// Metrics attached to an assistant message, written only when the turn's
/// `latency_ms` is non-zero (see [`crate::session::handle`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventLoopMetrics {
    /// Latency accounting for the turn that produced this message.
    pub accumulated_metrics: AccumulatedMetrics,
    /// Token accounting for the turn that produced this message.
    pub accumulated_usage: AccumulatedUsage,
    /// Cycle accounting for the turn that produced this message.
    pub cycle_metrics: CycleMetrics,
    /// Per-tool execution stats for the turn, `tool_info` stripped.
    pub tool_usage: BTreeMap<String, ToolExecutionStats>,
}

impl From<&TurnMetricsSummary> for EventLoopMetrics {
    fn from(summary: &TurnMetricsSummary) -> Self {
        Self {
            accumulated_metrics: summary.accumulated_metrics,
            accumulated_usage: summary.accumulated_usage,
            cycle_metrics: summary.cycle_metrics,
            tool_usage: summary.tool_usage.clone(),
        }
    }
}

/// A single message within one agent's transcript.
///
/// `content` is opaque to the store: it is read back verbatim and never
/// interpreted, matching the agent SDK's own content-part shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEntry {
    message_id: MessageId,
    role: Role,
    content: Vec<Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    event_loop_metrics: Option<EventLoopMetrics>,
}

impl MessageEntry {
    /// Creates a new message entry, as appended by
    /// [`crate::session::ports::repository::SessionRepository::create_message`].
    #[must_use]
    pub fn new(
        message_id: MessageId,
        role: Role,
        content: Vec<Value>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id,
            role,
            content,
            created_at: now,
            updated_at: now,
            event_loop_metrics: None,
        }
    }

    /// This message's id, unique within its agent.
    #[must_use]
    pub const fn message_id(&self) -> MessageId {
        self.message_id
    }

    /// The message's role.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// The opaque content parts.
    #[must_use]
    pub fn content(&self) -> &[Value] {
        &self.content
    }

    /// When this entry was first appended.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When this entry was last updated.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Per-turn metrics, present only for assistant turns with non-zero
    /// latency.
    #[must_use]
    pub const fn event_loop_metrics(&self) -> Option<&EventLoopMetrics> {
        self.event_loop_metrics.as_ref()
    }

    /// Replaces the message body wholesale, preserving `created_at` and
    /// bumping `updated_at`; used by `update_message`.
    pub fn replace_body(&mut self, role: Role, content: Vec<Value>, now: DateTime<Utc>) {
        self.role = role;
        self.content = content;
        self.updated_at = now;
    }

    /// Attaches event-loop metrics to this message and bumps `updated_at`.
    pub fn set_event_loop_metrics(&mut self, metrics: EventLoopMetrics, now: DateTime<Utc>) {
        self.event_loop_metrics = Some(metrics);
        self.updated_at = now;
    }
}
