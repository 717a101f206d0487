//! Domain types for the session store.
//!
//! Pure types with no infrastructure dependencies: the session aggregate,
//! its nested agent/message/feedback collections, and the metadata bag.
//! Everything here is serialisable via serde because the same shapes are
//! what gets written into (and read back out of) the `document` JSONB
//! column described in the physical storage mapping.

mod agent;
mod error;
mod feedback;
mod ids;
mod message;
mod metadata;
mod session;

pub use agent::{AgentBlock, AgentConfig};
pub use error::SessionError;
pub use feedback::{FeedbackEntry, Rating};
pub use ids::{AgentId, MessageId, SessionId};
pub use message::{
    AccumulatedMetrics, AccumulatedUsage, CycleMetrics, EventLoopMetrics, MessageEntry, Role,
    ToolExecutionStats, TurnMetricsSummary,
};
pub use metadata::Metadata;
pub use session::Session;
