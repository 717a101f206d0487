//! Session domain model, repository port, and adapters.
//!
//! - **Domain**: [`domain::Session`], [`domain::AgentBlock`], [`domain::MessageEntry`],
//!   [`domain::Metadata`], [`domain::FeedbackEntry`] and the error taxonomy in
//!   [`domain::SessionError`].
//! - **Ports**: [`ports::SessionRepository`], the storage-agnostic trait every
//!   adapter below implements.
//! - **Adapters**: [`adapters::memory::InMemorySessionRepository`] for tests
//!   and embedded use, [`adapters::postgres::PostgresSessionRepository`] for
//!   production.
//! - **Handle**: [`handle::SessionHandle`], the per-session facade that turns
//!   repository calls plus hook dispatch into the API an agent-SDK event loop
//!   actually calls.

pub mod adapters;
pub mod domain;
pub mod handle;
pub mod ports;

pub use domain::{
    AgentBlock, AgentConfig, AgentId, EventLoopMetrics, FeedbackEntry, MessageEntry, MessageId,
    Metadata, Session, SessionError, SessionId,
};
pub use handle::SessionHandle;
pub use ports::SessionRepository;
