//! Session ledger: persistence and observation layer for multi-agent sessions.
//!
//! This crate provides the storage core for recording multi-agent
//! conversational sessions — transcripts, per-turn metrics, user feedback,
//! and an extensible metadata bag — and a read-side query engine for a
//! viewer service to search and inspect them.
//!
//! # Architecture
//!
//! The crate follows hexagonal architecture principles:
//!
//! - **Domain**: Pure business logic with no infrastructure dependencies
//! - **Ports**: Abstract trait interfaces for external interactions
//! - **Adapters**: Concrete implementations of ports (database, in-memory)
//!
//! # Modules
//!
//! - [`session`]: Session/agent/message/feedback domain model and repository
//! - [`pool`]: Process-wide, reference-counted database connection pool
//! - [`hooks`]: Non-blocking dispatcher for metadata/feedback write hooks
//! - [`factory`]: Shared-pool session handle factory and global singleton
//! - [`tool`]: Metadata operations exposed as an agent-callable tool
//! - [`viewer`]: Read-only search/timeline query engine and access control
//! - [`config`]: Environment-driven settings for every component above

pub mod config;
pub mod factory;
pub mod hooks;
pub mod pool;
pub mod session;
pub mod tool;
pub mod viewer;
pub mod worker;
