//! `PostgreSQL` implementation of `SessionRepository` using Diesel ORM.
//!
//! Realizes the document-per-session model on a relational schema: typed
//! columns for everything the viewer query engine filters or sorts on,
//! plus a single `document` JSONB column for the nested
//! `metadata`/`agents`/`feedbacks` tree. See `repository`'s module doc
//! for the mutation strategy.

mod blocking_helpers;
mod conversion_helpers;
mod models;
mod repository;
mod schema;

pub use blocking_helpers::PgPool;
pub use repository::PostgresSessionRepository;
