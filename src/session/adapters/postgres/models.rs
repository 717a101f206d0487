//! Diesel row models for the `sessions` table.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

use super::schema::sessions;

/// Query result row for a session record.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = sessions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SessionRow {
    /// Primary key.
    pub session_id: String,
    /// Opaque session-type tag.
    pub session_type: String,
    /// Immutable application partition.
    pub application_name: Option<String>,
    /// Per-session viewer password.
    pub session_viewer_password: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Nested metadata/agents/feedbacks tree.
    pub document: Value,
}

/// Insert model for a new session record.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSessionRow {
    /// Primary key.
    pub session_id: String,
    /// Opaque session-type tag.
    pub session_type: String,
    /// Immutable application partition.
    pub application_name: Option<String>,
    /// Per-session viewer password.
    pub session_viewer_password: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Nested metadata/agents/feedbacks tree.
    pub document: Value,
}

/// Changeset used to write the nested document back after a mutation.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = sessions)]
pub struct DocumentUpdate {
    /// Replacement document tree.
    pub document: Value,
    /// New `updated_at` stamp.
    pub updated_at: DateTime<Utc>,
}
