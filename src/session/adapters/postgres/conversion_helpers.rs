//! Conversions between [`SessionRow`] and the domain [`Session`] aggregate.

use std::collections::HashMap;

use serde_json::Value;

use crate::session::domain::{AgentBlock, AgentId, FeedbackEntry, Metadata, Session, SessionError};
use crate::session::ports::repository::RepositoryResult;

use super::models::SessionRow;

/// Maps a serialization failure into a [`SessionError::Storage`], since a
/// malformed `document` column indicates a corrupted row rather than a
/// caller mistake.
pub(super) fn ser_err(err: serde_json::Error) -> SessionError {
    SessionError::storage_msg(format!("document deserialization failed: {err}"))
}

/// Reconstructs a [`Session`] from its relational row.
pub(super) fn row_to_session(row: SessionRow) -> RepositoryResult<Session> {
    let document = row.document;
    let metadata_value = document
        .get("metadata")
        .cloned()
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    let agents_value = document
        .get("agents")
        .cloned()
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    let feedbacks_value = document
        .get("feedbacks")
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()));

    let agents: HashMap<AgentId, AgentBlock> =
        serde_json::from_value(agents_value).map_err(ser_err)?;
    let feedbacks: Vec<FeedbackEntry> = serde_json::from_value(feedbacks_value).map_err(ser_err)?;
    let metadata = Metadata::from_value(metadata_value);

    Ok(Session::from_parts(
        row.session_id.into(),
        row.session_type,
        row.application_name,
        row.session_viewer_password,
        row.created_at,
        row.updated_at,
        metadata,
        agents,
        feedbacks,
    ))
}

/// Builds the `document` JSONB payload for `session`.
pub(super) fn session_to_document(session: &Session) -> RepositoryResult<Value> {
    Ok(serde_json::json!({
        "metadata": session.metadata().as_value(),
        "agents": serde_json::to_value(session.agents()).map_err(ser_err)?,
        "feedbacks": serde_json::to_value(session.feedbacks()).map_err(ser_err)?,
    }))
}
