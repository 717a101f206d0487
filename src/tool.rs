//! Adapts metadata operations to an agent-callable tool.
//!
//! `action ∈ {"get", "set", "update", "delete"}`; `"set"` and `"update"`
//! are synonyms. Agents may pass `metadata`/`keys` as a JSON-encoded
//! string instead of a structured value — [`ToolInput`] accepts both and
//! parses the string form before dispatch, returning a human-readable
//! [`SessionError::Validation`] when parsing fails.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value, json};

use crate::hooks::MetadataOps;
use crate::session::domain::{SessionError, SessionId};

/// Input accepted for the `metadata`/`keys` tool arguments: either an
/// already-structured JSON value, or a raw string the agent expects the
/// tool to parse as JSON.
#[derive(Debug, Clone)]
pub enum ToolInput {
    /// A structured value, used as-is.
    Value(Value),
    /// A JSON-encoded string, parsed before use.
    Raw(String),
}

impl ToolInput {
    fn into_value(self) -> Result<Value, SessionError> {
        match self {
            Self::Value(value) => Ok(value),
            Self::Raw(raw) => serde_json::from_str(&raw).map_err(|err| {
                SessionError::Validation(format!("could not parse JSON string: {err}"))
            }),
        }
    }

    fn into_metadata_map(self) -> Result<BTreeMap<String, Value>, SessionError> {
        match self.into_value()? {
            Value::Object(map) => Ok(map.into_iter().collect()),
            other => Err(SessionError::Validation(format!(
                "expected a JSON object for `metadata`, got {other}"
            ))),
        }
    }

    fn into_keys(self) -> Result<Vec<String>, SessionError> {
        match self.into_value()? {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(key) => Ok(key),
                    other => Err(SessionError::Validation(format!(
                        "expected string keys, got {other}"
                    ))),
                })
                .collect(),
            other => Err(SessionError::Validation(format!(
                "expected a JSON array for `keys`, got {other}"
            ))),
        }
    }
}

/// A metadata tool bound to one session, suitable for handing to an
/// agent's tool registry.
pub struct MetadataTool {
    session_id: SessionId,
    ops: Arc<dyn MetadataOps>,
}

impl MetadataTool {
    /// Builds a tool over `ops`, scoped to `session_id`.
    #[must_use]
    pub const fn new(session_id: SessionId, ops: Arc<dyn MetadataOps>) -> Self {
        Self { session_id, ops }
    }

    /// Dispatches one tool call.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Validation`] for an unknown action, a
    /// missing required argument, or an argument that fails to parse as
    /// JSON; returns whatever the underlying [`MetadataOps`] call returns
    /// otherwise.
    pub async fn call(
        &self,
        action: &str,
        metadata: Option<ToolInput>,
        keys: Option<ToolInput>,
    ) -> Result<Value, SessionError> {
        match action {
            "set" | "update" => self.set_or_update(metadata).await,
            "get" => self.get(keys).await,
            "delete" => self.delete(keys).await,
            other => Err(SessionError::Validation(format!(
                "unknown metadata tool action: {other}"
            ))),
        }
    }

    async fn set_or_update(&self, metadata: Option<ToolInput>) -> Result<Value, SessionError> {
        let metadata = metadata.ok_or_else(|| {
            SessionError::Validation("`set`/`update` requires a `metadata` argument".to_owned())
        })?;
        let updates = metadata.into_metadata_map()?;
        self.ops.update(&self.session_id, &updates).await?;
        Ok(json!({ "status": "ok" }))
    }

    async fn get(&self, keys: Option<ToolInput>) -> Result<Value, SessionError> {
        let full = self.ops.get(&self.session_id).await?;
        let Some(keys) = keys else {
            return Ok(full.as_value());
        };
        let keys = keys.into_keys()?;
        let mut present = Map::new();
        let mut missing = Vec::new();
        for key in keys {
            match full.get_path(&key) {
                Some(value) => {
                    present.insert(key, value.clone());
                }
                None => missing.push(key),
            }
        }
        Ok(json!({ "values": present, "missing": missing }))
    }

    async fn delete(&self, keys: Option<ToolInput>) -> Result<Value, SessionError> {
        let keys = keys
            .ok_or_else(|| SessionError::Validation("`delete` requires a `keys` argument".to_owned()))?
            .into_keys()?;
        if keys.is_empty() {
            return Err(SessionError::Validation(
                "`delete` requires at least one key".to_owned(),
            ));
        }
        self.ops.delete(&self.session_id, &keys).await?;
        Ok(json!({ "status": "ok" }))
    }
}
