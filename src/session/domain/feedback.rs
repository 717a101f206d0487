//! User feedback entries, appended to a session and never mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A rating attached to a feedback entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    /// A positive rating.
    Up,
    /// A negative rating.
    Down,
}

/// One feedback entry appended to a session's `feedbacks` sequence.
///
/// `extra` carries any additional caller-supplied keys verbatim; the store
/// does not interpret them beyond passing them through to the viewer and
/// to outbound hooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    rating: Option<Rating>,
    comment: String,
    created_at: DateTime<Utc>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl FeedbackEntry {
    /// Creates a feedback entry, stamping `created_at`.
    #[must_use]
    pub fn new(
        rating: Option<Rating>,
        comment: impl Into<String>,
        extra: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            rating,
            comment: comment.into(),
            created_at: now,
            extra,
        }
    }

    /// The rating, if one was given.
    #[must_use]
    pub const fn rating(&self) -> Option<Rating> {
        self.rating
    }

    /// The free-text comment, possibly empty.
    #[must_use]
    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// When the feedback was added.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Caller-supplied keys beyond `rating`/`comment`.
    #[must_use]
    pub const fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
}
