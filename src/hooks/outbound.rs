//! The three canonical outbound hook compositions.
//!
//! Each is a contract only: a small trait a downstream crate implements
//! against its own transport (SNS, SQS, a WebSocket connection registry).
//! This crate never dials out itself — it owns the routing, the
//! allow-list filtering, and the subject/body templating, and calls the
//! trait at the point delivery would happen.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use minijinja::{Environment, context};
use serde_json::Value;

use crate::session::domain::{Rating, SessionError, SessionId};
use crate::session::ports::repository::RepositoryResult;

use super::{Action, Hook};

/// Opaque transport failure from a sink implementation.
#[derive(Debug, thiserror::Error)]
#[error("outbound hook delivery failed: {0}")]
pub struct SinkError(pub String);

/// A transport a [`FeedbackNotificationHook`] delivers rendered
/// subject/body pairs to.
#[async_trait]
pub trait FeedbackSink: Send + Sync {
    /// Delivers one rendered notification.
    async fn send(
        &self,
        session_id: &SessionId,
        rating: Option<Rating>,
        subject: &str,
        body: &str,
    ) -> Result<(), SinkError>;
}

/// One rating-keyed routing destination.
///
/// `sink_name` selects an entry from [`FeedbackNotificationHook`]'s sink
/// table; the sentinel `"none"` disables routing for that rating
/// entirely, matching the source contract's disablement convention.
pub struct RoutingArm {
    sink_name: String,
    subject_template: Option<String>,
    body_template: Option<String>,
}

impl RoutingArm {
    /// Builds a routing arm targeting `sink_name`, with optional
    /// minijinja templates for the notification subject and body.
    /// Templates may reference `{{ session_id }}`, `{{ rating }}`, and
    /// `{{ timestamp }}`.
    #[must_use]
    pub fn new(
        sink_name: impl Into<String>,
        subject_template: Option<String>,
        body_template: Option<String>,
    ) -> Self {
        Self {
            sink_name: sink_name.into(),
            subject_template,
            body_template,
        }
    }

    /// The disabled sentinel: this rating is intentionally not routed.
    #[must_use]
    pub fn disabled(&self) -> bool {
        self.sink_name == "none"
    }
}

fn render_template(
    template: Option<&str>,
    default: &str,
    session_id: &SessionId,
    rating: Option<Rating>,
    timestamp: DateTime<Utc>,
) -> Result<String, SinkError> {
    let Some(template) = template else {
        return Ok(default.to_owned());
    };
    let mut env = Environment::new();
    env.add_template("t", template)
        .map_err(|err| SinkError(err.to_string()))?;
    let tmpl = env.get_template("t").map_err(|err| SinkError(err.to_string()))?;
    let rating_str = match rating {
        Some(Rating::Up) => "up",
        Some(Rating::Down) => "down",
        None => "neutral",
    };
    tmpl.render(context! {
        session_id => session_id.as_str(),
        rating => rating_str,
        timestamp => timestamp.to_rfc3339(),
    })
    .map_err(|err| SinkError(err.to_string()))
}

/// Routes a committed feedback entry to one of three named sinks keyed by
/// rating, rendering an optional subject/body template for each.
pub struct FeedbackNotificationHook {
    positive: RoutingArm,
    negative: RoutingArm,
    neutral: RoutingArm,
    sinks: BTreeMap<String, Arc<dyn FeedbackSink>>,
}

impl FeedbackNotificationHook {
    /// Builds the hook over a table of named sinks; `positive`/`negative`/
    /// `neutral` name entries in `sinks` (or the `"none"` sentinel).
    #[must_use]
    pub fn new(
        positive: RoutingArm,
        negative: RoutingArm,
        neutral: RoutingArm,
        sinks: BTreeMap<String, Arc<dyn FeedbackSink>>,
    ) -> Self {
        Self {
            positive,
            negative,
            neutral,
            sinks,
        }
    }

    fn arm_for(&self, rating: Option<Rating>) -> &RoutingArm {
        match rating {
            Some(Rating::Up) => &self.positive,
            Some(Rating::Down) => &self.negative,
            None => &self.neutral,
        }
    }
}

#[async_trait]
impl Hook for FeedbackNotificationHook {
    async fn on_committed(&self, session_id: &SessionId, action: &Action) -> RepositoryResult<()> {
        let Action::AddFeedback { entry } = action else {
            return Ok(());
        };
        let arm = self.arm_for(entry.rating());
        if arm.disabled() {
            return Ok(());
        }
        let sink = self.sinks.get(&arm.sink_name).ok_or_else(|| {
            SessionError::storage_msg(format!("no feedback sink registered as {:?}", arm.sink_name))
        })?;
        let subject = render_template(
            arm.subject_template.as_deref(),
            entry.comment(),
            session_id,
            entry.rating(),
            entry.created_at(),
        )
        .map_err(|err| SessionError::storage_msg(err.0))?;
        let body = render_template(
            arm.body_template.as_deref(),
            entry.comment(),
            session_id,
            entry.rating(),
            entry.created_at(),
        )
        .map_err(|err| SessionError::storage_msg(err.0))?;
        sink.send(session_id, entry.rating(), &subject, &body)
            .await
            .map_err(|err| SessionError::storage_msg(err.0))?;
        Ok(())
    }
}

/// A transport a [`MetadataEventHook`] submits filtered metadata
/// snapshots to.
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Submits one event payload.
    async fn submit(&self, payload: Value) -> Result<(), SinkError>;
}

fn operation_name(action: &Action) -> Option<&'static str> {
    match action {
        Action::Update { .. } => Some("update"),
        Action::Delete { .. } => Some("delete"),
        Action::Get | Action::AddFeedback { .. } => None,
    }
}

fn filtered_metadata_payload(action: &Action, allow_list: &[String]) -> BTreeMap<String, Value> {
    match action {
        Action::Update { metadata } => metadata
            .iter()
            .filter(|(key, _)| allow_list.contains(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
        Action::Delete { .. } | Action::Get | Action::AddFeedback { .. } => BTreeMap::new(),
    }
}

/// Serializes the allow-listed subset of a metadata write plus
/// `{operation, session_id, timestamp}` and submits it to an external
/// queue. Reads and `AddFeedback` writes are not events and are ignored.
pub struct MetadataEventHook {
    allow_list: Vec<String>,
    queue: Arc<dyn EventQueue>,
}

impl MetadataEventHook {
    /// Builds the hook over `allow_list`, the only metadata keys ever
    /// forwarded to `queue`.
    #[must_use]
    pub fn new(allow_list: Vec<String>, queue: Arc<dyn EventQueue>) -> Self {
        Self { allow_list, queue }
    }
}

#[async_trait]
impl Hook for MetadataEventHook {
    async fn on_committed(&self, session_id: &SessionId, action: &Action) -> RepositoryResult<()> {
        let Some(operation) = operation_name(action) else {
            return Ok(());
        };
        let filtered = filtered_metadata_payload(action, &self.allow_list);
        let payload = serde_json::json!({
            "operation": operation,
            "session_id": session_id.as_str(),
            "timestamp": Utc::now().to_rfc3339(),
            "metadata": filtered,
        });
        self.queue
            .submit(payload)
            .await
            .map_err(|err| SessionError::storage_msg(err.0))
    }
}

/// A transport a [`MetadataPushHook`] delivers to a specific live
/// connection, by id.
#[async_trait]
pub trait ConnectionPush: Send + Sync {
    /// Pushes `payload` to `connection_id`. Returns `Ok(false)` rather
    /// than an error when the connection is simply gone, since that is
    /// an expected steady-state condition, not a delivery failure.
    async fn push(&self, connection_id: &str, payload: Value) -> Result<bool, SinkError>;
}

/// Same allow-list filtering as [`MetadataEventHook`], but delivered to a
/// specific connection named by the `ws_connection_id` key of the write
/// that triggered it. A write that omits `ws_connection_id` is not
/// pushed; a push to a connection that is no longer live is logged, not
/// retried.
pub struct MetadataPushHook {
    allow_list: Vec<String>,
    push: Arc<dyn ConnectionPush>,
}

impl MetadataPushHook {
    /// Builds the hook over `allow_list` and a connection-push transport.
    #[must_use]
    pub fn new(allow_list: Vec<String>, push: Arc<dyn ConnectionPush>) -> Self {
        Self { allow_list, push }
    }
}

#[async_trait]
impl Hook for MetadataPushHook {
    async fn on_committed(&self, session_id: &SessionId, action: &Action) -> RepositoryResult<()> {
        let Action::Update { metadata } = action else {
            return Ok(());
        };
        let Some(Value::String(connection_id)) = metadata.get("ws_connection_id") else {
            return Ok(());
        };
        let filtered = filtered_metadata_payload(action, &self.allow_list);
        let payload = serde_json::json!({
            "operation": "update",
            "session_id": session_id.as_str(),
            "timestamp": Utc::now().to_rfc3339(),
            "metadata": filtered,
        });
        match self.push.push(connection_id, payload).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::debug!(
                    session_id = %session_id,
                    connection_id,
                    "metadata push target connection is gone"
                );
                Ok(())
            }
            Err(err) => Err(SessionError::storage_msg(err.0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::domain::FeedbackEntry;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFeedbackSink {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FeedbackSink for CountingFeedbackSink {
        async fn send(
            &self,
            _session_id: &SessionId,
            _rating: Option<Rating>,
            _subject: &str,
            _body: &str,
        ) -> Result<(), SinkError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap_or_default()
    }

    #[tokio::test]
    async fn disabled_arm_never_calls_the_sink() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut sinks: BTreeMap<String, Arc<dyn FeedbackSink>> = BTreeMap::new();
        sinks.insert(
            "sns".to_owned(),
            Arc::new(CountingFeedbackSink {
                count: Arc::clone(&count),
            }),
        );
        let hook = FeedbackNotificationHook::new(
            RoutingArm::new("none", None, None),
            RoutingArm::new("sns", None, None),
            RoutingArm::new("sns", None, None),
            sinks,
        );
        let entry = FeedbackEntry::new(Some(Rating::Up), "great", serde_json::Map::new(), ts(1));
        hook.on_committed(&SessionId::new("s1"), &Action::AddFeedback { entry })
            .await
            .expect("disabled arm is a no-op, not an error");
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn neutral_rating_routes_to_the_neutral_arm() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut sinks: BTreeMap<String, Arc<dyn FeedbackSink>> = BTreeMap::new();
        sinks.insert(
            "sqs".to_owned(),
            Arc::new(CountingFeedbackSink {
                count: Arc::clone(&count),
            }),
        );
        let hook = FeedbackNotificationHook::new(
            RoutingArm::new("none", None, None),
            RoutingArm::new("none", None, None),
            RoutingArm::new("sqs", None, None),
            sinks,
        );
        let entry = FeedbackEntry::new(None, "", serde_json::Map::new(), ts(1));
        hook.on_committed(&SessionId::new("s1"), &Action::AddFeedback { entry })
            .await
            .expect("neutral routes to the configured sink");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subject_template_interpolates_session_and_rating() {
        struct CapturingSink {
            subject: std::sync::Mutex<Option<String>>,
        }

        #[async_trait]
        impl FeedbackSink for CapturingSink {
            async fn send(
                &self,
                _session_id: &SessionId,
                _rating: Option<Rating>,
                subject: &str,
                _body: &str,
            ) -> Result<(), SinkError> {
                *self.subject.lock().expect("lock") = Some(subject.to_owned());
                Ok(())
            }
        }

        let sink = Arc::new(CapturingSink {
            subject: std::sync::Mutex::new(None),
        });
        let mut sinks: BTreeMap<String, Arc<dyn FeedbackSink>> = BTreeMap::new();
        sinks.insert("sns".to_owned(), sink.clone());
        let hook = FeedbackNotificationHook::new(
            RoutingArm::new(
                "sns",
                Some("[{{ session_id }}] rated {{ rating }}".to_owned()),
                None,
            ),
            RoutingArm::new("none", None, None),
            RoutingArm::new("none", None, None),
            sinks,
        );
        let entry = FeedbackEntry::new(Some(Rating::Up), "nice", serde_json::Map::new(), ts(1));
        hook.on_committed(&SessionId::new("s42"), &Action::AddFeedback { entry })
            .await
            .expect("send succeeds");
        assert_eq!(
            sink.subject.lock().expect("lock").as_deref(),
            Some("[s42] rated up")
        );
    }

    struct RecordingQueue {
        payloads: std::sync::Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl EventQueue for RecordingQueue {
        async fn submit(&self, payload: Value) -> Result<(), SinkError> {
            self.payloads.lock().expect("lock").push(payload);
            Ok(())
        }
    }

    #[tokio::test]
    async fn metadata_event_hook_filters_to_the_allow_list() {
        let queue = Arc::new(RecordingQueue {
            payloads: std::sync::Mutex::new(Vec::new()),
        });
        let hook = MetadataEventHook::new(vec!["priority".to_owned()], queue.clone());
        let mut metadata = BTreeMap::new();
        metadata.insert("priority".to_owned(), serde_json::json!("high"));
        metadata.insert("secret".to_owned(), serde_json::json!("nope"));
        hook.on_committed(&SessionId::new("s1"), &Action::Update { metadata })
            .await
            .expect("event submitted");
        let payloads = queue.payloads.lock().expect("lock");
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["metadata"]["priority"], serde_json::json!("high"));
        assert!(payloads[0]["metadata"].get("secret").is_none());
    }

    #[tokio::test]
    async fn metadata_event_hook_ignores_reads() {
        let queue = Arc::new(RecordingQueue {
            payloads: std::sync::Mutex::new(Vec::new()),
        });
        let hook = MetadataEventHook::new(vec!["priority".to_owned()], queue.clone());
        hook.on_committed(&SessionId::new("s1"), &Action::Get)
            .await
            .expect("reads are ignored");
        assert!(queue.payloads.lock().expect("lock").is_empty());
    }

    struct RecordingPush {
        calls: std::sync::Mutex<Vec<String>>,
        connection_present: bool,
    }

    #[async_trait]
    impl ConnectionPush for RecordingPush {
        async fn push(&self, connection_id: &str, _payload: Value) -> Result<bool, SinkError> {
            self.calls.lock().expect("lock").push(connection_id.to_owned());
            Ok(self.connection_present)
        }
    }

    #[tokio::test]
    async fn metadata_push_hook_requires_a_connection_id() {
        let push = Arc::new(RecordingPush {
            calls: std::sync::Mutex::new(Vec::new()),
            connection_present: true,
        });
        let hook = MetadataPushHook::new(vec!["priority".to_owned()], push.clone());
        let mut metadata = BTreeMap::new();
        metadata.insert("priority".to_owned(), serde_json::json!("high"));
        hook.on_committed(&SessionId::new("s1"), &Action::Update { metadata })
            .await
            .expect("missing connection id is a no-op");
        assert!(push.calls.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn metadata_push_hook_does_not_retry_a_gone_connection() {
        let push = Arc::new(RecordingPush {
            calls: std::sync::Mutex::new(Vec::new()),
            connection_present: false,
        });
        let hook = MetadataPushHook::new(vec!["priority".to_owned()], push.clone());
        let mut metadata = BTreeMap::new();
        metadata.insert("ws_connection_id".to_owned(), serde_json::json!("conn-1"));
        metadata.insert("priority".to_owned(), serde_json::json!("high"));
        hook.on_committed(&SessionId::new("s1"), &Action::Update { metadata })
            .await
            .expect("gone connection is logged, not an error");
        assert_eq!(push.calls.lock().expect("lock").to_owned(), vec!["conn-1"]);
    }
}
