//! Non-blocking dispatcher for metadata/feedback write hooks.
//!
//! Hooks observe a tagged [`Action`] after the underlying write commits.
//! Three guarantees hold: the storage write always runs first and a hook
//! only fires if it succeeded; hook delivery is enqueued on an unbounded
//! channel drained by a background worker, so it never extends the
//! latency of the call that triggered it; and a hook failure is logged
//! and swallowed, never propagated to the caller.
//!
//! A hook may also validate a write before it commits by overriding
//! [`Hook::validate`]; this is the one way a hook can reject a write, and
//! it runs inline (not through the channel) since its result gates the
//! write.
//!
//! [`outbound`] builds on [`Hook`] with the three canonical hook
//! compositions: feedback notification, metadata event, and metadata push.
//! Each is a contract only — this crate ships no SNS/SQS/WebSocket client.

pub mod outbound;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::session::domain::{FeedbackEntry, Metadata, SessionError, SessionId};
use crate::session::ports::repository::{RepositoryResult, SessionRepository};

/// The write a hook is being notified about, carrying only the data
/// relevant to that write.
#[derive(Debug, Clone)]
pub enum Action {
    /// A metadata partial-update committed.
    Update {
        /// The dotted-path mapping that was merged into the metadata tree.
        metadata: BTreeMap<String, Value>,
    },
    /// A metadata delete committed.
    Delete {
        /// The dotted paths that were removed.
        keys: Vec<String>,
    },
    /// A metadata or feedback read completed.
    Get,
    /// A feedback entry was appended.
    AddFeedback {
        /// The entry that was appended.
        entry: FeedbackEntry,
    },
}

/// A user-supplied observer of metadata/feedback writes.
#[async_trait]
pub trait Hook: Send + Sync {
    /// Runs before the write commits. Returning `Err` aborts the write and
    /// surfaces the error to the caller; this is the only legitimate way a
    /// hook blocks a write. The default accepts every write.
    async fn validate(&self, _session_id: &SessionId, _action: &Action) -> RepositoryResult<()> {
        Ok(())
    }

    /// Runs after the write commits, off the caller's critical path. A
    /// returned `Err` is logged with the session id and action, then
    /// swallowed.
    async fn on_committed(&self, session_id: &SessionId, action: &Action) -> RepositoryResult<()>;
}

/// One queued hook invocation.
struct DispatchJob {
    hook: Arc<dyn Hook>,
    session_id: SessionId,
    action: Action,
}

/// Owns the background worker that drains queued hook invocations.
///
/// Cloning a dispatcher shares the same worker and channel; the worker
/// task keeps running until every sender (and the receiver) is dropped,
/// draining whatever is already queued before exiting.
#[derive(Clone)]
pub struct HookDispatcher {
    sender: mpsc::UnboundedSender<DispatchJob>,
}

impl HookDispatcher {
    /// Spawns the background worker and returns a handle to it.
    #[must_use]
    pub fn spawn() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(Self::run(receiver));
        Self { sender }
    }

    async fn run(mut receiver: mpsc::UnboundedReceiver<DispatchJob>) {
        while let Some(job) = receiver.recv().await {
            if let Err(err) = job.hook.on_committed(&job.session_id, &job.action).await {
                tracing::warn!(
                    session_id = %job.session_id,
                    action = ?job.action,
                    error = %err,
                    "hook invocation failed"
                );
            }
        }
    }

    /// Enqueues a hook invocation. Never suspends the caller; a closed
    /// channel (worker gone) is logged and the invocation is dropped.
    pub fn dispatch(&self, hook: Arc<dyn Hook>, session_id: SessionId, action: Action) {
        let job = DispatchJob {
            hook,
            session_id,
            action,
        };
        if self.sender.send(job).is_err() {
            tracing::warn!("hook dispatcher worker is gone, dropping queued invocation");
        }
    }
}

/// Storage-agnostic metadata operations, implemented directly against a
/// repository or wrapped with a hook.
#[async_trait]
pub trait MetadataOps: Send + Sync {
    /// Partial-updates the metadata tree.
    async fn update(
        &self,
        session_id: &SessionId,
        updates: &BTreeMap<String, Value>,
    ) -> RepositoryResult<()>;

    /// Removes the named dotted paths.
    async fn delete(&self, session_id: &SessionId, keys: &[String]) -> RepositoryResult<()>;

    /// Reads the full metadata tree.
    async fn get(&self, session_id: &SessionId) -> RepositoryResult<Metadata>;
}

/// Storage-agnostic feedback operations, implemented directly against a
/// repository or wrapped with a hook.
#[async_trait]
pub trait FeedbackOps: Send + Sync {
    /// Appends a feedback entry.
    async fn add(&self, session_id: &SessionId, entry: FeedbackEntry) -> RepositoryResult<()>;

    /// Lists feedback entries in insertion order.
    async fn list(&self, session_id: &SessionId) -> RepositoryResult<Vec<FeedbackEntry>>;
}

/// Decorates a [`MetadataOps`] with validation and post-commit hook
/// dispatch, without changing its public interface.
pub struct HookedMetadataOps {
    inner: Arc<dyn MetadataOps>,
    hook: Arc<dyn Hook>,
    dispatcher: HookDispatcher,
}

impl HookedMetadataOps {
    /// Wraps `inner` with `hook`, dispatched through `dispatcher`.
    #[must_use]
    pub fn new(inner: Arc<dyn MetadataOps>, hook: Arc<dyn Hook>, dispatcher: HookDispatcher) -> Self {
        Self {
            inner,
            hook,
            dispatcher,
        }
    }
}

#[async_trait]
impl MetadataOps for HookedMetadataOps {
    async fn update(
        &self,
        session_id: &SessionId,
        updates: &BTreeMap<String, Value>,
    ) -> RepositoryResult<()> {
        let action = Action::Update {
            metadata: updates.clone(),
        };
        self.hook.validate(session_id, &action).await?;
        self.inner.update(session_id, updates).await?;
        self.dispatcher
            .dispatch(Arc::clone(&self.hook), session_id.clone(), action);
        Ok(())
    }

    async fn delete(&self, session_id: &SessionId, keys: &[String]) -> RepositoryResult<()> {
        let action = Action::Delete {
            keys: keys.to_vec(),
        };
        self.hook.validate(session_id, &action).await?;
        self.inner.delete(session_id, keys).await?;
        self.dispatcher
            .dispatch(Arc::clone(&self.hook), session_id.clone(), action);
        Ok(())
    }

    async fn get(&self, session_id: &SessionId) -> RepositoryResult<Metadata> {
        self.hook.validate(session_id, &Action::Get).await?;
        let result = self.inner.get(session_id).await?;
        self.dispatcher
            .dispatch(Arc::clone(&self.hook), session_id.clone(), Action::Get);
        Ok(result)
    }
}

/// Decorates a [`FeedbackOps`] with validation and post-commit hook
/// dispatch, without changing its public interface.
pub struct HookedFeedbackOps {
    inner: Arc<dyn FeedbackOps>,
    hook: Arc<dyn Hook>,
    dispatcher: HookDispatcher,
}

impl HookedFeedbackOps {
    /// Wraps `inner` with `hook`, dispatched through `dispatcher`.
    #[must_use]
    pub fn new(inner: Arc<dyn FeedbackOps>, hook: Arc<dyn Hook>, dispatcher: HookDispatcher) -> Self {
        Self {
            inner,
            hook,
            dispatcher,
        }
    }
}

#[async_trait]
impl FeedbackOps for HookedFeedbackOps {
    async fn add(&self, session_id: &SessionId, entry: FeedbackEntry) -> RepositoryResult<()> {
        let action = Action::AddFeedback {
            entry: entry.clone(),
        };
        self.hook.validate(session_id, &action).await?;
        self.inner.add(session_id, entry).await?;
        self.dispatcher
            .dispatch(Arc::clone(&self.hook), session_id.clone(), action);
        Ok(())
    }

    async fn list(&self, session_id: &SessionId) -> RepositoryResult<Vec<FeedbackEntry>> {
        self.hook.validate(session_id, &Action::Get).await?;
        let result = self.inner.list(session_id).await?;
        self.dispatcher
            .dispatch(Arc::clone(&self.hook), session_id.clone(), Action::Get);
        Ok(result)
    }
}

/// The unwrapped [`MetadataOps`]: calls straight through to a repository.
pub struct RepositoryMetadataOps {
    repo: Arc<dyn SessionRepository>,
}

impl RepositoryMetadataOps {
    /// Wraps `repo` with no hook attached.
    #[must_use]
    pub const fn new(repo: Arc<dyn SessionRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl MetadataOps for RepositoryMetadataOps {
    async fn update(
        &self,
        session_id: &SessionId,
        updates: &BTreeMap<String, Value>,
    ) -> RepositoryResult<()> {
        self.repo.update_metadata(session_id, updates).await
    }

    async fn delete(&self, session_id: &SessionId, keys: &[String]) -> RepositoryResult<()> {
        self.repo.delete_metadata(session_id, keys).await
    }

    async fn get(&self, session_id: &SessionId) -> RepositoryResult<Metadata> {
        self.repo.get_metadata(session_id).await
    }
}

/// The unwrapped [`FeedbackOps`]: calls straight through to a repository.
pub struct RepositoryFeedbackOps {
    repo: Arc<dyn SessionRepository>,
}

impl RepositoryFeedbackOps {
    /// Wraps `repo` with no hook attached.
    #[must_use]
    pub const fn new(repo: Arc<dyn SessionRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl FeedbackOps for RepositoryFeedbackOps {
    async fn add(&self, session_id: &SessionId, entry: FeedbackEntry) -> RepositoryResult<()> {
        self.repo.add_feedback(session_id, entry).await
    }

    async fn list(&self, session_id: &SessionId) -> RepositoryResult<Vec<FeedbackEntry>> {
        self.repo.list_feedback(session_id).await
    }
}
