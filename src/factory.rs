//! Shared-pool session handle factory and global singleton.
//!
//! A [`Factory`] is the one place that knows how to turn a `session_id`
//! into a ready-to-use [`SessionHandle`]: it resolves per-call overrides
//! against its defaults, creates the session document if this is the
//! first time this id is seen, and wires up hook-wrapped or plain
//! metadata/feedback operations depending on whether a hook was
//! configured. Most hosts build exactly one factory at start-up and reach
//! it afterwards through [`Global`] rather than threading an `Arc<Factory>`
//! through every call site.

use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tokio::sync::RwLock;

use crate::hooks::{
    FeedbackOps, Hook, HookDispatcher, HookedFeedbackOps, HookedMetadataOps, MetadataOps,
    RepositoryFeedbackOps, RepositoryMetadataOps,
};
use crate::pool::{ConnectionPool, PoolOptions, PoolStats};
use crate::session::adapters::postgres::PostgresSessionRepository;
use crate::session::domain::SessionId;
use crate::session::handle::SessionHandle;
use crate::session::ports::repository::{RepositoryResult, SessionRepository};

/// Defaults applied to every session manager this factory mints, absent an
/// explicit override in [`SessionManagerOverrides`].
#[derive(Clone, Default)]
pub struct FactoryDefaults {
    /// Metadata keys pre-seeded on session creation.
    pub metadata_fields: Vec<String>,
    /// Application partition tag attached at session creation.
    pub application_name: Option<String>,
    /// Hook invoked after every metadata write, if configured.
    pub metadata_hook: Option<Arc<dyn Hook>>,
    /// Hook invoked after every feedback write, if configured.
    pub feedback_hook: Option<Arc<dyn Hook>>,
}

/// Per-call overrides for [`Factory::create_session_manager`].
///
/// Each field is a nested `Option`: the outer `None` means "no override,
/// use the factory default"; an outer `Some` is honored verbatim even when
/// the inner value is itself `None` or empty — that is how a caller
/// deliberately requests no application name or no hook for one session
/// while the factory default supplies one.
#[derive(Clone, Default)]
pub struct SessionManagerOverrides {
    /// Overrides [`FactoryDefaults::metadata_fields`].
    pub metadata_fields: Option<Vec<String>>,
    /// Overrides [`FactoryDefaults::application_name`].
    pub application_name: Option<Option<String>>,
    /// Overrides [`FactoryDefaults::metadata_hook`].
    pub metadata_hook: Option<Option<Arc<dyn Hook>>>,
    /// Overrides [`FactoryDefaults::feedback_hook`].
    pub feedback_hook: Option<Option<Arc<dyn Hook>>>,
}

/// Mints [`SessionHandle`]s sharing one repository, connection pool, and
/// hook dispatcher.
pub struct Factory {
    repository: Arc<dyn SessionRepository>,
    dispatcher: HookDispatcher,
    defaults: FactoryDefaults,
    pool: Option<Arc<ConnectionPool>>,
}

impl Factory {
    /// Builds a factory over a repository the caller already constructed
    /// (and owns the lifecycle of). Use this when the repository borrows a
    /// pool managed elsewhere, or for the in-memory adapter in tests.
    #[must_use]
    pub fn new(repository: Arc<dyn SessionRepository>, defaults: FactoryDefaults) -> Self {
        Self {
            repository,
            dispatcher: HookDispatcher::spawn(),
            defaults,
            pool: None,
        }
    }

    /// Builds a factory that owns its own connection pool: initializes a
    /// [`ConnectionPool`] against `connection_string`, then wraps the
    /// resulting client in a [`PostgresSessionRepository`] that borrows it.
    /// The pool (not the repository) is what `close` releases.
    ///
    /// # Errors
    ///
    /// Returns [`crate::session::domain::SessionError::Storage`] if the
    /// pool cannot be built or the startup ping fails.
    pub async fn connect(
        connection_string: &str,
        options: PoolOptions,
        clock: Arc<dyn mockable::Clock + Send + Sync>,
        defaults: FactoryDefaults,
    ) -> RepositoryResult<Self> {
        let pool = Arc::new(ConnectionPool::new());
        let pg_pool = pool.initialize(connection_string, options).await?;
        let repository = Arc::new(PostgresSessionRepository::new(pg_pool, clock));
        repository.ensure_indexes(&defaults.metadata_fields).await?;
        Ok(Self {
            repository,
            dispatcher: HookDispatcher::spawn(),
            defaults,
            pool: Some(pool),
        })
    }

    /// Builds (or attaches to) the session manager for `session_id`.
    ///
    /// If no session document exists yet for `session_id`, one is created
    /// using the resolved `metadata_fields`/`application_name`; an existing
    /// document is attached to as-is (its own `metadata_fields`/
    /// `application_name`, fixed at its original creation, are left
    /// untouched).
    ///
    /// # Errors
    ///
    /// Returns whatever the underlying repository calls return.
    pub async fn create_session_manager(
        &self,
        session_id: SessionId,
        session_type: &str,
        overrides: SessionManagerOverrides,
    ) -> RepositoryResult<SessionHandle> {
        let metadata_fields = overrides
            .metadata_fields
            .unwrap_or_else(|| self.defaults.metadata_fields.clone());
        let application_name = overrides
            .application_name
            .unwrap_or_else(|| self.defaults.application_name.clone());
        let metadata_hook = overrides
            .metadata_hook
            .unwrap_or_else(|| self.defaults.metadata_hook.clone());
        let feedback_hook = overrides
            .feedback_hook
            .unwrap_or_else(|| self.defaults.feedback_hook.clone());

        if self.repository.read_session(&session_id).await?.is_none() {
            self.repository
                .create_session(
                    &session_id,
                    session_type,
                    application_name.as_deref(),
                    &metadata_fields,
                )
                .await?;
        }

        let metadata_ops: Arc<dyn MetadataOps> = match metadata_hook {
            Some(hook) => Arc::new(HookedMetadataOps::new(
                Arc::new(RepositoryMetadataOps::new(Arc::clone(&self.repository))),
                hook,
                self.dispatcher.clone(),
            )),
            None => Arc::new(RepositoryMetadataOps::new(Arc::clone(&self.repository))),
        };
        let feedback_ops: Arc<dyn FeedbackOps> = match feedback_hook {
            Some(hook) => Arc::new(HookedFeedbackOps::new(
                Arc::new(RepositoryFeedbackOps::new(Arc::clone(&self.repository))),
                hook,
                self.dispatcher.clone(),
            )),
            None => Arc::new(RepositoryFeedbackOps::new(Arc::clone(&self.repository))),
        };

        Ok(SessionHandle::new(
            session_id,
            Arc::clone(&self.repository),
            metadata_ops,
            feedback_ops,
        ))
    }

    /// Connection pool statistics, if this factory owns a pool; `None` for
    /// a factory built over a caller-supplied repository.
    pub async fn stats(&self) -> Option<PoolStats> {
        match &self.pool {
            Some(pool) => Some(pool.stats().await),
            None => None,
        }
    }

    /// Releases the owned connection pool (if any) and the repository's
    /// client (if it owns one).
    ///
    /// # Errors
    ///
    /// Returns whatever the repository's own `close` returns.
    pub async fn close(&self) -> RepositoryResult<()> {
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
        self.repository.close().await
    }
}

/// Raised by [`Global::get`] when no factory has been installed yet.
#[derive(Debug, Error)]
#[error("global session factory has not been initialized")]
pub struct NotInitializedError;

fn slot() -> &'static RwLock<Option<Arc<Factory>>> {
    static GLOBAL: OnceLock<RwLock<Option<Arc<Factory>>>> = OnceLock::new();
    GLOBAL.get_or_init(|| RwLock::new(None))
}

/// Thin process-wide handle to one installed [`Factory`].
///
/// Decouples call sites that just want "the" factory from constructing
/// and threading one through explicitly; the factory itself carries no
/// global state of its own.
pub struct Global;

impl Global {
    /// Installs `factory` as the process-wide instance, replacing any
    /// prior one. A displaced prior instance is closed and the
    /// replacement logged as a warning, the same re-initialize-and-warn
    /// contract [`crate::pool::ConnectionPool::initialize`] honors for its
    /// own singleton client.
    pub async fn init(factory: Arc<Factory>) {
        let previous = slot().write().await.replace(factory);
        if let Some(previous) = previous {
            tracing::warn!("global session factory re-initialized; closing previous instance");
            if let Err(err) = previous.close().await {
                tracing::warn!(error = %err, "error closing previous global session factory");
            }
        }
    }

    /// Returns the installed factory.
    ///
    /// # Errors
    ///
    /// Returns [`NotInitializedError`] if [`Global::init`] was never
    /// called.
    pub async fn get() -> Result<Arc<Factory>, NotInitializedError> {
        slot().read().await.clone().ok_or(NotInitializedError)
    }

    /// Closes and clears the installed factory, if any.
    pub async fn close() {
        let Some(factory) = slot().write().await.take() else {
            return;
        };
        if let Err(err) = factory.close().await {
            tracing::warn!(error = %err, "error closing global session factory");
        }
    }
}
