//! Process-wide, reference-counted connection pool.
//!
//! A single [`ConnectionPool`] instance is typically owned by the
//! [`crate::factory`] and shared by every [`crate::session::handle::SessionHandle`]
//! it mints. `initialize` is idempotent for identical parameters and uses
//! double-checked synchronization: a cheap read-lock check first, then a
//! write-lock re-check before actually building (and pinging) a new pool.

use std::sync::Arc;
use std::time::Duration;

use diesel::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::{RunQueryDsl, sql_query};
use tokio::sync::RwLock;

use crate::session::adapters::postgres::PgPool;
use crate::session::domain::SessionError;
use crate::session::ports::repository::RepositoryResult;

/// Pool tuning knobs, with production-sized defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolOptions {
    /// Maximum number of pooled connections.
    pub max_pool_size: u32,
    /// Minimum number of idle connections kept warm.
    pub min_pool_size: u32,
    /// How long an idle connection may sit before being closed.
    pub max_idle_time_ms: u64,
    /// How long to wait for a new physical connection to establish.
    pub connect_timeout_ms: u64,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_pool_size: 100,
            min_pool_size: 10,
            max_idle_time_ms: 30_000,
            connect_timeout_ms: 10_000,
        }
    }
}

/// A point-in-time snapshot returned by [`ConnectionPool::stats`].
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// `"connected"` or `"uninitialized"`.
    pub status: &'static str,
    /// The tuning parameters currently in effect, or the defaults if
    /// uninitialized.
    pub pool_config: PoolOptions,
}

struct Instance {
    connection_string: String,
    options: PoolOptions,
    pool: PgPool,
}

/// A lazily-initialized, reference-counted client for the session store's
/// backing database.
pub struct ConnectionPool {
    instance: RwLock<Option<Arc<Instance>>>,
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionPool {
    /// Creates an uninitialized pool.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            instance: RwLock::const_new(None),
        }
    }

    /// Returns the current client if already initialized with identical
    /// `(connection_string, options)`.
    async fn matching(&self, connection_string: &str, options: &PoolOptions) -> Option<PgPool> {
        let guard = self.instance.read().await;
        guard
            .as_ref()
            .filter(|existing| {
                existing.connection_string == connection_string && &existing.options == options
            })
            .map(|existing| existing.pool.clone())
    }

    /// Initializes the pool, or returns the existing client if parameters
    /// are unchanged. If parameters differ from a prior initialization,
    /// the existing client is replaced (logged as a warning: an
    /// operator-level event, not a per-request one).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] if the pool cannot be built or the
    /// startup ping fails.
    pub async fn initialize(
        &self,
        connection_string: &str,
        options: PoolOptions,
    ) -> RepositoryResult<PgPool> {
        if let Some(pool) = self.matching(connection_string, &options).await {
            return Ok(pool);
        }
        let mut guard = self.instance.write().await;
        if let Some(existing) = guard.as_ref() {
            if existing.connection_string == connection_string && existing.options == options {
                return Ok(existing.pool.clone());
            }
            tracing::warn!("connection pool parameters changed; replacing existing pool");
        }
        let pool = Self::build_and_ping(connection_string, &options).await?;
        *guard = Some(Arc::new(Instance {
            connection_string: connection_string.to_owned(),
            options,
            pool: pool.clone(),
        }));
        Ok(pool)
    }

    async fn build_and_ping(
        connection_string: &str,
        options: &PoolOptions,
    ) -> RepositoryResult<PgPool> {
        let connection_string = connection_string.to_owned();
        let options = options.clone();
        tokio::task::spawn_blocking(move || {
            let manager = ConnectionManager::<PgConnection>::new(&connection_string);
            let pool = Pool::builder()
                .max_size(options.max_pool_size)
                .min_idle(Some(options.min_pool_size))
                .idle_timeout(Some(Duration::from_millis(options.max_idle_time_ms)))
                .connection_timeout(Duration::from_millis(options.connect_timeout_ms))
                .build(manager)
                .map_err(SessionError::storage)?;
            let mut conn = pool.get().map_err(SessionError::storage)?;
            sql_query("SELECT 1")
                .execute(&mut conn)
                .map_err(SessionError::storage)?;
            Ok(pool)
        })
        .await
        .map_err(|err| SessionError::storage_msg(format!("task join error: {err}")))?
    }

    /// Returns the current client, or `None` if never initialized (or
    /// closed since).
    pub async fn get(&self) -> Option<PgPool> {
        self.instance.read().await.as_ref().map(|i| i.pool.clone())
    }

    /// Releases the client. Idempotent.
    pub async fn close(&self) {
        let mut guard = self.instance.write().await;
        if guard.take().is_some() {
            tracing::info!("connection pool closed");
        }
    }

    /// A snapshot of pool status and configuration.
    pub async fn stats(&self) -> PoolStats {
        let guard = self.instance.read().await;
        guard.as_ref().map_or_else(
            || PoolStats {
                status: "uninitialized",
                pool_config: PoolOptions::default(),
            },
            |existing| PoolStats {
                status: "connected",
                pool_config: existing.options.clone(),
            },
        )
    }
}
