//! Blocking-operation helpers shared by the `PostgreSQL` session adapter.
//!
//! Every Diesel call is synchronous, so it is offloaded to
//! [`tokio::task::spawn_blocking`] to avoid starving the async runtime.

use diesel::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};

use crate::session::domain::SessionError;
use crate::session::ports::repository::RepositoryResult;

/// `PostgreSQL` connection pool type used by the session adapters.
pub type PgPool = Pool<ConnectionManager<PgConnection>>;

/// Pooled connection type for internal use.
pub(super) type PooledConn = PooledConnection<ConnectionManager<PgConnection>>;

/// Runs a blocking database operation on a dedicated thread pool.
pub(super) async fn run_blocking<F, T>(f: F) -> RepositoryResult<T>
where
    F: FnOnce() -> RepositoryResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SessionError::storage_msg(format!("task join error: {e}")))?
}

/// Obtains a connection from the pool.
pub(super) fn get_conn(pool: &PgPool) -> RepositoryResult<PooledConn> {
    pool.get().map_err(SessionError::storage)
}
