//! Shared test helpers for `PostgreSQL` integration tests.

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use mockable::{Clock, DefaultClock};
use sessionledger::session::adapters::postgres::PostgresSessionRepository;
use std::sync::Arc;
use tokio::runtime::Runtime;

use super::cluster::{ManagedCluster, PostgresCluster};

/// SQL to create the `sessions` table and its indexes.
pub const CREATE_SCHEMA_SQL: &str =
    include_str!("../../migrations/2026-01-01-000000_create_sessions_table/up.sql");

/// Template database name for the pre-migrated schema.
pub const TEMPLATE_DB: &str = "sessionledger_test_template";

/// Provides a [`DefaultClock`] for test fixtures.
#[must_use]
pub fn clock() -> Arc<dyn Clock + Send + Sync> {
    Arc::new(DefaultClock)
}

/// Creates a tokio runtime for async operations in tests.
pub fn test_runtime() -> Result<Runtime, super::cluster::BoxError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| Box::new(err) as super::cluster::BoxError)
}

/// Ensures the template database exists with the schema applied.
pub fn ensure_template(cluster: PostgresCluster) -> Result<(), super::cluster::BoxError> {
    cluster.ensure_template_exists(TEMPLATE_DB, |db_name| {
        let url = cluster.connection().database_url(db_name);
        let mut conn =
            PgConnection::establish(&url).map_err(|err| Box::new(err) as super::cluster::BoxError)?;
        execute_sql_statements(&mut conn, CREATE_SCHEMA_SQL)?;
        Ok(())
    })
}

/// Executes multiple SQL statements from a single string.
///
/// Splits on semicolons and executes each non-empty statement individually.
/// Skips `--` line comments, since migration SQL uses them freely.
pub fn execute_sql_statements(
    conn: &mut PgConnection,
    sql: &str,
) -> Result<(), super::cluster::BoxError> {
    for statement in sql.split(';') {
        let trimmed = statement.trim();
        if trimmed.is_empty() || trimmed.lines().all(|line| line.trim().starts_with("--")) {
            continue;
        }
        diesel::sql_query(trimmed)
            .execute(conn)
            .map_err(|err| Box::new(err) as super::cluster::BoxError)?;
    }
    Ok(())
}

/// Creates a test database from the template and returns a repository
/// backed by it.
pub fn setup_repository(
    cluster: PostgresCluster,
    db_name: &str,
) -> Result<PostgresSessionRepository, super::cluster::BoxError> {
    ensure_template(cluster)?;
    cluster.create_database_from_template(db_name, TEMPLATE_DB)?;
    let url = cluster.connection().database_url(db_name);
    let manager = ConnectionManager::<PgConnection>::new(url);
    let pool = Pool::builder()
        .max_size(4)
        .build(manager)
        .map_err(|err| Box::new(err) as super::cluster::BoxError)?;
    Ok(PostgresSessionRepository::new(pool, clock()))
}

/// Cleans up a test database, logging rather than panicking on failure so
/// a test's own assertion failure is not masked by teardown noise.
pub fn cleanup_database(cluster: &ManagedCluster, db_name: &str) {
    if let Err(err) = cluster.drop_database(db_name) {
        eprintln!("warning: failed to drop test database {db_name}: {err}");
    }
}

/// Guard that ensures test database cleanup runs even if the test panics.
pub struct CleanupGuard<'a> {
    cluster: &'a ManagedCluster,
    db_name: String,
}

impl<'a> CleanupGuard<'a> {
    #[must_use]
    pub const fn new(cluster: &'a ManagedCluster, db_name: String) -> Self {
        Self { cluster, db_name }
    }
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        cleanup_database(self.cluster, &self.db_name);
    }
}
