//! `PostgreSQL` implementation of [`SessionRepository`] using Diesel ORM.
//!
//! Relational realization of a document store: typed columns carry the
//! fields the viewer query engine indexes directly, and the nested
//! `metadata`/`agents`/`feedbacks` tree rides along in a single `document`
//! JSONB column (see the schema module). Mutations that touch the nested
//! tree take a row lock (`SELECT ... FOR UPDATE`), deserialize the
//! document into the same [`Session`] aggregate the in-memory adapter
//! uses, apply the mutation through the aggregate's own methods, and
//! write the whole document back in one statement. This reuses exactly
//! the same domain logic as the in-memory adapter — the only thing that
//! differs between adapters is how a session is fetched and persisted,
//! not how it is mutated — at the cost of serializing the full nested
//! tree on every mutating call rather than patching a single JSON path
//! with `jsonb_set`. For the write volumes this store targets (one
//! session document per conversation, turn-at-a-time updates) that
//! trade-off is cheap and keeps one aggregate as the single source of
//! mutation truth; see `DESIGN.md` for the alternative considered.

use std::collections::BTreeMap;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use mockable::Clock;
use serde_json::Value;
use std::sync::Arc;

use super::blocking_helpers::{PgPool, get_conn, run_blocking};
use super::conversion_helpers::{row_to_session, session_to_document};
use super::models::{DocumentUpdate, NewSessionRow, SessionRow};
use super::schema::sessions;
use crate::session::domain::{
    AgentConfig, AgentId, EventLoopMetrics, FeedbackEntry, MessageEntry, MessageId, Metadata,
    Role, Session, SessionError, SessionId,
};
use crate::session::ports::repository::{RepositoryResult, SessionRepository};
use crate::viewer::query::{
    FieldMetadata, SearchFilter, SearchPage, SessionDetail, ViewerRepository, detail_of,
    discover_fields_from_sessions, search_in_memory,
};

/// `PostgreSQL`-backed [`SessionRepository`].
#[derive(Clone)]
pub struct PostgresSessionRepository {
    pool: PgPool,
    clock: Arc<dyn Clock + Send + Sync>,
    owns_client: bool,
}

impl PostgresSessionRepository {
    /// Wraps a pool shared by the caller (typically the factory); the
    /// repository borrows it and never closes it.
    #[must_use]
    pub fn new(pool: PgPool, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            pool,
            clock,
            owns_client: false,
        }
    }

    /// Builds a dedicated pool from `connection_string` and owns it; `close`
    /// is then meaningful and releases the pool.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] if the pool cannot be built.
    pub fn connect(
        connection_string: &str,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> RepositoryResult<Self> {
        let manager = diesel::r2d2::ConnectionManager::<PgConnection>::new(connection_string);
        let pool = diesel::r2d2::Pool::builder()
            .build(manager)
            .map_err(SessionError::storage)?;
        Ok(Self {
            pool,
            clock,
            owns_client: true,
        })
    }

    /// Returns a reference to the connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn read_row(
        conn: &mut PgConnection,
        session_id: &str,
    ) -> RepositoryResult<Option<SessionRow>> {
        sessions::table
            .filter(sessions::session_id.eq(session_id))
            .select(SessionRow::as_select())
            .first::<SessionRow>(conn)
            .optional()
            .map_err(SessionError::storage)
    }

    /// Locks, mutates, and writes back one session document. Shared by
    /// every mutating method below so the transaction and (de)serialization
    /// mechanics are written exactly once.
    async fn mutate<T, F>(
        &self,
        session_id: SessionId,
        now: chrono::DateTime<chrono::Utc>,
        f: F,
    ) -> RepositoryResult<T>
    where
        F: FnOnce(&mut Session) -> RepositoryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        run_blocking(move || {
            let mut conn = get_conn(&pool)?;
            conn.transaction::<T, SessionError, _>(|tx_conn| {
                let row = sessions::table
                    .filter(sessions::session_id.eq(session_id.as_str()))
                    .select(SessionRow::as_select())
                    .for_update()
                    .first::<SessionRow>(tx_conn)
                    .optional()
                    .map_err(SessionError::storage)?
                    .ok_or_else(|| SessionError::SessionNotFound(session_id.clone()))?;
                let mut session = row_to_session(row)?;
                let result = f(&mut session)?;
                session.touch(now);
                let document = session_to_document(&session)?;
                diesel::update(
                    sessions::table.filter(sessions::session_id.eq(session_id.as_str())),
                )
                .set(DocumentUpdate {
                    document,
                    updated_at: now,
                })
                .execute(tx_conn)
                .map_err(SessionError::storage)?;
                Ok(result)
            })
        })
        .await
    }

    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.utc()
    }
}

#[async_trait]
impl SessionRepository for PostgresSessionRepository {
    async fn ensure_indexes(&self, metadata_fields: &[String]) -> RepositoryResult<()> {
        let pool = self.pool.clone();
        let metadata_fields = metadata_fields.to_vec();
        run_blocking(move || {
            let mut conn = get_conn(&pool)?;
            diesel::sql_query(
                "CREATE INDEX IF NOT EXISTS sessions_application_name_idx \
                 ON sessions (application_name)",
            )
            .execute(&mut conn)
            .map_err(SessionError::storage)?;
            diesel::sql_query(
                "CREATE INDEX IF NOT EXISTS sessions_created_at_idx ON sessions (created_at)",
            )
            .execute(&mut conn)
            .map_err(SessionError::storage)?;
            diesel::sql_query(
                "CREATE INDEX IF NOT EXISTS sessions_updated_at_idx ON sessions (updated_at)",
            )
            .execute(&mut conn)
            .map_err(SessionError::storage)?;
            for field in &metadata_fields {
                let (index_name, path_literal) = metadata_field_index_parts(field);
                diesel::sql_query(format!(
                    "CREATE INDEX IF NOT EXISTS {index_name} \
                     ON sessions ((document #>> '{path_literal}'))"
                ))
                .execute(&mut conn)
                .map_err(SessionError::storage)?;
            }
            Ok(())
        })
        .await
    }

    async fn create_session(
        &self,
        session_id: &SessionId,
        session_type: &str,
        application_name: Option<&str>,
        metadata_fields: &[String],
    ) -> RepositoryResult<Session> {
        let now = self.now();
        let session = Session::new(
            session_id.clone(),
            session_type,
            application_name.map(ToOwned::to_owned),
            metadata_fields,
            now,
        );
        let document = session_to_document(&session)?;
        let new_row = NewSessionRow {
            session_id: session_id.as_str().to_owned(),
            session_type: session_type.to_owned(),
            application_name: application_name.map(ToOwned::to_owned),
            session_viewer_password: session.session_viewer_password().to_owned(),
            created_at: now,
            updated_at: now,
            document,
        };
        let pool = self.pool.clone();
        let sid = session_id.clone();
        run_blocking(move || {
            let mut conn = get_conn(&pool)?;
            diesel::insert_into(sessions::table)
                .values(&new_row)
                .execute(&mut conn)
                .map_err(|err| match err {
                    DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                        SessionError::Conflict(sid.clone())
                    }
                    other => SessionError::storage(other),
                })?;
            Ok(())
        })
        .await?;
        Ok(session)
    }

    async fn read_session(&self, session_id: &SessionId) -> RepositoryResult<Option<Session>> {
        let pool = self.pool.clone();
        let sid = session_id.clone();
        run_blocking(move || {
            let mut conn = get_conn(&pool)?;
            let row = Self::read_row(&mut conn, sid.as_str())?;
            row.map(row_to_session).transpose()
        })
        .await
    }

    async fn session_viewer_password(
        &self,
        session_id: &SessionId,
    ) -> RepositoryResult<Option<String>> {
        Ok(self
            .read_session(session_id)
            .await?
            .map(|s| s.session_viewer_password().to_owned()))
    }

    async fn application_name(
        &self,
        session_id: &SessionId,
    ) -> RepositoryResult<Option<Option<String>>> {
        Ok(self
            .read_session(session_id)
            .await?
            .map(|s| s.application_name().map(ToOwned::to_owned)))
    }

    async fn create_agent(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
        agent_data: Value,
    ) -> RepositoryResult<()> {
        let now = self.now();
        let agent_id = agent_id.clone();
        self.mutate(session_id.clone(), now, move |session| {
            session.set_agent(
                agent_id.clone(),
                crate::session::domain::AgentBlock::new(agent_data, now),
                now,
            );
            Ok(())
        }).await
    }

    async fn read_agent(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
    ) -> RepositoryResult<Option<Value>> {
        let session = self.read_session(session_id).await?;
        Ok(session.and_then(|s| s.agent(agent_id).map(|a| a.agent_data().clone())))
    }

    async fn update_agent(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
        agent_data: Value,
    ) -> RepositoryResult<()> {
        let now = self.now();
        let agent_id = agent_id.clone();
        let sid = session_id.clone();
        self.mutate(session_id.clone(), now, move |session| {
            let agent =
                session
                    .agent_mut(&agent_id)
                    .ok_or_else(|| SessionError::AgentNotFound {
                        session_id: sid.clone(),
                        agent_id: agent_id.clone(),
                    })?;
            agent.replace_agent_data(agent_data, now);
            Ok(())
        }).await
    }

    async fn agent_exists(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
    ) -> RepositoryResult<bool> {
        let session = self.read_session(session_id).await?;
        Ok(session.is_some_and(|s| s.agent(agent_id).is_some()))
    }

    async fn get_agent_config(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
    ) -> RepositoryResult<Option<AgentConfig>> {
        let session = self.read_session(session_id).await?;
        Ok(session.and_then(|s| {
            s.agent(agent_id).map(|a| AgentConfig {
                agent_id: agent_id.clone(),
                model: a.model().map(ToOwned::to_owned),
                system_prompt: a.system_prompt().map(ToOwned::to_owned),
            })
        }))
    }

    async fn update_agent_config(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
        model: Option<String>,
        system_prompt: Option<String>,
    ) -> RepositoryResult<()> {
        let now = self.now();
        let agent_id = agent_id.clone();
        let sid = session_id.clone();
        self.mutate(session_id.clone(), now, move |session| {
            let agent =
                session
                    .agent_mut(&agent_id)
                    .ok_or_else(|| SessionError::AgentNotFound {
                        session_id: sid.clone(),
                        agent_id: agent_id.clone(),
                    })?;
            agent.set_model_and_prompt(model, system_prompt, now);
            Ok(())
        }).await
    }

    async fn list_agent_configs(
        &self,
        session_id: &SessionId,
    ) -> RepositoryResult<Vec<AgentConfig>> {
        let session = self
            .read_session(session_id)
            .await?
            .ok_or_else(|| SessionError::SessionNotFound(session_id.clone()))?;
        let mut configs: Vec<AgentConfig> = session
            .agents()
            .iter()
            .map(|(agent_id, agent)| AgentConfig {
                agent_id: agent_id.clone(),
                model: agent.model().map(ToOwned::to_owned),
                system_prompt: agent.system_prompt().map(ToOwned::to_owned),
            })
            .collect();
        configs.sort_by(|a, b| a.agent_id.as_str().cmp(b.agent_id.as_str()));
        Ok(configs)
    }

    async fn create_message(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
        message_id: MessageId,
        role: Role,
        content: Vec<Value>,
    ) -> RepositoryResult<()> {
        let now = self.now();
        let agent_id = agent_id.clone();
        let sid = session_id.clone();
        self.mutate(session_id.clone(), now, move |session| {
            let agent =
                session
                    .agent_mut(&agent_id)
                    .ok_or_else(|| SessionError::AgentNotFound {
                        session_id: sid.clone(),
                        agent_id: agent_id.clone(),
                    })?;
            agent.push_message(MessageEntry::new(message_id, role, content, now), now);
            Ok(())
        }).await
    }

    async fn read_message(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
        message_id: MessageId,
    ) -> RepositoryResult<Option<MessageEntry>> {
        let session = self.read_session(session_id).await?;
        Ok(session.and_then(|s| {
            s.agent(agent_id)
                .and_then(|a| a.messages().iter().find(|m| m.message_id() == message_id))
                .cloned()
        }))
    }

    async fn update_message(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
        message_id: MessageId,
        role: Role,
        content: Vec<Value>,
    ) -> RepositoryResult<()> {
        let now = self.now();
        let agent_id = agent_id.clone();
        let sid = session_id.clone();
        self.mutate(session_id.clone(), now, move |session| {
            let agent =
                session
                    .agent_mut(&agent_id)
                    .ok_or_else(|| SessionError::AgentNotFound {
                        session_id: sid.clone(),
                        agent_id: agent_id.clone(),
                    })?;
            let message = agent
                .messages_mut()
                .iter_mut()
                .find(|m| m.message_id() == message_id)
                .ok_or_else(|| SessionError::MessageNotFound {
                    session_id: sid.clone(),
                    agent_id: agent_id.clone(),
                    message_id,
                })?;
            message.replace_body(role, content, now);
            Ok(())
        }).await
    }

    async fn list_messages(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
        limit: usize,
        offset: usize,
    ) -> RepositoryResult<Vec<MessageEntry>> {
        let session = self.read_session(session_id).await?;
        let Some(session) = session else {
            return Ok(Vec::new());
        };
        let Some(agent) = session.agent(agent_id) else {
            return Ok(Vec::new());
        };
        let mut messages: Vec<MessageEntry> = agent.messages().to_vec();
        messages.sort_by_key(MessageEntry::created_at);
        Ok(messages.into_iter().skip(offset).take(limit).collect())
    }

    async fn last_message_id(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
    ) -> RepositoryResult<Option<MessageId>> {
        let session = self.read_session(session_id).await?;
        Ok(session.and_then(|s| {
            s.agent(agent_id)
                .and_then(|a| a.messages().last())
                .map(MessageEntry::message_id)
        }))
    }

    async fn set_message_metrics(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
        message_id: MessageId,
        metrics: EventLoopMetrics,
    ) -> RepositoryResult<()> {
        let now = self.now();
        let agent_id = agent_id.clone();
        let sid = session_id.clone();
        self.mutate(session_id.clone(), now, move |session| {
            let agent =
                session
                    .agent_mut(&agent_id)
                    .ok_or_else(|| SessionError::AgentNotFound {
                        session_id: sid.clone(),
                        agent_id: agent_id.clone(),
                    })?;
            let message = agent
                .messages_mut()
                .iter_mut()
                .find(|m| m.message_id() == message_id)
                .ok_or_else(|| SessionError::MessageNotFound {
                    session_id: sid.clone(),
                    agent_id: agent_id.clone(),
                    message_id,
                })?;
            message.set_event_loop_metrics(metrics, now);
            Ok(())
        }).await
    }

    async fn message_count(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
    ) -> RepositoryResult<usize> {
        let session = self.read_session(session_id).await?;
        Ok(session
            .and_then(|s| s.agent(agent_id).map(crate::session::domain::AgentBlock::message_count))
            .unwrap_or(0))
    }

    async fn update_metadata(
        &self,
        session_id: &SessionId,
        updates: &BTreeMap<String, Value>,
    ) -> RepositoryResult<()> {
        let now = self.now();
        let updates = updates.clone();
        self.mutate(session_id.clone(), now, move |session| {
            session.metadata_mut().update(&updates);
            Ok(())
        }).await
    }

    async fn delete_metadata(
        &self,
        session_id: &SessionId,
        keys: &[String],
    ) -> RepositoryResult<()> {
        let now = self.now();
        let keys = keys.to_vec();
        self.mutate(session_id.clone(), now, move |session| {
            session.metadata_mut().delete(&keys);
            Ok(())
        }).await
    }

    async fn get_metadata(&self, session_id: &SessionId) -> RepositoryResult<Metadata> {
        let session = self
            .read_session(session_id)
            .await?
            .ok_or_else(|| SessionError::SessionNotFound(session_id.clone()))?;
        Ok(session.metadata().clone())
    }

    async fn add_feedback(
        &self,
        session_id: &SessionId,
        entry: FeedbackEntry,
    ) -> RepositoryResult<()> {
        let now = self.now();
        self.mutate(session_id.clone(), now, move |session| {
            session.push_feedback(entry, now);
            Ok(())
        }).await
    }

    async fn list_feedback(&self, session_id: &SessionId) -> RepositoryResult<Vec<FeedbackEntry>> {
        let session = self
            .read_session(session_id)
            .await?
            .ok_or_else(|| SessionError::SessionNotFound(session_id.clone()))?;
        Ok(session.feedbacks().to_vec())
    }

    fn owns_client(&self) -> bool {
        self.owns_client
    }

    async fn close(&self) -> RepositoryResult<()> {
        if self.owns_client {
            tracing::info!("closing owned postgres session pool");
        }
        Ok(())
    }
}

impl PostgresSessionRepository {
    /// Loads every session row and reconstructs the domain aggregate for
    /// each. The viewer query engine's filter/sort/field-discovery logic
    /// is written once against `Session` and shared by every adapter (see
    /// the module doc); a catalog scan here keeps this adapter's search
    /// semantics identical to the in-memory one rather than reimplemented
    /// against `JSONB` operators. This trades index-accelerated filtering
    /// for semantic consistency, which is acceptable at the
    /// one-document-per-conversation scale this store targets; see
    /// `DESIGN.md` for the alternative considered.
    async fn load_all(&self) -> RepositoryResult<Vec<Session>> {
        let pool = self.pool.clone();
        run_blocking(move || {
            let mut conn = get_conn(&pool)?;
            let rows = sessions::table
                .select(SessionRow::as_select())
                .load::<SessionRow>(&mut conn)
                .map_err(SessionError::storage)?;
            rows.into_iter().map(row_to_session).collect()
        })
        .await
    }
}

#[async_trait]
impl ViewerRepository for PostgresSessionRepository {
    async fn search(&self, filter: &SearchFilter) -> RepositoryResult<SearchPage> {
        let sessions = self.load_all().await?;
        Ok(search_in_memory(&sessions, filter))
    }

    async fn session_detail(&self, session_id: &SessionId) -> RepositoryResult<Option<SessionDetail>> {
        let session = self.read_session(session_id).await?;
        Ok(session.map(|s| detail_of(&s)))
    }

    async fn discover_fields(
        &self,
        enum_fields: &[String],
        enum_max_values: usize,
    ) -> RepositoryResult<Vec<FieldMetadata>> {
        let sessions = self.load_all().await?;
        Ok(discover_fields_from_sessions(&sessions, enum_fields, enum_max_values))
    }
}

/// Builds the index name and `#>>` path literal for a configured
/// `metadata.<field>` entry. Dots in `field` delimit nested path segments,
/// matching [`crate::session::domain::Metadata`]'s own dotted-path
/// semantics; any segment character outside `[A-Za-z0-9_]` is dropped from
/// the index name, and a stray `{`/`}`/`'` in a segment is escaped so it
/// cannot break out of the path literal.
fn metadata_field_index_parts(field: &str) -> (String, String) {
    let segments: Vec<&str> = field.split('.').collect();
    let slug: String = segments
        .iter()
        .map(|segment| {
            segment
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("_");
    let index_name = format!("sessions_metadata_{slug}_idx");
    let escaped_segments: Vec<String> = segments
        .iter()
        .map(|segment| segment.replace('\'', "''").replace(['{', '}'], "_"))
        .collect();
    let path_literal = format!("{{metadata,{}}}", escaped_segments.join(","));
    (index_name, path_literal)
}
