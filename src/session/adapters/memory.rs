//! In-memory implementation of [`SessionRepository`], for unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use mockable::Clock;
use serde_json::Value;

use crate::session::domain::{
    AgentBlock, AgentConfig, AgentId, EventLoopMetrics, FeedbackEntry, MessageEntry, MessageId,
    Metadata, Role, Session, SessionError, SessionId,
};
use crate::session::ports::repository::{RepositoryResult, SessionRepository};
use crate::viewer::query::{
    FieldMetadata, SearchFilter, SearchPage, SessionDetail, ViewerRepository, detail_of,
    discover_fields_from_sessions, search_in_memory,
};

/// Thread-safe, process-local implementation of [`SessionRepository`].
///
/// Suitable for unit tests; not durable, not shared across processes.
#[derive(Clone)]
pub struct InMemorySessionRepository {
    sessions: Arc<RwLock<HashMap<SessionId, Session>>>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl InMemorySessionRepository {
    /// Creates an empty repository driven by `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.utc()
    }

    fn with_session<T>(
        &self,
        session_id: &SessionId,
        f: impl FnOnce(&mut Session) -> RepositoryResult<T>,
    ) -> RepositoryResult<T> {
        let mut guard = self
            .sessions
            .write()
            .map_err(|_| SessionError::storage_msg("in-memory lock poisoned"))?;
        let session = guard
            .get_mut(session_id)
            .ok_or_else(|| SessionError::SessionNotFound(session_id.clone()))?;
        f(session)
    }

    fn with_agent<T>(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
        f: impl FnOnce(&mut AgentBlock) -> RepositoryResult<T>,
    ) -> RepositoryResult<T> {
        self.with_session(session_id, |session| {
            let agent = session
                .agent_mut(agent_id)
                .ok_or_else(|| SessionError::AgentNotFound {
                    session_id: session_id.clone(),
                    agent_id: agent_id.clone(),
                })?;
            f(agent)
        })
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn ensure_indexes(&self, _metadata_fields: &[String]) -> RepositoryResult<()> {
        Ok(())
    }

    async fn create_session(
        &self,
        session_id: &SessionId,
        session_type: &str,
        application_name: Option<&str>,
        metadata_fields: &[String],
    ) -> RepositoryResult<Session> {
        let mut guard = self
            .sessions
            .write()
            .map_err(|_| SessionError::storage_msg("in-memory lock poisoned"))?;
        if guard.contains_key(session_id) {
            return Err(SessionError::Conflict(session_id.clone()));
        }
        let session = Session::new(
            session_id.clone(),
            session_type,
            application_name.map(ToOwned::to_owned),
            metadata_fields,
            self.now(),
        );
        guard.insert(session_id.clone(), session.clone());
        Ok(session)
    }

    async fn read_session(&self, session_id: &SessionId) -> RepositoryResult<Option<Session>> {
        let guard = self
            .sessions
            .read()
            .map_err(|_| SessionError::storage_msg("in-memory lock poisoned"))?;
        Ok(guard.get(session_id).cloned())
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
        self.with_session(session_id, |session| {
            session.set_agent(agent_id.clone(), AgentBlock::new(agent_data, now), now);
            Ok(())
        })
    }

    async fn read_agent(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
    ) -> RepositoryResult<Option<Value>> {
        let session = self.read_session(session_id).await?;
        Ok(session
            .and_then(|s| s.agent(agent_id).map(|a| a.agent_data().clone())))
    }

    async fn update_agent(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
        agent_data: Value,
    ) -> RepositoryResult<()> {
        let now = self.now();
        self.with_agent(session_id, agent_id, |agent| {
            agent.replace_agent_data(agent_data, now);
            Ok(())
        })
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
        self.with_agent(session_id, agent_id, |agent| {
            agent.set_model_and_prompt(model, system_prompt, now);
            Ok(())
        })
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
        self.with_agent(session_id, agent_id, |agent| {
            agent.push_message(MessageEntry::new(message_id, role, content, now), now);
            Ok(())
        })
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
        self.with_agent(session_id, agent_id, |agent| {
            let message = agent
                .messages_mut()
                .iter_mut()
                .find(|m| m.message_id() == message_id)
                .ok_or_else(|| SessionError::MessageNotFound {
                    session_id: session_id.clone(),
                    agent_id: agent_id.clone(),
                    message_id,
                })?;
            message.replace_body(role, content, now);
            Ok(())
        })
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
        self.with_agent(session_id, agent_id, |agent| {
            let message = agent
                .messages_mut()
                .iter_mut()
                .find(|m| m.message_id() == message_id)
                .ok_or_else(|| SessionError::MessageNotFound {
                    session_id: session_id.clone(),
                    agent_id: agent_id.clone(),
                    message_id,
                })?;
            message.set_event_loop_metrics(metrics, now);
            Ok(())
        })
    }

    async fn message_count(
        &self,
        session_id: &SessionId,
        agent_id: &AgentId,
    ) -> RepositoryResult<usize> {
        let session = self.read_session(session_id).await?;
        Ok(session.and_then(|s| s.agent(agent_id).map(AgentBlock::message_count)).unwrap_or(0))
    }

    async fn update_metadata(
        &self,
        session_id: &SessionId,
        updates: &BTreeMap<String, Value>,
    ) -> RepositoryResult<()> {
        let now = self.now();
        self.with_session(session_id, |session| {
            session.metadata_mut().update(updates);
            session.touch(now);
            Ok(())
        })
    }

    async fn delete_metadata(
        &self,
        session_id: &SessionId,
        keys: &[String],
    ) -> RepositoryResult<()> {
        let now = self.now();
        self.with_session(session_id, |session| {
            session.metadata_mut().delete(keys);
            session.touch(now);
            Ok(())
        })
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
        self.with_session(session_id, |session| {
            session.push_feedback(entry, now);
            Ok(())
        })
    }

    async fn list_feedback(&self, session_id: &SessionId) -> RepositoryResult<Vec<FeedbackEntry>> {
        let session = self
            .read_session(session_id)
            .await?
            .ok_or_else(|| SessionError::SessionNotFound(session_id.clone()))?;
        Ok(session.feedbacks().to_vec())
    }
}

#[async_trait]
impl ViewerRepository for InMemorySessionRepository {
    async fn search(&self, filter: &SearchFilter) -> RepositoryResult<SearchPage> {
        let guard = self
            .sessions
            .read()
            .map_err(|_| SessionError::storage_msg("in-memory lock poisoned"))?;
        let candidates: Vec<Session> = guard.values().cloned().collect();
        Ok(search_in_memory(&candidates, filter))
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
        let guard = self
            .sessions
            .read()
            .map_err(|_| SessionError::storage_msg("in-memory lock poisoned"))?;
        let candidates: Vec<Session> = guard.values().cloned().collect();
        Ok(discover_fields_from_sessions(&candidates, enum_fields, enum_max_values))
    }
}
