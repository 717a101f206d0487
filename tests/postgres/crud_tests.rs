//! Basic CRUD operation tests for the `PostgreSQL` session repository.

use std::collections::BTreeMap;

use rstest::rstest;
use serde_json::json;
use sessionledger::session::domain::{AgentId, FeedbackEntry, MessageId, Rating, Role, SessionId};
use sessionledger::session::ports::repository::SessionRepository;

use crate::postgres::cluster::{PostgresCluster, postgres_cluster};
use crate::postgres::helpers::{CleanupGuard, setup_repository, test_runtime};

#[rstest]
fn create_and_read_round_trips_the_document(postgres_cluster: PostgresCluster) {
    let db_name = format!("test_crud_create_read_{}", uuid::Uuid::new_v4());
    let repo = setup_repository(postgres_cluster, &db_name).expect("repository setup");
    let _guard = CleanupGuard::new(postgres_cluster, db_name.clone());
    let session_id = SessionId::new(format!("{db_name}-s1"));

    let rt = test_runtime().expect("runtime");
    rt.block_on(async {
        repo.ensure_indexes(&["priority".into()]).await.expect("ensure indexes");
        let created = repo
            .create_session(&session_id, "chat", Some("demo-app"), &["priority".into()])
            .await
            .expect("create session");
        assert_eq!(created.session_id(), &session_id);
        assert_eq!(created.application_name(), Some("demo-app"));

        let fetched = repo
            .read_session(&session_id)
            .await
            .expect("read session")
            .expect("session exists");
        assert_eq!(fetched.session_viewer_password(), created.session_viewer_password());
    });
}

#[rstest]
fn create_session_twice_conflicts(postgres_cluster: PostgresCluster) {
    let db_name = format!("test_crud_conflict_{}", uuid::Uuid::new_v4());
    let repo = setup_repository(postgres_cluster, &db_name).expect("repository setup");
    let _guard = CleanupGuard::new(postgres_cluster, db_name.clone());
    let session_id = SessionId::new(format!("{db_name}-dup"));

    let rt = test_runtime().expect("runtime");
    rt.block_on(async {
        repo.create_session(&session_id, "chat", None, &[])
            .await
            .expect("first create succeeds");
        let second = repo.create_session(&session_id, "chat", None, &[]).await;
        assert!(second.is_err(), "duplicate session_id must be rejected");
    });
}

#[rstest]
fn agent_and_message_lifecycle(postgres_cluster: PostgresCluster) {
    let db_name = format!("test_crud_agent_message_{}", uuid::Uuid::new_v4());
    let repo = setup_repository(postgres_cluster, &db_name).expect("repository setup");
    let _guard = CleanupGuard::new(postgres_cluster, db_name.clone());
    let session_id = SessionId::new(format!("{db_name}-s1"));
    let agent_id = AgentId::new("agent-1");

    let rt = test_runtime().expect("runtime");
    rt.block_on(async {
        repo.create_session(&session_id, "chat", None, &[])
            .await
            .expect("create session");
        repo.create_agent(&session_id, &agent_id, json!({"model": "base"}))
            .await
            .expect("create agent");
        assert!(
            repo.agent_exists(&session_id, &agent_id)
                .await
                .expect("agent_exists")
        );

        repo.create_message(
            &session_id,
            &agent_id,
            MessageId::new(1),
            Role::User,
            vec![json!({"type": "text", "text": "hello"})],
        )
        .await
        .expect("create message");

        assert_eq!(
            repo.message_count(&session_id, &agent_id)
                .await
                .expect("message_count"),
            1
        );

        let last = repo
            .last_message_id(&session_id, &agent_id)
            .await
            .expect("last_message_id");
        assert_eq!(last, Some(MessageId::new(1)));
    });
}

#[rstest]
fn metadata_partial_update_and_delete(postgres_cluster: PostgresCluster) {
    let db_name = format!("test_crud_metadata_{}", uuid::Uuid::new_v4());
    let repo = setup_repository(postgres_cluster, &db_name).expect("repository setup");
    let _guard = CleanupGuard::new(postgres_cluster, db_name.clone());
    let session_id = SessionId::new(format!("{db_name}-s1"));

    let rt = test_runtime().expect("runtime");
    rt.block_on(async {
        repo.create_session(&session_id, "chat", None, &["priority".into()])
            .await
            .expect("create session");

        let mut updates = BTreeMap::new();
        updates.insert("priority".to_owned(), json!("high"));
        repo.update_metadata(&session_id, &updates)
            .await
            .expect("update metadata");

        let metadata = repo.get_metadata(&session_id).await.expect("get metadata");
        assert_eq!(metadata.get("priority"), Some(&json!("high")));

        repo.delete_metadata(&session_id, &["priority".to_owned()])
            .await
            .expect("delete metadata");
        let metadata = repo.get_metadata(&session_id).await.expect("get metadata");
        assert!(metadata.get("priority").is_none());
    });
}

#[rstest]
fn feedback_is_appended_in_order(postgres_cluster: PostgresCluster) {
    let db_name = format!("test_crud_feedback_{}", uuid::Uuid::new_v4());
    let repo = setup_repository(postgres_cluster, &db_name).expect("repository setup");
    let _guard = CleanupGuard::new(postgres_cluster, db_name.clone());
    let session_id = SessionId::new(format!("{db_name}-s1"));

    let rt = test_runtime().expect("runtime");
    rt.block_on(async {
        repo.create_session(&session_id, "chat", None, &[])
            .await
            .expect("create session");

        let now = chrono::Utc::now();
        repo.add_feedback(
            &session_id,
            FeedbackEntry::new(Some(Rating::Up), "great", serde_json::Map::new(), now),
        )
        .await
        .expect("add feedback");
        repo.add_feedback(
            &session_id,
            FeedbackEntry::new(Some(Rating::Down), "meh", serde_json::Map::new(), now),
        )
        .await
        .expect("add feedback");

        let entries = repo.list_feedback(&session_id).await.expect("list feedback");
        assert_eq!(entries.len(), 2);
    });
}
