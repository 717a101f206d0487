//! Viewer query engine (C7) behaviour against a real `PostgreSQL` cluster.

use rstest::rstest;
use sessionledger::session::domain::SessionId;
use sessionledger::session::ports::repository::SessionRepository;
use sessionledger::viewer::query::{SearchFilter, ViewerRepository};

use crate::postgres::cluster::{PostgresCluster, postgres_cluster};
use crate::postgres::helpers::{CleanupGuard, setup_repository, test_runtime};

#[rstest]
fn search_finds_sessions_by_id_substring(postgres_cluster: PostgresCluster) {
    let db_name = format!("test_viewer_search_{}", uuid::Uuid::new_v4());
    let repo = setup_repository(postgres_cluster, &db_name).expect("repository setup");
    let _guard = CleanupGuard::new(postgres_cluster, db_name.clone());
    let session_id = SessionId::new(format!("{db_name}-needle"));

    let rt = test_runtime().expect("runtime");
    rt.block_on(async {
        repo.create_session(&session_id, "chat", None, &[])
            .await
            .expect("create session");

        let filter = SearchFilter {
            session_id_contains: Some("needle".to_owned()),
            created_after: None,
            created_before: None,
            metadata_contains: Default::default(),
            limit: 10,
            offset: 0,
        };
        let page = repo.search(&filter).await.expect("search");
        assert_eq!(page.sessions.len(), 1);
        assert_eq!(page.sessions[0].session_id, session_id);
    });
}

#[rstest]
fn session_detail_is_none_for_missing_session(postgres_cluster: PostgresCluster) {
    let db_name = format!("test_viewer_detail_missing_{}", uuid::Uuid::new_v4());
    let repo = setup_repository(postgres_cluster, &db_name).expect("repository setup");
    let _guard = CleanupGuard::new(postgres_cluster, db_name.clone());
    let session_id = SessionId::new(format!("{db_name}-absent"));

    let rt = test_runtime().expect("runtime");
    rt.block_on(async {
        let detail = repo.session_detail(&session_id).await.expect("session_detail");
        assert!(detail.is_none());
    });
}

#[rstest]
fn discover_fields_promotes_low_cardinality_metadata_to_enum(postgres_cluster: PostgresCluster) {
    let db_name = format!("test_viewer_discover_{}", uuid::Uuid::new_v4());
    let repo = setup_repository(postgres_cluster, &db_name).expect("repository setup");
    let _guard = CleanupGuard::new(postgres_cluster, db_name.clone());

    let rt = test_runtime().expect("runtime");
    rt.block_on(async {
        for (label, tier) in [("a", "gold"), ("b", "silver"), ("c", "gold")] {
            let session_id = SessionId::new(format!("{db_name}-{label}"));
            repo.create_session(&session_id, "chat", None, &["tier".into()])
                .await
                .expect("create session");
            let mut updates = std::collections::BTreeMap::new();
            updates.insert("tier".to_owned(), serde_json::json!(tier));
            repo.update_metadata(&session_id, &updates)
                .await
                .expect("update metadata");
        }

        let fields = repo
            .discover_fields(&["tier".to_owned()], 10)
            .await
            .expect("discover_fields");
        let tier_field = fields
            .iter()
            .find(|field| field.name == "tier")
            .expect("tier field discovered");
        assert!(matches!(
            tier_field.field_type,
            sessionledger::viewer::query::FieldTypeKind::Enum(_)
        ));
    });
}
