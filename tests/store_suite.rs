//! Store and pipeline behaviour against a live PostgreSQL instance
//!
//! These tests need a pgvector-enabled database. Set
//! `PROBEGATE_TEST_DATABASE_URL` to run them; without it every test skips.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use probegate::context::MissionContext;
use probegate::embed::{Embedder, HashEmbedder, EMBEDDING_DIM};
use probegate::http::logging::EffectiveRequest;
use probegate::http::{LoggingPipeline, ResponseEnvelope};
use probegate::mcp::ToolHandler;
use probegate::store::models::{ContextAuthor, ContextChangeType, Protocol, RiskLevel, TargetStatus};
use probegate::store::{MissionUpdate, Store, TargetDefaults};
use probegate::tools::contexts::UpdateTargetContextTool;
use probegate::tools::library::{AddToLibraryTool, SearchLibraryTool};
use probegate::tools::missions::RecordActionTool;
use probegate::tools::ToolContext;

async fn test_store() -> Option<Arc<Store>> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
    let Ok(url) = std::env::var("PROBEGATE_TEST_DATABASE_URL") else {
        eprintln!("PROBEGATE_TEST_DATABASE_URL not set; skipping store test");
        return None;
    };
    let store = Store::connect(&url, 5).await.expect("should connect");
    store.migrate().await.expect("should migrate");
    Some(Arc::new(store))
}

fn unique_host(prefix: &str) -> String {
    format!("{prefix}-{}.test", Uuid::new_v4().simple())
}

fn pipeline(store: &Arc<Store>) -> LoggingPipeline {
    LoggingPipeline::new(
        Arc::clone(store),
        1024 * 1024,
        1024 * 1024,
        &["authorization".to_string(), "proxy-authorization".to_string()],
    )
}

fn ok_envelope(final_url: &str, body: &str) -> ResponseEnvelope {
    ResponseEnvelope {
        status: Some(200),
        headers: BTreeMap::new(),
        body: body.to_string(),
        body_truncated: false,
        response_size: Some(body.len() as i64),
        elapsed_ms: 12.5,
        final_url: final_url.to_string(),
        error: None,
        logging_errors: Vec::new(),
    }
}

fn effective(method: &str, url: &str, mission_id: Option<Uuid>) -> EffectiveRequest {
    EffectiveRequest {
        method: method.to_string(),
        requested_url: url.to_string(),
        query_params: BTreeMap::new(),
        headers: BTreeMap::new(),
        cookies: BTreeMap::new(),
        body: None,
        mission_id,
    }
}

fn tool_context(store: &Arc<Store>) -> Arc<ToolContext> {
    Arc::new(ToolContext {
        store: Some(Arc::clone(store)),
        embedder: Some(Arc::new(HashEmbedder)),
        mission: Arc::new(MissionContext::new()),
    })
}

async fn call(tool: &dyn ToolHandler, args: Value) -> Value {
    let output = tool.execute(args).await.expect("tools fold their own errors");
    let text = output.first_text().expect("envelope text block");
    serde_json::from_str(text).expect("envelope JSON")
}

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_upsert_is_idempotent_and_normalises() {
    let Some(store) = test_store().await else { return };
    let host = unique_host("upsert");

    let (first, created) = store
        .targets()
        .upsert(&host.to_uppercase(), Some(443), Protocol::Https, TargetDefaults::default())
        .await
        .expect("first upsert");
    assert!(created);
    assert_eq!(first.host, host);
    assert_eq!(first.port, None, "443 should normalise away for https");

    let (second, created) = store
        .targets()
        .upsert(&host, None, Protocol::Https, TargetDefaults {
            status: TargetStatus::Blocked,
            risk_level: RiskLevel::Critical,
            title: Some("should be ignored".into()),
        })
        .await
        .expect("second upsert");
    assert!(!created);
    assert_eq!(second.id, first.id);
    assert_eq!(second.status, TargetStatus::Active, "conflict returns the row unchanged");
    assert_eq!(second.risk_level, RiskLevel::Medium);
}

#[tokio::test]
async fn test_auto_target_creation_on_first_request() {
    let Some(store) = test_store().await else { return };
    let host = unique_host("auto");
    let url = format!("https://{host}:443/v1/ping");

    let failed = pipeline(&store)
        .record(&effective("GET", &url, None), &ok_envelope(&url, "pong"))
        .await;
    assert!(failed.is_empty(), "failed steps: {failed:?}");

    let target = store
        .targets()
        .get_by_endpoint(&host, None, Protocol::Https)
        .await
        .expect("lookup")
        .expect("target auto-created");
    assert_eq!(target.port, None);
    assert_eq!(target.status, TargetStatus::Active);

    let requests = store
        .requests()
        .recent_for_host(&host, 10)
        .await
        .expect("recent requests");
    assert_eq!(requests.len(), 1);
    assert_eq!(target.last_activity, requests[0].created_at);

    let summary = store
        .targets()
        .summary(target.id)
        .await
        .expect("summary")
        .expect("summary exists");
    assert_eq!(summary.request_count, 1);
}

#[tokio::test]
async fn test_redirect_attribution_uses_final_url() {
    let Some(store) = test_store().await else { return };
    let final_host = unique_host("redirected");
    let final_url = format!("https://{final_host}/home");

    pipeline(&store)
        .record(
            &effective("GET", "http://a.test/", None),
            &ok_envelope(&final_url, "landed"),
        )
        .await;

    let requests = store
        .requests()
        .recent_for_host(&final_host, 1)
        .await
        .expect("recent requests");
    assert_eq!(requests[0].url, final_url);
    assert_eq!(requests[0].host, final_host);

    assert!(store
        .targets()
        .get_by_endpoint(&final_host, None, Protocol::Https)
        .await
        .expect("lookup")
        .is_some());
}

// ---------------------------------------------------------------------------
// Context chain
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_context_chain_has_no_gaps() {
    let Some(store) = test_store().await else { return };
    let (target, _) = store
        .targets()
        .upsert(&unique_host("chain"), None, Protocol::Https, TargetDefaults::default())
        .await
        .expect("target");

    let mut head = None;
    for i in 1..=3 {
        let version = store
            .contexts()
            .append(
                target.id,
                head,
                None,
                Some(format!("note {i}")),
                ContextAuthor::Agent,
                Some(format!("update {i}")),
                if i == 1 {
                    ContextChangeType::Initial
                } else {
                    ContextChangeType::AgentUpdate
                },
            )
            .await
            .expect("append");
        assert_eq!(version.version, i);
        head = Some(version.id);
    }

    // Walk parent_version_id from the head: versions 3, 2, 1 exactly.
    let refreshed = store.targets().get(target.id).await.expect("get").expect("target");
    let mut cursor = refreshed.current_context_id;
    let mut seen = Vec::new();
    while let Some(id) = cursor {
        let context = store.contexts().get(id).await.expect("get").expect("context");
        seen.push(context.version);
        cursor = context.parent_version_id;
    }
    assert_eq!(seen, vec![3, 2, 1]);

    let history = store.contexts().history(target.id, 10).await.expect("history");
    let versions: Vec<i32> = history.iter().map(|c| c.version).collect();
    assert_eq!(versions, vec![3, 2, 1]);
}

#[tokio::test]
async fn test_concurrent_append_loses_exactly_one() {
    let Some(store) = test_store().await else { return };
    let (target, _) = store
        .targets()
        .upsert(&unique_host("race"), None, Protocol::Https, TargetDefaults::default())
        .await
        .expect("target");

    // Both writers observed the same (empty) head.
    let a = store.contexts();
    let b = store.contexts();
    let target_id = target.id;
    let first = tokio::spawn(async move {
        a.append(
            target_id,
            None,
            None,
            Some("writer a".into()),
            ContextAuthor::Agent,
            None,
            ContextChangeType::Initial,
        )
        .await
    });
    let second = tokio::spawn(async move {
        b.append(
            target_id,
            None,
            None,
            Some("writer b".into()),
            ContextAuthor::Agent,
            None,
            ContextChangeType::Initial,
        )
        .await
    });

    let outcomes = [first.await.expect("join"), second.await.expect("join")];
    let ok_count = outcomes.iter().filter(|o| o.is_ok()).count();
    let conflict_count = outcomes
        .iter()
        .filter(|o| matches!(o, Err(e) if e.kind() == "conflict"))
        .count();
    assert_eq!(ok_count, 1, "exactly one append wins");
    assert_eq!(conflict_count, 1, "the loser sees conflict");

    let current = store
        .contexts()
        .current(target.id)
        .await
        .expect("current")
        .expect("head set");
    assert_eq!(current.version, 1);
}

#[tokio::test]
async fn test_context_round_trip_append_and_replace() {
    let Some(store) = test_store().await else { return };
    let (target, _) = store
        .targets()
        .upsert(&unique_host("ctx"), None, Protocol::Https, TargetDefaults::default())
        .await
        .expect("target");

    let context = tool_context(&store);
    let tool = UpdateTargetContextTool::new(Arc::clone(&context));

    let body = call(
        &tool,
        json!({
            "target_id": target.id,
            "agent_context": "first note",
            "change_summary": "initial",
        }),
    )
    .await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["result"]["version"], 1);

    // append_mode=true (default) concatenates.
    let body = call(
        &tool,
        json!({
            "target_id": target.id,
            "agent_context": "second note",
            "change_summary": "appended",
        }),
    )
    .await;
    assert_eq!(body["result"]["version"], 2);
    let agent_context = body["result"]["agent_context"].as_str().unwrap();
    assert!(agent_context.starts_with("first note"));
    assert!(agent_context.ends_with("second note"));

    // append_mode=false replaces the provided field.
    let body = call(
        &tool,
        json!({
            "target_id": target.id,
            "agent_context": "fresh slate",
            "change_summary": "replaced",
            "append_mode": "false",
        }),
    )
    .await;
    assert_eq!(body["result"]["version"], 3);
    assert_eq!(body["result"]["agent_context"], "fresh slate");

    let current = store
        .contexts()
        .current(target.id)
        .await
        .expect("current")
        .expect("context");
    assert_eq!(current.agent_context.as_deref(), Some("fresh slate"));
}

#[tokio::test]
async fn test_context_diff_between_versions() {
    let Some(store) = test_store().await else { return };
    let (target, _) = store
        .targets()
        .upsert(&unique_host("diff"), None, Protocol::Https, TargetDefaults::default())
        .await
        .expect("target");

    let v1 = store
        .contexts()
        .append(
            target.id,
            None,
            None,
            Some("nginx 1.25\nlogin at /auth".into()),
            ContextAuthor::Agent,
            None,
            ContextChangeType::Initial,
        )
        .await
        .expect("v1");
    let v2 = store
        .contexts()
        .append(
            target.id,
            Some(v1.id),
            None,
            Some("nginx 1.25\nlogin at /auth/v2".into()),
            ContextAuthor::Agent,
            None,
            ContextChangeType::AgentUpdate,
        )
        .await
        .expect("v2");

    let diff = store.contexts().diff(v1.id, v2.id).await.expect("diff");
    assert_eq!(diff.from_version, 1);
    assert_eq!(diff.to_version, 2);
    assert_eq!(diff.agent_context.removed, vec!["login at /auth"]);
    assert_eq!(diff.agent_context.added, vec!["login at /auth/v2"]);
    assert!(diff.user_context.added.is_empty());
}

// ---------------------------------------------------------------------------
// Missions, actions and linkage
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_mission_target_associations_and_delete() {
    let Some(store) = test_store().await else { return };
    let (target, _) = store
        .targets()
        .upsert(&unique_host("assoc"), None, Protocol::Https, TargetDefaults::default())
        .await
        .expect("target");
    let mission = store
        .missions()
        .create(
            &format!("assoc-{}", Uuid::new_v4().simple()),
            "goal",
            None,
            None,
            None,
            None,
            None,
        )
        .await
        .expect("mission");

    store
        .missions()
        .associate_target(mission.id, target.id)
        .await
        .expect("associate");
    // Idempotent.
    store
        .missions()
        .associate_target(mission.id, target.id)
        .await
        .expect("associate again");

    let listed = store
        .missions()
        .list(Some(probegate::store::models::MissionStatus::Active), 200)
        .await
        .expect("list");
    assert!(listed.iter().any(|m| m.id == mission.id));

    assert!(store
        .missions()
        .dissociate_target(mission.id, target.id)
        .await
        .expect("dissociate"));
    assert!(!store
        .missions()
        .dissociate_target(mission.id, target.id)
        .await
        .expect("second dissociate is a no-op"));

    // Deleting the mission cascades its actions but keeps request rows.
    let host = unique_host("assoc-req");
    let url = format!("https://{host}/");
    pipeline(&store)
        .record(&effective("GET", &url, Some(mission.id)), &ok_envelope(&url, "ok"))
        .await;
    assert!(store.missions().delete(mission.id).await.expect("delete"));
    assert!(store.missions().get(mission.id).await.expect("get").is_none());

    let surviving = store
        .requests()
        .recent_for_host(&host, 1)
        .await
        .expect("recent");
    assert_eq!(surviving.len(), 1, "request rows outlive their mission");
    assert_eq!(surviving[0].mission_id, None);
}

#[tokio::test]
async fn test_mission_linkage_through_latest_action() {
    let Some(store) = test_store().await else { return };
    let embedder = HashEmbedder;

    let mission = store
        .missions()
        .create(
            &format!("probe-auth-{}", Uuid::new_v4().simple()),
            "probe auth",
            None,
            None,
            None,
            Some(&embedder.embed("probe auth").await.expect("embed")),
            None,
        )
        .await
        .expect("mission");

    let action = store
        .actions()
        .append(
            mission.id,
            "baseline GET",
            None,
            "200 OK",
            Some(true),
            None,
            Some(&embedder.embed("baseline GET").await.expect("embed")),
            Some(&embedder.embed("200 OK").await.expect("embed")),
        )
        .await
        .expect("action");

    let host = unique_host("linkage");
    let url = format!("https://{host}/");
    let logger = pipeline(&store);
    for _ in 0..2 {
        let failed = logger
            .record(&effective("GET", &url, Some(mission.id)), &ok_envelope(&url, "ok"))
            .await;
        assert!(failed.is_empty(), "failed steps: {failed:?}");
    }

    let recent = store
        .requests()
        .recent_for_mission(mission.id, 10)
        .await
        .expect("recent");
    assert_eq!(recent.len(), 2);
    for request in &recent {
        let linked = store
            .requests()
            .linked_actions(request.id)
            .await
            .expect("linked actions");
        assert_eq!(linked, vec![action.id]);
    }
}

#[tokio::test]
async fn test_record_action_sweeps_recent_requests() {
    let Some(store) = test_store().await else { return };

    let mission = store
        .missions()
        .create(
            &format!("sweep-{}", Uuid::new_v4().simple()),
            "sweep goal",
            None,
            None,
            None,
            None,
            None,
        )
        .await
        .expect("mission");

    // Four mission requests exist before any action is recorded.
    let host = unique_host("sweep");
    let logger = pipeline(&store);
    for i in 0..4 {
        let url = format!("https://{host}/{i}");
        logger
            .record(&effective("GET", &url, Some(mission.id)), &ok_envelope(&url, "ok"))
            .await;
    }

    let context = tool_context(&store);
    context.mission.set(mission.id, None);
    let tool = RecordActionTool::new(Arc::clone(&context));
    let body = call(
        &tool,
        json!({
            "technique": "enumerate endpoints",
            "result": "four candidates",
            "success": "yes",
            "link_recent_requests": 3,
        }),
    )
    .await;
    assert_eq!(body["ok"], true, "body: {body}");
    assert_eq!(body["result"]["linked_requests"], 3);
    assert!(body["mission_context_note"]
        .as_str()
        .expect("note present")
        .starts_with("Logged to mission"));
}

#[tokio::test]
async fn test_mission_state_machine() {
    let Some(store) = test_store().await else { return };
    let mission = store
        .missions()
        .create(
            &format!("states-{}", Uuid::new_v4().simple()),
            "goal",
            None,
            None,
            None,
            None,
            None,
        )
        .await
        .expect("mission");

    use probegate::store::models::MissionStatus;

    let paused = store
        .missions()
        .update(mission.id, MissionUpdate { status: Some(MissionStatus::Paused), ..Default::default() })
        .await
        .expect("pause");
    assert_eq!(paused.status, MissionStatus::Paused);
    assert!(paused.completed_at.is_none());

    let completed = store
        .missions()
        .update(mission.id, MissionUpdate { status: Some(MissionStatus::Completed), ..Default::default() })
        .await
        .expect("complete");
    assert_eq!(completed.status, MissionStatus::Completed);
    assert!(completed.completed_at.is_some());

    let err = store
        .missions()
        .update(mission.id, MissionUpdate { status: Some(MissionStatus::Active), ..Default::default() })
        .await
        .expect_err("terminal states are frozen");
    assert_eq!(err.kind(), "conflict");
}

#[tokio::test]
async fn test_action_embeddings_are_full_dimension_or_absent() {
    let Some(store) = test_store().await else { return };
    let embedder = HashEmbedder;
    let mission = store
        .missions()
        .create(
            &format!("dims-{}", Uuid::new_v4().simple()),
            "goal",
            None,
            None,
            None,
            None,
            None,
        )
        .await
        .expect("mission");

    let with_vectors = store
        .actions()
        .append(
            mission.id,
            "fingerprint headers",
            None,
            "nginx",
            Some(true),
            None,
            Some(&embedder.embed("fingerprint headers").await.expect("embed")),
            Some(&embedder.embed("nginx").await.expect("embed")),
        )
        .await
        .expect("action");
    let (action_vec, result_vec) = store
        .actions()
        .embeddings(with_vectors.id)
        .await
        .expect("embeddings")
        .expect("row");
    assert_eq!(action_vec.expect("action embedding").len(), EMBEDDING_DIM);
    assert_eq!(result_vec.expect("result embedding").len(), EMBEDDING_DIM);

    let without_vectors = store
        .actions()
        .append(mission.id, "manual note", None, "n/a", None, None, None, None)
        .await
        .expect("action");
    let (action_vec, result_vec) = store
        .actions()
        .embeddings(without_vectors.id)
        .await
        .expect("embeddings")
        .expect("row");
    assert!(action_vec.is_none());
    assert!(result_vec.is_none());
}

#[tokio::test]
async fn test_find_similar_actions_ranks_by_cosine() {
    let Some(store) = test_store().await else { return };
    let embedder = HashEmbedder;
    let mission = store
        .missions()
        .create(
            &format!("similar-{}", Uuid::new_v4().simple()),
            "goal",
            None,
            None,
            None,
            None,
            None,
        )
        .await
        .expect("mission");

    for technique in ["jwt none algorithm downgrade attack", "directory brute force wordlist scan"] {
        store
            .actions()
            .append(
                mission.id,
                technique,
                None,
                "tried",
                Some(false),
                None,
                Some(&embedder.embed(technique).await.expect("embed")),
                None,
            )
            .await
            .expect("action");
    }

    let query = embedder
        .embed("jwt none algorithm downgrade attack")
        .await
        .expect("embed");
    let matches = store
        .actions()
        .find_similar(&query, Some(mission.id), 5, 0.5)
        .await
        .expect("search");
    assert!(!matches.is_empty());
    assert_eq!(matches[0].0.technique, "jwt none algorithm downgrade attack");
    assert!(matches[0].1 > 0.99, "identical text should score ~1.0");
}

#[tokio::test]
async fn test_technique_stats_and_search() {
    let Some(store) = test_store().await else { return };
    let mission = store
        .missions()
        .create(
            &format!("stats-{}", Uuid::new_v4().simple()),
            "goal",
            None,
            Some("auth_bypass"),
            None,
            None,
            None,
        )
        .await
        .expect("mission");

    let technique = format!("header smuggling {}", Uuid::new_v4().simple());
    for (success, learning) in [
        (Some(true), None),
        (Some(false), Some("WAF normalises duplicate headers")),
        (Some(false), Some("WAF normalises duplicate headers")),
    ] {
        store
            .actions()
            .append(mission.id, &technique, None, "tried", success, learning, None, None)
            .await
            .expect("action");
    }

    let stats = store
        .actions()
        .technique_stats(&technique)
        .await
        .expect("stats")
        .expect("technique known");
    assert_eq!(stats.usage_count, 3);
    assert_eq!(stats.success_count, 1);
    assert!((stats.success_rate - 1.0 / 3.0).abs() < 1e-9);
    assert!(stats.last_used.is_some());
    assert_eq!(
        stats.failed_contexts,
        vec!["WAF normalises duplicate headers".to_string()]
    );

    let aggregates = store
        .actions()
        .search_techniques(false, Some("auth_bypass"), None, Some(&technique), 10)
        .await
        .expect("search");
    assert_eq!(aggregates.len(), 1);
    assert_eq!(aggregates[0].usage_count, 3);
    assert_eq!(aggregates[0].mission_count, 1);

    let successful_only = store
        .actions()
        .search_techniques(true, None, None, Some(&technique), 10)
        .await
        .expect("search");
    assert_eq!(successful_only[0].usage_count, 1);

    assert!(store
        .actions()
        .technique_stats("never recorded anywhere")
        .await
        .expect("stats")
        .is_none());
}

// ---------------------------------------------------------------------------
// Library
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_library_duplicate_guard() {
    let Some(store) = test_store().await else { return };
    let context = tool_context(&store);
    let tool = AddToLibraryTool::new(Arc::clone(&context));

    // The marker is repeated so entries from earlier runs of this test stay
    // well below the duplicate threshold.
    let marker = Uuid::new_v4().simple().to_string();
    let content = format!(
        "unicode sqli bypass via smart quote {marker} {marker} {marker} in the search parameter handler"
    );

    let body = call(
        &tool,
        json!({
            "title": "Unicode SQLi",
            "content": content,
            "category": "payload",
            "tags": ["sqli", "unicode"],
        }),
    )
    .await;
    assert_eq!(body["ok"], true, "body: {body}");
    let first_id = body["result"]["entry_id"].as_str().expect("id").to_string();

    let body = call(
        &tool,
        json!({
            "title": "Unicode SQLi again",
            "content": format!("{content} again"),
            "category": "payload",
        }),
    )
    .await;
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"]["kind"], "duplicate");
    assert_eq!(body["error"]["existing_id"], first_id);
}

#[tokio::test]
async fn test_library_round_trip() {
    let Some(store) = test_store().await else { return };
    let context = tool_context(&store);
    let add = AddToLibraryTool::new(Arc::clone(&context));
    let search = SearchLibraryTool::new(Arc::clone(&context));

    let marker = Uuid::new_v4().simple().to_string();
    let content = format!(
        "graphql introspection leak {marker} {marker} {marker} exposes internal schema types"
    );

    let body = call(
        &add,
        json!({
            "title": "GraphQL introspection",
            "content": content,
            "category": "recon",
        }),
    )
    .await;
    assert_eq!(body["ok"], true, "body: {body}");

    let body = call(&search, json!({ "query": content, "k": 5 })).await;
    assert_eq!(body["ok"], true);
    let entries = body["result"]["entries"].as_array().expect("entries");
    assert!(!entries.is_empty());
    assert!(entries[0]["score"].as_f64().expect("score") >= 0.99);
    assert_eq!(
        entries[0]["title"].as_str().expect("title"),
        "GraphQL introspection"
    );

    // Retrieval bumps usage statistics.
    let entry_id: Uuid = entries[0]["entry_id"]
        .as_str()
        .expect("id")
        .parse()
        .expect("uuid");
    let entry = store
        .library()
        .get(entry_id)
        .await
        .expect("get")
        .expect("entry");
    assert!(entry.usage_count >= 1);
    assert!(entry.last_used.is_some());

    let stats = store.library().stats().await.expect("stats");
    assert!(stats.entry_count >= 1);
    assert!(stats.by_category.iter().any(|(category, _)| category == "recon"));
}

// ---------------------------------------------------------------------------
// Pipeline properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_body_truncation_boundary() {
    let Some(store) = test_store().await else { return };
    let logger = LoggingPipeline::new(
        Arc::clone(&store),
        64,
        64,
        &["authorization".to_string()],
    );

    let host = unique_host("trunc");
    let url = format!("https://{host}/exact");
    let mut request = effective("POST", &url, None);
    request.body = Some("a".repeat(64));
    logger.record(&request, &ok_envelope(&url, "ok")).await;

    let url_over = format!("https://{host}/over");
    let mut request = effective("POST", &url_over, None);
    request.body = Some("b".repeat(65));
    logger.record(&request, &ok_envelope(&url_over, "ok")).await;

    let stored = store
        .requests()
        .recent_for_host(&host, 10)
        .await
        .expect("recent");
    assert_eq!(stored.len(), 2);
    let exact = stored.iter().find(|r| r.path == "/exact").expect("exact row");
    assert_eq!(exact.request_body.as_deref().map(str::len), Some(64));
    assert_eq!(exact.request_body_size, Some(64));
    let over = stored.iter().find(|r| r.path == "/over").expect("over row");
    assert_eq!(over.request_body.as_deref().map(str::len), Some(64));
    assert_eq!(over.request_body_size, Some(65));
}

#[tokio::test]
async fn test_header_redaction_in_stored_request() {
    let Some(store) = test_store().await else { return };
    let host = unique_host("redact");
    let url = format!("https://{host}/");

    let mut request = effective("GET", &url, None);
    request
        .headers
        .insert("Authorization".into(), "Bearer sk-secret".into());
    request.headers.insert("Accept".into(), "text/html".into());
    request.cookies.insert("sid".into(), "payload-cookie".into());
    pipeline(&store).record(&request, &ok_envelope(&url, "ok")).await;

    let stored = store
        .requests()
        .recent_for_host(&host, 1)
        .await
        .expect("recent");
    let headers = &stored[0].headers;
    assert_eq!(headers["Authorization"], "[REDACTED]");
    assert_eq!(headers["Accept"], "text/html");
    // Cookies are the test payload; they are stored as-is.
    assert_eq!(stored[0].cookies.as_ref().expect("cookies")["sid"], "payload-cookie");
}

#[tokio::test]
async fn test_unparsable_url_still_logs_the_request() {
    let Some(store) = test_store().await else { return };
    let logger = pipeline(&store);

    let marker = format!("opaque-{}", Uuid::new_v4().simple());
    let mut envelope = ok_envelope("not a parseable url", "ok");
    envelope.status = Some(502);
    let mut request = effective("GET", "not a parseable url", None);
    request.headers.insert("X-Marker".into(), marker.clone());

    let failed = logger.record(&request, &envelope).await;
    assert!(failed.contains(&"parse_url".to_string()));
    assert!(
        !failed.contains(&"insert_request".to_string()),
        "a parse failure must not prevent the insert step"
    );
}

#[tokio::test]
async fn test_transport_failure_still_persists_a_row() {
    let Some(store) = test_store().await else { return };
    let host = unique_host("failed");
    let url = format!("https://{host}/timeout");

    let envelope = ResponseEnvelope {
        status: None,
        headers: BTreeMap::new(),
        body: String::new(),
        body_truncated: false,
        response_size: None,
        elapsed_ms: 30_000.0,
        final_url: url.clone(),
        error: Some("timeout".to_string()),
        logging_errors: Vec::new(),
    };
    let failed = pipeline(&store)
        .record(&effective("GET", &url, None), &envelope)
        .await;
    assert!(failed.is_empty(), "failed steps: {failed:?}");

    let stored = store
        .requests()
        .recent_for_host(&host, 1)
        .await
        .expect("recent");
    assert_eq!(stored[0].status_code, None);
    assert_eq!(stored[0].error_message.as_deref(), Some("timeout"));
}
