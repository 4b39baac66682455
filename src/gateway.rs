//! Gateway assembly
//!
//! Builds the shared services (store, embedder, cookie cache) once and
//! stamps out one router per agent connection, each with its own mission
//! context.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{self, Settings};
use crate::context::MissionContext;
use crate::embed::Embedder;
use crate::http::{HttpExecutor, LoggingPipeline};
use crate::mcp::McpRouter;
use crate::resources::{CookieProfileCache, CookieSessionResource, PromptGuideProvider};
use crate::store::Store;
use crate::tools::{
    contexts::{GetTargetContextTool, UpdateTargetContextTool},
    http::HttpRequestTool,
    library::{AddToLibraryTool, GetLibraryStatsTool, SearchLibraryTool},
    missions::{
        ClearMissionContextTool, CreateMissionTool, GetMissionContextTool, RecordActionTool,
        SetMissionContextTool, UpdateMissionTool,
    },
    search::{FindSimilarTechniquesTool, GetTechniqueStatsTool, SearchTechniquesTool},
    targets::{CreateTargetTool, GetTargetSummaryTool, SearchTargetsTool, UpdateTargetStatusTool},
    ToolContext,
};
use crate::Result;

const SERVER_NAME: &str = "probegate";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Long-lived services shared by every agent connection.
pub struct Gateway {
    settings: Settings,
    store: Option<Arc<Store>>,
    embedder: Option<Arc<dyn Embedder>>,
    cookie_cache: Arc<CookieProfileCache>,
}

impl Gateway {
    /// Build the gateway from settings.
    ///
    /// Without `DATABASE_URL` the store stays disabled: dependent tools
    /// answer `store_unavailable` and the executor runs unlogged.
    pub async fn new(settings: Settings, embedder: Option<Arc<dyn Embedder>>) -> Result<Self> {
        let store = match &settings.database_url {
            Some(url) => {
                let store = Store::connect(url, settings.pool_size).await?;
                store.migrate().await?;
                Some(Arc::new(store))
            }
            None => {
                warn!("DATABASE_URL not set; persistence and mission tools are disabled");
                None
            }
        };

        let cookie_cache = Arc::new(CookieProfileCache::new(
            config::cookie_sessions_config_path(),
            config::cookies_data_dir(),
        ));

        info!(
            store = store.is_some(),
            embeddings = embedder.is_some(),
            "gateway ready"
        );

        Ok(Self {
            settings,
            store,
            embedder,
            cookie_cache,
        })
    }

    /// Gateway with explicitly wired services; used by tests and embedders.
    pub fn with_services(
        settings: Settings,
        store: Option<Arc<Store>>,
        embedder: Option<Arc<dyn Embedder>>,
        cookie_cache: Arc<CookieProfileCache>,
    ) -> Self {
        Self {
            settings,
            store,
            embedder,
            cookie_cache,
        }
    }

    pub fn store(&self) -> Option<&Arc<Store>> {
        self.store.as_ref()
    }

    /// Stamp out a router for one agent connection.
    ///
    /// The returned router owns a fresh [`MissionContext`]; active-mission
    /// state never leaks across connections.
    pub fn new_connection(&self) -> McpRouter {
        let mission = Arc::new(MissionContext::new());
        let context = Arc::new(ToolContext {
            store: self.store.clone(),
            embedder: self.embedder.clone(),
            mission: Arc::clone(&mission),
        });

        let pipeline = self.store.clone().map(|store| {
            Arc::new(LoggingPipeline::new(
                store,
                self.settings.max_request_body_bytes,
                self.settings.max_response_body_bytes,
                &self.settings.sensitive_headers,
            ))
        });
        let executor = Arc::new(HttpExecutor::new(
            self.settings.clone(),
            Arc::clone(&mission),
            Some(Arc::clone(&self.cookie_cache)),
            pipeline,
        ));

        let router = McpRouter::new(SERVER_NAME, SERVER_VERSION);

        router.register_tool(Arc::new(HttpRequestTool::new(
            Arc::clone(&context),
            executor,
        )));

        router.register_tool(Arc::new(CreateTargetTool::new(Arc::clone(&context))));
        router.register_tool(Arc::new(UpdateTargetStatusTool::new(Arc::clone(&context))));
        router.register_tool(Arc::new(GetTargetSummaryTool::new(Arc::clone(&context))));
        router.register_tool(Arc::new(SearchTargetsTool::new(Arc::clone(&context))));

        router.register_tool(Arc::new(GetTargetContextTool::new(Arc::clone(&context))));
        router.register_tool(Arc::new(UpdateTargetContextTool::new(Arc::clone(&context))));

        router.register_tool(Arc::new(CreateMissionTool::new(Arc::clone(&context))));
        router.register_tool(Arc::new(SetMissionContextTool::new(Arc::clone(&context))));
        router.register_tool(Arc::new(ClearMissionContextTool::new(Arc::clone(&context))));
        router.register_tool(Arc::new(GetMissionContextTool::new(Arc::clone(&context))));
        router.register_tool(Arc::new(RecordActionTool::new(Arc::clone(&context))));
        router.register_tool(Arc::new(UpdateMissionTool::new(Arc::clone(&context))));

        router.register_tool(Arc::new(FindSimilarTechniquesTool::new(Arc::clone(
            &context,
        ))));
        router.register_tool(Arc::new(SearchTechniquesTool::new(Arc::clone(&context))));
        router.register_tool(Arc::new(GetTechniqueStatsTool::new(Arc::clone(&context))));

        router.register_tool(Arc::new(AddToLibraryTool::new(Arc::clone(&context))));
        router.register_tool(Arc::new(SearchLibraryTool::new(Arc::clone(&context))));
        router.register_tool(Arc::new(GetLibraryStatsTool::new(Arc::clone(&context))));

        router.register_resources(Arc::new(CookieSessionResource::new(Arc::clone(
            &self.cookie_cache,
        ))));
        router.register_resources(Arc::new(PromptGuideProvider::new(config::prompts_dir())));

        router
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbedder;
    use crate::mcp::RpcRequest;

    fn test_gateway(embedder: Option<Arc<dyn Embedder>>) -> Gateway {
        Gateway::with_services(
            Settings::default(),
            None,
            embedder,
            Arc::new(CookieProfileCache::new(
                std::path::PathBuf::from("/nonexistent/cookie_sessions.yaml"),
                std::path::PathBuf::from("/nonexistent/cookies"),
            )),
        )
    }

    #[tokio::test]
    async fn test_connection_without_store_lists_all_tools() {
        let gateway = test_gateway(Some(Arc::new(HashEmbedder)));
        let router = gateway.new_connection();
        let response = router
            .dispatch(RpcRequest::call("tools/list", 1, None))
            .await;
        let result = response.result.expect("should list tools");
        let tools = result["tools"].as_array().expect("tools array");
        let names: Vec<&str> = tools
            .iter()
            .filter_map(|t| t["name"].as_str())
            .collect();
        for expected in [
            "http_request",
            "create_target",
            "update_target_status",
            "get_target_summary",
            "search_targets",
            "get_target_context",
            "update_target_context",
            "create_mission",
            "set_mission_context",
            "clear_mission_context",
            "get_mission_context",
            "record_action",
            "update_mission",
            "find_similar_techniques",
            "search_techniques",
            "get_technique_stats",
            "add_to_library",
            "search_library",
            "get_library_stats",
        ] {
            assert!(names.contains(&expected), "missing tool {expected}");
        }
    }

    #[tokio::test]
    async fn test_store_dependent_tool_fails_gracefully_without_database() {
        let gateway = test_gateway(None);
        let router = gateway.new_connection();
        let response = router
            .dispatch(RpcRequest::call(
                "tools/call",
                1,
                Some(serde_json::json!({
                    "name": "create_mission",
                    "arguments": { "name": "m", "goal": "g" }
                })),
            ))
            .await;
        let result = response.result.expect("tool calls return results");
        let text = result["content"][0]["text"].as_str().expect("text content");
        let body: serde_json::Value = serde_json::from_str(text).expect("envelope JSON");
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"]["kind"], "store_unavailable");
    }

    #[tokio::test]
    async fn test_connections_do_not_share_mission_state() {
        let gateway = test_gateway(None);
        let first = gateway.new_connection();
        let second = gateway.new_connection();

        // Clearing one connection's context is observable only there; the
        // second connection keeps its own (empty) manager and still answers.
        let response = first
            .dispatch(RpcRequest::call(
                "tools/call",
                1,
                Some(serde_json::json!({
                    "name": "clear_mission_context",
                    "arguments": {}
                })),
            ))
            .await;
        assert!(response.is_success());

        let response = second
            .dispatch(RpcRequest::call("tools/list", 2, None))
            .await;
        assert!(response.is_success());
    }
}
