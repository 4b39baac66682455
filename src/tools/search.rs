//! Technique search and statistics tools

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::mcp::{ToolHandler, ToolOutput};
use crate::tools::args::ToolArgs;
use crate::tools::{respond, ToolContext};
use crate::{Error, Result};

// ============================================================================
// find_similar_techniques
// ============================================================================

/// Semantic search over past mission actions.
pub struct FindSimilarTechniquesTool {
    context: Arc<ToolContext>,
}

impl FindSimilarTechniquesTool {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self { context }
    }

    async fn run(&self, arguments: Value) -> Result<(Value, Option<String>)> {
        let mut args = ToolArgs::parse(arguments)?;
        let query = args.req_str("query");
        let k = args.i64_or("k", 10).clamp(1, 50);
        let min_similarity = args.f64_or("min_similarity", 0.5);
        let mission_id = args.opt_uuid("mission_id");
        if !(0.0..=1.0).contains(&min_similarity) {
            args.reject("min_similarity", "must be between 0.0 and 1.0");
        }
        args.finish()?;
        let query = query.unwrap_or_default();

        let store = self.context.store()?;
        let embedder = self.context.embedder()?;
        let query_vector = embedder.embed(&query).await?;

        let matches = store
            .actions()
            .find_similar(&query_vector, mission_id, k, min_similarity)
            .await?;

        let results: Vec<Value> = matches
            .iter()
            .map(|(action, score)| {
                json!({
                    "action_id": action.id,
                    "mission_id": action.mission_id,
                    "technique": action.technique,
                    "result": action.result,
                    "success": action.success,
                    "learning": action.learning,
                    "score": score,
                })
            })
            .collect();

        Ok((
            json!({
                "query": query,
                "count": results.len(),
                "matches": results,
            }),
            None,
        ))
    }
}

#[async_trait]
impl ToolHandler for FindSimilarTechniquesTool {
    fn name(&self) -> &str {
        "find_similar_techniques"
    }

    fn description(&self) -> &str {
        "Find past actions whose technique is semantically similar to the \
         query, scored by cosine similarity (1.0 = identical)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Technique text to search for"
                },
                "k": {
                    "type": "integer",
                    "description": "Maximum results, 1-50 (default 10). Decimal strings accepted."
                },
                "min_similarity": {
                    "type": "number",
                    "description": "Minimum cosine similarity 0.0-1.0 (default 0.5). Numeric strings accepted."
                },
                "mission_id": {
                    "type": "string",
                    "description": "Restrict the search to one mission (optional)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput> {
        Ok(respond(self.run(arguments).await))
    }
}

// ============================================================================
// search_techniques
// ============================================================================

/// Aggregate technique effectiveness search.
pub struct SearchTechniquesTool {
    context: Arc<ToolContext>,
}

impl SearchTechniquesTool {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self { context }
    }

    async fn run(&self, arguments: Value) -> Result<(Value, Option<String>)> {
        let mut args = ToolArgs::parse(arguments)?;
        let success_only = args.bool_or("success_only", false);
        let mission_type = args.opt_str("mission_type");
        let min_success_rate = args.opt_f64("min_success_rate");
        let technique_substring = args.opt_str("technique_substring");
        let limit = args.i64_or("limit", 50).clamp(1, 100);
        if let Some(rate) = min_success_rate {
            if !(0.0..=1.0).contains(&rate) {
                args.reject("min_success_rate", "must be between 0.0 and 1.0");
            }
        }
        args.finish()?;

        let store = self.context.store()?;
        let techniques = store
            .actions()
            .search_techniques(
                success_only,
                mission_type.as_deref(),
                min_success_rate,
                technique_substring.as_deref(),
                limit,
            )
            .await?;

        Ok((
            json!({
                "count": techniques.len(),
                "techniques": techniques,
            }),
            None,
        ))
    }
}

#[async_trait]
impl ToolHandler for SearchTechniquesTool {
    fn name(&self) -> &str {
        "search_techniques"
    }

    fn description(&self) -> &str {
        "Search techniques by effectiveness: usage counts, success rates and \
         mission coverage, with optional filters."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "success_only": {
                    "type": "boolean",
                    "description": "Only count successful uses (accepts true/false/1/0/yes/no)"
                },
                "mission_type": {
                    "type": "string",
                    "description": "Filter to missions with this type label"
                },
                "min_success_rate": {
                    "type": "number",
                    "description": "Minimum success rate 0.0-1.0. Numeric strings accepted."
                },
                "technique_substring": {
                    "type": "string",
                    "description": "Case-insensitive substring match on the technique name"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum results, 1-100 (default 50). Decimal strings accepted."
                }
            }
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput> {
        Ok(respond(self.run(arguments).await))
    }
}

// ============================================================================
// get_technique_stats
// ============================================================================

/// Detailed statistics for one technique.
pub struct GetTechniqueStatsTool {
    context: Arc<ToolContext>,
}

impl GetTechniqueStatsTool {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self { context }
    }

    async fn run(&self, arguments: Value) -> Result<(Value, Option<String>)> {
        let mut args = ToolArgs::parse(arguments)?;
        let technique = args.req_str("technique");
        args.finish()?;
        let technique = technique.ok_or_else(|| Error::internal("technique missing"))?;

        let store = self.context.store()?;
        let stats = store.actions().technique_stats(&technique).await?;

        Ok((
            match stats {
                Some(stats) => json!({
                    "found": true,
                    "technique": stats.technique,
                    "usage_count": stats.usage_count,
                    "success_count": stats.success_count,
                    "success_rate": stats.success_rate,
                    "last_used": stats.last_used.map(|t| t.to_rfc3339()),
                    "failed_contexts": stats.failed_contexts,
                }),
                None => json!({
                    "found": false,
                    "technique": technique,
                    "message": "no recorded uses of this technique",
                }),
            },
            None,
        ))
    }
}

#[async_trait]
impl ToolHandler for GetTechniqueStatsTool {
    fn name(&self) -> &str {
        "get_technique_stats"
    }

    fn description(&self) -> &str {
        "Get usage count, success rate, last use and failure learnings for an \
         exact technique name."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "technique": {
                    "type": "string",
                    "description": "Exact technique name"
                }
            },
            "required": ["technique"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput> {
        Ok(respond(self.run(arguments).await))
    }
}
