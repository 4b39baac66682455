//! Curated technique library tools

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::mcp::{ToolHandler, ToolOutput};
use crate::tools::args::ToolArgs;
use crate::tools::{respond, ToolContext};
use crate::{Error, Result};

/// Similarity at or above which a new entry is considered a duplicate.
const DUPLICATE_THRESHOLD: f64 = 0.9;

// ============================================================================
// add_to_library
// ============================================================================

/// Add a curated technique, refusing near-duplicates.
pub struct AddToLibraryTool {
    context: Arc<ToolContext>,
}

impl AddToLibraryTool {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self { context }
    }

    async fn run(&self, arguments: Value) -> Result<(Value, Option<String>)> {
        let mut args = ToolArgs::parse(arguments)?;
        let title = args.req_str("title");
        let content = args.req_str("content");
        let category = args.req_str("category");
        let tags = args.opt_string_list("tags").unwrap_or_default();
        let metadata = args.opt_value("metadata");
        args.finish()?;
        let title = title.unwrap_or_default();
        let content = content.unwrap_or_default();
        let category = category.unwrap_or_default();

        let store = self.context.store()?;

        let mut embedding = None;
        if let Some(embedder) = &self.context.embedder {
            let vector = embedder.embed(&content).await?;
            if let Some((existing_id, _title, similarity)) = store
                .library()
                .find_duplicate(&vector, DUPLICATE_THRESHOLD)
                .await?
            {
                return Err(Error::Duplicate {
                    existing_id,
                    similarity,
                });
            }
            embedding = Some(vector);
        }

        let entry = store
            .library()
            .add(
                &title,
                &content,
                &category,
                &tags,
                metadata,
                embedding.as_deref(),
            )
            .await?;

        Ok((
            json!({
                "entry_id": entry.id,
                "title": entry.title,
                "category": entry.category,
                "tags": entry.tags,
                "created_at": entry.created_at.to_rfc3339(),
            }),
            None,
        ))
    }
}

#[async_trait]
impl ToolHandler for AddToLibraryTool {
    fn name(&self) -> &str {
        "add_to_library"
    }

    fn description(&self) -> &str {
        "Save a proven technique to the curated library. Rejected with a \
         duplicate error when an existing entry's content is already 90% \
         similar."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {
                    "type": "string",
                    "description": "Brief, descriptive title"
                },
                "content": {
                    "type": "string",
                    "description": "Full technique description with examples and context"
                },
                "category": {
                    "type": "string",
                    "description": "Category label, e.g. auth, payload, recon, exploit"
                },
                "tags": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Tag list; JSON text form accepted"
                },
                "metadata": {
                    "type": "object",
                    "description": "Free-form metadata; JSON text form accepted"
                }
            },
            "required": ["title", "content", "category"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput> {
        Ok(respond(self.run(arguments).await))
    }
}

// ============================================================================
// search_library
// ============================================================================

/// Semantic search over the curated library.
pub struct SearchLibraryTool {
    context: Arc<ToolContext>,
}

impl SearchLibraryTool {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self { context }
    }

    async fn run(&self, arguments: Value) -> Result<(Value, Option<String>)> {
        let mut args = ToolArgs::parse(arguments)?;
        let query = args.req_str("query");
        let k = args.i64_or("k", 10).clamp(1, 50);
        let min_similarity = args.f64_or("min_similarity", 0.5);
        let category = args.opt_str("category");
        if !(0.0..=1.0).contains(&min_similarity) {
            args.reject("min_similarity", "must be between 0.0 and 1.0");
        }
        args.finish()?;
        let query = query.unwrap_or_default();

        let store = self.context.store()?;
        let embedder = self.context.embedder()?;
        let query_vector = embedder.embed(&query).await?;

        let matches = store
            .library()
            .search_by_text(&query_vector, k, min_similarity, category.as_deref())
            .await?;

        let results: Vec<Value> = matches
            .iter()
            .map(|(entry, score)| {
                json!({
                    "entry_id": entry.id,
                    "title": entry.title,
                    "category": entry.category,
                    "content": entry.content,
                    "tags": entry.tags,
                    "score": score,
                })
            })
            .collect();

        Ok((
            json!({
                "query": query,
                "count": results.len(),
                "entries": results,
            }),
            None,
        ))
    }
}

#[async_trait]
impl ToolHandler for SearchLibraryTool {
    fn name(&self) -> &str {
        "search_library"
    }

    fn description(&self) -> &str {
        "Search the curated technique library by semantic similarity, \
         optionally within one category."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look for"
                },
                "k": {
                    "type": "integer",
                    "description": "Maximum results, 1-50 (default 10). Decimal strings accepted."
                },
                "min_similarity": {
                    "type": "number",
                    "description": "Minimum cosine similarity 0.0-1.0 (default 0.5). Numeric strings accepted."
                },
                "category": {
                    "type": "string",
                    "description": "Restrict to one category (optional)"
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
// get_library_stats
// ============================================================================

/// Library-wide statistics.
pub struct GetLibraryStatsTool {
    context: Arc<ToolContext>,
}

impl GetLibraryStatsTool {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self { context }
    }

    async fn run(&self, _arguments: Value) -> Result<(Value, Option<String>)> {
        let store = self.context.store()?;
        let stats = store.library().stats().await?;
        Ok((
            json!({
                "entry_count": stats.entry_count,
                "by_category": stats
                    .by_category
                    .iter()
                    .map(|(category, count)| json!({ "category": category, "count": count }))
                    .collect::<Vec<_>>(),
                "top_tags": stats
                    .top_tags
                    .iter()
                    .map(|(tag, count)| json!({ "tag": tag, "count": count }))
                    .collect::<Vec<_>>(),
            }),
            None,
        ))
    }
}

#[async_trait]
impl ToolHandler for GetLibraryStatsTool {
    fn name(&self) -> &str {
        "get_library_stats"
    }

    fn description(&self) -> &str {
        "Get entry counts by category and the most used tags."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput> {
        Ok(respond(self.run(arguments).await))
    }
}
