//! Target management tools

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::mcp::{ToolHandler, ToolOutput};
use crate::store::models::{Protocol, RiskLevel, Target, TargetStatus};
use crate::store::TargetDefaults;
use crate::tools::args::ToolArgs;
use crate::tools::{respond, ToolContext};
use crate::{Error, Result};

fn target_json(target: &Target) -> Value {
    json!({
        "target_id": target.id,
        "host": target.host,
        "port": target.port,
        "protocol": target.protocol,
        "base_url": target.base_url(),
        "title": target.title,
        "status": target.status,
        "risk_level": target.risk_level,
        "last_activity": target.last_activity.to_rfc3339(),
    })
}

// ============================================================================
// create_target
// ============================================================================

/// Register a target explicitly (the logging pipeline also creates them
/// implicitly on first request).
pub struct CreateTargetTool {
    context: Arc<ToolContext>,
}

impl CreateTargetTool {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self { context }
    }

    async fn run(&self, arguments: Value) -> Result<(Value, Option<String>)> {
        let mut args = ToolArgs::parse(arguments)?;
        let host = args.req_str("host");
        let port = args.opt_i64("port");
        let protocol = args.opt_parsed::<Protocol>("protocol");
        let title = args.opt_str("title");
        let status = args.opt_parsed::<TargetStatus>("status");
        let risk_level = args.opt_parsed::<RiskLevel>("risk_level");
        let notes = args.opt_str("notes");
        if let Some(p) = port {
            if !(1..=65535).contains(&p) {
                args.reject("port", "port must be between 1 and 65535");
            }
        }
        args.finish()?;
        let host = host.unwrap_or_default();

        let store = self.context.store()?;
        let (target, created) = store
            .targets()
            .upsert(
                &host,
                port.map(|p| p as u16),
                protocol.unwrap_or(Protocol::Https),
                TargetDefaults {
                    status: status.unwrap_or(TargetStatus::Active),
                    risk_level: risk_level.unwrap_or(RiskLevel::Medium),
                    title,
                },
            )
            .await?;

        let target = match notes {
            Some(notes) if created => {
                store
                    .targets()
                    .update_fields(target.id, None, None, None, Some(json!({ "notes": notes })))
                    .await?
            }
            _ => target,
        };

        let mut result = target_json(&target);
        result["created"] = json!(created);
        if !created {
            result["message"] = json!(format!("Target already exists: {}", target.base_url()));
        }
        Ok((result, None))
    }
}

#[async_trait]
impl ToolHandler for CreateTargetTool {
    fn name(&self) -> &str {
        "create_target"
    }

    fn description(&self) -> &str {
        "Register a target endpoint (host, port, protocol) for testing. \
         Returns the existing target unchanged if the triple is already known."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "host": {
                    "type": "string",
                    "description": "Target hostname or IP address"
                },
                "port": {
                    "type": "integer",
                    "description": "Port number 1-65535; omit for the scheme default. Decimal strings accepted."
                },
                "protocol": {
                    "type": "string",
                    "enum": ["http", "https"],
                    "description": "Wire protocol (default https)"
                },
                "title": {
                    "type": "string",
                    "description": "Descriptive title or service name"
                },
                "status": {
                    "type": "string",
                    "enum": ["active", "inactive", "blocked", "completed"],
                    "description": "Initial status (default active)"
                },
                "risk_level": {
                    "type": "string",
                    "enum": ["low", "medium", "high", "critical"],
                    "description": "Initial risk assessment (default medium)"
                },
                "notes": {
                    "type": "string",
                    "description": "Free-form notes stored in the target metadata"
                }
            },
            "required": ["host"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput> {
        Ok(respond(self.run(arguments).await))
    }
}

// ============================================================================
// update_target_status
// ============================================================================

/// Update a target's status, risk level or notes.
pub struct UpdateTargetStatusTool {
    context: Arc<ToolContext>,
}

impl UpdateTargetStatusTool {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self { context }
    }

    async fn run(&self, arguments: Value) -> Result<(Value, Option<String>)> {
        let mut args = ToolArgs::parse(arguments)?;
        let target_id = args.req_uuid("target_id");
        let status = args.opt_parsed::<TargetStatus>("status");
        let risk_level = args.opt_parsed::<RiskLevel>("risk_level");
        let notes = args.opt_str("notes");
        args.finish()?;
        let target_id = target_id.ok_or_else(|| Error::internal("target_id missing"))?;

        let store = self.context.store()?;
        let extra_data = match &notes {
            Some(notes) => {
                let current = store
                    .targets()
                    .get(target_id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("target {target_id}")))?;
                let mut data = current.extra_data;
                data["notes"] = json!(notes);
                Some(data)
            }
            None => None,
        };

        let updated = store
            .targets()
            .update_fields(target_id, status, risk_level, None, extra_data)
            .await?;

        Ok((target_json(&updated), None))
    }
}

#[async_trait]
impl ToolHandler for UpdateTargetStatusTool {
    fn name(&self) -> &str {
        "update_target_status"
    }

    fn description(&self) -> &str {
        "Update a target's status, risk level or notes. Completed and blocked \
         targets can be reactivated with status=active."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "target_id": {
                    "type": "string",
                    "description": "UUID of the target to update"
                },
                "status": {
                    "type": "string",
                    "enum": ["active", "inactive", "blocked", "completed"],
                    "description": "New status (optional)"
                },
                "risk_level": {
                    "type": "string",
                    "enum": ["low", "medium", "high", "critical"],
                    "description": "New risk level (optional)"
                },
                "notes": {
                    "type": "string",
                    "description": "Replacement notes stored in the target metadata"
                }
            },
            "required": ["target_id"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput> {
        Ok(respond(self.run(arguments).await))
    }
}

// ============================================================================
// get_target_summary
// ============================================================================

/// Fetch a target with derived counts and a context excerpt.
pub struct GetTargetSummaryTool {
    context: Arc<ToolContext>,
}

impl GetTargetSummaryTool {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self { context }
    }

    async fn run(&self, arguments: Value) -> Result<(Value, Option<String>)> {
        let mut args = ToolArgs::parse(arguments)?;
        let target_id = args.req_uuid("target_id");
        args.finish()?;
        let target_id = target_id.ok_or_else(|| Error::internal("target_id missing"))?;

        let store = self.context.store()?;
        let summary = store
            .targets()
            .summary(target_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("target {target_id}")))?;

        let mut result = target_json(&summary.target);
        result["request_count"] = json!(summary.request_count);
        result["current_context_excerpt"] = json!(summary.context_excerpt);
        result["extra_data"] = summary.target.extra_data.clone();
        Ok((result, None))
    }
}

#[async_trait]
impl ToolHandler for GetTargetSummaryTool {
    fn name(&self) -> &str {
        "get_target_summary"
    }

    fn description(&self) -> &str {
        "Get a target with request count, last activity and an excerpt of the \
         current context."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "target_id": {
                    "type": "string",
                    "description": "UUID of the target"
                }
            },
            "required": ["target_id"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput> {
        Ok(respond(self.run(arguments).await))
    }
}

// ============================================================================
// search_targets
// ============================================================================

/// Filtered target search.
pub struct SearchTargetsTool {
    context: Arc<ToolContext>,
}

impl SearchTargetsTool {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self { context }
    }

    async fn run(&self, arguments: Value) -> Result<(Value, Option<String>)> {
        let mut args = ToolArgs::parse(arguments)?;
        let query = args.opt_str("query");
        let status = args.opt_parsed::<TargetStatus>("status");
        let risk_level = args.opt_parsed::<RiskLevel>("risk_level");
        let protocol = args.opt_parsed::<Protocol>("protocol");
        let limit = args.i64_or("limit", 50).clamp(1, 100);
        args.finish()?;

        let store = self.context.store()?;
        let targets = store
            .targets()
            .search(query.as_deref(), status, risk_level, protocol, limit)
            .await?;

        let results: Vec<Value> = targets.iter().map(target_json).collect();
        Ok((
            json!({
                "count": results.len(),
                "targets": results,
            }),
            None,
        ))
    }
}

#[async_trait]
impl ToolHandler for SearchTargetsTool {
    fn name(&self) -> &str {
        "search_targets"
    }

    fn description(&self) -> &str {
        "Search targets by substring on host/title with status, risk and \
         protocol filters. Results are ordered by most recent activity."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Case-insensitive substring matched against host and title"
                },
                "status": {
                    "type": "string",
                    "enum": ["active", "inactive", "blocked", "completed"],
                    "description": "Filter by status"
                },
                "risk_level": {
                    "type": "string",
                    "enum": ["low", "medium", "high", "critical"],
                    "description": "Filter by risk level"
                },
                "protocol": {
                    "type": "string",
                    "enum": ["http", "https"],
                    "description": "Filter by protocol"
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
