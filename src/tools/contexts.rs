//! Versioned target context tools

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::mcp::{ToolHandler, ToolOutput};
use crate::store::models::{ContextAuthor, ContextChangeType, TargetContext};
use crate::tools::args::ToolArgs;
use crate::tools::{respond, ToolContext};
use crate::{Error, Result};

fn context_json(context: &TargetContext) -> Value {
    json!({
        "context_id": context.id,
        "target_id": context.target_id,
        "version": context.version,
        "user_context": context.user_context,
        "agent_context": context.agent_context,
        "parent_version_id": context.parent_version_id,
        "change_type": context.change_type,
        "change_summary": context.change_summary,
        "created_by": context.created_by,
        "created_at": context.created_at.to_rfc3339(),
    })
}

// ============================================================================
// get_target_context
// ============================================================================

/// Read the current (or a specific) context version, optionally with history.
pub struct GetTargetContextTool {
    context: Arc<ToolContext>,
}

impl GetTargetContextTool {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self { context }
    }

    async fn run(&self, arguments: Value) -> Result<(Value, Option<String>)> {
        let mut args = ToolArgs::parse(arguments)?;
        let target_id = args.req_uuid("target_id");
        let version = args.opt_i64("version");
        let include_history = args.bool_or("include_history", false);
        args.finish()?;
        let target_id = target_id.ok_or_else(|| Error::internal("target_id missing"))?;

        let store = self.context.store()?;
        if store.targets().get(target_id).await?.is_none() {
            return Err(Error::NotFound(format!("target {target_id}")));
        }

        let current = match version {
            Some(version) => store
                .contexts()
                .get_by_number(target_id, version as i32)
                .await?
                .ok_or_else(|| {
                    Error::NotFound(format!("context version {version} for target {target_id}"))
                })?,
            None => match store.contexts().current(target_id).await? {
                Some(context) => context,
                None => {
                    return Ok((
                        json!({
                            "target_id": target_id,
                            "current": null,
                            "message": "target has no context yet",
                        }),
                        None,
                    ))
                }
            },
        };

        let mut result = json!({
            "target_id": target_id,
            "current": context_json(&current),
        });
        if include_history {
            let history = store.contexts().history(target_id, 10).await?;
            result["history"] = json!(history
                .iter()
                .map(|c| json!({
                    "context_id": c.id,
                    "version": c.version,
                    "change_type": c.change_type,
                    "change_summary": c.change_summary,
                    "created_by": c.created_by,
                    "created_at": c.created_at.to_rfc3339(),
                }))
                .collect::<Vec<_>>());
        }
        Ok((result, None))
    }
}

#[async_trait]
impl ToolHandler for GetTargetContextTool {
    fn name(&self) -> &str {
        "get_target_context"
    }

    fn description(&self) -> &str {
        "Read a target's context. Returns the current version by default, a \
         specific version when requested, and optionally the version history."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "target_id": {
                    "type": "string",
                    "description": "UUID of the target"
                },
                "version": {
                    "type": "integer",
                    "description": "Specific version number to read (optional). Decimal strings accepted."
                },
                "include_history": {
                    "type": "boolean",
                    "description": "Include recent version history (accepts true/false/1/0/yes/no)"
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
// update_target_context
// ============================================================================

/// Append a new immutable context version.
pub struct UpdateTargetContextTool {
    context: Arc<ToolContext>,
}

impl UpdateTargetContextTool {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self { context }
    }

    async fn run(&self, arguments: Value) -> Result<(Value, Option<String>)> {
        let mut args = ToolArgs::parse(arguments)?;
        let target_id = args.req_uuid("target_id");
        let user_context = args.opt_str("user_context");
        let agent_context = args.opt_str("agent_context");
        let change_summary = args.req_str("change_summary");
        let append_mode = args.bool_or("append_mode", true);
        if user_context.is_none() && agent_context.is_none() {
            args.reject(
                "user_context",
                "either user_context or agent_context must be provided",
            );
        }
        args.finish()?;
        let target_id = target_id.ok_or_else(|| Error::internal("target_id missing"))?;

        let store = self.context.store()?;
        let previous = store.contexts().current(target_id).await?;

        // With append_mode the provided fields are concatenated onto the
        // previous version; otherwise they replace it. Absent fields always
        // carry the previous value forward.
        let (new_user, new_agent) = match &previous {
            Some(prev) => {
                let merge = |provided: Option<String>, existing: &Option<String>| match provided {
                    Some(text) if append_mode => match existing.as_deref() {
                        Some(old) if !old.trim().is_empty() => {
                            Some(format!("{old}\n\n{text}").trim().to_string())
                        }
                        _ => Some(text),
                    },
                    Some(text) => Some(text),
                    None => existing.clone(),
                };
                (
                    merge(user_context.clone(), &prev.user_context),
                    merge(agent_context.clone(), &prev.agent_context),
                )
            }
            None => (user_context.clone(), agent_context.clone()),
        };

        let (created_by, change_type) = if previous.is_none() {
            (
                if agent_context.is_some() {
                    ContextAuthor::Agent
                } else {
                    ContextAuthor::User
                },
                ContextChangeType::Initial,
            )
        } else if agent_context.is_some() {
            (ContextAuthor::Agent, ContextChangeType::AgentUpdate)
        } else {
            (ContextAuthor::User, ContextChangeType::UserEdit)
        };

        let version = store
            .contexts()
            .append(
                target_id,
                previous.as_ref().map(|p| p.id),
                new_user,
                new_agent,
                created_by,
                change_summary,
                change_type,
            )
            .await?;

        let mut result = context_json(&version);
        result["previous_version"] = json!(previous.map(|p| p.version));
        result["append_mode"] = json!(append_mode);
        Ok((result, None))
    }
}

#[async_trait]
impl ToolHandler for UpdateTargetContextTool {
    fn name(&self) -> &str {
        "update_target_context"
    }

    fn description(&self) -> &str {
        "Create a new immutable context version for a target. With \
         append_mode=true (default) provided fields are appended to the \
         previous version; otherwise they replace it. Either user_context or \
         agent_context is required. Returns conflict if a concurrent update \
         wins the race; retry in that case."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "target_id": {
                    "type": "string",
                    "description": "UUID of the target"
                },
                "user_context": {
                    "type": "string",
                    "description": "Human-authored context text"
                },
                "agent_context": {
                    "type": "string",
                    "description": "Agent-authored context text"
                },
                "change_summary": {
                    "type": "string",
                    "description": "Short description of what changed"
                },
                "append_mode": {
                    "type": "boolean",
                    "description": "Append to the previous version instead of replacing it (default true; accepts true/false/1/0/yes/no)"
                }
            },
            "required": ["target_id", "change_summary"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput> {
        Ok(respond(self.run(arguments).await))
    }
}
