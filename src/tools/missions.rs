//! Mission lifecycle and action recording tools

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::mcp::{ToolHandler, ToolOutput};
use crate::store::models::{Mission, MissionAction, MissionScope, MissionStatus};
use crate::store::MissionUpdate;
use crate::tools::args::ToolArgs;
use crate::tools::{respond, ToolContext};
use crate::{Error, Result};

fn mission_json(mission: &Mission) -> Value {
    json!({
        "mission_id": mission.id,
        "name": mission.name,
        "goal": mission.goal,
        "hypothesis": mission.hypothesis,
        "mission_type": mission.mission_type,
        "scope": mission.scope,
        "status": mission.status,
        "created_at": mission.created_at.to_rfc3339(),
        "completed_at": mission.completed_at.map(|t| t.to_rfc3339()),
    })
}

fn action_json(action: &MissionAction) -> Value {
    json!({
        "action_id": action.id,
        "technique": action.technique,
        "hypothesis": action.hypothesis,
        "result": action.result,
        "success": action.success,
        "learning": action.learning,
        "created_at": action.created_at.to_rfc3339(),
    })
}

// ============================================================================
// create_mission
// ============================================================================

/// Create a new testing mission.
pub struct CreateMissionTool {
    context: Arc<ToolContext>,
}

impl CreateMissionTool {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self { context }
    }

    async fn run(&self, arguments: Value) -> Result<(Value, Option<String>)> {
        let mut args = ToolArgs::parse(arguments)?;
        let name = args.req_str("name");
        let goal = args.req_str("goal");
        let hypothesis = args.opt_str("hypothesis");
        let mission_type = args.opt_str("mission_type");
        let scope = args.opt_value("scope").and_then(|value| {
            match serde_json::from_value::<MissionScope>(value.clone()) {
                Ok(scope) => Some(scope),
                Err(e) => {
                    args.reject("scope", format!("expected {{in: [...], out: [...]}}: {e}"));
                    None
                }
            }
        });
        args.finish()?;
        let (name, goal) = (name.unwrap_or_default(), goal.unwrap_or_default());

        let store = self.context.store()?;

        let mut goal_embedding = None;
        let mut hypothesis_embedding = None;
        if let Some(embedder) = &self.context.embedder {
            goal_embedding = Some(embedder.embed(&goal).await?);
            if let Some(hypothesis) = &hypothesis {
                hypothesis_embedding = Some(embedder.embed(hypothesis).await?);
            }
        }

        let mission = store
            .missions()
            .create(
                &name,
                &goal,
                hypothesis.as_deref(),
                mission_type.as_deref(),
                scope.as_ref(),
                goal_embedding.as_deref(),
                hypothesis_embedding.as_deref(),
            )
            .await?;

        Ok((mission_json(&mission), None))
    }
}

#[async_trait]
impl ToolHandler for CreateMissionTool {
    fn name(&self) -> &str {
        "create_mission"
    }

    fn description(&self) -> &str {
        "Create a testing mission with a goal and optional hypothesis and \
         scope. The goal and hypothesis are embedded for semantic search."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Human-readable mission name"
                },
                "goal": {
                    "type": "string",
                    "description": "Clear, specific objective for this mission"
                },
                "hypothesis": {
                    "type": "string",
                    "description": "Initial hypothesis about vulnerabilities or approach"
                },
                "mission_type": {
                    "type": "string",
                    "description": "Optional label such as auth_bypass, recon, business_logic"
                },
                "scope": {
                    "type": "object",
                    "description": "Host patterns as {\"in\": [...], \"out\": [...]}; JSON text accepted"
                }
            },
            "required": ["name", "goal"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput> {
        Ok(respond(self.run(arguments).await))
    }
}

// ============================================================================
// set_mission_context / clear_mission_context
// ============================================================================

/// Make a mission the connection's active mission.
pub struct SetMissionContextTool {
    context: Arc<ToolContext>,
}

impl SetMissionContextTool {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self { context }
    }

    async fn run(&self, arguments: Value) -> Result<(Value, Option<String>)> {
        let mut args = ToolArgs::parse(arguments)?;
        let mission_id = args.req_uuid("mission_id");
        let cookie_profile = args.opt_str("cookie_profile");
        args.finish()?;
        let mission_id = mission_id.ok_or_else(|| Error::internal("mission_id missing"))?;

        let store = self.context.store()?;
        let mission = store
            .missions()
            .get(mission_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("mission {mission_id}")))?;

        self.context.mission.set(mission_id, cookie_profile.clone());

        let mut message = format!("Mission context set to '{}' ({})", mission.name, mission.id);
        if let Some(profile) = &cookie_profile {
            message.push_str(&format!(" with cookie profile: {profile}"));
        }
        Ok((
            json!({
                "mission_id": mission.id,
                "name": mission.name,
                "cookie_profile": cookie_profile,
                "message": message,
            }),
            None,
        ))
    }
}

#[async_trait]
impl ToolHandler for SetMissionContextTool {
    fn name(&self) -> &str {
        "set_mission_context"
    }

    fn description(&self) -> &str {
        "Set the active mission for this connection. Subsequent HTTP requests \
         and action records attach to it unless overridden per call. \
         Optionally selects the cookie profile applied to requests."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "mission_id": {
                    "type": "string",
                    "description": "UUID of the mission to activate"
                },
                "cookie_profile": {
                    "type": "string",
                    "description": "Cookie profile applied to this mission's HTTP requests"
                }
            },
            "required": ["mission_id"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput> {
        Ok(respond(self.run(arguments).await))
    }
}

/// Reset the connection's active mission and cookie profile.
pub struct ClearMissionContextTool {
    context: Arc<ToolContext>,
}

impl ClearMissionContextTool {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ToolHandler for ClearMissionContextTool {
    fn name(&self) -> &str {
        "clear_mission_context"
    }

    fn description(&self) -> &str {
        "Clear the active mission and cookie profile for this connection."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _arguments: Value) -> Result<ToolOutput> {
        self.context.mission.clear();
        Ok(respond(Ok((
            json!({ "message": "mission context cleared" }),
            None,
        ))))
    }
}

// ============================================================================
// get_mission_context
// ============================================================================

/// Read the active mission with recent actions and optional focus search.
pub struct GetMissionContextTool {
    context: Arc<ToolContext>,
}

impl GetMissionContextTool {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self { context }
    }

    async fn run(&self, arguments: Value) -> Result<(Value, Option<String>)> {
        let mut args = ToolArgs::parse(arguments)?;
        let mission_id = args.opt_uuid("mission_id");
        let focus = args.opt_str("focus");
        args.finish()?;

        let Some(mission_id) = self.context.mission.resolve_mission(mission_id) else {
            return Ok((
                json!({
                    "mission": null,
                    "message": "no mission context currently set",
                }),
                None,
            ));
        };

        let store = self.context.store()?;
        let mission = store
            .missions()
            .get(mission_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("mission {mission_id}")))?;
        let recent = store.actions().for_mission(mission_id, 5).await?;

        let mut result = json!({
            "mission": mission_json(&mission),
            "recent_actions": recent.iter().map(action_json).collect::<Vec<_>>(),
        });

        if let Some(focus) = focus {
            let embedder = self.context.embedder()?;
            let query = embedder.embed(&focus).await?;
            let similar = store
                .actions()
                .find_similar(&query, Some(mission_id), 5, 0.5)
                .await?;
            result["similar_actions"] = json!(similar
                .iter()
                .map(|(action, score)| {
                    let mut entry = action_json(action);
                    entry["score"] = json!(score);
                    entry
                })
                .collect::<Vec<_>>());
        }

        let note = self.context.mission_note(mission_id).await;
        Ok((result, note))
    }
}

#[async_trait]
impl ToolHandler for GetMissionContextTool {
    fn name(&self) -> &str {
        "get_mission_context"
    }

    fn description(&self) -> &str {
        "Read the active mission (or an explicit one) with its most recent \
         actions. With a focus text, also returns semantically similar past \
         actions from the same mission."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "mission_id": {
                    "type": "string",
                    "description": "Mission UUID; defaults to the active mission"
                },
                "focus": {
                    "type": "string",
                    "description": "Topic to search similar past actions for"
                }
            }
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput> {
        Ok(respond(self.run(arguments).await))
    }
}

// ============================================================================
// record_action
// ============================================================================

/// Record one technique attempt and link recent requests to it.
pub struct RecordActionTool {
    context: Arc<ToolContext>,
}

impl RecordActionTool {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self { context }
    }

    async fn run(&self, arguments: Value) -> Result<(Value, Option<String>)> {
        let mut args = ToolArgs::parse(arguments)?;
        let technique = args.req_str("technique");
        let result_text = args.req_str("result");
        let success = args.req_tristate_bool("success");
        let hypothesis = args.opt_str("hypothesis");
        let learning = args.opt_str("learning");
        let mission_id = args.opt_uuid("mission_id");
        let link_recent = args.i64_or("link_recent_requests", 3).clamp(0, 20);
        args.finish()?;
        let technique = technique.unwrap_or_default();
        let result_text = result_text.unwrap_or_default();
        let success = success.flatten();

        let mission_id = self
            .context
            .mission
            .resolve_mission(mission_id)
            .ok_or_else(|| {
                Error::validation_msg("mission_id", "no mission given and no active mission set")
            })?;

        let store = self.context.store()?;
        if store.missions().get(mission_id).await?.is_none() {
            return Err(Error::NotFound(format!("mission {mission_id}")));
        }

        let mut action_embedding = None;
        let mut result_embedding = None;
        if let Some(embedder) = &self.context.embedder {
            action_embedding = Some(embedder.embed(&technique).await?);
            result_embedding = Some(embedder.embed(&result_text).await?);
        }

        let action = store
            .actions()
            .append(
                mission_id,
                &technique,
                hypothesis.as_deref(),
                &result_text,
                success,
                learning.as_deref(),
                action_embedding.as_deref(),
                result_embedding.as_deref(),
            )
            .await?;

        // Best-effort sweep: attach the mission's most recent requests to
        // this action. Later requests link forward via the logging pipeline.
        let mut linked = 0usize;
        if link_recent > 0 {
            let recent = store
                .requests()
                .recent_for_mission(mission_id, link_recent)
                .await?;
            for request in &recent {
                store.requests().link_to_action(request.id, action.id).await?;
                linked += 1;
            }
        }

        let mut result = action_json(&action);
        result["mission_id"] = json!(mission_id);
        result["linked_requests"] = json!(linked);
        let note = self.context.mission_note(mission_id).await;
        Ok((result, note))
    }
}

#[async_trait]
impl ToolHandler for RecordActionTool {
    fn name(&self) -> &str {
        "record_action"
    }

    fn description(&self) -> &str {
        "Record one technique attempt against the active (or given) mission. \
         Links the mission's most recent HTTP requests to the action; \
         requests issued afterwards link automatically while this remains \
         the latest action."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "technique": {
                    "type": "string",
                    "description": "Short description of the technique used"
                },
                "result": {
                    "type": "string",
                    "description": "The observed result or output"
                },
                "success": {
                    "type": "string",
                    "description": "Outcome: true/false (1/0/yes/no accepted) or 'unknown'"
                },
                "hypothesis": {
                    "type": "string",
                    "description": "What this attempt was expected to show"
                },
                "learning": {
                    "type": "string",
                    "description": "What was learned from this action"
                },
                "mission_id": {
                    "type": "string",
                    "description": "Mission UUID; defaults to the active mission"
                },
                "link_recent_requests": {
                    "type": "integer",
                    "description": "How many recent requests to link, 0-20 (default 3). Decimal strings accepted."
                }
            },
            "required": ["technique", "result", "success"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput> {
        Ok(respond(self.run(arguments).await))
    }
}

// ============================================================================
// update_mission
// ============================================================================

/// Update mission fields and drive the status state machine.
pub struct UpdateMissionTool {
    context: Arc<ToolContext>,
}

impl UpdateMissionTool {
    pub fn new(context: Arc<ToolContext>) -> Self {
        Self { context }
    }

    async fn run(&self, arguments: Value) -> Result<(Value, Option<String>)> {
        let mut args = ToolArgs::parse(arguments)?;
        let mission_id = args.req_uuid("mission_id");
        let status = args.opt_parsed::<MissionStatus>("status");
        let name = args.opt_str("name");
        let goal = args.opt_str("goal");
        let hypothesis = args.opt_str("hypothesis");
        args.finish()?;
        let mission_id = mission_id.ok_or_else(|| Error::internal("mission_id missing"))?;

        let store = self.context.store()?;
        let mission = store
            .missions()
            .update(
                mission_id,
                MissionUpdate {
                    name,
                    goal,
                    hypothesis,
                    status,
                },
            )
            .await?;

        let note = self.context.mission_note(mission_id).await;
        Ok((mission_json(&mission), note))
    }
}

#[async_trait]
impl ToolHandler for UpdateMissionTool {
    fn name(&self) -> &str {
        "update_mission"
    }

    fn description(&self) -> &str {
        "Update a mission. Status moves active<->paused and from any \
         non-terminal state to completed or failed; completed and failed are \
         terminal."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "mission_id": {
                    "type": "string",
                    "description": "UUID of the mission"
                },
                "status": {
                    "type": "string",
                    "enum": ["active", "paused", "completed", "failed"],
                    "description": "New status (optional)"
                },
                "name": {
                    "type": "string",
                    "description": "New name (optional)"
                },
                "goal": {
                    "type": "string",
                    "description": "New goal text (optional)"
                },
                "hypothesis": {
                    "type": "string",
                    "description": "New hypothesis text (optional)"
                }
            },
            "required": ["mission_id"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput> {
        Ok(respond(self.run(arguments).await))
    }
}
