//! Agent-facing tool surface
//!
//! Every tool validates through [`args::ToolArgs`], runs as a pure data
//! operation against the store, and answers with the same envelope:
//! `{ok, result?, error?, mission_context_note?}`. Handlers never leak raw
//! errors; failures are folded into the envelope with a stable kind string.

pub mod args;
pub mod contexts;
pub mod http;
pub mod library;
pub mod missions;
pub mod search;
pub mod targets;

use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::context::MissionContext;
use crate::embed::Embedder;
use crate::mcp::ToolOutput;
use crate::store::Store;
use crate::{Error, Result};

/// Shared dependencies injected into every tool of one connection.
pub struct ToolContext {
    pub store: Option<Arc<Store>>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub mission: Arc<MissionContext>,
}

impl ToolContext {
    /// The store, or `store_unavailable` when persistence is disabled.
    pub fn store(&self) -> Result<&Arc<Store>> {
        self.store.as_ref().ok_or(Error::StoreUnavailable)
    }

    /// The embedder, or the documented degradation when none is configured.
    pub fn embedder(&self) -> Result<&Arc<dyn Embedder>> {
        self.embedder.as_ref().ok_or_else(|| {
            Error::validation_msg("embeddings", "embeddings_unavailable: no embedding model configured")
        })
    }

    /// Reminder note when the operation touched the connection's active
    /// mission: `Logged to mission <id> (<name>)`.
    pub async fn mission_note(&self, touched: Uuid) -> Option<String> {
        let active = self.mission.snapshot().active_mission_id?;
        if active != touched {
            return None;
        }
        let store = self.store.as_ref()?;
        let mission = store.missions().get(touched).await.ok().flatten()?;
        Some(format!("Logged to mission {} ({})", mission.id, mission.name))
    }
}

/// Success envelope.
pub(crate) fn ok_envelope(result: Value, note: Option<String>) -> ToolOutput {
    let mut body = json!({ "ok": true, "result": result });
    if let Some(note) = note {
        body["mission_context_note"] = json!(note);
    }
    ToolOutput::text(body.to_string())
}

/// Failure envelope carrying `{kind, message, fields?}`.
pub(crate) fn error_envelope(err: &Error) -> ToolOutput {
    let mut error = json!({
        "kind": err.kind(),
        "message": err.to_string(),
    });
    if let Some(fields) = err.fields() {
        error["fields"] = json!(fields);
    }
    if let Error::Duplicate { existing_id, similarity } = err {
        error["existing_id"] = json!(existing_id);
        error["similarity"] = json!(similarity);
    }
    ToolOutput::error(json!({ "ok": false, "error": error }).to_string())
}

/// Fold a handler outcome into the response envelope.
pub(crate) fn respond(outcome: Result<(Value, Option<String>)>) -> ToolOutput {
    match outcome {
        Ok((result, note)) => ok_envelope(result, note),
        Err(e) => error_envelope(&e),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn envelope_json(output: &ToolOutput) -> Value {
        let text = output.first_text().expect("should have a text block");
        serde_json::from_str(text).expect("should be JSON")
    }

    #[test]
    fn test_ok_envelope_shape() {
        let out = ok_envelope(json!({"x": 1}), Some("Logged to mission m (n)".into()));
        let body = envelope_json(&out);
        assert_eq!(body["ok"], true);
        assert_eq!(body["result"]["x"], 1);
        assert!(body["mission_context_note"].as_str().unwrap().contains("Logged"));
    }

    #[test]
    fn test_error_envelope_carries_kind_and_fields() {
        let err = Error::validation(vec![crate::error::FieldError::new(
            "port",
            "expected integer",
        )]);
        let out = error_envelope(&err);
        assert!(out.is_error);
        let body = envelope_json(&out);
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"]["kind"], "validation_failed");
        assert_eq!(body["error"]["fields"][0]["field"], "port");
    }

    #[test]
    fn test_duplicate_envelope_references_existing_entry() {
        let id = Uuid::new_v4();
        let err = Error::Duplicate {
            existing_id: id,
            similarity: 0.93,
        };
        let body = envelope_json(&error_envelope(&err));
        assert_eq!(body["error"]["kind"], "duplicate");
        assert_eq!(body["error"]["existing_id"], json!(id));
    }

    #[test]
    fn test_store_unavailable_without_database() {
        let ctx = ToolContext {
            store: None,
            embedder: None,
            mission: Arc::new(MissionContext::new()),
        };
        assert_eq!(ctx.store().unwrap_err().kind(), "store_unavailable");
        assert_eq!(ctx.embedder().unwrap_err().kind(), "validation_failed");
    }
}
