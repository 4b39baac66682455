//! Request logging and auto-attribution pipeline
//!
//! Runs after every completed transfer, success or transport failure.
//! Observability must never break the observed operation: every step is
//! wrapped individually, failures are tagged with the step name and emitted
//! as warnings, and the HTTP call's return value is unaffected.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::warn;
use url::Url;
use uuid::Uuid;

use crate::config::REDACTED;
use crate::http::executor::{truncate_to_bytes, ResponseEnvelope};
use crate::store::models::{NewHttpRequest, Protocol};
use crate::store::{Store, TargetDefaults};
use crate::Result;

/// The request as actually sent, after defaulting and profile merging.
#[derive(Debug, Clone)]
pub struct EffectiveRequest {
    pub method: String,
    pub requested_url: String,
    pub query_params: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    pub body: Option<String>,
    pub mission_id: Option<Uuid>,
}

/// Best-effort recorder shared by one connection's executor.
pub struct LoggingPipeline {
    store: Arc<Store>,
    max_request_body_bytes: usize,
    max_response_body_bytes: usize,
    sensitive_headers: HashSet<String>,
}

impl LoggingPipeline {
    pub fn new(
        store: Arc<Store>,
        max_request_body_bytes: usize,
        max_response_body_bytes: usize,
        sensitive_headers: &[String],
    ) -> Self {
        Self {
            store,
            max_request_body_bytes,
            max_response_body_bytes,
            sensitive_headers: sensitive_headers.iter().map(|h| h.to_lowercase()).collect(),
        }
    }

    /// Record one completed transfer. Returns the names of failed steps.
    pub async fn record(&self, request: &EffectiveRequest, envelope: &ResponseEnvelope) -> Vec<String> {
        let mut failed_steps = Vec::new();

        // Step 1: parse the final URL for attribution. A failure here skips
        // target attribution but still logs the request.
        let endpoint = match parse_endpoint(&envelope.final_url) {
            Ok(endpoint) => Some(endpoint),
            Err(e) => {
                warn!(step = "parse_url", error = %e, url = %envelope.final_url,
                      "request logging step failed");
                failed_steps.push("parse_url".to_string());
                None
            }
        };

        // Step 2: upsert the target for the endpoint triple.
        let mut target_id = None;
        if let Some((host, port, protocol)) = &endpoint {
            match self
                .store
                .targets()
                .upsert(host, *port, *protocol, TargetDefaults::default())
                .await
            {
                Ok((target, _created)) => target_id = Some(target.id),
                Err(e) => {
                    warn!(step = "upsert_target", error = %e, "request logging step failed");
                    failed_steps.push("upsert_target".to_string());
                }
            }
        }

        // Steps 3 and 4 are pure: truncation and redaction.
        let (request_body, request_body_size) = match &request.body {
            Some(body) => {
                let (kept, _truncated) = truncate_to_bytes(body, self.max_request_body_bytes);
                (Some(kept), Some(body.len() as i64))
            }
            None => (None, None),
        };
        let (response_body, _) = truncate_to_bytes(&envelope.body, self.max_response_body_bytes);
        let headers = self.redact(&request.headers);
        let response_headers = self.redact(&envelope.headers);

        // Step 5: insert the request record.
        let record = NewHttpRequest {
            mission_id: request.mission_id,
            method: request.method.clone(),
            url: envelope.final_url.clone(),
            host: endpoint
                .as_ref()
                .map(|(host, _, _)| host.clone())
                .unwrap_or_default(),
            path: parse_path(&envelope.final_url),
            query_params: if request.query_params.is_empty() {
                None
            } else {
                Some(map_to_json(&request.query_params))
            },
            headers,
            cookies: if request.cookies.is_empty() {
                None
            } else {
                Some(map_to_json(&request.cookies))
            },
            request_body,
            request_body_size,
            status_code: envelope.status.map(i32::from),
            response_headers: Some(response_headers),
            response_body: if response_body.is_empty() {
                None
            } else {
                Some(response_body)
            },
            response_size: envelope.response_size,
            elapsed_ms: Some(envelope.elapsed_ms),
            error_message: envelope.error.clone(),
        };

        let request_id = match self.store.requests().insert(record).await {
            Ok(inserted) => Some((inserted.id, inserted.created_at)),
            Err(e) => {
                warn!(step = "insert_request", error = %e, "request logging step failed");
                failed_steps.push("insert_request".to_string());
                None
            }
        };

        if let (Some((request_id, _)), Some(target_id)) = (&request_id, target_id) {
            if let Err(e) = self.store.requests().link_to_target(*request_id, target_id).await {
                warn!(step = "link_target", error = %e, "request logging step failed");
                failed_steps.push("link_target".to_string());
            }
        }

        // Step 6: link to the active mission's most recent action.
        if let (Some((request_id, _)), Some(mission_id)) = (&request_id, request.mission_id) {
            match self.store.actions().latest(mission_id).await {
                Ok(Some(action)) => {
                    if let Err(e) = self
                        .store
                        .requests()
                        .link_to_action(*request_id, action.id)
                        .await
                    {
                        warn!(step = "link_action", error = %e, "request logging step failed");
                        failed_steps.push("link_action".to_string());
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(step = "link_action", error = %e, "request logging step failed");
                    failed_steps.push("link_action".to_string());
                }
            }
        }

        // Step 7: bump the target's last activity to the request timestamp.
        if let Some(target_id) = target_id {
            let result = match &request_id {
                Some((_, created_at)) => self.store.targets().set_activity(target_id, *created_at).await,
                None => self.store.targets().bump_activity(target_id).await,
            };
            if let Err(e) = result {
                warn!(step = "bump_activity", error = %e, "request logging step failed");
                failed_steps.push("bump_activity".to_string());
            }
        }

        failed_steps
    }

    fn redact(&self, headers: &BTreeMap<String, String>) -> Value {
        redact_headers(headers, &self.sensitive_headers)
    }
}

/// Replace values of sensitive headers (case-insensitive names).
fn redact_headers(headers: &BTreeMap<String, String>, sensitive: &HashSet<String>) -> Value {
    let mut out = serde_json::Map::new();
    for (name, value) in headers {
        let value = if sensitive.contains(&name.to_lowercase()) {
            REDACTED.to_string()
        } else {
            value.clone()
        };
        out.insert(name.clone(), json!(value));
    }
    Value::Object(out)
}

/// `(host, port, protocol)` from a URL, with the scheme-default port
/// normalised to absent.
pub(crate) fn parse_endpoint(raw: &str) -> Result<(String, Option<u16>, Protocol)> {
    let url = Url::parse(raw).map_err(|e| crate::Error::Parse(format!("invalid URL: {e}")))?;
    let protocol: Protocol = url
        .scheme()
        .parse()
        .map_err(crate::Error::Parse)?;
    let host = url
        .host_str()
        .ok_or_else(|| crate::Error::Parse(format!("URL has no host: {raw}")))?
        .to_lowercase();
    // Url::port() already yields None for the scheme default.
    Ok((host, url.port(), protocol))
}

fn parse_path(raw: &str) -> String {
    Url::parse(raw)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| "/".to_string())
}

fn map_to_json(map: &BTreeMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), json!(v)))
            .collect(),
    )
}
