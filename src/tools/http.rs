//! The http_request tool

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::http::{AuthSpec, HttpExecutor, HttpMethod, RequestSpec};
use crate::mcp::{ToolHandler, ToolOutput};
use crate::tools::args::ToolArgs;
use crate::tools::{respond, ToolContext};
use crate::{Error, Result};

/// Execute an HTTP request through the instrumented gateway.
pub struct HttpRequestTool {
    context: Arc<ToolContext>,
    executor: Arc<HttpExecutor>,
}

impl HttpRequestTool {
    pub fn new(context: Arc<ToolContext>, executor: Arc<HttpExecutor>) -> Self {
        Self { context, executor }
    }

    async fn run(&self, arguments: Value) -> Result<(Value, Option<String>)> {
        let mut args = ToolArgs::parse(arguments)?;
        let url = args.req_str("url");
        let method = args.opt_parsed::<HttpMethod>("method");
        let headers = args.opt_string_map("headers").unwrap_or_default();
        let query_params = args.opt_string_map("query_params").unwrap_or_default();
        let cookies = args.opt_string_map("cookies").unwrap_or_default();
        let auth = args.opt_string_map("auth");
        let body = args.opt_str("body");
        let follow_redirects = args.bool_or("follow_redirects", true);
        let max_redirects = args.i64_or("max_redirects", 10).clamp(0, 30);
        let timeout_ms = args
            .i64_or("timeout_ms", self.executor.default_timeout_ms() as i64)
            .clamp(1, 600_000);
        let verify_tls = args.bool_or("verify_tls", self.executor.default_verify_tls());
        let proxy_url = args.opt_str("proxy_url");
        let cookie_profile = args.opt_str("cookie_profile");
        let mission_id = args.opt_uuid("mission_id");

        let auth = match auth {
            Some(map) => match parse_auth(&map) {
                Ok(auth) => Some(auth),
                Err(message) => {
                    args.reject("auth", message);
                    None
                }
            },
            None => None,
        };
        args.finish()?;
        let url = url.unwrap_or_default();

        let spec = RequestSpec {
            url,
            method: method.unwrap_or(HttpMethod::Get),
            headers,
            query_params,
            cookies,
            auth,
            body,
            follow_redirects,
            max_redirects: max_redirects as usize,
            timeout_ms: timeout_ms as u64,
            verify_tls,
            proxy_url,
            cookie_profile,
            mission_id,
        };

        let effective_mission = self.context.mission.resolve_mission(spec.mission_id);
        let envelope = self.executor.execute(spec).await?;

        if let Some(error) = &envelope.error {
            return Err(if error == "timeout" {
                Error::Timeout(format!(
                    "request to {} timed out after {:.0} ms",
                    envelope.final_url, envelope.elapsed_ms
                ))
            } else {
                Error::Transport(error.clone())
            });
        }

        let note = match effective_mission {
            Some(mission_id) => self.context.mission_note(mission_id).await,
            None => None,
        };
        Ok((json!(envelope), note))
    }
}

fn parse_auth(map: &std::collections::BTreeMap<String, String>) -> std::result::Result<AuthSpec, String> {
    if let Some(token) = map.get("bearer").or_else(|| map.get("token")) {
        return Ok(AuthSpec::Bearer {
            token: token.clone(),
        });
    }
    match (map.get("username"), map.get("password")) {
        (Some(username), Some(password)) => Ok(AuthSpec::Basic {
            username: username.clone(),
            password: password.clone(),
        }),
        _ => Err(
            "expected {\"username\": ..., \"password\": ...} or {\"bearer\": ...}".to_string(),
        ),
    }
}

#[async_trait]
impl ToolHandler for HttpRequestTool {
    fn name(&self) -> &str {
        "http_request"
    }

    fn description(&self) -> &str {
        "Execute an HTTP request through the gateway. Every request is \
         recorded, the target is materialised from the URL, and with an \
         active mission the request links to its most recent action. \
         Profile cookies merge under explicit cookies (explicit wins by key)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "Target URL to request"
                },
                "method": {
                    "type": "string",
                    "enum": ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"],
                    "description": "HTTP method (default GET)"
                },
                "headers": {
                    "type": "object",
                    "description": "Request headers as an object, e.g. {\"Accept\": \"application/json\"}; JSON text accepted"
                },
                "query_params": {
                    "type": "object",
                    "description": "Query parameters as an object; JSON text accepted"
                },
                "cookies": {
                    "type": "object",
                    "description": "Cookies as an object; JSON text accepted. Override profile cookies by key."
                },
                "auth": {
                    "type": "object",
                    "description": "{\"username\": ..., \"password\": ...} for basic auth or {\"bearer\": ...} for a token; JSON text accepted"
                },
                "body": {
                    "type": "string",
                    "description": "Request body (raw text or JSON string)"
                },
                "follow_redirects": {
                    "type": "boolean",
                    "description": "Follow redirects (default true; accepts true/false/1/0/yes/no)"
                },
                "max_redirects": {
                    "type": "integer",
                    "description": "Redirect hop limit 0-30 (default 10). Decimal strings accepted."
                },
                "timeout_ms": {
                    "type": "integer",
                    "description": "Request timeout in milliseconds (default 30000). Decimal strings accepted."
                },
                "verify_tls": {
                    "type": "boolean",
                    "description": "Verify TLS certificates (default true)"
                },
                "proxy_url": {
                    "type": "string",
                    "description": "Per-call proxy override"
                },
                "cookie_profile": {
                    "type": "string",
                    "description": "Named cookie profile supplying authentication state"
                },
                "mission_id": {
                    "type": "string",
                    "description": "Per-call override of the active mission"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput> {
        Ok(respond(self.run(arguments).await))
    }
}
