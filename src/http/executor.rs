//! HTTP executor
//!
//! Performs the actual transfer with proxy, header, cookie, auth, redirect
//! and timeout controls, then hands the full envelope to the logging
//! pipeline. Logging failures never fail the HTTP call; they come back in a
//! structured side channel on the envelope.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::config::Settings;
use crate::context::MissionContext;
use crate::error::FieldError;
use crate::http::logging::{EffectiveRequest, LoggingPipeline};
use crate::resources::cookies::CookieProfileCache;
use crate::{Error, Result};

/// Supported HTTP methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }

    fn to_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Options => reqwest::Method::OPTIONS,
        }
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            _ => Err(format!("Unsupported HTTP method: {}", s)),
        }
    }
}

/// Request authentication
#[derive(Debug, Clone)]
pub enum AuthSpec {
    Basic { username: String, password: String },
    Bearer { token: String },
}

/// Fully-specified outbound request
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub url: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    pub query_params: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    pub auth: Option<AuthSpec>,
    pub body: Option<String>,
    pub follow_redirects: bool,
    pub max_redirects: usize,
    pub timeout_ms: u64,
    pub verify_tls: bool,
    pub proxy_url: Option<String>,
    /// Cookie profile name; merged under explicit `cookies` by key.
    pub cookie_profile: Option<String>,
    /// Per-call override of the active mission.
    pub mission_id: Option<Uuid>,
}

impl RequestSpec {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Get,
            headers: BTreeMap::new(),
            query_params: BTreeMap::new(),
            cookies: BTreeMap::new(),
            auth: None,
            body: None,
            follow_redirects: true,
            max_redirects: 10,
            timeout_ms: 30_000,
            verify_tls: true,
            proxy_url: None,
            cookie_profile: None,
            mission_id: None,
        }
    }
}

/// What came back from the transfer
#[derive(Debug, Clone, Serialize)]
pub struct ResponseEnvelope {
    pub status: Option<u16>,
    pub headers: BTreeMap<String, String>,
    /// Response body, truncated at the configured cap.
    pub body: String,
    pub body_truncated: bool,
    /// Full body size in bytes before truncation.
    pub response_size: Option<i64>,
    pub elapsed_ms: f64,
    pub final_url: String,
    /// Set iff the transport failed with no response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Names of logging pipeline steps that failed, if any.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub logging_errors: Vec<String>,
}

/// Outbound HTTP executor bound to one agent connection.
pub struct HttpExecutor {
    settings: Settings,
    mission_context: Arc<MissionContext>,
    cookie_cache: Option<Arc<CookieProfileCache>>,
    pipeline: Option<Arc<LoggingPipeline>>,
}

impl HttpExecutor {
    pub fn new(
        settings: Settings,
        mission_context: Arc<MissionContext>,
        cookie_cache: Option<Arc<CookieProfileCache>>,
        pipeline: Option<Arc<LoggingPipeline>>,
    ) -> Self {
        Self {
            settings,
            mission_context,
            cookie_cache,
            pipeline,
        }
    }

    /// Configured default timeout for requests that do not override it.
    pub fn default_timeout_ms(&self) -> u64 {
        self.settings.request_timeout_ms
    }

    /// Configured default TLS verification posture.
    pub fn default_verify_tls(&self) -> bool {
        self.settings.verify_tls
    }

    /// Execute one request and record it.
    ///
    /// Transport failures still produce an envelope (with `error` set) and a
    /// persisted request row; only invalid input surfaces as `Err`.
    pub async fn execute(&self, spec: RequestSpec) -> Result<ResponseEnvelope> {
        let url = reqwest::Url::parse(&spec.url).map_err(|e| {
            Error::validation(vec![FieldError::new("url", format!("invalid URL: {e}"))
                .with_received(spec.url.clone())])
        })?;

        let cookies = self.merged_cookies(&spec).await?;
        let client = self.build_client(&spec)?;
        let request = self.build_request(&client, &spec, url, &cookies)?;

        let started = Instant::now();
        let outcome = client.execute(request).await;
        let mut envelope = match outcome {
            Ok(response) => {
                let final_url = response.url().to_string();
                let status = response.status().as_u16();
                let headers = header_map(response.headers());
                let bytes: Vec<u8> = match response.bytes().await {
                    Ok(bytes) => bytes.to_vec(),
                    Err(e) => {
                        debug!(error = %e, "failed reading response body");
                        Vec::new()
                    }
                };
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                let full = String::from_utf8_lossy(&bytes).into_owned();
                let (body, truncated) =
                    truncate_to_bytes(&full, self.settings.max_response_body_bytes);
                ResponseEnvelope {
                    status: Some(status),
                    headers,
                    body,
                    body_truncated: truncated,
                    response_size: Some(bytes.len() as i64),
                    elapsed_ms,
                    final_url,
                    error: None,
                    logging_errors: Vec::new(),
                }
            }
            Err(e) => {
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                let final_url = e.url().map_or_else(|| spec.url.clone(), |u| u.to_string());
                let error = if e.is_timeout() {
                    "timeout".to_string()
                } else {
                    format!("transport error: {e}")
                };
                ResponseEnvelope {
                    status: None,
                    headers: BTreeMap::new(),
                    body: String::new(),
                    body_truncated: false,
                    response_size: None,
                    elapsed_ms,
                    final_url,
                    error: Some(error),
                    logging_errors: Vec::new(),
                }
            }
        };

        if let Some(pipeline) = &self.pipeline {
            let mission_id = self.mission_context.resolve_mission(spec.mission_id);
            let effective = EffectiveRequest {
                method: spec.method.as_str().to_string(),
                requested_url: spec.url.clone(),
                query_params: spec.query_params.clone(),
                headers: spec.headers.clone(),
                cookies,
                body: spec.body.clone(),
                mission_id,
            };
            envelope.logging_errors = pipeline.record(&effective, &envelope).await;
        }

        Ok(envelope)
    }

    /// Profile cookies merged under explicit ones; explicit wins by key.
    async fn merged_cookies(&self, spec: &RequestSpec) -> Result<BTreeMap<String, String>> {
        let mut merged = BTreeMap::new();
        let profile = self
            .mission_context
            .resolve_cookie_profile(spec.cookie_profile.as_deref());
        if let Some(name) = profile {
            let cache = self.cookie_cache.as_ref().ok_or_else(|| {
                Error::validation_msg(
                    "cookie_profile",
                    "cookie profiles are not configured on this gateway",
                )
            })?;
            let loaded = cache.fetch(&name).await?;
            merged.extend(loaded.cookies.clone());
        }
        for (key, value) in &spec.cookies {
            if merged.contains_key(key) {
                debug!(cookie = %key, "explicit cookie overrides profile value");
            }
            merged.insert(key.clone(), value.clone());
        }
        Ok(merged)
    }

    fn build_client(&self, spec: &RequestSpec) -> Result<reqwest::Client> {
        let redirect = if spec.follow_redirects {
            reqwest::redirect::Policy::limited(spec.max_redirects)
        } else {
            reqwest::redirect::Policy::none()
        };
        let mut builder = reqwest::Client::builder()
            .redirect(redirect)
            .timeout(Duration::from_millis(spec.timeout_ms))
            .danger_accept_invalid_certs(!spec.verify_tls);

        if let Some(proxy_url) = spec.proxy_url.as_ref().or(self.settings.proxy_url.as_ref()) {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| Error::validation_msg("proxy_url", format!("invalid proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }

        builder
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))
    }

    fn build_request(
        &self,
        client: &reqwest::Client,
        spec: &RequestSpec,
        url: reqwest::Url,
        cookies: &BTreeMap<String, String>,
    ) -> Result<reqwest::Request> {
        let mut builder = client.request(spec.method.to_reqwest(), url);

        let mut field_errors = Vec::new();
        for (name, value) in &spec.headers {
            match (
                reqwest::header::HeaderName::from_bytes(name.as_bytes()),
                reqwest::header::HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    builder = builder.header(name, value);
                }
                _ => field_errors.push(
                    FieldError::new("headers", format!("invalid header {name:?}"))
                        .with_received(value.clone()),
                ),
            }
        }
        if !field_errors.is_empty() {
            return Err(Error::validation(field_errors));
        }

        if !spec.query_params.is_empty() {
            let pairs: Vec<(&str, &str)> = spec
                .query_params
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            builder = builder.query(&pairs);
        }

        if !cookies.is_empty() {
            let header = cookies
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(reqwest::header::COOKIE, header);
        }

        match &spec.auth {
            Some(AuthSpec::Basic { username, password }) => {
                builder = builder.basic_auth(username, Some(password));
            }
            Some(AuthSpec::Bearer { token }) => {
                builder = builder.bearer_auth(token);
            }
            None => {}
        }

        if let Some(body) = &spec.body {
            builder = builder.body(body.clone());
        }

        builder
            .build()
            .map_err(|e| Error::validation_msg("url", format!("cannot build request: {e}")))
    }
}

fn header_map(headers: &reqwest::header::HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

/// Truncate a string at a byte budget without splitting a character.
pub(crate) fn truncate_to_bytes(text: &str, max_bytes: usize) -> (String, bool) {
    if text.len() <= max_bytes {
        return (text.to_string(), false);
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    (text[..end].to_string(), true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parsing() {
        assert_eq!("get".parse::<HttpMethod>(), Ok(HttpMethod::Get));
        assert_eq!("POST".parse::<HttpMethod>(), Ok(HttpMethod::Post));
        assert!("TRACE".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn test_truncate_at_exact_limit_keeps_body() {
        let body = "a".repeat(64);
        let (kept, truncated) = truncate_to_bytes(&body, 64);
        assert_eq!(kept.len(), 64);
        assert!(!truncated);
    }

    #[test]
    fn test_truncate_one_byte_over() {
        let body = "a".repeat(65);
        let (kept, truncated) = truncate_to_bytes(&body, 64);
        assert_eq!(kept.len(), 64);
        assert!(truncated);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        // 'é' is two bytes; a cut in the middle must back off.
        let body = "é".repeat(10);
        let (kept, truncated) = truncate_to_bytes(&body, 3);
        assert!(truncated);
        assert_eq!(kept, "é");
    }

    #[test]
    fn test_request_spec_defaults() {
        let spec = RequestSpec::new("https://example.com/");
        assert_eq!(spec.method, HttpMethod::Get);
        assert!(spec.follow_redirects);
        assert_eq!(spec.max_redirects, 10);
        assert_eq!(spec.timeout_ms, 30_000);
        assert!(spec.verify_tls);
    }
}
