//! Entity types backing the relational store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::Result;

/// Target lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Active,
    Inactive,
    Blocked,
    Completed,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Active => "active",
            TargetStatus::Inactive => "inactive",
            TargetStatus::Blocked => "blocked",
            TargetStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TargetStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(TargetStatus::Active),
            "inactive" => Ok(TargetStatus::Inactive),
            "blocked" => Ok(TargetStatus::Blocked),
            "completed" => Ok(TargetStatus::Completed),
            _ => Err(format!("Unknown target status: {}", s)),
        }
    }
}

/// Risk assessment level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            _ => Err(format!("Unknown risk level: {}", s)),
        }
    }
}

/// Wire protocol of a target endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    /// Scheme default port, normalised away in the endpoint triple.
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            _ => Err(format!("Unknown protocol: {}", s)),
        }
    }
}

/// Mission lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissionStatus {
    Active,
    Paused,
    Completed,
    Failed,
}

impl MissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissionStatus::Active => "active",
            MissionStatus::Paused => "paused",
            MissionStatus::Completed => "completed",
            MissionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MissionStatus::Completed | MissionStatus::Failed)
    }

    /// Allowed transitions: active <-> paused, any non-terminal -> terminal.
    pub fn can_transition_to(&self, next: MissionStatus) -> bool {
        if *self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        match next {
            MissionStatus::Active | MissionStatus::Paused => true,
            MissionStatus::Completed | MissionStatus::Failed => true,
        }
    }
}

impl std::fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MissionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(MissionStatus::Active),
            "paused" => Ok(MissionStatus::Paused),
            "completed" => Ok(MissionStatus::Completed),
            "failed" => Ok(MissionStatus::Failed),
            _ => Err(format!("Unknown mission status: {}", s)),
        }
    }
}

/// Who authored a context version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextAuthor {
    User,
    Agent,
    System,
}

impl ContextAuthor {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextAuthor::User => "user",
            ContextAuthor::Agent => "agent",
            ContextAuthor::System => "system",
        }
    }
}

impl std::str::FromStr for ContextAuthor {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(ContextAuthor::User),
            "agent" => Ok(ContextAuthor::Agent),
            "system" => Ok(ContextAuthor::System),
            _ => Err(format!("Unknown context author: {}", s)),
        }
    }
}

/// Category of a context change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextChangeType {
    Initial,
    UserEdit,
    AgentUpdate,
    Rollback,
}

impl ContextChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextChangeType::Initial => "initial",
            ContextChangeType::UserEdit => "user_edit",
            ContextChangeType::AgentUpdate => "agent_update",
            ContextChangeType::Rollback => "rollback",
        }
    }
}

impl std::str::FromStr for ContextChangeType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "initial" => Ok(ContextChangeType::Initial),
            "user_edit" => Ok(ContextChangeType::UserEdit),
            "agent_update" => Ok(ContextChangeType::AgentUpdate),
            "rollback" => Ok(ContextChangeType::Rollback),
            _ => Err(format!("Unknown change type: {}", s)),
        }
    }
}

/// A host/port/protocol triple under test
#[derive(Debug, Clone, Serialize)]
pub struct Target {
    pub id: Uuid,
    pub host: String,
    pub port: Option<i32>,
    pub protocol: Protocol,
    pub title: Option<String>,
    pub status: TargetStatus,
    pub risk_level: RiskLevel,
    pub extra_data: Value,
    pub current_context_id: Option<Uuid>,
    pub discovery_date: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Target {
    /// Canonical URL for the endpoint triple.
    pub fn base_url(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}", self.protocol, self.host, port),
            None => format!("{}://{}", self.protocol, self.host),
        }
    }

    pub(crate) fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            host: row.try_get("host")?,
            port: row.try_get("port")?,
            protocol: parse_enum(row.try_get::<_, String>("protocol")?)?,
            title: row.try_get("title")?,
            status: parse_enum(row.try_get::<_, String>("status")?)?,
            risk_level: parse_enum(row.try_get::<_, String>("risk_level")?)?,
            extra_data: row.try_get("extra_data")?,
            current_context_id: row.try_get("current_context_id")?,
            discovery_date: row.try_get("discovery_date")?,
            last_activity: row.try_get("last_activity")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// One immutable version in a target's context chain
#[derive(Debug, Clone, Serialize)]
pub struct TargetContext {
    pub id: Uuid,
    pub target_id: Uuid,
    pub version: i32,
    pub user_context: Option<String>,
    pub agent_context: Option<String>,
    pub parent_version_id: Option<Uuid>,
    pub change_type: ContextChangeType,
    pub change_summary: Option<String>,
    pub created_by: ContextAuthor,
    pub created_at: DateTime<Utc>,
}

impl TargetContext {
    pub(crate) fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            target_id: row.try_get("target_id")?,
            version: row.try_get("version")?,
            user_context: row.try_get("user_context")?,
            agent_context: row.try_get("agent_context")?,
            parent_version_id: row.try_get("parent_version_id")?,
            change_type: parse_enum(row.try_get::<_, String>("change_type")?)?,
            change_summary: row.try_get("change_summary")?,
            created_by: parse_enum(row.try_get::<_, String>("created_by")?)?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Host patterns bounding a mission
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MissionScope {
    #[serde(rename = "in", default)]
    pub in_scope: Vec<String>,
    #[serde(rename = "out", default)]
    pub out_of_scope: Vec<String>,
}

/// A bounded testing engagement
#[derive(Debug, Clone, Serialize)]
pub struct Mission {
    pub id: Uuid,
    pub name: String,
    pub goal: String,
    pub hypothesis: Option<String>,
    pub mission_type: Option<String>,
    pub scope: Option<MissionScope>,
    pub status: MissionStatus,
    pub extra_data: Value,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Mission {
    pub(crate) fn from_row(row: &Row) -> Result<Self> {
        let scope: Option<Value> = row.try_get("scope")?;
        let scope = match scope {
            Some(value) => Some(serde_json::from_value(value)?),
            None => None,
        };
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            goal: row.try_get("goal")?,
            hypothesis: row.try_get("hypothesis")?,
            mission_type: row.try_get("mission_type")?,
            scope,
            status: parse_enum(row.try_get::<_, String>("status")?)?,
            extra_data: row.try_get("extra_data")?,
            created_at: row.try_get("created_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

/// Immutable record of one technique attempt within a mission
#[derive(Debug, Clone, Serialize)]
pub struct MissionAction {
    pub id: Uuid,
    pub mission_id: Uuid,
    pub technique: String,
    pub hypothesis: Option<String>,
    pub result: String,
    /// `None` encodes an unknown outcome.
    pub success: Option<bool>,
    pub learning: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MissionAction {
    pub(crate) fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            mission_id: row.try_get("mission_id")?,
            technique: row.try_get("technique")?,
            hypothesis: row.try_get("hypothesis")?,
            result: row.try_get("result")?,
            success: row.try_get("success")?,
            learning: row.try_get("learning")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Immutable record of one executed HTTP request
#[derive(Debug, Clone, Serialize)]
pub struct HttpRequestRecord {
    pub id: Uuid,
    pub mission_id: Option<Uuid>,
    pub method: String,
    pub url: String,
    pub host: String,
    pub path: String,
    pub query_params: Option<Value>,
    pub headers: Value,
    pub cookies: Option<Value>,
    pub request_body: Option<String>,
    pub request_body_size: Option<i64>,
    pub status_code: Option<i32>,
    pub response_headers: Option<Value>,
    pub response_body: Option<String>,
    pub response_size: Option<i64>,
    pub elapsed_ms: Option<f64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl HttpRequestRecord {
    pub(crate) fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            mission_id: row.try_get("mission_id")?,
            method: row.try_get("method")?,
            url: row.try_get("url")?,
            host: row.try_get("host")?,
            path: row.try_get("path")?,
            query_params: row.try_get("query_params")?,
            headers: row.try_get("headers")?,
            cookies: row.try_get("cookies")?,
            request_body: row.try_get("request_body")?,
            request_body_size: row.try_get("request_body_size")?,
            status_code: row.try_get("status_code")?,
            response_headers: row.try_get("response_headers")?,
            response_body: row.try_get("response_body")?,
            response_size: row.try_get("response_size")?,
            elapsed_ms: row.try_get("elapsed_ms")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Insert payload for a request record
#[derive(Debug, Clone, Default)]
pub struct NewHttpRequest {
    pub mission_id: Option<Uuid>,
    pub method: String,
    pub url: String,
    pub host: String,
    pub path: String,
    pub query_params: Option<Value>,
    pub headers: Value,
    pub cookies: Option<Value>,
    pub request_body: Option<String>,
    pub request_body_size: Option<i64>,
    pub status_code: Option<i32>,
    pub response_headers: Option<Value>,
    pub response_body: Option<String>,
    pub response_size: Option<i64>,
    pub elapsed_ms: Option<f64>,
    pub error_message: Option<String>,
}

/// LLM-curated technique library entry
#[derive(Debug, Clone, Serialize)]
pub struct LibraryEntry {
    pub id: Uuid,
    pub category: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub extra_data: Value,
    pub usage_count: i64,
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl LibraryEntry {
    pub(crate) fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            category: row.try_get("category")?,
            title: row.try_get("title")?,
            content: row.try_get("content")?,
            tags: row.try_get("tags")?,
            extra_data: row.try_get("extra_data")?,
            usage_count: row.try_get("usage_count")?,
            last_used: row.try_get("last_used")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Target plus derived counts for summaries
#[derive(Debug, Clone, Serialize)]
pub struct TargetSummary {
    pub target: Target,
    pub request_count: i64,
    pub context_excerpt: Option<String>,
}

fn parse_enum<T: std::str::FromStr<Err = String>>(raw: String) -> Result<T> {
    raw.parse()
        .map_err(|e: String| crate::Error::internal(format!("corrupt enum column: {e}")))
}
