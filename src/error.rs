//! Error types for probegate

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias using probegate Error
pub type Result<T> = std::result::Result<T, Error>;

/// A single field diagnostic inside a validation failure.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<String>,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            received: None,
        }
    }

    pub fn with_received(mut self, received: impl Into<String>) -> Self {
        self.received = Some(received.into());
        self
    }
}

/// Core error types for probegate
#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("Validation failed: {summary}")]
    #[diagnostic(code(probegate::validation))]
    Validation {
        summary: String,
        fields: Vec<FieldError>,
    },

    #[error("Not found: {0}")]
    #[diagnostic(code(probegate::not_found))]
    NotFound(String),

    #[error("Conflict: {0}")]
    #[diagnostic(code(probegate::conflict))]
    Conflict(String),

    #[error("Duplicate entry {existing_id} (similarity {similarity:.3})")]
    #[diagnostic(code(probegate::duplicate))]
    Duplicate { existing_id: Uuid, similarity: f64 },

    #[error("Insecure permissions: {0}")]
    #[diagnostic(code(probegate::insecure_permissions))]
    InsecurePermissions(String),

    #[error("Path escape: {0}")]
    #[diagnostic(code(probegate::path_escape))]
    PathEscape(String),

    #[error("Parse error: {0}")]
    #[diagnostic(code(probegate::parse_error))]
    Parse(String),

    #[error("Timeout: {0}")]
    #[diagnostic(code(probegate::timeout))]
    Timeout(String),

    #[error("Transport error: {0}")]
    #[diagnostic(code(probegate::transport))]
    Transport(String),

    #[error("Store unavailable")]
    #[diagnostic(code(probegate::store_unavailable))]
    StoreUnavailable,

    #[error("Database error: {0}")]
    #[diagnostic(code(probegate::database))]
    Database(#[from] tokio_postgres::Error),

    #[error("Connection pool error: {0}")]
    #[diagnostic(code(probegate::pool))]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("IO error: {0}")]
    #[diagnostic(code(probegate::io))]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(probegate::serde))]
    Serde(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    #[diagnostic(code(probegate::yaml))]
    Yaml(#[from] serde_yaml::Error),

    #[error("Internal error [{correlation}]: {message}")]
    #[diagnostic(code(probegate::internal))]
    Internal { correlation: String, message: String },
}

impl Error {
    /// Build a validation failure from collected field diagnostics.
    pub fn validation(fields: Vec<FieldError>) -> Self {
        let summary = fields
            .iter()
            .map(|f| f.field.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Error::Validation { summary, fields }
    }

    /// Validation failure with a single free-form message.
    pub fn validation_msg(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::validation(vec![FieldError::new(field, message)])
    }

    /// Internal error carrying a short correlation id for log lookup.
    pub fn internal(message: impl Into<String>) -> Self {
        let correlation = Uuid::new_v4().to_string()[..8].to_string();
        Error::Internal {
            correlation,
            message: message.into(),
        }
    }

    /// Stable kind string surfaced to the agent.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "validation_failed",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::Duplicate { .. } => "duplicate",
            Error::InsecurePermissions(_) => "insecure_permissions",
            Error::PathEscape(_) => "path_escape",
            Error::Parse(_) | Error::Yaml(_) => "parse_error",
            Error::Timeout(_) => "timeout",
            Error::Transport(_) => "transport_error",
            Error::StoreUnavailable | Error::Pool(_) => "store_unavailable",
            Error::Database(_) | Error::Io(_) | Error::Serde(_) | Error::Internal { .. } => {
                "internal"
            }
        }
    }

    /// Field diagnostics, present only for validation failures.
    pub fn fields(&self) -> Option<&[FieldError]> {
        match self {
            Error::Validation { fields, .. } => Some(fields),
            _ => None,
        }
    }
}
