//! Lenient tool argument parsing
//!
//! Agent callers routinely pass scalars as strings and structures as JSON
//! text, so every accessor accepts the declared type or a coercible text
//! form. Failures are collected rather than returned one at a time; callers
//! drain them with [`ToolArgs::finish`] so the agent sees every offending
//! field at once.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::FieldError;
use crate::{Error, Result};

/// Argument bag with error accumulation.
pub struct ToolArgs {
    values: Map<String, Value>,
    errors: Vec<FieldError>,
}

impl ToolArgs {
    /// Accept an object or null/absent arguments.
    pub fn parse(arguments: Value) -> Result<Self> {
        let values = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(Error::validation(vec![FieldError::new(
                    "arguments",
                    "expected a JSON object",
                )
                .with_received(other.to_string())]))
            }
        };
        Ok(Self {
            values,
            errors: Vec::new(),
        })
    }

    fn take(&mut self, field: &str) -> Option<Value> {
        match self.values.remove(field) {
            Some(Value::Null) | None => None,
            Some(value) => Some(value),
        }
    }

    fn fail(&mut self, field: &str, message: impl Into<String>, received: &Value) {
        self.errors
            .push(FieldError::new(field, message).with_received(received.to_string()));
    }

    fn missing(&mut self, field: &str, expected: &str) {
        self.errors
            .push(FieldError::new(field, format!("required, expected {expected}")));
    }

    pub fn opt_str(&mut self, field: &str) -> Option<String> {
        let value = self.take(field)?;
        match value {
            Value::String(s) => Some(s),
            other => {
                self.fail(field, "expected string", &other);
                None
            }
        }
    }

    pub fn req_str(&mut self, field: &str) -> Option<String> {
        match self.opt_str(field) {
            Some(s) => Some(s),
            None => {
                if !self.errors.iter().any(|e| e.field == field) {
                    self.missing(field, "string");
                }
                None
            }
        }
    }

    pub fn opt_uuid(&mut self, field: &str) -> Option<Uuid> {
        let value = self.take(field)?;
        let raw = match &value {
            Value::String(s) => s.clone(),
            other => {
                self.fail(field, "expected UUID string", other);
                return None;
            }
        };
        match raw.parse() {
            Ok(id) => Some(id),
            Err(_) => {
                self.fail(field, "expected UUID string", &value);
                None
            }
        }
    }

    pub fn req_uuid(&mut self, field: &str) -> Option<Uuid> {
        match self.opt_uuid(field) {
            Some(id) => Some(id),
            None => {
                if !self.errors.iter().any(|e| e.field == field) {
                    self.missing(field, "UUID string");
                }
                None
            }
        }
    }

    /// Booleans accept true/false, 0/1, and the usual string spellings.
    pub fn opt_bool(&mut self, field: &str) -> Option<bool> {
        let value = self.take(field)?;
        match coerce_bool(&value) {
            Some(b) => Some(b),
            None => {
                self.fail(
                    field,
                    "expected boolean (true/false/1/0/yes/no)",
                    &value,
                );
                None
            }
        }
    }

    pub fn bool_or(&mut self, field: &str, default: bool) -> bool {
        self.opt_bool(field).unwrap_or(default)
    }

    /// Tri-state outcome: boolean spellings plus the literal `unknown`.
    ///
    /// Returns `Some(None)` for unknown, `Some(Some(b))` for a boolean, and
    /// `None` (with a recorded error) when the field is missing or invalid.
    pub fn req_tristate_bool(&mut self, field: &str) -> Option<Option<bool>> {
        let Some(value) = self.take(field) else {
            self.missing(field, "boolean or 'unknown'");
            return None;
        };
        if let Value::String(s) = &value {
            if s.trim().eq_ignore_ascii_case("unknown") {
                return Some(None);
            }
        }
        match coerce_bool(&value) {
            Some(b) => Some(Some(b)),
            None => {
                self.fail(
                    field,
                    "expected boolean (true/false/1/0/yes/no) or 'unknown'",
                    &value,
                );
                None
            }
        }
    }

    /// Integers accept numbers or decimal strings.
    pub fn opt_i64(&mut self, field: &str) -> Option<i64> {
        let value = self.take(field)?;
        match coerce_i64(&value) {
            Some(n) => Some(n),
            None => {
                self.fail(field, "expected integer (or decimal string)", &value);
                None
            }
        }
    }

    pub fn i64_or(&mut self, field: &str, default: i64) -> i64 {
        self.opt_i64(field).unwrap_or(default)
    }

    pub fn opt_f64(&mut self, field: &str) -> Option<f64> {
        let value = self.take(field)?;
        match &value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => match s.trim().parse() {
                Ok(f) => Some(f),
                Err(_) => {
                    self.fail(field, "expected number (or numeric string)", &value);
                    None
                }
            },
            other => {
                self.fail(field, "expected number (or numeric string)", other);
                None
            }
        }
    }

    pub fn f64_or(&mut self, field: &str, default: f64) -> f64 {
        self.opt_f64(field).unwrap_or(default)
    }

    /// Enum-ish fields parsed through `FromStr`.
    pub fn opt_parsed<T>(&mut self, field: &str) -> Option<T>
    where
        T: std::str::FromStr<Err = String>,
    {
        let value = self.take(field)?;
        let raw = match &value {
            Value::String(s) => s.clone(),
            other => {
                self.fail(field, "expected string", other);
                return None;
            }
        };
        match raw.parse() {
            Ok(parsed) => Some(parsed),
            Err(message) => {
                self.fail(field, message, &value);
                None
            }
        }
    }

    /// String→string maps accept a JSON object or its text serialisation.
    pub fn opt_string_map(&mut self, field: &str) -> Option<BTreeMap<String, String>> {
        let value = self.take(field)?;
        let object = match &value {
            Value::Object(map) => map.clone(),
            Value::String(text) => match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => map,
                _ => {
                    self.fail(field, "expected JSON object (or its text form)", &value);
                    return None;
                }
            },
            other => {
                self.fail(field, "expected JSON object (or its text form)", other);
                return None;
            }
        };

        let mut out = BTreeMap::new();
        for (key, entry) in object {
            match scalar_to_string(&entry) {
                Some(text) => {
                    out.insert(key, text);
                }
                None => {
                    self.fail(
                        field,
                        format!("value for {key:?} must be a scalar"),
                        &entry,
                    );
                    return None;
                }
            }
        }
        Some(out)
    }

    /// String lists accept a JSON array or its text serialisation.
    pub fn opt_string_list(&mut self, field: &str) -> Option<Vec<String>> {
        let value = self.take(field)?;
        let array = match &value {
            Value::Array(items) => items.clone(),
            Value::String(text) => match serde_json::from_str::<Value>(text) {
                Ok(Value::Array(items)) => items,
                _ => {
                    self.fail(field, "expected JSON array (or its text form)", &value);
                    return None;
                }
            },
            other => {
                self.fail(field, "expected JSON array (or its text form)", other);
                return None;
            }
        };

        let mut out = Vec::with_capacity(array.len());
        for item in &array {
            match scalar_to_string(item) {
                Some(text) => out.push(text),
                None => {
                    self.fail(field, "array items must be scalars", item);
                    return None;
                }
            }
        }
        Some(out)
    }

    /// Free-form structures accept native JSON or its text serialisation.
    pub fn opt_value(&mut self, field: &str) -> Option<Value> {
        let value = self.take(field)?;
        match &value {
            Value::Object(_) | Value::Array(_) => Some(value),
            Value::String(text) => match serde_json::from_str::<Value>(text) {
                Ok(parsed @ (Value::Object(_) | Value::Array(_))) => Some(parsed),
                _ => {
                    self.fail(field, "expected JSON structure (or its text form)", &value);
                    None
                }
            },
            other => {
                self.fail(field, "expected JSON structure (or its text form)", other);
                None
            }
        }
    }

    /// Record a custom error against a field.
    pub fn reject(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    /// Aggregate every recorded failure into one validation error.
    pub fn finish(self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(Error::validation(self.errors))
        }
    }
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
