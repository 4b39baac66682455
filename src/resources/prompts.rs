//! Prompt guide resources
//!
//! Static guidance documents addressed as `prompt://<name>` with an optional
//! `?format=json|yaml|markdown` query. User files in the prompts directory
//! override built-ins of the same name.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use crate::mcp::{ResourceDescriptor, ResourceProvider};
use crate::{Error, Result};

const SCHEME: &str = "prompt";

const BUILTIN_GUIDES: &[(&str, &str)] = &[
    ("http-testing", include_str!("guides/http_testing.md")),
    ("mission-workflow", include_str!("guides/mission_workflow.md")),
];

const GUIDE_EXTENSIONS: &[&str] = &["md", "markdown", "yaml", "yml", "txt"];

/// Serves guidance documents from the user directory with built-in fallbacks.
pub struct PromptGuideProvider {
    user_dir: PathBuf,
}

impl PromptGuideProvider {
    pub fn new(user_dir: PathBuf) -> Self {
        Self { user_dir }
    }

    /// All available guides, name → content. User files win over built-ins.
    async fn load_all(&self) -> BTreeMap<String, String> {
        let mut guides: BTreeMap<String, String> = BUILTIN_GUIDES
            .iter()
            .map(|(name, content)| ((*name).to_string(), (*content).to_string()))
            .collect();

        let Ok(mut entries) = tokio::fs::read_dir(&self.user_dir).await else {
            return guides;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if !GUIDE_EXTENSIONS.contains(&extension.to_lowercase().as_str()) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    guides.insert(stem.to_string(), content);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "failed to read prompt guide"),
            }
        }
        guides
    }

    async fn load_one(&self, name: &str) -> Result<String> {
        self.load_all()
            .await
            .remove(name)
            .ok_or_else(|| Error::NotFound(format!("prompt guide {name}")))
    }
}

#[async_trait]
impl ResourceProvider for PromptGuideProvider {
    fn scheme(&self) -> &str {
        SCHEME
    }

    async fn list(&self) -> Vec<ResourceDescriptor> {
        self.load_all()
            .await
            .keys()
            .map(|name| ResourceDescriptor {
                uri: format!("{SCHEME}://{name}"),
                name: format!("Guide: {name}"),
                description: format!("Guidance document '{name}'"),
                mime_type: "text/markdown".to_string(),
            })
            .collect()
    }

    async fn read(&self, uri: &str) -> Result<Value> {
        let rest = uri
            .strip_prefix(&format!("{SCHEME}://"))
            .ok_or_else(|| Error::validation_msg("uri", format!("not a {SCHEME} URI: {uri}")))?;

        let (name, format) = match rest.split_once('?') {
            Some((name, query)) => (name, parse_format(query)?),
            None => (rest, GuideFormat::Markdown),
        };
        let content = self.load_one(name).await?;

        Ok(match format {
            GuideFormat::Markdown => json!({
                "name": name,
                "format": "markdown",
                "content": content,
            }),
            GuideFormat::Yaml => json!({
                "name": name,
                "format": "yaml",
                "content": content,
            }),
            GuideFormat::Json => {
                // Guides authored as YAML render as structured JSON; plain
                // prose falls back to a content wrapper.
                match serde_yaml::from_str::<Value>(&content) {
                    Ok(structured @ (Value::Object(_) | Value::Array(_))) => json!({
                        "name": name,
                        "format": "json",
                        "document": structured,
                    }),
                    _ => json!({
                        "name": name,
                        "format": "json",
                        "content": content,
                    }),
                }
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GuideFormat {
    Json,
    Yaml,
    Markdown,
}

fn parse_format(query: &str) -> Result<GuideFormat> {
    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        if key != "format" {
            continue;
        }
        return match value.to_lowercase().as_str() {
            "json" => Ok(GuideFormat::Json),
            "yaml" => Ok(GuideFormat::Yaml),
            "markdown" | "md" => Ok(GuideFormat::Markdown),
            other => Err(Error::validation_msg(
                "format",
                format!("unsupported format {other:?}, expected json, yaml or markdown"),
            )),
        };
    }
    Ok(GuideFormat::Markdown)
}
