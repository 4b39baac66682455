//! Cookie profile cache and resource
//!
//! Named cookie profiles live on disk as strict-permission JSON files,
//! declared in a YAML configuration. Fetches go through a TTL cache with
//! per-profile expiry; concurrent fetches for one profile coalesce to a
//! single disk read.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use moka::Expiry;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::mcp::{ResourceDescriptor, ResourceProvider};
use crate::{Error, Result};

const SCHEME: &str = "cookie-session";
const DEFAULT_CACHE_TTL_SECS: u64 = 60;

/// One profile as declared in the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileConfig {
    #[serde(default)]
    pub description: Option<String>,
    /// Path to the cookie file, resolved against the data directory.
    pub cookie_file: PathBuf,
    /// Cache lifetime in seconds.
    #[serde(default = "default_ttl")]
    pub cache_ttl: u64,
    #[serde(default)]
    pub metadata: Option<Value>,
}

fn default_ttl() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

#[derive(Debug, Deserialize)]
struct CookieSessionsFile {
    #[serde(default)]
    #[allow(dead_code)]
    version: Option<u32>,
    #[serde(default)]
    sessions: BTreeMap<String, ProfileConfig>,
}

/// Cookies loaded from one profile file, with cache metadata.
#[derive(Debug, Clone)]
pub struct CachedCookies {
    pub cookies: BTreeMap<String, String>,
    pub loaded_at: DateTime<Utc>,
    pub description: Option<String>,
    pub metadata: Option<Value>,
    ttl: Duration,
}

struct PerProfileExpiry;

impl Expiry<String, CachedCookies> for PerProfileExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedCookies,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// TTL-cached loader for per-profile cookie files.
pub struct CookieProfileCache {
    config_path: PathBuf,
    data_dir: PathBuf,
    cache: Cache<String, CachedCookies>,
}

impl CookieProfileCache {
    /// Build a cache over the given configuration file and data directory.
    pub fn new(config_path: PathBuf, data_dir: PathBuf) -> Self {
        // The data dir anchors the path-escape check, so it must exist to
        // canonicalise. Creation failures surface on first fetch instead.
        let _ = std::fs::create_dir_all(&data_dir);
        Self {
            config_path,
            data_dir,
            cache: Cache::builder().expire_after(PerProfileExpiry).build(),
        }
    }

    /// Declared profiles, re-read from the configuration file on demand.
    pub async fn profiles(&self) -> Result<BTreeMap<String, ProfileConfig>> {
        if !self.config_path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = tokio::fs::read_to_string(&self.config_path).await?;
        let parsed: CookieSessionsFile = serde_yaml::from_str(&raw)?;

        let mut sessions = BTreeMap::new();
        for (name, profile) in parsed.sessions {
            if !valid_profile_name(&name) {
                warn!(profile = %name, "skipping cookie profile with invalid name");
                continue;
            }
            sessions.insert(name, profile);
        }
        Ok(sessions)
    }

    /// Fetch one profile's cookies, from cache when fresh.
    pub async fn fetch(&self, name: &str) -> Result<CachedCookies> {
        if !valid_profile_name(name) {
            return Err(Error::validation_msg(
                "profile",
                "profile name must match ^[A-Za-z0-9_-]+$",
            ));
        }
        let profiles = self.profiles().await?;
        let Some(profile) = profiles.get(name).cloned() else {
            return Err(Error::NotFound(format!("cookie profile {name}")));
        };

        // try_get_with coalesces concurrent loads for the same profile into
        // a single disk read.
        let data_dir = self.data_dir.clone();
        self.cache
            .try_get_with(name.to_string(), async move {
                load_profile(&data_dir, &profile).await
            })
            .await
            .map_err(|e: Arc<Error>| clone_for_caller(&e))
    }

    /// Drop every cached entry, forcing fresh reads.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

/// Read and validate one cookie file from disk.
async fn load_profile(data_dir: &Path, profile: &ProfileConfig) -> Result<CachedCookies> {
    let path = resolve_cookie_path(data_dir, &profile.cookie_file)?;
    check_permissions(&path)?;

    let raw = tokio::fs::read_to_string(&path).await?;
    let parsed: Value = serde_json::from_str(&raw)
        .map_err(|e| Error::Parse(format!("cookie file {}: {e}", path.display())))?;
    let Value::Object(entries) = parsed else {
        return Err(Error::Parse(format!(
            "cookie file {} must contain a JSON object",
            path.display()
        )));
    };

    let mut cookies = BTreeMap::new();
    for (key, value) in entries {
        let value = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => {
                return Err(Error::Parse(format!(
                    "cookie {key:?} has non-scalar value: {other}"
                )))
            }
        };
        cookies.insert(key, value);
    }

    Ok(CachedCookies {
        cookies,
        loaded_at: Utc::now(),
        description: profile.description.clone(),
        metadata: profile.metadata.clone(),
        ttl: Duration::from_secs(profile.cache_ttl),
    })
}

/// Resolve a cookie file against the data directory and reject escapes.
fn resolve_cookie_path(data_dir: &Path, cookie_file: &Path) -> Result<PathBuf> {
    let candidate = if cookie_file.is_absolute() {
        cookie_file.to_path_buf()
    } else {
        data_dir.join(cookie_file)
    };

    let resolved = candidate.canonicalize().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(format!("cookie file {}", candidate.display()))
        } else {
            Error::Io(e)
        }
    })?;
    let allowed = data_dir
        .canonicalize()
        .map_err(|e| Error::internal(format!("cookie data dir unavailable: {e}")))?;

    if !resolved.starts_with(&allowed) {
        return Err(Error::PathEscape(format!(
            "cookie file {} is outside {}",
            resolved.display(),
            allowed.display()
        )));
    }
    Ok(resolved)
}

/// Mode bits must be exactly 0600 or 0400 and the owner must be us.
#[cfg(unix)]
fn check_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::MetadataExt;

    let metadata = std::fs::metadata(path)?;
    let mode = metadata.mode() & 0o777;
    if mode != 0o600 && mode != 0o400 {
        return Err(Error::InsecurePermissions(format!(
            "cookie file {} has mode {mode:o}, require 0600 or 0400",
            path.display()
        )));
    }
    let owner = metadata.uid();
    let me = unsafe { libc::geteuid() };
    if owner != me {
        return Err(Error::InsecurePermissions(format!(
            "cookie file {} is owned by uid {owner}, process runs as {me}",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

fn valid_profile_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Rebuild a cache-shared error for the caller; the kind survives.
fn clone_for_caller(err: &Error) -> Error {
    match err {
        Error::InsecurePermissions(m) => Error::InsecurePermissions(m.clone()),
        Error::PathEscape(m) => Error::PathEscape(m.clone()),
        Error::Parse(m) => Error::Parse(m.clone()),
        Error::NotFound(m) => Error::NotFound(m.clone()),
        other => Error::internal(other.to_string()),
    }
}

/// MCP resource provider over the cookie profile cache.
pub struct CookieSessionResource {
    cache: Arc<CookieProfileCache>,
}

impl CookieSessionResource {
    pub fn new(cache: Arc<CookieProfileCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl ResourceProvider for CookieSessionResource {
    fn scheme(&self) -> &str {
        SCHEME
    }

    async fn list(&self) -> Vec<ResourceDescriptor> {
        let profiles = match self.cache.profiles().await {
            Ok(profiles) => profiles,
            Err(e) => {
                warn!(error = %e, "failed to list cookie profiles");
                return Vec::new();
            }
        };
        profiles
            .into_iter()
            .map(|(name, profile)| ResourceDescriptor {
                uri: format!("{SCHEME}://{name}"),
                name: format!("Cookie Session: {name}"),
                description: profile
                    .description
                    .unwrap_or_else(|| format!("Cookie session: {name}")),
                mime_type: "application/json".to_string(),
            })
            .collect()
    }

    async fn read(&self, uri: &str) -> Result<Value> {
        let name = uri
            .strip_prefix(&format!("{SCHEME}://"))
            .ok_or_else(|| Error::validation_msg("uri", format!("not a {SCHEME} URI: {uri}")))?;
        let loaded = self.cache.fetch(name).await?;
        Ok(json!({
            "cookies": loaded.cookies,
            "session_name": name,
            "description": loaded.description,
            "last_updated": loaded.loaded_at.to_rfc3339(),
            "metadata": loaded.metadata,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_name_validation() {
        assert!(valid_profile_name("admin_session-2"));
        assert!(!valid_profile_name(""));
        assert!(!valid_profile_name("../etc"));
        assert!(!valid_profile_name("with space"));
    }
}
