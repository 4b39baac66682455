//! Runtime configuration and XDG path helpers
//!
//! Everything is sourced from the environment. `DATABASE_URL` is the single
//! switch for persistence: when it is absent the store is disabled, dependent
//! tools report `store_unavailable`, and the HTTP executor runs unlogged.

use std::path::PathBuf;

const APP_DIR: &str = "probegate";

/// Default stored-body cap, request and response alike.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Replacement value for redacted header values.
pub const REDACTED: &str = "[REDACTED]";

/// Gateway settings resolved from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// PostgreSQL connection URL. Absence disables the store entirely.
    pub database_url: Option<String>,
    /// Upstream intercepting proxy applied to every outbound request.
    pub proxy_url: Option<String>,
    /// Default per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
    pub verify_tls: bool,
    pub max_request_body_bytes: usize,
    pub max_response_body_bytes: usize,
    /// Lowercased header names whose values are redacted in stored records.
    pub sensitive_headers: Vec<String>,
    pub pool_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: None,
            proxy_url: None,
            request_timeout_ms: 30_000,
            verify_tls: true,
            max_request_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_response_body_bytes: DEFAULT_MAX_BODY_BYTES,
            sensitive_headers: vec!["authorization".into(), "proxy-authorization".into()],
            pool_size: 5,
        }
    }
}

impl Settings {
    /// Load settings from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            proxy_url: std::env::var("HTTP_PROXY_URL").ok().filter(|s| !s.is_empty()),
            request_timeout_ms: env_parse("HTTP_REQUEST_TIMEOUT_MS", defaults.request_timeout_ms),
            verify_tls: std::env::var("HTTP_VERIFY_TLS")
                .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(defaults.verify_tls),
            max_request_body_bytes: env_parse(
                "DB_MAX_REQUEST_BODY_SIZE",
                defaults.max_request_body_bytes,
            ),
            max_response_body_bytes: env_parse(
                "DB_MAX_RESPONSE_BODY_SIZE",
                defaults.max_response_body_bytes,
            ),
            sensitive_headers: std::env::var("DB_SENSITIVE_HEADERS")
                .map(|v| {
                    v.split(',')
                        .map(|h| h.trim().to_lowercase())
                        .filter(|h| !h.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.sensitive_headers),
            pool_size: env_parse("DB_POOL_SIZE", defaults.pool_size),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// `$XDG_CONFIG_HOME/probegate`, defaulting to `~/.config/probegate`.
pub fn config_dir() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", dirs::config_dir).join(APP_DIR)
}

/// `$XDG_DATA_HOME/probegate`, defaulting to `~/.local/share/probegate`.
pub fn data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", dirs::data_dir).join(APP_DIR)
}

/// `$XDG_CACHE_HOME/probegate`, defaulting to `~/.cache/probegate`.
pub fn cache_dir() -> PathBuf {
    xdg_dir("XDG_CACHE_HOME", dirs::cache_dir).join(APP_DIR)
}

fn xdg_dir(var: &str, fallback: fn() -> Option<PathBuf>) -> PathBuf {
    std::env::var_os(var)
        .map(PathBuf::from)
        .filter(|p| !p.as_os_str().is_empty())
        .or_else(fallback)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Cookie profile configuration file location.
pub fn cookie_sessions_config_path() -> PathBuf {
    config_dir().join("cookie_sessions.yaml")
}

/// Directory against which relative `cookie_file` entries are resolved.
pub fn cookies_data_dir() -> PathBuf {
    data_dir().join("cookies")
}

/// User prompt guide directory; `PROBEGATE_PROMPTS_DIR` overrides XDG.
pub fn prompts_dir() -> PathBuf {
    std::env::var_os("PROBEGATE_PROMPTS_DIR")
        .map(PathBuf::from)
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| config_dir().join("prompts"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.request_timeout_ms, 30_000);
        assert_eq!(settings.max_request_body_bytes, 1024 * 1024);
        assert!(settings.verify_tls);
        assert!(settings
            .sensitive_headers
            .contains(&"authorization".to_string()));
    }

    #[test]
    fn test_config_dir_honours_xdg() {
        // Env mutation is process-global; restore afterwards.
        let prev = std::env::var_os("XDG_CONFIG_HOME");
        std::env::set_var("XDG_CONFIG_HOME", "/tmp/xdg-test");
        assert_eq!(
            config_dir(),
            PathBuf::from("/tmp/xdg-test").join("probegate")
        );
        match prev {
            Some(v) => std::env::set_var("XDG_CONFIG_HOME", v),
            None => std::env::remove_var("XDG_CONFIG_HOME"),
        }
    }
}
