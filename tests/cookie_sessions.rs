//! Cookie profile cache behaviour against real files

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::sync::Arc;

use probegate::mcp::ResourceProvider;
use probegate::resources::{CookieProfileCache, CookieSessionResource};

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("cookie_sessions.yaml");
    std::fs::write(&path, body).expect("should write config");
    path
}

#[cfg(unix)]
fn write_cookie_file(dir: &Path, name: &str, body: &str, mode: u32) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, body).expect("should write cookie file");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
        .expect("should chmod cookie file");
    path
}

fn cache_for(config_dir: &Path, data_dir: &Path, config_body: &str) -> CookieProfileCache {
    let config_path = write_config(config_dir, config_body);
    CookieProfileCache::new(config_path, data_dir.to_path_buf())
}

#[cfg(unix)]
#[tokio::test]
async fn test_secure_profile_loads() {
    let config_dir = tempfile::tempdir().expect("tempdir");
    let data_dir = tempfile::tempdir().expect("tempdir");
    write_cookie_file(
        data_dir.path(),
        "admin.json",
        r#"{"sid": "aaa", "csrf": "bbb"}"#,
        0o600,
    );
    let cache = cache_for(
        config_dir.path(),
        data_dir.path(),
        "version: 1\nsessions:\n  admin:\n    cookie_file: admin.json\n    cache_ttl: 60\n",
    );

    let loaded = cache.fetch("admin").await.expect("should load profile");
    assert_eq!(loaded.cookies["sid"], "aaa");
    assert_eq!(loaded.cookies["csrf"], "bbb");
}

#[cfg(unix)]
#[tokio::test]
async fn test_read_only_mode_is_accepted() {
    let config_dir = tempfile::tempdir().expect("tempdir");
    let data_dir = tempfile::tempdir().expect("tempdir");
    write_cookie_file(data_dir.path(), "viewer.json", r#"{"sid": "v"}"#, 0o400);
    let cache = cache_for(
        config_dir.path(),
        data_dir.path(),
        "sessions:\n  viewer:\n    cookie_file: viewer.json\n",
    );

    let loaded = cache.fetch("viewer").await.expect("0400 should be fine");
    assert_eq!(loaded.cookies["sid"], "v");
}

#[cfg(unix)]
#[tokio::test]
async fn test_world_readable_file_is_rejected() {
    let config_dir = tempfile::tempdir().expect("tempdir");
    let data_dir = tempfile::tempdir().expect("tempdir");
    write_cookie_file(data_dir.path(), "loose.json", r#"{"sid": "x"}"#, 0o644);
    let cache = cache_for(
        config_dir.path(),
        data_dir.path(),
        "sessions:\n  loose:\n    cookie_file: loose.json\n",
    );

    let err = cache.fetch("loose").await.expect_err("0644 must fail");
    assert_eq!(err.kind(), "insecure_permissions");
}

#[cfg(unix)]
#[tokio::test]
async fn test_path_escape_is_rejected() {
    let config_dir = tempfile::tempdir().expect("tempdir");
    let data_dir = tempfile::tempdir().expect("tempdir");
    let outside = tempfile::tempdir().expect("tempdir");
    write_cookie_file(outside.path(), "outside.json", r#"{"sid": "x"}"#, 0o600);

    let escape = format!(
        "sessions:\n  sneaky:\n    cookie_file: {}\n",
        outside.path().join("outside.json").display()
    );
    let cache = cache_for(config_dir.path(), data_dir.path(), &escape);

    let err = cache.fetch("sneaky").await.expect_err("escape must fail");
    assert_eq!(err.kind(), "path_escape");
}

#[cfg(unix)]
#[tokio::test]
async fn test_relative_traversal_is_rejected() {
    let config_dir = tempfile::tempdir().expect("tempdir");
    let parent = tempfile::tempdir().expect("tempdir");
    let data_dir = parent.path().join("cookies");
    std::fs::create_dir_all(&data_dir).expect("should create data dir");
    write_cookie_file(parent.path(), "secret.json", r#"{"sid": "x"}"#, 0o600);

    let cache = cache_for(
        config_dir.path(),
        &data_dir,
        "sessions:\n  sneaky:\n    cookie_file: ../secret.json\n",
    );

    let err = cache.fetch("sneaky").await.expect_err("traversal must fail");
    assert_eq!(err.kind(), "path_escape");
}

#[cfg(unix)]
#[tokio::test]
async fn test_malformed_cookie_file_is_parse_error() {
    let config_dir = tempfile::tempdir().expect("tempdir");
    let data_dir = tempfile::tempdir().expect("tempdir");
    write_cookie_file(data_dir.path(), "broken.json", "not json at all", 0o600);
    let cache = cache_for(
        config_dir.path(),
        data_dir.path(),
        "sessions:\n  broken:\n    cookie_file: broken.json\n",
    );

    let err = cache.fetch("broken").await.expect_err("should fail");
    assert_eq!(err.kind(), "parse_error");
}

#[cfg(unix)]
#[tokio::test]
async fn test_non_object_cookie_file_is_parse_error() {
    let config_dir = tempfile::tempdir().expect("tempdir");
    let data_dir = tempfile::tempdir().expect("tempdir");
    write_cookie_file(data_dir.path(), "list.json", r#"["a", "b"]"#, 0o600);
    let cache = cache_for(
        config_dir.path(),
        data_dir.path(),
        "sessions:\n  list:\n    cookie_file: list.json\n",
    );

    let err = cache.fetch("list").await.expect_err("should fail");
    assert_eq!(err.kind(), "parse_error");
}

#[tokio::test]
async fn test_unknown_profile_is_not_found() {
    let config_dir = tempfile::tempdir().expect("tempdir");
    let data_dir = tempfile::tempdir().expect("tempdir");
    let cache = cache_for(config_dir.path(), data_dir.path(), "sessions: {}\n");

    let err = cache.fetch("ghost").await.expect_err("should fail");
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn test_invalid_profile_name_is_validation_failed() {
    let config_dir = tempfile::tempdir().expect("tempdir");
    let data_dir = tempfile::tempdir().expect("tempdir");
    let cache = cache_for(config_dir.path(), data_dir.path(), "sessions: {}\n");

    let err = cache.fetch("../etc").await.expect_err("should fail");
    assert_eq!(err.kind(), "validation_failed");
}

#[cfg(unix)]
#[tokio::test]
async fn test_cache_serves_stale_value_within_ttl() {
    let config_dir = tempfile::tempdir().expect("tempdir");
    let data_dir = tempfile::tempdir().expect("tempdir");
    let path = write_cookie_file(data_dir.path(), "admin.json", r#"{"sid": "old"}"#, 0o600);
    let cache = cache_for(
        config_dir.path(),
        data_dir.path(),
        "sessions:\n  admin:\n    cookie_file: admin.json\n    cache_ttl: 3600\n",
    );

    let first = cache.fetch("admin").await.expect("first load");
    assert_eq!(first.cookies["sid"], "old");

    std::fs::write(&path, r#"{"sid": "new"}"#).expect("rewrite");
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).expect("chmod");
    }

    let second = cache.fetch("admin").await.expect("cached load");
    assert_eq!(second.cookies["sid"], "old", "TTL should mask the rewrite");

    cache.invalidate_all();
    let third = cache.fetch("admin").await.expect("fresh load");
    assert_eq!(third.cookies["sid"], "new");
}

#[cfg(unix)]
#[tokio::test]
async fn test_zero_ttl_reloads_every_fetch() {
    let config_dir = tempfile::tempdir().expect("tempdir");
    let data_dir = tempfile::tempdir().expect("tempdir");
    let path = write_cookie_file(data_dir.path(), "hot.json", r#"{"sid": "one"}"#, 0o600);
    let cache = cache_for(
        config_dir.path(),
        data_dir.path(),
        "sessions:\n  hot:\n    cookie_file: hot.json\n    cache_ttl: 0\n",
    );

    assert_eq!(cache.fetch("hot").await.expect("load").cookies["sid"], "one");
    std::fs::write(&path, r#"{"sid": "two"}"#).expect("rewrite");
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).expect("chmod");
    }
    assert_eq!(cache.fetch("hot").await.expect("load").cookies["sid"], "two");
}

#[cfg(unix)]
#[tokio::test]
async fn test_resource_surface_shape() {
    let config_dir = tempfile::tempdir().expect("tempdir");
    let data_dir = tempfile::tempdir().expect("tempdir");
    write_cookie_file(data_dir.path(), "admin.json", r#"{"sid": "aaa"}"#, 0o600);
    let cache = Arc::new(cache_for(
        config_dir.path(),
        data_dir.path(),
        "sessions:\n  admin:\n    description: admin session\n    cookie_file: admin.json\n",
    ));
    let resource = CookieSessionResource::new(cache);

    let listed = resource.list().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].uri, "cookie-session://admin");

    let value = resource
        .read("cookie-session://admin")
        .await
        .expect("should read");
    assert_eq!(value["cookies"]["sid"], "aaa");
    assert_eq!(value["session_name"], "admin");
    assert!(value["last_updated"].is_string());
}

#[cfg(unix)]
#[tokio::test]
async fn test_concurrent_fetches_coalesce() {
    let config_dir = tempfile::tempdir().expect("tempdir");
    let data_dir = tempfile::tempdir().expect("tempdir");
    write_cookie_file(data_dir.path(), "admin.json", r#"{"sid": "aaa"}"#, 0o600);
    let cache = Arc::new(cache_for(
        config_dir.path(),
        data_dir.path(),
        "sessions:\n  admin:\n    cookie_file: admin.json\n    cache_ttl: 60\n",
    ));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move { cache.fetch("admin").await }));
    }
    let mut loaded_ats = Vec::new();
    for handle in handles {
        let loaded = handle.await.expect("task").expect("fetch");
        loaded_ats.push(loaded.loaded_at);
    }
    // A single coalesced disk read stamps one load time for everyone.
    assert!(loaded_ats.windows(2).all(|w| w[0] == w[1]));
}
