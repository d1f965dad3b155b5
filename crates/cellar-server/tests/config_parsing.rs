use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use cellar_auth::ZohoRegion;
use cellar_server::config::loader::load_config_with_env;

fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("cellar.toml");

    let toml_content = r#"
[server]
host = "127.0.0.1"
port = 4000
allowed_origin = "https://shop.example.com"

[zoho]
client_id = "1000.FILECLIENT"
client_secret = "file-secret"
redirect_uri = "https://api.example.com/auth/zoho/callback"
organization_id = "60000000001"
region = "eu"
request_timeout = "10s"

[token]
refresh_buffer = "2m"
minimum_refresh_delay = "5s"

[redis]
enabled = false
reconnect_backoff_ms = 5000

[cache]
products_ttl_secs = 120

[logging]
level = "debug"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config_with_env(path.to_str(), HashMap::new()).expect("should parse config");
    assert_eq!(cfg.server.port, 4000);
    assert_eq!(
        cfg.server.allowed_origin.as_deref(),
        Some("https://shop.example.com")
    );
    assert_eq!(cfg.zoho.client_id, "1000.FILECLIENT");
    assert_eq!(cfg.zoho.region, ZohoRegion::Eu);
    assert_eq!(cfg.zoho.request_timeout, Duration::from_secs(10));
    assert_eq!(cfg.token.refresh_buffer, Duration::from_secs(120));
    assert_eq!(cfg.token.minimum_refresh_delay, Duration::from_secs(5));
    assert_eq!(cfg.redis.reconnect_backoff_ms, 5000);
    assert_eq!(cfg.cache.products_ttl_secs, 120);
    // Unset keys keep their defaults.
    assert_eq!(cfg.cache.organization_ttl_secs, 3600);
    assert_eq!(cfg.logging.level, "debug");

    // 2) Prefixed env overrides win over file
    let cfg_env = load_config_with_env(
        path.to_str(),
        env(&[
            ("CELLAR__SERVER__PORT", "4100"),
            ("CELLAR__CACHE__ORGANIZATION_TTL_SECS", "60"),
        ]),
    )
    .expect("should parse config with env overrides");
    assert_eq!(cfg_env.server.port, 4100);
    assert_eq!(cfg_env.cache.organization_ttl_secs, 60);

    // 3) Flat deployment variables win over both
    let cfg_flat = load_config_with_env(
        path.to_str(),
        env(&[
            ("CELLAR__SERVER__PORT", "4100"),
            ("PORT", "8080"),
            ("ZOHO_CLIENT_ID", "1000.ENVCLIENT"),
            ("ZOHO_CLIENT_SECRET", "1e5"),
            ("ZOHO_ORGANIZATION_ID", "70000000002"),
            ("ZOHO_DOMAIN", "com.au"),
            ("ALLOWED_ORIGIN", "https://www.example.com"),
            ("REDIS_URL", "redis://cache.internal:6379"),
        ]),
    )
    .expect("should parse config with flat overrides");
    assert_eq!(cfg_flat.server.port, 8080);
    assert_eq!(cfg_flat.zoho.client_id, "1000.ENVCLIENT");
    assert_eq!(cfg_flat.zoho.client_secret, "1e5");
    assert_eq!(cfg_flat.zoho.organization_id, "70000000002");
    assert_eq!(cfg_flat.zoho.region, ZohoRegion::Australia);
    assert_eq!(
        cfg_flat.server.allowed_origin.as_deref(),
        Some("https://www.example.com")
    );
    assert!(cfg_flat.redis.enabled);
    assert_eq!(cfg_flat.redis.url, "redis://cache.internal:6379");
    // Untouched file values survive.
    assert_eq!(
        cfg_flat.zoho.redirect_uri,
        "https://api.example.com/auth/zoho/callback"
    );

    // 4) Invalid config should error
    let invalid_path = dir.path().join("invalid.toml");
    fs::write(&invalid_path, "[cache]\nproduct_ttl_secs = 0\n").expect("write invalid toml");
    let err = load_config_with_env(invalid_path.to_str(), HashMap::new())
        .expect_err("expected validation error");
    assert!(err.contains("TTLs must be > 0"));

    let err = load_config_with_env(path.to_str(), env(&[("CELLAR__LOGGING__LEVEL", "loud")]))
        .expect_err("expected log level error");
    assert!(err.contains("logging.level"));
}

#[test]
fn missing_file_uses_defaults() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("absent.toml");

    let cfg = load_config_with_env(path.to_str(), HashMap::new()).expect("defaults are valid");
    assert_eq!(cfg.server.port, 3001);
    assert_eq!(cfg.zoho.region, ZohoRegion::Us);
    assert_eq!(
        cfg.zoho.redirect_uri,
        "http://localhost:3001/auth/zoho/callback"
    );
    assert!(!cfg.redis.enabled);
    assert!(cfg.token_store.path.is_none());
}

#[test]
fn unknown_region_is_rejected() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("absent.toml");

    let err = load_config_with_env(path.to_str(), env(&[("ZOHO_DOMAIN", "moon")]))
        .expect_err("unknown region");
    assert!(err.contains("deserialize"));
}
