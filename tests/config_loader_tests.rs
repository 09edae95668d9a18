use openfinance_sync::config::{ConfigError, ConfigLoader};
use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    let keys: Vec<String> = env::vars()
        .map(|(key, _)| key)
        .filter(|key| key.starts_with("OPENFINANCE_"))
        .collect();
    unsafe {
        for key in keys {
            env::remove_var(key);
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    fs::write(dir.path().join(name), contents).unwrap();
}

fn loader_for(dir: &TempDir) -> ConfigLoader {
    ConfigLoader::with_base_dir(PathBuf::from(dir.path()))
}

#[test]
fn loads_defaults_when_no_env_present() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    let cfg = loader_for(&temp_dir).load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:3333");
    assert_eq!(cfg.aggregator.api_base, "https://api.pluggy.ai");
    assert_eq!(cfg.aggregator.page_size, 50);
    assert_eq!(cfg.aggregator.credential_ttl_seconds, 3000);
    assert_eq!(cfg.sync.default_from, "2015-01-01T00:00:00Z");
    assert!(cfg.sync.item_timeout().is_none());
    assert!(cfg.front_origins.is_empty());
    cfg.bind_addr().expect("default bind addr parses");
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "OPENFINANCE_API_BIND_ADDR=127.0.0.1:3000\nOPENFINANCE_PLUGGY_PAGE_SIZE=20\n",
    );
    write_env_file(
        &temp_dir,
        ".env.local",
        "OPENFINANCE_PROFILE=staging\nOPENFINANCE_API_BIND_ADDR=127.0.0.1:4000\n",
    );
    write_env_file(
        &temp_dir,
        ".env.staging",
        "OPENFINANCE_API_BIND_ADDR=192.168.0.10:5000\nOPENFINANCE_PLUGGY_CLIENT_ID=staging-id\nOPENFINANCE_PLUGGY_CLIENT_SECRET=staging-secret\n",
    );
    write_env_file(
        &temp_dir,
        ".env.staging.local",
        "OPENFINANCE_API_BIND_ADDR=10.0.0.5:6000\n",
    );

    let cfg = loader_for(&temp_dir)
        .load()
        .expect("config loads with layered env files");

    assert_eq!(cfg.profile, "staging");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
    assert_eq!(cfg.aggregator.page_size, 20);
    assert_eq!(cfg.aggregator.client_id.as_deref(), Some("staging-id"));
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "OPENFINANCE_API_BIND_ADDR=127.0.0.1:3000\nOPENFINANCE_FRONT_ORIGINS=http://a.test\n",
    );

    unsafe {
        env::set_var("OPENFINANCE_API_BIND_ADDR", "0.0.0.0:9090");
        env::set_var(
            "OPENFINANCE_FRONT_ORIGINS",
            "http://localhost:5173, https://app.example.com ,",
        );
        env::set_var("UNRELATED_API_BIND_ADDR", "ignored");
    }

    let cfg = loader_for(&temp_dir).load().expect("config loads with env override");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:9090");
    assert_eq!(
        cfg.front_origins,
        vec![
            "http://localhost:5173".to_string(),
            "https://app.example.com".to_string()
        ]
    );

    unsafe {
        env::remove_var("UNRELATED_API_BIND_ADDR");
    }
    clear_env();
}

#[test]
fn invalid_bind_addr_returns_error() {
    let _guard = env_guard();
    clear_env();

    unsafe {
        env::set_var("OPENFINANCE_API_BIND_ADDR", "not-an-addr");
    }
    let temp_dir = TempDir::new().unwrap();
    let err = loader_for(&temp_dir)
        .load()
        .expect_err("invalid bind addr should fail");
    assert!(format!("{}", err).contains("invalid api bind address"));

    clear_env();
}

#[test]
fn non_local_profile_requires_aggregator_credentials() {
    let _guard = env_guard();
    clear_env();

    unsafe {
        env::set_var("OPENFINANCE_PROFILE", "production");
        env::set_var("OPENFINANCE_PLUGGY_CLIENT_SECRET", "secret");
    }
    let temp_dir = TempDir::new().unwrap();
    let err = loader_for(&temp_dir)
        .load()
        .expect_err("missing client id should fail");
    assert!(matches!(err, ConfigError::MissingAggregatorClientId));

    unsafe {
        env::set_var("OPENFINANCE_PLUGGY_CLIENT_ID", "id");
    }
    let cfg = loader_for(&temp_dir).load().expect("credentials now present");
    let redacted = cfg.redacted_json().unwrap();
    assert!(!redacted.contains("\"secret\""));

    clear_env();
}

#[test]
fn malformed_numbers_and_dates_are_rejected() {
    let _guard = env_guard();
    clear_env();
    let temp_dir = TempDir::new().unwrap();

    unsafe {
        env::set_var("OPENFINANCE_PLUGGY_PAGE_SIZE", "fifty");
    }
    let err = loader_for(&temp_dir).load().expect_err("page size must be numeric");
    assert!(
        matches!(err, ConfigError::InvalidNumber { ref key, .. } if key == "OPENFINANCE_PLUGGY_PAGE_SIZE")
    );

    unsafe {
        env::set_var("OPENFINANCE_PLUGGY_PAGE_SIZE", "0");
    }
    let err = loader_for(&temp_dir).load().expect_err("page size must be positive");
    assert!(matches!(err, ConfigError::InvalidPageSize { value: 0 }));

    unsafe {
        env::remove_var("OPENFINANCE_PLUGGY_PAGE_SIZE");
        env::set_var("OPENFINANCE_SYNC_DEFAULT_FROM", "last tuesday");
    }
    let err = loader_for(&temp_dir).load().expect_err("default from must parse");
    assert!(matches!(err, ConfigError::InvalidSyncDefaultFrom { .. }));

    clear_env();
}
