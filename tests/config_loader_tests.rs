//! Layered configuration loading: `.env` file precedence, process
//! environment overrides, and validation failures.

use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};

use automations::config::ConfigLoader;
use tempfile::TempDir;

const TEST_CRYPTO_KEY: &str = "YWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWE=";

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
    unsafe {
        env::remove_var("AUTOMATIONS_PROFILE");
        env::remove_var("AUTOMATIONS_API_BIND_ADDR");
        env::remove_var("AUTOMATIONS_LOG_LEVEL");
        env::remove_var("AUTOMATIONS_CRYPTO_KEY");
        env::remove_var("AUTOMATIONS_OPERATOR_TOKEN");
        env::remove_var("AUTOMATIONS_FOLLOW_GATE_WINDOW_HOURS");
    }
}

fn set_required_env() {
    unsafe {
        env::set_var("AUTOMATIONS_CRYPTO_KEY", TEST_CRYPTO_KEY);
        env::set_var("AUTOMATIONS_OPERATOR_TOKEN", "config-test-token");
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

#[test]
fn loads_defaults_when_no_env_files_present() {
    let _guard = env_guard();
    clear_env();
    set_required_env();

    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.follow_gate.window_hours, 24);
    assert_eq!(cfg.dispatch.daily_send_cap, 200);
    cfg.bind_addr().expect("default bind addr parses");

    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "AUTOMATIONS_API_BIND_ADDR=127.0.0.1:3000\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test",
        "AUTOMATIONS_API_BIND_ADDR=192.168.0.10:5000\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "AUTOMATIONS_API_BIND_ADDR=10.0.0.5:6000\n",
    );

    // Select the profile via .env.local before profile-specific files load
    write_env_file(
        &temp_dir,
        ".env.local",
        &format!(
            "AUTOMATIONS_PROFILE=test\nAUTOMATIONS_API_BIND_ADDR=127.0.0.1:4000\nAUTOMATIONS_OPERATOR_TOKEN=layered-test-token\nAUTOMATIONS_CRYPTO_KEY={}\n",
            TEST_CRYPTO_KEY
        ),
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");

    clear_env();
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "AUTOMATIONS_API_BIND_ADDR=127.0.0.1:3000\nAUTOMATIONS_OPERATOR_TOKEN=file-token\n",
    );

    set_required_env();
    unsafe {
        env::set_var("AUTOMATIONS_API_BIND_ADDR", "0.0.0.0:9090");
        env::set_var("AUTOMATIONS_FOLLOW_GATE_WINDOW_HOURS", "48");
    }

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with env override");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:9090");
    assert_eq!(cfg.follow_gate.window_hours, 48);

    clear_env();
}

#[test]
fn invalid_bind_addr_returns_error() {
    let _guard = env_guard();
    clear_env();
    set_required_env();

    let temp_dir = TempDir::new().unwrap();
    unsafe {
        env::set_var("AUTOMATIONS_API_BIND_ADDR", "not-an-addr");
    }

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("invalid bind addr should fail");
    assert!(format!("{}", err).contains("invalid api bind address"));

    clear_env();
}

#[test]
fn malformed_crypto_key_returns_error() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    unsafe {
        env::set_var("AUTOMATIONS_OPERATOR_TOKEN", "config-test-token");
        env::set_var("AUTOMATIONS_CRYPTO_KEY", "not base64!!");
    }

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("malformed key should fail");
    assert!(format!("{}", err).contains("base64"));

    clear_env();
}
