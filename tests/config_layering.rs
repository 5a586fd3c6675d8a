//! Precedence between the explicit config file and `KEYLOCK__*` variables.
//!
//! These tests mutate the process environment, so they live in their own
//! binary and run `#[serial]`.

use std::env;
use std::io::Write;

use keylock::config::{LogFormat, load};
use serial_test::serial;
use tempfile::NamedTempFile;
use tracing::level_filters::LevelFilter;

/// Sets environment variables for the lifetime of the guard.
struct ScopedEnv {
    keys: Vec<&'static str>,
}

impl ScopedEnv {
    fn set(vars: &[(&'static str, &'static str)]) -> Self {
        for (key, value) in vars {
            // SAFETY: every test in this binary is `#[serial]`, so no other
            // thread reads or writes the environment concurrently.
            unsafe { env::set_var(key, value) };
        }
        Self {
            keys: vars.iter().map(|(key, _)| *key).collect(),
        }
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        for key in &self.keys {
            // SAFETY: see `ScopedEnv::set`.
            unsafe { env::remove_var(key) };
        }
    }
}

fn config_file() -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config file");
    writeln!(
        file,
        r#"
[logging]
level = "warn"
json = true

[cache]
enabled = true
region_capacity = 64

[cache.region_limits]
navigation = 8
footer = 5
"#
    )
    .expect("write config");
    file
}

#[test]
#[serial]
fn environment_overrides_explicit_file() {
    let file = config_file();
    let _env = ScopedEnv::set(&[
        ("KEYLOCK__CACHE__REGION_CAPACITY", "7"),
        ("KEYLOCK__CACHE__ENABLED", "false"),
        ("KEYLOCK__CACHE__REGION_LIMITS__NAVIGATION", "3"),
        ("KEYLOCK__LOGGING__LEVEL", "debug"),
    ]);

    let settings = load(Some(file.path())).expect("settings load");

    assert_eq!(settings.cache.region_capacity, 7);
    assert!(!settings.cache.enabled);
    assert_eq!(settings.cache.capacity_for("navigation").get(), 3);
    // Untouched by the environment, so the file value stands.
    assert_eq!(settings.cache.capacity_for("footer").get(), 5);
    assert_eq!(settings.cache.capacity_for("pages").get(), 7);

    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
#[serial]
fn explicit_file_applies_without_environment() {
    let file = config_file();

    let settings = load(Some(file.path())).expect("settings load");

    assert_eq!(settings.cache.region_capacity, 64);
    assert!(settings.cache.enabled);
    assert_eq!(settings.cache.capacity_for("navigation").get(), 8);
    assert_eq!(settings.logging.level, LevelFilter::WARN);
}

#[test]
#[serial]
fn invalid_environment_value_is_rejected() {
    let file = config_file();
    let _env = ScopedEnv::set(&[("KEYLOCK__CACHE__REGION_CAPACITY", "0")]);

    let err = load(Some(file.path())).expect_err("zero capacity from env");

    assert_eq!(
        err.to_string(),
        "invalid configuration for `cache.region_capacity`: must be greater than zero"
    );
}
