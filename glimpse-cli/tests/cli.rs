//! Integration tests for the `glimpse` binary.
//!
//! Each test points `HOME` and `XDG_CACHE_HOME` at a temporary directory so
//! the configuration file, logs and disk cache never touch the real home.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn glimpse(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_glimpse"))
        .args(args)
        .env("HOME", home)
        .env("XDG_CACHE_HOME", home.join(".cache"))
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run glimpse")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_config_path_is_under_home() {
    let home = TempDir::new().unwrap();

    let output = glimpse(home.path(), &["config", "path"]);

    assert!(output.status.success());
    let expected = home.path().join(".glimpse").join("config.ini");
    assert!(stdout(&output).contains(&expected.display().to_string()));
}

#[test]
fn test_config_init_then_show() {
    let home = TempDir::new().unwrap();

    let output = glimpse(home.path(), &["config", "init"]);
    assert!(output.status.success());
    assert!(home.path().join(".glimpse/config.ini").exists());

    let output = glimpse(home.path(), &["config", "show"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("[cache]"));
    assert!(text.contains("[executor]"));
}

#[test]
fn test_invalid_config_exits_with_config_code() {
    let home = TempDir::new().unwrap();
    let dir = home.path().join(".glimpse");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("config.ini"), "[executor]\nqueue_capacity = 0\n").unwrap();

    let output = glimpse(home.path(), &["config", "show"]);

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_cache_stats_on_empty_cache() {
    let home = TempDir::new().unwrap();

    let output = glimpse(home.path(), &["cache", "stats"]);

    assert!(output.status.success());
    assert!(stdout(&output).contains("Files:   0"));
}

#[test]
fn test_missing_local_file_exits_with_load_code() {
    let home = TempDir::new().unwrap();
    let missing = home.path().join("missing.png");

    let output = glimpse(home.path(), &["load", &missing.display().to_string()]);

    assert_eq!(output.status.code(), Some(3));
    assert!(stdout(&output).contains("failed"));
}
