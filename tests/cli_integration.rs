//! CLI integration tests
//!
//! Runs the built binary and checks exit codes for the paths that need no
//! network or container runtime.

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

fn fleetpack_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_fleetpack"))
}

fn command() -> Command {
    let mut cmd = Command::new(fleetpack_bin());
    cmd.env_remove("GIT_TOKEN")
        .env_remove("NEXUS_USER")
        .env_remove("NEXUS_PASS")
        .env_remove("RUST_LOG");
    cmd
}

const CONFIG: &str = r#"{
    "gitlab_api_host": "https://git.local/api/v4",
    "output_dir": "out",
    "service_list": ["billing"],
    "group_id": "1",
    "deps_group_id": "2",
    "branch": "master",
    "archive_format": "tar.gz",
    "maven_url": "https://repo.local/maven",
    "plugins_url": "https://repo.local/plugins",
    "max_parallelism": 1
}"#;

#[test]
fn test_version() {
    let output = command().arg("--version").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("fleetpack"));
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_help_lists_subcommands() {
    let output = command().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("run"));
    assert!(stdout.contains("validate"));
}

#[test]
fn test_validate_missing_config_exits_with_config_error() {
    let tmp = TempDir::new().unwrap();
    let status = command()
        .arg("--config")
        .arg(tmp.path().join("absent.json"))
        .arg("validate")
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(2));
}

#[test]
fn test_run_without_token_exits_with_config_error() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("config.json");
    fs::write(&config, CONFIG).unwrap();

    let status = command()
        .current_dir(tmp.path())
        .args(["-q", "run"])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(2));
    assert!(!tmp.path().join("out").exists());
}

#[test]
fn test_clear_cache_without_cache_exits_with_config_error() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("config.json");
    fs::write(&config, CONFIG).unwrap();

    let status = command()
        .current_dir(tmp.path())
        .env("GIT_TOKEN", "token")
        .args(["run", "--clear-cache"])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(2));
}

#[test]
fn test_verbose_and_quiet_conflict() {
    let status = command().args(["-v", "-q", "validate"]).status().unwrap();
    assert!(!status.success());
}
