//! CLI tests: each test gets its own config and data directory.

mod test_utils;

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use test_utils::{bundle, cli_env};

fn socketpm_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_socketpm"));
    for (key, value) in cli_env(dir) {
        cmd.env(key, value);
    }
    cmd.env_remove("RUST_LOG");
    cmd
}

fn write_bundle(dir: &Path, name: &str, files: &[(&str, &str)]) -> String {
    let path = dir.join(name);
    fs::write(&path, bundle(files)).expect("Failed to write bundle");
    path.display().to_string()
}

#[test]
fn test_help() {
    let dir = TempDir::new().unwrap();
    socketpm_cmd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("install"))
        .stdout(predicate::str::contains("process"));
}

#[test]
fn test_list_empty() {
    let dir = TempDir::new().unwrap();
    socketpm_cmd(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No sockets installed."));
}

#[test]
fn test_install_show_delete() {
    let dir = TempDir::new().unwrap();
    let path = write_bundle(
        dir.path(),
        "demo.zip",
        &[
            ("socket.yml", "description: Demo\nendpoints:\n  hello:\n    file: hello.js\n"),
            ("hello.js", "return 1"),
        ],
    );

    socketpm_cmd(dir.path())
        .args(["--tenant", "acme", "install", "demo", "--bundle", &path])
        .assert()
        .success()
        .stdout(predicate::str::contains("demo [ok]"));

    socketpm_cmd(dir.path())
        .args(["--tenant", "acme", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("demo @ 0.1 [ok]"));

    socketpm_cmd(dir.path())
        .args(["--tenant", "acme", "show", "demo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Description: Demo"))
        .stdout(predicate::str::contains("hello.js"));

    socketpm_cmd(dir.path())
        .args(["--tenant", "acme", "delete", "demo"])
        .assert()
        .success();

    socketpm_cmd(dir.path())
        .args(["--tenant", "acme", "show", "demo"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Socket not found: demo"));
}

#[test]
fn test_invalid_manifest_fails_with_line() {
    let dir = TempDir::new().unwrap();
    let path = write_bundle(dir.path(), "bad.zip", &[("socket.yml", "description: x\nversion: nope\n")]);

    socketpm_cmd(dir.path())
        .args(["install", "bad", "--bundle", &path])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Incorrect version value."))
        .stderr(predicate::str::contains("failed to install"));
}

#[test]
fn test_deferred_install_then_process() {
    let dir = TempDir::new().unwrap();
    let path = write_bundle(dir.path(), "demo.zip", &[("socket.yml", "description: x\n")]);

    socketpm_cmd(dir.path())
        .args(["install", "demo", "--bundle", &path, "--defer"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Queued: demo (processing)"));

    socketpm_cmd(dir.path())
        .arg("process")
        .assert()
        .success()
        .stdout(predicate::str::contains("demo [ok]"));
}

#[test]
fn test_config_requires_key_value() {
    let dir = TempDir::new().unwrap();
    let path = write_bundle(dir.path(), "demo.zip", &[("socket.yml", "config:\n  KEY:\n    required: true\n")]);

    socketpm_cmd(dir.path())
        .args(["install", "demo", "--bundle", &path])
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"KEY\" is required."));

    socketpm_cmd(dir.path())
        .args(["config", "demo", "KEY"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Expected key=value"));

    socketpm_cmd(dir.path())
        .args(["config", "demo", "KEY=1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("demo [ok]"));
}

#[test]
fn test_pack_creates_installable_bundle() {
    let dir = TempDir::new().unwrap();
    let socket_dir = dir.path().join("mysocket");
    fs::create_dir_all(socket_dir.join("scripts")).unwrap();
    fs::create_dir_all(socket_dir.join("node_modules")).unwrap();
    fs::write(socket_dir.join("socket.yml"), "endpoints:\n  hi:\n    file: scripts/hi.js\n").unwrap();
    fs::write(socket_dir.join("scripts/hi.js"), "return 'hi'").unwrap();
    fs::write(socket_dir.join("node_modules/skip.js"), "skip").unwrap();
    let output = dir.path().join("out.zip");

    socketpm_cmd(dir.path())
        .args(["pack", socket_dir.to_str().unwrap(), "-o", output.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Files to pack: 2"));

    let archive = socketpm::archive::Archive::open(&fs::read(&output).unwrap(), 30).unwrap();
    assert!(archive.contains("scripts/hi.js"));
    assert!(!archive.contains("node_modules/skip.js"));

    socketpm_cmd(dir.path())
        .args(["install", "mysocket", "--bundle", output.to_str().unwrap()])
        .assert()
        .success();
}

#[test]
fn test_pack_requires_manifest() {
    let dir = TempDir::new().unwrap();
    socketpm_cmd(dir.path())
        .args(["pack", dir.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No socket.yml found"));
}

#[test]
fn test_completions() {
    let dir = TempDir::new().unwrap();
    socketpm_cmd(dir.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("socketpm"));
}
