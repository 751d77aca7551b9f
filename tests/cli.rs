use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// A `docscan` invocation isolated from the user's config and session.
fn docscan(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("docscan").unwrap();
    cmd.arg("--config")
        .arg(dir.path().join("config.toml"))
        .env("DOCSCAN_SESSION_FILE", dir.path().join("session.json"))
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG");
    cmd
}

fn store_session(dir: &TempDir) {
    fs::write(
        dir.path().join("session.json"),
        r#"{"access_token": "a1", "refresh_token": "r1", "user": {"id": 7, "username": "amina"}}"#,
    )
    .unwrap();
}

#[test]
fn help_lists_command_groups() {
    let dir = TempDir::new().unwrap();
    docscan(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("document"))
        .stdout(predicate::str::contains("analyze"))
        .stdout(predicate::str::contains("diagnose"));
}

#[test]
fn generates_bash_completions() {
    let dir = TempDir::new().unwrap();
    docscan(&dir)
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("_docscan"));
}

#[test]
fn status_without_session_is_logged_out() {
    let dir = TempDir::new().unwrap();
    docscan(&dir)
        .args(["auth", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("NOT AUTHENTICATED"));
}

#[test]
fn offline_status_reads_stored_session() {
    let dir = TempDir::new().unwrap();
    store_session(&dir);

    docscan(&dir)
        .args(["auth", "status", "--offline"])
        .assert()
        .success()
        .stdout(predicate::str::contains("AUTHENTICATED"))
        .stdout(predicate::str::contains("NOT AUTHENTICATED").not())
        .stdout(predicate::str::contains("amina"));
}

#[test]
fn config_set_is_shown_back() {
    let dir = TempDir::new().unwrap();

    docscan(&dir)
        .args(["config", "set", "docs_api_url", "http://docs.test:9000/"])
        .assert()
        .success();

    docscan(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("http://docs.test:9000"))
        .stdout(predicate::str::contains("every 5s, up to 60 checks"));
}

#[test]
fn config_rejects_unknown_key() {
    let dir = TempDir::new().unwrap();
    docscan(&dir)
        .args(["config", "set", "api_key", "secret"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown configuration key"));
}

#[test]
fn environment_overrides_config_file() {
    let dir = TempDir::new().unwrap();
    docscan(&dir)
        .env("DOCSCAN_ANALYSIS_API_URL", "http://analysis.test:4100")
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("http://analysis.test:4100"));
}

#[test]
fn upload_requires_login() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("report.pdf");
    fs::write(&file, b"%PDF-1.4").unwrap();

    docscan(&dir)
        .args(["document", "upload"])
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not authenticated"));
}

#[test]
fn upload_rejects_unsupported_file_before_sending() {
    let dir = TempDir::new().unwrap();
    store_session(&dir);
    let file = dir.path().join("notes.txt");
    fs::write(&file, "plain text").unwrap();

    docscan(&dir)
        .args(["document", "upload"])
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported file type"));
}

#[test]
fn analysis_language_is_validated() {
    let dir = TempDir::new().unwrap();
    docscan(&dir)
        .args(["analyze", "start", "42", "--language", "de"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}
