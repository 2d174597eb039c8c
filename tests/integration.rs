mod common;

use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use wiremock::MockServer;

use common::{mount_chat_reply, mount_embeddings, Workspace};

fn repochat_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("repochat");
    path
}

fn run_repochat(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = repochat_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run repochat binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_databases() {
    let tmp = TempDir::new().unwrap();
    let ws = Workspace::new(tmp.path(), None);
    let (stdout, stderr, ok) = run_repochat(&ws.config_path, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(stdout.contains("initialized"));
    assert!(ws.root.join("data/meta.sqlite").exists());
    assert!(ws.root.join("data/vectors.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let tmp = TempDir::new().unwrap();
    let ws = Workspace::new(tmp.path(), None);
    let (_, _, ok) = run_repochat(&ws.config_path, &["init"]);
    assert!(ok);
    let (_, stderr, ok) = run_repochat(&ws.config_path, &["init"]);
    assert!(ok, "second init failed: {}", stderr);
}

#[test]
fn test_projects_lists_configured_project() {
    let tmp = TempDir::new().unwrap();
    let ws = Workspace::new(tmp.path(), None);
    let (stdout, stderr, ok) = run_repochat(&ws.config_path, &["projects"]);
    assert!(ok, "projects failed: {}", stderr);
    assert!(stdout.contains("demo"));
    assert!(stdout.contains("OK"));
    assert!(stdout.contains("new"));
}

#[test]
fn test_stats_on_empty_index() {
    let tmp = TempDir::new().unwrap();
    let ws = Workspace::new(tmp.path(), None);
    let (stdout, stderr, ok) = run_repochat(&ws.config_path, &["stats"]);
    assert!(ok, "stats failed: {}", stderr);
    assert!(stdout.contains("demo"));
    assert!(stdout.contains("never"));
}

#[test]
fn test_unknown_project_fails() {
    let tmp = TempDir::new().unwrap();
    let ws = Workspace::new(tmp.path(), None);
    let (_, stderr, ok) = run_repochat(&ws.config_path, &["stats", "nope"]);
    assert!(!ok);
    assert!(stderr.contains("nope"));
}

#[test]
fn test_reconcile_errors_when_embedding_disabled() {
    let tmp = TempDir::new().unwrap();
    let ws = Workspace::new(tmp.path(), None);
    let (_, stderr, ok) = run_repochat(&ws.config_path, &["reconcile", "demo"]);
    assert!(!ok);
    assert!(stderr.contains("disabled"));
}

#[test]
fn test_search_errors_when_embedding_disabled() {
    let tmp = TempDir::new().unwrap();
    let ws = Workspace::new(tmp.path(), None);
    let (_, stderr, ok) = run_repochat(&ws.config_path, &["search", "demo", "retry"]);
    assert!(!ok);
    assert!(stderr.contains("embedding provider"));
}

#[test]
fn test_chat_session_lifecycle() {
    let tmp = TempDir::new().unwrap();
    let ws = Workspace::new(tmp.path(), None);

    let (stdout, stderr, ok) = run_repochat(
        &ws.config_path,
        &["chat", "new", "demo", "--title", "onboarding"],
    );
    assert!(ok, "chat new failed: {}", stderr);
    let session_id = stdout.lines().next().unwrap().trim().to_string();
    assert_eq!(session_id.len(), 36);

    let (stdout, _, ok) = run_repochat(&ws.config_path, &["chat", "list", "demo"]);
    assert!(ok);
    assert!(stdout.contains(&session_id));
    assert!(stdout.contains("onboarding"));

    let (stdout, _, ok) = run_repochat(&ws.config_path, &["chat", "archive", &session_id]);
    assert!(ok);
    assert!(stdout.contains("archived"));

    let (_, stderr, ok) = run_repochat(&ws.config_path, &["chat", "activate", &session_id]);
    assert!(!ok);
    assert!(stderr.contains("archived"));

    let (stdout, _, ok) = run_repochat(&ws.config_path, &["chat", "show", &session_id]);
    assert!(ok);
    assert!(stdout.contains("status: archived"));
}

#[test]
fn test_chat_show_missing_session() {
    let tmp = TempDir::new().unwrap();
    let ws = Workspace::new(tmp.path(), None);
    let (_, stderr, ok) = run_repochat(&ws.config_path, &["chat", "show", "no-such-session"]);
    assert!(!ok);
    assert!(stderr.contains("no-such-session"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reconcile_search_and_ask() {
    let server = MockServer::start().await;
    mount_embeddings(&server).await;
    mount_chat_reply(&server, "See the backoff helper.").await;
    let tmp = TempDir::new().unwrap();
    let ws = Workspace::new(tmp.path(), Some(&server.uri()));

    let (stdout, stderr, ok) = run_repochat(
        &ws.config_path,
        &["reconcile", "demo", "--progress", "json"],
    );
    assert!(ok, "reconcile failed: {}", stderr);
    assert!(stdout.contains("created: 3"));
    assert!(stderr.contains("\"phase\":\"completed\""));

    let (stdout, _, ok) = run_repochat(&ws.config_path, &["reconcile", "demo", "--progress", "off"]);
    assert!(ok);
    assert!(stdout.contains("unchanged: 3"));
    assert!(stdout.contains("embedding calls: 0"));

    let (stdout, stderr, ok) = run_repochat(
        &ws.config_path,
        &["search", "demo", "retry policy backoff attempt", "--min-score", "0"],
    );
    assert!(ok, "search failed: {}", stderr);
    assert!(stdout.starts_with("1. ["));
    assert!(stdout.lines().next().unwrap().contains("src/retry.rs:1-"));

    let (stdout, _, ok) = run_repochat(&ws.config_path, &["stats", "demo"]);
    assert!(ok);
    assert!(stdout.contains("yes"));

    let (stdout, _, ok) = run_repochat(&ws.config_path, &["chat", "new", "demo"]);
    assert!(ok);
    let session_id = stdout.lines().next().unwrap().trim().to_string();

    let (stdout, stderr, ok) = run_repochat(
        &ws.config_path,
        &["chat", "ask", &session_id, "how does retry backoff work"],
    );
    assert!(ok, "chat ask failed: {}", stderr);
    assert!(stdout.contains("See the backoff helper."));

    let (stdout, _, ok) = run_repochat(&ws.config_path, &["chat", "show", &session_id]);
    assert!(ok);
    assert!(stdout.contains("how does retry backoff work"));
    assert!(stdout.contains("See the backoff helper."));
}
