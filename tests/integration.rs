use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn flowrag_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_flowrag"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    let catalog_dir = root.join("catalog");
    fs::create_dir_all(&catalog_dir).unwrap();
    fs::write(
        catalog_dir.join("blocks.json"),
        r#"{"blocks": [
            {"blockId": "n8n-nodes-base.slack", "displayName": "Slack", "description": "Send a message to a Slack channel"},
            {"blockId": "n8n-nodes-base.webhook", "displayName": "Webhook", "description": "Receive HTTP requests", "isTrigger": true}
        ]}"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/flowrag.sqlite"

[embedding]
provider = "hashing"
dims = 64
"#,
        root.display()
    );
    let config_path = root.join("config/flowrag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_flowrag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = flowrag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run flowrag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_is_idempotent() {
    let (_tmp, config) = setup_test_env();

    let (stdout, stderr, ok) = run_flowrag(&config, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully."));
    assert!(stdout.contains("blocks, patterns, tasks, connections"));

    let (_, stderr, ok) = run_flowrag(&config, &["init"]);
    assert!(ok, "second init failed: {}", stderr);
}

#[test]
fn test_ingest_and_context() {
    let (tmp, config) = setup_test_env();
    let catalog = tmp.path().join("catalog");

    let (stdout, stderr, ok) = run_flowrag(&config, &["ingest", catalog.to_str().unwrap()]);
    assert!(ok, "ingest failed: {}", stderr);
    assert!(stdout.contains("upserted: 2"));

    let (stdout, stderr, ok) = run_flowrag(
        &config,
        &["context", "send a slack message when a webhook is received"],
    );
    assert!(ok, "context failed: {}", stderr);
    assert!(stdout.contains("INTENT: notification"));
    assert!(stdout.contains("## n8n-nodes-base.slack"));

    let (stdout, _, ok) = run_flowrag(&config, &["context", "post to slack", "--json"]);
    assert!(ok);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert!(json["context"]["required_blocks"].is_array());
    assert_eq!(json["retrieval"].as_object().unwrap().len(), 4);
}

#[test]
fn test_feedback_from_artifact() {
    let (tmp, config) = setup_test_env();
    let artifact = tmp.path().join("workflow.json");
    fs::write(&artifact, r#"{"nodes": [{"id": "1", "name": "Slack"}]}"#).unwrap();

    let (stdout, stderr, ok) = run_flowrag(
        &config,
        &["feedback", "post to slack", "--artifact", artifact.to_str().unwrap()],
    );
    assert!(ok, "feedback failed: {}", stderr);
    assert!(stdout.contains("(failure)"));
    assert!(stdout.contains("Missing 'connections' field"));
    assert!(stdout.contains("Node 0: missing 'type' field"));

    let (stdout, _, ok) = run_flowrag(&config, &["stats"]);
    assert!(ok);
    assert!(stdout.contains("Generations: 1 (0 successful"));
}

#[test]
fn test_feedback_requires_result() {
    let (_tmp, config) = setup_test_env();
    let (_, _, ok) = run_flowrag(&config, &["feedback", "post to slack"]);
    assert!(!ok);
}

#[test]
fn test_suggest_rejects_unknown_intent() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_flowrag(&config, &["suggest", "teleportation"]);
    assert!(!ok);
    assert!(stderr.contains("Unknown intent"));

    let (stdout, _, ok) = run_flowrag(&config, &["suggest", "notification"]);
    assert!(ok);
    assert!(stdout.contains("Verify channel/recipient configuration"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, ok) = run_flowrag(&tmp.path().join("nope.toml"), &["stats"]);
    assert!(!ok);
    assert!(stderr.contains("Failed to read config file"));
}
