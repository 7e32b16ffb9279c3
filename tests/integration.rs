use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn assist_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_assist"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();

    fs::write(
        data_dir.join("course_qa.csv"),
        "question,answer,topic\n\
         What is overfitting?,Model fits noise in training data.,ml\n\
         Define bias-variance tradeoff,Balance between underfitting and overfitting.,ml\n\
         \"What is a p-value, briefly?\",\"Probability of data at least this extreme, under H0.\",stats\n\
         ,Orphan answer without a question.,misc\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/assist.sqlite"

[corpus]
path = "{root}/data/course_qa.csv"

[index]
name = "course_qa"

[retrieval]
top_k = 3

[server]
bind = "127.0.0.1:7341"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("assist.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_assist(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = assist_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run assist binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_assist(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized"));
    assert!(tmp.path().join("data/assist.sqlite").exists());

    // Idempotent
    let (_, stderr, success) = run_assist(&config_path, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_index_then_search() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) =
        run_assist(&config_path, &["index", "--progress", "off"]);
    assert!(success, "index failed: {}", stderr);
    // The row without a question is dropped.
    assert!(stdout.contains("Indexed 3 documents"), "stdout: {}", stdout);
    assert!(stdout.contains("fingerprint:"));

    let (stdout, stderr, success) =
        run_assist(&config_path, &["search", "overfitting", "--top-k", "1"]);
    assert!(success, "search failed: {}", stderr);
    assert!(stdout.contains("1 of 2 matches"), "stdout: {}", stdout);
    assert!(stdout.contains("Model fits noise in training data."));
    assert!(stdout.contains("topic: ml"));
}

#[test]
fn test_search_json() {
    let (_tmp, config_path) = setup_test_env();
    run_assist(&config_path, &["index", "--progress", "off"]);

    let (stdout, stderr, success) =
        run_assist(&config_path, &["search", "p-value", "--json"]);
    assert!(success, "search failed: {}", stderr);
    let result: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(
        result["hits"][0]["answer"],
        "Probability of data at least this extreme, under H0."
    );
    assert_eq!(result["provenance"]["topic"], "stats");
}

#[test]
fn test_search_before_index_fails_not_ready() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_assist(&config_path, &["search", "overfitting"]);
    assert!(!success);
    assert!(stderr.contains("error[index_not_ready]"), "stderr: {}", stderr);
}

#[test]
fn test_ask_with_generation_disabled_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_assist(&config_path, &["ask", "What is overfitting?", "--rebuild"]);
    assert!(!success);
    assert!(stderr.contains("error[generation_failure]"), "stderr: {}", stderr);

    // No conversation was stored for the failed answer.
    let (stdout, _, success) = run_assist(&config_path, &["history"]);
    assert!(success);
    assert!(stdout.contains("No conversations yet."));
}

#[test]
fn test_ask_top_k_defaults_to_config() {
    let (tmp, config_path) = setup_test_env();
    let content = fs::read_to_string(&config_path)
        .unwrap()
        .replace("top_k = 3", "top_k = 1\nmax_top_k = 1");
    let narrow = tmp.path().join("config/narrow.toml");
    fs::write(&narrow, content).unwrap();

    // With a hard-coded default of 3 this would fail validation against
    // max_top_k = 1; the configured top_k gets as far as generation.
    let (_, stderr, success) = run_assist(&narrow, &["ask", "What is overfitting?", "--rebuild"]);
    assert!(!success);
    assert!(stderr.contains("error[generation_failure]"), "stderr: {}", stderr);

    let (_, stderr, _) = run_assist(&narrow, &["ask", "What is overfitting?", "--top-k", "2"]);
    assert!(stderr.contains("error[invalid_argument]"), "stderr: {}", stderr);
}

#[test]
fn test_ask_empty_question_is_invalid() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_assist(&config_path, &["ask", "   "]);
    assert!(!success);
    assert!(stderr.contains("error[invalid_query]"), "stderr: {}", stderr);
}

#[test]
fn test_missing_corpus_is_data_unavailable() {
    let (tmp, config_path) = setup_test_env();
    fs::remove_file(tmp.path().join("data/course_qa.csv")).unwrap();

    let (_, stderr, success) = run_assist(&config_path, &["index", "--progress", "off"]);
    assert!(!success);
    assert!(stderr.contains("error[data_unavailable]"), "stderr: {}", stderr);
}

#[test]
fn test_feedback_rejects_unknown_vote() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) =
        run_assist(&config_path, &["feedback", "some-id", "sideways"]);
    assert!(!success);
    assert!(stderr.contains("vote must be"), "stderr: {}", stderr);
}

#[test]
fn test_stats_reports_index_state() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_assist(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("not built"));

    run_assist(&config_path, &["index", "--progress", "off"]);
    let (stdout, _, success) = run_assist(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("State:       ready"), "stdout: {}", stdout);
    assert!(stdout.contains("Thumbs up:   0"));
}

#[test]
fn test_invalid_config_fails() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("config/bad.toml");
    fs::write(
        &bad,
        "[db]\npath = \"x.sqlite\"\n[corpus]\npath = \"x.csv\"\n[retrieval]\ntop_k = 0\n",
    )
    .unwrap();

    let (_, stderr, success) = run_assist(&bad, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("top_k"), "stderr: {}", stderr);
}
