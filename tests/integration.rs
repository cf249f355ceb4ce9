use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn wiki_digest_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("wiki-digest");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // The model points at a closed port so nothing leaves the machine.
    let config_content = format!(
        r#"[db]
path = "{}/data/wiki-digest.sqlite"

[server]
bind = "127.0.0.1:0"

[llm]
provider = "ollama"
model = "llama3"
url = "http://127.0.0.1:1"
max_retries = 0
timeout_secs = 5
"#,
        root.display()
    );

    let config_path = config_dir.join("wiki-digest.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_cli(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = wiki_digest_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run wiki-digest binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_cli(&config, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully"));
    assert!(tmp.path().join("data/wiki-digest.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config) = setup_test_env();
    let (_, _, ok1) = run_cli(&config, &["init"]);
    assert!(ok1);
    let (stdout, stderr, ok2) = run_cli(&config, &["init"]);
    assert!(ok2, "second init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully"));
}

#[test]
fn test_queries_on_empty_database() {
    let (_tmp, config) = setup_test_env();
    run_cli(&config, &["init"]);
    let (stdout, _, ok) = run_cli(&config, &["queries"]);
    assert!(ok);
    assert!(stdout.contains("No queries."));

    let (stdout, _, ok) = run_cli(&config, &["queries", "--json"]);
    assert!(ok);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed, serde_json::json!([]));
}

#[test]
fn test_show_missing_query() {
    let (_tmp, config) = setup_test_env();
    run_cli(&config, &["init"]);
    let (_, stderr, ok) = run_cli(&config, &["show", "42"]);
    assert!(!ok);
    assert!(stderr.contains("query not found: 42"));
}

#[test]
fn test_health() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_cli(&config, &["health"]);
    assert!(ok, "health failed: {}", stderr);
    assert!(stdout.contains("healthy"));
    assert!(stdout.contains("connected"));
}

#[test]
fn test_ask_empty_query() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_cli(&config, &["ask", "   "]);
    assert!(!ok);
    assert!(stderr.contains("query must not be empty"), "{}", stderr);
}

#[test]
fn test_ask_with_unreachable_model() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_cli(&config, &["ask", "Tell me about Meryl"]);
    assert!(!ok);
    assert!(stderr.contains("TopicResolver"), "{}", stderr);
    assert!(stderr.contains("is Ollama running"), "{}", stderr);
}

#[test]
fn test_invalid_config_rejected() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("config/bad.toml");
    fs::write(
        &bad,
        "[db]\npath = \"x.sqlite\"\n[server]\nbind = \"127.0.0.1:0\"\n[llm]\nprovider = \"nope\"\n",
    )
    .unwrap();
    let (_, stderr, ok) = run_cli(&bad, &["init"]);
    assert!(!ok);
    assert!(stderr.contains("Unknown llm provider"), "{}", stderr);
}

#[test]
fn test_missing_config_file() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");
    let (_, stderr, ok) = run_cli(&missing, &["queries"]);
    assert!(!ok);
    assert!(stderr.contains("Failed to read config file"), "{}", stderr);
}
