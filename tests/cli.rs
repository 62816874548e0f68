//! Runs the `convo` binary end to end. Nothing here talks to a server:
//! inspect runs `--offline` and import runs `--dry-run`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::{json, Value};
use tempfile::TempDir;

fn convo_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("convo");
    path
}

fn chatgpt_export(n: usize) -> Value {
    let items: Vec<Value> = (0..n)
        .map(|i| {
            json!({
                "id": format!("chat-{}", i),
                "title": format!("Conversation {}", i),
                "create_time": 1_700_000_000.0 + i as f64,
                "mapping": {
                    "root": {
                        "message": {
                            "author": {"role": "user"},
                            "content": {"content_type": "text", "parts": [format!("question number {}", i)]},
                            "create_time": 1_700_000_000.0 + i as f64
                        },
                        "parent": null,
                        "children": []
                    }
                }
            })
        })
        .collect();
    Value::Array(items)
}

fn setup_export(n: usize) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("conversations.json");
    fs::write(&file, serde_json::to_vec(&chatgpt_export(n)).unwrap()).unwrap();
    (tmp, file)
}

fn run_convo(dir: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = convo_binary();
    // The config file does not exist, so built-in defaults apply.
    let output = Command::new(&binary)
        .arg("--config")
        .arg(dir.join("missing.toml"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run convo binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_inspect_offline_text() {
    let (tmp, file) = setup_export(3);
    let (stdout, stderr, ok) = run_convo(tmp.path(), &["inspect", file.to_str().unwrap(), "--offline"]);
    assert!(ok, "inspect failed: {}", stderr);
    assert!(stdout.contains("Format:      chatgpt"), "stdout: {}", stdout);
    assert!(stdout.contains("Total:       3"));
    assert!(stdout.contains("not checked (offline)"));
    assert!(stdout.contains("Conversation 2"));
}

#[test]
fn test_inspect_json_with_search() {
    let (tmp, file) = setup_export(3);
    let (stdout, stderr, ok) = run_convo(
        tmp.path(),
        &["inspect", file.to_str().unwrap(), "--offline", "--json", "--search", "number 1"],
    );
    assert!(ok, "inspect failed: {}", stderr);

    let out: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(out["format"], "chatgpt");
    assert_eq!(out["summary"]["total"], 3);
    let conversations = out["conversations"].as_array().unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0]["title"], "Conversation 1");
}

#[test]
fn test_inspect_rejects_non_json_extension() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("notes.txt");
    fs::write(&file, "[]").unwrap();

    let (_, stderr, ok) = run_convo(tmp.path(), &["inspect", file.to_str().unwrap(), "--offline"]);
    assert!(!ok);
    assert!(stderr.contains("only .json exports"), "stderr: {}", stderr);
}

#[test]
fn test_split_writes_chunk_files() {
    let (tmp, file) = setup_export(8);
    let out_dir = tmp.path().join("chunks");
    let (stdout, stderr, ok) = run_convo(
        tmp.path(),
        &[
            "split",
            file.to_str().unwrap(),
            "--out-dir",
            out_dir.to_str().unwrap(),
            "--max-bytes",
            "600",
        ],
    );
    assert!(ok, "split failed: {}", stderr);
    assert!(stdout.contains("chunk(s) written"));

    let mut names: Vec<String> = fs::read_dir(&out_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    assert!(names.len() > 1);
    assert!(names
        .iter()
        .all(|n| n.starts_with("conversations.json_part") && n.ends_with(".json")));
}

#[test]
fn test_import_dry_run_full() {
    let (tmp, file) = setup_export(4);
    let (stdout, stderr, ok) = run_convo(
        tmp.path(),
        &["import", file.to_str().unwrap(), "--dry-run", "--progress", "off"],
    );
    assert!(ok, "import failed: {}", stderr);
    assert!(stdout.contains("4 conversation(s), 0 already imported, 4 importable"));
    assert!(stdout.contains("Import complete."));
}

#[test]
fn test_import_dry_run_batch() {
    let (tmp, file) = setup_export(5);
    let (stdout, stderr, ok) = run_convo(
        tmp.path(),
        &[
            "import",
            file.to_str().unwrap(),
            "--dry-run",
            "--progress",
            "off",
            "--mode",
            "batch",
            "--start",
            "2",
            "--end",
            "4",
        ],
    );
    assert!(ok, "import failed: {}", stderr);
    assert!(stdout.contains("Sending 3 conversation(s)"), "stdout: {}", stdout);
    assert!(stdout.contains("3 succeeded, 0 failed"));
}

#[test]
fn test_import_batch_without_end_fails() {
    let (tmp, file) = setup_export(2);
    let (_, _, ok) = run_convo(
        tmp.path(),
        &["import", file.to_str().unwrap(), "--dry-run", "--mode", "batch"],
    );
    assert!(!ok);
}

#[test]
fn test_completions() {
    let tmp = TempDir::new().unwrap();
    let (stdout, _, ok) = run_convo(tmp.path(), &["completions", "bash"]);
    assert!(ok);
    assert!(stdout.contains("convo"));
}
