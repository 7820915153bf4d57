use std::process::{Command, Output};

fn loupe(dir: &std::path::Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_loupe"))
        .args(args)
        .current_dir(dir)
        .env_remove("LOUPE_API_KEY")
        .env_remove("OPENAI_API_KEY")
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

#[test]
fn search_without_index_points_to_ingest() {
    let dir = tempfile::tempdir().unwrap();
    let output = loupe(dir.path(), &["search", "lightning", "--method", "keyword"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No index found"), "{stderr}");
    assert!(!dir.path().join(".loupe").exists(), "search must not create an index");
}

#[test]
fn unknown_search_method_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let output = loupe(dir.path(), &["search", "q", "--method", "fuzzy"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("fuzzy"), "{stderr}");
}

#[test]
fn positive_before_window_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let output = loupe(dir.path(), &["segments", "abc", "--before", "2"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("before"), "{stderr}");
}

#[test]
fn doctor_reports_json_checks() {
    let dir = tempfile::tempdir().unwrap();
    let output = loupe(dir.path(), &["doctor", "--format", "json"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let checks = json["checks"].as_array().unwrap();
    let status = |name: &str| {
        checks
            .iter()
            .find(|c| c["name"] == name)
            .map(|c| c["status"].as_str().unwrap().to_string())
    };
    assert_eq!(status("config_file").as_deref(), Some("fail"));
    assert_eq!(status("embedding_api_key").as_deref(), Some("fail"));
    assert_eq!(status("search_index").as_deref(), Some("info"));
}

#[test]
fn ingest_without_api_key_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("chunks.jsonl"),
        "{\"document_id\": \"a\", \"content\": \"lightning struck the rails\"}\n",
    )
    .unwrap();

    let output = loupe(dir.path(), &["ingest", "chunks.jsonl"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("API key"), "{stderr}");
}

#[test]
fn invalid_config_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".loupe.toml"), "[search]\noversample = 0\n").unwrap();
    let output = loupe(dir.path(), &["doctor"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("oversample"), "{stderr}");
}
