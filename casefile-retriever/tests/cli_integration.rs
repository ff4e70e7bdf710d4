use anyhow::Result;
use serde_json::Value;
use std::process::{Command, Output};
use tempfile::TempDir;

/// Helper to run the CLI binary against a database inside `temp_dir`
fn run_cli(temp_dir: &TempDir, args: &[&str]) -> Result<Output> {
    let output = Command::new(env!("CARGO_BIN_EXE_casefile"))
        .current_dir(temp_dir.path())
        .arg("--db")
        .arg(temp_dir.path().join("index").join("casefile.db"))
        .arg("--mock-embeddings")
        .args(args)
        .env("RUST_LOG", "error") // Reduce log noise
        .output()?;
    Ok(output)
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Helper to populate a corpus and ingest it along with a transcript
fn populate_test_data(temp_dir: &TempDir) -> Result<()> {
    let corpus = temp_dir.path().join("corpus");
    std::fs::create_dir_all(&corpus)?;
    std::fs::write(
        corpus.join("email1.txt"),
        "My manager cut my shifts after I filed the complaint.",
    )?;
    std::fs::write(corpus.join("email2.txt"), "The cafeteria menu changes on Monday.")?;
    std::fs::write(
        temp_dir.path().join("call.txt"),
        "If you keep complaining your hours will disappear.",
    )?;

    let output = run_cli(temp_dir, &["ingest-dir", "corpus"])?;
    assert!(output.status.success(), "ingest-dir failed: {output:?}");
    assert!(stdout(&output).contains("Ingested 2 documents (2 chunks)"));

    let output = run_cli(
        temp_dir,
        &["ingest-transcript", "call.txt", "--source", "call.mp3", "--language", "en"],
    )?;
    assert!(output.status.success(), "ingest-transcript failed: {output:?}");
    Ok(())
}

#[test]
fn test_init_creates_database() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let output = run_cli(&temp_dir, &["init"])?;
    assert!(output.status.success());
    assert!(temp_dir.path().join("index").join("casefile.db").exists());
    Ok(())
}

#[test]
fn test_search_json_puts_audio_first() -> Result<()> {
    let temp_dir = TempDir::new()?;
    populate_test_data(&temp_dir)?;

    let output = run_cli(
        &temp_dir,
        &["search", "manager cut my shifts", "--top-k", "2", "--format", "json"],
    )?;
    assert!(output.status.success());
    let results: Value = serde_json::from_str(&stdout(&output))?;
    assert_eq!(results[0]["metadata"]["source_file"], "call.mp3");
    assert_eq!(results[0]["metadata"]["language"], "en");
    assert_eq!(results[1]["metadata"]["source_file"], "email1.txt");

    let output = run_cli(
        &temp_dir,
        &["search", "manager cut my shifts", "--top-k", "1", "--similarity-only", "--format", "json"],
    )?;
    let results: Value = serde_json::from_str(&stdout(&output))?;
    assert_eq!(results[0]["chunk_id"], "email1.txt_chunk_0");
    Ok(())
}

#[test]
fn test_cite_injects_audio() -> Result<()> {
    let temp_dir = TempDir::new()?;
    std::fs::write(
        temp_dir.path().join("claims.json"),
        r#"[{"title": "Retaliation", "citations": ["email1.txt"]}]"#,
    )?;

    let output = run_cli(
        &temp_dir,
        &["cite", "--claims", "claims.json", "--sources", "call.mp3,email1.txt"],
    )?;
    assert!(output.status.success(), "cite failed: {output:?}");
    let repaired: Value = serde_json::from_str(&stdout(&output))?;
    assert_eq!(
        repaired["issues"][0]["citations"],
        serde_json::json!(["call.mp3", "email1.txt"])
    );
    assert_eq!(repaired["issues"][0]["title"], "Retaliation");
    Ok(())
}

#[test]
fn test_list_get_and_stats() -> Result<()> {
    let temp_dir = TempDir::new()?;
    populate_test_data(&temp_dir)?;

    let output = run_cli(&temp_dir, &["list", "--source-file", "email2.txt", "--format", "json"])?;
    let chunks: Value = serde_json::from_str(&stdout(&output))?;
    assert_eq!(chunks.as_array().map(Vec::len), Some(1));
    assert_eq!(chunks[0]["id"], "email2.txt_chunk_0");

    let output = run_cli(&temp_dir, &["get", "upload_call.mp3_chunk_0"])?;
    assert!(output.status.success());
    assert!(stdout(&output).contains("Type: audio"));

    let output = run_cli(&temp_dir, &["get", "missing_chunk_0"])?;
    assert!(!output.status.success());

    let output = run_cli(&temp_dir, &["stats"])?;
    let text = stdout(&output);
    assert!(text.contains("Chunks: 3"));
    assert!(text.contains("Documents: 3"));
    assert!(text.contains("audio: 1"));
    Ok(())
}

#[test]
fn test_reingest_reports_unchanged() -> Result<()> {
    let temp_dir = TempDir::new()?;
    populate_test_data(&temp_dir)?;

    let output = run_cli(&temp_dir, &["ingest-dir", "corpus"])?;
    let text = stdout(&output);
    assert!(text.contains("skipped 2"));
    assert!(text.contains("= email1.txt: unchanged"));
    Ok(())
}
