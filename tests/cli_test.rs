// ABOUTME: Tests for the command-line binary's argument handling
// ABOUTME: Exercises validation paths that fail before any database connection

use std::fs;
use std::process::Command;
use tempfile::tempdir;

fn bin() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_watermark-replicator"));
    command.env_remove("PGPASSWORD").env_remove("RUST_LOG");
    command
}

#[test]
fn test_help_lists_modes() {
    let output = bin().arg("--help").output().expect("Failed to execute command");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("single"));
    assert!(stdout.contains("continuous"));
}

#[test]
fn test_continuous_help_shows_delay() {
    let output = bin()
        .args(["continuous", "--help"])
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--delay"));
    assert!(stdout.contains("--chunksize"));
}

#[test]
fn test_chunk_size_above_limit_is_rejected() {
    let output = bin()
        .args([
            "single",
            "sales",
            "sales_copy",
            "orders",
            "replicator",
            "--password",
            "secret",
            "--chunksize",
            "20000",
        ])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Chunk size must be lower or equal to 10000"),
        "unexpected stderr: {}",
        stderr
    );
}

#[test]
fn test_same_source_and_destination_is_rejected() {
    let output = bin()
        .args(["single", "sales", "sales", "orders", "replicator", "--password", "x"])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("must differ"), "unexpected stderr: {}", stderr);
}

#[test]
fn test_missing_positionals_are_rejected() {
    let output = bin()
        .args(["single", "sales"])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("required"), "unexpected stderr: {}", stderr);
}

#[test]
fn test_config_file_values_are_validated() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("replication.toml");
    fs::write(
        &config_path,
        r#"
user = "replicator"
password = "secret"
source_db = "sales"
destination_db = "sales_copy"
table = "orders;drop"
"#,
    )
    .unwrap();

    let output = bin()
        .args(["single", "--config"])
        .arg(&config_path)
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid table"), "unexpected stderr: {}", stderr);
}

#[test]
fn test_unknown_integer_clock_is_rejected() {
    let output = bin()
        .args([
            "single",
            "sales",
            "sales_copy",
            "orders",
            "replicator",
            "--integer-clock",
            "sundial",
        ])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("sundial"), "unexpected stderr: {}", stderr);
}
