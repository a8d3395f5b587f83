//! CLI integration tests

use std::process::{Command, Output};

fn cco(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_cco"))
        .args(args)
        .env_remove("CCO_API_URL")
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = cco(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(
        stdout.contains("Cloud Cost Optimizer"),
        "Should show app name"
    );
    for command in ["summary", "remediations", "audit", "observations", "status", "config"] {
        assert!(stdout.contains(command), "Should show {} command", command);
    }
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = cco(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("cco"), "Should show binary name");
}

#[test]
fn test_remediations_help() {
    let output = cco(&["remediations", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--service"), "Should show service option");
    assert!(stdout.contains("--api-url"), "Should show global api-url option");
}

#[test]
fn test_observations_help() {
    let output = cco(&["observations", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--limit"), "Should show limit option");
}

#[test]
fn test_rejects_unknown_format() {
    let output = cco(&["--format", "yaml", "summary"]);
    assert!(!output.status.success());
}

#[test]
fn test_summary_as_json() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/api/v1/summary")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"count":1,"total_savings":27.0,"per_service":[
                {"provider":"aws","service":"compute","count":1,"savings":27.0}]}"#,
        )
        .create();

    let output = cco(&["--api-url", &server.url(), "--format", "json", "summary"]);

    mock.assert();
    assert!(output.status.success());
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["total_savings"], 27.0);
    assert_eq!(summary["per_service"][0]["service"], "compute");
}

#[test]
fn test_api_error_exits_non_zero() {
    let mut server = mockito::Server::new();
    let _mock = server
        .mock("GET", "/api/v1/audit")
        .with_status(500)
        .with_body("boom")
        .create();

    let output = cco(&["--api-url", &server.url(), "audit"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert!(stderr.contains("500"), "Should report the API status");
}
