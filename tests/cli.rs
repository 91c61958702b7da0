use chrono::{Duration, NaiveDate, Utc};
use httpmock::{Method::POST, MockServer};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::str::FromStr;
use tempfile::TempDir;

const AWS_ENV: [&str; 3] = [
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
];

fn home_path(home: &TempDir) -> &Path {
    home.path()
}

fn bin_path() -> &'static str {
    env!("CARGO_BIN_EXE_credit-meter")
}

fn command(home: &TempDir, args: &[&str]) -> Command {
    let mut cmd = Command::new(bin_path());
    cmd.args(args)
        .env("CREDIT_METER_HOME", home_path(home))
        .env_remove("SLACK_WEBHOOK_URL")
        .env_remove("RUST_LOG");
    for var in AWS_ENV {
        cmd.env_remove(var);
    }
    cmd
}

fn run_cmd(home: &TempDir, args: &[&str]) -> Output {
    command(home, args).output().expect("run credit-meter command")
}

fn run_with_aws(home: &TempDir, args: &[&str]) -> Output {
    command(home, args)
        .env("AWS_ACCESS_KEY_ID", "AKIDEXAMPLE")
        .env("AWS_SECRET_ACCESS_KEY", "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY")
        .output()
        .expect("run credit-meter command")
}

fn config_path(home: &TempDir) -> PathBuf {
    home.path().join("config").join("config.toml")
}

fn write_config(home: &TempDir, endpoint: &str) {
    fs::create_dir_all(home.path().join("config")).expect("create config dir");
    let raw = format!(
        r#"
[billing]
period_type = "d"
period_count = 7
endpoint = "{endpoint}"

[credits]
total_available = "5000.00"
manual_offset = "-25.01"

[notify]
slack_enabled = false
"#
    );
    fs::write(config_path(home), raw).expect("write config");
}

fn period(day: NaiveDate) -> Value {
    json!({
        "Start": day.format("%Y-%m-%d").to_string(),
        "End": (day + Duration::days(1)).format("%Y-%m-%d").to_string(),
    })
}

fn cost(amount: &str) -> Value {
    json!({ "UnblendedCost": { "Amount": amount, "Unit": "USD" } })
}

/// One mock per query shape the report issues.
fn mock_cost_explorer(server: &MockServer) {
    let day = Utc::now().date_naive() - Duration::days(1);

    server.mock(|when, then| {
        when.method(POST).body_includes(r#""Key":"SERVICE""#);
        then.status(200).json_body(json!({
            "ResultsByTime": [{
                "TimePeriod": period(day),
                "Groups": [
                    { "Keys": ["Amazon Elastic Compute Cloud - Compute"], "Metrics": cost("60.00") },
                    { "Keys": ["Amazon Simple Storage Service"], "Metrics": cost("40.00") }
                ]
            }]
        }));
    });
    server.mock(|when, then| {
        when.method(POST).body_includes(r#""Key":"USAGE_TYPE""#);
        then.status(200).json_body(json!({
            "ResultsByTime": [{
                "TimePeriod": period(day),
                "Groups": [
                    { "Keys": ["BoxUsage:t3.large"], "Metrics": cost("60.00") },
                    { "Keys": ["TimedStorage-ByteHrs"], "Metrics": cost("40.00") }
                ]
            }]
        }));
    });
    server.mock(|when, then| {
        when.method(POST).body_includes(r#""Values":["Credit"]"#);
        then.status(200).json_body(json!({
            "ResultsByTime": [{ "TimePeriod": period(day), "Total": cost("-100.00"), "Groups": [] }]
        }));
    });
    server.mock(|when, then| {
        when.method(POST)
            .body_includes(r#""Granularity":"MONTHLY""#)
            .body_includes(r#""Values":["Usage"]"#);
        then.status(200).json_body(json!({
            "ResultsByTime": [{ "TimePeriod": period(day), "Total": cost("300.00"), "Groups": [] }]
        }));
    });
}

#[test]
fn init_creates_config() {
    let home = TempDir::new().expect("temp home");
    let output = run_cmd(&home, &["init"]);
    assert!(output.status.success());

    assert!(home.path().join("config").exists());
    assert!(config_path(&home).exists());
}

#[test]
fn init_is_idempotent() {
    let home = TempDir::new().expect("temp home");

    assert!(run_cmd(&home, &["init"]).status.success());
    let first = fs::read_to_string(config_path(&home)).expect("read config after first init");

    assert!(run_cmd(&home, &["init"]).status.success());
    let second = fs::read_to_string(config_path(&home)).expect("read config after second init");

    assert_eq!(first, second);
}

#[test]
fn report_without_credentials_fails() {
    let home = TempDir::new().expect("temp home");
    write_config(&home, "http://127.0.0.1:9");
    let output = run_cmd(&home, &["--no-notify"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No aws-access-key-id found"));
    assert!(output.stdout.is_empty());
}

#[test]
fn invalid_period_type_is_a_config_error() {
    let home = TempDir::new().expect("temp home");
    assert!(run_cmd(&home, &["init"]).status.success());
    let raw = fs::read_to_string(config_path(&home)).expect("read config");
    fs::write(
        config_path(&home),
        raw.replace(r#"period_type = "m""#, r#"period_type = "w""#),
    )
    .expect("write config");

    let output = run_with_aws(&home, &["report", "--no-notify"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unsupported period type 'w'"));
}

#[test]
fn fresh_init_requires_credit_figures() {
    let home = TempDir::new().expect("temp home");
    assert!(run_cmd(&home, &["init"]).status.success());

    let output = run_with_aws(&home, &["--no-notify"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("credits.total_available is required"));
}

#[test]
fn report_without_offset_fails_before_fetching() {
    let server = MockServer::start();
    let any = server.mock(|when, then| {
        when.method(POST);
        then.status(200).json_body(json!({ "ResultsByTime": [] }));
    });

    let home = TempDir::new().expect("temp home");
    write_config(&home, &server.base_url());
    let raw = fs::read_to_string(config_path(&home)).expect("read config");
    fs::write(
        config_path(&home),
        raw.replace("manual_offset = \"-25.01\"\n", ""),
    )
    .expect("write config");

    let output = run_with_aws(&home, &["--no-notify"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("credits.manual_offset is required"));
    assert!(output.stdout.is_empty());
    any.assert_hits(0);
}

#[test]
fn set_secret_rejects_unknown_name() {
    let home = TempDir::new().expect("temp home");
    let output = run_cmd(&home, &["set-secret", "password", "--value", "hunter2"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unknown secret"));
}

#[test]
fn export_rejects_unknown_format() {
    let home = TempDir::new().expect("temp home");
    let output = run_cmd(&home, &["export", "--format", "csv"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unsupported export format"));
}

#[test]
fn report_prints_reconciled_credits() {
    let server = MockServer::start();
    mock_cost_explorer(&server);

    let home = TempDir::new().expect("temp home");
    write_config(&home, &server.base_url());

    let output = run_with_aws(&home, &["--no-notify"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage Cost:        USD 100.00"));
    assert!(stdout.contains("Credits Applied:   USD 100.00"));
    assert!(stdout.contains("Manual Offset:       USD -25.01"));
    assert!(stdout.contains("Used (adjusted):     USD 74.99"));
    assert!(stdout.contains("Remaining:           USD 4925.01"));
    assert!(stdout.contains("Amazon Elastic Compute Cloud - Compute"));
    assert!(stdout.contains("HEALTHY"));
}

#[test]
fn export_json_outputs_report_and_credits() {
    let server = MockServer::start();
    mock_cost_explorer(&server);

    let home = TempDir::new().expect("temp home");
    write_config(&home, &server.base_url());

    let output = run_with_aws(&home, &["export", "--format", "json"]);
    assert!(output.status.success());

    let parsed: Value = serde_json::from_slice(&output.stdout).expect("valid json output");
    let decimal = |v: &Value| {
        Decimal::from_str(v.as_str().expect("decimal serialized as string")).expect("decimal")
    };
    assert_eq!(decimal(&parsed["report"]["total_cost"]), Decimal::new(100, 0));
    assert_eq!(parsed["report"]["currency"], "USD");
    assert_eq!(decimal(&parsed["credits"]["remaining"]), Decimal::new(492_501, 2));
    assert_eq!(decimal(&parsed["credits"]["monthly_burn"]), Decimal::new(100, 0));
    assert_eq!(parsed["credits"]["status"], "HEALTHY");
    assert_eq!(
        parsed["report"]["daily_trend"].as_array().map(Vec::len),
        Some(7)
    );
}
