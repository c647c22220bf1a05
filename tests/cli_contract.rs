#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use assert_cmd::Command;
use predicates::str::contains;
use serde_json::Value;
use std::path::Path;

fn erpswarm(dir: &Path) -> Command {
    let mut command = Command::cargo_bin("erpswarm").unwrap();
    command
        .current_dir(dir)
        .env_remove("ERP_URL")
        .env_remove("ERP_DB")
        .env_remove("ERP_USER")
        .env_remove("ERP_PASSWORD")
        .env_remove("RUST_LOG");
    command
}

fn parse_json_stdout(output: &[u8]) -> Value {
    let raw = String::from_utf8_lossy(output).trim().to_string();
    serde_json::from_str(&raw).unwrap_or_else(|err| panic!("stdout is not JSON ({err}): {raw}"))
}

fn write_signals(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("signals.json");
    std::fs::write(
        &path,
        r#"{"signals": {"sales": 2, "inventory": 1, "integration": 1},
            "evidence": {"sales": ["Quotes are sent by email today"]}}"#,
    )
    .unwrap();
    path
}

#[test]
fn given_providers_command_when_invoked_then_catalog_is_listed() {
    let dir = tempfile::tempdir().unwrap();
    erpswarm(dir.path())
        .arg("providers")
        .assert()
        .success()
        .stdout(contains("skysize"))
        .stdout(contains("(recommended)"))
        .stdout(contains("https://render.com"));
}

#[test]
fn given_json_output_when_listing_providers_then_envelope_carries_payload() {
    let dir = tempfile::tempdir().unwrap();
    let assert = erpswarm(dir.path())
        .args(["--output", "json", "providers"])
        .assert()
        .success();

    let json = parse_json_stdout(&assert.get_output().stdout);
    assert_eq!(json["command"], "providers");
    assert_eq!(json["status"], "ok");
    assert_eq!(json["payload"]["providers"].as_array().map(Vec::len), Some(4));
}

#[test]
fn given_signal_file_when_deciding_with_out_dir_then_plan_artifacts_are_written() {
    let dir = tempfile::tempdir().unwrap();
    let signals = write_signals(dir.path());
    let out = dir.path().join("plan");

    erpswarm(dir.path())
        .arg("decide")
        .arg(&signals)
        .arg("--out-dir")
        .arg(&out)
        .args(["--company", "Acme Trading"])
        .assert()
        .success()
        .stdout(contains("# Implementation Summary - Acme Trading"))
        .stdout(contains("## Risks / Flags"));

    for name in [
        "module_plan.json",
        "config_tasks.json",
        "implementation_summary.md",
        "target_spec.json",
    ] {
        assert!(out.join(name).exists(), "{name} was not written");
    }
    let spec: Value =
        serde_json::from_str(&std::fs::read_to_string(out.join("target_spec.json")).unwrap())
            .unwrap();
    assert_eq!(spec["company"]["name"], "Acme Trading");
    assert_eq!(spec["modules"][0]["key"], "base");
}

#[test]
fn given_written_plan_when_ordering_and_dry_running_then_base_comes_first() {
    let dir = tempfile::tempdir().unwrap();
    let signals = write_signals(dir.path());
    let out = dir.path().join("plan");
    erpswarm(dir.path())
        .arg("decide")
        .arg(&signals)
        .arg("--out-dir")
        .arg(&out)
        .assert()
        .success();
    let plan = out.join("module_plan.json");

    erpswarm(dir.path())
        .arg("order")
        .arg(&plan)
        .assert()
        .success()
        .stdout(predicates::str::starts_with("  1. base"));

    let assert = erpswarm(dir.path())
        .args(["--output", "json", "apply", "--dry-run"])
        .arg(&plan)
        .assert()
        .success();
    let json = parse_json_stdout(&assert.get_output().stdout);
    let report = &json["payload"]["report"];
    assert_eq!(report["dry_run"], true);
    assert_eq!(report["install_order"][0], "base");
    assert!(report["results"]
        .as_array()
        .unwrap()
        .iter()
        .all(|result| result["status"] == "dry_run"));
}

#[test]
fn given_missing_signal_file_when_deciding_then_config_exit_code_is_returned() {
    let dir = tempfile::tempdir().unwrap();
    erpswarm(dir.path())
        .args(["decide", "missing.json"])
        .assert()
        .code(2)
        .stderr(contains("Cannot read signal file"));
}

#[test]
fn given_unknown_tier_when_deciding_then_config_exit_code_is_returned() {
    let dir = tempfile::tempdir().unwrap();
    let signals = write_signals(dir.path());
    erpswarm(dir.path())
        .arg("decide")
        .arg(&signals)
        .args(["--tier", "platinum"])
        .assert()
        .code(2)
        .stderr(contains("Unknown tier: platinum"));
}

#[test]
fn given_json_output_when_command_fails_then_error_envelope_is_printed() {
    let dir = tempfile::tempdir().unwrap();
    let assert = erpswarm(dir.path())
        .args(["--output", "json", "order", "missing.json"])
        .assert()
        .code(2);

    let json = parse_json_stdout(&assert.get_output().stdout);
    assert_eq!(json["status"], "error");
    assert_eq!(json["error"]["code"], "INVALID");
}

#[test]
fn given_apply_without_url_when_invoked_then_config_exit_code_is_returned() {
    let dir = tempfile::tempdir().unwrap();
    let signals = write_signals(dir.path());
    let out = dir.path().join("plan");
    erpswarm(dir.path())
        .arg("decide")
        .arg(&signals)
        .arg("--out-dir")
        .arg(&out)
        .assert()
        .success();

    erpswarm(dir.path())
        .arg("apply")
        .arg(out.join("module_plan.json"))
        .assert()
        .code(2)
        .stderr(contains("--url or ERP_URL is required"));
}

#[test]
fn given_unknown_deploy_target_when_building_then_config_exit_code_is_returned() {
    let dir = tempfile::tempdir().unwrap();
    let spec = dir.path().join("target_spec.json");
    std::fs::write(&spec, r#"{"spec_id": "spec-1", "company": {"name": "Acme"}}"#).unwrap();

    erpswarm(dir.path())
        .arg("build")
        .arg(&spec)
        .args(["--target", "mainframe"])
        .assert()
        .code(2)
        .stderr(contains("Invalid deploy target: mainframe"));
}
