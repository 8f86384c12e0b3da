//! Scenario: operator flow through the `tg` binary.
//!
//! GREEN when:
//! - `risk evaluate --token-out` approves a SWING idea and writes a token file
//! - `gate redeem` with that file is ALLOWED (exit 0); the same file a
//!   second time is BLOCKED TOKEN_REUSE (exit 2) via the on-disk marker
//! - `audit verify` reports an intact two-line chain and `audit stats` counts
//!   both attempts
//! - a token file edited to raise `max_risk` is BLOCKED TOKEN_UNRECOGNIZED
//!   (exit 2) and the unedited file still redeems
//! - a denied evaluation and a refused lockdown reset exit 2
//! - an accepted lockdown reset is still in force for the next invocation
//! - TG_CONFIG stands in for `--config`

use assert_cmd::Command;
use predicates::str::contains;
use std::fs;
use std::path::Path;

const SESSION_YAML: &str = r#"
session:
  session_id: "desk-1"
  mode: "SWING"
  account_equity: 1000000
storage:
  state_dir: "state"
"#;

fn tg(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("tg").unwrap();
    cmd.current_dir(dir)
        .env_remove("TG_CONFIG")
        .env("RUST_LOG", "warn");
    cmd
}

#[test]
fn evaluate_redeem_reuse_and_audit() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("session.yaml"), SESSION_YAML).unwrap();

    tg(dir.path())
        .args([
            "--config",
            "session.yaml",
            "risk",
            "evaluate",
            "--symbol",
            "NIFTY",
            "--scenario",
            "A",
            "--probability",
            "0.8",
            "--alignment",
            "FULL",
            "--token-out",
            "token.json",
        ])
        .assert()
        .success()
        .stdout(contains("Allocated 0.40% risk for NIFTY (A)"));
    assert!(dir.path().join("token.json").is_file());

    let redeem = [
        "--config",
        "session.yaml",
        "gate",
        "redeem",
        "--token",
        "token.json",
        "--scenario",
        "A",
        "--prob-a",
        "0.8",
        "--prob-b",
        "0.15",
        "--prob-c",
        "0.05",
        "--alignment",
        "FULL",
        "--risk",
        "1000",
    ];
    tg(dir.path())
        .args(redeem)
        .assert()
        .success()
        .stdout(contains("ALL_CHECKS_PASSED"));
    tg(dir.path())
        .args(redeem)
        .assert()
        .code(2)
        .stdout(contains("TOKEN_REUSE"));

    tg(dir.path())
        .args(["--config", "session.yaml", "audit", "verify"])
        .assert()
        .success()
        .stdout(contains("\"lines\": 2"));
    tg(dir.path())
        .args(["--config", "session.yaml", "audit", "stats"])
        .assert()
        .success()
        .stdout(contains("\"total_attempts\": 2"))
        .stdout(contains("\"TOKEN_REUSE\": 1"));
}

#[test]
fn edited_token_file_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("session.yaml"), SESSION_YAML).unwrap();

    tg(dir.path())
        .args([
            "--config",
            "session.yaml",
            "risk",
            "evaluate",
            "--symbol",
            "NIFTY",
            "--scenario",
            "A",
            "--probability",
            "0.8",
            "--alignment",
            "FULL",
            "--token-out",
            "token.json",
        ])
        .assert()
        .success();

    let mut record: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("token.json")).unwrap()).unwrap();
    record["max_risk"] = serde_json::json!(1e9);
    fs::write(
        dir.path().join("edited.json"),
        serde_json::to_string_pretty(&record).unwrap(),
    )
    .unwrap();

    let redeem = |file: &str, risk: &str| {
        tg(dir.path())
            .args([
                "--config",
                "session.yaml",
                "gate",
                "redeem",
                "--token",
                file,
                "--scenario",
                "A",
                "--prob-a",
                "0.8",
                "--prob-b",
                "0.15",
                "--prob-c",
                "0.05",
                "--alignment",
                "FULL",
                "--risk",
                risk,
            ])
            .assert()
    };
    redeem("edited.json", "500000000")
        .code(2)
        .stdout(contains("TOKEN_UNRECOGNIZED"));
    redeem("token.json", "1000")
        .success()
        .stdout(contains("ALL_CHECKS_PASSED"));
}

#[test]
fn lockdown_reset_holds_across_invocations() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("session.yaml"), SESSION_YAML).unwrap();
    let run = |args: &[&str]| {
        let mut cmd = tg(dir.path());
        cmd.args(["--config", "session.yaml"]).args(args);
        cmd.assert()
    };

    for _ in 0..5 {
        run(&["risk", "record-outcome", "--symbol", "TCS", "--pnl", "-5000"]).success();
    }
    run(&["risk", "status"])
        .success()
        .stdout(contains("\"system_state\": \"LOCKDOWN\""));

    run(&["risk", "reset-lockdown", "--code", "RESET_ACKNOWLEDGED"])
        .success()
        .stdout(contains("\"accepted\": true"));

    run(&["risk", "status"])
        .success()
        .stdout(contains("\"system_state\": \"OPERATIONAL\""))
        .stdout(contains("\"loss_streak\": 0"))
        .stdout(contains("\"daily_realized_pnl\": 0.0"));
}

#[test]
fn refusals_exit_2_and_env_config_works() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("session.yaml"), SESSION_YAML).unwrap();

    tg(dir.path())
        .env("TG_CONFIG", "session.yaml")
        .args([
            "risk",
            "evaluate",
            "--symbol",
            "TCS",
            "--scenario",
            "B",
            "--probability",
            "0.9",
            "--alignment",
            "CONFLICT",
        ])
        .assert()
        .code(2)
        .stdout(contains("ALIGNMENT_FORBIDDEN"));

    tg(dir.path())
        .env("TG_CONFIG", "session.yaml")
        .args(["risk", "reset-lockdown", "--code", "RESET_ACKNOWLEDGED"])
        .assert()
        .code(2)
        .stdout(contains("\"accepted\": false"));

    tg(dir.path())
        .env("TG_CONFIG", "session.yaml")
        .args(["risk", "record-outcome", "--symbol", "TCS", "--pnl", "-2500"])
        .assert()
        .success()
        .stdout(contains("\"loss_streak\": 1"));

    tg(dir.path())
        .env("TG_CONFIG", "session.yaml")
        .args(["risk", "status"])
        .assert()
        .success()
        .stdout(contains("\"system_state\": \"OPERATIONAL\""))
        .stdout(contains("\"loss_streak\": 1"));
}

#[test]
fn config_hash_prints_hash_and_canonical_json() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("session.yaml"), SESSION_YAML).unwrap();
    tg(dir.path())
        .args(["config-hash", "session.yaml"])
        .assert()
        .success()
        .stdout(contains("config_hash="))
        .stdout(contains("\"account_equity\":1000000"));
}
