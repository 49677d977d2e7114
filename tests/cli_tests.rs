use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

fn asc() -> Command {
    let mut cmd = Command::cargo_bin("asc").unwrap();
    for var in [
        "ASC_ISSUER_ID",
        "ASC_KEY_ID",
        "ASC_PRIVATE_KEY",
        "ASC_PRIVATE_KEY_PATH",
        "ASC_BASE_URL",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn prints_help() {
    let mut cmd = asc();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("App Store Connect CLI in Rust"));
}

#[test]
fn missing_credentials_exit_with_config_code() {
    let mut cmd = asc();
    cmd.args(["apps", "list"]);
    cmd.assert()
        .code(2)
        .stderr(predicate::str::contains("ASC_ISSUER_ID"));
}

#[test]
fn limit_outside_range_is_rejected_by_parser() {
    let mut cmd = asc();
    cmd.args(["apps", "list", "--limit", "500"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("between 1 and 200"));
}

#[test]
fn unreadable_key_file_is_a_config_error() {
    let mut cmd = asc();
    cmd.env("ASC_ISSUER_ID", "issuer-1")
        .env("ASC_KEY_ID", "KEY123")
        .env("ASC_PRIVATE_KEY_PATH", "/definitely/not/here.p8")
        .arg("token");
    cmd.assert()
        .code(2)
        .stderr(predicate::str::contains("cannot read private key"));
}
