use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn test_cli_version() {
    let mut cmd = Command::new(cargo_bin!("paygate"));
    cmd.arg("--version");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_active_prints_header_when_empty() {
    let mut cmd = Command::new(cargo_bin!("paygate"));
    cmd.arg("active");

    cmd.assert().success().stdout(predicate::str::starts_with(
        "index,account,status,amount,currency,amount_in_currency,state,created_at",
    ));
}

#[test]
fn test_serve_requires_seed() {
    let mut cmd = Command::new(cargo_bin!("paygate"));
    cmd.arg("serve")
        .env_remove("PAYGATE_SEED")
        .env("PAYGATE_TOKEN_SECRET", "secret");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--seed"));
}

#[test]
fn test_serve_rejects_bad_seed() {
    let mut cmd = Command::new(cargo_bin!("paygate"));
    cmd.arg("serve")
        .env("PAYGATE_SEED", "not-hex")
        .env("PAYGATE_TOKEN_SECRET", "secret");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("invalid input"));
}

#[test]
fn test_serve_rejects_inconsistent_intervals() {
    let mut cmd = Command::new(cargo_bin!("paygate"));
    cmd.arg("serve")
        .env("PAYGATE_SEED", "11".repeat(32))
        .env("PAYGATE_TOKEN_SECRET", "secret")
        .args(["--check-interval-ms", "5000", "--max-check-interval-ms", "100"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("max check interval"));
}
