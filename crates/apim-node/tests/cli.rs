use assert_cmd::Command;
use predicates::prelude::*;

fn node() -> Command {
    let mut cmd = Command::cargo_bin("apim-node").unwrap();
    cmd.env_remove("APIM_COMMANDS_INTERVAL_MS")
        .env_remove("APIM_COMMANDS_STORE_TIMEOUT_MS")
        .env_remove("APIM_COMMANDS_RECIPIENT");
    cmd
}

#[test]
fn help_lists_node_flags() {
    node()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--node-id"))
        .stdout(predicate::str::contains("--interval-ms"));
}

#[test]
fn zero_interval_fails_at_startup() {
    node()
        .args(["--interval-ms", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("polling interval must be positive"));
}

#[test]
fn unknown_recipient_fails_at_startup() {
    node()
        .args(["--recipient", "PORTAL"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown recipient 'PORTAL'"));
}
