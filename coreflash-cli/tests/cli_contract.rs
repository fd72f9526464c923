//! CLI contract tests.
//!
//! These cover the argument surface only: usage errors, help behavior, and
//! input validation that must fail before any device is touched.

use assert_cmd::Command;
use predicates::prelude::*;

fn coreflash() -> Command {
    let mut cmd = Command::cargo_bin("coreflash").expect("binary builds");
    // Keep port resolution deterministic in CI.
    cmd.env_remove("COREFLASH_PORT");
    cmd.env_remove("COREFLASH_SPEED");
    cmd
}

#[test]
fn no_arguments_prints_usage_and_fails() {
    coreflash()
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Usage:"));
}

#[test]
fn help_exits_nonzero() {
    coreflash()
        .arg("--help")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Usage:"));
}

#[test]
fn usage_flag_behaves_like_help() {
    coreflash()
        .arg("--usage")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("other options:"));
}

#[test]
fn two_actions_are_rejected_with_distinct_message() {
    coreflash()
        .args(["--dump", "--protect"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("only one action is allowed"));
}

#[test]
fn explicit_flash_counts_toward_the_one_action_rule() {
    coreflash()
        .args(["--flash", "--dump", "firmware.hex"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("only one action is allowed"));
}

#[test]
fn zero_actions_are_rejected_with_distinct_message() {
    coreflash()
        .args(["--device", "/dev/ttyUSB0"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("invalid action"));
}

#[test]
fn register_without_parameters_is_invalid() {
    coreflash()
        .args(["--register", "--id", "42"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("invalid action"));
}

#[test]
fn register_rejects_malformed_version_before_device_access() {
    coreflash()
        .args([
            "--register",
            "--id",
            "42",
            "--ver",
            "1.2",
            "--core2",
            "--device",
            "/dev/null",
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("a.b.c"));
}

#[test]
fn register_rejects_all_zero_version() {
    coreflash()
        .args([
            "--register",
            "--id",
            "42",
            "--ver",
            "0.0.0",
            "--core2",
            "--device",
            "/dev/null",
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("0.0.0.0"));
}

#[test]
fn register_rejects_short_key_before_device_access() {
    coreflash()
        .args([
            "--register",
            "--id",
            "42",
            "--ver",
            "1.2.3",
            "--core2",
            "--key",
            "0011",
            "--device",
            "/dev/null",
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("32 hex characters"));
}

#[test]
fn register_rejects_non_hex_key() {
    coreflash()
        .args([
            "--register",
            "--id",
            "42",
            "--ver",
            "1.2.3",
            "--core2",
            "--key",
            "GG112233445566778899AABBCCDDEEFF",
            "--device",
            "/dev/null",
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("key"));
}

#[test]
fn flash_refuses_missing_hex_file() {
    coreflash()
        .args(["--device", "/dev/null", "no_such_file.hex"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("no_such_file.hex"));
}

#[test]
fn soft_flash_without_device_is_invalid() {
    coreflash()
        .args(["--soft", "firmware.hex"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("invalid action"));
}
