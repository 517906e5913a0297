//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("simmflash");
    cmd.env_remove("SIMMFLASH_PORT")
        .env_remove("SIMMFLASH_CAPACITY")
        .env_remove("SIMMFLASH_CHIP_TYPE")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("simmflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("simmflash"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn help_lists_subcommands() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("write")
                .and(predicate::str::contains("read"))
                .and(predicate::str::contains("identify"))
                .and(predicate::str::contains("firmware")),
        );
}

#[test]
fn list_ports_json_returns_valid_json() {
    let dir = tempdir().expect("tempdir should be created");
    let output = cli_cmd()
        .current_dir(dir.path())
        .args(["list-ports", "--json"])
        .output()
        .expect("command should execute");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).expect("stdout should be JSON");
    assert_eq!(parsed["ok"], true);
    assert!(parsed["data"]["ports"].is_array());
}

#[test]
fn completions_command_writes_to_stdout() {
    let mut cmd = cli_cmd();
    cmd.args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("simmflash"));
}

// ============================================================================
// Exit Code Tests
// ============================================================================

#[test]
fn exit_code_two_for_usage_error_unknown_command() {
    let mut cmd = cli_cmd();
    cmd.arg("frobnicate")
        .assert()
        .code(2)
        .stdout(predicate::str::is_empty());
}

#[test]
fn exit_code_two_for_usage_error_invalid_flag() {
    let mut cmd = cli_cmd();
    cmd.args(["read", "out.bin", "--no-such-flag"])
        .assert()
        .code(2);
}

#[test]
fn exit_code_two_for_missing_write_image() {
    let mut cmd = cli_cmd();
    cmd.arg("write").assert().code(2);
}

#[test]
fn exit_code_two_for_bad_chip_position() {
    let mut cmd = cli_cmd();
    cmd.args(["write", "--chip", "7=rom.bin"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("chip position"));
}

#[test]
fn exit_code_two_for_bad_chip_mask() {
    let dir = tempdir().expect("tempdir should be created");
    let image = dir.path().join("rom.bin");
    fs::write(&image, [0xFFu8; 16]).expect("write image");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("write")
        .arg(&image)
        .args(["--chips", "0x10"])
        .assert()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("chip mask"));
}

#[test]
fn exit_code_three_for_bad_capacity() {
    let dir = tempdir().expect("tempdir should be created");
    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["--capacity", "lots", "read", "out.bin"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("capacity"));
    assert!(!dir.path().join("out.bin").exists());
}

#[test]
fn exit_code_three_for_bad_chip_type_from_env() {
    let dir = tempdir().expect("tempdir should be created");
    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .env("SIMMFLASH_CHIP_TYPE", "dip32")
        .arg("identify")
        .assert()
        .code(3);
}

#[test]
fn exit_code_three_for_bad_verify_mode() {
    let dir = tempdir().expect("tempdir should be created");
    let image = dir.path().join("rom.bin");
    fs::write(&image, [0xFFu8; 16]).expect("write image");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("write")
        .arg(&image)
        .args(["--verify", "sometimes"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("verify mode"));
}

#[test]
fn invalid_config_file_warns_and_continues() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(dir.path().join("simmflash.toml"), "invalid toml [[[").expect("write config");

    let output = cli_cmd()
        .current_dir(dir.path())
        .args(["list-ports", "--json"])
        .output()
        .expect("command should execute");

    assert!(output.status.success(), "invalid config is only a warning");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("TOML"), "should warn about invalid TOML");
}

#[test]
fn config_file_values_are_validated() {
    let dir = tempdir().expect("tempdir should be created");
    let config = dir.path().join("custom.toml");
    fs::write(&config, "[simm]\ncapacity = \"huge\"\n").expect("write config");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["read", "out.bin"])
        .assert()
        .code(3);
}

#[test]
fn exit_code_one_for_missing_image() {
    let dir = tempdir().expect("tempdir should be created");
    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .arg("write")
        .arg(dir.path().join("missing.bin"))
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn unopenable_port_fails_the_operation() {
    let dir = tempdir().expect("tempdir should be created");
    let out = dir.path().join("out.bin");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["-p", "INVALID_PORT_NAME_XYZ", "read"])
        .arg(&out)
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Read failed"));
    assert!(!out.exists(), "partial output is removed");
}

// ============================================================================
// Suggestions and output hygiene
// ============================================================================

#[test]
fn unknown_command_suggests_similar() {
    let mut cmd = cli_cmd();
    cmd.arg("idenitfy")
        .assert()
        .failure()
        .stderr(predicate::str::contains("identify"));
}

#[test]
fn colors_disabled_when_not_tty() {
    let output = cli_cmd()
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .clone();

    let stdout = String::from_utf8(output.stdout).expect("stdout should be utf-8");
    assert!(!stdout.contains("\x1b["), "Colors should be disabled in non-TTY mode");
}
