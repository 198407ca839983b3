use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

fn write_valid_config(dir: &tempfile::TempDir) -> PathBuf {
    let toml = r#"
[device]
serial = "SIM0001"
alias = "faults"
pixel_count = 64
initial_it_ms = 2.5

[acquisition]
max_cycles_per_call = 10
cycle_timeout_ms = 200

[recovery]
abort_settle_ms = 5
settle_ms = 5
reconnect_settle_ms = 5
reset_settle_ms = 5
retry_delay_ms = 5

[timeouts]
connect_settle_ms = 5
"#;
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn linespec(cfg: &PathBuf) -> Command {
    let mut cmd = Command::cargo_bin("linespec").unwrap();
    cmd.arg("--config").arg(cfg).arg("--log-level").arg("error");
    cmd
}

#[rstest]
fn unresponsive_device_times_out_on_connect() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    linespec(&cfg)
        .env("LINESPEC_SIM_UNRESPONSIVE", "1")
        .arg("measure")
        .arg("--cycles")
        .arg("3")
        .assert()
        .code(5)
        .stderr(predicate::str::contains(
            "What happened: The camera did not deliver data in time",
        ));
}

#[rstest]
#[case::serial("LINESPEC_SIM_SERIAL", "OTHER01", "SIM0001")]
#[case::geometry("LINESPEC_SIM_PIXELS", "128", "device reports 128 horizontal pixels")]
fn device_mismatch_is_a_configuration_error(
    #[case] key: &str,
    #[case] value: &str,
    #[case] needle: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    linespec(&cfg)
        .env(key, value)
        .arg("self-check")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("device rejected the configuration"))
        .stderr(predicate::str::contains(needle));
}

#[rstest]
fn failing_captures_surface_as_transport_error() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    linespec(&cfg)
        .env("LINESPEC_SIM_FAIL_CAPTURES", "3")
        .arg("measure")
        .arg("--cycles")
        .arg("5")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("transport error"));
}

#[rstest]
fn recover_flag_retries_after_the_ladder() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    linespec(&cfg)
        .env("LINESPEC_SIM_FAIL_CAPTURES", "3")
        .arg("measure")
        .arg("--cycles")
        .arg("5")
        .arg("--recover")
        .assert()
        .success()
        .stdout(predicate::str::contains("measurement complete: 5 cycles"));
}

#[rstest]
fn saturation_keeps_going_when_not_aborting() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let mut text = fs::read_to_string(&cfg).unwrap();
    text = text.replace(
        "max_cycles_per_call = 10",
        "max_cycles_per_call = 10\nabort_on_saturation = false",
    );
    fs::write(&cfg, text).unwrap();

    linespec(&cfg)
        .env("LINESPEC_SIM_SATURATE_AT", "2")
        .arg("measure")
        .arg("--cycles")
        .arg("6")
        .assert()
        .success()
        .stdout(predicate::str::contains("saturated cycles 1"));
}
