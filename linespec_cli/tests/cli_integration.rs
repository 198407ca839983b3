use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

// Build a minimal valid TOML config for the simulated camera
fn write_valid_config(dir: &tempfile::TempDir) -> PathBuf {
    let toml = r#"
[device]
serial = "SIM0001"
alias = "cli"
pixel_count = 256
initial_it_ms = 2.5

[acquisition]
max_cycles_per_call = 10
cycle_timeout_ms = 500

[recovery]
# keep the ladder fast; the CLI sleeps for real
abort_settle_ms = 5
settle_ms = 5
reconnect_settle_ms = 5
reset_settle_ms = 5
retry_delay_ms = 5

[timeouts]
connect_settle_ms = 5

[performance]
it_ms_list = [2.5, 5.0]
cycles_list = [1, 10]
"#;
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["measure", "--cycles", "5"], 0, "measurement complete: 5 cycles", "stdout")]
#[case(&["measure"], 2, "required", "stderr")]
#[case(&["measure", "--cycles", "0"], 1, "cycle count must be at least 1", "stderr")]
#[case(&["measure", "--cycles", "3", "--it-ms", "5000"], 1, "outside", "stderr")]
#[case(&["timing", "--it-ms", "2.4"], 0, "start pulse high/low (clk): 23952 / 200", "stdout")]
#[case(&["timing", "--it-ms", "0.001"], 0, "status: limited", "stdout")]
#[case(&["sensor", "--name", "detector"], 0, "detector: 25.12 C", "stdout")]
#[case(&["sensor", "--name", "board-analog"], 0, "board_analog: 31.40 C", "stdout")]
#[case(&["recover"], 0, "recovered: soft", "stdout")]
#[case(&["self-check"], 0, "OK", "stdout")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let mut cmd = Command::cargo_bin("linespec").unwrap();

    // Always include a valid config to avoid relying on default path
    cmd.arg("--config").arg(&cfg).arg("--log-level").arg("error");

    for a in args {
        cmd.arg(a);
    }

    let assert = cmd.assert().code(exit_code);

    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        "stderr" => {
            assert.stderr(predicate::str::contains(needle));
        }
        other => panic!("unknown stream: {other}"),
    }
}

#[rstest]
fn cli_reports_missing_config_file() {
    let dir = tempdir().unwrap();
    let mut cmd = Command::cargo_bin("linespec").unwrap();
    cmd.arg("--config")
        .arg(dir.path().join("nope.toml"))
        .arg("self-check");

    cmd.assert()
        .code(1)
        .stderr(predicate::str::contains("config file could not be read"));
}

#[rstest]
fn cli_reports_invalid_config() {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("cfg.toml");
    fs::write(&cfg, "[device]\nserial = \"\"\n").unwrap();

    let mut cmd = Command::cargo_bin("linespec").unwrap();
    cmd.arg("--config").arg(&cfg).arg("self-check");

    cmd.assert()
        .code(1)
        .stderr(predicate::str::contains("device.serial must not be empty"));
}

#[rstest]
fn cli_reports_schema_errors() {
    let dir = tempdir().unwrap();
    let cfg = dir.path().join("cfg.toml");
    fs::write(&cfg, "[acquisition]\nmax_cycles_per_call = 10\n").unwrap();

    let mut cmd = Command::cargo_bin("linespec").unwrap();
    cmd.arg("--config").arg(&cfg).arg("timing").arg("--it-ms").arg("5");

    cmd.assert()
        .code(1)
        .stderr(predicate::str::contains("not valid TOML"))
        .stderr(predicate::str::contains("device"));
}

#[rstest]
fn measure_writes_spectrum_file() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let out = dir.path().join("spectrum.json");

    let mut cmd = Command::cargo_bin("linespec").unwrap();
    cmd.arg("--config")
        .arg(&cfg)
        .arg("--log-level")
        .arg("error")
        .arg("measure")
        .arg("--cycles")
        .arg("4")
        .arg("--output")
        .arg(&out);
    cmd.assert().success();

    let v: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(v["cycles"].as_u64(), Some(4));
    for key in ["mean", "std", "line_rms"] {
        assert_eq!(v[key].as_array().map(Vec::len), Some(256), "{key}");
    }
    // simulated peak sits in the middle of the line, well above the baseline
    let mean = v["mean"].as_array().unwrap();
    let centre = mean[128].as_f64().unwrap();
    let edge = mean[0].as_f64().unwrap();
    assert!(centre > edge + 100.0, "centre {centre} edge {edge}");
}

#[rstest]
fn measure_stats_go_to_stderr() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let mut cmd = Command::cargo_bin("linespec").unwrap();
    cmd.arg("--config")
        .arg(&cfg)
        .arg("--log-level")
        .arg("error")
        .arg("measure")
        .arg("--cycles")
        .arg("25")
        .arg("--stats");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("measurement complete: 25 cycles"))
        .stderr(predicate::str::contains("Packs: 3"))
        .stderr(predicate::str::contains("Cycle delay mean/median (ms)"));
}

#[rstest]
fn perf_sweeps_the_configured_grid() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let mut cmd = Command::cargo_bin("linespec").unwrap();
    cmd.arg("--config")
        .arg(&cfg)
        .arg("--log-level")
        .arg("error")
        .arg("perf");

    let out = cmd.assert().success().get_output().stdout.clone();
    let stdout = String::from_utf8_lossy(&out);
    // header plus 2 x 2 grid points
    assert_eq!(stdout.lines().count(), 5, "stdout was: {stdout}");
    assert!(stdout.lines().next().unwrap().contains("cdt_median"));
}
