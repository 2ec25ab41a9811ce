use assert_cmd::Command;
use predicates::prelude::*;

fn run_cmd(data_dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("fleet-poller").unwrap();
    cmd.env("FP_DATA_DIR", data_dir).env("FP_TEMP_DIR", data_dir).arg("run");
    cmd
}

#[test]
fn run_without_config_fails() {
    let tempdir = tempfile::tempdir().unwrap();

    run_cmd(tempdir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("no config found"));
}

#[test]
fn run_without_transport_fails() {
    let tempdir = tempfile::tempdir().unwrap();
    let config = tempdir.path().join("fleet.json");
    std::fs::write(
        &config,
        r#"{"devices": [{"id": "IVT_001", "protocol": {"category": "ess"},
            "connection": {"type": "socket", "port": 9000}}]}"#,
    )
    .unwrap();

    run_cmd(tempdir.path())
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no device transport available"));
}

#[test]
fn run_with_invalid_config_file_fails() {
    let tempdir = tempfile::tempdir().unwrap();
    let config = tempdir.path().join("fleet.json");
    std::fs::write(&config, r#"{"schedule": {"intervalSecs": 0}}"#).unwrap();

    run_cmd(tempdir.path())
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("intervalSecs must be greater than zero"));
}
