use assert_cmd::Command;
use std::io::Write;

fn gateway() -> Command {
    Command::cargo_bin("natap-gateway").unwrap()
}

#[test]
fn test_help_lists_overrides() {
    let output = gateway().arg("--help").output().unwrap();
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    for flag in ["--config", "--ap-ip", "--downlink", "--uplink", "--poll-interval", "--dry-run"] {
        assert!(text.contains(flag), "missing {flag} in help");
    }
}

#[test]
fn test_invalid_config_exits_nonzero() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[access_point]\npassword = \"short\"").unwrap();

    gateway()
        .arg("--config")
        .arg(file.path())
        .arg("--dry-run")
        .assert()
        .failure();
}

#[test]
fn test_missing_uplink_is_fatal_in_dry_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(
        &config,
        format!(
            "[interfaces]\ndownlink = \"natap-t-ap\"\nuplink = \"natap-t-none\"\n\n[gateway]\nruntime_dir = \"{}\"\n",
            dir.path().display()
        ),
    )
    .unwrap();

    gateway()
        .arg("--config")
        .arg(&config)
        .arg("--dry-run")
        .env("RUST_LOG", "error")
        .assert()
        .failure();
}
