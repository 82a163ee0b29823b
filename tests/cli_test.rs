use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use paypal_gateway::config::{save_settings_to, GatewaySettings};
use predicates::prelude::*;
use std::process::Command;
use tempfile::TempDir;

fn config_dir() -> (TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    let settings = GatewaySettings {
        api_account_name: "merchant_api1.example.com".to_string(),
        currency_code: "EUR".to_string(),
        ..GatewaySettings::default()
    };
    save_settings_to(&path, &settings).unwrap();
    (dir, path)
}

#[test]
fn dry_run_capture_reports_paid() {
    let (_dir, config) = config_dir();

    let mut cmd = Command::new(cargo_bin!("paypal-gateway"));
    cmd.arg("--dry-run")
        .arg("--config")
        .arg(&config)
        .args(["capture", "AUTH1", "19.999"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"Paid\""))
        .stdout(predicate::str::contains("\"Success\""));
}

#[test]
fn dry_run_cancel_recurring_has_no_status() {
    let (_dir, config) = config_dir();

    let mut cmd = Command::new(cargo_bin!("paypal-gateway"));
    cmd.arg("--dry-run")
        .arg("--config")
        .arg(&config)
        .args(["cancel-recurring", "I-123"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"new_payment_status\": null"));
}

#[test]
fn dry_run_verify_ipn_reads_stdin() {
    let (_dir, config) = config_dir();

    let mut cmd = assert_cmd::Command::new(cargo_bin!("paypal-gateway"));
    cmd.arg("--dry-run")
        .arg("--config")
        .arg(&config)
        .args(["verify-ipn", "-"])
        .write_stdin("txn_id=TX1&payment_status=Completed\n");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"verified\": true"))
        .stdout(predicate::str::contains("\"payment_status\": \"Completed\""));
}

#[test]
fn unsupported_currency_is_reported_not_sent() {
    let (_dir, config) = config_dir();

    let mut cmd = Command::new(cargo_bin!("paypal-gateway"));
    cmd.arg("--dry-run")
        .arg("--config")
        .arg(&config)
        .args(["capture", "AUTH1", "10", "--currency", "XYZ"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Unsupported currency code 'XYZ'"));
}

#[test]
fn init_config_writes_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fresh.json");

    let mut cmd = Command::new(cargo_bin!("paypal-gateway"));
    cmd.arg("--config").arg(&path).arg("init-config");
    cmd.assert().success();

    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("\"use_sandbox\": true"));
}

#[test]
fn malformed_default_settings_file_fails_the_run() {
    let home = tempfile::tempdir().unwrap();
    let config_dir = home.path().join("paypal-gateway");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("config.json"),
        r#"{"api_account_name":"live_api1","use_sandbox":false,"#,
    )
    .unwrap();

    let mut cmd = Command::new(cargo_bin!("paypal-gateway"));
    cmd.env("XDG_CONFIG_HOME", home.path())
        .env("HOME", home.path())
        .arg("--dry-run")
        .args(["capture", "AUTH1", "10"]);

    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("Paid").not())
        .stderr(predicate::str::contains("config.json"));
}
