//! Smoke tests -- verify the binary runs and its subcommands parse.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_cli_help() {
    Command::cargo_bin("alveo-serve")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("FPGA-accelerated model"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("alveo-serve")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("alveo-serve"));
}

#[test]
fn test_serve_subcommand_exists() {
    Command::cargo_bin("alveo-serve")
        .unwrap()
        .args(["serve", "--help"])
        .assert()
        .success()
        .stdout(predicates::str::contains("--capacity"));
}

#[test]
fn test_infer_requires_input() {
    Command::cargo_bin("alveo-serve")
        .unwrap()
        .arg("infer")
        .assert()
        .failure()
        .stderr(predicates::str::contains("--input"));
}

#[test]
fn test_show_config_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("alveo-serve.toml");
    std::fs::write(&path, "[network]\nlisten_address = \"127.0.0.1:9000\"\n").unwrap();

    Command::cargo_bin("alveo-serve")
        .unwrap()
        .args(["show-config", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(
            predicates::str::contains("127.0.0.1:9000")
                .and(predicates::str::contains("facile"))
                .and(predicates::str::contains("alveo_hls4ml")),
        );
}

#[test]
fn test_show_config_rejects_missing_file() {
    Command::cargo_bin("alveo-serve")
        .unwrap()
        .args(["show-config", "--config", "/nonexistent/alveo-serve.toml"])
        .assert()
        .failure();
}

#[test]
fn test_serve_fails_without_kernel_image() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("alveo-serve")
        .unwrap()
        .current_dir(dir.path())
        .env_remove("ALVEO_SERVE_CONFIG")
        .args(["serve", "--listen", "127.0.0.1:0", "--capacity", "8"])
        .arg(dir.path().join("missing.xclbin"))
        .assert()
        .failure()
        .stderr(predicates::str::contains("kernel image"));
}

#[test]
fn test_status_fails_without_server() {
    // Bind then drop to get a port nothing listens on.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    Command::cargo_bin("alveo-serve")
        .unwrap()
        .args(["status", "--addr", &format!("127.0.0.1:{}", port)])
        .assert()
        .failure()
        .stderr(predicates::str::contains("failed to connect"));
}
