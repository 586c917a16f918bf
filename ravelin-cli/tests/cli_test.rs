#![allow(deprecated)] // Command::cargo_bin — macro alternative requires same-package binary

use assert_cmd::Command;
use predicates::str::contains;

fn ravelin_cmd() -> Command {
    let mut cmd = Command::cargo_bin("ravelin").unwrap();
    cmd.env_remove("RAVELIN_CACHE_DIR")
        .env_remove("RAVELIN_CONFIG")
        .env_remove("RAVELIN_API_KEY")
        .env_remove("RAVELIN_FAILOVER_BEHAVIOR")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn hash_ignores_trailing_slash_and_case() {
    let expected = format!("{}\n", ravelin::server_hash("http://Primary:8080"));

    ravelin_cmd()
        .args(["hash", "--url", "http://primary:8080/"])
        .assert()
        .success()
        .stdout(expected);
}

#[test]
fn cached_reads_destinations_from_cache_dir() {
    let temp_dir = tempfile::tempdir().unwrap();
    let hash = ravelin::server_hash("http://primary:8080");
    std::fs::write(
        temp_dir
            .path()
            .join(format!("replication-destinations-{}.json", hash)),
        r#"{"Destinations": [{"Url": "http://replica-1:8080", "Database": "Northwind"}]}"#,
    )
    .unwrap();

    let output = ravelin_cmd()
        .args(["cached", "--url", "http://primary:8080"])
        .env("RAVELIN_CACHE_DIR", temp_dir.path())
        .output()
        .unwrap();
    assert!(output.status.success());

    let printed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(printed[0]["Url"], "http://replica-1:8080");
    assert_eq!(printed[0]["Database"], "Northwind");
}

#[test]
fn cached_without_file_prints_empty_list() {
    let temp_dir = tempfile::tempdir().unwrap();

    ravelin_cmd()
        .args(["cached", "--url", "http://primary:8080", "--cache-dir"])
        .arg(temp_dir.path())
        .assert()
        .success()
        .stdout(contains("[]"));
}

#[test]
fn destinations_from_unreachable_server_fails() {
    let temp_dir = tempfile::tempdir().unwrap();
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    ravelin_cmd()
        .args(["destinations", "--url", &format!("http://{}", addr)])
        .arg("--cache-dir")
        .arg(temp_dir.path())
        .assert()
        .failure()
        .code(1)
        .stderr(contains("Could not refresh"));
}

#[test]
fn invalid_failover_behavior_is_rejected() {
    ravelin_cmd()
        .args(["hash", "--url", "http://primary:8080"])
        .env("RAVELIN_FAILOVER_BEHAVIOR", "Sometimes")
        .assert()
        .failure();
}
