use std::time::Duration;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use crate::common::*;

const REGISTRY: &str = "services:\n  - name: notes\n    repo: acme/notes\n";

fn fleetvisor(home: &TempDir, port: u16) -> Command {
    let mut cmd = Command::cargo_bin("fleetvisor").unwrap();
    cmd.env("FLEETVISOR_HOME", home.path())
        .env("FLEETVISOR_PORT", port.to_string())
        .env("FLEETVISOR_REGISTRY_URL", "http://127.0.0.1:9/registry.yaml");
    cmd
}

/// Home with a cached catalog so the daemon never needs the network.
fn seeded_home() -> TempDir {
    let home = TempDir::new().unwrap();
    let state = home.path().join("state");
    std::fs::create_dir_all(&state).unwrap();
    std::fs::write(state.join("registry.yaml"), REGISTRY).unwrap();
    home
}

fn spawn_daemon(home: &TempDir, port: u16) -> tokio::process::Child {
    tokio::process::Command::new(env!("CARGO_BIN_EXE_fleetvisor"))
        .env("FLEETVISOR_HOME", home.path())
        .env("FLEETVISOR_PORT", port.to_string())
        .env("FLEETVISOR_REGISTRY_URL", "http://127.0.0.1:9/registry.yaml")
        .kill_on_drop(true)
        .spawn()
        .expect("failed to start fleetvisor")
}

async fn interrupt(mut child: tokio::process::Child) -> std::process::ExitStatus {
    let pid = child.id().unwrap();
    nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(pid as i32),
        nix::sys::signal::Signal::SIGINT,
    )
    .ok();
    tokio::time::timeout(Duration::from_secs(15), child.wait())
        .await
        .expect("fleetvisor did not exit in time")
        .expect("failed to wait on fleetvisor")
}

#[test]
fn version_and_health() {
    Command::cargo_bin("fleetvisor")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("fleetvisor v"));
    Command::cargo_bin("fleetvisor")
        .unwrap()
        .arg("-V")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("fleetvisor v"));
    Command::cargo_bin("fleetvisor")
        .unwrap()
        .arg("--health")
        .assert()
        .success()
        .stdout("OK\n");
}

#[test]
fn service_command_without_daemon() {
    let home = TempDir::new().unwrap();
    let port = free_port();
    fleetvisor(&home, port)
        .args(["--service-start", "notes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(format!(
            "fleetvisor not running (port {port})"
        )));
}

#[test]
fn service_flag_requires_a_name() {
    Command::cargo_bin("fleetvisor")
        .unwrap()
        .arg("--service-stop")
        .assert()
        .failure();
}

#[tokio::test]
async fn daemon_answers_control_commands() {
    let home = seeded_home();
    let port = free_port();
    let daemon = spawn_daemon(&home, port);
    assert!(
        wait_for_port(port, Duration::from_secs(10)).await,
        "control API did not come up on port {port}"
    );

    fleetvisor(&home, port)
        .args(["--service-stop", "notes"])
        .assert()
        .success()
        .stdout("stopped\n");
    fleetvisor(&home, port)
        .args(["--service-start", "notes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error: service not installed: notes"));

    // A second instance on the same home is refused by the lock.
    fleetvisor(&home, free_port())
        .assert()
        .failure()
        .stderr(predicate::str::contains("already running"));

    interrupt(daemon).await;
    let state = std::fs::read_to_string(home.path().join("state/state.json")).unwrap();
    let v: serde_json::Value = serde_json::from_str(&state).unwrap();
    assert_eq!(v["running_services"], serde_json::json!([]));
}

#[tokio::test]
async fn daemon_removes_stale_sidecars() {
    let home = seeded_home();
    let service_dir = home.path().join("services/notes");
    std::fs::create_dir_all(&service_dir).unwrap();
    let sidecar = service_dir.join("notes.old");
    std::fs::write(&sidecar, "stale").unwrap();

    let port = free_port();
    let daemon = spawn_daemon(&home, port);
    assert!(wait_for_port(port, Duration::from_secs(10)).await);
    assert!(!sidecar.exists());
    interrupt(daemon).await;
}
