use std::os::unix::fs::PermissionsExt;

use fleetvisor::error::FleetError;
use fleetvisor::fleet::ServiceStatus;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::common::*;

const REGISTRY: &str = "
services:
  - name: notes
    repo: acme/notes
    env_vars:
      - name: NOTES_DIR
        default: /tmp/notes
      - name: NOTES_TOKEN
  - name: sync
    repo: acme/sync
    dependencies: [notes]
";

fn recorded_version(t: &TestFleet, name: &str) -> Option<String> {
    let path = t.fleet.paths().versions_file();
    let content = std::fs::read_to_string(path).ok()?;
    let v: serde_json::Value = serde_json::from_str(&content).ok()?;
    v["installed"][name].as_str().map(str::to_string)
}

#[tokio::test]
async fn install_downloads_verifies_and_records() {
    let host = ReleaseHost::start().await;
    host.publish("acme/notes", "v1.0.0", service_script("notes", "1.0.0"));
    let t = TestFleet::new(&host, REGISTRY);

    t.fleet.install("notes", &|_| {}).await.unwrap();

    let bin = t.binary("notes");
    assert!(t.fleet.is_installed("notes"));
    assert_ne!(std::fs::metadata(&bin).unwrap().permissions().mode() & 0o111, 0);
    assert_eq!(t.fleet.check("notes").await.unwrap(), "notes 1.0.0");
    assert_eq!(recorded_version(&t, "notes").as_deref(), Some("v1.0.0"));
    assert_eq!(t.fleet.status("notes"), ServiceStatus::Stopped);

    let env = std::fs::read_to_string(t.fleet.paths().service_env_file("notes")).unwrap();
    assert_eq!(env, "NOTES_DIR=/tmp/notes\n# NOTES_TOKEN=\n");
}

#[tokio::test]
async fn install_pulls_in_dependencies() {
    let host = ReleaseHost::start().await;
    host.publish("acme/notes", "v1.0.0", service_script("notes", "1.0.0"));
    host.publish("acme/sync", "v0.3.0", service_script("sync", "0.3.0"));
    let t = TestFleet::new(&host, REGISTRY);

    t.fleet.install("sync", &|_| {}).await.unwrap();
    assert!(t.fleet.is_installed("notes"));
    assert!(t.fleet.is_installed("sync"));
    assert!(!t.fleet.is_installing("sync"));
}

#[tokio::test]
async fn missing_dependency_release_fails_the_install() {
    let host = ReleaseHost::start().await;
    host.publish("acme/sync", "v0.3.0", service_script("sync", "0.3.0"));
    let t = TestFleet::new(&host, REGISTRY);

    let err = t.fleet.install("sync", &|_| {}).await.unwrap_err();
    assert!(matches!(err, FleetError::DependencyFailed { .. }), "{err}");
    assert!(!t.fleet.is_installed("sync"));
}

#[tokio::test]
async fn failed_verification_keeps_recorded_version() {
    let host = ReleaseHost::start().await;
    host.publish("acme/notes", "v1.0.0", service_script("notes", "1.0.0"));
    let t = TestFleet::new(&host, REGISTRY);
    t.fleet.install("notes", &|_| {}).await.unwrap();

    host.publish("acme/notes", "v2.0.0", broken_script());
    let err = t.fleet.install("notes", &|_| {}).await.unwrap_err();
    assert!(matches!(err, FleetError::VerificationFailed { .. }), "{err}");
    assert_eq!(recorded_version(&t, "notes").as_deref(), Some("v1.0.0"));
}

#[tokio::test]
async fn update_replaces_binary_when_newer() {
    let host = ReleaseHost::start().await;
    host.publish("acme/notes", "v1.0.0", service_script("notes", "1.0.0"));
    let t = TestFleet::new(&host, REGISTRY);
    t.fleet.install("notes", &|_| {}).await.unwrap();

    host.publish("acme/notes", "v1.1.0", service_script("notes", "1.1.0"));
    let check = t.fleet.check_update("notes").await.unwrap();
    assert!(check.has_update);
    assert_eq!(check.installed.as_deref(), Some("1.0.0"));
    assert_eq!(check.latest, "v1.1.0");

    let messages = std::sync::Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
    let sink = std::sync::Arc::clone(&messages);
    t.fleet
        .update("notes", &move |m: &str| sink.lock().unwrap().push(m.to_string()))
        .await
        .unwrap();

    assert_eq!(t.fleet.check("notes").await.unwrap(), "notes 1.1.0");
    assert_eq!(recorded_version(&t, "notes").as_deref(), Some("v1.1.0"));
    assert!(!t.fleet.paths().service_sidecar("notes").exists());
    assert!(messages
        .lock()
        .unwrap()
        .iter()
        .any(|m| m == "Updated: 1.0.0 \u{2192} v1.1.0"));
}

#[tokio::test]
async fn update_without_newer_release_changes_nothing() {
    let host = ReleaseHost::start().await;
    host.publish("acme/notes", "v1.0.0", service_script("notes", "1.0.0"));
    let t = TestFleet::new(&host, REGISTRY);
    t.fleet.install("notes", &|_| {}).await.unwrap();

    let bin = t.binary("notes");
    let before = std::fs::read(&bin).unwrap();
    let mode = std::fs::metadata(&bin).unwrap().permissions().mode();

    t.fleet.update("notes", &|_| {}).await.unwrap();

    assert_eq!(std::fs::read(&bin).unwrap(), before);
    assert_eq!(std::fs::metadata(&bin).unwrap().permissions().mode(), mode);
    assert_eq!(recorded_version(&t, "notes").as_deref(), Some("v1.0.0"));
}

#[tokio::test]
async fn failed_update_restores_previous_binary() {
    let host = ReleaseHost::start().await;
    host.publish("acme/notes", "v1.0.0", service_script("notes", "1.0.0"));
    let t = TestFleet::new(&host, REGISTRY);
    t.fleet.install("notes", &|_| {}).await.unwrap();

    // Newer release announced, but its asset is missing.
    host.publish("acme/notes", "v1.2.0", Vec::new());
    let err = t.fleet.update("notes", &|_| {}).await.unwrap_err();

    assert!(matches!(err, FleetError::DownloadFailed { .. }), "{err}");
    assert_eq!(t.fleet.check("notes").await.unwrap(), "notes 1.0.0");
    assert!(!t.fleet.paths().service_sidecar("notes").exists());
}

/// Answer one `STOP` on the service's port file by killing `pid`.
async fn acknowledge_stop(port_file: &std::path::Path, pid: u32) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    std::fs::write(port_file, listener.local_addr().unwrap().port().to_string()).unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.split();
        let mut line = String::new();
        BufReader::new(read).read_line(&mut line).await.unwrap();
        if line.trim() == "STOP" {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
            write.write_all(b"OK\n").await.unwrap();
        }
    });
}

#[tokio::test]
async fn update_of_running_service_restarts_it() {
    let host = ReleaseHost::start().await;
    host.publish("acme/notes", "v1.0.0", service_script("notes", "1.0.0"));
    let t = TestFleet::new(&host, REGISTRY);
    t.fleet.install("notes", &|_| {}).await.unwrap();
    t.fleet.start("notes").await.unwrap();
    let old_pid = t.fleet.state("notes").pid.unwrap();
    acknowledge_stop(&t.fleet.paths().service_port_file("notes"), old_pid).await;

    host.publish("acme/notes", "v1.1.0", service_script("notes", "1.1.0"));
    let messages = std::sync::Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
    let sink = std::sync::Arc::clone(&messages);
    t.fleet
        .update("notes", &move |m: &str| sink.lock().unwrap().push(m.to_string()))
        .await
        .unwrap();

    assert_eq!(t.fleet.status("notes"), ServiceStatus::Running);
    let new_pid = t.fleet.state("notes").pid.unwrap();
    assert_ne!(new_pid, old_pid);
    assert_eq!(t.fleet.check("notes").await.unwrap(), "notes 1.1.0");
    assert!(!t.fleet.paths().service_sidecar("notes").exists());
    {
        let messages = messages.lock().unwrap();
        assert!(messages.iter().any(|m| m == "Stopping service..."));
        assert!(messages.iter().any(|m| m == "Restarting service..."));
    }

    let _ = kill(Pid::from_raw(new_pid as i32), Signal::SIGKILL);
}

#[tokio::test]
async fn uninstall_removes_binary() {
    let host = ReleaseHost::start().await;
    host.publish("acme/notes", "v1.0.0", service_script("notes", "1.0.0"));
    let t = TestFleet::new(&host, REGISTRY);
    t.fleet.install("notes", &|_| {}).await.unwrap();

    t.fleet.uninstall("notes").await.unwrap();
    assert!(!t.fleet.is_installed("notes"));
    assert!(matches!(
        t.fleet.uninstall("notes").await,
        Err(FleetError::NotInstalled(_))
    ));
}
