use std::sync::Arc;

use fleetvisor::api::{self, ApiServer, ClientError, Command};

use crate::common::*;

const REGISTRY: &str = "services:\n  - name: notes\n    repo: acme/notes\n";

async fn serve(t: &TestFleet) -> (u16, tokio_util::sync::CancellationToken) {
    let server = ApiServer::bind(0, t.fleet.clone()).await.unwrap();
    let port = server.local_addr().unwrap().port();
    let cancel = server.cancel_token();
    tokio::spawn(server.serve());
    (port, cancel)
}

#[tokio::test]
async fn update_over_the_api_reports_progress() {
    let host = ReleaseHost::start().await;
    host.publish("acme/notes", "v1.0.0", service_script("notes", "1.0.0"));
    let t = TestFleet::new(&host, REGISTRY);
    t.fleet.install("notes", &|_| {}).await.unwrap();
    host.publish("acme/notes", "v1.1.0", service_script("notes", "1.1.0"));

    let (port, cancel) = serve(&t).await;
    let reply = api::send(port, Command::Update, "notes").await.unwrap();
    assert!(reply.starts_with("Checking for updates..."), "{reply}");
    assert!(reply.contains("; Updated: 1.0.0 \u{2192} v1.1.0"), "{reply}");
    assert!(!reply.contains('\n'));

    let reply = api::send(port, Command::Update, "notes").await.unwrap();
    assert_eq!(reply, "Checking for updates...; Already up to date");
    cancel.cancel();
}

#[tokio::test]
async fn failures_come_back_as_remote_errors() {
    let host = ReleaseHost::start().await;
    let t = TestFleet::new(&host, REGISTRY);
    let (port, cancel) = serve(&t).await;

    let err = api::send(port, Command::Start, "notes").await.unwrap_err();
    assert!(matches!(&err, ClientError::Remote(m) if m == "service not installed: notes"));

    let err = api::send(port, Command::Update, "ghost").await.unwrap_err();
    assert!(matches!(&err, ClientError::Remote(m) if m.contains("ghost")), "{err}");
    cancel.cancel();
}

#[tokio::test]
async fn concurrent_clients_are_served_independently() {
    let host = ReleaseHost::start().await;
    let t = TestFleet::new(&host, REGISTRY);
    let (port, cancel) = serve(&t).await;

    let replies = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let replies = Arc::clone(&replies);
        tasks.push(tokio::spawn(async move {
            let reply = api::send(port, Command::Stop, "notes").await.unwrap();
            replies.lock().await.push(reply);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert!(replies.lock().await.iter().all(|r| r == "stopped"));
    cancel.cancel();
}
