#![allow(dead_code)]
use std::collections::HashMap;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use fleetvisor::catalog::{self, Catalog};
use fleetvisor::config::Settings;
use fleetvisor::fleet::Fleet;
use tempfile::TempDir;

/// A published release of one repository on the fake host.
#[derive(Debug, Clone)]
pub struct Release {
    pub title: String,
    pub binary: Vec<u8>,
}

type Releases = Arc<Mutex<HashMap<String, Release>>>;

/// Local HTTP server impersonating the release host: release metadata under
/// `/api`, downloads under `/gh`, raw repository files under `/raw`.
pub struct ReleaseHost {
    pub base: String,
    releases: Releases,
}

impl ReleaseHost {
    pub async fn start() -> Self {
        let releases: Releases = Arc::default();
        let router = Router::new()
            .route("/api/repos/{owner}/{repo}/releases/latest", get(latest))
            .route(
                "/gh/{owner}/{repo}/releases/latest/download/{asset}",
                get(download),
            )
            .route(
                "/raw/{owner}/{repo}/main/.claude/{file}",
                get(|| async { StatusCode::NOT_FOUND }),
            )
            .with_state(Arc::clone(&releases));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Self {
            base: format!("http://{addr}"),
            releases,
        }
    }

    /// Publish `version` of `owner/repo`, served with `binary` as its asset.
    /// An empty binary announces the release without a downloadable asset.
    pub fn publish(&self, repo: &str, version: &str, binary: Vec<u8>) {
        let name = repo.rsplit('/').next().unwrap_or(repo);
        self.releases.lock().unwrap().insert(
            repo.to_string(),
            Release {
                title: format!("{name} {version}"),
                binary,
            },
        );
    }

    pub fn env(&self, home: &Path) -> Vec<(String, String)> {
        vec![
            ("FLEETVISOR_HOME".into(), home.display().to_string()),
            ("FLEETVISOR_API_URL".into(), format!("{}/api", self.base)),
            ("FLEETVISOR_GITHUB_URL".into(), format!("{}/gh", self.base)),
            ("FLEETVISOR_RAW_URL".into(), format!("{}/raw", self.base)),
            ("FLEETVISOR_LINK_DIR".into(), home.join("bin").display().to_string()),
            ("FLEETVISOR_DOCS_DIR".into(), home.join("docs").display().to_string()),
            ("FLEETVISOR_REGISTRY_URL".into(), format!("{}/raw/registry.yaml", self.base)),
        ]
    }

    pub fn settings(&self, home: &Path) -> Settings {
        let env: HashMap<String, String> = self.env(home).into_iter().collect();
        Settings::from_lookup(|key| env.get(key).cloned())
    }
}

async fn latest(
    State(releases): State<Releases>,
    UrlPath((owner, repo)): UrlPath<(String, String)>,
) -> Response {
    match releases.lock().unwrap().get(&format!("{owner}/{repo}")) {
        Some(release) => Json(serde_json::json!({
            "name": release.title,
            "tag_name": release.title.rsplit(' ').next(),
        }))
        .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn download(
    State(releases): State<Releases>,
    UrlPath((owner, repo, _asset)): UrlPath<(String, String, String)>,
) -> Response {
    match releases.lock().unwrap().get(&format!("{owner}/{repo}")) {
        Some(release) if !release.binary.is_empty() => release.binary.clone().into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Shell script standing in for a service binary: answers `--version` and
/// otherwise idles.
pub fn service_script(name: &str, version: &str) -> Vec<u8> {
    format!(
        "#!/bin/sh\nif [ \"$1\" = \"--version\" ]; then echo \"{name} {version}\"; exit 0; fi\nexec sleep 30\n"
    )
    .into_bytes()
}

/// Binary that downloads fine but fails verification.
pub fn broken_script() -> Vec<u8> {
    b"#!/bin/sh\necho broken >&2\nexit 3\n".to_vec()
}

/// Scratch home plus a fleet wired to the fake host.
pub struct TestFleet {
    pub home: TempDir,
    pub fleet: Fleet,
}

impl TestFleet {
    pub fn new(host: &ReleaseHost, registry_yaml: &str) -> Self {
        let home = TempDir::new().unwrap();
        let settings = host.settings(home.path());
        let catalog = Catalog::fixed(catalog::parse(registry_yaml).unwrap()).unwrap();
        let fleet = Fleet::new(settings, Arc::new(catalog));
        Self { home, fleet }
    }

    pub fn binary(&self, name: &str) -> PathBuf {
        self.fleet.paths().service_binary(name)
    }
}

pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

pub async fn wait_for_port(port: u16, timeout: std::time::Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if std::net::TcpStream::connect(("127.0.0.1", port)).is_ok() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    false
}
