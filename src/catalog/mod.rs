pub mod model;
pub mod validate;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::{Settings, SUPERVISOR_NAME};
use crate::error::{FleetError, FleetResult};

pub use model::{Asset, EnvVar, Registry, Service, SystemDep};

/// Lazily loaded, cached-once, refreshable view of the service catalog.
///
/// `load` serves the in-memory copy, else the on-disk cache, else the
/// bundled copy shipped next to the executable, else fetches the remote
/// document and persists it to the cache.
pub struct Catalog {
    registry_url: String,
    cache_file: PathBuf,
    bundled_file: Option<PathBuf>,
    client: reqwest::Client,
    cached: RwLock<Option<Arc<Registry>>>,
}

impl Catalog {
    pub fn new(settings: &Settings, client: reqwest::Client) -> Self {
        let bundled_file = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("registry.yaml")));
        Self {
            registry_url: settings.registry_url.clone(),
            cache_file: settings.paths().registry_cache(),
            bundled_file,
            client,
            cached: RwLock::new(None),
        }
    }

    /// A catalog pinned to an already-parsed registry.
    pub fn fixed(registry: Registry) -> FleetResult<Self> {
        check(&registry)?;
        Ok(Self {
            registry_url: String::new(),
            cache_file: PathBuf::new(),
            bundled_file: None,
            client: reqwest::Client::new(),
            cached: RwLock::new(Some(Arc::new(registry))),
        })
    }

    pub fn with_bundled_file(mut self, path: Option<PathBuf>) -> Self {
        self.bundled_file = path;
        self
    }

    pub async fn load(&self) -> FleetResult<Arc<Registry>> {
        if let Some(reg) = self.cached.read().await.as_ref() {
            return Ok(Arc::clone(reg));
        }

        let mut guard = self.cached.write().await;
        if let Some(reg) = guard.as_ref() {
            return Ok(Arc::clone(reg));
        }

        let local = std::iter::once(self.cache_file.as_path()).chain(self.bundled_file.as_deref());
        for path in local {
            if let Some(reg) = read_local(path) {
                let reg = Arc::new(reg);
                *guard = Some(Arc::clone(&reg));
                return Ok(reg);
            }
        }

        let reg = Arc::new(self.fetch_remote().await?);
        *guard = Some(Arc::clone(&reg));
        Ok(reg)
    }

    /// Force a remote fetch, replacing the cached copy on success.
    pub async fn refresh(&self) -> FleetResult<Arc<Registry>> {
        let mut guard = self.cached.write().await;
        let reg = Arc::new(self.fetch_remote().await?);
        *guard = Some(Arc::clone(&reg));
        Ok(reg)
    }

    async fn fetch_remote(&self) -> FleetResult<Registry> {
        debug!(url = %self.registry_url, "fetching catalog");
        let resp = self
            .client
            .get(&self.registry_url)
            .timeout(crate::http::METADATA_TIMEOUT)
            .send()
            .await
            .map_err(|e| FleetError::Catalog(format!("failed to fetch registry: {e}")))?;

        if !resp.status().is_success() {
            return Err(FleetError::Catalog(format!(
                "registry fetch failed: HTTP {}",
                resp.status().as_u16()
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| FleetError::Catalog(format!("failed to read registry: {e}")))?;
        let reg = parse(&body)?;

        if let Some(parent) = self.cache_file.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(&self.cache_file, &body) {
            warn!(error = %e, "failed to cache registry");
        }
        Ok(reg)
    }

    pub async fn get(&self, name: &str) -> FleetResult<Service> {
        let reg = self.load().await?;
        reg.services
            .iter()
            .find(|svc| svc.name == name)
            .cloned()
            .ok_or_else(|| FleetError::UnknownService(name.to_string()))
    }

    pub async fn list(&self) -> FleetResult<Vec<Service>> {
        Ok(self.load().await?.services.clone())
    }

    /// Width of the longest service name, never narrower than the
    /// supervisor's own name, used to align child log output.
    pub async fn max_name_len(&self) -> usize {
        let floor = SUPERVISOR_NAME.len();
        match self.load().await {
            Ok(reg) => reg
                .services
                .iter()
                .map(|s| s.name.len())
                .max()
                .unwrap_or(0)
                .max(floor),
            Err(_) => floor,
        }
    }
}

/// Parse and validate a catalog document.
pub fn parse(yaml: &str) -> FleetResult<Registry> {
    let reg: Registry = serde_yaml::from_str(yaml)
        .map_err(|e| FleetError::Catalog(format!("failed to parse registry: {e}")))?;
    check(&reg)?;
    Ok(reg)
}

fn check(reg: &Registry) -> FleetResult<()> {
    validate::validate(reg).map_err(|errors| {
        let msg = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        FleetError::Catalog(msg)
    })
}

fn read_local(path: &Path) -> Option<Registry> {
    let content = std::fs::read_to_string(path).ok()?;
    match parse(&content) {
        Ok(reg) => Some(reg),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unusable catalog copy");
            None
        }
    }
}
