pub mod docs;
pub mod download;
pub mod install;
pub mod releases;
pub mod shutdown;
pub mod state;
pub mod supervisor;
pub mod sysdeps;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::config::{Paths, Settings};
use crate::error::FleetResult;

use state::PersistedState;

/// Sink for human-readable progress lines emitted during long operations.
pub type Progress = dyn Fn(&str) + Send + Sync;

/// Invoked whenever a service's visible state may have changed.
pub type StatusCallback = Arc<dyn Fn() + Send + Sync>;

/// Runtime status of a single service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    NotInstalled,
    Stopped,
    Running,
    Error,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceStatus::NotInstalled => "not_installed",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Running => "running",
            ServiceStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a service for UI and API layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceState {
    pub name: String,
    pub status: ServiceStatus,
    pub pid: Option<u32>,
    pub last_status: String,
    pub last_error: String,
}

/// A spawned child tracked from successful spawn until its wait completes.
#[derive(Debug, Clone)]
pub(crate) struct ProcessHandle {
    pub pid: u32,
    /// Cancelled by the exit watcher once the child has been reaped.
    pub done: CancellationToken,
}

impl ProcessHandle {
    fn is_alive(&self) -> bool {
        !self.done.is_cancelled()
    }
}

#[derive(Debug, Default, Clone)]
pub(crate) struct ServiceLog {
    pub last_status: String,
    pub last_error: String,
}

/// Every piece of mutable fleet state, behind one readers/writer lock.
/// Never held across an await point.
#[derive(Debug, Default)]
pub(crate) struct Tables {
    pub running: HashMap<String, ProcessHandle>,
    pub logs: HashMap<String, ServiceLog>,
    pub installing: HashSet<String>,
}

struct Inner {
    settings: Settings,
    paths: Paths,
    catalog: Arc<Catalog>,
    client: reqwest::Client,
    tables: RwLock<Tables>,
    on_status: RwLock<Option<StatusCallback>>,
    /// One async lock per service name, held across a start transition.
    start_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    restored: AtomicBool,
}

/// The service lifecycle engine. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Fleet {
    inner: Arc<Inner>,
}

impl Fleet {
    pub fn new(settings: Settings, catalog: Arc<Catalog>) -> Self {
        Self::with_client(settings, catalog, crate::http::client())
    }

    pub fn with_client(settings: Settings, catalog: Arc<Catalog>, client: reqwest::Client) -> Self {
        let paths = settings.paths();
        Self {
            inner: Arc::new(Inner {
                settings,
                paths,
                catalog,
                client,
                tables: RwLock::new(Tables::default()),
                on_status: RwLock::new(None),
                start_locks: Mutex::new(HashMap::new()),
                restored: AtomicBool::new(false),
            }),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn paths(&self) -> &Paths {
        &self.inner.paths
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.inner.client
    }

    pub(crate) fn tables(&self) -> RwLockReadGuard<'_, Tables> {
        self.inner
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn tables_mut(&self) -> RwLockWriteGuard<'_, Tables> {
        self.inner
            .tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn start_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .inner
            .start_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    // -----------------------------------------------------------------------
    // Status notifications and per-service log state
    // -----------------------------------------------------------------------

    pub fn set_status_callback(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self
            .inner
            .on_status
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    pub(crate) fn notify(&self) {
        let callback = self
            .inner
            .on_status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    pub fn set_last_status(&self, name: &str, message: &str) {
        self.tables_mut()
            .logs
            .entry(name.to_string())
            .or_default()
            .last_status = message.to_string();
        self.notify();
    }

    pub fn set_last_error(&self, name: &str, message: &str) {
        self.tables_mut()
            .logs
            .entry(name.to_string())
            .or_default()
            .last_error = message.to_string();
        self.notify();
    }

    pub fn last_status(&self, name: &str) -> String {
        self.tables()
            .logs
            .get(name)
            .map(|log| log.last_status.clone())
            .unwrap_or_default()
    }

    pub fn last_error(&self, name: &str) -> String {
        self.tables()
            .logs
            .get(name)
            .map(|log| log.last_error.clone())
            .unwrap_or_default()
    }

    pub fn clear_last_error(&self, name: &str) {
        if let Some(log) = self.tables_mut().logs.get_mut(name) {
            log.last_error.clear();
        }
    }

    pub(crate) fn clear_logs(&self, name: &str) {
        self.tables_mut().logs.remove(name);
        self.notify();
    }

    // -----------------------------------------------------------------------
    // Installation queries
    // -----------------------------------------------------------------------

    pub fn is_installed(&self, name: &str) -> bool {
        self.paths().service_binary(name).is_file()
    }

    pub fn is_installing(&self, name: &str) -> bool {
        self.tables().installing.contains(name)
    }

    // -----------------------------------------------------------------------
    // Durable state
    // -----------------------------------------------------------------------

    /// Persist the names of every currently running service.
    pub fn save_state(&self) -> FleetResult<()> {
        let state = PersistedState {
            running_services: self.running_names(),
        };
        state.save(&self.paths().state_file())?;
        info!(count = state.running_services.len(), "state saved");
        Ok(())
    }

    /// Start every service recorded as running by the previous process.
    /// Runs at most once per process; individual failures are logged.
    pub async fn restore_state(&self) {
        if self.inner.restored.swap(true, Ordering::SeqCst) {
            return;
        }
        let state = PersistedState::load(&self.paths().state_file());
        for name in state.running_services {
            if !self.is_installed(&name) {
                info!(service = %name, "skipping restore, binary missing");
                continue;
            }
            if let Err(e) = self.start(&name).await {
                warn!(service = %name, error = %e, "failed to restore service");
            }
        }
    }
}
