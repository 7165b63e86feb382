use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::envfile::{merge_env, parse_env_file};
use crate::error::{FleetError, FleetResult};
use crate::platform;

use super::{shutdown, Fleet, ProcessHandle, ServiceState, ServiceStatus};

/// Longest dependency chain followed by recursive start and install.
pub const MAX_DEPENDENCY_DEPTH: usize = 16;

/// Environment variable carrying the log column width to children.
pub const LOG_WIDTH_VAR: &str = "FLEETVISOR_LOG_WIDTH";

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Guard against runaway dependency recursion. `chain` holds the services
/// already being processed above `name`.
pub(crate) fn check_chain(chain: &[String], name: &str) -> FleetResult<()> {
    if chain.iter().any(|n| n == name) {
        let mut cycle = chain.to_vec();
        cycle.push(name.to_string());
        return Err(FleetError::DependencyCycle(cycle));
    }
    if chain.len() >= MAX_DEPENDENCY_DEPTH {
        return Err(FleetError::Catalog(format!(
            "dependency chain of {name} exceeds {MAX_DEPENDENCY_DEPTH} levels"
        )));
    }
    Ok(())
}

impl Fleet {
    // -----------------------------------------------------------------------
    // Start
    // -----------------------------------------------------------------------

    /// Start `name` and, first, any of its dependencies not yet running.
    /// Already running is success.
    pub async fn start(&self, name: &str) -> FleetResult<()> {
        self.clear_last_error(name);
        self.start_chain(name, Vec::new()).await
    }

    fn start_chain<'a>(&'a self, name: &'a str, chain: Vec<String>) -> BoxFuture<'a, FleetResult<()>> {
        Box::pin(async move {
            if !self.is_installed(name) {
                return Err(FleetError::NotInstalled(name.to_string()));
            }
            check_chain(&chain, name)?;

            // Concurrent starts of one name queue here; the loser sees the
            // winner's process and returns.
            let lock = self.start_lock(name);
            let _held = lock.lock().await;
            if self.tracked(name).is_some() {
                debug!(service = %name, "already running");
                return Ok(());
            }

            let service = self.catalog().get(name).await?;
            let mut next = chain;
            next.push(name.to_string());

            for dep in &service.dependencies {
                if self.tracked(dep).is_some() {
                    continue;
                }
                info!(service = %name, dependency = %dep, "starting dependency");
                self.start_chain(dep, next.clone())
                    .await
                    .map_err(|e| FleetError::DependencyFailed {
                        action: "start",
                        service: name.to_string(),
                        dependency: dep.clone(),
                        source: Box::new(e),
                    })?;
            }

            platform::kill_by_name(name).await;
            self.spawn_service(name).await
        })
    }

    async fn spawn_service(&self, name: &str) -> FleetResult<()> {
        let binary = self.paths().service_binary(name);
        let env = self.service_env(name).await;

        let mut cmd = platform::service_command(&binary);
        cmd.current_dir(self.paths().service_dir(name))
            .env_clear()
            .envs(&env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        info!(service = %name, binary = %binary.display(), "starting");
        let mut child = cmd.spawn().map_err(|source| FleetError::Spawn {
            service: name.to_string(),
            source,
        })?;
        let pid = child.id().unwrap_or_default();

        let handle = ProcessHandle {
            pid,
            done: CancellationToken::new(),
        };
        self.tables_mut()
            .running
            .insert(name.to_string(), handle.clone());

        if let Some(out) = child.stdout.take() {
            self.capture(name, out, false);
        }
        if let Some(err) = child.stderr.take() {
            self.capture(name, err, true);
        }
        self.watch(name, child, handle);

        info!(service = %name, pid, "started");
        self.notify();
        Ok(())
    }

    /// Environment for a child: the system environment, `PATH` extended with
    /// every service directory, the log width, then the service's `.env`.
    async fn service_env(&self, name: &str) -> BTreeMap<String, String> {
        let mut base = platform::system_env();

        let mut path_dirs: Vec<std::path::PathBuf> = base
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("PATH"))
            .map(|(_, v)| std::env::split_paths(v).collect())
            .unwrap_or_default();
        if let Ok(entries) = std::fs::read_dir(self.paths().services_dir()) {
            let mut dirs: Vec<_> = entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect();
            dirs.sort();
            path_dirs.extend(dirs);
        }
        match std::env::join_paths(path_dirs) {
            Ok(joined) => base.push(("PATH".to_string(), joined.to_string_lossy().into_owned())),
            Err(e) => warn!(service = %name, error = %e, "could not extend PATH"),
        }

        let width = self.catalog().max_name_len().await;
        base.push((LOG_WIDTH_VAR.to_string(), width.to_string()));

        merge_env(base, parse_env_file(&self.paths().service_env_file(name)))
    }

    /// Forward child output into the log and the service's status fields.
    fn capture<R>(&self, name: &str, reader: R, is_stderr: bool)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let fleet = self.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.is_empty() => {}
                    Ok(Some(line)) => {
                        if is_stderr {
                            warn!(service = %name, "{line}");
                            fleet.set_last_error(&name, &line);
                        } else {
                            info!(service = %name, "{line}");
                            fleet.set_last_status(&name, &line);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(service = %name, error = %e, "output read error");
                        break;
                    }
                }
            }
        });
    }

    /// Reap the child, drop it from the running table and fire its exit
    /// indicator.
    fn watch(&self, name: &str, mut child: Child, handle: ProcessHandle) {
        let fleet = self.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {
                    info!(service = %name, pid = handle.pid, "exited");
                }
                Ok(status) => {
                    warn!(service = %name, pid = handle.pid, %status, "exited");
                    fleet.set_last_error(&name, &format!("process exited: {status}"));
                }
                Err(e) => {
                    error!(service = %name, error = %e, "wait failed");
                    fleet.set_last_error(&name, &format!("wait failed: {e}"));
                }
            }

            {
                let mut tables = fleet.tables_mut();
                if tables
                    .running
                    .get(&name)
                    .is_some_and(|h| h.pid == handle.pid)
                {
                    tables.running.remove(&name);
                }
            }
            handle.done.cancel();
            fleet.notify();
        });
    }

    // -----------------------------------------------------------------------
    // Stop / restart
    // -----------------------------------------------------------------------

    /// Gracefully stop `name` over its shutdown protocol and wait for the
    /// process to exit. There is no forced kill: an unacknowledged stop is
    /// reported as `IpcStopFailed` and the process stays tracked.
    pub async fn stop(&self, name: &str) -> FleetResult<()> {
        let Some(handle) = self.tracked(name) else {
            return Ok(());
        };

        info!(service = %name, pid = handle.pid, "stopping");
        if !shutdown::send_stop(&self.paths().service_port_file(name)).await {
            warn!(service = %name, "stop request not acknowledged");
            return Err(FleetError::IpcStopFailed(name.to_string()));
        }

        handle.done.cancelled().await;
        self.clear_logs(name);
        info!(service = %name, "stopped");
        Ok(())
    }

    pub async fn restart(&self, name: &str) -> FleetResult<()> {
        info!(service = %name, "restarting");
        self.stop(name).await?;
        self.start(name).await
    }

    /// Stop every running service, continuing past individual failures.
    pub async fn shutdown(&self) {
        for name in self.running_names() {
            if let Err(e) = self.stop(&name).await {
                error!(service = %name, error = %e, "failed to stop during shutdown");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    fn tracked(&self, name: &str) -> Option<ProcessHandle> {
        self.tables()
            .running
            .get(name)
            .filter(|h| h.is_alive())
            .cloned()
    }

    pub fn status(&self, name: &str) -> ServiceStatus {
        if !self.is_installed(name) {
            ServiceStatus::NotInstalled
        } else if self.tracked(name).is_some() {
            ServiceStatus::Running
        } else {
            ServiceStatus::Stopped
        }
    }

    /// Full view of one service. A stopped service with a recorded error is
    /// reported as `Error`.
    pub fn state(&self, name: &str) -> ServiceState {
        let pid = self.tracked(name).map(|h| h.pid);
        let mut status = self.status(name);
        let last_status = self.last_status(name);
        let last_error = self.last_error(name);
        if status == ServiceStatus::Stopped && !last_error.is_empty() {
            status = ServiceStatus::Error;
        }
        ServiceState {
            name: name.to_string(),
            status,
            pid: if status == ServiceStatus::Running { pid } else { None },
            last_status,
            last_error,
        }
    }

    /// State of every catalog service, in catalog order.
    pub async fn states(&self) -> FleetResult<Vec<ServiceState>> {
        Ok(self
            .catalog()
            .list()
            .await?
            .iter()
            .map(|svc| self.state(&svc.name))
            .collect())
    }

    /// Names of every tracked, still-alive service, sorted.
    pub fn running_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tables()
            .running
            .iter()
            .filter(|(_, h)| h.is_alive())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}
