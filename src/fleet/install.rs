use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{info, warn};

use crate::catalog::{EnvVar, Service};
use crate::error::{FleetError, FleetResult, IoContext};
use crate::platform;
use crate::version;

use super::download::download_file;
use super::state::VersionRecord;
use super::supervisor::check_chain;
use super::{releases, sysdeps, Fleet, Progress, ServiceStatus};

/// Upper bound on a `--version` invocation.
const VERIFY_TIMEOUT: Duration = Duration::from_secs(5);

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of comparing the installed release of a service with the newest
/// published one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCheck {
    pub has_update: bool,
    pub installed: Option<String>,
    pub latest: String,
}

/// Membership in the installing set for the lifetime of one install.
/// Dropping it removes the name and notifies status listeners, whatever the
/// outcome of the install.
struct InstallingGuard {
    fleet: Fleet,
    name: String,
}

impl InstallingGuard {
    fn acquire(fleet: &Fleet, name: &str) -> FleetResult<Self> {
        if !fleet.tables_mut().installing.insert(name.to_string()) {
            return Err(FleetError::AlreadyInstalling(name.to_string()));
        }
        Ok(Self {
            fleet: fleet.clone(),
            name: name.to_string(),
        })
    }
}

impl Drop for InstallingGuard {
    fn drop(&mut self) {
        self.fleet.tables_mut().installing.remove(&self.name);
        self.fleet.notify();
    }
}

/// `.env` content synthesised from declared defaults. Variables without a
/// default are written commented out as a hint.
pub fn default_env_content(vars: &[EnvVar]) -> String {
    vars.iter()
        .map(|var| {
            if var.default.is_empty() {
                format!("# {}=\n", var.name)
            } else {
                format!("{}={}\n", var.name, var.default)
            }
        })
        .collect()
}

/// Run `binary --version`, returning its combined output.
pub(crate) async fn run_version(binary: &Path) -> Result<String, String> {
    let output = Command::new(binary)
        .arg("--version")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();
    let output = match tokio::time::timeout(VERIFY_TIMEOUT, output).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(e.to_string()),
        Err(_) => return Err(format!("timed out after {}s", VERIFY_TIMEOUT.as_secs())),
    };

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    if output.status.success() {
        Ok(text.trim().to_string())
    } else {
        Err(format!("{} (output: {})", output.status, text.trim()))
    }
}

/// Confirm that a freshly installed binary runs and answers `--version`.
pub async fn verify_binary(binary: &Path) -> FleetResult<String> {
    run_version(binary)
        .await
        .map_err(|reason| FleetError::VerificationFailed {
            path: binary.display().to_string(),
            reason,
        })
}

impl Fleet {
    // -----------------------------------------------------------------------
    // Install
    // -----------------------------------------------------------------------

    /// Install `name` and any missing dependencies. A second install of a
    /// name already in flight fails fast with `AlreadyInstalling`.
    pub async fn install(&self, name: &str, progress: &Progress) -> FleetResult<()> {
        self.install_chain(name, Vec::new(), progress).await
    }

    fn install_chain<'a>(
        &'a self,
        name: &'a str,
        chain: Vec<String>,
        progress: &'a Progress,
    ) -> BoxFuture<'a, FleetResult<()>> {
        Box::pin(async move {
            check_chain(&chain, name)?;
            let _guard = InstallingGuard::acquire(self, name)?;
            self.notify();
            self.install_held(name, chain, progress).await
        })
    }

    /// Body of an install whose `InstallingGuard` the caller already holds.
    async fn install_held(
        &self,
        name: &str,
        chain: Vec<String>,
        progress: &Progress,
    ) -> FleetResult<()> {
        let service = self.catalog().get(name).await?;
        let mut next = chain;
        next.push(name.to_string());

        for dep in &service.dependencies {
            if self.is_installed(dep) {
                continue;
            }
            progress(&format!("Installing dependency: {dep}"));
            self.install_chain(dep, next.clone(), progress)
                .await
                .map_err(|e| FleetError::DependencyFailed {
                    action: "install",
                    service: name.to_string(),
                    dependency: dep.clone(),
                    source: Box::new(e),
                })?;
        }

        if !service.system_deps.is_empty() {
            sysdeps::install_system_deps(&service.system_deps, progress).await?;
        }

        self.install_files(&service, progress).await
    }

    async fn install_files(&self, service: &Service, progress: &Progress) -> FleetResult<()> {
        let name = service.name.as_str();
        let dir = self.paths().service_dir(name);
        let binary = self.paths().service_binary(name);

        progress(&format!("Downloading {name}..."));
        std::fs::create_dir_all(&dir)
            .io_context(|| format!("failed to create service directory {}", dir.display()))?;

        let url = releases::latest_asset_url(&self.settings().github_url, &service.repo, name);
        download_file(self.client(), &url, &binary, progress).await?;
        platform::set_executable(&binary)
            .io_context(|| format!("failed to make {} executable", binary.display()))?;

        for asset in &service.extra_assets {
            progress(&format!("Downloading {}...", asset.path));
            download_file(self.client(), &asset.url, &dir.join(&asset.path), progress).await?;
        }

        let env_file = self.paths().service_env_file(name);
        if !env_file.exists() {
            std::fs::write(&env_file, default_env_content(&service.env_vars))
                .io_context(|| format!("failed to write {}", env_file.display()))?;
        }

        self.link(name, progress);
        self.install_docs(service).await;

        if let Err(e) = verify_binary(&binary).await {
            warn!(service = %name, error = %e, "binary verification failed");
            return Err(e);
        }

        match releases::latest_version(self.client(), &self.settings().api_url, &service.repo).await
        {
            Ok(latest) => {
                VersionRecord::set(&self.paths().versions_file(), name, &latest)?;
                progress(&format!("{name} installed (release: {latest})"));
            }
            Err(e) => {
                warn!(service = %name, error = %e, "installed release unknown");
                progress(&format!("{name} installed"));
            }
        }
        info!(service = %name, "installed");
        Ok(())
    }

    /// Convenience link in the link directory. Best-effort.
    fn link(&self, name: &str, progress: &Progress) {
        let link = self.settings().link_dir.join(name);
        let target = self.paths().service_binary(name);
        if let Err(e) = platform::link_binary(&target, &link) {
            warn!(service = %name, link = %link.display(), error = %e, "symlink not created");
            progress(&format!("Warning: failed to create symlink: {e}"));
        }
    }

    // -----------------------------------------------------------------------
    // Version checks
    // -----------------------------------------------------------------------

    /// Trimmed `--version` output of the installed binary.
    pub async fn check(&self, name: &str) -> FleetResult<String> {
        if !self.is_installed(name) {
            return Err(FleetError::NotInstalled(name.to_string()));
        }
        let binary = self.paths().service_binary(name);
        run_version(&binary)
            .await
            .map_err(|reason| FleetError::VerificationFailed {
                path: binary.display().to_string(),
                reason,
            })
    }

    /// Installed release: reported by the binary itself, else the recorded
    /// one.
    pub async fn installed_version(&self, name: &str) -> Option<String> {
        if let Ok(output) = self.check(name).await {
            if let Some(v) = version::from_version_output(&output) {
                return Some(v);
            }
        }
        VersionRecord::load(&self.paths().versions_file())
            .get(name)
            .map(str::to_string)
    }

    pub async fn check_update(&self, name: &str) -> FleetResult<UpdateCheck> {
        let service = self.catalog().get(name).await?;
        let latest =
            releases::latest_version(self.client(), &self.settings().api_url, &service.repo)
                .await?;
        let installed = if self.is_installed(name) {
            self.installed_version(name).await
        } else {
            None
        };
        let has_update = installed
            .as_deref()
            .is_some_and(|current| version::is_newer(&latest, current));
        Ok(UpdateCheck {
            has_update,
            installed,
            latest,
        })
    }

    // -----------------------------------------------------------------------
    // Update / uninstall
    // -----------------------------------------------------------------------

    /// Replace `name` with its newest release if one exists, stopping and
    /// restarting it around the swap when it was running. Holds the
    /// installing slot from the first step, so an overlapping install or
    /// update of the same name fails before anything is stopped or moved.
    pub async fn update(&self, name: &str, progress: &Progress) -> FleetResult<()> {
        let guard = InstallingGuard::acquire(self, name)?;
        self.notify();

        progress("Checking for updates...");
        let check = self.check_update(name).await?;
        if !check.has_update {
            progress("Already up to date");
            return Ok(());
        }

        let was_running = self.status(name) == ServiceStatus::Running;
        if was_running {
            progress("Stopping service...");
            self.stop(name).await?;
        }

        let binary = self.paths().service_binary(name);
        let sidecar = self.paths().service_sidecar(name);
        let moved = self.is_installed(name);
        if moved {
            let _ = std::fs::remove_file(&sidecar);
            std::fs::rename(&binary, &sidecar)
                .io_context(|| "failed to move old binary (still locked?)".to_string())?;
        }

        let result = self.install_held(name, Vec::new(), progress).await;

        if moved {
            if result.is_err() && !binary.exists() {
                if let Err(e) = std::fs::rename(&sidecar, &binary) {
                    warn!(service = %name, error = %e, "could not restore previous binary");
                }
            }
            let _ = std::fs::remove_file(&sidecar);
        }
        drop(guard);
        result?;

        progress(&format!(
            "Updated: {} → {}",
            check.installed.as_deref().unwrap_or("unknown"),
            check.latest
        ));
        info!(service = %name, version = %check.latest, "updated");

        if was_running {
            progress("Restarting service...");
            self.start(name).await?;
        }
        Ok(())
    }

    pub async fn uninstall(&self, name: &str) -> FleetResult<()> {
        self.stop(name).await?;

        if !cfg!(windows) {
            let link = self.settings().link_dir.join(name);
            let is_link = std::fs::symlink_metadata(&link).is_ok_and(|m| m.file_type().is_symlink());
            if is_link {
                if let Err(e) = std::fs::remove_file(&link) {
                    warn!(service = %name, error = %e, "failed to remove symlink");
                }
            }
        }

        let binary = self.paths().service_binary(name);
        match std::fs::remove_file(&binary) {
            Ok(()) => {
                info!(service = %name, "uninstalled");
                self.notify();
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FleetError::NotInstalled(name.to_string()))
            }
            Err(e) => Err(e).io_context(|| format!("failed to remove {}", binary.display())),
        }
    }

    /// Delete `.old` sidecars left behind by an update that was interrupted
    /// before its cleanup ran. Returns how many were removed.
    pub fn collect_stale_sidecars(&self) -> usize {
        let Ok(entries) = std::fs::read_dir(self.paths().services_dir()) else {
            return 0;
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let sidecar = self.paths().service_sidecar(&name);
            if sidecar.is_file() {
                match std::fs::remove_file(&sidecar) {
                    Ok(()) => {
                        info!(service = %name, "removed stale sidecar");
                        removed += 1;
                    }
                    Err(e) => warn!(service = %name, error = %e, "failed to remove stale sidecar"),
                }
            }
        }
        removed
    }
}
