//! Replacing the supervisor's own binary.
//!
//! The download, verification and version comparison run in-process. The
//! actual swap cannot: the running executable is only replaced after this
//! process has exited, by a detached helper (see [`script`]).

pub mod script;

use std::path::{Path, PathBuf};

use is_terminal::IsTerminal;
use tracing::{info, warn};

use crate::config::{Settings, SUPERVISOR_NAME, SUPERVISOR_REPO};
use crate::error::{FleetError, FleetResult, IoContext};
use crate::fleet::download::download_file;
use crate::fleet::install::{run_version, UpdateCheck};
use crate::fleet::{releases, Progress};
use crate::platform;
use crate::version::{self, DEV_VERSION};

pub use script::ScriptScheduler;

/// Version of this build, stamped at compile time.
pub const VERSION: &str = match option_env!("FLEETVISOR_BUILD_VERSION") {
    Some(v) => v,
    None => DEV_VERSION,
};

/// The line printed by `--version`.
pub fn version_line() -> String {
    format!("{SUPERVISOR_NAME} v{VERSION}")
}

/// Everything the post-exit helper needs to swap the binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    /// Process to wait for before touching `target`.
    pub pid: u32,
    pub new_binary: PathBuf,
    pub target: PathBuf,
    /// Relaunch `target` once it has been replaced.
    pub restart: bool,
}

/// Arranges for a [`Replacement`] to happen after the current process exits.
pub trait ReplacementScheduler {
    fn schedule(&self, replacement: &Replacement) -> std::io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfUpdateOutcome {
    /// The downloaded binary reports the running version; nothing changed.
    UpToDate,
    /// The swap is scheduled for after exit.
    Scheduled { restart: bool },
}

/// Whether the replaced binary should be relaunched automatically: always on
/// Windows, elsewhere only when not attached to an interactive terminal.
pub fn auto_restart() -> bool {
    cfg!(windows) || !std::io::stdin().is_terminal()
}

/// Version reported by a supervisor binary, without the name prefix.
pub fn version_from_output(output: &str) -> Option<String> {
    output
        .trim()
        .strip_prefix(&format!("{SUPERVISOR_NAME} v"))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub struct SelfUpdater<S> {
    client: reqwest::Client,
    github_url: String,
    api_url: String,
    current_version: String,
    target: PathBuf,
    work_dir: PathBuf,
    restart: bool,
    scheduler: S,
}

impl SelfUpdater<ScriptScheduler> {
    /// Updater for the running executable, resolved through symlinks.
    pub fn for_current_exe(settings: &Settings, client: reqwest::Client) -> FleetResult<Self> {
        let exe = std::env::current_exe()
            .io_context(|| "failed to locate current executable".to_string())?;
        let target = std::fs::canonicalize(&exe).unwrap_or(exe);
        let work_dir = std::env::temp_dir();
        Ok(Self::new(
            settings,
            client,
            target,
            ScriptScheduler::new(work_dir),
        ))
    }
}

impl<S: ReplacementScheduler> SelfUpdater<S> {
    pub fn new(settings: &Settings, client: reqwest::Client, target: PathBuf, scheduler: S) -> Self {
        Self {
            client,
            github_url: settings.github_url.clone(),
            api_url: settings.api_url.clone(),
            current_version: VERSION.to_string(),
            target,
            work_dir: std::env::temp_dir(),
            restart: auto_restart(),
            scheduler,
        }
    }

    pub fn with_current_version(mut self, version: &str) -> Self {
        self.current_version = version.to_string();
        self
    }

    pub fn with_work_dir(mut self, dir: PathBuf) -> Self {
        self.work_dir = dir;
        self
    }

    pub fn with_restart(mut self, restart: bool) -> Self {
        self.restart = restart;
        self
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// A development build is always considered outdated.
    pub async fn check(&self) -> FleetResult<UpdateCheck> {
        let current = self.current_version.trim();
        if current.is_empty() || current == DEV_VERSION {
            return Ok(UpdateCheck {
                has_update: true,
                installed: Some(current.to_string()),
                latest: "latest".to_string(),
            });
        }
        let latest = releases::latest_version(&self.client, &self.api_url, SUPERVISOR_REPO).await?;
        Ok(UpdateCheck {
            has_update: version::is_newer(&latest, current),
            installed: Some(current.to_string()),
            latest,
        })
    }

    /// Download `target_version` (`latest` for the newest release) and
    /// schedule it to replace the running binary once this process exits.
    /// The installed-version record is left alone; the next start reports
    /// the new version itself.
    pub async fn run(&self, target_version: &str, progress: &Progress) -> FleetResult<SelfUpdateOutcome> {
        progress("Downloading new version...");
        let url = releases::tagged_asset_url(
            &self.github_url,
            SUPERVISOR_REPO,
            target_version,
            SUPERVISOR_NAME,
        );
        // Private directory: the staged name is never predictable. Dropping
        // it on any early return removes the download.
        let stage_dir = tempfile::Builder::new()
            .prefix(&format!("{SUPERVISOR_NAME}-update-"))
            .tempdir_in(&self.work_dir)
            .io_context(|| {
                format!("failed to create staging directory in {}", self.work_dir.display())
            })?;
        let staged = stage_dir
            .path()
            .join(format!("{SUPERVISOR_NAME}{}", platform::binary_ext()));

        download_file(&self.client, &url, &staged, progress).await?;
        platform::set_executable(&staged)
            .io_context(|| format!("failed to make {} executable", staged.display()))?;

        let staged_version = run_version(&staged)
            .await
            .ok()
            .and_then(|out| version_from_output(&out));
        if staged_version.as_deref() == Some(self.current_version.as_str()) {
            progress("Already up to date");
            return Ok(SelfUpdateOutcome::UpToDate);
        }

        progress("Installing update...");
        let replacement = Replacement {
            pid: std::process::id(),
            new_binary: staged.clone(),
            target: self.target.clone(),
            restart: self.restart,
        };
        if let Err(e) = self.scheduler.schedule(&replacement) {
            warn!(error = %e, "failed to start updater");
            return Err(FleetError::Io {
                context: "failed to start updater".to_string(),
                source: e,
            });
        }
        // The helper moves the binary out after this process exits.
        let _ = stage_dir.keep();

        info!(
            from = %self.current_version,
            to = staged_version.as_deref().unwrap_or("unknown"),
            restart = self.restart,
            "self-update scheduled"
        );
        if self.restart {
            progress("Update complete. Restarting...");
        } else {
            progress("Update complete. Please restart manually.");
        }
        Ok(SelfUpdateOutcome::Scheduled {
            restart: self.restart,
        })
    }
}
