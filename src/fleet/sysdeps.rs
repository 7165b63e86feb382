use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, warn};

use crate::catalog::SystemDep;
use crate::error::{FleetError, FleetResult};
use crate::platform::is_command_available;

use super::Progress;

/// PowerShell snippet that installs winget on hosts that lack it.
const WINGET_BOOTSTRAP: &str = r#"
$ProgressPreference = 'SilentlyContinue'
try {
    Invoke-RestMethod asheroto.com/winget | Invoke-Expression
} catch {}
"#;

/// How a missing system dependency gets installed on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallMethod {
    /// Run a shell script through `bash -c`.
    UnixScript(String),
    /// Run a script through `powershell -NoProfile -Command`.
    WinScript(String),
    Brew(String),
    Apt(String),
    /// winget package id. winget also exits non-zero when the package is
    /// already present.
    Winget(String),
}

impl InstallMethod {
    fn command(&self) -> Command {
        let (program, args): (&str, Vec<&str>) = match self {
            InstallMethod::UnixScript(script) => ("bash", vec!["-c", script.as_str()]),
            InstallMethod::WinScript(script) => {
                ("powershell", vec!["-NoProfile", "-Command", script.as_str()])
            }
            InstallMethod::Brew(pkg) => ("brew", vec!["install", pkg.as_str()]),
            InstallMethod::Apt(pkg) => ("sudo", vec!["apt-get", "install", "-y", pkg.as_str()]),
            InstallMethod::Winget(id) => (
                "winget",
                vec![
                    "install",
                    "--silent",
                    "--disable-interactivity",
                    "--accept-package-agreements",
                    "--accept-source-agreements",
                    "--no-upgrade",
                    "--force",
                    id.as_str(),
                ],
            ),
        };
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd
    }
}

/// First applicable install method for `dep` on `os` (`macos`, `linux`,
/// `windows`). Scripts take precedence over package managers.
pub fn select_method(dep: &SystemDep, os: &str, bash_available: bool) -> Option<InstallMethod> {
    let unix_script = dep.unix_script.clone().filter(|s| !s.is_empty());
    let pick = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
    match os {
        "macos" => unix_script
            .map(InstallMethod::UnixScript)
            .or_else(|| pick(&dep.brew).map(InstallMethod::Brew)),
        "linux" => unix_script
            .map(InstallMethod::UnixScript)
            .or_else(|| pick(&dep.apt).map(InstallMethod::Apt)),
        "windows" => pick(&dep.win_script)
            .map(InstallMethod::WinScript)
            .or_else(|| unix_script.filter(|_| bash_available).map(InstallMethod::UnixScript))
            .or_else(|| pick(&dep.winget).map(InstallMethod::Winget)),
        _ => None,
    }
}

/// Install every dependency whose command is not already on `PATH`.
pub async fn install_system_deps(deps: &[SystemDep], progress: &Progress) -> FleetResult<()> {
    let os = std::env::consts::OS;
    for dep in deps {
        if is_command_available(&dep.name) {
            continue;
        }

        let method = select_method(dep, os, is_command_available("bash")).ok_or_else(|| {
            FleetError::SystemDependencyFailed {
                name: dep.name.clone(),
                reason: format!("no install method for {os}"),
            }
        })?;

        progress(&format!("Installing system dependency: {}", dep.name));
        info!(dependency = %dep.name, method = ?method, "installing system dependency");

        if matches!(method, InstallMethod::Winget(_)) && !is_command_available("winget") {
            progress("Installing winget...");
            bootstrap_winget().await;
        }

        let status = method
            .command()
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| FleetError::SystemDependencyFailed {
                name: dep.name.clone(),
                reason: e.to_string(),
            })?;
        if !status.success() {
            if already_satisfied(&method, || is_command_available(&dep.name)) {
                info!(dependency = %dep.name, %status, "installer failed but dependency is present");
                continue;
            }
            return Err(FleetError::SystemDependencyFailed {
                name: dep.name.clone(),
                reason: format!("installer {status}"),
            });
        }
    }
    Ok(())
}

/// Whether a failed installer run still left the dependency usable. Only
/// winget reports an existing package as a failure.
fn already_satisfied(method: &InstallMethod, present: impl FnOnce() -> bool) -> bool {
    matches!(method, InstallMethod::Winget(_)) && present()
}

async fn bootstrap_winget() {
    let status = Command::new("powershell")
        .args([
            "-NoProfile",
            "-ExecutionPolicy",
            "Bypass",
            "-Command",
            WINGET_BOOTSTRAP,
        ])
        .status()
        .await;
    if let Err(e) = status {
        warn!(error = %e, "winget bootstrap failed");
    }
}
