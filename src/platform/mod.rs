use std::ffi::OsStr;
use std::fs::File;
use std::path::{Path, PathBuf};

use tokio::process::Command;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
use unix as imp;
#[cfg(windows)]
use windows as imp;

/// Executable suffix for binaries on this platform.
pub fn binary_ext() -> &'static str {
    if cfg!(windows) {
        ".exe"
    } else {
        ""
    }
}

/// Get the current user's home directory.
pub fn home_dir() -> Option<PathBuf> {
    dirs::home_dir()
}

/// Forcefully kill every process whose executable is named `name`.
/// Used to clear strays left behind by a previous unclean exit.
pub async fn kill_by_name(name: &str) {
    imp::kill_by_name(name).await
}

/// Check if a process with the given PID is still alive.
pub fn is_process_alive(pid: u32) -> bool {
    imp::is_process_alive(pid)
}

/// Try to take a non-blocking exclusive OS lock on `file`.
/// `Ok(false)` means another holder owns it.
pub fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
    imp::try_lock_exclusive(file)
}

pub fn unlock(file: &File) -> std::io::Result<()> {
    imp::unlock(file)
}

/// The environment a freshly started service should see. On Windows the
/// `PATH` is re-read from the registry so installs made after the supervisor
/// started are visible.
pub fn system_env() -> Vec<(String, String)> {
    imp::system_env()
}

/// Whether the supervisor runs with elevated privileges.
pub fn is_elevated() -> bool {
    imp::is_elevated()
}

/// Build the command that launches a service binary. When the supervisor is
/// elevated and the invoking user is known, the child runs as that user.
pub fn service_command(binary: &Path) -> Command {
    imp::service_command(binary)
}

/// Mark a file executable by owner, group and others.
pub fn set_executable(path: &Path) -> std::io::Result<()> {
    imp::set_executable(path)
}

/// Point `link` at `target`, replacing whatever `link` was. Returns
/// `Ok(false)` on platforms without convenience links.
pub fn link_binary(target: &Path, link: &Path) -> std::io::Result<bool> {
    imp::link_binary(target, link)
}

/// Start `program` fully detached from this process so it outlives it.
pub fn spawn_detached<I, S>(program: &str, args: I) -> std::io::Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    imp::spawn_detached(program, args)
}

/// Whether `name` resolves to an executable on `PATH`.
pub fn is_command_available(name: &str) -> bool {
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    let exts: Vec<String> = if cfg!(windows) {
        std::env::var("PATHEXT")
            .unwrap_or_else(|_| ".EXE;.CMD;.BAT;.COM".to_string())
            .split(';')
            .map(|e| e.to_string())
            .chain(std::iter::once(String::new()))
            .collect()
    } else {
        vec![String::new()]
    };
    std::env::split_paths(&path).any(|dir| {
        exts.iter()
            .any(|ext| dir.join(format!("{name}{ext}")).is_file())
    })
}
