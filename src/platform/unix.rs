use std::ffi::OsStr;
use std::fs::File;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::process::Stdio;

use nix::sys::signal::kill;
use nix::unistd::{geteuid, Pid};
use tokio::process::Command;
use tracing::debug;

pub async fn kill_by_name(name: &str) {
    let mut cmd = if cfg!(target_os = "macos") {
        let mut c = Command::new("killall");
        c.arg("-9").arg(name);
        c
    } else {
        let mut c = Command::new("pkill");
        c.arg("-9").arg("-x").arg(name);
        c
    };
    cmd.stdout(Stdio::null()).stderr(Stdio::null());
    match cmd.status().await {
        Ok(status) => debug!(process = name, code = ?status.code(), "stray process sweep"),
        Err(e) => debug!(process = name, error = %e, "stray process sweep unavailable"),
    }
}

pub fn is_process_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

pub fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
    // SAFETY: fd is valid for the lifetime of `file`.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == std::io::ErrorKind::WouldBlock {
        Ok(false)
    } else {
        Err(err)
    }
}

pub fn unlock(file: &File) -> std::io::Result<()> {
    // SAFETY: fd is valid for the lifetime of `file`.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// On Unix environment changes require a new shell anyway, so the current
/// process environment is used as-is.
pub fn system_env() -> Vec<(String, String)> {
    std::env::vars_os()
        .map(|(k, v)| {
            (
                k.to_string_lossy().into_owned(),
                v.to_string_lossy().into_owned(),
            )
        })
        .collect()
}

pub fn is_elevated() -> bool {
    geteuid().is_root()
}

pub fn service_command(binary: &Path) -> Command {
    let mut cmd = match std::env::var("SUDO_USER").ok().filter(|u| !u.is_empty()) {
        Some(user) if is_elevated() => {
            let mut c = Command::new("sudo");
            c.arg("-E").arg("-u").arg(user).arg(binary);
            c
        }
        _ => Command::new(binary),
    };
    // Own process group so a terminal Ctrl-C reaches only the supervisor,
    // which then stops children through the shutdown protocol.
    cmd.process_group(0);
    cmd
}

pub fn set_executable(path: &Path) -> std::io::Result<()> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

pub fn link_binary(target: &Path, link: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(link) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    std::os::unix::fs::symlink(target, link)?;
    Ok(true)
}

pub fn spawn_detached<I, S>(program: &str, args: I) -> std::io::Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    use std::os::unix::process::CommandExt;

    // New process group so terminal signals aimed at us do not reach it.
    std::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()
        .map(|_| ())
}
