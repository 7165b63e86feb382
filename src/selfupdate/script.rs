use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::SUPERVISOR_NAME;
use crate::platform;

use super::{Replacement, ReplacementScheduler};

/// Quote `s` for a POSIX shell.
fn sh_quote(s: &Path) -> String {
    format!("'{}'", s.display().to_string().replace('\'', r"'\''"))
}

/// Shell helper: wait for the pid to disappear, move the new binary into
/// place, optionally relaunch it, then delete itself and its directory.
pub fn render_unix_script(r: &Replacement) -> String {
    let target = sh_quote(&r.target);
    let mut script = format!(
        "#!/bin/bash\n\
         while kill -0 {pid} 2>/dev/null; do sleep 0.1; done\n\
         mv -f {new} {target}\n",
        pid = r.pid,
        new = sh_quote(&r.new_binary),
    );
    if let Some(stage_dir) = r.new_binary.parent().filter(|p| !p.as_os_str().is_empty()) {
        script.push_str(&format!("rmdir {} 2>/dev/null\n", sh_quote(stage_dir)));
    }
    if r.restart {
        script.push_str(&format!("{target} </dev/null >/dev/null 2>&1 &\n"));
    }
    script.push_str("rm -f \"$0\"\nrmdir \"$(dirname \"$0\")\" 2>/dev/null\n");
    script
}

/// Batch helper with the same contract as [`render_unix_script`].
pub fn render_windows_script(r: &Replacement) -> String {
    let mut script = format!(
        "@echo off\r\n\
         :wait\r\n\
         tasklist /FI \"PID eq {pid}\" | find \"{pid}\" >nul\r\n\
         if not errorlevel 1 (\r\n    \
         timeout /t 1 /nobreak >nul\r\n    \
         goto wait\r\n\
         )\r\n\
         move /Y \"{new}\" \"{target}\"\r\n",
        pid = r.pid,
        new = r.new_binary.display(),
        target = r.target.display(),
    );
    if r.restart {
        script.push_str(&format!("start \"\" \"{}\"\r\n", r.target.display()));
    }
    script.push_str("del \"%~f0\"\r\n");
    script
}

/// Writes the platform helper script into a fresh private directory under
/// `dir` and launches it detached from this process.
#[derive(Debug, Clone)]
pub struct ScriptScheduler {
    dir: PathBuf,
}

impl ScriptScheduler {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn script_name() -> String {
        let ext = if cfg!(windows) { "bat" } else { "sh" };
        format!("{SUPERVISOR_NAME}-updater.{ext}")
    }
}

impl ReplacementScheduler for ScriptScheduler {
    fn schedule(&self, replacement: &Replacement) -> std::io::Result<()> {
        let script_dir = tempfile::Builder::new()
            .prefix(&format!("{SUPERVISOR_NAME}-updater-"))
            .tempdir_in(&self.dir)?;
        let path = script_dir.path().join(Self::script_name());
        if cfg!(windows) {
            std::fs::write(&path, render_windows_script(replacement))?;
            debug!(script = %path.display(), "launching updater");
            platform::spawn_detached("cmd", [std::ffi::OsStr::new("/C"), path.as_os_str()])?;
        } else {
            std::fs::write(&path, render_unix_script(replacement))?;
            platform::set_executable(&path)?;
            debug!(script = %path.display(), "launching updater");
            platform::spawn_detached("bash", [path.as_os_str()])?;
        }
        // Owned by the helper from here on.
        let _ = script_dir.keep();
        Ok(())
    }
}
