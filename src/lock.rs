use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{FleetError, FleetResult, IoContext};

/// Exclusive per-machine lock held for the supervisor's lifetime.
///
/// The lock is an OS-level advisory lock on the file, not its content; the
/// file only records the owning pid for diagnostics. Dropping the value
/// releases the lock, as does process death.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    file: Option<File>,
}

impl InstanceLock {
    /// Take the lock at `path`, failing with `AlreadyRunning` when another
    /// holder owns it.
    pub fn acquire(path: &Path) -> FleetResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .io_context(|| format!("creating {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .io_context(|| format!("failed to open lock file {}", path.display()))?;

        let locked = crate::platform::try_lock_exclusive(&file)
            .io_context(|| format!("failed to lock {}", path.display()))?;
        if !locked {
            match recorded_holder(path) {
                Some(pid) => debug!(path = %path.display(), pid, "instance lock held"),
                None => debug!(path = %path.display(), "instance lock held by an unrecorded process"),
            }
            return Err(FleetError::AlreadyRunning);
        }

        // Content is diagnostic only; a failed write does not invalidate
        // the lock.
        if let Err(e) = write_pid(&mut file) {
            warn!(path = %path.display(), error = %e, "failed to record pid in lock file");
        }
        debug!(path = %path.display(), pid = std::process::id(), "instance lock acquired");

        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Release the OS lock and close the file. Safe to call repeatedly.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = crate::platform::unlock(&file) {
                warn!(path = %self.path.display(), error = %e, "failed to unlock instance lock");
            }
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Pid recorded in the lock file, if that process is still alive.
pub fn recorded_holder(path: &Path) -> Option<u32> {
    let content = std::fs::read_to_string(path).ok()?;
    let pid: u32 = content.trim().parse().ok()?;
    crate::platform::is_process_alive(pid).then_some(pid)
}

fn write_pid(file: &mut File) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    write!(file, "{}", std::process::id())?;
    file.flush()
}
