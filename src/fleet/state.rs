use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use crate::error::{FleetError, FleetResult, IoContext};

/// Durable record of which services were running when the supervisor last
/// shut down.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PersistedState {
    #[serde(default)]
    pub running_services: Vec<String>,
}

impl PersistedState {
    pub fn save(&self, path: &Path) -> FleetResult<()> {
        write_json_atomic(path, self)
    }

    /// Missing or unreadable files load as the empty state.
    pub fn load(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&content) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to parse state file");
                Self::default()
            }
        }
    }
}

/// Installed release version per service, recorded after a verified install.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VersionRecord {
    #[serde(default)]
    pub installed: BTreeMap<String, String>,
}

impl VersionRecord {
    pub fn load(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, path: &Path) -> FleetResult<()> {
        write_json_atomic(path, self)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.installed.get(name).map(String::as_str)
    }

    /// Read-modify-write a single entry. Updates are serialized so
    /// concurrent installs never drop each other's entries.
    pub fn set(path: &Path, name: &str, version: &str) -> FleetResult<()> {
        static RECORD_UPDATE: Mutex<()> = Mutex::new(());
        let _held = RECORD_UPDATE.lock().unwrap_or_else(PoisonError::into_inner);

        let mut record = Self::load(path);
        record
            .installed
            .insert(name.to_string(), version.to_string());
        record.save(path)
    }
}

/// Atomic write: serialize to a uniquely named sibling temp file, then
/// rename it over the final path.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> FleetResult<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).io_context(|| format!("creating {}", parent.display()))?;
    let content = serde_json::to_string_pretty(value).map_err(|e| FleetError::Io {
        context: format!("serializing {}", path.display()),
        source: std::io::Error::other(e),
    })?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .io_context(|| format!("failed to create temp file in {}", parent.display()))?;
    tmp.write_all(content.as_bytes())
        .and_then(|()| tmp.as_file().sync_all())
        .io_context(|| format!("failed to write {}", tmp.path().display()))?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .io_context(|| format!("failed to save {}", path.display()))?;
    Ok(())
}
