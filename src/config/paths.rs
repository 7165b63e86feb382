use std::path::{Path, PathBuf};

/// Filesystem layout rooted at the supervisor home directory.
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn services_dir(&self) -> PathBuf {
        self.root.join("services")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.state_dir().join("fleetvisor.lock")
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_dir().join("state.json")
    }

    pub fn versions_file(&self) -> PathBuf {
        self.state_dir().join("versions.json")
    }

    pub fn registry_cache(&self) -> PathBuf {
        self.state_dir().join("registry.yaml")
    }

    pub fn service_dir(&self, name: &str) -> PathBuf {
        self.services_dir().join(name)
    }

    pub fn service_binary(&self, name: &str) -> PathBuf {
        self.service_dir(name)
            .join(format!("{}{}", name, crate::platform::binary_ext()))
    }

    pub fn service_env_file(&self, name: &str) -> PathBuf {
        self.service_dir(name).join(".env")
    }

    pub fn service_port_file(&self, name: &str) -> PathBuf {
        self.service_dir(name).join(format!("{name}.port"))
    }

    /// Sidecar the active binary is renamed to during an update.
    pub fn service_sidecar(&self, name: &str) -> PathBuf {
        let mut os = self.service_binary(name).into_os_string();
        os.push(".old");
        PathBuf::from(os)
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.state_dir())?;
        std::fs::create_dir_all(self.services_dir())?;
        Ok(())
    }
}

/// `<os>-<arch>` tag used in release asset names.
pub fn platform_tag() -> String {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    };
    format!("{os}-{arch}")
}

/// Release asset name for a service binary on this platform.
pub fn release_asset(name: &str) -> String {
    format!("{}-{}{}", name, platform_tag(), crate::platform::binary_ext())
}
