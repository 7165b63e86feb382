pub mod envfile;
pub mod paths;

use std::path::PathBuf;

pub use paths::Paths;

pub const DEFAULT_PORT: u16 = 7460;
pub const DEFAULT_REGISTRY_URL: &str =
    "https://raw.githubusercontent.com/fleetvisor/fleetvisor/main/registry.yaml";
pub const DEFAULT_GITHUB_URL: &str = "https://github.com";
pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_RAW_URL: &str = "https://raw.githubusercontent.com";

/// Repository the supervisor itself is released from.
pub const SUPERVISOR_REPO: &str = "fleetvisor/fleetvisor";
pub const SUPERVISOR_NAME: &str = "fleetvisor";

/// Runtime configuration, read once from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub home: PathBuf,
    pub registry_url: String,
    pub github_url: String,
    pub api_url: String,
    pub raw_url: String,
    pub link_dir: PathBuf,
    pub docs_dir: PathBuf,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup. Unset or empty
    /// variables fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let user_home = crate::platform::home_dir().unwrap_or_else(|| PathBuf::from("."));

        let port = get("FLEETVISOR_PORT")
            .and_then(|p| p.trim().parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);

        Self {
            port,
            home: get("FLEETVISOR_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| user_home.join(".fleetvisor")),
            registry_url: get("FLEETVISOR_REGISTRY_URL")
                .unwrap_or_else(|| DEFAULT_REGISTRY_URL.to_string()),
            github_url: trim_url(get("FLEETVISOR_GITHUB_URL"), DEFAULT_GITHUB_URL),
            api_url: trim_url(get("FLEETVISOR_API_URL"), DEFAULT_API_URL),
            raw_url: trim_url(get("FLEETVISOR_RAW_URL"), DEFAULT_RAW_URL),
            link_dir: get("FLEETVISOR_LINK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/usr/local/bin")),
            docs_dir: get("FLEETVISOR_DOCS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| user_home.join(".claude")),
        }
    }

    pub fn paths(&self) -> Paths {
        Paths::new(&self.home)
    }
}

fn trim_url(value: Option<String>, default: &str) -> String {
    value
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}
