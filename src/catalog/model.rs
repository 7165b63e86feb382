use serde::{Deserialize, Serialize};

/// The catalog document: a version stamp plus every known service.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Registry {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub services: Vec<Service>,
}

/// A catalog entry describing how to install and run one service.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Service {
    pub name: String,
    pub repo: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub system_deps: Vec<SystemDep>,
    #[serde(default)]
    pub env_vars: Vec<EnvVar>,
    #[serde(default)]
    pub extra_assets: Vec<Asset>,
    /// Marks the service that provides the shared agent documentation.
    #[serde(default, alias = "claude_root")]
    pub docs_root: bool,
}

impl Service {
    pub fn is_daemon(&self) -> bool {
        self.kind == "daemon"
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub default: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Asset {
    pub url: String,
    /// Destination relative to the service directory.
    pub path: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// A host-level prerequisite with per-OS install hints.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct SystemDep {
    /// Command name looked up on PATH to decide whether it is already present.
    pub name: String,
    #[serde(default)]
    pub brew: Option<String>,
    #[serde(default)]
    pub apt: Option<String>,
    #[serde(default)]
    pub winget: Option<String>,
    #[serde(default)]
    pub unix_script: Option<String>,
    #[serde(default)]
    pub win_script: Option<String>,
}
