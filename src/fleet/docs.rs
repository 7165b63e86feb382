//! Companion documentation for installed services.
//!
//! A docs-root service seeds the shared agent-instructions directory from its
//! repository; every other service gets `fleetvisor/<name>/CLAUDE.md` plus a
//! reference line in the shared `PROJECTS.md` index. All of it is
//! best-effort: failures are logged and never abort an install.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::catalog::Service;
use crate::config::SUPERVISOR_NAME;

use super::download::download_file;
use super::Fleet;

/// Files a docs-root service provides for the shared directory.
const ROOT_FILES: &[&str] = &["CLAUDE.md", "CODE.md", "PROJECTS.md", "MCP.md"];

const INDEX_FILE: &str = "PROJECTS.md";
const INDEX_HEADER: &str = "# Installed Services\n\n";
const SERVICE_DOC: &str = "CLAUDE.md";

/// The supervisor's own agent documentation, shipped inside the binary.
const BUNDLED_DOC: &str = include_str!("../../docs/AGENT.md");

/// Directory holding per-service docs inside the shared directory.
pub fn service_doc_dir(docs_dir: &Path, name: &str) -> PathBuf {
    docs_dir.join(SUPERVISOR_NAME).join(name)
}

fn reference_line(name: &str) -> String {
    format!("@{SUPERVISOR_NAME}/{name}/{SERVICE_DOC}")
}

/// Append the reference to `name`'s doc to the index unless already present.
/// Returns whether the index changed.
pub fn update_index(index: &Path, name: &str) -> std::io::Result<bool> {
    let line = reference_line(name);
    let existing = match std::fs::read_to_string(index) {
        Ok(content) => Some(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e),
    };
    if existing
        .as_deref()
        .is_some_and(|content| content.lines().any(|l| l.trim() == line))
    {
        return Ok(false);
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(index)?;
    match existing.as_deref() {
        None | Some("") => file.write_all(INDEX_HEADER.as_bytes())?,
        Some(content) if !content.ends_with('\n') => file.write_all(b"\n")?,
        Some(_) => {}
    }
    writeln!(file, "{line}")?;
    Ok(true)
}

impl Fleet {
    fn doc_url(&self, repo: &str, file: &str) -> String {
        format!("{}/{repo}/main/.claude/{file}", self.settings().raw_url)
    }

    pub(crate) async fn install_docs(&self, service: &Service) {
        let docs_dir = self.settings().docs_dir.clone();
        if let Err(e) = std::fs::create_dir_all(&docs_dir) {
            warn!(service = %service.name, error = %e, "cannot create docs directory");
            return;
        }
        if service.docs_root {
            self.install_root_docs(service, &docs_dir).await;
        } else {
            self.install_service_doc(service, &docs_dir).await;
        }
    }

    async fn install_root_docs(&self, service: &Service, docs_dir: &Path) {
        for file in ROOT_FILES {
            let dest = docs_dir.join(file);
            if dest.exists() {
                continue;
            }
            let url = self.doc_url(&service.repo, file);
            if let Err(e) = download_file(self.client(), &url, &dest, &|_| {}).await {
                debug!(service = %service.name, file, error = %e, "shared doc unavailable");
            }
        }

        let own = service_doc_dir(docs_dir, SUPERVISOR_NAME).join(SERVICE_DOC);
        if own.exists() {
            return;
        }
        let written = own
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|()| std::fs::write(&own, BUNDLED_DOC));
        if let Err(e) = written {
            warn!(path = %own.display(), error = %e, "failed to write supervisor doc");
        }
    }

    async fn install_service_doc(&self, service: &Service, docs_dir: &Path) {
        let dest = service_doc_dir(docs_dir, &service.name).join(SERVICE_DOC);
        let url = self.doc_url(&service.repo, SERVICE_DOC);
        if let Err(e) = download_file(self.client(), &url, &dest, &|_| {}).await {
            debug!(service = %service.name, error = %e, "service doc unavailable");
            return;
        }
        if let Err(e) = update_index(&docs_dir.join(INDEX_FILE), &service.name) {
            warn!(service = %service.name, error = %e, "failed to update docs index");
        }
    }
}
