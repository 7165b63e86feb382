use serde::Deserialize;

use crate::config::paths::release_asset;
use crate::error::{FleetError, FleetResult};
use crate::http::VERSION_TIMEOUT;

#[derive(Debug, Deserialize)]
struct ReleaseInfo {
    #[serde(default)]
    name: String,
    #[serde(default)]
    tag_name: String,
}

/// Latest published version of `repo`, taken from the release title's last
/// word (falling back to the tag).
pub async fn latest_version(
    client: &reqwest::Client,
    api_url: &str,
    repo: &str,
) -> FleetResult<String> {
    let url = format!("{api_url}/repos/{repo}/releases/latest");
    let resp = client
        .get(&url)
        .header(reqwest::header::ACCEPT, "application/vnd.github+json")
        .timeout(VERSION_TIMEOUT)
        .send()
        .await
        .map_err(|e| FleetError::Release(format!("{repo}: {e}")))?;

    if !resp.status().is_success() {
        return Err(FleetError::Release(format!(
            "{repo}: HTTP {}",
            resp.status().as_u16()
        )));
    }

    let info: ReleaseInfo = resp
        .json()
        .await
        .map_err(|e| FleetError::Release(format!("{repo}: {e}")))?;

    let title = if info.name.trim().is_empty() {
        info.tag_name
    } else {
        info.name
    };
    let version = crate::version::from_release_name(title.trim());
    if version.is_empty() {
        return Err(FleetError::Release(format!("{repo}: release has no name")));
    }
    Ok(version)
}

/// Download URL of the newest release binary of `repo` for `name`.
pub fn latest_asset_url(github_url: &str, repo: &str, name: &str) -> String {
    format!(
        "{github_url}/{repo}/releases/latest/download/{}",
        release_asset(name)
    )
}

/// Download URL of a pinned release; `latest` or an empty tag mean newest.
pub fn tagged_asset_url(github_url: &str, repo: &str, tag: &str, name: &str) -> String {
    let tag = tag.trim();
    if tag.is_empty() || tag == "latest" {
        return latest_asset_url(github_url, repo, name);
    }
    format!(
        "{github_url}/{repo}/releases/download/{tag}/{}",
        release_asset(name)
    )
}
