use anyhow::{Context, Result};

use crate::config::Settings;
use crate::selfupdate::SelfUpdater;

/// Replace the running binary with release `target` (`latest` for newest).
pub async fn run(settings: &Settings, target: &str) -> Result<()> {
    let updater = SelfUpdater::for_current_exe(settings, crate::http::client())?;
    updater
        .run(target, &|msg| println!("{msg}"))
        .await
        .context("update failed")?;
    Ok(())
}
