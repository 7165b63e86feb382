use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::api::ApiServer;
use crate::catalog::Catalog;
use crate::config::Settings;
use crate::fleet::Fleet;
use crate::lock::InstanceLock;
use crate::selfupdate::VERSION;

/// Run the supervisor in the foreground until Ctrl-C or SIGTERM.
pub async fn run(settings: Settings) -> Result<()> {
    let paths = settings.paths();
    paths
        .ensure_dirs()
        .with_context(|| format!("failed to create {}", paths.root().display()))?;

    let mut lock = InstanceLock::acquire(&paths.lock_file())?;

    let client = crate::http::client();
    let catalog = Arc::new(Catalog::new(&settings, client.clone()));
    if let Err(e) = catalog.load().await {
        warn!(error = %e, "catalog unavailable at startup");
    }
    let fleet = Fleet::with_client(settings.clone(), catalog, client);

    let removed = fleet.collect_stale_sidecars();
    if removed > 0 {
        info!(count = removed, "removed stale update sidecars");
    }

    let server = ApiServer::bind(settings.port, fleet.clone())
        .await
        .with_context(|| format!("failed to bind control API on port {}", settings.port))?;
    let api_cancel = server.cancel_token();
    let api = tokio::spawn(server.serve());

    info!(version = VERSION, port = settings.port, "started");
    fleet.restore_state().await;

    shutdown_signal().await;
    eprintln!("\nShutting down...");

    api_cancel.cancel();
    if let Err(e) = api.await {
        warn!(error = %e, "control API task failed");
    }

    if let Err(e) = fleet.save_state() {
        warn!(error = %e, "failed to save state");
    }
    fleet.shutdown().await;
    lock.release();
    info!("stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}
