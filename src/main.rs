use clap::Parser;
use fleetvisor::cli::{Cli, Mode};
use fleetvisor::commands;
use fleetvisor::config::Settings;
use fleetvisor::selfupdate::version_line;

#[tokio::main]
async fn main() {
    let mode = Cli::parse().mode();

    // Quick informational modes never touch logging or configuration.
    match mode {
        Mode::Version => {
            println!("{}", version_line());
            return;
        }
        Mode::Health => {
            println!("OK");
            return;
        }
        _ => {}
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::from_env();

    let result = match mode {
        Mode::Daemon => commands::daemon::run(settings).await,
        Mode::SelfUpdate(target) => commands::update::run(&settings, &target).await,
        Mode::UpdateAll => commands::update_all::run(settings).await,
        Mode::Service(command, name) => {
            commands::service::run(settings.port, command, &name).await
        }
        Mode::Version | Mode::Health => Ok(()),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
