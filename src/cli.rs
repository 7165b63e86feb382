use clap::{ArgGroup, Parser};

use crate::api::Command;

#[derive(Debug, Parser)]
#[command(
    name = "fleetvisor",
    about = "Local supervisor for independently released service binaries",
    disable_version_flag = true,
    after_help = "With no options, runs the supervisor in the foreground.\n\n\
                  Environment:\n  FLEETVISOR_PORT    control API port (default: 7460)\n  \
                  FLEETVISOR_HOME    data directory (default: ~/.fleetvisor)",
    group(ArgGroup::new("mode").multiple(false))
)]
pub struct Cli {
    /// Show version
    #[arg(short = 'V', long, group = "mode")]
    pub version: bool,

    /// Check health
    #[arg(long, group = "mode")]
    pub health: bool,

    /// Replace this binary with the given release ("latest" for newest)
    #[arg(long, value_name = "VERSION", group = "mode")]
    pub update: Option<String>,

    /// Update all installed services
    #[arg(long, group = "mode")]
    pub update_all: bool,

    /// Update a service through the running supervisor
    #[arg(long, value_name = "NAME", group = "mode")]
    pub service_update: Option<String>,

    /// Restart a service through the running supervisor
    #[arg(long, value_name = "NAME", group = "mode")]
    pub service_restart: Option<String>,

    /// Stop a service through the running supervisor
    #[arg(long, value_name = "NAME", group = "mode")]
    pub service_stop: Option<String>,

    /// Start a service through the running supervisor
    #[arg(long, value_name = "NAME", group = "mode")]
    pub service_start: Option<String>,
}

/// What a single invocation does; at most one flag is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Daemon,
    Version,
    Health,
    SelfUpdate(String),
    UpdateAll,
    Service(Command, String),
}

impl Cli {
    pub fn mode(self) -> Mode {
        if self.version {
            return Mode::Version;
        }
        if self.health {
            return Mode::Health;
        }
        if self.update_all {
            return Mode::UpdateAll;
        }
        if let Some(target) = self.update {
            return Mode::SelfUpdate(target);
        }
        let service = [
            (Command::Update, self.service_update),
            (Command::Restart, self.service_restart),
            (Command::Stop, self.service_stop),
            (Command::Start, self.service_start),
        ]
        .into_iter()
        .find_map(|(command, name)| name.map(|name| Mode::Service(command, name)));
        service.unwrap_or(Mode::Daemon)
    }
}
