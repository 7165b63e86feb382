use thiserror::Error;

/// Failures surfaced by the service lifecycle engine.
///
/// Every variant renders a human-readable cause; the control API and CLI
/// print it verbatim after `error:` / `Error:`.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("service not installed: {0}")]
    NotInstalled(String),

    #[error("service not found: {0}")]
    UnknownService(String),

    #[error("{0} is already installing")]
    AlreadyInstalling(String),

    #[error("another instance is already running")]
    AlreadyRunning,

    #[error("failed to {action} dependency {dependency} of {service}: {source}")]
    DependencyFailed {
        action: &'static str,
        service: String,
        dependency: String,
        #[source]
        source: Box<FleetError>,
    },

    #[error("dependency cycle detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("download failed ({url}): {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("binary verification failed for {path}: {reason}")]
    VerificationFailed { path: String, reason: String },

    #[error("IPC stop failed for {0}")]
    IpcStopFailed(String),

    #[error("failed to install system dependency {name}: {reason}")]
    SystemDependencyFailed { name: String, reason: String },

    #[error("catalog unavailable: {0}")]
    Catalog(String),

    #[error("failed to start {service}: {source}")]
    Spawn {
        service: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("release lookup failed: {0}")]
    Release(String),
}

pub type FleetResult<T> = Result<T, FleetError>;

/// Attach a short description of the failed filesystem step to an io error.
pub trait IoContext<T> {
    fn io_context(self, context: impl FnOnce() -> String) -> FleetResult<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context(self, context: impl FnOnce() -> String) -> FleetResult<T> {
        self.map_err(|source| FleetError::Io {
            context: context(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_failure_names_both_services() {
        let err = FleetError::DependencyFailed {
            action: "start",
            service: "web".into(),
            dependency: "db".into(),
            source: Box::new(FleetError::NotInstalled("db".into())),
        };
        assert_eq!(
            err.to_string(),
            "failed to start dependency db of web: service not installed: db"
        );
    }

    #[test]
    fn cycle_renders_path() {
        let err = FleetError::DependencyCycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "dependency cycle detected: a -> b -> a");
    }

    #[test]
    fn io_context_wraps_error() {
        let res: std::io::Result<()> = Err(std::io::Error::other("disk full"));
        let err = res.io_context(|| "writing state".to_string()).unwrap_err();
        assert_eq!(err.to_string(), "writing state: disk full");
    }
}
