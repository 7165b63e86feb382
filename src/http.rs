use std::time::Duration;

/// Connect timeout applied to every outbound request.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Longest silence tolerated on an open connection, downloads included.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Whole-request timeout for small metadata requests (catalog, release info).
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(30);
/// Whole-request timeout for the latest-version lookup.
pub const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

const USER_AGENT: &str = concat!("fleetvisor/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP client. Redirects are followed (release downloads redirect to
/// object storage). Downloads carry no total timeout, only the per-read one.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(READ_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}
