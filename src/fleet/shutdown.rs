//! Client side of the per-service shutdown protocol.
//!
//! A daemon writes the port of its private control listener to
//! `<name>.port` in its service directory and answers `STOP` with `OK` and
//! `PING` with `PONG`, one line each.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::Fleet;

const STOP_DIAL_TIMEOUT: Duration = Duration::from_secs(2);
const STOP_REPLY_TIMEOUT: Duration = Duration::from_secs(5);
const PING_DIAL_TIMEOUT: Duration = Duration::from_secs(1);
const PING_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// Ask the service owning `port_file` to exit. True only when it
/// acknowledged with `OK`.
pub async fn send_stop(port_file: &Path) -> bool {
    exchange(port_file, "STOP", "OK", STOP_DIAL_TIMEOUT, STOP_REPLY_TIMEOUT).await
}

/// Liveness check. True only when the service answered `PONG`.
pub async fn ping(port_file: &Path) -> bool {
    exchange(port_file, "PING", "PONG", PING_DIAL_TIMEOUT, PING_REPLY_TIMEOUT).await
}

/// Port published in a port file; `None` when absent or malformed.
pub fn read_port(port_file: &Path) -> Option<u16> {
    std::fs::read_to_string(port_file)
        .ok()?
        .trim()
        .parse()
        .ok()
        .filter(|port| *port != 0)
}

async fn exchange(
    port_file: &Path,
    request: &str,
    expected: &str,
    dial: Duration,
    reply: Duration,
) -> bool {
    let Some(port) = read_port(port_file) else {
        debug!(path = %port_file.display(), "no usable port file");
        return false;
    };
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));

    let mut stream = match timeout(dial, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            debug!(%addr, error = %e, "shutdown protocol dial failed");
            return false;
        }
        Err(_) => {
            debug!(%addr, "shutdown protocol dial timed out");
            return false;
        }
    };

    let round_trip = async {
        stream.write_all(format!("{request}\n").as_bytes()).await?;
        let mut line = String::new();
        BufReader::new(&mut stream).read_line(&mut line).await?;
        Ok::<_, std::io::Error>(line)
    };

    match timeout(reply, round_trip).await {
        Ok(Ok(line)) => line.trim() == expected,
        Ok(Err(e)) => {
            debug!(%addr, request, error = %e, "shutdown protocol exchange failed");
            false
        }
        Err(_) => {
            debug!(%addr, request, "shutdown protocol reply timed out");
            false
        }
    }
}

impl Fleet {
    /// Check whether the service's own control listener answers. Only
    /// daemon services publish one.
    pub async fn is_running(&self, name: &str) -> bool {
        match self.catalog().get(name).await {
            Ok(service) if service.is_daemon() => {
                ping(&self.paths().service_port_file(name)).await
            }
            Ok(_) => false,
            Err(e) => {
                debug!(service = %name, error = %e, "liveness check skipped");
                false
            }
        }
    }
}
