use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::fleet::Fleet;

use super::protocol::{Command, Request, Response};

/// How long a client may take to send its request line.
const READ_TIMEOUT: Duration = Duration::from_secs(10);
/// Grace period for in-flight requests once the server is cancelled.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Control API listener bound to the loopback interface.
pub struct ApiServer {
    listener: TcpListener,
    fleet: Fleet,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl ApiServer {
    pub async fn bind(port: u16, fleet: Fleet) -> std::io::Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).await?;
        Ok(Self {
            listener,
            fleet,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Token that stops [`ApiServer::serve`] when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Accept connections until cancelled, one task per connection, then
    /// give in-flight requests a bounded time to finish.
    pub async fn serve(self) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "control API listening");
        }
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "control connection");
                        let fleet = self.fleet.clone();
                        self.tracker.spawn(async move {
                            handle(stream, fleet).await;
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                _ = self.cancel.cancelled() => break,
            }
        }

        drop(self.listener);
        self.tracker.close();
        if tokio::time::timeout(DRAIN_TIMEOUT, self.tracker.wait())
            .await
            .is_err()
        {
            warn!("control API shut down with requests still in flight");
        }
    }
}

async fn handle(mut stream: TcpStream, fleet: Fleet) {
    let (read, mut write) = stream.split();
    let mut line = String::new();
    let read = tokio::time::timeout(READ_TIMEOUT, BufReader::new(read).read_line(&mut line)).await;

    let response = match read {
        Ok(Ok(n)) if n > 0 => match Request::parse(&line) {
            Ok(request) => dispatch(&fleet, request).await,
            Err(e) => Response::error(e),
        },
        _ => Response::Error("read failed".to_string()),
    };

    if let Err(e) = write.write_all(response.encode().as_bytes()).await {
        debug!(error = %e, "failed to write control response");
    }
    let _ = write.shutdown().await;
}

/// Execute one request against the fleet.
pub async fn dispatch(fleet: &Fleet, request: Request) -> Response {
    let command = match request.command.parse::<Command>() {
        Ok(command) => command,
        Err(e) => return Response::error(e),
    };
    let name = request.arg.trim();
    info!(command = %command, service = %name, "control request");

    let result = match command {
        Command::Update => {
            let messages = Arc::new(Mutex::new(Vec::<String>::new()));
            let sink = Arc::clone(&messages);
            let progress = move |msg: &str| {
                sink.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(msg.to_string());
            };
            fleet.update(name, &progress).await.map(|()| {
                messages
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .join("; ")
            })
        }
        Command::Restart => fleet.restart(name).await.map(|()| "restarted".to_string()),
        Command::Stop => fleet.stop(name).await.map(|()| "stopped".to_string()),
        Command::Start => fleet.start(name).await.map(|()| "started".to_string()),
    };

    match result {
        Ok(message) => Response::Ok(message),
        Err(e) => {
            warn!(command = %command, service = %name, error = %e, "control request failed");
            Response::error(e)
        }
    }
}
