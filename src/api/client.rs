use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::protocol::{Command, ProtocolError, Request, Response};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("fleetvisor not running (port {0})")]
    NotRunning(u16),

    #[error("control connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The supervisor executed the request and reported a failure.
    #[error("{0}")]
    Remote(String),
}

/// Send one request to the supervisor on `port` and return the `ok:` message.
///
/// The reply is awaited without a deadline: updates can run for minutes.
pub async fn send(port: u16, command: Command, arg: &str) -> Result<String, ClientError> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let mut stream = match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        _ => return Err(ClientError::NotRunning(port)),
    };

    stream
        .write_all(Request::new(command, arg).encode().as_bytes())
        .await?;

    let mut line = String::new();
    BufReader::new(stream).read_line(&mut line).await?;
    match Response::parse(&line)? {
        Response::Ok(message) => Ok(message),
        Response::Error(message) => Err(ClientError::Remote(message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn reply_once(reply: &'static str) -> (u16, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut request = String::new();
            reader.read_line(&mut request).await.unwrap();
            reader.get_mut().write_all(reply.as_bytes()).await.unwrap();
            request
        });
        (port, task)
    }

    #[tokio::test]
    async fn ok_reply_returns_message() {
        let (port, task) = reply_once("ok:restarted\n").await;
        let msg = send(port, Command::Restart, "notes").await.unwrap();
        assert_eq!(msg, "restarted");
        assert_eq!(task.await.unwrap(), "restart:notes\n");
    }

    #[tokio::test]
    async fn error_reply_is_remote_error() {
        let (port, _task) = reply_once("error:service not installed: notes\n").await;
        let err = send(port, Command::Start, "notes").await.unwrap_err();
        assert_eq!(err.to_string(), "service not installed: notes");
    }

    #[tokio::test]
    async fn garbage_reply_is_protocol_error() {
        let (port, _task) = reply_once("hello\n").await;
        let err = send(port, Command::Stop, "notes").await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn closed_port_means_not_running() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = send(port, Command::Start, "notes").await.unwrap_err();
        assert!(matches!(err, ClientError::NotRunning(p) if p == port));
        assert_eq!(err.to_string(), format!("fleetvisor not running (port {port})"));
    }
}
