use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid command format")]
    InvalidFormat,

    #[error("unknown command")]
    UnknownCommand,

    #[error("invalid response: {0:?}")]
    InvalidResponse(String),
}

/// Operations the control API exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Update,
    Restart,
    Stop,
    Start,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Update => "update",
            Command::Restart => "restart",
            Command::Stop => "stop",
            Command::Start => "start",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "update" => Ok(Command::Update),
            "restart" => Ok(Command::Restart),
            "stop" => Ok(Command::Stop),
            "start" => Ok(Command::Start),
            _ => Err(ProtocolError::UnknownCommand),
        }
    }
}

/// A request line split at its first colon. The command is kept raw so an
/// unknown command can be reported as such rather than as a format error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: String,
    pub arg: String,
}

impl Request {
    pub fn new(command: Command, arg: &str) -> Self {
        Self {
            command: command.as_str().to_string(),
            arg: arg.to_string(),
        }
    }

    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let (command, arg) = line
            .trim()
            .split_once(':')
            .ok_or(ProtocolError::InvalidFormat)?;
        Ok(Self {
            command: command.to_string(),
            arg: arg.to_string(),
        })
    }

    /// Wire form, newline-terminated.
    pub fn encode(&self) -> String {
        format!("{}:{}\n", self.command, single_line(&self.arg))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok(String),
    Error(String),
}

impl Response {
    pub fn error(err: impl fmt::Display) -> Self {
        Response::Error(err.to_string())
    }

    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        match line.split_once(':') {
            Some(("ok", msg)) => Ok(Response::Ok(msg.to_string())),
            Some(("error", msg)) => Ok(Response::Error(msg.to_string())),
            _ => Err(ProtocolError::InvalidResponse(line.to_string())),
        }
    }

    /// Wire form, newline-terminated. Embedded line breaks are flattened so
    /// the reply stays a single line.
    pub fn encode(&self) -> String {
        match self {
            Response::Ok(msg) => format!("ok:{}\n", single_line(msg)),
            Response::Error(msg) => format!("error:{}\n", single_line(msg)),
        }
    }
}

fn single_line(s: &str) -> String {
    s.lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_splits_on_first_colon() {
        let req = Request::parse("start:svc:extra\n").unwrap();
        assert_eq!(req.command, "start");
        assert_eq!(req.arg, "svc:extra");
        assert_eq!(req.command.parse::<Command>(), Ok(Command::Start));
    }

    #[test]
    fn request_without_colon_is_invalid() {
        assert_eq!(Request::parse("start"), Err(ProtocolError::InvalidFormat));
        assert_eq!(Request::parse(""), Err(ProtocolError::InvalidFormat));
    }

    #[test]
    fn unknown_command() {
        let req = Request::parse("explode:svc").unwrap();
        assert_eq!(
            req.command.parse::<Command>(),
            Err(ProtocolError::UnknownCommand)
        );
    }

    #[test]
    fn response_lines() {
        assert_eq!(Response::Ok("started".into()).encode(), "ok:started\n");
        assert_eq!(
            Response::error("binary failed\n  details").encode(),
            "error:binary failed   details\n"
        );
        assert_eq!(Response::parse("ok:a:b\n"), Ok(Response::Ok("a:b".into())));
        assert_eq!(
            Response::parse("error:nope"),
            Ok(Response::Error("nope".into()))
        );
        assert!(matches!(
            Response::parse("maybe:so"),
            Err(ProtocolError::InvalidResponse(_))
        ));
        assert!(Response::parse("ok").is_err());
    }

    #[test]
    fn request_encoding() {
        assert_eq!(Request::new(Command::Update, "svc").encode(), "update:svc\n");
    }
}
