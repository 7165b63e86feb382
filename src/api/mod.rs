//! Local control API: one `command:argument` line in, one `ok:`/`error:`
//! line out, per TCP connection.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{send, ClientError};
pub use protocol::{Command, ProtocolError, Request, Response};
pub use server::ApiServer;
