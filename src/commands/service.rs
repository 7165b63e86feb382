use anyhow::Result;

use crate::api::{self, ClientError, Command};

/// Forward one command to the running supervisor and print its reply.
pub async fn run(port: u16, command: Command, name: &str) -> Result<()> {
    match api::send(port, command, name).await {
        Ok(message) => {
            println!("{message}");
            Ok(())
        }
        Err(ClientError::Remote(message)) => anyhow::bail!("{message}"),
        Err(e) => Err(e.into()),
    }
}
