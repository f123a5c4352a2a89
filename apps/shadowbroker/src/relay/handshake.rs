//! Client-facing SOCKS5 handshake.
//!
//! The greeting is always answered with "no authentication required",
//! whatever methods the client offered. Only CONNECT is served; the decision
//! on any other command is left to the session, which owns the single reply.

use super::errors::{RelayError, Result};
use core_socks::{Reply, TargetAddr, CMD_CONNECT, NO_AUTH_SELECTED};
use std::fmt;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// A parsed CONNECT request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub addr: TargetAddr,
    pub port: u16,
}

impl fmt::Display for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// Read the method-negotiation message and select no-auth.
pub async fn accept_greeting<S>(client: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let greeting = match core_socks::read_greeting(client).await {
        Ok(g) => g,
        Err(core_socks::Error::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
            return Err(RelayError::ClientSilent)
        }
        Err(e) => return Err(e.into()),
    };
    debug!(version = greeting.version, methods = ?greeting.methods, "greeting");
    client.write_all(&NO_AUTH_SELECTED).await?;
    Ok(())
}

/// Read the request that follows the greeting.
///
/// The full address is consumed before the command is checked, so an
/// unsupported command is reported only after the frame has been read.
pub async fn read_connect_request<S>(client: &mut S) -> Result<ConnectRequest>
where
    S: AsyncRead + Unpin,
{
    let req = core_socks::read_request(client)
        .await?
        .ok_or(RelayError::ClientSilent)?;
    if req.command != CMD_CONNECT {
        return Err(RelayError::UnsupportedCommand(req.command));
    }
    Ok(ConnectRequest {
        addr: req.addr,
        port: req.port,
    })
}

/// Write a reply frame and flush it.
pub async fn send_reply<S>(client: &mut S, reply: &Reply) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    client.write_all(&reply.encode()?).await?;
    client.flush().await?;
    Ok(())
}
