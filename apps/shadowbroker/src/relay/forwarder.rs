//! Duplex byte relay between the client and the next hop.
//!
//! One task waits on both sockets at once and moves at most `CHUNK_SIZE`
//! bytes per wakeup. Branches are polled in random order so neither
//! direction can starve the other. EOF from either side ends the relay for
//! both; there is no half-close. Dropping the streams on return closes both
//! sockets.

use super::errors::{RelayError, Result};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

pub const CHUNK_SIZE: usize = 4096;

/// Which endpoint ended the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Upstream,
}

/// Byte counters, from the client's point of view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transfer {
    /// Client -> upstream.
    pub sent: u64,
    /// Upstream -> client.
    pub received: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    pub transfer: Transfer,
    pub closed_by: Side,
}

enum Ready {
    Client(io::Result<usize>),
    Upstream(io::Result<usize>),
    Idle,
}

/// Relay until either side closes or faults. `idle_timeout_secs` of `None`
/// waits forever for activity.
pub async fn relay<C, U>(client: C, upstream: U, idle_timeout_secs: Option<u64>) -> Result<RelayOutcome>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_rd, mut client_wr) = tokio::io::split(client);
    let (mut upstream_rd, mut upstream_wr) = tokio::io::split(upstream);
    let mut client_buf = vec![0u8; CHUNK_SIZE];
    let mut upstream_buf = vec![0u8; CHUNK_SIZE];
    let idle = idle_timeout_secs.map(Duration::from_secs);
    let mut t = Transfer::default();

    let fault = |t: Transfer, source: io::Error| RelayError::Relay {
        sent: t.sent,
        received: t.received,
        source,
    };

    loop {
        let ready = tokio::select! {
            r = client_rd.read(&mut client_buf) => Ready::Client(r),
            r = upstream_rd.read(&mut upstream_buf) => Ready::Upstream(r),
            _ = idle_wait(idle) => Ready::Idle,
        };

        match ready {
            Ready::Client(Ok(0)) => return Ok(done(t, Side::Client)),
            Ready::Client(Ok(n)) => {
                upstream_wr
                    .write_all(&client_buf[..n])
                    .await
                    .map_err(|e| fault(t, e))?;
                t.sent += n as u64;
            }
            Ready::Upstream(Ok(0)) => return Ok(done(t, Side::Upstream)),
            Ready::Upstream(Ok(n)) => {
                client_wr
                    .write_all(&upstream_buf[..n])
                    .await
                    .map_err(|e| fault(t, e))?;
                t.received += n as u64;
            }
            Ready::Client(Err(e)) | Ready::Upstream(Err(e)) => return Err(fault(t, e)),
            Ready::Idle => {
                let secs = idle_timeout_secs.unwrap_or_default();
                debug!(sent = t.sent, received = t.received, "relay idle timeout");
                return Err(RelayError::Timeout { timeout_secs: secs });
            }
        }
    }
}

async fn idle_wait(idle: Option<Duration>) {
    match idle {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

fn done(transfer: Transfer, closed_by: Side) -> RelayOutcome {
    debug!(sent = transfer.sent, received = transfer.received, ?closed_by, "relay finished");
    RelayOutcome {
        transfer,
        closed_by,
    }
}
