//! Upstream connection establishment.
//!
//! A direct decision dials the destination itself. Any other label names a
//! SOCKS5 proxy from the registry: the connector dials it and performs a
//! client-side handshake asking it to CONNECT to the original destination.

use super::errors::{RelayError, Result};
use super::handshake::ConnectRequest;
use super::registry::{RoutingDecision, UpstreamRegistry};
use core_socks::{Greeting, Request, METHOD_NO_AUTH, REP_SUCCESS, VERSION};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// An established connection to the next hop.
#[derive(Debug)]
pub struct UpstreamTarget {
    pub decision: RoutingDecision,
    pub stream: TcpStream,
    /// Local endpoint of `stream`, reported to the client as BND.ADDR.
    pub local: SocketAddr,
    /// "host:port" of the socket's peer: the destination, or the chaining proxy.
    pub next_hop: String,
}

#[derive(Debug, Clone)]
pub struct Connector {
    registry: Arc<UpstreamRegistry>,
    connect_timeout_secs: Option<u64>,
    strict_upstream: bool,
}

impl Connector {
    pub fn new(
        registry: Arc<UpstreamRegistry>,
        connect_timeout_secs: Option<u64>,
        strict_upstream: bool,
    ) -> Self {
        Self {
            registry,
            connect_timeout_secs,
            strict_upstream,
        }
    }

    pub fn registry(&self) -> &UpstreamRegistry {
        &self.registry
    }

    /// Resolve `decision` into a connected stream. No retries; a socket
    /// opened before a failure is dropped (and closed) on the error path.
    pub async fn connect(
        &self,
        decision: RoutingDecision,
        req: &ConnectRequest,
    ) -> Result<UpstreamTarget> {
        if decision.direct {
            let next_hop = req.to_string();
            let host = req.addr.host();
            let stream = with_timeout(self.connect_timeout_secs, dial(&host, req.port)).await?;
            let local = stream.local_addr()?;
            debug!(dest = %next_hop, %local, "direct connection established");
            return Ok(UpstreamTarget {
                decision,
                stream,
                local,
                next_hop,
            });
        }

        let entry = self.registry.lookup(&decision.label)?;
        let next_hop = format!("{}:{}", entry.addr, entry.port);
        let strict = self.strict_upstream;
        let label = decision.label.clone();
        let (stream, local) = with_timeout(self.connect_timeout_secs, async {
            let mut stream = dial(&entry.addr, entry.port).await?;
            let local = stream.local_addr()?;
            chain_handshake(&mut stream, &label, req, strict).await?;
            Ok::<_, RelayError>((stream, local))
        })
        .await?;
        debug!(upstream = %next_hop, label = %decision.label, dest = %req, "chained connection established");
        Ok(UpstreamTarget {
            decision,
            stream,
            local,
            next_hop,
        })
    }
}

async fn dial(host: &str, port: u16) -> Result<TcpStream> {
    TcpStream::connect((host, port))
        .await
        .map_err(|source| RelayError::Dial {
            target: format!("{}:{}", host, port),
            source,
        })
}

async fn with_timeout<T, F>(secs: Option<u64>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match secs {
        Some(s) => tokio::time::timeout(Duration::from_secs(s), fut)
            .await
            .map_err(|_| RelayError::Timeout { timeout_secs: s })?,
        None => fut.await,
    }
}

/// Client-side SOCKS5 exchange with a chaining upstream.
///
/// The CONNECT frame carries the client's original destination. Unless
/// `strict` is set, the upstream's method selection and reply status are
/// read but not checked.
pub async fn chain_handshake<S>(
    upstream: &mut S,
    label: &str,
    req: &ConnectRequest,
    strict: bool,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let fail = |source: io::Error| RelayError::UpstreamHandshake {
        label: label.to_string(),
        source,
    };
    let wire = |e: core_socks::Error| match e {
        core_socks::Error::Io(e) => fail(e),
        other => fail(io::Error::new(io::ErrorKind::InvalidData, other)),
    };

    let greeting = Greeting::no_auth().encode().map_err(wire)?;
    upstream.write_all(&greeting).await.map_err(fail)?;
    let mut selection = [0u8; 2];
    upstream.read_exact(&mut selection).await.map_err(fail)?;
    if strict && selection != [VERSION, METHOD_NO_AUTH] {
        return Err(RelayError::UpstreamRejected {
            label: label.to_string(),
            reason: format!("method selection {:02x?}", selection),
        });
    }

    let frame = Request::connect(req.addr.clone(), req.port)
        .encode()
        .map_err(wire)?;
    upstream.write_all(&frame).await.map_err(fail)?;
    upstream.flush().await.map_err(fail)?;

    let reply = core_socks::read_reply(upstream).await.map_err(wire)?;
    debug!(%label, status = reply.status, "upstream reply");
    if strict && reply.status != REP_SUCCESS {
        return Err(RelayError::UpstreamRejected {
            label: label.to_string(),
            reason: format!("CONNECT status 0x{:02x}", reply.status),
        });
    }
    Ok(())
}
