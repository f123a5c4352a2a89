//! Per-connection session lifecycle.

use super::errors::{RelayError, Result};
use super::forwarder::{relay, Transfer};
use super::handshake::{accept_greeting, read_connect_request, send_reply, ConnectRequest};
use super::Broker;
use core_socks::Reply;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

/// What a completed session did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub target: String,
    pub label: String,
    pub transfer: Transfer,
}

/// Drive one client connection to completion.
///
/// Flow:
/// 1. Greeting, answered with no-auth
/// 2. CONNECT request
/// 3. Route lookup and upstream connect (direct or chained)
/// 4. Exactly one reply: success with the bound endpoint, or the failure status
/// 5. Relay until either side closes
///
/// Both sockets are closed when this returns, whatever the outcome. A
/// failure is logged here, with the destination once it is known, and then
/// returned; the only reply sent on an error path is the one its
/// `reply_code` asks for.
pub async fn handle_session<S>(client: S, peer: SocketAddr, broker: &Broker) -> Result<SessionSummary>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut dest = None;
    let result = drive(client, peer, broker, &mut dest).await;
    if let Err(e) = &result {
        log_failure(peer, dest.as_ref(), e);
    }
    result
}

async fn drive<S>(
    mut client: S,
    peer: SocketAddr,
    broker: &Broker,
    dest: &mut Option<ConnectRequest>,
) -> Result<SessionSummary>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    info!(client = %peer, "connected");
    accept_greeting(&mut client).await?;

    let req = match read_connect_request(&mut client).await {
        Ok(r) => r,
        Err(e) => return Err(reply_failure(&mut client, e).await),
    };
    info!(client = %peer, dest = %req, "accepted");
    *dest = Some(req.clone());

    let host = req.addr.host();
    let label = broker.resolver().resolve(&host);
    let decision = broker.registry().decide(&label);
    debug!(%host, %label, direct = decision.direct, "route decision");

    let upstream = match broker.connector().connect(decision, &req).await {
        Ok(u) => u,
        Err(e) => return Err(reply_failure(&mut client, e).await),
    };
    info!(
        client = %peer,
        label = %upstream.decision.label,
        direct = upstream.decision.direct,
        bound = %upstream.local,
        next_hop = %upstream.next_hop,
        dest = %req,
        "route established"
    );

    send_reply(&mut client, &Reply::success(upstream.local)).await?;

    let outcome = relay(client, upstream.stream, broker.config().idle_timeout_secs).await?;
    info!(
        client = %peer,
        bytes_read = outcome.transfer.received,
        bytes_sent = outcome.transfer.sent,
        closed_by = ?outcome.closed_by,
        "connection closed"
    );
    Ok(SessionSummary {
        target: req.to_string(),
        label: upstream.decision.label,
        transfer: outcome.transfer,
    })
}

fn log_failure(peer: SocketAddr, dest: Option<&ConnectRequest>, e: &RelayError) {
    let dest = dest.map(ToString::to_string).unwrap_or_else(|| "-".to_string());
    match e {
        RelayError::ClientSilent => {
            warn!(client = %peer, kind = e.type_name(), "aborted: client didn't say anything")
        }
        RelayError::Relay { sent, received, .. } => error!(
            client = %peer,
            dest = %dest,
            kind = e.type_name(),
            bytes_sent = sent,
            bytes_read = received,
            error = %e,
            "socket error while transferring"
        ),
        _ => error!(client = %peer, dest = %dest, kind = e.type_name(), error = %e, "session failed"),
    }
}

// Sends the failure reply `err` calls for, if any, and hands the error back.
async fn reply_failure<S>(client: &mut S, err: RelayError) -> RelayError
where
    S: AsyncWrite + Unpin,
{
    if let Some(code) = err.reply_code() {
        if let Err(e) = send_reply(client, &Reply::failure(code)).await {
            debug!(error = %e, "failure reply not delivered");
        }
    }
    err
}
