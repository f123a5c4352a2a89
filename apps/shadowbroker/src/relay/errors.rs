//! Session error types.

use core_socks::{REP_ATYP_NOT_SUPPORTED, REP_CMD_NOT_SUPPORTED, REP_CONNECT_FAILED};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("client closed the connection without sending a request")]
    ClientSilent,

    #[error("unsupported command 0x{0:02x}")]
    UnsupportedCommand(u8),

    #[error("unsupported address type 0x{0:02x}")]
    UnsupportedAddressType(u8),

    #[error("malformed frame: {0}")]
    Protocol(String),

    #[error("unknown upstream label '{label}'")]
    UnknownUpstream { label: String },

    #[error("failed to connect to {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("handshake with upstream '{label}' failed: {source}")]
    UpstreamHandshake {
        label: String,
        #[source]
        source: std::io::Error,
    },

    #[error("upstream '{label}' refused: {reason}")]
    UpstreamRejected { label: String, reason: String },

    #[error("connection timeout after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("transfer failed after {sent} bytes sent, {received} bytes received: {source}")]
    Relay {
        sent: u64,
        received: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// SOCKS5 status sent to the client for this failure, or `None` when the
    /// connection is closed without a reply.
    pub fn reply_code(&self) -> Option<u8> {
        match self {
            RelayError::UnsupportedCommand(_) => Some(REP_CMD_NOT_SUPPORTED),
            RelayError::UnsupportedAddressType(_) => Some(REP_ATYP_NOT_SUPPORTED),
            RelayError::Dial { .. } => Some(REP_CONNECT_FAILED),
            RelayError::UpstreamHandshake { .. } => Some(REP_CONNECT_FAILED),
            RelayError::UpstreamRejected { .. } => Some(REP_CONNECT_FAILED),
            RelayError::Timeout { .. } => Some(REP_CONNECT_FAILED),
            RelayError::ClientSilent => None,
            RelayError::Protocol(_) => None,
            RelayError::UnknownUpstream { .. } => None,
            RelayError::Relay { .. } => None,
            RelayError::Io(_) => None,
        }
    }

    /// Get type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            RelayError::ClientSilent => "client_silent",
            RelayError::UnsupportedCommand(_) => "unsupported_command",
            RelayError::UnsupportedAddressType(_) => "unsupported_address_type",
            RelayError::Protocol(_) => "protocol_error",
            RelayError::UnknownUpstream { .. } => "unknown_upstream",
            RelayError::Dial { .. } => "dial_failed",
            RelayError::UpstreamHandshake { .. } => "upstream_handshake",
            RelayError::UpstreamRejected { .. } => "upstream_rejected",
            RelayError::Timeout { .. } => "timeout",
            RelayError::Relay { .. } => "relay_fault",
            RelayError::Io(_) => "io_error",
        }
    }
}

impl From<core_socks::Error> for RelayError {
    fn from(e: core_socks::Error) -> Self {
        match e {
            core_socks::Error::Io(e) => RelayError::Io(e),
            core_socks::Error::UnsupportedAddressType(atyp) => {
                RelayError::UnsupportedAddressType(atyp)
            }
            other => RelayError::Protocol(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
