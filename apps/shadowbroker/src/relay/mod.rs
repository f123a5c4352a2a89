//! SOCKS5 relay with per-destination upstream selection.
//!
//! # Flow
//!
//! A client greets, sends a CONNECT request, and the routing resolver maps
//! the destination host to a label. Direct labels dial the destination; any
//! other label names a SOCKS5 proxy in the registry, which the connector
//! dials and asks to CONNECT on the client's behalf. The client gets exactly
//! one reply, then bytes are relayed until either side closes.
//!
//! # Sharing
//!
//! Sessions share only the [`Broker`]: configuration, registry and resolver,
//! all immutable after startup. Each session owns its two sockets.

mod connector;
mod errors;
mod forwarder;
mod handler;
mod handshake;
mod registry;
mod routing;
mod server;

pub use connector::{chain_handshake, Connector, UpstreamTarget};
pub use errors::{RelayError, Result};
pub use forwarder::{relay, RelayOutcome, Side, Transfer, CHUNK_SIZE};
pub use handler::{handle_session, SessionSummary};
pub use handshake::ConnectRequest;
pub use registry::{RoutingDecision, UpstreamRegistry};
pub use routing::{RouteResolver, SuffixResolver};
pub use server::Server;

use crate::config::Config;
use std::sync::Arc;

/// Shared, read-only state handed to every session.
#[derive(Clone)]
pub struct Broker {
    config: Arc<Config>,
    connector: Connector,
    resolver: Arc<dyn RouteResolver>,
}

impl Broker {
    pub fn new(config: Config, resolver: Arc<dyn RouteResolver>) -> Self {
        let registry = Arc::new(UpstreamRegistry::from_config(&config));
        let connector = Connector::new(
            registry,
            config.connect_timeout_secs,
            config.strict_upstream,
        );
        Self {
            config: Arc::new(config),
            connector,
            resolver,
        }
    }

    /// Broker routing by the suffix rules in `config.routing`.
    pub fn from_config(config: Config) -> Self {
        let resolver = Arc::new(SuffixResolver::from_config(&config.routing));
        Self::new(config, resolver)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &UpstreamRegistry {
        self.connector.registry()
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    pub fn resolver(&self) -> &dyn RouteResolver {
        self.resolver.as_ref()
    }
}
