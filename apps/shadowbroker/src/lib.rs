//! Transparent SOCKS5 relay that sends each destination either directly or
//! through a named upstream SOCKS5 proxy.

pub mod config;
pub mod logging;
pub mod relay;

pub use config::Config;
pub use relay::{Broker, RelayError, Server};
