//! Listener: one task per accepted connection.

use super::handler::handle_session;
use super::Broker;
use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub struct Server {
    listener: TcpListener,
    broker: Broker,
}

impl Server {
    /// Bind the configured listen address.
    pub async fn bind(broker: Broker) -> Result<Self> {
        let addr = broker.config().listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("bind {}", addr))?;
        Ok(Self { listener, broker })
    }

    pub fn from_listener(listener: TcpListener, broker: Broker) -> Self {
        Self { listener, broker }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept forever. Accept errors are logged and do not stop the loop;
    /// session failures are logged by the session and never reach it.
    pub async fn serve(self) -> Result<()> {
        info!(addr = %self.local_addr()?, upstreams = self.broker.registry().len(), "listening");
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            let broker = self.broker.clone();
            tokio::spawn(async move {
                let _ = handle_session(stream, peer, &broker).await;
            });
        }
    }

    /// Serve until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            r = self.serve() => r,
            _ = shutdown => {
                info!("shutdown signal received");
                Ok(())
            }
        }
    }
}
