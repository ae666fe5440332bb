// src/ops.rs
//! Single-instance guard. The relay binds a fixed loopback port for its lifetime; a
//! second copy fails to bind and exits. The same listener serves the ops router.

use anyhow::{anyhow, Context, Result};
use axum::Router;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};

pub struct InstanceGuard {
    listener: TcpListener,
}

impl InstanceGuard {
    /// Binds `127.0.0.1:port`. An error means another instance is running.
    pub fn acquire(port: u16) -> Result<Self> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let listener = TcpListener::bind(addr)
            .map_err(|e| anyhow!("another instance appears to be running on {addr}: {e}"))?;
        listener
            .set_nonblocking(true)
            .context("setting lock listener non-blocking")?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves `router` on the held port until the process exits.
    pub async fn serve(self, router: Router) -> Result<()> {
        let listener = tokio::net::TcpListener::from_std(self.listener)
            .context("adopting lock listener")?;
        tracing::info!(target: "ops", addr = ?listener.local_addr().ok(), "ops endpoint listening");
        axum::serve(listener, router).await.context("ops server")
    }
}
