// src/metrics.rs
//! Prometheus recorder plus the ops router (`/health`, `/metrics`).

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static DESCRIBED: OnceCell<()> = OnceCell::new();

/// Registers help text for every relay metric, once per process.
pub fn describe_all() {
    DESCRIBED.get_or_init(|| {
        describe_counter!("stream_messages_total", "Stream records received");
        describe_counter!("stream_duplicates_total", "Records at or below the topic cursor");
        describe_counter!("stream_errors_total", "Records flagged unreadable by the transport");
        describe_counter!("stream_poll_failures_total", "Failed stream polls (transport)");
        describe_counter!("alerts_classified_total", "Deliverable alerts by category");
        describe_counter!("alerts_suppressed_total", "Preliminary alerts withheld");
        describe_counter!("bulletins_dispatched_total", "GCN Circulars broadcast");
        describe_counter!("fanout_sent_total", "Messages delivered to subscribers");
        describe_counter!("fanout_failures_total", "Per-subscriber send failures");
        describe_counter!("state_write_failures_total", "Failed state file writes");
        describe_gauge!("bulletin_watermark", "Highest circular id dispatched");
        describe_gauge!("stream_last_poll_ts", "Unix time of the last successful stream poll");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Installs the global Prometheus recorder. Fails if one is already installed.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        describe_all();
        Ok(Self { handle })
    }

    /// Handle that renders without being installed globally (tests, tooling).
    pub fn detached() -> Self {
        Self {
            handle: PrometheusBuilder::new().build_recorder().handle(),
        }
    }

    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new()
            .route(
                "/health",
                get(|| async { "ok" }),
            )
            .route(
                "/metrics",
                get(move || {
                    let h = handle.clone();
                    async move { h.render() }
                }),
            )
    }
}
