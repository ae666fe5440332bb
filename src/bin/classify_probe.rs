//! Offline probe: classify one payload and render its visual without touching the network.
//!
//! Usage: `classify-probe <topic> [payload-file] [--out image-file]` (payload from stdin
//! when no file is given).

use anyhow::{bail, Context, Result};
use std::io::Read;
use std::sync::Arc;

use gcn_alert_relay::classify;
use gcn_alert_relay::testing::StaticFetcher;
use gcn_alert_relay::visual::VisualResolver;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let mut args = std::env::args().skip(1);
    let mut topic = None;
    let mut file = None;
    let mut out = None;
    while let Some(a) = args.next() {
        if a == "--out" {
            out = args.next();
        } else if topic.is_none() {
            topic = Some(a);
        } else {
            file = Some(a);
        }
    }
    let Some(topic) = topic else {
        bail!("usage: classify-probe <topic> [payload-file] [--out image-file]");
    };

    let payload = match &file {
        Some(p) => std::fs::read(p).with_context(|| format!("reading {p}"))?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf).context("reading stdin")?;
            buf
        }
    };

    let Some(alert) = classify(&topic, &payload) else {
        println!("discarded: not classified for topic {topic}");
        return Ok(());
    };
    println!("{}", serde_json::to_string_pretty(&alert)?);
    if !alert.is_deliverable() {
        println!("suppressed: would not be dispatched");
    }

    let resolver = VisualResolver::standard(Arc::new(StaticFetcher::new()), None);
    let visual = resolver.resolve(&alert).await;
    println!("visual: {} ({}, {} bytes)", visual.origin, visual.mime, visual.bytes.len());
    if let Some(path) = out {
        std::fs::write(&path, &visual.bytes).with_context(|| format!("writing {path}"))?;
        println!("written to {path}");
    }
    Ok(())
}
