// src/visual/mod.rs
//! Visualization resolver.
//!
//! Picks one image for an alert from an ordered chain of sources, richest first:
//! pre-rendered image → probability-map heatmap → single-point sky map. A source that
//! errors or comes back empty is a miss and the next one is tried. When every source
//! misses, a placeholder card is synthesized from the caption, so resolution never
//! comes back empty.

pub mod svg;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::alert::Alert;
use crate::fetch::HttpFetch;

/// An encoded image ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visual {
    pub bytes: Vec<u8>,
    pub mime: String,
    /// Which source produced it (for logs and tests).
    pub origin: &'static str,
}

impl Visual {
    pub fn new(bytes: Vec<u8>, mime: impl Into<String>, origin: &'static str) -> Self {
        Self {
            bytes,
            mime: mime.into(),
            origin,
        }
    }

    pub fn is_svg(&self) -> bool {
        self.mime == svg::SVG_MIME
    }

    /// File name with an extension matching the mime type.
    pub fn file_name(&self) -> &'static str {
        match self.mime.as_str() {
            "image/png" => "image.png",
            "image/gif" => "image.gif",
            svg::SVG_MIME => "image.svg",
            _ => "image.jpg",
        }
    }
}

/// One step in the chain. `None` means "miss, try the next one".
#[async_trait]
pub trait ImageSource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn attempt(&self, alert: &Alert) -> Option<Visual>;
}

/// Pluggable heatmap backend for probability-map files (HEALPix FITS).
#[async_trait]
pub trait SkymapRenderer: Send + Sync {
    async fn render_skymap(&self, url: &str, title: &str) -> Result<Visual>;
}

const IMAGE_EXTS: [&str; 3] = [".png", ".jpg", ".jpeg"];

fn mime_from_url(url: &str) -> Option<&'static str> {
    let lower = url.to_ascii_lowercase();
    if lower.ends_with(".png") {
        Some("image/png")
    } else if IMAGE_EXTS.iter().any(|e| lower.ends_with(e)) {
        Some("image/jpeg")
    } else {
        None
    }
}

/// Recognized probability-map file names.
pub fn is_probability_map(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.ends_with(".fits") || lower.ends_with(".fits.gz")
}

/// Downloads `alert.image_url` and keeps it only if it really is an image.
pub struct RemoteImage {
    fetcher: Arc<dyn HttpFetch>,
}

impl RemoteImage {
    pub fn new(fetcher: Arc<dyn HttpFetch>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ImageSource for RemoteImage {
    fn name(&self) -> &'static str {
        "remote_image"
    }

    async fn attempt(&self, alert: &Alert) -> Option<Visual> {
        let url = alert.image_url.as_deref()?;
        let fetched = match self.fetcher.fetch_bytes(url).await {
            Ok(f) => f,
            Err(e) => {
                tracing::debug!(target: "visual", url, error = ?e, "image download failed");
                return None;
            }
        };
        let mime = match fetched.content_type.as_deref() {
            Some(ct) if ct.starts_with("image/") => ct.split(';').next().unwrap_or(ct).trim().to_string(),
            _ => mime_from_url(url)?.to_string(),
        };
        Some(Visual::new(fetched.bytes, mime, self.name()))
    }
}

/// Hands recognized probability-map links to a [`SkymapRenderer`].
pub struct SkymapHeatmap {
    renderer: Arc<dyn SkymapRenderer>,
}

impl SkymapHeatmap {
    pub fn new(renderer: Arc<dyn SkymapRenderer>) -> Self {
        Self { renderer }
    }
}

#[async_trait]
impl ImageSource for SkymapHeatmap {
    fn name(&self) -> &'static str {
        "skymap_heatmap"
    }

    async fn attempt(&self, alert: &Alert) -> Option<Visual> {
        let url = alert.skymap_url.as_deref().filter(|u| is_probability_map(u))?;
        match self.renderer.render_skymap(url, "Skymap").await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!(target: "visual", url, error = ?e, "skymap render failed");
                None
            }
        }
    }
}

/// Single marker on an all-sky Aitoff map.
pub struct PointProjection;

#[async_trait]
impl ImageSource for PointProjection {
    fn name(&self) -> &'static str {
        "point_projection"
    }

    async fn attempt(&self, alert: &Alert) -> Option<Visual> {
        let pos = alert.position?;
        let svg = svg::aitoff_point(pos, "Localization (Aitoff)");
        Some(Visual::new(svg.into_bytes(), svg::SVG_MIME, self.name()))
    }
}

/// Last resort; always succeeds.
pub fn placeholder_card(caption: &str) -> Visual {
    Visual::new(
        svg::quick_card(caption).into_bytes(),
        svg::SVG_MIME,
        "placeholder_card",
    )
}

pub struct VisualResolver {
    sources: Vec<Arc<dyn ImageSource>>,
}

impl VisualResolver {
    pub fn new(sources: Vec<Arc<dyn ImageSource>>) -> Self {
        Self { sources }
    }

    /// The standard chain. Without a skymap renderer that step is skipped.
    pub fn standard(fetcher: Arc<dyn HttpFetch>, skymap: Option<Arc<dyn SkymapRenderer>>) -> Self {
        let mut sources: Vec<Arc<dyn ImageSource>> = vec![Arc::new(RemoteImage::new(fetcher))];
        if let Some(r) = skymap {
            sources.push(Arc::new(SkymapHeatmap::new(r)));
        }
        sources.push(Arc::new(PointProjection));
        Self { sources }
    }

    pub async fn resolve(&self, alert: &Alert) -> Visual {
        for source in &self.sources {
            match source.attempt(alert).await {
                Some(v) if !v.bytes.is_empty() => {
                    tracing::debug!(target: "visual", source = source.name(), "visual resolved");
                    return v;
                }
                _ => continue,
            }
        }
        placeholder_card(&alert.caption)
    }
}
