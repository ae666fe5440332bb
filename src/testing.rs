// src/testing.rs
//! In-memory doubles for the external collaborators (Telegram, HTTP, the alert
//! stream, skymap rendering). Used by the integration tests and `classify-probe`.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::fetch::{Fetched, HttpFetch};
use crate::notify::{Keyboard, Notifier};
use crate::registry::SubscriberId;
use crate::stream::{AlertStream, StreamMessage};
use crate::visual::{svg, SkymapRenderer, Visual};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text {
        to: String,
        text: String,
    },
    Image {
        to: String,
        mime: String,
        origin: &'static str,
        caption: Option<String>,
    },
}

impl Sent {
    pub fn recipient(&self) -> &str {
        match self {
            Sent::Text { to, .. } | Sent::Image { to, .. } => to,
        }
    }
}

/// Records every send; recipients in `failing` get an error instead.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Sent>>,
    failing: HashSet<String>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(ids: &[&str]) -> Self {
        Self {
            sent: Mutex::new(vec![]),
            failing: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn recipients(&self) -> Vec<String> {
        self.sent().iter().map(|s| s.recipient().to_string()).collect()
    }

    fn check(&self, to: &SubscriberId) -> Result<()> {
        if self.failing.contains(to.as_str()) {
            return Err(anyhow!("recipient {to} unreachable"));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_text(
        &self,
        to: &SubscriberId,
        text: &str,
        _keyboard: Option<&Keyboard>,
    ) -> Result<()> {
        self.check(to)?;
        self.sent.lock().unwrap().push(Sent::Text {
            to: to.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_image(
        &self,
        to: &SubscriberId,
        image: &Visual,
        caption: Option<&str>,
    ) -> Result<()> {
        self.check(to)?;
        self.sent.lock().unwrap().push(Sent::Image {
            to: to.to_string(),
            mime: image.mime.clone(),
            origin: image.origin,
            caption: caption.map(str::to_string),
        });
        Ok(())
    }
}

/// URL → canned response. Unknown URLs fail like a 404.
#[derive(Default)]
pub struct StaticFetcher {
    texts: Mutex<HashMap<String, String>>,
    bytes: HashMap<String, Fetched>,
    pub requests: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(self, url: &str, body: &str) -> Self {
        self.texts
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_string());
        self
    }

    pub fn with_bytes(mut self, url: &str, bytes: Vec<u8>, content_type: Option<&str>) -> Self {
        self.bytes.insert(
            url.to_string(),
            Fetched {
                bytes,
                content_type: content_type.map(str::to_string),
            },
        );
        self
    }

    /// Replaces a page between polls.
    pub fn set_text(&self, url: &str, body: &str) {
        self.texts
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_string());
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpFetch for StaticFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        self.requests.lock().unwrap().push(url.to_string());
        self.texts
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("GET {url}: 404"))
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Fetched> {
        self.requests.lock().unwrap().push(url.to_string());
        self.bytes
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("GET {url}: 404"))
    }
}

/// Plays back scripted poll results. Once the script is exhausted every poll waits
/// out its timeout and returns an empty batch, like an idle broker.
#[derive(Default)]
pub struct ScriptedStream {
    script: VecDeque<Result<Vec<StreamMessage>>>,
}

impl ScriptedStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_batch(mut self, batch: Vec<StreamMessage>) -> Self {
        self.script.push_back(Ok(batch));
        self
    }

    pub fn then_failure(mut self, reason: &str) -> Self {
        self.script.push_back(Err(anyhow!(reason.to_string())));
        self
    }
}

#[async_trait]
impl AlertStream for ScriptedStream {
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<StreamMessage>> {
        match self.script.pop_front() {
            Some(next) => next,
            None => {
                tokio::time::sleep(timeout).await;
                Ok(Vec::new())
            }
        }
    }
}

/// Renders a card for any map, or always fails.
pub struct FakeSkymapRenderer {
    pub fail: bool,
}

#[async_trait]
impl SkymapRenderer for FakeSkymapRenderer {
    async fn render_skymap(&self, url: &str, title: &str) -> Result<Visual> {
        if self.fail {
            return Err(anyhow!("cannot read {url}"));
        }
        Ok(Visual::new(
            svg::quick_card(&format!("{title}\n{url}")).into_bytes(),
            svg::SVG_MIME,
            "fake_skymap",
        ))
    }
}
