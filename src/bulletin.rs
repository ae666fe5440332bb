// src/bulletin.rs
//! GCN Circulars poller.
//!
//! Scrapes the public circulars index, dispatches every entry above the persisted
//! watermark in ascending id order, then advances the watermark once per cycle.
//! Each entry is enriched from its body page with a sexagesimal position when the
//! text carries one.

use anyhow::{Context, Result};
use metrics::{counter, gauge};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::alert::{Alert, Category};
use crate::classify::coords::{extract_sexagesimal, SexagesimalFix};
use crate::fanout::{Broadcaster, Payload};
use crate::fetch::HttpFetch;
use crate::recent::RecentAlerts;
use crate::store::StateStore;

pub const DEFAULT_INDEX_CAP: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulletinEntry {
    pub id: u64,
    pub title: String,
    pub url: String,
}

static INDEX_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)href="(/circulars/(\d+))"[^>]*>(.*?)</a>"#).expect("index link regex")
});
static BR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").expect("br regex"));
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").expect("tag regex"));
static WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("ws regex"));

/// HTML → single-line plain text: tags dropped, entities decoded, whitespace collapsed.
pub fn strip_html(html: &str) -> String {
    let s = BR.replace_all(html, "\n");
    let s = TAG.replace_all(&s, " ");
    let s = html_escape::decode_html_entities(&s);
    WS.replace_all(&s, " ").trim().to_string()
}

/// Index page → newest-first entries, deduplicated by id (a later occurrence
/// overwrites an earlier one), at most `cap`.
pub fn parse_index(html: &str, base_url: &str, cap: usize) -> Vec<BulletinEntry> {
    let base = base_url.trim_end_matches('/');
    let mut by_id: BTreeMap<u64, BulletinEntry> = BTreeMap::new();

    for caps in INDEX_LINK.captures_iter(html) {
        let Some(id) = caps.get(2).and_then(|m| m.as_str().parse::<u64>().ok()) else {
            continue;
        };
        let rel = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let raw_title = caps.get(3).map(|m| m.as_str()).unwrap_or_default();
        let title = strip_html(raw_title);
        by_id.insert(
            id,
            BulletinEntry {
                id,
                title: if title.is_empty() {
                    format!("GCN Circular {id}")
                } else {
                    title
                },
                url: format!("{base}{rel}"),
            },
        );
    }

    by_id.into_values().rev().take(cap.max(1)).collect()
}

/// Entries strictly above `watermark`, oldest first.
pub fn unseen_ascending(entries: &[BulletinEntry], watermark: u64) -> Vec<BulletinEntry> {
    let mut fresh: Vec<BulletinEntry> = entries.iter().filter(|e| e.id > watermark).cloned().collect();
    fresh.sort_by_key(|e| e.id);
    fresh
}

fn position_block(fix: &SexagesimalFix) -> String {
    let mut s = format!(
        "\n\nPosition (J2000)\n• RA: {} ({:.5}°)\n• Dec: {} ({:.5}°)",
        fix.ra_text, fix.position.ra_deg, fix.dec_text, fix.position.dec_deg
    );
    if let Some(unc) = fix.uncertainty_arcsec {
        s.push_str(&format!("\n• Uncertainty: ±{unc:.2}\""));
    }
    s
}

/// Message broadcast for a new circular.
pub fn compose_text(entry: &BulletinEntry, fix: Option<&SexagesimalFix>) -> String {
    let mut s = format!("GCN Circular #{}\n{}\n{}", entry.id, entry.title, entry.url);
    if let Some(f) = fix {
        s.push_str(&position_block(f));
    }
    s
}

/// Reply to the on-demand "latest circular" command.
pub fn compose_latest_text(entry: &BulletinEntry, fix: Option<&SexagesimalFix>) -> String {
    let mut s = format!(
        "Latest GCN Circular\n#{} | {}\n{}",
        entry.id, entry.title, entry.url
    );
    if let Some(f) = fix {
        s.push_str(&position_block(f));
    }
    s
}

fn to_alert(entry: &BulletinEntry, fix: Option<&SexagesimalFix>) -> Alert {
    let mut alert = Alert::new(Category::Bulletin, compose_text(entry, fix));
    alert.label = Some(format!("GCN Circular {}", entry.id));
    if let Some(f) = fix {
        alert.position = Some(f.position);
        alert.position_uncertainty_arcsec = f.uncertainty_arcsec;
    }
    alert
}

/// Read side of the circulars archive. Shared by the poller and the on-demand command.
pub struct BulletinIndex {
    fetcher: Arc<dyn HttpFetch>,
    index_url: String,
    base_url: String,
    cap: usize,
}

impl BulletinIndex {
    pub fn new(
        fetcher: Arc<dyn HttpFetch>,
        index_url: impl Into<String>,
        base_url: impl Into<String>,
        cap: usize,
    ) -> Self {
        Self {
            fetcher,
            index_url: index_url.into(),
            base_url: base_url.into(),
            cap: cap.max(1),
        }
    }

    pub async fn fetch_entries(&self) -> Result<Vec<BulletinEntry>> {
        let html = self
            .fetcher
            .fetch_text(&self.index_url)
            .await
            .context("fetching circulars index")?;
        Ok(parse_index(&html, &self.base_url, self.cap))
    }

    /// Body position, stripped text first, then the raw HTML. Fetch failures are a miss.
    pub async fn enrich(&self, entry: &BulletinEntry) -> Option<SexagesimalFix> {
        let html = match self.fetcher.fetch_text(&entry.url).await {
            Ok(h) => h,
            Err(e) => {
                tracing::debug!(target: "bulletins", bulletin_id = entry.id, error = ?e, "body fetch failed");
                return None;
            }
        };
        extract_sexagesimal(&strip_html(&html)).or_else(|| extract_sexagesimal(&html))
    }

    /// Newest circular, regardless of the watermark.
    pub async fn latest(&self) -> Result<Option<(BulletinEntry, Option<SexagesimalFix>)>> {
        let entries = self.fetch_entries().await?;
        let Some(newest) = entries.into_iter().next() else {
            return Ok(None);
        };
        let fix = self.enrich(&newest).await;
        Ok(Some((newest, fix)))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub listed: usize,
    pub dispatched: usize,
    pub watermark: u64,
}

pub struct BulletinPoller {
    index: Arc<BulletinIndex>,
    broadcaster: Arc<Broadcaster>,
    store: StateStore,
    recent: Arc<RecentAlerts>,
    watermark: u64,
    interval: Duration,
}

impl BulletinPoller {
    /// Loads the persisted watermark (0 when absent).
    pub async fn new(
        index: Arc<BulletinIndex>,
        broadcaster: Arc<Broadcaster>,
        store: StateStore,
        recent: Arc<RecentAlerts>,
        interval: Duration,
    ) -> Self {
        let watermark = store.load_watermark().await;
        gauge!("bulletin_watermark").set(watermark as f64);
        Self {
            index,
            broadcaster,
            store,
            recent,
            watermark,
            interval,
        }
    }

    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    /// One cycle. The watermark is written at most once, after the batch.
    pub async fn poll_once(&mut self) -> Result<PollReport> {
        let entries = self.index.fetch_entries().await?;
        let fresh = unseen_ascending(&entries, self.watermark);
        let mut report = PollReport {
            listed: entries.len(),
            dispatched: 0,
            watermark: self.watermark,
        };
        let Some(max_id) = fresh.last().map(|e| e.id) else {
            return Ok(report);
        };

        for entry in &fresh {
            let fix = self.index.enrich(entry).await;
            let text = compose_text(entry, fix.as_ref());
            self.broadcaster
                .dispatch(Category::Bulletin, &Payload::Text(text))
                .await;
            self.recent.push("circulars", to_alert(entry, fix.as_ref()));
            counter!("bulletins_dispatched_total").increment(1);
            report.dispatched += 1;
        }

        self.watermark = self.watermark.max(max_id);
        report.watermark = self.watermark;
        gauge!("bulletin_watermark").set(self.watermark as f64);
        if let Err(e) = self.store.save_watermark(self.watermark).await {
            counter!("state_write_failures_total").increment(1);
            tracing::warn!(target: "bulletins", error = ?e, "failed to persist watermark");
        }
        tracing::info!(
            target: "bulletins",
            dispatched = report.dispatched,
            watermark = self.watermark,
            "circulars cycle done"
        );
        Ok(report)
    }

    /// Polls forever on a fixed interval; a failed cycle is retried next tick.
    pub async fn run(mut self) {
        let mut tick = tokio::time::interval(self.interval);
        loop {
            tick.tick().await;
            if let Err(e) = self.poll_once().await {
                tracing::warn!(target: "bulletins", error = ?e, "circulars poll failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"
        <ul>
          <li><a href="/circulars/101" class="x">GRB 230101A: <b>Swift</b> detection</a></li>
          <li><a href="/circulars/103">LIGO/Virgo S230102 &amp; friends</a></li>
          <li><a href="/circulars/102">old title</a></li>
          <li><a href="/circulars/102">new title</a></li>
          <li><a href="/about">About</a></li>
        </ul>"#;

    #[test]
    fn index_is_deduped_sorted_and_decoded() {
        let e = parse_index(INDEX, "https://gcn.nasa.gov/", 50);
        let ids: Vec<u64> = e.iter().map(|x| x.id).collect();
        assert_eq!(ids, vec![103, 102, 101]);
        assert_eq!(e[0].title, "LIGO/Virgo S230102 & friends");
        assert_eq!(e[1].title, "new title");
        assert_eq!(e[2].title, "GRB 230101A: Swift detection");
        assert_eq!(e[2].url, "https://gcn.nasa.gov/circulars/101");
    }

    #[test]
    fn index_cap_keeps_newest() {
        let e = parse_index(INDEX, "https://gcn.nasa.gov", 2);
        assert_eq!(e.iter().map(|x| x.id).collect::<Vec<_>>(), vec![103, 102]);
    }

    #[test]
    fn unseen_is_ascending_above_watermark() {
        let e = parse_index(INDEX, "https://gcn.nasa.gov", 50);
        let ids: Vec<u64> = unseen_ascending(&e, 101).iter().map(|x| x.id).collect();
        assert_eq!(ids, vec![102, 103]);
        assert!(unseen_ascending(&e, 103).is_empty());
    }

    #[test]
    fn strip_html_collapses() {
        assert_eq!(strip_html("<p>a<br/>b&nbsp; c</p>"), "a b c");
    }

    #[test]
    fn text_carries_position_block() {
        let entry = BulletinEntry {
            id: 7,
            title: "GRB X".into(),
            url: "https://gcn.nasa.gov/circulars/7".into(),
        };
        let body = r#"RA (J2000): 12h 30m 00.0s Dec (J2000): -00d 30' 00.0" with an uncertainty of 3.5 arcsec"#;
        let fix = extract_sexagesimal(body).unwrap();
        let text = compose_text(&entry, Some(&fix));
        assert!(text.starts_with("GCN Circular #7\nGRB X\n"));
        assert!(text.contains("(187.50000°)"));
        assert!(text.contains("(-0.50000°)"));
        assert!(text.contains("±3.50\""));
        assert!(!compose_text(&entry, None).contains("Position"));
    }
}
