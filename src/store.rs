// src/store.rs
//! Durable state: three independent JSON records under one directory.
//!
//! - `seen_offsets.json`: stream cursors `{topic or topic#partition: last_position}`
//! - `subscribers.json`: subscriber registry `{id: {filters, muted}}`
//! - `circulars_seen.json`: bulletin watermark `{"last_id": N}`
//!
//! Every write is write-temp-then-rename, so a crash leaves either the old or the new
//! record on disk. Reads never fail: a missing file is the empty record and a corrupt
//! one is logged and treated as empty.

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const CURSORS_FILE: &str = "seen_offsets.json";
pub const SUBSCRIBERS_FILE: &str = "subscribers.json";
pub const WATERMARK_FILE: &str = "circulars_seen.json";

/// Last processed position per stream source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursors(BTreeMap<String, i64>);

impl Cursors {
    pub fn get(&self, source: &str) -> Option<i64> {
        self.0.get(source).copied()
    }

    /// True when `position` is at or behind the recorded cursor.
    pub fn is_processed(&self, source: &str, position: i64) -> bool {
        self.get(source).is_some_and(|last| position <= last)
    }

    /// Moves the cursor forward; never backwards. Returns whether it moved.
    pub fn advance(&mut self, source: &str, position: i64) -> bool {
        match self.0.get_mut(source) {
            Some(last) if *last >= position => false,
            Some(last) => {
                *last = position;
                true
            }
            None => {
                self.0.insert(source.to_string(), position);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Persisted shape of one subscriber. Filter keys are kept as raw strings so that
/// legacy keys survive until the registry migrates them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberRecord {
    #[serde(default)]
    pub filters: BTreeMap<String, bool>,
    #[serde(default)]
    pub muted: bool,
}

pub type SubscriberRecords = BTreeMap<String, SubscriberRecord>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct WatermarkRecord {
    #[serde(default)]
    last_id: u64,
}

#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    pub async fn load_cursors(&self) -> Cursors {
        read_json(&self.path(CURSORS_FILE)).await
    }

    pub async fn save_cursors(&self, cursors: &Cursors) -> Result<()> {
        write_json_atomic(&self.path(CURSORS_FILE), cursors).await
    }

    pub async fn load_subscribers(&self) -> SubscriberRecords {
        read_json(&self.path(SUBSCRIBERS_FILE)).await
    }

    pub async fn save_subscribers(&self, subs: &SubscriberRecords) -> Result<()> {
        write_json_atomic(&self.path(SUBSCRIBERS_FILE), subs).await
    }

    pub async fn load_watermark(&self) -> u64 {
        read_json::<WatermarkRecord>(&self.path(WATERMARK_FILE))
            .await
            .last_id
    }

    pub async fn save_watermark(&self, last_id: u64) -> Result<()> {
        write_json_atomic(&self.path(WATERMARK_FILE), &WatermarkRecord { last_id }).await
    }
}

async fn read_json<T: DeserializeOwned + Default>(path: &Path) -> T {
    let raw = match fs::read_to_string(path).await {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "state read failed, using empty");
            return T::default();
        }
    };
    if raw.trim().is_empty() || raw.trim() == "null" {
        return T::default();
    }
    serde_json::from_str(&raw).unwrap_or_else(|e| {
        tracing::warn!(path = %path.display(), error = %e, "state file unreadable, using empty");
        T::default()
    })
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating state dir {}", parent.display()))?;
    }

    let body = serde_json::to_vec_pretty(value).context("serializing state")?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, &body)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_only_moves_forward() {
        let mut c = Cursors::default();
        assert!(!c.is_processed("t", 0));
        assert!(c.advance("t", 5));
        assert!(c.is_processed("t", 5));
        assert!(c.is_processed("t", 3));
        assert!(!c.is_processed("t", 6));
        assert!(!c.advance("t", 4));
        assert_eq!(c.get("t"), Some(5));
        assert!(!c.is_processed("other", 0));
    }

    #[tokio::test]
    async fn records_round_trip_independently() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path().join("state"));

        assert!(store.load_cursors().await.is_empty());
        assert_eq!(store.load_watermark().await, 0);

        let mut c = Cursors::default();
        c.advance("igwn.gwalert", 42);
        store.save_cursors(&c).await.unwrap();
        store.save_watermark(103).await.unwrap();

        assert_eq!(store.load_cursors().await.get("igwn.gwalert"), Some(42));
        assert_eq!(store.load_watermark().await, 103);
        assert!(store.load_subscribers().await.is_empty());
        assert!(!tmp.path().join("state").join("circulars_seen.json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_file_reads_as_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path());
        std::fs::write(tmp.path().join(WATERMARK_FILE), "{not json").unwrap();
        assert_eq!(store.load_watermark().await, 0);
    }

    #[tokio::test]
    async fn legacy_python_layout_is_readable() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path());
        std::fs::write(
            tmp.path().join(SUBSCRIBERS_FILE),
            r#"{"12345": {"filters": {"swift": false, "fermi": true, "gw": true}, "muted": false}}"#,
        )
        .unwrap();
        let subs = store.load_subscribers().await;
        let rec = subs.get("12345").unwrap();
        assert_eq!(rec.filters.get("fermi"), Some(&true));
        assert!(!rec.muted);
    }
}
