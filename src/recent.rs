//! recent.rs — bounded in-memory log of the latest dispatched alerts.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::alert::Alert;

#[derive(Debug, Clone)]
pub struct RecentEntry {
    pub received_at: DateTime<Utc>,
    /// Stream topic, or "circulars" for bulletins.
    pub source: String,
    pub alert: Alert,
}

#[derive(Debug)]
pub struct RecentAlerts {
    inner: Mutex<VecDeque<RecentEntry>>,
    cap: usize,
}

impl RecentAlerts {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, 10_000);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(cap)),
            cap,
        }
    }

    pub fn push(&self, source: &str, alert: Alert) {
        let entry = RecentEntry {
            received_at: Utc::now(),
            source: source.to_string(),
            alert,
        };
        let mut v = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        v.push_back(entry);
        while v.len() > self.cap {
            v.pop_front();
        }
    }

    pub fn latest(&self) -> Option<RecentEntry> {
        let v = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        v.back().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
