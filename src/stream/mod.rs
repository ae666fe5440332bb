// src/stream/mod.rs
//! Durable alert-stream consumer.
//!
//! Pulls batches from an [`AlertStream`], drops anything at or below the cursor of
//! its topic partition, classifies the rest and hands deliverable alerts to fan-out. The cursor
//! advances for every message that was looked at, delivered or discarded, so a
//! restart never reprocesses it. Cursors are flushed on a timer, not per message.

#[cfg(feature = "kafka")]
pub mod kafka;

use anyhow::Result;
use async_trait::async_trait;
use metrics::{counter, gauge};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::classify::classify;
use crate::fanout::Broadcaster;
use crate::recent::RecentAlerts;
use crate::store::{Cursors, StateStore};
use crate::visual::VisualResolver;

/// One delivered record. `error` is set when the transport flagged this record as
/// unreadable; such records are skipped without touching the cursor.
///
/// `source` is the topic and drives classification. `cursor_key` names the ordered
/// sequence `position` belongs to: the topic itself, or `topic#partition` when the
/// transport splits a topic into partitions with their own offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    pub source: String,
    pub cursor_key: String,
    pub position: i64,
    pub error: Option<String>,
    pub payload: Vec<u8>,
}

impl StreamMessage {
    pub fn new(source: impl Into<String>, position: i64, payload: impl Into<Vec<u8>>) -> Self {
        let source = source.into();
        Self {
            cursor_key: source.clone(),
            source,
            position,
            error: None,
            payload: payload.into(),
        }
    }

    pub fn failed(source: impl Into<String>, position: i64, reason: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            cursor_key: source.clone(),
            source,
            position,
            error: Some(reason.into()),
            payload: Vec::new(),
        }
    }

    /// Tracks the cursor per partition of the topic.
    pub fn in_partition(mut self, partition: i32) -> Self {
        self.cursor_key = partition_key(&self.source, partition);
        self
    }
}

pub fn partition_key(topic: &str, partition: i32) -> String {
    format!("{topic}#{partition}")
}

/// Subscribed, authenticated feed. A returned `Err` is a transport failure; the
/// consumer backs off and polls again.
#[async_trait]
pub trait AlertStream: Send {
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<StreamMessage>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Subscribed,
    Consuming,
    Backoff,
}

#[derive(Debug, Clone, Copy)]
pub struct ConsumerSettings {
    pub poll_timeout: Duration,
    pub flush_every: Duration,
    pub backoff: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(1000),
            flush_every: Duration::from_secs(10),
            backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub received: usize,
    pub errors: usize,
    pub duplicates: usize,
    pub unclassified: usize,
    pub suppressed: usize,
    pub dispatched: usize,
}

pub struct StreamConsumer<S> {
    stream: S,
    store: StateStore,
    cursors: Cursors,
    dirty: bool,
    last_flush: Instant,
    broadcaster: Arc<Broadcaster>,
    resolver: Arc<VisualResolver>,
    recent: Arc<RecentAlerts>,
    settings: ConsumerSettings,
    state: ConsumerState,
}

impl<S: AlertStream> StreamConsumer<S> {
    /// Resumes from the persisted cursors.
    pub async fn new(
        stream: S,
        store: StateStore,
        broadcaster: Arc<Broadcaster>,
        resolver: Arc<VisualResolver>,
        recent: Arc<RecentAlerts>,
        settings: ConsumerSettings,
    ) -> Self {
        let cursors = store.load_cursors().await;
        tracing::info!(target: "stream", sources = cursors.len(), "cursors loaded");
        Self {
            stream,
            store,
            cursors,
            dirty: false,
            last_flush: Instant::now(),
            broadcaster,
            resolver,
            recent,
            settings,
            state: ConsumerState::Subscribed,
        }
    }

    pub fn cursors(&self) -> &Cursors {
        &self.cursors
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// Handles one batch in order. Never fails: per-message problems are counted.
    pub async fn process_batch(&mut self, batch: Vec<StreamMessage>) -> BatchReport {
        let mut report = BatchReport {
            received: batch.len(),
            ..BatchReport::default()
        };

        for msg in batch {
            counter!("stream_messages_total").increment(1);

            if let Some(err) = &msg.error {
                report.errors += 1;
                counter!("stream_errors_total").increment(1);
                tracing::warn!(target: "stream", topic = %msg.source, error = %err, "unreadable record skipped");
                continue;
            }

            if self.cursors.is_processed(&msg.cursor_key, msg.position) {
                report.duplicates += 1;
                counter!("stream_duplicates_total").increment(1);
                tracing::debug!(target: "stream", topic = %msg.source, cursor = %msg.cursor_key, position = msg.position, "duplicate skipped");
                continue;
            }

            match classify(&msg.source, &msg.payload) {
                None => report.unclassified += 1,
                Some(alert) if !alert.is_deliverable() => {
                    report.suppressed += 1;
                    counter!("alerts_suppressed_total").increment(1);
                    tracing::info!(target: "stream", topic = %msg.source, headline = alert.headline(), "suppressed");
                }
                Some(alert) => {
                    counter!("alerts_classified_total", "category" => alert.category.filter_key())
                        .increment(1);
                    self.broadcaster.dispatch_alert(&alert, &self.resolver).await;
                    self.recent.push(&msg.source, alert);
                    report.dispatched += 1;
                }
            }

            if self.cursors.advance(&msg.cursor_key, msg.position) {
                self.dirty = true;
            }
        }
        report
    }

    /// Writes the cursors if anything moved since the last write. A failed write keeps
    /// them dirty so the next flush retries.
    pub async fn flush(&mut self) -> bool {
        self.last_flush = Instant::now();
        if !self.dirty {
            return false;
        }
        match self.store.save_cursors(&self.cursors).await {
            Ok(()) => {
                self.dirty = false;
                true
            }
            Err(e) => {
                counter!("state_write_failures_total").increment(1);
                tracing::warn!(target: "stream", error = ?e, "failed to persist cursors");
                false
            }
        }
    }

    /// One poll and its batch. Transport failures are returned to the caller and
    /// move the consumer into `Backoff`.
    pub async fn poll_once(&mut self) -> Result<BatchReport> {
        let batch = match self.stream.poll(self.settings.poll_timeout).await {
            Ok(batch) => batch,
            Err(e) => {
                self.set_state(ConsumerState::Backoff);
                return Err(e);
            }
        };
        self.set_state(ConsumerState::Consuming);
        gauge!("stream_last_poll_ts").set(chrono::Utc::now().timestamp() as f64);
        Ok(self.process_batch(batch).await)
    }

    fn set_state(&mut self, next: ConsumerState) {
        if self.state != next {
            tracing::info!(target: "stream", from = ?self.state, to = ?next, "consumer state");
            self.state = next;
        }
    }

    /// Consumes forever: transport failures sleep `backoff` and retry, cursors are
    /// flushed once `flush_every` has passed since the last write attempt.
    pub async fn run(mut self) {
        tracing::info!(target: "stream", "stream consumer started");
        loop {
            match self.poll_once().await {
                Ok(report) => {
                    if report.received > 0 {
                        tracing::debug!(target: "stream", ?report, "batch processed");
                    }
                }
                Err(e) => {
                    counter!("stream_poll_failures_total").increment(1);
                    tracing::warn!(target: "stream", error = ?e, "poll failed, backing off");
                    tokio::time::sleep(self.settings.backoff).await;
                }
            }

            if self.last_flush.elapsed() >= self.settings.flush_every {
                self.flush().await;
            }
        }
    }
}
