// src/fanout.rs
//! Fan-out broadcaster: one payload → every subscriber that wants its category.

use metrics::counter;
use std::sync::Arc;

use crate::alert::{Alert, Category};
use crate::notify::Notifier;
use crate::registry::RegistryHandle;
use crate::visual::{Visual, VisualResolver};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Image { visual: Visual, caption: String },
}

/// Per-dispatch outcome counts. Failures are counted, never raised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub muted: usize,
    pub filtered: usize,
    pub failed: usize,
    /// Set when the alert was refused outright (suppressed).
    pub refused: bool,
}

pub struct Broadcaster {
    registry: RegistryHandle,
    notifier: Arc<dyn Notifier>,
}

impl Broadcaster {
    pub fn new(registry: RegistryHandle, notifier: Arc<dyn Notifier>) -> Self {
        Self { registry, notifier }
    }

    /// Sends `payload` to every non-muted subscriber with `category` enabled.
    /// One recipient failing does not stop delivery to the rest.
    pub async fn dispatch(&self, category: Category, payload: &Payload) -> DispatchReport {
        let mut report = DispatchReport::default();

        let subscribers = match self.registry.list_all().await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(target: "fanout", error = ?e, "cannot list subscribers");
                return report;
            }
        };

        for sub in subscribers {
            if sub.muted {
                report.muted += 1;
                continue;
            }
            if !sub.filters.contains(category) {
                report.filtered += 1;
                continue;
            }

            let res = match payload {
                Payload::Text(text) => self.notifier.send_text(&sub.id, text, None).await,
                Payload::Image { visual, caption } => {
                    self.notifier
                        .send_image(&sub.id, visual, Some(caption.as_str()))
                        .await
                }
            };

            match res {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    report.failed += 1;
                    counter!("fanout_failures_total").increment(1);
                    tracing::warn!(target: "fanout", subscriber = %sub.id, error = ?e, "send failed");
                }
            }
        }

        counter!("fanout_sent_total").increment(report.sent as u64);
        tracing::info!(
            target: "fanout",
            %category,
            sent = report.sent,
            muted = report.muted,
            filtered = report.filtered,
            failed = report.failed,
            "dispatch done"
        );
        report
    }

    /// Resolves an image for `alert` and dispatches it with the caption.
    /// Suppressed alerts are refused before anything is sent.
    pub async fn dispatch_alert(&self, alert: &Alert, resolver: &VisualResolver) -> DispatchReport {
        if !alert.is_deliverable() {
            tracing::debug!(target: "fanout", caption = alert.headline(), "suppressed alert refused");
            return DispatchReport {
                refused: true,
                ..DispatchReport::default()
            };
        }
        let visual = resolver.resolve(alert).await;
        let payload = Payload::Image {
            visual,
            caption: alert.caption.clone(),
        };
        self.dispatch(alert.category, &payload).await
    }
}
