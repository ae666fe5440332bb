// src/registry.rs
//! Subscriber registry.
//!
//! A single task owns the subscriber record; every other task talks to it through a
//! [`RegistryHandle`] (request/response over channels). Each request re-reads the
//! record from the [`StateStore`], applies one change and writes it back, so all
//! loops observe one consistent registry and nothing in memory is authoritative.

use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tokio::sync::{mpsc, oneshot};

use crate::alert::Category;
use crate::store::{StateStore, SubscriberRecord, SubscriberRecords};

const LEGACY_SWIFT: &str = "swift";
const LEGACY_FERMI: &str = "fermi";

/// Opaque, stable recipient id (a Telegram chat id in production).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(String);

impl SubscriberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<i64> for SubscriberId {
    fn from(v: i64) -> Self {
        Self(v.to_string())
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Enabled categories; anything absent is disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet(BTreeSet<Category>);

impl FilterSet {
    pub fn contains(&self, c: Category) -> bool {
        self.0.contains(&c)
    }

    pub fn iter(&self) -> impl Iterator<Item = Category> + '_ {
        self.0.iter().copied()
    }

    fn from_record(filters: &BTreeMap<String, bool>) -> Self {
        Self(
            filters
                .iter()
                .filter(|(_, on)| **on)
                .filter_map(|(k, _)| Category::from_filter_key(k))
                .collect(),
        )
    }
}

impl FromIterator<Category> for FilterSet {
    fn from_iter<I: IntoIterator<Item = Category>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Partial filter change: only categories present here are touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterUpdate(BTreeMap<Category, bool>);

impl FilterUpdate {
    pub fn set(mut self, c: Category, on: bool) -> Self {
        self.0.insert(c, on);
        self
    }

    fn apply(&self, filters: &mut BTreeMap<String, bool>) {
        for (c, on) in &self.0 {
            filters.insert(c.filter_key().to_string(), *on);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub filters: FilterSet,
    pub muted: bool,
}

impl Subscriber {
    /// Muted subscribers receive nothing; otherwise the category filter decides.
    pub fn accepts(&self, c: Category) -> bool {
        !self.muted && self.filters.contains(c)
    }

    fn from_record(id: &str, rec: &SubscriberRecord) -> Self {
        Self {
            id: SubscriberId::new(id),
            filters: FilterSet::from_record(&rec.filters),
            muted: rec.muted,
        }
    }
}

/// First-contact filters: GRB on, everything else off.
pub fn default_record() -> SubscriberRecord {
    let filters = Category::ALL
        .into_iter()
        .map(|c| (c.filter_key().to_string(), c == Category::GammaRayBurst))
        .collect();
    SubscriberRecord {
        filters,
        muted: false,
    }
}

/// Folds legacy `swift`/`fermi` flags into the combined GRB flag (logical OR, also with
/// any combined flag already present) and drops the legacy keys. Returns whether the
/// record changed; running it again is a no-op.
pub fn migrate_legacy_filters(filters: &mut BTreeMap<String, bool>) -> bool {
    let swift = filters.remove(LEGACY_SWIFT);
    let fermi = filters.remove(LEGACY_FERMI);
    if swift.is_none() && fermi.is_none() {
        return false;
    }
    let key = Category::GammaRayBurst.filter_key();
    let on = swift.unwrap_or(false)
        || fermi.unwrap_or(false)
        || filters.get(key).copied().unwrap_or(false);
    filters.insert(key.to_string(), on);
    true
}

enum Request {
    GetOrCreate {
        id: SubscriberId,
        reply: oneshot::Sender<Subscriber>,
    },
    SetMuted {
        id: SubscriberId,
        muted: bool,
        reply: oneshot::Sender<Subscriber>,
    },
    SetFilters {
        id: SubscriberId,
        update: FilterUpdate,
        reply: oneshot::Sender<Subscriber>,
    },
    Toggle {
        id: SubscriberId,
        category: Category,
        reply: oneshot::Sender<Subscriber>,
    },
    ListAll {
        reply: oneshot::Sender<Vec<Subscriber>>,
    },
}

/// Cheap, cloneable client of the registry task.
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<Request>,
}

impl RegistryHandle {
    /// Spawns the owning task on the current runtime.
    pub fn spawn(store: StateStore) -> Self {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(Registry { store }.run(rx));
        Self { tx }
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| anyhow!("subscriber registry task stopped"))?;
        rx.await
            .map_err(|_| anyhow!("subscriber registry dropped the request"))
    }

    pub async fn get_or_create(&self, id: &SubscriberId) -> Result<Subscriber> {
        let id = id.clone();
        self.call(|reply| Request::GetOrCreate { id, reply }).await
    }

    pub async fn set_muted(&self, id: &SubscriberId, muted: bool) -> Result<Subscriber> {
        let id = id.clone();
        self.call(|reply| Request::SetMuted { id, muted, reply })
            .await
    }

    pub async fn get_filters(&self, id: &SubscriberId) -> Result<FilterSet> {
        Ok(self.get_or_create(id).await?.filters)
    }

    pub async fn set_filters(&self, id: &SubscriberId, update: FilterUpdate) -> Result<FilterSet> {
        let id = id.clone();
        let sub = self
            .call(|reply| Request::SetFilters { id, update, reply })
            .await?;
        Ok(sub.filters)
    }

    /// Flips one category and returns the resulting filters.
    pub async fn toggle(&self, id: &SubscriberId, category: Category) -> Result<FilterSet> {
        let id = id.clone();
        let sub = self
            .call(|reply| Request::Toggle {
                id,
                category,
                reply,
            })
            .await?;
        Ok(sub.filters)
    }

    pub async fn list_all(&self) -> Result<Vec<Subscriber>> {
        self.call(|reply| Request::ListAll { reply }).await
    }
}

struct Registry {
    store: StateStore,
}

impl Registry {
    async fn run(self, mut rx: mpsc::Receiver<Request>) {
        while let Some(req) = rx.recv().await {
            match req {
                Request::GetOrCreate { id, reply } => {
                    let sub = self.update(&id, |_| false).await;
                    let _ = reply.send(sub);
                }
                Request::SetMuted { id, muted, reply } => {
                    let sub = self
                        .update(&id, |rec| {
                            rec.muted = muted;
                            true
                        })
                        .await;
                    let _ = reply.send(sub);
                }
                Request::SetFilters { id, update, reply } => {
                    let sub = self
                        .update(&id, |rec| {
                            update.apply(&mut rec.filters);
                            true
                        })
                        .await;
                    let _ = reply.send(sub);
                }
                Request::Toggle {
                    id,
                    category,
                    reply,
                } => {
                    let sub = self
                        .update(&id, |rec| {
                            let on = rec.filters.get(category.filter_key()).copied();
                            FilterUpdate::default()
                                .set(category, !on.unwrap_or(false))
                                .apply(&mut rec.filters);
                            true
                        })
                        .await;
                    let _ = reply.send(sub);
                }
                Request::ListAll { reply } => {
                    let _ = reply.send(self.list_all().await);
                }
            }
        }
        tracing::debug!(target: "registry", "registry task stopped");
    }

    /// Read-modify-write of one entry: lazily created, migrated, then `change`d.
    async fn update(
        &self,
        id: &SubscriberId,
        change: impl FnOnce(&mut SubscriberRecord) -> bool,
    ) -> Subscriber {
        let mut records = self.store.load_subscribers().await;
        let mut dirty = false;

        let rec = records.entry(id.as_str().to_string()).or_insert_with(|| {
            dirty = true;
            tracing::info!(target: "registry", subscriber = %id, "new subscriber");
            default_record()
        });
        dirty |= migrate_legacy_filters(&mut rec.filters);
        dirty |= change(rec);

        let sub = Subscriber::from_record(id.as_str(), rec);
        if dirty {
            self.persist(&records).await;
        }
        sub
    }

    async fn list_all(&self) -> Vec<Subscriber> {
        let mut records = self.store.load_subscribers().await;
        let mut migrated = false;
        for rec in records.values_mut() {
            migrated |= migrate_legacy_filters(&mut rec.filters);
        }
        if migrated {
            self.persist(&records).await;
        }
        records
            .iter()
            .map(|(id, rec)| Subscriber::from_record(id, rec))
            .collect()
    }

    async fn persist(&self, records: &SubscriberRecords) {
        if let Err(e) = self.store.save_subscribers(records).await {
            metrics::counter!("state_write_failures_total").increment(1);
            tracing::warn!(target: "registry", error = ?e, "subscriber registry write failed");
        }
    }
}
