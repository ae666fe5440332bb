//! GCN alert relay — binary entrypoint.
//! Wires the stream consumer, circulars poller and Telegram command loop around one
//! subscriber registry, then runs until Ctrl-C.

use anyhow::{Context, Result};
use std::sync::Arc;

use gcn_alert_relay::bulletin::{BulletinIndex, BulletinPoller};
use gcn_alert_relay::control::Controller;
use gcn_alert_relay::fanout::Broadcaster;
use gcn_alert_relay::fetch::{HttpClient, HttpFetch};
use gcn_alert_relay::metrics::Metrics;
use gcn_alert_relay::notify::telegram::{run_command_loop, TelegramClient};
use gcn_alert_relay::ops::InstanceGuard;
use gcn_alert_relay::recent::RecentAlerts;
use gcn_alert_relay::registry::{RegistryHandle, SubscriberId};
use gcn_alert_relay::store::StateStore;
use gcn_alert_relay::visual::VisualResolver;
use gcn_alert_relay::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    gcn_alert_relay::init_tracing();

    let cfg = AppConfig::load_default().context("loading configuration")?;
    let token = cfg.require_token()?.to_string();

    let guard = InstanceGuard::acquire(cfg.lock_port)?;
    let metrics = Metrics::init()?;
    tokio::spawn(async move {
        if let Err(e) = guard.serve(metrics.router()).await {
            tracing::error!(error = ?e, "ops endpoint stopped");
        }
    });

    let store = StateStore::new(&cfg.state_dir);
    tracing::info!(dir = %store.dir().display(), "state directory");
    let registry = RegistryHandle::spawn(store.clone());
    if let Some(admin) = &cfg.admin_chat_id {
        let admin = SubscriberId::new(admin.as_str());
        match registry.get_or_create(&admin).await {
            Ok(_) => tracing::info!(%admin, "admin chat registered"),
            Err(e) => tracing::warn!(error = ?e, "admin registration failed"),
        }
    }

    let http: Arc<dyn HttpFetch> = Arc::new(HttpClient::new().with_timeout(cfg.http_timeout_secs));
    let telegram = Arc::new(
        TelegramClient::new(&token)
            .with_timeout(cfg.telegram_timeout_secs)
            .with_retries(cfg.telegram_retries),
    );
    let broadcaster = Arc::new(Broadcaster::new(registry.clone(), telegram.clone()));
    let resolver = Arc::new(VisualResolver::standard(http.clone(), None));
    let recent = Arc::new(RecentAlerts::with_capacity(cfg.recent_alerts));

    let bulletins = Arc::new(BulletinIndex::new(
        http.clone(),
        cfg.bulletin_index_url.clone(),
        cfg.bulletin_base_url.clone(),
        cfg.bulletin_index_cap,
    ));
    let poller = BulletinPoller::new(
        bulletins.clone(),
        broadcaster.clone(),
        store.clone(),
        recent.clone(),
        cfg.bulletin_interval(),
    )
    .await;
    tokio::spawn(poller.run());

    spawn_stream(&cfg, store, broadcaster, resolver, recent.clone()).await;

    let controller = Arc::new(Controller::new(registry, bulletins, recent));
    tokio::spawn(run_command_loop(telegram, controller));

    tracing::info!(port = cfg.lock_port, "relay running");
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    tracing::info!("shutting down");
    Ok(())
}

#[cfg(feature = "kafka")]
async fn spawn_stream(
    cfg: &AppConfig,
    store: StateStore,
    broadcaster: Arc<Broadcaster>,
    resolver: Arc<VisualResolver>,
    recent: Arc<RecentAlerts>,
) {
    use gcn_alert_relay::stream::kafka::{GcnKafkaStream, KafkaSettings};
    use gcn_alert_relay::stream::StreamConsumer;

    let Some((client_id, client_secret)) = cfg.gcn_credentials() else {
        tracing::warn!("GCN_CLIENT_ID/GCN_CLIENT_SECRET missing, alert stream disabled");
        return;
    };
    let settings = KafkaSettings {
        domain: cfg.kafka_domain.clone(),
        client_id: client_id.to_string(),
        client_secret: client_secret.to_string(),
        group_id: cfg.kafka_group_id.clone(),
        topics: cfg.topics.clone(),
    };
    match GcnKafkaStream::connect(&settings) {
        Ok(stream) => {
            let consumer = StreamConsumer::new(
                stream,
                store,
                broadcaster,
                resolver,
                recent,
                cfg.stream_settings(),
            )
            .await;
            tokio::spawn(consumer.run());
        }
        Err(e) => tracing::error!(error = ?e, "alert stream disabled"),
    }
}

#[cfg(not(feature = "kafka"))]
async fn spawn_stream(
    _cfg: &AppConfig,
    _store: StateStore,
    _broadcaster: Arc<Broadcaster>,
    _resolver: Arc<VisualResolver>,
    _recent: Arc<RecentAlerts>,
) {
    tracing::warn!("built with --no-default-features (no `kafka`), alert stream disabled");
}
