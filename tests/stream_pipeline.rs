// tests/stream_pipeline.rs
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use gcn_alert_relay::fanout::Broadcaster;
use gcn_alert_relay::recent::RecentAlerts;
use gcn_alert_relay::registry::RegistryHandle;
use gcn_alert_relay::store::StateStore;
use gcn_alert_relay::stream::{
    partition_key, ConsumerSettings, ConsumerState, StreamConsumer, StreamMessage,
};
use gcn_alert_relay::testing::{RecordingNotifier, ScriptedStream, Sent, StaticFetcher};
use gcn_alert_relay::visual::VisualResolver;

const GBM_TOPIC: &str = "gcn.classic.text.FERMI_GBM_FIN_POS";
const GW_TOPIC: &str = "igwn.gwalert";

fn gbm_notice() -> &'static str {
    include_str!("fixtures/fermi_gbm_fin_pos.txt")
}

fn write_subscribers(dir: &Path, json: &str) {
    std::fs::write(dir.join("subscribers.json"), json).unwrap();
}

const GRB_AND_GW: &str = r#"{"1": {"filters": {"gw": true, "swiftfermi": true, "circulars": false}, "muted": false}}"#;

async fn consumer(
    dir: &Path,
    stream: ScriptedStream,
    notifier: Arc<RecordingNotifier>,
) -> (StreamConsumer<ScriptedStream>, Arc<RecentAlerts>) {
    consumer_with(dir, stream, notifier, ConsumerSettings::default()).await
}

async fn consumer_with(
    dir: &Path,
    stream: ScriptedStream,
    notifier: Arc<RecordingNotifier>,
    settings: ConsumerSettings,
) -> (StreamConsumer<ScriptedStream>, Arc<RecentAlerts>) {
    let store = StateStore::new(dir);
    let registry = RegistryHandle::spawn(store.clone());
    let broadcaster = Arc::new(Broadcaster::new(registry, notifier));
    let resolver = Arc::new(VisualResolver::standard(Arc::new(StaticFetcher::new()), None));
    let recent = Arc::new(RecentAlerts::with_capacity(8));
    let c = StreamConsumer::new(
        stream,
        store,
        broadcaster,
        resolver,
        recent.clone(),
        settings,
    )
    .await;
    (c, recent)
}

#[tokio::test]
async fn duplicate_positions_are_dispatched_once() {
    let tmp = tempfile::tempdir().unwrap();
    write_subscribers(tmp.path(), GRB_AND_GW);
    let notifier = Arc::new(RecordingNotifier::new());

    let stream = ScriptedStream::new()
        .then_batch(vec![StreamMessage::new(GBM_TOPIC, 5, gbm_notice())])
        .then_batch(vec![
            StreamMessage::new(GBM_TOPIC, 5, gbm_notice()),
            StreamMessage::new(GBM_TOPIC, 4, gbm_notice()),
        ]);
    let (mut c, recent) = consumer(tmp.path(), stream, notifier.clone()).await;

    let first = c.poll_once().await.unwrap();
    assert_eq!(first.dispatched, 1);
    let second = c.poll_once().await.unwrap();
    assert_eq!(second.duplicates, 2);
    assert_eq!(second.dispatched, 0);

    assert_eq!(notifier.sent().len(), 1);
    assert_eq!(recent.len(), 1);
    assert_eq!(c.cursors().get(GBM_TOPIC), Some(5));
}

#[tokio::test]
async fn cursors_survive_restart() {
    let tmp = tempfile::tempdir().unwrap();
    write_subscribers(tmp.path(), GRB_AND_GW);
    let notifier = Arc::new(RecordingNotifier::new());

    let stream = ScriptedStream::new().then_batch(vec![StreamMessage::new(GBM_TOPIC, 10, gbm_notice())]);
    let (mut c, _) = consumer(tmp.path(), stream, notifier.clone()).await;
    c.poll_once().await.unwrap();
    assert!(c.flush().await);
    // Nothing moved since: no second write.
    assert!(!c.flush().await);

    let raw = std::fs::read_to_string(tmp.path().join("seen_offsets.json")).unwrap();
    let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(v[GBM_TOPIC], 10);

    let replay = ScriptedStream::new().then_batch(vec![StreamMessage::new(GBM_TOPIC, 10, gbm_notice())]);
    let (mut restarted, _) = consumer(tmp.path(), replay, notifier.clone()).await;
    let report = restarted.poll_once().await.unwrap();
    assert_eq!(report.duplicates, 1);
    assert_eq!(notifier.sent().len(), 1);
}

#[tokio::test]
async fn preliminary_gw_is_withheld_but_consumed() {
    let tmp = tempfile::tempdir().unwrap();
    write_subscribers(tmp.path(), GRB_AND_GW);
    let notifier = Arc::new(RecordingNotifier::new());

    let stream = ScriptedStream::new().then_batch(vec![StreamMessage::new(
        GW_TOPIC,
        3,
        include_str!("fixtures/igwn_preliminary.json"),
    )]);
    let (mut c, recent) = consumer(tmp.path(), stream, notifier.clone()).await;

    let report = c.poll_once().await.unwrap();
    assert_eq!(report.suppressed, 1);
    assert_eq!(report.dispatched, 0);
    assert!(notifier.sent().is_empty());
    assert!(recent.is_empty());
    assert_eq!(c.cursors().get(GW_TOPIC), Some(3));
}

#[tokio::test]
async fn gw_without_imagery_gets_placeholder_card() {
    let tmp = tempfile::tempdir().unwrap();
    write_subscribers(tmp.path(), GRB_AND_GW);
    let notifier = Arc::new(RecordingNotifier::new());

    let stream = ScriptedStream::new().then_batch(vec![StreamMessage::new(
        GW_TOPIC,
        1,
        include_str!("fixtures/igwn_initial.json"),
    )]);
    let (mut c, _) = consumer(tmp.path(), stream, notifier.clone()).await;
    c.poll_once().await.unwrap();

    match notifier.sent().as_slice() {
        [Sent::Image { origin, mime, caption, .. }] => {
            assert_eq!(*origin, "placeholder_card");
            assert_eq!(mime, "image/svg+xml");
            assert!(caption.as_deref().unwrap().starts_with("GW S230518h | initial"));
        }
        other => panic!("unexpected sends: {other:?}"),
    }
}

#[tokio::test]
async fn text_notice_gets_point_projection() {
    let tmp = tempfile::tempdir().unwrap();
    write_subscribers(tmp.path(), GRB_AND_GW);
    let notifier = Arc::new(RecordingNotifier::new());

    // Linked image is not served, so the chain falls through to the sky map.
    let stream = ScriptedStream::new().then_batch(vec![StreamMessage::new(GBM_TOPIC, 1, gbm_notice())]);
    let (mut c, _) = consumer(tmp.path(), stream, notifier.clone()).await;
    c.poll_once().await.unwrap();

    match notifier.sent().as_slice() {
        [Sent::Image { origin, caption, .. }] => {
            assert_eq!(*origin, "point_projection");
            let caption = caption.as_deref().unwrap();
            assert!(caption.contains("RA: 123.450  Dec: -45.670"));
        }
        other => panic!("unexpected sends: {other:?}"),
    }
}

#[tokio::test]
async fn unreadable_records_do_not_move_the_cursor() {
    let tmp = tempfile::tempdir().unwrap();
    write_subscribers(tmp.path(), GRB_AND_GW);
    let notifier = Arc::new(RecordingNotifier::new());

    let stream = ScriptedStream::new().then_batch(vec![
        StreamMessage::failed(GBM_TOPIC, 7, "broker hiccup"),
        StreamMessage::new("unrelated.topic", 2, "{}"),
    ]);
    let (mut c, _) = consumer(tmp.path(), stream, notifier.clone()).await;
    let report = c.poll_once().await.unwrap();

    assert_eq!(report.errors, 1);
    assert_eq!(report.unclassified, 1);
    assert_eq!(c.cursors().get(GBM_TOPIC), None);
    // Discarded records still advance their own cursor.
    assert_eq!(c.cursors().get("unrelated.topic"), Some(2));
    assert!(notifier.sent().is_empty());
}

#[tokio::test]
async fn transport_failure_surfaces_to_caller() {
    let tmp = tempfile::tempdir().unwrap();
    let notifier = Arc::new(RecordingNotifier::new());
    let stream = ScriptedStream::new()
        .then_failure("connection reset")
        .then_batch(vec![]);
    let (mut c, _) = consumer(tmp.path(), stream, notifier).await;
    assert_eq!(c.state(), ConsumerState::Subscribed);

    assert!(c.poll_once().await.is_err());
    assert_eq!(c.state(), ConsumerState::Backoff);
    let next = c.poll_once().await.unwrap();
    assert_eq!(next.received, 0);
    assert_eq!(c.state(), ConsumerState::Consuming);
}

#[tokio::test]
async fn partitions_keep_separate_cursors() {
    let tmp = tempfile::tempdir().unwrap();
    write_subscribers(tmp.path(), GRB_AND_GW);
    let notifier = Arc::new(RecordingNotifier::new());

    let stream = ScriptedStream::new()
        .then_batch(vec![
            StreamMessage::new(GBM_TOPIC, 10, gbm_notice()).in_partition(0),
            StreamMessage::new(GBM_TOPIC, 3, gbm_notice()).in_partition(1),
        ])
        .then_batch(vec![
            StreamMessage::new(GBM_TOPIC, 3, gbm_notice()).in_partition(1),
            StreamMessage::new(GBM_TOPIC, 4, gbm_notice()).in_partition(1),
        ]);
    let (mut c, recent) = consumer(tmp.path(), stream, notifier.clone()).await;

    let first = c.poll_once().await.unwrap();
    assert_eq!(first.duplicates, 0);
    assert_eq!(first.dispatched, 2);
    let second = c.poll_once().await.unwrap();
    assert_eq!(second.duplicates, 1);
    assert_eq!(second.dispatched, 1);

    assert_eq!(notifier.sent().len(), 3);
    assert_eq!(c.cursors().get(&partition_key(GBM_TOPIC, 0)), Some(10));
    assert_eq!(c.cursors().get(&partition_key(GBM_TOPIC, 1)), Some(4));
    assert_eq!(c.cursors().get(GBM_TOPIC), None);
    // Routing still goes by topic.
    assert_eq!(recent.latest().unwrap().source, GBM_TOPIC);
}

#[tokio::test(start_paused = true)]
async fn run_backs_off_then_flushes_on_schedule() {
    let tmp = tempfile::tempdir().unwrap();
    write_subscribers(tmp.path(), GRB_AND_GW);
    let notifier = Arc::new(RecordingNotifier::new());
    let settings = ConsumerSettings {
        poll_timeout: Duration::from_secs(1),
        flush_every: Duration::from_secs(10),
        backoff: Duration::from_secs(5),
    };
    let stream = ScriptedStream::new()
        .then_failure("broker unreachable")
        .then_batch(vec![StreamMessage::new(GBM_TOPIC, 42, gbm_notice())]);
    let (c, _) = consumer_with(tmp.path(), stream, notifier.clone(), settings).await;
    let offsets = tmp.path().join("seen_offsets.json");

    let task = tokio::spawn(c.run());

    // Still sleeping off the failed poll.
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(notifier.sent().is_empty());

    // Retried after the backoff; the cursor is not written yet.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(notifier.sent().len(), 1);
    assert!(!offsets.exists());

    tokio::time::sleep(Duration::from_secs(5)).await;
    let raw = std::fs::read_to_string(&offsets).unwrap();
    let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(v[GBM_TOPIC], 42);

    task.abort();
}

#[tokio::test]
async fn muted_and_filtered_subscribers_receive_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    write_subscribers(
        tmp.path(),
        r#"{
            "1": {"filters": {"gw": true, "swiftfermi": true}, "muted": true},
            "2": {"filters": {"gw": false, "swiftfermi": false, "circulars": true}, "muted": false},
            "3": {"filters": {"swiftfermi": true}, "muted": false}
        }"#,
    );
    let notifier = Arc::new(RecordingNotifier::new());
    let stream = ScriptedStream::new().then_batch(vec![StreamMessage::new(GBM_TOPIC, 1, gbm_notice())]);
    let (mut c, _) = consumer(tmp.path(), stream, notifier.clone()).await;
    c.poll_once().await.unwrap();

    assert_eq!(notifier.recipients(), vec!["3".to_string()]);
}
