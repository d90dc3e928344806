// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::*;

/// Sync worker recording shipped batches, with scripted failures.
struct RecordingSync {
    batches: Mutex<Vec<Json>>,
    failures: Mutex<VecDeque<SyncError>>,
}

impl RecordingSync {
    fn new() -> Arc<Self> {
        Arc::new(Self { batches: Mutex::new(Vec::new()), failures: Mutex::new(VecDeque::new()) })
    }

    fn fail_next(&self, error: SyncError) {
        self.failures.lock().push_back(error);
    }

    fn shipped_messages(&self) -> Vec<String> {
        self.batches
            .lock()
            .iter()
            .flat_map(|batch| {
                batch
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter_map(|r| r["message"].as_str().map(str::to_owned))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

#[async_trait]
impl SyncWorker for RecordingSync {
    async fn sync_pathpoints(&self, _batch: &Json) -> Result<(), SyncError> {
        Ok(())
    }

    async fn sync_logs(&self, batch: &Json) -> Result<(), SyncError> {
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }
        self.batches.lock().push(batch.clone());
        Ok(())
    }

    fn has_async_orders(&self) -> bool {
        false
    }
}

struct Harness {
    sink: LogSink,
    sync: Arc<RecordingSync>,
    allow_sync: Arc<AtomicBool>,
    pressure_tx: watch::Sender<u8>,
    cancel: CancellationToken,
}

fn harness(config: LogPublisherConfig, allow: bool) -> Harness {
    let sync = RecordingSync::new();
    let allow_sync = Arc::new(AtomicBool::new(allow));
    let (pressure_tx, pressure_rx) = watch::channel(0u8);
    let cancel = CancellationToken::new();
    let (publisher, sink) = LogPublisher::new(
        "test-device",
        Arc::clone(&sync) as Arc<dyn SyncWorker>,
        Arc::clone(&allow_sync),
        pressure_rx,
        config,
        cancel.clone(),
    );
    tokio::spawn(publisher.run());
    Harness { sink, sync, allow_sync, pressure_tx, cancel }
}

async fn settle() {
    // Paused clock: sleeping lets the publisher's timers auto-advance.
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

#[test]
fn record_wire_form() {
    let record = LogRecord {
        service: "svc".to_owned(),
        when_us: 123,
        message: "hello".to_owned(),
        level: "INFO".to_owned(),
        exception_text: Some("boom".to_owned()),
        exception_tb: None,
    };
    let wire = record.to_wire();
    assert_eq!(wire["service"], "svc");
    assert_eq!(wire["when"], 123);
    assert_eq!(wire["exception_text"], "boom");
    assert!(wire.get("exception_traceback").is_none());
}

#[tokio::test(start_paused = true)]
async fn records_ship_in_batches_with_monotone_stamps() {
    let harness = harness(LogPublisherConfig::default(), true);
    for i in 0..5 {
        harness.sink.emit("INFO", format!("msg-{i}"));
    }
    settle().await;

    let batches = harness.sync.batches.lock().clone();
    assert_eq!(batches.len(), 1, "siblings ride one batch");
    let stamps: Vec<u64> = batches[0]
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|r| r["when"].as_u64())
        .collect();
    assert_eq!(stamps.len(), 5);
    assert!(stamps.windows(2).all(|w| w[0] < w[1]), "strictly increasing");
    harness.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn buffer_is_bounded_while_sync_disallowed() {
    let config = LogPublisherConfig { max_buffer: 5, ..Default::default() };
    let harness = harness(config, false);
    for i in 0..12 {
        harness.sink.emit("INFO", format!("msg-{i}"));
    }
    settle().await;

    // Enable shipping; a fresh record wakes the loop.
    harness.allow_sync.store(true, Ordering::Release);
    harness.sink.emit("INFO", "last".to_owned());
    settle().await;

    let messages = harness.sync.shipped_messages();
    assert!(messages.len() <= 6, "older records were shed: {messages:?}");
    assert!(messages.contains(&"last".to_owned()));
    assert!(!messages.contains(&"msg-0".to_owned()), "oldest dropped first");
    harness.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn rejected_batch_is_dropped() {
    let harness = harness(LogPublisherConfig::default(), true);
    harness.sync.fail_next(SyncError::clients_fault());
    harness.sink.emit("INFO", "poison".to_owned());
    settle().await;

    harness.sink.emit("INFO", "after".to_owned());
    settle().await;

    let messages = harness.sync.shipped_messages();
    assert!(!messages.contains(&"poison".to_owned()), "4xx batches are not retried");
    assert!(messages.contains(&"after".to_owned()));
    harness.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn no_link_batch_retries_after_backoff() {
    let harness = harness(LogPublisherConfig::default(), true);
    harness.sync.fail_next(SyncError::no_link());
    harness.sink.emit("INFO", "keep me".to_owned());
    settle().await;

    let messages = harness.sync.shipped_messages();
    assert_eq!(messages, vec!["keep me".to_owned()], "retried after the backoff");
    harness.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn memory_pressure_drops_the_queue() {
    let harness = harness(LogPublisherConfig::default(), false);
    for i in 0..4 {
        harness.sink.emit("INFO", format!("doomed-{i}"));
    }
    settle().await;

    harness.pressure_tx.send(2).expect("pressure");
    settle().await;

    harness.allow_sync.store(true, Ordering::Release);
    harness.sink.emit("INFO", "survivor".to_owned());
    settle().await;

    let messages = harness.sync.shipped_messages();
    assert_eq!(messages, vec!["survivor".to_owned()]);
    harness.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn byte_budget_splits_batches() {
    let config = LogPublisherConfig {
        batch_bytes: 200,
        batch_records: 100,
        ..Default::default()
    };
    let harness = harness(config, true);
    for i in 0..4 {
        harness.sink.emit("INFO", format!("{i}-{}", "x".repeat(100)));
    }
    settle().await;

    let batches = harness.sync.batches.lock().clone();
    assert!(batches.len() >= 2, "large records split across batches: {}", batches.len());
    harness.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn layer_formats_events() {
    use tracing_subscriber::layer::SubscriberExt;

    let harness = harness(LogPublisherConfig::default(), true);
    let subscriber =
        tracing_subscriber::registry().with(CloudLogLayer::new(harness.sink.clone()));
    tracing::subscriber::with_default(subscriber, || {
        tracing::info!(answer = 42, "the answer");
    });
    settle().await;

    let messages = harness.sync.shipped_messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("the answer"));
    assert!(messages[0].contains("answer=42"));
    harness.cancel.cancel();
}
