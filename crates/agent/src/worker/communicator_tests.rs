// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post, put};
use axum::{Json as AxumJson, Router};
use parking_lot::Mutex;

use super::*;
use crate::agent::DefaultHooks;
use crate::clock::now_s;
use crate::device::Environment;
use crate::event::{Event, Severity};
use crate::sensor::SensorWriteEvent;
use crate::store::backend::MemoryBackend;
use crate::sync::HttpSyncWorker;
use crate::value::{PathpointValue, Sample};

/// Scripted cloud endpoints plus a log of what the agent sent.
#[derive(Default)]
struct CloudState {
    sample_posts: Vec<Json>,
    catalog_puts: Vec<Json>,
    alarm_posts: Vec<Json>,
    audit_puts: Vec<Json>,
    blob_uploads: Vec<(String, i64, Vec<u8>)>,
    order_polls: usize,
    reject_samples: bool,
    sensors: Json,
    predicates: Json,
    orders: Json,
    baobs: Json,
    blob_downloads: std::collections::HashMap<String, (i64, Vec<u8>)>,
}

type Shared = Arc<Mutex<CloudState>>;

async fn mock_cloud(state: Shared) -> String {
    let app = Router::new()
        .route(
            "/v1/device/pathpoints",
            post(|State(state): State<Shared>, AxumJson(body): AxumJson<Json>| async move {
                let mut state = state.lock();
                state.sample_posts.push(body);
                if state.reject_samples {
                    (
                        axum::http::StatusCode::BAD_REQUEST,
                        AxumJson(serde_json::json!({"status": "damaged batch"})),
                    )
                } else {
                    (axum::http::StatusCode::OK, AxumJson(serde_json::json!([])))
                }
            })
            .put(|State(state): State<Shared>, AxumJson(body): AxumJson<Json>| async move {
                // Echo the shape back, forcing W1 to PERMANENT.
                state.lock().catalog_puts.push(body.clone());
                let resp: Vec<Json> = body
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .map(|item| {
                                let path = item["path"].as_str().unwrap_or_default();
                                let level = if path == "W1" { 0 } else { 1 };
                                serde_json::json!({"path": path, "storage_level": level})
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                (axum::http::StatusCode::OK, AxumJson(Json::Array(resp)))
            }),
        )
        .route(
            "/v1/device/sensors",
            get(|State(state): State<Shared>| async move { AxumJson(state.lock().sensors.clone()) }),
        )
        .route(
            "/v1/device/predicates",
            get(|State(state): State<Shared>| async move {
                AxumJson(state.lock().predicates.clone())
            }),
        )
        .route(
            "/v1/device/orders",
            post(|State(state): State<Shared>| async move {
                let mut state = state.lock();
                state.order_polls += 1;
                AxumJson(state.orders.clone())
            }),
        )
        .route(
            "/v1/device/alarms",
            post(|State(state): State<Shared>, AxumJson(body): AxumJson<Json>| async move {
                let count = body.as_array().map_or(0, Vec::len);
                state.lock().alarm_posts.push(body);
                let uuids: Vec<Json> = (0..count)
                    .map(|i| serde_json::json!({"uuid": format!("srv-{i}")}))
                    .collect();
                AxumJson(Json::Array(uuids))
            }),
        )
        .route(
            "/v1/device/sensor/write_log",
            put(|State(state): State<Shared>, AxumJson(body): AxumJson<Json>| async move {
                state.lock().audit_puts.push(body);
                AxumJson(serde_json::json!([]))
            }),
        )
        .route(
            "/v1/device/baobs",
            post(|State(state): State<Shared>, AxumJson(_body): AxumJson<Json>| async move {
                AxumJson(state.lock().baobs.clone())
            }),
        )
        .route(
            "/v1/device/baobs/{key}",
            get(|State(state): State<Shared>, Path(key): Path<String>| async move {
                let entry = state.lock().blob_downloads.get(&key).cloned();
                match entry {
                    Some((version, bytes)) => {
                        let mut headers = HeaderMap::new();
                        headers.insert("X-BLOB-Version", axum::http::HeaderValue::from(version));
                        (axum::http::StatusCode::OK, headers, bytes)
                    }
                    None => (axum::http::StatusCode::NOT_FOUND, HeaderMap::new(), Vec::new()),
                }
            })
            .put(
                |State(state): State<Shared>,
                 Path(key): Path<String>,
                 headers: HeaderMap,
                 body: axum::body::Bytes| async move {
                    let version = headers
                        .get("X-BLOB-Version")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(-1);
                    state.lock().blob_uploads.push((key, version, body.to_vec()));
                    axum::http::StatusCode::OK
                },
            ),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

struct Harness {
    comm: Communicator,
    ctx: Arc<CommunicatorCtx>,
    cloud: Shared,
    section_rx: mpsc::UnboundedReceiver<Section>,
}

async fn harness_with(hooks: Arc<dyn AgentHooks>, cloud: CloudState) -> Harness {
    let cloud: Shared = Arc::new(Mutex::new(cloud));
    let base = mock_cloud(Arc::clone(&cloud)).await;
    let api = Arc::new(
        CloudApi::new(Environment::Staging, base, b"CERT", b"KEY").expect("api"),
    );
    let signal = Arc::new(Notify::new());
    let (section_tx, section_rx) = mpsc::unbounded_channel();
    let ctx = Arc::new(CommunicatorCtx {
        api: Arc::clone(&api),
        sync_worker: Arc::new(HttpSyncWorker::new(api)),
        samples: SampleStore::new(Arc::new(MemoryBackend), Arc::clone(&signal)),
        events: EventStore::new(Arc::new(MemoryBackend), Arc::clone(&signal)),
        audit: AuditStore::new(Arc::new(MemoryBackend), Arc::clone(&signal)),
        sensors: Arc::new(SensorStore::new()),
        blobs: BlobStore::new(Arc::new(MemoryBackend), Arc::clone(&signal)),
        pathpoints: Arc::new(PathpointMap::new()),
        registry: Arc::new(PredicateRegistry::new()),
        hooks,
        section_tx,
        signal,
        blob_resync: Arc::new(AtomicBool::new(false)),
        allow_sync: Arc::new(AtomicBool::new(true)),
        flags: SubsystemFlags::default(),
    });
    let (comm, _ready) =
        Communicator::new(Arc::clone(&ctx), CommunicatorConfig::default(), CancellationToken::new());
    Harness { comm, ctx, cloud, section_rx }
}

async fn harness() -> Harness {
    harness_with(Arc::new(DefaultHooks), CloudState::default()).await
}

#[tokio::test]
async fn happy_path_sample_sync() {
    let mut harness = harness().await;
    harness.ctx.samples.on_new_data("W1", Sample::value(1000, PathpointValue::U16(42)));

    harness.comm.pass().await;

    let posts = harness.cloud.lock().sample_posts.clone();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0], serde_json::json!([{"path": "W1", "values": [[1000, 42]]}]));
    assert!(harness.ctx.samples.is_empty(), "acked samples are gone");
}

#[tokio::test]
async fn rejected_sample_batch_is_dropped_not_retried() {
    let mut harness =
        harness_with(Arc::new(DefaultHooks), CloudState { reject_samples: true, ..Default::default() })
            .await;
    harness.ctx.samples.on_new_data("W1", Sample::value(1000, PathpointValue::U16(1)));

    harness.comm.pass().await;
    assert!(harness.ctx.samples.is_empty(), "poison batch acked away");

    harness.comm.pass().await;
    assert_eq!(harness.cloud.lock().sample_posts.len(), 1, "nothing left to send");
}

#[tokio::test]
async fn catalog_sync_applies_authoritative_levels() {
    let mut harness = harness().await;
    harness.ctx.pathpoints.get_or_create("W1", StorageLevel::Trend).expect("create");
    harness.ctx.pathpoints.get_or_create("W2", StorageLevel::Trend).expect("create");

    harness.comm.pass().await;

    assert_eq!(harness.cloud.lock().catalog_puts.len(), 1);
    let w1 = harness.ctx.pathpoints.get("W1").expect("kept");
    assert_eq!(w1.storage_level(), StorageLevel::Permanent, "cloud forced PERMANENT");
    let w2 = harness.ctx.pathpoints.get("W2").expect("kept");
    assert_eq!(w2.storage_level(), StorageLevel::Trend);

    // Clean catalog: no second PUT.
    harness.comm.pass().await;
    assert_eq!(harness.cloud.lock().catalog_puts.len(), 1);
}

#[tokio::test]
async fn sensors_are_rebuilt_and_their_pathpoints_materialize() {
    let mut harness = harness_with(
        Arc::new(DefaultHooks),
        CloudState {
            sensors: serde_json::json!([
                {"fqts": "temp boiler", "path": "W1~W2", "type": "std.Number10"}
            ]),
            ..Default::default()
        },
    )
    .await;

    harness.comm.pass().await;
    assert_eq!(harness.ctx.sensors.len(), 1);
    assert!(harness.ctx.sensors.get("boiler temp").is_some());
    assert!(harness.ctx.pathpoints.get("W1").is_some());
    assert!(harness.ctx.pathpoints.get("W2").is_some());
}

#[tokio::test]
async fn order_poll_enqueues_sections() {
    let mut harness = harness_with(
        Arc::new(DefaultHooks),
        CloudState {
            orders: serde_json::json!([{"orders": [{"type": "read", "path": "W1"}]}]),
            ..Default::default()
        },
    )
    .await;

    harness.comm.pass().await;
    let section = harness.section_rx.try_recv().expect("section enqueued");
    assert_eq!(section.orders.len(), 1);
    assert_eq!(harness.cloud.lock().order_polls, 1);
}

#[tokio::test]
async fn events_sync_assigns_uuids() {
    let mut harness = harness().await;
    let event = Event::new(
        Some(now_s()),
        None,
        Severity::Red,
        false,
        "tok",
        "B",
        "hot",
        Default::default(),
    );
    let id = event.provisional_id.clone();
    harness.ctx.events.add(event);

    harness.comm.pass().await;

    assert_eq!(harness.cloud.lock().alarm_posts.len(), 1);
    let stored = harness.ctx.events.get(&id).expect("open event kept");
    assert_eq!(stored.id.as_deref(), Some("srv-0"));
}

#[tokio::test]
async fn audit_drains_on_success() {
    let mut harness = harness().await;
    harness.ctx.audit.add(SensorWriteEvent {
        timestamp_ms: 5,
        who: "op".to_owned(),
        hr_sensor: "s".to_owned(),
        hr_value: "1".to_owned(),
        fqts: "s".to_owned(),
        value: "1".to_owned(),
        reason: "r".to_owned(),
    });

    harness.comm.pass().await;
    assert!(harness.ctx.audit.is_empty());
    assert_eq!(harness.cloud.lock().audit_puts.len(), 1);
}

struct BlobHooks {
    updated: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl AgentHooks for BlobHooks {
    async fn on_blob_updated(&self, key: &str) {
        self.updated.lock().push(key.to_owned());
    }
}

#[tokio::test]
async fn blob_reconcile_downloads_uploads_and_deletes() {
    let updated = Arc::new(Mutex::new(Vec::new()));
    let mut cloud = CloudState {
        baobs: serde_json::json!({
            "should_download": ["C"],
            "should_upload": ["B"],
            "should_delete": ["A"],
        }),
        ..Default::default()
    };
    cloud.blob_downloads.insert("C".to_owned(), (7, b"from-cloud".to_vec()));
    let mut harness =
        harness_with(Arc::new(BlobHooks { updated: Arc::clone(&updated) }), cloud).await;

    harness.ctx.blobs.set("A", b"old".to_vec(), 3);
    harness.ctx.blobs.set("B", b"local".to_vec(), 1);
    // Not the first-ever pass: the updated hook must fire.
    harness.comm.blobs_loaded = true;

    harness.comm.pass().await;

    assert_eq!(harness.ctx.blobs.version("A"), -1, "deleted");
    assert_eq!(harness.ctx.blobs.version("C"), 7, "downloaded at header version");
    assert_eq!(harness.ctx.blobs.value("C"), Some(b"from-cloud".to_vec()));
    assert_eq!(
        harness.cloud.lock().blob_uploads.clone(),
        vec![("B".to_owned(), 1, b"local".to_vec())]
    );
    assert_eq!(updated.lock().clone(), vec!["C".to_owned()]);
}

#[tokio::test]
async fn first_blob_pass_does_not_fire_update_hook() {
    let updated = Arc::new(Mutex::new(Vec::new()));
    let mut cloud = CloudState {
        baobs: serde_json::json!({"should_download": ["C"], "should_upload": [], "should_delete": []}),
        ..Default::default()
    };
    cloud.blob_downloads.insert("C".to_owned(), (1, b"x".to_vec()));
    let mut harness =
        harness_with(Arc::new(BlobHooks { updated: Arc::clone(&updated) }), cloud).await;

    harness.comm.pass().await;
    assert_eq!(harness.ctx.blobs.version("C"), 1);
    assert!(updated.lock().is_empty(), "no hook on the first pass");
}

struct CountingPredicate {
    registry_log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Predicate for CountingPredicate {
    async fn on_tick(&mut self, ctx: &PredicateContext) {
        let ticks = ctx
            .state()
            .and_then(|s| s.get("ticks").and_then(Json::as_u64))
            .unwrap_or(0);
        ctx.set_state(serde_json::json!({"ticks": ticks + 1}));
        self.registry_log.lock().push(format!("tick:{}", ctx.spec().predicate_id));
    }

    async fn on_configuration_changed(&mut self, _ctx: &PredicateContext, new: &Json) {
        self.registry_log.lock().push(format!("config:{new}"));
    }

    async fn on_offline(&mut self, ctx: &PredicateContext) {
        self.registry_log.lock().push(format!("offline:{}", ctx.spec().predicate_id));
    }
}

fn predicate_wire(online: bool, limit: u64) -> Json {
    serde_json::json!([{
        "predicate_id": "p1",
        "verbose_name": "temp watch",
        "statistic": "temp",
        "configuration": {"limit": limit},
        "group": "B",
        "online": online,
        "silencing": [],
    }])
}

#[tokio::test]
async fn predicate_lifecycle_and_state_persistence() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut harness = harness_with(
        Arc::new(DefaultHooks),
        CloudState { predicates: predicate_wire(true, 5), ..Default::default() },
    )
    .await;
    let factory_log = Arc::clone(&log);
    harness.ctx.registry.register_statistic(
        "temp",
        Arc::new(move |_spec| {
            Box::new(CountingPredicate { registry_log: Arc::clone(&factory_log) })
        }),
    );

    harness.comm.pass().await;
    harness.comm.pass().await;
    assert_eq!(
        harness.ctx.events.get_cache("p1"),
        Some(serde_json::json!({"ticks": 2})),
        "state persisted across ticks"
    );

    // Configuration change fires the diff hook.
    harness.cloud.lock().predicates = predicate_wire(true, 9);
    harness.comm.last_predicates = None;
    harness.comm.pass().await;
    assert!(log.lock().iter().any(|l| l.starts_with("config:")));

    // Going offline destroys the instance.
    harness.cloud.lock().predicates = predicate_wire(false, 9);
    harness.comm.last_predicates = None;
    harness.comm.pass().await;
    assert!(log.lock().iter().any(|l| l == "offline:p1"));
    assert!(harness.comm.predicates.is_empty());
}

#[tokio::test]
async fn placeholder_upgrades_when_statistic_registers_late() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut harness = harness_with(
        Arc::new(DefaultHooks),
        CloudState { predicates: predicate_wire(true, 5), ..Default::default() },
    )
    .await;

    // No registration yet: the instance runs as a placeholder.
    harness.comm.pass().await;
    assert!(log.lock().is_empty());
    assert!(harness.comm.predicates.values().all(|p| p.undefined));

    let factory_log = Arc::clone(&log);
    harness.ctx.registry.register_statistic(
        "temp",
        Arc::new(move |_spec| {
            Box::new(CountingPredicate { registry_log: Arc::clone(&factory_log) })
        }),
    );

    harness.comm.pass().await;
    assert_eq!(log.lock().clone(), vec!["tick:p1".to_owned()]);
    assert!(harness.comm.predicates.values().all(|p| !p.undefined));
}
