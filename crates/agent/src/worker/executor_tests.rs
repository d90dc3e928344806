// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::*;
use crate::agent::DefaultHooks;
use crate::device::Environment;
use crate::error::{FailureKind, OperationFailure};
use crate::orders::{AdviseLevel, MessageOrder, SectionHandle, WaitOrder};
use crate::pathpoint::PathpointHandler;
use crate::store::backend::MemoryBackend;

/// Handler logging invocations and replaying scripted results.
struct ScriptedHandler {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
    read_results: Mutex<VecDeque<Result<PathpointValue, OperationFailure>>>,
    write_results: Mutex<VecDeque<Result<(), OperationFailure>>>,
}

impl ScriptedHandler {
    fn new(name: &str, log: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            log,
            read_results: Mutex::new(VecDeque::new()),
            write_results: Mutex::new(VecDeque::new()),
        })
    }

    fn script_read(&self, result: Result<PathpointValue, OperationFailure>) {
        self.read_results.lock().push_back(result);
    }

    fn script_write(&self, result: Result<(), OperationFailure>) {
        self.write_results.lock().push_back(result);
    }
}

#[async_trait]
impl PathpointHandler for ScriptedHandler {
    async fn on_read(&self, _advise: AdviseLevel) -> Result<PathpointValue, OperationFailure> {
        self.log.lock().push(format!("read:{}", self.name));
        self.read_results.lock().pop_front().unwrap_or(Ok(PathpointValue::U16(0)))
    }

    async fn on_write(
        &self,
        value: PathpointValue,
        _advise: AdviseLevel,
    ) -> Result<(), OperationFailure> {
        self.log.lock().push(format!("write:{}:{:?}", self.name, value));
        self.write_results.lock().pop_front().unwrap_or(Ok(()))
    }
}

struct Harness {
    ctx: Arc<ExecutorCtx>,
    tx: mpsc::UnboundedSender<Section>,
    rx: Option<mpsc::UnboundedReceiver<Section>>,
    cancel: CancellationToken,
    log: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    fn new(hooks: Arc<dyn AgentHooks>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let signal = Arc::new(Notify::new());
        let api = Arc::new(
            CloudApi::new(Environment::Staging, "http://127.0.0.1:1".to_owned(), b"C", b"K")
                .expect("api"),
        );
        let ctx = Arc::new(ExecutorCtx {
            pathpoints: Arc::new(PathpointMap::new()),
            samples: SampleStore::new(Arc::new(MemoryBackend), Arc::clone(&signal)),
            api,
            hooks,
            blobs: BlobStore::new(Arc::new(MemoryBackend), Arc::clone(&signal)),
            blob_resync: Arc::new(AtomicBool::new(false)),
            signal,
        });
        Self {
            ctx,
            tx,
            rx: Some(rx),
            cancel: CancellationToken::new(),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn register(&self, name: &str) -> Arc<ScriptedHandler> {
        let point = self
            .ctx
            .pathpoints
            .get_or_create(name, StorageLevel::Trend)
            .expect("create pathpoint");
        let handler = ScriptedHandler::new(name, Arc::clone(&self.log));
        point.set_handler(handler.clone());
        handler
    }

    fn start(&mut self) {
        let executor = OrderExecutor::new(
            self.rx.take().expect("started once"),
            Arc::clone(&self.ctx),
            self.cancel.clone(),
        );
        tokio::spawn(executor.run());
    }

    fn enqueue(&self, orders: Vec<Order>, disposition: Disposition) -> SectionHandle {
        let (section, handle) = Section::new(orders, disposition);
        self.tx.send(section).expect("enqueue");
        handle
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

fn read(path: &str, advise: AdviseLevel) -> Order {
    Order::Read(ReadOrder::new(path, advise))
}

fn write(path: &str, value: i64) -> Order {
    Order::Write(WriteOrder::new(path, value.into(), AdviseLevel::Advise))
}

#[tokio::test(start_paused = true)]
async fn read_stores_sample_in_point_and_store() {
    let mut harness = Harness::new(Arc::new(DefaultHooks));
    let handler = harness.register("W1");
    handler.script_read(Ok(PathpointValue::U16(42)));
    harness.start();

    let mut handle = harness.enqueue(vec![read("W1", AdviseLevel::Advise)], Disposition::Joinable);
    handle.wait().await;

    assert_eq!(harness.log(), vec!["read:W1"]);
    let (_, value) = harness.ctx.samples.current("W1").expect("stored");
    assert_eq!(value, PathpointValue::U16(42));
    harness.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn write_coerces_to_point_type() {
    let mut harness = Harness::new(Arc::new(DefaultHooks));
    harness.register("W1");
    harness.start();

    let mut handle = harness.enqueue(vec![write("W1", 7)], Disposition::Joinable);
    handle.wait().await;
    assert_eq!(harness.log(), vec!["write:W1:U16(7)"]);
    harness.cancel.cancel();
}

/// Hooks logging the pre-drain of cannot-join sections.
struct LoggingHooks {
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl AgentHooks for LoggingHooks {
    async fn sync_sections(&self, _terminating: bool) {
        self.log.lock().push("sync".to_owned());
    }
}

#[tokio::test(start_paused = true)]
async fn join_vs_cannot_join_ordering() {
    let mut harness = Harness::new(Arc::new(DefaultHooks));
    let hooks = Arc::new(LoggingHooks { log: Arc::clone(&harness.log) });
    // Rebuild the context with the logging hooks in place.
    harness.ctx = Arc::new(ExecutorCtx {
        pathpoints: Arc::clone(&harness.ctx.pathpoints),
        samples: Arc::clone(&harness.ctx.samples),
        api: Arc::clone(&harness.ctx.api),
        hooks,
        blobs: Arc::clone(&harness.ctx.blobs),
        blob_resync: Arc::clone(&harness.ctx.blob_resync),
        signal: Arc::clone(&harness.ctx.signal),
    });
    harness.register("WA");
    harness.register("WB");
    let c = harness.register("WC");
    c.script_read(Ok(PathpointValue::U16(3)));
    harness.register("WD");

    // Everything is queued before the executor starts, so the head two
    // joinable sections coalesce.
    let mut s1 = harness.enqueue(vec![write("WA", 1)], Disposition::Joinable);
    let mut s2 = harness.enqueue(vec![write("WB", 2)], Disposition::Joinable);
    let mut s3 = harness.enqueue(vec![read("WC", AdviseLevel::Advise)], Disposition::CannotJoin);
    let mut s4 = harness.enqueue(vec![write("WD", 4)], Disposition::Joinable);
    harness.start();

    s1.wait().await;
    s2.wait().await;
    s3.wait().await;
    s4.wait().await;

    let log = harness.log();
    assert_eq!(log.len(), 5);
    // The two coalesced writes run concurrently; their mutual order is
    // unspecified.
    assert!(log[..2].contains(&"write:WA:U16(1)".to_owned()));
    assert!(log[..2].contains(&"write:WB:U16(2)".to_owned()));
    assert_eq!(&log[2..], ["sync", "read:WC", "write:WD:U16(4)"]);
    harness.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn advise_read_retries_up_to_budget_and_records_failure() {
    let mut harness = Harness::new(Arc::new(DefaultHooks));
    let handler = harness.register("T1");
    for _ in 0..3 {
        handler.script_read(Err(OperationFailure::new(FailureKind::Timeout)));
    }
    harness.start();

    let mut handle = harness.enqueue(vec![read("T1", AdviseLevel::Advise)], Disposition::Joinable);
    handle.wait().await;

    assert_eq!(harness.log().len(), 3, "advise reads try three times");
    let err = harness.ctx.samples.current("T1").expect_err("failure stored");
    assert_eq!(err.kind, FailureKind::Timeout);
    harness.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn not_read_from_handler_is_dropped() {
    let mut harness = Harness::new(Arc::new(DefaultHooks));
    let handler = harness.register("W1");
    handler.script_read(Err(OperationFailure::not_read()));
    harness.start();

    let mut handle = harness.enqueue(vec![read("W1", AdviseLevel::Advise)], Disposition::Joinable);
    handle.wait().await;

    assert_eq!(harness.log().len(), 1, "no retry for a not-read result");
    let err = harness.ctx.samples.current("W1").expect_err("nothing stored");
    assert_eq!(err.kind, FailureKind::NotRead);
    harness.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn stale_write_is_skipped() {
    let mut harness = Harness::new(Arc::new(DefaultHooks));
    harness.register("W1");
    harness.start();

    let order = WriteOrder::new("W1", 5.into(), AdviseLevel::Advise).stale_after(now_ms() - 1);
    let mut handle = harness.enqueue(vec![Order::Write(order)], Disposition::Joinable);
    handle.wait().await;
    assert!(harness.log().is_empty());
    harness.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn cancelled_section_skips_orders() {
    let mut harness = Harness::new(Arc::new(DefaultHooks));
    harness.register("W1");

    let handle = harness.enqueue(vec![write("W1", 1)], Disposition::Joinable);
    handle.cancel();
    harness.start();

    let mut waiter = handle.clone();
    waiter.wait().await;
    assert!(harness.log().is_empty());
    harness.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn throttled_second_read_is_skipped() {
    let mut harness = Harness::new(Arc::new(DefaultHooks));
    let handler = harness.register("W1");
    handler.script_read(Ok(PathpointValue::U16(1)));
    handler.script_read(Ok(PathpointValue::U16(2)));
    harness
        .ctx
        .pathpoints
        .get("W1")
        .expect("registered")
        .set_read_throttle(Some(Duration::from_secs(30)));
    harness.start();

    let mut handle = harness.enqueue(
        vec![read("W1", AdviseLevel::Advise), read("W1", AdviseLevel::Advise)],
        Disposition::Joinable,
    );
    handle.wait().await;
    assert_eq!(harness.log().len(), 1, "at most one handler invocation inside the window");
    harness.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn wait_order_delays_completion_only() {
    let mut harness = Harness::new(Arc::new(DefaultHooks));
    harness.start();
    let mut handle =
        harness.enqueue(vec![Order::Wait(WaitOrder { seconds: 2.0 })], Disposition::Joinable);
    handle.wait().await;
    harness.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn sysctl_blob_ops() {
    let mut harness = Harness::new(Arc::new(DefaultHooks));
    harness.ctx.blobs.put_local("cfg", b"x".to_vec());
    harness.start();

    let mut handle = harness.enqueue(
        vec![Order::Sysctl(SysctlOrder {
            op_type: "baob-deleted".to_owned(),
            op_args: "cfg".to_owned(),
        })],
        Disposition::Joinable,
    );
    handle.wait().await;
    assert_eq!(harness.ctx.blobs.version("cfg"), -1);

    let mut handle = harness.enqueue(
        vec![Order::Sysctl(SysctlOrder {
            op_type: "baob-updated".to_owned(),
            op_args: String::new(),
        })],
        Disposition::Joinable,
    );
    handle.wait().await;
    assert!(harness.ctx.blob_resync.load(Ordering::Acquire));
    harness.cancel.cancel();
}

/// Hooks that claim every section for custom execution.
struct ClaimingHooks;

#[async_trait]
impl AgentHooks for ClaimingHooks {
    async fn execute_section(&self, _section: &Section) -> bool {
        true
    }
}

#[tokio::test(start_paused = true)]
async fn custom_executor_bypasses_default_dispatch() {
    let mut harness = Harness::new(Arc::new(ClaimingHooks));
    harness.register("W1");
    harness.start();

    let mut handle = harness.enqueue(vec![write("W1", 1)], Disposition::Joinable);
    handle.wait().await;
    assert!(harness.log().is_empty(), "default dispatch skipped");
    harness.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn unsettled_message_order_retries_then_gives_up() {
    // The beacon endpoint is unreachable; the order must not wedge the
    // section.
    let mut harness = Harness::new(Arc::new(DefaultHooks));
    harness.start();
    let mut handle = harness.enqueue(
        vec![Order::Message(MessageOrder { uuid: "u-1".to_owned() })],
        Disposition::Joinable,
    );
    handle.wait().await;
    harness.cancel.cancel();
}
