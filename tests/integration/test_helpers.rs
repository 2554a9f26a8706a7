//! Shared fixtures for integration tests: a recording agent runtime, a
//! scriptable check suite and harness builders.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify, Semaphore};

use agent_steward::audit::Notifier;
use agent_steward::bus::{BusSettings, MessageBus};
use agent_steward::clock::ManualClock;
use agent_steward::models::{
    AgentId, CoreEvent, Direction, EventKind, Message, MessageId, Payload, ValidationResult,
};
use agent_steward::orchestrator::LifecycleManager;
use agent_steward::persistence::commit_repo::CommitRepo;
use agent_steward::persistence::db::{self, Database};
use agent_steward::persistence::mailbox_repo::MailboxRepo;
use agent_steward::persistence::outcome_repo::OutcomeRepo;
use agent_steward::pipeline::{
    ChangeApplier, CheckRunner, CommitStage, InFlightTracker, LeaseTable, PipelineParts,
    PipelineSettings, ResponsePipeline, ValidationRunner,
};
use agent_steward::runtime::AgentRuntime;
use agent_steward::vcs::MemoryVcs;
use agent_steward::workspace::Workspace;
use agent_steward::{AppError, Result};

pub const SETTINGS: BusSettings = BusSettings {
    max_payload_bytes: 64 * 1024,
    log_capacity: 1_000,
};

pub const LIB_RS: &str = "pub fn one() -> u32 {\n    1\n}\n\npub fn two() -> u32 {\n    2\n}\n";

/// Poll `condition` until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Await `future` with a generous timeout.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), future)
        .await
        .expect("operation timed out")
}

pub fn text(s: &str) -> Payload {
    Payload::Text(s.to_owned())
}

// ── Agent runtime ────────────────────────────────────────

/// Runtime that records every call instead of running processes.
#[derive(Default)]
pub struct RecordingRuntime {
    deliveries: Mutex<Vec<(AgentId, MessageId)>>,
    teardowns: Mutex<Vec<AgentId>>,
    inits: Mutex<Vec<AgentId>>,
    failing_init: Mutex<HashSet<AgentId>>,
    init_gates: Mutex<HashMap<AgentId, Arc<Notify>>>,
}

impl RecordingRuntime {
    pub fn deliveries_for(&self, agent: &AgentId) -> Vec<MessageId> {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .filter(|(a, _)| a == agent)
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub fn teardown_count(&self, agent: &AgentId) -> usize {
        self.teardowns.lock().unwrap().iter().filter(|a| *a == agent).count()
    }

    pub fn init_count(&self, agent: &AgentId) -> usize {
        self.inits.lock().unwrap().iter().filter(|a| *a == agent).count()
    }

    pub fn fail_init(&self, agent: &AgentId, fail: bool) {
        let mut failing = self.failing_init.lock().unwrap();
        if fail {
            failing.insert(agent.clone());
        } else {
            failing.remove(agent);
        }
    }

    /// Block `initialize` for `agent` until the returned handle is notified.
    pub fn gate_init(&self, agent: &AgentId) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.init_gates
            .lock()
            .unwrap()
            .insert(agent.clone(), Arc::clone(&gate));
        gate
    }
}

impl AgentRuntime for RecordingRuntime {
    fn deliver<'a>(&'a self, agent: &'a AgentId, message: &'a Message) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.deliveries
                .lock()
                .unwrap()
                .push((agent.clone(), message.id.clone()));
            Ok(())
        })
    }

    fn teardown<'a>(&'a self, agent: &'a AgentId) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.teardowns.lock().unwrap().push(agent.clone());
            Ok(())
        })
    }

    fn initialize<'a>(&'a self, agent: &'a AgentId) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let gate = self.init_gates.lock().unwrap().remove(agent);
            if let Some(gate) = gate {
                gate.notified().await;
            }
            self.inits.lock().unwrap().push(agent.clone());
            if self.failing_init.lock().unwrap().contains(agent) {
                return Err(AppError::Runtime(format!("{agent} failed to start")));
            }
            Ok(())
        })
    }
}

// ── Liveness harness ─────────────────────────────────────

pub struct Harness {
    pub clock: ManualClock,
    pub db: Arc<Database>,
    pub bus: MessageBus,
    pub runtime: Arc<RecordingRuntime>,
    pub inflight: InFlightTracker,
    pub lifecycle: Arc<LifecycleManager>,
    pub events: mpsc::Receiver<CoreEvent>,
}

impl Harness {
    pub fn agent(n: usize) -> AgentId {
        AgentId::slot(n)
    }

    /// Event kinds emitted so far, in order.
    pub fn drain_events(&mut self) -> Vec<(EventKind, AgentId)> {
        let mut kinds = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            kinds.push((event.kind, event.agent));
        }
        kinds
    }

    pub fn runtime_dyn(&self) -> Arc<dyn AgentRuntime> {
        self.runtime.clone()
    }
}

pub async fn harness(pool: usize) -> Harness {
    let db = Arc::new(db::connect_memory().await.expect("db"));
    let clock = ManualClock::new();
    let bus = MessageBus::open(
        &AgentId::pool(pool),
        Arc::new(MailboxRepo::new(Arc::clone(&db))),
        Arc::new(clock.clone()),
        SETTINGS,
    )
    .await
    .expect("bus");

    let (tx, events) = mpsc::channel(256);
    let runtime = Arc::new(RecordingRuntime::default());
    let inflight = InFlightTracker::new();
    let lifecycle = Arc::new(LifecycleManager::new(
        bus.clone(),
        runtime.clone(),
        inflight.clone(),
        Notifier::new(tx),
    ));

    Harness {
        clock,
        db,
        bus,
        runtime,
        inflight,
        lifecycle,
        events,
    }
}

// ── Check suite ──────────────────────────────────────────

/// Check suite whose verdict, timing and side effects are set by the test.
pub struct ScriptedChecks {
    failing: Mutex<Vec<String>>,
    delay: Mutex<Duration>,
    gate: Option<Arc<Semaphore>>,
    vcs: Arc<MemoryVcs>,
    advance_vcs_runs: AtomicUsize,
    runs: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    seen_lib: Mutex<Vec<Option<String>>>,
}

impl ScriptedChecks {
    pub fn new(vcs: Arc<MemoryVcs>) -> Self {
        Self {
            failing: Mutex::new(Vec::new()),
            delay: Mutex::new(Duration::ZERO),
            gate: None,
            vcs,
            advance_vcs_runs: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            seen_lib: Mutex::new(Vec::new()),
        }
    }

    /// Runs wait for a permit on `gate` before finishing.
    pub fn gated(vcs: Arc<MemoryVcs>, gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(vcs)
        }
    }

    pub fn fail_with(&self, checks: &[&str]) {
        *self.failing.lock().unwrap() = checks.iter().map(|c| (*c).to_owned()).collect();
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Make the next `runs` runs commit something else to the repository,
    /// so the edit set under validation goes stale.
    pub fn advance_vcs_during(&self, runs: usize) {
        self.advance_vcs_runs.store(runs, Ordering::SeqCst);
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Content of `src/lib.rs` in each working copy checked.
    pub fn seen_lib(&self) -> Vec<Option<String>> {
        self.seen_lib.lock().unwrap().clone()
    }
}

impl CheckRunner for ScriptedChecks {
    fn run_checks<'a>(&'a self, working_copy: &'a Path) -> BoxFuture<'a, Result<ValidationResult>> {
        Box::pin(async move {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            self.seen_lib
                .lock()
                .unwrap()
                .push(std::fs::read_to_string(working_copy.join("src/lib.rs")).ok());

            let advance = self
                .advance_vcs_runs
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if advance {
                self.vcs.advance("unrelated commit");
            }

            let delay = *self.delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(gate) = &self.gate {
                gate.acquire().await.expect("gate open").forget();
            }

            self.active.fetch_sub(1, Ordering::SeqCst);
            let failing = self.failing.lock().unwrap().clone();
            Ok(if failing.is_empty() {
                ValidationResult::pass("all checks passed")
            } else {
                ValidationResult::fail(failing, "scripted failure")
            })
        })
    }
}

// ── Pipeline harness ─────────────────────────────────────

pub fn default_pipeline_settings() -> PipelineSettings {
    PipelineSettings {
        max_transient_retries: 3,
        retry_backoff: Duration::from_millis(10),
        validation_lease: Duration::from_secs(600),
    }
}

pub struct PipelineHarness {
    pub temp: tempfile::TempDir,
    pub root: PathBuf,
    pub clock: ManualClock,
    pub db: Arc<Database>,
    pub bus: MessageBus,
    pub vcs: Arc<MemoryVcs>,
    pub checks: Arc<ScriptedChecks>,
    pub leases: LeaseTable,
    pub commits: CommitRepo,
    pub outcomes: OutcomeRepo,
    pub settings: PipelineSettings,
    pub pipeline: Arc<ResponsePipeline>,
    pub events: mpsc::Receiver<CoreEvent>,
    events_tx: mpsc::Sender<CoreEvent>,
}

impl PipelineHarness {
    /// A fresh pipeline over the same workspace, repository and database,
    /// as after a process restart.
    pub fn rebuild(&self) -> ResponsePipeline {
        build_pipeline(
            &self.root,
            &self.db,
            &self.vcs,
            &self.checks,
            self.leases.clone(),
            Notifier::new(self.events_tx.clone()),
            self.settings,
        )
    }

    /// A fresh pipeline over the same workspace and repository, backed by `db`.
    pub fn rebuild_over(&self, db: &Arc<Database>) -> ResponsePipeline {
        build_pipeline(
            &self.root,
            db,
            &self.vcs,
            &self.checks,
            self.leases.clone(),
            Notifier::new(self.events_tx.clone()),
            self.settings,
        )
    }

    pub fn read(&self, path: &str) -> String {
        std::fs::read_to_string(self.root.join(path)).expect("read workspace file")
    }

    /// Publish an outbound response for agent `n`.
    pub async fn respond(&self, n: usize, body: &str) -> Message {
        self.bus
            .publish(&AgentId::slot(n), Direction::Outbound, text(body))
            .await
            .expect("publish")
    }

    pub fn drain_events(&mut self) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

fn build_pipeline(
    root: &Path,
    db: &Arc<Database>,
    vcs: &Arc<MemoryVcs>,
    checks: &Arc<ScriptedChecks>,
    leases: LeaseTable,
    notifier: Notifier,
    settings: PipelineSettings,
) -> ResponsePipeline {
    let workspace = Workspace::new(root.to_path_buf());
    ResponsePipeline::new(
        PipelineParts {
            applier: ChangeApplier::new(workspace.clone(), vcs.clone(), leases),
            validator: ValidationRunner::new(workspace.clone(), checks.clone()),
            commit: CommitStage::new(workspace, vcs.clone(), CommitRepo::new(Arc::clone(db))),
            vcs: vcs.clone(),
            outcomes: OutcomeRepo::new(Arc::clone(db)),
            inflight: InFlightTracker::new(),
            notifier,
        },
        settings,
    )
}

pub async fn pipeline_harness(pool: usize) -> PipelineHarness {
    pipeline_harness_with(pool, default_pipeline_settings(), None).await
}

pub async fn pipeline_harness_with(
    pool: usize,
    settings: PipelineSettings,
    gate: Option<Arc<Semaphore>>,
) -> PipelineHarness {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().canonicalize().expect("canonical root");
    std::fs::create_dir_all(root.join("src")).expect("mkdir src");
    std::fs::write(root.join("src/lib.rs"), LIB_RS).expect("seed lib.rs");
    std::fs::write(root.join("src/util.rs"), "pub fn util() {}\n").expect("seed util.rs");

    let db = Arc::new(db::connect_memory().await.expect("db"));
    let clock = ManualClock::new();
    let bus = MessageBus::open(
        &AgentId::pool(pool),
        Arc::new(MailboxRepo::new(Arc::clone(&db))),
        Arc::new(clock.clone()),
        SETTINGS,
    )
    .await
    .expect("bus");

    let vcs = Arc::new(MemoryVcs::new());
    let checks = Arc::new(match gate {
        Some(gate) => ScriptedChecks::gated(vcs.clone(), gate),
        None => ScriptedChecks::new(vcs.clone()),
    });
    let leases = LeaseTable::new(Arc::new(clock.clone()), settings.validation_lease);
    let (events_tx, events) = mpsc::channel(256);

    let pipeline = Arc::new(build_pipeline(
        &root,
        &db,
        &vcs,
        &checks,
        leases.clone(),
        Notifier::new(events_tx.clone()),
        settings,
    ));

    PipelineHarness {
        temp,
        root,
        clock,
        commits: CommitRepo::new(Arc::clone(&db)),
        outcomes: OutcomeRepo::new(Arc::clone(&db)),
        db,
        bus,
        vcs,
        checks,
        leases,
        settings,
        pipeline,
        events,
        events_tx,
    }
}

// ── Change blocks ────────────────────────────────────────

pub fn insert_end(path: &str, content: &str) -> Value {
    json!({"path": path, "kind": "insert", "location": {"at": "end"}, "content": content})
}

pub fn replace_symbol(path: &str, name: &str, content: &str) -> Value {
    json!({"path": path, "kind": "replace", "location": {"at": "symbol", "name": name}, "content": content})
}

pub fn delete_symbol(path: &str, name: &str) -> Value {
    json!({"path": path, "kind": "delete", "location": {"at": "symbol", "name": name}})
}

/// An agent response carrying one change block with `operations`.
pub fn change_response(summary: &str, operations: &[Value]) -> String {
    let targets: BTreeSet<&str> = operations
        .iter()
        .filter_map(|op| op["path"].as_str())
        .collect();
    let body = json!({
        "target_files": targets,
        "summary": summary,
        "operations": operations,
    });
    format!("Here is the change.\n\n```change\n{body}\n```\n")
}
