//! tests/common.rs
//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use parking_lot::Mutex;
use tracing_subscriber::fmt::TestWriter;

use jobkeeper::builtin::{BUILTIN_ASSEMBLY, SYSTEM_JOB_CLASS};
use jobkeeper::{
  Clock, DesiredState, EngineError, FireListener, FireRecord, HandlerRegistry, JobDefinition,
  JobKey, JobStore, MemoryStore, Reconciler, Registration, SchedulerEngine,
};

pub const ASSEMBLY: &str = "jobs";
pub const NOOP_CLASS: &str = "Jobs.Noop";
pub const EVERY_MINUTE: &str = "0 * * * * *";

pub type HandlerFuture = Pin<Box<dyn Future<Output = bool> + Send + 'static>>;

// Initializes tracing subscriber for test output.
pub fn setup_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_writer(TestWriter::new())
    .with_test_writer()
    .try_init();
}

// --- Recording Engine ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
  Exists(JobKey),
  Register(JobKey),
  Unregister(JobKey),
  TriggerNow(JobKey),
}

impl EngineCall {
  pub fn is_mutating(&self) -> bool {
    !matches!(self, EngineCall::Exists(_))
  }
}

/// In-memory `SchedulerEngine` that records every call and never fires.
#[derive(Default)]
pub struct RecordingEngine {
  registered: Mutex<HashMap<JobKey, Option<Registration>>>,
  calls: Mutex<Vec<EngineCall>>,
  reject_registrations: AtomicBool,
  unavailable: AtomicBool,
  fail_triggers: AtomicBool,
}

impl RecordingEngine {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  /// Marks `key` registered without recording a call.
  pub fn preregister(&self, key: JobKey) {
    self.registered.lock().insert(key, None);
  }

  /// Drops every registration, as a process restart would.
  pub fn forget_all(&self) {
    self.registered.lock().clear();
  }

  pub fn is_registered(&self, key: &JobKey) -> bool {
    self.registered.lock().contains_key(key)
  }

  pub fn registration(&self, key: &JobKey) -> Option<Registration> {
    self.registered.lock().get(key).cloned().flatten()
  }

  pub fn calls(&self) -> Vec<EngineCall> {
    self.calls.lock().clone()
  }

  pub fn mutating_calls(&self) -> Vec<EngineCall> {
    self
      .calls()
      .into_iter()
      .filter(EngineCall::is_mutating)
      .collect()
  }

  pub fn clear_calls(&self) {
    self.calls.lock().clear();
  }

  pub fn reject_registrations(&self, reject: bool) {
    self.reject_registrations.store(reject, Ordering::SeqCst);
  }

  /// Registrations fail as if the engine had shut down.
  pub fn set_unavailable(&self, unavailable: bool) {
    self.unavailable.store(unavailable, Ordering::SeqCst);
  }

  pub fn fail_triggers(&self, fail: bool) {
    self.fail_triggers.store(fail, Ordering::SeqCst);
  }
}

#[async_trait]
impl SchedulerEngine for RecordingEngine {
  async fn exists(&self, key: &JobKey) -> Result<bool, EngineError> {
    self.calls.lock().push(EngineCall::Exists(key.clone()));
    Ok(self.is_registered(key))
  }

  async fn register(&self, registration: Registration) -> Result<(), EngineError> {
    let key = registration.key.clone();
    self.calls.lock().push(EngineCall::Register(key.clone()));
    if self.unavailable.load(Ordering::SeqCst) {
      return Err(EngineError::SchedulerShutdown);
    }
    if self.reject_registrations.load(Ordering::SeqCst) {
      return Err(EngineError::NoUpcomingFire(registration.trigger.key.clone()));
    }
    let mut registered = self.registered.lock();
    if registered.contains_key(&key) {
      return Err(EngineError::AlreadyRegistered(key));
    }
    registered.insert(key, Some(registration));
    Ok(())
  }

  async fn unregister(&self, key: &JobKey) -> Result<bool, EngineError> {
    self.calls.lock().push(EngineCall::Unregister(key.clone()));
    Ok(self.registered.lock().remove(key).is_some())
  }

  async fn trigger_now(&self, key: &JobKey) -> Result<(), EngineError> {
    self.calls.lock().push(EngineCall::TriggerNow(key.clone()));
    if self.fail_triggers.load(Ordering::SeqCst) {
      return Err(EngineError::SchedulerShutdown);
    }
    if !self.is_registered(key) {
      return Err(EngineError::NotRegistered(key.clone()));
    }
    Ok(())
  }
}

// --- Clock ---

pub struct FixedClock(Mutex<DateTime<Local>>);

impl FixedClock {
  pub fn at(hour: u32, minute: u32) -> Arc<Self> {
    Arc::new(Self(Mutex::new(local_time(hour, minute))))
  }

  pub fn set(&self, hour: u32, minute: u32) {
    *self.0.lock() = local_time(hour, minute);
  }
}

impl Clock for FixedClock {
  fn now(&self) -> DateTime<Local> {
    *self.0.lock()
  }
}

pub fn local_time(hour: u32, minute: u32) -> DateTime<Local> {
  Local
    .with_ymd_and_hms(2026, 3, 2, hour, minute, 0)
    .single()
    .expect("unambiguous local time")
}

// --- Handlers ---

pub fn noop_handler() -> HandlerFuture {
  Box::pin(async { true })
}

/// Registry with a no-op handler under `ASSEMBLY`/`NOOP_CLASS` and a stand-in
/// for the system job handler.
pub fn handlers() -> Arc<HandlerRegistry> {
  let registry = HandlerRegistry::new();
  registry.register(ASSEMBLY, NOOP_CLASS, noop_handler);
  registry.register(BUILTIN_ASSEMBLY, SYSTEM_JOB_CLASS, noop_handler);
  Arc::new(registry)
}

// Creates a handler that increments a counter and returns `succeeds`.
pub fn counting_handler(
  counter: Arc<AtomicUsize>,
  succeeds: bool,
) -> impl Fn() -> HandlerFuture + Send + Sync + 'static {
  move || {
    let ctr = counter.clone();
    Box::pin(async move {
      let count = ctr.fetch_add(1, Ordering::SeqCst) + 1;
      tracing::debug!(count, succeeds, "Counting handler executing");
      succeeds
    })
  }
}

// Creates a handler that panics.
pub fn panicking_handler() -> impl Fn() -> HandlerFuture + Send + Sync + 'static {
  || {
    Box::pin(async {
      tokio::task::yield_now().await;
      panic!("Handler forced panic!");
      #[allow(unreachable_code)]
      true
    })
  }
}

/// Collects every fire record.
#[derive(Default)]
pub struct CollectingListener {
  pub records: Mutex<Vec<FireRecord>>,
}

impl FireListener for CollectingListener {
  fn on_fire_complete(&self, record: &FireRecord) {
    self.records.lock().push(record.clone());
  }
}

// --- Fixtures ---

pub fn job(name: &str, state: DesiredState) -> JobDefinition {
  JobDefinition::new(name, ASSEMBLY, NOOP_CLASS, EVERY_MINUTE).with_state(state)
}

pub struct Fixture {
  pub store: Arc<MemoryStore>,
  pub engine: Arc<RecordingEngine>,
  pub clock: Arc<FixedClock>,
  pub reconciler: Reconciler,
}

impl Fixture {
  pub fn insert(&self, job: JobDefinition) -> JobDefinition {
    let id = self.store.insert_job(&job).expect("insert job");
    self.get(id)
  }

  pub fn get(&self, id: i64) -> JobDefinition {
    self
      .store
      .get_job(id)
      .expect("get job")
      .expect("job exists")
  }

  pub fn state(&self, id: i64) -> DesiredState {
    self.get(id).state
  }

  pub fn error_logs(&self, id: i64) -> usize {
    self
      .store
      .job_logs(id)
      .expect("job logs")
      .iter()
      .filter(|log| log.fire_state == jobkeeper::FireState::Error)
      .count()
  }
}

/// A reconciler over a memory store and a recording engine, clock at 10:07
/// (not a sweep minute), with the system job already settled and the call
/// log cleared.
pub async fn fixture() -> Fixture {
  let store = Arc::new(MemoryStore::new());
  let engine = RecordingEngine::new();
  let clock = FixedClock::at(10, 7);
  let reconciler = Reconciler::new(store.clone(), engine.clone(), handlers()).with_clock(clock.clone());

  reconciler.run_pass().await.expect("settling pass");
  engine.clear_calls();

  Fixture {
    store,
    engine,
    clock,
    reconciler,
  }
}

// Waits until `check` holds or the timeout elapses.
pub async fn wait_for(timeout: StdDuration, mut check: impl FnMut() -> bool) -> bool {
  let deadline = tokio::time::Instant::now() + timeout;
  while tokio::time::Instant::now() < deadline {
    if check() {
      return true;
    }
    tokio::time::sleep(StdDuration::from_millis(20)).await;
  }
  check()
}

pub fn keys(engine: &RecordingEngine) -> HashSet<JobKey> {
  engine
    .calls()
    .into_iter()
    .filter_map(|call| match call {
      EngineCall::Register(key) => Some(key),
      _ => None,
    })
    .collect()
}
