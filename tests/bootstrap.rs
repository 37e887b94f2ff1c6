//! Tests for the system-job bootstrap.

mod common;

use std::sync::Arc;

use crate::common::{handlers, setup_tracing, FixedClock, RecordingEngine};
use jobkeeper::builtin::{BUILTIN_ASSEMBLY, SYSTEM_JOB_CLASS};
use jobkeeper::reconciler::{system_job_definition, DEFAULT_SYSTEM_CRON};
use jobkeeper::{DesiredState, JobLevel, JobStore, MemoryStore, Reconciler};

fn reconciler(store: &Arc<MemoryStore>, engine: &Arc<RecordingEngine>) -> Reconciler {
  Reconciler::new(store.clone(), engine.clone(), handlers()).with_clock(FixedClock::at(8, 20))
}

#[tokio::test]
async fn test_empty_store_gets_one_system_job() {
  setup_tracing();
  let store = Arc::new(MemoryStore::new());
  let engine = RecordingEngine::new();

  let id = reconciler(&store, &engine).keep_system_job_running().await.unwrap();

  let jobs = store.list_jobs().unwrap();
  assert_eq!(jobs.len(), 1);
  let system = &jobs[0];
  assert_eq!(system.id, id);
  assert_eq!(system.level, JobLevel::System);
  assert_eq!(system.cron_expression, "0/15 * * * * ?");
  assert_eq!(system.state, DesiredState::Starting);
  assert!(!system.disabled);
  assert_eq!(system.create_name, "AtFirstRun");
  assert_eq!(system.assembly_name, BUILTIN_ASSEMBLY);
  assert_eq!(system.class_name, SYSTEM_JOB_CLASS);
  assert_eq!(system.cron_description, "every 15 seconds");
}

#[tokio::test]
async fn test_bootstrap_does_not_duplicate() {
  setup_tracing();
  let store = Arc::new(MemoryStore::new());
  let engine = RecordingEngine::new();
  let reconciler = reconciler(&store, &engine);

  let first = reconciler.keep_system_job_running().await.unwrap();
  let second = reconciler.keep_system_job_running().await.unwrap();

  assert_eq!(first, second);
  assert_eq!(store.list_jobs().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unregistered_disabled_system_job_is_made_available() {
  setup_tracing();
  let store = Arc::new(MemoryStore::new());
  let engine = RecordingEngine::new();
  let id = store
    .insert_job(
      &system_job_definition(DEFAULT_SYSTEM_CRON)
        .with_state(DesiredState::Stopped)
        .disabled(true),
    )
    .unwrap();
  assert!(store.eligible_jobs().unwrap().is_empty());

  let bootstrapped = reconciler(&store, &engine).keep_system_job_running().await.unwrap();

  assert_eq!(bootstrapped, id);
  let row = store.get_job(id).unwrap().unwrap();
  assert_eq!(row.state, DesiredState::Starting);
  assert!(!row.disabled);
  assert_eq!(store.eligible_jobs().unwrap().len(), 1);
}

#[tokio::test]
async fn test_registered_system_job_is_left_alone() {
  setup_tracing();
  let store = Arc::new(MemoryStore::new());
  let engine = RecordingEngine::new();
  let reconciler = reconciler(&store, &engine);
  reconciler.run_pass().await.unwrap();
  let system = store.system_job().unwrap().unwrap();
  assert_eq!(system.state, DesiredState::Running);

  reconciler.keep_system_job_running().await.unwrap();

  assert_eq!(store.system_job().unwrap().unwrap(), system);
}

#[tokio::test]
async fn test_first_pass_registers_system_job() {
  setup_tracing();
  let store = Arc::new(MemoryStore::new());
  let engine = RecordingEngine::new();

  let report = reconciler(&store, &engine).run_pass().await.unwrap();

  let system = store.system_job().unwrap().unwrap();
  assert!(engine.is_registered(&system.key()));
  assert_eq!(system.state, DesiredState::Running);
  assert_eq!(report.registered, 1);
}

#[tokio::test]
async fn test_custom_system_cron_is_used_on_creation() {
  setup_tracing();
  let store = Arc::new(MemoryStore::new());
  let engine = RecordingEngine::new();
  let reconciler = reconciler(&store, &engine).with_system_cron("0/30 * * * * *");

  reconciler.keep_system_job_running().await.unwrap();

  let system = store.system_job().unwrap().unwrap();
  assert_eq!(system.cron_expression, "0/30 * * * * *");
  assert_ne!(system.cron_expression, DEFAULT_SYSTEM_CRON);
}

#[tokio::test]
async fn test_pending_system_job_row_is_not_rewritten() {
  setup_tracing();
  let store = Arc::new(MemoryStore::new());
  let engine = RecordingEngine::new();
  let id = store
    .insert_job(&system_job_definition(DEFAULT_SYSTEM_CRON))
    .unwrap();
  let reconciler = reconciler(&store, &engine);

  for _ in 0..3 {
    assert_eq!(reconciler.keep_system_job_running().await.unwrap(), id);
  }

  let row = store.get_job(id).unwrap().unwrap();
  assert_eq!(row.state, DesiredState::Starting);
  assert!(row.update_time.is_none(), "an available row needs no write");
  assert!(engine.calls().is_empty());
}
