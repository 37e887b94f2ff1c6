//! Tests for the main reconciliation pass.

mod common;

use crate::common::{fixture, job, setup_tracing, EngineCall, ASSEMBLY};
use jobkeeper::{DesiredState, JobDataMap, JobDefinition, JobKey, JobStore, PassReport, TriggerKey};

#[tokio::test]
async fn test_starting_job_is_registered_and_running() {
  setup_tracing();
  let fx = fixture().await;
  let job = fx.insert(job("Report", DesiredState::Starting));

  let report = fx.reconciler.run_pass().await.unwrap();

  assert!(fx.engine.is_registered(&job.key()));
  assert_eq!(fx.state(job.id), DesiredState::Running);
  assert_eq!(report.registered, 1);
  assert_eq!(report.failed_registrations, 0);
  assert!(fx.get(job.id).update_time.is_some());
}

#[tokio::test]
async fn test_invalid_cron_stops_job_with_one_error_log() {
  setup_tracing();
  let fx = fixture().await;
  let mut bad = job("Broken", DesiredState::Starting);
  bad.cron_expression = "every day at noon".to_string();
  let bad = fx.insert(bad);

  let report = fx.reconciler.run_pass().await.unwrap();

  assert!(!fx.engine.is_registered(&bad.key()));
  assert_eq!(fx.state(bad.id), DesiredState::Stopped);
  assert_eq!(fx.error_logs(bad.id), 1);
  assert_eq!(report.failed_registrations, 1);
  // Engine untouched by an invalid expression.
  assert!(!fx
    .engine
    .calls()
    .contains(&EngineCall::Register(bad.key())));

  let logs = fx.store.job_logs(bad.id).unwrap();
  assert!(logs[0].content.starts_with("Broken failed to start: invalid cron expression"));
}

#[tokio::test]
async fn test_missing_handler_stops_job_with_error_log() {
  setup_tracing();
  let fx = fixture().await;
  let orphan = fx.insert(JobDefinition::new(
    "Orphan",
    "missing.dll",
    "Missing.Handler",
    "0 * * * * *",
  ));

  fx.reconciler.run_pass().await.unwrap();

  assert_eq!(fx.state(orphan.id), DesiredState::Stopped);
  assert!(!fx.engine.is_registered(&orphan.key()));
  let logs = fx.store.job_logs(orphan.id).unwrap();
  assert_eq!(logs.len(), 1);
  assert!(logs[0].content.contains("`Missing.Handler` is not registered in `missing.dll`"));
  assert_eq!(logs[0].fire_duration, 0);
}

#[tokio::test]
async fn test_engine_rejection_stops_job_with_error_log() {
  setup_tracing();
  let fx = fixture().await;
  let job = fx.insert(job("Rejected", DesiredState::Updating));
  fx.engine.reject_registrations(true);

  let report = fx.reconciler.run_pass().await.unwrap();

  assert_eq!(fx.state(job.id), DesiredState::Stopped);
  assert_eq!(fx.error_logs(job.id), 1);
  assert_eq!(report.failed_registrations, 1);
  let logs = fx.store.job_logs(job.id).unwrap();
  assert!(logs[0].content.contains("scheduler rejected the registration"));
}

#[tokio::test]
async fn test_second_pass_is_idempotent() {
  setup_tracing();
  let fx = fixture().await;
  let job = fx.insert(job("Steady", DesiredState::Starting));
  fx.reconciler.run_pass().await.unwrap();
  let settled = fx.get(job.id);
  fx.engine.clear_calls();

  let report = fx.reconciler.run_pass().await.unwrap();

  assert!(fx.engine.mutating_calls().is_empty(), "{:?}", fx.engine.calls());
  assert_eq!(fx.get(job.id), settled, "no state write expected");
  assert_eq!(report.jobs_examined, 0);
}

#[tokio::test]
async fn test_stopping_registered_job_is_unregistered() {
  setup_tracing();
  let fx = fixture().await;
  let job = fx.insert(job("Stop me", DesiredState::Starting));
  fx.reconciler.run_pass().await.unwrap();
  fx.store.update_state(job.id, DesiredState::Stopping).unwrap();

  let report = fx.reconciler.run_pass().await.unwrap();

  assert!(!fx.engine.is_registered(&job.key()));
  assert_eq!(fx.state(job.id), DesiredState::Stopped);
  assert_eq!(report.unregistered, 1);
}

#[tokio::test]
async fn test_stopping_unregistered_job_touches_only_the_store() {
  setup_tracing();
  let fx = fixture().await;
  let job = fx.insert(job("Never started", DesiredState::Stopping));

  fx.reconciler.run_pass().await.unwrap();

  assert_eq!(fx.state(job.id), DesiredState::Stopped);
  assert!(fx.engine.mutating_calls().is_empty());
}

#[tokio::test]
async fn test_starting_job_already_registered_only_writes_running() {
  setup_tracing();
  let fx = fixture().await;
  let job = fx.insert(job("Restarted", DesiredState::Starting));
  fx.engine.preregister(job.key());

  fx.reconciler.run_pass().await.unwrap();

  assert_eq!(fx.state(job.id), DesiredState::Running);
  assert!(fx.engine.mutating_calls().is_empty());
}

#[tokio::test]
async fn test_updating_registered_job_is_reregistered() {
  setup_tracing();
  let fx = fixture().await;
  let job = fx.insert(job("Changing", DesiredState::Starting));
  fx.reconciler.run_pass().await.unwrap();
  fx.engine.clear_calls();

  fx.store.update_state(job.id, DesiredState::Updating).unwrap();
  let report = fx.reconciler.run_pass().await.unwrap();

  assert_eq!(
    fx.engine.mutating_calls(),
    vec![EngineCall::Unregister(job.key()), EngineCall::Register(job.key())]
  );
  assert_eq!(fx.state(job.id), DesiredState::Running);
  assert_eq!((report.unregistered, report.registered), (1, 1));
}

#[tokio::test]
async fn test_fire_now_registered_triggers_exactly_once() {
  setup_tracing();
  let fx = fixture().await;
  let job = fx.insert(job("Fire", DesiredState::Starting));
  fx.reconciler.run_pass().await.unwrap();
  fx.engine.clear_calls();

  fx.store.update_state(job.id, DesiredState::FireNow).unwrap();
  let report = fx.reconciler.run_pass().await.unwrap();

  assert_eq!(fx.engine.mutating_calls(), vec![EngineCall::TriggerNow(job.key())]);
  assert_eq!(fx.state(job.id), DesiredState::Running);
  assert_eq!(report.triggered, 1);
}

#[tokio::test]
async fn test_fire_now_unregistered_registers_then_triggers() {
  setup_tracing();
  let fx = fixture().await;
  let job = fx.insert(job("Cold fire", DesiredState::FireNow));

  fx.reconciler.run_pass().await.unwrap();

  assert_eq!(
    fx.engine.mutating_calls(),
    vec![EngineCall::Register(job.key()), EngineCall::TriggerNow(job.key())]
  );
  assert_eq!(fx.state(job.id), DesiredState::Running);
}

#[tokio::test]
async fn test_disabled_job_is_ignored() {
  setup_tracing();
  let fx = fixture().await;
  let job = fx.insert(job("Disabled", DesiredState::Starting).disabled(true));

  let report = fx.reconciler.run_pass().await.unwrap();

  assert_eq!(report.jobs_examined, 0);
  assert_eq!(fx.state(job.id), DesiredState::Starting);
  assert!(!fx.engine.is_registered(&job.key()));
}

#[tokio::test]
async fn test_trigger_failure_is_isolated_to_its_job() {
  setup_tracing();
  let fx = fixture().await;
  let first = fx.insert(job("Fire fails", DesiredState::Starting));
  fx.reconciler.run_pass().await.unwrap();
  fx.store.update_state(first.id, DesiredState::FireNow).unwrap();
  let second = fx.insert(job("Next in line", DesiredState::Starting));
  fx.engine.fail_triggers(true);

  let report = fx.reconciler.run_pass().await.unwrap();

  assert_eq!(report.job_errors, 1);
  assert_eq!(fx.state(first.id), DesiredState::FireNow, "left for the next pass");
  assert_eq!(fx.state(second.id), DesiredState::Running);

  fx.engine.fail_triggers(false);
  fx.reconciler.run_pass().await.unwrap();
  assert_eq!(fx.state(first.id), DesiredState::Running);
}

#[tokio::test]
async fn test_registration_carries_job_data_and_trigger_key() {
  setup_tracing();
  let fx = fixture().await;
  let job = fx.insert(
    JobDefinition::new("With args", ASSEMBLY, "jobs.noop", "0 0/5 * * * ?")
      .with_args("{\"days\":3}")
      .with_description("every five minutes"),
  );

  fx.reconciler.run_pass().await.unwrap();

  let registration = fx.engine.registration(&job.key()).expect("registered");
  assert_eq!(registration.key, JobKey::of(job.id));
  assert_eq!(registration.trigger.key, TriggerKey::of(job.id));
  assert_eq!(registration.trigger.key.group, format!("{}TriggerGroup", job.id));
  assert_eq!(registration.trigger.description, "every five minutes");
  assert_eq!(registration.data.get(JobDataMap::PARAMETERS), Some("{\"days\":3}"));
  assert_eq!(registration.data.get(JobDataMap::JOB_NAME), Some("With args"));
}

#[tokio::test]
async fn test_system_job_cannot_be_stopped() {
  setup_tracing();
  let fx = fixture().await;
  let system = fx.store.system_job().unwrap().expect("system job");
  fx.store.update_state(system.id, DesiredState::Stopping).unwrap();

  fx.reconciler.run_pass().await.unwrap();

  assert!(fx.engine.is_registered(&system.key()));
  assert_eq!(fx.state(system.id), DesiredState::Running);
  assert!(!fx
    .engine
    .mutating_calls()
    .contains(&EngineCall::Unregister(system.key())));
}

#[tokio::test]
async fn test_try_run_pass_runs_when_idle() {
  setup_tracing();
  let fx = fixture().await;
  let job = fx.insert(job("Via try", DesiredState::Starting));

  let report = fx.reconciler.try_run_pass().await.expect("not busy").unwrap();

  assert_eq!(report.registered, 1);
  assert_eq!(fx.state(job.id), DesiredState::Running);
}

#[tokio::test]
async fn test_unavailable_engine_leaves_job_pending() {
  setup_tracing();
  let fx = fixture().await;
  let job = fx.insert(job("Waits for engine", DesiredState::Starting));
  fx.engine.set_unavailable(true);

  let report = fx.reconciler.run_pass().await.unwrap();

  assert_eq!(report.job_errors, 1);
  assert_eq!(report.failed_registrations, 0);
  assert_eq!(fx.state(job.id), DesiredState::Starting);
  assert_eq!(fx.error_logs(job.id), 0);

  fx.engine.set_unavailable(false);
  fx.reconciler.run_pass().await.unwrap();
  assert_eq!(fx.state(job.id), DesiredState::Running);
}

#[tokio::test]
async fn test_updating_unregistered_job_is_registered() {
  setup_tracing();
  let fx = fixture().await;
  let job = fx.insert(job("Edited while stopped", DesiredState::Updating));

  let report = fx.reconciler.run_pass().await.unwrap();

  assert_eq!(fx.engine.mutating_calls(), vec![EngineCall::Register(job.key())]);
  assert_eq!(fx.state(job.id), DesiredState::Running);
  assert_eq!((report.registered, report.unregistered), (1, 0));
}

#[tokio::test]
async fn test_running_job_missing_from_engine_is_registered_again() {
  setup_tracing();
  let fx = fixture().await;
  let job = fx.insert(job("Lost in restart", DesiredState::Running));
  let mut report = PassReport::default();

  fx.reconciler.reconcile_job(&job, &mut report).await.unwrap();

  assert_eq!(
    fx.engine.calls(),
    vec![EngineCall::Exists(job.key()), EngineCall::Register(job.key())]
  );
  assert!(fx.engine.is_registered(&job.key()));
  assert_eq!(fx.state(job.id), DesiredState::Running);
  assert!(fx.get(job.id).update_time.is_none(), "state unchanged, no write");
  assert_eq!(report.registered, 1);
}

#[tokio::test]
async fn test_stopped_job_still_registered_is_unregistered() {
  setup_tracing();
  let fx = fixture().await;
  let job = fx.insert(job("Stale registration", DesiredState::Stopped));
  fx.engine.preregister(job.key());
  let mut report = PassReport::default();

  fx.reconciler.reconcile_job(&job, &mut report).await.unwrap();

  assert_eq!(fx.engine.mutating_calls(), vec![EngineCall::Unregister(job.key())]);
  assert!(!fx.engine.is_registered(&job.key()));
  assert_eq!(fx.state(job.id), DesiredState::Stopped);
  assert!(fx.get(job.id).update_time.is_none());
  assert_eq!(report.unregistered, 1);
}

#[tokio::test]
async fn test_fire_now_with_failed_registration_is_stopped_without_trigger() {
  setup_tracing();
  let fx = fixture().await;
  let job = fx.insert(job("Cannot fire", DesiredState::FireNow));
  fx.engine.reject_registrations(true);

  let report = fx.reconciler.run_pass().await.unwrap();

  assert_eq!(fx.engine.mutating_calls(), vec![EngineCall::Register(job.key())]);
  assert_eq!(fx.state(job.id), DesiredState::Stopped);
  assert_eq!(fx.error_logs(job.id), 1);
  assert_eq!((report.failed_registrations, report.triggered), (1, 0));
}
