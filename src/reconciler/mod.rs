//! Reconciliation of persisted job definitions with the engine registry.
//!
//! One pass bootstraps the system job, drives every eligible job toward its
//! desired state, then runs the restart-recovery sweep. The store holds desired
//! state; the engine registry holds actual state. Neither is locked against the
//! other: anything left inconsistent by a partial failure is fixed on the next
//! pass.

mod bootstrap;
mod register;

pub use bootstrap::{system_job_definition, SweepReport, DEFAULT_SYSTEM_CRON};

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::engine::SchedulerEngine;
use crate::error::ReconcileError;
use crate::job::{DesiredState, JobDefinition};
use crate::loader::HandlerRegistry;
use crate::store::JobStore;

/// Minutes of the hour at which the recovery sweep runs by default.
pub const DEFAULT_SWEEP_MINUTES: [u32; 2] = [0, 30];

/// Counters for one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
  pub jobs_examined: usize,
  /// Successful engine registrations (including re-registrations on update).
  pub registered: usize,
  pub unregistered: usize,
  pub triggered: usize,
  /// Registration attempts that failed and left the job `Stopped`.
  pub failed_registrations: usize,
  /// Jobs whose transition was abandoned because an engine call failed.
  pub job_errors: usize,
  /// Running jobs re-registered by the recovery sweep.
  pub recovered: usize,
}

/// Drives the engine toward the desired state recorded in the store.
pub struct Reconciler {
  store: Arc<dyn JobStore>,
  engine: Arc<dyn SchedulerEngine>,
  handlers: Arc<HandlerRegistry>,
  clock: Arc<dyn Clock>,
  sweep_minutes: Vec<u32>,
  system_cron: String,
  pass_lock: Mutex<()>,
}

impl Reconciler {
  pub fn new(
    store: Arc<dyn JobStore>,
    engine: Arc<dyn SchedulerEngine>,
    handlers: Arc<HandlerRegistry>,
  ) -> Self {
    Self {
      store,
      engine,
      handlers,
      clock: Arc::new(SystemClock),
      sweep_minutes: DEFAULT_SWEEP_MINUTES.to_vec(),
      system_cron: DEFAULT_SYSTEM_CRON.to_string(),
      pass_lock: Mutex::new(()),
    }
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// Minutes of the hour (0-59) at which the recovery sweep may run.
  pub fn with_sweep_minutes(mut self, minutes: impl IntoIterator<Item = u32>) -> Self {
    self.sweep_minutes = minutes.into_iter().filter(|m| *m < 60).collect();
    self
  }

  /// Cron expression written into the system job when it is first created.
  pub fn with_system_cron(mut self, expression: &str) -> Self {
    self.system_cron = expression.to_string();
    self
  }

  pub fn store(&self) -> &Arc<dyn JobStore> {
    &self.store
  }

  pub fn engine(&self) -> &Arc<dyn SchedulerEngine> {
    &self.engine
  }

  pub fn handlers(&self) -> &Arc<HandlerRegistry> {
    &self.handlers
  }

  pub fn clock(&self) -> &Arc<dyn Clock> {
    &self.clock
  }

  /// Runs one full pass, waiting for any pass already in progress.
  ///
  /// # Errors
  ///
  /// A store failure aborts the pass. Engine failures for a single job are
  /// logged and counted in [`PassReport::job_errors`]; the pass continues.
  pub async fn run_pass(&self) -> Result<PassReport, ReconcileError> {
    let _guard = self.pass_lock.lock().await;
    self.pass().await
  }

  /// Runs one pass unless another is in progress, in which case `None`.
  pub async fn try_run_pass(&self) -> Option<Result<PassReport, ReconcileError>> {
    let Ok(_guard) = self.pass_lock.try_lock() else {
      debug!("Reconciliation pass already in progress; skipping.");
      return None;
    };
    Some(self.pass().await)
  }

  async fn pass(&self) -> Result<PassReport, ReconcileError> {
    self.keep_system_job_running().await?;

    let mut report = PassReport::default();
    for job in self.store.eligible_jobs()? {
      report.jobs_examined += 1;
      match self.reconcile_job(&job, &mut report).await {
        Ok(()) => {}
        Err(ReconcileError::Engine(e)) => {
          warn!(job_id = job.id, state = %job.state, error = %e, "Scheduler call failed; job left for the next pass.");
          report.job_errors += 1;
        }
        Err(store_error) => return Err(store_error),
      }
    }

    let sweep = self.sweep_running_jobs(self.clock.now()).await?;
    report.recovered = sweep.recovered;
    report.failed_registrations += sweep.failed;

    if report == PassReport::default() {
      trace!("Reconciliation pass found nothing to do.");
    } else {
      info!(?report, "Reconciliation pass complete.");
    }
    Ok(report)
  }

  /// Applies the transition for one job given its registration status.
  ///
  /// | state    | not registered             | registered                    |
  /// |----------|----------------------------|-------------------------------|
  /// | Starting | register → Running/Stopped | → Running                     |
  /// | Updating | register → Running/Stopped | unregister, register → ...    |
  /// | Stopping | → Stopped                  | unregister → Stopped          |
  /// | FireNow  | register, trigger → Running| trigger → Running             |
  /// | Running  | register, Stopped on fail  | nothing                       |
  /// | Stopped  | nothing                    | unregister                    |
  ///
  /// The system job is never stopped: a `Stopping` request for it is treated
  /// as `Starting`.
  pub async fn reconcile_job(
    &self,
    job: &JobDefinition,
    report: &mut PassReport,
  ) -> Result<(), ReconcileError> {
    let key = job.key();
    let registered = self.engine.exists(&key).await?;
    let state = if job.is_system() && job.state == DesiredState::Stopping {
      warn!(job_id = job.id, "The system job cannot be stopped; keeping it running.");
      DesiredState::Starting
    } else {
      job.state
    };
    trace!(job_id = job.id, %key, %state, registered, "Reconciling job.");

    match (registered, state) {
      (false, DesiredState::Starting | DesiredState::Updating | DesiredState::Running) => {
        self.attach_and_settle(job, report).await
      }
      (false, DesiredState::Stopping) => self.settle(job, DesiredState::Stopped),
      (false, DesiredState::FireNow) => {
        if self.attach(job).await? {
          report.registered += 1;
          self.engine.trigger_now(&key).await?;
          report.triggered += 1;
          self.settle(job, DesiredState::Running)
        } else {
          report.failed_registrations += 1;
          self.settle(job, DesiredState::Stopped)
        }
      }
      (false, DesiredState::Stopped) => Ok(()),
      (true, DesiredState::Stopping) => {
        self.detach(job, report).await?;
        self.settle(job, DesiredState::Stopped)
      }
      (true, DesiredState::Starting) => self.settle(job, DesiredState::Running),
      (true, DesiredState::Updating) => {
        self.detach(job, report).await?;
        self.attach_and_settle(job, report).await
      }
      (true, DesiredState::FireNow) => {
        self.engine.trigger_now(&key).await?;
        report.triggered += 1;
        info!(job_id = job.id, "Fired job on request.");
        self.settle(job, DesiredState::Running)
      }
      (true, DesiredState::Running) => Ok(()),
      (true, DesiredState::Stopped) => {
        self.detach(job, report).await?;
        Ok(())
      }
    }
  }

  async fn attach_and_settle(
    &self,
    job: &JobDefinition,
    report: &mut PassReport,
  ) -> Result<(), ReconcileError> {
    if self.attach(job).await? {
      report.registered += 1;
      self.settle(job, DesiredState::Running)
    } else {
      report.failed_registrations += 1;
      self.settle(job, DesiredState::Stopped)
    }
  }

  async fn detach(&self, job: &JobDefinition, report: &mut PassReport) -> Result<(), ReconcileError> {
    if self.engine.unregister(&job.key()).await? {
      report.unregistered += 1;
      info!(job_id = job.id, name = %job.name, "Unregistered job.");
    }
    Ok(())
  }

  /// Writes `state` unless the row already holds it.
  fn settle(&self, job: &JobDefinition, state: DesiredState) -> Result<(), ReconcileError> {
    if job.state != state {
      self.store.update_state(job.id, state)?;
      debug!(job_id = job.id, from = %job.state, to = %state, "Job state updated.");
    }
    Ok(())
  }
}

impl std::fmt::Debug for Reconciler {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Reconciler")
      .field("handlers", &self.handlers)
      .field("sweep_minutes", &self.sweep_minutes)
      .field("system_cron", &self.system_cron)
      .finish_non_exhaustive()
  }
}
