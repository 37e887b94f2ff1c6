use chrono::{DateTime, Local, Timelike};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::Reconciler;
use crate::builtin::{BUILTIN_ASSEMBLY, SYSTEM_JOB_CLASS};
use crate::error::{ReconcileError, StoreError};
use crate::job::{DesiredState, JobDefinition, JobId, JobLevel};

/// Every 15 seconds.
pub const DEFAULT_SYSTEM_CRON: &str = "0/15 * * * * ?";

/// The row inserted when the store has no system job.
pub fn system_job_definition(cron_expression: &str) -> JobDefinition {
  let mut job = JobDefinition::new("System Job", BUILTIN_ASSEMBLY, SYSTEM_JOB_CLASS, cron_expression)
    .with_description("Schedules every other job; never delete, stop or disable")
    .with_state(DesiredState::Starting)
    .with_creator("AtFirstRun");
  job.level = JobLevel::System;
  job.cron_description = if cron_expression == DEFAULT_SYSTEM_CRON {
    "every 15 seconds".to_string()
  } else {
    cron_expression.to_string()
  };
  job
}

/// Outcome of one recovery sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
  /// `false` when the current minute is not a sweep minute.
  pub ran: bool,
  pub checked: usize,
  pub recovered: usize,
  pub failed: usize,
}

impl Reconciler {
  /// Makes sure the system job exists and, when the engine does not hold it,
  /// marks it available so the pass registers it.
  pub async fn keep_system_job_running(&self) -> Result<JobId, ReconcileError> {
    let job = match self.store.system_job()? {
      Some(job) => job,
      None => {
        let mut job = system_job_definition(&self.system_cron);
        job.id = self.store.insert_job(&job)?;
        info!(job_id = job.id, cron = %self.system_cron, "Created the system job.");
        job
      }
    };

    let available = !job.disabled && job.state == DesiredState::Starting;
    if !available && !self.engine.exists(&job.key()).await? {
      debug!(job_id = job.id, "System job not registered; marking it available.");
      self.store.set_available(job.id)?;
    }
    Ok(job.id)
  }

  /// Re-registers `Running` jobs the engine lost (for example after the
  /// process was killed without [`on_shutdown`](Self::on_shutdown)). Only runs
  /// when `now` falls on a sweep minute.
  ///
  /// A job that cannot be registered is set `Stopped`; its failure is already
  /// in the job log.
  pub async fn sweep_running_jobs(&self, now: DateTime<Local>) -> Result<SweepReport, ReconcileError> {
    let mut report = SweepReport::default();
    if !self.sweep_minutes.contains(&now.minute()) {
      return Ok(report);
    }
    report.ran = true;

    for job in self.store.running_jobs()? {
      report.checked += 1;
      match self.engine.exists(&job.key()).await {
        Ok(true) => continue,
        Ok(false) => {}
        Err(e) => {
          warn!(job_id = job.id, error = %e, "Existence check failed during sweep.");
          continue;
        }
      }

      match self.attach(&job).await {
        Ok(true) => {
          report.recovered += 1;
          info!(job_id = job.id, name = %job.name, "Recovered running job.");
        }
        Ok(false) => {
          report.failed += 1;
          self.store.update_state(job.id, DesiredState::Stopped)?;
        }
        Err(ReconcileError::Engine(e)) => {
          warn!(job_id = job.id, error = %e, "Scheduler unavailable during sweep.");
        }
        Err(store_error) => return Err(store_error),
      }
    }

    if report.checked > 0 {
      debug!(?report, "Recovery sweep complete.");
    }
    Ok(report)
  }

  /// Clean-shutdown hook: every `Running` job becomes `Starting`, so the next
  /// process start registers it again. Returns how many rows changed.
  pub fn on_shutdown(&self) -> Result<usize, StoreError> {
    let changed = self.store.set_all_running_to_starting()?;
    info!(changed, "Running jobs reset to Starting for the next start.");
    Ok(changed)
  }
}
