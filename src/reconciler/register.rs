use tracing::{info, warn};

use super::Reconciler;
use crate::cron_expr::CronExpr;
use crate::engine::{CronTrigger, Registration};
use crate::error::{ReconcileError, RegistrationFailure};
use crate::job::{JobDefinition, JobLogEntity};

impl Reconciler {
  /// Validates the job's cron expression, resolves its handler and submits
  /// the registration. The engine is untouched unless both checks pass.
  pub async fn register_job(&self, job: &JobDefinition) -> Result<(), RegistrationFailure> {
    let expression =
      CronExpr::parse(&job.cron_expression).map_err(RegistrationFailure::InvalidCron)?;

    let handler = self
      .handlers
      .resolve(&job.assembly_name, &job.class_name)
      .ok_or_else(|| RegistrationFailure::HandlerNotFound {
        assembly_name: job.assembly_name.clone(),
        class_name: job.class_name.clone(),
      })?;

    let trigger =
      CronTrigger::local(job.trigger_key(), expression).with_description(&job.description);
    let registration = Registration::new(job.key(), handler, trigger)
      .with_parameters(&job.job_args)
      .with_job_name(&job.name);

    self
      .engine
      .register(registration)
      .await
      .map_err(RegistrationFailure::Engine)
  }

  /// A registration attempt that records failures in the job log.
  ///
  /// Returns `Ok(true)` once the job is registered and `Ok(false)` after a
  /// failure has been logged. An engine that has stopped answering is not the
  /// job's fault: that error is returned and nothing is logged.
  pub async fn attach(&self, job: &JobDefinition) -> Result<bool, ReconcileError> {
    match self.register_job(job).await {
      Ok(()) => {
        info!(job_id = job.id, name = %job.name, cron = %job.cron_expression, "Job registered.");
        Ok(true)
      }
      Err(RegistrationFailure::Engine(e)) if e.is_unavailable() => Err(e.into()),
      Err(failure) => {
        warn!(job_id = job.id, name = %job.name, error = %failure, "Job failed to start.");
        let content = format!("{} failed to start: {failure}", job.name);
        self.store.insert_log(&JobLogEntity::error(job.id, content))?;
        Ok(false)
      }
    }
  }
}
