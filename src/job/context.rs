use chrono::{DateTime, Utc};

use super::{FireId, JobKey};
use crate::engine::JobDataMap;

/// Contextual information available to a running handler via task-locals.
/// Accessible within a `BoxedExecFn` using `try_get_current_job_context()`
/// or the `job_context!()` macro.
#[derive(Clone, Debug)]
pub struct JobContext {
  /// Engine key of the registration being fired.
  pub job_key: JobKey,
  /// The unique ID of this specific execution.
  pub fire_id: FireId,
  /// When the trigger was due (or when the manual trigger was requested).
  pub scheduled_time: DateTime<Utc>,
  /// `true` when the execution came from `trigger_now` rather than the cron trigger.
  pub manual: bool,
  /// Data attached at registration (`Parameters`, `JobName`).
  pub data: JobDataMap,
}

impl JobContext {
  /// The job's argument payload; empty when none was stored.
  pub fn parameters(&self) -> &str {
    self.data.parameters().unwrap_or_default()
  }

  pub fn job_name(&self) -> &str {
    self.data.job_name().unwrap_or_default()
  }
}

tokio::task_local! {
    /// Provides access to the current `JobContext` within a handler's execution scope.
    /// Set by the engine worker before the handler future is polled.
    pub static CURRENT_JOB_CONTEXT: JobContext;
}

/// Attempts to retrieve the current `JobContext` for the executing handler.
///
/// Returns `None` if called outside a handler scheduled by the engine.
pub fn try_get_current_job_context() -> Option<JobContext> {
  CURRENT_JOB_CONTEXT.try_with(|ctx| ctx.clone()).ok()
}

/// Retrieves the current `JobContext`, panicking if called outside an
/// engine-managed handler task.
///
/// # Panics
/// Panics if the `CURRENT_JOB_CONTEXT` task local has not been set.
#[macro_export]
macro_rules! job_context {
  () => {
    $crate::job::context::CURRENT_JOB_CONTEXT.with(|ctx| ctx.clone())
  };
}
