//! Persistence of job definitions and the execution log.
//!
//! The reconciler only talks to a [`JobStore`]. Two implementations ship with
//! the crate: [`MemoryStore`] and, behind the `sqlite` feature, [`SqliteStore`].

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use std::sync::Arc;

use chrono::{DateTime, Local};
use tracing::{debug, error, warn};

use crate::engine::{FireListener, FireOutcome, FireRecord};
use crate::error::StoreError;
use crate::job::{DesiredState, FireState, JobDefinition, JobId, JobLogEntity};

/// Job table and log table access.
///
/// Listing methods return rows in ascending id order.
pub trait JobStore: Send + Sync {
  /// Non-disabled jobs whose state asks for action: `Starting`, `Stopping`,
  /// `Updating` or `FireNow`.
  fn eligible_jobs(&self) -> Result<Vec<JobDefinition>, StoreError>;

  /// Non-disabled jobs in the `Running` state.
  fn running_jobs(&self) -> Result<Vec<JobDefinition>, StoreError>;

  /// The system-level job, if one exists (lowest id wins).
  fn system_job(&self) -> Result<Option<JobDefinition>, StoreError>;

  /// Inserts a job and returns its assigned id. `job.id` is ignored.
  fn insert_job(&self, job: &JobDefinition) -> Result<JobId, StoreError>;

  /// Writes `state` and stamps `update_time`.
  fn update_state(&self, id: JobId, state: DesiredState) -> Result<(), StoreError>;

  /// Clears `disabled` and sets the state to `Starting`.
  fn set_available(&self, id: JobId) -> Result<(), StoreError>;

  /// Moves every `Running` job to `Starting`, returning how many changed.
  fn set_all_running_to_starting(&self) -> Result<usize, StoreError>;

  /// Appends a log row and returns its id.
  fn insert_log(&self, log: &JobLogEntity) -> Result<i64, StoreError>;

  fn get_job(&self, id: JobId) -> Result<Option<JobDefinition>, StoreError>;

  fn list_jobs(&self) -> Result<Vec<JobDefinition>, StoreError>;

  /// Log rows for one job, oldest first.
  fn job_logs(&self, job_id: JobId) -> Result<Vec<JobLogEntity>, StoreError>;

  /// Deletes log rows with `create_time <= cutoff`, returning how many went.
  fn delete_logs_before(&self, cutoff: DateTime<Local>) -> Result<usize, StoreError>;
}

/// Writes one log row per handler execution.
pub struct StoreFireLog {
  store: Arc<dyn JobStore>,
}

impl StoreFireLog {
  pub fn new(store: Arc<dyn JobStore>) -> Self {
    Self { store }
  }

  fn entry(record: &FireRecord, job_id: JobId) -> JobLogEntity {
    let name = if record.job_name.is_empty() {
      record.key.to_string()
    } else {
      record.job_name.clone()
    };
    let trigger = if record.manual { "manual trigger" } else { "schedule" };
    let (fire_state, content) = match record.outcome {
      FireOutcome::Success => (
        FireState::Success,
        format!("{name} completed ({trigger})"),
      ),
      FireOutcome::Failed => (
        FireState::Error,
        format!("{name} reported failure ({trigger})"),
      ),
      FireOutcome::Panicked => (FireState::Error, format!("{name} panicked ({trigger})")),
    };
    JobLogEntity::fire(
      job_id,
      record.started_at.with_timezone(&Local),
      record.duration,
      fire_state,
      content,
    )
  }
}

impl FireListener for StoreFireLog {
  fn on_fire_complete(&self, record: &FireRecord) {
    let Some(job_id) = record.key.job_id() else {
      warn!(job_key = %record.key, "Fire record does not map to a job id; not logged.");
      return;
    };
    match self.store.insert_log(&Self::entry(record, job_id)) {
      Ok(log_id) => debug!(job_id, log_id, "Recorded fire outcome."),
      Err(e) => error!(job_id, error = %e, "Failed to record fire outcome."),
    }
  }
}

impl std::fmt::Debug for StoreFireLog {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StoreFireLog").finish_non_exhaustive()
  }
}
