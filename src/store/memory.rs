use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use parking_lot::Mutex;

use super::JobStore;
use crate::error::StoreError;
use crate::job::{DesiredState, JobDefinition, JobId, JobLevel, JobLogEntity};

#[derive(Debug, Default)]
struct Tables {
  jobs: BTreeMap<JobId, JobDefinition>,
  logs: Vec<JobLogEntity>,
  next_job_id: JobId,
  next_log_id: i64,
}

/// Process-local store. Ids start at 1, as in an autoincrement column.
#[derive(Debug, Default)]
pub struct MemoryStore {
  tables: Mutex<Tables>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn select(&self, filter: impl Fn(&JobDefinition) -> bool) -> Vec<JobDefinition> {
    self
      .tables
      .lock()
      .jobs
      .values()
      .filter(|job| filter(*job))
      .cloned()
      .collect()
  }

  fn modify(&self, id: JobId, change: impl FnOnce(&mut JobDefinition)) -> Result<(), StoreError> {
    let mut tables = self.tables.lock();
    let job = tables.jobs.get_mut(&id).ok_or(StoreError::JobNotFound(id))?;
    change(job);
    job.update_time = Some(Local::now());
    Ok(())
  }
}

impl JobStore for MemoryStore {
  fn eligible_jobs(&self) -> Result<Vec<JobDefinition>, StoreError> {
    Ok(self.select(|job| !job.disabled && job.state.is_pending()))
  }

  fn running_jobs(&self) -> Result<Vec<JobDefinition>, StoreError> {
    Ok(self.select(|job| !job.disabled && job.state == DesiredState::Running))
  }

  fn system_job(&self) -> Result<Option<JobDefinition>, StoreError> {
    Ok(
      self
        .select(|job| job.level == JobLevel::System)
        .into_iter()
        .next(),
    )
  }

  fn insert_job(&self, job: &JobDefinition) -> Result<JobId, StoreError> {
    let mut tables = self.tables.lock();
    tables.next_job_id += 1;
    let id = tables.next_job_id;
    let mut row = job.clone();
    row.id = id;
    tables.jobs.insert(id, row);
    Ok(id)
  }

  fn update_state(&self, id: JobId, state: DesiredState) -> Result<(), StoreError> {
    self.modify(id, |job| job.state = state)
  }

  fn set_available(&self, id: JobId) -> Result<(), StoreError> {
    self.modify(id, |job| {
      job.disabled = false;
      job.state = DesiredState::Starting;
    })
  }

  fn set_all_running_to_starting(&self) -> Result<usize, StoreError> {
    let mut tables = self.tables.lock();
    let now = Local::now();
    let mut changed = 0;
    for job in tables
      .jobs
      .values_mut()
      .filter(|job| job.state == DesiredState::Running)
    {
      job.state = DesiredState::Starting;
      job.update_time = Some(now);
      changed += 1;
    }
    Ok(changed)
  }

  fn insert_log(&self, log: &JobLogEntity) -> Result<i64, StoreError> {
    let mut tables = self.tables.lock();
    tables.next_log_id += 1;
    let id = tables.next_log_id;
    let mut row = log.clone();
    row.id = Some(id);
    tables.logs.push(row);
    Ok(id)
  }

  fn get_job(&self, id: JobId) -> Result<Option<JobDefinition>, StoreError> {
    Ok(self.tables.lock().jobs.get(&id).cloned())
  }

  fn list_jobs(&self) -> Result<Vec<JobDefinition>, StoreError> {
    Ok(self.select(|_| true))
  }

  fn job_logs(&self, job_id: JobId) -> Result<Vec<JobLogEntity>, StoreError> {
    Ok(
      self
        .tables
        .lock()
        .logs
        .iter()
        .filter(|log| log.job_id == job_id)
        .cloned()
        .collect(),
    )
  }

  fn delete_logs_before(&self, cutoff: DateTime<Local>) -> Result<usize, StoreError> {
    let mut tables = self.tables.lock();
    let before = tables.logs.len();
    tables.logs.retain(|log| log.create_time > cutoff);
    Ok(before - tables.logs.len())
  }
}
