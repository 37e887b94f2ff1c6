//! The seam between the reconciler and whatever actually fires jobs.
//!
//! [`SchedulerEngine`] is the contract the reconciler depends on. [`CronEngine`](crate::CronEngine)
//! is the in-process implementation; tests substitute recording fakes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cron_expr::{CronExpr, TriggerZone};
use crate::error::EngineError;
use crate::job::{BoxedExecFn, FireId, JobKey, TriggerKey};

/// Registry operations the reconciler needs from a scheduler.
///
/// Every call completes before it returns: a successful `register` means the key
/// is registered, so callers decide the next state from the returned result.
#[async_trait]
pub trait SchedulerEngine: Send + Sync {
  async fn exists(&self, key: &JobKey) -> Result<bool, EngineError>;

  async fn register(&self, registration: Registration) -> Result<(), EngineError>;

  /// Returns `true` if a registration was removed.
  async fn unregister(&self, key: &JobKey) -> Result<bool, EngineError>;

  /// Fires the registered handler once, outside its cron schedule.
  async fn trigger_now(&self, key: &JobKey) -> Result<(), EngineError>;
}

// --- Registration ---

/// String slots attached to a registration and handed to the handler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDataMap(BTreeMap<String, String>);

impl JobDataMap {
  pub const PARAMETERS: &'static str = "Parameters";
  pub const JOB_NAME: &'static str = "JobName";

  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, slot: &str, value: impl Into<String>) -> Option<String> {
    self.0.insert(slot.to_string(), value.into())
  }

  pub fn get(&self, slot: &str) -> Option<&str> {
    self.0.get(slot).map(String::as_str)
  }

  pub fn parameters(&self) -> Option<&str> {
    self.get(Self::PARAMETERS)
  }

  pub fn job_name(&self) -> Option<&str> {
    self.get(Self::JOB_NAME)
  }
}

/// The cron trigger half of a registration.
#[derive(Debug, Clone, PartialEq)]
pub struct CronTrigger {
  pub key: TriggerKey,
  pub expression: CronExpr,
  pub zone: TriggerZone,
  pub description: String,
}

impl CronTrigger {
  /// A trigger evaluated in the host's local time zone.
  pub fn local(key: TriggerKey, expression: CronExpr) -> Self {
    Self {
      key,
      expression,
      zone: TriggerZone::Local,
      description: String::new(),
    }
  }

  pub fn with_description(mut self, description: &str) -> Self {
    self.description = description.to_string();
    self
  }

  pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    self.zone.next_fire(&self.expression, after)
  }
}

/// Everything the engine needs to fire a job: its key, the handler, the data
/// slots and the trigger.
#[derive(Clone)]
pub struct Registration {
  pub key: JobKey,
  pub handler: Arc<BoxedExecFn>,
  pub data: JobDataMap,
  pub trigger: CronTrigger,
}

impl Registration {
  pub fn new(key: JobKey, handler: Arc<BoxedExecFn>, trigger: CronTrigger) -> Self {
    Self {
      key,
      handler,
      data: JobDataMap::new(),
      trigger,
    }
  }

  pub fn with_parameters(mut self, parameters: &str) -> Self {
    self.data.insert(JobDataMap::PARAMETERS, parameters);
    self
  }

  pub fn with_job_name(mut self, job_name: &str) -> Self {
    self.data.insert(JobDataMap::JOB_NAME, job_name);
    self
  }
}

impl fmt::Debug for Registration {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Registration")
      .field("key", &self.key)
      .field("handler", &format_args!("Arc<BoxedExecFn>"))
      .field("data", &self.data)
      .field("trigger", &self.trigger)
      .finish()
  }
}

/// Snapshot of one registration, for listing.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationSummary {
  pub key: JobKey,
  pub trigger: TriggerKey,
  pub cron_expression: String,
  pub job_name: Option<String>,
  pub next_fire: Option<DateTime<Utc>>,
}

// --- Fire Reporting ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
  Success,
  /// The handler returned `false`.
  Failed,
  Panicked,
}

/// What happened during one handler execution.
#[derive(Debug, Clone)]
pub struct FireRecord {
  pub key: JobKey,
  pub fire_id: FireId,
  pub job_name: String,
  pub scheduled_time: DateTime<Utc>,
  pub started_at: DateTime<Utc>,
  pub duration: Duration,
  pub outcome: FireOutcome,
  pub manual: bool,
}

/// Receives a [`FireRecord`] after every execution. Called on the worker task,
/// so implementations should be quick.
pub trait FireListener: Send + Sync + 'static {
  fn on_fire_complete(&self, record: &FireRecord);
}
