pub mod context;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ParseValueError;

// --- Public Type Aliases ---

/// Store-assigned identifier of a job definition. Stable for the job's lifetime.
pub type JobId = i64;

/// Unique identifier of a single fire (one execution of a handler). Uses UUID v4.
pub type FireId = Uuid;

/// Type alias for the simple numeric ID assigned to worker tasks for logging.
pub(crate) type WorkerId = usize;

/// The function type a handler registers.
///
/// Every call produces a fresh future for one execution. The future resolves to
/// `true` for logical success and `false` for failure. Panics are caught by the
/// engine worker and reported as failures.
pub type BoxedExecFn =
  Box<dyn Fn() -> Pin<Box<dyn Future<Output = bool> + Send + 'static>> + Send + Sync + 'static>;

// --- Engine Keys ---

/// Address of a registration inside the scheduler engine.
///
/// Always derived from a [`JobId`] through [`JobKey::of`]. The decimal rendering
/// of an id is unique, so two distinct ids never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
  pub name: String,
  pub group: String,
}

impl JobKey {
  pub fn of(id: JobId) -> Self {
    Self {
      name: id.to_string(),
      group: format!("{id}Group"),
    }
  }

  /// Recovers the job id for keys produced by [`JobKey::of`].
  pub fn job_id(&self) -> Option<JobId> {
    let id = self.name.parse::<JobId>().ok()?;
    (self.group == format!("{id}Group")).then_some(id)
  }
}

impl fmt::Display for JobKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.group, self.name)
  }
}

/// Address of the cron trigger attached to a registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriggerKey {
  pub name: String,
  pub group: String,
}

impl TriggerKey {
  pub fn of(id: JobId) -> Self {
    Self {
      name: id.to_string(),
      group: format!("{id}TriggerGroup"),
    }
  }
}

impl fmt::Display for TriggerKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.group, self.name)
  }
}

// --- Persisted Enums ---

/// Persisted intent for a job. The reconciler reads it, drives the engine toward
/// it and writes back the settled state (`Running` or `Stopped`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DesiredState {
  Starting,
  Stopping,
  Updating,
  Running,
  Stopped,
  FireNow,
}

impl DesiredState {
  pub fn as_str(&self) -> &'static str {
    match self {
      DesiredState::Starting => "Starting",
      DesiredState::Stopping => "Stopping",
      DesiredState::Updating => "Updating",
      DesiredState::Running => "Running",
      DesiredState::Stopped => "Stopped",
      DesiredState::FireNow => "FireNow",
    }
  }

  /// States that ask the reconciler to do something on the next pass.
  pub fn is_pending(&self) -> bool {
    matches!(
      self,
      DesiredState::Starting | DesiredState::Stopping | DesiredState::Updating | DesiredState::FireNow
    )
  }
}

impl fmt::Display for DesiredState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for DesiredState {
  type Err = ParseValueError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
      "starting" | "start" => Ok(DesiredState::Starting),
      "stopping" | "stop" => Ok(DesiredState::Stopping),
      "updating" | "update" => Ok(DesiredState::Updating),
      "running" => Ok(DesiredState::Running),
      "stopped" => Ok(DesiredState::Stopped),
      "firenow" | "fire" => Ok(DesiredState::FireNow),
      _ => Err(ParseValueError::new("desired state", s)),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobLevel {
  /// The single self-healing job that drives reconciliation.
  System,
  Normal,
}

impl JobLevel {
  pub fn as_str(&self) -> &'static str {
    match self {
      JobLevel::System => "System",
      JobLevel::Normal => "Normal",
    }
  }
}

impl FromStr for JobLevel {
  type Err = ParseValueError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "System" => Ok(JobLevel::System),
      "Normal" => Ok(JobLevel::Normal),
      _ => Err(ParseValueError::new("job level", s)),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FireState {
  Success,
  Error,
}

impl FireState {
  pub fn as_str(&self) -> &'static str {
    match self {
      FireState::Success => "Success",
      FireState::Error => "Error",
    }
  }
}

impl FromStr for FireState {
  type Err = ParseValueError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "Success" => Ok(FireState::Success),
      "Error" => Ok(FireState::Error),
      _ => Err(ParseValueError::new("fire state", s)),
    }
  }
}

// --- Persisted Records ---

/// One schedulable unit as stored in the job table.
///
/// `assembly_name` and `class_name` together locate the handler in the
/// [`HandlerRegistry`](crate::loader::HandlerRegistry). `job_args` is passed to
/// the handler untouched through its [`JobContext`](context::JobContext).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
  pub id: JobId,
  pub name: String,
  pub description: String,
  pub assembly_name: String,
  pub class_name: String,
  pub cron_expression: String,
  pub cron_description: String,
  pub job_args: String,
  pub level: JobLevel,
  pub state: DesiredState,
  pub disabled: bool,
  pub create_name: String,
  pub create_time: DateTime<Local>,
  pub update_time: Option<DateTime<Local>>,
}

impl JobDefinition {
  /// Creates a normal-level job in the `Starting` state. The id is assigned by
  /// the store on insert.
  pub fn new(name: &str, assembly_name: &str, class_name: &str, cron_expression: &str) -> Self {
    Self {
      id: 0,
      name: name.to_string(),
      description: String::new(),
      assembly_name: assembly_name.to_string(),
      class_name: class_name.to_string(),
      cron_expression: cron_expression.to_string(),
      cron_description: String::new(),
      job_args: String::new(),
      level: JobLevel::Normal,
      state: DesiredState::Starting,
      disabled: false,
      create_name: String::new(),
      create_time: Local::now(),
      update_time: None,
    }
  }

  pub fn with_description(mut self, description: &str) -> Self {
    self.description = description.to_string();
    self
  }

  pub fn with_args(mut self, job_args: &str) -> Self {
    self.job_args = job_args.to_string();
    self
  }

  pub fn with_state(mut self, state: DesiredState) -> Self {
    self.state = state;
    self
  }

  pub fn with_creator(mut self, create_name: &str) -> Self {
    self.create_name = create_name.to_string();
    self
  }

  pub fn disabled(mut self, disabled: bool) -> Self {
    self.disabled = disabled;
    self
  }

  pub fn key(&self) -> JobKey {
    JobKey::of(self.id)
  }

  pub fn trigger_key(&self) -> TriggerKey {
    TriggerKey::of(self.id)
  }

  pub fn is_system(&self) -> bool {
    self.level == JobLevel::System
  }
}

/// Append-only execution and audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLogEntity {
  /// Store-assigned; `None` until inserted.
  pub id: Option<i64>,
  pub job_id: JobId,
  pub fire_time: DateTime<Local>,
  /// Milliseconds.
  pub fire_duration: u64,
  pub fire_state: FireState,
  pub content: String,
  pub create_time: DateTime<Local>,
}

impl JobLogEntity {
  /// A failure recorded by the reconciler (no execution took place).
  pub fn error(job_id: JobId, content: impl Into<String>) -> Self {
    let now = Local::now();
    Self {
      id: None,
      job_id,
      fire_time: now,
      fire_duration: 0,
      fire_state: FireState::Error,
      content: content.into(),
      create_time: now,
    }
  }

  /// The outcome of one handler execution.
  pub fn fire(
    job_id: JobId,
    fire_time: DateTime<Local>,
    duration: StdDuration,
    fire_state: FireState,
    content: impl Into<String>,
  ) -> Self {
    Self {
      id: None,
      job_id,
      fire_time,
      fire_duration: duration.as_millis().try_into().unwrap_or(u64::MAX),
      fire_state,
      content: content.into(),
      create_time: Local::now(),
    }
  }
}
