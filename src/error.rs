use crate::job::{JobId, JobKey, TriggerKey};

use thiserror::Error;

/// Errors that can occur while building the engine or the host.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
  #[error("Maximum worker count (`max_workers`) must be specified and greater than zero")]
  MissingOrZeroMaxWorkers,
  #[error("System job cron expression is invalid: {0}")]
  InvalidSystemCron(CronError),
}

/// A cron expression the parser rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("`{expression}`: {reason}")]
pub struct CronError {
  pub expression: String,
  pub reason: String,
}

/// A persisted enum column holding a value this crate does not know.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind} value '{value}'")]
pub struct ParseValueError {
  pub kind: &'static str,
  pub value: String,
}

impl ParseValueError {
  pub(crate) fn new(kind: &'static str, value: &str) -> Self {
    Self {
      kind,
      value: value.to_string(),
    }
  }
}

// --- Engine Errors ---

/// Errors returned by [`SchedulerEngine`](crate::engine::SchedulerEngine) calls.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
  #[error("Scheduler command channel is closed (likely shut down or panicked).")]
  SchedulerShutdown,
  #[error("Scheduler did not respond to the request (coordinator task may have stopped).")]
  ResponseFailed,
  #[error("Job {0} is already registered.")]
  AlreadyRegistered(JobKey),
  #[error("Job {0} is not registered.")]
  NotRegistered(JobKey),
  #[error("Trigger {0} has no upcoming fire time.")]
  NoUpcomingFire(TriggerKey),
}

impl EngineError {
  /// The engine is gone or not answering, as opposed to rejecting a request.
  pub fn is_unavailable(&self) -> bool {
    matches!(self, Self::SchedulerShutdown | Self::ResponseFailed)
  }
}

// --- Shutdown Errors ---

/// Errors related to the engine shutdown process (`shutdown_graceful`, `shutdown_force`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
  #[error("Failed to send shutdown signal (scheduler already shut down or watch channel error).")]
  SignalFailed,
  #[error("Timed out waiting for scheduler tasks (Coordinator, Workers) to complete shutdown.")]
  Timeout,
  #[error("A worker or coordinator task panicked during the shutdown process.")]
  TaskPanic,
}

// --- Store Errors ---

#[derive(Error, Debug)]
pub enum StoreError {
  #[cfg(feature = "sqlite")]
  #[error("SQLite error: {0}")]
  Sqlite(#[from] rusqlite::Error),
  #[error("Job {0} not found.")]
  JobNotFound(JobId),
  #[error("Corrupt row: {0}")]
  Corrupt(#[from] ParseValueError),
  #[error("Job store unavailable: {0}")]
  Unavailable(String),
}

// --- Reconciliation Errors ---

/// Why a job could not be attached to the engine. Each variant ends up as an
/// `Error` row in the job log and leaves the job `Stopped`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationFailure {
  #[error("invalid cron expression {0}")]
  InvalidCron(CronError),
  #[error("handler `{class_name}` is not registered in `{assembly_name}`, check that the job library is deployed")]
  HandlerNotFound {
    assembly_name: String,
    class_name: String,
  },
  #[error("scheduler rejected the registration: {0}")]
  Engine(EngineError),
}

/// Errors that abort a reconciliation pass (or a single job's transition, for
/// `Engine`).
#[derive(Error, Debug)]
pub enum ReconcileError {
  #[error("Job store failure: {0}")]
  Store(#[from] StoreError),
  #[error("Scheduler engine failure: {0}")]
  Engine(#[from] EngineError),
}

// --- Host & Config Errors ---

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("TOML parse error: {0}")]
  Toml(#[from] toml::de::Error),
}

#[derive(Error, Debug)]
pub enum HostError {
  #[error(transparent)]
  Build(#[from] BuildError),
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error(transparent)]
  Store(#[from] StoreError),
  #[error(transparent)]
  Reconcile(#[from] ReconcileError),
  #[error(transparent)]
  Shutdown(#[from] ShutdownError),
}
