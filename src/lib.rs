//! jobkeeper: keeps a persisted table of cron jobs and a live scheduler in step.
//!
//! Job definitions live in a [`JobStore`]. Each carries a desired state
//! (`Starting`, `Stopping`, `Updating`, `FireNow`, settling to `Running` or
//! `Stopped`). A [`Reconciler`] compares every definition with the registry of
//! a [`SchedulerEngine`], applies the register/unregister/trigger operations
//! needed to close the gap and writes the outcome back, logging failures as
//! `Error` rows in the job log.
//!
//! The reconciler is itself driven by a job: the *system job*, created on the
//! first pass and fired every 15 seconds. A recovery sweep at minutes 0 and 30
//! re-registers jobs still marked `Running` that the engine lost, and
//! [`Reconciler::on_shutdown`] resets `Running` rows to `Starting` on a clean
//! stop.
//!
//! # Features
//!
//! - [`CronEngine`]: an in-process Tokio scheduler with a coordinator task, a
//!   worker pool, manual triggers, fire reporting and metrics.
//! - [`HandlerRegistry`]: maps a job's `(assembly_name, class_name)` to a
//!   compiled-in handler.
//! - [`MemoryStore`] and, with the `sqlite` feature, [`SqliteStore`].
//! - [`JobHost`]: builds everything from a [`HostConfig`] and exposes
//!   `on_start`/`on_stop`.
//! - Handlers read their arguments through the task-local [`JobContext`].
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use jobkeeper::{job_handler, HandlerRegistry, HostConfig, JobDefinition, JobHost, JobStore, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let handlers = Arc::new(HandlerRegistry::new());
//!     handlers.register("reports", "Reports.Daily", job_handler!(|ctx| {
//!         let args = ctx.map(|c| c.parameters().to_string()).unwrap_or_default();
//!         tracing::info!(%args, "Building the daily report.");
//!         true
//!     }));
//!
//!     let store = Arc::new(MemoryStore::new());
//!     store.insert_job(&JobDefinition::new("Daily report", "reports", "Reports.Daily", "0 0 6 * * *"))?;
//!
//!     let host = JobHost::builder()
//!         .config(HostConfig::default())
//!         .store(store)
//!         .handlers(handlers)
//!         .build()?;
//!     host.on_start().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     host.on_stop().await?;
//!     Ok(())
//! }
//! ```

pub mod builtin;
pub mod clock;
mod command;
pub mod config;
mod coordinator;
pub mod cron_expr;
pub mod engine;
pub mod error;
pub mod host;
pub mod job;
pub mod loader;
mod macros;
pub mod metrics;
pub mod reconciler;
pub mod scheduler;
pub mod store;
mod worker;

// --- Public Re-exports ---

pub use clock::{Clock, SystemClock};
pub use command::ShutdownMode;
pub use config::HostConfig;
pub use cron_expr::{CronExpr, TriggerZone};
pub use engine::{
  CronTrigger, FireListener, FireOutcome, FireRecord, JobDataMap, Registration,
  RegistrationSummary, SchedulerEngine,
};
pub use error::{
  BuildError, ConfigError, CronError, EngineError, HostError, ReconcileError,
  RegistrationFailure, ShutdownError, StoreError,
};
pub use host::{HostBuilder, JobHost};
pub use job::context::{try_get_current_job_context, JobContext};
pub use job::{
  BoxedExecFn, DesiredState, FireId, FireState, JobDefinition, JobId, JobKey, JobLevel,
  JobLogEntity, TriggerKey,
};
pub use loader::HandlerRegistry;
pub use metrics::{EngineMetrics, EngineMetricsSnapshot};
pub use reconciler::{PassReport, Reconciler, SweepReport};
pub use scheduler::{CronEngine, EngineBuilder};
#[cfg(feature = "sqlite")]
pub use store::SqliteStore;
pub use store::{JobStore, MemoryStore, StoreFireLog};
