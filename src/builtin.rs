//! Handlers shipped with the crate, registered under the `jobkeeper` assembly.

use std::sync::{Arc, Weak};

use chrono::Duration as ChronoDuration;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::job_handler;
use crate::loader::HandlerRegistry;
use crate::reconciler::Reconciler;
use crate::store::JobStore;

pub const BUILTIN_ASSEMBLY: &str = "jobkeeper";
/// Runs one reconciliation pass per fire.
pub const SYSTEM_JOB_CLASS: &str = "jobkeeper::SystemJob";
/// Deletes old job log rows. `job_args` may hold the retention in days.
pub const PURGE_JOB_LOGS_CLASS: &str = "jobkeeper::PurgeJobLogs";

/// Registers the built-in handlers in the reconciler's registry.
///
/// The system job handler holds only a weak reference, so the registry (owned
/// by the reconciler) does not keep the reconciler alive.
pub fn register_builtins(reconciler: &Arc<Reconciler>, default_retention_days: u32) {
  let handlers: &HandlerRegistry = reconciler.handlers();
  handlers.register(
    BUILTIN_ASSEMBLY,
    SYSTEM_JOB_CLASS,
    system_job(Arc::downgrade(reconciler)),
  );
  handlers.register(
    BUILTIN_ASSEMBLY,
    PURGE_JOB_LOGS_CLASS,
    purge_job_logs(
      reconciler.store().clone(),
      reconciler.clock().clone(),
      default_retention_days,
    ),
  );
}

type HandlerFuture = std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send + 'static>>;

fn system_job(reconciler: Weak<Reconciler>) -> impl Fn() -> HandlerFuture + Send + Sync + 'static {
  job_handler!({ let reconciler = reconciler.clone(); } |_ctx| {
    let Some(reconciler) = reconciler.upgrade() else {
      warn!("Reconciler is gone; system job has nothing to drive.");
      return false;
    };
    match reconciler.try_run_pass().await {
      Some(Ok(_)) => true,
      Some(Err(e)) => {
        error!(error = %e, "Reconciliation pass aborted.");
        false
      }
      None => true,
    }
  })
}

fn purge_job_logs(
  store: Arc<dyn JobStore>,
  clock: Arc<dyn Clock>,
  default_retention_days: u32,
) -> impl Fn() -> HandlerFuture + Send + Sync + 'static {
  job_handler!({ let store = store.clone(); let clock = clock.clone(); } |ctx| {
    let days = retention_days(ctx.as_ref().map(|c| c.parameters()), default_retention_days);
    let cutoff = clock.now() - ChronoDuration::days(i64::from(days));
    debug!(days, %cutoff, "Purging job logs.");

    match tokio::task::spawn_blocking(move || store.delete_logs_before(cutoff)).await {
      Ok(Ok(deleted)) => {
        info!(deleted, days, "Purged old job logs.");
        true
      }
      Ok(Err(e)) => {
        error!(error = %e, "Failed to purge job logs.");
        false
      }
      Err(e) => {
        error!(error = %e, "Log purge task failed.");
        false
      }
    }
  })
}

/// Retention in days from the job's arguments, falling back to the default
/// when they are empty or not a whole number.
fn retention_days(parameters: Option<&str>, default_days: u32) -> u32 {
  match parameters.map(str::trim).filter(|p| !p.is_empty()) {
    None => default_days,
    Some(text) => text.parse().unwrap_or_else(|_| {
      warn!(parameters = text, default_days, "Unreadable retention; using the default.");
      default_days
    }),
  }
}

#[cfg(test)]
mod tests {
  use super::retention_days;

  #[test]
  fn retention_from_parameters() {
    assert_eq!(retention_days(Some(" 7 "), 30), 7);
    assert_eq!(retention_days(Some(""), 30), 30);
    assert_eq!(retention_days(None, 30), 30);
    assert_eq!(retention_days(Some("a week"), 30), 30);
  }
}
