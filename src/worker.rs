use crate::command::{Dispatch, ShutdownMode};
use crate::engine::{FireListener, FireOutcome, FireRecord};
use crate::job::context::{JobContext, CURRENT_JOB_CONTEXT};
use crate::job::WorkerId;
use crate::metrics::EngineMetrics;

use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

/// A worker task that executes fired handlers.
///
/// Workers wait for dispatches from the Coordinator on a shared channel, run the
/// handler inside a task-local [`JobContext`], catch panics and report a
/// [`FireRecord`] to the optional listener.
pub(crate) struct Worker {
  id: WorkerId,
  metrics: EngineMetrics,
  shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
  dispatch_rx: async_channel::Receiver<Dispatch>,
  listener: Option<Arc<dyn FireListener>>,
}

impl Worker {
  pub fn new(
    id: WorkerId,
    metrics: EngineMetrics,
    shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
    dispatch_rx: async_channel::Receiver<Dispatch>,
    listener: Option<Arc<dyn FireListener>>,
  ) -> Self {
    Self {
      id,
      metrics,
      shutdown_rx,
      dispatch_rx,
      listener,
    }
  }

  /// Runs until shutdown is signalled or the dispatch channel closes. A
  /// handler already executing is always awaited before the loop exits.
  pub async fn run(&mut self) {
    debug!(worker_id = self.id, "Worker started. Waiting for fires...");

    loop {
      if self.is_shutting_down() {
        break;
      }

      tokio::select! {
          biased;

          Ok(()) = self.shutdown_rx.changed() => {
              if self.is_shutting_down() {
                  debug!(worker_id = self.id, "Worker received shutdown signal.");
                  break;
              }
          }

          result = self.dispatch_rx.recv() => {
              match result {
                  Ok(dispatch) => self.execute(dispatch).await,
                  Err(_) => {
                      debug!(worker_id = self.id, "Dispatch channel closed. Worker exiting.");
                      break;
                  }
              }
          }
      }
    }

    debug!(worker_id = self.id, "Worker task shutting down.");
  }

  fn is_shutting_down(&self) -> bool {
    self.shutdown_rx.borrow().is_some()
  }

  async fn execute(&self, dispatch: Dispatch) {
    let span = tracing::info_span!(
        "job_fire",
        worker_id = self.id,
        job_key = %dispatch.key,
        fire_id = %dispatch.fire_id,
        job_name = dispatch.data.job_name().unwrap_or_default(),
        manual = dispatch.manual
    );
    self.execute_and_report(dispatch).instrument(span).await;
  }

  async fn execute_and_report(&self, dispatch: Dispatch) {
    let active = self
      .metrics
      .workers_active_current
      .fetch_add(1, AtomicOrdering::Relaxed)
      + 1;
    debug!(active, "Starting handler execution.");

    let started_at = Utc::now();
    let start = Instant::now();
    let context = JobContext {
      job_key: dispatch.key.clone(),
      fire_id: dispatch.fire_id,
      scheduled_time: dispatch.scheduled_time,
      manual: dispatch.manual,
      data: dispatch.data.clone(),
    };

    let future = (dispatch.handler)();
    let mut task = tokio::spawn(CURRENT_JOB_CONTEXT.scope(context, future));
    let mut shutdown_rx = self.shutdown_rx.clone();

    let joined = tokio::select! {
        joined = &mut task => joined,
        _ = force_requested(&mut shutdown_rx) => {
            warn!("Forced shutdown: aborting handler.");
            task.abort();
            task.await
        }
    };

    let outcome = match joined {
      Ok(true) => FireOutcome::Success,
      Ok(false) => FireOutcome::Failed,
      Err(join_error) if join_error.is_panic() => {
        error!("Handler panicked.");
        FireOutcome::Panicked
      }
      Err(_) => {
        warn!("Handler task was cancelled during execution.");
        FireOutcome::Failed
      }
    };
    let duration = start.elapsed();

    self.metrics.fire_duration.record(duration);
    let counter = match outcome {
      FireOutcome::Success => &self.metrics.fires_succeeded,
      FireOutcome::Failed => &self.metrics.fires_failed,
      FireOutcome::Panicked => &self.metrics.fires_panicked,
    };
    counter.fetch_add(1, AtomicOrdering::Relaxed);
    info!(
      duration_ms = duration.as_millis(),
      outcome = ?outcome,
      "Finished handler execution."
    );

    if let Some(listener) = &self.listener {
      let record = FireRecord {
        key: dispatch.key,
        fire_id: dispatch.fire_id,
        job_name: dispatch.data.job_name().unwrap_or_default().to_string(),
        scheduled_time: dispatch.scheduled_time,
        started_at,
        duration,
        outcome,
        manual: dispatch.manual,
      };
      listener.on_fire_complete(&record);
    }

    self
      .metrics
      .workers_active_current
      .fetch_sub(1, AtomicOrdering::Relaxed);
  }
}

/// Resolves once a forced shutdown has been requested. Pends forever if the
/// engine handle is gone without asking for one.
async fn force_requested(shutdown_rx: &mut watch::Receiver<Option<ShutdownMode>>) {
  loop {
    if *shutdown_rx.borrow() == Some(ShutdownMode::Force) {
      return;
    }
    if shutdown_rx.changed().await.is_err() {
      std::future::pending::<()>().await;
    }
  }
}
