use crate::command::{Dispatch, EngineCommand, ShutdownMode};
use crate::coordinator::{Coordinator, CoordinatorState};
use crate::engine::{FireListener, Registration, RegistrationSummary, SchedulerEngine};
use crate::error::{BuildError, EngineError, ShutdownError};
use crate::job::JobKey;
use crate::metrics::{EngineMetrics, EngineMetricsSnapshot};
use crate::worker::Worker;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const DEFAULT_COMMAND_BOUND: usize = 128;
const DEFAULT_DISPATCH_BOUND: usize = 1;

/// Builder for configuring and starting a [`CronEngine`].
///
/// # Example
///
/// ```no_run
/// use jobkeeper::CronEngine;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = CronEngine::builder()
///     .max_workers(4)
///     .command_buffer_size(256)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct EngineBuilder {
  max_workers: Option<usize>,
  command_buffer_size: usize,
  dispatch_buffer_size: usize,
  listener: Option<Arc<dyn FireListener>>,
}

impl Default for EngineBuilder {
  fn default() -> Self {
    Self {
      max_workers: None,
      command_buffer_size: DEFAULT_COMMAND_BOUND,
      dispatch_buffer_size: DEFAULT_DISPATCH_BOUND,
      listener: None,
    }
  }
}

impl fmt::Debug for EngineBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EngineBuilder")
      .field("max_workers", &self.max_workers)
      .field("command_buffer_size", &self.command_buffer_size)
      .field("dispatch_buffer_size", &self.dispatch_buffer_size)
      .field("listener", &self.listener.as_ref().map(|_| "<FireListener>"))
      .finish()
  }
}

impl EngineBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the maximum number of handlers that can run concurrently (required).
  pub fn max_workers(mut self, count: usize) -> Self {
    self.max_workers = Some(count);
    self
  }

  /// Sets the size of the buffer for register/unregister/trigger requests.
  pub fn command_buffer_size(mut self, size: usize) -> Self {
    self.command_buffer_size = size.max(1);
    self
  }

  /// Sets the size of the channel used to hand due fires to idle workers.
  /// The default of 1 keeps due fires in the queue until a worker is free.
  pub fn dispatch_buffer_size(mut self, size: usize) -> Self {
    self.dispatch_buffer_size = size.max(1);
    self
  }

  /// Receives a [`FireRecord`](crate::engine::FireRecord) after every execution.
  pub fn fire_listener(mut self, listener: Arc<dyn FireListener>) -> Self {
    self.listener = Some(listener);
    self
  }

  /// Builds and starts the engine, spawning the Coordinator and the worker pool
  /// on the current Tokio runtime.
  ///
  /// # Panics
  ///
  /// Panics if called outside a Tokio runtime.
  ///
  /// # Errors
  ///
  /// Returns `Err(BuildError::MissingOrZeroMaxWorkers)` if `max_workers` was
  /// not set or is zero.
  pub fn build(self) -> Result<CronEngine, BuildError> {
    let max_workers = self
      .max_workers
      .filter(|count| *count > 0)
      .ok_or(BuildError::MissingOrZeroMaxWorkers)?;

    let metrics = EngineMetrics::new();
    let (cmd_tx, cmd_rx) = mpsc::channel::<EngineCommand>(self.command_buffer_size);
    let (shutdown_tx, shutdown_rx) = watch::channel::<Option<ShutdownMode>>(None);
    let (dispatch_tx, dispatch_rx) = async_channel::bounded::<Dispatch>(self.dispatch_buffer_size);

    let coordinator_state =
      CoordinatorState::new(cmd_rx, shutdown_rx.clone(), dispatch_tx, metrics.clone());
    let coordinator_handle = Handle::current().spawn(async move {
      let mut coordinator = Coordinator::new(coordinator_state);
      coordinator.run().await;
    });

    let mut worker_handles = Vec::with_capacity(max_workers);
    for worker_id in 0..max_workers {
      let mut worker = Worker::new(
        worker_id,
        metrics.clone(),
        shutdown_rx.clone(),
        dispatch_rx.clone(),
        self.listener.clone(),
      );
      worker_handles.push(Handle::current().spawn(async move {
        worker.run().await;
      }));
    }
    info!(max_workers, "Cron engine started.");

    Ok(CronEngine {
      metrics,
      cmd_tx,
      shutdown_tx,
      coordinator_handle: Arc::new(Mutex::new(Some(coordinator_handle))),
      worker_handles: Arc::new(Mutex::new(worker_handles)),
    })
  }
}

/// In-process cron scheduler.
///
/// A Coordinator task owns the registry of job-key → (handler, cron trigger) and
/// a priority queue of upcoming fires; a fixed pool of workers executes them.
/// All calls are request/response over channels, so a returned `Ok` means the
/// Coordinator has applied the change.
///
/// Use [`CronEngine::builder()`] to create an instance.
#[derive(Debug)]
pub struct CronEngine {
  metrics: EngineMetrics,
  cmd_tx: mpsc::Sender<EngineCommand>,
  shutdown_tx: watch::Sender<Option<ShutdownMode>>,
  coordinator_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
  worker_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl CronEngine {
  pub fn builder() -> EngineBuilder {
    EngineBuilder::new()
  }

  async fn request<T>(
    &self,
    command: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
  ) -> Result<T, EngineError> {
    let (responder, response_rx) = oneshot::channel();
    self
      .cmd_tx
      .send(command(responder))
      .await
      .map_err(|_| EngineError::SchedulerShutdown)?;
    response_rx.await.map_err(|_| EngineError::ResponseFailed)
  }

  /// Lists every current registration with its next fire time.
  pub async fn list_registrations(&self) -> Result<Vec<RegistrationSummary>, EngineError> {
    self
      .request(|responder| EngineCommand::ListRegistrations { responder })
      .await
  }

  pub fn metrics_snapshot(&self) -> EngineMetricsSnapshot {
    self.metrics.snapshot()
  }

  /// Stops firing, lets executing handlers finish, then waits for every task
  /// (up to `timeout`, if given).
  pub async fn shutdown_graceful(&self, timeout: Option<Duration>) -> Result<(), ShutdownError> {
    info!("Initiating graceful engine shutdown...");
    self
      .shutdown_tx
      .send(Some(ShutdownMode::Graceful))
      .map_err(|_| ShutdownError::SignalFailed)?;
    self.await_shutdown(timeout).await
  }

  /// Stops firing and abandons executing handlers.
  pub async fn shutdown_force(&self, timeout: Option<Duration>) -> Result<(), ShutdownError> {
    info!("Initiating forced engine shutdown...");
    self
      .shutdown_tx
      .send(Some(ShutdownMode::Force))
      .map_err(|_| ShutdownError::SignalFailed)?;
    self.await_shutdown(timeout).await
  }

  async fn await_shutdown(&self, timeout: Option<Duration>) -> Result<(), ShutdownError> {
    let coordinator_handle = self.coordinator_handle.lock().await.take();
    let worker_handles = std::mem::take(&mut *self.worker_handles.lock().await);

    let mut tasks = Vec::with_capacity(1 + worker_handles.len());
    match coordinator_handle {
      Some(handle) => tasks.push(handle),
      None => warn!("Coordinator handle missing during shutdown wait."),
    }
    tasks.extend(worker_handles);

    if tasks.is_empty() {
      warn!("No tasks found to await during shutdown.");
      return Ok(());
    }

    let join_all = try_join_all(tasks);
    let result = match timeout {
      Some(timeout) => match tokio::time::timeout(timeout, join_all).await {
        Ok(joined) => joined.map(|_| ()).map_err(|join_err| {
          error!("A task panicked during shutdown: {:?}", join_err);
          ShutdownError::TaskPanic
        }),
        Err(_) => {
          error!("Shutdown timed out after {:?}", timeout);
          Err(ShutdownError::Timeout)
        }
      },
      None => join_all.await.map(|_| ()).map_err(|join_err| {
        error!("A task panicked during shutdown: {:?}", join_err);
        ShutdownError::TaskPanic
      }),
    };

    if result.is_ok() {
      info!("All engine tasks joined.");
    }
    result
  }
}

#[async_trait]
impl SchedulerEngine for CronEngine {
  async fn exists(&self, key: &JobKey) -> Result<bool, EngineError> {
    self
      .request(|responder| EngineCommand::Exists {
        key: key.clone(),
        responder,
      })
      .await
  }

  async fn register(&self, registration: Registration) -> Result<(), EngineError> {
    self
      .request(|responder| EngineCommand::Register {
        registration,
        responder,
      })
      .await?
  }

  async fn unregister(&self, key: &JobKey) -> Result<bool, EngineError> {
    self
      .request(|responder| EngineCommand::Unregister {
        key: key.clone(),
        responder,
      })
      .await
  }

  async fn trigger_now(&self, key: &JobKey) -> Result<(), EngineError> {
    self
      .request(|responder| EngineCommand::TriggerNow {
        key: key.clone(),
        responder,
      })
      .await?
  }
}
