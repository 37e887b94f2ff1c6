//! Process lifecycle: wires store, engine, handler registry and reconciler
//! together and exposes the start/stop hooks.

use std::sync::Arc;

use tracing::{error, info};

use crate::builtin::register_builtins;
use crate::clock::{Clock, SystemClock};
use crate::config::HostConfig;
use crate::cron_expr::CronExpr;
use crate::error::{BuildError, HostError};
use crate::loader::HandlerRegistry;
use crate::reconciler::{PassReport, Reconciler};
use crate::scheduler::CronEngine;
use crate::store::{JobStore, StoreFireLog};

/// Builder for a [`JobHost`].
///
/// Without an explicit store the host opens the SQLite database named in the
/// configuration (or an in-memory store when built without `sqlite`).
#[derive(Default)]
pub struct HostBuilder {
  config: HostConfig,
  store: Option<Arc<dyn JobStore>>,
  handlers: Option<Arc<HandlerRegistry>>,
  clock: Option<Arc<dyn Clock>>,
}

impl HostBuilder {
  pub fn config(mut self, config: HostConfig) -> Self {
    self.config = config;
    self
  }

  pub fn store(mut self, store: Arc<dyn JobStore>) -> Self {
    self.store = Some(store);
    self
  }

  /// Registry holding the application's handlers. Built-ins are added to it
  /// on start.
  pub fn handlers(mut self, handlers: Arc<HandlerRegistry>) -> Self {
    self.handlers = Some(handlers);
    self
  }

  pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = Some(clock);
    self
  }

  /// Opens the store and starts the engine.
  ///
  /// # Panics
  ///
  /// Panics if called outside a Tokio runtime.
  pub fn build(self) -> Result<JobHost, HostError> {
    let config = self.config;
    CronExpr::parse(&config.system_cron).map_err(BuildError::InvalidSystemCron)?;

    let store = match self.store {
      Some(store) => store,
      None => default_store(&config)?,
    };
    let handlers = self.handlers.unwrap_or_default();
    let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

    let engine = Arc::new(
      CronEngine::builder()
        .max_workers(config.max_workers)
        .fire_listener(Arc::new(StoreFireLog::new(store.clone())))
        .build()?,
    );

    let reconciler = Reconciler::new(store.clone(), engine.clone(), handlers)
      .with_clock(clock)
      .with_sweep_minutes(config.sweep_minutes.iter().copied())
      .with_system_cron(&config.system_cron);

    Ok(JobHost {
      config,
      store,
      engine,
      reconciler: Arc::new(reconciler),
    })
  }
}

impl std::fmt::Debug for HostBuilder {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("HostBuilder")
      .field("config", &self.config)
      .field("store", &self.store.as_ref().map(|_| "<JobStore>"))
      .field("handlers", &self.handlers)
      .finish_non_exhaustive()
  }
}

#[cfg(feature = "sqlite")]
fn default_store(config: &HostConfig) -> Result<Arc<dyn JobStore>, HostError> {
  Ok(Arc::new(crate::store::SqliteStore::open(&config.database)?))
}

#[cfg(not(feature = "sqlite"))]
fn default_store(_config: &HostConfig) -> Result<Arc<dyn JobStore>, HostError> {
  Ok(Arc::new(crate::store::MemoryStore::new()))
}

/// A running job host.
pub struct JobHost {
  config: HostConfig,
  store: Arc<dyn JobStore>,
  engine: Arc<CronEngine>,
  reconciler: Arc<Reconciler>,
}

impl std::fmt::Debug for JobHost {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("JobHost")
      .field("config", &self.config)
      .field("engine", &self.engine)
      .field("reconciler", &self.reconciler)
      .finish_non_exhaustive()
  }
}

impl JobHost {
  pub fn builder() -> HostBuilder {
    HostBuilder::default()
  }

  /// Registers the built-in handlers and runs the first pass, which creates
  /// and registers the system job. From then on the system job drives a pass
  /// on every fire.
  pub async fn on_start(&self) -> Result<PassReport, HostError> {
    register_builtins(&self.reconciler, self.config.log_retention_days);
    let report = self.reconciler.run_pass().await?;
    info!(?report, "Job host started.");
    Ok(report)
  }

  /// Stops the engine gracefully, then resets `Running` jobs to `Starting`.
  ///
  /// The engine is stopped first so no pass can write `Running` again after
  /// the reset. Both steps are attempted; the first error is returned.
  pub async fn on_stop(&self) -> Result<(), HostError> {
    let shutdown = self
      .engine
      .shutdown_graceful(Some(self.config.shutdown_timeout()))
      .await;
    if let Err(e) = &shutdown {
      error!(error = %e, "Engine did not shut down cleanly.");
    }
    let reset = self.reconciler.on_shutdown();
    if let Err(e) = &reset {
      error!(error = %e, "Failed to reset running jobs.");
    }
    shutdown?;
    reset?;
    info!("Job host stopped.");
    Ok(())
  }

  pub fn config(&self) -> &HostConfig {
    &self.config
  }

  pub fn store(&self) -> &Arc<dyn JobStore> {
    &self.store
  }

  pub fn engine(&self) -> &Arc<CronEngine> {
    &self.engine
  }

  pub fn reconciler(&self) -> &Arc<Reconciler> {
    &self.reconciler
  }

  pub fn handlers(&self) -> &Arc<HandlerRegistry> {
    self.reconciler.handlers()
  }
}
