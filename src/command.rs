use crate::engine::{JobDataMap, Registration, RegistrationSummary};
use crate::error::EngineError;
use crate::job::{BoxedExecFn, FireId, JobKey};

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

/// Commands sent from the `CronEngine` handle to the central Coordinator task.
///
/// Each command carries a `oneshot::Sender` for the Coordinator to send the
/// response back to the requesting task.
#[derive(Debug)]
pub(crate) enum EngineCommand {
  Exists {
    key: JobKey,
    responder: oneshot::Sender<bool>,
  },
  Register {
    registration: Registration,
    /// `Err(AlreadyRegistered)` if the key is taken, `Err(NoUpcomingFire)` if
    /// the trigger would never fire.
    responder: oneshot::Sender<Result<(), EngineError>>,
  },
  Unregister {
    key: JobKey,
    /// `true` if a registration was removed.
    responder: oneshot::Sender<bool>,
  },
  TriggerNow {
    key: JobKey,
    responder: oneshot::Sender<Result<(), EngineError>>,
  },
  ListRegistrations {
    responder: oneshot::Sender<Vec<RegistrationSummary>>,
  },
}

/// Represents the requested shutdown mode. Sent via a `watch` channel.
/// `None` indicates the engine is running normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
  /// Stop firing and let workers finish the handler they are executing.
  Graceful,
  /// Stop as soon as possible; executing handlers are abandoned.
  Force,
}

/// One due fire, sent from the Coordinator to an idle worker.
pub(crate) struct Dispatch {
  pub fire_id: FireId,
  pub key: JobKey,
  pub handler: Arc<BoxedExecFn>,
  pub data: JobDataMap,
  pub scheduled_time: DateTime<Utc>,
  pub manual: bool,
}

impl fmt::Debug for Dispatch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Dispatch")
      .field("fire_id", &self.fire_id)
      .field("key", &self.key)
      .field("handler", &format_args!("<Fn>"))
      .field("data", &self.data)
      .field("scheduled_time", &self.scheduled_time)
      .field("manual", &self.manual)
      .finish()
  }
}
