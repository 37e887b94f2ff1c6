use crate::command::{Dispatch, EngineCommand, ShutdownMode};
use crate::engine::{Registration, RegistrationSummary};
use crate::error::EngineError;
use crate::job::JobKey;
use crate::metrics::EngineMetrics;

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::time::Duration;

use async_channel::TrySendError;
use chrono::{DateTime, Utc};
use priority_queue::PriorityQueue;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// How long to sleep when nothing is queued. Commands wake the loop earlier.
const IDLE_SLEEP: Duration = Duration::from_secs(60);
/// Poll interval while a fire is due but every worker is busy.
const BUSY_RETRY: Duration = Duration::from_millis(25);

/// Channels and shared counters owned by the Coordinator task.
#[derive(Debug)]
pub(crate) struct CoordinatorState {
  cmd_rx: mpsc::Receiver<EngineCommand>,
  shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
  dispatch_tx: async_channel::Sender<Dispatch>,
  metrics: EngineMetrics,
}

impl CoordinatorState {
  pub fn new(
    cmd_rx: mpsc::Receiver<EngineCommand>,
    shutdown_rx: watch::Receiver<Option<ShutdownMode>>,
    dispatch_tx: async_channel::Sender<Dispatch>,
    metrics: EngineMetrics,
  ) -> Self {
    Self {
      cmd_rx,
      shutdown_rx,
      dispatch_tx,
      metrics,
    }
  }
}

/// An entry in the fire queue. Each registration owns at most one `Scheduled`
/// slot; manual triggers get their own slot so they never displace the cron fire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum FireSlot {
  Scheduled(JobKey),
  Manual(JobKey, u64),
}

#[derive(Debug)]
struct Entry {
  registration: Registration,
  next_fire: Option<DateTime<Utc>>,
}

/// The central Coordinator task: owns the registry and the fire queue.
pub(crate) struct Coordinator {
  state: CoordinatorState,
  registry: HashMap<JobKey, Entry>,
  pq: PriorityQueue<FireSlot, Reverse<DateTime<Utc>>>,
  manual_seq: u64,
}

impl Coordinator {
  pub fn new(state: CoordinatorState) -> Self {
    Self {
      state,
      registry: HashMap::new(),
      pq: PriorityQueue::new(),
      manual_seq: 0,
    }
  }

  /// Runs the main event loop until shutdown is signalled or every engine
  /// handle has been dropped.
  pub async fn run(&mut self) {
    info!("Coordinator started.");

    loop {
      self.update_gauge_metrics();
      let sleep_duration = self.calculate_sleep();

      tokio::select! {
          biased;

          Ok(()) = self.state.shutdown_rx.changed() => {
              let mode = *self.state.shutdown_rx.borrow();
              if let Some(mode) = mode {
                  info!(?mode, "Coordinator received shutdown signal.");
                  break;
              }
          },

          maybe_cmd = self.state.cmd_rx.recv() => {
              match maybe_cmd {
                  Some(cmd) => self.handle_command(cmd),
                  None => {
                      info!("Command channel closed (all engine handles dropped). Coordinator exiting.");
                      break;
                  }
              }
          },

          _ = sleep(sleep_duration) => {
              trace!("Timer fired.");
              self.dispatch_due();
          }
      }
    }

    // Workers drain nothing further and exit once the channel is closed.
    self.state.dispatch_tx.close();
    info!(registrations = self.registry.len(), "Coordinator task shutting down.");
  }

  fn update_gauge_metrics(&self) {
    let metrics = &self.state.metrics;
    metrics
      .registrations_current
      .store(self.registry.len(), AtomicOrdering::Relaxed);
    metrics
      .fire_queue_current
      .store(self.pq.len(), AtomicOrdering::Relaxed);
  }

  /// Time until the earliest queued fire. Zero if something is due and a worker
  /// can take it; a short poll if something is due but every worker is busy.
  fn calculate_sleep(&self) -> Duration {
    match self.pq.peek() {
      None => IDLE_SLEEP,
      Some((_, Reverse(next_fire))) => {
        let now = Utc::now();
        if *next_fire <= now {
          if self.state.dispatch_tx.is_full() {
            BUSY_RETRY
          } else {
            Duration::ZERO
          }
        } else {
          (*next_fire - now).to_std().unwrap_or(Duration::ZERO).min(IDLE_SLEEP)
        }
      }
    }
  }

  fn handle_command(&mut self, cmd: EngineCommand) {
    match cmd {
      EngineCommand::Exists { key, responder } => {
        let _ = responder.send(self.registry.contains_key(&key));
      }
      EngineCommand::Register {
        registration,
        responder,
      } => {
        let result = self.register(registration);
        let _ = responder.send(result);
      }
      EngineCommand::Unregister { key, responder } => {
        let removed = self.unregister(&key);
        let _ = responder.send(removed);
      }
      EngineCommand::TriggerNow { key, responder } => {
        let result = self.trigger_now(key);
        let _ = responder.send(result);
      }
      EngineCommand::ListRegistrations { responder } => {
        let summaries = self
          .registry
          .values()
          .map(|entry| RegistrationSummary {
            key: entry.registration.key.clone(),
            trigger: entry.registration.trigger.key.clone(),
            cron_expression: entry.registration.trigger.expression.to_string(),
            job_name: entry.registration.data.job_name().map(str::to_string),
            next_fire: entry.next_fire,
          })
          .collect();
        let _ = responder.send(summaries);
      }
    }
  }

  fn register(&mut self, registration: Registration) -> Result<(), EngineError> {
    let key = registration.key.clone();
    if self.registry.contains_key(&key) {
      debug!(job_key = %key, "Rejecting duplicate registration.");
      return Err(EngineError::AlreadyRegistered(key));
    }

    let next_fire = registration
      .trigger
      .next_fire_after(Utc::now())
      .ok_or_else(|| EngineError::NoUpcomingFire(registration.trigger.key.clone()))?;

    self.pq.push(FireSlot::Scheduled(key.clone()), Reverse(next_fire));
    info!(
        job_key = %key,
        cron = %registration.trigger.expression,
        next_fire = %next_fire,
        "Registered job."
    );
    self.registry.insert(
      key,
      Entry {
        registration,
        next_fire: Some(next_fire),
      },
    );
    self
      .state
      .metrics
      .registrations_total
      .fetch_add(1, AtomicOrdering::Relaxed);
    Ok(())
  }

  fn unregister(&mut self, key: &JobKey) -> bool {
    if self.registry.remove(key).is_none() {
      debug!(job_key = %key, "Unregister requested for unknown key.");
      return false;
    }
    self.pq.remove(&FireSlot::Scheduled(key.clone()));
    // Pending manual triggers belong to this registration, not a later one.
    let manual: Vec<FireSlot> = self
      .pq
      .iter()
      .map(|(slot, _)| slot)
      .filter(|slot| matches!(slot, FireSlot::Manual(manual_key, _) if manual_key == key))
      .cloned()
      .collect();
    for slot in manual {
      self.pq.remove(&slot);
    }
    self
      .state
      .metrics
      .unregistrations_total
      .fetch_add(1, AtomicOrdering::Relaxed);
    info!(job_key = %key, "Unregistered job.");
    true
  }

  fn trigger_now(&mut self, key: JobKey) -> Result<(), EngineError> {
    if !self.registry.contains_key(&key) {
      return Err(EngineError::NotRegistered(key));
    }
    self.manual_seq += 1;
    self
      .pq
      .push(FireSlot::Manual(key.clone(), self.manual_seq), Reverse(Utc::now()));
    self
      .state
      .metrics
      .manual_triggers
      .fetch_add(1, AtomicOrdering::Relaxed);
    info!(job_key = %key, "Manual trigger queued.");
    Ok(())
  }

  /// Hands every due fire to the worker pool while a worker slot is free.
  /// Never blocks: a full dispatch channel leaves the fire queued.
  fn dispatch_due(&mut self) {
    let now = Utc::now();

    loop {
      let due = matches!(self.pq.peek(), Some((_, Reverse(at))) if *at <= now);
      if !due {
        break;
      }
      if self.state.dispatch_tx.is_full() {
        trace!("Dispatch check: all workers busy.");
        break;
      }

      let Some((slot, Reverse(scheduled_time))) = self.pq.pop() else {
        break;
      };
      let (key, manual) = match slot {
        FireSlot::Scheduled(key) => (key, false),
        FireSlot::Manual(key, _) => (key, true),
      };

      let Some(entry) = self.registry.get_mut(&key) else {
        debug!(job_key = %key, "Discarding fire for unregistered job.");
        self
          .state
          .metrics
          .fires_discarded
          .fetch_add(1, AtomicOrdering::Relaxed);
        continue;
      };

      if !manual {
        // Next fire is computed from `now`, so a late fire is not replayed.
        entry.next_fire = entry.registration.trigger.next_fire_after(now);
        match entry.next_fire {
          Some(next_fire) => {
            self.pq.push(FireSlot::Scheduled(key.clone()), Reverse(next_fire));
          }
          None => info!(job_key = %key, "Trigger has no further fire times."),
        }
      }

      let dispatch = Dispatch {
        fire_id: Uuid::new_v4(),
        key: key.clone(),
        handler: entry.registration.handler.clone(),
        data: entry.registration.data.clone(),
        scheduled_time,
        manual,
      };

      match self.state.dispatch_tx.try_send(dispatch) {
        Ok(()) => {
          self
            .state
            .metrics
            .fires_dispatched
            .fetch_add(1, AtomicOrdering::Relaxed);
          trace!(job_key = %key, manual, %scheduled_time, "Dispatched fire.");
        }
        Err(TrySendError::Full(dispatch)) => {
          // Only this task sends, so `is_full` above makes this unlikely.
          warn!(job_key = %key, "Dispatch channel filled unexpectedly; requeueing fire.");
          let slot = if manual {
            self.manual_seq += 1;
            FireSlot::Manual(key, self.manual_seq)
          } else {
            FireSlot::Scheduled(key)
          };
          self.pq.push(slot, Reverse(dispatch.scheduled_time));
          break;
        }
        Err(TrySendError::Closed(_)) => {
          error!(job_key = %key, "Dispatch channel closed; no workers remain.");
          break;
        }
      }
    }
  }
}
