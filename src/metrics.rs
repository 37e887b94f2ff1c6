use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// --- Simple Histogram Implementation ---

/// A basic concurrent histogram storing count and sum.
///
/// Suitable for simple latency tracking without percentile information.
#[derive(Debug, Default)]
pub struct SimpleHistogram {
  count: AtomicUsize,
  sum_micros: AtomicUsize,
}

impl SimpleHistogram {
  /// Records a duration observation in the histogram.
  pub fn record(&self, duration: Duration) {
    self.count.fetch_add(1, Ordering::Relaxed);
    self.sum_micros.fetch_add(
      duration.as_micros().try_into().unwrap_or(usize::MAX),
      Ordering::Relaxed,
    );
  }

  pub fn get_count(&self) -> usize {
    self.count.load(Ordering::Relaxed)
  }

  pub fn get_sum_micros(&self) -> usize {
    self.sum_micros.load(Ordering::Relaxed)
  }
}

// --- Main Metrics Struct (Internal State) ---

/// Atomic counters shared between the engine handle, the Coordinator and the
/// Workers. Cloning only clones the `Arc`s.
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
  // --- Counters ---
  /// Registrations accepted.
  pub registrations_total: Arc<AtomicUsize>,
  /// Registrations removed via `unregister`.
  pub unregistrations_total: Arc<AtomicUsize>,
  /// Manual triggers accepted.
  pub manual_triggers: Arc<AtomicUsize>,
  /// Fires handed to a worker.
  pub fires_dispatched: Arc<AtomicUsize>,
  /// Queued fires dropped because their key was no longer registered.
  pub fires_discarded: Arc<AtomicUsize>,
  pub fires_succeeded: Arc<AtomicUsize>,
  pub fires_failed: Arc<AtomicUsize>,
  pub fires_panicked: Arc<AtomicUsize>,

  // --- Gauges ---
  pub registrations_current: Arc<AtomicUsize>,
  pub fire_queue_current: Arc<AtomicUsize>,
  pub workers_active_current: Arc<AtomicUsize>,

  // --- Histograms ---
  pub fire_duration: Arc<SimpleHistogram>,
}

impl EngineMetrics {
  pub fn new() -> Self {
    Self::default()
  }

  /// Point-in-time view of all counters (`Relaxed` loads).
  pub fn snapshot(&self) -> EngineMetricsSnapshot {
    let order = Ordering::Relaxed;

    EngineMetricsSnapshot {
      registrations_total: self.registrations_total.load(order),
      unregistrations_total: self.unregistrations_total.load(order),
      manual_triggers: self.manual_triggers.load(order),
      fires_dispatched: self.fires_dispatched.load(order),
      fires_discarded: self.fires_discarded.load(order),
      fires_succeeded: self.fires_succeeded.load(order),
      fires_failed: self.fires_failed.load(order),
      fires_panicked: self.fires_panicked.load(order),
      registrations_current: self.registrations_current.load(order),
      fire_queue_current: self.fire_queue_current.load(order),
      workers_active_current: self.workers_active_current.load(order),
      fire_duration_count: self.fire_duration.get_count(),
      fire_duration_sum_micros: self.fire_duration.get_sum_micros(),
    }
  }
}

// --- Metrics Snapshot Struct (Public Data) ---

#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct EngineMetricsSnapshot {
  // Counters
  pub registrations_total: usize,
  pub unregistrations_total: usize,
  pub manual_triggers: usize,
  pub fires_dispatched: usize,
  pub fires_discarded: usize,
  pub fires_succeeded: usize,
  pub fires_failed: usize,
  pub fires_panicked: usize,
  // Gauges
  pub registrations_current: usize,
  pub fire_queue_current: usize,
  pub workers_active_current: usize,
  // Histogram Data
  pub fire_duration_count: usize,
  pub fire_duration_sum_micros: usize,
}

impl EngineMetricsSnapshot {
  /// Mean handler execution time, `None` before the first completed fire.
  pub fn mean_fire_duration(&self) -> Option<Duration> {
    if self.fire_duration_count == 0 {
      None
    } else {
      let mean = self.fire_duration_sum_micros as f64 / self.fire_duration_count as f64;
      Some(Duration::from_micros(mean as u64))
    }
  }
}
