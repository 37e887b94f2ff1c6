use chrono::{DateTime, Local};

/// Source of the current local time for the recovery sweep and log purging.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Local>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Local> {
    Local::now()
  }
}
