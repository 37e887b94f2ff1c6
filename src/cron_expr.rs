//! Cron expressions as stored in the job table.
//!
//! The grammar is the `cron` crate's: six or seven whitespace separated fields,
//! seconds first, optional year last. Quartz-style `?` ("no specific value") is
//! accepted in any field and read as `*`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local, TimeZone, Utc};
use ::cron::Schedule as CronSchedule;

use crate::error::CronError;

/// A parsed, validated cron expression that remembers its original text.
#[derive(Clone)]
pub struct CronExpr {
  source: String,
  schedule: CronSchedule,
}

impl CronExpr {
  pub fn parse(expression: &str) -> Result<Self, CronError> {
    let normalized = normalize(expression);
    if normalized.is_empty() {
      return Err(CronError {
        expression: expression.to_string(),
        reason: "expression is empty".to_string(),
      });
    }
    CronSchedule::from_str(&normalized)
      .map(|schedule| Self {
        source: expression.trim().to_string(),
        schedule,
      })
      .map_err(|e| CronError {
        expression: expression.to_string(),
        reason: e.to_string(),
      })
  }

  pub fn is_valid(expression: &str) -> bool {
    Self::parse(expression).is_ok()
  }

  pub fn as_str(&self) -> &str {
    &self.source
  }

  /// The first fire time strictly after `after`, evaluated in `after`'s zone.
  pub fn next_after<Z: TimeZone>(&self, after: &DateTime<Z>) -> Option<DateTime<Utc>> {
    self
      .schedule
      .after(after)
      .next()
      .map(|next| next.with_timezone(&Utc))
  }
}

impl fmt::Debug for CronExpr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("CronExpr").field(&self.source).finish()
  }
}

impl fmt::Display for CronExpr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.source)
  }
}

impl PartialEq for CronExpr {
  fn eq(&self, other: &Self) -> bool {
    self.source == other.source
  }
}

/// Time zone a cron trigger is evaluated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerZone {
  #[default]
  Local,
  Utc,
}

impl TriggerZone {
  pub(crate) fn next_fire(&self, expression: &CronExpr, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match self {
      TriggerZone::Local => expression.next_after(&after.with_timezone(&Local)),
      TriggerZone::Utc => expression.next_after(&after),
    }
  }
}

fn normalize(expression: &str) -> String {
  expression
    .split_whitespace()
    .map(|field| if field == "?" { "*" } else { field })
    .collect::<Vec<_>>()
    .join(" ")
}
