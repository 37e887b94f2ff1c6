//! SQLite-backed job store.

use std::path::Path;

use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{info, warn};

use super::JobStore;
use crate::error::{ParseValueError, StoreError};
use crate::job::{DesiredState, JobDefinition, JobId, JobLogEntity};

const SCHEMA: &str = "PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS job_info (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    assembly_name TEXT NOT NULL,
    class_name TEXT NOT NULL,
    cron_expression TEXT NOT NULL,
    cron_description TEXT NOT NULL DEFAULT '',
    job_args TEXT NOT NULL DEFAULT '',
    job_level TEXT NOT NULL,
    state TEXT NOT NULL,
    disabled INTEGER NOT NULL DEFAULT 0,
    create_name TEXT NOT NULL DEFAULT '',
    create_time TEXT NOT NULL,
    update_time TEXT
);

CREATE TABLE IF NOT EXISTS job_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER NOT NULL,
    fire_time TEXT NOT NULL,
    fire_duration INTEGER NOT NULL,
    fire_state TEXT NOT NULL,
    content TEXT NOT NULL,
    create_time TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_job_log_job_id ON job_log (job_id);
CREATE INDEX IF NOT EXISTS idx_job_log_create_time ON job_log (create_time);";

const JOB_COLUMNS: &str = "id, name, description, assembly_name, class_name, cron_expression, \
  cron_description, job_args, job_level, state, disabled, create_name, create_time, update_time";

const LOG_COLUMNS: &str = "id, job_id, fire_time, fire_duration, fire_state, content, create_time";

/// Persistent store over a single SQLite connection.
///
/// Timestamps are stored as UTC RFC 3339 text so they sort chronologically.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create a store at `db_path`.
  pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
    let db_path = db_path.as_ref();
    let conn = Connection::open(db_path)?;
    conn.execute_batch(SCHEMA)?;
    info!(path = %db_path.display(), "Opened job store.");
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  pub fn open_in_memory() -> Result<Self, StoreError> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn query_rows(&self, filter: &str) -> Result<Vec<JobRow>, StoreError> {
    let conn = self.conn.lock();
    let mut stmt = conn.prepare(&format!(
      "SELECT {JOB_COLUMNS} FROM job_info {filter} ORDER BY id"
    ))?;
    let rows = stmt
      .query_map([], JobRow::read)?
      .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
  }

  /// Every matching row; the first unreadable one fails the query.
  fn query_jobs(&self, filter: &str) -> Result<Vec<JobDefinition>, StoreError> {
    self
      .query_rows(filter)?
      .into_iter()
      .map(JobRow::into_definition)
      .collect()
  }

  /// Matching rows that can be read. An unreadable row is logged and left out
  /// so one bad row cannot hold up every other job.
  fn query_readable_jobs(&self, filter: &str) -> Result<Vec<JobDefinition>, StoreError> {
    let jobs = self
      .query_rows(filter)?
      .into_iter()
      .filter_map(|row| {
        let id = row.id;
        match row.into_definition() {
          Ok(job) => Some(job),
          Err(e) => {
            warn!(job_id = id, error = %e, "Skipping unreadable job row.");
            None
          }
        }
      })
      .collect();
    Ok(jobs)
  }

  fn expect_changed(changed: usize, id: JobId) -> Result<(), StoreError> {
    if changed == 0 {
      Err(StoreError::JobNotFound(id))
    } else {
      Ok(())
    }
  }
}

impl std::fmt::Debug for SqliteStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SqliteStore").finish_non_exhaustive()
  }
}

impl JobStore for SqliteStore {
  fn eligible_jobs(&self) -> Result<Vec<JobDefinition>, StoreError> {
    self.query_readable_jobs(
      "WHERE disabled = 0 AND state IN ('Starting', 'Stopping', 'Updating', 'FireNow')",
    )
  }

  fn running_jobs(&self) -> Result<Vec<JobDefinition>, StoreError> {
    self.query_readable_jobs("WHERE disabled = 0 AND state = 'Running'")
  }

  // Strict: skipping an unreadable system row would create a second one.
  fn system_job(&self) -> Result<Option<JobDefinition>, StoreError> {
    Ok(
      self
        .query_jobs("WHERE job_level = 'System'")?
        .into_iter()
        .next(),
    )
  }

  fn insert_job(&self, job: &JobDefinition) -> Result<JobId, StoreError> {
    let conn = self.conn.lock();
    conn.execute(
      "INSERT INTO job_info (name, description, assembly_name, class_name, cron_expression, \
       cron_description, job_args, job_level, state, disabled, create_name, create_time, update_time)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
      params![
        job.name,
        job.description,
        job.assembly_name,
        job.class_name,
        job.cron_expression,
        job.cron_description,
        job.job_args,
        job.level.as_str(),
        job.state.as_str(),
        job.disabled as i64,
        job.create_name,
        format_time(&job.create_time),
        job.update_time.as_ref().map(format_time),
      ],
    )?;
    Ok(conn.last_insert_rowid())
  }

  fn update_state(&self, id: JobId, state: DesiredState) -> Result<(), StoreError> {
    let changed = self.conn.lock().execute(
      "UPDATE job_info SET state = ?2, update_time = ?3 WHERE id = ?1",
      params![id, state.as_str(), format_time(&Local::now())],
    )?;
    Self::expect_changed(changed, id)
  }

  fn set_available(&self, id: JobId) -> Result<(), StoreError> {
    let changed = self.conn.lock().execute(
      "UPDATE job_info SET disabled = 0, state = 'Starting', update_time = ?2 WHERE id = ?1",
      params![id, format_time(&Local::now())],
    )?;
    Self::expect_changed(changed, id)
  }

  fn set_all_running_to_starting(&self) -> Result<usize, StoreError> {
    let changed = self.conn.lock().execute(
      "UPDATE job_info SET state = 'Starting', update_time = ?1 WHERE state = 'Running'",
      params![format_time(&Local::now())],
    )?;
    Ok(changed)
  }

  fn insert_log(&self, log: &JobLogEntity) -> Result<i64, StoreError> {
    let conn = self.conn.lock();
    conn.execute(
      "INSERT INTO job_log (job_id, fire_time, fire_duration, fire_state, content, create_time)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
      params![
        log.job_id,
        format_time(&log.fire_time),
        i64::try_from(log.fire_duration).unwrap_or(i64::MAX),
        log.fire_state.as_str(),
        log.content,
        format_time(&log.create_time),
      ],
    )?;
    Ok(conn.last_insert_rowid())
  }

  fn get_job(&self, id: JobId) -> Result<Option<JobDefinition>, StoreError> {
    let row = {
      let conn = self.conn.lock();
      let mut stmt = conn.prepare(&format!("SELECT {JOB_COLUMNS} FROM job_info WHERE id = ?1"))?;
      let row = stmt.query_row(params![id], JobRow::read).optional()?;
      row
    };
    row.map(JobRow::into_definition).transpose()
  }

  fn list_jobs(&self) -> Result<Vec<JobDefinition>, StoreError> {
    self.query_jobs("")
  }

  fn job_logs(&self, job_id: JobId) -> Result<Vec<JobLogEntity>, StoreError> {
    let conn = self.conn.lock();
    let mut stmt = conn.prepare(&format!(
      "SELECT {LOG_COLUMNS} FROM job_log WHERE job_id = ?1 ORDER BY id"
    ))?;
    let rows = stmt
      .query_map(params![job_id], LogRow::read)?
      .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(LogRow::into_entity).collect()
  }

  fn delete_logs_before(&self, cutoff: DateTime<Local>) -> Result<usize, StoreError> {
    let deleted = self.conn.lock().execute(
      "DELETE FROM job_log WHERE create_time <= ?1",
      params![format_time(&cutoff)],
    )?;
    Ok(deleted)
  }
}

// --- Row Mapping ---

fn format_time(time: &DateTime<Local>) -> String {
  time
    .with_timezone(&Utc)
    .to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// RFC 3339, or SQLite's own `CURRENT_TIMESTAMP` text (UTC, no offset) for
/// rows written by other tools.
fn parse_time(text: &str) -> Result<DateTime<Local>, StoreError> {
  if let Ok(time) = DateTime::parse_from_rfc3339(text) {
    return Ok(time.with_timezone(&Local));
  }
  NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
    .map(|naive| naive.and_utc().with_timezone(&Local))
    .map_err(|_| ParseValueError::new("timestamp", text).into())
}

/// Raw column values; enum and time parsing happens outside the rusqlite
/// closure so failures surface as `StoreError::Corrupt`.
struct JobRow {
  id: JobId,
  name: String,
  description: String,
  assembly_name: String,
  class_name: String,
  cron_expression: String,
  cron_description: String,
  job_args: String,
  level: String,
  state: String,
  disabled: bool,
  create_name: String,
  create_time: String,
  update_time: Option<String>,
}

impl JobRow {
  fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id: row.get(0)?,
      name: row.get(1)?,
      description: row.get(2)?,
      assembly_name: row.get(3)?,
      class_name: row.get(4)?,
      cron_expression: row.get(5)?,
      cron_description: row.get(6)?,
      job_args: row.get(7)?,
      level: row.get(8)?,
      state: row.get(9)?,
      disabled: row.get::<_, i64>(10)? != 0,
      create_name: row.get(11)?,
      create_time: row.get(12)?,
      update_time: row.get(13)?,
    })
  }

  fn into_definition(self) -> Result<JobDefinition, StoreError> {
    Ok(JobDefinition {
      id: self.id,
      name: self.name,
      description: self.description,
      assembly_name: self.assembly_name,
      class_name: self.class_name,
      cron_expression: self.cron_expression,
      cron_description: self.cron_description,
      job_args: self.job_args,
      level: self.level.parse()?,
      state: self.state.parse()?,
      disabled: self.disabled,
      create_name: self.create_name,
      create_time: parse_time(&self.create_time)?,
      update_time: self.update_time.as_deref().map(parse_time).transpose()?,
    })
  }
}

struct LogRow {
  id: i64,
  job_id: JobId,
  fire_time: String,
  fire_duration: i64,
  fire_state: String,
  content: String,
  create_time: String,
}

impl LogRow {
  fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id: row.get(0)?,
      job_id: row.get(1)?,
      fire_time: row.get(2)?,
      fire_duration: row.get(3)?,
      fire_state: row.get(4)?,
      content: row.get(5)?,
      create_time: row.get(6)?,
    })
  }

  fn into_entity(self) -> Result<JobLogEntity, StoreError> {
    Ok(JobLogEntity {
      id: Some(self.id),
      job_id: self.job_id,
      fire_time: parse_time(&self.fire_time)?,
      fire_duration: u64::try_from(self.fire_duration).unwrap_or_default(),
      fire_state: self.fire_state.parse()?,
      content: self.content,
      create_time: parse_time(&self.create_time)?,
    })
  }
}
