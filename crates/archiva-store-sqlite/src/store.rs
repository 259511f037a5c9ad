//! [`SqliteStore`]: the SQLite implementation of [`RetentionStore`].

use std::path::Path;

use archiva_core::{
  alert::{AlertStatus, RetentionAlert},
  entity::EntityRef,
  history::HistoryEntry,
  process::RetentionProcess,
  schedule::{RetentionSchedule, TrdRef},
  store::{AlertQuery, ProcessCommit, ProcessQuery, RetentionStore},
};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, TransactionBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{
    ALERT_COLUMNS, PROCESS_COLUMNS, RawAlert, RawHistory, RawProcess, RawSchedule,
    RawScheduleEntry, decode_uuid, encode_actor, encode_date, encode_dt, encode_uuid,
    encode_version,
  },
  schema::SCHEMA,
};

/// Terminal states as stored; must agree with `ProcessState::is_terminal`.
pub(crate) const TERMINAL_STATES_SQL: &str = "('transferido', 'eliminado', 'conservado')";

/// Optional filters bound as `?1` state, `?2` entity kind, `?3` TRD.
const PROCESS_FILTER: &str = "(?1 IS NULL OR state = ?1)
             AND (?2 IS NULL OR entity_kind = ?2)
             AND (?3 IS NULL OR trd_id = ?3)";

// ─── Store ───────────────────────────────────────────────────────────────────

/// A retention store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted and every call
/// is serialised onto its worker thread.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    info!(path = %path.display(), "opened sqlite store");
    Ok(store)
  }

  /// Open an in-memory store; useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── Row writers ─────────────────────────────────────────────────────────────
//
// Plain synchronous helpers run inside `Connection::call` closures, usually
// against a transaction (which derefs to `rusqlite::Connection`).

fn insert_process_row(conn: &rusqlite::Connection, p: &RawProcess) -> rusqlite::Result<()> {
  conn.execute(
    &format!(
      "INSERT INTO processes ({PROCESS_COLUMNS})
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
               ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28,
               ?29, ?30, ?31)"
    ),
    rusqlite::params![
      p.process_id,
      p.process_code,
      p.entity_kind,
      p.entity_id,
      p.trd_id,
      p.trd_version,
      p.series_id,
      p.subseries_id,
      p.management_years,
      p.central_years,
      p.pre_alert_days,
      p.scheduled_disposition,
      p.entity_created_on,
      p.management_expiry,
      p.central_expiry,
      p.pre_alert_date,
      p.state,
      p.disposition_action,
      p.disposed_at,
      p.deferral,
      p.suspension_reason,
      p.deletion_block,
      p.alerts_active,
      p.channels,
      p.last_alert_sent_at,
      p.integrity_hash,
      p.created_by,
      p.modified_by,
      p.created_at,
      p.updated_at,
      p.version,
    ],
  )?;
  Ok(())
}

/// Overwrite the mutable columns of a process if its stored version is still
/// `expected`. Returns the number of rows changed (0 or 1).
///
/// Identity, classification and deadline columns are never part of the
/// `SET` list; they are written once by [`insert_process_row`].
fn update_process_row(
  conn: &rusqlite::Connection,
  p: &RawProcess,
  expected: i64,
) -> rusqlite::Result<usize> {
  conn.execute(
    "UPDATE processes SET
       state              = ?3,
       disposition_action = ?4,
       disposed_at        = ?5,
       deferral           = ?6,
       suspension_reason  = ?7,
       deletion_block     = ?8,
       alerts_active      = ?9,
       channels           = ?10,
       last_alert_sent_at = ?11,
       integrity_hash     = ?12,
       modified_by        = ?13,
       updated_at         = ?14,
       version            = ?15
     WHERE process_id = ?1 AND version = ?2",
    rusqlite::params![
      p.process_id,
      expected,
      p.state,
      p.disposition_action,
      p.disposed_at,
      p.deferral,
      p.suspension_reason,
      p.deletion_block,
      p.alerts_active,
      p.channels,
      p.last_alert_sent_at,
      p.integrity_hash,
      p.modified_by,
      p.updated_at,
      p.version,
    ],
  )
}

fn insert_history_row(conn: &rusqlite::Connection, h: &RawHistory) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO disposition_history (
       entry_id, process_id, action_kind, action_json, actor,
       recorded_at, notes, state_before, state_after
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    rusqlite::params![
      h.entry_id,
      h.process_id,
      h.action_kind,
      h.action_json,
      h.actor,
      h.recorded_at,
      h.notes,
      h.state_before,
      h.state_after,
    ],
  )?;
  Ok(())
}

fn insert_alert_row(conn: &rusqlite::Connection, a: &RawAlert) -> rusqlite::Result<()> {
  conn.execute(
    &format!(
      "INSERT INTO alerts ({ALERT_COLUMNS})
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
    ),
    rusqlite::params![
      a.alert_id,
      a.process_id,
      a.kind,
      a.priority,
      a.message,
      a.channels,
      a.raised_at,
      a.read_at,
      a.acknowledged_at,
      a.acknowledged_by,
      a.acknowledgement_notes,
    ],
  )?;
  Ok(())
}

fn load_entries(
  conn: &rusqlite::Connection,
  trd_id: &str,
  version: i64,
) -> rusqlite::Result<Vec<RawScheduleEntry>> {
  let mut stmt = conn.prepare(
    "SELECT series_id, subseries_id, management_years, central_years,
            final_disposition, pre_alert_days
     FROM schedule_entries
     WHERE trd_id = ?1 AND version = ?2
     ORDER BY rowid",
  )?;
  let rows = stmt
    .query_map(rusqlite::params![trd_id, version], |row| {
      Ok(RawScheduleEntry {
        series_id:         row.get(0)?,
        subseries_id:      row.get(1)?,
        management_years:  row.get(2)?,
        central_years:     row.get(3)?,
        final_disposition: row.get(4)?,
        pre_alert_days:    row.get(5)?,
      })
    })?
    .collect();
  rows
}

fn raw_schedule(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawSchedule> {
  Ok(RawSchedule {
    trd_id:          row.get(0)?,
    version:         row.get(1)?,
    name:            row.get(2)?,
    effective_from:  row.get(3)?,
    effective_until: row.get(4)?,
  })
}

fn query_filters(query: &ProcessQuery) -> (Option<String>, Option<String>, Option<String>) {
  (
    query.state.map(|s| s.as_str().to_owned()),
    query.entity_kind.map(|k| k.as_str().to_owned()),
    query.trd_id.map(encode_uuid),
  )
}

/// SQL predicate matching alerts currently in `status`.
fn status_predicate(status: AlertStatus) -> &'static str {
  match status {
    AlertStatus::Pending => "read_at IS NULL AND acknowledged_at IS NULL",
    AlertStatus::Read => "read_at IS NOT NULL AND acknowledged_at IS NULL",
    AlertStatus::Acknowledged => "acknowledged_at IS NOT NULL",
  }
}

enum InsertOutcome {
  Inserted,
  Duplicate { process_id: String, process_code: String },
  CodeTaken,
}

enum AlertUpdate {
  Updated,
  Missing,
  StatusChanged,
}

// ─── RetentionStore impl ─────────────────────────────────────────────────────

impl RetentionStore for SqliteStore {
  type Error = Error;

  // ── Schedules ─────────────────────────────────────────────────────────────

  async fn publish_schedule(
    &self,
    schedule: RetentionSchedule,
    published_at: DateTime<Utc>,
  ) -> Result<()> {
    let trd_id_str   = encode_uuid(schedule.trd_id);
    let version      = i64::from(schedule.version);
    let name         = schedule.name.clone();
    let from_str     = encode_date(schedule.effective_from);
    let until_str    = schedule.effective_until.map(encode_date);
    let published_at = encode_dt(published_at);
    let entries: Vec<RawScheduleEntry> =
      schedule.entries.iter().map(RawScheduleEntry::encode).collect();

    let inserted: bool = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists = tx
          .query_row(
            "SELECT 1 FROM schedules WHERE trd_id = ?1 AND version = ?2",
            rusqlite::params![trd_id_str, version],
            |_| Ok(()),
          )
          .optional()?
          .is_some();
        if exists {
          return Ok(false);
        }

        tx.execute(
          "INSERT INTO schedules (
             trd_id, version, name, effective_from, effective_until, published_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![trd_id_str, version, name, from_str, until_str, published_at],
        )?;
        for e in &entries {
          tx.execute(
            "INSERT INTO schedule_entries (
               trd_id, version, series_id, subseries_id, management_years,
               central_years, final_disposition, pre_alert_days
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
              trd_id_str,
              version,
              e.series_id,
              e.subseries_id,
              e.management_years,
              e.central_years,
              e.final_disposition,
              e.pre_alert_days,
            ],
          )?;
        }

        tx.commit()?;
        Ok(true)
      })
      .await?;

    if !inserted {
      return Err(Error::Core(archiva_core::Error::Validation(format!(
        "TRD {} version {} is already published",
        schedule.trd_id, schedule.version
      ))));
    }
    Ok(())
  }

  async fn get_schedule(&self, trd: TrdRef) -> Result<Option<RetentionSchedule>> {
    let trd_id_str = encode_uuid(trd.trd_id);
    let version = i64::from(trd.version);

    let raw: Option<(RawSchedule, Vec<RawScheduleEntry>)> = self
      .conn
      .call(move |conn| {
        let schedule = conn
          .query_row(
            "SELECT trd_id, version, name, effective_from, effective_until
             FROM schedules WHERE trd_id = ?1 AND version = ?2",
            rusqlite::params![trd_id_str, version],
            raw_schedule,
          )
          .optional()?;

        match schedule {
          Some(s) => {
            let entries = load_entries(conn, &trd_id_str, version)?;
            Ok(Some((s, entries)))
          }
          None => Ok(None),
        }
      })
      .await?;

    raw.map(|(s, entries)| s.into_schedule(entries)).transpose()
  }

  async fn list_schedule_versions(&self, trd_id: Uuid) -> Result<Vec<RetentionSchedule>> {
    let trd_id_str = encode_uuid(trd_id);

    let raws: Vec<(RawSchedule, Vec<RawScheduleEntry>)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT trd_id, version, name, effective_from, effective_until
           FROM schedules WHERE trd_id = ?1
           ORDER BY version",
        )?;
        let schedules = stmt
          .query_map(rusqlite::params![trd_id_str], raw_schedule)?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut out = Vec::with_capacity(schedules.len());
        for s in schedules {
          let entries = load_entries(conn, &s.trd_id, s.version)?;
          out.push((s, entries));
        }
        Ok(out)
      })
      .await?;

    raws
      .into_iter()
      .map(|(s, entries)| s.into_schedule(entries))
      .collect()
  }

  // ── Processes ─────────────────────────────────────────────────────────────

  async fn count_process_codes(&self, prefix: String) -> Result<u32> {
    let count: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT COUNT(*) FROM processes
           WHERE substr(process_code, 1, length(?1)) = ?1",
          rusqlite::params![prefix],
          |r| r.get(0),
        )?)
      })
      .await?;

    Ok(u32::try_from(count).unwrap_or(u32::MAX))
  }

  async fn process_code_exists(&self, code: String) -> Result<bool> {
    let exists = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT 1 FROM processes WHERE process_code = ?1",
              rusqlite::params![code],
              |_| Ok(()),
            )
            .optional()?
            .is_some(),
        )
      })
      .await?;
    Ok(exists)
  }

  async fn insert_process(&self, process: RetentionProcess, created: HistoryEntry) -> Result<()> {
    let code = process.process_code.clone();
    let raw = RawProcess::encode(&process)?;
    let history = RawHistory::encode(&created)?;

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let open: Option<(String, String)> = tx
          .query_row(
            &format!(
              "SELECT process_id, process_code FROM processes
               WHERE entity_kind = ?1 AND entity_id = ?2
                 AND state NOT IN {TERMINAL_STATES_SQL}"
            ),
            rusqlite::params![raw.entity_kind, raw.entity_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
          )
          .optional()?;
        if let Some((process_id, process_code)) = open {
          return Ok(InsertOutcome::Duplicate { process_id, process_code });
        }

        let taken = tx
          .query_row(
            "SELECT 1 FROM processes WHERE process_code = ?1",
            rusqlite::params![raw.process_code],
            |_| Ok(()),
          )
          .optional()?
          .is_some();
        if taken {
          return Ok(InsertOutcome::CodeTaken);
        }

        insert_process_row(&tx, &raw)?;
        insert_history_row(&tx, &history)?;
        tx.commit()?;
        Ok(InsertOutcome::Inserted)
      })
      .await?;

    match outcome {
      InsertOutcome::Inserted => Ok(()),
      InsertOutcome::Duplicate { process_id, process_code } => {
        Err(Error::Core(archiva_core::Error::DuplicateProcess {
          existing_id:   decode_uuid(&process_id)?,
          existing_code: process_code,
        }))
      }
      InsertOutcome::CodeTaken => {
        Err(Error::Core(archiva_core::Error::ProcessCodeTaken(code)))
      }
    }
  }

  async fn get_process(&self, id: Uuid) -> Result<Option<RetentionProcess>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawProcess> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {PROCESS_COLUMNS} FROM processes WHERE process_id = ?1"),
              rusqlite::params![id_str],
              RawProcess::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawProcess::into_process).transpose()
  }

  async fn find_open_process(&self, entity: EntityRef) -> Result<Option<RetentionProcess>> {
    let kind_str = entity.kind().as_str().to_owned();
    let id_str = encode_uuid(entity.id());

    let raw: Option<RawProcess> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {PROCESS_COLUMNS} FROM processes
                 WHERE entity_kind = ?1 AND entity_id = ?2
                   AND state NOT IN {TERMINAL_STATES_SQL}"
              ),
              rusqlite::params![kind_str, id_str],
              RawProcess::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawProcess::into_process).transpose()
  }

  async fn list_processes(&self, query: ProcessQuery) -> Result<Vec<RetentionProcess>> {
    let (state_str, kind_str, trd_str) = query_filters(&query);
    // A negative LIMIT means no limit in SQLite.
    let limit = query.limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
    let offset = i64::try_from(query.offset).unwrap_or(i64::MAX);

    let raws: Vec<RawProcess> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {PROCESS_COLUMNS} FROM processes
           WHERE {PROCESS_FILTER}
           ORDER BY created_at, rowid
           LIMIT ?4 OFFSET ?5"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![state_str, kind_str, trd_str, limit, offset],
            RawProcess::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawProcess::into_process).collect()
  }

  async fn count_processes(&self, query: ProcessQuery) -> Result<usize> {
    let (state_str, kind_str, trd_str) = query_filters(&query);

    let count: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          &format!("SELECT COUNT(*) FROM processes WHERE {PROCESS_FILTER}"),
          rusqlite::params![state_str, kind_str, trd_str],
          |r| r.get(0),
        )?)
      })
      .await?;

    Ok(usize::try_from(count).unwrap_or(usize::MAX))
  }

  async fn open_process_ids(&self) -> Result<Vec<Uuid>> {
    let ids: Vec<String> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT process_id FROM processes
           WHERE state NOT IN {TERMINAL_STATES_SQL}
           ORDER BY created_at, rowid"
        ))?;
        let rows = stmt
          .query_map([], |r| r.get(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    ids.iter().map(|s| decode_uuid(s)).collect()
  }

  async fn commit(&self, commit: ProcessCommit) -> Result<RetentionProcess> {
    let ProcessCommit { process, expected_version, history, alerts, acknowledge_open } =
      commit;

    let raw = RawProcess::encode(&process)?;
    let expected = encode_version(expected_version);
    let history = history.iter().map(RawHistory::encode).collect::<Result<Vec<_>>>()?;
    let alerts = alerts.iter().map(RawAlert::encode).collect::<Result<Vec<_>>>()?;
    let ack = acknowledge_open
      .map(|a| -> Result<_> {
        Ok((encode_dt(a.at), encode_actor(&a.actor)?, a.notes))
      })
      .transpose()?;

    let applied: bool = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Dropping `tx` without commit rolls back.
        if update_process_row(&tx, &raw, expected)? == 0 {
          return Ok(false);
        }

        for h in &history {
          insert_history_row(&tx, h)?;
        }

        if let Some((at, by, notes)) = &ack {
          tx.execute(
            "UPDATE alerts SET
               acknowledged_at       = ?2,
               acknowledged_by       = ?3,
               acknowledgement_notes = ?4,
               read_at               = COALESCE(read_at, ?2)
             WHERE process_id = ?1 AND acknowledged_at IS NULL",
            rusqlite::params![raw.process_id, at, by, notes],
          )?;
        }

        for a in &alerts {
          insert_alert_row(&tx, a)?;
        }

        tx.commit()?;
        Ok(true)
      })
      .await?;

    if !applied {
      debug!(
        process_id = %process.process_id,
        expected = expected_version,
        "version check failed, transaction rolled back"
      );
      return Err(Error::Core(archiva_core::Error::ConcurrencyConflict {
        process_id: process.process_id,
        expected:   expected_version,
      }));
    }
    Ok(process)
  }

  // ── History ───────────────────────────────────────────────────────────────

  async fn list_history(&self, process_id: Uuid) -> Result<Vec<HistoryEntry>> {
    let id_str = encode_uuid(process_id);

    let raws: Vec<RawHistory> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT entry_id, process_id, action_kind, action_json, actor,
                  recorded_at, notes, state_before, state_after
           FROM disposition_history
           WHERE process_id = ?1
           ORDER BY rowid",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], RawHistory::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawHistory::into_entry).collect()
  }

  // ── Alerts ────────────────────────────────────────────────────────────────

  async fn list_alerts(&self, query: AlertQuery) -> Result<Vec<RetentionAlert>> {
    let process_str = query.process_id.map(encode_uuid);

    let raws: Vec<RawAlert> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {ALERT_COLUMNS} FROM alerts
           WHERE (?1 IS NULL OR process_id = ?1)
           ORDER BY raised_at, rowid"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![process_str], RawAlert::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut alerts: Vec<RetentionAlert> = raws
      .into_iter()
      .map(RawAlert::into_alert)
      .collect::<Result<_>>()?;

    if let Some(status) = query.status {
      alerts.retain(|a| a.status() == status);
    }
    Ok(alerts)
  }

  async fn get_alert(&self, id: Uuid) -> Result<Option<RetentionAlert>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawAlert> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE alert_id = ?1"),
              rusqlite::params![id_str],
              RawAlert::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawAlert::into_alert).transpose()
  }

  async fn update_alert(
    &self,
    alert: RetentionAlert,
    expected: AlertStatus,
  ) -> Result<RetentionAlert> {
    let raw = RawAlert::encode(&alert)?;
    let predicate = status_predicate(expected);

    let outcome = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          &format!(
            "UPDATE alerts SET
               read_at               = ?2,
               acknowledged_at       = ?3,
               acknowledged_by       = ?4,
               acknowledgement_notes = ?5
             WHERE alert_id = ?1 AND {predicate}"
          ),
          rusqlite::params![
            raw.alert_id,
            raw.read_at,
            raw.acknowledged_at,
            raw.acknowledged_by,
            raw.acknowledgement_notes,
          ],
        )?;
        if changed > 0 {
          return Ok(AlertUpdate::Updated);
        }

        let exists = conn
          .query_row(
            "SELECT 1 FROM alerts WHERE alert_id = ?1",
            rusqlite::params![raw.alert_id],
            |_| Ok(()),
          )
          .optional()?
          .is_some();
        Ok(if exists { AlertUpdate::StatusChanged } else { AlertUpdate::Missing })
      })
      .await?;

    match outcome {
      AlertUpdate::Updated => Ok(alert),
      AlertUpdate::Missing => Err(Error::Core(archiva_core::Error::AlertNotFound(alert.alert_id))),
      AlertUpdate::StatusChanged => {
        Err(Error::Core(archiva_core::Error::AlertConflict(alert.alert_id)))
      }
    }
  }
}
