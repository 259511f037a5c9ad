//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings, calendar dates are `YYYY-MM-DD`. Actors,
//! deferrals, deletion blocks and channel sets are compact JSON. UUIDs are
//! hyphenated lowercase strings.

use std::{collections::BTreeSet, str::FromStr};

use archiva_core::{
  alert::{Acknowledgement, AlertKind, AlertPriority, RetentionAlert},
  disposition::DispositionAction,
  entity::{Actor, EntityKind, EntityRef},
  history::{HistoryAction, HistoryEntry},
  process::{
    Deadlines, Deferral, DeletionBlock, NotificationChannel, ProcessState,
    RetentionProcess,
  },
  schedule::{RetentionSchedule, ScheduleEntry, TrdRef},
};
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

fn decode_u32(column: &'static str, v: i64) -> Result<u32> {
  u32::try_from(v).map_err(|_| Error::Decode { column, value: v.to_string() })
}

fn decode_u64(column: &'static str, v: i64) -> Result<u64> {
  u64::try_from(v).map_err(|_| Error::Decode { column, value: v.to_string() })
}

/// SQLite integers are signed 64-bit.
pub fn encode_version(v: u64) -> i64 { i64::try_from(v).unwrap_or(i64::MAX) }

// ─── Enumerations ────────────────────────────────────────────────────────────

pub fn decode_entity_kind(s: &str) -> Result<EntityKind> {
  match s {
    "document" => Ok(EntityKind::Document),
    "case_file" => Ok(EntityKind::CaseFile),
    other => Err(Error::Decode { column: "entity_kind", value: other.into() }),
  }
}

pub fn decode_state(s: &str) -> Result<ProcessState> {
  ProcessState::from_str(s)
    .map_err(|_| Error::Decode { column: "state", value: s.into() })
}

pub fn decode_action(column: &'static str, s: &str) -> Result<DispositionAction> {
  DispositionAction::from_str(s).map_err(|_| Error::Decode { column, value: s.into() })
}

pub fn decode_alert_kind(s: &str) -> Result<AlertKind> {
  match s {
    "pre_alert" => Ok(AlertKind::PreAlert),
    "expired" => Ok(AlertKind::Expired),
    "deferral_ending" => Ok(AlertKind::DeferralEnding),
    other => Err(Error::Decode { column: "kind", value: other.into() }),
  }
}

pub fn decode_priority(s: &str) -> Result<AlertPriority> {
  match s {
    "normal" => Ok(AlertPriority::Normal),
    "elevated" => Ok(AlertPriority::Elevated),
    "critical" => Ok(AlertPriority::Critical),
    other => Err(Error::Decode { column: "priority", value: other.into() }),
  }
}

// ─── JSON columns ────────────────────────────────────────────────────────────

pub fn encode_actor(a: &Actor) -> Result<String> { Ok(serde_json::to_string(a)?) }

pub fn decode_actor(s: &str) -> Result<Actor> { Ok(serde_json::from_str(s)?) }

pub fn encode_channels(c: &BTreeSet<NotificationChannel>) -> Result<String> {
  Ok(serde_json::to_string(c)?)
}

pub fn decode_channels(s: &str) -> Result<BTreeSet<NotificationChannel>> {
  Ok(serde_json::from_str(s)?)
}

// ─── Processes ───────────────────────────────────────────────────────────────

/// Column list shared by every `SELECT` that yields a [`RawProcess`].
pub const PROCESS_COLUMNS: &str = "
  process_id, process_code, entity_kind, entity_id, trd_id, trd_version,
  series_id, subseries_id, management_years, central_years, pre_alert_days,
  scheduled_disposition, entity_created_on, management_expiry, central_expiry,
  pre_alert_date, state, disposition_action, disposed_at, deferral,
  suspension_reason, deletion_block, alerts_active, channels,
  last_alert_sent_at, integrity_hash, created_by, modified_by, created_at,
  updated_at, version";

/// A `processes` row as plain column values.
pub struct RawProcess {
  pub process_id:            String,
  pub process_code:          String,
  pub entity_kind:           String,
  pub entity_id:             String,
  pub trd_id:                String,
  pub trd_version:           i64,
  pub series_id:             String,
  pub subseries_id:          Option<String>,
  pub management_years:      i64,
  pub central_years:         i64,
  pub pre_alert_days:        i64,
  pub scheduled_disposition: String,
  pub entity_created_on:     String,
  pub management_expiry:     String,
  pub central_expiry:        String,
  pub pre_alert_date:        String,
  pub state:                 String,
  pub disposition_action:    Option<String>,
  pub disposed_at:           Option<String>,
  pub deferral:              Option<String>,
  pub suspension_reason:     Option<String>,
  pub deletion_block:        Option<String>,
  pub alerts_active:         bool,
  pub channels:              String,
  pub last_alert_sent_at:    Option<String>,
  pub integrity_hash:        String,
  pub created_by:            String,
  pub modified_by:           String,
  pub created_at:            String,
  pub updated_at:            String,
  pub version:               i64,
}

impl RawProcess {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      process_id:            row.get(0)?,
      process_code:          row.get(1)?,
      entity_kind:           row.get(2)?,
      entity_id:             row.get(3)?,
      trd_id:                row.get(4)?,
      trd_version:           row.get(5)?,
      series_id:             row.get(6)?,
      subseries_id:          row.get(7)?,
      management_years:      row.get(8)?,
      central_years:         row.get(9)?,
      pre_alert_days:        row.get(10)?,
      scheduled_disposition: row.get(11)?,
      entity_created_on:     row.get(12)?,
      management_expiry:     row.get(13)?,
      central_expiry:        row.get(14)?,
      pre_alert_date:        row.get(15)?,
      state:                 row.get(16)?,
      disposition_action:    row.get(17)?,
      disposed_at:           row.get(18)?,
      deferral:              row.get(19)?,
      suspension_reason:     row.get(20)?,
      deletion_block:        row.get(21)?,
      alerts_active:         row.get(22)?,
      channels:              row.get(23)?,
      last_alert_sent_at:    row.get(24)?,
      integrity_hash:        row.get(25)?,
      created_by:            row.get(26)?,
      modified_by:           row.get(27)?,
      created_at:            row.get(28)?,
      updated_at:            row.get(29)?,
      version:               row.get(30)?,
    })
  }

  pub fn encode(p: &RetentionProcess) -> Result<Self> {
    Ok(Self {
      process_id:            encode_uuid(p.process_id),
      process_code:          p.process_code.clone(),
      entity_kind:           p.entity.kind().as_str().to_owned(),
      entity_id:             encode_uuid(p.entity.id()),
      trd_id:                encode_uuid(p.schedule.trd_id),
      trd_version:           i64::from(p.schedule.version),
      series_id:             p.series_id.clone(),
      subseries_id:          p.subseries_id.clone(),
      management_years:      i64::from(p.management_years),
      central_years:         i64::from(p.central_years),
      pre_alert_days:        i64::from(p.pre_alert_days),
      scheduled_disposition: p.scheduled_disposition.as_str().to_owned(),
      entity_created_on:     encode_date(p.entity_created_on),
      management_expiry:     encode_date(p.deadlines.management_expiry),
      central_expiry:        encode_date(p.deadlines.central_expiry),
      pre_alert_date:        encode_date(p.deadlines.pre_alert_date),
      state:                 p.state.as_str().to_owned(),
      disposition_action:    p.disposition_action.map(|a| a.as_str().to_owned()),
      disposed_at:           p.disposed_at.map(encode_dt),
      deferral:              p.deferral.as_ref().map(serde_json::to_string).transpose()?,
      suspension_reason:     p.suspension_reason.clone(),
      deletion_block:        p
        .deletion_block
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?,
      alerts_active:         p.alerts_active,
      channels:              encode_channels(&p.channels)?,
      last_alert_sent_at:    p.last_alert_sent_at.map(encode_dt),
      integrity_hash:        p.integrity_hash.clone(),
      created_by:            encode_actor(&p.created_by)?,
      modified_by:           encode_actor(&p.modified_by)?,
      created_at:            encode_dt(p.created_at),
      updated_at:            encode_dt(p.updated_at),
      version:               encode_version(p.version),
    })
  }

  pub fn into_process(self) -> Result<RetentionProcess> {
    let kind = decode_entity_kind(&self.entity_kind)?;
    let entity = EntityRef::new(kind, decode_uuid(&self.entity_id)?);

    let deferral: Option<Deferral> =
      self.deferral.as_deref().map(serde_json::from_str).transpose()?;
    let deletion_block: Option<DeletionBlock> =
      self.deletion_block.as_deref().map(serde_json::from_str).transpose()?;

    Ok(RetentionProcess {
      process_id: decode_uuid(&self.process_id)?,
      process_code: self.process_code,
      entity,
      schedule: TrdRef {
        trd_id:  decode_uuid(&self.trd_id)?,
        version: decode_u32("trd_version", self.trd_version)?,
      },
      series_id: self.series_id,
      subseries_id: self.subseries_id,
      management_years: decode_u32("management_years", self.management_years)?,
      central_years: decode_u32("central_years", self.central_years)?,
      pre_alert_days: decode_u32("pre_alert_days", self.pre_alert_days)?,
      scheduled_disposition: decode_action(
        "scheduled_disposition",
        &self.scheduled_disposition,
      )?,
      entity_created_on: decode_date(&self.entity_created_on)?,
      deadlines: Deadlines {
        management_expiry: decode_date(&self.management_expiry)?,
        central_expiry:    decode_date(&self.central_expiry)?,
        pre_alert_date:    decode_date(&self.pre_alert_date)?,
      },
      state: decode_state(&self.state)?,
      disposition_action: self
        .disposition_action
        .as_deref()
        .map(|s| decode_action("disposition_action", s))
        .transpose()?,
      disposed_at: self.disposed_at.as_deref().map(decode_dt).transpose()?,
      deferral,
      suspension_reason: self.suspension_reason,
      deletion_block,
      alerts_active: self.alerts_active,
      channels: decode_channels(&self.channels)?,
      last_alert_sent_at: self.last_alert_sent_at.as_deref().map(decode_dt).transpose()?,
      integrity_hash: self.integrity_hash,
      created_by: decode_actor(&self.created_by)?,
      modified_by: decode_actor(&self.modified_by)?,
      created_at: decode_dt(&self.created_at)?,
      updated_at: decode_dt(&self.updated_at)?,
      version: decode_u64("version", self.version)?,
    })
  }
}

// ─── History ─────────────────────────────────────────────────────────────────

/// A `disposition_history` row as plain column values.
pub struct RawHistory {
  pub entry_id:     String,
  pub process_id:   String,
  pub action_kind:  String,
  pub action_json:  String,
  pub actor:        String,
  pub recorded_at:  String,
  pub notes:        Option<String>,
  pub state_before: String,
  pub state_after:  String,
}

impl RawHistory {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      entry_id:     row.get(0)?,
      process_id:   row.get(1)?,
      action_kind:  row.get(2)?,
      action_json:  row.get(3)?,
      actor:        row.get(4)?,
      recorded_at:  row.get(5)?,
      notes:        row.get(6)?,
      state_before: row.get(7)?,
      state_after:  row.get(8)?,
    })
  }

  pub fn encode(h: &HistoryEntry) -> Result<Self> {
    Ok(Self {
      entry_id:     encode_uuid(h.entry_id),
      process_id:   encode_uuid(h.process_id),
      action_kind:  h.action.discriminant().to_owned(),
      action_json:  serde_json::to_string(&h.action)?,
      actor:        encode_actor(&h.actor)?,
      recorded_at:  encode_dt(h.recorded_at),
      notes:        h.notes.clone(),
      state_before: h.state_before.as_str().to_owned(),
      state_after:  h.state_after.as_str().to_owned(),
    })
  }

  pub fn into_entry(self) -> Result<HistoryEntry> {
    let action: HistoryAction = serde_json::from_str(&self.action_json)?;
    if action.discriminant() != self.action_kind {
      return Err(Error::Decode { column: "action_kind", value: self.action_kind });
    }

    Ok(HistoryEntry {
      entry_id: decode_uuid(&self.entry_id)?,
      process_id: decode_uuid(&self.process_id)?,
      action,
      actor: decode_actor(&self.actor)?,
      recorded_at: decode_dt(&self.recorded_at)?,
      notes: self.notes,
      state_before: decode_state(&self.state_before)?,
      state_after: decode_state(&self.state_after)?,
    })
  }
}

// ─── Alerts ──────────────────────────────────────────────────────────────────

pub const ALERT_COLUMNS: &str = "
  alert_id, process_id, kind, priority, message, channels, raised_at, read_at,
  acknowledged_at, acknowledged_by, acknowledgement_notes";

/// An `alerts` row as plain column values.
pub struct RawAlert {
  pub alert_id:              String,
  pub process_id:            String,
  pub kind:                  String,
  pub priority:              String,
  pub message:               String,
  pub channels:              String,
  pub raised_at:             String,
  pub read_at:               Option<String>,
  pub acknowledged_at:       Option<String>,
  pub acknowledged_by:       Option<String>,
  pub acknowledgement_notes: Option<String>,
}

impl RawAlert {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      alert_id:              row.get(0)?,
      process_id:            row.get(1)?,
      kind:                  row.get(2)?,
      priority:              row.get(3)?,
      message:               row.get(4)?,
      channels:              row.get(5)?,
      raised_at:             row.get(6)?,
      read_at:               row.get(7)?,
      acknowledged_at:       row.get(8)?,
      acknowledged_by:       row.get(9)?,
      acknowledgement_notes: row.get(10)?,
    })
  }

  pub fn encode(a: &RetentionAlert) -> Result<Self> {
    let ack = a.acknowledgement.as_ref();
    Ok(Self {
      alert_id:              encode_uuid(a.alert_id),
      process_id:            encode_uuid(a.process_id),
      kind:                  a.kind.as_str().to_owned(),
      priority:              a.priority.as_str().to_owned(),
      message:               a.message.clone(),
      channels:              encode_channels(&a.channels)?,
      raised_at:             encode_dt(a.raised_at),
      read_at:               a.read_at.map(encode_dt),
      acknowledged_at:       ack.map(|k| encode_dt(k.at)),
      acknowledged_by:       ack.map(|k| encode_actor(&k.actor)).transpose()?,
      acknowledgement_notes: ack.and_then(|k| k.notes.clone()),
    })
  }

  pub fn into_alert(self) -> Result<RetentionAlert> {
    let acknowledgement = match (self.acknowledged_at, self.acknowledged_by) {
      (Some(at), Some(by)) => Some(Acknowledgement {
        actor: decode_actor(&by)?,
        notes: self.acknowledgement_notes,
        at:    decode_dt(&at)?,
      }),
      (None, None) => None,
      (at, _) => {
        return Err(Error::Decode {
          column: "acknowledged_by",
          value:  at.unwrap_or_default(),
        });
      }
    };

    Ok(RetentionAlert {
      alert_id: decode_uuid(&self.alert_id)?,
      process_id: decode_uuid(&self.process_id)?,
      kind: decode_alert_kind(&self.kind)?,
      priority: decode_priority(&self.priority)?,
      message: self.message,
      channels: decode_channels(&self.channels)?,
      raised_at: decode_dt(&self.raised_at)?,
      read_at: self.read_at.as_deref().map(decode_dt).transpose()?,
      acknowledgement,
    })
  }
}

// ─── Schedules ───────────────────────────────────────────────────────────────

/// A `schedules` row; entries are loaded separately.
pub struct RawSchedule {
  pub trd_id:          String,
  pub version:         i64,
  pub name:            String,
  pub effective_from:  String,
  pub effective_until: Option<String>,
}

/// A `schedule_entries` row.
pub struct RawScheduleEntry {
  pub series_id:         String,
  pub subseries_id:      Option<String>,
  pub management_years:  i64,
  pub central_years:     i64,
  pub final_disposition: String,
  pub pre_alert_days:    Option<i64>,
}

impl RawScheduleEntry {
  pub fn encode(e: &ScheduleEntry) -> Self {
    Self {
      series_id:         e.series_id.clone(),
      subseries_id:      e.subseries_id.clone(),
      management_years:  i64::from(e.management_years),
      central_years:     i64::from(e.central_years),
      final_disposition: e.final_disposition.as_str().to_owned(),
      pre_alert_days:    e.pre_alert_days.map(i64::from),
    }
  }

  fn into_entry(self) -> Result<ScheduleEntry> {
    Ok(ScheduleEntry {
      series_id:         self.series_id,
      subseries_id:      self.subseries_id,
      management_years:  decode_u32("management_years", self.management_years)?,
      central_years:     decode_u32("central_years", self.central_years)?,
      final_disposition: decode_action("final_disposition", &self.final_disposition)?,
      pre_alert_days:    self
        .pre_alert_days
        .map(|d| decode_u32("pre_alert_days", d))
        .transpose()?,
    })
  }
}

impl RawSchedule {
  pub fn into_schedule(self, entries: Vec<RawScheduleEntry>) -> Result<RetentionSchedule> {
    Ok(RetentionSchedule {
      trd_id:          decode_uuid(&self.trd_id)?,
      version:         decode_u32("version", self.version)?,
      name:            self.name,
      effective_from:  decode_date(&self.effective_from)?,
      effective_until: self.effective_until.as_deref().map(decode_date).transpose()?,
      entries:         entries
        .into_iter()
        .map(RawScheduleEntry::into_entry)
        .collect::<Result<_>>()?,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dates_use_iso_calendar_format() {
    let d = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
    assert_eq!(encode_date(d), "2026-01-01");
    assert_eq!(decode_date("2026-01-01").unwrap(), d);
    assert!(matches!(decode_date("01/01/2026"), Err(Error::DateParse(_))));
  }

  #[test]
  fn unknown_discriminants_are_decode_errors() {
    assert!(matches!(decode_state("archivado"), Err(Error::Decode { column: "state", .. })));
    assert!(matches!(decode_priority("urgent"), Err(Error::Decode { .. })));
    assert!(matches!(decode_entity_kind("folder"), Err(Error::Decode { .. })));
  }

  #[test]
  fn negative_counters_are_rejected() {
    assert!(decode_u32("management_years", -1).is_err());
    assert_eq!(decode_u64("version", 4).unwrap(), 4);
  }
}
