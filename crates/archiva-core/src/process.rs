//! The retention process record — the aggregate root tracking one entity
//! against its retention schedule.
//!
//! Processes are never physically deleted. Once a process reaches a terminal
//! state its fields are frozen; only history may be appended.

use std::{collections::BTreeSet, fmt, str::FromStr};

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  disposition::DispositionAction,
  entity::{Actor, EntityRef},
  integrity,
  schedule::{Classification, RetentionParameters, TrdRef},
};

// ─── State ───────────────────────────────────────────────────────────────────

/// Lifecycle state of a retention process.
///
/// ```text
/// activo ─▶ alerta_previa ─▶ vencido ─▶ en_disposicion ─▶ {transferido | eliminado | conservado}
///                 │               │
///                 └──▶ aplazado ◀─┘          (any non-terminal) ─▶ suspendido
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessState {
  #[serde(rename = "activo")]
  Active,
  #[serde(rename = "alerta_previa")]
  PreAlert,
  #[serde(rename = "vencido")]
  Expired,
  /// Transient: a disposition passes through it inside a single commit, so
  /// it is never stored and history records `before → terminal` directly.
  #[serde(rename = "en_disposicion")]
  InDisposition,
  #[serde(rename = "transferido")]
  Transferred,
  #[serde(rename = "eliminado")]
  Eliminated,
  #[serde(rename = "conservado")]
  Conserved,
  #[serde(rename = "aplazado")]
  Deferred,
  #[serde(rename = "suspendido")]
  Suspended,
}

impl ProcessState {
  pub const ALL: [Self; 9] = [
    Self::Active,
    Self::PreAlert,
    Self::Expired,
    Self::InDisposition,
    Self::Transferred,
    Self::Eliminated,
    Self::Conserved,
    Self::Deferred,
    Self::Suspended,
  ];

  /// The stored discriminant. Must match the serde renames above.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Active => "activo",
      Self::PreAlert => "alerta_previa",
      Self::Expired => "vencido",
      Self::InDisposition => "en_disposicion",
      Self::Transferred => "transferido",
      Self::Eliminated => "eliminado",
      Self::Conserved => "conservado",
      Self::Deferred => "aplazado",
      Self::Suspended => "suspendido",
    }
  }

  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Transferred | Self::Eliminated | Self::Conserved)
  }
}

impl fmt::Display for ProcessState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ProcessState {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|state| state.as_str() == s)
      .ok_or_else(|| Error::Validation(format!("unknown process state: {s:?}")))
  }
}

// ─── Alert channels ──────────────────────────────────────────────────────────

/// Where alerts for a process should be delivered by the host.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
  InApp,
  Email,
}

// ─── Sub-records ─────────────────────────────────────────────────────────────

/// Calendar deadlines derived from the entity creation date and the pinned
/// retention parameters. Never recomputed after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deadlines {
  /// End of the management (gestión) archive period.
  pub management_expiry: NaiveDate,
  /// End of the central archive period.
  pub central_expiry:    NaiveDate,
  pub pre_alert_date:    NaiveDate,
}

impl Deadlines {
  /// `management = created + management_years`,
  /// `central = management + central_years`,
  /// `pre_alert = management - pre_alert_days`.
  pub fn compute(created_on: NaiveDate, params: &RetentionParameters) -> Result<Self> {
    let management_expiry = add_years(created_on, params.management_years)?;
    let central_expiry = add_years(management_expiry, params.central_years)?;
    let pre_alert_date = management_expiry
      .checked_sub_days(Days::new(u64::from(params.pre_alert_days)))
      .ok_or_else(|| Error::Validation("pre-alert date out of range".into()))?;

    Ok(Self { management_expiry, central_expiry, pre_alert_date })
  }
}

fn add_years(date: NaiveDate, years: u32) -> Result<NaiveDate> {
  years
    .checked_mul(12)
    .and_then(|months| date.checked_add_months(Months::new(months)))
    .ok_or_else(|| Error::Validation(format!("{date} + {years} years is out of range")))
}

/// A temporary hold on disposition (aplazamiento).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deferral {
  pub reason:      String,
  pub started_at:  DateTime<Utc>,
  /// Always strictly after the day the deferral was set.
  pub ends_on:     NaiveDate,
  pub deferred_by: Actor,
}

/// Protection against the elimination outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionBlock {
  pub reason:     String,
  pub blocked_by: Actor,
  pub blocked_at: DateTime<Utc>,
}

// ─── Process ─────────────────────────────────────────────────────────────────

/// Input to [`crate::engine::RetentionEngine::create_process`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProcess {
  pub entity:            EntityRef,
  pub classification:    Classification,
  /// Creation date of the document or case file; the retention clock starts
  /// here.
  pub entity_created_on: NaiveDate,
  pub actor:             Actor,
}

/// The retention state of one managed entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionProcess {
  pub process_id:            Uuid,
  /// Human-legible unique code, e.g. `RP-2024-000017`.
  pub process_code:          String,
  pub entity:                EntityRef,

  // classification, pinned at creation
  pub schedule:              TrdRef,
  pub series_id:             String,
  pub subseries_id:          Option<String>,
  pub management_years:      u32,
  pub central_years:         u32,
  pub pre_alert_days:        u32,
  /// The final action configured by the TRD entry.
  pub scheduled_disposition: DispositionAction,

  pub entity_created_on:     NaiveDate,
  pub deadlines:             Deadlines,

  pub state:                 ProcessState,
  /// Set only when the final disposition executes; immutable afterwards.
  pub disposition_action:    Option<DispositionAction>,
  pub disposed_at:           Option<DateTime<Utc>>,

  pub deferral:              Option<Deferral>,
  pub suspension_reason:     Option<String>,
  pub deletion_block:        Option<DeletionBlock>,

  pub alerts_active:         bool,
  pub channels:              BTreeSet<NotificationChannel>,
  pub last_alert_sent_at:    Option<DateTime<Utc>>,

  /// SHA-256 over the immutable fields; see [`crate::integrity`].
  pub integrity_hash:        String,

  pub created_by:            Actor,
  pub modified_by:           Actor,
  pub created_at:            DateTime<Utc>,
  pub updated_at:            DateTime<Utc>,
  /// Optimistic-concurrency counter, bumped on every committed mutation.
  pub version:               u64,
}

impl RetentionProcess {
  /// Build a fresh process in state `activo` and seal it.
  pub fn open(
    process_code: String,
    input: &NewProcess,
    schedule: TrdRef,
    params: &RetentionParameters,
    channels: BTreeSet<NotificationChannel>,
    now: DateTime<Utc>,
  ) -> Result<Self> {
    let deadlines = Deadlines::compute(input.entity_created_on, params)?;

    let mut process = Self {
      process_id: Uuid::new_v4(),
      process_code,
      entity: input.entity,
      schedule,
      series_id: input.classification.series_id.clone(),
      subseries_id: input.classification.subseries_id.clone(),
      management_years: params.management_years,
      central_years: params.central_years,
      pre_alert_days: params.pre_alert_days,
      scheduled_disposition: params.final_disposition,
      entity_created_on: input.entity_created_on,
      deadlines,
      state: ProcessState::Active,
      disposition_action: None,
      disposed_at: None,
      deferral: None,
      suspension_reason: None,
      deletion_block: None,
      alerts_active: true,
      channels,
      last_alert_sent_at: None,
      integrity_hash: String::new(),
      created_by: input.actor.clone(),
      modified_by: input.actor.clone(),
      created_at: now,
      updated_at: now,
      version: 0,
    };
    process.integrity_hash = integrity::seal(&process)?;
    Ok(process)
  }

  pub fn is_deferred(&self) -> bool { self.deferral.is_some() }

  pub fn is_deletion_blocked(&self) -> bool { self.deletion_block.is_some() }

  /// Days from `today` to the management-archive deadline; negative once
  /// overdue.
  pub fn days_until_expiry(&self, today: NaiveDate) -> i64 {
    (self.deadlines.management_expiry - today).num_days()
  }

  pub fn is_overdue(&self, today: NaiveDate) -> bool {
    !self.state.is_terminal() && today >= self.deadlines.management_expiry
  }

  /// Stamp the bookkeeping fields for a mutation by `actor`.
  pub(crate) fn touch(&mut self, actor: &Actor, now: DateTime<Utc>) {
    self.modified_by = actor.clone();
    self.updated_at = now;
  }
}

// ─── Process code ────────────────────────────────────────────────────────────

/// Prefix shared by all codes issued for records created in `year`.
pub fn process_code_prefix(year: i32) -> String { format!("RP-{year}-") }

/// `RP-{YYYY}-{NNNNNN}`.
pub fn format_process_code(year: i32, sequence: u32) -> String {
  format!("{}{sequence:06}", process_code_prefix(year))
}

/// The year used for code allocation.
pub fn process_code_year(now: DateTime<Utc>) -> i32 { now.year() }
