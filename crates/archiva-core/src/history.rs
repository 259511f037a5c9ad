//! Append-only disposition history.
//!
//! Every committed change to a process writes at least one entry. Entries are
//! never updated or deleted; the backend enforces this by only ever issuing
//! `INSERT` against the history table.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  disposition::DispositionAction,
  entity::Actor,
  process::ProcessState,
};

/// What happened to the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryAction {
  Created,
  /// Automatic, date-driven advancement.
  StateAdvanced,
  Deferred { until: NaiveDate },
  Reactivated,
  Suspended,
  Resumed,
  DeletionBlocked,
  DeletionUnblocked,
  DispositionExecuted { action: DispositionAction },
}

impl HistoryAction {
  /// Short discriminant stored next to the JSON payload.
  pub fn discriminant(&self) -> &'static str {
    match self {
      Self::Created => "created",
      Self::StateAdvanced => "state_advanced",
      Self::Deferred { .. } => "deferred",
      Self::Reactivated => "reactivated",
      Self::Suspended => "suspended",
      Self::Resumed => "resumed",
      Self::DeletionBlocked => "deletion_blocked",
      Self::DeletionUnblocked => "deletion_unblocked",
      Self::DispositionExecuted { .. } => "disposition_executed",
    }
  }
}

/// One immutable line of a process's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
  pub entry_id:     Uuid,
  pub process_id:   Uuid,
  pub action:       HistoryAction,
  pub actor:        Actor,
  pub recorded_at:  DateTime<Utc>,
  pub notes:        Option<String>,
  pub state_before: ProcessState,
  pub state_after:  ProcessState,
}

impl HistoryEntry {
  pub fn new(
    process_id: Uuid,
    action: HistoryAction,
    actor: &Actor,
    recorded_at: DateTime<Utc>,
    (state_before, state_after): (ProcessState, ProcessState),
  ) -> Self {
    Self {
      entry_id: Uuid::new_v4(),
      process_id,
      action,
      actor: actor.clone(),
      recorded_at,
      notes: None,
      state_before,
      state_after,
    }
  }

  pub fn with_notes(mut self, notes: Option<String>) -> Self {
    self.notes = notes;
    self
  }
}
