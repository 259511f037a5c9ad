//! Read models handed to the host application.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  alert::{AlertPriority, RetentionAlert},
  entity::{EntityKind, EntityRef},
  history::HistoryEntry,
  lifecycle::AvailableAction,
  process::{ProcessState, RetentionProcess},
};

/// Filters for [`crate::engine::RetentionEngine::list_processes`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessFilter {
  pub state:       Option<ProcessState>,
  pub entity_type: Option<EntityKind>,
  /// Urgency of the next deadline, see [`urgency`].
  pub priority:    Option<AlertPriority>,
  pub trd_id:      Option<Uuid>,
  /// 1-based.
  pub page:        Option<usize>,
  pub per_page:    Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
  pub items:    Vec<T>,
  pub total:    usize,
  pub page:     usize,
  pub per_page: usize,
}

/// Urgency of the next deadline of a process. Terminal records are never
/// urgent; deferred records count down to the end of their deferral.
pub fn urgency(process: &RetentionProcess, today: NaiveDate) -> AlertPriority {
  if process.state.is_terminal() {
    return AlertPriority::Normal;
  }
  let days = match &process.deferral {
    Some(deferral) => (deferral.ends_on - today).num_days(),
    None => process.days_until_expiry(today),
  };
  AlertPriority::from_days_remaining(days)
}

/// One row of a process listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSummary {
  pub process_id:        Uuid,
  pub process_code:      String,
  pub entity:            EntityRef,
  pub state:             ProcessState,
  pub management_expiry: NaiveDate,
  pub central_expiry:    NaiveDate,
  pub days_until_expiry: i64,
  pub priority:          AlertPriority,
  pub deferred:          bool,
  pub deletion_blocked:  bool,
}

impl ProcessSummary {
  pub fn new(process: &RetentionProcess, today: NaiveDate) -> Self {
    Self {
      process_id:        process.process_id,
      process_code:      process.process_code.clone(),
      entity:            process.entity,
      state:             process.state,
      management_expiry: process.deadlines.management_expiry,
      central_expiry:    process.deadlines.central_expiry,
      days_until_expiry: process.days_until_expiry(today),
      priority:          urgency(process, today),
      deferred:          process.is_deferred(),
      deletion_blocked:  process.is_deletion_blocked(),
    }
  }
}

/// Everything a detail screen needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDetail {
  pub process:            RetentionProcess,
  pub days_until_expiry:  i64,
  pub is_overdue:         bool,
  pub priority:           AlertPriority,
  /// Empty when the integrity check failed: the workflow halts until the
  /// record has been reviewed.
  pub available_actions:  Vec<AvailableAction>,
  pub integrity_verified: bool,
  pub alerts:             Vec<RetentionAlert>,
  pub history:            Vec<HistoryEntry>,
}
