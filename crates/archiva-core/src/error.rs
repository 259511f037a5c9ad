//! Error types for `archiva-core`.

use thiserror::Error;
use uuid::Uuid;

use crate::process::ProcessState;

#[derive(Debug, Error)]
pub enum Error {
  /// Malformed input: bad dates, empty required text, missing confirmation.
  #[error("validation failed: {0}")]
  Validation(String),

  #[error(
    "no effective retention schedule for series {series_id:?} \
     (subseries {subseries_id:?}) in TRD {trd_id}"
  )]
  ScheduleNotFound {
    trd_id:       Uuid,
    series_id:    String,
    subseries_id: Option<String>,
  },

  /// The entity already has an open process; callers should redirect to it.
  #[error("entity already managed by process {existing_code} ({existing_id})")]
  DuplicateProcess {
    existing_id:   Uuid,
    existing_code: String,
  },

  #[error("elimination is blocked: {reason}")]
  BlockedDeletion { reason: String },

  #[error("cannot {operation} a process in state {state}")]
  IllegalTransition {
    state:     ProcessState,
    operation: &'static str,
  },

  #[error("integrity hash mismatch on process {process_id}")]
  IntegrityMismatch {
    process_id: Uuid,
    stored:     String,
    computed:   String,
  },

  /// The state and the recorded disposition disagree: a terminal state with
  /// no action, or an action on a process that is still open.
  #[error("process {process_id} is {state} but its disposition record disagrees")]
  InconsistentDisposition { process_id: Uuid, state: ProcessState },

  /// Optimistic-lock failure; re-fetch and retry.
  #[error("process {process_id} changed concurrently (expected version {expected})")]
  ConcurrencyConflict { process_id: Uuid, expected: u64 },

  #[error("process not found: {0}")]
  ProcessNotFound(Uuid),

  #[error("alert not found: {0}")]
  AlertNotFound(Uuid),

  #[error("alert {0} is already acknowledged")]
  AlertAlreadyAcknowledged(Uuid),

  #[error("alert {0} changed concurrently")]
  AlertConflict(Uuid),

  #[error("process code {0} is already taken")]
  ProcessCodeTaken(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("storage error: {0}")]
  Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
