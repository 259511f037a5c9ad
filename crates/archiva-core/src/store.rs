//! The `RetentionStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g. `archiva-store-sqlite`).
//! The engine depends on this abstraction, not on any concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  alert::{Acknowledgement, AlertStatus, RetentionAlert},
  entity::{EntityKind, EntityRef},
  history::HistoryEntry,
  process::{ProcessState, RetentionProcess},
  schedule::{RetentionSchedule, TrdRef},
};

// ─── Query types ─────────────────────────────────────────────────────────────

/// Filters for [`RetentionStore::list_processes`]. Unset fields match all.
#[derive(Debug, Clone, Default)]
pub struct ProcessQuery {
  pub state:       Option<ProcessState>,
  pub entity_kind: Option<EntityKind>,
  pub trd_id:      Option<Uuid>,
  /// At most this many rows, after skipping `offset`. Ignored by
  /// [`RetentionStore::count_processes`].
  pub limit:       Option<usize>,
  pub offset:      usize,
}

/// Filters for [`RetentionStore::list_alerts`].
#[derive(Debug, Clone, Default)]
pub struct AlertQuery {
  pub process_id: Option<Uuid>,
  pub status:     Option<AlertStatus>,
}

// ─── Unit of work ────────────────────────────────────────────────────────────

/// Everything one mutation of a process writes. Backends must apply it in a
/// single transaction, and only if the stored version still equals
/// `expected_version`; otherwise nothing is written and the call fails with
/// [`crate::Error::ConcurrencyConflict`].
#[derive(Debug, Clone)]
pub struct ProcessCommit {
  /// New image of the process, with `version == expected_version + 1`.
  pub process:          RetentionProcess,
  pub expected_version: u64,
  /// Appended to the history table.
  pub history:          Vec<HistoryEntry>,
  /// New alerts to insert.
  pub alerts:           Vec<RetentionAlert>,
  /// When set, every unacknowledged alert of the process is acknowledged
  /// with this record.
  pub acknowledge_open: Option<Acknowledgement>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over an Archiva persistence backend.
///
/// History is append-only and alerts are never deleted. Process rows are only
/// ever changed through [`RetentionStore::commit`].
///
/// Backend errors must convert into [`crate::Error`] keeping the typed
/// variants (`DuplicateProcess`, `ConcurrencyConflict`, ...) intact.
pub trait RetentionStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static + Into<crate::Error>;

  // ── Schedules ─────────────────────────────────────────────────────────

  /// Persist a TRD version. Fails if `(trd_id, version)` already exists.
  fn publish_schedule(
    &self,
    schedule: RetentionSchedule,
    published_at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_schedule(
    &self,
    trd: TrdRef,
  ) -> impl Future<Output = Result<Option<RetentionSchedule>, Self::Error>> + Send + '_;

  /// All published versions of one TRD.
  fn list_schedule_versions(
    &self,
    trd_id: Uuid,
  ) -> impl Future<Output = Result<Vec<RetentionSchedule>, Self::Error>> + Send + '_;

  // ── Processes ─────────────────────────────────────────────────────────

  /// Number of process codes issued with `prefix`.
  fn count_process_codes(
    &self,
    prefix: String,
  ) -> impl Future<Output = Result<u32, Self::Error>> + Send + '_;

  fn process_code_exists(
    &self,
    code: String,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Insert a new process and its creation entry.
  ///
  /// Fails with `DuplicateProcess` if the entity already has a non-terminal
  /// process and with `ProcessCodeTaken` if the code was issued concurrently.
  fn insert_process(
    &self,
    process: RetentionProcess,
    created: HistoryEntry,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_process(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<RetentionProcess>, Self::Error>> + Send + '_;

  /// The non-terminal process managing `entity`, if any.
  fn find_open_process(
    &self,
    entity: EntityRef,
  ) -> impl Future<Output = Result<Option<RetentionProcess>, Self::Error>> + Send + '_;

  /// Matching processes, oldest first.
  fn list_processes(
    &self,
    query: ProcessQuery,
  ) -> impl Future<Output = Result<Vec<RetentionProcess>, Self::Error>> + Send + '_;

  /// Number of processes matching the filters of `query`.
  fn count_processes(
    &self,
    query: ProcessQuery,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Ids of every non-terminal process, oldest first.
  fn open_process_ids(
    &self,
  ) -> impl Future<Output = Result<Vec<Uuid>, Self::Error>> + Send + '_;

  /// Apply a [`ProcessCommit`] atomically and return the stored process.
  fn commit(
    &self,
    commit: ProcessCommit,
  ) -> impl Future<Output = Result<RetentionProcess, Self::Error>> + Send + '_;

  // ── History ───────────────────────────────────────────────────────────

  /// History of a process, oldest first.
  fn list_history(
    &self,
    process_id: Uuid,
  ) -> impl Future<Output = Result<Vec<HistoryEntry>, Self::Error>> + Send + '_;

  // ── Alerts ────────────────────────────────────────────────────────────

  /// Matching alerts, oldest first.
  fn list_alerts(
    &self,
    query: AlertQuery,
  ) -> impl Future<Output = Result<Vec<RetentionAlert>, Self::Error>> + Send + '_;

  fn get_alert(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<RetentionAlert>, Self::Error>> + Send + '_;

  /// Store the read/acknowledged fields of `alert`, provided the stored alert
  /// is still in `expected` status.
  fn update_alert(
    &self,
    alert: RetentionAlert,
    expected: AlertStatus,
  ) -> impl Future<Output = Result<RetentionAlert, Self::Error>> + Send + '_;
}
