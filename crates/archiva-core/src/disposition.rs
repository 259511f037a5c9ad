//! Final disposition and the other explicit operations on a process.
//!
//! Each function here validates its preconditions against a snapshot of the
//! process and, only if all hold, returns an [`Outcome`]: the new image of the
//! process plus the history it produced. Nothing is mutated on failure, and
//! nothing is persisted here; the engine commits an outcome atomically.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  entity::Actor,
  history::{HistoryAction, HistoryEntry},
  lifecycle::{self, DispositionPolicy, Operation, Transition},
  process::{Deferral, DeletionBlock, ProcessState, RetentionProcess},
};

// ─── Actions ─────────────────────────────────────────────────────────────────

/// The irreversible final action applied to an expired record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DispositionAction {
  #[serde(rename = "conservacion_permanente")]
  Conservation,
  #[serde(rename = "eliminacion")]
  Elimination,
  #[serde(rename = "transferencia_historico")]
  HistoricalTransfer,
}

impl DispositionAction {
  pub const ALL: [Self; 3] = [Self::Conservation, Self::Elimination, Self::HistoricalTransfer];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Conservation => "conservacion_permanente",
      Self::Elimination => "eliminacion",
      Self::HistoricalTransfer => "transferencia_historico",
    }
  }

  /// The terminal state this action leaves the process in.
  pub fn terminal_state(self) -> ProcessState {
    match self {
      Self::Conservation => ProcessState::Conserved,
      Self::Elimination => ProcessState::Eliminated,
      Self::HistoricalTransfer => ProcessState::Transferred,
    }
  }

  /// Whether a deletion block forbids this action.
  pub fn is_destructive(self) -> bool { matches!(self, Self::Elimination) }
}

impl fmt::Display for DispositionAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for DispositionAction {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|a| a.as_str() == s)
      .ok_or_else(|| Error::Validation(format!("unknown disposition action: {s:?}")))
  }
}

// ─── Requests ────────────────────────────────────────────────────────────────

/// A user-approved request to finalise a process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispositionRequest {
  pub action:    DispositionAction,
  pub actor:     Actor,
  #[serde(default)]
  pub notes:     Option<String>,
  /// Must be explicitly `true`.
  #[serde(default)]
  pub confirmed: bool,
}

/// A request to put a process on hold until `ends_on`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeferralRequest {
  pub ends_on:   NaiveDate,
  pub reason:    String,
  pub actor:     Actor,
  #[serde(default)]
  pub confirmed: bool,
}

// ─── Outcome ─────────────────────────────────────────────────────────────────

/// The result of a successful operation, ready to be committed.
#[derive(Debug, Clone)]
pub struct Outcome {
  pub process:     RetentionProcess,
  pub history:     Vec<HistoryEntry>,
  /// Date-driven transitions made as part of the operation (reactivation and
  /// resumption re-evaluate dates). The alert engine reacts to these.
  pub transitions: Vec<Transition>,
}

impl Outcome {
  fn single(process: RetentionProcess, entry: HistoryEntry) -> Self {
    Self { process, history: vec![entry], transitions: Vec::new() }
  }
}

fn require_confirmation(confirmed: bool) -> Result<()> {
  if confirmed {
    Ok(())
  } else {
    Err(Error::Validation("the operation must be explicitly confirmed".into()))
  }
}

fn require_text(value: &str, what: &str) -> Result<String> {
  let trimmed = value.trim();
  if trimmed.is_empty() {
    Err(Error::Validation(format!("{what} is required")))
  } else {
    Ok(trimmed.to_owned())
  }
}

// ─── Disposition ─────────────────────────────────────────────────────────────

/// Apply the final disposition.
///
/// The process moves through `en_disposicion` straight into the terminal
/// state implied by the action. The caller acknowledges pending alerts and
/// reseals the record in the same commit.
pub fn execute(
  process: &RetentionProcess,
  request: &DispositionRequest,
  policy: DispositionPolicy,
  now: DateTime<Utc>,
) -> Result<Outcome> {
  require_confirmation(request.confirmed)?;
  if process.disposition_action.is_some() {
    return Err(Error::IllegalTransition {
      state:     process.state,
      operation: Operation::Dispose.verb(),
    });
  }
  lifecycle::ensure_permitted(process.state, Operation::Dispose, policy)?;

  if request.action.is_destructive()
    && let Some(block) = &process.deletion_block
  {
    return Err(Error::BlockedDeletion { reason: block.reason.clone() });
  }

  let before = process.state;
  // `en_disposicion` only exists inside this commit; it is never persisted.
  let mut next = process.clone();
  next.state = request.action.terminal_state();
  next.disposition_action = Some(request.action);
  next.disposed_at = Some(now);
  next.touch(&request.actor, now);

  let notes = if request.action == process.scheduled_disposition {
    request.notes.clone()
  } else {
    let scheduled = format!("scheduled action: {}", process.scheduled_disposition);
    Some(match &request.notes {
      Some(notes) => format!("{notes} ({scheduled})"),
      None => scheduled,
    })
  };

  let entry = HistoryEntry::new(
    process.process_id,
    HistoryAction::DispositionExecuted { action: request.action },
    &request.actor,
    now,
    (before, next.state),
  )
  .with_notes(notes);

  Ok(Outcome::single(next, entry))
}

// ─── Deferral ────────────────────────────────────────────────────────────────

/// Put disposition on hold until `request.ends_on`.
pub fn defer(
  process: &RetentionProcess,
  request: &DeferralRequest,
  now: DateTime<Utc>,
) -> Result<Outcome> {
  require_confirmation(request.confirmed)?;
  let reason = require_text(&request.reason, "a deferral reason")?;
  if request.ends_on <= now.date_naive() {
    return Err(Error::Validation(format!(
      "deferral end {} must be after {}",
      request.ends_on,
      now.date_naive()
    )));
  }
  lifecycle::ensure_permitted(process.state, Operation::Defer, DispositionPolicy::default())?;

  let before = process.state;
  let mut next = process.clone();
  next.state = ProcessState::Deferred;
  next.deferral = Some(Deferral {
    reason:      reason.clone(),
    started_at:  now,
    ends_on:     request.ends_on,
    deferred_by: request.actor.clone(),
  });
  next.touch(&request.actor, now);

  let entry = HistoryEntry::new(
    process.process_id,
    HistoryAction::Deferred { until: request.ends_on },
    &request.actor,
    now,
    (before, next.state),
  )
  .with_notes(Some(reason));

  Ok(Outcome::single(next, entry))
}

/// Lift a deferral and re-evaluate the dates as if the process were fresh.
pub fn reactivate(
  process: &RetentionProcess,
  actor: &Actor,
  now: DateTime<Utc>,
) -> Result<Outcome> {
  lifecycle::ensure_permitted(process.state, Operation::Reactivate, DispositionPolicy::default())?;
  if !process.is_deferred() {
    return Err(Error::IllegalTransition {
      state:     process.state,
      operation: Operation::Reactivate.verb(),
    });
  }

  let mut next = process.clone();
  next.deferral = None;
  next.state = ProcessState::Active;
  next.touch(actor, now);

  let mut history = vec![HistoryEntry::new(
    process.process_id,
    HistoryAction::Reactivated,
    actor,
    now,
    (process.state, ProcessState::Active),
  )];

  let transitions = lifecycle::evaluate(&next, now.date_naive());
  history.extend(lifecycle::apply(&mut next, &transitions, actor, now));

  Ok(Outcome { process: next, history, transitions })
}

// ─── Suspension ──────────────────────────────────────────────────────────────

/// Place an administrative hold on the process.
pub fn suspend(
  process: &RetentionProcess,
  reason: &str,
  actor: &Actor,
  now: DateTime<Utc>,
) -> Result<Outcome> {
  let reason = require_text(reason, "a suspension reason")?;
  lifecycle::ensure_permitted(process.state, Operation::Suspend, DispositionPolicy::default())?;

  let mut next = process.clone();
  next.state = ProcessState::Suspended;
  next.suspension_reason = Some(reason.clone());
  next.touch(actor, now);

  let entry = HistoryEntry::new(
    process.process_id,
    HistoryAction::Suspended,
    actor,
    now,
    (process.state, next.state),
  )
  .with_notes(Some(reason));

  Ok(Outcome::single(next, entry))
}

/// Lift an administrative hold. A still-deferred process returns to
/// `aplazado`; anything else is re-evaluated from `activo`.
pub fn resume(
  process: &RetentionProcess,
  actor: &Actor,
  now: DateTime<Utc>,
) -> Result<Outcome> {
  lifecycle::ensure_permitted(process.state, Operation::Resume, DispositionPolicy::default())?;

  let mut next = process.clone();
  next.suspension_reason = None;
  next.state = if next.is_deferred() {
    ProcessState::Deferred
  } else {
    ProcessState::Active
  };
  next.touch(actor, now);

  let mut history = vec![HistoryEntry::new(
    process.process_id,
    HistoryAction::Resumed,
    actor,
    now,
    (process.state, next.state),
  )];

  let transitions = lifecycle::evaluate(&next, now.date_naive());
  history.extend(lifecycle::apply(&mut next, &transitions, actor, now));

  Ok(Outcome { process: next, history, transitions })
}

// ─── Deletion block ──────────────────────────────────────────────────────────

/// Forbid the elimination outcome. Re-blocking replaces the reason.
pub fn block_deletion(
  process: &RetentionProcess,
  reason: &str,
  actor: &Actor,
  now: DateTime<Utc>,
) -> Result<Outcome> {
  let reason = require_text(reason, "a block reason")?;
  lifecycle::ensure_permitted(
    process.state,
    Operation::BlockDeletion,
    DispositionPolicy::default(),
  )?;

  let mut next = process.clone();
  next.deletion_block = Some(DeletionBlock {
    reason:     reason.clone(),
    blocked_by: actor.clone(),
    blocked_at: now,
  });
  next.touch(actor, now);

  let entry = HistoryEntry::new(
    process.process_id,
    HistoryAction::DeletionBlocked,
    actor,
    now,
    (process.state, process.state),
  )
  .with_notes(Some(reason));

  Ok(Outcome::single(next, entry))
}

/// Allow elimination again. Returns `None` when the process was not blocked.
pub fn unblock_deletion(
  process: &RetentionProcess,
  actor: &Actor,
  now: DateTime<Utc>,
) -> Result<Option<Outcome>> {
  lifecycle::ensure_permitted(
    process.state,
    Operation::UnblockDeletion,
    DispositionPolicy::default(),
  )?;
  if !process.is_deletion_blocked() {
    return Ok(None);
  }

  let mut next = process.clone();
  next.deletion_block = None;
  next.touch(actor, now);

  let entry = HistoryEntry::new(
    process.process_id,
    HistoryAction::DeletionUnblocked,
    actor,
    now,
    (process.state, process.state),
  );

  Ok(Some(Outcome::single(next, entry)))
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeSet;

  use chrono::TimeZone;
  use uuid::Uuid;

  use super::*;
  use crate::{
    entity::EntityRef,
    process::NewProcess,
    schedule::{Classification, RetentionParameters, TrdRef},
  };

  fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap()
  }

  fn clerk() -> Actor { Actor::new(Uuid::new_v4(), "Archivo Central") }

  fn process_in(state: ProcessState) -> RetentionProcess {
    let input = NewProcess {
      entity:            EntityRef::CaseFile(Uuid::new_v4()),
      classification:    Classification {
        trd_id:       Uuid::nil(),
        trd_version:  Some(1),
        series_id:    "300".into(),
        subseries_id: None,
      },
      entity_created_on: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
      actor:             clerk(),
    };
    let params = RetentionParameters {
      management_years:  2,
      central_years:     3,
      final_disposition: DispositionAction::Elimination,
      pre_alert_days:    30,
    };
    let mut p = RetentionProcess::open(
      "RP-2020-000001".into(),
      &input,
      TrdRef { trd_id: Uuid::nil(), version: 1 },
      &params,
      BTreeSet::new(),
      at(2020, 1, 1),
    )
    .unwrap();
    p.state = state;
    p
  }

  fn request(action: DispositionAction) -> DispositionRequest {
    DispositionRequest {
      action,
      actor: clerk(),
      notes: Some("acta 12/2024".into()),
      confirmed: true,
    }
  }

  #[test]
  fn each_action_lands_in_its_terminal_state() {
    for action in DispositionAction::ALL {
      let p = process_in(ProcessState::Expired);
      let out = execute(&p, &request(action), DispositionPolicy::default(), at(2024, 3, 1))
        .unwrap();
      assert_eq!(out.process.state, action.terminal_state());
      assert_eq!(out.process.disposition_action, Some(action));
      assert_eq!(out.history.len(), 1);
      assert_eq!(out.history[0].state_before, ProcessState::Expired);
      let notes = out.history[0].notes.as_deref().unwrap();
      assert!(notes.starts_with("acta 12/2024"));
      assert_eq!(notes.contains("scheduled action"), action != DispositionAction::Elimination);
    }
  }

  #[test]
  fn history_skips_the_transient_disposition_state() {
    let p = process_in(ProcessState::PreAlert);
    let out = execute(
      &p,
      &request(DispositionAction::HistoricalTransfer),
      DispositionPolicy::default(),
      at(2024, 3, 1),
    )
    .unwrap();
    let entry = &out.history[0];
    assert_eq!(
      (entry.state_before, entry.state_after),
      (ProcessState::PreAlert, ProcessState::Transferred)
    );
    assert_ne!(out.process.state, ProcessState::InDisposition);
  }

  #[test]
  fn recorded_disposition_is_never_replaced() {
    let mut p = process_in(ProcessState::Expired);
    p.disposition_action = Some(DispositionAction::Conservation);

    let err = execute(
      &p,
      &request(DispositionAction::Elimination),
      DispositionPolicy::default(),
      at(2024, 3, 1),
    )
    .unwrap_err();
    assert!(matches!(err, Error::IllegalTransition { state: ProcessState::Expired, .. }));
  }

  #[test]
  fn unconfirmed_disposition_is_rejected() {
    let p = process_in(ProcessState::Expired);
    let mut req = request(DispositionAction::Conservation);
    req.confirmed = false;
    let err = execute(&p, &req, DispositionPolicy::default(), at(2024, 3, 1)).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
  }

  #[test]
  fn active_process_cannot_be_disposed() {
    let p = process_in(ProcessState::Active);
    let err = execute(
      &p,
      &request(DispositionAction::Conservation),
      DispositionPolicy::default(),
      at(2024, 3, 1),
    )
    .unwrap_err();
    assert!(matches!(err, Error::IllegalTransition { state: ProcessState::Active, .. }));
  }

  #[test]
  fn blocked_elimination_reports_reason() {
    let p = process_in(ProcessState::Expired);
    let blocked = block_deletion(&p, "tutela 2023-118", &clerk(), at(2024, 2, 1))
      .unwrap()
      .process;

    let err = execute(
      &blocked,
      &request(DispositionAction::Elimination),
      DispositionPolicy::default(),
      at(2024, 3, 1),
    )
    .unwrap_err();
    assert!(matches!(err, Error::BlockedDeletion { ref reason } if reason == "tutela 2023-118"));

    // other outcomes stay available
    assert!(
      execute(
        &blocked,
        &request(DispositionAction::HistoricalTransfer),
        DispositionPolicy::default(),
        at(2024, 3, 1),
      )
      .is_ok()
    );
  }

  #[test]
  fn deferral_requires_future_end_and_reason() {
    let p = process_in(ProcessState::Expired);
    let mut req = DeferralRequest {
      ends_on:   NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
      reason:    "pending legal review".into(),
      actor:     clerk(),
      confirmed: true,
    };
    assert!(matches!(defer(&p, &req, at(2024, 3, 1)), Err(Error::Validation(_))));

    req.ends_on = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
    req.reason = "   ".into();
    assert!(matches!(defer(&p, &req, at(2024, 3, 1)), Err(Error::Validation(_))));

    req.reason = "pending legal review".into();
    let out = defer(&p, &req, at(2024, 3, 1)).unwrap();
    assert_eq!(out.process.state, ProcessState::Deferred);
    assert_eq!(out.process.deferral.as_ref().unwrap().ends_on, req.ends_on);
  }

  #[test]
  fn reactivation_re_evaluates_dates() {
    let p = process_in(ProcessState::Expired);
    let req = DeferralRequest {
      ends_on:   NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
      reason:    "pending legal review".into(),
      actor:     clerk(),
      confirmed: true,
    };
    let deferred = defer(&p, &req, at(2024, 3, 1)).unwrap().process;

    let out = reactivate(&deferred, &clerk(), at(2024, 6, 2)).unwrap();
    assert_eq!(out.process.state, ProcessState::Expired);
    assert!(out.process.deferral.is_none());
    let kinds: Vec<_> = out.history.iter().map(|h| h.action.discriminant()).collect();
    assert_eq!(kinds, vec!["reactivated", "state_advanced", "state_advanced"]);
  }

  #[test]
  fn reactivation_requires_deferral() {
    let p = process_in(ProcessState::Expired);
    assert!(matches!(
      reactivate(&p, &clerk(), at(2024, 6, 2)),
      Err(Error::IllegalTransition { .. })
    ));
  }

  #[test]
  fn resume_returns_to_deferral_when_still_deferred() {
    let p = process_in(ProcessState::Expired);
    let req = DeferralRequest {
      ends_on:   NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
      reason:    "pending legal review".into(),
      actor:     clerk(),
      confirmed: true,
    };
    let deferred = defer(&p, &req, at(2024, 3, 1)).unwrap().process;
    let suspended = suspend(&deferred, "audit", &clerk(), at(2024, 3, 2)).unwrap().process;
    assert_eq!(suspended.state, ProcessState::Suspended);

    let resumed = resume(&suspended, &clerk(), at(2024, 3, 3)).unwrap();
    assert_eq!(resumed.process.state, ProcessState::Deferred);
    assert!(resumed.transitions.is_empty());
  }

  #[test]
  fn unblocking_an_unblocked_process_is_a_no_op() {
    let p = process_in(ProcessState::Active);
    assert!(unblock_deletion(&p, &clerk(), at(2024, 1, 1)).unwrap().is_none());
  }

  #[test]
  fn terminal_records_cannot_be_blocked() {
    let p = process_in(ProcessState::Eliminated);
    assert!(matches!(
      block_deletion(&p, "late hold", &clerk(), at(2024, 1, 1)),
      Err(Error::IllegalTransition { .. })
    ));
  }
}
