//! The lifecycle state machine.
//!
//! Pure transition logic: given a process and the current date, decide which
//! date-driven transitions are due and which explicit operations the current
//! state permits. Nothing here touches storage.
//!
//! Automatic advancement only ever walks `activo → alerta_previa → vencido`.
//! Everything past `vencido`, and every side branch, requires an explicit
//! operation.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  disposition::DispositionAction,
  entity::Actor,
  history::{HistoryAction, HistoryEntry},
  process::{Deadlines, ProcessState, RetentionProcess},
};

// ─── Date-driven transitions ─────────────────────────────────────────────────

/// A single step of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
  pub from: ProcessState,
  pub to:   ProcessState,
}

/// The stage the calendar alone puts a process in. Boundaries are inclusive
/// on the more advanced side, so `today == management_expiry` is `vencido`
/// even when it is also the pre-alert date.
pub fn stage_for(deadlines: &Deadlines, today: NaiveDate) -> ProcessState {
  if today >= deadlines.management_expiry {
    ProcessState::Expired
  } else if today >= deadlines.pre_alert_date {
    ProcessState::PreAlert
  } else {
    ProcessState::Active
  }
}

fn stage_rank(state: ProcessState) -> Option<u8> {
  match state {
    ProcessState::Active => Some(0),
    ProcessState::PreAlert => Some(1),
    ProcessState::Expired => Some(2),
    _ => None,
  }
}

const STAGES: [ProcessState; 3] =
  [ProcessState::Active, ProcessState::PreAlert, ProcessState::Expired];

/// Transitions due for `process` on `today`, in order.
///
/// A catch-up that skips a stage still yields every structural step, so a
/// process whose pre-alert window has zero length passes through
/// `alerta_previa` on its way to `vencido`. Deferred, suspended and terminal
/// processes never advance, and a stage is never left backwards.
pub fn evaluate(process: &RetentionProcess, today: NaiveDate) -> Vec<Transition> {
  let Some(current) = stage_rank(process.state) else {
    return Vec::new();
  };
  let Some(target) = stage_rank(stage_for(&process.deadlines, today)) else {
    return Vec::new();
  };

  (current..target)
    .map(|rank| Transition {
      from: STAGES[usize::from(rank)],
      to:   STAGES[usize::from(rank) + 1],
    })
    .collect()
}

/// Apply `transitions` to `process`, returning one history entry per step.
pub fn apply(
  process: &mut RetentionProcess,
  transitions: &[Transition],
  actor: &Actor,
  now: DateTime<Utc>,
) -> Vec<HistoryEntry> {
  let entries = transitions
    .iter()
    .map(|t| {
      HistoryEntry::new(
        process.process_id,
        HistoryAction::StateAdvanced,
        actor,
        now,
        (t.from, t.to),
      )
    })
    .collect::<Vec<_>>();

  if let Some(last) = transitions.last() {
    process.state = last.to;
    process.touch(actor, now);
  }
  entries
}

// ─── Explicit operations ─────────────────────────────────────────────────────

/// Tunable rules for which states permit disposition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispositionPolicy {
  /// When set, disposition requires `vencido`; otherwise `alerta_previa` is
  /// accepted too.
  pub require_expired: bool,
}

/// An explicit, user-initiated operation on a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
  Dispose,
  Defer,
  Reactivate,
  Suspend,
  Resume,
  BlockDeletion,
  UnblockDeletion,
}

impl Operation {
  pub fn verb(self) -> &'static str {
    match self {
      Self::Dispose => "dispose of",
      Self::Defer => "defer",
      Self::Reactivate => "reactivate",
      Self::Suspend => "suspend",
      Self::Resume => "resume",
      Self::BlockDeletion => "block deletion of",
      Self::UnblockDeletion => "unblock deletion of",
    }
  }
}

/// Whether `state` permits `op`.
pub fn permits(state: ProcessState, op: Operation, policy: DispositionPolicy) -> bool {
  use ProcessState as S;

  if state.is_terminal() || state == S::InDisposition {
    return false;
  }
  match op {
    Operation::Dispose if policy.require_expired => state == S::Expired,
    Operation::Dispose | Operation::Defer => matches!(state, S::PreAlert | S::Expired),
    Operation::Reactivate => state == S::Deferred,
    Operation::Suspend => state != S::Suspended,
    Operation::Resume => state == S::Suspended,
    Operation::BlockDeletion | Operation::UnblockDeletion => true,
  }
}

/// Fail with [`Error::IllegalTransition`] unless `state` permits `op`.
pub fn ensure_permitted(
  state: ProcessState,
  op: Operation,
  policy: DispositionPolicy,
) -> Result<()> {
  if permits(state, op, policy) {
    Ok(())
  } else {
    Err(Error::IllegalTransition { state, operation: op.verb() })
  }
}

/// An action a caller could offer for a process right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", content = "action", rename_all = "snake_case")]
pub enum AvailableAction {
  Dispose(DispositionAction),
  Defer,
  Reactivate,
  Suspend,
  Resume,
  BlockDeletion,
  UnblockDeletion,
}

/// Everything the current state and flags permit, in a stable order.
pub fn available_actions(
  process: &RetentionProcess,
  policy: DispositionPolicy,
) -> Vec<AvailableAction> {
  let state = process.state;
  let mut actions = Vec::new();

  if permits(state, Operation::Dispose, policy) {
    actions.extend(
      DispositionAction::ALL
        .into_iter()
        .filter(|a| !(a.is_destructive() && process.is_deletion_blocked()))
        .map(AvailableAction::Dispose),
    );
  }
  if permits(state, Operation::Defer, policy) && !process.is_deferred() {
    actions.push(AvailableAction::Defer);
  }
  if permits(state, Operation::Reactivate, policy) {
    actions.push(AvailableAction::Reactivate);
  }
  if permits(state, Operation::Suspend, policy) {
    actions.push(AvailableAction::Suspend);
  }
  if permits(state, Operation::Resume, policy) {
    actions.push(AvailableAction::Resume);
  }
  if permits(state, Operation::BlockDeletion, policy) {
    actions.push(if process.is_deletion_blocked() {
      AvailableAction::UnblockDeletion
    } else {
      AvailableAction::BlockDeletion
    });
  }
  actions
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

  fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
  }

  fn process(lead: u32) -> RetentionProcess {
    let input = NewProcess {
      entity:            EntityRef::Document(Uuid::new_v4()),
      classification:    Classification {
        trd_id:       Uuid::nil(),
        trd_version:  Some(1),
        series_id:    "100".into(),
        subseries_id: None,
      },
      entity_created_on: date(2024, 1, 1),
      actor:             Actor::system(),
    };
    let params = RetentionParameters {
      management_years:  2,
      central_years:     3,
      final_disposition: DispositionAction::Conservation,
      pre_alert_days:    lead,
    };
    RetentionProcess::open(
      "RP-2024-000001".into(),
      &input,
      TrdRef { trd_id: Uuid::nil(), version: 1 },
      &params,
      BTreeSet::new(),
      Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    )
    .unwrap()
  }

  fn states(transitions: &[Transition]) -> Vec<ProcessState> {
    transitions.iter().map(|t| t.to).collect()
  }

  #[test]
  fn nothing_due_before_pre_alert() {
    assert!(evaluate(&process(30), date(2025, 12, 1)).is_empty());
  }

  #[test]
  fn pre_alert_boundary_is_inclusive() {
    let t = evaluate(&process(30), date(2025, 12, 2));
    assert_eq!(states(&t), vec![ProcessState::PreAlert]);
  }

  #[test]
  fn expiry_boundary_wins_over_pre_alert() {
    let t = evaluate(&process(30), date(2026, 1, 1));
    assert_eq!(states(&t), vec![ProcessState::PreAlert, ProcessState::Expired]);
  }

  #[test]
  fn zero_lead_time_still_records_pre_alert_step() {
    let p = process(0);
    assert_eq!(p.deadlines.pre_alert_date, p.deadlines.management_expiry);
    assert!(evaluate(&p, date(2025, 12, 31)).is_empty());
    let t = evaluate(&p, date(2026, 1, 1));
    assert_eq!(states(&t), vec![ProcessState::PreAlert, ProcessState::Expired]);
  }

  #[test]
  fn apply_moves_state_and_writes_history() {
    let mut p = process(30);
    let t = evaluate(&p, date(2026, 3, 1));
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap();
    let entries = apply(&mut p, &t, &Actor::system(), now);

    assert_eq!(p.state, ProcessState::Expired);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].state_before, ProcessState::Active);
    assert_eq!(entries[1].state_after, ProcessState::Expired);
    assert!(evaluate(&p, date(2026, 3, 1)).is_empty());
  }

  #[test]
  fn no_regression_when_clock_goes_back() {
    let mut p = process(30);
    p.state = ProcessState::Expired;
    assert!(evaluate(&p, date(2024, 6, 1)).is_empty());
  }

  #[test]
  fn deferred_and_suspended_never_advance() {
    for state in [ProcessState::Deferred, ProcessState::Suspended, ProcessState::Conserved] {
      let mut p = process(30);
      p.state = state;
      assert!(evaluate(&p, date(2030, 1, 1)).is_empty());
    }
  }

  #[test]
  fn disposition_policy() {
    let lax = DispositionPolicy::default();
    let strict = DispositionPolicy { require_expired: true };

    assert!(permits(ProcessState::PreAlert, Operation::Dispose, lax));
    assert!(!permits(ProcessState::PreAlert, Operation::Dispose, strict));
    assert!(permits(ProcessState::Expired, Operation::Dispose, strict));
    assert!(!permits(ProcessState::Active, Operation::Dispose, lax));
    assert!(!permits(ProcessState::Deferred, Operation::Dispose, lax));
  }

  #[test]
  fn terminal_states_permit_nothing() {
    let ops = [
      Operation::Dispose,
      Operation::Defer,
      Operation::Reactivate,
      Operation::Suspend,
      Operation::Resume,
      Operation::BlockDeletion,
      Operation::UnblockDeletion,
    ];
    for state in [ProcessState::Transferred, ProcessState::Eliminated, ProcessState::Conserved] {
      for op in ops {
        assert!(!permits(state, op, DispositionPolicy::default()));
      }
    }
    let err = ensure_permitted(ProcessState::Conserved, Operation::Dispose, Default::default())
      .unwrap_err();
    assert!(matches!(err, Error::IllegalTransition { state: ProcessState::Conserved, .. }));
  }

  #[test]
  fn blocked_process_does_not_offer_elimination() {
    let mut p = process(30);
    p.state = ProcessState::Expired;
    p.deletion_block = Some(crate::process::DeletionBlock {
      reason:     "litigation".into(),
      blocked_by: Actor::system(),
      blocked_at: Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap(),
    });

    let actions = available_actions(&p, DispositionPolicy::default());
    assert!(!actions.contains(&AvailableAction::Dispose(DispositionAction::Elimination)));
    assert!(actions.contains(&AvailableAction::Dispose(DispositionAction::Conservation)));
    assert!(actions.contains(&AvailableAction::UnblockDeletion));
    assert!(actions.contains(&AvailableAction::Defer));
  }
}
