//! The alert engine.
//!
//! Alerts are raised when a process crosses a threshold (pre-alert entry,
//! expiry) or when its deferral is about to end. Alerts are never deleted;
//! they move `pending → read → acknowledged`. Acknowledging an alert records
//! that a human has seen it and never changes the process.

use std::collections::BTreeSet;

use chrono::{DateTime, Days, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  entity::Actor,
  lifecycle::Transition,
  process::{NotificationChannel, ProcessState, RetentionProcess},
};

// ─── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
  PreAlert,
  Expired,
  DeferralEnding,
}

impl AlertKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::PreAlert => "pre_alert",
      Self::Expired => "expired",
      Self::DeferralEnding => "deferral_ending",
    }
  }
}

/// Urgency derived from the days left before (or past) a deadline.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
  Normal,
  Elevated,
  Critical,
}

impl AlertPriority {
  /// `> 30` days → normal, `<= 30` → elevated, `<= 7` or overdue → critical.
  pub fn from_days_remaining(days: i64) -> Self {
    if days <= 7 {
      Self::Critical
    } else if days <= 30 {
      Self::Elevated
    } else {
      Self::Normal
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Normal => "normal",
      Self::Elevated => "elevated",
      Self::Critical => "critical",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
  Pending,
  Read,
  Acknowledged,
}

/// Who acknowledged something, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgement {
  pub actor: Actor,
  pub notes: Option<String>,
  pub at:    DateTime<Utc>,
}

/// A notification event tied to one process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionAlert {
  pub alert_id:        Uuid,
  pub process_id:      Uuid,
  pub kind:            AlertKind,
  pub priority:        AlertPriority,
  pub message:         String,
  pub channels:        BTreeSet<NotificationChannel>,
  pub raised_at:       DateTime<Utc>,
  pub read_at:         Option<DateTime<Utc>>,
  pub acknowledgement: Option<Acknowledgement>,
}

impl RetentionAlert {
  pub fn status(&self) -> AlertStatus {
    if self.acknowledgement.is_some() {
      AlertStatus::Acknowledged
    } else if self.read_at.is_some() {
      AlertStatus::Read
    } else {
      AlertStatus::Pending
    }
  }

  /// `pending → read`. Reading an already-read or acknowledged alert keeps the
  /// first timestamp.
  pub fn mark_read(&mut self, at: DateTime<Utc>) {
    if self.read_at.is_none() {
      self.read_at = Some(at);
    }
  }

  /// `pending | read → acknowledged`.
  pub fn acknowledge(&mut self, ack: Acknowledgement) -> Result<()> {
    if self.acknowledgement.is_some() {
      return Err(Error::AlertAlreadyAcknowledged(self.alert_id));
    }
    self.read_at.get_or_insert(ack.at);
    self.acknowledgement = Some(ack);
    Ok(())
  }
}

// ─── Generation ──────────────────────────────────────────────────────────────

/// Decide whether `process` needs a new alert.
///
/// `crossed` holds the transitions the process just made; threshold alerts
/// are only raised for the last stage reached, and only when no
/// unacknowledged alert of that kind is already open. A deferral-ending alert
/// is raised at most once per deferral, once `today` is within
/// `deferral_notice_days` of its end.
pub fn generate_if_due(
  process: &RetentionProcess,
  crossed: &[Transition],
  existing: &[RetentionAlert],
  deferral_notice_days: u32,
  now: DateTime<Utc>,
) -> Option<RetentionAlert> {
  if !process.alerts_active {
    return None;
  }
  let today = now.date_naive();
  let deadlines = &process.deadlines;

  let (kind, days, message) = match crossed.last().map(|t| t.to) {
    Some(ProcessState::PreAlert) => {
      let days = process.days_until_expiry(today);
      (
        AlertKind::PreAlert,
        days,
        format!(
          "{} ({}) enters pre-alert: management archive retention ends on {} ({days} days)",
          process.process_code, process.entity, deadlines.management_expiry
        ),
      )
    }
    Some(ProcessState::Expired) => {
      let days = process.days_until_expiry(today);
      (
        AlertKind::Expired,
        days,
        format!(
          "{} ({}) expired on {}: final disposition {} is due",
          process.process_code,
          process.entity,
          deadlines.management_expiry,
          process.scheduled_disposition
        ),
      )
    }
    _ => {
      let deferral = process.deferral.as_ref()?;
      if process.state != ProcessState::Deferred {
        return None;
      }
      let notice_from = deferral
        .ends_on
        .checked_sub_days(Days::new(u64::from(deferral_notice_days)))?;
      if today < notice_from {
        return None;
      }
      let already_raised = existing.iter().any(|a| {
        a.kind == AlertKind::DeferralEnding && a.raised_at >= deferral.started_at
      });
      if already_raised {
        return None;
      }
      let days = (deferral.ends_on - today).num_days();
      (
        AlertKind::DeferralEnding,
        days,
        format!(
          "{} ({}) deferral ends on {} ({days} days): {}",
          process.process_code, process.entity, deferral.ends_on, deferral.reason
        ),
      )
    }
  };

  let open_of_kind = existing
    .iter()
    .any(|a| a.kind == kind && a.status() != AlertStatus::Acknowledged);
  if open_of_kind {
    return None;
  }

  Some(RetentionAlert {
    alert_id: Uuid::new_v4(),
    process_id: process.process_id,
    kind,
    priority: AlertPriority::from_days_remaining(days),
    message,
    channels: process.channels.clone(),
    raised_at: now,
    read_at: None,
    acknowledgement: None,
  })
}

#[cfg(test)]
mod tests {
  use chrono::{NaiveDate, TimeZone};

  use super::*;
  use crate::{
    disposition::{self, DeferralRequest, DispositionAction},
    entity::EntityRef,
    lifecycle,
    process::NewProcess,
    schedule::{Classification, RetentionParameters, TrdRef},
  };

  fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 2, 0, 0).unwrap()
  }

  fn process() -> RetentionProcess {
    let input = NewProcess {
      entity:            EntityRef::Document(Uuid::new_v4()),
      classification:    Classification {
        trd_id:       Uuid::nil(),
        trd_version:  Some(1),
        series_id:    "100".into(),
        subseries_id: None,
      },
      entity_created_on: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
      actor:             Actor::system(),
    };
    let params = RetentionParameters {
      management_years:  2,
      central_years:     3,
      final_disposition: DispositionAction::HistoricalTransfer,
      pre_alert_days:    30,
    };
    RetentionProcess::open(
      "RP-2024-000001".into(),
      &input,
      TrdRef { trd_id: Uuid::nil(), version: 1 },
      &params,
      BTreeSet::from([NotificationChannel::InApp]),
      at(2024, 1, 1),
    )
    .unwrap()
  }

  fn advance(p: &mut RetentionProcess, now: DateTime<Utc>) -> Vec<Transition> {
    let t = lifecycle::evaluate(p, now.date_naive());
    lifecycle::apply(p, &t, &Actor::system(), now);
    t
  }

  #[test]
  fn priority_thresholds() {
    assert_eq!(AlertPriority::from_days_remaining(31), AlertPriority::Normal);
    assert_eq!(AlertPriority::from_days_remaining(30), AlertPriority::Elevated);
    assert_eq!(AlertPriority::from_days_remaining(8), AlertPriority::Elevated);
    assert_eq!(AlertPriority::from_days_remaining(7), AlertPriority::Critical);
    assert_eq!(AlertPriority::from_days_remaining(-3), AlertPriority::Critical);
  }

  #[test]
  fn pre_alert_crossing_raises_one_alert() {
    let mut p = process();
    let now = at(2025, 12, 20);
    let crossed = advance(&mut p, now);

    let alert = generate_if_due(&p, &crossed, &[], 15, now).unwrap();
    assert_eq!(alert.kind, AlertKind::PreAlert);
    assert_eq!(alert.priority, AlertPriority::Elevated);
    assert_eq!(alert.status(), AlertStatus::Pending);

    // no crossing on the next run
    assert!(generate_if_due(&p, &[], &[alert], 15, now).is_none());
  }

  #[test]
  fn catch_up_only_alerts_final_stage() {
    let mut p = process();
    let now = at(2026, 2, 1);
    let crossed = advance(&mut p, now);
    assert_eq!(crossed.len(), 2);

    let alert = generate_if_due(&p, &crossed, &[], 15, now).unwrap();
    assert_eq!(alert.kind, AlertKind::Expired);
    assert_eq!(alert.priority, AlertPriority::Critical);
  }

  #[test]
  fn open_alert_of_same_kind_suppresses_new_one() {
    let mut p = process();
    let now = at(2026, 2, 1);
    let crossed = advance(&mut p, now);
    let first = generate_if_due(&p, &crossed, &[], 15, now).unwrap();

    assert!(generate_if_due(&p, &crossed, &[first.clone()], 15, now).is_none());

    let mut acked = first;
    acked
      .acknowledge(Acknowledgement { actor: Actor::system(), notes: None, at: now })
      .unwrap();
    assert!(generate_if_due(&p, &crossed, &[acked], 15, now).is_some());
  }

  #[test]
  fn muted_process_raises_nothing() {
    let mut p = process();
    p.alerts_active = false;
    let now = at(2026, 2, 1);
    let crossed = advance(&mut p, now);
    assert!(generate_if_due(&p, &crossed, &[], 15, now).is_none());
  }

  #[test]
  fn deferral_ending_is_raised_once_per_deferral() {
    let mut p = process();
    advance(&mut p, at(2026, 2, 1));
    let request = DeferralRequest {
      ends_on:   NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
      reason:    "pending legal review".into(),
      actor:     Actor::system(),
      confirmed: true,
    };
    let p = disposition::defer(&p, &request, at(2026, 2, 2)).unwrap().process;

    assert!(generate_if_due(&p, &[], &[], 15, at(2026, 5, 16)).is_none());

    let alert = generate_if_due(&p, &[], &[], 15, at(2026, 5, 17)).unwrap();
    assert_eq!(alert.kind, AlertKind::DeferralEnding);
    assert_eq!(alert.priority, AlertPriority::Elevated);

    let mut acked = alert;
    acked
      .acknowledge(Acknowledgement { actor: Actor::system(), notes: None, at: at(2026, 5, 18) })
      .unwrap();
    assert!(generate_if_due(&p, &[], &[acked], 15, at(2026, 5, 20)).is_none());
  }

  #[test]
  fn acknowledging_twice_fails() {
    let mut p = process();
    let now = at(2025, 12, 20);
    let crossed = advance(&mut p, now);
    let mut alert = generate_if_due(&p, &crossed, &[], 15, now).unwrap();

    alert.mark_read(now);
    assert_eq!(alert.status(), AlertStatus::Read);
    let ack = Acknowledgement { actor: Actor::system(), notes: Some("seen".into()), at: now };
    alert.acknowledge(ack.clone()).unwrap();
    assert_eq!(alert.status(), AlertStatus::Acknowledged);
    assert!(matches!(alert.acknowledge(ack), Err(Error::AlertAlreadyAcknowledged(_))));
  }
}
