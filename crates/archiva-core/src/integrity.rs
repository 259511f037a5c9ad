//! Tamper evidence for retention processes.
//!
//! The seal is a SHA-256 digest over a canonical JSON rendering of the fields
//! that must never change after creation (identity, classification, computed
//! dates) plus the final disposition action once set. Mutable bookkeeping
//! (state, flags, timestamps, version) is excluded, so ordinary lifecycle
//! changes never disturb the seal. The state is checked against the sealed
//! action instead: a process is terminal exactly when an action is recorded.

use chrono::NaiveDate;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
  Error, Result,
  disposition::DispositionAction,
  entity::EntityRef,
  process::{Deadlines, RetentionProcess},
  schedule::TrdRef,
};

/// Domain separator mixed into every digest.
const SEAL_DOMAIN: &[u8] = b"archiva.retention-process.v1\0";

/// Field order here is the canonical order; serde emits struct fields in
/// declaration order.
#[derive(Serialize)]
struct SealedFields<'a> {
  process_id:            Uuid,
  process_code:          &'a str,
  entity:                EntityRef,
  schedule:              TrdRef,
  series_id:             &'a str,
  subseries_id:          Option<&'a str>,
  entity_created_on:     NaiveDate,
  management_years:      u32,
  central_years:         u32,
  scheduled_disposition: DispositionAction,
  deadlines:             Deadlines,
  disposition_action:    Option<DispositionAction>,
}

impl<'a> From<&'a RetentionProcess> for SealedFields<'a> {
  fn from(p: &'a RetentionProcess) -> Self {
    Self {
      process_id:            p.process_id,
      process_code:          &p.process_code,
      entity:                p.entity,
      schedule:              p.schedule,
      series_id:             &p.series_id,
      subseries_id:          p.subseries_id.as_deref(),
      entity_created_on:     p.entity_created_on,
      management_years:      p.management_years,
      central_years:         p.central_years,
      scheduled_disposition: p.scheduled_disposition,
      deadlines:             p.deadlines,
      disposition_action:    p.disposition_action,
    }
  }
}

/// Compute the seal for `process` as lowercase hex.
pub fn seal(process: &RetentionProcess) -> Result<String> {
  let canonical = serde_json::to_vec(&SealedFields::from(process))?;

  let mut hasher = Sha256::new();
  hasher.update(SEAL_DOMAIN);
  hasher.update(&canonical);
  Ok(hex::encode(hasher.finalize()))
}

fn disposition_consistent(process: &RetentionProcess) -> bool {
  process.disposition_action.is_some() == process.state.is_terminal()
}

/// Recompute and compare against the stored hash. A record whose state
/// disagrees with its sealed disposition fails too.
pub fn verify(process: &RetentionProcess) -> Result<bool> {
  Ok(disposition_consistent(process) && seal(process)? == process.integrity_hash)
}

/// Like [`verify`], but a failure is an [`Error::IntegrityMismatch`] or an
/// [`Error::InconsistentDisposition`].
pub fn ensure_intact(process: &RetentionProcess) -> Result<()> {
  if !disposition_consistent(process) {
    return Err(Error::InconsistentDisposition {
      process_id: process.process_id,
      state:      process.state,
    });
  }
  let computed = seal(process)?;
  if computed == process.integrity_hash {
    Ok(())
  } else {
    Err(Error::IntegrityMismatch {
      process_id: process.process_id,
      stored:     process.integrity_hash.clone(),
      computed,
    })
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeSet;

  use chrono::{Days, TimeZone, Utc};

  use super::*;
  use crate::{
    entity::Actor,
    process::{NewProcess, ProcessState},
    schedule::{Classification, RetentionParameters},
  };

  fn process() -> RetentionProcess {
    let input = NewProcess {
      entity:            EntityRef::Document(Uuid::new_v4()),
      classification:    Classification {
        trd_id:       Uuid::nil(),
        trd_version:  Some(3),
        series_id:    "100".into(),
        subseries_id: Some("100.2".into()),
      },
      entity_created_on: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
      actor:             Actor::system(),
    };
    let params = RetentionParameters {
      management_years:  2,
      central_years:     3,
      final_disposition: DispositionAction::Conservation,
      pre_alert_days:    30,
    };
    RetentionProcess::open(
      "RP-2024-000009".into(),
      &input,
      TrdRef { trd_id: Uuid::nil(), version: 3 },
      &params,
      BTreeSet::new(),
      Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    )
    .unwrap()
  }

  #[test]
  fn freshly_opened_process_verifies() {
    let p = process();
    assert_eq!(p.integrity_hash.len(), 64);
    assert!(verify(&p).unwrap());
  }

  #[test]
  fn bookkeeping_changes_keep_the_seal() {
    let mut p = process();
    p.state = ProcessState::Suspended;
    p.updated_at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    p.version = 7;
    p.alerts_active = false;
    assert!(verify(&p).unwrap());
  }

  #[test]
  fn editing_a_deadline_breaks_the_seal() {
    let mut p = process();
    p.deadlines.management_expiry = p
      .deadlines
      .management_expiry
      .checked_add_days(Days::new(365))
      .unwrap();
    assert!(!verify(&p).unwrap());
    assert!(matches!(ensure_intact(&p), Err(Error::IntegrityMismatch { .. })));
  }

  #[test]
  fn disposition_action_is_covered_once_set() {
    let mut p = process();
    p.state = ProcessState::Conserved;
    p.disposition_action = Some(DispositionAction::Conservation);
    assert!(!verify(&p).unwrap());
    p.integrity_hash = seal(&p).unwrap();
    assert!(verify(&p).unwrap());

    p.disposition_action = Some(DispositionAction::Elimination);
    assert!(!verify(&p).unwrap());
  }

  #[test]
  fn state_must_agree_with_recorded_disposition() {
    let mut p = process();
    p.state = ProcessState::Conserved;
    p.disposition_action = Some(DispositionAction::Conservation);
    p.integrity_hash = seal(&p).unwrap();

    p.state = ProcessState::Expired;
    assert!(!verify(&p).unwrap());
    assert!(matches!(
      ensure_intact(&p),
      Err(Error::InconsistentDisposition { state: ProcessState::Expired, .. })
    ));

    let mut open = process();
    open.state = ProcessState::Eliminated;
    assert!(!verify(&open).unwrap());
  }
}
