//! Retention schedules (TRD — Tabla de Retención Documental) and the resolver
//! that turns a classification into retention parameters.
//!
//! A schedule version is immutable once published. Processes pin the version
//! they were resolved against, so editing a TRD means publishing a new version
//! that only applies to processes created afterwards.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, disposition::DispositionAction};

// ─── References ──────────────────────────────────────────────────────────────

/// A specific version of a TRD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrdRef {
  pub trd_id:  Uuid,
  pub version: u32,
}

/// The caller's classification of an entity. When `trd_version` is absent the
/// highest version in force on the day the process is opened is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
  pub trd_id:       Uuid,
  #[serde(default)]
  pub trd_version:  Option<u32>,
  pub series_id:    String,
  #[serde(default)]
  pub subseries_id: Option<String>,
}

// ─── Schedule ────────────────────────────────────────────────────────────────

/// One row of a TRD: retention periods for a series, or for a subseries when
/// `subseries_id` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
  pub series_id:         String,
  #[serde(default)]
  pub subseries_id:      Option<String>,
  pub management_years:  u32,
  pub central_years:     u32,
  pub final_disposition: DispositionAction,
  /// Overrides the engine-wide pre-alert lead time for this entry.
  #[serde(default)]
  pub pre_alert_days:    Option<u32>,
}

/// A published TRD version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionSchedule {
  pub trd_id:          Uuid,
  pub version:         u32,
  pub name:            String,
  pub effective_from:  NaiveDate,
  /// Exclusive end of validity; `None` while the version is current.
  #[serde(default)]
  pub effective_until: Option<NaiveDate>,
  pub entries:         Vec<ScheduleEntry>,
}

/// Parameters resolved for one classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionParameters {
  pub management_years:  u32,
  pub central_years:     u32,
  pub final_disposition: DispositionAction,
  pub pre_alert_days:    u32,
}

impl RetentionSchedule {
  pub fn trd_ref(&self) -> TrdRef {
    TrdRef { trd_id: self.trd_id, version: self.version }
  }

  pub fn is_effective_on(&self, date: NaiveDate) -> bool {
    self.effective_from <= date && self.effective_until.is_none_or(|until| date < until)
  }

  /// Reject schedules that could resolve ambiguously.
  pub fn validate(&self) -> Result<()> {
    if self.name.trim().is_empty() {
      return Err(Error::Validation("schedule name is required".into()));
    }
    if let Some(until) = self.effective_until
      && until <= self.effective_from
    {
      return Err(Error::Validation(format!(
        "schedule validity ends ({until}) before it starts ({})",
        self.effective_from
      )));
    }

    let mut seen = HashSet::new();
    for entry in &self.entries {
      if entry.series_id.trim().is_empty() {
        return Err(Error::Validation("schedule entry without series".into()));
      }
      if !seen.insert((entry.series_id.as_str(), entry.subseries_id.as_deref())) {
        return Err(Error::Validation(format!(
          "duplicate schedule entry for series {:?} subseries {:?}",
          entry.series_id, entry.subseries_id
        )));
      }
    }
    Ok(())
  }

  /// Resolve retention parameters for a classification as of `on`.
  ///
  /// A subseries-specific entry wins over the series-level entry. Fails with
  /// [`Error::ScheduleNotFound`] rather than defaulting when nothing matches
  /// or the version is not effective on `on`.
  pub fn resolve(
    &self,
    series_id: &str,
    subseries_id: Option<&str>,
    on: NaiveDate,
    default_pre_alert_days: u32,
  ) -> Result<RetentionParameters> {
    let not_found = || Error::ScheduleNotFound {
      trd_id:       self.trd_id,
      series_id:    series_id.to_owned(),
      subseries_id: subseries_id.map(str::to_owned),
    };

    if !self.is_effective_on(on) {
      return Err(not_found());
    }

    let lookup = |sub: Option<&str>| {
      self
        .entries
        .iter()
        .find(|e| e.series_id == series_id && e.subseries_id.as_deref() == sub)
    };

    let entry = subseries_id
      .and_then(|sub| lookup(Some(sub)))
      .or_else(|| lookup(None))
      .ok_or_else(not_found)?;

    Ok(RetentionParameters {
      management_years:  entry.management_years,
      central_years:     entry.central_years,
      final_disposition: entry.final_disposition,
      pre_alert_days:    entry.pre_alert_days.unwrap_or(default_pre_alert_days),
    })
  }
}

/// Pick the highest version effective on `on`.
pub fn select_effective(
  versions: &[RetentionSchedule],
  on: NaiveDate,
) -> Option<&RetentionSchedule> {
  versions
    .iter()
    .filter(|s| s.is_effective_on(on))
    .max_by_key(|s| s.version)
}
