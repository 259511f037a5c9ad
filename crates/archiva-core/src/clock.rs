//! Injectable time source.

use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, NaiveDate, Utc};

pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;

  /// Calendar date of [`Clock::now`] in UTC; deadlines compare against this.
  fn today(&self) -> NaiveDate { self.now().date_naive() }
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> { Utc::now() }
}

/// A clock that only moves when told to. Used by tests and replays.
#[derive(Debug)]
pub struct FixedClock {
  at: RwLock<DateTime<Utc>>,
}

impl FixedClock {
  pub fn new(at: DateTime<Utc>) -> Self { Self { at: RwLock::new(at) } }

  /// Noon UTC on the given date.
  pub fn on(date: NaiveDate) -> Self {
    Self::new(date.and_hms_opt(12, 0, 0).unwrap_or_default().and_utc())
  }

  pub fn set(&self, at: DateTime<Utc>) {
    *self.at.write().unwrap_or_else(PoisonError::into_inner) = at;
  }

  pub fn set_date(&self, date: NaiveDate) {
    self.set(date.and_hms_opt(12, 0, 0).unwrap_or_default().and_utc());
  }

  pub fn advance(&self, by: Duration) {
    let mut at = self.at.write().unwrap_or_else(PoisonError::into_inner);
    *at += by;
  }
}

impl Clock for FixedClock {
  fn now(&self) -> DateTime<Utc> {
    *self.at.read().unwrap_or_else(PoisonError::into_inner)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fixed_clock_moves_only_when_told() {
    let clock = FixedClock::on(NaiveDate::from_ymd_opt(2025, 12, 20).unwrap());
    assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2025, 12, 20).unwrap());

    clock.advance(Duration::days(12));
    assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
  }
}
