//! Engine configuration.
//!
//! Passed explicitly to [`crate::engine::RetentionEngine::new`]; the engine
//! never reads ambient configuration.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{lifecycle::DispositionPolicy, process::NotificationChannel};

/// Default lead time, in days, between the pre-alert and the management
/// archive deadline when the TRD entry does not set one.
pub const DEFAULT_PRE_ALERT_DAYS: u32 = 30;

/// Default lead time, in days, for the "deferral ending" alert.
pub const DEFAULT_DEFERRAL_NOTICE_DAYS: u32 = 15;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  pub pre_alert_days:                  u32,
  pub deferral_notice_days:            u32,
  /// Channels assigned to newly created processes.
  pub channels:                        BTreeSet<NotificationChannel>,
  /// Only allow final disposition from `vencido`, not from `alerta_previa`.
  pub require_expired_for_disposition: bool,
  pub default_page_size:               usize,
  pub max_page_size:                   usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      pre_alert_days:                  DEFAULT_PRE_ALERT_DAYS,
      deferral_notice_days:            DEFAULT_DEFERRAL_NOTICE_DAYS,
      channels:                        BTreeSet::from([NotificationChannel::InApp]),
      require_expired_for_disposition: false,
      default_page_size:               25,
      max_page_size:                   100,
    }
  }
}

impl EngineConfig {
  pub fn disposition_policy(&self) -> DispositionPolicy {
    DispositionPolicy { require_expired: self.require_expired_for_disposition }
  }
}
