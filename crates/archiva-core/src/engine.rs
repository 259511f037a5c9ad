//! [`RetentionEngine`] — the operations the host application calls.
//!
//! The engine loads a snapshot of a process, runs the pure rules from
//! [`crate::lifecycle`], [`crate::disposition`] and [`crate::alert`] against
//! it, and hands the result to the store as one [`ProcessCommit`]. The commit
//! is a compare-and-swap on the process version, so a user action and the
//! batch sweep racing on the same record can never both win.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
  Error, Result,
  alert::{self, Acknowledgement, AlertStatus, RetentionAlert},
  clock::Clock,
  config::EngineConfig,
  disposition::{self, DeferralRequest, DispositionRequest, Outcome},
  entity::{Actor, EntityRef},
  history::{HistoryAction, HistoryEntry},
  integrity,
  lifecycle::{self, Transition},
  process::{
    NewProcess, ProcessState, RetentionProcess, format_process_code,
    process_code_prefix, process_code_year,
  },
  schedule::{self, Classification, RetentionParameters, RetentionSchedule, TrdRef},
  store::{AlertQuery, ProcessCommit, ProcessQuery, RetentionStore},
  view::{Page, ProcessDetail, ProcessFilter, ProcessSummary},
};

/// How many freshly allocated codes to try before giving up when concurrent
/// creators keep taking them.
const CODE_ATTEMPTS: usize = 5;

// ─── Reports ─────────────────────────────────────────────────────────────────

/// Result of [`RetentionEngine::run_batch_evaluation`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
  /// Open processes visited.
  pub evaluated:        usize,
  /// Processes for which something was written.
  pub updated_count:    usize,
  pub alerts_generated: usize,
  /// Records skipped because another writer got there first.
  pub conflicts:        usize,
  /// Records whose evaluation failed, including integrity mismatches.
  pub failures:         usize,
}

/// One entity the backfill could not register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillFailure {
  pub entity: EntityRef,
  pub error:  String,
}

/// Result of [`RetentionEngine::backfill`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackfillReport {
  pub created:    usize,
  /// Entities that already had an open process.
  pub duplicates: usize,
  pub failures:   Vec<BackfillFailure>,
}

/// A stored process brought up to the calendar in memory.
struct Current {
  stored:      RetentionProcess,
  process:     RetentionProcess,
  /// Date-driven steps due since the last write, not yet persisted.
  transitions: Vec<Transition>,
  history:     Vec<HistoryEntry>,
}

impl Current {
  fn catch_up(stored: RetentionProcess, now: DateTime<Utc>) -> Self {
    let transitions = lifecycle::evaluate(&stored, now.date_naive());
    let mut process = stored.clone();
    let history = lifecycle::apply(&mut process, &transitions, &Actor::system(), now);
    Self { stored, process, transitions, history }
  }

  /// An outcome that only persists the catch-up.
  fn unchanged(&self) -> Outcome {
    Outcome { process: self.process.clone(), history: Vec::new(), transitions: Vec::new() }
  }
}

fn log_advanced(code: &str, transitions: &[Transition]) {
  for t in transitions {
    info!(process = %code, from = %t.from, to = %t.to, "state advanced");
  }
}

/// What a single evaluation did.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
  pub written:     bool,
  pub transitions: Vec<Transition>,
  pub alert:       Option<RetentionAlert>,
}

// ─── Error plumbing ──────────────────────────────────────────────────────────

trait IntoCore<T> {
  fn core(self) -> Result<T>;
}

impl<T, E: Into<Error>> IntoCore<T> for std::result::Result<T, E> {
  fn core(self) -> Result<T> { self.map_err(Into::into) }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

pub struct RetentionEngine<S> {
  store:  S,
  clock:  Arc<dyn Clock>,
  config: EngineConfig,
}

impl<S: RetentionStore> RetentionEngine<S> {
  pub fn new(store: S, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
    Self { store, clock, config }
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn config(&self) -> &EngineConfig { &self.config }

  // ── Schedules ─────────────────────────────────────────────────────────

  /// Validate and publish a TRD version.
  pub async fn publish_schedule(&self, schedule: RetentionSchedule) -> Result<TrdRef> {
    schedule.validate()?;
    let trd = schedule.trd_ref();
    let entries = schedule.entries.len();
    self.store.publish_schedule(schedule, self.clock.now()).await.core()?;
    info!(trd_id = %trd.trd_id, version = trd.version, entries, "published retention schedule");
    Ok(trd)
  }

  /// Resolve a classification against the TRD version in force on `on`, or
  /// the explicitly requested one.
  async fn resolve(
    &self,
    classification: &Classification,
    on: NaiveDate,
  ) -> Result<(TrdRef, RetentionParameters)> {
    let not_found = || Error::ScheduleNotFound {
      trd_id:       classification.trd_id,
      series_id:    classification.series_id.clone(),
      subseries_id: classification.subseries_id.clone(),
    };

    let schedule = match classification.trd_version {
      Some(version) => self
        .store
        .get_schedule(TrdRef { trd_id: classification.trd_id, version })
        .await
        .core()?
        .ok_or_else(not_found)?,
      None => {
        let versions = self
          .store
          .list_schedule_versions(classification.trd_id)
          .await
          .core()?;
        schedule::select_effective(&versions, on)
          .cloned()
          .ok_or_else(not_found)?
      }
    };

    let params = schedule.resolve(
      &classification.series_id,
      classification.subseries_id.as_deref(),
      on,
      self.config.pre_alert_days,
    )?;
    Ok((schedule.trd_ref(), params))
  }

  // ── Creation ──────────────────────────────────────────────────────────

  /// Register an entity for retention management.
  ///
  /// The schedule must be in force today; its version is pinned into the
  /// process so later TRD versions never alter it.
  pub async fn create_process(&self, input: NewProcess) -> Result<RetentionProcess> {
    let now = self.clock.now();
    let today = now.date_naive();

    if input.entity_created_on > today {
      return Err(Error::Validation(format!(
        "entity creation date {} is in the future",
        input.entity_created_on
      )));
    }
    if let Some(existing) = self.store.find_open_process(input.entity).await.core()? {
      return Err(Error::DuplicateProcess {
        existing_id:   existing.process_id,
        existing_code: existing.process_code,
      });
    }

    let (trd, params) = self.resolve(&input.classification, today).await?;
    let year = process_code_year(now);

    let mut last_code = String::new();
    for _ in 0..CODE_ATTEMPTS {
      let code = self.next_process_code(year).await?;
      let process = RetentionProcess::open(
        code,
        &input,
        trd,
        &params,
        self.config.channels.clone(),
        now,
      )?;
      let created = HistoryEntry::new(
        process.process_id,
        HistoryAction::Created,
        &input.actor,
        now,
        (ProcessState::Active, ProcessState::Active),
      );

      match self.store.insert_process(process.clone(), created).await.core() {
        Ok(()) => {
          info!(
            process = %process.process_code,
            entity = %process.entity,
            trd_id = %trd.trd_id,
            trd_version = trd.version,
            management_expiry = %process.deadlines.management_expiry,
            "retention process created"
          );
          return Ok(process);
        }
        Err(Error::ProcessCodeTaken(taken)) => {
          debug!(code = %taken, "process code taken concurrently, allocating another");
          last_code = taken;
        }
        Err(e) => return Err(e),
      }
    }
    Err(Error::ProcessCodeTaken(last_code))
  }

  async fn next_process_code(&self, year: i32) -> Result<String> {
    let issued = self
      .store
      .count_process_codes(process_code_prefix(year))
      .await
      .core()?;

    let mut sequence = issued.saturating_add(1);
    loop {
      let code = format_process_code(year, sequence);
      if !self.store.process_code_exists(code.clone()).await.core()? {
        return Ok(code);
      }
      sequence = sequence.saturating_add(1);
    }
  }

  /// Retroactively register a batch of entities. Each entity is independent:
  /// duplicates and failures are counted, never fatal to the batch.
  pub async fn backfill(&self, inputs: Vec<NewProcess>) -> BackfillReport {
    let mut report = BackfillReport::default();

    for input in inputs {
      let entity = input.entity;
      match self.create_process(input).await {
        Ok(_) => report.created += 1,
        Err(Error::DuplicateProcess { existing_code, .. }) => {
          debug!(%entity, existing = %existing_code, "entity already managed, skipping");
          report.duplicates += 1;
        }
        Err(e) => {
          warn!(%entity, error = %e, "backfill failed for entity");
          report.failures.push(BackfillFailure { entity, error: e.to_string() });
        }
      }
    }

    info!(
      created = report.created,
      duplicates = report.duplicates,
      failures = report.failures.len(),
      "backfill finished"
    );
    report
  }

  // ── Reads ─────────────────────────────────────────────────────────────

  async fn load(&self, id: Uuid) -> Result<RetentionProcess> {
    self
      .store
      .get_process(id)
      .await
      .core()?
      .ok_or(Error::ProcessNotFound(id))
  }

  /// Load a process and refuse to go on if it fails its integrity check.
  async fn load_trusted(&self, id: Uuid) -> Result<RetentionProcess> {
    let process = self.load(id).await?;
    if let Err(e) = integrity::ensure_intact(&process) {
      error!(process = %process.process_code, error = %e, "record is untrusted");
      return Err(e);
    }
    Ok(process)
  }

  /// Load a trusted process and advance it to `now` in memory. Every
  /// operation works on this image so an overdue record behaves as overdue
  /// whether or not the sweep has visited it.
  async fn load_current(&self, id: Uuid, now: DateTime<Utc>) -> Result<Current> {
    let stored = self.load_trusted(id).await?;
    Ok(Current::catch_up(stored, now))
  }

  /// A process as of today. Date-driven steps the sweep has not written yet
  /// are reflected in the state and actions but not persisted.
  pub async fn get_process(&self, id: Uuid) -> Result<ProcessDetail> {
    let stored = self.load(id).await?;
    let now = self.clock.now();
    let today = now.date_naive();

    let integrity_verified = integrity::verify(&stored)?;
    let process = if integrity_verified {
      Current::catch_up(stored, now).process
    } else {
      error!(process = %stored.process_code, "integrity check failed, record is untrusted");
      stored
    };

    let available_actions = if integrity_verified {
      lifecycle::available_actions(&process, self.config.disposition_policy())
    } else {
      Vec::new()
    };
    let alerts = self
      .store
      .list_alerts(AlertQuery { process_id: Some(id), status: None })
      .await
      .core()?;
    let history = self.store.list_history(id).await.core()?;

    Ok(ProcessDetail {
      days_until_expiry: process.days_until_expiry(today),
      is_overdue: process.is_overdue(today),
      priority: crate::view::urgency(&process, today),
      available_actions,
      integrity_verified,
      alerts,
      history,
      process,
    })
  }

  pub async fn list_processes(&self, filter: ProcessFilter) -> Result<Page<ProcessSummary>> {
    let today = self.clock.today();
    let per_page = filter
      .per_page
      .unwrap_or(self.config.default_page_size)
      .clamp(1, self.config.max_page_size.max(1));
    let page = filter.page.unwrap_or(1).max(1);
    let offset = (page - 1).saturating_mul(per_page);
    let query = ProcessQuery {
      state: filter.state,
      entity_kind: filter.entity_type,
      trd_id: filter.trd_id,
      ..ProcessQuery::default()
    };

    // Priority depends on today, so it can only be filtered after loading.
    let Some(wanted) = filter.priority else {
      let total = self.store.count_processes(query.clone()).await.core()?;
      let processes = self
        .store
        .list_processes(ProcessQuery { limit: Some(per_page), offset, ..query })
        .await
        .core()?;
      let items = processes.iter().map(|p| ProcessSummary::new(p, today)).collect();
      return Ok(Page { items, total, page, per_page });
    };

    let matching: Vec<ProcessSummary> = self
      .store
      .list_processes(query)
      .await
      .core()?
      .iter()
      .map(|p| ProcessSummary::new(p, today))
      .filter(|s| s.priority == wanted)
      .collect();

    let total = matching.len();
    let items = matching.into_iter().skip(offset).take(per_page).collect();

    Ok(Page { items, total, page, per_page })
  }

  pub async fn history(&self, id: Uuid) -> Result<Vec<HistoryEntry>> {
    self.load(id).await?;
    self.store.list_history(id).await.core()
  }

  /// Recompute the seal of a stored process. `false` means the record was
  /// changed outside the engine and must be reviewed.
  pub async fn verify_integrity(&self, id: Uuid) -> Result<bool> {
    let process = self.load(id).await?;
    let intact = integrity::verify(&process)?;
    if !intact {
      error!(process = %process.process_code, "integrity check failed, record is untrusted");
    }
    Ok(intact)
  }

  // ── Writes ────────────────────────────────────────────────────────────

  async fn alert_for(
    &self,
    process: &RetentionProcess,
    transitions: &[Transition],
    now: DateTime<Utc>,
  ) -> Result<Option<RetentionAlert>> {
    let may_alert = !transitions.is_empty() || process.state == ProcessState::Deferred;
    if !may_alert || !process.alerts_active || process.state.is_terminal() {
      return Ok(None);
    }

    let existing = self
      .store
      .list_alerts(AlertQuery { process_id: Some(process.process_id), status: None })
      .await
      .core()?;
    Ok(alert::generate_if_due(
      process,
      transitions,
      &existing,
      self.config.deferral_notice_days,
      now,
    ))
  }

  /// Bump the version, reseal, and commit atomically against `previous`.
  async fn write(
    &self,
    previous: &RetentionProcess,
    mut process: RetentionProcess,
    history: Vec<HistoryEntry>,
    alert: Option<RetentionAlert>,
    acknowledge_open: Option<Acknowledgement>,
  ) -> Result<RetentionProcess> {
    if let Some(alert) = &alert {
      process.last_alert_sent_at = Some(alert.raised_at);
    }
    process.version = previous.version + 1;
    process.integrity_hash = integrity::seal(&process)?;

    let commit = ProcessCommit {
      process,
      expected_version: previous.version,
      history,
      alerts: alert.into_iter().collect(),
      acknowledge_open,
    };

    match self.store.commit(commit).await.core() {
      Ok(stored) => Ok(stored),
      Err(e @ Error::ConcurrencyConflict { .. }) => {
        warn!(
          process = %previous.process_code,
          version = previous.version,
          "process changed concurrently, mutation rejected"
        );
        Err(e)
      }
      Err(e) => Err(e),
    }
  }

  /// Commit the catch-up in `current` followed by `outcome` as one write.
  ///
  /// Threshold alerts follow the catch-up only while the operation leaves the
  /// process in the stage the calendar put it in.
  async fn commit_outcome(
    &self,
    current: Current,
    outcome: Outcome,
    acknowledge_open: Option<Acknowledgement>,
    now: DateTime<Utc>,
  ) -> Result<RetentionProcess> {
    let Current { stored, process: caught_up, transitions: catch_up, mut history } = current;

    let crossed = if outcome.transitions.is_empty() && outcome.process.state == caught_up.state {
      catch_up.as_slice()
    } else {
      outcome.transitions.as_slice()
    };
    let alert = self.alert_for(&outcome.process, crossed, now).await?;

    history.extend(outcome.history);
    let written = self
      .write(&stored, outcome.process, history, alert, acknowledge_open)
      .await?;
    log_advanced(&written.process_code, &catch_up);
    Ok(written)
  }

  /// Execute the final disposition of a process.
  ///
  /// On success the process is terminal, its open alerts are acknowledged on
  /// behalf of the actor, and the record is resealed, all in one commit.
  pub async fn execute_disposition(
    &self,
    id: Uuid,
    request: DispositionRequest,
  ) -> Result<RetentionProcess> {
    let now = self.clock.now();
    let current = self.load_current(id, now).await?;
    let process = &current.process;

    let outcome =
      disposition::execute(process, &request, self.config.disposition_policy(), now)?;
    if request.action != process.scheduled_disposition {
      warn!(
        process = %process.process_code,
        action = %request.action,
        scheduled = %process.scheduled_disposition,
        "disposition differs from the scheduled action"
      );
    }

    let acknowledgement = Acknowledgement {
      actor: request.actor.clone(),
      notes: request.notes.clone(),
      at:    now,
    };
    let stored = self
      .commit_outcome(current, outcome, Some(acknowledgement), now)
      .await?;

    info!(
      process = %stored.process_code,
      action = %request.action,
      state = %stored.state,
      actor = %request.actor.display_name,
      "final disposition executed"
    );
    Ok(stored)
  }

  pub async fn defer_disposition(
    &self,
    id: Uuid,
    request: DeferralRequest,
  ) -> Result<RetentionProcess> {
    let now = self.clock.now();
    let current = self.load_current(id, now).await?;
    let outcome = disposition::defer(&current.process, &request, now)?;
    let stored = self.commit_outcome(current, outcome, None, now).await?;

    info!(
      process = %stored.process_code,
      until = %request.ends_on,
      actor = %request.actor.display_name,
      "disposition deferred"
    );
    Ok(stored)
  }

  pub async fn reactivate_process(&self, id: Uuid, actor: Actor) -> Result<RetentionProcess> {
    let now = self.clock.now();
    let current = self.load_current(id, now).await?;
    let outcome = disposition::reactivate(&current.process, &actor, now)?;
    let stored = self.commit_outcome(current, outcome, None, now).await?;

    info!(process = %stored.process_code, state = %stored.state, "process reactivated");
    Ok(stored)
  }

  pub async fn suspend_process(
    &self,
    id: Uuid,
    reason: &str,
    actor: Actor,
  ) -> Result<RetentionProcess> {
    let now = self.clock.now();
    let current = self.load_current(id, now).await?;
    let from = current.process.state;
    let outcome = disposition::suspend(&current.process, reason, &actor, now)?;
    let stored = self.commit_outcome(current, outcome, None, now).await?;

    info!(process = %stored.process_code, %from, "process suspended");
    Ok(stored)
  }

  pub async fn resume_process(&self, id: Uuid, actor: Actor) -> Result<RetentionProcess> {
    let now = self.clock.now();
    let current = self.load_current(id, now).await?;
    let outcome = disposition::resume(&current.process, &actor, now)?;
    let stored = self.commit_outcome(current, outcome, None, now).await?;

    info!(process = %stored.process_code, state = %stored.state, "process resumed");
    Ok(stored)
  }

  pub async fn block_deletion(
    &self,
    id: Uuid,
    reason: &str,
    actor: Actor,
  ) -> Result<RetentionProcess> {
    let now = self.clock.now();
    let current = self.load_current(id, now).await?;
    let outcome = disposition::block_deletion(&current.process, reason, &actor, now)?;
    let stored = self.commit_outcome(current, outcome, None, now).await?;

    info!(process = %stored.process_code, "elimination blocked");
    Ok(stored)
  }

  pub async fn unblock_deletion(&self, id: Uuid, actor: Actor) -> Result<RetentionProcess> {
    let now = self.clock.now();
    let current = self.load_current(id, now).await?;
    let Some(outcome) = disposition::unblock_deletion(&current.process, &actor, now)? else {
      debug!(process = %current.process.process_code, "process was not blocked");
      if current.transitions.is_empty() {
        return Ok(current.stored);
      }
      let outcome = current.unchanged();
      return self.commit_outcome(current, outcome, None, now).await;
    };
    let stored = self.commit_outcome(current, outcome, None, now).await?;

    info!(process = %stored.process_code, "elimination unblocked");
    Ok(stored)
  }

  // ── Alerts ────────────────────────────────────────────────────────────

  pub async fn list_alerts(&self, query: AlertQuery) -> Result<Vec<RetentionAlert>> {
    self.store.list_alerts(query).await.core()
  }

  async fn load_alert(&self, id: Uuid) -> Result<RetentionAlert> {
    self
      .store
      .get_alert(id)
      .await
      .core()?
      .ok_or(Error::AlertNotFound(id))
  }

  /// Record that an alert was opened. Already-read alerts are returned as is.
  pub async fn mark_alert_read(&self, alert_id: Uuid) -> Result<RetentionAlert> {
    let mut alert = self.load_alert(alert_id).await?;
    if alert.status() != AlertStatus::Pending {
      return Ok(alert);
    }
    alert.mark_read(self.clock.now());
    self.store.update_alert(alert, AlertStatus::Pending).await.core()
  }

  /// Acknowledge an alert. Never touches the process it belongs to.
  pub async fn acknowledge_alert(
    &self,
    alert_id: Uuid,
    actor: Actor,
    notes: Option<String>,
  ) -> Result<RetentionAlert> {
    let mut alert = self.load_alert(alert_id).await?;
    let expected = alert.status();
    alert.acknowledge(Acknowledgement { actor, notes, at: self.clock.now() })?;

    let stored = self.store.update_alert(alert, expected).await.core()?;
    info!(alert = %stored.alert_id, kind = stored.kind.as_str(), "alert acknowledged");
    Ok(stored)
  }

  // ── Evaluation ────────────────────────────────────────────────────────

  /// Advance one process according to the calendar and raise any alert that
  /// is due. Writes nothing when nothing changed.
  pub async fn evaluate_process(&self, id: Uuid) -> Result<Evaluation> {
    let now = self.clock.now();
    let Current { stored, process, transitions, history } = self.load_current(id, now).await?;
    let alert = self.alert_for(&process, &transitions, now).await?;

    if transitions.is_empty() && alert.is_none() {
      debug!(process = %stored.process_code, state = %stored.state, "nothing due");
      return Ok(Evaluation::default());
    }
    let written = self.write(&stored, process, history, alert.clone(), None).await?;

    log_advanced(&written.process_code, &transitions);
    if let Some(alert) = &alert {
      info!(
        process = %written.process_code,
        kind = alert.kind.as_str(),
        priority = alert.priority.as_str(),
        "alert raised"
      );
    }

    Ok(Evaluation { written: true, transitions, alert })
  }

  /// Re-evaluate every open process. Each record is its own transaction; a
  /// conflict or failure on one record is counted and the sweep moves on.
  /// Re-running without the clock moving writes nothing.
  pub async fn run_batch_evaluation(&self) -> Result<BatchReport> {
    let ids = self.store.open_process_ids().await.core()?;
    let mut report = BatchReport::default();

    for id in ids {
      report.evaluated += 1;
      match self.evaluate_process(id).await {
        Ok(evaluation) => {
          if evaluation.written {
            report.updated_count += 1;
          }
          if evaluation.alert.is_some() {
            report.alerts_generated += 1;
          }
        }
        Err(Error::ConcurrencyConflict { .. }) => report.conflicts += 1,
        Err(e) => {
          error!(process_id = %id, error = %e, "evaluation failed");
          report.failures += 1;
        }
      }
    }

    info!(
      evaluated = report.evaluated,
      updated = report.updated_count,
      alerts = report.alerts_generated,
      conflicts = report.conflicts,
      failures = report.failures,
      "batch evaluation finished"
    );
    Ok(report)
  }
}
