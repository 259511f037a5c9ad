//! SQL schema for the Archiva SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE ... IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Published TRD versions. Never updated once inserted.
CREATE TABLE IF NOT EXISTS schedules (
    trd_id          TEXT    NOT NULL,
    version         INTEGER NOT NULL,
    name            TEXT    NOT NULL,
    effective_from  TEXT    NOT NULL,   -- YYYY-MM-DD
    effective_until TEXT,               -- YYYY-MM-DD, exclusive
    published_at    TEXT    NOT NULL,
    PRIMARY KEY (trd_id, version)
);

CREATE TABLE IF NOT EXISTS schedule_entries (
    trd_id            TEXT    NOT NULL,
    version           INTEGER NOT NULL,
    series_id         TEXT    NOT NULL,
    subseries_id      TEXT,
    management_years  INTEGER NOT NULL CHECK (management_years >= 0),
    central_years     INTEGER NOT NULL CHECK (central_years >= 0),
    final_disposition TEXT    NOT NULL,
    pre_alert_days    INTEGER,
    FOREIGN KEY (trd_id, version) REFERENCES schedules(trd_id, version)
);

-- Processes are never deleted. Rows change only through version-checked
-- UPDATEs issued by commit().
CREATE TABLE IF NOT EXISTS processes (
    process_id            TEXT    PRIMARY KEY,
    process_code          TEXT    NOT NULL UNIQUE,
    entity_kind           TEXT    NOT NULL,   -- 'document' | 'case_file'
    entity_id             TEXT    NOT NULL,
    trd_id                TEXT    NOT NULL,
    trd_version           INTEGER NOT NULL,
    series_id             TEXT    NOT NULL,
    subseries_id          TEXT,
    management_years      INTEGER NOT NULL,
    central_years         INTEGER NOT NULL,
    pre_alert_days        INTEGER NOT NULL,
    scheduled_disposition TEXT    NOT NULL,
    entity_created_on     TEXT    NOT NULL,
    management_expiry     TEXT    NOT NULL,
    central_expiry        TEXT    NOT NULL,
    pre_alert_date        TEXT    NOT NULL,
    state                 TEXT    NOT NULL,
    disposition_action    TEXT,
    disposed_at           TEXT,
    deferral              TEXT,               -- JSON-encoded Deferral or NULL
    suspension_reason     TEXT,
    deletion_block        TEXT,               -- JSON-encoded DeletionBlock or NULL
    alerts_active         INTEGER NOT NULL DEFAULT 1,
    channels              TEXT    NOT NULL DEFAULT '[]',
    last_alert_sent_at    TEXT,
    integrity_hash        TEXT    NOT NULL,
    created_by            TEXT    NOT NULL,   -- JSON-encoded Actor
    modified_by           TEXT    NOT NULL,
    created_at            TEXT    NOT NULL,
    updated_at            TEXT    NOT NULL,
    version               INTEGER NOT NULL DEFAULT 0,
    CHECK (management_expiry <= central_expiry)
);

-- At most one open process per entity.
CREATE UNIQUE INDEX IF NOT EXISTS processes_open_entity_idx
    ON processes(entity_kind, entity_id)
    WHERE state NOT IN ('transferido', 'eliminado', 'conservado');

CREATE INDEX IF NOT EXISTS processes_state_idx ON processes(state);
CREATE INDEX IF NOT EXISTS processes_trd_idx   ON processes(trd_id);

-- Strictly append-only. No UPDATE or DELETE is ever issued against this table.
CREATE TABLE IF NOT EXISTS disposition_history (
    entry_id     TEXT PRIMARY KEY,
    process_id   TEXT NOT NULL REFERENCES processes(process_id),
    action_kind  TEXT NOT NULL,   -- discriminant of HistoryAction
    action_json  TEXT NOT NULL,
    actor        TEXT NOT NULL,   -- JSON-encoded Actor
    recorded_at  TEXT NOT NULL,
    notes        TEXT,
    state_before TEXT NOT NULL,
    state_after  TEXT NOT NULL
);

-- Alerts move pending -> read -> acknowledged and are never deleted.
CREATE TABLE IF NOT EXISTS alerts (
    alert_id              TEXT PRIMARY KEY,
    process_id            TEXT NOT NULL REFERENCES processes(process_id),
    kind                  TEXT NOT NULL,
    priority              TEXT NOT NULL,
    message               TEXT NOT NULL,
    channels              TEXT NOT NULL DEFAULT '[]',
    raised_at             TEXT NOT NULL,
    read_at               TEXT,
    acknowledged_at       TEXT,
    acknowledged_by       TEXT,   -- JSON-encoded Actor
    acknowledgement_notes TEXT
);

CREATE INDEX IF NOT EXISTS history_process_idx ON disposition_history(process_id);
CREATE INDEX IF NOT EXISTS alerts_process_idx  ON alerts(process_id);

PRAGMA user_version = 1;
";
