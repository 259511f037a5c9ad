//! Managed entities and the actors who act on them.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of record a retention process manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
  Document,
  /// An expediente: a set of documents managed as one unit.
  CaseFile,
}

impl EntityKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Document => "document",
      Self::CaseFile => "case_file",
    }
  }
}

/// Reference to the managed entity. Exactly one kind is always set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
  Document(Uuid),
  CaseFile(Uuid),
}

impl EntityRef {
  pub fn new(kind: EntityKind, id: Uuid) -> Self {
    match kind {
      EntityKind::Document => Self::Document(id),
      EntityKind::CaseFile => Self::CaseFile(id),
    }
  }

  pub fn kind(&self) -> EntityKind {
    match self {
      Self::Document(_) => EntityKind::Document,
      Self::CaseFile(_) => EntityKind::CaseFile,
    }
  }

  pub fn id(&self) -> Uuid {
    match self {
      Self::Document(id) | Self::CaseFile(id) => *id,
    }
  }
}

impl fmt::Display for EntityRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.kind().as_str(), self.id())
  }
}

/// A user (or the scheduler) performing an action, as reported by the host's
/// identity service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
  pub user_id:      Uuid,
  pub display_name: String,
}

impl Actor {
  pub fn new(user_id: Uuid, display_name: impl Into<String>) -> Self {
    Self { user_id, display_name: display_name.into() }
  }

  /// The actor recorded for automatic transitions made by the sweep.
  pub fn system() -> Self {
    Self { user_id: Uuid::nil(), display_name: "system".to_owned() }
  }

  pub fn is_system(&self) -> bool { self.user_id.is_nil() }
}
