//! Structured error types for the crowd engine.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
  /// Observation older than the latest entry already recorded for its zone.
  #[error("out of order observation for zone {zone_id}: {timestamp} is older than {latest}")]
  OutOfOrderObservation {
    zone_id: String,
    timestamp: DateTime<Utc>,
    latest: DateTime<Utc>,
  },

  #[error("invalid zone: {0}")]
  InvalidZone(String),

  #[error("incident not found: {0}")]
  NotFound(String),

  #[error("incident already resolved: {0}")]
  AlreadyResolved(String),

  #[error("unknown unit: {0}")]
  UnknownUnit(String),

  #[error("validation: {field}: {reason}")]
  Validation { field: String, reason: String },

  /// The engine side of the incident intake has been dropped.
  #[error("incident intake closed")]
  IntakeClosed,

  /// The driver cancelled the cycle before commit; no state was changed.
  #[error("cycle {0} cancelled before commit")]
  Cancelled(u64),

  #[error("config: {0}")]
  Config(String),

  #[error("io: {0}")]
  Io(#[from] std::io::Error),

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),
}

impl EngineError {
  pub fn validation(field: &str, reason: &str) -> Self {
    Self::Validation {
      field: field.to_string(),
      reason: reason.to_string(),
    }
  }

  pub fn config(msg: impl Into<String>) -> Self {
    Self::Config(msg.into())
  }

  /// Field name to surface in structured error output, when the error has one.
  pub fn field(&self) -> Option<&str> {
    match self {
      Self::Validation { field, .. } => Some(field),
      Self::InvalidZone(_) | Self::OutOfOrderObservation { .. } => Some("zone_id"),
      Self::NotFound(_) | Self::AlreadyResolved(_) => Some("incident_id"),
      Self::UnknownUnit(_) => Some("unit_id"),
      _ => None,
    }
  }
}
