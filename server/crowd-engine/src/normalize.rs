//! Validate inbound records and convert them into canonical internal models.

use chrono::{DateTime, Utc};

use crate::error::EngineError;
use crate::types::*;

/// Parse an RFC 3339 timestamp, naming `field` on failure.
pub fn timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>, EngineError> {
  DateTime::parse_from_rfc3339(raw.trim())
    .map(|t| t.with_timezone(&Utc))
    .map_err(|e| EngineError::validation(field, &format!("invalid RFC3339: {}", e)))
}

pub fn observation(raw: &InboundObservation) -> Result<ZoneObservation, EngineError> {
  let zone_id = raw.zone_id.trim();
  if zone_id.is_empty() {
    return Err(EngineError::validation("zone_id", "must not be empty"));
  }
  let timestamp = timestamp("timestamp", &raw.timestamp)?;
  let occupancy_count = u32::try_from(raw.occupancy)
    .map_err(|_| EngineError::validation("occupancy", "must be between 0 and 4294967295"))?;
  for (field, rate) in [("inflow", raw.inflow), ("outflow", raw.outflow)] {
    if !rate.is_finite() || rate < 0.0 {
      return Err(EngineError::validation(field, "must be a finite, non-negative rate"));
    }
  }
  Ok(ZoneObservation {
    zone_id: zone_id.to_string(),
    timestamp,
    occupancy_count,
    inflow_rate: raw.inflow,
    outflow_rate: raw.outflow,
  })
}

pub fn zone(raw: &Zone) -> Result<Zone, EngineError> {
  let id = raw.id.trim();
  if id.is_empty() {
    return Err(EngineError::validation("id", "must not be empty"));
  }
  if raw.capacity == 0 {
    return Err(EngineError::validation("capacity", "must be > 0"));
  }
  if let Some(c) = raw.center {
    if !(-90.0..=90.0).contains(&c.lat) || !(-180.0..=180.0).contains(&c.lng) {
      return Err(EngineError::validation("center", "lat/lng out of range"));
    }
  }
  let mut adjacent: Vec<ZoneId> = raw
    .adjacent
    .iter()
    .map(|a| a.trim().to_string())
    .filter(|a| !a.is_empty() && a != id)
    .collect();
  adjacent.sort();
  adjacent.dedup();
  Ok(Zone {
    id: id.to_string(),
    name: if raw.name.trim().is_empty() {
      id.to_string()
    } else {
      raw.name.trim().to_string()
    },
    capacity: raw.capacity,
    center: raw.center,
    adjacent,
  })
}

pub fn unit(raw: &InboundUnit) -> Result<ResponseUnit, EngineError> {
  let unit_id = raw.id.trim();
  if unit_id.is_empty() {
    return Err(EngineError::validation("id", "must not be empty"));
  }
  let unit_type = raw.unit_type.trim().to_ascii_lowercase();
  if unit_type.is_empty() {
    return Err(EngineError::validation("type", "must not be empty"));
  }
  Ok(ResponseUnit {
    unit_id: unit_id.to_string(),
    unit_type,
    current_zone_id: raw.zone_id.trim().to_string(),
    capacity_remaining: raw.capacity,
    availability: Availability::Free,
  })
}

pub fn anomaly_score(score: f64) -> Result<f64, EngineError> {
  if !(0.0..=1.0).contains(&score) {
    return Err(EngineError::validation("score", "must be within 0..1"));
  }
  Ok(score)
}
