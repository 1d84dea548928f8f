//! Core types for the crowd engine (JSON contracts + internal models).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ZoneId = String;
pub type UnitId = String;
pub type IncidentId = String;
pub type AlertId = String;

// ---------------------------------------------------------------------------
// Inbound types (JSON contract: what the caller sends)
// ---------------------------------------------------------------------------

/// One inbound line from stdin, tagged by `kind`. Unknown fields are silently ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundMessage {
  Zone(Zone),
  Unit(InboundUnit),
  Observation(InboundObservation),
  Report(InboundReport),
  Resolve {
    incident_id: String,
    at: String,
  },
  UnitOffline {
    unit_id: String,
  },
  UnitOnline {
    unit_id: String,
  },
  Anomaly {
    zone_id: String,
    score: f64,
  },
  Tick {
    at: String,
  },
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundObservation {
  pub zone_id: String,
  pub timestamp: String,
  pub occupancy: i64,
  #[serde(default)]
  pub inflow: f64,
  #[serde(default)]
  pub outflow: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundReport {
  #[serde(rename = "type")]
  pub incident_type: String,
  pub zone_id: String,
  pub reported_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundUnit {
  pub id: String,
  #[serde(rename = "type")]
  pub unit_type: String,
  pub zone_id: String,
  #[serde(default = "default_unit_capacity")]
  pub capacity: u32,
}

fn default_unit_capacity() -> u32 {
  1
}

// ---------------------------------------------------------------------------
// Venue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
  pub lat: f64,
  pub lng: f64,
}

/// A spatial area of the venue with a capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
  pub id: ZoneId,
  #[serde(default)]
  pub name: String,
  pub capacity: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub center: Option<GeoPoint>,
  /// Zones reachable in one hop (walkways, gates).
  #[serde(default)]
  pub adjacent: Vec<ZoneId>,
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// A single occupancy/flow sample for one zone. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneObservation {
  pub zone_id: ZoneId,
  pub timestamp: DateTime<Utc>,
  pub occupancy_count: u32,
  /// People entering per sample interval.
  pub inflow_rate: f64,
  /// People leaving per sample interval.
  pub outflow_rate: f64,
}

impl ZoneObservation {
  pub fn net_flow(&self) -> f64 {
    self.inflow_rate - self.outflow_rate
  }
}

// ---------------------------------------------------------------------------
// Prediction + tiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskPrediction {
  pub zone_id: ZoneId,
  pub computed_at: DateTime<Utc>,
  pub predicted_peak_occupancy: f64,
  /// Seconds until the predicted peak; `None` when occupancy is not rising.
  pub time_to_peak_secs: Option<i64>,
  /// 0..1, zero when the series is too sparse to extrapolate.
  pub confidence: f64,
  pub sample_count: usize,
  /// Share of projected horizon steps at or above the bottleneck ratio.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub bottleneck_probability: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
  Low,
  Moderate,
  High,
  Critical,
}

impl RiskTier {
  pub fn is_elevated(self) -> bool {
    self > Self::Low
  }

  /// One tier higher, saturating at Critical.
  pub fn step_up(self) -> Self {
    match self {
      Self::Low => Self::Moderate,
      Self::Moderate => Self::High,
      Self::High | Self::Critical => Self::Critical,
    }
  }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
  Active,
  Escalated,
  Cleared,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
  pub alert_id: AlertId,
  pub zone_id: ZoneId,
  pub tier: RiskTier,
  pub raised_at: DateTime<Utc>,
  pub last_updated_at: DateTime<Utc>,
  pub state: AlertState,
  /// Hysteresis counter: LOW cycles seen in a row while the alert is open.
  pub consecutive_low_cycles: u32,
  /// Cycle number of the last update applied to this alert.
  #[serde(skip)]
  pub last_cycle: u64,
  #[serde(skip)]
  pub last_tier_seen: RiskTier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertEventKind {
  Raised,
  Escalated,
  Cleared,
}

/// Alert-changed notification for the outside world.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
  pub kind: AlertEventKind,
  pub at: DateTime<Utc>,
  pub alert: Alert,
}

// ---------------------------------------------------------------------------
// Incidents + units
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentState {
  Open,
  Assigned,
  Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Incident {
  pub incident_id: IncidentId,
  #[serde(rename = "type")]
  pub incident_type: String,
  pub zone_id: ZoneId,
  pub reported_at: DateTime<Utc>,
  pub state: IncidentState,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub assigned_unit_id: Option<UnitId>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
  Free,
  Busy,
  Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseUnit {
  pub unit_id: UnitId,
  #[serde(rename = "type")]
  pub unit_type: String,
  pub current_zone_id: ZoneId,
  pub capacity_remaining: u32,
  pub availability: Availability,
}

/// One unit-to-incident pairing produced by a match pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assignment {
  pub incident_id: IncidentId,
  pub unit_id: UnitId,
  pub zone_id: ZoneId,
  pub distance: f64,
}

// ---------------------------------------------------------------------------
// Output types (JSON contract: what we emit)
// ---------------------------------------------------------------------------

/// Per-zone result of one evaluation cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneAssessment {
  pub zone_id: ZoneId,
  pub tier: RiskTier,
  pub occupancy_ratio: f64,
  pub prediction: RiskPrediction,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub anomaly_score: Option<f64>,
}

/// Read-only snapshot of one committed cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
  pub cycle: u64,
  pub at: DateTime<Utc>,
  pub zones: Vec<ZoneAssessment>,
  pub alert_events: Vec<AlertEvent>,
  pub active_alerts: Vec<Alert>,
  pub assignments: Vec<Assignment>,
  pub unmatched_incidents: Vec<IncidentId>,
  pub unresolved_incidents: Vec<Incident>,
  pub units: Vec<ResponseUnit>,
}

// ---------------------------------------------------------------------------
// CLI stream wrappers
// ---------------------------------------------------------------------------

/// One output line of the JSON-lines binary.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OutputLine {
  IncidentReported { incident: Incident },
  IncidentResolved {
    incident: Incident,
    #[serde(skip_serializing_if = "Option::is_none")]
    released_unit_id: Option<UnitId>,
  },
  Cycle(CycleReport),
}

/// Structured error output for invalid input lines.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorOutput {
  pub error: bool,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub field: Option<String>,
}

impl ErrorOutput {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      error: true,
      message: message.into(),
      field: None,
    }
  }

  pub fn with_field(mut self, field: impl Into<String>) -> Self {
    self.field = Some(field.into());
    self
  }
}
