//! Engine configuration with sane defaults.
//!
//! Every field has a default, so a config file only needs to name what it overrides.

use std::collections::HashMap;
use std::path::Path;

use chrono::TimeDelta;
use serde::Deserialize;

use crate::error::EngineError;
use crate::types::{InboundUnit, Zone};

/// How the predictor extrapolates occupancy over the horizon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendModel {
  /// EWMA of per-sample net flow (inflow - outflow).
  NetFlowEwma,
  /// Least-squares slope of occupancy against sample index.
  LinearFit,
}

/// Distance proxy the dispatch matcher uses to rank units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceKind {
  /// Hop count over zone adjacency.
  Adjacency,
  /// Great-circle metres between zone centres.
  Haversine,
}

/// Occupancy-ratio boundaries between tiers (lower bound of each tier).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
  pub moderate: f64,
  pub high: f64,
  pub critical: f64,
}

impl Default for TierThresholds {
  fn default() -> Self {
    Self {
      moderate: 0.5,
      high: 0.75,
      critical: 0.95,
    }
  }
}

/// Tunable thresholds for prediction, alerting and dispatch.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Look-ahead, in samples.
  pub horizon_samples: u32,
  /// Series window = horizon_samples * window_multiplier.
  pub window_multiplier: u32,
  /// Below this many samples the predictor reports zero confidence.
  pub min_samples: usize,
  /// Sample count at which confidence reaches 1.0.
  pub full_confidence_samples: usize,
  /// EWMA smoothing factor (0..1]. Higher = more reactive.
  pub ewma_alpha: f64,
  pub trend_model: TrendModel,
  /// Observations older than this (relative to the cycle time) are purged.
  pub retention_secs: i64,
  pub thresholds: TierThresholds,
  /// Consecutive LOW cycles before an alert clears.
  pub clear_after_low_cycles: u32,
  /// External anomaly score at or above which the tier is raised one step.
  pub anomaly_threshold: f64,
  pub distance: DistanceKind,
  /// Incident type -> priority (higher is dispatched first). Unknown types rank 0.
  pub type_priorities: HashMap<String, u32>,
  /// Incident type -> unit types able to serve it.
  pub compatibility: HashMap<String, Vec<String>>,
  /// Unit types that can serve any incident type.
  pub universal_unit_types: Vec<String>,
}

impl Default for Config {
  fn default() -> Self {
    let type_priorities = [
      ("crowd-surge", 100),
      ("fire", 90),
      ("medical", 80),
      ("security", 60),
      ("crowd-control", 50),
      ("lost-person", 40),
      ("technical", 30),
      ("other", 10),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    let compatibility = [
      ("crowd-surge", &["security", "crowd-control"][..]),
      ("crowd-control", &["security", "crowd-control"][..]),
      ("medical", &["medical"][..]),
      ("fire", &["fire"][..]),
      ("security", &["security"][..]),
      ("lost-person", &["security", "volunteer"][..]),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
    .collect();

    Self {
      horizon_samples: 2,
      window_multiplier: 4,
      min_samples: 3,
      full_confidence_samples: 6,
      ewma_alpha: 0.5,
      trend_model: TrendModel::NetFlowEwma,
      retention_secs: 3600,
      thresholds: TierThresholds::default(),
      clear_after_low_cycles: 3,
      anomaly_threshold: 0.7,
      distance: DistanceKind::Adjacency,
      type_priorities,
      compatibility,
      universal_unit_types: vec!["general".to_string()],
    }
  }
}

impl Config {
  /// Sliding-window size per zone series.
  pub fn window_size(&self) -> usize {
    (self.horizon_samples.saturating_mul(self.window_multiplier) as usize).max(self.min_samples)
  }

  /// Trim and lowercase every incident/unit type key, matching how inbound
  /// reports and units are normalized.
  pub fn canonicalize_types(&mut self) {
    let canon = |t: &str| t.trim().to_ascii_lowercase();
    self.type_priorities = self
      .type_priorities
      .drain()
      .map(|(k, v)| (canon(&k), v))
      .collect();
    let mut compatibility: HashMap<String, Vec<String>> = HashMap::new();
    for (k, units) in self.compatibility.drain() {
      let entry = compatibility.entry(canon(&k)).or_default();
      entry.extend(units.iter().map(|u| canon(u)));
      entry.sort();
      entry.dedup();
    }
    self.compatibility = compatibility;
    for u in &mut self.universal_unit_types {
      *u = canon(u);
    }
  }

  pub fn priority_of(&self, incident_type: &str) -> u32 {
    self.type_priorities.get(incident_type).copied().unwrap_or(0)
  }

  /// Whether a unit of `unit_type` may be dispatched to an incident of `incident_type`.
  pub fn is_compatible(&self, incident_type: &str, unit_type: &str) -> bool {
    if self.universal_unit_types.iter().any(|u| u == unit_type) {
      return true;
    }
    match self.compatibility.get(incident_type) {
      Some(types) => types.iter().any(|t| t == unit_type),
      None => incident_type == unit_type,
    }
  }

  pub fn validate(&self) -> Result<(), EngineError> {
    let t = &self.thresholds;
    if !(0.0 < t.moderate && t.moderate < t.high && t.high < t.critical) {
      return Err(EngineError::config(
        "thresholds must satisfy 0 < moderate < high < critical",
      ));
    }
    if self.horizon_samples == 0 {
      return Err(EngineError::config("horizon_samples must be > 0"));
    }
    if self.horizon_samples.checked_mul(self.window_multiplier).is_none() {
      return Err(EngineError::config(
        "horizon_samples * window_multiplier overflows",
      ));
    }
    if self.retention_secs <= 0 || TimeDelta::try_seconds(self.retention_secs).is_none() {
      return Err(EngineError::config(
        "retention_secs must be > 0 and within the representable time range",
      ));
    }
    if self.clear_after_low_cycles == 0 {
      return Err(EngineError::config("clear_after_low_cycles must be > 0"));
    }
    if !(self.ewma_alpha > 0.0 && self.ewma_alpha <= 1.0) {
      return Err(EngineError::config("ewma_alpha must be in (0, 1]"));
    }
    if self.min_samples < 2 {
      return Err(EngineError::config("min_samples must be >= 2"));
    }
    if self.full_confidence_samples < self.min_samples {
      return Err(EngineError::config(
        "full_confidence_samples must be >= min_samples",
      ));
    }
    Ok(())
  }
}

/// Operator-supplied venue: engine tuning plus zone and unit definitions.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VenueConfig {
  pub engine: Config,
  pub zones: Vec<Zone>,
  pub units: Vec<InboundUnit>,
}

/// Load and validate a venue config from a JSON file.
pub fn load(path: impl AsRef<Path>) -> Result<VenueConfig, EngineError> {
  let raw = std::fs::read_to_string(path.as_ref())?;
  let mut venue: VenueConfig = serde_json::from_str(&raw)?;
  venue.engine.canonicalize_types();
  venue.engine.validate()?;
  Ok(venue)
}
