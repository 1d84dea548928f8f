//! Map predicted occupancy to risk tiers.

use crate::config::TierThresholds;
use crate::types::{RiskPrediction, RiskTier};

/// Predicted occupancy as a share of zone capacity. Zero capacity counts as saturated.
pub fn occupancy_ratio(prediction: &RiskPrediction, zone_capacity: u32) -> f64 {
  if zone_capacity == 0 {
    return f64::INFINITY;
  }
  prediction.predicted_peak_occupancy / zone_capacity as f64
}

/// Tier for a prediction against a zone's capacity. Monotonic in the ratio.
pub fn classify(prediction: &RiskPrediction, zone_capacity: u32, thresholds: &TierThresholds) -> RiskTier {
  tier_for_ratio(occupancy_ratio(prediction, zone_capacity), thresholds)
}

pub fn tier_for_ratio(ratio: f64, thresholds: &TierThresholds) -> RiskTier {
  if ratio >= thresholds.critical {
    RiskTier::Critical
  } else if ratio >= thresholds.high {
    RiskTier::High
  } else if ratio >= thresholds.moderate {
    RiskTier::Moderate
  } else {
    RiskTier::Low
  }
}

/// Raise the tier one step when an external anomaly score crosses the threshold.
pub fn apply_anomaly(tier: RiskTier, anomaly_score: Option<f64>, threshold: f64) -> RiskTier {
  match anomaly_score {
    Some(score) if score >= threshold => tier.step_up(),
    _ => tier,
  }
}
