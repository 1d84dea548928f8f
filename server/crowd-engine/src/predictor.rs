//! Short-horizon bottleneck forecast per zone.
//!
//! The forecast extrapolates the latest occupancy along a trend fitted over the
//! series window: either an EWMA of net flow or a least-squares occupancy slope.
//! Sparse series degrade to a zero-confidence "no prediction" rather than failing.

use chrono::{DateTime, Utc};

use crate::config::{Config, TrendModel};
use crate::signals::SeriesWindow;
use crate::types::RiskPrediction;

/// Forecast a zone's peak occupancy over the configured horizon.
///
/// Deterministic: identical series and config always give identical output.
pub fn predict(
  zone_id: &str,
  series: SeriesWindow<'_>,
  at: DateTime<Utc>,
  config: &Config,
) -> RiskPrediction {
  let n = series.len();
  let last = match series.last() {
    Some(o) => o.occupancy_count as f64,
    None => return no_prediction(zone_id, at, 0.0, 0),
  };
  if n < config.min_samples {
    return no_prediction(zone_id, at, last, n);
  }

  let slope = trend(series, config);
  let horizon = config.horizon_samples as f64;
  let predicted = (last + slope * horizon).max(0.0);

  // A window with no time span (all samples share one timestamp) has no
  // meaningful cadence to project along.
  let interval = mean_interval_secs(series);
  let time_to_peak_secs = if slope > 0.0 && interval > 0.0 {
    Some((horizon * interval).round() as i64)
  } else {
    None
  };

  let confidence = (n as f64 / config.full_confidence_samples as f64).min(1.0);

  RiskPrediction {
    zone_id: zone_id.to_string(),
    computed_at: at,
    predicted_peak_occupancy: predicted,
    time_to_peak_secs,
    confidence,
    sample_count: n,
    bottleneck_probability: None,
  }
}

fn no_prediction(zone_id: &str, at: DateTime<Utc>, occupancy: f64, n: usize) -> RiskPrediction {
  RiskPrediction {
    zone_id: zone_id.to_string(),
    computed_at: at,
    predicted_peak_occupancy: occupancy,
    time_to_peak_secs: None,
    confidence: 0.0,
    sample_count: n,
    bottleneck_probability: None,
  }
}

/// Occupancy change per sample, per the configured trend model.
pub fn trend(series: SeriesWindow<'_>, config: &Config) -> f64 {
  match config.trend_model {
    TrendModel::NetFlowEwma => net_flow_ewma(series, config.ewma_alpha),
    TrendModel::LinearFit => linear_slope(series),
  }
}

/// EWMA of net flow, seeded with the oldest sample.
fn net_flow_ewma(series: SeriesWindow<'_>, alpha: f64) -> f64 {
  let mut iter = series.iter();
  let mut ewma = match iter.next() {
    Some(o) => o.net_flow(),
    None => return 0.0,
  };
  for o in iter {
    ewma = alpha * o.net_flow() + (1.0 - alpha) * ewma;
  }
  ewma
}

/// Least-squares slope of occupancy against sample index.
fn linear_slope(series: SeriesWindow<'_>) -> f64 {
  let n = series.len() as f64;
  if n < 2.0 {
    return 0.0;
  }
  let mean_x = (n - 1.0) / 2.0;
  let mean_y = series.iter().map(|o| o.occupancy_count as f64).sum::<f64>() / n;

  let (mut num, mut den) = (0.0, 0.0);
  for (i, o) in series.iter().enumerate() {
    let dx = i as f64 - mean_x;
    num += dx * (o.occupancy_count as f64 - mean_y);
    den += dx * dx;
  }
  if den == 0.0 {
    0.0
  } else {
    num / den
  }
}

fn mean_interval_secs(series: SeriesWindow<'_>) -> f64 {
  match (series.first(), series.last()) {
    (Some(first), Some(last)) if series.len() > 1 => {
      let span = (last.timestamp - first.timestamp).num_milliseconds() as f64 / 1000.0;
      span / (series.len() - 1) as f64
    }
    _ => 0.0,
  }
}

/// Share of projected horizon steps whose occupancy ratio reaches `threshold_ratio`.
///
/// Returns `None` when the prediction carries no confidence or capacity is zero.
pub fn bottleneck_probability(
  prediction: &RiskPrediction,
  series: SeriesWindow<'_>,
  capacity: u32,
  threshold_ratio: f64,
  config: &Config,
) -> Option<f64> {
  if prediction.confidence <= 0.0 || capacity == 0 {
    return None;
  }
  let last = series.last()?.occupancy_count as f64;
  let slope = trend(series, config);
  let steps = config.horizon_samples;
  let exceed = (1..=steps)
    .filter(|k| (last + slope * *k as f64).max(0.0) / capacity as f64 >= threshold_ratio)
    .count();
  let p = exceed as f64 / steps as f64;
  Some((p * 100.0).round() / 100.0)
}
