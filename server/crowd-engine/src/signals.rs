//! Zone signal store: bounded, append-only occupancy series per zone.

use std::collections::{HashMap, VecDeque};
use std::iter::Chain;
use std::slice;

use chrono::{DateTime, Utc};

use crate::error::EngineError;
use crate::types::{ZoneId, ZoneObservation};

/// Sliding window of observations for one zone, oldest first.
#[derive(Debug, Clone)]
pub struct ZoneSeries {
  capacity: usize,
  entries: VecDeque<ZoneObservation>,
}

impl ZoneSeries {
  pub fn new(capacity: usize) -> Self {
    Self {
      capacity: capacity.max(1),
      entries: VecDeque::with_capacity(capacity.max(1)),
    }
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn latest(&self) -> Option<&ZoneObservation> {
    self.entries.back()
  }

  fn push(&mut self, obs: ZoneObservation) -> Result<(), EngineError> {
    if let Some(latest) = self.entries.back() {
      if obs.timestamp < latest.timestamp {
        return Err(EngineError::OutOfOrderObservation {
          zone_id: obs.zone_id,
          timestamp: obs.timestamp,
          latest: latest.timestamp,
        });
      }
    }
    if self.entries.len() == self.capacity {
      self.entries.pop_front();
    }
    self.entries.push_back(obs);
    Ok(())
  }

  fn window(&self, window: usize) -> SeriesWindow<'_> {
    let n = self.entries.len();
    let start = n - window.min(n);
    let (front, back) = self.entries.as_slices();
    if start < front.len() {
      SeriesWindow {
        front: &front[start..],
        back,
      }
    } else {
      SeriesWindow {
        front: &[],
        back: &back[start - front.len()..],
      }
    }
  }

  fn purge(&mut self, older_than: DateTime<Utc>) -> usize {
    let before = self.entries.len();
    while self
      .entries
      .front()
      .is_some_and(|o| o.timestamp < older_than)
    {
      self.entries.pop_front();
    }
    before - self.entries.len()
  }
}

/// Read-only view over the most recent observations of a zone.
///
/// Cheap to copy; every call to [`SeriesWindow::iter`] restarts from the oldest entry.
#[derive(Debug, Clone, Copy)]
pub struct SeriesWindow<'a> {
  front: &'a [ZoneObservation],
  back: &'a [ZoneObservation],
}

impl<'a> SeriesWindow<'a> {
  pub fn empty() -> Self {
    Self {
      front: &[],
      back: &[],
    }
  }

  pub fn iter(&self) -> Chain<slice::Iter<'a, ZoneObservation>, slice::Iter<'a, ZoneObservation>> {
    self.front.iter().chain(self.back.iter())
  }

  pub fn len(&self) -> usize {
    self.front.len() + self.back.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn first(&self) -> Option<&'a ZoneObservation> {
    self.front.first().or_else(|| self.back.first())
  }

  pub fn last(&self) -> Option<&'a ZoneObservation> {
    self.back.last().or_else(|| self.front.last())
  }
}

impl<'a> IntoIterator for SeriesWindow<'a> {
  type Item = &'a ZoneObservation;
  type IntoIter = Chain<slice::Iter<'a, ZoneObservation>, slice::Iter<'a, ZoneObservation>>;

  fn into_iter(self) -> Self::IntoIter {
    self.iter()
  }
}

/// Per-zone series keyed by zone id. Zones never share state.
#[derive(Debug, Clone)]
pub struct SignalStore {
  window: usize,
  series: HashMap<ZoneId, ZoneSeries>,
}

impl SignalStore {
  /// `window` bounds each zone's series; the oldest entry is evicted on overflow.
  pub fn new(window: usize) -> Self {
    Self {
      window,
      series: HashMap::new(),
    }
  }

  /// Append an observation. Timestamps older than the zone's latest entry are rejected.
  pub fn record(&mut self, obs: ZoneObservation) -> Result<(), EngineError> {
    let window = self.window;
    self
      .series
      .entry(obs.zone_id.clone())
      .or_insert_with(|| ZoneSeries::new(window))
      .push(obs)
  }

  /// The most recent `window` observations of a zone (fewer if not yet available).
  pub fn series(&self, zone_id: &str, window: usize) -> SeriesWindow<'_> {
    self
      .series
      .get(zone_id)
      .map(|s| s.window(window))
      .unwrap_or_else(SeriesWindow::empty)
  }

  pub fn latest(&self, zone_id: &str) -> Option<&ZoneObservation> {
    self.series.get(zone_id).and_then(|s| s.latest())
  }

  /// Evict observations strictly older than `older_than`. Returns how many were dropped.
  pub fn purge(&mut self, zone_id: &str, older_than: DateTime<Utc>) -> usize {
    self
      .series
      .get_mut(zone_id)
      .map(|s| s.purge(older_than))
      .unwrap_or(0)
  }

  pub fn purge_all(&mut self, older_than: DateTime<Utc>) -> usize {
    self.series.values_mut().map(|s| s.purge(older_than)).sum()
  }
}
