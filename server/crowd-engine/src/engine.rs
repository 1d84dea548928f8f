//! Core engine: owns venue state, runs evaluation cycles, dispatches units.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use rayon::prelude::*;

use crate::alerts::AlertBook;
use crate::classifier;
use crate::config::{Config, VenueConfig};
use crate::dispatch::{self, DistanceProxy, MatchContext, UnitPool};
use crate::error::EngineError;
use crate::incidents::{Intake, IncidentRegistry, IncidentReporter, KnownZones};
use crate::normalize;
use crate::predictor;
use crate::signals::SignalStore;
use crate::types::*;

/// Cancellation flag a driver can flip from another thread while a cycle runs.
#[derive(Debug, Clone, Default)]
pub struct CycleToken(Arc<AtomicBool>);

impl CycleToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

/// Everything a cycle may change. Staged as a copy and swapped in on commit.
#[derive(Debug, Clone)]
struct DecisionState {
  cycle: u64,
  alerts: AlertBook,
  registry: IncidentRegistry,
  pool: UnitPool,
  zone_tiers: BTreeMap<ZoneId, RiskTier>,
}

/// The risk prediction and dispatch engine. Holds in-memory state across cycles.
pub struct Engine {
  config: Config,
  zones: BTreeMap<ZoneId, Zone>,
  known_zones: KnownZones,
  distance: Box<dyn DistanceProxy>,
  store: SignalStore,
  state: DecisionState,
  reporter: IncidentReporter,
  intake: Intake,
  anomalies: BTreeMap<ZoneId, f64>,
  /// Assignments made on report arrival, surfaced with the next cycle.
  early_assignments: Vec<Assignment>,
}

impl Engine {
  pub fn new(mut config: Config) -> Result<Self, EngineError> {
    config.canonicalize_types();
    config.validate()?;
    let known_zones: KnownZones = Arc::new(RwLock::new(Default::default()));
    let registry = IncidentRegistry::new(known_zones.clone());
    let (reporter, intake) = registry.intake();
    Ok(Self {
      distance: dispatch::distance_proxy(config.distance, std::iter::empty::<&Zone>()),
      store: SignalStore::new(config.window_size()),
      state: DecisionState {
        cycle: 0,
        alerts: AlertBook::new(config.clear_after_low_cycles),
        registry,
        pool: UnitPool::new(),
        zone_tiers: BTreeMap::new(),
      },
      config,
      zones: BTreeMap::new(),
      known_zones,
      reporter,
      intake,
      anomalies: BTreeMap::new(),
      early_assignments: Vec::new(),
    })
  }

  pub fn with_defaults() -> Self {
    Self::new(Config::default()).unwrap_or_else(|e| panic!("default config is invalid: {}", e))
  }

  /// Build an engine from an operator venue definition.
  pub fn from_venue(venue: VenueConfig) -> Result<Self, EngineError> {
    let mut engine = Self::new(venue.engine)?;
    for zone in &venue.zones {
      engine.add_zone(zone)?;
    }
    for unit in &venue.units {
      engine.register_unit(unit)?;
    }
    Ok(engine)
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  /// Number of the last committed cycle (0 before the first).
  pub fn cycle(&self) -> u64 {
    self.state.cycle
  }

  // -------------------------------------------------------------------------
  // Venue setup
  // -------------------------------------------------------------------------

  /// Add or redefine a zone.
  pub fn add_zone(&mut self, raw: &Zone) -> Result<(), EngineError> {
    let zone = normalize::zone(raw)?;
    tracing::debug!(zone_id = %zone.id, capacity = zone.capacity, "zone registered");
    self.known_zones.write().insert(zone.id.clone());
    self.zones.insert(zone.id.clone(), zone);
    self.distance = dispatch::distance_proxy(self.config.distance, self.zones.values());
    Ok(())
  }

  pub fn zone(&self, zone_id: &str) -> Option<&Zone> {
    self.zones.get(zone_id)
  }

  pub fn register_unit(&mut self, raw: &InboundUnit) -> Result<(), EngineError> {
    let unit = normalize::unit(raw)?;
    if !self.zones.contains_key(&unit.current_zone_id) {
      return Err(EngineError::InvalidZone(unit.current_zone_id));
    }
    tracing::debug!(unit_id = %unit.unit_id, unit_type = %unit.unit_type, "unit registered");
    self.state.pool.register(unit)
  }

  /// OFFLINE a unit; a BUSY unit's incident goes back to OPEN for the next pass.
  pub fn set_unit_offline(&mut self, unit_id: &str) -> Result<Option<IncidentId>, EngineError> {
    let state = &mut self.state;
    let reopened = state.pool.set_offline(unit_id, &mut state.registry)?;
    state.pool.assert_consistent(&state.registry);
    Ok(reopened)
  }

  pub fn set_unit_online(&mut self, unit_id: &str) -> Result<(), EngineError> {
    self.state.pool.set_online(unit_id)
  }

  // -------------------------------------------------------------------------
  // Signals
  // -------------------------------------------------------------------------

  /// Append an observation to its zone's series.
  pub fn record(&mut self, obs: ZoneObservation) -> Result<(), EngineError> {
    if !self.zones.contains_key(&obs.zone_id) {
      return Err(EngineError::InvalidZone(obs.zone_id));
    }
    self.store.record(obs)
  }

  pub fn signals(&self) -> &SignalStore {
    &self.store
  }

  /// External anomaly score for a zone, applied to the next cycle only.
  pub fn signal_anomaly(&mut self, zone_id: &str, score: f64) -> Result<(), EngineError> {
    if !self.zones.contains_key(zone_id) {
      return Err(EngineError::InvalidZone(zone_id.to_string()));
    }
    let score = normalize::anomaly_score(score)?;
    self.anomalies.insert(zone_id.to_string(), score);
    Ok(())
  }

  // -------------------------------------------------------------------------
  // Incidents
  // -------------------------------------------------------------------------

  /// Handle for filing reports from other threads; drained at the next pass.
  pub fn reporter(&self) -> IncidentReporter {
    self.reporter.clone()
  }

  /// File a report and run a matching pass for it straight away.
  ///
  /// The returned incident reflects that pass (ASSIGNED if a unit was free).
  pub fn report(
    &mut self,
    incident_type: &str,
    zone_id: &str,
    reported_at: DateTime<Utc>,
  ) -> Result<Incident, EngineError> {
    self.admit_queued();
    let incident = self
      .state
      .registry
      .report(incident_type, zone_id, reported_at)?;
    tracing::info!(
      incident_id = %incident.incident_id,
      incident_type = %incident.incident_type,
      zone_id,
      "incident reported"
    );

    let outcome = {
      let ctx = MatchContext {
        config: &self.config,
        zone_tiers: &self.state.zone_tiers,
        distance: self.distance.as_ref(),
      };
      self.state.pool.dispatch(&mut self.state.registry, &ctx)
    };
    self.state.pool.assert_consistent(&self.state.registry);
    outcome.log();
    self.early_assignments.extend(outcome.assignments);

    Ok(
      self
        .state
        .registry
        .get(&incident.incident_id)
        .cloned()
        .unwrap_or(incident),
    )
  }

  /// Resolve an incident. Its unit, if any, is FREE again before this returns.
  pub fn resolve(
    &mut self,
    incident_id: &str,
    at: DateTime<Utc>,
  ) -> Result<(Incident, Option<UnitId>), EngineError> {
    self.admit_queued();
    let (incident, released) = self.state.registry.resolve(incident_id, at)?;
    if let Some(unit_id) = &released {
      self.state.pool.release(unit_id)?;
    }
    self.state.pool.assert_consistent(&self.state.registry);
    Ok((incident, released))
  }

  /// An unresolved incident. Resolved incidents are only returned by `resolve`.
  pub fn incident(&self, incident_id: &str) -> Option<&Incident> {
    self.state.registry.get(incident_id)
  }

  pub fn unresolved_incidents(&self) -> Vec<Incident> {
    self.state.registry.unresolved().cloned().collect()
  }

  pub fn unit(&self, unit_id: &str) -> Option<&ResponseUnit> {
    self.state.pool.get(unit_id)
  }

  pub fn units(&self) -> Vec<ResponseUnit> {
    self.state.pool.units().cloned().collect()
  }

  pub fn active_alerts(&self) -> Vec<Alert> {
    self.state.alerts.active().cloned().collect()
  }

  pub fn alert(&self, zone_id: &str) -> Option<&Alert> {
    self.state.alerts.get(zone_id)
  }

  /// Tier from the last committed cycle (LOW if never evaluated).
  pub fn zone_tier(&self, zone_id: &str) -> RiskTier {
    self
      .state
      .zone_tiers
      .get(zone_id)
      .copied()
      .unwrap_or(RiskTier::Low)
  }

  /// Move queued reports into the registry. Admission never matches anything.
  fn admit_queued(&mut self) {
    for incident in self.intake.drain() {
      tracing::debug!(incident_id = %incident.incident_id, "queued incident admitted");
      self.state.registry.admit(incident);
    }
  }

  // -------------------------------------------------------------------------
  // Wire messages
  // -------------------------------------------------------------------------

  /// Apply one inbound message. Returns the line to emit, if the message produces one.
  pub fn process(&mut self, msg: &InboundMessage) -> Result<Option<OutputLine>, EngineError> {
    match msg {
      InboundMessage::Zone(zone) => self.add_zone(zone).map(|_| None),
      InboundMessage::Unit(unit) => self.register_unit(unit).map(|_| None),
      InboundMessage::Observation(raw) => {
        let obs = normalize::observation(raw)?;
        self.record(obs).map(|_| None)
      }
      InboundMessage::Report(raw) => {
        let at = normalize::timestamp("reported_at", &raw.reported_at)?;
        let incident = self.report(&raw.incident_type, raw.zone_id.trim(), at)?;
        Ok(Some(OutputLine::IncidentReported { incident }))
      }
      InboundMessage::Resolve { incident_id, at } => {
        let at = normalize::timestamp("at", at)?;
        let (incident, released_unit_id) = self.resolve(incident_id.trim(), at)?;
        Ok(Some(OutputLine::IncidentResolved {
          incident,
          released_unit_id,
        }))
      }
      InboundMessage::UnitOffline { unit_id } => self.set_unit_offline(unit_id.trim()).map(|_| None),
      InboundMessage::UnitOnline { unit_id } => self.set_unit_online(unit_id.trim()).map(|_| None),
      InboundMessage::Anomaly { zone_id, score } => {
        self.signal_anomaly(zone_id.trim(), *score).map(|_| None)
      }
      InboundMessage::Tick { at } => {
        let at = normalize::timestamp("at", at)?;
        self.run_cycle(at).map(|r| Some(OutputLine::Cycle(r)))
      }
    }
  }

  // -------------------------------------------------------------------------
  // Cycle
  // -------------------------------------------------------------------------

  pub fn run_cycle(&mut self, at: DateTime<Utc>) -> Result<CycleReport, EngineError> {
    self.run_cycle_with(at, &CycleToken::new())
  }

  /// One evaluation cycle: predict, classify, update alerts, match incidents.
  ///
  /// All changes are staged and committed together. If `token` is cancelled
  /// before commit the cycle returns `Cancelled` and engine state is unchanged.
  pub fn run_cycle_with(
    &mut self,
    at: DateTime<Utc>,
    token: &CycleToken,
  ) -> Result<CycleReport, EngineError> {
    self.admit_queued();
    let cycle = self.state.cycle + 1;
    let _span = tracing::info_span!("cycle", cycle).entered();

    let assessments = self.assess_zones(at);
    if token.is_cancelled() {
      return Err(self.cancelled(cycle));
    }

    let mut staged = self.state.clone();
    let mut alert_events = Vec::new();
    for a in &assessments {
      staged.zone_tiers.insert(a.zone_id.clone(), a.tier);
      if let Some(event) = staged.alerts.update(&a.zone_id, a.tier, cycle, at) {
        alert_events.push(event);
      }
    }
    if token.is_cancelled() {
      return Err(self.cancelled(cycle));
    }

    let outcome = {
      let ctx = MatchContext {
        config: &self.config,
        zone_tiers: &staged.zone_tiers,
        distance: self.distance.as_ref(),
      };
      staged.pool.dispatch(&mut staged.registry, &ctx)
    };
    staged.pool.assert_consistent(&staged.registry);
    if token.is_cancelled() {
      return Err(self.cancelled(cycle));
    }

    // Commit.
    staged.cycle = cycle;
    self.state = staged;
    self.anomalies.clear();
    let purged = TimeDelta::try_seconds(self.config.retention_secs)
      .and_then(|retention| at.checked_sub_signed(retention))
      .map(|cutoff| self.store.purge_all(cutoff))
      .unwrap_or(0);
    for event in &alert_events {
      event.log();
    }
    outcome.log();
    let mut assignments = std::mem::take(&mut self.early_assignments);
    assignments.extend(outcome.assignments);

    tracing::info!(
      zones = assessments.len(),
      alert_events = alert_events.len(),
      assignments = assignments.len(),
      unmatched = outcome.unmatched.len(),
      purged,
      "cycle committed"
    );

    Ok(CycleReport {
      cycle,
      at,
      zones: assessments,
      alert_events,
      active_alerts: self.active_alerts(),
      assignments,
      unmatched_incidents: outcome.unmatched,
      unresolved_incidents: self.unresolved_incidents(),
      units: self.units(),
    })
  }

  fn cancelled(&self, cycle: u64) -> EngineError {
    tracing::warn!(cycle, "cycle cancelled before commit");
    EngineError::Cancelled(cycle)
  }

  /// Predict and classify every zone. Zones are independent, so this runs in parallel.
  fn assess_zones(&self, at: DateTime<Utc>) -> Vec<ZoneAssessment> {
    let zones: Vec<&Zone> = self.zones.values().collect();
    let window = self.config.window_size();
    let config = &self.config;
    let store = &self.store;
    let anomalies = &self.anomalies;

    zones
      .par_iter()
      .map(|zone| {
        let series = store.series(&zone.id, window);
        let mut prediction = predictor::predict(&zone.id, series, at, config);
        prediction.bottleneck_probability = predictor::bottleneck_probability(
          &prediction,
          series,
          zone.capacity,
          config.thresholds.high,
          config,
        );
        let ratio = classifier::occupancy_ratio(&prediction, zone.capacity);
        let anomaly_score = anomalies.get(&zone.id).copied();
        let tier = classifier::apply_anomaly(
          classifier::classify(&prediction, zone.capacity, &config.thresholds),
          anomaly_score,
          config.anomaly_threshold,
        );
        ZoneAssessment {
          zone_id: zone.id.clone(),
          tier,
          occupancy_ratio: (ratio * 1000.0).round() / 1000.0,
          prediction,
          anomaly_score,
        }
      })
      .collect()
  }
}
