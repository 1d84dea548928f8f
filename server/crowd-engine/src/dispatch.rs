//! Dispatch matcher: assign free response units to open incidents.
//!
//! Greedy and deterministic. Incidents are ranked by type priority, then zone risk
//! tier, then report time; each takes the nearest compatible FREE unit, lowest
//! unit id on ties. No global optimisation is attempted.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::config::{Config, DistanceKind};
use crate::error::EngineError;
use crate::incidents::IncidentRegistry;
use crate::types::{
  Assignment, Availability, GeoPoint, Incident, IncidentId, IncidentState, ResponseUnit, RiskTier,
  UnitId, Zone, ZoneId,
};

// ---------------------------------------------------------------------------
// Distance proxies
// ---------------------------------------------------------------------------

/// Cost of sending a unit from one zone to another. Lower is closer.
///
/// `f64::INFINITY` means "no known route"; such units stay eligible but rank last.
pub trait DistanceProxy: Send + Sync {
  fn distance(&self, from: &str, to: &str) -> f64;
}

/// Hop count over the zone adjacency graph (edges are undirected).
#[derive(Debug, Clone, Default)]
pub struct AdjacencyHops {
  edges: BTreeMap<ZoneId, BTreeSet<ZoneId>>,
}

impl AdjacencyHops {
  pub fn new<'a>(zones: impl IntoIterator<Item = &'a Zone>) -> Self {
    let mut edges: BTreeMap<ZoneId, BTreeSet<ZoneId>> = BTreeMap::new();
    for zone in zones {
      edges.entry(zone.id.clone()).or_default();
      for other in &zone.adjacent {
        edges.entry(zone.id.clone()).or_default().insert(other.clone());
        edges.entry(other.clone()).or_default().insert(zone.id.clone());
      }
    }
    Self { edges }
  }
}

impl DistanceProxy for AdjacencyHops {
  fn distance(&self, from: &str, to: &str) -> f64 {
    if from == to {
      return 0.0;
    }
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    let mut queue: VecDeque<(&str, u32)> = VecDeque::new();
    seen.insert(from);
    queue.push_back((from, 0));
    while let Some((zone, hops)) = queue.pop_front() {
      let Some(next) = self.edges.get(zone) else {
        continue;
      };
      for n in next {
        if n == to {
          return (hops + 1) as f64;
        }
        if seen.insert(n.as_str()) {
          queue.push_back((n.as_str(), hops + 1));
        }
      }
    }
    f64::INFINITY
  }
}

/// Great-circle metres between zone centres. Falls back to hop count when
/// either zone has no centre.
#[derive(Debug, Clone, Default)]
pub struct GreatCircle {
  centers: BTreeMap<ZoneId, GeoPoint>,
  hops: AdjacencyHops,
}

impl GreatCircle {
  pub fn new<'a>(zones: impl IntoIterator<Item = &'a Zone>) -> Self {
    let zones: Vec<&Zone> = zones.into_iter().collect();
    let centers = zones
      .iter()
      .filter_map(|z| z.center.map(|c| (z.id.clone(), c)))
      .collect();
    Self {
      centers,
      hops: AdjacencyHops::new(zones.iter().copied()),
    }
  }
}

impl DistanceProxy for GreatCircle {
  fn distance(&self, from: &str, to: &str) -> f64 {
    if from == to {
      return 0.0;
    }
    match (self.centers.get(from), self.centers.get(to)) {
      (Some(a), Some(b)) => haversine_m(*a, *b),
      _ => self.hops.distance(from, to),
    }
  }
}

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance in metres.
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
  let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
  let dlat = lat2 - lat1;
  let dlon = (b.lng - a.lng).to_radians();
  let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
  2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Build the configured distance proxy for a venue.
pub fn distance_proxy<'a>(
  kind: DistanceKind,
  zones: impl IntoIterator<Item = &'a Zone>,
) -> Box<dyn DistanceProxy> {
  match kind {
    DistanceKind::Adjacency => Box::new(AdjacencyHops::new(zones)),
    DistanceKind::Haversine => Box::new(GreatCircle::new(zones)),
  }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Inputs the matcher reads besides incidents and units.
pub struct MatchContext<'a> {
  pub config: &'a Config,
  pub zone_tiers: &'a BTreeMap<ZoneId, RiskTier>,
  pub distance: &'a dyn DistanceProxy,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchOutcome {
  pub assignments: Vec<Assignment>,
  /// Open incidents left without a compatible free unit, in rank order.
  pub unmatched: Vec<IncidentId>,
}

impl MatchOutcome {
  /// Log a committed match pass.
  pub fn log(&self) {
    for a in &self.assignments {
      tracing::info!(
        incident_id = %a.incident_id,
        unit_id = %a.unit_id,
        zone_id = %a.zone_id,
        distance = a.distance,
        "unit dispatched"
      );
    }
    for incident_id in &self.unmatched {
      tracing::warn!(incident_id = %incident_id, "no compatible free unit, incident stays open");
    }
  }
}

/// Rank open incidents: priority desc, zone tier desc, reported_at asc, id asc.
pub fn rank_incidents<'a>(open: &[&'a Incident], ctx: &MatchContext<'_>) -> Vec<&'a Incident> {
  let tier = |i: &Incident| {
    ctx
      .zone_tiers
      .get(&i.zone_id)
      .copied()
      .unwrap_or(RiskTier::Low)
  };
  let mut ranked: Vec<&Incident> = open.to_vec();
  ranked.sort_by(|a, b| {
    ctx
      .config
      .priority_of(&b.incident_type)
      .cmp(&ctx.config.priority_of(&a.incident_type))
      .then_with(|| tier(*b).cmp(&tier(*a)))
      .then_with(|| a.reported_at.cmp(&b.reported_at))
      .then_with(|| a.incident_id.cmp(&b.incident_id))
  });
  ranked
}

/// Compute assignments without mutating anything.
///
/// Each unit is used at most once per pass. Deterministic for identical input.
pub fn match_incidents(
  open: &[&Incident],
  units: &[&ResponseUnit],
  ctx: &MatchContext<'_>,
) -> MatchOutcome {
  let mut taken: BTreeSet<&str> = BTreeSet::new();
  let mut outcome = MatchOutcome::default();

  for incident in rank_incidents(open, ctx) {
    if incident.state != IncidentState::Open {
      continue;
    }
    let best = units
      .iter()
      .filter(|u| u.availability == Availability::Free && u.capacity_remaining > 0)
      .filter(|u| !taken.contains(u.unit_id.as_str()))
      .filter(|u| ctx.config.is_compatible(&incident.incident_type, &u.unit_type))
      .map(|u| (ctx.distance.distance(&u.current_zone_id, &incident.zone_id), *u))
      .min_by(|(da, a), (db, b)| {
        da.total_cmp(db)
          .then_with(|| a.unit_id.cmp(&b.unit_id))
      });

    match best {
      Some((distance, unit)) => {
        taken.insert(unit.unit_id.as_str());
        outcome.assignments.push(Assignment {
          incident_id: incident.incident_id.clone(),
          unit_id: unit.unit_id.clone(),
          zone_id: incident.zone_id.clone(),
          distance,
        });
      }
      None => outcome.unmatched.push(incident.incident_id.clone()),
    }
  }
  outcome
}

// ---------------------------------------------------------------------------
// Unit pool
// ---------------------------------------------------------------------------

/// The shared pool of response units. Every availability change goes through here.
#[derive(Debug, Clone, Default)]
pub struct UnitPool {
  units: BTreeMap<UnitId, ResponseUnit>,
}

impl UnitPool {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add or redefine a unit. A BUSY unit cannot be redefined.
  pub fn register(&mut self, unit: ResponseUnit) -> Result<(), EngineError> {
    if unit.unit_id.is_empty() {
      return Err(EngineError::validation("unit_id", "must not be empty"));
    }
    if unit.unit_type.is_empty() {
      return Err(EngineError::validation("type", "must not be empty"));
    }
    if let Some(existing) = self.units.get(&unit.unit_id) {
      if existing.availability == Availability::Busy {
        return Err(EngineError::validation(
          "unit_id",
          "unit is busy and cannot be redefined",
        ));
      }
    }
    if unit.availability == Availability::Busy {
      return Err(EngineError::validation(
        "availability",
        "units enter the pool FREE or OFFLINE",
      ));
    }
    self.units.insert(unit.unit_id.clone(), unit);
    Ok(())
  }

  pub fn get(&self, unit_id: &str) -> Option<&ResponseUnit> {
    self.units.get(unit_id)
  }

  pub fn units(&self) -> impl Iterator<Item = &ResponseUnit> {
    self.units.values()
  }

  /// Match open incidents against the pool and apply the result.
  pub fn dispatch(&mut self, registry: &mut IncidentRegistry, ctx: &MatchContext<'_>) -> MatchOutcome {
    let outcome = {
      let open: Vec<&Incident> = registry.open().collect();
      let units: Vec<&ResponseUnit> = self.units.values().collect();
      match_incidents(&open, &units, ctx)
    };
    for assignment in &outcome.assignments {
      self.assign(registry, assignment);
    }
    outcome
  }

  fn assign(&mut self, registry: &mut IncidentRegistry, assignment: &Assignment) {
    let unit = self
      .units
      .get_mut(&assignment.unit_id)
      .unwrap_or_else(|| panic!("assigning unknown unit {}", assignment.unit_id));
    assert!(
      unit.availability == Availability::Free && unit.capacity_remaining > 0,
      "unit {} must be FREE with capacity to be assigned",
      unit.unit_id
    );
    unit.availability = Availability::Busy;
    unit.capacity_remaining -= 1;
    unit.current_zone_id = assignment.zone_id.clone();
    registry.assign(&assignment.incident_id, &assignment.unit_id);
  }

  /// BUSY -> FREE after the unit's incident resolved; capacity is restored.
  pub fn release(&mut self, unit_id: &str) -> Result<(), EngineError> {
    let unit = self
      .units
      .get_mut(unit_id)
      .ok_or_else(|| EngineError::UnknownUnit(unit_id.to_string()))?;
    assert_eq!(
      unit.availability,
      Availability::Busy,
      "released unit {} was not BUSY",
      unit_id
    );
    unit.availability = Availability::Free;
    unit.capacity_remaining += 1;
    tracing::info!(unit_id, "unit released");
    Ok(())
  }

  /// Take a unit out of service. A BUSY unit's incident goes back to OPEN.
  pub fn set_offline(
    &mut self,
    unit_id: &str,
    registry: &mut IncidentRegistry,
  ) -> Result<Option<IncidentId>, EngineError> {
    let unit = self
      .units
      .get_mut(unit_id)
      .ok_or_else(|| EngineError::UnknownUnit(unit_id.to_string()))?;
    let reopened = match unit.availability {
      Availability::Busy => {
        let incident_id = registry
          .assigned_to(unit_id)
          .map(|i| i.incident_id.clone())
          .unwrap_or_else(|| panic!("BUSY unit {} has no assigned incident", unit_id));
        registry.reopen(&incident_id);
        unit.capacity_remaining += 1;
        tracing::warn!(unit_id, incident_id = %incident_id, "busy unit taken offline, incident reopened");
        Some(incident_id)
      }
      Availability::Free | Availability::Offline => None,
    };
    unit.availability = Availability::Offline;
    Ok(reopened)
  }

  /// OFFLINE -> FREE. No-op for units already in service.
  pub fn set_online(&mut self, unit_id: &str) -> Result<(), EngineError> {
    let unit = self
      .units
      .get_mut(unit_id)
      .ok_or_else(|| EngineError::UnknownUnit(unit_id.to_string()))?;
    if unit.availability == Availability::Offline {
      unit.availability = Availability::Free;
    }
    Ok(())
  }

  /// Panics unless every BUSY unit is held by exactly one ASSIGNED incident and
  /// every ASSIGNED incident points at a BUSY unit.
  pub fn assert_consistent(&self, registry: &IncidentRegistry) {
    let mut holders: BTreeMap<&str, usize> = BTreeMap::new();
    for incident in registry.unresolved() {
      if incident.state != IncidentState::Assigned {
        continue;
      }
      let unit_id = incident
        .assigned_unit_id
        .as_deref()
        .unwrap_or_else(|| panic!("ASSIGNED incident {} has no unit", incident.incident_id));
      let unit = self
        .units
        .get(unit_id)
        .unwrap_or_else(|| panic!("incident {} references unknown unit {}", incident.incident_id, unit_id));
      assert_eq!(
        unit.availability,
        Availability::Busy,
        "unit {} holds incident {} but is not BUSY",
        unit_id,
        incident.incident_id
      );
      *holders.entry(unit_id).or_default() += 1;
    }
    for unit in self.units.values() {
      let held = holders.get(unit.unit_id.as_str()).copied().unwrap_or(0);
      match unit.availability {
        Availability::Busy => assert_eq!(held, 1, "BUSY unit {} held by {} incidents", unit.unit_id, held),
        _ => assert_eq!(held, 0, "unit {} is not BUSY but holds an incident", unit.unit_id),
      }
    }
  }
}
