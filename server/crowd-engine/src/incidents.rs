//! Incident registry and asynchronous report intake.
//!
//! Reports may be filed from any thread through an [`IncidentReporter`]; they are
//! validated and given an id immediately, then queued until the engine drains
//! the intake at the start of its next matching pass.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;

use crate::error::EngineError;
use crate::types::{Incident, IncidentId, IncidentState, UnitId, ZoneId};

/// Zone ids known to the venue, shared with reporters on other threads.
pub type KnownZones = Arc<RwLock<BTreeSet<ZoneId>>>;

/// Validates reports and allocates ids. Shared by the registry and every reporter.
#[derive(Debug, Clone)]
struct IncidentFactory {
  zones: KnownZones,
  sequence: Arc<AtomicU64>,
}

impl IncidentFactory {
  fn create(
    &self,
    incident_type: &str,
    zone_id: &str,
    reported_at: DateTime<Utc>,
  ) -> Result<Incident, EngineError> {
    let incident_type = incident_type.trim().to_ascii_lowercase();
    if incident_type.is_empty() {
      return Err(EngineError::validation("type", "must not be empty"));
    }
    if !self.zones.read().contains(zone_id) {
      return Err(EngineError::InvalidZone(zone_id.to_string()));
    }
    let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
    Ok(Incident {
      incident_id: incident_id(seq, &incident_type, zone_id, reported_at),
      incident_type,
      zone_id: zone_id.to_string(),
      reported_at,
      state: IncidentState::Open,
      assigned_unit_id: None,
      resolved_at: None,
    })
  }
}

/// Stable incident id: hash of intake sequence + type + zone + report time.
fn incident_id(seq: u64, incident_type: &str, zone_id: &str, reported_at: DateTime<Utc>) -> IncidentId {
  let mut hasher = blake3::Hasher::new();
  hasher.update(&seq.to_le_bytes());
  hasher.update(b"|");
  hasher.update(incident_type.as_bytes());
  hasher.update(b"|");
  hasher.update(zone_id.as_bytes());
  hasher.update(b"|");
  hasher.update(reported_at.to_rfc3339().as_bytes());
  let hex = hasher.finalize().to_hex();
  format!("inc-{}", &hex[..16])
}

/// Cloneable handle for filing incident reports between cycles.
#[derive(Debug, Clone)]
pub struct IncidentReporter {
  factory: IncidentFactory,
  tx: Sender<Incident>,
}

impl IncidentReporter {
  /// Validate and enqueue a report. The returned incident is OPEN and will be
  /// visible to the registry at the next drain.
  pub fn report(
    &self,
    incident_type: &str,
    zone_id: &str,
    reported_at: DateTime<Utc>,
  ) -> Result<Incident, EngineError> {
    let incident = self.factory.create(incident_type, zone_id, reported_at)?;
    self
      .tx
      .send(incident.clone())
      .map_err(|_| EngineError::IntakeClosed)?;
    tracing::debug!(incident_id = %incident.incident_id, zone_id, "incident queued");
    Ok(incident)
  }
}

/// Receiving end of the report queue, owned by the engine.
#[derive(Debug)]
pub struct Intake {
  rx: Receiver<Incident>,
}

impl Intake {
  /// Everything queued so far, in arrival order.
  pub fn drain(&self) -> Vec<Incident> {
    self.rx.try_iter().collect()
  }
}

/// Unresolved incidents by id. Resolved incidents leave the map; only their ids
/// are kept so a second resolve is reported. The id set is copy-on-write, so
/// cloning the registry costs the live incidents only.
#[derive(Debug, Clone)]
pub struct IncidentRegistry {
  factory: IncidentFactory,
  incidents: BTreeMap<IncidentId, Incident>,
  resolved: Arc<BTreeSet<IncidentId>>,
}

impl IncidentRegistry {
  pub fn new(zones: KnownZones) -> Self {
    Self {
      factory: IncidentFactory {
        zones,
        sequence: Arc::new(AtomicU64::new(0)),
      },
      incidents: BTreeMap::new(),
      resolved: Arc::new(BTreeSet::new()),
    }
  }

  /// A reporter and the matching intake, sharing this registry's id sequence.
  pub fn intake(&self) -> (IncidentReporter, Intake) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (
      IncidentReporter {
        factory: self.factory.clone(),
        tx,
      },
      Intake { rx },
    )
  }

  /// File a report directly. Fails with `InvalidZone` for an unknown zone.
  pub fn report(
    &mut self,
    incident_type: &str,
    zone_id: &str,
    reported_at: DateTime<Utc>,
  ) -> Result<Incident, EngineError> {
    let incident = self.factory.create(incident_type, zone_id, reported_at)?;
    self.admit(incident.clone());
    Ok(incident)
  }

  /// Insert an incident produced by a reporter.
  pub fn admit(&mut self, incident: Incident) {
    assert_eq!(incident.state, IncidentState::Open, "admitted incident must be OPEN");
    let id = incident.incident_id.clone();
    assert!(!self.resolved.contains(&id), "incident {} admitted after resolve", id);
    let previous = self.incidents.insert(id.clone(), incident);
    assert!(previous.is_none(), "incident {} admitted twice", id);
  }

  /// An unresolved incident.
  pub fn get(&self, incident_id: &str) -> Option<&Incident> {
    self.incidents.get(incident_id)
  }

  pub fn is_resolved(&self, incident_id: &str) -> bool {
    self.resolved.contains(incident_id)
  }

  /// OPEN|ASSIGNED -> RESOLVED. Returns the resolved incident and the unit it held.
  pub fn resolve(
    &mut self,
    incident_id: &str,
    at: DateTime<Utc>,
  ) -> Result<(Incident, Option<UnitId>), EngineError> {
    if self.resolved.contains(incident_id) {
      return Err(EngineError::AlreadyResolved(incident_id.to_string()));
    }
    let mut incident = self
      .incidents
      .remove(incident_id)
      .ok_or_else(|| EngineError::NotFound(incident_id.to_string()))?;
    let released = incident.assigned_unit_id.clone();
    incident.state = IncidentState::Resolved;
    incident.resolved_at = Some(at);
    Arc::make_mut(&mut self.resolved).insert(incident.incident_id.clone());
    tracing::info!(incident_id, released_unit = ?released, "incident resolved");
    Ok((incident, released))
  }

  /// OPEN -> ASSIGNED. Only the dispatch matcher calls this.
  pub(crate) fn assign(&mut self, incident_id: &str, unit_id: &str) {
    let incident = self
      .incidents
      .get_mut(incident_id)
      .unwrap_or_else(|| panic!("assigning unknown incident {}", incident_id));
    assert_eq!(
      incident.state,
      IncidentState::Open,
      "incident {} must be OPEN to be assigned",
      incident_id
    );
    incident.state = IncidentState::Assigned;
    incident.assigned_unit_id = Some(unit_id.to_string());
  }

  /// ASSIGNED -> OPEN when its unit is pulled offline.
  pub(crate) fn reopen(&mut self, incident_id: &str) {
    let incident = self
      .incidents
      .get_mut(incident_id)
      .unwrap_or_else(|| panic!("reopening unknown incident {}", incident_id));
    assert_eq!(
      incident.state,
      IncidentState::Assigned,
      "incident {} must be ASSIGNED to be reopened",
      incident_id
    );
    incident.state = IncidentState::Open;
    incident.assigned_unit_id = None;
  }

  pub fn open(&self) -> impl Iterator<Item = &Incident> {
    self
      .incidents
      .values()
      .filter(|i| i.state == IncidentState::Open)
  }

  /// OPEN and ASSIGNED incidents, in id order.
  pub fn unresolved(&self) -> impl Iterator<Item = &Incident> {
    self.incidents.values()
  }

  /// The ASSIGNED incident holding `unit_id`, if any.
  pub fn assigned_to(&self, unit_id: &str) -> Option<&Incident> {
    self.incidents.values().find(|i| {
      i.state == IncidentState::Assigned && i.assigned_unit_id.as_deref() == Some(unit_id)
    })
  }
}
