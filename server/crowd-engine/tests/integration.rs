//! Integration tests for the crowd engine, driven through the wire contract.

use crowd_engine::types::{AlertEventKind, Availability, IncidentState, RiskTier};
use crowd_engine::{Config, Engine, InboundMessage, OutputLine, VenueConfig};

fn msg(json: &str) -> InboundMessage {
  serde_json::from_str(json).unwrap()
}

fn venue() -> Engine {
  let json = r#"{
    "engine": { "clear_after_low_cycles": 2 },
    "zones": [
      {"id": "gate-a", "name": "Gate A", "capacity": 1000, "adjacent": ["plaza"]},
      {"id": "plaza", "capacity": 2000, "adjacent": ["stage"]},
      {"id": "stage", "capacity": 3000}
    ],
    "units": [
      {"id": "med-1", "type": "medical", "zone_id": "stage"},
      {"id": "sec-1", "type": "security", "zone_id": "plaza"},
      {"id": "gen-1", "type": "general", "zone_id": "stage"}
    ]
  }"#;
  let venue: VenueConfig = serde_json::from_str(json).unwrap();
  Engine::from_venue(venue).unwrap()
}

fn observe(engine: &mut Engine, zone: &str, sec: u32, occupancy: i64, inflow: f64) {
  let line = format!(
    r#"{{"kind":"observation","zone_id":"{}","timestamp":"2025-07-04T18:00:{:02}Z","occupancy":{},"inflow":{},"outflow":0}}"#,
    zone, sec, occupancy, inflow
  );
  assert!(engine.process(&msg(&line)).unwrap().is_none());
}

fn tick(engine: &mut Engine, at: &str) -> crowd_engine::CycleReport {
  let line = format!(r#"{{"kind":"tick","at":"{}"}}"#, at);
  match engine.process(&msg(&line)).unwrap() {
    Some(OutputLine::Cycle(report)) => report,
    other => panic!("expected cycle report, got {:?}", other),
  }
}

#[test]
fn surge_at_gate_raises_then_clears_alert() {
  let mut engine = venue();
  observe(&mut engine, "gate-a", 0, 600, 175.0);
  observe(&mut engine, "gate-a", 10, 775, 175.0);
  observe(&mut engine, "gate-a", 20, 950, 175.0);

  let report = tick(&mut engine, "2025-07-04T18:00:30Z");
  let gate = report.zones.iter().find(|z| z.zone_id == "gate-a").unwrap();
  assert_eq!(gate.tier, RiskTier::Critical);
  assert_eq!(gate.prediction.time_to_peak_secs, Some(20));
  assert_eq!(gate.prediction.bottleneck_probability, Some(1.0));
  assert_eq!(report.alert_events.len(), 1);
  assert_eq!(report.alert_events[0].kind, AlertEventKind::Raised);

  // Crowd disperses.
  observe(&mut engine, "gate-a", 40, 100, 0.0);
  observe(&mut engine, "gate-a", 41, 90, 0.0);
  observe(&mut engine, "gate-a", 42, 80, 0.0);

  let second = tick(&mut engine, "2025-07-04T18:00:50Z");
  assert!(second.alert_events.is_empty());
  assert_eq!(second.active_alerts.len(), 1);
  assert_eq!(second.active_alerts[0].consecutive_low_cycles, 1);

  let third = tick(&mut engine, "2025-07-04T18:00:55Z");
  assert_eq!(third.alert_events.len(), 1);
  assert_eq!(third.alert_events[0].kind, AlertEventKind::Cleared);
  assert!(third.active_alerts.is_empty());
}

#[test]
fn report_and_resolve_round_trip_through_wire() {
  let mut engine = venue();
  let out = engine
    .process(&msg(
      r#"{"kind":"report","type":"Medical","zone_id":"gate-a","reported_at":"2025-07-04T18:01:00Z"}"#,
    ))
    .unwrap();
  let incident = match out {
    Some(OutputLine::IncidentReported { incident }) => incident,
    other => panic!("unexpected output {:?}", other),
  };
  assert_eq!(incident.incident_type, "medical");
  assert_eq!(incident.state, IncidentState::Assigned);
  // gen-1 and med-1 are both two hops away; gen-1 wins on unit id.
  assert_eq!(incident.assigned_unit_id.as_deref(), Some("gen-1"));

  let line = format!(
    r#"{{"kind":"resolve","incident_id":"{}","at":"2025-07-04T18:05:00Z"}}"#,
    incident.incident_id
  );
  match engine.process(&msg(&line)).unwrap() {
    Some(OutputLine::IncidentResolved {
      incident,
      released_unit_id,
    }) => {
      assert_eq!(incident.state, IncidentState::Resolved);
      assert_eq!(released_unit_id.as_deref(), Some("gen-1"));
    }
    other => panic!("unexpected output {:?}", other),
  }
  assert_eq!(engine.unit("gen-1").unwrap().availability, Availability::Free);

  // Resolving again is an error, not a panic.
  let err = engine.process(&msg(&line)).unwrap_err();
  assert_eq!(err.field(), Some("incident_id"));
}

#[test]
fn crowd_surge_outranks_earlier_medical_for_single_unit() {
  let json = r#"{
    "zones": [{"id": "gate-a", "capacity": 1000}],
    "units": []
  }"#;
  let mut engine = Engine::from_venue(serde_json::from_str(json).unwrap()).unwrap();
  let reporter = engine.reporter();
  let at = |s: &str| -> chrono::DateTime<chrono::Utc> { s.parse().unwrap() };
  let medical = reporter.report("medical", "gate-a", at("2025-07-04T18:00:00Z")).unwrap();
  let surge = reporter.report("crowd-surge", "gate-a", at("2025-07-04T18:00:05Z")).unwrap();

  engine
    .process(&msg(r#"{"kind":"unit","id":"g-1","type":"general","zone_id":"gate-a"}"#))
    .unwrap();
  let report = tick(&mut engine, "2025-07-04T18:00:10Z");
  assert_eq!(report.assignments.len(), 1);
  assert_eq!(report.assignments[0].incident_id, surge.incident_id);
  assert_eq!(report.unmatched_incidents, vec![medical.incident_id.clone()]);
  assert_eq!(
    engine.incident(&medical.incident_id).unwrap().state,
    IncidentState::Open
  );
}

#[test]
fn resolved_unit_serves_waiting_incident_next_cycle() {
  let json = r#"{
    "zones": [
      {"id": "gate-a", "capacity": 1000, "adjacent": ["plaza"]},
      {"id": "plaza", "capacity": 2000}
    ],
    "units": [{"id": "med-1", "type": "medical", "zone_id": "plaza"}]
  }"#;
  let mut engine = Engine::from_venue(serde_json::from_str(json).unwrap()).unwrap();
  let at = |s: &str| -> chrono::DateTime<chrono::Utc> { s.parse().unwrap() };

  let first = engine.report("medical", "gate-a", at("2025-07-04T18:00:00Z")).unwrap();
  let second = engine.report("medical", "plaza", at("2025-07-04T18:00:05Z")).unwrap();
  assert_eq!(first.assigned_unit_id.as_deref(), Some("med-1"));
  assert_eq!(second.state, IncidentState::Open);

  let report = tick(&mut engine, "2025-07-04T18:00:10Z");
  assert_eq!(report.unmatched_incidents, vec![second.incident_id.clone()]);

  let (_, released) = engine.resolve(&first.incident_id, at("2025-07-04T18:00:20Z")).unwrap();
  assert_eq!(released.as_deref(), Some("med-1"));

  let report = tick(&mut engine, "2025-07-04T18:00:30Z");
  assert_eq!(report.assignments.len(), 1);
  assert_eq!(report.assignments[0].incident_id, second.incident_id);
  assert_eq!(report.assignments[0].unit_id, "med-1");
  assert!(report.unmatched_incidents.is_empty());
  assert_eq!(engine.unit("med-1").unwrap().availability, Availability::Busy);
}

#[test]
fn wire_errors_name_their_field() {
  let mut engine = venue();
  let err = engine
    .process(&msg(
      r#"{"kind":"observation","zone_id":"gate-a","timestamp":"2025-07-04T18:00:10Z","occupancy":-4}"#,
    ))
    .unwrap_err();
  assert_eq!(err.field(), Some("occupancy"));

  let err = engine
    .process(&msg(r#"{"kind":"report","type":"fire","zone_id":"moon","reported_at":"2025-07-04T18:00:10Z"}"#))
    .unwrap_err();
  assert_eq!(err.field(), Some("zone_id"));

  observe(&mut engine, "plaza", 30, 10, 0.0);
  let err = engine
    .process(&msg(
      r#"{"kind":"observation","zone_id":"plaza","timestamp":"2025-07-04T18:00:20Z","occupancy":10}"#,
    ))
    .unwrap_err();
  assert!(err.to_string().contains("out of order"));

  let err = engine
    .process(&msg(r#"{"kind":"unit_offline","unit_id":"ghost"}"#))
    .unwrap_err();
  assert_eq!(err.field(), Some("unit_id"));

  let err = engine
    .process(&msg(r#"{"kind":"tick","at":"later"}"#))
    .unwrap_err();
  assert_eq!(err.field(), Some("at"));
}

#[test]
fn offline_unit_hands_incident_to_next_pass() {
  let mut engine = venue();
  let out = engine
    .process(&msg(
      r#"{"kind":"report","type":"security","zone_id":"plaza","reported_at":"2025-07-04T18:01:00Z"}"#,
    ))
    .unwrap();
  let Some(OutputLine::IncidentReported { incident }) = out else {
    panic!("expected incident");
  };
  assert_eq!(incident.assigned_unit_id.as_deref(), Some("sec-1"));

  engine
    .process(&msg(r#"{"kind":"unit_offline","unit_id":"sec-1"}"#))
    .unwrap();
  assert_eq!(
    engine.incident(&incident.incident_id).unwrap().state,
    IncidentState::Open
  );

  // gen-1 is universal and picks it up on the next cycle. The report also
  // carries the earlier sec-1 assignment made when the incident arrived.
  let report = tick(&mut engine, "2025-07-04T18:02:00Z");
  let units: Vec<&str> = report.assignments.iter().map(|a| a.unit_id.as_str()).collect();
  assert_eq!(units, vec!["sec-1", "gen-1"]);
  let incident = engine.incident(&incident.incident_id).unwrap();
  assert_eq!(incident.assigned_unit_id.as_deref(), Some("gen-1"));
}

#[test]
fn identical_input_gives_identical_reports() {
  let run = || {
    let mut engine = venue();
    for (i, occ) in [500, 650, 800, 900].iter().enumerate() {
      observe(&mut engine, "gate-a", i as u32 * 5, *occ, 150.0);
      observe(&mut engine, "plaza", i as u32 * 5, 300, 0.0);
    }
    engine
      .process(&msg(r#"{"kind":"anomaly","zone_id":"plaza","score":0.8}"#))
      .unwrap();
    let report = tick(&mut engine, "2025-07-04T18:00:30Z");
    serde_json::to_string(&report).unwrap()
  };
  assert_eq!(run(), run());
}

#[test]
fn invalid_engine_config_rejected() {
  let config = Config {
    thresholds: crowd_engine::config::TierThresholds {
      moderate: 0.9,
      high: 0.8,
      critical: 0.95,
    },
    ..Config::default()
  };
  assert!(Engine::new(config).is_err());
}
