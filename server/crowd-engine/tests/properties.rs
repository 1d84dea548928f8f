//! Property tests for alert lifecycle, classification and dispatch invariants.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use crowd_engine::alerts::AlertBook;
use crowd_engine::classifier::tier_for_ratio;
use crowd_engine::config::TierThresholds;
use crowd_engine::dispatch::{match_incidents, AdjacencyHops, MatchContext};
use crowd_engine::types::{
  AlertEventKind, AlertState, Availability, Incident, IncidentState, InboundUnit, ResponseUnit,
  RiskTier, Zone, ZoneObservation,
};
use crowd_engine::{Config, Engine};

const ZONES: [&str; 4] = ["gate-a", "plaza", "stage", "exit"];
const INCIDENT_TYPES: [&str; 5] = ["medical", "fire", "security", "crowd-surge", "lost-person"];
const UNIT_TYPES: [&str; 5] = ["medical", "fire", "security", "general", "volunteer"];

fn ts(sec: i64) -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2025, 7, 4, 18, 0, 0).unwrap() + Duration::seconds(sec)
}

fn tier_strategy() -> impl Strategy<Value = RiskTier> {
  prop_oneof![
    Just(RiskTier::Low),
    Just(RiskTier::Moderate),
    Just(RiskTier::High),
    Just(RiskTier::Critical),
  ]
}

fn venue_zones() -> Vec<Zone> {
  ZONES
    .iter()
    .enumerate()
    .map(|(i, id)| Zone {
      id: id.to_string(),
      name: String::new(),
      capacity: 1000,
      center: None,
      adjacent: ZONES.get(i + 1).map(|n| vec![n.to_string()]).unwrap_or_default(),
    })
    .collect()
}

#[derive(Debug, Clone)]
enum Op {
  Report(usize, usize),
  Resolve(usize),
  Offline(usize),
  Online(usize),
  Tick,
}

fn op_strategy() -> impl Strategy<Value = Op> {
  prop_oneof![
    3 => (0..INCIDENT_TYPES.len(), 0..ZONES.len()).prop_map(|(t, z)| Op::Report(t, z)),
    2 => (0..16usize).prop_map(Op::Resolve),
    1 => (0..4usize).prop_map(Op::Offline),
    1 => (0..4usize).prop_map(Op::Online),
    2 => Just(Op::Tick),
  ]
}

/// One cycle's worth of input: per-zone (occupancy, inflow, outflow) samples and
/// an optional anomaly score per zone.
type CycleInput = (Vec<(usize, u32, f64, f64)>, Vec<(usize, f64)>);

fn cycle_strategy() -> impl Strategy<Value = CycleInput> {
  (
    prop::collection::vec((0..ZONES.len(), 0u32..1500, 0.0f64..300.0, 0.0f64..300.0), 0..8),
    prop::collection::vec((0..ZONES.len(), 0.0f64..=1.0), 0..3),
  )
}

proptest! {
  #[test]
  fn at_most_one_open_alert_per_zone_under_random_feeds(
    cycles in prop::collection::vec(cycle_strategy(), 1..25),
    clear_after in 1u32..4,
  ) {
    let mut engine = Engine::new(Config {
      clear_after_low_cycles: clear_after,
      ..Config::default()
    })
    .unwrap();
    for zone in venue_zones() {
      engine.add_zone(&zone).unwrap();
    }

    let mut clock = 0i64;
    for (observations, anomalies) in cycles {
      for (z, occupancy, inflow, outflow) in observations {
        clock += 1;
        engine
          .record(ZoneObservation {
            zone_id: ZONES[z].to_string(),
            timestamp: ts(clock),
            occupancy_count: occupancy,
            inflow_rate: inflow,
            outflow_rate: outflow,
          })
          .unwrap();
      }
      for (z, score) in anomalies {
        engine.signal_anomaly(ZONES[z], score).unwrap();
      }
      clock += 1;
      let report = engine.run_cycle(ts(clock)).unwrap();

      let alerts = engine.active_alerts();
      let zones: BTreeSet<&str> = alerts.iter().map(|a| a.zone_id.as_str()).collect();
      prop_assert_eq!(zones.len(), alerts.len());
      for alert in &alerts {
        prop_assert!(matches!(alert.state, AlertState::Active | AlertState::Escalated));
        prop_assert!(alert.tier.is_elevated());
      }
      prop_assert_eq!(report.active_alerts.len(), alerts.len());
      let raised = report
        .alert_events
        .iter()
        .filter(|e| e.kind == AlertEventKind::Raised)
        .count();
      prop_assert!(raised <= ZONES.len());
    }
  }

  #[test]
  fn tiers_are_monotonic_in_ratio(a in 0.0f64..2.0, b in 0.0f64..2.0) {
    let t = TierThresholds::default();
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    prop_assert!(tier_for_ratio(lo, &t) <= tier_for_ratio(hi, &t));
  }

  #[test]
  fn alert_events_follow_lifecycle(tiers in prop::collection::vec(tier_strategy(), 1..60), clear_after in 1u32..5) {
    let mut book = AlertBook::new(clear_after);
    let mut open = false;
    let mut lows = 0u32;
    for (cycle, tier) in tiers.into_iter().enumerate() {
      let before = book.get("gate-a").map(|a| a.tier);
      let event = book.update("gate-a", tier, cycle as u64 + 1, ts(cycle as i64));
      match event.as_ref().map(|e| e.kind) {
        Some(AlertEventKind::Raised) => {
          prop_assert!(!open);
          prop_assert!(tier.is_elevated());
          open = true;
          lows = 0;
        }
        Some(AlertEventKind::Escalated) => {
          prop_assert!(open);
          prop_assert!(Some(tier) > before);
        }
        Some(AlertEventKind::Cleared) => {
          prop_assert!(open);
          prop_assert_eq!(lows + 1, clear_after);
          open = false;
        }
        None => {}
      }
      if open && tier == RiskTier::Low {
        lows += 1;
      } else if tier != RiskTier::Low {
        lows = 0;
      }
      prop_assert_eq!(book.get("gate-a").is_some(), open);
      prop_assert!(book.active().count() <= 1);
    }
  }

  #[test]
  fn interrupted_low_run_never_clears(clear_after in 2u32..6, resume in prop_oneof![Just(RiskTier::Moderate), Just(RiskTier::High), Just(RiskTier::Critical)]) {
    let mut book = AlertBook::new(clear_after);
    book.update("plaza", RiskTier::High, 1, ts(0));
    let mut cycle = 2u64;
    for _ in 0..clear_after - 1 {
      prop_assert!(book.update("plaza", RiskTier::Low, cycle, ts(cycle as i64)).is_none());
      cycle += 1;
    }
    book.update("plaza", resume, cycle, ts(cycle as i64));
    let alert = book.get("plaza").cloned();
    prop_assert!(alert.is_some());
    prop_assert_eq!(alert.map(|a| a.consecutive_low_cycles), Some(0));
  }

  #[test]
  fn matcher_ignores_input_order(
    incidents in prop::collection::vec((0..INCIDENT_TYPES.len(), 0..ZONES.len(), 0i64..60), 0..12),
    units in prop::collection::vec((0..UNIT_TYPES.len(), 0..ZONES.len()), 0..8),
  ) {
    let incidents: Vec<Incident> = incidents
      .into_iter()
      .enumerate()
      .map(|(i, (t, z, sec))| Incident {
        incident_id: format!("inc-{:04}", i),
        incident_type: INCIDENT_TYPES[t].to_string(),
        zone_id: ZONES[z].to_string(),
        reported_at: ts(sec),
        state: IncidentState::Open,
        assigned_unit_id: None,
        resolved_at: None,
      })
      .collect();
    let units: Vec<ResponseUnit> = units
      .into_iter()
      .enumerate()
      .map(|(i, (t, z))| ResponseUnit {
        unit_id: format!("u-{:02}", i),
        unit_type: UNIT_TYPES[t].to_string(),
        current_zone_id: ZONES[z].to_string(),
        capacity_remaining: 1,
        availability: Availability::Free,
      })
      .collect();

    let config = Config::default();
    let tiers = BTreeMap::new();
    let zones = venue_zones();
    let hops = AdjacencyHops::new(&zones);
    let ctx = MatchContext { config: &config, zone_tiers: &tiers, distance: &hops };

    let open: Vec<&Incident> = incidents.iter().collect();
    let unit_refs: Vec<&ResponseUnit> = units.iter().collect();
    let mut open_rev = open.clone();
    open_rev.reverse();
    let mut units_rev = unit_refs.clone();
    units_rev.reverse();

    let a = match_incidents(&open, &unit_refs, &ctx);
    let b = match_incidents(&open_rev, &units_rev, &ctx);
    prop_assert_eq!(&a, &b);

    let used: BTreeSet<&str> = a.assignments.iter().map(|x| x.unit_id.as_str()).collect();
    prop_assert_eq!(used.len(), a.assignments.len());
    prop_assert_eq!(a.assignments.len() + a.unmatched.len(), incidents.len());
  }

  #[test]
  fn busy_units_and_assigned_incidents_stay_paired(ops in prop::collection::vec(op_strategy(), 1..40)) {
    let mut engine = Engine::with_defaults();
    for zone in venue_zones() {
      engine.add_zone(&zone).unwrap();
    }
    for (i, kind) in ["medical", "security", "general", "fire"].iter().enumerate() {
      engine
        .register_unit(&InboundUnit {
          id: format!("u-{}", i),
          unit_type: kind.to_string(),
          zone_id: ZONES[i].to_string(),
          capacity: 1,
        })
        .unwrap();
    }

    let mut reported: Vec<String> = Vec::new();
    for (step, op) in ops.into_iter().enumerate() {
      let at = ts(step as i64);
      match op {
        Op::Report(t, z) => {
          let inc = engine.report(INCIDENT_TYPES[t], ZONES[z], at).unwrap();
          reported.push(inc.incident_id);
        }
        Op::Resolve(i) => {
          if let Some(id) = reported.get(i) {
            let _ = engine.resolve(id, at);
          }
        }
        Op::Offline(u) => {
          engine.set_unit_offline(&format!("u-{}", u)).unwrap();
        }
        Op::Online(u) => {
          engine.set_unit_online(&format!("u-{}", u)).unwrap();
        }
        Op::Tick => {
          engine.run_cycle(at).unwrap();
        }
      }

      let holders: BTreeMap<String, usize> = engine
        .unresolved_incidents()
        .into_iter()
        .filter(|i| i.state == IncidentState::Assigned)
        .fold(BTreeMap::new(), |mut acc, i| {
          *acc.entry(i.assigned_unit_id.unwrap_or_default()).or_default() += 1;
          acc
        });
      for unit in engine.units() {
        let held = holders.get(&unit.unit_id).copied().unwrap_or(0);
        if unit.availability == Availability::Busy {
          prop_assert_eq!(held, 1);
        } else {
          prop_assert_eq!(held, 0);
        }
      }
      prop_assert_eq!(holders.values().sum::<usize>(), holders.len());
    }
  }
}
