//! Per-zone alert lifecycle: raise, escalate, clear with hysteresis.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::types::{Alert, AlertEvent, AlertEventKind, AlertState, RiskTier, ZoneId};

/// Open alerts keyed by zone. A zone has at most one ACTIVE/ESCALATED alert.
#[derive(Debug, Clone)]
pub struct AlertBook {
  clear_after_low_cycles: u32,
  active: BTreeMap<ZoneId, Alert>,
}

impl AlertBook {
  pub fn new(clear_after_low_cycles: u32) -> Self {
    Self {
      clear_after_low_cycles: clear_after_low_cycles.max(1),
      active: BTreeMap::new(),
    }
  }

  /// Open alerts in zone order.
  pub fn active(&self) -> impl Iterator<Item = &Alert> {
    self.active.values()
  }

  pub fn get(&self, zone_id: &str) -> Option<&Alert> {
    self.active.get(zone_id)
  }

  /// Feed one cycle's tier for a zone into its alert state machine.
  ///
  /// Returns the alert-changed event, if any. Repeating the same tier within the
  /// same cycle is a no-op.
  pub fn update(
    &mut self,
    zone_id: &str,
    tier: RiskTier,
    cycle: u64,
    at: DateTime<Utc>,
  ) -> Option<AlertEvent> {
    if !self.active.contains_key(zone_id) {
      return self.raise(zone_id, tier, cycle, at);
    }
    let alert = self.active.get_mut(zone_id)?;

    if alert.last_cycle == cycle && alert.last_tier_seen == tier {
      return None;
    }
    alert.last_cycle = cycle;
    alert.last_tier_seen = tier;

    if tier == RiskTier::Low {
      alert.consecutive_low_cycles += 1;
      if alert.consecutive_low_cycles < self.clear_after_low_cycles {
        return None;
      }
      let mut cleared = self.active.remove(zone_id)?;
      cleared.state = AlertState::Cleared;
      cleared.last_updated_at = at;
      return Some(AlertEvent {
        kind: AlertEventKind::Cleared,
        at,
        alert: cleared,
      });
    }

    alert.consecutive_low_cycles = 0;
    if tier > alert.tier {
      alert.tier = tier;
      alert.state = AlertState::Escalated;
      alert.last_updated_at = at;
      return Some(AlertEvent {
        kind: AlertEventKind::Escalated,
        at,
        alert: alert.clone(),
      });
    }
    if tier < alert.tier {
      alert.tier = tier;
      alert.last_updated_at = at;
    }
    None
  }

  fn raise(&mut self, zone_id: &str, tier: RiskTier, cycle: u64, at: DateTime<Utc>) -> Option<AlertEvent> {
    if !tier.is_elevated() {
      return None;
    }
    let alert = Alert {
      alert_id: alert_id(zone_id, at, cycle),
      zone_id: zone_id.to_string(),
      tier,
      raised_at: at,
      last_updated_at: at,
      state: AlertState::Active,
      consecutive_low_cycles: 0,
      last_cycle: cycle,
      last_tier_seen: tier,
    };
    let previous = self.active.insert(zone_id.to_string(), alert.clone());
    assert!(
      previous.is_none(),
      "zone {} already had an open alert",
      zone_id
    );
    Some(AlertEvent {
      kind: AlertEventKind::Raised,
      at,
      alert,
    })
  }
}

impl AlertEvent {
  /// Log a committed alert transition.
  pub fn log(&self) {
    let a = &self.alert;
    match self.kind {
      AlertEventKind::Raised => {
        tracing::warn!(alert_id = %a.alert_id, zone_id = %a.zone_id, tier = ?a.tier, "alert raised")
      }
      AlertEventKind::Escalated => {
        tracing::warn!(alert_id = %a.alert_id, zone_id = %a.zone_id, tier = ?a.tier, "alert escalated")
      }
      AlertEventKind::Cleared => tracing::info!(
        alert_id = %a.alert_id,
        zone_id = %a.zone_id,
        low_cycles = a.consecutive_low_cycles,
        "alert cleared"
      ),
    }
  }
}

/// Stable alert id: hash of zone + raise time + cycle.
fn alert_id(zone_id: &str, at: DateTime<Utc>, cycle: u64) -> String {
  let mut hasher = blake3::Hasher::new();
  hasher.update(zone_id.as_bytes());
  hasher.update(b"|");
  hasher.update(at.to_rfc3339().as_bytes());
  hasher.update(b"|");
  hasher.update(&cycle.to_le_bytes());
  let hex = hasher.finalize().to_hex();
  format!("alr-{}", &hex[..16])
}
