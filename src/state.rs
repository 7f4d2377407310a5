//! Read-only game state consumed by the effects chain.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Recent journal events plus the projected state map, keyed by projection name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSnapshot {
    pub recent_events: Vec<Value>,
    pub projected: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vehicle {
    Ship,
    Srv,
    Suit,
    Fighter,
    Unknown,
}

impl Vehicle {
    pub fn label(self) -> &'static str {
        match self {
            Vehicle::Ship => "ship",
            Vehicle::Srv => "srv",
            Vehicle::Suit => "suit",
            Vehicle::Fighter => "fighter",
            Vehicle::Unknown => "unknown",
        }
    }
}

impl StateSnapshot {
    fn status_flag(&self, group: &str, flag: &str) -> bool {
        self.projected
            .get("CurrentStatus")
            .and_then(|status| status.get(group))
            .and_then(|flags| flags.get(flag))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn vehicle(&self) -> Vehicle {
        if self.status_flag("flags2", "OnFoot") {
            Vehicle::Suit
        } else if self.status_flag("flags", "InSRV") {
            Vehicle::Srv
        } else if self.status_flag("flags", "InFighter") {
            Vehicle::Fighter
        } else if self.status_flag("flags", "InMainShip") {
            Vehicle::Ship
        } else {
            Vehicle::Unknown
        }
    }

    /// Damage in `[0, 1]`: hull damage in a vehicle, suit health loss on foot.
    /// `None` when the relevant health value is not projected yet.
    pub fn damage_level(&self) -> Option<f32> {
        let health = if self.vehicle() == Vehicle::Suit {
            self.projected
                .get("CurrentStatus")
                .and_then(|status| status.get("Health"))
        } else {
            self.projected
                .get("Loadout")
                .and_then(|loadout| loadout.get("HullHealth"))
        };
        let health = health.and_then(Value::as_f64)? as f32;
        Some((1.0 - health).clamp(0.0, 1.0))
    }
}

/// Supplies the current game state snapshot.
pub trait StateProvider: Send + Sync {
    fn current_state(&self) -> StateSnapshot;
}

/// Provider that always returns the same snapshot.
#[derive(Debug, Clone, Default)]
pub struct StaticState(pub StateSnapshot);

impl StateProvider for StaticState {
    fn current_state(&self) -> StateSnapshot {
        self.0.clone()
    }
}
