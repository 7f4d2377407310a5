//! Vehicle-dependent early reflections read back from the rolling history.

use super::{EffectContext, PostProcessor};
use crate::error::Result;
use crate::state::Vehicle;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbSettings {
    pub enabled: bool,
    /// Scales every tap gain.
    pub wet: f32,
}

impl Default for ReverbSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            wet: 1.0,
        }
    }
}

/// One echo: a delayed copy of the dry signal at reduced gain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverbTap {
    pub delay_ms: f32,
    pub gain: f32,
}

const fn tap(delay_ms: f32, gain: f32) -> ReverbTap {
    ReverbTap { delay_ms, gain }
}

// Cockpit, buggy cab, helmet.
const SHIP_TAPS: &[ReverbTap] = &[tap(23.0, 0.30), tap(41.0, 0.22), tap(67.0, 0.15), tap(97.0, 0.10)];
const FIGHTER_TAPS: &[ReverbTap] = &[tap(13.0, 0.28), tap(27.0, 0.18), tap(43.0, 0.10)];
const SRV_TAPS: &[ReverbTap] = &[tap(11.0, 0.35), tap(19.0, 0.25), tap(29.0, 0.15)];
const SUIT_TAPS: &[ReverbTap] = &[tap(4.0, 0.30), tap(9.0, 0.18)];

pub fn taps_for(vehicle: Vehicle) -> &'static [ReverbTap] {
    match vehicle {
        Vehicle::Ship => SHIP_TAPS,
        Vehicle::Fighter => FIGHTER_TAPS,
        Vehicle::Srv => SRV_TAPS,
        Vehicle::Suit => SUIT_TAPS,
        Vehicle::Unknown => &[],
    }
}

/// Feed-forward multi-tap echo. The history already ends with the current
/// chunk, so taps reach back into earlier chunks seamlessly.
pub struct VehicleReverb {
    settings: ReverbSettings,
}

impl VehicleReverb {
    pub fn new(settings: ReverbSettings) -> Self {
        Self { settings }
    }
}

impl PostProcessor for VehicleReverb {
    fn name(&self) -> &'static str {
        "vehicle_reverb"
    }

    fn process(&mut self, samples: &mut [f32], ctx: &EffectContext<'_>) -> Result<bool> {
        let taps = taps_for(ctx.state.vehicle());
        if taps.is_empty() || samples.is_empty() || self.settings.wet == 0.0 {
            return Ok(false);
        }
        let rate = ctx.sample_rate as f32;
        let delays: Vec<(usize, f32)> = taps
            .iter()
            .map(|t| {
                (
                    ((t.delay_ms * rate / 1000.0) as usize).max(1),
                    t.gain * self.settings.wet,
                )
            })
            .collect();
        let last = samples.len() - 1;
        for (i, sample) in samples.iter_mut().enumerate() {
            let from_end = last - i;
            for &(delay, gain) in &delays {
                if let Some(echo) = ctx.history.sample_back(from_end + delay) {
                    *sample += echo * gain;
                }
            }
        }
        Ok(true)
    }
}
