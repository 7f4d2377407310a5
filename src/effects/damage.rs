//! Degrades speech to match vehicle damage: volume flicker, pitch wobble,
//! clipping, dropouts, crackle, and stuttered repeats.

use super::{EffectContext, PostProcessor};
use crate::audio::resample::resample_linear;
use crate::config::{
    DEFAULT_CRACKLE_PROBABILITY, DEFAULT_DAMAGE_THRESHOLD, DEFAULT_GLITCH_RATE,
    DEFAULT_VOLUME_FLICKER_MAX, DEFAULT_VOLUME_FLICKER_MIN,
};
use crate::error::{Result, VoiceError};
use crate::log_debug;
use anyhow::bail;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

const MODULATION_WINDOW_SECS: f32 = 0.05;
const GLITCH_WINDOW_SECS: f32 = 0.20;
const CRACKLE_GAIN: f32 = 0.6;
const REPEAT_PARTIAL_SHARE: f32 = 0.7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DamageSettings {
    pub enabled: bool,
    /// Effects stay off at or below this damage level.
    pub threshold: f32,
    /// Fixed damage level instead of the one derived from game state.
    pub damage_level_override: Option<f32>,
    pub volume_flicker_min: f32,
    pub volume_flicker_max: f32,
    pub glitch_rate: f32,
    pub crackle_probability: f32,
    pub distortion: f32,
    /// Largest pitch wobble at full damage, as a fraction.
    pub max_pitch_shift: f32,
    /// Chance of a stuttered repeat at full damage.
    pub repeat_probability: f32,
}

impl Default for DamageSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: DEFAULT_DAMAGE_THRESHOLD,
            damage_level_override: None,
            volume_flicker_min: DEFAULT_VOLUME_FLICKER_MIN,
            volume_flicker_max: DEFAULT_VOLUME_FLICKER_MAX,
            glitch_rate: DEFAULT_GLITCH_RATE,
            crackle_probability: DEFAULT_CRACKLE_PROBABILITY,
            distortion: 0.3,
            max_pitch_shift: 0.05,
            repeat_probability: 0.2,
        }
    }
}

impl DamageSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        let unit = [
            ("damage.threshold", self.threshold),
            ("damage.volume_flicker_min", self.volume_flicker_min),
            ("damage.volume_flicker_max", self.volume_flicker_max),
            ("damage.glitch_rate", self.glitch_rate),
            ("damage.crackle_probability", self.crackle_probability),
            ("damage.distortion", self.distortion),
            ("damage.max_pitch_shift", self.max_pitch_shift),
            ("damage.repeat_probability", self.repeat_probability),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                bail!("{name} must be between 0.0 and 1.0, got {value}");
            }
        }
        if let Some(level) = self.damage_level_override {
            if !(0.0..=1.0).contains(&level) {
                bail!("damage.damage_level_override must be between 0.0 and 1.0, got {level}");
            }
        }
        if self.volume_flicker_min > self.volume_flicker_max {
            bail!("damage.volume_flicker_min must not exceed damage.volume_flicker_max");
        }
        Ok(())
    }
}

pub struct DamageEffects {
    settings: DamageSettings,
    rng: StdRng,
}

impl DamageEffects {
    pub fn new(settings: DamageSettings, rng: StdRng) -> Self {
        Self { settings, rng }
    }

    fn chance(&mut self, probability: f32) -> bool {
        let p = if probability.is_finite() {
            probability.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.rng.gen_bool(f64::from(p))
    }

    fn uniform(&mut self, low: f32, high: f32) -> f32 {
        if high > low {
            self.rng.gen_range(low..high)
        } else {
            low
        }
    }

    /// Roll for activation, then degrade `input`. `None` when the roll says
    /// the chunk stays clean.
    pub fn apply(&mut self, input: &[f32], damage: f32, sample_rate: u32) -> Result<Option<Vec<f32>>> {
        if damage <= self.settings.threshold || self.rng.gen::<f32>() > damage {
            return Ok(None);
        }
        if input.is_empty() {
            return Ok(Some(Vec::new()));
        }
        if sample_rate == 0 {
            return Err(VoiceError::EffectProcessing {
                processor: "damage",
                reason: "sample rate is zero".to_string(),
            });
        }
        let original_len = input.len();
        let rate = sample_rate as f32;

        let mut audio = self.modulate(input, damage, rate);
        audio.resize(original_len, 0.0);

        let drive = (1.0 + self.settings.distortion * 10.0) * damage;
        for sample in audio.iter_mut() {
            *sample = (*sample * drive).clamp(-1.0, 1.0);
        }

        let glitch_window = ((rate * GLITCH_WINDOW_SECS) as usize).max(1);
        let glitch_chance = self.settings.glitch_rate * damage;
        for window in audio.chunks_mut(glitch_window) {
            if self.chance(glitch_chance) {
                let scale = self.uniform(0.0, 0.3);
                window.iter_mut().for_each(|s| *s *= scale);
            }
        }

        let crackle_chance = self.settings.crackle_probability * damage;
        for sample in audio.iter_mut() {
            if self.chance(crackle_chance) {
                *sample += self.uniform(-1.0, 1.0) * CRACKLE_GAIN;
            }
        }

        if self.chance(self.settings.repeat_probability * damage) {
            audio = self.insert_repeat(audio, rate);
            audio.truncate(original_len);
        }

        for sample in audio.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
        if audio.iter().any(|s| !s.is_finite()) {
            return Err(VoiceError::EffectProcessing {
                processor: "damage",
                reason: "produced non-finite samples".to_string(),
            });
        }
        Ok(Some(audio))
    }

    /// Per-window volume flicker with an occasional resampled pitch wobble.
    /// The result may be slightly longer or shorter than the input.
    fn modulate(&mut self, input: &[f32], damage: f32, rate: f32) -> Vec<f32> {
        let window = ((rate * MODULATION_WINDOW_SECS) as usize).max(1);
        let max_shift = self.settings.max_pitch_shift * damage;
        let wobble_chance = 0.5 * damage;
        let mut out = Vec::with_capacity(input.len() + input.len() / 10);
        for chunk in input.chunks(window) {
            let volume = self.uniform(
                self.settings.volume_flicker_min,
                self.settings.volume_flicker_max,
            );
            let scaled: Vec<f32> = chunk.iter().map(|s| s * volume).collect();
            if self.chance(wobble_chance) {
                let factor = 1.0 + self.uniform(-max_shift, max_shift);
                let new_len = ((scaled.len() as f32 * factor) as usize).max(1);
                let ratio = new_len as f32 / scaled.len() as f32;
                out.extend(resample_linear(&scaled, ratio));
            } else {
                out.extend(scaled);
            }
        }
        out
    }

    /// Splice a quieter copy of the whole chunk or of a 300-800 ms excerpt
    /// at a random position.
    fn insert_repeat(&mut self, audio: Vec<f32>, rate: f32) -> Vec<f32> {
        let len = audio.len();
        let partial = self.chance(REPEAT_PARTIAL_SHARE);
        let mut repeated = if partial {
            let seg_len = (rate * self.uniform(0.3, 0.8)) as usize;
            if len <= seg_len {
                audio.clone()
            } else {
                let start = self.rng.gen_range(0..len - seg_len);
                audio[start..start + seg_len].to_vec()
            }
        } else {
            audio.clone()
        };
        let scale = self.uniform(0.3, 0.6);
        repeated.iter_mut().for_each(|s| *s *= scale);
        log_debug(&format!(
            "damage repeat: {} {} samples",
            if partial { "partial" } else { "full" },
            repeated.len()
        ));

        let insert_at = self.rng.gen_range(0..len);
        let mut spliced = Vec::with_capacity(len + repeated.len());
        spliced.extend_from_slice(&audio[..insert_at]);
        spliced.extend(repeated);
        spliced.extend_from_slice(&audio[insert_at..]);
        spliced
    }
}

impl PostProcessor for DamageEffects {
    fn name(&self) -> &'static str {
        "damage"
    }

    fn process(&mut self, samples: &mut [f32], ctx: &EffectContext<'_>) -> Result<bool> {
        let damage = self
            .settings
            .damage_level_override
            .or_else(|| ctx.state.damage_level())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);
        let Some(degraded) = self.apply(samples, damage, ctx.sample_rate)? else {
            return Ok(false);
        };
        if degraded.len() != samples.len() {
            return Err(VoiceError::EffectProcessing {
                processor: "damage",
                reason: format!("length changed {} -> {}", samples.len(), degraded.len()),
            });
        }
        samples.copy_from_slice(&degraded);
        tracing::debug!(damage, "damage effects applied");
        Ok(true)
    }
}
