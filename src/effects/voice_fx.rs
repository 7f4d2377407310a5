//! Voice styling stages: gain, one-pole filters, distortion, chorus.

use super::{EffectContext, PostProcessor};
use crate::error::{Result, VoiceError};
use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeSettings {
    pub enabled: bool,
    pub gain: f32,
}

impl Default for VolumeSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            gain: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LowPassSettings {
    pub enabled: bool,
    pub cutoff_hz: f32,
}

impl Default for LowPassSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            cutoff_hz: 5_000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HighPassSettings {
    pub enabled: bool,
    pub cutoff_hz: f32,
}

impl Default for HighPassSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            cutoff_hz: 120.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistortionMode {
    Tanh,
    Hard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistortionSettings {
    pub enabled: bool,
    pub drive: f32,
    pub clip: f32,
    pub mode: DistortionMode,
}

impl Default for DistortionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            drive: 2.0,
            clip: 0.2,
            mode: DistortionMode::Tanh,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChorusSettings {
    pub enabled: bool,
    pub delay_ms: f32,
    pub depth_ms: f32,
    pub rate_hz: f32,
    pub mix: f32,
}

impl Default for ChorusSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            delay_ms: 25.0,
            depth_ms: 12.0,
            rate_hz: 0.25,
            mix: 0.5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceStyleSettings {
    pub volume: VolumeSettings,
    pub lowpass: LowPassSettings,
    pub highpass: HighPassSettings,
    pub distortion: DistortionSettings,
    pub chorus: ChorusSettings,
}

impl VoiceStyleSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=4.0).contains(&self.volume.gain) {
            bail!("voice.volume.gain must be between 0.0 and 4.0, got {}", self.volume.gain);
        }
        for (name, cutoff) in [
            ("voice.lowpass.cutoff_hz", self.lowpass.cutoff_hz),
            ("voice.highpass.cutoff_hz", self.highpass.cutoff_hz),
        ] {
            if !cutoff.is_finite() || cutoff < 0.0 {
                bail!("{name} must be a non-negative number, got {cutoff}");
            }
        }
        if !(0.0..=100.0).contains(&self.distortion.drive) {
            bail!(
                "voice.distortion.drive must be between 0.0 and 100.0, got {}",
                self.distortion.drive
            );
        }
        if !(self.distortion.clip > 0.0 && self.distortion.clip <= 1.0) {
            bail!(
                "voice.distortion.clip must be in (0.0, 1.0], got {}",
                self.distortion.clip
            );
        }
        let chorus = &self.chorus;
        if chorus.delay_ms < 0.0 || chorus.depth_ms < 0.0 || chorus.depth_ms > chorus.delay_ms {
            bail!("voice.chorus needs 0 <= depth_ms <= delay_ms");
        }
        if chorus.delay_ms + chorus.depth_ms > 200.0 {
            bail!("voice.chorus delay plus depth must stay under 200 ms");
        }
        if !(0.0..=20.0).contains(&chorus.rate_hz) {
            bail!("voice.chorus.rate_hz must be between 0 and 20, got {}", chorus.rate_hz);
        }
        if !(0.0..=1.0).contains(&chorus.mix) {
            bail!("voice.chorus.mix must be between 0.0 and 1.0, got {}", chorus.mix);
        }
        Ok(())
    }
}

pub struct Volume {
    gain: f32,
}

impl Volume {
    pub fn new(gain: f32) -> Self {
        Self { gain }
    }
}

impl PostProcessor for Volume {
    fn name(&self) -> &'static str {
        "volume"
    }

    fn process(&mut self, samples: &mut [f32], _ctx: &EffectContext<'_>) -> Result<bool> {
        if self.gain == 1.0 {
            return Ok(false);
        }
        for sample in samples.iter_mut() {
            *sample *= self.gain;
        }
        Ok(true)
    }
}

/// Cutoffs outside `(0, nyquist)` disable a filter.
fn usable_cutoff(cutoff_hz: f32, sample_rate: u32) -> bool {
    cutoff_hz > 0.0 && cutoff_hz < sample_rate as f32 / 2.0
}

fn rc_dt(cutoff_hz: f32, sample_rate: u32) -> (f32, f32) {
    (1.0 / (2.0 * PI * cutoff_hz), 1.0 / sample_rate as f32)
}

/// One-pole RC low-pass; filter memory carries across chunks.
pub struct LowPass {
    cutoff_hz: f32,
    y_prev: f32,
}

impl LowPass {
    pub fn new(cutoff_hz: f32) -> Self {
        Self {
            cutoff_hz,
            y_prev: 0.0,
        }
    }
}

impl PostProcessor for LowPass {
    fn name(&self) -> &'static str {
        "lowpass"
    }

    fn process(&mut self, samples: &mut [f32], ctx: &EffectContext<'_>) -> Result<bool> {
        if !usable_cutoff(self.cutoff_hz, ctx.sample_rate) {
            return Ok(false);
        }
        let (rc, dt) = rc_dt(self.cutoff_hz, ctx.sample_rate);
        let alpha = dt / (rc + dt);
        let mut y = self.y_prev;
        for sample in samples.iter_mut() {
            y += alpha * (*sample - y);
            *sample = y;
        }
        self.y_prev = y;
        Ok(true)
    }

    fn reset(&mut self) {
        self.y_prev = 0.0;
    }
}

/// One-pole RC high-pass.
pub struct HighPass {
    cutoff_hz: f32,
    y_prev: f32,
    x_prev: f32,
}

impl HighPass {
    pub fn new(cutoff_hz: f32) -> Self {
        Self {
            cutoff_hz,
            y_prev: 0.0,
            x_prev: 0.0,
        }
    }
}

impl PostProcessor for HighPass {
    fn name(&self) -> &'static str {
        "highpass"
    }

    fn process(&mut self, samples: &mut [f32], ctx: &EffectContext<'_>) -> Result<bool> {
        if !usable_cutoff(self.cutoff_hz, ctx.sample_rate) {
            return Ok(false);
        }
        let (rc, dt) = rc_dt(self.cutoff_hz, ctx.sample_rate);
        let alpha = rc / (rc + dt);
        let (mut y, mut x_prev) = (self.y_prev, self.x_prev);
        for sample in samples.iter_mut() {
            let x = *sample;
            y = alpha * (y + x - x_prev);
            x_prev = x;
            *sample = y;
        }
        self.y_prev = y;
        self.x_prev = x_prev;
        Ok(true)
    }

    fn reset(&mut self) {
        self.y_prev = 0.0;
        self.x_prev = 0.0;
    }
}

pub struct Distortion {
    settings: DistortionSettings,
}

impl Distortion {
    pub fn new(settings: DistortionSettings) -> Self {
        Self { settings }
    }
}

impl PostProcessor for Distortion {
    fn name(&self) -> &'static str {
        "distortion"
    }

    fn process(&mut self, samples: &mut [f32], _ctx: &EffectContext<'_>) -> Result<bool> {
        let DistortionSettings {
            drive, clip, mode, ..
        } = self.settings;
        if mode == DistortionMode::Hard && clip <= 0.0 {
            return Err(VoiceError::EffectProcessing {
                processor: "distortion",
                reason: format!("clip level {clip} must be positive"),
            });
        }
        for sample in samples.iter_mut() {
            let driven = *sample * drive;
            *sample = match mode {
                DistortionMode::Tanh => driven.tanh(),
                // Normalized back to full scale after clipping.
                DistortionMode::Hard => driven.clamp(-clip, clip) / clip,
            };
        }
        Ok(true)
    }
}

/// Chorus built on a sine-modulated fractional delay line.
pub struct Chorus {
    settings: ChorusSettings,
    buffer: Vec<f32>,
    index: usize,
    phase: f32,
}

impl Chorus {
    pub fn new(settings: ChorusSettings) -> Self {
        Self {
            settings,
            buffer: Vec::new(),
            index: 0,
            phase: 0.0,
        }
    }

    fn ensure_capacity(&mut self, sample_rate: u32, chunk_len: usize) {
        let max_delay_ms = self.settings.delay_ms + self.settings.depth_ms + 5.0;
        let needed = (sample_rate as f32 * max_delay_ms / 1000.0) as usize + chunk_len + 4;
        if self.buffer.len() < needed {
            self.buffer = vec![0.0; needed];
            self.index = 0;
        }
    }
}

impl PostProcessor for Chorus {
    fn name(&self) -> &'static str {
        "chorus"
    }

    fn process(&mut self, samples: &mut [f32], ctx: &EffectContext<'_>) -> Result<bool> {
        if samples.is_empty() {
            return Ok(false);
        }
        self.ensure_capacity(ctx.sample_rate, samples.len());
        let len = self.buffer.len();
        let rate = ctx.sample_rate as f32;
        let ChorusSettings {
            delay_ms,
            depth_ms,
            rate_hz,
            mix,
            ..
        } = self.settings;

        for sample in samples.iter_mut() {
            let dry = *sample;
            let modulation = (2.0 * PI * self.phase).sin();
            let delay_samples = rate * (delay_ms + modulation * depth_ms) / 1000.0;
            let mut read_pos = self.index as f32 - delay_samples;
            while read_pos < 0.0 {
                read_pos += len as f32;
            }
            let i0 = (read_pos as usize) % len;
            let i1 = (i0 + 1) % len;
            let frac = read_pos - read_pos.floor();
            let delayed = (1.0 - frac) * self.buffer[i0] + frac * self.buffer[i1];

            self.buffer[self.index] = dry;
            *sample = (1.0 - mix) * dry + mix * delayed;

            self.index = (self.index + 1) % len;
            self.phase += rate_hz / rate;
            if self.phase >= 1.0 {
                self.phase -= 1.0;
            }
        }
        Ok(true)
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.index = 0;
        self.phase = 0.0;
    }
}
