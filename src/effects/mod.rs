//! Post-synthesis effects applied to outgoing PCM chunks.
//!
//! Every chunk is appended to a rolling history first, then passed through the
//! enabled processors in order. Processors work on normalized `f32` samples in
//! place, so a chunk always leaves the chain with the sample count it entered
//! with. A failing processor is skipped for that chunk. When no processor
//! touched the samples, the original bytes are returned as they came in.

mod damage;
mod history;
mod reverb;
mod voice_fx;

pub use damage::{DamageEffects, DamageSettings};
pub use history::RollingAudioBuffer;
pub use reverb::{ReverbSettings, ReverbTap, VehicleReverb};
pub use voice_fx::{
    Chorus, ChorusSettings, Distortion, DistortionMode, DistortionSettings, HighPass,
    HighPassSettings, LowPass, LowPassSettings, VoiceStyleSettings, Volume, VolumeSettings,
};

use crate::audio::{f32_to_i16, i16_to_f32, pcm_bytes_to_samples, samples_to_pcm_bytes};
use crate::error::Result;
use crate::log_debug;
use crate::state::{StateProvider, StateSnapshot};
use anyhow::bail;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What a processor may look at besides its own input.
pub struct EffectContext<'a> {
    pub history: &'a RollingAudioBuffer,
    pub state: &'a StateSnapshot,
    pub sample_rate: u32,
}

/// A stateful same-length audio transform.
pub trait PostProcessor: Send {
    fn name(&self) -> &'static str;

    /// Transform `samples` in place. Returns `false` when they were left untouched.
    fn process(&mut self, samples: &mut [f32], ctx: &EffectContext<'_>) -> Result<bool>;

    /// Drop state carried between chunks (filter memory, delay lines).
    fn reset(&mut self) {}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectsSettings {
    pub damage: DamageSettings,
    pub vehicle_reverb: ReverbSettings,
    pub voice: VoiceStyleSettings,
}

impl EffectsSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.damage.validate()?;
        self.voice.validate()?;
        if !(0.0..=2.0).contains(&self.vehicle_reverb.wet) {
            bail!(
                "vehicle_reverb.wet must be between 0.0 and 2.0, got {}",
                self.vehicle_reverb.wet
            );
        }
        Ok(())
    }
}

struct Stage {
    processor: Box<dyn PostProcessor>,
    enabled: bool,
}

/// Ordered effects pipeline owned by one playback thread.
pub struct EffectsChain {
    stages: Vec<Stage>,
    history: RollingAudioBuffer,
    state: Option<Arc<dyn StateProvider>>,
    sample_rate: u32,
}

impl EffectsChain {
    pub fn new(sample_rate: u32, state: Option<Arc<dyn StateProvider>>) -> Self {
        Self {
            stages: Vec::new(),
            history: RollingAudioBuffer::for_rate(sample_rate),
            state,
            sample_rate,
        }
    }

    /// Voice styling first, then damage, then vehicle reverb. Every stage is
    /// installed so it can be toggled later; `settings` decides which start on.
    pub fn from_settings(
        settings: &EffectsSettings,
        sample_rate: u32,
        state: Option<Arc<dyn StateProvider>>,
        rng_seed: Option<u64>,
    ) -> Self {
        let voice = &settings.voice;
        let rng = match rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut chain = Self::new(sample_rate, state);
        chain.push(Box::new(Volume::new(voice.volume.gain)), voice.volume.enabled);
        chain.push(
            Box::new(LowPass::new(voice.lowpass.cutoff_hz)),
            voice.lowpass.enabled,
        );
        chain.push(
            Box::new(HighPass::new(voice.highpass.cutoff_hz)),
            voice.highpass.enabled,
        );
        chain.push(
            Box::new(Distortion::new(voice.distortion.clone())),
            voice.distortion.enabled,
        );
        chain.push(Box::new(Chorus::new(voice.chorus.clone())), voice.chorus.enabled);
        chain.push(
            Box::new(DamageEffects::new(settings.damage.clone(), rng)),
            settings.damage.enabled,
        );
        chain.push(
            Box::new(VehicleReverb::new(settings.vehicle_reverb.clone())),
            settings.vehicle_reverb.enabled,
        );
        chain
    }

    pub fn push(&mut self, processor: Box<dyn PostProcessor>, enabled: bool) {
        self.stages.push(Stage { processor, enabled });
    }

    /// Toggle a stage by name. Returns false when no stage has that name.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        let mut found = false;
        for stage in self
            .stages
            .iter_mut()
            .filter(|stage| stage.processor.name() == name)
        {
            stage.enabled = enabled;
            found = true;
        }
        found
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.stages
            .iter()
            .any(|stage| stage.enabled && stage.processor.name() == name)
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages
            .iter()
            .map(|stage| stage.processor.name())
            .collect()
    }

    pub fn history(&self) -> &RollingAudioBuffer {
        &self.history
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Start a new speech session: forget history and per-stage state.
    pub fn reset(&mut self) {
        self.history.clear();
        for stage in &mut self.stages {
            stage.processor.reset();
        }
    }

    /// Process one PCM16 chunk. The output has the same byte length.
    pub fn process(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut samples: Vec<f32> = pcm_bytes_to_samples(chunk)
            .into_iter()
            .map(i16_to_f32)
            .collect();
        self.history.add_chunk(&samples);
        if !self.stages.iter().any(|stage| stage.enabled) || !self.run_stages(&mut samples) {
            return chunk.to_vec();
        }

        let pcm: Vec<i16> = samples.into_iter().map(f32_to_i16).collect();
        let mut out = samples_to_pcm_bytes(&pcm);
        if chunk.len() % 2 == 1 {
            out.extend(chunk.last());
        }
        out
    }

    /// Returns true when at least one stage modified the samples.
    fn run_stages(&mut self, samples: &mut [f32]) -> bool {
        let snapshot = self
            .state
            .as_ref()
            .map(|provider| provider.current_state())
            .unwrap_or_default();
        let ctx = EffectContext {
            history: &self.history,
            state: &snapshot,
            sample_rate: self.sample_rate,
        };
        let mut changed = false;
        let mut backup = Vec::with_capacity(samples.len());
        for stage in self.stages.iter_mut().filter(|stage| stage.enabled) {
            backup.clear();
            backup.extend_from_slice(samples);
            match stage.processor.process(samples, &ctx) {
                Ok(modified) => changed |= modified,
                Err(err) => {
                    log_debug(&format!("{err}; passing chunk through"));
                    tracing::warn!(stage = stage.processor.name(), error = %err, "effect skipped");
                    samples.copy_from_slice(&backup);
                }
            }
        }
        if changed {
            for sample in samples.iter_mut() {
                *sample = sample.clamp(-1.0, 1.0);
            }
        }
        changed
    }
}
