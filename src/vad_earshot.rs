//! Earshot-powered detector implementing `VoiceActivityDetector`.

use crate::audio::VoiceActivityDetector;
use crate::config::VoicePipelineConfig;
use earshot::{VoiceActivityDetector as EarshotDetector, VoiceActivityProfile};

/// 30 ms at 16 kHz, the longest frame earshot accepts.
pub const EARSHOT_FRAME_SAMPLES: usize = 480;

/// Thin wrapper that adapts `earshot` to the crate's detector trait.
///
/// Earshot makes a hard speech/non-speech call, so scores are 1.0 or 0.0.
pub struct EarshotVad {
    detector: EarshotDetector,
    frame_samples: usize,
    scratch: Vec<i16>,
}

impl EarshotVad {
    /// Higher thresholds ask for more confidence, which maps onto the more
    /// aggressive earshot profiles.
    pub fn from_config(cfg: &VoicePipelineConfig) -> Self {
        let profile = match cfg.vad_threshold {
            t if t >= 0.75 => VoiceActivityProfile::VERY_AGGRESSIVE,
            t if t >= 0.5 => VoiceActivityProfile::AGGRESSIVE,
            t if t >= 0.25 => VoiceActivityProfile::LBR,
            _ => VoiceActivityProfile::QUALITY,
        };
        Self::with_profile(profile)
    }

    pub fn with_profile(profile: VoiceActivityProfile) -> Self {
        Self {
            detector: EarshotDetector::new(profile),
            frame_samples: EARSHOT_FRAME_SAMPLES,
            scratch: Vec::with_capacity(EARSHOT_FRAME_SAMPLES),
        }
    }
}

impl VoiceActivityDetector for EarshotVad {
    fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    fn score(&mut self, frame: &[i16]) -> f32 {
        if frame.is_empty() {
            return 0.0;
        }
        self.scratch.clear();
        self.scratch
            .extend(frame.iter().copied().take(self.frame_samples));
        if self.scratch.len() < self.frame_samples {
            self.scratch.resize(self.frame_samples, 0);
        }
        match self.detector.predict_16khz(&self.scratch) {
            Ok(true) => 1.0,
            Ok(false) => 0.0,
            Err(_) => 0.0,
        }
    }

    fn reset(&mut self) {
        self.detector.reset();
    }

    fn name(&self) -> &'static str {
        "earshot_vad"
    }
}
