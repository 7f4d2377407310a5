//! Voice Activity Detection (VAD) scoring.
//!
//! Detectors score one frame at a time; the segmenter and the transcription
//! gate decide what a score means against the configured threshold.

use super::pcm::i16_to_f32;

const SILENCE_FLOOR_DB: f32 = -120.0;

/// Default frame size for the energy detector (32 ms at 16 kHz).
pub const ENERGY_VAD_FRAME_SAMPLES: usize = 512;

/// Scores a fixed-size 16 kHz mono frame for speech presence.
///
/// # Frame Size Contract
/// Callers feed frames of exactly `frame_samples()` samples. Shorter input is
/// scored as-is by the energy detector and zero-padded by earshot.
pub trait VoiceActivityDetector: Send {
    fn frame_samples(&self) -> usize;

    /// Speech probability in `[0, 1]`.
    fn score(&mut self, frame: &[i16]) -> f32;

    fn reset(&mut self) {}

    fn name(&self) -> &'static str {
        "unknown_vad"
    }
}

/// A frame counts as voiced only when its score is strictly above the threshold.
/// A score equal to the threshold is unvoiced, so an utterance whose peak only
/// reaches the threshold is rejected by the transcription gate.
#[inline]
pub fn is_voiced(score: f32, threshold: f32) -> bool {
    score > threshold
}

/// Highest score over `samples` split into detector-sized frames. The last
/// partial frame is zero-padded.
pub fn max_score(vad: &mut dyn VoiceActivityDetector, samples: &[i16]) -> f32 {
    let frame_samples = vad.frame_samples().max(1);
    let mut best = 0.0f32;
    let mut padded = Vec::new();
    for chunk in samples.chunks(frame_samples) {
        let score = if chunk.len() == frame_samples {
            vad.score(chunk)
        } else {
            padded.clear();
            padded.extend_from_slice(chunk);
            padded.resize(frame_samples, 0);
            vad.score(&padded)
        };
        best = best.max(score);
    }
    vad.reset();
    best
}

/// RMS level in dBFS; empty input reads as the silence floor.
pub(crate) fn rms_db(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return SILENCE_FLOOR_DB;
    }
    let energy: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    let rms = energy.sqrt().max(1e-6);
    20.0 * rms.log10()
}

/// Lightweight fallback VAD that maps RMS energy onto a probability. Used when
/// earshot is disabled or unavailable, and by tests that need exact scores.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    frame_samples: usize,
    floor_db: f32,
    ceiling_db: f32,
}

impl EnergyVad {
    pub fn new(frame_samples: usize, floor_db: f32, ceiling_db: f32) -> Self {
        Self {
            frame_samples: frame_samples.max(1),
            floor_db,
            ceiling_db: ceiling_db.max(floor_db + 1.0),
        }
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(ENERGY_VAD_FRAME_SAMPLES, -60.0, -20.0)
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    fn score(&mut self, frame: &[i16]) -> f32 {
        if frame.is_empty() {
            return 0.0;
        }
        let samples: Vec<f32> = frame.iter().copied().map(i16_to_f32).collect();
        let db = rms_db(&samples);
        ((db - self.floor_db) / (self.ceiling_db - self.floor_db)).clamp(0.0, 1.0)
    }

    fn name(&self) -> &'static str {
        "energy_vad"
    }
}
