//! Audio capture and voice activity detection (VAD) pipeline.
//!
//! Microphone audio is captured via CPAL, resampled to 16 kHz mono PCM16 and
//! sliced into detector-sized frames. The segmenter turns that frame stream
//! into finalized utterances.

/// Sample rate every frame and utterance is normalized to.
pub const TARGET_RATE: u32 = 16_000;

/// Target channel count for transcription.
pub const TARGET_CHANNELS: u16 = 1;

mod capture;
mod dispatch;
mod pcm;
mod recorder;
pub(crate) mod resample;
mod source;
mod vad;

pub use capture::{
    log_segmentation_metrics, segment_offline, OfflineSegmentation, SegmentationMetrics,
    SegmenterConfig, SegmenterMode, SegmenterState, StopReason, Utterance, UtteranceSegmenter,
};
pub use pcm::{f32_to_i16, i16_to_f32, pcm_bytes_to_samples, samples_to_pcm_bytes, Frame};
pub use recorder::{list_input_devices, list_output_devices, MicrophoneSource};
pub use source::{FrameSource, PcmSource};
pub use vad::{is_voiced, max_score, EnergyVad, VoiceActivityDetector, ENERGY_VAD_FRAME_SAMPLES};
