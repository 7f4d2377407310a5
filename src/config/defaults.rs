use super::VadEngineKind;

pub const DEFAULT_VAD_THRESHOLD: f32 = 0.2;
pub const DEFAULT_PHRASE_END_PAUSE_MS: u64 = 1000;
pub const DEFAULT_PROBE_WINDOW_MS: u64 = 500;
pub const DEFAULT_ONSET_PREROLL_MS: u64 = 100;
pub const DEFAULT_MIN_UTTERANCE_MS: u64 = 200;
pub const DEFAULT_FRAME_CHANNEL_CAPACITY: usize = 64;
pub const DEFAULT_RESULT_QUEUE_CAPACITY: usize = 32;
pub const DEFAULT_SUPERVISOR_INITIAL_BACKOFF_MS: u64 = 1000;
pub const DEFAULT_SUPERVISOR_MAX_BACKOFF_MS: u64 = 30_000;

pub const DEFAULT_STT_PROMPT: &str =
    "COVAS, give me a status update... and throw in something inspiring, would you?";

/// One 24 kHz PCM16 mono block as delivered by most streaming TTS backends.
pub const PLAYBACK_BLOCK_BYTES: usize = 720;
pub const DEFAULT_PREBUFFER_BYTES: usize = 4 * PLAYBACK_BLOCK_BYTES;
pub const MAX_PREBUFFER_BYTES: usize = 64 * PLAYBACK_BLOCK_BYTES;
pub const DEFAULT_STREAM_INITIAL_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_STREAM_CHUNK_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_STREAM_BUFFER_CAP_BYTES: usize = 1024 * 1024;
pub const DEFAULT_PLAYBACK_RATE: u32 = 24_000;

pub const DEFAULT_DAMAGE_THRESHOLD: f32 = 0.10;
pub const DEFAULT_VOLUME_FLICKER_MIN: f32 = 0.6;
pub const DEFAULT_VOLUME_FLICKER_MAX: f32 = 1.0;
pub const DEFAULT_GLITCH_RATE: f32 = 0.01;
pub const DEFAULT_CRACKLE_PROBABILITY: f32 = 0.0005;

pub(super) const MAX_PHRASE_END_PAUSE_MS: u64 = 10_000;
pub(super) const MAX_STREAM_TIMEOUT_MS: u64 = 120_000;
pub(super) const MAX_REQUIRED_WORD_BYTES: usize = 64;
pub(super) const MAX_STT_PROMPT_BYTES: usize = 1024;
pub(super) const ISO_639_1_CODES: &[&str] = &[
    "af", "am", "ar", "az", "be", "bg", "bn", "bs", "ca", "cs", "cy", "da", "de", "el", "en", "es",
    "et", "eu", "fa", "fi", "fil", "fr", "ga", "gl", "gu", "he", "hi", "hr", "hu", "hy", "id",
    "is", "it", "ja", "jv", "ka", "kk", "km", "kn", "ko", "lo", "lt", "lv", "mk", "ml", "mn", "mr",
    "ms", "my", "ne", "nl", "no", "pa", "pl", "pt", "ro", "ru", "si", "sk", "sl", "sq", "sr", "sv",
    "sw", "ta", "te", "th", "tr", "uk", "ur", "vi", "zh",
];

pub const fn default_vad_engine() -> VadEngineKind {
    #[cfg(feature = "vad_earshot")]
    {
        VadEngineKind::Earshot
    }
    #[cfg(not(feature = "vad_earshot"))]
    {
        VadEngineKind::Energy
    }
}
