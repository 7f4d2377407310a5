//! Command-line parsing and validation helpers.

mod defaults;
#[cfg(test)]
mod tests;
mod validation;

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

pub use defaults::{
    default_vad_engine, DEFAULT_CRACKLE_PROBABILITY, DEFAULT_DAMAGE_THRESHOLD,
    DEFAULT_FRAME_CHANNEL_CAPACITY, DEFAULT_GLITCH_RATE, DEFAULT_MIN_UTTERANCE_MS,
    DEFAULT_ONSET_PREROLL_MS, DEFAULT_PHRASE_END_PAUSE_MS, DEFAULT_PLAYBACK_RATE,
    DEFAULT_PREBUFFER_BYTES, DEFAULT_PROBE_WINDOW_MS, DEFAULT_RESULT_QUEUE_CAPACITY,
    DEFAULT_STREAM_BUFFER_CAP_BYTES, DEFAULT_STREAM_CHUNK_TIMEOUT_MS,
    DEFAULT_STREAM_INITIAL_TIMEOUT_MS, DEFAULT_STT_PROMPT, DEFAULT_SUPERVISOR_INITIAL_BACKOFF_MS,
    DEFAULT_SUPERVISOR_MAX_BACKOFF_MS, DEFAULT_VAD_THRESHOLD, DEFAULT_VOLUME_FLICKER_MAX,
    DEFAULT_VOLUME_FLICKER_MIN, MAX_PREBUFFER_BYTES, PLAYBACK_BLOCK_BYTES,
};

/// CLI options for the COVAS voice engine. Validated values keep the capture and
/// playback threads inside sane timing bounds.
#[derive(Debug, Parser, Clone)]
#[command(about = "COVAS voice I/O engine", author, version)]
pub struct AppConfig {
    /// Preferred audio input device name
    #[arg(long)]
    pub input_device: Option<String>,

    /// Preferred audio output device name
    #[arg(long)]
    pub output_device: Option<String>,

    /// Print detected audio input devices and exit
    #[arg(long = "list-input-devices", default_value_t = false)]
    pub list_input_devices: bool,

    /// Print detected audio output devices and exit
    #[arg(long = "list-output-devices", default_value_t = false)]
    pub list_output_devices: bool,

    /// Start listening and print accepted transcripts as JSON lines
    #[arg(long, value_enum)]
    pub listen: Option<ListenMode>,

    /// Play TEXT through the speech output path (silent synthesis plus effects) and exit
    #[arg(long, value_name = "TEXT")]
    pub speak: Option<String>,

    /// JSON game-state snapshot used by the effects chain with --speak
    #[arg(long = "state-file", value_name = "PATH")]
    pub state_file: Option<PathBuf>,

    /// Enable file logging (debug)
    #[arg(long = "logs", env = "COVAS_VOICE_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable all file logging (overrides --logs and log env vars)
    #[arg(long = "no-logs", env = "COVAS_VOICE_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,

    /// Allow logging transcripts and spoken text (debug log only)
    #[arg(
        long = "log-content",
        env = "COVAS_VOICE_LOG_CONTENT",
        default_value_t = false
    )]
    pub log_content: bool,

    /// Speech probability above which a frame counts as voiced (0.0-1.0)
    #[arg(long = "vad-threshold", default_value_t = DEFAULT_VAD_THRESHOLD)]
    pub vad_threshold: f32,

    /// Voice activity detector implementation to use
    #[arg(long = "vad-engine", value_enum, default_value_t = default_vad_engine())]
    pub vad_engine: VadEngineKind,

    /// Trailing quiet required before an utterance is finalized (milliseconds)
    #[arg(long = "phrase-end-pause-ms", default_value_t = DEFAULT_PHRASE_END_PAUSE_MS)]
    pub phrase_end_pause_ms: u64,

    /// Window scanned for onset before idle audio is discarded (milliseconds)
    #[arg(long = "probe-window-ms", default_value_t = DEFAULT_PROBE_WINDOW_MS)]
    pub probe_window_ms: u64,

    /// Audio kept ahead of detected speech onset (milliseconds)
    #[arg(long = "onset-preroll-ms", default_value_t = DEFAULT_ONSET_PREROLL_MS)]
    pub onset_preroll_ms: u64,

    /// Utterances shorter than this are never transcribed (milliseconds)
    #[arg(long = "min-utterance-ms", default_value_t = DEFAULT_MIN_UTTERANCE_MS)]
    pub min_utterance_ms: u64,

    /// Only accept transcripts containing this word (case-insensitive)
    #[arg(long = "required-word")]
    pub required_word: Option<String>,

    /// Language hint passed to the transcriber
    #[arg(long)]
    pub lang: Option<String>,

    /// Prompt passed to the transcriber; transcripts echoing it are dropped
    #[arg(long = "stt-prompt", default_value = DEFAULT_STT_PROMPT)]
    pub stt_prompt: String,

    /// Transcription backend flavour
    #[arg(long = "stt-provider", value_enum, default_value_t = SttProviderKind::Direct)]
    pub stt_provider: SttProviderKind,

    /// Whisper model path (local-whisper builds)
    #[arg(long)]
    pub whisper_model_path: Option<PathBuf>,

    /// Frame channel capacity between the audio callback and the capture thread
    #[arg(
        long = "frame-channel-capacity",
        default_value_t = DEFAULT_FRAME_CHANNEL_CAPACITY
    )]
    pub frame_channel_capacity: usize,

    /// Transcripts buffered before the capture thread blocks
    #[arg(
        long = "result-queue-capacity",
        default_value_t = DEFAULT_RESULT_QUEUE_CAPACITY
    )]
    pub result_queue_capacity: usize,

    /// Longest wait between capture loop restarts (milliseconds)
    #[arg(
        long = "supervisor-max-backoff-ms",
        default_value_t = DEFAULT_SUPERVISOR_MAX_BACKOFF_MS
    )]
    pub supervisor_max_backoff_ms: u64,

    /// Wait for the first synthesized audio (milliseconds)
    #[arg(
        long = "stream-initial-timeout-ms",
        default_value_t = DEFAULT_STREAM_INITIAL_TIMEOUT_MS
    )]
    pub stream_initial_timeout_ms: u64,

    /// Allowed gap between synthesized audio chunks (milliseconds)
    #[arg(
        long = "stream-chunk-timeout-ms",
        default_value_t = DEFAULT_STREAM_CHUNK_TIMEOUT_MS
    )]
    pub stream_chunk_timeout_ms: u64,

    /// Bytes buffered before a decoder read returns
    #[arg(long = "prebuffer-bytes", default_value_t = DEFAULT_PREBUFFER_BYTES)]
    pub prebuffer_bytes: usize,

    /// Synthesized bytes queued before the producer blocks
    #[arg(
        long = "stream-buffer-cap-bytes",
        default_value_t = DEFAULT_STREAM_BUFFER_CAP_BYTES
    )]
    pub stream_buffer_cap_bytes: usize,

    /// Playback sample rate (Hz)
    #[arg(long = "playback-rate", default_value_t = DEFAULT_PLAYBACK_RATE)]
    pub playback_rate: u32,

    /// Enable hull-damage voice degradation (default)
    #[arg(long = "damage-effects", overrides_with = "no_damage_effects")]
    pub damage_effects: bool,

    /// Disable hull-damage voice degradation
    #[arg(long = "no-damage-effects", overrides_with = "damage_effects")]
    pub no_damage_effects: bool,

    /// Damage level below which the voice stays clean (0.0-1.0)
    #[arg(long = "damage-threshold", default_value_t = DEFAULT_DAMAGE_THRESHOLD)]
    pub damage_threshold: f32,

    /// Force a damage level instead of reading it from game state (0.0-1.0)
    #[arg(long = "damage-level-override")]
    pub damage_level_override: Option<f32>,

    /// Lower bound of per-50ms volume flicker
    #[arg(long = "volume-flicker-min", default_value_t = DEFAULT_VOLUME_FLICKER_MIN)]
    pub volume_flicker_min: f32,

    /// Upper bound of per-50ms volume flicker
    #[arg(long = "volume-flicker-max", default_value_t = DEFAULT_VOLUME_FLICKER_MAX)]
    pub volume_flicker_max: f32,

    /// Probability of muting a 200ms window at full damage
    #[arg(long = "glitch-rate", default_value_t = DEFAULT_GLITCH_RATE)]
    pub glitch_rate: f32,

    /// Per-sample crackle probability at full damage
    #[arg(long = "crackle-probability", default_value_t = DEFAULT_CRACKLE_PROBABILITY)]
    pub crackle_probability: f32,

    /// Add vehicle-dependent cabin echo to synthesized speech
    #[arg(long = "vehicle-reverb", default_value_t = false)]
    pub vehicle_reverb: bool,

    /// YAML file with effect settings; replaces the CLI effect flags
    #[arg(long = "effects-file")]
    pub effects_file: Option<PathBuf>,
}

/// Listening mode for the CLI driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ListenMode {
    Continuous,
    PushToTalk,
}

/// Available runtime-selectable VAD implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VadEngineKind {
    Earshot,
    Energy,
}

impl VadEngineKind {
    pub fn label(self) -> &'static str {
        match self {
            VadEngineKind::Earshot => "earshot",
            VadEngineKind::Energy => "energy",
        }
    }
}

/// Which transcription capability shape the configured backend exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SttProviderKind {
    Direct,
    Multimodal,
}

/// Tunable parameters for the capture, segmentation, and transcription side.
#[derive(Debug, Clone)]
pub struct VoicePipelineConfig {
    pub vad_threshold: f32,
    pub vad_engine: VadEngineKind,
    pub phrase_end_pause_ms: u64,
    pub probe_window_ms: u64,
    pub onset_preroll_ms: u64,
    pub min_utterance_ms: u64,
    pub required_word: Option<String>,
    pub language: Option<String>,
    pub prompt: String,
    pub stt_provider: SttProviderKind,
    pub frame_channel_capacity: usize,
    pub result_queue_capacity: usize,
    pub supervisor_max_backoff_ms: u64,
}

impl Default for VoicePipelineConfig {
    fn default() -> Self {
        Self {
            vad_threshold: DEFAULT_VAD_THRESHOLD,
            vad_engine: default_vad_engine(),
            phrase_end_pause_ms: DEFAULT_PHRASE_END_PAUSE_MS,
            probe_window_ms: DEFAULT_PROBE_WINDOW_MS,
            onset_preroll_ms: DEFAULT_ONSET_PREROLL_MS,
            min_utterance_ms: DEFAULT_MIN_UTTERANCE_MS,
            required_word: None,
            language: None,
            prompt: DEFAULT_STT_PROMPT.to_string(),
            stt_provider: SttProviderKind::Direct,
            frame_channel_capacity: DEFAULT_FRAME_CHANNEL_CAPACITY,
            result_queue_capacity: DEFAULT_RESULT_QUEUE_CAPACITY,
            supervisor_max_backoff_ms: DEFAULT_SUPERVISOR_MAX_BACKOFF_MS,
        }
    }
}

/// Tunable parameters for the synthesis stream and playback side.
#[derive(Debug, Clone)]
pub struct SpeechOutputConfig {
    pub initial_timeout_ms: u64,
    pub chunk_timeout_ms: u64,
    pub prebuffer_bytes: usize,
    pub buffer_cap_bytes: usize,
    pub playback_rate: u32,
}

impl Default for SpeechOutputConfig {
    fn default() -> Self {
        Self {
            initial_timeout_ms: DEFAULT_STREAM_INITIAL_TIMEOUT_MS,
            chunk_timeout_ms: DEFAULT_STREAM_CHUNK_TIMEOUT_MS,
            prebuffer_bytes: DEFAULT_PREBUFFER_BYTES,
            buffer_cap_bytes: DEFAULT_STREAM_BUFFER_CAP_BYTES,
            playback_rate: DEFAULT_PLAYBACK_RATE,
        }
    }
}
