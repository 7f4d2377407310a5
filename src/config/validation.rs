use super::defaults::{
    ISO_639_1_CODES, MAX_PHRASE_END_PAUSE_MS, MAX_PREBUFFER_BYTES, MAX_REQUIRED_WORD_BYTES,
    MAX_STREAM_TIMEOUT_MS, MAX_STT_PROMPT_BYTES,
};
use super::{AppConfig, SpeechOutputConfig, VoicePipelineConfig};
use crate::effects::{DamageSettings, EffectsSettings, ReverbSettings};
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::{fs, path::Path};

impl AppConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check CLI values and normalize free-text options.
    pub fn validate(&mut self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.vad_threshold) {
            bail!(
                "--vad-threshold must be between 0.0 and 1.0, got {}",
                self.vad_threshold
            );
        }
        if !(100..=MAX_PHRASE_END_PAUSE_MS).contains(&self.phrase_end_pause_ms) {
            bail!(
                "--phrase-end-pause-ms must be between 100 and {MAX_PHRASE_END_PAUSE_MS}, got {}",
                self.phrase_end_pause_ms
            );
        }
        if !(50..=5_000).contains(&self.probe_window_ms) {
            bail!(
                "--probe-window-ms must be between 50 and 5000, got {}",
                self.probe_window_ms
            );
        }
        if self.onset_preroll_ms > self.probe_window_ms {
            bail!(
                "--onset-preroll-ms ({}) cannot exceed --probe-window-ms ({})",
                self.onset_preroll_ms,
                self.probe_window_ms
            );
        }
        if self.min_utterance_ms > 10_000 {
            bail!(
                "--min-utterance-ms must be at most 10000, got {}",
                self.min_utterance_ms
            );
        }
        if !(8..=1024).contains(&self.frame_channel_capacity) {
            bail!(
                "--frame-channel-capacity must be between 8 and 1024, got {}",
                self.frame_channel_capacity
            );
        }
        if !(1..=1024).contains(&self.result_queue_capacity) {
            bail!(
                "--result-queue-capacity must be between 1 and 1024, got {}",
                self.result_queue_capacity
            );
        }
        if !(1_000..=600_000).contains(&self.supervisor_max_backoff_ms) {
            bail!(
                "--supervisor-max-backoff-ms must be between 1000 and 600000, got {}",
                self.supervisor_max_backoff_ms
            );
        }
        if self.stream_initial_timeout_ms == 0 || self.stream_initial_timeout_ms > MAX_STREAM_TIMEOUT_MS
        {
            bail!(
                "--stream-initial-timeout-ms must be between 1 and {MAX_STREAM_TIMEOUT_MS}, got {}",
                self.stream_initial_timeout_ms
            );
        }
        if self.stream_chunk_timeout_ms == 0
            || self.stream_chunk_timeout_ms > self.stream_initial_timeout_ms
        {
            bail!(
                "--stream-chunk-timeout-ms must be between 1 and --stream-initial-timeout-ms ({})",
                self.stream_initial_timeout_ms
            );
        }
        if self.prebuffer_bytes == 0 || self.prebuffer_bytes > MAX_PREBUFFER_BYTES {
            bail!(
                "--prebuffer-bytes must be between 1 and {MAX_PREBUFFER_BYTES}, got {}",
                self.prebuffer_bytes
            );
        }
        if self.stream_buffer_cap_bytes < MAX_PREBUFFER_BYTES
            || self.stream_buffer_cap_bytes > 64 * 1024 * 1024
        {
            bail!(
                "--stream-buffer-cap-bytes must be between {MAX_PREBUFFER_BYTES} and 67108864, got {}",
                self.stream_buffer_cap_bytes
            );
        }
        if !(8_000..=96_000).contains(&self.playback_rate) {
            bail!(
                "--playback-rate must be between 8000 and 96000 Hz, got {}",
                self.playback_rate
            );
        }
        check_unit("--damage-threshold", self.damage_threshold)?;
        if let Some(level) = self.damage_level_override {
            check_unit("--damage-level-override", level)?;
        }
        check_unit("--volume-flicker-min", self.volume_flicker_min)?;
        check_unit("--volume-flicker-max", self.volume_flicker_max)?;
        if self.volume_flicker_min > self.volume_flicker_max {
            bail!(
                "--volume-flicker-min ({}) cannot exceed --volume-flicker-max ({})",
                self.volume_flicker_min,
                self.volume_flicker_max
            );
        }
        check_unit("--glitch-rate", self.glitch_rate)?;
        check_unit("--crackle-probability", self.crackle_probability)?;

        #[cfg(not(feature = "vad_earshot"))]
        if matches!(self.vad_engine, super::VadEngineKind::Earshot) {
            bail!("--vad-engine earshot requires building with the 'vad_earshot' feature");
        }

        if let Some(word) = self.required_word.take() {
            let trimmed = word.trim();
            if trimmed.len() > MAX_REQUIRED_WORD_BYTES {
                bail!("--required-word must be at most {MAX_REQUIRED_WORD_BYTES} bytes");
            }
            if !trimmed.is_empty() {
                self.required_word = Some(trimmed.to_string());
            }
        }

        if self.stt_prompt.len() > MAX_STT_PROMPT_BYTES {
            bail!("--stt-prompt must be at most {MAX_STT_PROMPT_BYTES} bytes");
        }

        if let Some(lang) = self.lang.take() {
            let lang = lang.trim().to_string();
            if lang.is_empty() || lang.eq_ignore_ascii_case("auto") {
                self.lang = None;
            } else {
                validate_language(&lang)?;
                self.lang = Some(lang);
            }
        }

        if let Some(path) = &self.effects_file {
            if !path.is_file() {
                bail!("--effects-file '{}' does not exist", path.display());
            }
        }

        if let Some(model) = &self.whisper_model_path {
            if !model.exists() {
                bail!("whisper model path '{}' does not exist", model.display());
            }
        }

        Ok(())
    }

    /// Snapshot the capture and transcription settings for downstream consumers.
    pub fn voice_pipeline_config(&self) -> VoicePipelineConfig {
        VoicePipelineConfig {
            vad_threshold: self.vad_threshold,
            vad_engine: self.vad_engine,
            phrase_end_pause_ms: self.phrase_end_pause_ms,
            probe_window_ms: self.probe_window_ms,
            onset_preroll_ms: self.onset_preroll_ms,
            min_utterance_ms: self.min_utterance_ms,
            required_word: self.required_word.clone(),
            language: self.lang.clone(),
            prompt: self.stt_prompt.clone(),
            stt_provider: self.stt_provider,
            frame_channel_capacity: self.frame_channel_capacity,
            result_queue_capacity: self.result_queue_capacity,
            supervisor_max_backoff_ms: self.supervisor_max_backoff_ms,
        }
    }

    /// Snapshot the synthesis stream and playback settings.
    pub fn speech_output_config(&self) -> SpeechOutputConfig {
        SpeechOutputConfig {
            initial_timeout_ms: self.stream_initial_timeout_ms,
            chunk_timeout_ms: self.stream_chunk_timeout_ms,
            prebuffer_bytes: self.prebuffer_bytes,
            buffer_cap_bytes: self.stream_buffer_cap_bytes,
            playback_rate: self.playback_rate,
        }
    }

    /// Effect settings from `--effects-file` when given, otherwise from the CLI flags.
    pub fn effects_settings(&self) -> Result<EffectsSettings> {
        if let Some(path) = &self.effects_file {
            return load_effects_file(path);
        }
        Ok(EffectsSettings {
            damage: DamageSettings {
                enabled: !self.no_damage_effects,
                threshold: self.damage_threshold,
                damage_level_override: self.damage_level_override,
                volume_flicker_min: self.volume_flicker_min,
                volume_flicker_max: self.volume_flicker_max,
                glitch_rate: self.glitch_rate,
                crackle_probability: self.crackle_probability,
                ..DamageSettings::default()
            },
            vehicle_reverb: ReverbSettings {
                enabled: self.vehicle_reverb,
                ..ReverbSettings::default()
            },
            ..EffectsSettings::default()
        })
    }
}

fn check_unit(flag: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        bail!("{flag} must be between 0.0 and 1.0, got {value}");
    }
    Ok(())
}

/// Accept locale-style values but only check the leading ISO-639-1 code.
pub(super) fn validate_language(lang: &str) -> Result<()> {
    if !lang
        .chars()
        .all(|ch| ch.is_ascii_alphabetic() || ch == '-' || ch == '_')
    {
        bail!("--lang must contain only alphabetic characters or '-'/'_' separators");
    }
    let primary = lang
        .split(['-', '_'])
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    if !ISO_639_1_CODES.contains(&primary.as_str()) {
        bail!("--lang must start with a valid ISO-639-1 code or be 'auto', got '{lang}'");
    }
    Ok(())
}

pub(super) fn load_effects_file(path: &Path) -> Result<EffectsSettings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read effects file '{}'", path.display()))?;
    let settings: EffectsSettings = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse effects file '{}'", path.display()))?;
    settings
        .validate()
        .with_context(|| format!("invalid effects file '{}'", path.display()))?;
    Ok(settings)
}
