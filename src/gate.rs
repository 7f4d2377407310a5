//! Validation and filtering around the transcription call.
//!
//! Every finalized utterance passes through [`TranscriptionGate::evaluate`]:
//! cheap local checks first (duration, a second VAD pass), then the provider,
//! then transcript filters. Only non-empty text that passes every filter turns
//! into a [`TranscriptionResult`].

use crate::audio::{is_voiced, max_score, Utterance, VoiceActivityDetector};
use crate::config::VoicePipelineConfig;
use crate::error::ProviderError;
use crate::stt::TranscriptionProvider;
use crate::{log_debug, log_debug_content};
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig {
    pub vad_threshold: f32,
    pub min_utterance_ms: u64,
    pub required_word: Option<String>,
    pub language: Option<String>,
    pub prompt: String,
}

impl From<&VoicePipelineConfig> for GateConfig {
    fn from(cfg: &VoicePipelineConfig) -> Self {
        Self {
            vad_threshold: cfg.vad_threshold,
            min_utterance_ms: cfg.min_utterance_ms,
            required_word: cfg.required_word.clone(),
            language: cfg.language.clone(),
            prompt: cfg.prompt.clone(),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::from(&VoicePipelineConfig::default())
    }
}

/// Accepted transcript together with the audio it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionResult {
    pub text: String,
    pub audio: Utterance,
    /// Unix seconds at which the utterance started.
    pub timestamp: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    TooShort,
    NoVoice,
    Empty,
    Filler,
    MissingRequiredWord,
}

impl RejectReason {
    pub fn label(self) -> &'static str {
        match self {
            RejectReason::TooShort => "too_short",
            RejectReason::NoVoice => "no_voice",
            RejectReason::Empty => "empty",
            RejectReason::Filler => "filler",
            RejectReason::MissingRequiredWord => "missing_required_word",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Accepted(TranscriptionResult),
    Rejected(RejectReason),
    /// The provider failed. Treated as "nothing said" by the listener.
    Failed(ProviderError),
}

impl GateDecision {
    pub fn label(&self) -> &'static str {
        match self {
            GateDecision::Accepted(_) => "accepted",
            GateDecision::Rejected(reason) => reason.label(),
            GateDecision::Failed(_) => "provider_error",
        }
    }

    pub fn into_result(self) -> Option<TranscriptionResult> {
        match self {
            GateDecision::Accepted(result) => Some(result),
            _ => None,
        }
    }
}

pub struct TranscriptionGate {
    config: GateConfig,
    provider: TranscriptionProvider,
    vad: Box<dyn VoiceActivityDetector>,
}

impl TranscriptionGate {
    /// `vad` is a dedicated instance; the capture thread's detector keeps its
    /// own state.
    pub fn new(
        config: GateConfig,
        provider: TranscriptionProvider,
        vad: Box<dyn VoiceActivityDetector>,
    ) -> Self {
        Self {
            config,
            provider,
            vad,
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn evaluate(&mut self, utterance: Utterance) -> GateDecision {
        let decision = self.decide(utterance);
        match &decision {
            GateDecision::Accepted(result) => {
                log_debug_content(&format!("gate accepted: {}", result.text));
            }
            GateDecision::Failed(err) => {
                log_debug(&format!("transcription failed: {err}"));
            }
            GateDecision::Rejected(reason) => {
                log_debug(&format!("utterance rejected: {}", reason.label()));
            }
        }
        tracing::info!(
            decision = decision.label(),
            provider = self.provider.name(),
            "gate decision"
        );
        decision
    }

    fn decide(&mut self, utterance: Utterance) -> GateDecision {
        let duration_ms = utterance.duration_secs() * 1000.0;
        if duration_ms < self.config.min_utterance_ms as f64 {
            return GateDecision::Rejected(RejectReason::TooShort);
        }

        let peak = max_score(self.vad.as_mut(), utterance.samples());
        if !is_voiced(peak, self.config.vad_threshold) {
            return GateDecision::Rejected(RejectReason::NoVoice);
        }

        let wav = match utterance.to_wav() {
            Ok(wav) => wav,
            Err(err) => {
                return GateDecision::Failed(ProviderError::new(
                    "wav_encoder",
                    err.to_string(),
                ))
            }
        };
        let prompt = (!self.config.prompt.is_empty()).then_some(self.config.prompt.as_str());
        let raw = match self
            .provider
            .transcribe(&wav, self.config.language.as_deref(), prompt)
        {
            Ok(text) => text,
            Err(err) => return GateDecision::Failed(err),
        };

        let text = sanitize_transcript(&raw);
        if text.is_empty() {
            return GateDecision::Rejected(RejectReason::Empty);
        }
        if is_filler(&text, &self.config.prompt) {
            return GateDecision::Rejected(RejectReason::Filler);
        }
        if let Some(word) = &self.config.required_word {
            if !contains_ignore_case(&text, word) {
                return GateDecision::Rejected(RejectReason::MissingRequiredWord);
            }
        }

        let timestamp = utterance.started_at();
        GateDecision::Accepted(TranscriptionResult {
            text,
            audio: utterance,
            timestamp,
        })
    }
}

/// Backends echo the prompt back when fed near-silence.
fn is_filler(text: &str, prompt: &str) -> bool {
    text.is_empty() || text == prompt.trim()
}

fn contains_ignore_case(text: &str, word: &str) -> bool {
    text.to_lowercase().contains(&word.to_lowercase())
}

/// Trim, drop non-speech markers such as `[BLANK_AUDIO]` or `(silence)`, and
/// collapse whitespace.
pub fn sanitize_transcript(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    static NON_SPEECH_RE: OnceLock<Regex> = OnceLock::new();
    let re = NON_SPEECH_RE.get_or_init(|| {
        Regex::new(
            r"(?i)\[\s*\]|\(\s*\)|\[(?:\s*(?:silence|noise|inaudible|blank_audio|blank audio|music|laughter|applause|cough|breath(?:ing)?|wind|background)\s*)\]|\((?:\s*(?:silence|noise|inaudible|blank audio|music|laughter|applause|cough|breath(?:ing)?|wind|background|wind blowing)\s*)\)",
        )
        .expect("non-speech regex should compile")
    });
    let without_markers = re.replace_all(trimmed, " ");
    without_markers
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
