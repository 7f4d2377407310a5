//! Error types shared by the capture, transcription, and synthesis paths.

use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result alias for voice engine operations.
pub type Result<T> = std::result::Result<T, VoiceError>;

/// Failure reported by an external speech backend (transcription or synthesis).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{provider}: {message}")]
pub struct ProviderError {
    pub provider: String,
    pub message: String,
}

impl ProviderError {
    pub fn new(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

/// Which side of the first audio byte a stream timeout fired on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// No audio arrived before `initial_timeout`.
    Initial,
    /// Audio stopped arriving for longer than `chunk_timeout`.
    Gap,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutPhase::Initial => f.write_str("before first audio"),
            TimeoutPhase::Gap => f.write_str("between audio chunks"),
        }
    }
}

/// Errors produced by the voice engine.
#[derive(Debug, Error)]
pub enum VoiceError {
    /// Capture device hiccup; the listening supervisor restarts the loop.
    #[error("capture error: {0}")]
    TransientCapture(String),

    /// Transcription or synthesis backend failed.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Synthesis stream stalled; fatal to the current session only.
    #[error("synthesis stream timed out {phase} after {waited:?}")]
    StreamTimeout { phase: TimeoutPhase, waited: Duration },

    /// Reads against a closed stream adapter.
    #[error("synthesis stream closed")]
    StreamClosed,

    /// Encoded synthesis audio could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// A post-processor failed; the chain degrades to pass-through.
    #[error("effect `{processor}` failed: {reason}")]
    EffectProcessing {
        processor: &'static str,
        reason: String,
    },

    /// Output device failure.
    #[error("playback error: {0}")]
    Playback(String),
}

impl VoiceError {
    pub fn is_stream_timeout(&self) -> bool {
        matches!(self, VoiceError::StreamTimeout { .. })
    }

    /// Short stable label used in log lines.
    pub fn label(&self) -> &'static str {
        match self {
            VoiceError::TransientCapture(_) => "transient_capture",
            VoiceError::Provider(_) => "provider",
            VoiceError::StreamTimeout { .. } => "stream_timeout",
            VoiceError::StreamClosed => "stream_closed",
            VoiceError::Decode(_) => "decode",
            VoiceError::EffectProcessing { .. } => "effect_processing",
            VoiceError::Playback(_) => "playback",
        }
    }

    /// Recover a voice error that travelled through an `io::Error`, e.g. out of a
    /// decoder reading from the stream adapter.
    pub fn from_io(err: io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<VoiceError>()) {
            if let Some(inner) = err.into_inner() {
                if let Ok(voice) = inner.downcast::<VoiceError>() {
                    return *voice;
                }
            }
            return VoiceError::Decode("stream error".to_string());
        }
        VoiceError::Decode(err.to_string())
    }

    pub(crate) fn into_io(self) -> io::Error {
        let kind = match self {
            VoiceError::StreamTimeout { .. } => io::ErrorKind::TimedOut,
            VoiceError::StreamClosed => io::ErrorKind::BrokenPipe,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, self)
    }
}
