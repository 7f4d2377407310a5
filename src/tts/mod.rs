//! Speech output: synthesis providers, the stream adapter, decoding, effects,
//! and playback.
//!
//! One call to [`SpeechPlayer::synthesize_and_play`] is one session. The
//! provider's events are drained on a producer thread into a
//! [`StreamDecodeAdapter`]; the calling thread decodes, runs the effects
//! chain, and writes to the sink until the stream ends, stalls, or is aborted.

mod decode;
mod playback;
mod stream;
#[cfg(test)]
mod tests;
mod text;

pub use decode::{SpeechDecoder, PCM_READ_BYTES};
pub use playback::{CpalSink, PlaybackSink};
pub use stream::{StreamCanceller, StreamConfig, StreamDecodeAdapter};
pub use text::{prepare_text, spell_out_numbers, strip_markdown};

use crate::config::{SpeechOutputConfig, MAX_PREBUFFER_BYTES, PLAYBACK_BLOCK_BYTES};
use crate::effects::EffectsChain;
use crate::error::{ProviderError, Result};
use crate::lock_or_recover;
use crate::log_debug;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sample rate the silent provider pretends to synthesize at.
pub const SILENT_SAMPLE_RATE: u32 = 24_000;
pub const DEFAULT_WORDS_PER_MINUTE: f32 = 150.0;

/// One item from a provider's lazy event sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisEvent {
    Audio(Vec<u8>),
    /// Anything else the provider reports (word boundaries, metadata).
    Other(String),
}

pub type SynthesisEvents =
    Box<dyn Iterator<Item = std::result::Result<SynthesisEvent, ProviderError>> + Send>;

/// Byte format of a provider's audio events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioEncoding {
    /// Little-endian mono PCM16.
    Pcm16 { sample_rate: u32 },
    Mp3,
}

/// External text-to-speech backend.
pub trait SpeechSynthesizer: Send {
    fn synthesize(
        &mut self,
        text: &str,
        voice: &str,
    ) -> std::result::Result<SynthesisEvents, ProviderError>;

    fn encoding(&self) -> AudioEncoding;

    fn name(&self) -> &str;

    /// Backends that misread grouped digits ("1,234") get numbers as words.
    fn spells_numbers(&self) -> bool {
        false
    }
}

pub enum SynthesisProvider {
    Remote(Box<dyn SpeechSynthesizer>),
    Local(Box<dyn SpeechSynthesizer>),
    /// No backend: silence as long as the text would take to speak.
    Silent { words_per_minute: f32 },
}

impl SynthesisProvider {
    pub fn silent() -> Self {
        SynthesisProvider::Silent {
            words_per_minute: DEFAULT_WORDS_PER_MINUTE,
        }
    }

    pub fn synthesize(
        &mut self,
        text: &str,
        voice: &str,
    ) -> std::result::Result<SynthesisEvents, ProviderError> {
        match self {
            SynthesisProvider::Remote(backend) | SynthesisProvider::Local(backend) => {
                backend.synthesize(text, voice)
            }
            SynthesisProvider::Silent { words_per_minute } => {
                Ok(silent_events(text, *words_per_minute))
            }
        }
    }

    pub fn encoding(&self) -> AudioEncoding {
        match self {
            SynthesisProvider::Remote(backend) | SynthesisProvider::Local(backend) => {
                backend.encoding()
            }
            SynthesisProvider::Silent { .. } => AudioEncoding::Pcm16 {
                sample_rate: SILENT_SAMPLE_RATE,
            },
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SynthesisProvider::Remote(backend) | SynthesisProvider::Local(backend) => {
                backend.name()
            }
            SynthesisProvider::Silent { .. } => "silent",
        }
    }

    pub fn spells_numbers(&self) -> bool {
        match self {
            SynthesisProvider::Remote(backend) | SynthesisProvider::Local(backend) => {
                backend.spells_numbers()
            }
            SynthesisProvider::Silent { .. } => false,
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            SynthesisProvider::Remote(_) => "remote",
            SynthesisProvider::Local(_) => "local",
            SynthesisProvider::Silent { .. } => "silent",
        }
    }
}

/// Estimated speaking time for `text`.
pub fn speaking_time(text: &str, words_per_minute: f32) -> Duration {
    let words = text.split_whitespace().count() as f64;
    let rate = f64::from(words_per_minute);
    if words == 0.0 || rate.is_nan() || rate <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(words / rate * 60.0)
}

fn silent_events(text: &str, words_per_minute: f32) -> SynthesisEvents {
    let secs = speaking_time(text, words_per_minute).as_secs_f64();
    let total = (secs * f64::from(SILENT_SAMPLE_RATE)).round() as usize * 2;
    Box::new(
        (0..total)
            .step_by(PCM_READ_BYTES)
            .map(move |start| {
                let len = PCM_READ_BYTES.min(total - start);
                Ok::<_, ProviderError>(SynthesisEvent::Audio(vec![0u8; len]))
            }),
    )
}

/// What happened during one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    pub chunks: usize,
    pub bytes_played: usize,
    pub underruns: u64,
    pub aborted: bool,
    /// Delay from the request to the first decoded audio.
    pub first_audio: Option<Duration>,
}

pub struct SpeechPlayer {
    config: SpeechOutputConfig,
    provider: Mutex<SynthesisProvider>,
    sink: Mutex<Box<dyn PlaybackSink>>,
    effects: Mutex<EffectsChain>,
    pending_toggles: Mutex<Vec<(String, bool)>>,
    session: Mutex<Option<StreamCanceller>>,
    prebuffer_bytes: AtomicUsize,
    playing: AtomicBool,
    /// Bumped by every abort so a session still waiting on its provider
    /// notices the request once it starts.
    abort_generation: AtomicU64,
}

impl SpeechPlayer {
    pub fn new(
        config: &SpeechOutputConfig,
        provider: SynthesisProvider,
        sink: Box<dyn PlaybackSink>,
        effects: EffectsChain,
    ) -> Self {
        if effects.sample_rate() != config.playback_rate {
            log_debug(&format!(
                "effects chain runs at {}Hz but playback is {}Hz",
                effects.sample_rate(),
                config.playback_rate
            ));
        }
        Self {
            config: config.clone(),
            provider: Mutex::new(provider),
            sink: Mutex::new(sink),
            effects: Mutex::new(effects),
            pending_toggles: Mutex::new(Vec::new()),
            session: Mutex::new(None),
            prebuffer_bytes: AtomicUsize::new(config.prebuffer_bytes),
            playing: AtomicBool::new(false),
            abort_generation: AtomicU64::new(0),
        }
    }

    /// Speak `text`, blocking until it has played, the stream stalls, or the
    /// session is aborted. A failure ends this session only. Markdown is
    /// stripped first; text with nothing left to say plays nothing.
    pub fn synthesize_and_play(&self, text: &str, voice: &str) -> Result<PlaybackReport> {
        if text.trim().is_empty() {
            return Ok(PlaybackReport::default());
        }
        let generation = self.abort_generation.load(Ordering::SeqCst);
        self.playing.store(true, Ordering::SeqCst);
        let outcome = self.run_session(text, voice, generation);
        self.playing.store(false, Ordering::SeqCst);
        outcome
    }

    fn run_session(&self, text: &str, voice: &str, generation: u64) -> Result<PlaybackReport> {
        let started = Instant::now();
        let (events, encoding, provider_name) = {
            let mut provider = lock_or_recover(&self.provider, "synthesis provider");
            let text = prepare_text(text, provider.spells_numbers());
            if text.is_empty() {
                return Ok(PlaybackReport::default());
            }
            let encoding = provider.encoding();
            let name = provider.name().to_string();
            let events = provider.synthesize(&text, voice).map_err(|err| {
                log_debug(&format!("synthesis request failed: {err}"));
                tracing::warn!(provider = %name, error = %err, "synthesis request failed");
                err
            })?;
            (events, encoding, name)
        };

        let mut stream_config = StreamConfig::from(&self.config);
        stream_config.prebuffer_bytes = self.prebuffer_bytes();
        let adapter = StreamDecodeAdapter::spawn(events, stream_config);
        let canceller = adapter.canceller();
        *lock_or_recover(&self.session, "speech session") = Some(canceller.clone());
        // An abort that landed while the provider was still answering.
        if self.abort_generation.load(Ordering::SeqCst) != generation {
            canceller.close();
            log_debug("speech aborted before playback started");
        }

        let outcome = self.play(adapter, encoding, &canceller, started);

        *lock_or_recover(&self.session, "speech session") = None;
        match &outcome {
            Ok(report) => tracing::info!(
                provider = %provider_name,
                chunks = report.chunks,
                bytes = report.bytes_played,
                underruns = report.underruns,
                aborted = report.aborted,
                "speech session finished"
            ),
            Err(err) => {
                log_debug(&format!("speech session failed: {err}"));
                tracing::warn!(provider = %provider_name, error = %err, kind = err.label(), "speech session failed");
            }
        }
        outcome
    }

    fn play(
        &self,
        adapter: StreamDecodeAdapter,
        encoding: AudioEncoding,
        canceller: &StreamCanceller,
        started: Instant,
    ) -> Result<PlaybackReport> {
        let mut decoder = SpeechDecoder::new(adapter, encoding, self.config.playback_rate);
        let mut effects = lock_or_recover(&self.effects, "effects chain");
        effects.reset();
        let mut sink = lock_or_recover(&self.sink, "playback sink");
        let underruns_before = sink.underruns();
        let mut report = PlaybackReport::default();

        let result = loop {
            if canceller.is_closed() {
                break Ok(());
            }
            let chunk = match decoder.next_chunk() {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            };
            if report.first_audio.is_none() {
                let delay = started.elapsed();
                log_debug(&format!("tts response time {delay:?}"));
                report.first_audio = Some(delay);
            }
            self.apply_toggles(&mut effects);
            let processed = effects.process(&chunk);
            if let Err(err) = sink.write(&processed) {
                break Err(err);
            }
            report.chunks += 1;
            report.bytes_played += processed.len();
        };

        if canceller.is_closed() {
            report.aborted = true;
            sink.clear();
        } else if result.is_ok() {
            sink.finish()?;
        } else {
            sink.clear();
        }

        report.underruns = sink.underruns().saturating_sub(underruns_before);
        if report.underruns > 0 {
            self.grow_prebuffer(report.underruns);
        }
        result.map(|()| report)
    }

    fn apply_toggles(&self, effects: &mut EffectsChain) {
        let toggles = std::mem::take(&mut *lock_or_recover(&self.pending_toggles, "effect toggles"));
        for (name, enabled) in toggles {
            if !effects.set_enabled(&name, enabled) {
                log_debug(&format!("unknown effect stage '{name}'"));
            }
        }
    }

    fn grow_prebuffer(&self, underruns: u64) {
        let current = self.prebuffer_bytes();
        let next = (current.max(PLAYBACK_BLOCK_BYTES) * 2)
            .min(MAX_PREBUFFER_BYTES)
            .max(current);
        self.prebuffer_bytes.store(next, Ordering::SeqCst);
        log_debug(&format!(
            "tts underflow detected, total {underruns}; prebuffer {current} -> {next} bytes"
        ));
    }

    /// Stop the current session, including one still waiting on its
    /// provider. Queued audio is dropped.
    pub fn abort(&self) {
        self.abort_generation.fetch_add(1, Ordering::SeqCst);
        if let Some(canceller) = lock_or_recover(&self.session, "speech session").as_ref() {
            canceller.close();
            log_debug("speech playback aborted");
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// Toggle an effect stage. Applied before the next chunk is processed.
    pub fn set_effect_enabled(&self, name: &str, enabled: bool) {
        lock_or_recover(&self.pending_toggles, "effect toggles").push((name.to_string(), enabled));
    }

    /// Prebuffer threshold the next session starts with.
    pub fn prebuffer_bytes(&self) -> usize {
        self.prebuffer_bytes.load(Ordering::SeqCst)
    }

    pub fn provider_name(&self) -> String {
        lock_or_recover(&self.provider, "synthesis provider")
            .name()
            .to_string()
    }
}
