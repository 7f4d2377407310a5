//! Utterance segmentation state machine.
//!
//! Consumes detector-sized frames and decides where spoken utterances start and
//! end. Push-to-talk buffers everything between explicit start/stop signals;
//! continuous mode gates on VAD scores and finalizes after a quiet tail.

use super::pcm::{samples_to_pcm_bytes, Frame};
use super::vad::{is_voiced, VoiceActivityDetector};
use super::TARGET_RATE;
use crate::config::{
    VoicePipelineConfig, DEFAULT_ONSET_PREROLL_MS, DEFAULT_PHRASE_END_PAUSE_MS,
    DEFAULT_PROBE_WINDOW_MS, DEFAULT_VAD_THRESHOLD,
};
use crate::log_debug;
use std::collections::VecDeque;
use std::io::Cursor;

#[derive(Debug, Clone, PartialEq)]
pub struct SegmenterConfig {
    pub vad_threshold: f32,
    pub phrase_end_pause_ms: u64,
    pub probe_window_ms: u64,
    pub onset_preroll_ms: u64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            vad_threshold: DEFAULT_VAD_THRESHOLD,
            phrase_end_pause_ms: DEFAULT_PHRASE_END_PAUSE_MS,
            probe_window_ms: DEFAULT_PROBE_WINDOW_MS,
            onset_preroll_ms: DEFAULT_ONSET_PREROLL_MS,
        }
    }
}

impl From<&VoicePipelineConfig> for SegmenterConfig {
    fn from(cfg: &VoicePipelineConfig) -> Self {
        Self {
            vad_threshold: cfg.vad_threshold,
            phrase_end_pause_ms: cfg.phrase_end_pause_ms,
            probe_window_ms: cfg.probe_window_ms,
            onset_preroll_ms: cfg.onset_preroll_ms,
        }
    }
}

fn ms_to_samples(ms: u64) -> usize {
    ((ms * u64::from(TARGET_RATE)) / 1000) as usize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterMode {
    PushToTalk,
    Continuous,
}

impl SegmenterMode {
    pub fn label(self) -> &'static str {
        match self {
            SegmenterMode::PushToTalk => "push_to_talk",
            SegmenterMode::Continuous => "continuous",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    Idle,
    Recording,
}

/// Why an utterance was finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndOfSpeech { tail_ms: u64 },
    ManualStop,
    EndOfStream,
    ListenerStopped,
}

impl StopReason {
    pub fn label(&self) -> &'static str {
        match self {
            StopReason::EndOfSpeech { .. } => "end_of_speech",
            StopReason::ManualStop => "manual_stop",
            StopReason::EndOfStream => "end_of_stream",
            StopReason::ListenerStopped => "listener_stopped",
        }
    }
}

/// Per-utterance counters for observability and the offline benchmark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationMetrics {
    pub mode: SegmenterMode,
    pub utterance_ms: u64,
    pub frames_processed: usize,
    pub frames_dropped: usize,
    pub stop_reason: StopReason,
}

/// Emit structured metrics for the benchmark harness and log scrapers.
/// Format: `voice_metrics|mode=...|utterance_ms=...|frames=...|dropped=...|stop=...`
pub fn log_segmentation_metrics(metrics: &SegmentationMetrics) {
    log_debug(&metrics.to_string());
}

impl std::fmt::Display for SegmentationMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "voice_metrics|mode={}|utterance_ms={}|frames={}|dropped={}|stop={}",
            self.mode.label(),
            self.utterance_ms,
            self.frames_processed,
            self.frames_dropped,
            self.stop_reason.label()
        )
    }
}

/// One finalized span of speech: 16 kHz mono PCM16 plus the wall-clock time
/// the first retained frame arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    samples: Vec<i16>,
    sample_rate: u32,
    started_at: f64,
}

impl Utterance {
    pub fn new(samples: Vec<i16>, sample_rate: u32, started_at: f64) -> Self {
        Self {
            samples,
            sample_rate,
            started_at,
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Unix seconds.
    pub fn started_at(&self) -> f64 {
        self.started_at
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    pub fn pcm_bytes(&self) -> Vec<u8> {
        samples_to_pcm_bytes(&self.samples)
    }

    /// 16-bit mono WAV container, the format transcription backends accept.
    pub fn to_wav(&self) -> Result<Vec<u8>, hound::Error> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::with_capacity(44 + self.samples.len() * 2));
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
            for sample in &self.samples {
                writer.write_sample(*sample)?;
            }
            writer.finalize()?;
        }
        Ok(cursor.into_inner())
    }
}

pub(super) struct FrameRecord {
    pub(super) samples: Vec<i16>,
    pub(super) voiced: bool,
    captured_at: f64,
}

#[derive(Default)]
pub(super) struct FrameAccumulator {
    pub(super) frames: VecDeque<FrameRecord>,
    pub(super) total_samples: usize,
}

impl FrameAccumulator {
    pub(super) fn push_frame(&mut self, samples: Vec<i16>, voiced: bool, captured_at: f64) {
        self.total_samples = self.total_samples.saturating_add(samples.len());
        self.frames.push_back(FrameRecord {
            samples,
            voiced,
            captured_at,
        });
    }

    #[cfg(test)]
    pub(super) fn is_empty(&self) -> bool {
        self.total_samples == 0
    }

    #[cfg(test)]
    pub(super) fn len(&self) -> usize {
        self.frames.len()
    }

    pub(super) fn clear(&mut self) {
        self.frames.clear();
        self.total_samples = 0;
    }

    /// Drop whole frames from the front until at most `limit` samples remain.
    pub(super) fn retain_last_samples(&mut self, limit: usize) {
        while self.total_samples > limit {
            match self.frames.pop_front() {
                Some(record) => {
                    self.total_samples = self.total_samples.saturating_sub(record.samples.len());
                }
                None => break,
            }
        }
    }

    /// True when the newest `window` frames exist and none of them is voiced.
    pub(super) fn trailing_window_unvoiced(&self, window: usize) -> bool {
        window > 0
            && self.frames.len() >= window
            && self.frames.iter().rev().take(window).all(|record| !record.voiced)
    }

    pub(super) fn trailing_unvoiced_samples(&self) -> usize {
        self.frames
            .iter()
            .rev()
            .take_while(|record| !record.voiced)
            .map(|record| record.samples.len())
            .sum()
    }

    pub(super) fn trim_trailing_silence(&mut self) {
        while let Some(record) = self.frames.back() {
            if record.voiced {
                break;
            }
            let len = record.samples.len();
            self.frames.pop_back();
            self.total_samples = self.total_samples.saturating_sub(len);
        }
    }

    fn started_at(&self) -> Option<f64> {
        self.frames.front().map(|record| record.captured_at)
    }

    pub(super) fn into_utterance(self, fallback_started_at: f64) -> Utterance {
        let started_at = self.started_at().unwrap_or(fallback_started_at);
        let mut samples = Vec::with_capacity(self.total_samples);
        for record in self.frames {
            samples.extend(record.samples);
        }
        Utterance::new(samples, TARGET_RATE, started_at)
    }
}

/// Frame-driven segmentation state machine. Owned by exactly one capture thread.
pub struct UtteranceSegmenter {
    cfg: SegmenterConfig,
    mode: SegmenterMode,
    state: SegmenterState,
    accumulator: FrameAccumulator,
    started_at: f64,
    frames_processed: usize,
    frames_dropped: usize,
    last_metrics: Option<SegmentationMetrics>,
}

impl UtteranceSegmenter {
    pub fn new(cfg: SegmenterConfig, mode: SegmenterMode) -> Self {
        Self {
            cfg,
            mode,
            state: SegmenterState::Idle,
            accumulator: FrameAccumulator::default(),
            started_at: 0.0,
            frames_processed: 0,
            frames_dropped: 0,
            last_metrics: None,
        }
    }

    pub fn mode(&self) -> SegmenterMode {
        self.mode
    }

    pub fn state(&self) -> SegmenterState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == SegmenterState::Recording
    }

    pub fn buffered_samples(&self) -> usize {
        self.accumulator.total_samples
    }

    pub fn last_metrics(&self) -> Option<&SegmentationMetrics> {
        self.last_metrics.as_ref()
    }

    /// Push-to-talk start. Ignored in continuous mode or while already recording.
    pub fn start(&mut self, now: f64) {
        if self.mode != SegmenterMode::PushToTalk || self.is_recording() {
            return;
        }
        self.accumulator.clear();
        self.frames_processed = 0;
        self.frames_dropped = 0;
        self.started_at = now;
        self.state = SegmenterState::Recording;
    }

    /// Push-to-talk stop: finalize everything buffered since `start`.
    pub fn stop(&mut self) -> Option<Utterance> {
        if !self.is_recording() {
            return None;
        }
        self.finalize(StopReason::ManualStop, false)
    }

    /// Frame read from the source while listening is paused.
    pub fn note_dropped(&mut self) {
        self.frames_dropped = self.frames_dropped.saturating_add(1);
    }

    /// Feed one frame in arrival order. Returns a finalized utterance when the
    /// frame completed one.
    pub fn push_frame(
        &mut self,
        frame: Frame,
        vad: &mut dyn VoiceActivityDetector,
        now: f64,
    ) -> Option<Utterance> {
        self.frames_processed = self.frames_processed.saturating_add(1);
        match self.mode {
            SegmenterMode::PushToTalk => {
                if self.is_recording() {
                    self.accumulator.push_frame(frame.into_samples(), true, now);
                }
                None
            }
            SegmenterMode::Continuous => self.push_continuous(frame, vad, now),
        }
    }

    fn push_continuous(
        &mut self,
        frame: Frame,
        vad: &mut dyn VoiceActivityDetector,
        now: f64,
    ) -> Option<Utterance> {
        let frame_len = frame.len().max(1);
        let score = vad.score(frame.samples());
        let voiced = is_voiced(score, self.cfg.vad_threshold);
        self.accumulator.push_frame(frame.into_samples(), voiced, now);

        match self.state {
            SegmenterState::Idle => {
                let preroll = ms_to_samples(self.cfg.onset_preroll_ms);
                if voiced {
                    self.accumulator.retain_last_samples(preroll + frame_len);
                    self.state = SegmenterState::Recording;
                    tracing::debug!(score, "speech onset");
                } else if self.accumulator.total_samples > ms_to_samples(self.cfg.probe_window_ms) {
                    self.accumulator.retain_last_samples(preroll);
                }
                None
            }
            SegmenterState::Recording => {
                let window = (ms_to_samples(self.cfg.phrase_end_pause_ms) / frame_len).max(1);
                if self.accumulator.trailing_window_unvoiced(window) {
                    let tail_ms =
                        (self.accumulator.trailing_unvoiced_samples() as u64 * 1000) / u64::from(TARGET_RATE);
                    return self.finalize(StopReason::EndOfSpeech { tail_ms }, true);
                }
                None
            }
        }
    }

    /// Finalize whatever is being recorded, e.g. when the source ends or the
    /// listener stops mid-utterance. Idle pre-onset audio is discarded.
    pub fn flush(&mut self, reason: StopReason) -> Option<Utterance> {
        if !self.is_recording() {
            self.accumulator.clear();
            return None;
        }
        self.finalize(reason, false)
    }

    fn finalize(&mut self, reason: StopReason, trim_tail: bool) -> Option<Utterance> {
        let mut accumulator = std::mem::take(&mut self.accumulator);
        if trim_tail {
            accumulator.trim_trailing_silence();
        }
        let utterance = accumulator.into_utterance(self.started_at);
        let metrics = SegmentationMetrics {
            mode: self.mode,
            utterance_ms: (utterance.duration_secs() * 1000.0).round() as u64,
            frames_processed: self.frames_processed,
            frames_dropped: self.frames_dropped,
            stop_reason: reason,
        };
        log_segmentation_metrics(&metrics);
        tracing::info!(
            mode = metrics.mode.label(),
            utterance_ms = metrics.utterance_ms,
            stop = metrics.stop_reason.label(),
            "utterance finalized"
        );
        self.last_metrics = Some(metrics);
        self.state = SegmenterState::Idle;
        self.frames_processed = 0;
        self.frames_dropped = 0;

        if utterance.is_empty() {
            None
        } else {
            Some(utterance)
        }
    }
}

/// Result of running the continuous segmenter over a finished recording.
#[derive(Debug, Clone, Default)]
pub struct OfflineSegmentation {
    pub utterances: Vec<Utterance>,
    pub metrics: Vec<SegmentationMetrics>,
}

/// Run the continuous segmenter against in-memory samples. Used by the
/// benchmark harness so segmentation latency can be measured without devices.
pub fn segment_offline(
    samples: &[i16],
    cfg: &SegmenterConfig,
    vad: &mut dyn VoiceActivityDetector,
) -> OfflineSegmentation {
    let frame_samples = vad.frame_samples().max(1);
    let frame_secs = frame_samples as f64 / f64::from(TARGET_RATE);
    let mut segmenter = UtteranceSegmenter::new(cfg.clone(), SegmenterMode::Continuous);
    let mut result = OfflineSegmentation::default();

    for (index, chunk) in samples.chunks(frame_samples).enumerate() {
        let mut frame = chunk.to_vec();
        frame.resize(frame_samples, 0);
        let now = index as f64 * frame_secs;
        if let Some(utterance) = segmenter.push_frame(Frame::new(frame), vad, now) {
            result.utterances.push(utterance);
            result.metrics.extend(segmenter.last_metrics().cloned());
        }
    }
    if let Some(utterance) = segmenter.flush(StopReason::EndOfStream) {
        result.utterances.push(utterance);
        result.metrics.extend(segmenter.last_metrics().cloned());
    }
    vad.reset();
    result
}
