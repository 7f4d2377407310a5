//! Background capture threads that segment microphone audio, run it through
//! the transcription gate, and queue accepted transcripts for the assistant.
//!
//! Continuous listening runs under a restart supervisor with exponential
//! backoff. Push-to-talk runs one capture per start/end pair.

use crate::audio::{
    FrameSource, MicrophoneSource, SegmenterConfig, SegmenterMode, StopReason, Utterance,
    UtteranceSegmenter, VoiceActivityDetector,
};
use crate::config::{VadEngineKind, VoicePipelineConfig, DEFAULT_SUPERVISOR_INITIAL_BACKOFF_MS};
use crate::gate::{GateConfig, TranscriptionGate, TranscriptionResult};
use crate::lock_or_recover;
use crate::log_debug;
use crate::stt::TranscriptionProvider;
use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Opens a frame source on the capture thread.
pub type SourceFactory = Arc<dyn Fn() -> Result<Box<dyn FrameSource>> + Send + Sync>;
/// Builds a fresh detector for each capture loop.
pub type VadFactory = Arc<dyn Fn() -> Box<dyn VoiceActivityDetector> + Send + Sync>;

const STOP_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl From<&VoicePipelineConfig> for SupervisorConfig {
    fn from(cfg: &VoicePipelineConfig) -> Self {
        let initial_backoff = Duration::from_millis(DEFAULT_SUPERVISOR_INITIAL_BACKOFF_MS);
        Self {
            initial_backoff,
            max_backoff: Duration::from_millis(cfg.supervisor_max_backoff_ms).max(initial_backoff),
        }
    }
}

impl SupervisorConfig {
    fn next_backoff(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_backoff)
    }
}

#[derive(Default)]
struct ListenerFlags {
    paused: AtomicBool,
    continuous_active: AtomicBool,
    ptt_active: AtomicBool,
    shutdown: AtomicBool,
}

/// Everything a capture thread needs, cloned into each spawned thread.
#[derive(Clone)]
struct CaptureContext {
    segmenter: SegmenterConfig,
    supervisor: SupervisorConfig,
    source_factory: SourceFactory,
    vad_factory: VadFactory,
    gate: Arc<Mutex<TranscriptionGate>>,
    results: Sender<TranscriptionResult>,
    flags: Arc<ListenerFlags>,
}

/// Why a continuous capture loop returned without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    Stopped,
    EndOfStream,
}

/// Facade the assistant uses to drive listening and read transcripts.
pub struct SpeechListener {
    ctx: CaptureContext,
    receiver: Receiver<TranscriptionResult>,
    continuous: Option<JoinHandle<()>>,
    push_to_talk: Option<JoinHandle<()>>,
}

impl SpeechListener {
    pub fn new(
        config: &VoicePipelineConfig,
        source_factory: SourceFactory,
        vad_factory: VadFactory,
        provider: TranscriptionProvider,
    ) -> Self {
        let gate = TranscriptionGate::new(GateConfig::from(config), provider, vad_factory());
        let (sender, receiver) = bounded(config.result_queue_capacity.max(1));
        Self {
            ctx: CaptureContext {
                segmenter: SegmenterConfig::from(config),
                supervisor: SupervisorConfig::from(config),
                source_factory,
                vad_factory,
                gate: Arc::new(Mutex::new(gate)),
                results: sender,
                flags: Arc::new(ListenerFlags::default()),
            },
            receiver,
            continuous: None,
            push_to_talk: None,
        }
    }

    pub fn with_supervisor_config(mut self, supervisor: SupervisorConfig) -> Self {
        self.ctx.supervisor = supervisor;
        self
    }

    /// Begin a push-to-talk capture. No-op while one is already running.
    pub fn listen_once_start(&mut self) {
        if is_running(&self.push_to_talk) {
            return;
        }
        join_finished(&mut self.push_to_talk);
        self.ctx.flags.shutdown.store(false, Ordering::SeqCst);
        self.ctx.flags.ptt_active.store(true, Ordering::SeqCst);
        let ctx = self.ctx.clone();
        self.push_to_talk = Some(thread::spawn(move || run_push_to_talk(&ctx)));
        log_debug("push-to-talk capture started");
    }

    /// End the push-to-talk capture. The capture thread finalizes and
    /// transcribes what it recorded; the result arrives on the queue.
    pub fn listen_once_end(&mut self) {
        self.ctx.flags.ptt_active.store(false, Ordering::SeqCst);
    }

    /// Start supervised continuous listening. No-op while already running.
    pub fn listen_continuous(&mut self) {
        if is_running(&self.continuous) {
            return;
        }
        join_finished(&mut self.continuous);
        self.ctx.flags.shutdown.store(false, Ordering::SeqCst);
        self.ctx.flags.continuous_active.store(true, Ordering::SeqCst);
        let ctx = self.ctx.clone();
        self.continuous = Some(thread::spawn(move || supervise_continuous(&ctx)));
        log_debug("continuous listening started");
    }

    /// While paused, frames are still drained from the source but never buffered.
    pub fn pause_continuous_listening(&self, paused: bool) {
        self.ctx.flags.paused.store(paused, Ordering::SeqCst);
        tracing::debug!(paused, "continuous listening pause toggled");
    }

    pub fn is_paused(&self) -> bool {
        self.ctx.flags.paused.load(Ordering::SeqCst)
    }

    /// Stop both capture modes and wait for their threads to exit.
    pub fn stop(&mut self) {
        self.ctx.flags.continuous_active.store(false, Ordering::SeqCst);
        self.ctx.flags.ptt_active.store(false, Ordering::SeqCst);
        self.ctx.flags.shutdown.store(true, Ordering::SeqCst);
        for handle in [self.continuous.take(), self.push_to_talk.take()]
            .into_iter()
            .flatten()
        {
            if handle.join().is_err() {
                log_debug("capture thread panicked during shutdown");
            }
        }
    }

    pub fn is_listening(&self) -> bool {
        is_running(&self.continuous) || is_running(&self.push_to_talk)
    }

    /// Active capture mode, continuous taking precedence.
    pub fn mode(&self) -> Option<SegmenterMode> {
        if is_running(&self.continuous) {
            Some(SegmenterMode::Continuous)
        } else if is_running(&self.push_to_talk) {
            Some(SegmenterMode::PushToTalk)
        } else {
            None
        }
    }

    /// Shared result queue. Each result is delivered to exactly one receiver.
    pub fn results(&self) -> Receiver<TranscriptionResult> {
        self.receiver.clone()
    }

    pub fn try_next_result(&self) -> Option<TranscriptionResult> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for SpeechListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn is_running(handle: &Option<JoinHandle<()>>) -> bool {
    handle.as_ref().is_some_and(|h| !h.is_finished())
}

fn join_finished(handle: &mut Option<JoinHandle<()>>) {
    if let Some(h) = handle.take() {
        if h.join().is_err() {
            log_debug("previous capture thread panicked");
        }
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn supervise_continuous(ctx: &CaptureContext) {
    let mut backoff = ctx.supervisor.initial_backoff;
    while ctx.flags.continuous_active.load(Ordering::SeqCst) {
        let mut progressed = false;
        // A panicking detector, transcriber, or source restarts like any other failure.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_continuous(ctx, &mut progressed)))
            .unwrap_or_else(|payload| {
                Err(anyhow!("capture loop panicked: {}", panic_message(payload.as_ref())))
            });
        match outcome {
            Ok(exit) => {
                log_debug(&format!("continuous listening loop exited: {exit:?}"));
                break;
            }
            Err(err) => {
                if progressed {
                    backoff = ctx.supervisor.initial_backoff;
                }
                log_debug(&format!(
                    "continuous listening failed: {err:#}; restarting in {backoff:?}"
                ));
                tracing::warn!(
                    error = %err,
                    backoff_ms = backoff.as_millis() as u64,
                    "supervisor restart"
                );
                if !sleep_unless_stopped(ctx, backoff) {
                    break;
                }
                backoff = ctx.supervisor.next_backoff(backoff);
            }
        }
    }
    ctx.flags.continuous_active.store(false, Ordering::SeqCst);
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Returns false when a stop request cut the sleep short.
fn sleep_unless_stopped(ctx: &CaptureContext, total: Duration) -> bool {
    let mut remaining = total;
    while !remaining.is_zero() {
        if !ctx.flags.continuous_active.load(Ordering::SeqCst) {
            return false;
        }
        let step = remaining.min(STOP_POLL);
        thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
    ctx.flags.continuous_active.load(Ordering::SeqCst)
}

fn run_continuous(ctx: &CaptureContext, progressed: &mut bool) -> Result<LoopExit> {
    let mut source = (ctx.source_factory)()?;
    let mut vad = (ctx.vad_factory)();
    let mut segmenter = UtteranceSegmenter::new(ctx.segmenter.clone(), SegmenterMode::Continuous);
    log_debug(&format!(
        "continuous capture on '{}' with {}",
        source.name(),
        vad.name()
    ));

    loop {
        if !ctx.flags.continuous_active.load(Ordering::SeqCst) {
            if let Some(utterance) = segmenter.flush(StopReason::ListenerStopped) {
                deliver(ctx, utterance);
            }
            return Ok(LoopExit::Stopped);
        }
        let Some(frame) = source.read_frame()? else {
            if let Some(utterance) = segmenter.flush(StopReason::EndOfStream) {
                deliver(ctx, utterance);
            }
            return Ok(LoopExit::EndOfStream);
        };
        *progressed = true;
        if ctx.flags.paused.load(Ordering::SeqCst) {
            segmenter.note_dropped();
            continue;
        }
        if let Some(utterance) = segmenter.push_frame(frame, vad.as_mut(), unix_now()) {
            deliver(ctx, utterance);
        }
    }
}

fn run_push_to_talk(ctx: &CaptureContext) {
    let mut source = match (ctx.source_factory)() {
        Ok(source) => source,
        Err(err) => {
            log_debug(&format!("push-to-talk source failed to open: {err:#}"));
            ctx.flags.ptt_active.store(false, Ordering::SeqCst);
            return;
        }
    };
    let mut vad = (ctx.vad_factory)();
    let mut segmenter = UtteranceSegmenter::new(ctx.segmenter.clone(), SegmenterMode::PushToTalk);
    segmenter.start(unix_now());

    while ctx.flags.ptt_active.load(Ordering::SeqCst) {
        match source.read_frame() {
            Ok(Some(frame)) => {
                segmenter.push_frame(frame, vad.as_mut(), unix_now());
            }
            Ok(None) => break,
            Err(err) => {
                log_debug(&format!("push-to-talk capture error: {err}"));
                break;
            }
        }
    }
    ctx.flags.ptt_active.store(false, Ordering::SeqCst);
    if let Some(utterance) = segmenter.stop() {
        deliver(ctx, utterance);
    }
}

/// Gate the utterance and queue an accepted transcript. The queue is bounded:
/// a full queue blocks this thread until the assistant drains it or the
/// listener shuts down.
fn deliver(ctx: &CaptureContext, utterance: Utterance) {
    let decision = {
        let mut gate = lock_or_recover(&ctx.gate, "transcription gate");
        gate.evaluate(utterance)
    };
    let Some(mut result) = decision.into_result() else {
        return;
    };
    loop {
        match ctx.results.send_timeout(result, STOP_POLL) {
            Ok(()) => return,
            Err(SendTimeoutError::Timeout(pending)) => {
                if ctx.flags.shutdown.load(Ordering::SeqCst) {
                    log_debug("result queue full at shutdown; dropping transcript");
                    return;
                }
                result = pending;
            }
            Err(SendTimeoutError::Disconnected(_)) => return,
        }
    }
}

/// Build the configured detector.
pub fn create_vad_engine(cfg: &VoicePipelineConfig) -> Box<dyn VoiceActivityDetector> {
    match cfg.vad_engine {
        VadEngineKind::Energy => Box::new(crate::audio::EnergyVad::default()),
        VadEngineKind::Earshot => {
            #[cfg(feature = "vad_earshot")]
            {
                Box::new(crate::vad_earshot::EarshotVad::from_config(cfg))
            }
            #[cfg(not(feature = "vad_earshot"))]
            {
                log_debug("earshot VAD requested without 'vad_earshot' feature; using energy VAD");
                Box::new(crate::audio::EnergyVad::default())
            }
        }
    }
}

pub fn vad_factory(cfg: &VoicePipelineConfig) -> VadFactory {
    let cfg = cfg.clone();
    Arc::new(move || create_vad_engine(&cfg))
}

/// Microphone frames sized for the configured detector.
pub fn microphone_source_factory(
    device: Option<String>,
    cfg: &VoicePipelineConfig,
) -> SourceFactory {
    let frame_samples = create_vad_engine(cfg).frame_samples();
    let capacity = cfg.frame_channel_capacity;
    Arc::new(move || {
        let source = MicrophoneSource::open(device.as_deref(), frame_samples, capacity)?;
        Ok(Box::new(source) as Box<dyn FrameSource>)
    })
}
