//! Bridges a lazily produced synthesis event sequence into a blocking byte
//! source for the decoder.
//!
//! A producer thread drains the provider's events into a bounded channel. The
//! reader waits until enough bytes are buffered (the prebuffer threshold or the
//! requested size, whichever is larger), the producer finishes, or the stream
//! stalls. Before the first audio byte the stall limit is `initial_timeout`;
//! afterwards every gap between chunks is bounded by `chunk_timeout`.

use super::{SynthesisEvent, SynthesisEvents};
use crate::config::SpeechOutputConfig;
use crate::error::{ProviderError, Result, TimeoutPhase, VoiceError};
use crate::log_debug;
use crossbeam_channel::{bounded, select, Receiver, SendTimeoutError, Sender};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const SEND_POLL: Duration = Duration::from_millis(50);
/// Providers stream in blocks of about this size; the channel bound is
/// expressed in these units.
const NOMINAL_CHUNK_BYTES: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub initial_timeout: Duration,
    pub chunk_timeout: Duration,
    pub prebuffer_bytes: usize,
    pub buffer_cap_bytes: usize,
}

impl From<&SpeechOutputConfig> for StreamConfig {
    fn from(cfg: &SpeechOutputConfig) -> Self {
        Self {
            initial_timeout: Duration::from_millis(cfg.initial_timeout_ms),
            chunk_timeout: Duration::from_millis(cfg.chunk_timeout_ms),
            prebuffer_bytes: cfg.prebuffer_bytes,
            buffer_cap_bytes: cfg.buffer_cap_bytes,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::from(&SpeechOutputConfig::default())
    }
}

type Chunk = std::result::Result<Vec<u8>, ProviderError>;

enum Wake {
    /// `None` once the producer has hung up.
    Chunk(Option<Chunk>),
    Closed,
    TimedOut,
}

enum Phase {
    Streaming,
    /// No more input will be accepted; serve what is buffered, then report.
    Draining(Option<VoiceError>),
    Closed,
}

/// Closes a [`StreamDecodeAdapter`] from another thread.
#[derive(Clone)]
pub struct StreamCanceller {
    closed: Arc<AtomicBool>,
    producer_stop: Arc<AtomicBool>,
    wake: Sender<()>,
}

impl StreamCanceller {
    /// Stop the producer and make every pending and future read return EOF.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.producer_stop.store(true, Ordering::SeqCst);
        let _ = self.wake.try_send(());
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct StreamDecodeAdapter {
    config: StreamConfig,
    chunks: Receiver<Chunk>,
    wake: Receiver<()>,
    canceller: StreamCanceller,
    buffer: VecDeque<u8>,
    phase: Phase,
    first_audio_seen: bool,
    last_arrival: Instant,
    bytes_received: usize,
}

impl StreamDecodeAdapter {
    /// Start draining `events` on a background thread.
    pub fn spawn(events: SynthesisEvents, config: StreamConfig) -> Self {
        let capacity = (config.buffer_cap_bytes / NOMINAL_CHUNK_BYTES).max(1);
        let (chunk_tx, chunk_rx) = bounded::<Chunk>(capacity);
        let (wake_tx, wake_rx) = bounded::<()>(1);
        let producer_stop = Arc::new(AtomicBool::new(false));
        let canceller = StreamCanceller {
            closed: Arc::new(AtomicBool::new(false)),
            producer_stop: producer_stop.clone(),
            wake: wake_tx,
        };

        // Detached: a provider blocked on network I/O cannot be interrupted,
        // but once `producer_stop` is set nothing it yields is kept.
        let spawned = thread::Builder::new()
            .name("tts-producer".to_string())
            .spawn(move || produce(events, &chunk_tx, &producer_stop));
        let phase = match spawned {
            Ok(_) => Phase::Streaming,
            Err(err) => Phase::Draining(Some(VoiceError::Playback(format!(
                "failed to start synthesis producer: {err}"
            )))),
        };

        Self {
            config,
            chunks: chunk_rx,
            wake: wake_rx,
            canceller,
            buffer: VecDeque::new(),
            phase,
            first_audio_seen: false,
            last_arrival: Instant::now(),
            bytes_received: 0,
        }
    }

    pub fn canceller(&self) -> StreamCanceller {
        self.canceller.clone()
    }

    pub fn close(&mut self) {
        self.canceller.close();
        self.enter_closed();
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.phase, Phase::Closed) || self.canceller.is_closed()
    }

    pub fn bytes_received(&self) -> usize {
        self.bytes_received
    }

    /// Read up to `n` bytes. An empty result means end of stream.
    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        if self.canceller.is_closed() {
            self.enter_closed();
            return Ok(Vec::new());
        }
        if matches!(self.phase, Phase::Streaming) {
            self.fill(n.max(self.config.prebuffer_bytes));
        }
        self.take(n)
    }

    fn fill(&mut self, want: usize) {
        while self.buffer.len() < want {
            let limit = if self.first_audio_seen {
                self.config.chunk_timeout
            } else {
                self.config.initial_timeout
            };
            let remaining = (self.last_arrival + limit).saturating_duration_since(Instant::now());
            let woke = select! {
                recv(self.chunks) -> msg => Wake::Chunk(msg.ok()),
                recv(self.wake) -> _ => Wake::Closed,
                default(remaining) => Wake::TimedOut,
            };
            match woke {
                Wake::Chunk(Some(Ok(bytes))) => self.accept(bytes),
                Wake::Chunk(Some(Err(err))) => {
                    log_debug(&format!("synthesis provider failed: {err}"));
                    self.phase = Phase::Draining(Some(VoiceError::Provider(err)));
                    return;
                }
                Wake::Chunk(None) => {
                    self.phase = Phase::Draining(None);
                    return;
                }
                Wake::Closed => {
                    self.enter_closed();
                    return;
                }
                Wake::TimedOut => {
                    self.stall(limit);
                    return;
                }
            }
        }
    }

    fn accept(&mut self, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        self.first_audio_seen = true;
        self.last_arrival = Instant::now();
        self.bytes_received += bytes.len();
        self.buffer.extend(bytes);
    }

    fn stall(&mut self, waited: Duration) {
        let phase = if self.first_audio_seen {
            TimeoutPhase::Gap
        } else {
            TimeoutPhase::Initial
        };
        log_debug(&format!(
            "tts stream timeout ({phase}) after {waited:?}; {} bytes buffered",
            self.buffer.len()
        ));
        tracing::warn!(%phase, waited_ms = waited.as_millis() as u64, "tts stream timeout");
        self.canceller.producer_stop.store(true, Ordering::SeqCst);
        self.phase = Phase::Draining(Some(VoiceError::StreamTimeout { phase, waited }));
    }

    fn take(&mut self, n: usize) -> Result<Vec<u8>> {
        if matches!(self.phase, Phase::Closed) {
            return Ok(Vec::new());
        }
        if !self.buffer.is_empty() {
            let count = n.min(self.buffer.len());
            return Ok(self.buffer.drain(..count).collect());
        }
        match std::mem::replace(&mut self.phase, Phase::Closed) {
            Phase::Draining(Some(err)) => Err(err),
            _ => Ok(Vec::new()),
        }
    }

    fn enter_closed(&mut self) {
        self.buffer.clear();
        self.phase = Phase::Closed;
    }
}

impl io::Read for StreamDecodeAdapter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let bytes = self.read_bytes(buf.len()).map_err(VoiceError::into_io)?;
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }
}

impl Drop for StreamDecodeAdapter {
    fn drop(&mut self) {
        self.canceller.producer_stop.store(true, Ordering::SeqCst);
    }
}

fn produce(events: SynthesisEvents, tx: &Sender<Chunk>, stop: &AtomicBool) {
    for event in events {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        match event {
            Ok(SynthesisEvent::Audio(bytes)) => {
                if bytes.is_empty() {
                    continue;
                }
                if !forward(tx, stop, Ok(bytes)) {
                    return;
                }
            }
            Ok(SynthesisEvent::Other(_)) => {}
            Err(err) => {
                forward(tx, stop, Err(err));
                return;
            }
        }
    }
}

/// Blocking send that gives up once the reader has gone or asked to stop.
fn forward(tx: &Sender<Chunk>, stop: &AtomicBool, mut chunk: Chunk) -> bool {
    loop {
        match tx.send_timeout(chunk, SEND_POLL) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(pending)) => {
                if stop.load(Ordering::SeqCst) {
                    return false;
                }
                chunk = pending;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}
