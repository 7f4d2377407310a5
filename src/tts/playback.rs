//! Output side of speech playback.

use crate::audio::resample::resample;
use crate::audio::{i16_to_f32, pcm_bytes_to_samples};
use crate::error::{Result, VoiceError};
use crate::log_debug;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const QUEUE_BLOCKS: usize = 32;
const POLL: Duration = Duration::from_millis(10);
/// Give up waiting for the device to drain after this long.
const DRAIN_LIMIT: Duration = Duration::from_secs(30);

/// Receives processed mono PCM16 at the playback rate.
pub trait PlaybackSink: Send {
    /// Queue a chunk, blocking while the device queue is full.
    fn write(&mut self, pcm: &[u8]) -> Result<()>;

    /// Block until everything queued has been played.
    fn finish(&mut self) -> Result<()>;

    /// Drop queued audio that has not been played yet.
    fn clear(&mut self);

    /// Times the device ran dry mid-session since the sink was opened.
    fn underruns(&self) -> u64;
}

/// Shared between the writer and the device callback.
struct OutputShared {
    queued_samples: AtomicUsize,
    underruns: AtomicU64,
    /// Set while a session is writing; a dry callback then counts as an underrun.
    active: AtomicBool,
    flush: AtomicBool,
    failed: AtomicBool,
    stop: AtomicBool,
}

/// System speaker output via CPAL.
///
/// The cpal stream lives on its own thread so the sink can move between
/// threads; chunks reach the device callback through a bounded channel.
pub struct CpalSink {
    sender: Sender<Vec<f32>>,
    shared: Arc<OutputShared>,
    device_name: String,
    device_rate: u32,
    playback_rate: u32,
    worker: Option<JoinHandle<()>>,
}

impl CpalSink {
    /// Open `preferred_device` (or the system default output).
    pub fn open(preferred_device: Option<&str>, playback_rate: u32) -> anyhow::Result<Self> {
        let (sender, receiver) = bounded::<Vec<f32>>(QUEUE_BLOCKS);
        let shared = Arc::new(OutputShared {
            queued_samples: AtomicUsize::new(0),
            underruns: AtomicU64::new(0),
            active: AtomicBool::new(false),
            flush: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            stop: AtomicBool::new(false),
        });
        let (ready_tx, ready_rx) = bounded::<anyhow::Result<(String, u32)>>(1);
        let device = preferred_device.map(str::to_string);
        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("tts-output".to_string())
            .spawn(move || {
                match start_output_stream(device.as_deref(), receiver, worker_shared.clone()) {
                    Ok((stream, name, rate)) => {
                        let _ = ready_tx.send(Ok((name, rate)));
                        while !worker_shared.stop.load(Ordering::SeqCst) {
                            thread::sleep(POLL * 5);
                        }
                        if let Err(err) = stream.pause() {
                            log_debug(&format!("failed to pause output stream: {err}"));
                        }
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                    }
                }
            })?;
        let (device_name, device_rate) = ready_rx
            .recv()
            .map_err(|_| anyhow::anyhow!("output thread exited before opening a device"))??;
        log_debug(&format!(
            "Speaker config: device={device_name} sample_rate={device_rate}Hz playback_rate={playback_rate}Hz"
        ));
        Ok(Self {
            sender,
            shared,
            device_name,
            device_rate,
            playback_rate,
            worker: Some(worker),
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl PlaybackSink for CpalSink {
    fn write(&mut self, pcm: &[u8]) -> Result<()> {
        if self.shared.failed.load(Ordering::Relaxed) {
            return Err(VoiceError::Playback(format!(
                "output stream error on '{}'",
                self.device_name
            )));
        }
        let floats: Vec<f32> = pcm_bytes_to_samples(pcm).into_iter().map(i16_to_f32).collect();
        let mut block = resample(&floats, self.playback_rate, self.device_rate);
        if block.is_empty() {
            return Ok(());
        }
        self.shared.flush.store(false, Ordering::SeqCst);
        self.shared.active.store(true, Ordering::SeqCst);
        let len = block.len();
        loop {
            match self.sender.send_timeout(block, Duration::from_millis(500)) {
                Ok(()) => break,
                Err(SendTimeoutError::Timeout(pending)) => {
                    if self.shared.failed.load(Ordering::Relaxed) {
                        return Err(VoiceError::Playback("output device stalled".to_string()));
                    }
                    block = pending;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    return Err(VoiceError::Playback("output stream closed".to_string()));
                }
            }
        }
        self.shared.queued_samples.fetch_add(len, Ordering::SeqCst);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let started = Instant::now();
        while self.shared.queued_samples.load(Ordering::SeqCst) > 0 {
            if self.shared.failed.load(Ordering::Relaxed) {
                self.shared.active.store(false, Ordering::SeqCst);
                return Err(VoiceError::Playback("output stream failed while draining".to_string()));
            }
            if started.elapsed() > DRAIN_LIMIT {
                log_debug("speaker drain timed out; dropping remaining audio");
                self.clear();
                break;
            }
            thread::sleep(POLL);
        }
        self.shared.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&mut self) {
        self.shared.active.store(false, Ordering::SeqCst);
        self.shared.flush.store(true, Ordering::SeqCst);
    }

    fn underruns(&self) -> u64 {
        self.shared.underruns.load(Ordering::Relaxed)
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn find_output_device(preferred_device: Option<&str>) -> anyhow::Result<cpal::Device> {
    let host = cpal::default_host();
    match preferred_device {
        Some(name) => {
            let mut devices = host.output_devices()?;
            devices
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| anyhow::anyhow!("output device '{name}' not found"))
        }
        None => host
            .default_output_device()
            .ok_or_else(|| anyhow::anyhow!("no default output device available")),
    }
}

/// Pulls mono samples from the channel and fans them out to every device
/// channel, writing silence when nothing is queued.
struct OutputPump {
    receiver: Receiver<Vec<f32>>,
    shared: Arc<OutputShared>,
    current: Vec<f32>,
    pos: usize,
    channels: usize,
}

impl OutputPump {
    fn next_sample(&mut self) -> Option<f32> {
        if self.shared.flush.load(Ordering::Relaxed) {
            let mut dropped = self.current.len() - self.pos;
            self.current.clear();
            self.pos = 0;
            while let Ok(block) = self.receiver.try_recv() {
                dropped += block.len();
            }
            self.shared.queued_samples.fetch_sub(
                dropped.min(self.shared.queued_samples.load(Ordering::Relaxed)),
                Ordering::SeqCst,
            );
            self.shared.flush.store(false, Ordering::Relaxed);
        }
        while self.pos >= self.current.len() {
            self.current = self.receiver.try_recv().ok()?;
            self.pos = 0;
        }
        let sample = self.current[self.pos];
        self.pos += 1;
        Some(sample)
    }

    fn fill<T>(&mut self, data: &mut [T], convert: impl Fn(f32) -> T, silence: T)
    where
        T: Copy,
    {
        let mut played = 0usize;
        let mut ran_dry = false;
        for frame in data.chunks_mut(self.channels) {
            let value = match self.next_sample() {
                Some(sample) => {
                    played += 1;
                    convert(sample)
                }
                None => {
                    ran_dry = true;
                    silence
                }
            };
            frame.iter_mut().for_each(|slot| *slot = value);
        }
        if played > 0 {
            let queued = self.shared.queued_samples.load(Ordering::Relaxed);
            self.shared
                .queued_samples
                .fetch_sub(played.min(queued), Ordering::SeqCst);
        }
        if ran_dry && self.shared.active.load(Ordering::Relaxed) {
            self.shared.underruns.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn start_output_stream(
    preferred_device: Option<&str>,
    receiver: Receiver<Vec<f32>>,
    shared: Arc<OutputShared>,
) -> anyhow::Result<(cpal::Stream, String, u32)> {
    let device = find_output_device(preferred_device)?;
    let device_name = device
        .name()
        .unwrap_or_else(|_| "unknown output device".to_string());
    let default_config = device.default_output_config()?;
    let format = default_config.sample_format();
    let config: StreamConfig = default_config.into();
    let device_rate = config.sample_rate.0;
    let mut pump = OutputPump {
        receiver,
        shared: shared.clone(),
        current: Vec::new(),
        pos: 0,
        channels: usize::from(config.channels.max(1)),
    };
    let failed = shared.clone();
    let err_fn = move |err| {
        log_debug(&format!("output_stream_error: {err}"));
        failed.failed.store(true, Ordering::Relaxed);
    };
    let stream = match format {
        SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _| pump.fill(data, |s| s, 0.0),
            err_fn,
            None,
        )?,
        SampleFormat::I16 => device.build_output_stream(
            &config,
            move |data: &mut [i16], _| pump.fill(data, |s| (s.clamp(-1.0, 1.0) * 32_767.0) as i16, 0),
            err_fn,
            None,
        )?,
        SampleFormat::U16 => device.build_output_stream(
            &config,
            move |data: &mut [u16], _| {
                pump.fill(data, |s| ((s.clamp(-1.0, 1.0) + 1.0) * 32_767.5) as u16, 32_768)
            },
            err_fn,
            None,
        )?,
        other => return Err(anyhow::anyhow!("unsupported output sample format: {other:?}")),
    };
    stream.play()?;
    Ok((stream, device_name, device_rate))
}
