//! System microphone capture via CPAL.
//!
//! Handles device enumeration, format conversion, and sample rate normalization.
//! Everything leaving this module is 16 kHz mono PCM16 in detector-sized frames.

use super::dispatch::FrameDispatcher;
use super::pcm::{f32_to_i16, Frame};
use super::resample::convert_frame_to_target;
use super::source::FrameSource;
use super::TARGET_RATE;
use crate::error::{Result as VoiceResult, VoiceError};
use crate::log_debug;
use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// A live device that delivers nothing for this long is treated as gone.
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// List microphone names so the CLI can expose a human-friendly selector.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host.input_devices().context("no input devices available")?;
    Ok(devices.filter_map(|device| device.name().ok()).collect())
}

pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .context("no output devices available")?;
    Ok(devices.filter_map(|device| device.name().ok()).collect())
}

pub(crate) fn find_input_device(preferred_device: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match preferred_device {
        Some(name) => {
            let mut devices = host.input_devices().context("no input devices available")?;
            devices
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| anyhow!("input device '{name}' not found"))
        }
        None => host
            .default_input_device()
            .ok_or_else(|| anyhow!("no default input device available. {}", mic_permission_hint())),
    }
}

/// Live microphone frame source.
///
/// The cpal stream is not `Send` on every platform, so the source must be
/// opened on the thread that reads from it.
pub struct MicrophoneSource {
    stream: cpal::Stream,
    receiver: Receiver<Vec<f32>>,
    device_name: String,
    device_rate: u32,
    frame_samples: usize,
    dropped: Arc<AtomicUsize>,
    stream_failed: Arc<AtomicBool>,
}

impl MicrophoneSource {
    /// Open `preferred_device` (or the system default) and start streaming.
    pub fn open(
        preferred_device: Option<&str>,
        frame_samples: usize,
        channel_capacity: usize,
    ) -> Result<Self> {
        let device = find_input_device(preferred_device)?;
        let device_name = device
            .name()
            .unwrap_or_else(|_| "unknown input device".to_string());
        let default_config = device
            .default_input_config()
            .with_context(|| format!("failed to query config for '{device_name}'"))?;
        let format = default_config.sample_format();
        let device_config: StreamConfig = default_config.into();
        let device_rate = device_config.sample_rate.0;
        let channels = usize::from(device_config.channels.max(1));
        let frame_samples = frame_samples.max(1);
        let device_block =
            ((frame_samples as u64 * u64::from(device_rate)) / u64::from(TARGET_RATE)).max(1) as usize;

        log_debug(&format!(
            "Microphone config: device={device_name} format={format:?} sample_rate={device_rate}Hz channels={channels} block={device_block}"
        ));

        let (sender, receiver) = bounded::<Vec<f32>>(channel_capacity.max(1));
        let dropped = Arc::new(AtomicUsize::new(0));
        let stream_failed = Arc::new(AtomicBool::new(false));
        let dispatcher = Arc::new(Mutex::new(FrameDispatcher::new(
            device_block,
            sender,
            dropped.clone(),
        )));

        let failed_flag = stream_failed.clone();
        let err_fn = move |err| {
            log_debug(&format!("audio_stream_error: {err}"));
            failed_flag.store(true, Ordering::Relaxed);
        };

        let stream = match format {
            SampleFormat::F32 => {
                let dispatcher = dispatcher.clone();
                let dropped = dropped.clone();
                device.build_input_stream(
                    &device_config,
                    move |data: &[f32], _| {
                        if let Ok(mut pump) = dispatcher.try_lock() {
                            pump.push(data, channels, |sample| sample);
                        } else {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    err_fn,
                    None,
                )?
            }
            SampleFormat::I16 => {
                let dispatcher = dispatcher.clone();
                let dropped = dropped.clone();
                device.build_input_stream(
                    &device_config,
                    move |data: &[i16], _| {
                        if let Ok(mut pump) = dispatcher.try_lock() {
                            pump.push(data, channels, |sample| sample as f32 / 32_768.0);
                        } else {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    err_fn,
                    None,
                )?
            }
            SampleFormat::U16 => {
                let dispatcher = dispatcher.clone();
                let dropped = dropped.clone();
                device.build_input_stream(
                    &device_config,
                    move |data: &[u16], _| {
                        if let Ok(mut pump) = dispatcher.try_lock() {
                            pump.push(data, channels, |sample| {
                                (sample as f32 - 32_768.0) / 32_768.0
                            });
                        } else {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    err_fn,
                    None,
                )?
            }
            other => return Err(anyhow!("unsupported sample format: {other:?}")),
        };

        stream
            .play()
            .with_context(|| format!("failed to start '{device_name}'. {}", mic_permission_hint()))?;

        Ok(Self {
            stream,
            receiver,
            device_name,
            device_rate,
            frame_samples,
            dropped,
            stream_failed,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl FrameSource for MicrophoneSource {
    fn read_frame(&mut self) -> VoiceResult<Option<Frame>> {
        let started = Instant::now();
        loop {
            if self.stream_failed.load(Ordering::Relaxed) {
                return Err(VoiceError::TransientCapture(format!(
                    "audio stream error on '{}'",
                    self.device_name
                )));
            }
            match self.receiver.recv_timeout(POLL_INTERVAL) {
                Ok(block) => {
                    let target = convert_frame_to_target(
                        block,
                        self.device_rate,
                        TARGET_RATE,
                        self.frame_samples,
                    );
                    let samples = target.into_iter().map(f32_to_i16).collect();
                    return Ok(Some(Frame::new(samples)));
                }
                Err(RecvTimeoutError::Timeout) => {
                    if started.elapsed() >= STALL_TIMEOUT {
                        return Err(VoiceError::TransientCapture(format!(
                            "no audio from '{}' for {:?}. {}",
                            self.device_name,
                            STALL_TIMEOUT,
                            mic_permission_hint()
                        )));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(VoiceError::TransientCapture(
                        "audio stream disconnected".to_string(),
                    ));
                }
            }
        }
    }

    fn frames_dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    fn name(&self) -> &str {
        &self.device_name
    }
}

impl Drop for MicrophoneSource {
    fn drop(&mut self) {
        if let Err(err) = self.stream.pause() {
            log_debug(&format!("failed to pause audio stream: {err}"));
        }
    }
}

pub(crate) fn mic_permission_hint() -> &'static str {
    #[cfg(target_os = "macos")]
    {
        "macOS: System Settings > Privacy & Security > Microphone (enable your terminal)."
    }
    #[cfg(target_os = "linux")]
    {
        "Linux: check PipeWire/PulseAudio permissions and ensure the device is not muted."
    }
    #[cfg(target_os = "windows")]
    {
        "Windows: Settings > Privacy & Security > Microphone (allow access for your terminal)."
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        "Check OS microphone permissions."
    }
}
