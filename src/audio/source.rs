//! Blocking frame sources consumed by the capture thread.

use super::pcm::Frame;
use crate::error::Result;
use std::time::Duration;

/// Something the capture thread can pull detector-sized frames from.
///
/// `read_frame` blocks until a frame is ready. `Ok(None)` means the source has
/// ended and will not produce more audio. Sources are built on the thread that
/// reads them, so implementations need not be `Send`.
pub trait FrameSource {
    fn read_frame(&mut self) -> Result<Option<Frame>>;

    /// Frames the source had to discard because the reader fell behind.
    fn frames_dropped(&self) -> usize {
        0
    }

    fn name(&self) -> &str {
        "frame_source"
    }
}

/// In-memory source that slices a sample buffer into frames. The final partial
/// frame is zero-padded so detectors always see full frames.
#[derive(Debug, Clone)]
pub struct PcmSource {
    samples: Vec<i16>,
    frame_samples: usize,
    position: usize,
    pacing: Option<Duration>,
}

impl PcmSource {
    pub fn new(samples: Vec<i16>, frame_samples: usize) -> Self {
        Self {
            samples,
            frame_samples: frame_samples.max(1),
            position: 0,
            pacing: None,
        }
    }

    /// Sleep before each frame to mimic a live device.
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = Some(pacing);
        self
    }

    pub fn remaining_samples(&self) -> usize {
        self.samples.len().saturating_sub(self.position)
    }
}

impl FrameSource for PcmSource {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.position >= self.samples.len() {
            return Ok(None);
        }
        if let Some(pacing) = self.pacing {
            std::thread::sleep(pacing);
        }
        let end = (self.position + self.frame_samples).min(self.samples.len());
        let mut frame = self.samples[self.position..end].to_vec();
        frame.resize(self.frame_samples, 0);
        self.position = end;
        Ok(Some(Frame::new(frame)))
    }

    fn name(&self) -> &str {
        "pcm_source"
    }
}
