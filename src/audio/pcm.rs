//! Mono PCM16 frames and sample conversions.

use super::TARGET_RATE;

/// One block of 16 kHz mono PCM16 samples sized for the active detector.
///
/// Frames are immutable once captured; the segmenter only moves them around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    samples: Vec<i16>,
}

impl Frame {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / f64::from(TARGET_RATE)
    }

    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }
}

impl From<Vec<i16>> for Frame {
    fn from(samples: Vec<i16>) -> Self {
        Self::new(samples)
    }
}

#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32_768.0
}

/// Inverse of [`i16_to_f32`]: every `i16` survives the round trip unchanged.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32_768.0).round().clamp(-32_768.0, 32_767.0) as i16
}

/// Little-endian PCM16 bytes to samples; a trailing odd byte is ignored.
pub fn pcm_bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

pub fn samples_to_pcm_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odd_trailing_byte_is_dropped() {
        let samples = pcm_bytes_to_samples(&[0x01, 0x00, 0xff, 0x7f, 0x42]);
        assert_eq!(samples, vec![1, i16::MAX]);
    }

    #[test]
    fn bytes_are_little_endian() {
        assert_eq!(samples_to_pcm_bytes(&[0x1234, -1]), vec![0x34, 0x12, 0xff, 0xff]);
    }

    #[test]
    fn float_conversion_clamps() {
        assert_eq!(f32_to_i16(2.0), 32_767);
        assert_eq!(f32_to_i16(1.0), 32_767);
        assert_eq!(f32_to_i16(-2.0), -32_768);
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(i16_to_f32(i16::MIN), -1.0);
    }

    #[test]
    fn every_sample_survives_float_round_trip() {
        for sample in i16::MIN..=i16::MAX {
            assert_eq!(f32_to_i16(i16_to_f32(sample)), sample);
        }
    }

    #[test]
    fn frame_duration_uses_target_rate() {
        let frame = Frame::new(vec![0; 8_000]);
        assert!((frame.duration_secs() - 0.5).abs() < f64::EPSILON);
    }
}
