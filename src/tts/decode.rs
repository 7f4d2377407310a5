//! Turns the synthesis byte stream into PCM16 chunks at the playback rate.

use super::AudioEncoding;
use crate::audio::resample::resample;
use crate::audio::{f32_to_i16, i16_to_f32, pcm_bytes_to_samples, samples_to_pcm_bytes};
use crate::error::{Result, VoiceError};
use crate::log_debug;
use std::io::{self, Read};

/// Raw PCM is pulled from the stream in blocks of this many bytes.
pub const PCM_READ_BYTES: usize = 1024;

enum Format<R: Read> {
    Pcm16 {
        reader: R,
        sample_rate: u32,
        carry: Option<u8>,
    },
    Mp3(minimp3::Decoder<R>),
}

pub struct SpeechDecoder<R: Read> {
    format: Format<R>,
    playback_rate: u32,
    finished: bool,
}

impl<R: Read> SpeechDecoder<R> {
    pub fn new(reader: R, encoding: AudioEncoding, playback_rate: u32) -> Self {
        let format = match encoding {
            AudioEncoding::Pcm16 { sample_rate } => Format::Pcm16 {
                reader,
                sample_rate,
                carry: None,
            },
            AudioEncoding::Mp3 => Format::Mp3(minimp3::Decoder::new(reader)),
        };
        Self {
            format,
            playback_rate,
            finished: false,
        }
    }

    /// Next mono PCM16 chunk at the playback rate, `None` at end of stream.
    pub fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if self.finished {
            return Ok(None);
        }
        let chunk = match &mut self.format {
            Format::Pcm16 {
                reader,
                sample_rate,
                carry,
            } => {
                let rate = *sample_rate;
                next_pcm_block(reader, carry)?.map(|block| (block, rate))
            }
            Format::Mp3(decoder) => next_mp3_frame(decoder)?,
        };
        let Some((pcm, rate)) = chunk else {
            self.finished = true;
            return Ok(None);
        };
        Ok(Some(self.to_playback_rate(pcm, rate)))
    }

    fn to_playback_rate(&self, pcm: Vec<u8>, rate: u32) -> Vec<u8> {
        if rate == self.playback_rate || rate == 0 {
            return pcm;
        }
        let floats: Vec<f32> = pcm_bytes_to_samples(&pcm)
            .into_iter()
            .map(i16_to_f32)
            .collect();
        let converted: Vec<i16> = resample(&floats, rate, self.playback_rate)
            .into_iter()
            .map(f32_to_i16)
            .collect();
        samples_to_pcm_bytes(&converted)
    }
}

/// One block of whole samples. A byte split across reads is carried over.
fn next_pcm_block<R: Read>(reader: &mut R, carry: &mut Option<u8>) -> Result<Option<Vec<u8>>> {
    let mut block = vec![0u8; PCM_READ_BYTES];
    let mut filled = 0;
    if let Some(byte) = carry.take() {
        block[0] = byte;
        filled = 1;
    }
    let read = loop {
        match reader.read(&mut block[filled..]) {
            Ok(read) => break read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(VoiceError::from_io(err)),
        }
    };
    filled += read;
    if read == 0 {
        if filled == 1 {
            log_debug("dropping trailing odd byte at end of pcm stream");
        }
        return Ok(None);
    }
    if filled % 2 == 1 {
        filled -= 1;
        *carry = Some(block[filled]);
    }
    block.truncate(filled);
    Ok(Some(block))
}

fn next_mp3_frame<R: Read>(decoder: &mut minimp3::Decoder<R>) -> Result<Option<(Vec<u8>, u32)>> {
    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if frame.data.is_empty() {
                    continue;
                }
                let mono = downmix(&frame.data, frame.channels);
                let rate = u32::try_from(frame.sample_rate).unwrap_or(0);
                return Ok(Some((samples_to_pcm_bytes(&mono), rate)));
            }
            Err(minimp3::Error::SkippedData) => continue,
            Err(minimp3::Error::Eof) | Err(minimp3::Error::InsufficientData) => return Ok(None),
            Err(minimp3::Error::Io(err)) => return Err(VoiceError::from_io(err)),
        }
    }
}

fn downmix(interleaved: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Hands out at most `step` bytes per read.
    struct Trickle {
        data: Cursor<Vec<u8>>,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let len = buf.len().min(self.step);
            self.data.read(&mut buf[..len])
        }
    }

    #[test]
    fn pcm_is_read_in_fixed_blocks() {
        let bytes: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        let mut decoder = SpeechDecoder::new(
            Cursor::new(bytes.clone()),
            AudioEncoding::Pcm16 { sample_rate: 24_000 },
            24_000,
        );
        let mut chunks = Vec::new();
        while let Some(chunk) = decoder.next_chunk().expect("decode") {
            chunks.push(chunk);
        }
        assert_eq!(chunks[0].len(), PCM_READ_BYTES);
        assert_eq!(chunks.concat(), bytes);
        assert!(decoder.next_chunk().expect("after end").is_none());
    }

    #[test]
    fn odd_reads_keep_sample_alignment() {
        let samples: Vec<i16> = (0..200).map(|i| i * 100 - 10_000).collect();
        let bytes = samples_to_pcm_bytes(&samples);
        let reader = Trickle {
            data: Cursor::new(bytes),
            step: 7,
        };
        let mut decoder =
            SpeechDecoder::new(reader, AudioEncoding::Pcm16 { sample_rate: 24_000 }, 24_000);
        let mut out = Vec::new();
        while let Some(chunk) = decoder.next_chunk().expect("decode") {
            assert_eq!(chunk.len() % 2, 0);
            out.extend(pcm_bytes_to_samples(&chunk));
        }
        assert_eq!(out, samples);
    }

    #[test]
    fn pcm_at_other_rate_is_resampled() {
        let bytes = samples_to_pcm_bytes(&vec![1_000i16; 512]);
        let mut decoder = SpeechDecoder::new(
            Cursor::new(bytes),
            AudioEncoding::Pcm16 { sample_rate: 48_000 },
            24_000,
        );
        let chunk = decoder.next_chunk().expect("decode").expect("chunk");
        let samples = pcm_bytes_to_samples(&chunk).len();
        assert!((250..=262).contains(&samples), "got {samples} samples");
    }

    #[test]
    fn garbage_mp3_ends_without_audio() {
        let mut decoder = SpeechDecoder::new(Cursor::new(vec![0u8; 64]), AudioEncoding::Mp3, 24_000);
        assert!(decoder.next_chunk().expect("decode").is_none());
    }

    #[test]
    fn stereo_is_averaged() {
        assert_eq!(downmix(&[100, 300, -50, 50], 2), vec![200, 0]);
        assert_eq!(downmix(&[7, 8], 1), vec![7, 8]);
    }
}
