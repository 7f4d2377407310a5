//! Speech-to-text capabilities.
//!
//! Backends come in two shapes: direct transcription endpoints that take audio
//! and return text, and multimodal chat models that receive the audio together
//! with a transcription instruction. Both accept a 16 kHz mono WAV payload.

use crate::error::ProviderError;

/// Instruction sent to multimodal backends alongside the audio.
pub const MULTIMODAL_INSTRUCTION: &str = "You are a high quality transcription model. You are given audio input from the user, and return the transcribed text from the input. Do NOT add any additional text in your response, only respond with the text given by the user.\nThe audio may be related to space sci-fi terminology like systems, equipment, and station names, specifically the game Elite Dangerous.\nAlways provide an exact transcription of the audio. If the user is not speaking or inaudible, return only the word 'silence'.";

/// Reply a multimodal backend gives when it heard nothing.
const MULTIMODAL_SILENCE: &str = "silence";

/// Direct transcription backend: audio in, text out.
pub trait SpeechToText: Send {
    fn transcribe(
        &mut self,
        wav: &[u8],
        language: Option<&str>,
        prompt: Option<&str>,
    ) -> Result<String, ProviderError>;

    fn name(&self) -> &str {
        "speech_to_text"
    }
}

/// Chat-style backend that accepts embedded audio.
pub trait AudioChat: Send {
    fn complete(
        &mut self,
        instruction: &str,
        wav: &[u8],
        language: Option<&str>,
    ) -> Result<String, ProviderError>;

    fn name(&self) -> &str {
        "audio_chat"
    }
}

/// The configured transcription backend, chosen once at startup.
pub enum TranscriptionProvider {
    Direct(Box<dyn SpeechToText>),
    Multimodal(Box<dyn AudioChat>),
}

impl TranscriptionProvider {
    pub fn transcribe(
        &mut self,
        wav: &[u8],
        language: Option<&str>,
        prompt: Option<&str>,
    ) -> Result<String, ProviderError> {
        match self {
            TranscriptionProvider::Direct(stt) => stt.transcribe(wav, language, prompt),
            TranscriptionProvider::Multimodal(chat) => {
                let reply = chat.complete(MULTIMODAL_INSTRUCTION, wav, language)?;
                let reply = reply.trim();
                if reply == MULTIMODAL_SILENCE {
                    Ok(String::new())
                } else {
                    Ok(reply.to_string())
                }
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TranscriptionProvider::Direct(stt) => stt.name(),
            TranscriptionProvider::Multimodal(chat) => chat.name(),
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            TranscriptionProvider::Direct(_) => "direct",
            TranscriptionProvider::Multimodal(_) => "multimodal",
        }
    }
}

/// Decode a 16-bit mono WAV payload into normalized float samples.
#[cfg_attr(not(feature = "local-whisper"), allow(dead_code))]
pub(crate) fn wav_to_f32(wav: &[u8]) -> Result<Vec<f32>, hound::Error> {
    let reader = hound::WavReader::new(std::io::Cursor::new(wav))?;
    reader
        .into_samples::<i16>()
        .map(|sample| sample.map(crate::audio::i16_to_f32))
        .collect()
}

/// Whisper speech-to-text integration.
///
/// Wraps `whisper_rs`. The model is loaded once and reused across utterances to
/// avoid repeated initialization overhead.
#[cfg(all(unix, feature = "local-whisper"))]
mod platform {
    use super::{wav_to_f32, SpeechToText};
    use crate::error::ProviderError;
    use crate::log_debug;
    use anyhow::{anyhow, Context, Result};
    use std::io;
    use std::os::raw::{c_char, c_uint, c_void};
    use std::os::unix::io::AsRawFd;
    use std::path::Path;
    use std::sync::Once;
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    const PROVIDER: &str = "local_whisper";

    /// Local GGML whisper model used as a direct transcriber.
    pub struct LocalWhisper {
        ctx: WhisperContext,
    }

    impl LocalWhisper {
        /// Loads the model from disk.
        ///
        /// Temporarily redirects stderr to `/dev/null` during loading because
        /// whisper.cpp emits verbose initialization messages.
        ///
        /// # Errors
        ///
        /// Returns an error if the model file cannot be loaded or stderr
        /// redirection fails.
        pub fn load(model_path: &Path) -> Result<Self> {
            install_whisper_log_silencer();
            let model_path = model_path
                .to_str()
                .ok_or_else(|| anyhow!("whisper model path is not valid UTF-8"))?;

            let null = std::fs::OpenOptions::new()
                .write(true)
                .open("/dev/null")
                .context("failed to open /dev/null")?;
            let null_fd = null.as_raw_fd();

            // SAFETY: dup(2) duplicates the stderr descriptor, which is restored
            // below before returning.
            let orig_stderr = unsafe { libc::dup(2) };
            if orig_stderr < 0 {
                return Err(anyhow!(
                    "failed to dup stderr: {}",
                    io::Error::last_os_error()
                ));
            }

            let dup_result = unsafe { libc::dup2(null_fd, 2) };
            if dup_result < 0 {
                unsafe {
                    libc::close(orig_stderr);
                }
                return Err(anyhow!(
                    "failed to redirect stderr: {}",
                    io::Error::last_os_error()
                ));
            }

            let ctx_result =
                WhisperContext::new_with_params(model_path, WhisperContextParameters::default());

            let restore_result = unsafe { libc::dup2(orig_stderr, 2) };
            unsafe {
                libc::close(orig_stderr);
            }
            if restore_result < 0 {
                return Err(anyhow!(
                    "failed to restore stderr: {}",
                    io::Error::last_os_error()
                ));
            }

            let ctx = ctx_result.context("failed to load whisper model")?;
            Ok(Self { ctx })
        }

        fn run(&self, samples: &[f32], language: Option<&str>, prompt: Option<&str>) -> Result<String> {
            let mut state = self
                .ctx
                .create_state()
                .context("failed to create whisper state")?;
            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            match language {
                Some(lang) => {
                    params.set_language(Some(lang));
                    params.set_detect_language(false);
                }
                None => {
                    params.set_language(None);
                    params.set_detect_language(true);
                }
            }
            if let Some(prompt) = prompt {
                params.set_initial_prompt(prompt);
            }
            // Leave cores for capture and playback.
            params.set_n_threads(num_cpus::get().min(8) as i32);
            params.set_print_progress(false);
            params.set_print_timestamps(false);
            params.set_print_special(false);
            params.set_print_realtime(false);
            params.set_translate(false);
            params.set_token_timestamps(false);
            state.full(params, samples)?;

            let mut transcript = String::new();
            let num_segments = match state.full_n_segments() {
                Ok(count) => count,
                Err(err) => {
                    log_debug(&format!("Whisper failed to read segment count: {err}"));
                    return Ok(transcript);
                }
            };
            for i in 0..num_segments.max(0) {
                match state.full_get_segment_text_lossy(i) {
                    Ok(text) => transcript.push_str(&text),
                    Err(err) => log_debug(&format!("Failed to read whisper segment {i}: {err}")),
                }
            }
            Ok(transcript)
        }
    }

    impl SpeechToText for LocalWhisper {
        fn transcribe(
            &mut self,
            wav: &[u8],
            language: Option<&str>,
            prompt: Option<&str>,
        ) -> Result<String, ProviderError> {
            let samples = wav_to_f32(wav)
                .map_err(|err| ProviderError::new(PROVIDER, format!("bad wav payload: {err}")))?;
            self.run(&samples, language, prompt)
                .map_err(|err| ProviderError::new(PROVIDER, format!("{err:#}")))
        }

        fn name(&self) -> &str {
            PROVIDER
        }
    }

    fn install_whisper_log_silencer() {
        static INSTALL_LOG_CALLBACK: Once = Once::new();
        INSTALL_LOG_CALLBACK.call_once(|| unsafe {
            whisper_rs::set_log_callback(Some(whisper_log_callback), std::ptr::null_mut());
        });
    }

    unsafe extern "C" fn whisper_log_callback(
        _level: c_uint,
        _text: *const c_char,
        _user_data: *mut c_void,
    ) {
        // Keep whisper.cpp chatter out of the JSON transcript stream.
    }
}

#[cfg(all(unix, feature = "local-whisper"))]
pub use platform::LocalWhisper;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Utterance;

    struct FixedChat(&'static str);

    impl AudioChat for FixedChat {
        fn complete(
            &mut self,
            instruction: &str,
            _wav: &[u8],
            _language: Option<&str>,
        ) -> Result<String, ProviderError> {
            assert!(instruction.contains("'silence'"));
            Ok(self.0.to_string())
        }
    }

    struct EchoPrompt;

    impl SpeechToText for EchoPrompt {
        fn transcribe(
            &mut self,
            _wav: &[u8],
            language: Option<&str>,
            prompt: Option<&str>,
        ) -> Result<String, ProviderError> {
            Ok(format!("{}|{}", language.unwrap_or("auto"), prompt.unwrap_or("")))
        }
    }

    #[test]
    fn multimodal_silence_reply_is_empty() {
        let mut provider = TranscriptionProvider::Multimodal(Box::new(FixedChat(" silence\n")));
        assert_eq!(provider.transcribe(b"", None, None).expect("ok"), "");
        assert_eq!(provider.kind_label(), "multimodal");
    }

    #[test]
    fn multimodal_reply_is_trimmed() {
        let mut provider =
            TranscriptionProvider::Multimodal(Box::new(FixedChat("  request docking  ")));
        assert_eq!(provider.transcribe(b"", None, None).expect("ok"), "request docking");
    }

    #[test]
    fn direct_provider_forwards_language_and_prompt() {
        let mut provider = TranscriptionProvider::Direct(Box::new(EchoPrompt));
        let text = provider
            .transcribe(b"", Some("en"), Some("COVAS"))
            .expect("ok");
        assert_eq!(text, "en|COVAS");
        assert_eq!(provider.name(), "speech_to_text");
    }

    #[test]
    fn wav_payload_decodes_to_floats() {
        let wav = Utterance::new(vec![0, 16_384, -32_768], 16_000, 0.0)
            .to_wav()
            .expect("wav");
        let samples = wav_to_f32(&wav).expect("decode");
        assert_eq!(samples, vec![0.0, 0.5, -1.0]);
    }

    #[cfg(all(unix, feature = "local-whisper"))]
    #[test]
    fn local_whisper_rejects_missing_model() {
        let result = LocalWhisper::load(std::path::Path::new("/no/such/model.bin"));
        assert!(result.is_err());
    }
}
