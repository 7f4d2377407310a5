//! COVAS voice engine entrypoint.
//!
//! Lists audio devices, runs the listening pipeline with transcripts printed as
//! JSON lines, or plays text through the speech output path.
//!
//! # Threads
//!
//! - Capture threads: owned by `SpeechListener` (supervised continuous loop or
//!   one push-to-talk capture)
//! - Stdin reader: forwards input lines so Enter toggles push-to-talk and `q` quits
//! - Main thread: prints results and reacts to input

mod cli_utils;

use anyhow::{bail, Context, Result};
use cli_utils::{list_devices, DeviceKind};
use covas_voice::config::{AppConfig, ListenMode};
use covas_voice::effects::EffectsChain;
use covas_voice::state::{StateProvider, StateSnapshot, StaticState};
use covas_voice::stt::TranscriptionProvider;
use covas_voice::tts::CpalSink;
use covas_voice::voice::{microphone_source_factory, vad_factory};
use covas_voice::{
    init_logging, log_debug, log_debug_content, log_file_path, SpeechListener, SpeechPlayer,
    SynthesisProvider, TranscriptionResult,
};
use crossbeam_channel::{bounded, select, Receiver};
use serde_json::json;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const IDLE_POLL: Duration = Duration::from_millis(250);
const SPEAK_VOICE: &str = "default";

fn main() -> Result<()> {
    let config = AppConfig::parse_args()?;
    init_logging(&config);
    log_debug(&format!("covas-voice {} starting", env!("CARGO_PKG_VERSION")));

    if config.list_input_devices {
        return list_devices(DeviceKind::Input);
    }
    if config.list_output_devices {
        return list_devices(DeviceKind::Output);
    }
    if let Some(text) = config.speak.as_deref() {
        return speak(&config, text);
    }
    let Some(mode) = config.listen else {
        eprintln!("Nothing to do. Pass --listen, --speak, or a --list-* flag (see --help).");
        return Ok(());
    };

    let result = listen(&config, mode);
    if let Err(err) = &result {
        log_debug(&format!("listen failed: {err:#}"));
        if !config.no_logs && config.logs {
            eprintln!("Debug log: {}", log_file_path().display());
        }
    }
    result
}

fn listen(config: &AppConfig, mode: ListenMode) -> Result<()> {
    let provider = build_transcriber(config)?;
    let pipeline = config.voice_pipeline_config();
    let mut listener = SpeechListener::new(
        &pipeline,
        microphone_source_factory(config.input_device.clone(), &pipeline),
        vad_factory(&pipeline),
        provider,
    );
    let results = listener.results();
    let input = spawn_stdin_reader()?;

    match mode {
        ListenMode::Continuous => {
            listener.listen_continuous();
            eprintln!("Listening. Type q and Enter (or Ctrl-D) to stop.");
        }
        ListenMode::PushToTalk => {
            eprintln!("Press Enter to start recording and Enter again to transcribe. Type q to quit.");
        }
    }

    let mut recording = false;
    loop {
        select! {
            recv(results) -> result => match result {
                Ok(result) => print_transcript(&result)?,
                Err(_) => break,
            },
            recv(input) -> line => match line {
                Ok(line) if line.trim().eq_ignore_ascii_case("q") => break,
                Ok(_) if mode == ListenMode::PushToTalk => {
                    if recording {
                        listener.listen_once_end();
                        eprintln!("Transcribing...");
                    } else {
                        listener.listen_once_start();
                        eprintln!("Recording...");
                    }
                    recording = !recording;
                }
                Ok(_) => {}
                // Stdin closed.
                Err(_) => break,
            },
            default(IDLE_POLL) => {
                if mode == ListenMode::Continuous && !listener.is_listening() {
                    eprintln!("Capture ended.");
                    break;
                }
            }
        }
    }

    if recording {
        listener.listen_once_end();
    }
    listener.stop();
    while let Some(result) = listener.try_next_result() {
        print_transcript(&result)?;
    }
    Ok(())
}

#[cfg(all(unix, feature = "local-whisper"))]
fn build_transcriber(config: &AppConfig) -> Result<TranscriptionProvider> {
    use covas_voice::config::SttProviderKind;
    use covas_voice::stt::LocalWhisper;

    if config.stt_provider == SttProviderKind::Multimodal {
        bail!("--stt-provider multimodal has no built-in backend; use --stt-provider direct");
    }
    let Some(model_path) = config.whisper_model_path.as_deref() else {
        bail!("--listen requires --whisper-model-path pointing at a GGML whisper model");
    };
    let whisper = LocalWhisper::load(model_path)
        .with_context(|| format!("failed to load whisper model {}", model_path.display()))?;
    Ok(TranscriptionProvider::Direct(Box::new(whisper)))
}

#[cfg(not(all(unix, feature = "local-whisper")))]
fn build_transcriber(_config: &AppConfig) -> Result<TranscriptionProvider> {
    bail!("--listen needs a transcriber: rebuild with the 'local-whisper' feature and pass --whisper-model-path")
}

fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (tx, rx) = bounded(8);
    thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("failed to spawn stdin reader")?;
    Ok(rx)
}

fn transcript_json(result: &TranscriptionResult) -> serde_json::Value {
    json!({
        "text": result.text,
        "timestamp": result.timestamp,
        "duration_secs": result.audio.duration_secs(),
    })
}

fn print_transcript(result: &TranscriptionResult) -> Result<()> {
    log_debug_content(&format!("transcript: {}", result.text));
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", transcript_json(result))?;
    stdout.flush()?;
    Ok(())
}

fn speak(config: &AppConfig, text: &str) -> Result<()> {
    let output = config.speech_output_config();
    let settings = config.effects_settings()?;
    let state = load_state(config.state_file.as_deref())?;
    let effects = EffectsChain::from_settings(&settings, output.playback_rate, state, None);
    let sink = CpalSink::open(config.output_device.as_deref(), output.playback_rate)?;
    eprintln!("Speaking on {}", sink.device_name());

    let player = SpeechPlayer::new(&output, SynthesisProvider::silent(), Box::new(sink), effects);
    log_debug_content(&format!("speak: {text}"));
    let report = player.synthesize_and_play(text, SPEAK_VOICE)?;
    println!(
        "{}",
        json!({
            "provider": player.provider_name(),
            "chunks": report.chunks,
            "bytes_played": report.bytes_played,
            "underruns": report.underruns,
            "first_audio_ms": report.first_audio.map(|delay| delay.as_millis() as u64),
        })
    );
    Ok(())
}

fn load_state(path: Option<&Path>) -> Result<Option<Arc<dyn StateProvider>>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read state file {}", path.display()))?;
    let snapshot: StateSnapshot = serde_json::from_str(&raw)
        .with_context(|| format!("state file {} is not a valid snapshot", path.display()))?;
    Ok(Some(Arc::new(StaticState(snapshot))))
}
