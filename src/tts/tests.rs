use super::*;
use crate::audio::{f32_to_i16, i16_to_f32, pcm_bytes_to_samples, samples_to_pcm_bytes};
use crate::effects::{EffectsChain, EffectsSettings, Volume};
use crate::error::{TimeoutPhase, VoiceError};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

enum Step {
    Audio(Vec<u8>),
    Marker,
    Pause(Duration),
    Fail(&'static str),
}

struct Scripted {
    steps: VecDeque<Step>,
    yielded: Arc<AtomicUsize>,
}

impl Iterator for Scripted {
    type Item = std::result::Result<SynthesisEvent, ProviderError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let item = match self.steps.pop_front()? {
                Step::Audio(bytes) => Ok(SynthesisEvent::Audio(bytes)),
                Step::Marker => Ok(SynthesisEvent::Other("word_boundary".to_string())),
                Step::Pause(wait) => {
                    thread::sleep(wait);
                    continue;
                }
                Step::Fail(message) => Err(ProviderError::new("scripted", message)),
            };
            self.yielded.fetch_add(1, Ordering::SeqCst);
            return Some(item);
        }
    }
}

fn events(steps: Vec<Step>) -> SynthesisEvents {
    Box::new(Scripted {
        steps: steps.into(),
        yielded: Arc::new(AtomicUsize::new(0)),
    })
}

fn config(initial_ms: u64, chunk_ms: u64, prebuffer: usize) -> StreamConfig {
    StreamConfig {
        initial_timeout: Duration::from_millis(initial_ms),
        chunk_timeout: Duration::from_millis(chunk_ms),
        prebuffer_bytes: prebuffer,
        buffer_cap_bytes: 1024 * 1024,
    }
}

fn expect_timeout(result: crate::error::Result<Vec<u8>>, phase: TimeoutPhase) {
    match result {
        Err(VoiceError::StreamTimeout { phase: got, .. }) => assert_eq!(got, phase),
        other => panic!("expected {phase} timeout, got {other:?}"),
    }
}

#[test]
fn stalled_stream_returns_buffered_audio_then_times_out() {
    let mut adapter = StreamDecodeAdapter::spawn(
        events(vec![
            Step::Audio(vec![7u8; 4096]),
            Step::Pause(Duration::from_secs(3)),
        ]),
        config(1_000, 150, 2_880),
    );
    let started = Instant::now();
    let mut received = Vec::new();
    let err = loop {
        match adapter.read_bytes(1024) {
            Ok(bytes) => {
                assert!(!bytes.is_empty(), "stream ended without a timeout");
                received.extend(bytes);
            }
            Err(err) => break err,
        }
    };
    assert_eq!(received, vec![7u8; 4096]);
    assert!(matches!(
        err,
        VoiceError::StreamTimeout {
            phase: TimeoutPhase::Gap,
            ..
        }
    ));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(140), "timed out after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(1_500), "timed out after {elapsed:?}");
    assert!(adapter.read_bytes(1024).expect("closed").is_empty());
}

#[test]
fn no_audio_before_initial_timeout_fails() {
    let mut adapter = StreamDecodeAdapter::spawn(
        events(vec![Step::Pause(Duration::from_secs(3))]),
        config(100, 20, 0),
    );
    let started = Instant::now();
    expect_timeout(adapter.read_bytes(512), TimeoutPhase::Initial);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(90));
    assert!(elapsed < Duration::from_millis(1_500));
}

#[test]
fn chunk_timeout_does_not_apply_before_first_audio() {
    let mut adapter = StreamDecodeAdapter::spawn(
        events(vec![
            Step::Pause(Duration::from_millis(300)),
            Step::Audio(vec![1u8; 1000]),
        ]),
        config(2_000, 100, 0),
    );
    assert_eq!(adapter.read_bytes(4096).expect("audio").len(), 1000);
    assert!(adapter.read_bytes(4096).expect("end").is_empty());
}

#[test]
fn read_waits_for_prebuffer() {
    let mut adapter = StreamDecodeAdapter::spawn(
        events(vec![
            Step::Audio(vec![1u8; 500]),
            Step::Pause(Duration::from_millis(80)),
            Step::Audio(vec![2u8; 500]),
        ]),
        config(2_000, 1_000, 1_000),
    );
    let first = adapter.read_bytes(100).expect("read");
    assert_eq!(first, vec![1u8; 100]);
    assert_eq!(adapter.bytes_received(), 1000);
    let rest = adapter.read_bytes(2_000).expect("rest");
    assert_eq!(rest.len(), 900);
    assert_eq!(rest[899], 2);
}

#[test]
fn non_audio_events_are_ignored() {
    let mut adapter = StreamDecodeAdapter::spawn(
        events(vec![
            Step::Marker,
            Step::Audio(vec![3u8; 10]),
            Step::Marker,
            Step::Audio(Vec::new()),
        ]),
        config(1_000, 1_000, 0),
    );
    assert_eq!(adapter.read_bytes(64).expect("read"), vec![3u8; 10]);
    assert!(adapter.read_bytes(64).expect("end").is_empty());
}

#[test]
fn provider_error_surfaces_once_after_buffered_audio() {
    let mut adapter = StreamDecodeAdapter::spawn(
        events(vec![Step::Audio(vec![5u8; 100]), Step::Fail("quota exceeded")]),
        config(1_000, 1_000, 0),
    );
    let mut received = Vec::new();
    let err = loop {
        match adapter.read_bytes(1_000) {
            Ok(bytes) if bytes.is_empty() => panic!("error was swallowed"),
            Ok(bytes) => received.extend(bytes),
            Err(err) => break err,
        }
    };
    assert_eq!(received.len(), 100);
    assert_eq!(err.label(), "provider");
    assert!(err.to_string().contains("quota exceeded"));
    assert!(adapter.read_bytes(1_000).expect("closed").is_empty());
}

#[test]
fn cancel_unblocks_pending_read() {
    let mut adapter = StreamDecodeAdapter::spawn(
        events(vec![Step::Pause(Duration::from_secs(3))]),
        config(5_000, 5_000, 0),
    );
    let canceller = adapter.canceller();
    let closer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        canceller.close();
    });
    let started = Instant::now();
    assert!(adapter.read_bytes(1024).expect("eof").is_empty());
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(adapter.is_closed());
    closer.join().expect("closer thread");
}

#[test]
fn closed_adapter_discards_buffered_audio() {
    let mut adapter = StreamDecodeAdapter::spawn(
        events(vec![Step::Audio(vec![1u8; 64])]),
        config(1_000, 1_000, 0),
    );
    assert_eq!(adapter.read_bytes(16).expect("read").len(), 16);
    adapter.close();
    assert!(adapter.read_bytes(16).expect("eof").is_empty());
}

#[test]
fn io_read_reports_timeout_kind() {
    let mut adapter = StreamDecodeAdapter::spawn(
        events(vec![Step::Pause(Duration::from_secs(3))]),
        config(50, 50, 0),
    );
    let mut buf = [0u8; 256];
    let err = adapter.read(&mut buf).expect_err("timeout");
    assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    assert!(VoiceError::from_io(err).is_stream_timeout());
}

#[test]
fn producer_blocks_when_buffer_is_full() {
    let yielded = Arc::new(AtomicUsize::new(0));
    let steps = (0..10).map(|_| Step::Audio(vec![9u8; 1024])).collect();
    let scripted = Scripted {
        steps,
        yielded: yielded.clone(),
    };
    let mut stream_config = config(1_000, 1_000, 0);
    stream_config.buffer_cap_bytes = 1024;
    let mut adapter = StreamDecodeAdapter::spawn(Box::new(scripted), stream_config);
    thread::sleep(Duration::from_millis(150));
    assert!(yielded.load(Ordering::SeqCst) <= 3);

    let mut total = 0;
    loop {
        let bytes = adapter.read_bytes(4096).expect("read");
        if bytes.is_empty() {
            break;
        }
        total += bytes.len();
    }
    assert_eq!(total, 10 * 1024);
    assert_eq!(yielded.load(Ordering::SeqCst), 10);
}

#[test]
fn stream_config_follows_output_config() {
    let output = crate::config::SpeechOutputConfig::default();
    let stream = StreamConfig::from(&output);
    assert_eq!(stream.initial_timeout, Duration::from_secs(10));
    assert_eq!(stream.chunk_timeout, Duration::from_secs(5));
    assert_eq!(stream.prebuffer_bytes, 4 * 720);
}

#[derive(Clone, Default)]
struct CollectingSink {
    written: Arc<Mutex<Vec<u8>>>,
    underruns_per_write: u64,
    underruns: Arc<AtomicU64>,
    finished: Arc<AtomicUsize>,
    cleared: Arc<AtomicUsize>,
}

impl CollectingSink {
    fn bytes(&self) -> Vec<u8> {
        self.written.lock().expect("sink lock").clone()
    }
}

impl PlaybackSink for CollectingSink {
    fn write(&mut self, pcm: &[u8]) -> crate::error::Result<()> {
        self.written.lock().expect("sink lock").extend_from_slice(pcm);
        self.underruns
            .fetch_add(self.underruns_per_write, Ordering::SeqCst);
        Ok(())
    }

    fn finish(&mut self) -> crate::error::Result<()> {
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&mut self) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }

    fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::SeqCst)
    }
}

/// Plays back one scripted session per call.
struct ScriptedSynth {
    sessions: VecDeque<std::result::Result<Vec<Step>, &'static str>>,
}

impl SpeechSynthesizer for ScriptedSynth {
    fn synthesize(
        &mut self,
        _text: &str,
        _voice: &str,
    ) -> std::result::Result<SynthesisEvents, ProviderError> {
        match self.sessions.pop_front() {
            Some(Ok(steps)) => Ok(events(steps)),
            Some(Err(message)) => Err(ProviderError::new("scripted", message)),
            None => Ok(events(Vec::new())),
        }
    }

    fn encoding(&self) -> AudioEncoding {
        AudioEncoding::Pcm16 { sample_rate: 24_000 }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn output_config(chunk_ms: u64) -> crate::config::SpeechOutputConfig {
    crate::config::SpeechOutputConfig {
        initial_timeout_ms: 2_000,
        chunk_timeout_ms: chunk_ms,
        ..Default::default()
    }
}

fn scripted_player(
    sessions: Vec<std::result::Result<Vec<Step>, &'static str>>,
    sink: &CollectingSink,
    chunk_ms: u64,
) -> SpeechPlayer {
    SpeechPlayer::new(
        &output_config(chunk_ms),
        SynthesisProvider::Remote(Box::new(ScriptedSynth {
            sessions: sessions.into(),
        })),
        Box::new(sink.clone()),
        EffectsChain::new(24_000, None),
    )
}

#[test]
fn silent_provider_plays_estimated_duration() {
    let estimate = speaking_time("one two three four five", 150.0).as_secs_f64();
    assert!((estimate - 2.0).abs() < 1e-6);
    assert_eq!(speaking_time("   ", 150.0), Duration::ZERO);

    let sink = CollectingSink::default();
    let player = SpeechPlayer::new(
        &output_config(1_000),
        SynthesisProvider::silent(),
        Box::new(sink.clone()),
        EffectsChain::new(24_000, None),
    );
    let report = player
        .synthesize_and_play("one two three four five", "nova")
        .expect("play");
    assert_eq!(report.bytes_played, 2 * 24_000 * 2);
    assert!(!report.aborted);
    assert!(sink.bytes().iter().all(|&b| b == 0));
    assert_eq!(sink.finished.load(Ordering::SeqCst), 1);
    assert!(!player.is_playing());
    assert_eq!(player.provider_name(), "silent");
}

#[test]
fn empty_text_plays_nothing() {
    let sink = CollectingSink::default();
    let player = scripted_player(vec![], &sink, 1_000);
    let report = player.synthesize_and_play("  \n", "nova").expect("play");
    assert_eq!(report, PlaybackReport::default());
    assert_eq!(sink.finished.load(Ordering::SeqCst), 0);
}

#[test]
fn effects_run_on_every_chunk() {
    let samples: Vec<i16> = (0..2_000).map(|i| ((i % 100) * 200) as i16).collect();
    let sink = CollectingSink::default();
    let mut effects = EffectsChain::new(24_000, None);
    effects.push(Box::new(Volume::new(0.5)), true);
    let player = SpeechPlayer::new(
        &output_config(1_000),
        SynthesisProvider::Remote(Box::new(ScriptedSynth {
            sessions: vec![Ok(vec![Step::Audio(samples_to_pcm_bytes(&samples))])].into(),
        })),
        Box::new(sink.clone()),
        effects,
    );
    let report = player.synthesize_and_play("hello", "nova").expect("play");
    assert_eq!(report.bytes_played, samples.len() * 2);
    let played = pcm_bytes_to_samples(&sink.bytes());
    assert_eq!(played.len(), samples.len());
    let expected: Vec<i16> = samples
        .iter()
        .map(|&sample| f32_to_i16(i16_to_f32(sample) * 0.5))
        .collect();
    assert_eq!(played, expected);
}

#[test]
fn provider_failure_is_reported() {
    let sink = CollectingSink::default();
    let player = scripted_player(vec![Err("voice not found")], &sink, 1_000);
    let err = player.synthesize_and_play("hello", "nova").expect_err("fail");
    assert_eq!(err.label(), "provider");
    assert!(!player.is_playing());
}

#[test]
fn timeout_ends_only_the_current_session() {
    let sink = CollectingSink::default();
    let player = scripted_player(
        vec![
            Ok(vec![
                Step::Audio(vec![0u8; 4096]),
                Step::Pause(Duration::from_secs(3)),
            ]),
            Ok(vec![Step::Audio(vec![0u8; 2048])]),
        ],
        &sink,
        100,
    );
    let err = player.synthesize_and_play("first", "nova").expect_err("timeout");
    assert!(err.is_stream_timeout());
    assert_eq!(sink.bytes().len(), 4096);
    assert_eq!(sink.cleared.load(Ordering::SeqCst), 1);

    let report = player.synthesize_and_play("second", "nova").expect("second");
    assert_eq!(report.bytes_played, 2048);
    assert_eq!(sink.finished.load(Ordering::SeqCst), 1);
}

#[test]
fn abort_stops_a_blocked_session() {
    let sink = CollectingSink::default();
    let player = Arc::new(SpeechPlayer::new(
        &crate::config::SpeechOutputConfig::default(),
        SynthesisProvider::Remote(Box::new(ScriptedSynth {
            sessions: vec![Ok(vec![
                Step::Audio(vec![0u8; 2048]),
                Step::Pause(Duration::from_secs(3)),
            ])]
            .into(),
        })),
        Box::new(sink.clone()),
        EffectsChain::new(24_000, None),
    ));
    let speaker = player.clone();
    let handle = thread::spawn(move || speaker.synthesize_and_play("hello there", "nova"));

    let deadline = Instant::now() + Duration::from_secs(2);
    while !player.is_playing() {
        assert!(Instant::now() < deadline, "session never started");
        thread::sleep(Duration::from_millis(5));
    }
    thread::sleep(Duration::from_millis(50));
    let started = Instant::now();
    player.abort();
    let report = handle.join().expect("player thread").expect("aborted cleanly");
    assert!(report.aborted);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(sink.cleared.load(Ordering::SeqCst), 1);
    assert!(!player.is_playing());
}

/// Holds the request open until the test releases it.
struct BlockingSynth {
    entered: Sender<()>,
    release: Receiver<()>,
}

impl SpeechSynthesizer for BlockingSynth {
    fn synthesize(
        &mut self,
        _text: &str,
        _voice: &str,
    ) -> std::result::Result<SynthesisEvents, ProviderError> {
        let _ = self.entered.send(());
        let _ = self.release.recv_timeout(Duration::from_secs(5));
        Ok(events(vec![Step::Audio(vec![0u8; 4096])]))
    }

    fn encoding(&self) -> AudioEncoding {
        AudioEncoding::Pcm16 { sample_rate: 24_000 }
    }

    fn name(&self) -> &str {
        "blocking"
    }
}

#[test]
fn abort_during_synthesis_request_skips_playback() {
    let (entered_tx, entered_rx) = bounded(1);
    let (release_tx, release_rx) = bounded(1);
    let sink = CollectingSink::default();
    let player = Arc::new(SpeechPlayer::new(
        &output_config(1_000),
        SynthesisProvider::Remote(Box::new(BlockingSynth {
            entered: entered_tx,
            release: release_rx,
        })),
        Box::new(sink.clone()),
        EffectsChain::new(24_000, None),
    ));
    let speaker = player.clone();
    let handle = thread::spawn(move || speaker.synthesize_and_play("hello there", "nova"));

    entered_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("synthesis request started");
    assert!(player.is_playing());
    player.abort();
    release_tx.send(()).expect("release synthesis");

    let report = handle.join().expect("player thread").expect("aborted cleanly");
    assert!(report.aborted);
    assert_eq!(report.bytes_played, 0);
    assert!(sink.bytes().is_empty());
    assert_eq!(sink.finished.load(Ordering::SeqCst), 0);
    assert_eq!(sink.cleared.load(Ordering::SeqCst), 1);
    assert!(!player.is_playing());
}

#[test]
fn abort_while_idle_leaves_next_session_alone() {
    let sink = CollectingSink::default();
    let player = scripted_player(vec![Ok(vec![Step::Audio(vec![0u8; 2048])])], &sink, 1_000);
    player.abort();
    let report = player.synthesize_and_play("hello", "nova").expect("play");
    assert!(!report.aborted);
    assert_eq!(report.bytes_played, 2048);
    assert_eq!(sink.finished.load(Ordering::SeqCst), 1);
}

/// Records the text each request was made with.
struct RecordingSynth {
    spells_numbers: bool,
    requests: Arc<Mutex<Vec<String>>>,
}

impl SpeechSynthesizer for RecordingSynth {
    fn synthesize(
        &mut self,
        text: &str,
        _voice: &str,
    ) -> std::result::Result<SynthesisEvents, ProviderError> {
        self.requests.lock().expect("requests lock").push(text.to_string());
        Ok(events(vec![Step::Audio(vec![0u8; 480])]))
    }

    fn encoding(&self) -> AudioEncoding {
        AudioEncoding::Pcm16 { sample_rate: 24_000 }
    }

    fn name(&self) -> &str {
        "recording"
    }

    fn spells_numbers(&self) -> bool {
        self.spells_numbers
    }
}

#[test]
fn text_is_cleaned_before_synthesis() {
    for (spells_numbers, expected) in [
        (true, "Jump in one thousand, five hundred meters"),
        (false, "Jump in 1,500 meters"),
    ] {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let player = SpeechPlayer::new(
            &output_config(1_000),
            SynthesisProvider::Remote(Box::new(RecordingSynth {
                spells_numbers,
                requests: requests.clone(),
            })),
            Box::new(CollectingSink::default()),
            EffectsChain::new(24_000, None),
        );
        let report = player
            .synthesize_and_play("**Jump** in 1,500 meters", "nova")
            .expect("play");
        assert_eq!(report.bytes_played, 480);

        // Markup alone leaves nothing to say.
        let report = player.synthesize_and_play("---", "nova").expect("rule only");
        assert_eq!(report, PlaybackReport::default());
        assert_eq!(
            *requests.lock().expect("requests lock"),
            vec![expected.to_string()]
        );
    }
}

#[test]
fn underruns_grow_prebuffer_up_to_cap() {
    let sink = CollectingSink {
        underruns_per_write: 1,
        ..CollectingSink::default()
    };
    let player = SpeechPlayer::new(
        &output_config(1_000),
        SynthesisProvider::silent(),
        Box::new(sink.clone()),
        EffectsChain::new(24_000, None),
    );
    assert_eq!(player.prebuffer_bytes(), 4 * 720);
    let report = player.synthesize_and_play("hi", "nova").expect("play");
    assert!(report.underruns > 0);
    assert_eq!(player.prebuffer_bytes(), 8 * 720);
    for _ in 0..6 {
        player.synthesize_and_play("hi", "nova").expect("play");
    }
    assert_eq!(player.prebuffer_bytes(), 64 * 720);
}

#[test]
fn clean_sessions_keep_prebuffer() {
    let sink = CollectingSink::default();
    let player = SpeechPlayer::new(
        &output_config(1_000),
        SynthesisProvider::silent(),
        Box::new(sink),
        EffectsChain::new(24_000, None),
    );
    player.synthesize_and_play("hi there", "nova").expect("play");
    assert_eq!(player.prebuffer_bytes(), 4 * 720);
}

#[test]
fn effect_toggles_apply_between_chunks() {
    let mut settings = EffectsSettings::default();
    settings.damage.enabled = false;
    settings.voice.volume.gain = 0.0;
    let effects = EffectsChain::from_settings(&settings, 24_000, None, Some(1));
    let loud = samples_to_pcm_bytes(&vec![10_000i16; 512]);
    let sink = CollectingSink::default();
    let player = SpeechPlayer::new(
        &output_config(1_000),
        SynthesisProvider::Remote(Box::new(ScriptedSynth {
            sessions: vec![Ok(vec![Step::Audio(loud.clone())]), Ok(vec![Step::Audio(loud.clone())])]
                .into(),
        })),
        Box::new(sink.clone()),
        effects,
    );
    player.synthesize_and_play("first", "nova").expect("play");
    assert_eq!(sink.bytes(), loud);

    player.set_effect_enabled("volume", true);
    player.synthesize_and_play("second", "nova").expect("play");
    let bytes = sink.bytes();
    assert!(pcm_bytes_to_samples(&bytes[loud.len()..])
        .iter()
        .all(|&s| s == 0));
}

#[test]
fn pcm_bytes_survive_decoder_through_adapter() {
    let samples: Vec<i16> = (0..3_000).map(|i| (i * 7 % 20_000) as i16).collect();
    let bytes = samples_to_pcm_bytes(&samples);
    let chunks: Vec<Step> = bytes.chunks(333).map(|c| Step::Audio(c.to_vec())).collect();
    let adapter = StreamDecodeAdapter::spawn(events(chunks), config(1_000, 1_000, 720));
    let mut decoder = SpeechDecoder::new(adapter, AudioEncoding::Pcm16 { sample_rate: 24_000 }, 24_000);
    let mut out = Vec::new();
    while let Some(chunk) = decoder.next_chunk().expect("decode") {
        out.extend(chunk);
    }
    assert_eq!(out, bytes);
}
