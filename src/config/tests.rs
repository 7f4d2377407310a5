use super::defaults::{MAX_PREBUFFER_BYTES, PLAYBACK_BLOCK_BYTES};
use super::validation::{load_effects_file, validate_language};
use super::{default_vad_engine, AppConfig, SttProviderKind, VadEngineKind};
use clap::Parser;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_file(name: &str, contents: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let path = env::temp_dir().join(format!("covas_voice_{nanos}_{name}"));
    fs::write(&path, contents).expect("write temp file");
    path
}

#[test]
fn defaults_validate() {
    let mut cfg = AppConfig::parse_from(["test-app"]);
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.vad_threshold, 0.2);
    assert_eq!(cfg.phrase_end_pause_ms, 1000);
    assert_eq!(cfg.min_utterance_ms, 200);
    assert_eq!(cfg.prebuffer_bytes, 4 * PLAYBACK_BLOCK_BYTES);
    assert_eq!(cfg.stream_initial_timeout_ms, 10_000);
    assert_eq!(cfg.stream_chunk_timeout_ms, 5_000);
    assert_eq!(cfg.vad_engine, default_vad_engine());
    assert_eq!(cfg.stt_provider, SttProviderKind::Direct);
}

#[test]
fn rejects_vad_threshold_out_of_range() {
    let mut cfg = AppConfig::parse_from(["test-app", "--vad-threshold", "1.5"]);
    assert!(cfg.validate().is_err());
    let mut cfg = AppConfig::parse_from(["test-app", "--vad-threshold", "-0.1"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn accepts_vad_threshold_bounds() {
    let mut cfg = AppConfig::parse_from(["test-app", "--vad-threshold", "0"]);
    assert!(cfg.validate().is_ok());
    let mut cfg = AppConfig::parse_from(["test-app", "--vad-threshold", "1"]);
    assert!(cfg.validate().is_ok());
}

#[test]
fn rejects_preroll_longer_than_probe() {
    let mut cfg = AppConfig::parse_from([
        "test-app",
        "--probe-window-ms",
        "200",
        "--onset-preroll-ms",
        "300",
    ]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_chunk_timeout_above_initial() {
    let mut cfg = AppConfig::parse_from([
        "test-app",
        "--stream-initial-timeout-ms",
        "1000",
        "--stream-chunk-timeout-ms",
        "2000",
    ]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_zero_timeouts() {
    let mut cfg = AppConfig::parse_from(["test-app", "--stream-initial-timeout-ms", "0"]);
    assert!(cfg.validate().is_err());
    let mut cfg = AppConfig::parse_from(["test-app", "--stream-chunk-timeout-ms", "0"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_prebuffer_out_of_range() {
    let mut cfg = AppConfig::parse_from(["test-app", "--prebuffer-bytes", "0"]);
    assert!(cfg.validate().is_err());
    let too_big = (MAX_PREBUFFER_BYTES + 1).to_string();
    let mut cfg = AppConfig::parse_from(["test-app", "--prebuffer-bytes", too_big.as_str()]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_inverted_volume_flicker_range() {
    let mut cfg = AppConfig::parse_from([
        "test-app",
        "--volume-flicker-min",
        "0.9",
        "--volume-flicker-max",
        "0.5",
    ]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_damage_override_out_of_range() {
    let mut cfg = AppConfig::parse_from(["test-app", "--damage-level-override", "1.2"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_small_result_queue() {
    let mut cfg = AppConfig::parse_from(["test-app", "--result-queue-capacity", "0"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_invalid_language_code() {
    let mut cfg = AppConfig::parse_from(["test-app", "--lang", "en$"]);
    assert!(cfg.validate().is_err());
    let mut cfg = AppConfig::parse_from(["test-app", "--lang", "zz-ZZ"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn accepts_language_with_region_suffixes() {
    assert!(validate_language("en-US").is_ok());
    assert!(validate_language("pt_BR").is_ok());
}

#[test]
fn auto_language_clears_hint() {
    let mut cfg = AppConfig::parse_from(["test-app", "--lang", "auto"]);
    assert!(cfg.validate().is_ok());
    assert!(cfg.lang.is_none());
}

#[test]
fn blank_required_word_is_dropped() {
    let mut cfg = AppConfig::parse_from(["test-app", "--required-word", "   "]);
    assert!(cfg.validate().is_ok());
    assert!(cfg.required_word.is_none());

    let mut cfg = AppConfig::parse_from(["test-app", "--required-word", " covas "]);
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.required_word.as_deref(), Some("covas"));
}

#[test]
fn rejects_overlong_required_word() {
    let word = "x".repeat(65);
    let mut cfg = AppConfig::parse_from(["test-app", "--required-word", word.as_str()]);
    assert!(cfg.validate().is_err());
}

#[cfg(not(feature = "vad_earshot"))]
#[test]
fn rejects_earshot_without_feature() {
    let mut cfg = AppConfig::parse_from(["test-app", "--vad-engine", "earshot"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn energy_engine_always_available() {
    let mut cfg = AppConfig::parse_from(["test-app", "--vad-engine", "energy"]);
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.vad_engine, VadEngineKind::Energy);
    assert_eq!(cfg.vad_engine.label(), "energy");
}

#[test]
fn voice_pipeline_config_snapshots_cli_values() {
    let mut cfg = AppConfig::parse_from([
        "test-app",
        "--vad-threshold",
        "0.4",
        "--phrase-end-pause-ms",
        "800",
        "--required-word",
        "Covas",
        "--lang",
        "de",
        "--stt-provider",
        "multimodal",
    ]);
    cfg.validate().expect("valid config");
    let pipeline = cfg.voice_pipeline_config();
    assert_eq!(pipeline.vad_threshold, 0.4);
    assert_eq!(pipeline.phrase_end_pause_ms, 800);
    assert_eq!(pipeline.required_word.as_deref(), Some("Covas"));
    assert_eq!(pipeline.language.as_deref(), Some("de"));
    assert_eq!(pipeline.stt_provider, SttProviderKind::Multimodal);
}

#[test]
fn speech_output_config_snapshots_cli_values() {
    let cfg = AppConfig::parse_from([
        "test-app",
        "--prebuffer-bytes",
        "1440",
        "--playback-rate",
        "22050",
    ]);
    let output = cfg.speech_output_config();
    assert_eq!(output.prebuffer_bytes, 1440);
    assert_eq!(output.playback_rate, 22_050);
}

#[test]
fn damage_effects_flags_last_one_wins() {
    let cfg = AppConfig::parse_from(["test-app", "--no-damage-effects"]);
    assert!(!cfg.effects_settings().expect("settings").damage.enabled);

    let cfg = AppConfig::parse_from(["test-app", "--no-damage-effects", "--damage-effects"]);
    assert!(cfg.effects_settings().expect("settings").damage.enabled);

    let cfg = AppConfig::parse_from(["test-app"]);
    assert!(cfg.effects_settings().expect("settings").damage.enabled);
}

#[test]
fn effects_settings_follow_cli_flags() {
    let cfg = AppConfig::parse_from([
        "test-app",
        "--damage-threshold",
        "0.3",
        "--glitch-rate",
        "0.05",
        "--vehicle-reverb",
    ]);
    let settings = cfg.effects_settings().expect("settings");
    assert_eq!(settings.damage.threshold, 0.3);
    assert_eq!(settings.damage.glitch_rate, 0.05);
    assert!(settings.vehicle_reverb.enabled);
    assert!(!settings.voice.chorus.enabled);
}

#[test]
fn effects_file_replaces_cli_flags() {
    let path = temp_file(
        "effects.yaml",
        "damage:\n  enabled: false\nvoice:\n  volume:\n    enabled: true\n    gain: 0.5\n",
    );
    let mut cfg = AppConfig::parse_from([
        "test-app",
        "--effects-file",
        path.to_str().expect("utf-8 path"),
    ]);
    assert!(cfg.validate().is_ok());
    let settings = cfg.effects_settings().expect("settings");
    assert!(!settings.damage.enabled);
    assert!(settings.voice.volume.enabled);
    assert_eq!(settings.voice.volume.gain, 0.5);
    let _ = fs::remove_file(path);
}

#[test]
fn effects_file_with_invalid_values_is_rejected() {
    let path = temp_file("bad_effects.yaml", "damage:\n  threshold: 4.0\n");
    assert!(load_effects_file(&path).is_err());
    let _ = fs::remove_file(path);
}

#[test]
fn missing_effects_file_is_rejected() {
    let mut cfg = AppConfig::parse_from([
        "test-app",
        "--effects-file",
        "/nonexistent/covas/effects.yaml",
    ]);
    assert!(cfg.validate().is_err());
}

#[test]
fn speak_and_state_file_are_optional() {
    let config = AppConfig::try_parse_from(["covas-voice"]).unwrap();
    assert!(config.speak.is_none());
    assert!(config.state_file.is_none());

    let config = AppConfig::try_parse_from([
        "covas-voice",
        "--speak",
        "Shields holding",
        "--state-file",
        "/tmp/state.json",
    ])
    .unwrap();
    assert_eq!(config.speak.as_deref(), Some("Shields holding"));
    assert_eq!(config.state_file, Some(PathBuf::from("/tmp/state.json")));
}
