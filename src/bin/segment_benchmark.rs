use std::f32::consts::PI;

#[cfg(not(feature = "vad_earshot"))]
use anyhow::bail;
use anyhow::Result;
use clap::Parser;
use covas_voice::audio::{self, f32_to_i16, SegmenterConfig, TARGET_RATE};
use covas_voice::config::{
    default_vad_engine, VadEngineKind, VoicePipelineConfig, DEFAULT_MIN_UTTERANCE_MS,
    DEFAULT_ONSET_PREROLL_MS, DEFAULT_PHRASE_END_PAUSE_MS, DEFAULT_PROBE_WINDOW_MS,
    DEFAULT_VAD_THRESHOLD,
};
use covas_voice::voice::create_vad_engine;

/// Synthetic benchmark harness for utterance segmentation.
#[derive(Debug, Parser)]
#[command(about = "Benchmark the continuous segmenter with synthetic clips")]
struct Args {
    /// Human-friendly label recorded in the output metrics
    #[arg(long, default_value = "clip")]
    label: String,

    /// Silence before the first word (milliseconds)
    #[arg(long, default_value_t = 300)]
    lead_ms: u64,

    /// Duration of the synthetic speech segment (milliseconds)
    #[arg(long, default_value_t = 1_000)]
    speech_ms: u64,

    /// Duration of trailing silence appended after speech (milliseconds)
    #[arg(long, default_value_t = 1_500)]
    silence_ms: u64,

    /// Number of speech/silence repetitions in the clip
    #[arg(long, default_value_t = 1)]
    repeats: u32,

    #[arg(long = "vad-threshold", default_value_t = DEFAULT_VAD_THRESHOLD)]
    vad_threshold: f32,

    #[arg(long = "phrase-end-pause-ms", default_value_t = DEFAULT_PHRASE_END_PAUSE_MS)]
    phrase_end_pause_ms: u64,

    #[arg(long = "probe-window-ms", default_value_t = DEFAULT_PROBE_WINDOW_MS)]
    probe_window_ms: u64,

    #[arg(long = "onset-preroll-ms", default_value_t = DEFAULT_ONSET_PREROLL_MS)]
    onset_preroll_ms: u64,

    #[arg(long = "min-utterance-ms", default_value_t = DEFAULT_MIN_UTTERANCE_MS)]
    min_utterance_ms: u64,

    #[arg(long = "vad-engine", value_enum, default_value_t = default_vad_engine())]
    vad_engine: VadEngineKind,
}

fn main() -> Result<()> {
    let args = Args::parse();
    ensure_vad_engine_supported(&args)?;
    let clip = synthesize_clip(&args);
    let pipeline_cfg = build_pipeline_config(&args);
    let segmenter_cfg = SegmenterConfig::from(&pipeline_cfg);
    let mut vad = create_vad_engine(&pipeline_cfg);
    let result = audio::segment_offline(&clip, &segmenter_cfg, vad.as_mut());

    for (index, (utterance, metrics)) in result
        .utterances
        .iter()
        .zip(&result.metrics)
        .enumerate()
    {
        println!(
            "{metrics}|label={}|index={index}|vad={}|started_ms={}",
            args.label,
            vad.name(),
            (utterance.started_at() * 1000.0).round() as u64
        );
    }
    if result.utterances.is_empty() {
        println!(
            "voice_metrics|label={}|vad={}|utterances=0",
            args.label,
            vad.name()
        );
    }

    Ok(())
}

fn build_pipeline_config(args: &Args) -> VoicePipelineConfig {
    VoicePipelineConfig {
        vad_threshold: args.vad_threshold,
        vad_engine: args.vad_engine,
        phrase_end_pause_ms: args.phrase_end_pause_ms,
        probe_window_ms: args.probe_window_ms,
        onset_preroll_ms: args.onset_preroll_ms,
        min_utterance_ms: args.min_utterance_ms,
        ..VoicePipelineConfig::default()
    }
}

fn ms_to_samples(ms: u64) -> usize {
    (ms * u64::from(TARGET_RATE) / 1000) as usize
}

fn synthesize_clip(args: &Args) -> Vec<i16> {
    let mut samples = vec![0i16; ms_to_samples(args.lead_ms)];
    for _ in 0..args.repeats.max(1) {
        for n in 0..ms_to_samples(args.speech_ms) {
            let t = n as f32 / TARGET_RATE as f32;
            // A wobbling tone reads as speech to both detectors.
            let envelope = 0.6 + 0.4 * (2.0 * PI * 4.0 * t).sin();
            let sample = (2.0 * PI * 220.0 * t).sin() * 0.5 * envelope;
            samples.push(f32_to_i16(sample));
        }
        samples.extend(std::iter::repeat_n(0, ms_to_samples(args.silence_ms)));
    }
    samples
}

#[cfg(not(feature = "vad_earshot"))]
fn ensure_vad_engine_supported(args: &Args) -> Result<()> {
    if matches!(args.vad_engine, VadEngineKind::Earshot) {
        bail!("--vad-engine earshot requires building with the 'vad_earshot' feature");
    }

    Ok(())
}

#[cfg(feature = "vad_earshot")]
fn ensure_vad_engine_supported(_args: &Args) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[cfg(not(feature = "vad_earshot"))]
    #[test]
    fn earshot_flag_errors_without_feature() {
        let args = Args::try_parse_from(["segment_benchmark", "--vad-engine", "earshot"]).unwrap();
        let err = ensure_vad_engine_supported(&args).unwrap_err();
        assert!(err
            .to_string()
            .contains("requires building with the 'vad_earshot' feature"));
    }

    #[test]
    fn energy_flag_always_allowed() {
        let args = Args::try_parse_from(["segment_benchmark", "--vad-engine", "energy"]).unwrap();
        ensure_vad_engine_supported(&args).expect("energy should remain available");
    }

    #[test]
    fn clip_length_matches_arguments() {
        let args = Args::try_parse_from([
            "segment_benchmark",
            "--lead-ms",
            "100",
            "--speech-ms",
            "500",
            "--silence-ms",
            "250",
            "--repeats",
            "2",
        ])
        .unwrap();
        assert_eq!(synthesize_clip(&args).len(), ms_to_samples(100 + 2 * 750));
    }

    #[test]
    fn energy_engine_finds_each_phrase() {
        let args = Args::try_parse_from([
            "segment_benchmark",
            "--vad-engine",
            "energy",
            "--repeats",
            "2",
        ])
        .unwrap();
        let cfg = build_pipeline_config(&args);
        let mut vad = create_vad_engine(&cfg);
        let result =
            audio::segment_offline(&synthesize_clip(&args), &SegmenterConfig::from(&cfg), vad.as_mut());
        assert_eq!(result.utterances.len(), 2);
        assert_eq!(result.metrics.len(), 2);
    }
}
