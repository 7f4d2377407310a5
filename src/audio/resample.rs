use crate::log_debug;
use anyhow::{anyhow, Result};
#[cfg(feature = "high-quality-audio")]
use rubato::{InterpolationParameters, InterpolationType, Resampler, SincFixedIn, WindowFunction};
use std::cmp::Ordering as CmpOrdering;
use std::f32::consts::PI;
#[cfg(test)]
use std::sync::atomic::AtomicUsize;
#[cfg(any(test, feature = "high-quality-audio"))]
use std::sync::atomic::{AtomicBool, Ordering};

// Practical bounds for microphones and decoded speech streams.
pub(crate) const MIN_RATE: u32 = 2_000;
pub(crate) const MAX_RATE: u32 = 384_000;
const MAX_RATIO: f64 = 8.0;
const MAX_DOWNSAMPLING_TAPS: usize = 129;

#[cfg(feature = "high-quality-audio")]
static RESAMPLER_WARNING_SHOWN: AtomicBool = AtomicBool::new(false);
#[cfg(test)]
pub(super) static RESAMPLE_FALLBACK_COUNT: AtomicUsize = AtomicUsize::new(0);
#[cfg(test)]
pub(super) static FORCE_RUBATO_ERROR: AtomicBool = AtomicBool::new(false);

/// Convert mono `input` from `from_rate` to `to_rate`. Unsupported rates pass
/// the audio through untouched rather than failing the caller.
pub(crate) fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == 0 || to_rate == 0 || input.is_empty() || from_rate == to_rate {
        return input.to_vec();
    }

    #[cfg(feature = "high-quality-audio")]
    {
        match resample_with_rubato(input, from_rate, to_rate) {
            Ok(output) => output,
            Err(err) => {
                #[cfg(test)]
                RESAMPLE_FALLBACK_COUNT.fetch_add(1, Ordering::Relaxed);
                if !RESAMPLER_WARNING_SHOWN.swap(true, Ordering::AcqRel) {
                    log_debug(&format!(
                        "high-quality resampler failed ({err}); falling back to basic path"
                    ));
                }
                basic_resample(input, from_rate, to_rate)
            }
        }
    }

    #[cfg(not(feature = "high-quality-audio"))]
    {
        basic_resample(input, from_rate, to_rate)
    }
}

fn check_rates(from_rate: u32, to_rate: u32) -> Result<f64> {
    for rate in [from_rate, to_rate] {
        if !(MIN_RATE..=MAX_RATE).contains(&rate) {
            return Err(anyhow!("unsupported sample rate {rate}Hz for resampling"));
        }
    }
    let ratio = f64::from(to_rate) / f64::from(from_rate);
    if !(1.0 / MAX_RATIO..=MAX_RATIO).contains(&ratio) {
        return Err(anyhow!("invalid resample ratio {ratio}"));
    }
    Ok(ratio)
}

#[cfg(feature = "high-quality-audio")]
pub(super) fn resample_with_rubato(input: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if input.is_empty() || from_rate == to_rate {
        return Ok(input.to_vec());
    }
    let ratio = check_rates(from_rate, to_rate)?;

    #[cfg(test)]
    if FORCE_RUBATO_ERROR.swap(false, Ordering::Relaxed) {
        return Err(anyhow!("forced rubato error"));
    }

    let chunk = 256usize;
    let params = InterpolationParameters {
        sinc_len: 64,
        f_cutoff: 0.90,
        interpolation: InterpolationType::Cubic,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    //           ratio,  drift, params, chunk_size, channels
    let mut rs = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk, 1)
        .map_err(|e| anyhow!("failed to construct sinc resampler: {e:?}"))?;

    let expect = (((input.len() as f64) * ratio).round() as usize).max(1);
    let mut out = Vec::with_capacity(expect + 8);

    let mut idx = 0usize;
    let mut seg = vec![0.0f32; chunk];
    while idx < input.len() {
        let end = (idx + chunk).min(input.len());
        let len = end - idx;
        let pad = input[end - 1];
        seg.fill(pad);
        seg[..len].copy_from_slice(&input[idx..end]);
        let produced = rs
            .process(std::slice::from_ref(&seg), None)
            .map_err(|e| anyhow!("resampler process failed: {e:?}"))?;
        if let Some(channel) = produced.first() {
            out.extend_from_slice(channel);
        }
        idx = end;
    }

    Ok(adjust_length(out, expect))
}

pub(super) fn basic_resample(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if input.is_empty() {
        return input.to_vec();
    }
    let ratio = match check_rates(from_rate, to_rate) {
        Ok(ratio) => ratio as f32,
        Err(_) => return input.to_vec(),
    };
    let filtered = if from_rate > to_rate {
        // Decimating: low-pass first so content above the new Nyquist does not alias.
        let taps = downsampling_tap_count(from_rate, to_rate);
        low_pass_fir(input, from_rate, to_rate, taps)
    } else {
        input.to_vec()
    };
    resample_linear(&filtered, ratio)
}

/// Linear interpolation; fine for speech where latency matters more than phase.
pub(crate) fn resample_linear(input: &[f32], ratio: f32) -> Vec<f32> {
    let input_len = input.len();
    let output_len = (input_len as f32 * ratio).round() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_idx = i as f32 / ratio;
        let idx = src_idx.floor() as usize;
        let frac = src_idx - idx as f32;

        if idx + 1 < input_len {
            output.push(input[idx] * (1.0 - frac) + input[idx + 1] * frac);
        } else {
            output.push(input.last().copied().unwrap_or(0.0));
        }
    }

    output
}

/// Short FIR for near-equal rates, longer when collapsing 48 kHz into 16 kHz.
pub(super) fn downsampling_tap_count(from_rate: u32, to_rate: u32) -> usize {
    let decimation_ratio = from_rate as f32 / to_rate.max(1) as f32;
    let mut taps = (decimation_ratio * 4.0).ceil().max(11.0) as usize;
    if taps % 2 == 0 {
        taps += 1;
    }
    taps.min(MAX_DOWNSAMPLING_TAPS)
}

pub(super) fn low_pass_fir(input: &[f32], from_rate: u32, to_rate: u32, taps: usize) -> Vec<f32> {
    if input.is_empty() || taps <= 1 {
        return input.to_vec();
    }

    let normalized_cutoff = (to_rate as f32 * 0.5 / from_rate as f32).min(0.499);
    let coeffs = design_low_pass(normalized_cutoff, taps);
    let half = taps / 2;
    let mut output = Vec::with_capacity(input.len());

    for n in 0..input.len() {
        let mut acc = 0.0;
        for (k, coeff) in coeffs.iter().enumerate() {
            if let Some(idx) = (n + k).checked_sub(half) {
                if let Some(sample) = input.get(idx) {
                    acc += *sample * coeff;
                }
            }
        }
        output.push(acc);
    }

    output
}

/// Resample a device-rate block and force it to exactly `desired_len` samples.
pub(super) fn convert_frame_to_target(
    frame: Vec<f32>,
    device_rate: u32,
    target_rate: u32,
    desired_len: usize,
) -> Vec<f32> {
    if device_rate == target_rate {
        return adjust_length(frame, desired_len);
    }
    adjust_length(resample(&frame, device_rate, target_rate), desired_len)
}

pub(crate) fn adjust_length(mut data: Vec<f32>, desired: usize) -> Vec<f32> {
    match data.len().cmp(&desired) {
        CmpOrdering::Greater => data.truncate(desired),
        CmpOrdering::Less => {
            let pad = data.last().copied().unwrap_or(0.0);
            data.resize(desired, pad);
        }
        CmpOrdering::Equal => {}
    }
    data
}

/// Normalized Hamming-windowed sinc taps.
pub(super) fn design_low_pass(normalized_cutoff: f32, taps: usize) -> Vec<f32> {
    let mut coeffs = Vec::with_capacity(taps);
    let m = (taps.max(2) - 1) as f32;

    for n in 0..taps {
        let centered = n as f32 - m / 2.0;
        let x = 2.0 * PI * normalized_cutoff * centered;
        let sinc = if centered == 0.0 {
            2.0 * normalized_cutoff
        } else {
            (2.0 * normalized_cutoff * x.sin()) / x
        };
        let window = if taps <= 1 {
            1.0
        } else {
            0.54 - 0.46 * ((2.0 * PI * n as f32) / m).cos()
        };
        coeffs.push(sinc * window);
    }

    let sum: f32 = coeffs.iter().sum();
    if sum != 0.0 {
        for coeff in coeffs.iter_mut() {
            *coeff /= sum;
        }
    }

    coeffs
}
