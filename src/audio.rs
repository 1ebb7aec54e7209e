//! Sample-level helpers for assembling synthesized sentences into one clip.

/// Full-scale value for 16-bit output.
pub const MAX_WAV_VALUE: f32 = 32767.0;

/// Peaks below this are treated as this value when normalizing.
pub const MIN_PEAK: f32 = 0.01;

/// Reference rate the buffer prediction is expressed in.
const PREDICTION_BASE_RATE: u32 = 22050;

/// Predicted samples per input token at the reference rate.
const SAMPLES_PER_TOKEN: usize = 900;

/// Number of silence samples for a pause of `seconds`, truncated.
pub fn silence_samples(seconds: f32, sample_rate: u32) -> usize {
    if seconds <= 0.0 {
        return 0;
    }
    (seconds * sample_rate as f32) as usize
}

/// Append one sentence of audio, followed by `silence` zero samples unless
/// it is the last sentence or produced nothing.
pub fn append_sentence(pcm: &mut Vec<f32>, samples: &[f32], silence: usize, is_last: bool) {
    if samples.is_empty() {
        return;
    }
    pcm.extend_from_slice(samples);
    if !is_last && silence > 0 {
        pcm.resize(pcm.len() + silence, 0.0);
    }
}

/// Linearly resample `input` from `from_rate` to `to_rate`.
pub fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if input.is_empty() || from_rate == 0 || to_rate == 0 {
        return Vec::new();
    }
    if from_rate == to_rate {
        return input.to_vec();
    }

    let out_len = (input.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let step = from_rate as f64 / to_rate as f64;
    let last = input.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = (pos.floor() as usize).min(last);
            let frac = (pos - idx as f64) as f32;
            let a = input[idx];
            let b = input[(idx + 1).min(last)];
            a + (b - a) * frac
        })
        .collect()
}

/// Scale so the loudest sample hits full scale, then truncate to 16 bits.
pub fn normalize_to_i16(pcm: &[f32]) -> Vec<i16> {
    let peak = pcm.iter().fold(MIN_PEAK, |peak, s| peak.max(s.abs()));
    let scale = MAX_WAV_VALUE / peak;
    pcm.iter().map(|&s| (s * scale) as i16).collect()
}

/// Plain `[-1, 1]` to 16-bit conversion, saturating at the ends.
pub fn quantize_to_i16(pcm: &[f32]) -> Vec<i16> {
    pcm.iter().map(|&s| (s * 32768.0) as i16).collect()
}

/// Expected output length for `tokens` input tokens.
///
/// The rate factor uses integer division, so rates below the reference rate
/// fall back to the floor of `2 * buffer_size`.
pub fn predict_output_len(
    tokens: usize,
    sample_rate: u32,
    base_multiplier: f32,
    speed: f32,
    buffer_size: usize,
) -> usize {
    let rate_factor = (sample_rate / PREDICTION_BASE_RATE) as usize;
    let predicted = (tokens * SAMPLES_PER_TOKEN * rate_factor) as f32 * base_multiplier * speed;
    (predicted as usize).max(buffer_size * 2)
}
