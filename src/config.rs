use std::path::{Path, PathBuf};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default output buffer floor, in samples.
pub const OUTPUT_BUFFER_SIZE: usize = 65536;

/// Process-wide synthesis settings.
///
/// Loaded once when the scheduler is created. Every field has a default, so a
/// settings file only needs to name the values it overrides:
///
/// ```json
/// { "target_sample_rate": 48000, "save_cached_wav": true }
/// ```
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(default, setter(into))]
#[serde(default)]
pub struct TtsSettings {
    /// Resample synthesized audio to `target_sample_rate`.
    pub resample_synthesized_audio: bool,
    pub target_sample_rate: u32,
    /// Write every successful result to `cache_dir` as a 16-bit WAV.
    pub save_cached_wav: bool,
    pub cache_dir: PathBuf,
    /// Lower bound for the per-sentence output buffer, in samples. The
    /// effective floor is twice this value.
    pub output_buffer_size: usize,
    /// Upper bound on G2P decode steps per word batch.
    pub g2p_max_steps: usize,
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            resample_synthesized_audio: true,
            target_sample_rate: 44100,
            save_cached_wav: false,
            cache_dir: PathBuf::from("Saved/CacheTTS"),
            output_buffer_size: OUTPUT_BUFFER_SIZE,
            g2p_max_steps: crate::phonemizer::g2p::MAX_DECODE_STEPS,
        }
    }
}

impl TtsSettings {
    /// Read settings from a JSON file. Missing keys keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings = serde_json::from_str(&content)?;
        log::info!("Loaded TTS settings from {}", path.display());
        Ok(settings)
    }
}

/// Per-request synthesis parameters.
#[derive(Debug, Clone, Default, PartialEq, Builder)]
#[builder(default)]
pub struct GenerateSettings {
    /// Speaker index into the model's speaker table.
    pub speaker_id: i64,
    /// Overrides the model's configured speed when set.
    #[builder(setter(strip_option))]
    pub speed: Option<f32>,
}
