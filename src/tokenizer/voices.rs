use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{Result, TtsError};

/// Style vector dimension for Kokoro.
pub const STYLE_DIM: usize = 256;

/// One Kokoro voice: a flat list of 256-float style vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct KokoroVoice {
    pub name: String,
    pub espeak_code: String,
    styles: Vec<f32>,
}

impl KokoroVoice {
    pub fn new(name: impl Into<String>, styles: Vec<f32>) -> Result<Self> {
        let name = name.into();
        if styles.is_empty() || styles.len() % STYLE_DIM != 0 {
            return Err(TtsError::ModelImport(format!(
                "{name}: float count {} is not a positive multiple of {STYLE_DIM}",
                styles.len()
            )));
        }
        let espeak_code = match voice_lang(&name) {
            "" => name.get(..2).unwrap_or(&name).to_string(),
            code => code.to_string(),
        };
        Ok(Self {
            name,
            espeak_code,
            styles,
        })
    }

    /// Style vector for a sentence of `tokens` tokens. The offset wraps
    /// around the stored styles.
    pub fn style_for(&self, tokens: usize) -> &[f32] {
        let offset = (tokens * STYLE_DIM) % self.styles.len();
        &self.styles[offset..offset + STYLE_DIM]
    }

    pub fn style_count(&self) -> usize {
        self.styles.len() / STYLE_DIM
    }
}

/// Read a raw voice file: little-endian f32 values with no header.
pub fn read_voice_bin(path: &Path) -> Result<KokoroVoice> {
    let data = std::fs::read(path)?;
    if data.len() % 4 != 0 {
        return Err(TtsError::ModelImport(format!(
            "{}: length {} is not a multiple of 4",
            path.display(),
            data.len()
        )));
    }
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    KokoroVoice::new(name, le_floats(&data))
}

/// Load all voices from a .npz (numpy zip) archive.
///
/// Each entry is a .npy file named after the voice (e.g. `af_heart.npy`).
/// Voices are returned sorted by name.
pub fn read_voice_npz(path: &Path) -> Result<Vec<KokoroVoice>> {
    let file = File::open(path)?;
    let mut zip = zip::ZipArchive::new(file)?;

    let mut voices = Vec::new();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;

        let raw_name = entry.name().to_string();
        let voice_name = raw_name
            .trim_end_matches('/')
            .trim_end_matches(".npy")
            .to_string();

        if voice_name.is_empty() || raw_name.ends_with('/') {
            continue;
        }

        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;

        let styles = parse_npy(&data, &raw_name)?;
        voices.push(KokoroVoice::new(voice_name, styles)?);
    }

    voices.sort_by(|a, b| a.name.cmp(&b.name));
    log::info!("Loaded {} voices from {}", voices.len(), path.display());
    Ok(voices)
}

/// Map a voice name prefix to an espeak-ng language code.
///
/// Voice names follow the pattern `{prefix}_{name}` where the two-character
/// prefix encodes the language. Unknown prefixes map to an empty string.
pub fn voice_lang(voice: &str) -> &'static str {
    let prefix = voice.get(..2).unwrap_or(voice);
    match prefix {
        "af" | "am" => "en-us",
        "bf" | "bm" => "en-gb",
        "ef" | "em" => "es",
        "ff" => "fr-fr",
        "hf" | "hm" => "hi",
        "if" | "im" => "it",
        "jf" | "jm" => "ja",
        "pf" | "pm" => "pt-br",
        "zf" | "zm" => "cmn",
        _ => "",
    }
}

/// Parse a numpy .npy file holding a little-endian float32 array whose
/// element count is a multiple of the style dimension.
fn parse_npy(data: &[u8], name: &str) -> Result<Vec<f32>> {
    if data.len() < 10 {
        return Err(TtsError::ModelImport(format!(
            "{name}: file too short ({} bytes)",
            data.len()
        )));
    }

    if &data[0..6] != b"\x93NUMPY" {
        return Err(TtsError::ModelImport(format!(
            "{name}: invalid numpy magic bytes"
        )));
    }

    // major version at [6], minor at [7], header_len at [8..10]
    let header_len = u16::from_le_bytes([data[8], data[9]]) as usize;
    let data_offset = 10 + header_len;

    if data.len() < data_offset {
        return Err(TtsError::ModelImport(format!(
            "{name}: header truncated (need {data_offset} bytes, got {})",
            data.len()
        )));
    }

    let float_data = &data[data_offset..];
    if float_data.len() % 4 != 0 {
        return Err(TtsError::ModelImport(format!(
            "{name}: float data length {} is not a multiple of 4",
            float_data.len()
        )));
    }

    Ok(le_floats(float_data))
}

fn le_floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
