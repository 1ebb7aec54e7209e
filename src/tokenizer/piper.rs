use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Deserialize;

use super::{tokenize_with, PhonemeIdMap, SymbolRules, TokenizedSentence, TokenizerStrategy};
use super::{PhonemeSource, VoiceDescriptor};
use crate::error::{Result, TtsError};
use crate::inference::{DType, TensorArena};

pub const DEFAULT_NOISE_SCALE: f32 = 0.667;
pub const DEFAULT_NOISE_W: f32 = 0.8;

const RULES: SymbolRules = SymbolRules {
    pad: '_',
    bos: '^',
    eos: '$',
    intersperse_pad: true,
    add_bos: true,
    add_eos: true,
};

const INPUT_TYPES: [DType; 3] = [DType::Int64, DType::Int64, DType::Float32];

/// Piper VITS voices.
///
/// Inputs are `tokens [1, N]`, `lengths [1]`, `scales [3]` holding
/// `(noise_scale, length_scale, noise_w)`, and for multi-speaker models a
/// speaker id `[1]` clamped to the speaker table.
#[derive(Debug, Clone)]
pub struct PiperTokenizer {
    descriptor: VoiceDescriptor,
    vocab: PhonemeIdMap,
    pub noise_scale: f32,
    pub noise_w: f32,
}

impl PiperTokenizer {
    pub fn new(descriptor: VoiceDescriptor, vocab: PhonemeIdMap) -> Self {
        Self {
            descriptor,
            vocab,
            noise_scale: DEFAULT_NOISE_SCALE,
            noise_w: DEFAULT_NOISE_W,
        }
    }

    /// Read a Piper `.onnx.json` voice config.
    pub fn from_config_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let tokenizer = Self::from_config_str(&content)?;
        log::info!(
            "Imported Piper voice config {} ({} phonemes, {} speakers)",
            path.display(),
            tokenizer.vocab.len(),
            tokenizer.descriptor.speakers.len()
        );
        Ok(tokenizer)
    }

    pub fn from_config_str(json: &str) -> Result<Self> {
        let config: PiperConfig = serde_json::from_str(json)
            .map_err(|e| TtsError::ModelImport(format!("invalid Piper config: {e}")))?;

        let vocab = PhonemeIdMap::from_table(config.phoneme_id_map);
        if vocab.is_empty() {
            return Err(TtsError::ModelImport("phoneme_id_map is empty".to_string()));
        }

        let mut descriptor = VoiceDescriptor::default();
        if let Some(rate) = config.audio.sample_rate {
            descriptor.sample_rate = rate;
        }
        if let Some(voice) = config.espeak.voice {
            descriptor.espeak_voice = voice;
        }
        if let Some(scale) = config.inference.length_scale {
            descriptor.speed = scale;
        }
        descriptor.language_code = config.language.code.unwrap_or_default();
        descriptor.language_family = config.language.family.unwrap_or_default();
        if config.num_speakers > 1 {
            descriptor.speakers = config.speaker_id_map;
        }

        Ok(Self {
            descriptor,
            vocab,
            noise_scale: config.inference.noise_scale.unwrap_or(DEFAULT_NOISE_SCALE),
            noise_w: config.inference.noise_w.unwrap_or(DEFAULT_NOISE_W),
        })
    }

    pub fn vocab(&self) -> &PhonemeIdMap {
        &self.vocab
    }

    pub fn set_phoneme_source(&mut self, source: PhonemeSource) {
        self.descriptor.phoneme_source = source;
    }

    fn clamp_speaker(&self, speaker_id: i64) -> i64 {
        let min = self.descriptor.speakers.values().copied().min();
        let max = self.descriptor.speakers.values().copied().max();
        match (min, max) {
            (Some(min), Some(max)) => speaker_id.clamp(min, max),
            _ => 0,
        }
    }
}

impl TokenizerStrategy for PiperTokenizer {
    fn descriptor(&self) -> &VoiceDescriptor {
        &self.descriptor
    }

    fn descriptor_mut(&mut self) -> &mut VoiceDescriptor {
        &mut self.descriptor
    }

    fn tokenize(
        &self,
        phonemes: &[char],
        is_first: bool,
        is_last: bool,
    ) -> Result<TokenizedSentence> {
        tokenize_with(&self.vocab, &RULES, phonemes, is_first, is_last)
    }

    fn build_model_inputs(
        &self,
        arena: &mut TensorArena,
        tokens: &[i64],
        speaker_id: i64,
        speed: f32,
    ) -> Result<()> {
        if !arena.accepts(&INPUT_TYPES) {
            return Err(TtsError::Inference(
                "invalid input tensor parameters for a Piper model".to_string(),
            ));
        }

        let n = tokens.len();
        arena.set_input_i64(0, tokens, &[1, n])?;
        arena.set_input_i64(1, &[n as i64], &[1])?;
        arena.set_input_f32(2, &[self.noise_scale, speed, self.noise_w], &[3])?;
        if arena.input_count() > 3 {
            arena.set_input_i64(3, &[self.clamp_speaker(speaker_id)], &[1])?;
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct PiperConfig {
    audio: AudioSection,
    espeak: EspeakSection,
    inference: InferenceSection,
    phoneme_id_map: HashMap<String, Vec<i64>>,
    num_speakers: u32,
    speaker_id_map: BTreeMap<String, i64>,
    language: LanguageSection,
}

#[derive(Deserialize)]
struct AudioSection {
    sample_rate: Option<u32>,
}

#[derive(Deserialize)]
struct EspeakSection {
    voice: Option<String>,
}

#[derive(Deserialize)]
struct InferenceSection {
    noise_scale: Option<f32>,
    length_scale: Option<f32>,
    noise_w: Option<f32>,
}

#[derive(Deserialize)]
struct LanguageSection {
    code: Option<String>,
    family: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::PiperTokenizer;
    use crate::inference::{DType, TensorArena, TensorData};
    use crate::tokenizer::TokenizerStrategy;

    const CONFIG: &str = r#"{
        "audio": { "sample_rate": 16000 },
        "espeak": { "voice": "de" },
        "inference": { "noise_scale": 0.5, "length_scale": 1.2, "noise_w": 0.7 },
        "phoneme_id_map": { "_": [0], "^": [1], "$": [2], "a": [14], "b": [15] },
        "num_speakers": 3,
        "speaker_id_map": { "anna": 0, "ben": 1, "carl": 2 },
        "language": { "code": "de_DE", "family": "de" }
    }"#;

    #[test]
    fn imports_voice_config() {
        let t = PiperTokenizer::from_config_str(CONFIG).unwrap();
        let d = t.descriptor();
        assert_eq!(d.sample_rate, 16000);
        assert_eq!(d.espeak_voice, "de");
        assert_eq!(d.speed, 1.2);
        assert_eq!(d.language_code, "de_DE");
        assert_eq!(d.speakers.len(), 3);
        assert_eq!(t.noise_scale, 0.5);
        assert_eq!(t.noise_w, 0.7);
    }

    #[test]
    fn single_speaker_config_has_no_speaker_table() {
        let json = CONFIG.replace("\"num_speakers\": 3", "\"num_speakers\": 1");
        let t = PiperTokenizer::from_config_str(&json).unwrap();
        assert!(t.descriptor().speakers.is_empty());
    }

    #[test]
    fn missing_section_is_rejected() {
        assert!(PiperTokenizer::from_config_str(r#"{ "audio": {} }"#).is_err());
    }

    #[test]
    fn builds_inputs_with_clamped_speaker() {
        let t = PiperTokenizer::from_config_str(CONFIG).unwrap();
        let mut arena = TensorArena::new(
            &[DType::Int64, DType::Int64, DType::Float32, DType::Int64],
            1,
        );
        t.build_model_inputs(&mut arena, &[1, 0, 14, 0, 2], 9, 1.2)
            .unwrap();

        let tokens = arena.input(0).unwrap();
        assert_eq!(tokens.shape, vec![1, 5]);
        assert_eq!(arena.input(1).unwrap().data, TensorData::Int64(vec![5]));
        assert_eq!(
            arena.input(2).unwrap().data,
            TensorData::Float32(vec![0.5, 1.2, 0.7])
        );
        assert_eq!(arena.input(3).unwrap().data, TensorData::Int64(vec![2]));
    }

    #[test]
    fn rejects_mismatched_model_inputs() {
        let t = PiperTokenizer::from_config_str(CONFIG).unwrap();
        let mut arena = TensorArena::new(&[DType::Int64, DType::Float32, DType::Float32], 1);
        assert!(t.build_model_inputs(&mut arena, &[1], 0, 1.0).is_err());
    }
}
