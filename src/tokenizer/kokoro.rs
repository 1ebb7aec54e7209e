use std::path::Path;

use super::voices::{self, KokoroVoice, STYLE_DIM};
use super::{tokenize_with, vocab, PhonemeIdMap, SymbolRules, TokenizedSentence};
use super::{TokenizerStrategy, VoiceDescriptor};
use crate::error::{Result, TtsError};
use crate::inference::{DType, TensorArena};
use crate::PhonemeSentence;

/// Output sample rate of Kokoro models.
pub const SAMPLE_RATE: u32 = 24000;

/// Kokoro output runs about three times longer per token than Piper.
pub const BASE_SPEED_MULTIPLIER: f32 = 3.0;

/// Phonemes per batch, keeping the token count under the 510 model limit.
pub const MAX_BATCH_PHONEMES: usize = 480;

const RULES: SymbolRules = SymbolRules {
    pad: '$',
    bos: '$',
    eos: '$',
    intersperse_pad: false,
    add_bos: true,
    add_eos: true,
};

const INPUT_TYPES: [DType; 3] = [DType::Int64, DType::Float32, DType::Float32];

/// Kokoro-82M voices.
///
/// Inputs are `tokens [1, N]`, a `[1, 256]` style vector picked from the
/// speaker's voice by token count, and `speed [1]`. Each speaker is one
/// voice, and its name prefix selects the phonemizer language.
#[derive(Debug, Clone)]
pub struct KokoroTokenizer {
    descriptor: VoiceDescriptor,
    vocab: PhonemeIdMap,
    rules: SymbolRules,
    voices: Vec<KokoroVoice>,
}

impl Default for KokoroTokenizer {
    fn default() -> Self {
        Self::new(vocab::kokoro_default_vocab())
    }
}

impl KokoroTokenizer {
    pub fn new(vocab: PhonemeIdMap) -> Self {
        let descriptor = VoiceDescriptor {
            sample_rate: SAMPLE_RATE,
            espeak_voice: String::new(),
            sentence_silence_seconds: 0.0,
            speed: 1.0,
            base_speed_multiplier: BASE_SPEED_MULTIPLIER,
            ..VoiceDescriptor::default()
        };
        Self {
            descriptor,
            vocab,
            rules: RULES,
            voices: Vec::new(),
        }
    }

    /// Read a Hugging Face `tokenizer.json`. The `normalizer`,
    /// `post_processor` and `model.vocab` objects are required.
    pub fn from_tokenizer_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let tokenizer = Self::from_tokenizer_str(&content)?;
        log::info!(
            "Imported Kokoro tokenizer {} ({} phonemes)",
            path.display(),
            tokenizer.vocab.len()
        );
        Ok(tokenizer)
    }

    pub fn from_tokenizer_str(json: &str) -> Result<Self> {
        let root: serde_json::Value = serde_json::from_str(json)?;
        for section in ["normalizer", "post_processor", "model"] {
            if !root.get(section).is_some_and(|v| v.is_object()) {
                return Err(TtsError::ModelImport(format!(
                    "tokenizer.json is missing the '{section}' object"
                )));
            }
        }
        let vocab = root
            .pointer("/model/vocab")
            .ok_or_else(|| TtsError::ModelImport("Missing 'model.vocab' field".to_string()))?;
        Ok(Self::new(vocab::vocab_from_json(vocab)?))
    }

    /// Read the vocabulary from a Kokoro `config.json`.
    pub fn from_config_file(path: &Path) -> Result<Self> {
        Ok(Self::new(vocab::load_vocab(path)?))
    }

    /// Interleave a pad after every phoneme. Halves the batch size.
    pub fn set_intersperse_pad(&mut self, enabled: bool) {
        self.rules.intersperse_pad = enabled;
    }

    pub fn max_batch_phonemes(&self) -> usize {
        if self.rules.intersperse_pad {
            MAX_BATCH_PHONEMES / 2
        } else {
            MAX_BATCH_PHONEMES
        }
    }

    /// Add a voice, replacing any voice with the same name. Returns the
    /// speaker id.
    pub fn add_voice(&mut self, voice: KokoroVoice) -> i64 {
        let id = match self.voices.iter().position(|v| v.name == voice.name) {
            Some(index) => {
                self.voices[index] = voice;
                index
            }
            None => {
                self.voices.push(voice);
                self.voices.len() - 1
            }
        };
        self.sync_speakers();
        id as i64
    }

    /// Import a raw `.bin` voice file named after the voice.
    pub fn import_voice_file(&mut self, path: &Path) -> Result<i64> {
        let voice = voices::read_voice_bin(path)?;
        log::info!(
            "Imported voice '{}' ({} style vectors, espeak '{}')",
            voice.name,
            voice.style_count(),
            voice.espeak_code
        );
        Ok(self.add_voice(voice))
    }

    /// Import every voice of a `.npz` voice archive.
    pub fn import_voice_archive(&mut self, path: &Path) -> Result<usize> {
        let voices = voices::read_voice_npz(path)?;
        let count = voices.len();
        for voice in voices {
            self.add_voice(voice);
        }
        Ok(count)
    }

    /// Remove a speaker. Ids above it shift down by one.
    pub fn delete_speaker(&mut self, speaker_id: i64) -> bool {
        let Some(index) = self.voice_index(speaker_id) else {
            return false;
        };
        self.voices.remove(index);
        self.sync_speakers();
        true
    }

    pub fn clear_speakers(&mut self) {
        self.voices.clear();
        self.sync_speakers();
    }

    pub fn voice(&self, speaker_id: i64) -> Option<&KokoroVoice> {
        self.voice_index(speaker_id).map(|i| &self.voices[i])
    }

    /// List all voice names in speaker-id order.
    pub fn list_voices(&self) -> Vec<&str> {
        self.voices.iter().map(|v| v.name.as_str()).collect()
    }

    fn require_voice(&self, speaker_id: i64) -> Result<&KokoroVoice> {
        self.voice(speaker_id).ok_or(TtsError::InvalidSpeaker {
            speaker_id,
            available: self.voices.len(),
        })
    }

    fn voice_index(&self, speaker_id: i64) -> Option<usize> {
        usize::try_from(speaker_id)
            .ok()
            .filter(|&i| i < self.voices.len())
    }

    fn sync_speakers(&mut self) {
        self.descriptor.speakers = self
            .voices
            .iter()
            .enumerate()
            .map(|(id, v)| (v.name.clone(), id as i64))
            .collect();
    }
}

/// Pack sentences into batches of at most `max` phonemes. Sentences are
/// never split unless one alone exceeds `max`.
pub fn group_phonemes(sentences: Vec<PhonemeSentence>, max: usize) -> Vec<PhonemeSentence> {
    let mut batches = Vec::new();
    let mut combined: PhonemeSentence = Vec::new();

    for sentence in sentences {
        if combined.len() + sentence.len() > max {
            if !combined.is_empty() {
                batches.push(std::mem::take(&mut combined));
            }
            combined = sentence;
        } else {
            combined.extend(sentence);
        }

        while combined.len() > max {
            let rest = combined.split_off(max);
            batches.push(std::mem::replace(&mut combined, rest));
        }
    }

    if !combined.is_empty() {
        log::debug!("Added batch of size [{}]", combined.len());
        batches.push(combined);
    }
    batches
}

impl TokenizerStrategy for KokoroTokenizer {
    fn descriptor(&self) -> &VoiceDescriptor {
        &self.descriptor
    }

    fn descriptor_mut(&mut self) -> &mut VoiceDescriptor {
        &mut self.descriptor
    }

    fn check_speaker(&self, speaker_id: i64) -> Result<()> {
        self.require_voice(speaker_id).map(|_| ())
    }

    fn espeak_code(&self, speaker_id: i64) -> &str {
        match self.voice(speaker_id) {
            Some(voice) => &voice.espeak_code,
            None => &self.descriptor.espeak_voice,
        }
    }

    fn group_sentences(&self, sentences: Vec<PhonemeSentence>) -> Vec<PhonemeSentence> {
        group_phonemes(sentences, self.max_batch_phonemes())
    }

    fn tokenize(
        &self,
        phonemes: &[char],
        is_first: bool,
        is_last: bool,
    ) -> Result<TokenizedSentence> {
        tokenize_with(&self.vocab, &self.rules, phonemes, is_first, is_last)
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
                "invalid input tensor parameters for a Kokoro model".to_string(),
            ));
        }
        let voice = self.require_voice(speaker_id)?;

        let n = tokens.len();
        arena.set_input_i64(0, tokens, &[1, n])?;
        arena.set_input_f32(1, voice.style_for(n), &[1, STYLE_DIM])?;
        arena.set_input_f32(2, &[speed], &[1])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{group_phonemes, KokoroTokenizer};
    use crate::error::ErrorKind;
    use crate::inference::{DType, TensorArena, TensorData};
    use crate::tokenizer::voices::{KokoroVoice, STYLE_DIM};
    use crate::tokenizer::TokenizerStrategy;

    fn sentence(len: usize) -> Vec<char> {
        vec!['a'; len]
    }

    fn voice(name: &str, fill: f32) -> KokoroVoice {
        KokoroVoice::new(name, vec![fill; STYLE_DIM * 2]).unwrap()
    }

    #[test]
    fn groups_sentences_under_ceiling() {
        let batches = group_phonemes(vec![sentence(200), sentence(200), sentence(200)], 480);
        let lens: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(lens, vec![400, 200]);
    }

    #[test]
    fn splits_oversize_sentence_at_ceiling() {
        let batches = group_phonemes(vec![sentence(10), sentence(1000)], 480);
        let lens: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(lens, vec![10, 480, 480, 40]);
    }

    #[test]
    fn interspersing_halves_batch_size() {
        let mut t = KokoroTokenizer::default();
        assert_eq!(t.max_batch_phonemes(), 480);
        t.set_intersperse_pad(true);
        assert_eq!(t.max_batch_phonemes(), 240);
    }

    #[test]
    fn wraps_sentence_in_dollar_markers() {
        let t = KokoroTokenizer::default();
        let out = t.tokenize(&['h', 'ə'], true, true).unwrap();
        assert_eq!(out.tokens, vec![0, 50, 83, 0]);
    }

    #[test]
    fn speaker_ids_shift_after_delete() {
        let mut t = KokoroTokenizer::default();
        assert_eq!(t.add_voice(voice("af_heart", 0.0)), 0);
        assert_eq!(t.add_voice(voice("bf_emma", 1.0)), 1);
        assert_eq!(t.add_voice(voice("jf_alpha", 2.0)), 2);
        assert_eq!(t.add_voice(voice("bf_emma", 3.0)), 1);
        assert_eq!(t.espeak_code(1), "en-gb");
        assert_eq!(t.espeak_code(7), "");

        assert!(t.delete_speaker(1));
        assert_eq!(t.descriptor().speakers.get("jf_alpha"), Some(&1));
        assert_eq!(t.espeak_code(1), "ja");
        assert!(!t.delete_speaker(5));

        t.clear_speakers();
        assert!(t.descriptor().speakers.is_empty());
    }

    #[test]
    fn builds_style_input_from_speaker_voice() {
        let mut t = KokoroTokenizer::default();
        t.add_voice(voice("af_heart", 0.25));
        let mut arena = TensorArena::new(&[DType::Int64, DType::Float32, DType::Float32], 1);
        t.build_model_inputs(&mut arena, &[0, 50, 0], 0, 1.1).unwrap();

        let style = arena.input(1).unwrap();
        assert_eq!(style.shape, vec![1, STYLE_DIM]);
        assert_eq!(style.data, TensorData::Float32(vec![0.25; STYLE_DIM]));
        assert_eq!(arena.input(2).unwrap().data, TensorData::Float32(vec![1.1]));
    }

    #[test]
    fn unknown_speaker_fails() {
        let t = KokoroTokenizer::default();
        let mut arena = TensorArena::new(&[DType::Int64, DType::Float32, DType::Float32], 1);
        let err = t.build_model_inputs(&mut arena, &[0], 3, 1.0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn imports_tokenizer_json() {
        let json = r#"{
            "normalizer": { "type": "Replace" },
            "post_processor": {},
            "model": { "vocab": { "$": 0, "a": 43 } }
        }"#;
        let t = KokoroTokenizer::from_tokenizer_str(json).unwrap();
        assert_eq!(t.descriptor().sample_rate, 24000);
        assert_eq!(t.descriptor().sentence_silence_seconds, 0.0);
        assert_eq!(t.tokenize(&['a'], true, false).unwrap().tokens, vec![0, 43]);

        assert!(KokoroTokenizer::from_tokenizer_str(r#"{ "model": {} }"#).is_err());
    }
}
