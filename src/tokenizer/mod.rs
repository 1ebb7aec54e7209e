//! Model-family tokenization.
//!
//! A voice model family decides how phoneme sentences become token ids, how
//! those ids and the voice parameters are laid out as model inputs, and how
//! the raw waveform is turned into 16-bit audio. Each family implements
//! [`TokenizerStrategy`]; the closed set of families is the [`Tokenizer`]
//! enum. The synthesis pipeline only talks to the trait.
//!
//! | Family | pad/bos/eos | Interspersed pad | Inputs |
//! |---|---|---|---|
//! | Piper | `_` `^` `$` | yes | tokens, lengths, scales, optional speaker |
//! | Kokoro | `$` `$` `$` | no | tokens, style vector, speed |

pub mod kokoro;
pub mod piper;
pub mod vocab;
pub mod voices;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TtsError};
use crate::inference::TensorArena;
use crate::{audio, PhonemeSentence, SynthesisResult};

pub use kokoro::KokoroTokenizer;
pub use piper::PiperTokenizer;
pub use vocab::PhonemeIdMap;

/// Where a model's phonemes come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhonemeSource {
    /// Dictionary lookup, falling back to neural G2P for unknown words.
    #[default]
    Dictionary,
    /// Neural G2P for every word.
    Neural,
}

/// Voice parameters shared by all model families.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceDescriptor {
    pub sample_rate: u32,
    pub espeak_voice: String,
    pub language_code: String,
    pub language_family: String,
    /// Speaker name to speaker id.
    pub speakers: BTreeMap<String, i64>,
    pub sentence_silence_seconds: f32,
    pub speed: f32,
    pub base_speed_multiplier: f32,
    pub phoneme_source: PhonemeSource,
    /// Treat every character of the input as its own word.
    pub characters_as_words: bool,
}

impl Default for VoiceDescriptor {
    fn default() -> Self {
        Self {
            sample_rate: 22050,
            espeak_voice: "en-us".to_string(),
            language_code: String::new(),
            language_family: String::new(),
            speakers: BTreeMap::new(),
            sentence_silence_seconds: 0.2,
            speed: 1.0,
            base_speed_multiplier: 1.0,
            phoneme_source: PhonemeSource::Dictionary,
            characters_as_words: false,
        }
    }
}

/// Token ids for one sentence plus the phonemes the vocabulary lacked.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenizedSentence {
    pub tokens: Vec<i64>,
    pub missed: HashMap<char, usize>,
}

/// Special symbols and padding rules of a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolRules {
    pub pad: char,
    pub bos: char,
    pub eos: char,
    pub intersperse_pad: bool,
    pub add_bos: bool,
    pub add_eos: bool,
}

/// Behavior that differs between model families.
pub trait TokenizerStrategy: Send {
    fn descriptor(&self) -> &VoiceDescriptor;

    fn descriptor_mut(&mut self) -> &mut VoiceDescriptor;

    /// Reject speaker ids the model cannot serve.
    fn check_speaker(&self, _speaker_id: i64) -> Result<()> {
        Ok(())
    }

    /// Phonemizer language for a speaker.
    fn espeak_code(&self, _speaker_id: i64) -> &str {
        &self.descriptor().espeak_voice
    }

    /// Regroup sentences before tokenization.
    fn group_sentences(&self, sentences: Vec<PhonemeSentence>) -> Vec<PhonemeSentence> {
        sentences
    }

    /// Map one sentence to token ids. `is_first` and `is_last` control the
    /// begin and end markers.
    fn tokenize(
        &self,
        phonemes: &[char],
        is_first: bool,
        is_last: bool,
    ) -> Result<TokenizedSentence>;

    /// Write the model inputs for one sentence into `arena`.
    fn build_model_inputs(
        &self,
        arena: &mut TensorArena,
        tokens: &[i64],
        speaker_id: i64,
        speed: f32,
    ) -> Result<()>;

    /// Convert the assembled float audio into 16-bit samples.
    fn post_process(&self, result: &mut SynthesisResult) {
        result.pcm_i16 = audio::normalize_to_i16(&result.pcm_f32);
    }
}

/// Tokenize with a vocabulary and symbol rules.
///
/// With interspersed padding, a pad follows the begin marker and every
/// phoneme. Phonemes missing from the vocabulary are skipped and counted.
pub fn tokenize_with(
    vocab: &PhonemeIdMap,
    rules: &SymbolRules,
    phonemes: &[char],
    is_first: bool,
    is_last: bool,
) -> Result<TokenizedSentence> {
    let mut out = TokenizedSentence::default();
    let pad = if rules.intersperse_pad {
        vocab.get(rules.pad)
    } else {
        None
    };

    if is_first && rules.add_bos {
        if let Some(bos) = vocab.get(rules.bos) {
            out.tokens.extend_from_slice(bos);
            if let Some(pad) = pad {
                out.tokens.extend_from_slice(pad);
            }
        }
    }

    for &phoneme in phonemes {
        match vocab.get(phoneme) {
            Some(ids) => {
                out.tokens.extend_from_slice(ids);
                if let Some(pad) = pad {
                    out.tokens.extend_from_slice(pad);
                }
            }
            None => *out.missed.entry(phoneme).or_insert(0) += 1,
        }
    }

    if is_last && rules.add_eos {
        if let Some(eos) = vocab.get(rules.eos) {
            out.tokens.extend_from_slice(eos);
        }
    }

    if out.tokens.is_empty() {
        return Err(TtsError::Tokenization(format!(
            "no tokens produced for {} phonemes",
            phonemes.len()
        )));
    }
    Ok(out)
}

/// The supported model families.
pub enum Tokenizer {
    Piper(PiperTokenizer),
    Kokoro(KokoroTokenizer),
}

impl Tokenizer {
    fn strategy(&self) -> &dyn TokenizerStrategy {
        match self {
            Tokenizer::Piper(t) => t,
            Tokenizer::Kokoro(t) => t,
        }
    }

    fn strategy_mut(&mut self) -> &mut dyn TokenizerStrategy {
        match self {
            Tokenizer::Piper(t) => t,
            Tokenizer::Kokoro(t) => t,
        }
    }

    pub fn family(&self) -> &'static str {
        match self {
            Tokenizer::Piper(_) => "piper",
            Tokenizer::Kokoro(_) => "kokoro",
        }
    }
}

impl From<PiperTokenizer> for Tokenizer {
    fn from(t: PiperTokenizer) -> Self {
        Tokenizer::Piper(t)
    }
}

impl From<KokoroTokenizer> for Tokenizer {
    fn from(t: KokoroTokenizer) -> Self {
        Tokenizer::Kokoro(t)
    }
}

impl TokenizerStrategy for Tokenizer {
    fn descriptor(&self) -> &VoiceDescriptor {
        self.strategy().descriptor()
    }

    fn descriptor_mut(&mut self) -> &mut VoiceDescriptor {
        self.strategy_mut().descriptor_mut()
    }

    fn check_speaker(&self, speaker_id: i64) -> Result<()> {
        self.strategy().check_speaker(speaker_id)
    }

    fn espeak_code(&self, speaker_id: i64) -> &str {
        self.strategy().espeak_code(speaker_id)
    }

    fn group_sentences(&self, sentences: Vec<PhonemeSentence>) -> Vec<PhonemeSentence> {
        self.strategy().group_sentences(sentences)
    }

    fn tokenize(
        &self,
        phonemes: &[char],
        is_first: bool,
        is_last: bool,
    ) -> Result<TokenizedSentence> {
        self.strategy().tokenize(phonemes, is_first, is_last)
    }

    fn build_model_inputs(
        &self,
        arena: &mut TensorArena,
        tokens: &[i64],
        speaker_id: i64,
        speed: f32,
    ) -> Result<()> {
        self.strategy()
            .build_model_inputs(arena, tokens, speaker_id, speed)
    }

    fn post_process(&self, result: &mut SynthesisResult) {
        self.strategy().post_process(result)
    }
}

#[cfg(test)]
mod tests {
    use super::{tokenize_with, PhonemeIdMap, SymbolRules};
    use crate::error::ErrorKind;

    fn vocab() -> PhonemeIdMap {
        PhonemeIdMap::from_table([
            ("_", vec![0]),
            ("^", vec![1]),
            ("$", vec![2]),
            ("h", vec![20]),
            ("i", vec![21]),
        ])
    }

    const PIPER: SymbolRules = SymbolRules {
        pad: '_',
        bos: '^',
        eos: '$',
        intersperse_pad: true,
        add_bos: true,
        add_eos: true,
    };

    #[test]
    fn intersperses_pad_between_markers() {
        let out = tokenize_with(&vocab(), &PIPER, &['h', 'i'], true, true).unwrap();
        assert_eq!(out.tokens, vec![1, 0, 20, 0, 21, 0, 2]);
        assert!(out.missed.is_empty());
    }

    #[test]
    fn markers_only_on_first_and_last() {
        let out = tokenize_with(&vocab(), &PIPER, &['h'], false, false).unwrap();
        assert_eq!(out.tokens, vec![20, 0]);
    }

    #[test]
    fn counts_missed_phonemes() {
        let out = tokenize_with(&vocab(), &PIPER, &['h', 'x', 'x', 'y'], false, true).unwrap();
        assert_eq!(out.tokens, vec![20, 0, 2]);
        assert_eq!(out.missed.get(&'x'), Some(&2));
        assert_eq!(out.missed.get(&'y'), Some(&1));
    }

    #[test]
    fn all_unknown_without_markers_fails() {
        let rules = SymbolRules {
            intersperse_pad: false,
            ..PIPER
        };
        let err = tokenize_with(&vocab(), &rules, &['x', 'y'], false, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PhonemizationFailure);
    }
}
