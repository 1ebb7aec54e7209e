//! Batched neural grapheme-to-phoneme conversion.
//!
//! Words are fed as UTF-8 bytes (offset by [`CHAR_CODE_OFFSET`]) to an
//! encoder, then a decoder is stepped greedily: each step appends the
//! argmax token of the last sequence position for every word. Decoding
//! stops when every word has produced [`EOS_TOKEN`] or after the step
//! limit. Generated ids below the offset are control tokens and are
//! dropped when the phoneme strings are rebuilt.

use crate::error::{Result, TtsError};
use crate::inference::{BoundModel, InferenceEngine};

/// Default upper bound on decode steps.
pub const MAX_DECODE_STEPS: usize = 50;
pub const PAD_TOKEN: i64 = 0;
pub const EOS_TOKEN: i64 = 1;
/// Byte values are shifted by this to leave room for control tokens.
pub const CHAR_CODE_OFFSET: i64 = 3;

/// Per-position width reserved in the output buffers.
const HIDDEN_WIDTH: usize = 1024;

/// Padded byte ids and attention mask for a batch of words, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBatch {
    pub ids: Vec<i64>,
    pub mask: Vec<i64>,
    pub rows: usize,
    pub cols: usize,
}

impl TokenBatch {
    /// Encode `"{lang_tag} {word}"` for every word. Rows are padded with
    /// [`PAD_TOKEN`] to the longest row, with mask 0 over the padding.
    pub fn encode(lang_tag: &str, words: &[String]) -> Self {
        let rows: Vec<Vec<u8>> = words
            .iter()
            .map(|w| format!("{lang_tag} {w}").into_bytes())
            .collect();
        let cols = rows.iter().map(Vec::len).max().unwrap_or(0);

        let mut ids = vec![PAD_TOKEN; rows.len() * cols];
        let mut mask = vec![0; rows.len() * cols];
        for (r, bytes) in rows.iter().enumerate() {
            for (c, &b) in bytes.iter().enumerate() {
                ids[r * cols + c] = i64::from(b) + CHAR_CODE_OFFSET;
                mask[r * cols + c] = 1;
            }
        }

        Self {
            ids,
            mask,
            rows: rows.len(),
            cols,
        }
    }
}

/// Greedy decoding state for one batch.
#[derive(Debug, Clone)]
struct DecodeState {
    sequences: Vec<Vec<i64>>,
    finished: Vec<bool>,
}

impl DecodeState {
    fn new(batch: usize) -> Self {
        Self {
            sequences: vec![vec![PAD_TOKEN]; batch],
            finished: vec![false; batch],
        }
    }

    fn seq_len(&self) -> usize {
        self.sequences.first().map_or(0, Vec::len)
    }

    fn flat_ids(&self) -> Vec<i64> {
        self.sequences.concat()
    }

    /// Pick the next token for every row from `[batch, seq, vocab]` logits.
    /// Returns true once every row is finished; no token is appended then.
    fn advance(&mut self, logits: &[f32], shape: &[usize]) -> Result<bool> {
        let &[batch, seq, vocab] = shape else {
            return Err(TtsError::Phonemization(format!(
                "decoder logits have shape {shape:?}, expected [batch, seq, vocab]"
            )));
        };
        if batch != self.sequences.len() || seq == 0 || vocab == 0 {
            return Err(TtsError::Phonemization(format!(
                "decoder logits shape {shape:?} does not match batch of {}",
                self.sequences.len()
            )));
        }

        let mut next = Vec::with_capacity(batch);
        for row in 0..batch {
            let start = (row * seq + seq - 1) * vocab;
            let mut token = argmax(&logits[start..start + vocab]);
            if self.finished[row] {
                token = PAD_TOKEN;
            } else if token == EOS_TOKEN {
                self.finished[row] = true;
            }
            next.push(token);
        }

        if self.finished.iter().all(|&f| f) {
            return Ok(true);
        }
        for (sequence, token) in self.sequences.iter_mut().zip(next) {
            sequence.push(token);
        }
        Ok(false)
    }

    fn into_phonemes(self) -> Vec<String> {
        self.sequences
            .into_iter()
            .map(|sequence| {
                let bytes: Vec<u8> = sequence
                    .into_iter()
                    .filter(|&id| id >= CHAR_CODE_OFFSET)
                    .filter_map(|id| u8::try_from(id - CHAR_CODE_OFFSET).ok())
                    .collect();
                String::from_utf8_lossy(&bytes).into_owned()
            })
            .collect()
    }
}

/// Index of the largest value. Ties keep the first index.
fn argmax(values: &[f32]) -> i64 {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best as i64
}

/// Encoder/decoder G2P model pair.
pub struct G2pDecoder {
    encoder: BoundModel,
    decoder: BoundModel,
    max_steps: usize,
}

impl G2pDecoder {
    pub fn new(encoder: Box<dyn InferenceEngine>, decoder: Box<dyn InferenceEngine>) -> Self {
        Self {
            encoder: BoundModel::new(encoder),
            decoder: BoundModel::new(decoder),
            max_steps: MAX_DECODE_STEPS,
        }
    }

    pub fn set_max_steps(&mut self, max_steps: usize) {
        self.max_steps = max_steps;
    }

    /// Phoneme strings for `words`, in order. `lang_tag` is prepended to
    /// every word, see [`language_tag`](super::lang::language_tag).
    ///
    /// A failed encoder or decoder run fails the whole batch. Output buffers
    /// are released either way.
    pub fn decode(&mut self, lang_tag: &str, words: &[String]) -> Result<Vec<String>> {
        if words.is_empty() {
            return Ok(Vec::new());
        }

        let result = self.run_batch(&TokenBatch::encode(lang_tag, words));
        self.encoder.arena_mut().release_outputs();
        self.decoder.arena_mut().release_outputs();
        result
    }

    fn run_batch(&mut self, batch: &TokenBatch) -> Result<Vec<String>> {
        let dims = [batch.rows, batch.cols];

        let arena = self.encoder.arena_mut();
        arena.set_input_i64(0, &batch.ids, &dims)?;
        arena.set_input_i64(1, &batch.mask, &dims)?;
        arena.ensure_output(0, batch.rows * batch.cols * HIDDEN_WIDTH);
        let encoded = self
            .encoder
            .run()
            .map_err(|e| TtsError::Phonemization(format!("G2P encoder failed: {e}")))?;
        let hidden = encoded.values().to_vec();
        let hidden_shape = encoded.shape.clone();
        log::debug!("G2P encoder output shape {hidden_shape:?}");

        let mut state = DecodeState::new(batch.rows);
        for step in 0..self.max_steps {
            let arena = self.decoder.arena_mut();
            arena.set_input_i64(0, &batch.mask, &dims)?;
            arena.set_input_i64(1, &state.flat_ids(), &[batch.rows, state.seq_len()])?;
            arena.set_input_f32(2, &hidden, &hidden_shape)?;
            arena.ensure_output(0, batch.rows * HIDDEN_WIDTH * (step + 1));

            let logits = self
                .decoder
                .run()
                .map_err(|e| TtsError::Phonemization(format!("G2P decoder failed: {e}")))?;
            if state.advance(logits.values(), &logits.shape)? {
                break;
            }
        }

        Ok(state.into_phonemes())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::{
        argmax, DecodeState, G2pDecoder, TokenBatch, CHAR_CODE_OFFSET, EOS_TOKEN, PAD_TOKEN,
    };
    use crate::dictionary::DictionaryStore;
    use crate::error::{ErrorKind, Result, TtsError};
    use crate::inference::{DType, InferenceEngine, InputTensor, OutputTensor};
    use crate::phonemizer::{PhonemizeOptions, Phonemizer};

    /// Counts its runs. Fails every run when `fails` is set, otherwise
    /// writes a single value.
    struct Stage {
        input_types: Vec<DType>,
        fails: bool,
        runs: Arc<AtomicUsize>,
    }

    impl Stage {
        fn encoder(fails: bool) -> (Self, Arc<AtomicUsize>) {
            Self::with_inputs(vec![DType::Int64, DType::Int64], fails)
        }

        fn decoder(fails: bool) -> (Self, Arc<AtomicUsize>) {
            Self::with_inputs(vec![DType::Int64, DType::Int64, DType::Float32], fails)
        }

        fn with_inputs(input_types: Vec<DType>, fails: bool) -> (Self, Arc<AtomicUsize>) {
            let runs = Arc::new(AtomicUsize::new(0));
            let stage = Self {
                input_types,
                fails,
                runs: runs.clone(),
            };
            (stage, runs)
        }
    }

    impl InferenceEngine for Stage {
        fn input_types(&self) -> &[DType] {
            &self.input_types
        }

        fn run(&mut self, _inputs: &[InputTensor], outputs: &mut [OutputTensor]) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fails {
                return Err(TtsError::Inference("session aborted".to_string()));
            }
            outputs[0].shape = vec![1, 1, 1];
            outputs[0].data[0] = 0.0;
            Ok(())
        }
    }

    fn output_capacity(decoder: &G2pDecoder) -> (usize, usize) {
        let capacity = |model: &crate::inference::BoundModel| {
            model.arena().output(0).map_or(0, OutputTensor::capacity)
        };
        (capacity(&decoder.encoder), capacity(&decoder.decoder))
    }

    fn words(list: &[&str]) -> Vec<String> {
        list.iter().map(|w| w.to_string()).collect()
    }

    fn one_hot(batch: &[i64], seq: usize, vocab: usize) -> Vec<f32> {
        let mut logits = vec![0.0; batch.len() * seq * vocab];
        for (row, &token) in batch.iter().enumerate() {
            logits[(row * seq + seq - 1) * vocab + token as usize] = 1.0;
        }
        logits
    }

    #[test]
    fn encodes_tagged_words_with_padding() {
        let batch = TokenBatch::encode("<x>:", &["ab".to_string(), "a".to_string()]);
        assert_eq!(batch.rows, 2);
        assert_eq!(batch.cols, 7);
        let off = CHAR_CODE_OFFSET;
        let expected: Vec<i64> = "<x>: ab".bytes().map(|b| i64::from(b) + off).collect();
        assert_eq!(&batch.ids[..7], expected.as_slice());
        assert_eq!(batch.ids[13], PAD_TOKEN);
        assert_eq!(&batch.mask[7..], &[1, 1, 1, 1, 1, 1, 0]);
    }

    #[test]
    fn argmax_keeps_first_maximum() {
        assert_eq!(argmax(&[0.5, 0.9, 0.9, 0.1]), 1);
        assert_eq!(argmax(&[1.0]), 0);
    }

    #[test]
    fn finished_rows_emit_pad() {
        let mut state = DecodeState::new(2);
        let a = 'a' as i64 + CHAR_CODE_OFFSET;
        let vocab = 260;

        assert!(!state.advance(&one_hot(&[EOS_TOKEN, a], 1, vocab), &[2, 1, vocab]).unwrap());
        assert!(!state.advance(&one_hot(&[a, a], 2, vocab), &[2, 2, vocab]).unwrap());
        assert!(state.advance(&one_hot(&[a, EOS_TOKEN], 3, vocab), &[2, 3, vocab]).unwrap());

        assert_eq!(state.sequences[0], vec![PAD_TOKEN, EOS_TOKEN, PAD_TOKEN]);
        assert_eq!(state.sequences[1], vec![PAD_TOKEN, a, a]);
        assert_eq!(state.into_phonemes(), vec!["".to_string(), "aa".to_string()]);
    }

    #[test]
    fn rejects_bad_logit_shape() {
        let mut state = DecodeState::new(2);
        assert!(state.advance(&[0.0; 4], &[4]).is_err());
        assert!(state.advance(&[0.0; 4], &[1, 1, 4]).is_err());
    }

    #[test]
    fn rebuilds_multibyte_utf8() {
        let mut state = DecodeState::new(1);
        state.sequences[0] = std::iter::once(PAD_TOKEN)
            .chain("wɜːld".bytes().map(|b| i64::from(b) + CHAR_CODE_OFFSET))
            .chain(std::iter::once(EOS_TOKEN))
            .collect();
        assert_eq!(state.into_phonemes(), vec!["wɜːld".to_string()]);
    }

    #[test]
    fn empty_batch_skips_inference() {
        let (encoder, encoder_runs) = Stage::encoder(false);
        let (decoder, decoder_runs) = Stage::decoder(false);
        let mut g2p = G2pDecoder::new(Box::new(encoder), Box::new(decoder));

        assert!(g2p.decode("<eng-us>:", &[]).unwrap().is_empty());
        assert_eq!(encoder_runs.load(Ordering::SeqCst), 0);
        assert_eq!(decoder_runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn encoder_failure_fails_the_batch() {
        let (encoder, encoder_runs) = Stage::encoder(true);
        let (decoder, decoder_runs) = Stage::decoder(false);
        let mut g2p = G2pDecoder::new(Box::new(encoder), Box::new(decoder));

        let err = g2p.decode("<eng-us>:", &words(&["zork", "gnu"])).unwrap_err();
        assert!(matches!(err, TtsError::Phonemization(_)));
        assert_eq!(encoder_runs.load(Ordering::SeqCst), 1);
        assert_eq!(decoder_runs.load(Ordering::SeqCst), 0);
        assert_eq!(output_capacity(&g2p), (0, 0));
    }

    #[test]
    fn decoder_failure_fails_the_batch() {
        let (encoder, _) = Stage::encoder(false);
        let (decoder, decoder_runs) = Stage::decoder(true);
        let mut g2p = G2pDecoder::new(Box::new(encoder), Box::new(decoder));

        let err = g2p.decode("<eng-us>:", &words(&["zork"])).unwrap_err();
        assert!(matches!(err, TtsError::Phonemization(_)));
        assert_eq!(decoder_runs.load(Ordering::SeqCst), 1);
        assert_eq!(output_capacity(&g2p), (0, 0));
    }

    #[test]
    fn g2p_failure_discards_dictionary_words() {
        let store = DictionaryStore::new();
        store.load("word;phoneme\nhello;hɛloʊ\n".as_bytes()).unwrap();
        let (encoder, _) = Stage::encoder(false);
        let (decoder, _) = Stage::decoder(true);
        let mut phonemizer =
            Phonemizer::new().with_g2p(G2pDecoder::new(Box::new(encoder), Box::new(decoder)));
        phonemizer.add_dictionary("eng-us", Arc::new(store));

        let options = PhonemizeOptions {
            espeak_voice: "en-us".to_string(),
            use_dictionary: true,
            characters_as_words: false,
        };
        let err = phonemizer.phonemize("Hello zork.", &options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PhonemizationFailure);
    }
}
