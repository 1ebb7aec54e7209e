#![allow(dead_code)]

use std::sync::Arc;

use local_tts::inference::TensorData;
use local_tts::phonemizer::g2p::{CHAR_CODE_OFFSET, EOS_TOKEN};
use local_tts::{
    DType, DictionaryStore, G2pDecoder, InferenceEngine, InputTensor, ModelRef, OutputTensor,
    Phonemizer, PiperTokenizer, Result, TtsError, TtsSettings,
};

pub const PIPER_RATE: u32 = 22050;

/// Samples every sentence produces unless a test says otherwise.
pub const SENTENCE_SAMPLES: usize = 22050;

pub const PIPER_CONFIG: &str = r#"{
    "audio": { "sample_rate": 22050 },
    "espeak": { "voice": "en-us" },
    "inference": { "noise_scale": 0.667, "length_scale": 1.0, "noise_w": 0.8 },
    "phoneme_id_map": {
        "_": [0], "^": [1], "$": [2], " ": [3], ".": [4], ",": [5], "!": [6], "?": [7],
        "h": [20], "ɛ": [21], "l": [22], "o": [23], "ʊ": [24], "w": [25], "ɜ": [26],
        "ː": [27], "d": [28], "b": [29], "a": [30], "ɪ": [31]
    },
    "num_speakers": 1,
    "speaker_id_map": {},
    "language": { "code": "en_US", "family": "en" }
}"#;

pub const MULTI_SPEAKER_CONFIG: &str = r#"{
    "audio": { "sample_rate": 22050 },
    "espeak": { "voice": "en-us" },
    "inference": { "noise_scale": 0.667, "length_scale": 1.0, "noise_w": 0.8 },
    "phoneme_id_map": { "_": [0], "^": [1], "$": [2], " ": [3], "h": [20] },
    "num_speakers": 3,
    "speaker_id_map": { "carol": 2, "alice": 0, "bob": 1 },
    "language": { "code": "en_US", "family": "en" }
}"#;

pub const DICTIONARY: &str = "word;phoneme\nhello;hɛloʊ\nworld;wɜːld\nbye;baɪ\n";

/// Waveform stand-in. Writes `samples` values: the first at 0.5, the rest
/// at 0.25. Reports the full shape even when the buffer is too small.
pub struct FakeVocoder {
    input_types: Vec<DType>,
    samples: usize,
}

impl FakeVocoder {
    pub fn piper(samples: usize) -> Self {
        Self {
            input_types: vec![DType::Int64, DType::Int64, DType::Float32],
            samples,
        }
    }

    pub fn piper_multi_speaker(samples: usize) -> Self {
        Self {
            input_types: vec![DType::Int64, DType::Int64, DType::Float32, DType::Int64],
            samples,
        }
    }

    pub fn kokoro(samples: usize) -> Self {
        Self {
            input_types: vec![DType::Int64, DType::Float32, DType::Float32],
            samples,
        }
    }
}

impl InferenceEngine for FakeVocoder {
    fn input_types(&self) -> &[DType] {
        &self.input_types
    }

    fn run(&mut self, inputs: &[InputTensor], outputs: &mut [OutputTensor]) -> Result<()> {
        if inputs.first().map_or(true, |tokens| tokens.data.is_empty()) {
            return Err(TtsError::Inference("no tokens".to_string()));
        }
        let out = &mut outputs[0];
        out.shape = vec![1, 1, self.samples];
        let n = self.samples.min(out.data.len());
        out.data[..n].fill(0.25);
        if n > 0 {
            out.data[0] = 0.5;
        }
        Ok(())
    }
}

/// Passes the encoder's input ids through as its hidden state `[B, L, 1]`.
pub struct EchoEncoder;

impl InferenceEngine for EchoEncoder {
    fn input_types(&self) -> &[DType] {
        &[DType::Int64, DType::Int64]
    }

    fn run(&mut self, inputs: &[InputTensor], outputs: &mut [OutputTensor]) -> Result<()> {
        let TensorData::Int64(ids) = &inputs[0].data else {
            return Err(TtsError::Inference("ids must be int64".to_string()));
        };
        let out = &mut outputs[0];
        for (dst, &id) in out.data.iter_mut().zip(ids) {
            *dst = id as f32;
        }
        out.shape = inputs[0].shape.clone();
        out.shape.push(1);
        Ok(())
    }
}

/// Spells out `transform(word)` one byte per step, then emits EOS. The word
/// is recovered from the hidden state written by [`EchoEncoder`].
pub struct SpellingDecoder {
    transform: fn(&str) -> String,
}

pub const VOCAB: usize = 259;

impl InferenceEngine for SpellingDecoder {
    fn input_types(&self) -> &[DType] {
        &[DType::Int64, DType::Int64, DType::Float32]
    }

    fn run(&mut self, inputs: &[InputTensor], outputs: &mut [OutputTensor]) -> Result<()> {
        let (TensorData::Int64(mask), TensorData::Float32(hidden)) =
            (&inputs[0].data, &inputs[2].data)
        else {
            return Err(TtsError::Inference("unexpected decoder inputs".to_string()));
        };
        let &[batch, cols] = inputs[0].shape.as_slice() else {
            return Err(TtsError::Inference("mask must be 2-D".to_string()));
        };
        let seq = inputs[1].shape[1];

        let out = &mut outputs[0];
        out.shape = vec![batch, seq, VOCAB];
        if out.data.len() < batch * seq * VOCAB {
            return Ok(());
        }
        out.data.fill(0.0);

        for row in 0..batch {
            let bytes: Vec<u8> = (0..cols)
                .filter(|&c| mask[row * cols + c] == 1)
                .map(|c| (hidden[row * cols + c] as i64 - CHAR_CODE_OFFSET) as u8)
                .collect();
            let tagged = String::from_utf8_lossy(&bytes).into_owned();
            let word = tagged.split_once(' ').map_or("", |(_, w)| w);
            let target = (self.transform)(word).into_bytes();

            let generated = seq - 1;
            let token = match target.get(generated) {
                Some(&b) => i64::from(b) + CHAR_CODE_OFFSET,
                None => EOS_TOKEN,
            };
            out.data[(row * seq + seq - 1) * VOCAB + token as usize] = 1.0;
        }
        Ok(())
    }
}

pub fn spelling_g2p(transform: fn(&str) -> String) -> G2pDecoder {
    G2pDecoder::new(Box::new(EchoEncoder), Box::new(SpellingDecoder { transform }))
}

pub fn english_dictionary() -> Arc<DictionaryStore> {
    let store = DictionaryStore::new();
    store.load(DICTIONARY.as_bytes()).expect("dictionary loads");
    Arc::new(store)
}

pub fn english_phonemizer() -> Phonemizer {
    let mut phonemizer = Phonemizer::new();
    phonemizer.add_dictionary("eng-us", english_dictionary());
    phonemizer
}

pub fn piper_voice() -> PiperTokenizer {
    PiperTokenizer::from_config_str(PIPER_CONFIG).expect("valid config")
}

pub fn vocoder(name: &str, samples: usize) -> ModelRef {
    ModelRef::from_engine(name, Box::new(FakeVocoder::piper(samples)))
}

/// Settings that keep the model's own rate.
pub fn native_rate() -> TtsSettings {
    TtsSettings {
        resample_synthesized_audio: false,
        ..TtsSettings::default()
    }
}
