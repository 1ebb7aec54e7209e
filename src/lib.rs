//! # local-tts
//!
//! On-device text-to-speech. Text is phonemized through per-language
//! dictionaries with a batched neural G2P fallback, tokenized for a Piper or
//! Kokoro voice model, synthesized sentence by sentence and assembled into
//! one 16-bit clip.
//!
//! ## Features
//!
//! - **Dictionary + G2P phonemization**: zip-packed `word;phoneme` tables,
//!   unknown words decoded by an encoder/decoder model in one batch
//! - **Piper and Kokoro voices**: family-specific tokenization, model inputs
//!   and output normalization
//! - **Single-flight scheduling**: one synthesis at a time on a worker
//!   thread, FIFO queue, completion callbacks on the caller's thread
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! local-tts = { version = "0.1", features = ["onnx"] }
//! ```
//!
//! ```ignore
//! use std::path::Path;
//! use local_tts::{LocalTts, ModelRef, PiperTokenizer, Phonemizer, TtsSettings};
//!
//! let mut tts = LocalTts::new(TtsSettings::default(), Phonemizer::new());
//! let voice = PiperTokenizer::from_config_file(Path::new("en_US-lessac.onnx.json"))?;
//! let loading = tts.load_model(ModelRef::onnx("en_US-lessac.onnx"), voice);
//! let model_id = tts.wait_for(&loading).expect("load finished")?;
//!
//! let pending = tts.synthesize(model_id, "Hello, world!", Default::default())?;
//! let result = tts.wait_for(&pending).expect("job finished")?;
//! result.write_wav(Path::new("output.wav"))?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod audio;
pub mod config;
pub mod dictionary;
pub mod error;
pub mod inference;
pub mod model;
pub mod phonemizer;
pub mod scheduler;
pub mod tokenizer;

use std::path::Path;

pub use config::{GenerateSettings, GenerateSettingsBuilder, TtsSettings, TtsSettingsBuilder};
pub use dictionary::DictionaryStore;
pub use error::{ErrorKind, Result, TtsError};
pub use inference::{DType, InferenceEngine, InputTensor, OutputTensor};
pub use model::{ModelId, ModelInfo, ModelRef};
pub use phonemizer::{G2pDecoder, Phonemizer};
pub use scheduler::{JobId, LocalTts, Pending, Phase};
pub use tokenizer::{KokoroTokenizer, PiperTokenizer, Tokenizer, TokenizerStrategy};

/// One sentence (or batch of sentences) as NFD phoneme code points.
pub type PhonemeSentence = Vec<char>;

/// The result of a synthesis (text-to-speech) request.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisResult {
    pub model_id: ModelId,
    /// Assembled float audio at `sample_rate`.
    pub pcm_f32: Vec<f32>,
    /// Normalized 16-bit audio, same length as `pcm_f32`.
    pub pcm_i16: Vec<i16>,
    pub sample_rate: u32,
    /// Phoneme sentences that were synthesized.
    pub sentences: Vec<PhonemeSentence>,
    /// Seconds of assembled audio, inserted silence included.
    pub audio_seconds: f32,
}

impl SynthesisResult {
    pub fn new(model_id: ModelId, sample_rate: u32) -> Self {
        Self {
            model_id,
            pcm_f32: Vec::new(),
            pcm_i16: Vec::new(),
            sample_rate,
            sentences: Vec::new(),
            audio_seconds: 0.0,
        }
    }

    /// Write the 16-bit audio to a mono WAV file.
    pub fn write_wav(&self, path: &Path) -> Result<()> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for &sample in &self.pcm_i16 {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(())
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.pcm_i16.len().max(self.pcm_f32.len()) as f64 / self.sample_rate as f64
    }
}
