use std::collections::BTreeMap;
use std::fmt;
#[cfg(feature = "onnx")]
use std::path::PathBuf;

use crate::error::Result;
use crate::inference::{BoundModel, InferenceEngine};
use crate::tokenizer::{Tokenizer, TokenizerStrategy};

/// Identifier of a loaded voice model. Never reused within a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(u32);

impl ModelId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type EngineLoader = Box<dyn FnOnce() -> Result<Box<dyn InferenceEngine>> + Send>;

/// A named model that can be instantiated on the worker thread.
pub struct ModelRef {
    name: String,
    loader: EngineLoader,
}

impl ModelRef {
    pub fn new<F>(name: impl Into<String>, loader: F) -> Self
    where
        F: FnOnce() -> Result<Box<dyn InferenceEngine>> + Send + 'static,
    {
        Self {
            name: name.into(),
            loader: Box::new(loader),
        }
    }

    /// Wrap an engine that is already instantiated.
    pub fn from_engine(name: impl Into<String>, engine: Box<dyn InferenceEngine>) -> Self {
        Self::new(name, move || Ok(engine))
    }

    /// An ONNX model file, named after the file.
    #[cfg(feature = "onnx")]
    pub fn onnx(path: impl Into<PathBuf>) -> Self {
        Self::onnx_with_options(path, crate::inference::onnx::OrtOptions::default())
    }

    #[cfg(feature = "onnx")]
    pub fn onnx_with_options(
        path: impl Into<PathBuf>,
        options: crate::inference::onnx::OrtOptions,
    ) -> Self {
        let path = path.into();
        let name = path.to_string_lossy().into_owned();
        Self::new(name, move || {
            let engine = crate::inference::onnx::OrtEngine::load(&path, &options)?;
            Ok(Box::new(engine) as Box<dyn InferenceEngine>)
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn instantiate(self) -> Result<Box<dyn InferenceEngine>> {
        (self.loader)()
    }
}

impl fmt::Debug for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRef").field("name", &self.name).finish()
    }
}

/// Foreground view of a loaded model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    pub id: ModelId,
    pub name: String,
    pub family: &'static str,
    pub sample_rate: u32,
    pub espeak_voice: String,
    pub language_code: String,
    pub speakers: BTreeMap<String, i64>,
}

/// A loaded model: its tokenizer and its bound inference engine.
pub(crate) struct VoiceModel {
    pub name: String,
    pub tokenizer: Tokenizer,
    pub model: BoundModel,
}

impl VoiceModel {
    pub fn new(name: String, tokenizer: Tokenizer, engine: Box<dyn InferenceEngine>) -> Self {
        Self {
            name,
            tokenizer,
            model: BoundModel::new(engine),
        }
    }

    pub fn info(&self, id: ModelId) -> ModelInfo {
        let descriptor = self.tokenizer.descriptor();
        ModelInfo {
            id,
            name: self.name.clone(),
            family: self.tokenizer.family(),
            sample_rate: descriptor.sample_rate,
            espeak_voice: descriptor.espeak_voice.clone(),
            language_code: descriptor.language_code.clone(),
            speakers: descriptor.speakers.clone(),
        }
    }
}
