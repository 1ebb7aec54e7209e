use crate::model::ModelId;

/// Coarse failure classes reported to callers.
///
/// Every [`TtsError`] maps onto exactly one kind via [`TtsError::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No model assigned, empty text, unknown speaker.
    Configuration,
    /// A model load is already in progress.
    ResourceUnavailable,
    /// G2P inference failed or a word could not be converted.
    PhonemizationFailure,
    /// The inference engine failed or overflowed its output buffer.
    InferenceFailure,
    /// A phonemization dictionary could not be read.
    DictionaryLoadFailure,
}

#[derive(thiserror::Error, Debug)]
pub enum TtsError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),
    #[error("Phonemization failed: {0}")]
    Phonemization(String),
    #[error("Tokenization failed: {0}")]
    Tokenization(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Dictionary load failed: {0}")]
    DictionaryLoad(String),
    #[error("Invalid model metadata: {0}")]
    ModelImport(String),
    #[error("Speaker {speaker_id} is out of range (model has {available} speakers)")]
    InvalidSpeaker { speaker_id: i64, available: usize },
    #[error("Model {0} is not loaded. Call load_model() first.")]
    ModelNotLoaded(ModelId),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[cfg(feature = "onnx")]
    #[error("ONNX runtime error: {0}")]
    Ort(#[from] ort::Error),
    #[cfg(feature = "onnx")]
    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl TtsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TtsError::Configuration(_)
            | TtsError::InvalidSpeaker { .. }
            | TtsError::ModelNotLoaded(_)
            | TtsError::ModelImport(_) => ErrorKind::Configuration,
            TtsError::ResourceUnavailable(_) => ErrorKind::ResourceUnavailable,
            TtsError::Phonemization(_) | TtsError::Tokenization(_) => {
                ErrorKind::PhonemizationFailure
            }
            TtsError::DictionaryLoad(_) | TtsError::Zip(_) => ErrorKind::DictionaryLoadFailure,
            TtsError::Inference(_) | TtsError::Io(_) | TtsError::Json(_) | TtsError::Wav(_) => {
                ErrorKind::InferenceFailure
            }
            #[cfg(feature = "onnx")]
            TtsError::Ort(_) | TtsError::Shape(_) => ErrorKind::InferenceFailure,
        }
    }
}

pub type Result<T, E = TtsError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::{ErrorKind, TtsError};

    #[test]
    fn maps_variants_onto_taxonomy() {
        assert_eq!(
            TtsError::Configuration("empty text".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            TtsError::Tokenization("no tokens".into()).kind(),
            ErrorKind::PhonemizationFailure
        );
        assert_eq!(
            TtsError::InvalidSpeaker {
                speaker_id: 7,
                available: 2
            }
            .kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            TtsError::Inference("overflow".into()).kind(),
            ErrorKind::InferenceFailure
        );
    }
}
