//! ONNX Runtime implementation of [`InferenceEngine`].

use std::path::{Path, PathBuf};

use ndarray::{ArrayViewD, IxDyn};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionInputValue};
use ort::value::TensorRef;

use super::{DType, InferenceEngine, InputTensor, OutputTensor, TensorData};
use crate::error::{Result, TtsError};

/// Session options for [`OrtEngine::load`].
#[derive(Debug, Clone, Default)]
pub struct OrtOptions {
    /// Number of CPU threads to use for inference.
    /// `None` uses the ORT default (typically all available cores).
    pub num_threads: Option<usize>,
    /// Path for caching the Level3-optimized graph.
    ///
    /// - First load: ORT runs Level3 optimization and serialises the result here.
    /// - Subsequent loads: the pre-built graph is loaded at `Disable` optimization.
    pub optimized_model_cache_path: Option<PathBuf>,
}

pub struct OrtEngine {
    session: Session,
    input_names: Vec<String>,
    input_types: Vec<DType>,
}

impl OrtEngine {
    pub fn load(onnx_path: &Path, options: &OrtOptions) -> Result<Self> {
        log::info!("Loading ONNX model from {}", onnx_path.display());
        let session = init_session(
            onnx_path,
            options.num_threads,
            options.optimized_model_cache_path.as_deref(),
        )?;

        let mut input_names = Vec::new();
        let mut input_types = Vec::new();
        for input in session.inputs() {
            let dtype = detect_input_type(&format!("{:?}", input.dtype())).ok_or_else(|| {
                TtsError::Inference(format!(
                    "input '{}' has unsupported element type {:?}",
                    input.name(),
                    input.dtype()
                ))
            })?;
            input_names.push(input.name().to_string());
            input_types.push(dtype);
        }
        log::info!("Detected inputs: {:?} {:?}", input_names, input_types);

        Ok(Self {
            session,
            input_names,
            input_types,
        })
    }
}

impl InferenceEngine for OrtEngine {
    fn input_types(&self) -> &[DType] {
        &self.input_types
    }

    fn run(&mut self, inputs: &[InputTensor], outputs: &mut [OutputTensor]) -> Result<()> {
        let mut feeds: Vec<(String, SessionInputValue<'_>)> = Vec::with_capacity(inputs.len());
        for (name, input) in self.input_names.iter().zip(inputs) {
            let shape = IxDyn(&input.shape);
            let value: SessionInputValue<'_> = match &input.data {
                TensorData::Int64(data) => {
                    TensorRef::from_array_view(ArrayViewD::from_shape(shape, data.as_slice())?)?
                        .into()
                }
                TensorData::Float32(data) => {
                    TensorRef::from_array_view(ArrayViewD::from_shape(shape, data.as_slice())?)?
                        .into()
                }
            };
            feeds.push((name.clone(), value));
        }

        let results = self.session.run(feeds)?;

        for (slot, (_, value)) in results.iter().enumerate() {
            let Some(out) = outputs.get_mut(slot) else {
                break;
            };
            let array = value.try_extract_array::<f32>()?;
            out.shape = array.shape().to_vec();
            for (dst, &src) in out.data.iter_mut().zip(array.iter()) {
                *dst = src;
            }
        }
        Ok(())
    }
}

/// Map an ORT element type description onto [`DType`].
fn detect_input_type(type_str: &str) -> Option<DType> {
    if type_str.contains("Int64") || type_str.contains("int64") {
        Some(DType::Int64)
    } else if type_str.contains("Float32") || type_str.contains("float32") {
        Some(DType::Float32)
    } else {
        None
    }
}

/// Initialize an ONNX session with optional on-disk graph caching.
fn init_session(
    onnx_path: &Path,
    num_threads: Option<usize>,
    optimized_cache_path: Option<&Path>,
) -> Result<Session> {
    let providers = vec![CPUExecutionProvider::default().build()];

    let (load_path, opt_level, write_cache) = match optimized_cache_path {
        Some(cache) if cache.exists() => {
            log::info!("Loading pre-optimized graph from {:?}, skipping Level3", cache);
            (cache, GraphOptimizationLevel::Disable, None)
        }
        Some(cache) => {
            log::info!(
                "First load: running Level3 optimization; saving graph to {:?}",
                cache
            );
            (onnx_path, GraphOptimizationLevel::Level3, Some(cache))
        }
        None => (onnx_path, GraphOptimizationLevel::Level3, None),
    };

    let mut builder = Session::builder()?
        .with_optimization_level(opt_level)?
        .with_execution_providers(providers)?;

    if let Some(cache) = write_cache {
        builder = builder.with_optimized_model_path(cache)?;
    }

    if let Some(threads) = num_threads {
        builder = builder
            .with_intra_threads(threads)?
            .with_inter_threads(threads)?;
    }

    Ok(builder.commit_from_file(load_path)?)
}
