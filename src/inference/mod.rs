//! Inference boundary.
//!
//! Models are driven through [`InferenceEngine`]: a positional list of typed
//! input tensors goes in, a list of `f32` output tensors comes out. Callers
//! own the output buffers and size them in advance. An engine writes at most
//! `buffer.len()` values into each output but always reports the true output
//! shape, so an undersized buffer is detected by comparing the two.
//!
//! [`TensorArena`] holds the reusable per-model buffers, keyed by slot index,
//! and [`BoundModel`] pairs an engine with its arena.

#[cfg(feature = "onnx")]
pub mod onnx;

use crate::error::{Result, TtsError};

/// Element type of a model input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    Int64,
    Float32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Int64(Vec<i64>),
    Float32(Vec<f32>),
}

impl TensorData {
    fn empty(dtype: DType) -> Self {
        match dtype {
            DType::Int64 => TensorData::Int64(Vec::new()),
            DType::Float32 => TensorData::Float32(Vec::new()),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            TensorData::Int64(_) => DType::Int64,
            TensorData::Float32(_) => DType::Float32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::Int64(v) => v.len(),
            TensorData::Float32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the payload in bytes.
    pub fn byte_size(&self) -> usize {
        match self {
            TensorData::Int64(v) => std::mem::size_of_val(v.as_slice()),
            TensorData::Float32(v) => std::mem::size_of_val(v.as_slice()),
        }
    }
}

/// A typed input buffer with its dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    pub data: TensorData,
    pub shape: Vec<usize>,
}

impl InputTensor {
    pub fn int64(data: Vec<i64>, shape: Vec<usize>) -> Self {
        Self {
            data: TensorData::Int64(data),
            shape,
        }
    }

    pub fn float32(data: Vec<f32>, shape: Vec<usize>) -> Self {
        Self {
            data: TensorData::Float32(data),
            shape,
        }
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }
}

/// An `f32` output buffer. `data.len()` is the capacity handed to the
/// engine; `shape` is what the engine reported for the last run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputTensor {
    pub data: Vec<f32>,
    pub shape: Vec<usize>,
}

impl OutputTensor {
    /// Number of elements the engine produced on the last run.
    pub fn volume(&self) -> usize {
        if self.shape.is_empty() {
            0
        } else {
            self.shape.iter().product()
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The produced values, clipped to capacity.
    pub fn values(&self) -> &[f32] {
        &self.data[..self.volume().min(self.data.len())]
    }
}

/// A loaded model that can be executed.
pub trait InferenceEngine: Send {
    /// Element types of the model inputs, in slot order.
    fn input_types(&self) -> &[DType];

    /// Run the model. `inputs` are in slot order. Each output gets at most
    /// `data.len()` values written and its `shape` set to the full shape the
    /// model produced.
    fn run(&mut self, inputs: &[InputTensor], outputs: &mut [OutputTensor]) -> Result<()>;
}

/// Reusable tensor buffers for one model, keyed by slot.
#[derive(Debug, Default)]
pub struct TensorArena {
    inputs: Vec<InputTensor>,
    outputs: Vec<OutputTensor>,
}

impl TensorArena {
    pub fn new(input_types: &[DType], output_count: usize) -> Self {
        Self {
            inputs: input_types
                .iter()
                .map(|&dtype| InputTensor {
                    data: TensorData::empty(dtype),
                    shape: Vec::new(),
                })
                .collect(),
            outputs: vec![OutputTensor::default(); output_count],
        }
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn input(&self, slot: usize) -> Option<&InputTensor> {
        self.inputs.get(slot)
    }

    pub fn input_type(&self, slot: usize) -> Option<DType> {
        self.inputs.get(slot).map(InputTensor::dtype)
    }

    /// True if the leading input slots have these types, in order.
    pub fn accepts(&self, types: &[DType]) -> bool {
        self.inputs.len() >= types.len()
            && types
                .iter()
                .enumerate()
                .all(|(slot, &dtype)| self.input_type(slot) == Some(dtype))
    }

    pub fn set_input_i64(&mut self, slot: usize, values: &[i64], shape: &[usize]) -> Result<()> {
        check_volume(slot, values.len(), shape)?;
        match self.inputs.get_mut(slot) {
            Some(InputTensor {
                data: TensorData::Int64(buf),
                shape: dims,
            }) => {
                buf.clear();
                buf.extend_from_slice(values);
                dims.clear();
                dims.extend_from_slice(shape);
                Ok(())
            }
            _ => Err(TtsError::Inference(format!(
                "input slot {slot} does not accept int64 data"
            ))),
        }
    }

    pub fn set_input_f32(&mut self, slot: usize, values: &[f32], shape: &[usize]) -> Result<()> {
        check_volume(slot, values.len(), shape)?;
        match self.inputs.get_mut(slot) {
            Some(InputTensor {
                data: TensorData::Float32(buf),
                shape: dims,
            }) => {
                buf.clear();
                buf.extend_from_slice(values);
                dims.clear();
                dims.extend_from_slice(shape);
                Ok(())
            }
            _ => Err(TtsError::Inference(format!(
                "input slot {slot} does not accept float32 data"
            ))),
        }
    }

    /// Grow an output buffer to at least `len` values. Returns true if the
    /// buffer was resized.
    pub fn ensure_output(&mut self, slot: usize, len: usize) -> bool {
        if slot >= self.outputs.len() {
            self.outputs.resize_with(slot + 1, OutputTensor::default);
        }
        let output = &mut self.outputs[slot];
        if output.data.len() >= len {
            return false;
        }
        output.data.resize(len, 0.0);
        true
    }

    pub fn output(&self, slot: usize) -> Option<&OutputTensor> {
        self.outputs.get(slot)
    }

    /// Drop output storage. Inputs keep their allocations.
    pub fn release_outputs(&mut self) {
        for output in &mut self.outputs {
            *output = OutputTensor::default();
        }
    }

    fn run(&mut self, engine: &mut dyn InferenceEngine) -> Result<()> {
        for output in &mut self.outputs {
            output.shape.clear();
        }
        engine.run(&self.inputs, &mut self.outputs)?;

        for (slot, output) in self.outputs.iter().enumerate() {
            if output.volume() > output.capacity() {
                return Err(TtsError::Inference(format!(
                    "output {slot} holds {} values but the model produced {}, data is corrupted",
                    output.capacity(),
                    output.volume()
                )));
            }
        }
        Ok(())
    }
}

fn check_volume(slot: usize, len: usize, shape: &[usize]) -> Result<()> {
    let volume: usize = shape.iter().product();
    if volume != len {
        return Err(TtsError::Inference(format!(
            "input slot {slot}: shape {shape:?} needs {volume} values, got {len}"
        )));
    }
    Ok(())
}

/// An engine together with its tensor buffers.
pub struct BoundModel {
    engine: Box<dyn InferenceEngine>,
    arena: TensorArena,
}

impl BoundModel {
    pub fn new(engine: Box<dyn InferenceEngine>) -> Self {
        let arena = TensorArena::new(engine.input_types(), 1);
        Self { engine, arena }
    }

    pub fn arena(&self) -> &TensorArena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut TensorArena {
        &mut self.arena
    }

    /// Run the engine on the prepared inputs and return output slot 0.
    pub fn run(&mut self) -> Result<&OutputTensor> {
        self.arena.run(self.engine.as_mut())?;
        self.arena
            .output(0)
            .ok_or_else(|| TtsError::Inference("model has no output buffer".to_string()))
    }
}
