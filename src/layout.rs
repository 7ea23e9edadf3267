//! Byte layout of inference payloads and the accelerator's numeric buffers.
//!
//! A payload is a flattened row-major matrix of little-endian FP32 values,
//! `feature_count` values per example. The accelerator's buffers hold the same
//! values natively, one example after another from offset 0.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while moving data between wire bytes and device buffers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    /// Payload length is not a whole number of examples.
    #[error("malformed payload: {len} bytes is not a multiple of the {stride}-byte example stride")]
    MalformedPayload { len: usize, stride: usize },

    /// Asked to read more output values than the buffer holds.
    #[error("output overrun: {requested} values requested, buffer holds {available}")]
    OutputOverrun { requested: usize, available: usize },

    /// A tensor declared with no elements per example.
    #[error("tensor '{0}' has zero elements per example")]
    EmptyTensor(String),

    /// Element count of a tensor does not fit in memory on this target.
    #[error("tensor '{0}' has too many elements per example")]
    TooManyElements(String),
}

/// Numeric element types understood on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Fp32,
}

impl DataType {
    /// Width of one element in bytes.
    pub fn width(self) -> usize {
        match self {
            DataType::Fp32 => std::mem::size_of::<f32>(),
        }
    }

    /// Wire name as reported in model status (`TYPE_FP32`).
    pub fn wire_name(self) -> &'static str {
        match self {
            DataType::Fp32 => "TYPE_FP32",
        }
    }
}

/// Per-example shape of the model's single input and output tensors.
///
/// Fixed at startup; every request is measured against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorLayout {
    pub feature_count: usize,
    pub out_feature_count: usize,
    pub element_width: usize,
}

impl TensorLayout {
    pub fn new(
        feature_count: usize,
        out_feature_count: usize,
        dtype: DataType,
    ) -> Result<Self, LayoutError> {
        if feature_count == 0 {
            return Err(LayoutError::EmptyTensor("input".into()));
        }
        if out_feature_count == 0 {
            return Err(LayoutError::EmptyTensor("output".into()));
        }
        if feature_count.checked_mul(dtype.width()).is_none() {
            return Err(LayoutError::TooManyElements("input".into()));
        }
        if out_feature_count.checked_mul(dtype.width()).is_none() {
            return Err(LayoutError::TooManyElements("output".into()));
        }
        Ok(Self {
            feature_count,
            out_feature_count,
            element_width: dtype.width(),
        })
    }

    /// Bytes per input example.
    pub fn input_stride(&self) -> usize {
        self.feature_count * self.element_width
    }

    /// Bytes per output example.
    pub fn output_stride(&self) -> usize {
        self.out_feature_count * self.element_width
    }
}

/// Shape of one decoded request payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchDescriptor {
    pub batch_size: usize,
    pub feature_count: usize,
    pub element_width: usize,
}

/// Decode a raw payload into FP32 values and derive its batch size.
///
/// Fails with [`LayoutError::MalformedPayload`] unless the payload is an
/// exact number of examples. An empty payload is a valid batch of zero.
pub fn decode(
    raw: &[u8],
    layout: &TensorLayout,
) -> Result<(Vec<f32>, BatchDescriptor), LayoutError> {
    let stride = layout.input_stride();
    if raw.len() % stride != 0 {
        return Err(LayoutError::MalformedPayload {
            len: raw.len(),
            stride,
        });
    }

    let values: Vec<f32> = raw
        .chunks_exact(std::mem::size_of::<f32>())
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    let batch = BatchDescriptor {
        batch_size: raw.len() / stride,
        feature_count: layout.feature_count,
        element_width: layout.element_width,
    };
    Ok((values, batch))
}

/// Copy decoded examples into the accelerator's input buffer from offset 0.
///
/// Examples beyond the buffer's capacity are dropped. Returns the effective
/// batch size, which is what every later step must use.
pub fn transcode_in(values: &[f32], batch: &BatchDescriptor, input: &mut [f32]) -> usize {
    let capacity = input.len() / batch.feature_count;
    let effective = batch.batch_size.min(capacity);
    let n = effective * batch.feature_count;
    input[..n].copy_from_slice(&values[..n]);
    effective
}

/// Serialize the first `batch_size` output examples as little-endian bytes.
pub fn encode_out(
    output: &[f32],
    batch_size: usize,
    out_feature_count: usize,
) -> Result<Vec<u8>, LayoutError> {
    let n = batch_size * out_feature_count;
    if n > output.len() {
        return Err(LayoutError::OutputOverrun {
            requested: n,
            available: output.len(),
        });
    }

    let mut raw = Vec::with_capacity(n * std::mem::size_of::<f32>());
    for v in &output[..n] {
        raw.extend_from_slice(&v.to_le_bytes());
    }
    Ok(raw)
}
