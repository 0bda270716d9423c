//! Inference engine contract and a dense affine engine.
//!
//! The control loop treats a policy as a black box mapping a fixed-length
//! vector to a fixed-length vector.  Both lengths are fixed when the engine
//! is loaded and checked on every call.

use std::fs;
use std::path::Path;

use loco_types::LocoError;
use serde::{Deserialize, Serialize};

/// A loaded inference engine.
pub trait InferenceEngine: Send {
    fn input_len(&self) -> usize;

    fn output_len(&self) -> usize;

    /// Run one forward pass.  Implementations must reject an input whose
    /// length differs from [`InferenceEngine::input_len`].
    fn infer(&mut self, input: &[f32]) -> Result<Vec<f32>, LocoError>;
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
    fn input_len(&self) -> usize {
        (**self).input_len()
    }

    fn output_len(&self) -> usize {
        (**self).output_len()
    }

    fn infer(&mut self, input: &[f32]) -> Result<Vec<f32>, LocoError> {
        (**self).infer(input)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AffinePolicy
// ─────────────────────────────────────────────────────────────────────────────

/// On-disk weight format: one row of `weights` per output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffineWeights {
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
}

/// `y = W x + b`.
///
/// Loadable from JSON:
///
/// ```json
/// { "weights": [[0.1, 0.0], [0.0, 0.2]], "bias": [0.0, 0.5] }
/// ```
#[derive(Debug, Clone)]
pub struct AffinePolicy {
    input_len: usize,
    output_len: usize,
    /// Row-major `output_len × input_len`.
    weights: Vec<f32>,
    bias: Vec<f32>,
}

impl AffinePolicy {
    /// Build from rows of weights and a bias vector.
    ///
    /// # Errors
    ///
    /// [`LocoError::Inference`] if the rows are empty or ragged, or if the
    /// bias length differs from the row count.
    pub fn new(weights: Vec<Vec<f32>>, bias: Vec<f32>) -> Result<Self, LocoError> {
        let output_len = weights.len();
        let input_len = weights.first().map(Vec::len).unwrap_or(0);
        if output_len == 0 || input_len == 0 {
            return Err(LocoError::Inference("affine policy has no weights".into()));
        }
        if let Some(row) = weights.iter().position(|r| r.len() != input_len) {
            return Err(LocoError::Inference(format!(
                "weight row {row} has length {}, expected {input_len}",
                weights[row].len()
            )));
        }
        if bias.len() != output_len {
            return Err(LocoError::Inference(format!(
                "bias has length {}, expected {output_len}",
                bias.len()
            )));
        }
        Ok(Self {
            input_len,
            output_len,
            weights: weights.into_iter().flatten().collect(),
            bias,
        })
    }

    /// An engine that always outputs zero.
    pub fn zeros(input_len: usize, output_len: usize) -> Self {
        Self {
            input_len,
            output_len,
            weights: vec![0.0; input_len * output_len],
            bias: vec![0.0; output_len],
        }
    }

    pub fn from_weights(w: AffineWeights) -> Result<Self, LocoError> {
        Self::new(w.weights, w.bias)
    }

    pub fn from_json(json: &str) -> Result<Self, LocoError> {
        let w: AffineWeights = serde_json::from_str(json)
            .map_err(|e| LocoError::Inference(format!("invalid policy weights: {e}")))?;
        Self::from_weights(w)
    }

    /// Load a JSON weight file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LocoError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            LocoError::Inference(format!("failed to read policy at {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }
}

impl InferenceEngine for AffinePolicy {
    fn input_len(&self) -> usize {
        self.input_len
    }

    fn output_len(&self) -> usize {
        self.output_len
    }

    fn infer(&mut self, input: &[f32]) -> Result<Vec<f32>, LocoError> {
        if input.len() != self.input_len {
            return Err(LocoError::dimension("policy input", self.input_len, input.len()));
        }
        Ok(self
            .weights
            .chunks_exact(self.input_len)
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>() + b)
            .collect())
    }
}
