//! Inference adapter: image preprocessing and quantized forward pass.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::graph::{GraphError, LayerOp, ModelGraph, ModelIdentity, TensorShape};
use super::quant::{dequantize, quantize_input, rescale, QuantizationError};
use crate::config::QuantizationConfig;
use crate::hash::content_digest;

/// Per-channel normalization applied after scaling pixels to `[0, 1]`.
pub const IMAGENET_MEAN: [f64; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f64; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InferenceError {
    #[error("invalid image: {0}")]
    InvalidImage(&'static str),
    #[error("model expects {expected} input values, got {actual}")]
    InputLength { expected: usize, actual: usize },
    #[error("arithmetic overflow in layer {layer}")]
    Overflow { layer: usize },
    #[error(transparent)]
    Quantization(#[from] QuantizationError),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Interleaved RGB8 image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl Image {
    pub fn from_rgb8(width: usize, height: usize, pixels: Vec<u8>) -> Result<Self, InferenceError> {
        if width == 0 || height == 0 {
            return Err(InferenceError::InvalidImage("zero-sized image"));
        }
        if width.checked_mul(height).and_then(|n| n.checked_mul(3)) != Some(pixels.len()) {
            return Err(InferenceError::InvalidImage("pixel buffer does not match dimensions"));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// BLAKE3 content digest used as the request's image reference.
    pub fn reference(&self) -> String {
        let mut framed = Vec::with_capacity(16 + self.pixels.len());
        framed.extend_from_slice(&(self.width as u64).to_le_bytes());
        framed.extend_from_slice(&(self.height as u64).to_le_bytes());
        framed.extend_from_slice(&self.pixels);
        content_digest(&framed)
    }
}

/// Top-1 prediction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub class_id: usize,
    pub probability: f64,
}

/// Output of one inference run. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub model: ModelIdentity,
    /// Quantized model input.
    pub input: Vec<i64>,
    /// Quantized logits.
    pub output: Vec<i64>,
    pub classification: Classification,
}

/// Runs the quantized model exactly as the circuit evaluates it.
#[derive(Debug, Clone, Copy)]
pub struct InferenceAdapter {
    quant: QuantizationConfig,
}

impl InferenceAdapter {
    pub fn new(quant: QuantizationConfig) -> Self {
        Self { quant }
    }

    pub fn quantization(&self) -> &QuantizationConfig {
        &self.quant
    }

    /// Area-average resize to `shape`, ImageNet normalization, quantization.
    pub fn preprocess(&self, image: &Image, shape: &TensorShape) -> Result<Vec<i64>, InferenceError> {
        if shape.channels != 3 {
            return Err(InferenceError::InvalidImage("models must take three input channels"));
        }
        let mut values = Vec::with_capacity(shape.len());
        for channel in 0..3 {
            for oy in 0..shape.height {
                let (y0, y1) = source_span(oy, shape.height, image.height);
                for ox in 0..shape.width {
                    let (x0, x1) = source_span(ox, shape.width, image.width);
                    let mut sum = 0u64;
                    for y in y0..y1 {
                        for x in x0..x1 {
                            sum += u64::from(image.pixels[(y * image.width + x) * 3 + channel]);
                        }
                    }
                    let mean = sum as f64 / ((y1 - y0) * (x1 - x0)) as f64 / 255.0;
                    values.push((mean - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel]);
                }
            }
        }
        Ok(quantize_input(&values, &self.quant)?)
    }

    /// Quantized forward pass returning the logits.
    pub fn forward(&self, graph: &ModelGraph, input: &[i64]) -> Result<Vec<i64>, InferenceError> {
        graph.activation_widths()?;
        if input.len() != graph.input_len() {
            return Err(InferenceError::InputLength {
                expected: graph.input_len(),
                actual: input.len(),
            });
        }
        let shift = self.quant.scale_bits;
        let mut activations: Vec<Vec<i64>> = Vec::with_capacity(graph.layers.len() + 1);
        activations.push(input.to_vec());

        for (index, layer) in graph.layers.iter().enumerate() {
            let x = &activations[index];
            let overflow = || InferenceError::Overflow { layer: index };
            let next = match &layer.op {
                LayerOp::Dense {
                    inputs,
                    weights,
                    bias,
                    ..
                } => weights
                    .chunks(*inputs)
                    .zip(bias)
                    .map(|(row, b)| {
                        let acc = row
                            .iter()
                            .zip(x)
                            .fold(i128::from(*b), |acc, (w, v)| acc + i128::from(*w) * i128::from(*v));
                        i64::try_from(acc).map(|acc| rescale(acc, shift)).map_err(|_| overflow())
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                LayerOp::Relu => x.iter().map(|v| (*v).max(0)).collect(),
                LayerOp::Residual { source } => x
                    .iter()
                    .zip(&activations[*source])
                    .map(|(a, b)| a.checked_add(*b).ok_or_else(overflow))
                    .collect::<Result<Vec<_>, _>>()?,
                LayerOp::MaxPool { window } => x
                    .chunks(*window)
                    .map(|chunk| chunk.iter().copied().max().unwrap_or_default())
                    .collect(),
            };
            activations.push(next);
        }

        Ok(activations.pop().unwrap_or_default())
    }

    /// Preprocess, run and classify.
    pub fn run(&self, graph: &ModelGraph, image: &Image) -> Result<InferenceResult, InferenceError> {
        let input = self.preprocess(image, &graph.input_shape)?;
        let output = self.forward(graph, &input)?;
        let classification = classify(&output, self.quant.scale_bits);
        Ok(InferenceResult {
            model: graph.identity,
            input,
            output,
            classification,
        })
    }
}

/// Source pixel range covered by output cell `index` of `out_len`.
fn source_span(index: usize, out_len: usize, in_len: usize) -> (usize, usize) {
    let start = index * in_len / out_len;
    let end = ((index + 1) * in_len).div_ceil(out_len).max(start + 1);
    (start, end.min(in_len))
}

/// Softmax over dequantized logits; ties resolve to the lowest class id.
pub fn classify(logits: &[i64], scale_bits: u32) -> Classification {
    let Some((class_id, &top)) = logits
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| a.cmp(b).then(ib.cmp(ia)))
    else {
        return Classification {
            class_id: 0,
            probability: 0.0,
        };
    };
    let top = dequantize(top, scale_bits);
    let denominator: f64 = logits
        .iter()
        .map(|logit| (dequantize(*logit, scale_bits) - top).exp())
        .sum();
    Classification {
        class_id,
        probability: 1.0 / denominator,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::graph::{Layer, ModelVariant};
    use crate::model::registry::builtin_graph;

    fn adapter() -> InferenceAdapter {
        InferenceAdapter::new(QuantizationConfig::default())
    }

    fn gradient(width: usize, height: usize) -> Image {
        let pixels = (0..width * height * 3).map(|i| (i * 7 % 256) as u8).collect();
        Image::from_rgb8(width, height, pixels).unwrap()
    }

    #[test]
    fn rejects_mismatched_buffers() {
        assert_eq!(
            Image::from_rgb8(2, 2, vec![0; 11]).unwrap_err(),
            InferenceError::InvalidImage("pixel buffer does not match dimensions")
        );
        assert!(Image::from_rgb8(0, 2, Vec::new()).is_err());
    }

    #[test]
    fn uniform_image_normalizes_per_channel() {
        let image = Image::from_rgb8(16, 16, vec![255; 16 * 16 * 3]).unwrap();
        let shape = TensorShape {
            channels: 3,
            height: 2,
            width: 2,
        };
        let input = adapter().preprocess(&image, &shape).unwrap();
        assert_eq!(input.len(), 12);
        // (1 - 0.485) / 0.229 * 128 = 287.8
        assert_eq!(input[0], 288);
        assert!(input[..4].iter().all(|v| *v == input[0]));
    }

    #[test]
    fn forward_applies_floor_rescale_and_relu() {
        let graph = ModelGraph::new(
            ModelIdentity::new(ModelVariant::ResNet18, 1),
            TensorShape {
                channels: 1,
                height: 1,
                width: 2,
            },
            vec![
                Layer::new(
                    "fc",
                    LayerOp::Dense {
                        inputs: 2,
                        outputs: 2,
                        weights: vec![128, 0, -128, -1],
                        bias: vec![0, 0],
                    },
                ),
                Layer::new("relu", LayerOp::Relu),
                Layer::new("add", LayerOp::Residual { source: 0 }),
            ],
        );
        let out = adapter().forward(&graph, &[3, 5]).unwrap();
        // fc: [3, floor((-384 - 5) / 128) = -4]; relu: [3, 0]; add input: [6, 5]
        assert_eq!(out, vec![6, 5]);
    }

    #[test]
    fn builtin_models_classify_deterministically() {
        let quant = QuantizationConfig::default();
        let graph = builtin_graph(ModelVariant::ResNet34, 1, &quant);
        let image = gradient(32, 24);
        let first = adapter().run(&graph, &image).unwrap();
        let second = adapter().run(&graph, &image).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.output.len(), 10);
        assert!(first.classification.probability > 0.0 && first.classification.probability <= 1.0);
    }

    #[test]
    fn classify_prefers_lowest_index_on_ties() {
        let result = classify(&[128, 256, 256], 7);
        assert_eq!(result.class_id, 1);
        assert!((result.probability - 0.422_318_5).abs() < 1e-6);
    }

    #[test]
    fn reference_depends_on_dimensions() {
        let a = Image::from_rgb8(2, 3, vec![1; 18]).unwrap();
        let b = Image::from_rgb8(3, 2, vec![1; 18]).unwrap();
        assert_ne!(a.reference(), b.reference());
        assert_eq!(a.reference().len(), 64);
    }
}
