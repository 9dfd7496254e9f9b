use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::{Digest, Hasher};

const GRAPH_DIGEST_DOMAIN: &[u8] = b"ZKINFER-GRAPH-V1";

/// Model selector accepted by the classification surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    ResNet18,
    ResNet34,
}

impl ModelVariant {
    pub const ALL: [ModelVariant; 2] = [ModelVariant::ResNet18, ModelVariant::ResNet34];

    pub fn as_str(self) -> &'static str {
        match self {
            ModelVariant::ResNet18 => "resnet18",
            ModelVariant::ResNet34 => "resnet34",
        }
    }

    fn tag(self) -> u8 {
        match self {
            ModelVariant::ResNet18 => 18,
            ModelVariant::ResNet34 => 34,
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported model {selector:?}; expected one of resnet18, resnet34")]
pub struct UnsupportedModelError {
    pub selector: String,
}

impl FromStr for ModelVariant {
    type Err = UnsupportedModelError;

    fn from_str(selector: &str) -> Result<Self, Self::Err> {
        ModelVariant::ALL
            .into_iter()
            .find(|variant| variant.as_str().eq_ignore_ascii_case(selector.trim()))
            .ok_or_else(|| UnsupportedModelError {
                selector: selector.to_owned(),
            })
    }
}

/// Identifies one immutable version of a model graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelIdentity {
    pub variant: ModelVariant,
    pub revision: u32,
}

impl ModelIdentity {
    pub const fn new(variant: ModelVariant, revision: u32) -> Self {
        Self { variant, revision }
    }

    pub fn to_bytes(&self) -> [u8; 5] {
        let rev = self.revision.to_le_bytes();
        [self.variant.tag(), rev[0], rev[1], rev[2], rev[3]]
    }

    /// Same variant, next revision.
    pub fn next_revision(&self) -> Self {
        Self::new(self.variant, self.revision.saturating_add(1))
    }
}

impl fmt::Display for ModelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@r{}", self.variant, self.revision)
    }
}

/// Channel-major image tensor shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl TensorShape {
    pub const fn len(&self) -> usize {
        self.channels * self.height * self.width
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Operators of a quantized graph. Activations are flat vectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerOp {
    /// `y = floor((W·x + b) / 2^s)`; weights are row-major `outputs × inputs`
    /// at scale `2^s`, biases at scale `2^(2s)`.
    Dense {
        inputs: usize,
        outputs: usize,
        weights: Vec<i64>,
        bias: Vec<i64>,
    },
    Relu,
    /// Adds activation `source` (0 is the model input, `i + 1` the output of
    /// layer `i`).
    Residual { source: usize },
    /// Max over consecutive windows of the flat activation.
    MaxPool { window: usize },
}

impl LayerOp {
    pub fn name(&self) -> &'static str {
        match self {
            LayerOp::Dense { .. } => "dense",
            LayerOp::Relu => "relu",
            LayerOp::Residual { .. } => "residual",
            LayerOp::MaxPool { .. } => "max_pool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub op: LayerOp,
}

impl Layer {
    pub fn new(name: impl Into<String>, op: LayerOp) -> Self {
        Self {
            name: name.into(),
            op,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("graph has no layers")]
    Empty,
    #[error("layer {layer}: dense layers need at least one input and one output")]
    EmptyDense { layer: usize },
    #[error("layer {layer}: expected {expected} values, found {actual}")]
    ShapeMismatch {
        layer: usize,
        expected: usize,
        actual: usize,
    },
    #[error("layer {layer}: residual input {origin} is not an earlier activation")]
    InvalidResidual { layer: usize, origin: usize },
    #[error("layer {layer}: pooling window {window} does not divide width {width}")]
    PoolWindow {
        layer: usize,
        window: usize,
        width: usize,
    },
}

/// Fixed, quantized feed-forward graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelGraph {
    pub identity: ModelIdentity,
    pub input_shape: TensorShape,
    pub layers: Vec<Layer>,
}

impl ModelGraph {
    pub fn new(identity: ModelIdentity, input_shape: TensorShape, layers: Vec<Layer>) -> Self {
        Self {
            identity,
            input_shape,
            layers,
        }
    }

    pub fn input_len(&self) -> usize {
        self.input_shape.len()
    }

    /// Widths of every activation: index 0 is the input, `i + 1` the output of
    /// layer `i`.
    pub fn activation_widths(&self) -> Result<Vec<usize>, GraphError> {
        if self.layers.is_empty() {
            return Err(GraphError::Empty);
        }
        let mut widths = Vec::with_capacity(self.layers.len() + 1);
        widths.push(self.input_len());
        for (index, layer) in self.layers.iter().enumerate() {
            let width = widths[index];
            let next = match &layer.op {
                LayerOp::Dense {
                    inputs,
                    outputs,
                    weights,
                    bias,
                } => {
                    if *inputs == 0 || *outputs == 0 {
                        return Err(GraphError::EmptyDense { layer: index });
                    }
                    if *inputs != width {
                        return Err(GraphError::ShapeMismatch {
                            layer: index,
                            expected: *inputs,
                            actual: width,
                        });
                    }
                    if weights.len() != inputs * outputs {
                        return Err(GraphError::ShapeMismatch {
                            layer: index,
                            expected: inputs * outputs,
                            actual: weights.len(),
                        });
                    }
                    if bias.len() != *outputs {
                        return Err(GraphError::ShapeMismatch {
                            layer: index,
                            expected: *outputs,
                            actual: bias.len(),
                        });
                    }
                    *outputs
                }
                LayerOp::Relu => width,
                LayerOp::Residual { source } => {
                    let Some(&source_width) = widths.get(*source) else {
                        return Err(GraphError::InvalidResidual {
                            layer: index,
                            origin: *source,
                        });
                    };
                    if source_width != width {
                        return Err(GraphError::ShapeMismatch {
                            layer: index,
                            expected: width,
                            actual: source_width,
                        });
                    }
                    width
                }
                LayerOp::MaxPool { window } => {
                    if *window == 0 || width % window != 0 {
                        return Err(GraphError::PoolWindow {
                            layer: index,
                            window: *window,
                            width,
                        });
                    }
                    width / window
                }
            };
            widths.push(next);
        }
        Ok(widths)
    }

    /// Number of output logits.
    pub fn output_len(&self) -> Result<usize, GraphError> {
        self.activation_widths()
            .map(|widths| widths.last().copied().unwrap_or_default())
    }

    /// Content digest over identity, shape and every weight.
    pub fn digest(&self) -> Digest {
        let mut hasher = Hasher::new();
        hasher.update(GRAPH_DIGEST_DOMAIN);
        hasher.update(&self.identity.to_bytes());
        for dim in [
            self.input_shape.channels,
            self.input_shape.height,
            self.input_shape.width,
        ] {
            hasher.update(&(dim as u64).to_le_bytes());
        }
        for layer in &self.layers {
            hasher.update_framed(layer.name.as_bytes());
            hasher.update_framed(layer.op.name().as_bytes());
            match &layer.op {
                LayerOp::Dense {
                    inputs,
                    outputs,
                    weights,
                    bias,
                } => {
                    hasher.update(&(*inputs as u64).to_le_bytes());
                    hasher.update(&(*outputs as u64).to_le_bytes());
                    for value in weights.iter().chain(bias.iter()) {
                        hasher.update(&value.to_le_bytes());
                    }
                }
                LayerOp::Relu => {}
                LayerOp::Residual { source } => hasher.update(&(*source as u64).to_le_bytes()),
                LayerOp::MaxPool { window } => hasher.update(&(*window as u64).to_le_bytes()),
            }
        }
        hasher.finalize().into_bytes()
    }
}
