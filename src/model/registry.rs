//! Built-in model variants and revision management.
//!
//! Built-in graphs are derived deterministically from `(variant, revision)`,
//! so every process materializes bit-identical weights for the same identity.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::info;

use super::graph::{
    Layer, LayerOp, ModelGraph, ModelIdentity, ModelVariant, TensorShape, UnsupportedModelError,
};
use super::quant::quantize;
use crate::config::QuantizationConfig;
use crate::hash::Blake2sXof;

/// Input tensor expected by every built-in variant.
pub const BUILTIN_INPUT_SHAPE: TensorShape = TensorShape {
    channels: 3,
    height: 8,
    width: 8,
};

/// Number of classes the built-in heads predict.
pub const BUILTIN_CLASSES: usize = 10;

const HIDDEN_WIDTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("revision {offered} of {variant} does not supersede current revision {current}")]
    StaleRevision {
        variant: ModelVariant,
        current: u32,
        offered: u32,
    },
}

/// Current graph per variant.
#[derive(Debug)]
pub struct ModelRegistry {
    models: RwLock<HashMap<ModelVariant, Arc<ModelGraph>>>,
}

impl ModelRegistry {
    /// Registry with every built-in variant at revision 1.
    pub fn with_builtin(quant: &QuantizationConfig) -> Self {
        let models = ModelVariant::ALL
            .into_iter()
            .map(|variant| (variant, Arc::new(builtin_graph(variant, 1, quant))))
            .collect();
        Self {
            models: RwLock::new(models),
        }
    }

    /// Current graph for a variant.
    pub fn current(&self, variant: ModelVariant) -> Option<Arc<ModelGraph>> {
        self.models.read().get(&variant).cloned()
    }

    /// Resolves a selector string to the current graph.
    pub fn resolve(&self, selector: &str) -> Result<Arc<ModelGraph>, UnsupportedModelError> {
        let variant: ModelVariant = selector.parse()?;
        self.current(variant).ok_or_else(|| UnsupportedModelError {
            selector: selector.to_owned(),
        })
    }

    /// Installs a newer revision, returning the identity it replaced.
    pub fn install(&self, graph: ModelGraph) -> Result<Option<ModelIdentity>, RegistryError> {
        let mut models = self.models.write();
        let variant = graph.identity.variant;
        let previous = models.get(&variant).map(|current| current.identity);
        if let Some(current) = previous {
            if graph.identity.revision <= current.revision {
                return Err(RegistryError::StaleRevision {
                    variant,
                    current: current.revision,
                    offered: graph.identity.revision,
                });
            }
        }
        info!(model = %graph.identity, replaced = ?previous.map(|id| id.to_string()), "installed model revision");
        models.insert(variant, Arc::new(graph));
        Ok(previous)
    }
}

/// Number of residual blocks per variant.
fn residual_blocks(variant: ModelVariant) -> usize {
    match variant {
        ModelVariant::ResNet18 => 2,
        ModelVariant::ResNet34 => 4,
    }
}

/// Builds the compact residual network for `(variant, revision)`:
/// a dense stem, `n` residual blocks of `dense → relu → dense → add → relu`,
/// and a dense classification head.
pub fn builtin_graph(variant: ModelVariant, revision: u32, quant: &QuantizationConfig) -> ModelGraph {
    let identity = ModelIdentity::new(variant, revision);
    let mut layers = Vec::new();
    let dense = |name: String, inputs: usize, outputs: usize| {
        let seed = format!("zkinfer/weights/{identity}/{name}");
        Layer::new(name, seeded_dense(seed.as_bytes(), inputs, outputs, quant))
    };

    layers.push(dense("stem".to_owned(), BUILTIN_INPUT_SHAPE.len(), HIDDEN_WIDTH));
    layers.push(Layer::new("stem_relu", LayerOp::Relu));
    for block in 0..residual_blocks(variant) {
        // Activation index of the block input is the current layer count.
        let block_input = layers.len();
        layers.push(dense(format!("block{block}_fc1"), HIDDEN_WIDTH, HIDDEN_WIDTH));
        layers.push(Layer::new(format!("block{block}_relu1"), LayerOp::Relu));
        layers.push(dense(format!("block{block}_fc2"), HIDDEN_WIDTH, HIDDEN_WIDTH));
        layers.push(Layer::new(
            format!("block{block}_add"),
            LayerOp::Residual {
                source: block_input,
            },
        ));
        layers.push(Layer::new(format!("block{block}_relu2"), LayerOp::Relu));
    }
    layers.push(dense("head".to_owned(), HIDDEN_WIDTH, BUILTIN_CLASSES));

    ModelGraph::new(identity, BUILTIN_INPUT_SHAPE, layers)
}

/// He-uniform weights and small biases drawn from a seeded XOF.
fn seeded_dense(seed: &[u8], inputs: usize, outputs: usize, quant: &QuantizationConfig) -> LayerOp {
    let mut xof = Blake2sXof::new(seed);
    let limit = (6.0 / inputs as f64).sqrt();
    let weights = (0..inputs * outputs)
        .map(|_| quantize(xof.next_signed_unit() * limit, quant.scale_bits))
        .collect();
    let bias = (0..outputs)
        .map(|_| quantize(xof.next_signed_unit() * 0.1, 2 * quant.scale_bits))
        .collect();
    LayerOp::Dense {
        inputs,
        outputs,
        weights,
        bias,
    }
}
