//! Fixed model graphs, quantization and the inference adapter.

pub mod graph;
pub mod inference;
pub mod quant;
pub mod registry;

pub use graph::{
    GraphError, Layer, LayerOp, ModelGraph, ModelIdentity, ModelVariant, TensorShape,
    UnsupportedModelError,
};
pub use inference::{Classification, Image, InferenceAdapter, InferenceError, InferenceResult};
pub use quant::QuantizationError;
pub use registry::{builtin_graph, ModelRegistry, RegistryError, BUILTIN_CLASSES, BUILTIN_INPUT_SHAPE};
