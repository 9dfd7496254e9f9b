//! Circuit compilation and the artifact cache.

pub mod cache;
pub mod compiler;
pub mod types;

pub use cache::CircuitCache;
pub use compiler::{CircuitCompiler, CircuitEstimate, CompilationError};
pub use types::{
    CircuitArtifact, CircuitDescription, Constraint, DenseCommitment, DenseLayer, DenseOpening,
    LinearCombination, ProvingKey, VerificationKey, WireId, WireLayout, WitnessOp,
};
