//! Core library entry point for `zkinfer`, a verifiable image-classification
//! pipeline.
//!
//! A request is classified by a fixed quantized model; a per-user sampling
//! gate decides whether the classification is also proved. Selected requests
//! compile (once per model identity) into an arithmetic circuit, replay the
//! inference as a witness, produce a commit-and-open proof and verify it
//! before the outcome is recorded in the per-user ledger.
//!
//! The high-level entry points are [`pipeline::Orchestrator`] for end-to-end
//! requests and the free functions below for the bare circuit workflow.

pub mod circuit;
pub mod commit;
pub mod config;
pub mod field;
pub mod gate;
pub mod hash;
pub mod ledger;
pub mod model;
pub mod pipeline;
pub mod proof;
pub mod ser;
pub mod transcript;
pub mod utils;
pub mod witness;

pub use circuit::{CircuitArtifact, CircuitCache, CircuitCompiler, CompilationError};
pub use config::{ConfigError, PipelineConfig};
pub use gate::{InvalidConfigurationError, ProofThreshold, SamplingGate, SamplingPolicy};
pub use ledger::{AccountStats, OutcomeLedger, UserId};
pub use model::{ModelIdentity, ModelVariant, UnsupportedModelError};
pub use pipeline::{Orchestrator, PipelineError, ProofOutcome, ProofStatus};
pub use proof::{Proof, ProverError, PublicValues, VerifierError};
pub use utils::ProofBytes;
pub use witness::{Witness, WitnessError};

use circuit::{ProvingKey, VerificationKey};

/// Compiles `graph` under `config`.
pub fn compile(
    graph: &model::ModelGraph,
    config: &PipelineConfig,
) -> Result<CircuitArtifact, CompilationError> {
    CircuitCompiler::new(config).compile(graph)
}

/// Proves `witness` against the proving key with the configured limits.
pub fn prove(
    circuit: &circuit::CircuitDescription,
    witness: &Witness,
    key: &ProvingKey,
    config: &PipelineConfig,
) -> Result<Proof, ProverError> {
    proof::Prover::new(config.limits).prove(circuit, witness, key)
}

/// Verifies `proof` against the claimed public values.
pub fn verify(
    proof: &Proof,
    public: &PublicValues,
    vk: &VerificationKey,
) -> Result<bool, VerifierError> {
    proof::verify(proof, public, vk)
}
