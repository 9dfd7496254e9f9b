//! Proof stages run by the worker pool.

use crate::circuit::{CircuitDescription, ProvingKey, VerificationKey};
use crate::config::ResourceLimits;
use crate::proof::{
    self, Proof, Prover, ProverError, PublicValues, VerificationVerdict, VerifierError,
};
use crate::witness::{self, Witness, WitnessError};

/// Witness, prove and verify stages behind one seam so deployments can swap
/// the proving system without touching orchestration.
pub trait ProofBackend: Send + Sync + std::fmt::Debug {
    fn build_witness(
        &self,
        circuit: &CircuitDescription,
        input: &[i64],
        output: &[i64],
    ) -> Result<Witness, WitnessError> {
        witness::build(circuit, input, output)
    }

    fn prove(
        &self,
        circuit: &CircuitDescription,
        witness: &Witness,
        key: &ProvingKey,
    ) -> Result<Proof, ProverError>;

    fn verify(
        &self,
        proof: &Proof,
        public: &PublicValues,
        vk: &VerificationKey,
    ) -> Result<VerificationVerdict, VerifierError> {
        proof::verify_with_report(proof, public, vk)
    }
}

/// Built-in commit-and-open backend.
#[derive(Debug, Clone, Copy)]
pub struct NativeBackend {
    prover: Prover,
}

impl NativeBackend {
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            prover: Prover::new(limits),
        }
    }
}

impl ProofBackend for NativeBackend {
    fn prove(
        &self,
        circuit: &CircuitDescription,
        witness: &Witness,
        key: &ProvingKey,
    ) -> Result<Proof, ProverError> {
        self.prover.prove(circuit, witness, key)
    }
}
