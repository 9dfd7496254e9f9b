use thiserror::Error;

use crate::circuit::WireId;
use crate::commit::CommitmentError;
use crate::hash::MerkleError;
use crate::model::ModelIdentity;
use crate::ser::SerError;
use crate::transcript::TranscriptError;

/// Errors surfaced while producing a proof.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProverError {
    #[error("malformed witness: {0}")]
    MalformedWitness(&'static str),
    #[error("proving key for {key} does not match circuit or witness for {circuit}")]
    KeyMismatch {
        key: ModelIdentity,
        circuit: ModelIdentity,
    },
    #[error("circuit has {wires} wires, prover limit is {limit}")]
    ResourceExhausted { wires: usize, limit: usize },
    #[error("proof is {actual} bytes, limit is {limit}")]
    ProofTooLarge { actual: usize, limit: usize },
    #[error("proving queue is full ({limit} jobs)")]
    Busy { limit: usize },
    #[error("proof job cancelled")]
    Cancelled,
    #[error("transcript error: {0}")]
    Transcript(#[from] TranscriptError),
    #[error("commitment error: {0}")]
    Commitment(#[from] MerkleError),
    #[error("weight commitment error: {0}")]
    WeightCommitment(#[from] CommitmentError),
    #[error("encoding error: {0}")]
    Encoding(#[from] SerError),
}

impl ProverError {
    /// Resource or scheduling failures that may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProverError::ResourceExhausted { .. } | ProverError::Busy { .. } | ProverError::Cancelled
        )
    }
}

/// Structurally malformed proof encodings. Well-formed but invalid proofs are
/// rejected with `Ok(false)` instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifierError {
    #[error("malformed proof encoding: {0}")]
    Malformed(#[from] SerError),
    #[error("unsupported proof version {version}")]
    UnsupportedVersion { version: u16 },
    #[error("opened constraint {index} is not a valid row encoding: {error}")]
    InvalidRow { index: u32, error: SerError },
}

/// Why a well-formed proof was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("proof was produced for a different verification key")]
    KeyMismatch,
    #[error("public values do not match the circuit shape")]
    PublicShape,
    #[error("proof commits to different public values")]
    PublicValuesMismatch,
    #[error("opened constraints differ from the transcript query set")]
    QuerySetMismatch,
    #[error("constraint {index} is not in the committed table")]
    ConstraintPath { index: u32 },
    #[error("wire {wire} opening does not match the witness commitment")]
    WirePath { wire: WireId },
    #[error("wire {wire} is opened more than once or out of order")]
    DuplicateOpening { wire: WireId },
    #[error("wire {wire} is not an opened private wire")]
    UnexpectedOpening { wire: WireId },
    #[error("constraint {index} references an unopened wire")]
    MissingOpening { index: u32 },
    #[error("constraint {index} is violated")]
    ConstraintViolated { index: u32 },
    #[error("dense arguments do not match the opened dense layers")]
    DenseArgumentSet,
    #[error("dense layer {layer} does not match its weight commitments")]
    DenseArgument { layer: u32 },
}
