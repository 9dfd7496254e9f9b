use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::circuit::CompilationError;
use crate::hash::Digest;
use crate::model::ModelIdentity;
use crate::proof::{ProverError, PublicValues, RejectReason, VerifierError};
use crate::utils::ProofBytes;
use crate::witness::WitnessError;

/// Why a proof attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureCause {
    #[error("circuit compilation failed: {0}")]
    Compilation(CompilationError),
    #[error("witness generation failed: {0}")]
    Witness(WitnessError),
    #[error("proving failed: {0}")]
    Prover(ProverError),
    #[error("verification rejected the proof: {0}")]
    VerificationMismatch(RejectReason),
    #[error("verifier fault: {0}")]
    VerifierFault(VerifierError),
}

impl FailureCause {
    /// Stable label for logs and status surfaces.
    pub fn kind(&self) -> &'static str {
        match self {
            FailureCause::Compilation(_) => "compilation",
            FailureCause::Witness(_) => "witness",
            FailureCause::Prover(ProverError::Busy { .. }) => "busy",
            FailureCause::Prover(_) => "prover",
            FailureCause::VerificationMismatch(_) => "verification_mismatch",
            FailureCause::VerifierFault(_) => "verifier_fault",
        }
    }

    /// Failures that point at a forged result or model drift rather than
    /// infrastructure trouble.
    pub fn is_integrity_signal(&self) -> bool {
        matches!(
            self,
            FailureCause::Witness(_) | FailureCause::VerificationMismatch(_)
        )
    }
}

/// Final proof outcome of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofOutcome {
    NotAttempted,
    Succeeded,
    Failed(FailureCause),
    /// Dropped during shutdown; never counted.
    Abandoned,
}

impl ProofOutcome {
    /// Whether the outcome counts as a proof attempt.
    pub fn is_attempted(&self) -> bool {
        matches!(self, ProofOutcome::Succeeded | ProofOutcome::Failed(_))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProofOutcome::Succeeded)
    }
}

impl fmt::Display for ProofOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProofOutcome::NotAttempted => f.write_str("not_attempted"),
            ProofOutcome::Succeeded => f.write_str("succeeded"),
            ProofOutcome::Failed(cause) => write!(f, "failed({})", cause.kind()),
            ProofOutcome::Abandoned => f.write_str("abandoned"),
        }
    }
}

/// Per-request lifecycle:
/// `Inferred → GateEvaluated → {Skipped | ProofAttempted} → Finalized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Inferred,
    GateEvaluated,
    Skipped,
    ProofAttempted,
    Finalized,
}

impl RequestState {
    pub fn can_advance_to(self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Inferred, GateEvaluated)
                | (GateEvaluated, Skipped)
                | (GateEvaluated, ProofAttempted)
                | (Skipped, Finalized)
                | (ProofAttempted, Finalized)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == RequestState::Finalized
    }
}

/// Proof status as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofStatus {
    NotAttempted,
    /// Selected; the proof job has not finished.
    Pending,
    Verified,
    Failed(FailureCause),
    Abandoned,
}

impl ProofStatus {
    pub fn is_final(&self) -> bool {
        !matches!(self, ProofStatus::Pending)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProofStatus::NotAttempted => "not_attempted",
            ProofStatus::Pending => "pending",
            ProofStatus::Verified => "verified",
            ProofStatus::Failed(_) => "failed",
            ProofStatus::Abandoned => "abandoned",
        }
    }
}

impl From<&ProofOutcome> for ProofStatus {
    fn from(outcome: &ProofOutcome) -> Self {
        match outcome {
            ProofOutcome::NotAttempted => ProofStatus::NotAttempted,
            ProofOutcome::Succeeded => ProofStatus::Verified,
            ProofOutcome::Failed(cause) => ProofStatus::Failed(cause.clone()),
            ProofOutcome::Abandoned => ProofStatus::Abandoned,
        }
    }
}

impl fmt::Display for ProofStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProofStatus::Failed(cause) => write!(f, "failed: {cause}"),
            other => f.write_str(other.label()),
        }
    }
}

/// Verified proof material handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofReceipt {
    pub model: ModelIdentity,
    pub proof: ProofBytes,
    pub public: PublicValues,
    #[serde(with = "hex::serde")]
    pub key_digest: Digest,
}
