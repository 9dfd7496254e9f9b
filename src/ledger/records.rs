use std::fmt;

use serde::{Deserialize, Serialize};

use super::account::UserId;
use crate::model::{Classification, ModelIdentity};
use crate::pipeline::{FailureCause, ProofOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Persisted per-request record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: RequestId,
    pub user_id: UserId,
    pub model_type: ModelIdentity,
    /// BLAKE3 content digest of the submitted image.
    pub image_reference: String,
    pub classification_result: Option<Classification>,
    pub proof_generated: bool,
    pub proof_verified: Option<bool>,
    pub created_at: u64,
}

impl RequestRecord {
    /// Generated, but verification did not accept it.
    pub fn failed_verification(&self) -> bool {
        self.proof_generated && self.proof_verified == Some(false)
    }

    /// No proof exists for the request yet.
    pub fn pending_proof(&self) -> bool {
        !self.proof_generated
    }

    /// Folds a final outcome into the proof flags. Outcomes that produced no
    /// proof leave the record pending.
    pub(crate) fn apply(&mut self, outcome: &ProofOutcome) {
        match outcome {
            ProofOutcome::Succeeded => {
                self.proof_generated = true;
                self.proof_verified = Some(true);
            }
            ProofOutcome::Failed(
                FailureCause::VerificationMismatch(_) | FailureCause::VerifierFault(_),
            ) => {
                self.proof_generated = true;
                self.proof_verified = Some(false);
            }
            ProofOutcome::Failed(_) | ProofOutcome::NotAttempted | ProofOutcome::Abandoned => {}
        }
    }
}

/// Request-level verification summary for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VerificationStats {
    pub total_requests: u64,
    pub failed_verifications: u64,
    pub pending_proofs: u64,
    pub processed_requests: u64,
}

impl VerificationStats {
    pub(crate) fn collect<'a>(records: impl Iterator<Item = &'a RequestRecord>) -> Self {
        let mut stats = Self::default();
        for record in records {
            stats.total_requests += 1;
            stats.failed_verifications += u64::from(record.failed_verification());
            stats.pending_proofs += u64::from(record.pending_proof());
        }
        stats.processed_requests = stats.total_requests - stats.pending_proofs;
        stats
    }
}
