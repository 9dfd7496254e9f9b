//! Fiat–Shamir transcript binding an inference proof.
//!
//! | Phase | Label | Payload |
//! |-------|-------|---------|
//! | Init | [`TranscriptLabel::ParamDigest`] | proving-parameter digest |
//! | Init | [`TranscriptLabel::KeyDigest`] | verification-key digest |
//! | Public | [`TranscriptLabel::PublicValues`] | encoded public inputs and outputs |
//! | WitnessCommit | [`TranscriptLabel::WitnessRoot`] | Merkle root of the private wires |
//! | Queries | [`TranscriptLabel::QueryIndices`] | derived constraint indices |
//! | Queries | [`TranscriptLabel::DenseLayer`] | per-layer context for dense-row arguments |
//!
//! Identical parameters, keys, public values and witness roots yield identical
//! query sets for prover and verifier. Absorbing out of order is an error.

use thiserror::Error;

use crate::hash::{Blake2sXof, Digest, Hasher};

const TRANSCRIPT_DOMAIN: &[u8] = b"ZKINFER-TRANSCRIPT-V1";

/// Transcript phases in the order they must be visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptPhase {
    Init,
    Public,
    WitnessCommit,
    Queries,
}

/// Domain-separation labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptLabel {
    ParamDigest,
    KeyDigest,
    PublicValues,
    WitnessRoot,
    QueryIndices,
    DenseLayer,
}

impl TranscriptLabel {
    fn tag(self) -> u8 {
        match self {
            TranscriptLabel::ParamDigest => 0x01,
            TranscriptLabel::KeyDigest => 0x02,
            TranscriptLabel::PublicValues => 0x03,
            TranscriptLabel::WitnessRoot => 0x04,
            TranscriptLabel::QueryIndices => 0x05,
            TranscriptLabel::DenseLayer => 0x06,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TranscriptError {
    /// A label was absorbed outside of its phase.
    #[error("transcript label {label:?} not allowed in phase {phase:?}")]
    OutOfOrder {
        label: TranscriptLabel,
        phase: TranscriptPhase,
    },
    /// Query sampling over an empty domain.
    #[error("cannot sample queries from an empty domain")]
    EmptyDomain,
}

/// Deterministic, domain-separated transcript.
#[derive(Debug, Clone)]
pub struct Transcript {
    state: Digest,
    phase: TranscriptPhase,
}

impl Transcript {
    /// Starts a transcript bound to the parameter and verification-key digests.
    pub fn new(param_digest: &Digest, key_digest: &Digest) -> Self {
        let mut transcript = Self {
            state: crate::hash::hash(TRANSCRIPT_DOMAIN).into_bytes(),
            phase: TranscriptPhase::Init,
        };
        transcript.mix(TranscriptLabel::ParamDigest, param_digest);
        transcript.mix(TranscriptLabel::KeyDigest, key_digest);
        transcript.phase = TranscriptPhase::Public;
        transcript
    }

    pub fn phase(&self) -> TranscriptPhase {
        self.phase
    }

    /// Absorbs the canonical encoding of the public values.
    pub fn absorb_public(&mut self, encoded: &[u8]) -> Result<(), TranscriptError> {
        self.expect(TranscriptLabel::PublicValues, TranscriptPhase::Public)?;
        self.mix(TranscriptLabel::PublicValues, encoded);
        self.phase = TranscriptPhase::WitnessCommit;
        Ok(())
    }

    /// Absorbs the private-wire commitment root.
    pub fn absorb_witness_root(&mut self, root: &Digest) -> Result<(), TranscriptError> {
        self.expect(TranscriptLabel::WitnessRoot, TranscriptPhase::WitnessCommit)?;
        self.mix(TranscriptLabel::WitnessRoot, root);
        self.phase = TranscriptPhase::Queries;
        Ok(())
    }

    /// Draws `count` indices below `bound`, returned sorted and deduplicated.
    pub fn draw_indices(&mut self, count: usize, bound: usize) -> Result<Vec<u32>, TranscriptError> {
        self.expect(TranscriptLabel::QueryIndices, TranscriptPhase::Queries)?;
        if bound == 0 {
            return Err(TranscriptError::EmptyDomain);
        }
        let mut seed = Hasher::new();
        seed.update(&self.state);
        seed.update(&[TranscriptLabel::QueryIndices.tag()]);
        seed.update(&(count as u64).to_le_bytes());
        seed.update(&(bound as u64).to_le_bytes());
        let mut xof: Blake2sXof = seed.finalize_xof();

        let mut indices = (0..count)
            .map(|_| (xof.next_u64() % bound as u64) as u32)
            .collect::<Vec<_>>();
        indices.sort_unstable();
        indices.dedup();
        Ok(indices)
    }

    /// Context digest binding the dense-row argument of committed `layer` to
    /// everything absorbed so far. Leaves the state untouched.
    pub fn dense_context(&self, layer: u32) -> Result<Digest, TranscriptError> {
        self.expect(TranscriptLabel::DenseLayer, TranscriptPhase::Queries)?;
        let mut hasher = Hasher::new();
        hasher.update(&self.state);
        hasher.update(&[TranscriptLabel::DenseLayer.tag()]);
        hasher.update(&layer.to_le_bytes());
        Ok(hasher.finalize().into_bytes())
    }

    fn expect(&self, label: TranscriptLabel, phase: TranscriptPhase) -> Result<(), TranscriptError> {
        if self.phase != phase {
            return Err(TranscriptError::OutOfOrder {
                label,
                phase: self.phase,
            });
        }
        Ok(())
    }

    fn mix(&mut self, label: TranscriptLabel, payload: &[u8]) {
        let mut hasher = Hasher::new();
        hasher.update(&self.state);
        hasher.update(&[label.tag()]);
        hasher.update_framed(payload);
        self.state = hasher.finalize().into_bytes();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(root: u8) -> Transcript {
        let mut transcript = Transcript::new(&[1; 32], &[2; 32]);
        transcript.absorb_public(b"public").unwrap();
        transcript.absorb_witness_root(&[root; 32]).unwrap();
        transcript
    }

    #[test]
    fn same_inputs_same_queries() {
        let a = ready(7).draw_indices(16, 1000).unwrap();
        let b = ready(7).draw_indices(16, 1000).unwrap();
        assert_eq!(a, b);
        assert!(a.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(a.iter().all(|&index| index < 1000));
    }

    #[test]
    fn witness_root_changes_queries() {
        let a = ready(7).draw_indices(16, 1 << 20).unwrap();
        let b = ready(8).draw_indices(16, 1 << 20).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn dense_contexts_are_per_layer_and_follow_the_root() {
        let transcript = ready(7);
        let first = transcript.dense_context(0).unwrap();
        assert_eq!(first, ready(7).dense_context(0).unwrap());
        assert_ne!(first, transcript.dense_context(1).unwrap());
        assert_ne!(first, ready(8).dense_context(0).unwrap());
        assert_eq!(
            Transcript::new(&[1; 32], &[2; 32]).dense_context(0).unwrap_err(),
            TranscriptError::OutOfOrder {
                label: TranscriptLabel::DenseLayer,
                phase: TranscriptPhase::Public,
            }
        );
    }

    #[test]
    fn out_of_order_absorb_is_rejected() {
        let mut transcript = Transcript::new(&[0; 32], &[0; 32]);
        let err = transcript.absorb_witness_root(&[0; 32]).unwrap_err();
        assert_eq!(
            err,
            TranscriptError::OutOfOrder {
                label: TranscriptLabel::WitnessRoot,
                phase: TranscriptPhase::Public,
            }
        );
        assert_eq!(
            ready(0).draw_indices(4, 0).unwrap_err(),
            TranscriptError::EmptyDomain
        );
    }
}
