//! Verifier.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. version and row encodings (structural, reported as [`VerifierError`]);
//! 2. key digest, public shape and public equality;
//! 3. the opened row set equals mandatory ∪ transcript-sampled indices;
//! 4. row paths against the constraint root;
//! 5. wire openings: private, strictly ascending, paths against the witness root;
//! 6. every opened row evaluates to zero and no wire is opened needlessly;
//! 7. one linear argument per opened dense layer holds against the row
//!    commitments in the key.

use std::collections::{BTreeMap, BTreeSet};

use super::dense::{check_layers, group_rows, GroupError};
use super::errors::{RejectReason, VerifierError};
use super::types::{wire_leaf_payload, Proof, PublicValues, PROOF_VERSION};
use crate::circuit::{Constraint, VerificationKey, WireId};
use crate::field::FieldElement;
use crate::hash::{encode_leaf, verify_path};
use crate::transcript::Transcript;

/// Outcome of checking a well-formed proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationVerdict {
    Accept,
    Reject(RejectReason),
}

impl VerificationVerdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, VerificationVerdict::Accept)
    }
}

/// Verifies a decoded proof against the claimed public values.
pub fn verify(
    proof: &Proof,
    public: &PublicValues,
    vk: &VerificationKey,
) -> Result<bool, VerifierError> {
    verify_with_report(proof, public, vk).map(|verdict| verdict.is_accept())
}

/// Decodes and verifies a proof encoding.
pub fn verify_bytes(
    bytes: &[u8],
    public: &PublicValues,
    vk: &VerificationKey,
) -> Result<bool, VerifierError> {
    let proof = Proof::from_bytes(bytes)?;
    verify(&proof, public, vk)
}

/// Like [`verify`], but names the first failed check.
pub fn verify_with_report(
    proof: &Proof,
    public: &PublicValues,
    vk: &VerificationKey,
) -> Result<VerificationVerdict, VerifierError> {
    if proof.version != PROOF_VERSION {
        return Err(VerifierError::UnsupportedVersion {
            version: proof.version,
        });
    }
    let rows = proof
        .constraint_openings
        .iter()
        .map(|opening| {
            Constraint::decode(&opening.row).map_err(|error| VerifierError::InvalidRow {
                index: opening.index,
                error,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(match check(proof, &rows, public, vk) {
        Ok(()) => VerificationVerdict::Accept,
        Err(reason) => VerificationVerdict::Reject(reason),
    })
}

fn check(
    proof: &Proof,
    rows: &[Constraint],
    public: &PublicValues,
    vk: &VerificationKey,
) -> Result<(), RejectReason> {
    let key_digest = vk.digest();
    if proof.key_digest != key_digest {
        return Err(RejectReason::KeyMismatch);
    }
    let layout = vk.layout;
    if !public.fits(&layout) || !proof.public.fits(&layout) {
        return Err(RejectReason::PublicShape);
    }
    if proof.public != *public {
        return Err(RejectReason::PublicValuesMismatch);
    }

    let mut transcript = Transcript::new(vk.param_digest.as_bytes(), &key_digest);
    let sampled = transcript
        .absorb_public(&public.encode())
        .and_then(|_| transcript.absorb_witness_root(&proof.witness_root))
        .and_then(|_| transcript.draw_indices(vk.query_count as usize, vk.constraint_count as usize))
        .map_err(|_| RejectReason::QuerySetMismatch)?;
    let expected: BTreeSet<u32> = vk.mandatory.iter().copied().chain(sampled).collect();
    if !expected
        .iter()
        .copied()
        .eq(proof.constraint_openings.iter().map(|opening| opening.index))
    {
        return Err(RejectReason::QuerySetMismatch);
    }

    for opening in &proof.constraint_openings {
        verify_path(
            &encode_leaf(&opening.row),
            opening.index as usize,
            vk.constraint_count as usize,
            &opening.path,
            &vk.constraint_root,
        )
        .map_err(|_| RejectReason::ConstraintPath {
            index: opening.index,
        })?;
    }

    let first_private = layout.public_count();
    let mut opened: BTreeMap<WireId, FieldElement> = BTreeMap::new();
    let mut previous: Option<WireId> = None;
    for opening in &proof.wire_openings {
        let wire = opening.wire;
        if layout.is_public(wire) || wire.0 >= layout.total {
            return Err(RejectReason::UnexpectedOpening { wire });
        }
        if previous.is_some_and(|prev| prev >= wire) {
            return Err(RejectReason::DuplicateOpening { wire });
        }
        previous = Some(wire);
        verify_path(
            &encode_leaf(&wire_leaf_payload(wire, &opening.value)),
            (wire.0 - first_private) as usize,
            layout.private_count() as usize,
            &opening.path,
            &proof.witness_root,
        )
        .map_err(|_| RejectReason::WirePath { wire })?;
        opened.insert(wire, opening.value);
    }

    let lookup = |wire: WireId| {
        if layout.is_public(wire) {
            public.wire_value(&layout, wire)
        } else {
            opened.get(&wire).copied()
        }
    };
    let mut referenced = BTreeSet::new();
    for (opening, row) in proof.constraint_openings.iter().zip(rows) {
        referenced.extend(row.wires().into_iter().filter(|w| !layout.is_public(*w)));
        if matches!(row, Constraint::Dense { .. }) {
            continue;
        }
        let residual = row.residual(lookup).ok_or(RejectReason::MissingOpening {
            index: opening.index,
        })?;
        if !residual.is_zero() {
            return Err(RejectReason::ConstraintViolated {
                index: opening.index,
            });
        }
    }

    if let Some(wire) = opened.keys().find(|wire| !referenced.contains(*wire)) {
        return Err(RejectReason::UnexpectedOpening { wire: *wire });
    }

    let groups = group_rows(
        proof
            .constraint_openings
            .iter()
            .map(|opening| opening.index)
            .zip(rows),
        lookup,
    )
    .map_err(|error| match error {
        GroupError::Missing { index } => RejectReason::MissingOpening { index },
        GroupError::Inconsistent { layer } => RejectReason::DenseArgument { layer },
    })?;
    check_layers(vk, &transcript, &groups, &proof.dense_arguments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{CircuitArtifact, CircuitCompiler};
    use crate::config::PipelineConfig;
    use crate::field::FieldElementOps;
    use crate::model::{builtin_graph, InferenceAdapter, ModelVariant};
    use crate::proof::Prover;
    use crate::witness;

    fn proved() -> (CircuitArtifact, Proof) {
        let config = PipelineConfig::default();
        let graph = builtin_graph(ModelVariant::ResNet18, 1, &config.quantization);
        let artifact = CircuitCompiler::new(&config).compile(&graph).unwrap();
        let input: Vec<i64> = (0..graph.input_len() as i64).map(|i| (i * 53) % 400 - 200).collect();
        let output = InferenceAdapter::new(config.quantization)
            .forward(&graph, &input)
            .unwrap();
        let witness = witness::build(&artifact.description, &input, &output).unwrap();
        let proof = Prover::new(config.limits)
            .prove(&artifact.description, &witness, &artifact.proving_key)
            .unwrap();
        (artifact, proof)
    }

    #[test]
    fn honest_proof_is_accepted_twice() {
        let (artifact, proof) = proved();
        let vk = &artifact.verification_key;
        assert!(verify(&proof, &proof.public, vk).unwrap());
        assert!(verify(&proof, &proof.public, vk).unwrap());
        let bytes = proof.to_bytes().unwrap();
        assert!(verify_bytes(bytes.as_slice(), &proof.public, vk).unwrap());
    }

    #[test]
    fn mutated_claimed_output_is_rejected() {
        let (artifact, proof) = proved();
        let mut claimed = proof.public.clone();
        claimed.outputs[0] += 1;
        assert_eq!(
            verify_with_report(&proof, &claimed, &artifact.verification_key).unwrap(),
            VerificationVerdict::Reject(RejectReason::PublicValuesMismatch)
        );

        let mut forged = proof.clone();
        forged.public = claimed.clone();
        assert!(!verify(&forged, &claimed, &artifact.verification_key).unwrap());
    }

    #[test]
    fn foreign_key_is_rejected() {
        let (artifact, proof) = proved();
        let mut vk = artifact.verification_key.clone();
        vk.query_count += 1;
        assert_eq!(
            verify_with_report(&proof, &proof.public, &vk).unwrap(),
            VerificationVerdict::Reject(RejectReason::KeyMismatch)
        );
    }

    #[test]
    fn tampered_wire_value_is_rejected() {
        let (artifact, mut proof) = proved();
        let opening = &mut proof.wire_openings[0];
        opening.value = opening.value.add(&FieldElement::ONE);
        let wire = opening.wire;
        assert_eq!(
            verify_with_report(&proof, &proof.public, &artifact.verification_key).unwrap(),
            VerificationVerdict::Reject(RejectReason::WirePath { wire })
        );
    }

    #[test]
    fn dropped_row_changes_the_query_set() {
        let (artifact, mut proof) = proved();
        proof.constraint_openings.pop();
        assert_eq!(
            verify_with_report(&proof, &proof.public, &artifact.verification_key).unwrap(),
            VerificationVerdict::Reject(RejectReason::QuerySetMismatch)
        );
    }

    #[test]
    fn tampered_dense_argument_is_rejected() {
        let (artifact, proof) = proved();
        let vk = &artifact.verification_key;
        let layer = proof.dense_arguments[0].layer;

        let mut forged = proof.clone();
        forged.dense_arguments[0].argument.responses[1] += crate::commit::Scalar::from(1u64);
        assert_eq!(
            verify_with_report(&forged, &forged.public, vk).unwrap(),
            VerificationVerdict::Reject(RejectReason::DenseArgument { layer })
        );

        let mut forged = proof.clone();
        forged.dense_arguments.pop();
        assert_eq!(
            verify_with_report(&forged, &forged.public, vk).unwrap(),
            VerificationVerdict::Reject(RejectReason::DenseArgumentSet)
        );
    }

    #[test]
    fn foreign_weight_commitment_is_rejected() {
        let (artifact, proof) = proved();
        let mut vk = artifact.verification_key.clone();
        let layer = proof.dense_arguments[0].layer as usize;
        vk.dense_commitments[layer].rows.swap(0, 1);
        let mut forged = proof.clone();
        forged.key_digest = vk.digest();
        assert!(matches!(
            verify_with_report(&forged, &forged.public, &vk).unwrap(),
            VerificationVerdict::Reject(_)
        ));
    }

    #[test]
    fn unknown_version_is_structural() {
        let (artifact, mut proof) = proved();
        proof.version = 9;
        assert_eq!(
            verify(&proof, &proof.public, &artifact.verification_key).unwrap_err(),
            VerifierError::UnsupportedVersion { version: 9 }
        );
    }

    #[test]
    fn garbage_row_is_structural() {
        let (artifact, mut proof) = proved();
        proof.constraint_openings[0].row = vec![7];
        assert!(matches!(
            verify(&proof, &proof.public, &artifact.verification_key),
            Err(VerifierError::InvalidRow { .. })
        ));
    }
}
