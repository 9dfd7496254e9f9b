//! Prover.
//!
//! 1. Commit the private wires in a Merkle tree.
//! 2. Bind parameter digest, key digest, public values and witness root into
//!    the transcript and derive the sampled constraint indices.
//! 3. Open the mandatory and sampled constraint rows against the constraint
//!    root and every private wire they reference against the witness root.
//! 4. Argue every opened dense row against its weight commitment, one
//!    argument per layer.
//! 5. Enforce the proof size limit.

use std::collections::BTreeSet;
use std::time::Instant;

use tracing::debug;

use super::dense::{group_rows, prove_layers, GroupError};
use super::errors::ProverError;
use super::types::{wire_leaf_payload, ConstraintOpening, Proof, WireOpening, PROOF_VERSION};
use crate::circuit::{CircuitDescription, ProvingKey, WireId};
use crate::config::ResourceLimits;
use crate::hash::{encode_leaf, MerkleTree};
use crate::transcript::Transcript;
use crate::witness::Witness;

#[derive(Debug, Clone, Copy)]
pub struct Prover {
    limits: ResourceLimits,
}

impl Prover {
    pub fn new(limits: ResourceLimits) -> Self {
        Self { limits }
    }

    /// Produces a proof; never mutates its inputs.
    pub fn prove(
        &self,
        circuit: &CircuitDescription,
        witness: &Witness,
        key: &ProvingKey,
    ) -> Result<Proof, ProverError> {
        let started = Instant::now();
        let vk = &key.verification_key;
        if key.description.model != circuit.model
            || witness.model() != circuit.model
            || vk.layout != circuit.layout
        {
            return Err(ProverError::KeyMismatch {
                key: key.description.model,
                circuit: circuit.model,
            });
        }

        let layout = circuit.layout;
        if layout.total as usize > self.limits.max_wires {
            return Err(ProverError::ResourceExhausted {
                wires: layout.total as usize,
                limit: self.limits.max_wires,
            });
        }
        if witness.values().len() != layout.total as usize {
            return Err(ProverError::MalformedWitness("wire count differs from circuit"));
        }
        let public = witness.public();
        if !public.fits(&layout) {
            return Err(ProverError::MalformedWitness("public values differ from circuit shape"));
        }

        let first_private = layout.public_count();
        let leaves = witness.values()[first_private as usize..]
            .iter()
            .enumerate()
            .map(|(offset, value)| {
                encode_leaf(&wire_leaf_payload(WireId(first_private + offset as u32), value))
            })
            .collect::<Vec<_>>();
        let witness_tree = MerkleTree::from_leaves(&leaves)?;
        let witness_root = witness_tree.root();

        let mut transcript = Transcript::new(vk.param_digest.as_bytes(), &key.key_digest);
        transcript.absorb_public(&public.encode())?;
        transcript.absorb_witness_root(&witness_root)?;
        let sampled = transcript.draw_indices(vk.query_count as usize, vk.constraint_count as usize)?;
        let indices: BTreeSet<u32> = vk.mandatory.iter().copied().chain(sampled).collect();

        let mut private_wires = BTreeSet::new();
        let mut opened_rows = Vec::with_capacity(indices.len());
        let mut constraint_openings = Vec::with_capacity(indices.len());
        for index in indices {
            let constraint = circuit
                .constraints
                .get(index as usize)
                .ok_or(ProverError::MalformedWitness("constraint index out of range"))?;
            private_wires.extend(constraint.wires().into_iter().filter(|w| !layout.is_public(*w)));
            opened_rows.push((index, constraint));
            constraint_openings.push(ConstraintOpening {
                index,
                row: constraint.encode(),
                path: key.constraint_tree.open(index as usize)?,
            });
        }

        let groups = group_rows(opened_rows, |wire| witness.value(wire)).map_err(|error| match error {
            GroupError::Missing { .. } => ProverError::MalformedWitness("dense row reads a missing wire"),
            GroupError::Inconsistent { .. } => {
                ProverError::MalformedWitness("dense rows of one layer disagree on inputs")
            }
        })?;
        let dense_arguments = prove_layers(circuit, key, &transcript, &groups)?;

        let wire_openings = private_wires
            .into_iter()
            .map(|wire| {
                let value = witness
                    .value(wire)
                    .ok_or(ProverError::MalformedWitness("opened wire out of range"))?;
                let path = witness_tree.open((wire.0 - first_private) as usize)?;
                Ok(WireOpening { wire, value, path })
            })
            .collect::<Result<Vec<_>, ProverError>>()?;

        let proof = Proof {
            version: PROOF_VERSION,
            key_digest: key.key_digest,
            public: public.clone(),
            witness_root,
            constraint_openings,
            wire_openings,
            dense_arguments,
        };

        let size = proof.encoded_len();
        if size > self.limits.max_proof_bytes {
            return Err(ProverError::ProofTooLarge {
                actual: size,
                limit: self.limits.max_proof_bytes,
            });
        }

        debug!(
            model = %circuit.model,
            rows = proof.constraint_openings.len(),
            wires = proof.wire_openings.len(),
            dense_layers = proof.dense_arguments.len(),
            bytes = size,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "proof generated"
        );
        Ok(proof)
    }
}
