//! Linear arguments for opened dense rows.
//!
//! The opened rows of committed layer `l` are folded with weights `γ_i`
//! derived from the transcript: the committed vectors combine to
//! `u = Σ γ_i·(b_i, w_i)` under `C = Σ γ_i·C_i`, and the evaluation at
//! `x̃ = (1, x)` must equal `Σ γ_i·(2^s·q_i + Σ_k 2^k·r_ik)`. One
//! [`LinearArgument`] per layer shows this without opening `u`.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use ark_bn254::G1Projective;
use ark_ff::{One, Zero};

use super::errors::{ProverError, RejectReason};
use super::types::DenseArgument;
use crate::circuit::{CircuitDescription, Constraint, ProvingKey, VerificationKey, WireId};
use crate::commit::{
    decode_point, derive_scalar, scalar_from_felt, scalar_from_i64, CommitmentKey, LinearArgument,
    Scalar,
};
use crate::field::FieldElement;
use crate::hash::Digest;
use crate::transcript::Transcript;

const ROW_WEIGHT_DOMAIN: &[u8] = b"ZKINFER-DENSE-ROW-WEIGHT-V1";

/// Opened rows of one committed layer with their public evaluation data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LayerRows {
    pub layer: u32,
    inputs: Vec<WireId>,
    pub rows: Vec<u32>,
    /// `(1, x_1, ..., x_n)`.
    pub point: Vec<Scalar>,
    /// Per row `2^s·q + Σ_k 2^k·r_k`.
    pub values: Vec<Scalar>,
}

impl LayerRows {
    fn row_weights(&self, context: &Digest) -> Vec<Scalar> {
        self.rows
            .iter()
            .map(|row| derive_scalar(ROW_WEIGHT_DOMAIN, context, &row.to_le_bytes()))
            .collect()
    }

    fn claimed(&self, gammas: &[Scalar]) -> Scalar {
        self.values
            .iter()
            .zip(gammas)
            .fold(Scalar::zero(), |acc, (value, gamma)| acc + *value * gamma)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GroupError {
    /// Row `index` references a wire without a value.
    Missing { index: u32 },
    /// Rows of one layer disagree on their input wires.
    Inconsistent { layer: u32 },
}

/// Groups the dense rows among `rows` by layer, ascending.
pub(crate) fn group_rows<'a, I, F>(rows: I, value: F) -> Result<Vec<LayerRows>, GroupError>
where
    I: IntoIterator<Item = (u32, &'a Constraint)>,
    F: Fn(WireId) -> Option<FieldElement>,
{
    let mut layers: BTreeMap<u32, LayerRows> = BTreeMap::new();
    for (index, constraint) in rows {
        let Constraint::Dense {
            layer,
            row,
            inputs,
            quotient,
            remainder,
            shift,
        } = constraint
        else {
            continue;
        };
        let lift = |wire: WireId| {
            value(wire)
                .map(scalar_from_felt)
                .ok_or(GroupError::Missing { index })
        };

        let mut claimed = Scalar::zero();
        let mut weight = Scalar::one();
        for k in 0..*shift {
            claimed += weight * lift(remainder.offset(k))?;
            weight = weight + weight;
        }
        claimed += weight * lift(*quotient)?;

        let entry = match layers.entry(*layer) {
            Entry::Vacant(slot) => {
                let point = std::iter::once(Ok(Scalar::one()))
                    .chain(inputs.iter().map(|wire| lift(*wire)))
                    .collect::<Result<Vec<_>, _>>()?;
                slot.insert(LayerRows {
                    layer: *layer,
                    inputs: inputs.clone(),
                    rows: Vec::new(),
                    point,
                    values: Vec::new(),
                })
            }
            Entry::Occupied(slot) => {
                let entry = slot.into_mut();
                if entry.inputs != *inputs {
                    return Err(GroupError::Inconsistent { layer: *layer });
                }
                entry
            }
        };
        entry.rows.push(*row);
        entry.values.push(claimed);
    }
    Ok(layers.into_values().collect())
}

/// One argument per group, in group order.
pub(crate) fn prove_layers(
    circuit: &CircuitDescription,
    key: &ProvingKey,
    transcript: &Transcript,
    groups: &[LayerRows],
) -> Result<Vec<DenseArgument>, ProverError> {
    groups
        .iter()
        .map(|group| {
            let layer = group.layer as usize;
            let dense = circuit
                .dense_layers
                .get(layer)
                .ok_or(ProverError::MalformedWitness("dense row names an unknown layer"))?;
            let opening = key
                .dense
                .get(layer)
                .ok_or(ProverError::MalformedWitness("dense layer has no commitment opening"))?;
            let context = transcript.dense_context(group.layer)?;
            let gammas = group.row_weights(&context);

            let mut folded = vec![Scalar::zero(); dense.width()];
            let mut blinding = Scalar::zero();
            let mut commitment = G1Projective::zero();
            for (row, gamma) in group.rows.iter().zip(&gammas) {
                let row = *row as usize;
                let (bias, weights) = dense
                    .row(row)
                    .ok_or(ProverError::MalformedWitness("dense row out of range"))?;
                let (row_blinding, row_commitment) = opening
                    .blindings
                    .get(row)
                    .zip(opening.commitments.get(row))
                    .ok_or(ProverError::MalformedWitness("dense row has no commitment"))?;
                for (slot, coefficient) in folded
                    .iter_mut()
                    .zip(std::iter::once(bias).chain(weights.iter().copied()))
                {
                    *slot += *gamma * scalar_from_i64(coefficient);
                }
                blinding += *gamma * row_blinding;
                commitment += *row_commitment * *gamma;
            }

            let argument = LinearArgument::prove(
                &CommitmentKey::with_len(dense.width()),
                &folded,
                blinding,
                &commitment,
                &group.point,
                group.claimed(&gammas),
                &key.weight_secret,
                &context,
            )?;
            Ok(DenseArgument {
                layer: group.layer,
                argument,
            })
        })
        .collect()
}

/// Checks that `arguments` cover exactly the opened layers and that each one
/// holds against the committed rows.
pub(crate) fn check_layers(
    vk: &VerificationKey,
    transcript: &Transcript,
    groups: &[LayerRows],
    arguments: &[DenseArgument],
) -> Result<(), RejectReason> {
    if groups.len() != arguments.len()
        || groups
            .iter()
            .zip(arguments)
            .any(|(group, argument)| group.layer != argument.layer)
    {
        return Err(RejectReason::DenseArgumentSet);
    }

    for (group, argument) in groups.iter().zip(arguments) {
        let rejected = RejectReason::DenseArgument { layer: group.layer };
        let committed = vk
            .dense_commitments
            .get(group.layer as usize)
            .filter(|committed| committed.width as usize == group.point.len())
            .ok_or_else(|| rejected.clone())?;
        let context = transcript
            .dense_context(group.layer)
            .map_err(|_| rejected.clone())?;
        let gammas = group.row_weights(&context);

        let mut commitment = G1Projective::zero();
        for (row, gamma) in group.rows.iter().zip(&gammas) {
            let encoded = committed
                .rows
                .get(*row as usize)
                .ok_or_else(|| rejected.clone())?;
            let point = decode_point(encoded).map_err(|_| rejected.clone())?;
            commitment += point * *gamma;
        }

        if !argument.argument.verify(
            &CommitmentKey::with_len(group.point.len()),
            &commitment,
            &group.point,
            group.claimed(&gammas),
            &context,
        ) {
            return Err(rejected);
        }
    }
    Ok(())
}
