use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::commit::{Point, Scalar, POINT_SIZE};
use crate::config::ParamDigest;
use crate::field::{FieldElement, FieldElementOps};
use crate::hash::{Digest, Hasher, MerkleTree};
use crate::model::ModelIdentity;
use crate::ser::{ByteReader, ByteWriter, SerError, SerKind, SerResult};

const KEY_DIGEST_DOMAIN: &[u8] = b"ZKINFER-VK-V1";

/// Index of a wire in the circuit assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WireId(pub u32);

impl WireId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Wire `offset` positions after this one.
    pub const fn offset(self, offset: u32) -> WireId {
        WireId(self.0 + offset)
    }
}

impl fmt::Display for WireId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// `Σ coeff·wire + constant`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinearCombination {
    pub terms: Vec<(WireId, FieldElement)>,
    pub constant: FieldElement,
}

impl LinearCombination {
    pub fn new(terms: Vec<(WireId, FieldElement)>, constant: FieldElement) -> Self {
        Self { terms, constant }
    }

    /// Evaluates the combination, or `None` when a wire has no value.
    pub fn evaluate<F>(&self, value: F) -> Option<FieldElement>
    where
        F: Fn(WireId) -> Option<FieldElement>,
    {
        self.terms
            .iter()
            .try_fold(self.constant, |acc, (wire, coeff)| {
                Some(acc.add(&coeff.mul(&value(*wire)?)))
            })
    }
}

/// Rank-one constraint forms used by the compiled circuits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// `Σ coeff·wire + constant = 0`.
    Linear(LinearCombination),
    /// `a · b = c`.
    Mul { a: WireId, b: WireId, c: WireId },
    /// `w · (w - 1) = 0`.
    Bool { wire: WireId },
    /// Row `row` of committed dense layer `layer`:
    /// `b + ⟨w, inputs⟩ = 2^shift·quotient + Σ_k 2^k·remainder_k`.
    /// The row names wires only; `(b, w)` sit behind the layer's row
    /// commitment in the verification key.
    Dense {
        layer: u32,
        row: u32,
        inputs: Vec<WireId>,
        quotient: WireId,
        remainder: WireId,
        shift: u32,
    },
}

impl Constraint {
    const TAG_LINEAR: u8 = 0;
    const TAG_MUL: u8 = 1;
    const TAG_BOOL: u8 = 2;
    const TAG_DENSE: u8 = 3;

    /// Wires referenced by the constraint.
    pub fn wires(&self) -> Vec<WireId> {
        match self {
            Constraint::Linear(combination) => {
                combination.terms.iter().map(|(wire, _)| *wire).collect()
            }
            Constraint::Mul { a, b, c } => vec![*a, *b, *c],
            Constraint::Bool { wire } => vec![*wire],
            Constraint::Dense {
                inputs,
                quotient,
                remainder,
                shift,
                ..
            } => inputs
                .iter()
                .copied()
                .chain([*quotient])
                .chain((0..*shift).map(|k| remainder.offset(k)))
                .collect(),
        }
    }

    /// Constraint residual; zero when satisfied, `None` on a missing value.
    /// Dense rows have no residual without their weights, see
    /// [`CircuitDescription::is_satisfied`].
    pub fn residual<F>(&self, value: F) -> Option<FieldElement>
    where
        F: Fn(WireId) -> Option<FieldElement>,
    {
        match self {
            Constraint::Linear(combination) => combination.evaluate(value),
            Constraint::Mul { a, b, c } => Some(value(*a)?.mul(&value(*b)?).sub(&value(*c)?)),
            Constraint::Bool { wire } => {
                let w = value(*wire)?;
                Some(w.mul(&w.sub(&FieldElement::ONE)))
            }
            Constraint::Dense { .. } => None,
        }
    }

    pub fn is_satisfied<F>(&self, value: F) -> bool
    where
        F: Fn(WireId) -> Option<FieldElement>,
    {
        self.residual(value).is_some_and(|r| r.is_zero())
    }

    /// Canonical row encoding committed in the constraint table.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ByteWriter::new();
        match self {
            Constraint::Linear(combination) => {
                writer.write_u8(Self::TAG_LINEAR);
                writer.write_u32(combination.terms.len() as u32);
                for (wire, coeff) in &combination.terms {
                    writer.write_u32(wire.0);
                    writer.write_felt(coeff);
                }
                writer.write_felt(&combination.constant);
            }
            Constraint::Mul { a, b, c } => {
                writer.write_u8(Self::TAG_MUL);
                for wire in [a, b, c] {
                    writer.write_u32(wire.0);
                }
            }
            Constraint::Bool { wire } => {
                writer.write_u8(Self::TAG_BOOL);
                writer.write_u32(wire.0);
            }
            Constraint::Dense {
                layer,
                row,
                inputs,
                quotient,
                remainder,
                shift,
            } => {
                writer.write_u8(Self::TAG_DENSE);
                writer.write_u32(*layer);
                writer.write_u32(*row);
                writer.write_u32(inputs.len() as u32);
                for wire in inputs {
                    writer.write_u32(wire.0);
                }
                writer.write_u32(quotient.0);
                writer.write_u32(remainder.0);
                writer.write_u32(*shift);
            }
        }
        writer.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> SerResult<Self> {
        let mut reader = ByteReader::new(bytes, SerKind::ConstraintRow);
        let constraint = match reader.read_u8("tag")? {
            Self::TAG_LINEAR => {
                let terms = reader.read_vec("terms", 12, |r| {
                    Ok((WireId(r.read_u32("wire")?), r.read_felt("coefficient")?))
                })?;
                let constant = reader.read_felt("constant")?;
                Constraint::Linear(LinearCombination { terms, constant })
            }
            Self::TAG_MUL => Constraint::Mul {
                a: WireId(reader.read_u32("a")?),
                b: WireId(reader.read_u32("b")?),
                c: WireId(reader.read_u32("c")?),
            },
            Self::TAG_BOOL => Constraint::Bool {
                wire: WireId(reader.read_u32("wire")?),
            },
            Self::TAG_DENSE => Constraint::Dense {
                layer: reader.read_u32("layer")?,
                row: reader.read_u32("row")?,
                inputs: reader.read_vec("inputs", 4, |r| r.read_u32("input").map(WireId))?,
                quotient: WireId(reader.read_u32("quotient")?),
                remainder: WireId(reader.read_u32("remainder")?),
                shift: reader.read_u32("shift")?,
            },
            _ => return Err(SerError::invalid_value(SerKind::ConstraintRow, "tag")),
        };
        reader.finish()?;
        Ok(constraint)
    }
}

/// Instructions the witness builder replays to fill private wires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WitnessOp {
    /// `out = combination`.
    Affine {
        combination: LinearCombination,
        out: WireId,
    },
    /// `out = a · b`.
    Product { a: WireId, b: WireId, out: WireId },
    /// `out = 1` when the signed value of `input` is non-negative, else `0`.
    Sign { input: WireId, out: WireId },
    /// `quotient = floor(combination / 2^shift)`; the remainder is written
    /// little-endian into `shift` bit wires starting at `remainder`.
    Rescale {
        combination: LinearCombination,
        shift: u32,
        quotient: WireId,
        remainder: WireId,
    },
    /// Writes the `bits` low bits of `combination` starting at `first_bit`;
    /// the value must lie in `[0, 2^bits)`.
    Decompose {
        combination: LinearCombination,
        first_bit: WireId,
        bits: u32,
    },
}

/// Wire index layout: public inputs, then public outputs, then private wires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireLayout {
    pub inputs: u32,
    pub outputs: u32,
    pub total: u32,
}

impl WireLayout {
    pub const fn public_count(&self) -> u32 {
        self.inputs + self.outputs
    }

    pub const fn private_count(&self) -> u32 {
        self.total - self.public_count()
    }

    pub const fn is_public(&self, wire: WireId) -> bool {
        wire.0 < self.public_count()
    }

    pub const fn input_wire(&self, index: u32) -> WireId {
        WireId(index)
    }

    pub const fn output_wire(&self, index: u32) -> WireId {
        WireId(self.inputs + index)
    }
}

/// Plain weights of one committed dense layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseLayer {
    pub inputs: u32,
    /// Row-major, `inputs` weights per output.
    pub weights: Vec<i64>,
    pub bias: Vec<i64>,
}

impl DenseLayer {
    pub fn rows(&self) -> usize {
        self.bias.len()
    }

    /// Committed vector width: the bias plus one weight per input.
    pub fn width(&self) -> usize {
        self.inputs as usize + 1
    }

    /// Bias and weights of output `row`.
    pub fn row(&self, row: usize) -> Option<(i64, &[i64])> {
        let bias = *self.bias.get(row)?;
        let start = row.checked_mul(self.inputs as usize)?;
        let weights = self.weights.get(start..start + self.inputs as usize)?;
        Some((bias, weights))
    }
}

/// Arithmetic circuit for one model identity. Prover side: dense weights are
/// kept in plain form next to the rows that reference them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitDescription {
    pub model: ModelIdentity,
    pub graph_digest: Digest,
    pub layout: WireLayout,
    pub constraints: Vec<Constraint>,
    pub program: Vec<WitnessOp>,
    pub dense_layers: Vec<DenseLayer>,
}

impl CircuitDescription {
    /// Like [`Constraint::is_satisfied`], resolving dense rows against the
    /// layer weights.
    pub fn is_satisfied<F>(&self, constraint: &Constraint, value: F) -> bool
    where
        F: Fn(WireId) -> Option<FieldElement>,
    {
        match constraint {
            Constraint::Dense {
                layer,
                row,
                inputs,
                quotient,
                remainder,
                shift,
            } => self
                .dense_layers
                .get(*layer as usize)
                .filter(|dense| dense.inputs as usize == inputs.len())
                .and_then(|dense| dense.row(*row as usize))
                .and_then(|(bias, weights)| {
                    let mut acc = FieldElement::from_i64(bias);
                    for (wire, weight) in inputs.iter().zip(weights) {
                        acc = acc.add(&FieldElement::from_i64(*weight).mul(&value(*wire)?));
                    }
                    acc = acc.sub(&FieldElement::power_of_two(*shift).mul(&value(*quotient)?));
                    for k in 0..*shift {
                        acc = acc.sub(&FieldElement::power_of_two(k).mul(&value(remainder.offset(k))?));
                    }
                    Some(acc)
                })
                .is_some_and(|residual| residual.is_zero()),
            other => other.is_satisfied(value),
        }
    }
}

/// Row commitments of one dense layer, in row order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenseCommitment {
    /// Committed vector width: the bias plus one weight per input.
    pub width: u32,
    pub rows: Vec<[u8; POINT_SIZE]>,
}

/// Public verification data. Carries only commitments and counts, never the
/// weights.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationKey {
    pub model: ModelIdentity,
    pub graph_digest: Digest,
    pub param_digest: ParamDigest,
    pub constraint_root: Digest,
    pub constraint_count: u32,
    pub layout: WireLayout,
    /// Constraints opened by every proof: all rows touching a public wire.
    pub mandatory: Vec<u32>,
    pub query_count: u16,
    /// Hiding commitments to every dense row, indexed by committed layer.
    pub dense_commitments: Vec<DenseCommitment>,
}

impl VerificationKey {
    /// Digest binding every field; proofs carry it to name their key.
    pub fn digest(&self) -> Digest {
        let mut hasher = Hasher::new();
        hasher.update(KEY_DIGEST_DOMAIN);
        hasher.update(&self.model.to_bytes());
        hasher.update(&self.graph_digest);
        hasher.update(self.param_digest.as_bytes());
        hasher.update(&self.constraint_root);
        hasher.update(&self.constraint_count.to_le_bytes());
        hasher.update(&self.layout.inputs.to_le_bytes());
        hasher.update(&self.layout.outputs.to_le_bytes());
        hasher.update(&self.layout.total.to_le_bytes());
        hasher.update(&(self.mandatory.len() as u32).to_le_bytes());
        for index in &self.mandatory {
            hasher.update(&index.to_le_bytes());
        }
        hasher.update(&self.query_count.to_le_bytes());
        hasher.update(&(self.dense_commitments.len() as u32).to_le_bytes());
        for layer in &self.dense_commitments {
            hasher.update(&layer.width.to_le_bytes());
            hasher.update(&(layer.rows.len() as u32).to_le_bytes());
            for row in &layer.rows {
                hasher.update(row);
            }
        }
        hasher.finalize().into_bytes()
    }
}

/// Blindings and decoded commitments of one dense layer's rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseOpening {
    pub blindings: Vec<Scalar>,
    pub commitments: Vec<Point>,
}

/// Prover-side key: the circuit plus the committed constraint table and the
/// openings of the dense-row commitments.
#[derive(Debug, Clone)]
pub struct ProvingKey {
    pub description: Arc<CircuitDescription>,
    pub constraint_tree: MerkleTree,
    pub verification_key: VerificationKey,
    pub key_digest: Digest,
    pub dense: Vec<DenseOpening>,
    /// Secret derived from the weights; seeds blindings and argument nonces.
    pub weight_secret: Digest,
}

/// Compiled circuit and keys for one model identity.
#[derive(Debug, Clone)]
pub struct CircuitArtifact {
    pub description: Arc<CircuitDescription>,
    pub proving_key: Arc<ProvingKey>,
    pub verification_key: VerificationKey,
    pub compiled_at: SystemTime,
}

impl CircuitArtifact {
    pub fn model(&self) -> ModelIdentity {
        self.description.model
    }

    pub fn key_digest(&self) -> Digest {
        self.proving_key.key_digest
    }
}

impl PartialEq for CircuitArtifact {
    fn eq(&self, other: &Self) -> bool {
        self.key_digest() == other.key_digest()
    }
}

impl Eq for CircuitArtifact {}
