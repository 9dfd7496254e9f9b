//! Lowers a quantized model graph into constraints plus a witness program.
//!
//! Gadgets (`s` = scale bits, `B` = range bits):
//!
//! | Operator | Private wires | Constraints |
//! |----------|---------------|-------------|
//! | dense row | `q`, `r_0..r_{s-1}` | dense row over committed `(b, w)`, `r_k` boolean |
//! | relu | `σ`, `y`, `t_0..t_{B-1}` | `σ` boolean, `σ·x = y`, `2y − x = Σ 2^k·t_k`, `t_k` boolean |
//! | residual | `y` | `a + b − y = 0` |
//! | output | – | `final − out = 0` |
//!
//! A dense row states `b + Σ w·x = 2^s·q + Σ 2^k·r_k` but carries only wire
//! ids. Each row's `(b, w)` is committed with a blinding derived from a
//! weight-keyed secret, and the commitments go into the verification key.

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use thiserror::Error;
use tracing::{debug, info};

use super::types::{
    CircuitArtifact, CircuitDescription, Constraint, DenseCommitment, DenseLayer, DenseOpening,
    LinearCombination, ProvingKey, VerificationKey, WireId, WireLayout, WitnessOp,
};
use crate::commit::{
    derive_scalar, encode_point, scalar_from_i64, CommitmentError, CommitmentKey,
};
use crate::config::{ParamDigest, PipelineConfig, ProofProfile, QuantizationConfig, ResourceLimits};
use crate::field::{FieldElement, FieldElementOps};
use crate::hash::{encode_leaf, Digest, Hasher, MerkleError, MerkleTree};
use crate::model::{GraphError, LayerOp, ModelGraph};

const WEIGHT_SECRET_DOMAIN: &[u8] = b"ZKINFER-WEIGHT-SECRET-V1";
const ROW_BLINDING_DOMAIN: &[u8] = b"ZKINFER-ROW-BLINDING-V1";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompilationError {
    #[error("invalid model graph: {0}")]
    Graph(#[from] GraphError),
    #[error("layer {layer} ({name}) uses unsupported operator {op}")]
    UnsupportedOperator {
        layer: usize,
        name: String,
        op: &'static str,
    },
    #[error(
        "circuit needs {constraints} constraints and {wires} wires, limits are {max_constraints} and {max_wires}"
    )]
    CircuitTooLarge {
        constraints: usize,
        wires: usize,
        max_constraints: usize,
        max_wires: usize,
    },
    #[error("failed to commit constraint table: {0}")]
    Commitment(#[from] MerkleError),
    #[error("failed to commit dense weights: {0}")]
    WeightCommitment(#[from] CommitmentError),
}

/// Circuit size predicted from the graph before any allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CircuitEstimate {
    pub constraints: usize,
    pub wires: usize,
}

#[derive(Debug, Clone)]
pub struct CircuitCompiler {
    quant: QuantizationConfig,
    profile: ProofProfile,
    limits: ResourceLimits,
    param_digest: ParamDigest,
}

impl CircuitCompiler {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            quant: config.quantization,
            profile: config.profile,
            limits: config.limits,
            param_digest: config.param_digest(),
        }
    }

    pub fn param_digest(&self) -> ParamDigest {
        self.param_digest
    }

    /// Predicts circuit size; rejects unsupported operators.
    pub fn estimate(&self, graph: &ModelGraph) -> Result<CircuitEstimate, CompilationError> {
        let widths = graph.activation_widths()?;
        let scale = self.quant.scale_bits as usize;
        let range = self.quant.range_bits as usize;
        let outputs = widths.last().copied().unwrap_or_default();
        let mut estimate = CircuitEstimate {
            constraints: outputs,
            wires: graph.input_len() + outputs,
        };
        for (index, layer) in graph.layers.iter().enumerate() {
            let width = widths[index + 1];
            let (wires, constraints) = match &layer.op {
                LayerOp::Dense { .. } => (width * (1 + scale), width * (1 + scale)),
                LayerOp::Relu => (width * (2 + range), width * (3 + range)),
                LayerOp::Residual { .. } => (width, width),
                LayerOp::MaxPool { .. } => {
                    return Err(CompilationError::UnsupportedOperator {
                        layer: index,
                        name: layer.name.clone(),
                        op: layer.op.name(),
                    })
                }
            };
            estimate.wires += wires;
            estimate.constraints += constraints;
        }
        Ok(estimate)
    }

    /// Compiles `graph` into a circuit artifact with its keys.
    pub fn compile(&self, graph: &ModelGraph) -> Result<CircuitArtifact, CompilationError> {
        let started = Instant::now();
        let estimate = self.estimate(graph)?;
        if estimate.constraints > self.limits.max_constraints || estimate.wires > self.limits.max_wires
        {
            return Err(CompilationError::CircuitTooLarge {
                constraints: estimate.constraints,
                wires: estimate.wires,
                max_constraints: self.limits.max_constraints,
                max_wires: self.limits.max_wires,
            });
        }

        let widths = graph.activation_widths()?;
        let outputs = widths.last().copied().unwrap_or_default() as u32;
        let mut builder = Builder::new(graph.input_len() as u32, outputs, estimate);

        let mut activations: Vec<Vec<WireId>> = Vec::with_capacity(graph.layers.len() + 1);
        activations.push((0..graph.input_len() as u32).map(WireId).collect());
        for (index, layer) in graph.layers.iter().enumerate() {
            let x = &activations[index];
            let next = match &layer.op {
                LayerOp::Dense {
                    inputs,
                    weights,
                    bias,
                    ..
                } => builder.dense(x, weights, bias, *inputs, self.quant.scale_bits),
                LayerOp::Relu => builder.relu(x, self.quant.range_bits),
                LayerOp::Residual { source } => builder.residual(x, &activations[*source]),
                LayerOp::MaxPool { .. } => {
                    return Err(CompilationError::UnsupportedOperator {
                        layer: index,
                        name: layer.name.clone(),
                        op: layer.op.name(),
                    })
                }
            };
            debug!(model = %graph.identity, layer = %layer.name, op = layer.op.name(), "lowered layer");
            activations.push(next);
        }
        let final_activation = activations.pop().unwrap_or_default();
        builder.bind_outputs(&final_activation);

        let layout = builder.layout();
        let graph_digest = graph.digest();
        let weight_secret = weight_secret(&graph_digest, &builder.dense_layers);
        let (dense_commitments, dense) = commit_dense_layers(&builder.dense_layers, &weight_secret)?;
        let description = Arc::new(CircuitDescription {
            model: graph.identity,
            graph_digest,
            layout,
            constraints: builder.constraints,
            program: builder.program,
            dense_layers: builder.dense_layers,
        });

        let rows = description
            .constraints
            .iter()
            .map(|constraint| encode_leaf(&constraint.encode()))
            .collect::<Vec<_>>();
        let constraint_tree = MerkleTree::from_leaves(&rows)?;
        let mandatory = description
            .constraints
            .iter()
            .enumerate()
            .filter(|(_, constraint)| constraint.wires().iter().any(|w| layout.is_public(*w)))
            .map(|(index, _)| index as u32)
            .collect();

        let verification_key = VerificationKey {
            model: graph.identity,
            graph_digest: description.graph_digest,
            param_digest: self.param_digest,
            constraint_root: constraint_tree.root(),
            constraint_count: description.constraints.len() as u32,
            layout,
            mandatory,
            query_count: self.profile.query_count,
            dense_commitments,
        };
        let key_digest = verification_key.digest();

        info!(
            model = %graph.identity,
            constraints = description.constraints.len(),
            wires = layout.total,
            mandatory = verification_key.mandatory.len(),
            dense_layers = verification_key.dense_commitments.len(),
            key = %hex::encode(key_digest),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "compiled circuit"
        );

        Ok(CircuitArtifact {
            proving_key: Arc::new(ProvingKey {
                description: Arc::clone(&description),
                constraint_tree,
                verification_key: verification_key.clone(),
                key_digest,
                dense,
                weight_secret,
            }),
            description,
            verification_key,
            compiled_at: SystemTime::now(),
        })
    }
}

/// Secret only the weight holder can derive; the public graph digest is
/// mixed in so identical weights under different identities diverge.
fn weight_secret(graph_digest: &Digest, layers: &[DenseLayer]) -> Digest {
    let mut hasher = Hasher::new();
    hasher.update_framed(WEIGHT_SECRET_DOMAIN);
    hasher.update(graph_digest);
    for layer in layers {
        hasher.update(&layer.inputs.to_le_bytes());
        for value in layer.bias.iter().chain(&layer.weights) {
            hasher.update(&value.to_le_bytes());
        }
    }
    hasher.finalize().into_bytes()
}

fn commit_dense_layers(
    layers: &[DenseLayer],
    secret: &Digest,
) -> Result<(Vec<DenseCommitment>, Vec<DenseOpening>), CompilationError> {
    let mut commitments = Vec::with_capacity(layers.len());
    let mut openings = Vec::with_capacity(layers.len());
    for (index, layer) in layers.iter().enumerate() {
        let key = CommitmentKey::with_len(layer.width());
        let mut opening = DenseOpening {
            blindings: Vec::with_capacity(layer.rows()),
            commitments: Vec::with_capacity(layer.rows()),
        };
        let mut encoded = Vec::with_capacity(layer.rows());
        for row in 0..layer.rows() {
            let (bias, weights) = layer.row(row).ok_or(CommitmentError::Length {
                expected: layer.width(),
                actual: layer.weights.len().saturating_sub(row * layer.inputs as usize),
            })?;
            let values = std::iter::once(bias)
                .chain(weights.iter().copied())
                .map(scalar_from_i64)
                .collect::<Vec<_>>();
            let mut tweak = [0u8; 8];
            tweak[..4].copy_from_slice(&(index as u32).to_le_bytes());
            tweak[4..].copy_from_slice(&(row as u32).to_le_bytes());
            let blinding = derive_scalar(ROW_BLINDING_DOMAIN, secret, &tweak);
            let commitment = key.commit(&values, blinding)?;
            encoded.push(encode_point(&commitment)?);
            opening.blindings.push(blinding);
            opening.commitments.push(commitment);
        }
        commitments.push(DenseCommitment {
            width: layer.width() as u32,
            rows: encoded,
        });
        openings.push(opening);
    }
    Ok((commitments, openings))
}

struct Builder {
    inputs: u32,
    outputs: u32,
    next_wire: u32,
    constraints: Vec<Constraint>,
    program: Vec<WitnessOp>,
    dense_layers: Vec<DenseLayer>,
}

impl Builder {
    fn new(inputs: u32, outputs: u32, estimate: CircuitEstimate) -> Self {
        Self {
            inputs,
            outputs,
            next_wire: inputs + outputs,
            constraints: Vec::with_capacity(estimate.constraints),
            program: Vec::new(),
            dense_layers: Vec::new(),
        }
    }

    fn alloc(&mut self, count: u32) -> WireId {
        let first = WireId(self.next_wire);
        self.next_wire += count;
        first
    }

    fn layout(&self) -> WireLayout {
        WireLayout {
            inputs: self.inputs,
            outputs: self.outputs,
            total: self.next_wire,
        }
    }

    /// Appends `-2^k · bit_k` for `count` consecutive bit wires.
    fn subtract_bits(terms: &mut Vec<(WireId, FieldElement)>, first: WireId, count: u32) {
        for k in 0..count {
            terms.push((first.offset(k), FieldElement::power_of_two(k).neg()));
        }
    }

    fn boolean_range(&mut self, first: WireId, count: u32) {
        for k in 0..count {
            self.constraints.push(Constraint::Bool {
                wire: first.offset(k),
            });
        }
    }

    fn dense(
        &mut self,
        x: &[WireId],
        weights: &[i64],
        bias: &[i64],
        inputs: usize,
        shift: u32,
    ) -> Vec<WireId> {
        let layer = self.dense_layers.len() as u32;
        self.dense_layers.push(DenseLayer {
            inputs: inputs as u32,
            weights: weights.to_vec(),
            bias: bias.to_vec(),
        });
        weights
            .chunks(inputs)
            .zip(bias)
            .enumerate()
            .map(|(row, (weights, b))| {
                let quotient = self.alloc(1);
                let remainder = self.alloc(shift);
                let combination = LinearCombination::new(
                    x.iter()
                        .zip(weights)
                        .filter(|(_, w)| **w != 0)
                        .map(|(wire, w)| (*wire, FieldElement::from_i64(*w)))
                        .collect(),
                    FieldElement::from_i64(*b),
                );

                self.constraints.push(Constraint::Dense {
                    layer,
                    row: row as u32,
                    inputs: x.to_vec(),
                    quotient,
                    remainder,
                    shift,
                });
                self.boolean_range(remainder, shift);
                self.program.push(WitnessOp::Rescale {
                    combination,
                    shift,
                    quotient,
                    remainder,
                });
                quotient
            })
            .collect()
    }

    fn relu(&mut self, x: &[WireId], range_bits: u32) -> Vec<WireId> {
        let two = FieldElement::from(2u64);
        x.iter()
            .map(|&input| {
                let sign = self.alloc(1);
                let out = self.alloc(1);
                let first_bit = self.alloc(range_bits);
                // 2y - x equals |x| for an honest sign bit.
                let magnitude = LinearCombination::new(
                    vec![(out, two), (input, FieldElement::ONE.neg())],
                    FieldElement::ZERO,
                );

                self.constraints.push(Constraint::Bool { wire: sign });
                self.constraints.push(Constraint::Mul {
                    a: sign,
                    b: input,
                    c: out,
                });
                let mut terms = magnitude.terms.clone();
                Self::subtract_bits(&mut terms, first_bit, range_bits);
                self.constraints
                    .push(Constraint::Linear(LinearCombination::new(terms, FieldElement::ZERO)));
                self.boolean_range(first_bit, range_bits);

                self.program.push(WitnessOp::Sign { input, out: sign });
                self.program.push(WitnessOp::Product {
                    a: sign,
                    b: input,
                    out,
                });
                self.program.push(WitnessOp::Decompose {
                    combination: magnitude,
                    first_bit,
                    bits: range_bits,
                });
                out
            })
            .collect()
    }

    fn residual(&mut self, x: &[WireId], skip: &[WireId]) -> Vec<WireId> {
        x.iter()
            .zip(skip)
            .map(|(&a, &b)| {
                let out = self.alloc(1);
                let sum = vec![(a, FieldElement::ONE), (b, FieldElement::ONE)];
                let mut terms = sum.clone();
                terms.push((out, FieldElement::ONE.neg()));
                self.constraints
                    .push(Constraint::Linear(LinearCombination::new(terms, FieldElement::ZERO)));
                self.program.push(WitnessOp::Affine {
                    combination: LinearCombination::new(sum, FieldElement::ZERO),
                    out,
                });
                out
            })
            .collect()
    }

    fn bind_outputs(&mut self, final_activation: &[WireId]) {
        for (index, &source) in final_activation.iter().enumerate() {
            let out = WireId(self.inputs + index as u32);
            self.constraints.push(Constraint::Linear(LinearCombination::new(
                vec![(source, FieldElement::ONE), (out, FieldElement::ONE.neg())],
                FieldElement::ZERO,
            )));
            self.program.push(WitnessOp::Affine {
                combination: LinearCombination::new(
                    vec![(source, FieldElement::ONE)],
                    FieldElement::ZERO,
                ),
                out,
            });
        }
    }
}
