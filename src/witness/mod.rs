//! Witness builder.
//!
//! Replays the compiled witness program over a quantized input, checks every
//! constraint and compares the computed logits with the claimed output. A
//! claimed output that the circuit does not reproduce is a forged or corrupted
//! result and is reported as [`WitnessError::OutputMismatch`].

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use thiserror::Error;

use crate::circuit::{CircuitDescription, LinearCombination, WireId, WitnessOp};
use crate::field::{FieldElement, FieldElementOps};
use crate::model::ModelIdentity;
use crate::proof::PublicValues;
#[cfg(feature = "parallel")]
use crate::utils::parallel::{parallelism_enabled, preferred_chunk_size};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WitnessError {
    #[error("expected {expected} input values, got {actual}")]
    InputShape { expected: usize, actual: usize },
    #[error("expected {expected} output values, got {actual}")]
    OutputShape { expected: usize, actual: usize },
    #[error("witness op {op}: value {value} does not fit {bits} bits")]
    RangeExceeded { op: usize, value: i64, bits: u32 },
    #[error("witness op {op} reads unassigned wire {wire}")]
    UnassignedWire { op: usize, wire: WireId },
    #[error("constraint {constraint} is not satisfied")]
    Unsatisfied { constraint: usize },
    #[error("claimed output {index} is {claimed} but the circuit computes {computed}")]
    OutputMismatch {
        index: usize,
        claimed: i64,
        computed: i64,
    },
}

/// Full wire assignment for one inference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Witness {
    model: ModelIdentity,
    values: Vec<FieldElement>,
    public: PublicValues,
}

impl Witness {
    pub fn model(&self) -> ModelIdentity {
        self.model
    }

    pub fn values(&self) -> &[FieldElement] {
        &self.values
    }

    pub fn value(&self, wire: WireId) -> Option<FieldElement> {
        self.values.get(wire.index()).copied()
    }

    pub fn public(&self) -> &PublicValues {
        &self.public
    }
}

struct Assignment {
    values: Vec<Option<FieldElement>>,
}

impl Assignment {
    fn get(&self, wire: WireId) -> Option<FieldElement> {
        self.values.get(wire.index()).copied().flatten()
    }

    fn set(&mut self, wire: WireId, value: FieldElement) {
        if let Some(slot) = self.values.get_mut(wire.index()) {
            *slot = Some(value);
        }
    }

    fn eval(&self, op: usize, combination: &LinearCombination) -> Result<FieldElement, WitnessError> {
        combination
            .evaluate(|wire| self.get(wire))
            .ok_or_else(|| WitnessError::UnassignedWire {
                op,
                wire: combination
                    .terms
                    .iter()
                    .map(|(wire, _)| *wire)
                    .find(|wire| self.get(*wire).is_none())
                    .unwrap_or(WireId(u32::MAX)),
            })
    }

    fn read(&self, op: usize, wire: WireId) -> Result<FieldElement, WitnessError> {
        self.get(wire)
            .ok_or(WitnessError::UnassignedWire { op, wire })
    }

    fn write_bits(&mut self, first: WireId, bits: u32, value: u64) {
        for k in 0..bits {
            self.set(first.offset(k), FieldElement::from((value >> k) & 1 == 1));
        }
    }
}

/// Builds the witness for `(input, output)` on `circuit`. Pure: the same
/// arguments always produce the same witness.
pub fn build(
    circuit: &CircuitDescription,
    input: &[i64],
    output: &[i64],
) -> Result<Witness, WitnessError> {
    let layout = circuit.layout;
    if input.len() != layout.inputs as usize {
        return Err(WitnessError::InputShape {
            expected: layout.inputs as usize,
            actual: input.len(),
        });
    }
    if output.len() != layout.outputs as usize {
        return Err(WitnessError::OutputShape {
            expected: layout.outputs as usize,
            actual: output.len(),
        });
    }

    let mut assignment = Assignment {
        values: vec![None; layout.total as usize],
    };
    for (index, value) in input.iter().enumerate() {
        assignment.set(layout.input_wire(index as u32), FieldElement::from_i64(*value));
    }

    for (op, instruction) in circuit.program.iter().enumerate() {
        execute(&mut assignment, op, instruction)?;
    }

    let values = assignment
        .values
        .iter()
        .enumerate()
        .map(|(index, value)| {
            value.ok_or(WitnessError::UnassignedWire {
                op: circuit.program.len(),
                wire: WireId(index as u32),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    check_constraints(circuit, &values)?;

    for (index, claimed) in output.iter().enumerate() {
        let computed = values[layout.output_wire(index as u32).index()].to_i64();
        if computed != *claimed {
            return Err(WitnessError::OutputMismatch {
                index,
                claimed: *claimed,
                computed,
            });
        }
    }

    Ok(Witness {
        model: circuit.model,
        values,
        public: PublicValues::new(input.to_vec(), output.to_vec()),
    })
}

fn execute(assignment: &mut Assignment, op: usize, instruction: &WitnessOp) -> Result<(), WitnessError> {
    match instruction {
        WitnessOp::Affine { combination, out } => {
            let value = assignment.eval(op, combination)?;
            assignment.set(*out, value);
        }
        WitnessOp::Product { a, b, out } => {
            let value = assignment.read(op, *a)?.mul(&assignment.read(op, *b)?);
            assignment.set(*out, value);
        }
        WitnessOp::Sign { input, out } => {
            let non_negative = assignment.read(op, *input)?.to_i64() >= 0;
            assignment.set(*out, FieldElement::from(non_negative));
        }
        WitnessOp::Rescale {
            combination,
            shift,
            quotient,
            remainder,
        } => {
            let acc = assignment.eval(op, combination)?.to_i64();
            let q = acc >> shift;
            let r = acc - (q << shift);
            assignment.set(*quotient, FieldElement::from_i64(q));
            assignment.write_bits(*remainder, *shift, r as u64);
        }
        WitnessOp::Decompose {
            combination,
            first_bit,
            bits,
        } => {
            let value = assignment.eval(op, combination)?.to_i64();
            if value < 0 || value >= 1i64 << bits {
                return Err(WitnessError::RangeExceeded {
                    op,
                    value,
                    bits: *bits,
                });
            }
            assignment.write_bits(*first_bit, *bits, value as u64);
        }
    }
    Ok(())
}

fn check_constraints(circuit: &CircuitDescription, values: &[FieldElement]) -> Result<(), WitnessError> {
    let lookup = |wire: WireId| values.get(wire.index()).copied();
    let constraints = &circuit.constraints;

    #[cfg(feature = "parallel")]
    if parallelism_enabled() {
        let failed = constraints
            .par_iter()
            .with_min_len(preferred_chunk_size(constraints.len()))
            .position_first(|constraint| !circuit.is_satisfied(constraint, lookup));
        return match failed {
            Some(constraint) => Err(WitnessError::Unsatisfied { constraint }),
            None => Ok(()),
        };
    }

    match constraints
        .iter()
        .position(|constraint| !circuit.is_satisfied(constraint, lookup))
    {
        Some(constraint) => Err(WitnessError::Unsatisfied { constraint }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{CircuitCompiler, Constraint};
    use crate::config::PipelineConfig;
    use crate::model::{
        builtin_graph, InferenceAdapter, Layer, LayerOp, ModelGraph, ModelVariant, TensorShape,
    };
    use crate::utils::parallel::set_parallelism;

    fn relu_circuit(range_bits: u32) -> CircuitDescription {
        let mut config = PipelineConfig::default();
        config.quantization.range_bits = range_bits;
        config.quantization.input_bits = range_bits.min(16);
        let graph = ModelGraph::new(
            ModelIdentity::new(ModelVariant::ResNet18, 1),
            TensorShape {
                channels: 1,
                height: 1,
                width: 3,
            },
            vec![Layer::new("relu", LayerOp::Relu)],
        );
        let artifact = CircuitCompiler::new(&config).compile(&graph).unwrap();
        (*artifact.description).clone()
    }

    #[test]
    fn relu_witness_matches_integer_semantics() {
        let circuit = relu_circuit(16);
        let witness = build(&circuit, &[-5, 0, 7], &[0, 0, 7]).unwrap();
        assert_eq!(witness.public().outputs, vec![0, 0, 7]);
        assert_eq!(witness.values().len(), circuit.layout.total as usize);
    }

    #[test]
    fn forged_output_is_detected() {
        let circuit = relu_circuit(16);
        let err = build(&circuit, &[-5, 0, 7], &[0, 1, 7]).unwrap_err();
        assert_eq!(
            err,
            WitnessError::OutputMismatch {
                index: 1,
                claimed: 1,
                computed: 0
            }
        );
    }

    #[test]
    fn oversized_activation_exceeds_range() {
        let circuit = relu_circuit(8);
        let err = build(&circuit, &[300, 0, 0], &[300, 0, 0]).unwrap_err();
        assert!(matches!(err, WitnessError::RangeExceeded { value: 300, bits: 8, .. }));
    }

    #[test]
    fn shape_errors_precede_evaluation() {
        let circuit = relu_circuit(16);
        assert_eq!(
            build(&circuit, &[1, 2], &[1, 2, 3]).unwrap_err(),
            WitnessError::InputShape {
                expected: 3,
                actual: 2
            }
        );
        assert_eq!(
            build(&circuit, &[1, 2, 3], &[1]).unwrap_err(),
            WitnessError::OutputShape {
                expected: 3,
                actual: 1
            }
        );
    }

    #[test]
    fn adapter_output_yields_a_witness_sequential_and_parallel() {
        let config = PipelineConfig::default();
        let graph = builtin_graph(ModelVariant::ResNet18, 1, &config.quantization);
        let artifact = CircuitCompiler::new(&config).compile(&graph).unwrap();
        let adapter = InferenceAdapter::new(config.quantization);
        let input: Vec<i64> = (0..graph.input_len() as i64).map(|i| (i * 37) % 500 - 250).collect();
        let output = adapter.forward(&graph, &input).unwrap();

        let parallel = build(&artifact.description, &input, &output).unwrap();
        let sequential = {
            let _guard = set_parallelism(false);
            build(&artifact.description, &input, &output).unwrap()
        };
        assert_eq!(parallel, sequential);
    }

    #[test]
    fn dense_rows_are_checked_against_the_layer_weights() {
        let config = PipelineConfig::default();
        let graph = builtin_graph(ModelVariant::ResNet18, 1, &config.quantization);
        let artifact = CircuitCompiler::new(&config).compile(&graph).unwrap();
        let input: Vec<i64> = (0..graph.input_len() as i64).map(|i| (i * 37) % 500 - 250).collect();
        let output = InferenceAdapter::new(config.quantization)
            .forward(&graph, &input)
            .unwrap();

        // The replay program still computes the old row; only the check sees the change.
        let mut circuit = (*artifact.description).clone();
        circuit.dense_layers[0].weights[0] += 1;
        let err = build(&circuit, &input, &output).unwrap_err();
        let WitnessError::Unsatisfied { constraint } = err else {
            panic!("expected an unsatisfied row, got {err:?}");
        };
        assert!(matches!(
            circuit.constraints[constraint],
            Constraint::Dense { layer: 0, row: 0, .. }
        ));
    }
}
