use serde::{Deserialize, Serialize};

use crate::circuit::{WireId, WireLayout};
use crate::commit::LinearArgument;
use crate::field::FieldElement;
use crate::hash::{Digest, MerklePathElement};
use crate::ser::ByteWriter;

/// Current proof encoding version.
pub const PROOF_VERSION: u16 = 2;

/// Quantized inputs and outputs a proof is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicValues {
    pub inputs: Vec<i64>,
    pub outputs: Vec<i64>,
}

impl PublicValues {
    pub fn new(inputs: Vec<i64>, outputs: Vec<i64>) -> Self {
        Self { inputs, outputs }
    }

    /// Whether the counts match the circuit's public wires.
    pub fn fits(&self, layout: &WireLayout) -> bool {
        self.inputs.len() == layout.inputs as usize && self.outputs.len() == layout.outputs as usize
    }

    /// Value of a public wire under `layout`.
    pub fn wire_value(&self, layout: &WireLayout, wire: WireId) -> Option<FieldElement> {
        let index = wire.index();
        let inputs = layout.inputs as usize;
        let value = if index < inputs {
            self.inputs.get(index)
        } else {
            self.outputs.get(index - inputs)
        };
        value.copied().map(FieldElement::from_i64)
    }

    /// Canonical encoding absorbed by the transcript and embedded in proofs.
    pub fn encode_into(&self, writer: &mut ByteWriter) {
        for values in [&self.inputs, &self.outputs] {
            writer.write_u32(values.len() as u32);
            for value in values {
                writer.write_i64(*value);
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(8 + 8 * (self.inputs.len() + self.outputs.len()));
        self.encode_into(&mut writer);
        writer.into_bytes()
    }
}

/// Opened row of the committed constraint table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintOpening {
    pub index: u32,
    pub row: Vec<u8>,
    pub path: Vec<MerklePathElement>,
}

/// Opened private wire of the witness commitment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireOpening {
    pub wire: WireId,
    pub value: FieldElement,
    pub path: Vec<MerklePathElement>,
}

/// Argument tying the opened rows of one dense layer to its row commitments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseArgument {
    pub layer: u32,
    pub argument: LinearArgument,
}

/// Commit-and-open proof for one inference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proof {
    pub version: u16,
    /// Digest of the verification key the proof was produced for.
    pub key_digest: Digest,
    pub public: PublicValues,
    /// Merkle root over the private wires.
    pub witness_root: Digest,
    /// Mandatory and sampled constraint rows, ascending by index.
    pub constraint_openings: Vec<ConstraintOpening>,
    /// Private wires referenced by the opened rows, ascending by wire.
    pub wire_openings: Vec<WireOpening>,
    /// One argument per dense layer with an opened row, ascending by layer.
    pub dense_arguments: Vec<DenseArgument>,
}

/// Leaf payload committing a private wire: `wire_le || value_le`.
pub fn wire_leaf_payload(wire: WireId, value: &FieldElement) -> Vec<u8> {
    let mut writer = ByteWriter::with_capacity(12);
    writer.write_u32(wire.0);
    writer.write_felt(value);
    writer.into_bytes()
}
