//! Binary proof codec.
//!
//! ```text
//! version: u16
//! key_digest: [u8; 32]
//! public: u32 count || i64* (inputs), u32 count || i64* (outputs)
//! witness_root: [u8; 32]
//! constraint_openings: u32 count || (index: u32, row: u32 len || bytes, path)*
//! wire_openings: u32 count || (wire: u32, value: felt, path)*
//! dense_arguments: u32 count || (layer: u32, nonce_commitment: point,
//!     nonce_evaluation: scalar, responses: u32 count || scalar*,
//!     blinding_response: scalar)*
//! path: u32 count || (position: u8, sibling: [u8; 32])*
//! point: [u8; 32] compressed BN254 G1, scalar: [u8; 32] canonical
//! ```

use super::types::{ConstraintOpening, DenseArgument, Proof, PublicValues, WireOpening};
use crate::circuit::WireId;
use crate::commit::{
    decode_point, decode_scalar, encode_point, encode_scalar, LinearArgument, Point, Scalar,
    POINT_SIZE, SCALAR_SIZE,
};
use crate::hash::{MerkleIndex, MerklePathElement, DIGEST_SIZE};
use crate::ser::{ByteReader, ByteWriter, SerError, SerKind, SerResult};
use crate::utils::ProofBytes;

const PATH_ELEMENT_LEN: usize = 1 + DIGEST_SIZE;
const DENSE_ARGUMENT_MIN_LEN: usize = 4 + POINT_SIZE + SCALAR_SIZE + 4 + SCALAR_SIZE;

impl Proof {
    /// Exact size of [`Proof::to_bytes`].
    pub fn encoded_len(&self) -> usize {
        let path_len = |path: &[MerklePathElement]| 4 + path.len() * PATH_ELEMENT_LEN;
        2 + DIGEST_SIZE
            + 8
            + 8 * (self.public.inputs.len() + self.public.outputs.len())
            + DIGEST_SIZE
            + 4
            + self
                .constraint_openings
                .iter()
                .map(|opening| 4 + 4 + opening.row.len() + path_len(&opening.path))
                .sum::<usize>()
            + 4
            + self
                .wire_openings
                .iter()
                .map(|opening| 4 + 8 + path_len(&opening.path))
                .sum::<usize>()
            + 4
            + self
                .dense_arguments
                .iter()
                .map(|dense| DENSE_ARGUMENT_MIN_LEN + dense.argument.responses.len() * SCALAR_SIZE)
                .sum::<usize>()
    }

    pub fn to_bytes(&self) -> SerResult<ProofBytes> {
        let mut writer = ByteWriter::with_capacity(self.encoded_len());
        writer.write_u16(self.version);
        writer.write_digest(&self.key_digest);
        self.public.encode_into(&mut writer);
        writer.write_digest(&self.witness_root);

        writer.write_len(self.constraint_openings.len(), SerKind::ConstraintOpening, "count")?;
        for opening in &self.constraint_openings {
            writer.write_u32(opening.index);
            writer.write_len(opening.row.len(), SerKind::ConstraintOpening, "row")?;
            writer.write_bytes(&opening.row);
            write_path(&mut writer, &opening.path)?;
        }

        writer.write_len(self.wire_openings.len(), SerKind::WireOpening, "count")?;
        for opening in &self.wire_openings {
            writer.write_u32(opening.wire.0);
            writer.write_felt(&opening.value);
            write_path(&mut writer, &opening.path)?;
        }

        writer.write_len(self.dense_arguments.len(), SerKind::DenseArgument, "count")?;
        for dense in &self.dense_arguments {
            let argument = &dense.argument;
            writer.write_u32(dense.layer);
            write_point(&mut writer, &argument.nonce_commitment, "nonce_commitment")?;
            write_scalar(&mut writer, &argument.nonce_evaluation, "nonce_evaluation")?;
            writer.write_len(argument.responses.len(), SerKind::DenseArgument, "responses")?;
            for response in &argument.responses {
                write_scalar(&mut writer, response, "response")?;
            }
            write_scalar(&mut writer, &argument.blinding_response, "blinding_response")?;
        }
        Ok(ProofBytes::new(writer.into_bytes()))
    }

    pub fn from_bytes(bytes: &[u8]) -> SerResult<Proof> {
        let mut reader = ByteReader::new(bytes, SerKind::Proof);
        let version = reader.read_u16("version")?;
        let key_digest = reader.read_digest("key_digest")?;

        reader.section(SerKind::PublicValues);
        let inputs = reader.read_vec("inputs", 8, |r| r.read_i64("input"))?;
        let outputs = reader.read_vec("outputs", 8, |r| r.read_i64("output"))?;

        reader.section(SerKind::Proof);
        let witness_root = reader.read_digest("witness_root")?;

        reader.section(SerKind::ConstraintOpening);
        let constraint_openings = reader.read_vec("count", 12, |r| {
            let index = r.read_u32("index")?;
            let len = r.read_len("row", 1)?;
            let row = r.read_exact(len, "row")?.to_vec();
            let path = read_path(r)?;
            r.section(SerKind::ConstraintOpening);
            Ok(ConstraintOpening { index, row, path })
        })?;

        reader.section(SerKind::WireOpening);
        let wire_openings = reader.read_vec("count", 16, |r| {
            let wire = WireId(r.read_u32("wire")?);
            let value = r.read_felt("value")?;
            let path = read_path(r)?;
            r.section(SerKind::WireOpening);
            Ok(WireOpening { wire, value, path })
        })?;

        reader.section(SerKind::DenseArgument);
        let dense_arguments = reader.read_vec("count", DENSE_ARGUMENT_MIN_LEN, |r| {
            let layer = r.read_u32("layer")?;
            let nonce_commitment = read_point(r, "nonce_commitment")?;
            let nonce_evaluation = read_scalar(r, "nonce_evaluation")?;
            let responses = r.read_vec("responses", SCALAR_SIZE, |r| read_scalar(r, "response"))?;
            let blinding_response = read_scalar(r, "blinding_response")?;
            Ok(DenseArgument {
                layer,
                argument: LinearArgument {
                    nonce_commitment,
                    nonce_evaluation,
                    responses,
                    blinding_response,
                },
            })
        })?;

        reader.section(SerKind::Proof).finish()?;
        Ok(Proof {
            version,
            key_digest,
            public: PublicValues { inputs, outputs },
            witness_root,
            constraint_openings,
            wire_openings,
            dense_arguments,
        })
    }
}

fn write_point(writer: &mut ByteWriter, point: &Point, field: &'static str) -> SerResult<()> {
    let bytes = encode_point(point).map_err(|_| SerError::invalid_value(SerKind::DenseArgument, field))?;
    writer.write_bytes(&bytes);
    Ok(())
}

fn write_scalar(writer: &mut ByteWriter, scalar: &Scalar, field: &'static str) -> SerResult<()> {
    let bytes =
        encode_scalar(scalar).map_err(|_| SerError::invalid_value(SerKind::DenseArgument, field))?;
    writer.write_bytes(&bytes);
    Ok(())
}

fn read_point(reader: &mut ByteReader<'_>, field: &'static str) -> SerResult<Point> {
    let bytes = reader.read_array::<POINT_SIZE>(field)?;
    decode_point(&bytes).map_err(|_| SerError::invalid_value(SerKind::DenseArgument, field))
}

fn read_scalar(reader: &mut ByteReader<'_>, field: &'static str) -> SerResult<Scalar> {
    let bytes = reader.read_array::<SCALAR_SIZE>(field)?;
    decode_scalar(&bytes).map_err(|_| SerError::invalid_value(SerKind::DenseArgument, field))
}

fn write_path(writer: &mut ByteWriter, path: &[MerklePathElement]) -> SerResult<()> {
    writer.write_len(path.len(), SerKind::MerklePath, "depth")?;
    for element in path {
        writer.write_u8(element.index.0);
        writer.write_digest(&element.sibling);
    }
    Ok(())
}

fn read_path(reader: &mut ByteReader<'_>) -> SerResult<Vec<MerklePathElement>> {
    reader.section(SerKind::MerklePath);
    reader.read_vec("depth", PATH_ELEMENT_LEN, |r| {
        let position = r.read_u8("position")?;
        if position > MerkleIndex::MAX {
            return Err(SerError::invalid_value(SerKind::MerklePath, "position"));
        }
        Ok(MerklePathElement {
            index: MerkleIndex(position),
            sibling: r.read_digest("sibling")?,
        })
    })
}
