//! Binary Blake2s Merkle tree used for the constraint table and the private
//! wire commitment.
//!
//! * Leaves are hashed as `Blake2s(u32_le(len) || payload)`.
//! * Inner nodes hash the concatenation of their two children in order.
//! * A missing right child is padded with [`EMPTY_DIGEST`], the hash of
//!   `"ZKINFER-MERKLE-EMPTY\0"`.
//! * Authentication paths list, per level, the position of the current node
//!   (0 or 1) and its sibling digest.

use once_cell::sync::Lazy;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::{hash, Hasher};
#[cfg(feature = "parallel")]
use crate::utils::parallel::{parallelism_enabled, preferred_chunk_size};

const ARITY: usize = 2;

/// Size of a digest emitted by the tree.
pub const DIGEST_SIZE: usize = 32;

/// Digest type used by the commitments.
pub type Digest = [u8; DIGEST_SIZE];

/// Canonical digest for an absent child.
pub static EMPTY_DIGEST: Lazy<Digest> =
    Lazy::new(|| hash(b"ZKINFER-MERKLE-EMPTY\0").into_bytes());

/// Position of a node within its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleIndex(pub u8);

impl MerkleIndex {
    /// Maximum allowed index for the binary fan-out.
    pub const MAX: u8 = 1;
}

/// One level of an authentication path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerklePathElement {
    /// Position of the current node within the parent (`0..=1`).
    pub index: MerkleIndex,
    /// Sibling digest.
    pub sibling: Digest,
}

/// Errors reported while building or checking Merkle paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MerkleError {
    /// The u32 little-endian length prefix disagrees with the payload size.
    #[error("merkle path invalid: leaf length")]
    LeafLength,
    /// A missing right-hand child was not padded with the empty digest.
    #[error("merkle path invalid: right padding")]
    EmptyPadding,
    /// The recomputed root differs from the committed root.
    #[error("merkle path invalid: root mismatch")]
    RootMismatch,
    /// Invalid position byte, out-of-range leaf or wrong path depth.
    #[error("merkle path invalid: index byte")]
    PathIndex,
}

/// Binary Merkle tree over length-framed leaves.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<Digest>>,
    leaf_count: usize,
}

impl MerkleTree {
    /// Builds a tree from canonical leaf encodings (see [`encode_leaf`]).
    pub fn from_leaves(leaves: &[Vec<u8>]) -> Result<Self, MerkleError> {
        let hashed = hash_leaves(leaves)?;
        let leaf_count = hashed.len();
        if leaf_count == 0 {
            return Ok(Self {
                levels: vec![vec![*EMPTY_DIGEST]],
                leaf_count: 0,
            });
        }

        let mut levels = vec![hashed];
        while let Some(current) = levels.last().filter(|level| level.len() > 1) {
            let next = current
                .chunks(ARITY)
                .map(|chunk| {
                    let right = chunk.get(1).copied().unwrap_or(*EMPTY_DIGEST);
                    hash_internal(&[chunk[0], right])
                })
                .collect::<Vec<_>>();
            levels.push(next);
        }

        Ok(Self { levels, leaf_count })
    }

    /// Returns the root digest.
    pub fn root(&self) -> Digest {
        self.levels
            .last()
            .and_then(|level| level.first().copied())
            .unwrap_or(*EMPTY_DIGEST)
    }

    /// Number of committed leaves.
    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Generates an authentication path for the leaf at `index`.
    pub fn open(&self, index: usize) -> Result<Vec<MerklePathElement>, MerkleError> {
        if index >= self.leaf_count {
            return Err(MerkleError::PathIndex);
        }

        let depth = self.levels.len() - 1;
        let mut path = Vec::with_capacity(depth);
        let mut current = index;
        for nodes in &self.levels[..depth] {
            let position = current % ARITY;
            let sibling_index = current ^ 1;
            let sibling = nodes.get(sibling_index).copied().unwrap_or(*EMPTY_DIGEST);
            path.push(MerklePathElement {
                index: MerkleIndex(position as u8),
                sibling,
            });
            current /= ARITY;
        }
        Ok(path)
    }
}

fn hash_leaves(leaves: &[Vec<u8>]) -> Result<Vec<Digest>, MerkleError> {
    #[cfg(feature = "parallel")]
    if parallelism_enabled() {
        return leaves
            .par_iter()
            .with_min_len(preferred_chunk_size(leaves.len()))
            .map(|leaf| hash_leaf(leaf))
            .collect();
    }
    leaves.iter().map(|leaf| hash_leaf(leaf)).collect()
}

/// Encodes raw payload bytes into the canonical leaf representation.
pub fn encode_leaf(payload: &[u8]) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(4 + payload.len());
    encoded.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    encoded.extend_from_slice(payload);
    encoded
}

/// Hashes a leaf while checking its length prefix.
pub fn hash_leaf(encoded_leaf: &[u8]) -> Result<Digest, MerkleError> {
    if encoded_leaf.len() < 4 {
        return Err(MerkleError::LeafLength);
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&encoded_leaf[..4]);
    if u32::from_le_bytes(len_bytes) as usize != encoded_leaf.len() - 4 {
        return Err(MerkleError::LeafLength);
    }
    Ok(hash(encoded_leaf).into())
}

/// Hashes two child digests into their parent digest.
pub fn hash_internal(children: &[Digest; ARITY]) -> Digest {
    let mut hasher = Hasher::new();
    for child in children {
        hasher.update(child);
    }
    hasher.finalize().into()
}

/// Number of path elements a tree with `leaf_count` leaves produces.
pub fn path_depth(leaf_count: usize) -> usize {
    let mut depth = 0;
    let mut nodes = leaf_count;
    while nodes > 1 {
        nodes = nodes.div_ceil(ARITY);
        depth += 1;
    }
    depth
}

/// Recomputes the root from a leaf and its authentication path.
pub fn compute_root_from_path(
    leaf: &[u8],
    index: usize,
    leaf_count: usize,
    path: &[MerklePathElement],
) -> Result<Digest, MerkleError> {
    if leaf_count == 0 || index >= leaf_count || path.len() != path_depth(leaf_count) {
        return Err(MerkleError::PathIndex);
    }

    let mut node = hash_leaf(leaf)?;
    let mut current = index;
    let mut nodes_in_level = leaf_count;

    for element in path {
        let position = current % ARITY;
        if element.index.0 > MerkleIndex::MAX || element.index.0 as usize != position {
            return Err(MerkleError::PathIndex);
        }

        let sibling_index = current ^ 1;
        let sibling = if sibling_index < nodes_in_level {
            element.sibling
        } else if element.sibling == *EMPTY_DIGEST {
            *EMPTY_DIGEST
        } else {
            return Err(MerkleError::EmptyPadding);
        };

        node = if position == 0 {
            hash_internal(&[node, sibling])
        } else {
            hash_internal(&[sibling, node])
        };
        current /= ARITY;
        nodes_in_level = nodes_in_level.div_ceil(ARITY);
    }

    Ok(node)
}

/// Verifies a Merkle path against an expected root digest.
pub fn verify_path(
    leaf: &[u8],
    index: usize,
    leaf_count: usize,
    path: &[MerklePathElement],
    expected_root: &Digest,
) -> Result<(), MerkleError> {
    let computed = compute_root_from_path(leaf, index, leaf_count, path)?;
    if &computed != expected_root {
        return Err(MerkleError::RootMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(count: u8) -> Vec<Vec<u8>> {
        (0..count).map(|i| encode_leaf(&[i; 3])).collect()
    }

    #[test]
    fn empty_tree_root_is_empty() -> Result<(), MerkleError> {
        let tree = MerkleTree::from_leaves(&[])?;
        assert_eq!(tree.leaf_count(), 0);
        assert_eq!(tree.root(), *EMPTY_DIGEST);
        Ok(())
    }

    #[test]
    fn every_leaf_opens_for_uneven_sizes() -> Result<(), MerkleError> {
        for count in [1u8, 2, 3, 5, 8, 13] {
            let payloads = leaves(count);
            let tree = MerkleTree::from_leaves(&payloads)?;
            let root = tree.root();
            for (index, leaf) in payloads.iter().enumerate() {
                let path = tree.open(index)?;
                assert_eq!(path.len(), path_depth(payloads.len()));
                verify_path(leaf, index, tree.leaf_count(), &path, &root)?;
            }
        }
        Ok(())
    }

    #[test]
    fn tampered_sibling_breaks_root() -> Result<(), MerkleError> {
        let payloads = leaves(4);
        let tree = MerkleTree::from_leaves(&payloads)?;
        let mut path = tree.open(2)?;
        path[0].sibling[0] ^= 0x01;
        let err = verify_path(&payloads[2], 2, 4, &path, &tree.root()).unwrap_err();
        assert_eq!(err, MerkleError::RootMismatch);
        Ok(())
    }

    #[test]
    fn bad_index_byte_is_rejected() -> Result<(), MerkleError> {
        let payloads = leaves(2);
        let tree = MerkleTree::from_leaves(&payloads)?;
        let mut path = tree.open(0)?;
        path[0].index = MerkleIndex(2);
        let err = verify_path(&payloads[0], 0, 2, &path, &tree.root()).unwrap_err();
        assert_eq!(err, MerkleError::PathIndex);
        assert_eq!(err.to_string(), "merkle path invalid: index byte");
        Ok(())
    }

    #[test]
    fn corrupted_length_prefix_is_rejected() {
        let mut leaf = encode_leaf(&[1, 2, 3]);
        leaf[0] ^= 0x01;
        let err = compute_root_from_path(&leaf, 0, 1, &[]).unwrap_err();
        assert_eq!(err, MerkleError::LeafLength);
    }

    #[test]
    fn missing_child_must_use_empty_padding() -> Result<(), MerkleError> {
        let payloads = leaves(3);
        let tree = MerkleTree::from_leaves(&payloads)?;
        let mut path = tree.open(2)?;
        assert_eq!(path[0].sibling, *EMPTY_DIGEST);
        path[0].sibling = [0xFF; DIGEST_SIZE];
        let err = verify_path(&payloads[2], 2, 3, &path, &tree.root()).unwrap_err();
        assert_eq!(err, MerkleError::EmptyPadding);
        Ok(())
    }
}
