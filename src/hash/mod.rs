//! Hashing and commitment primitives.
//!
//! * [`deterministic`] – Blake2s digests and the counter-mode XOF used for
//!   Fiat–Shamir challenges and deterministic model weights.
//! * [`merkle`] – binary Merkle commitments with length-framed leaves.
//!
//! Content addressing of submitted images uses BLAKE3 ([`content_digest`]);
//! everything that feeds a proof uses Blake2s.

pub mod deterministic;
pub mod merkle;

pub use deterministic::{hash, Blake2sXof, Hash, Hasher};
pub use merkle::{
    compute_root_from_path, encode_leaf, verify_path, Digest, MerkleError, MerkleIndex,
    MerklePathElement, MerkleTree, DIGEST_SIZE, EMPTY_DIGEST,
};

/// BLAKE3 digest of raw content, rendered as lowercase hex.
pub fn content_digest(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}
