//! Hiding vector commitments over BN254 G1 and a linear-evaluation argument.
//!
//! A vector `v` is committed as `C = Σ_j v_j·G_j + ρ·H`. The generators are
//! hashed onto the curve, so no discrete-log relation between them is known
//! and `C` reveals nothing about `v` while `ρ` stays secret.
//!
//! [`LinearArgument`] shows that the vector behind a commitment satisfies
//! `⟨v, x⟩ = y` for a public point `x` and value `y` without opening `v`: the
//! prover commits to random nonces `(a, α)` and their evaluation `t = ⟨a, x⟩`,
//! derives a challenge `c` and answers with `z = a + c·v` and `ζ = α + c·ρ`.
//! The verifier checks `Σ z_j·G_j + ζ·H = A + c·C` and `⟨z, x⟩ = t + c·y`.

use std::fmt;

use ark_bn254::{Fq, Fr, G1Affine, G1Projective};
use ark_ec::{CurveGroup, VariableBaseMSM};
use ark_ff::{PrimeField, Zero};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use thiserror::Error;

use crate::field::FieldElement;
use crate::hash::{Blake2sXof, Digest, Hasher};

/// Scalar field of the commitment group.
pub type Scalar = Fr;
/// Commitment group element in affine form.
pub type Point = G1Affine;

/// Compressed size of a [`Point`].
pub const POINT_SIZE: usize = 32;
/// Canonical size of a [`Scalar`].
pub const SCALAR_SIZE: usize = 32;

const GENERATOR_DOMAIN: &[u8] = b"ZKINFER-PEDERSEN-G1-V1";
const NONCE_DOMAIN: &[u8] = b"ZKINFER-LINEAR-NONCE-V1";
const CHALLENGE_DOMAIN: &[u8] = b"ZKINFER-LINEAR-CHALLENGE-V1";

/// Generator 0 is the blinding base `H`; vector slot `j` uses generator `j + 1`.
static GENERATORS: Lazy<RwLock<Vec<G1Affine>>> = Lazy::new(|| RwLock::new(Vec::new()));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CommitmentError {
    #[error("expected {expected} values, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("bytes do not encode a valid {0}")]
    Decoding(&'static str),
    #[error("failed to encode {0}")]
    Encoding(&'static str),
}

/// Bases for committing to vectors of one fixed length.
#[derive(Clone, PartialEq, Eq)]
pub struct CommitmentKey {
    blinding: G1Affine,
    bases: Vec<G1Affine>,
}

impl fmt::Debug for CommitmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitmentKey")
            .field("len", &self.bases.len())
            .finish()
    }
}

impl CommitmentKey {
    /// Key for vectors of `len` values. Generators are derived once per
    /// process and shared by every key.
    pub fn with_len(len: usize) -> Self {
        let needed = len + 1;
        {
            let cached = GENERATORS.read();
            if cached.len() >= needed {
                return Self::from_generators(&cached[..needed]);
            }
        }
        let mut cached = GENERATORS.write();
        while cached.len() < needed {
            let index = cached.len() as u64;
            cached.push(hash_to_curve(index));
        }
        Self::from_generators(&cached[..needed])
    }

    fn from_generators(generators: &[G1Affine]) -> Self {
        Self {
            blinding: generators[0],
            bases: generators[1..].to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    /// `Σ v_j·G_j + blinding·H`.
    pub fn commit(&self, values: &[Scalar], blinding: Scalar) -> Result<Point, CommitmentError> {
        self.combine(values, blinding).map(|point| point.into_affine())
    }

    fn combine(&self, values: &[Scalar], blinding: Scalar) -> Result<G1Projective, CommitmentError> {
        self.expect_len(values.len())?;
        let bases = self
            .bases
            .iter()
            .copied()
            .chain([self.blinding])
            .collect::<Vec<_>>();
        let scalars = values.iter().copied().chain([blinding]).collect::<Vec<_>>();
        G1Projective::msm(&bases, &scalars).map_err(|_| CommitmentError::Length {
            expected: self.len(),
            actual: values.len(),
        })
    }

    fn expect_len(&self, actual: usize) -> Result<(), CommitmentError> {
        if actual != self.len() {
            return Err(CommitmentError::Length {
                expected: self.len(),
                actual,
            });
        }
        Ok(())
    }
}

/// Non-interactive proof that a committed vector evaluates to a claimed value
/// at a public point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearArgument {
    /// `A = Σ a_j·G_j + α·H`.
    pub nonce_commitment: Point,
    /// `t = ⟨a, x⟩`.
    pub nonce_evaluation: Scalar,
    /// `z = a + c·v`.
    pub responses: Vec<Scalar>,
    /// `ζ = α + c·ρ`.
    pub blinding_response: Scalar,
}

impl LinearArgument {
    /// Proves that `(values, blinding)` opens `commitment` and that
    /// `⟨values, point⟩ = claimed`. Nonces are derived from `secret` and the
    /// statement, so the same statement always yields the same argument.
    #[allow(clippy::too_many_arguments)]
    pub fn prove(
        key: &CommitmentKey,
        values: &[Scalar],
        blinding: Scalar,
        commitment: &G1Projective,
        point: &[Scalar],
        claimed: Scalar,
        secret: &Digest,
        context: &Digest,
    ) -> Result<Self, CommitmentError> {
        key.expect_len(values.len())?;
        key.expect_len(point.len())?;
        let commitment = encode_point(&commitment.into_affine())?;

        let mut seed = Hasher::new();
        seed.update_framed(NONCE_DOMAIN);
        seed.update(secret);
        seed.update(context);
        seed.update(&commitment);
        seed.update(&encode_scalar(&claimed)?);
        let mut xof = seed.finalize_xof();
        let nonces = (0..values.len())
            .map(|_| wide_scalar(&mut xof))
            .collect::<Vec<_>>();
        let nonce_blinding = wide_scalar(&mut xof);

        let nonce_commitment = key.commit(&nonces, nonce_blinding)?;
        let nonce_evaluation = inner_product(&nonces, point);
        let c = challenge(context, &commitment, point, claimed, &nonce_commitment, nonce_evaluation)?;

        Ok(Self {
            nonce_commitment,
            nonce_evaluation,
            responses: nonces
                .iter()
                .zip(values)
                .map(|(nonce, value)| *nonce + c * value)
                .collect(),
            blinding_response: nonce_blinding + c * blinding,
        })
    }

    /// Checks the argument against `commitment`, `point` and `claimed`.
    pub fn verify(
        &self,
        key: &CommitmentKey,
        commitment: &G1Projective,
        point: &[Scalar],
        claimed: Scalar,
        context: &Digest,
    ) -> bool {
        if self.responses.len() != key.len() || point.len() != key.len() {
            return false;
        }
        let Ok(encoded) = encode_point(&commitment.into_affine()) else {
            return false;
        };
        let Ok(c) = challenge(
            context,
            &encoded,
            point,
            claimed,
            &self.nonce_commitment,
            self.nonce_evaluation,
        ) else {
            return false;
        };
        let Ok(lhs) = key.combine(&self.responses, self.blinding_response) else {
            return false;
        };
        let rhs = G1Projective::from(self.nonce_commitment) + *commitment * c;
        lhs == rhs && inner_product(&self.responses, point) == self.nonce_evaluation + c * claimed
    }
}

/// Embeds a signed integer, mapping negatives to `r - |v|`.
pub fn scalar_from_i64(value: i64) -> Scalar {
    let magnitude = Scalar::from(value.unsigned_abs());
    if value < 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Moves a field element across by its signed lift.
pub fn scalar_from_felt(value: FieldElement) -> Scalar {
    scalar_from_i64(value.to_i64())
}

/// Uniform scalar derived from `domain`, `seed` and `tweak`.
pub fn derive_scalar(domain: &[u8], seed: &[u8], tweak: &[u8]) -> Scalar {
    let mut hasher = Hasher::new();
    hasher.update_framed(domain);
    hasher.update_framed(seed);
    hasher.update_framed(tweak);
    wide_scalar(&mut hasher.finalize_xof())
}

pub fn encode_point(point: &Point) -> Result<[u8; POINT_SIZE], CommitmentError> {
    let mut bytes = [0u8; POINT_SIZE];
    point
        .serialize_compressed(&mut bytes[..])
        .map_err(|_| CommitmentError::Encoding("point"))?;
    Ok(bytes)
}

/// Decodes a compressed point, rejecting bytes off the curve.
pub fn decode_point(bytes: &[u8; POINT_SIZE]) -> Result<Point, CommitmentError> {
    Point::deserialize_compressed(&bytes[..]).map_err(|_| CommitmentError::Decoding("point"))
}

pub fn encode_scalar(scalar: &Scalar) -> Result<[u8; SCALAR_SIZE], CommitmentError> {
    let mut bytes = [0u8; SCALAR_SIZE];
    scalar
        .serialize_compressed(&mut bytes[..])
        .map_err(|_| CommitmentError::Encoding("scalar"))?;
    Ok(bytes)
}

/// Decodes a scalar, rejecting values not below the group order.
pub fn decode_scalar(bytes: &[u8; SCALAR_SIZE]) -> Result<Scalar, CommitmentError> {
    Scalar::deserialize_compressed(&bytes[..]).map_err(|_| CommitmentError::Decoding("scalar"))
}

fn inner_product(a: &[Scalar], b: &[Scalar]) -> Scalar {
    a.iter()
        .zip(b)
        .fold(Scalar::zero(), |acc, (x, y)| acc + *x * y)
}

fn wide_scalar(xof: &mut Blake2sXof) -> Scalar {
    let mut wide = [0u8; 64];
    xof.squeeze(&mut wide);
    Scalar::from_le_bytes_mod_order(&wide)
}

fn challenge(
    context: &Digest,
    commitment: &[u8; POINT_SIZE],
    point: &[Scalar],
    claimed: Scalar,
    nonce_commitment: &Point,
    nonce_evaluation: Scalar,
) -> Result<Scalar, CommitmentError> {
    let mut hasher = Hasher::new();
    hasher.update_framed(CHALLENGE_DOMAIN);
    hasher.update(context);
    hasher.update(commitment);
    hasher.update(&(point.len() as u64).to_le_bytes());
    for coordinate in point {
        hasher.update(&encode_scalar(coordinate)?);
    }
    hasher.update(&encode_scalar(&claimed)?);
    hasher.update(&encode_point(nonce_commitment)?);
    hasher.update(&encode_scalar(&nonce_evaluation)?);
    Ok(wide_scalar(&mut hasher.finalize_xof()))
}

/// Try-and-increment hash onto G1. The BN254 G1 cofactor is one, so every
/// curve point is in the prime-order group.
fn hash_to_curve(index: u64) -> G1Affine {
    let mut attempt = 0u32;
    loop {
        let mut hasher = Hasher::new();
        hasher.update_framed(GENERATOR_DOMAIN);
        hasher.update(&index.to_le_bytes());
        hasher.update(&attempt.to_le_bytes());
        let mut wide = [0u8; 48];
        hasher.finalize_xof().squeeze(&mut wide);
        let x = Fq::from_le_bytes_mod_order(&wide);
        if let Some(point) = G1Affine::get_point_from_x_unchecked(x, wide[47] & 1 == 1) {
            return point;
        }
        attempt += 1;
    }
}
