//! Field arithmetic over the Goldilocks prime.

pub mod prime_field;

pub use prime_field::{
    CanonicalSerialize, FieldDeserializeError, FieldElement, FieldElementOps, Modulus,
};

#[cfg(test)]
mod tests;
