//! # Proof module overview
//!
//! ```text
//! proof
//! ├── types     : [`Proof`], [`PublicValues`] and the opening records
//! ├── ser       : canonical byte codec for [`Proof`]
//! ├── prover    : commit-and-open prover over a compiled circuit
//! ├── verifier  : [`verify`], [`verify_bytes`] and [`verify_with_report`]
//! ├── dense     : linear arguments for opened dense rows
//! └── errors    : prover/verifier errors and rejection reasons
//! ```
//!
//! A proof commits to every private wire, binds the commitment into a
//! Fiat–Shamir transcript and opens the constraint rows touching public wires
//! plus a transcript-sampled subset of the remaining rows. Opened dense rows
//! name wires only; their weights stay behind the row commitments and are
//! checked by one linear argument per layer.

mod dense;
pub mod errors;
pub mod prover;
pub mod ser;
pub mod types;
pub mod verifier;

pub use errors::{ProverError, RejectReason, VerifierError};
pub use prover::Prover;
pub use types::{
    ConstraintOpening, DenseArgument, Proof, PublicValues, WireOpening, PROOF_VERSION,
};
pub use verifier::{verify, verify_bytes, verify_with_report, VerificationVerdict};
