use core::fmt;

use thiserror::Error;

/// Section of an encoding a failure was detected in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerKind {
    /// Top-level proof framing.
    Proof,
    /// Quantized public inputs and outputs.
    PublicValues,
    /// Encoded constraint row.
    ConstraintRow,
    /// Opened constraint with its authentication path.
    ConstraintOpening,
    /// Opened private wire with its authentication path.
    WireOpening,
    /// Merkle authentication path.
    MerklePath,
    /// Linear argument over a dense layer's weight commitments.
    DenseArgument,
}

impl fmt::Display for SerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SerKind::Proof => "proof",
            SerKind::PublicValues => "public values",
            SerKind::ConstraintRow => "constraint row",
            SerKind::ConstraintOpening => "constraint opening",
            SerKind::WireOpening => "wire opening",
            SerKind::MerklePath => "merkle path",
            SerKind::DenseArgument => "dense argument",
        };
        f.write_str(label)
    }
}

/// Canonical serialization error surfaced while encoding or decoding data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerError {
    /// Input ended before the expected number of bytes were read.
    #[error("{kind}: unexpected end of input while reading {field}")]
    UnexpectedEnd { kind: SerKind, field: &'static str },
    /// A length prefix exceeded the configured bounds or the remaining buffer.
    #[error("{kind}: invalid length for {field}")]
    InvalidLength { kind: SerKind, field: &'static str },
    /// Unknown discriminant or non-canonical value.
    #[error("{kind}: invalid value for {field}")]
    InvalidValue { kind: SerKind, field: &'static str },
    /// Additional bytes remained after consuming the expected payload.
    #[error("{kind}: {remaining} trailing bytes after offset {consumed}")]
    TrailingBytes {
        kind: SerKind,
        consumed: usize,
        remaining: usize,
    },
}

impl SerError {
    pub fn unexpected_end(kind: SerKind, field: &'static str) -> Self {
        SerError::UnexpectedEnd { kind, field }
    }

    pub fn invalid_length(kind: SerKind, field: &'static str) -> Self {
        SerError::InvalidLength { kind, field }
    }

    pub fn invalid_value(kind: SerKind, field: &'static str) -> Self {
        SerError::InvalidValue { kind, field }
    }

    /// Returns the section associated with the error.
    pub fn kind(&self) -> SerKind {
        match *self {
            SerError::UnexpectedEnd { kind, .. }
            | SerError::InvalidLength { kind, .. }
            | SerError::InvalidValue { kind, .. }
            | SerError::TrailingBytes { kind, .. } => kind,
        }
    }
}

/// Convenient alias for serialization results.
pub type SerResult<T> = core::result::Result<T, SerError>;
