//! Pipeline configuration.
//!
//! Every section has defaults, so an empty TOML document is a valid
//! configuration. The proving-relevant subset (quantization and proof profile)
//! is bound into a [`ParamDigest`] that keys and proofs commit to; changing any
//! of those fields yields circuits, keys and proofs that do not interoperate
//! with the previous ones.
//!
//! ```toml
//! default_threshold = 100
//!
//! [quantization]
//! scale_bits = 7
//! input_bits = 16
//! range_bits = 32
//!
//! [profile]
//! query_count = 48
//!
//! [workers]
//! threads = 0          # 0 = one per available core
//! queue_limit = 1024
//! proof_timeout_ms = 30000
//! status_retention = 4096 # finished requests whose status stays pollable
//!
//! [ledger]
//! path = "ledger.log"  # omit for an in-memory ledger
//! request_retention = 10000 # per user; 0 keeps every record
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::{Digest, Hasher};

/// Domain separator prepended to the little-endian parameter fields.
pub const PARAM_DIGEST_DOMAIN_TAG: &[u8; 16] = b"ZKINFER-PARAMS-1";

/// Threshold applied to freshly created accounts; matches the deployed service.
pub const DEFAULT_PROOF_THRESHOLD: u32 = 100;

/// Request records kept per user by default.
pub const DEFAULT_REQUEST_RETENTION: usize = 10_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Fixed-point quantization shared by the inference adapter and the circuits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuantizationConfig {
    /// Values are scaled by `2^scale_bits` before rounding.
    pub scale_bits: u32,
    /// Quantized inputs must fit in a signed integer of this width.
    pub input_bits: u32,
    /// Bit width of the range checks behind every ReLU.
    pub range_bits: u32,
}

impl Default for QuantizationConfig {
    fn default() -> Self {
        Self {
            scale_bits: 7,
            input_bits: 16,
            range_bits: 32,
        }
    }
}

impl QuantizationConfig {
    /// `2^scale_bits` as a float.
    pub fn scale(&self) -> f64 {
        (1u64 << self.scale_bits) as f64
    }
}

/// Soundness profile of the proof system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProofProfile {
    /// Number of constraint rows sampled by Fiat–Shamir on top of the
    /// mandatory rows touching public wires.
    pub query_count: u16,
}

impl Default for ProofProfile {
    fn default() -> Self {
        Self { query_count: 48 }
    }
}

/// Upper bounds enforced by the compiler and the prover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceLimits {
    pub max_constraints: usize,
    pub max_wires: usize,
    pub max_proof_bytes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_constraints: 1 << 20,
            max_wires: 1 << 20,
            max_proof_bytes: 4 << 20,
        }
    }
}

/// Proving worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// Worker threads; `0` sizes the pool to the available cores.
    pub threads: usize,
    /// Maximum number of queued plus running proof jobs.
    pub queue_limit: usize,
    /// Default wait applied by the blocking consumption mode.
    pub proof_timeout_ms: u64,
    /// Finalized requests whose handle stays reachable by id.
    pub status_retention: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            queue_limit: 1024,
            proof_timeout_ms: 30_000,
            status_retention: 4096,
        }
    }
}

impl WorkerConfig {
    pub fn proof_timeout(&self) -> Duration {
        Duration::from_millis(self.proof_timeout_ms)
    }

    /// Resolved thread count.
    pub fn thread_count(&self) -> usize {
        if self.threads > 0 {
            return self.threads;
        }
        std::thread::available_parallelism()
            .map(|cores| cores.get())
            .unwrap_or(1)
    }
}

/// Ledger persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    /// Change log file; `None` keeps the ledger in memory.
    pub path: Option<PathBuf>,
    /// Request records kept per user, oldest evicted first; `0` keeps all.
    pub request_retention: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: None,
            request_retention: DEFAULT_REQUEST_RETENTION,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub default_threshold: u32,
    pub quantization: QuantizationConfig,
    pub profile: ProofProfile,
    pub limits: ResourceLimits,
    pub workers: WorkerConfig,
    pub ledger: LedgerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_threshold: DEFAULT_PROOF_THRESHOLD,
            quantization: QuantizationConfig::default(),
            profile: ProofProfile::default(),
            limits: ResourceLimits::default(),
            workers: WorkerConfig::default(),
            ledger: LedgerConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let quant = &self.quantization;
        if self.default_threshold == 0 {
            return Err(invalid("default_threshold", "must be at least 1"));
        }
        if !(1..=24).contains(&quant.scale_bits) {
            return Err(invalid("quantization.scale_bits", "expected 1..=24"));
        }
        if !(2..=32).contains(&quant.input_bits) {
            return Err(invalid("quantization.input_bits", "expected 2..=32"));
        }
        if quant.range_bits < quant.input_bits || quant.range_bits > 62 {
            return Err(invalid(
                "quantization.range_bits",
                format!("expected {}..=62", quant.input_bits),
            ));
        }
        if self.profile.query_count == 0 {
            return Err(invalid("profile.query_count", "must be at least 1"));
        }
        if self.workers.queue_limit == 0 {
            return Err(invalid("workers.queue_limit", "must be at least 1"));
        }
        if self.limits.max_constraints == 0 || self.limits.max_wires == 0 {
            return Err(invalid("limits", "circuit bounds must be non-zero"));
        }
        Ok(())
    }

    pub fn param_digest(&self) -> ParamDigest {
        compute_param_digest(&self.quantization, &self.profile)
    }
}

/// Digest over the proving parameters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParamDigest(pub Digest);

impl ParamDigest {
    pub fn as_bytes(&self) -> &Digest {
        &self.0
    }
}

impl fmt::Debug for ParamDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParamDigest({})", hex::encode(self.0))
    }
}

impl fmt::Display for ParamDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Hashes the domain tag followed by the proving parameters in little-endian
/// order: scale bits, input bits, range bits, query count.
pub fn compute_param_digest(quant: &QuantizationConfig, profile: &ProofProfile) -> ParamDigest {
    let mut hasher = Hasher::new();
    hasher.update(PARAM_DIGEST_DOMAIN_TAG);
    hasher.update(&quant.scale_bits.to_le_bytes());
    hasher.update(&quant.input_bits.to_le_bytes());
    hasher.update(&quant.range_bits.to_le_bytes());
    hasher.update(&profile.query_count.to_le_bytes());
    ParamDigest(hasher.finalize().into_bytes())
}
