//! Shared helpers.

pub mod parallel;
pub mod serialization;

pub use serialization::ProofBytes;

/// Seconds since the Unix epoch, saturating to zero for clocks set before it.
pub fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
