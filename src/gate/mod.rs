//! Per-user sampling gate.
//!
//! Every eligible request advances the user's persisted sampling counter by
//! one and receives a [`Ticket`] carrying the new counter value. The active
//! [`SamplingPolicy`] decides from the counter and the user's threshold whether
//! the request is proved. Tickets double as the per-user arrival order in
//! which the ledger applies outcomes.

use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::DEFAULT_PROOF_THRESHOLD;
use crate::ledger::{LedgerError, OutcomeLedger, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("proof threshold must be at least 1, got {value}")]
pub struct InvalidConfigurationError {
    pub value: i64,
}

/// Sampling denominator; always at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u32")]
pub struct ProofThreshold(NonZeroU32);

impl ProofThreshold {
    pub fn new(value: i64) -> Result<Self, InvalidConfigurationError> {
        u32::try_from(value)
            .ok()
            .and_then(NonZeroU32::new)
            .map(Self)
            .ok_or(InvalidConfigurationError { value })
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl Default for ProofThreshold {
    fn default() -> Self {
        Self(NonZeroU32::MIN.saturating_add(DEFAULT_PROOF_THRESHOLD - 1))
    }
}

impl TryFrom<i64> for ProofThreshold {
    type Error = InvalidConfigurationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProofThreshold> for u32 {
    fn from(threshold: ProofThreshold) -> Self {
        threshold.get()
    }
}

impl fmt::Display for ProofThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decides whether the request at `counter` is proved.
pub trait SamplingPolicy: Send + Sync + fmt::Debug {
    /// `counter` is the post-increment sampling counter, starting at 1.
    fn fires(&self, counter: u64, threshold: ProofThreshold) -> bool;

    fn name(&self) -> &'static str;
}

/// Proves every `threshold`-th request: `counter % threshold == 0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedModulus;

impl SamplingPolicy for FixedModulus {
    fn fires(&self, counter: u64, threshold: ProofThreshold) -> bool {
        counter % u64::from(threshold.get()) == 0
    }

    fn name(&self) -> &'static str {
        "fixed-modulus"
    }
}

/// Position of a request in its user's arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ticket {
    pub user: UserId,
    /// Sampling counter value assigned to the request.
    pub sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    pub ticket: Ticket,
    pub fire: bool,
}

#[derive(Debug, Clone)]
pub struct SamplingGate {
    ledger: Arc<OutcomeLedger>,
    policy: Arc<dyn SamplingPolicy>,
}

impl SamplingGate {
    pub fn new(ledger: Arc<OutcomeLedger>, policy: Arc<dyn SamplingPolicy>) -> Self {
        Self { ledger, policy }
    }

    pub fn fixed_modulus(ledger: Arc<OutcomeLedger>) -> Self {
        Self::new(ledger, Arc::new(FixedModulus))
    }

    pub fn policy(&self) -> &dyn SamplingPolicy {
        self.policy.as_ref()
    }

    /// Advances the user's counter and evaluates the policy in one exclusive
    /// section of the user's account.
    pub fn should_prove(&self, user: UserId) -> Result<GateDecision, LedgerError> {
        let policy = Arc::clone(&self.policy);
        let decision = self
            .ledger
            .advance_counter(user, |counter, threshold| policy.fires(counter, threshold))?;
        debug!(
            user = %user,
            sequence = decision.ticket.sequence,
            fire = decision.fire,
            policy = self.policy.name(),
            "sampling gate evaluated"
        );
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn threshold(value: i64) -> ProofThreshold {
        ProofThreshold::new(value).unwrap()
    }

    #[test]
    fn rejects_non_positive_thresholds() {
        for value in [0, -1, i64::MIN, i64::from(u32::MAX) + 1] {
            assert_eq!(
                ProofThreshold::new(value),
                Err(InvalidConfigurationError { value })
            );
        }
        insta::assert_snapshot!(
            InvalidConfigurationError { value: 0 }.to_string(),
            @"proof threshold must be at least 1, got 0"
        );
    }

    #[test]
    fn default_matches_service_default() {
        assert_eq!(ProofThreshold::default().get(), DEFAULT_PROOF_THRESHOLD);
    }

    #[test]
    fn threshold_one_fires_every_time() {
        assert!((1..=20).all(|counter| FixedModulus.fires(counter, threshold(1))));
    }

    #[test]
    fn threshold_serializes_as_integer() {
        let encoded = serde_json::to_string(&threshold(5)).unwrap();
        assert_eq!(encoded, "5");
        assert!(serde_json::from_str::<ProofThreshold>("0").is_err());
        assert_eq!(serde_json::from_str::<ProofThreshold>("7").unwrap(), threshold(7));
    }

    proptest! {
        #[test]
        fn fixed_modulus_fires_on_multiples(n in 1i64..64, m in 0u64..512) {
            let threshold = threshold(n);
            let fired: Vec<u64> = (1..=m).filter(|c| FixedModulus.fires(*c, threshold)).collect();
            prop_assert_eq!(fired.len() as u64, m / n as u64);
            let expected: Vec<u64> = (1..=m / n as u64).map(|k| k * n as u64).collect();
            prop_assert_eq!(fired, expected);
        }
    }
}
