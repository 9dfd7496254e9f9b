use std::fmt;

use serde::{Deserialize, Serialize};

use crate::gate::ProofThreshold;

/// Opaque authenticated user identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-user proof accounting.
///
/// Counters only change through [`UserAccount::advance`] and
/// [`UserAccount::apply_attempt`]; the success rate is derived and recomputed
/// on every counter mutation and on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    user: UserId,
    proof_threshold: ProofThreshold,
    sampling_counter: u64,
    total_proofs: u64,
    successful_proofs: u64,
    success_rate: f64,
}

impl UserAccount {
    pub fn new(user: UserId, proof_threshold: ProofThreshold) -> Self {
        Self {
            user,
            proof_threshold,
            sampling_counter: 0,
            total_proofs: 0,
            successful_proofs: 0,
            success_rate: 0.0,
        }
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn proof_threshold(&self) -> ProofThreshold {
        self.proof_threshold
    }

    pub fn sampling_counter(&self) -> u64 {
        self.sampling_counter
    }

    pub fn total_proofs(&self) -> u64 {
        self.total_proofs
    }

    pub fn successful_proofs(&self) -> u64 {
        self.successful_proofs
    }

    pub fn failed_proofs(&self) -> u64 {
        self.total_proofs - self.successful_proofs
    }

    /// Percentage in `[0, 100]`; zero before the first attempt.
    pub fn success_rate(&self) -> f64 {
        self.success_rate
    }

    pub(crate) fn set_threshold(&mut self, threshold: ProofThreshold) {
        self.proof_threshold = threshold;
    }

    /// Advances the sampling counter, returning the new value.
    pub(crate) fn advance(&mut self) -> u64 {
        self.sampling_counter += 1;
        self.sampling_counter
    }

    /// Takes back an advance whose ticket was never handed out.
    pub(crate) fn rewind(&mut self) {
        self.sampling_counter = self.sampling_counter.saturating_sub(1);
    }

    pub(crate) fn apply_attempt(&mut self, succeeded: bool) {
        self.total_proofs += 1;
        if succeeded {
            self.successful_proofs += 1;
        }
        self.recompute();
    }

    /// Restores the derived fields and clamps counters read from storage.
    pub(crate) fn normalize(&mut self) {
        self.successful_proofs = self.successful_proofs.min(self.total_proofs);
        self.recompute();
    }

    fn recompute(&mut self) {
        self.success_rate = if self.total_proofs == 0 {
            0.0
        } else {
            self.successful_proofs as f64 / self.total_proofs as f64 * 100.0
        };
    }
}

/// Stats surface for one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountStats {
    pub total_proofs: u64,
    pub successful_proofs: u64,
    pub failed_proofs: u64,
    pub threshold: u32,
    pub success_percentage: f64,
    pub failed_verifications: u64,
}

impl AccountStats {
    pub(crate) fn new(account: &UserAccount, failed_verifications: u64) -> Self {
        Self {
            total_proofs: account.total_proofs(),
            successful_proofs: account.successful_proofs(),
            failed_proofs: account.failed_proofs(),
            threshold: account.proof_threshold().get(),
            success_percentage: account.success_rate(),
            failed_verifications,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn derived_rate_tracks_counters(outcomes in proptest::collection::vec(any::<bool>(), 0..200)) {
            let mut account = UserAccount::new(UserId(1), ProofThreshold::default());
            for succeeded in &outcomes {
                account.apply_attempt(*succeeded);
            }
            let successes = outcomes.iter().filter(|ok| **ok).count() as u64;
            prop_assert_eq!(account.total_proofs(), outcomes.len() as u64);
            prop_assert_eq!(account.successful_proofs(), successes);
            prop_assert_eq!(account.successful_proofs() + account.failed_proofs(), account.total_proofs());
            let expected = if outcomes.is_empty() {
                0.0
            } else {
                successes as f64 / outcomes.len() as f64 * 100.0
            };
            prop_assert_eq!(account.success_rate(), expected);
            prop_assert!((0.0..=100.0).contains(&account.success_rate()));
        }
    }

    #[test]
    fn stored_rate_is_recomputed_on_load() {
        let raw = r#"{"user":3,"proof_threshold":4,"sampling_counter":9,"total_proofs":4,"successful_proofs":3,"success_rate":12.5}"#;
        let mut account: UserAccount = serde_json::from_str(raw).unwrap();
        account.normalize();
        assert_eq!(account.success_rate(), 75.0);
        assert_eq!(account.sampling_counter(), 9);
    }
}
