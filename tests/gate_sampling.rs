use std::sync::Arc;
use std::thread;

use proptest::prelude::*;
use zkinfer::gate::{ProofThreshold, SamplingGate};
use zkinfer::ledger::{OutcomeLedger, UserId};
use zkinfer::pipeline::ProofOutcome;

fn ledger_with(user: UserId, threshold: i64) -> Arc<OutcomeLedger> {
    let ledger = Arc::new(OutcomeLedger::in_memory(ProofThreshold::default()));
    ledger.create_account(user).unwrap();
    ledger.set_threshold(user, threshold).unwrap();
    ledger
}

proptest! {
    #[test]
    fn fires_once_per_threshold(threshold in 1i64..64, requests in 0u64..400) {
        let user = UserId(1);
        let gate = SamplingGate::fixed_modulus(ledger_with(user, threshold));
        let fired: Vec<u64> = (0..requests)
            .map(|_| gate.should_prove(user).unwrap())
            .filter(|decision| decision.fire)
            .map(|decision| decision.ticket.sequence)
            .collect();
        prop_assert_eq!(fired.len() as u64, requests / threshold as u64);
        prop_assert!(fired.iter().all(|sequence| sequence % threshold as u64 == 0));
    }
}

#[test]
fn concurrent_gating_hands_out_unique_tickets() {
    let user = UserId(2);
    let ledger = ledger_with(user, 10);
    let gate = SamplingGate::fixed_modulus(Arc::clone(&ledger));

    let mut decisions: Vec<_> = thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let gate = &gate;
                scope.spawn(move || {
                    (0..250)
                        .map(|_| gate.should_prove(user).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        workers
            .into_iter()
            .flat_map(|worker| worker.join().unwrap())
            .collect()
    });
    decisions.sort_by_key(|decision| decision.ticket.sequence);

    let sequences: Vec<u64> = decisions.iter().map(|d| d.ticket.sequence).collect();
    assert_eq!(sequences, (1..=2000).collect::<Vec<u64>>());
    assert_eq!(decisions.iter().filter(|d| d.fire).count(), 200);

    // Outcomes delivered in reverse still apply in ticket order.
    for decision in decisions.iter().rev() {
        let outcome = if decision.fire {
            ProofOutcome::Succeeded
        } else {
            ProofOutcome::NotAttempted
        };
        ledger.record(&decision.ticket, &outcome).unwrap();
    }
    let stats = ledger.read_stats(user).unwrap();
    assert_eq!(stats.total_proofs, 200);
    assert_eq!(stats.successful_proofs, 200);
}

#[test]
fn unknown_user_has_no_gate() {
    let ledger = Arc::new(OutcomeLedger::in_memory(ProofThreshold::default()));
    let gate = SamplingGate::fixed_modulus(ledger);
    assert!(gate.should_prove(UserId(404)).is_err());
}
