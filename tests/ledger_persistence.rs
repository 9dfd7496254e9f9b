mod _fixtures;

use std::time::Duration;

use _fixtures::{image, test_config};
use zkinfer::ledger::{JsonFileStore, OutcomeLedger, UserId};
use zkinfer::pipeline::{Orchestrator, ProofStatus};
use zkinfer::ProofThreshold;

#[test]
fn counters_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.ledger.path = Some(dir.path().join("state").join("ledger.log"));
    let user = UserId(1);

    let request = {
        let orchestrator = Orchestrator::new(config.clone()).unwrap();
        let ledger = orchestrator.ledger();
        ledger.create_account(user).unwrap();
        ledger.set_threshold(user, 2).unwrap();
        orchestrator
            .classify(user, "resnet18", &image(1), Duration::from_secs(120))
            .unwrap();
        let response = orchestrator
            .classify(user, "resnet18", &image(2), Duration::from_secs(120))
            .unwrap();
        assert_eq!(response.proof, ProofStatus::Verified);
        assert!(orchestrator.shutdown());
        response.request_id
    };

    let reopened = OutcomeLedger::from_config(&config).unwrap();
    let account = reopened.account(user).unwrap();
    assert_eq!(account.sampling_counter(), 2);
    assert_eq!(account.proof_threshold().get(), 2);

    let stats = reopened.read_stats(user).unwrap();
    assert_eq!(stats.total_proofs, 1);
    assert_eq!(stats.successful_proofs, 1);
    assert_eq!(stats.success_percentage, 100.0);

    let record = reopened.request(request).unwrap();
    assert_eq!(record.proof_verified, Some(true));
    assert_eq!(reopened.requests(user, false).len(), 2);
    assert_eq!(reopened.requests(user, true).len(), 1);

    // Sampling resumes from the persisted counter.
    let orchestrator = Orchestrator::builder(config)
        .ledger(std::sync::Arc::new(reopened))
        .build()
        .unwrap();
    let next = orchestrator
        .classify(user, "resnet18", &image(3), Duration::from_secs(120))
        .unwrap();
    assert_eq!(next.proof, ProofStatus::NotAttempted);
    assert!(next.request_id > request);
}

#[test]
fn deleting_requests_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.log");
    let user = UserId(2);
    let threshold = ProofThreshold::new(1).unwrap();

    {
        let store = JsonFileStore::open(&path).unwrap();
        let ledger = OutcomeLedger::open(Box::new(store), threshold).unwrap();
        ledger.create_account(user).unwrap();
        let orchestrator = Orchestrator::builder(test_config())
            .ledger(std::sync::Arc::new(ledger))
            .build()
            .unwrap();
        for seed in 0..2 {
            orchestrator
                .classify(user, "resnet34", &image(seed), Duration::from_secs(120))
                .unwrap();
        }
        assert_eq!(orchestrator.delete_requests(user, true).unwrap().len(), 2);
    }

    let ledger = OutcomeLedger::open(Box::new(JsonFileStore::open(&path).unwrap()), threshold).unwrap();
    assert!(ledger.requests(user, false).is_empty());
    assert_eq!(ledger.read_stats(user).unwrap().total_proofs, 2);
}

#[test]
fn retention_bounds_the_persisted_history() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.log");
    let mut config = test_config();
    config.ledger.path = Some(path.clone());
    config.ledger.request_retention = 3;
    let user = UserId(3);

    let ids = {
        let orchestrator = Orchestrator::new(config.clone()).unwrap();
        let ledger = orchestrator.ledger();
        ledger.create_account(user).unwrap();
        ledger.set_threshold(user, 50).unwrap();
        let ids: Vec<_> = (0..8)
            .map(|seed| {
                orchestrator
                    .classify(user, "resnet18", &image(seed), Duration::from_secs(120))
                    .unwrap()
                    .request_id
            })
            .collect();
        assert_eq!(orchestrator.ledger().requests(user, false).len(), 3);
        assert!(orchestrator.shutdown());
        ids
    };

    let reopened = OutcomeLedger::from_config(&config).unwrap();
    let mut kept: Vec<_> = reopened
        .requests(user, false)
        .into_iter()
        .map(|record| record.id)
        .collect();
    kept.sort();
    assert_eq!(kept, ids[5..].to_vec());
    assert_eq!(reopened.account(user).unwrap().sampling_counter(), 8);

    // Shutdown compacts the log down to the cursor, the account and the
    // retained records.
    assert_eq!(JsonFileStore::open(&path).unwrap().lines(), 5);
}
