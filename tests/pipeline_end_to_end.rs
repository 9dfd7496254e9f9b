mod _fixtures;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use _fixtures::{
    exhausted_backend, image, orchestrator_with_user, pooled_layers, register, test_config,
    GatedBackend, RefusingStore,
};
use zkinfer::circuit::CompilationError;
use zkinfer::ledger::{LedgerError, OutcomeLedger, UserId};
use zkinfer::model::ModelVariant;
use zkinfer::pipeline::{
    FailureCause, Orchestrator, PipelineError, ProofBackend, ProofStatus, RequestState,
};
use zkinfer::proof::{verify_bytes, ProverError};
use zkinfer::ProofThreshold;

const WAIT: Duration = Duration::from_secs(120);

#[test]
fn every_request_is_proved_at_threshold_one() {
    let user = UserId(7);
    let orchestrator = orchestrator_with_user(user, 1);

    for seed in 0..3 {
        let response = orchestrator
            .classify(user, "resnet18", &image(seed), WAIT)
            .unwrap();
        assert_eq!(response.proof, ProofStatus::Verified);
        assert_eq!(response.model.variant, ModelVariant::ResNet18);
    }

    let stats = orchestrator.stats(user).unwrap();
    assert_eq!(stats.total_proofs, 3);
    assert_eq!(stats.successful_proofs, 3);
    assert_eq!(stats.success_percentage, 100.0);
    assert_eq!(stats.threshold, 1);

    // A prover that runs out of resources counts as a failed attempt.
    let failing = Orchestrator::builder(test_config())
        .ledger(Arc::clone(orchestrator.ledger()))
        .backend(exhausted_backend())
        .build()
        .unwrap();
    let response = failing.classify(user, "resnet18", &image(3), WAIT).unwrap();
    assert!(matches!(
        response.proof,
        ProofStatus::Failed(FailureCause::Prover(ProverError::ResourceExhausted { .. }))
    ));

    let stats = orchestrator.stats(user).unwrap();
    assert_eq!(stats.total_proofs, 4);
    assert_eq!(stats.successful_proofs, 3);
    assert_eq!(stats.failed_proofs, 1);
    assert_eq!(stats.success_percentage, 75.0);
    assert_eq!(stats.failed_verifications, 0);
}

#[test]
fn concurrent_requests_prove_exactly_one_in_threshold() {
    let user = UserId(11);
    let orchestrator = orchestrator_with_user(user, 10);

    let handles: Vec<_> = thread::scope(|scope| {
        let workers: Vec<_> = (0..8u64)
            .map(|worker| {
                let orchestrator = &orchestrator;
                scope.spawn(move || {
                    (0..125u64)
                        .map(|i| {
                            orchestrator
                                .submit(user, "resnet18", &image(worker * 1000 + i))
                                .unwrap()
                                .proof
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        workers
            .into_iter()
            .flat_map(|worker| worker.join().unwrap())
            .collect()
    });
    assert_eq!(handles.len(), 1000);

    let statuses: Vec<ProofStatus> = handles.iter().map(|handle| handle.wait()).collect();
    let attempted = statuses
        .iter()
        .filter(|status| **status != ProofStatus::NotAttempted)
        .count();
    assert_eq!(attempted, 100);
    assert!(statuses
        .iter()
        .all(|status| matches!(status, ProofStatus::NotAttempted | ProofStatus::Verified)));

    let account = orchestrator.ledger().account(user).unwrap();
    assert_eq!(account.sampling_counter(), 1000);
    let stats = orchestrator.stats(user).unwrap();
    assert_eq!(stats.total_proofs, 100);
    assert_eq!(stats.successful_proofs, 100);
    assert_eq!(orchestrator.cache().compilations(), 1);
}

#[test]
fn polling_mode_returns_before_the_proof() {
    let user = UserId(3);
    let orchestrator = orchestrator_with_user(user, 1);

    let submission = orchestrator.submit(user, "ResNet34", &image(42)).unwrap();
    let request = submission.request_id();
    assert!(orchestrator.proof_status(request).is_some());

    assert_eq!(submission.proof.wait(), ProofStatus::Verified);
    assert_eq!(orchestrator.proof_status(request), Some(ProofStatus::Verified));
    assert_eq!(submission.proof.state(), RequestState::Finalized);

    let receipt = submission.proof.receipt().expect("receipt");
    let artifact = orchestrator.cache().get(&receipt.model).expect("cached circuit");
    assert_eq!(receipt.key_digest, artifact.key_digest());
    assert!(verify_bytes(receipt.proof.as_slice(), &receipt.public, &artifact.verification_key).unwrap());

    let record = orchestrator.ledger().request(request).expect("record");
    assert!(record.proof_generated);
    assert_eq!(record.proof_verified, Some(true));
    assert_eq!(
        record.classification_result,
        Some(submission.inference.classification)
    );
    assert_eq!(record.image_reference, image(42).reference());
}

#[test]
fn skipped_requests_are_not_attempted() {
    let user = UserId(4);
    let orchestrator = orchestrator_with_user(user, 5);

    let statuses: Vec<ProofStatus> = (0..5)
        .map(|seed| {
            orchestrator
                .classify(user, "resnet18", &image(seed), WAIT)
                .unwrap()
                .proof
        })
        .collect();
    assert!(statuses[..4]
        .iter()
        .all(|status| *status == ProofStatus::NotAttempted));
    assert_eq!(statuses[4], ProofStatus::Verified);

    let stats = orchestrator.stats(user).unwrap();
    assert_eq!(stats.total_proofs, 1);
    assert_eq!(orchestrator.ledger().pending_proofs(user).len(), 4);
}

#[test]
fn unsupported_model_leaves_no_trace() {
    let user = UserId(5);
    let orchestrator = orchestrator_with_user(user, 1);

    let err = orchestrator.submit(user, "vgg16", &image(0)).unwrap_err();
    assert!(matches!(err, PipelineError::UnsupportedModel(_)));
    assert!(orchestrator.ledger().requests(user, false).is_empty());
    assert_eq!(orchestrator.ledger().account(user).unwrap().sampling_counter(), 0);
}

#[test]
fn unknown_user_is_refused() {
    let orchestrator = Orchestrator::new(test_config()).unwrap();
    let err = orchestrator.submit(UserId(99), "resnet18", &image(0)).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Ledger(LedgerError::UnknownUser { user: UserId(99) })
    ));
}

#[test]
fn shutdown_abandons_new_proofs() {
    let user = UserId(6);
    let orchestrator = orchestrator_with_user(user, 1);
    assert!(orchestrator.shutdown());

    let response = orchestrator
        .classify(user, "resnet18", &image(1), WAIT)
        .unwrap();
    assert_eq!(response.proof, ProofStatus::Abandoned);

    let stats = orchestrator.stats(user).unwrap();
    assert_eq!(stats.total_proofs, 0);
    assert_eq!(stats.successful_proofs, 0);
    let record = orchestrator.ledger().request(response.request_id).unwrap();
    assert!(!record.proof_generated);
    assert_eq!(record.proof_verified, None);
}

#[test]
fn shutdown_abandons_a_proof_in_flight() {
    let user = UserId(13);
    let mut config = test_config();
    config.workers.proof_timeout_ms = 50;
    let backend = Arc::new(GatedBackend::new(&config));
    let orchestrator = Orchestrator::builder(config)
        .backend(Arc::clone(&backend) as Arc<dyn ProofBackend>)
        .build()
        .unwrap();
    register(orchestrator.ledger(), user, 1);

    let submission = orchestrator.submit(user, "resnet18", &image(5)).unwrap();
    backend.entered.wait();
    // The parked proof keeps the pool busy past the drain timeout.
    assert!(!orchestrator.shutdown());
    backend.release.wait();

    assert_eq!(submission.proof.wait(), ProofStatus::Abandoned);
    assert_eq!(submission.proof.state(), RequestState::Finalized);
    let stats = orchestrator.stats(user).unwrap();
    assert_eq!(stats.total_proofs, 0);
    assert_eq!(stats.successful_proofs, 0);
    let record = orchestrator.ledger().request(submission.request_id()).unwrap();
    assert!(!record.proof_generated);
    assert_eq!(record.proof_verified, None);
}

#[test]
fn refused_counter_write_does_not_stall_the_user() {
    let user = UserId(14);
    let store = Arc::new(RefusingStore::default());
    let ledger =
        OutcomeLedger::open(Box::new(Arc::clone(&store)), ProofThreshold::new(1).unwrap()).unwrap();
    let orchestrator = Orchestrator::builder(test_config())
        .ledger(Arc::new(ledger))
        .build()
        .unwrap();
    register(orchestrator.ledger(), user, 1);

    store.refuse_accounts.store(1, Ordering::SeqCst);
    let err = orchestrator.submit(user, "resnet18", &image(0)).unwrap_err();
    assert!(matches!(err, PipelineError::Ledger(LedgerError::Io { .. })));
    assert!(orchestrator.ledger().requests(user, false).is_empty());
    assert_eq!(orchestrator.tracked_requests(), 0);
    assert_eq!(orchestrator.ledger().account(user).unwrap().sampling_counter(), 0);

    for seed in 1..4 {
        let response = orchestrator
            .classify(user, "resnet18", &image(seed), WAIT)
            .unwrap();
        assert_eq!(response.proof, ProofStatus::Verified);
    }
    let stats = orchestrator.stats(user).unwrap();
    assert_eq!(stats.total_proofs, 3);
    assert_eq!(stats.successful_proofs, 3);
    assert_eq!(orchestrator.ledger().account(user).unwrap().sampling_counter(), 3);
    assert_eq!(orchestrator.ledger().requests(user, false).len(), 3);
}

#[test]
fn finished_handles_are_retired() {
    let user = UserId(15);
    let mut config = test_config();
    config.workers.status_retention = 4;
    let orchestrator = Orchestrator::new(config).unwrap();
    // Nothing fires below the threshold, so every request finishes inline.
    register(orchestrator.ledger(), user, 11);

    let ids: Vec<_> = (0..10)
        .map(|seed| {
            orchestrator
                .classify(user, "resnet18", &image(seed), WAIT)
                .unwrap()
                .request_id
        })
        .collect();
    assert_eq!(orchestrator.tracked_requests(), 4);
    assert!(orchestrator.handle(ids[0]).is_none());
    assert!(orchestrator.proof_status(ids[5]).is_none());
    assert_eq!(orchestrator.proof_status(ids[9]), Some(ProofStatus::NotAttempted));
    // Records outlive their handles.
    assert!(orchestrator.ledger().request(ids[0]).is_some());

    let removed = orchestrator.delete_requests(user, false).unwrap();
    assert_eq!(removed.len(), 10);
    assert_eq!(orchestrator.tracked_requests(), 0);
    assert!(orchestrator.handle(ids[9]).is_none());
}

#[test]
fn compile_failure_keeps_the_classification() {
    let user = UserId(8);
    let orchestrator = orchestrator_with_user(user, 1);

    let before = orchestrator
        .classify(user, "resnet18", &image(9), WAIT)
        .unwrap();
    assert_eq!(before.proof, ProofStatus::Verified);
    assert!(orchestrator.cache().get(&before.model).is_some());

    let upgraded = orchestrator
        .upgrade_model(ModelVariant::ResNet18, pooled_layers())
        .unwrap();
    assert_eq!(upgraded.revision, before.model.revision + 1);
    assert!(orchestrator.cache().get(&before.model).is_none());

    let after = orchestrator
        .classify(user, "resnet18", &image(9), WAIT)
        .unwrap();
    assert_eq!(after.model, upgraded);
    assert!(matches!(
        after.proof,
        ProofStatus::Failed(FailureCause::Compilation(
            CompilationError::UnsupportedOperator { .. }
        ))
    ));

    // The other variant is unaffected.
    let other = orchestrator
        .classify(user, "resnet34", &image(9), WAIT)
        .unwrap();
    assert_eq!(other.proof, ProofStatus::Verified);

    let stats = orchestrator.stats(user).unwrap();
    assert_eq!(stats.total_proofs, 3);
    assert_eq!(stats.successful_proofs, 2);
}

#[test]
fn threshold_changes_apply_to_later_requests() {
    let user = UserId(12);
    let orchestrator = orchestrator_with_user(user, 3);
    let ledger = orchestrator.ledger();

    assert!(ledger.set_threshold(user, 0).is_err());
    assert!(ledger.set_threshold(user, -4).is_err());
    assert_eq!(orchestrator.stats(user).unwrap().threshold, 3);

    let first = orchestrator
        .classify(user, "resnet18", &image(1), WAIT)
        .unwrap();
    assert_eq!(first.proof, ProofStatus::NotAttempted);

    ledger.set_threshold(user, 2).unwrap();
    let second = orchestrator
        .classify(user, "resnet18", &image(2), WAIT)
        .unwrap();
    assert_eq!(second.proof, ProofStatus::Verified);
}

#[test]
fn users_are_sampled_independently() {
    let alice = UserId(20);
    let bob = UserId(21);
    let orchestrator = orchestrator_with_user(alice, 2);
    register(orchestrator.ledger(), bob, 1);

    orchestrator.classify(alice, "resnet18", &image(1), WAIT).unwrap();
    let bob_response = orchestrator.classify(bob, "resnet18", &image(2), WAIT).unwrap();
    assert_eq!(bob_response.proof, ProofStatus::Verified);

    assert_eq!(orchestrator.ledger().account(alice).unwrap().sampling_counter(), 1);
    assert_eq!(orchestrator.ledger().account(bob).unwrap().sampling_counter(), 1);
    assert_eq!(orchestrator.stats(alice).unwrap().total_proofs, 0);
    assert_eq!(orchestrator.stats(bob).unwrap().total_proofs, 1);
}
