//! Request orchestration.
//!
//! Inference runs on the caller's thread and its result is always returned.
//! The gate then decides whether the request is proved; selected requests are
//! handed to the proving pool, where compile, witness, prove and verify run
//! as one job that checks the cancellation flag between stages. Every failure
//! after inference is folded into a [`ProofOutcome`] and never surfaces as a
//! request error.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rayon::ThreadPoolBuildError;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::backend::{NativeBackend, ProofBackend};
use super::job::{JobSlot, JobTable, ProofHandle};
use super::outcome::{FailureCause, ProofOutcome, ProofReceipt, ProofStatus, RequestState};
use super::pool::ProofWorkerPool;
use crate::circuit::{CircuitCache, CircuitCompiler};
use crate::config::{ConfigError, PipelineConfig};
use crate::gate::{SamplingGate, SamplingPolicy, Ticket};
use crate::ledger::{AccountStats, LedgerError, OutcomeLedger, RequestId, UserId};
use crate::model::{
    Classification, GraphError, Image, InferenceAdapter, InferenceError, InferenceResult, Layer,
    ModelGraph, ModelIdentity, ModelRegistry, ModelVariant, RegistryError, UnsupportedModelError,
};
use crate::proof::{ProverError, PublicValues, VerificationVerdict};

/// Log target for forged-result and verification-mismatch signals.
pub const INTEGRITY_TARGET: &str = "zkinfer::integrity";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    UnsupportedModel(#[from] UnsupportedModelError),
    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("model upgrade rejected: {0}")]
    Registry(#[from] RegistryError),
    #[error("invalid model graph: {0}")]
    Graph(#[from] GraphError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to start proving pool: {0}")]
    ThreadPool(#[from] ThreadPoolBuildError),
}

/// Immediate result of [`Orchestrator::submit`].
#[derive(Debug, Clone)]
pub struct Submission {
    pub inference: InferenceResult,
    pub proof: ProofHandle,
}

impl Submission {
    pub fn request_id(&self) -> RequestId {
        self.proof.request_id()
    }
}

/// Result of the blocking consumption mode.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifyResponse {
    pub request_id: RequestId,
    pub model: ModelIdentity,
    pub classification: Classification,
    /// [`ProofStatus::Pending`] when the proof outlived the timeout.
    pub proof: ProofStatus,
}

pub struct OrchestratorBuilder {
    config: PipelineConfig,
    ledger: Option<Arc<OutcomeLedger>>,
    backend: Option<Arc<dyn ProofBackend>>,
    policy: Option<Arc<dyn SamplingPolicy>>,
}

impl OrchestratorBuilder {
    pub fn ledger(mut self, ledger: Arc<OutcomeLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn ProofBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn policy(mut self, policy: Arc<dyn SamplingPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn build(self) -> Result<Orchestrator, PipelineError> {
        let config = self.config;
        config.validate()?;
        let ledger = match self.ledger {
            Some(ledger) => ledger,
            None => Arc::new(OutcomeLedger::from_config(&config)?),
        };
        let gate = match self.policy {
            Some(policy) => SamplingGate::new(Arc::clone(&ledger), policy),
            None => SamplingGate::fixed_modulus(Arc::clone(&ledger)),
        };
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(NativeBackend::new(config.limits)));
        Ok(Orchestrator {
            registry: ModelRegistry::with_builtin(&config.quantization),
            adapter: InferenceAdapter::new(config.quantization),
            compiler: CircuitCompiler::new(&config),
            cache: Arc::new(CircuitCache::new()),
            pool: ProofWorkerPool::new(&config.workers)?,
            jobs: Arc::new(Mutex::new(JobTable::new(config.workers.status_retention))),
            ledger,
            gate,
            backend,
            config,
        })
    }
}

#[derive(Debug)]
pub struct Orchestrator {
    config: PipelineConfig,
    registry: ModelRegistry,
    adapter: InferenceAdapter,
    compiler: CircuitCompiler,
    cache: Arc<CircuitCache>,
    ledger: Arc<OutcomeLedger>,
    gate: SamplingGate,
    backend: Arc<dyn ProofBackend>,
    pool: ProofWorkerPool,
    jobs: Arc<Mutex<JobTable>>,
}

impl Orchestrator {
    pub fn builder(config: PipelineConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            ledger: None,
            backend: None,
            policy: None,
        }
    }

    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<OutcomeLedger> {
        &self.ledger
    }

    pub fn cache(&self) -> &CircuitCache {
        &self.cache
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn stats(&self, user: UserId) -> Result<AccountStats, PipelineError> {
        Ok(self.ledger.read_stats(user)?)
    }

    /// Classifies `image` and, when the gate selects the request, queues its
    /// proof. Returns as soon as inference and gating are done.
    pub fn submit(
        &self,
        user: UserId,
        selector: &str,
        image: &Image,
    ) -> Result<Submission, PipelineError> {
        let graph = self.registry.resolve(selector)?;
        self.ledger.account(user)?;
        let inference = self.adapter.run(&graph, image)?;
        let request = self.ledger.append_request(
            user,
            graph.identity,
            image.reference(),
            Some(inference.classification),
        )?;
        let slot = JobSlot::new(request);
        let handle = ProofHandle::new(Arc::clone(&slot));

        let decision = match self.gate.should_prove(user) {
            Ok(decision) => decision,
            Err(err) => {
                // Without a ticket the record could never be finalized.
                self.ledger.discard_request(request);
                warn!(%request, user = %user, error = %err, "gate unavailable; request dropped");
                return Err(err.into());
            }
        };
        self.jobs.lock().insert(Arc::clone(&slot));
        slot.advance(RequestState::GateEvaluated);
        let ticket = decision.ticket;
        let finalizer = Finalizer {
            ledger: Arc::clone(&self.ledger),
            jobs: Arc::clone(&self.jobs),
            slot: Arc::clone(&slot),
            ticket,
            request,
            model: graph.identity,
        };

        if !decision.fire {
            slot.advance(RequestState::Skipped);
            finalizer.finish(ProofOutcome::NotAttempted, None);
            return Ok(Submission {
                inference,
                proof: handle,
            });
        }

        slot.advance(RequestState::ProofAttempted);
        let job = ProofJob {
            graph,
            public: PublicValues::new(inference.input.clone(), inference.output.clone()),
            cache: Arc::clone(&self.cache),
            compiler: self.compiler.clone(),
            backend: Arc::clone(&self.backend),
            cancel: self.pool.cancellation(),
            finalizer: finalizer.clone(),
        };
        match self.pool.try_spawn(move || job.run()) {
            Ok(()) => debug!(%request, user = %user, sequence = ticket.sequence, "proof job queued"),
            Err(ProverError::Cancelled) => finalizer.finish(ProofOutcome::Abandoned, None),
            Err(err) => finalizer.finish(ProofOutcome::Failed(FailureCause::Prover(err)), None),
        }
        Ok(Submission {
            inference,
            proof: handle,
        })
    }

    /// Blocking mode: waits up to `timeout` for the proof.
    pub fn classify(
        &self,
        user: UserId,
        selector: &str,
        image: &Image,
        timeout: Duration,
    ) -> Result<ClassifyResponse, PipelineError> {
        let submission = self.submit(user, selector, image)?;
        let proof = submission.proof.wait_timeout(timeout);
        Ok(ClassifyResponse {
            request_id: submission.request_id(),
            model: submission.inference.model,
            classification: submission.inference.classification,
            proof,
        })
    }

    /// Polling mode by request id.
    pub fn proof_status(&self, request: RequestId) -> Option<ProofStatus> {
        self.handle(request).map(|handle| handle.status())
    }

    /// Handle of an in-flight request or of one of the most recently
    /// finalized ones.
    pub fn handle(&self, request: RequestId) -> Option<ProofHandle> {
        self.jobs.lock().get(&request).map(ProofHandle::new)
    }

    /// Requests reachable through [`Orchestrator::handle`].
    pub fn tracked_requests(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Deletes the user's request records, or only those with a generated
    /// proof, together with their handles.
    pub fn delete_requests(
        &self,
        user: UserId,
        generated_only: bool,
    ) -> Result<Vec<RequestId>, PipelineError> {
        let removed = self.ledger.delete_requests(user, generated_only)?;
        self.jobs.lock().forget(&removed);
        Ok(removed)
    }

    /// Installs `layers` as the next revision of `variant` and drops the
    /// cached circuit of the revision it replaces.
    pub fn upgrade_model(
        &self,
        variant: ModelVariant,
        layers: Vec<Layer>,
    ) -> Result<ModelIdentity, PipelineError> {
        let current = self
            .registry
            .current(variant)
            .ok_or_else(|| UnsupportedModelError {
                selector: variant.to_string(),
            })?;
        let graph = ModelGraph::new(current.identity.next_revision(), current.input_shape, layers);
        graph.activation_widths()?;
        let identity = graph.identity;
        if let Some(previous) = self.registry.install(graph)? {
            self.cache.invalidate(&previous);
        }
        info!(model = %identity, "model upgraded");
        Ok(identity)
    }

    /// Stops accepting proof work, waits up to the configured proof timeout
    /// for in-flight jobs to wind down and flushes the ledger. Returns whether
    /// the pool drained.
    pub fn shutdown(&self) -> bool {
        self.pool.shutdown();
        let drained = self.pool.wait_idle(self.config.workers.proof_timeout());
        self.cache.clear();
        if let Err(err) = self.ledger.flush() {
            error!(error = %err, "ledger flush failed");
        }
        info!(drained, "pipeline shut down");
        drained
    }
}

/// Applies a final outcome to the ledger and the request's slot.
#[derive(Debug, Clone)]
struct Finalizer {
    ledger: Arc<OutcomeLedger>,
    jobs: Arc<Mutex<JobTable>>,
    slot: Arc<JobSlot>,
    ticket: Ticket,
    request: RequestId,
    model: ModelIdentity,
}

impl Finalizer {
    fn finish(&self, outcome: ProofOutcome, receipt: Option<ProofReceipt>) {
        match &outcome {
            ProofOutcome::Failed(cause) if cause.is_integrity_signal() => warn!(
                target: INTEGRITY_TARGET,
                request = %self.request,
                user = %self.ticket.user,
                model = %self.model,
                cause = cause.kind(),
                error = %cause,
                "proof integrity check failed"
            ),
            ProofOutcome::Failed(cause) => warn!(
                request = %self.request,
                user = %self.ticket.user,
                model = %self.model,
                cause = cause.kind(),
                error = %cause,
                "proof attempt failed"
            ),
            other => debug!(request = %self.request, outcome = %other, "proof finalized"),
        }
        if let Err(err) = self.ledger.complete(&self.ticket, self.request, &outcome) {
            error!(request = %self.request, user = %self.ticket.user, error = %err, "failed to record proof outcome");
        }
        self.slot.finish(outcome, receipt);
        self.jobs.lock().retire(self.request);
    }
}

struct ProofJob {
    graph: Arc<ModelGraph>,
    public: PublicValues,
    cache: Arc<CircuitCache>,
    compiler: CircuitCompiler,
    backend: Arc<dyn ProofBackend>,
    cancel: Arc<AtomicBool>,
    finalizer: Finalizer,
}

impl ProofJob {
    fn run(self) {
        let (outcome, receipt) = match panic::catch_unwind(AssertUnwindSafe(|| self.execute())) {
            Ok(result) => result,
            Err(_) => {
                error!(request = %self.finalizer.request, "proof job panicked; abandoning");
                (ProofOutcome::Abandoned, None)
            }
        };
        self.finalizer.finish(outcome, receipt);
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn execute(&self) -> (ProofOutcome, Option<ProofReceipt>) {
        let failed = |cause| (ProofOutcome::Failed(cause), None);
        let abandoned = (ProofOutcome::Abandoned, None);

        if self.cancelled() {
            return abandoned;
        }
        let identity = self.graph.identity;
        let artifact = match self
            .cache
            .get_or_compile(identity, || self.compiler.compile(&self.graph))
        {
            Ok(artifact) => artifact,
            Err(err) => return failed(FailureCause::Compilation(err)),
        };

        if self.cancelled() {
            return abandoned;
        }
        let witness = match self.backend.build_witness(
            &artifact.description,
            &self.public.inputs,
            &self.public.outputs,
        ) {
            Ok(witness) => witness,
            Err(err) => return failed(FailureCause::Witness(err)),
        };

        if self.cancelled() {
            return abandoned;
        }
        let proof = match self
            .backend
            .prove(&artifact.description, &witness, &artifact.proving_key)
        {
            Ok(proof) => proof,
            Err(err) => return failed(FailureCause::Prover(err)),
        };

        if self.cancelled() {
            return abandoned;
        }
        match self
            .backend
            .verify(&proof, &self.public, &artifact.verification_key)
        {
            Ok(VerificationVerdict::Accept) => match proof.to_bytes() {
                Ok(bytes) => (
                    ProofOutcome::Succeeded,
                    Some(ProofReceipt {
                        model: identity,
                        proof: bytes,
                        public: self.public.clone(),
                        key_digest: artifact.key_digest(),
                    }),
                ),
                Err(err) => failed(FailureCause::Prover(ProverError::Encoding(err))),
            },
            Ok(VerificationVerdict::Reject(reason)) => failed(FailureCause::VerificationMismatch(reason)),
            Err(err) => failed(FailureCause::VerifierFault(err)),
        }
    }
}
