//! Verifiable-inference pipeline.
//!
//! ```text
//! pipeline
//! ├── orchestrator : request state machine, submit/classify/poll, upgrades
//! ├── backend      : witness/prove/verify stages behind [`ProofBackend`]
//! ├── pool         : bounded rayon pool with admission limit and shutdown
//! ├── job          : per-request slots and [`ProofHandle`]
//! └── outcome      : [`ProofOutcome`], [`FailureCause`], [`ProofStatus`]
//! ```

pub mod backend;
pub mod job;
pub mod orchestrator;
pub mod outcome;
pub mod pool;

pub use backend::{NativeBackend, ProofBackend};
pub use job::ProofHandle;
pub use orchestrator::{
    ClassifyResponse, Orchestrator, OrchestratorBuilder, PipelineError, Submission,
    INTEGRITY_TARGET,
};
pub use outcome::{FailureCause, ProofOutcome, ProofReceipt, ProofStatus, RequestState};
pub use pool::ProofWorkerPool;
