#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use zkinfer::circuit::{CircuitDescription, ProvingKey};
use zkinfer::config::PipelineConfig;
use zkinfer::hash::Blake2sXof;
use zkinfer::ledger::{
    AccountStore, LedgerChange, LedgerError, LedgerSnapshot, MemoryStore, OutcomeLedger, UserId,
};
use zkinfer::model::{Image, Layer, LayerOp, BUILTIN_CLASSES, BUILTIN_INPUT_SHAPE};
use zkinfer::pipeline::{NativeBackend, Orchestrator, ProofBackend};
use zkinfer::proof::{Proof, ProverError};
use zkinfer::witness::Witness;

/// Small worker pool and a generous queue; in-memory ledger.
pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.workers.threads = 4;
    config.workers.queue_limit = 1024;
    config.workers.proof_timeout_ms = 120_000;
    config
}

/// Orchestrator with `user` registered at `threshold`.
pub fn orchestrator_with_user(user: UserId, threshold: i64) -> Orchestrator {
    let orchestrator = Orchestrator::new(test_config()).expect("orchestrator");
    register(orchestrator.ledger(), user, threshold);
    orchestrator
}

pub fn register(ledger: &OutcomeLedger, user: UserId, threshold: i64) {
    ledger.create_account(user).expect("create account");
    ledger.set_threshold(user, threshold).expect("set threshold");
}

/// Deterministic image of the built-in input size.
pub fn image(seed: u64) -> Image {
    let mut xof = Blake2sXof::new(&seed.to_le_bytes());
    let mut pixels = vec![0u8; BUILTIN_INPUT_SHAPE.len()];
    xof.squeeze(&mut pixels);
    Image::from_rgb8(BUILTIN_INPUT_SHAPE.width, BUILTIN_INPUT_SHAPE.height, pixels)
        .expect("valid image")
}

/// Valid graph whose pooling head cannot be lowered to constraints.
pub fn pooled_layers() -> Vec<Layer> {
    let inputs = BUILTIN_INPUT_SHAPE.len();
    let outputs = BUILTIN_CLASSES * 2;
    let weights = (0..inputs * outputs)
        .map(|i| ((i * 31) % 17) as i64 - 8)
        .collect();
    vec![
        Layer::new(
            "stem",
            LayerOp::Dense {
                inputs,
                outputs,
                weights,
                bias: vec![0; outputs],
            },
        ),
        Layer::new("pool", LayerOp::MaxPool { window: 2 }),
    ]
}

/// Backend whose prover always runs out of resources.
#[derive(Debug, Default)]
pub struct ExhaustedBackend;

impl ProofBackend for ExhaustedBackend {
    fn prove(
        &self,
        circuit: &CircuitDescription,
        _witness: &Witness,
        _key: &ProvingKey,
    ) -> Result<Proof, ProverError> {
        Err(ProverError::ResourceExhausted {
            wires: circuit.layout.total as usize,
            limit: 0,
        })
    }
}

pub fn exhausted_backend() -> Arc<dyn ProofBackend> {
    Arc::new(ExhaustedBackend)
}

/// Store that refuses the next `refuse_accounts` account writes.
#[derive(Debug, Default)]
pub struct RefusingStore {
    inner: MemoryStore,
    pub refuse_accounts: AtomicUsize,
}

impl AccountStore for RefusingStore {
    fn load(&self) -> Result<LedgerSnapshot, LedgerError> {
        self.inner.load()
    }

    fn apply(&self, change: &LedgerChange) -> Result<(), LedgerError> {
        let refused = matches!(change, LedgerChange::Account { .. })
            && self
                .refuse_accounts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if refused {
            return Err(LedgerError::Io {
                path: "ledger.log".into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        self.inner.apply(change)
    }
}

/// Native backend that parks every proof until the test releases it.
/// `entered` trips once the proof has started, `release` lets it finish.
#[derive(Debug)]
pub struct GatedBackend {
    pub entered: Barrier,
    pub release: Barrier,
    inner: NativeBackend,
}

impl GatedBackend {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            entered: Barrier::new(2),
            release: Barrier::new(2),
            inner: NativeBackend::new(config.limits),
        }
    }
}

impl ProofBackend for GatedBackend {
    fn prove(
        &self,
        circuit: &CircuitDescription,
        witness: &Witness,
        key: &ProvingKey,
    ) -> Result<Proof, ProverError> {
        self.entered.wait();
        self.release.wait();
        self.inner.prove(circuit, witness, key)
    }
}
