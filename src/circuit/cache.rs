//! Lazy, single-flight artifact cache keyed by model identity.
//!
//! Each identity owns a `OnceCell`; concurrent first callers block on the same
//! cell, so exactly one compilation runs and every caller observes the same
//! artifact. A failed compilation is stored as well and returned to later
//! callers until the identity is invalidated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{info, warn};

use super::compiler::CompilationError;
use super::types::CircuitArtifact;
use crate::model::ModelIdentity;

type CompileResult = Result<Arc<CircuitArtifact>, CompilationError>;
type Slot = Arc<OnceCell<CompileResult>>;

#[derive(Debug, Default)]
pub struct CircuitCache {
    slots: Mutex<HashMap<ModelIdentity, Slot>>,
    compilations: AtomicU64,
}

impl CircuitCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached result for `identity`, running `compile` at most
    /// once across all concurrent callers.
    pub fn get_or_compile<F>(&self, identity: ModelIdentity, compile: F) -> CompileResult
    where
        F: FnOnce() -> Result<CircuitArtifact, CompilationError>,
    {
        let slot = Arc::clone(self.slots.lock().entry(identity).or_default());
        slot.get_or_init(|| {
            self.compilations.fetch_add(1, Ordering::SeqCst);
            let started = Instant::now();
            let result = compile().map(Arc::new);
            match &result {
                Ok(_) => info!(
                    model = %identity,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "circuit cached"
                ),
                Err(err) => warn!(model = %identity, error = %err, "circuit compilation failed; failure is sticky until invalidated"),
            }
            result
        })
        .clone()
    }

    /// Successfully compiled artifact, if present.
    pub fn get(&self, identity: &ModelIdentity) -> Option<Arc<CircuitArtifact>> {
        let slot = self.slots.lock().get(identity).cloned()?;
        slot.get().and_then(|result| result.as_ref().ok().cloned())
    }

    /// Drops the slot for `identity`; the next request recompiles.
    pub fn invalidate(&self, identity: &ModelIdentity) -> bool {
        let removed = self.slots.lock().remove(identity).is_some();
        if removed {
            info!(model = %identity, "circuit cache entry invalidated");
        }
        removed
    }

    /// Evicts every entry.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of compilations actually executed.
    pub fn compilations(&self) -> u64 {
        self.compilations.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitCompiler;
    use crate::config::PipelineConfig;
    use crate::model::{builtin_graph, GraphError, ModelVariant};

    #[test]
    fn failures_are_sticky_until_invalidated() {
        let cache = CircuitCache::new();
        let identity = ModelIdentity::new(ModelVariant::ResNet18, 1);
        let failing = || Err(CompilationError::Graph(GraphError::Empty));

        assert!(cache.get_or_compile(identity, failing).is_err());
        let second = cache.get_or_compile(identity, || panic!("must not recompile"));
        assert_eq!(second.unwrap_err(), CompilationError::Graph(GraphError::Empty));
        assert_eq!(cache.compilations(), 1);
        assert!(cache.get(&identity).is_none());

        assert!(cache.invalidate(&identity));
        let config = PipelineConfig::default();
        let graph = builtin_graph(ModelVariant::ResNet18, 1, &config.quantization);
        let compiler = CircuitCompiler::new(&config);
        assert!(cache.get_or_compile(identity, || compiler.compile(&graph)).is_ok());
        assert_eq!(cache.compilations(), 2);
        assert!(cache.get(&identity).is_some());
    }
}
