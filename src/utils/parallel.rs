//! Process-wide switch for data-parallel helpers.
//!
//! Merkle leaf hashing and witness self-checks fan out over rayon when the
//! `parallel` feature is enabled and the switch is on. Tests flip the switch
//! through [`set_parallelism`] to compare sequential and parallel results.

#[cfg(feature = "parallel")]
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(feature = "parallel")]
static PARALLEL_ENABLED: AtomicBool = AtomicBool::new(true);

const MIN_ITEMS_PER_TASK: usize = 64;

/// Minimum number of items a rayon task should process.
pub fn preferred_chunk_size(total_items: usize) -> usize {
    MIN_ITEMS_PER_TASK.min(total_items.max(1))
}

#[cfg(feature = "parallel")]
pub fn parallelism_enabled() -> bool {
    PARALLEL_ENABLED.load(Ordering::SeqCst)
}

#[cfg(not(feature = "parallel"))]
pub fn parallelism_enabled() -> bool {
    false
}

/// Overrides the switch until the returned guard is dropped.
#[must_use = "parallelism is restored when the guard is dropped"]
pub fn set_parallelism(enabled: bool) -> ParallelismGuard {
    #[cfg(feature = "parallel")]
    {
        let previous = PARALLEL_ENABLED.swap(enabled, Ordering::SeqCst);
        ParallelismGuard { previous }
    }
    #[cfg(not(feature = "parallel"))]
    {
        let _ = enabled;
        ParallelismGuard {}
    }
}

pub struct ParallelismGuard {
    #[cfg(feature = "parallel")]
    previous: bool,
}

impl Drop for ParallelismGuard {
    fn drop(&mut self) {
        #[cfg(feature = "parallel")]
        PARALLEL_ENABLED.store(self.previous, Ordering::SeqCst);
    }
}
