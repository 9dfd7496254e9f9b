//! Bounded proving pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use tracing::{error, info};

use crate::config::WorkerConfig;
use crate::proof::ProverError;

#[derive(Debug, Default)]
struct Occupancy {
    jobs: Mutex<usize>,
    idle: Condvar,
}

/// Rayon pool dedicated to proof jobs, with an admission limit over queued
/// plus running jobs and a shutdown flag jobs poll between stages.
#[derive(Debug)]
pub struct ProofWorkerPool {
    pool: ThreadPool,
    queue_limit: usize,
    occupancy: Arc<Occupancy>,
    shutdown: Arc<AtomicBool>,
}

struct Admission(Arc<Occupancy>);

impl Drop for Admission {
    fn drop(&mut self) {
        let mut jobs = self.0.jobs.lock();
        *jobs -= 1;
        if *jobs == 0 {
            self.0.idle.notify_all();
        }
    }
}

impl ProofWorkerPool {
    pub fn new(config: &WorkerConfig) -> Result<Self, ThreadPoolBuildError> {
        let threads = config.thread_count();
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("zkinfer-prover-{index}"))
            .panic_handler(|_| error!("proof job panicked"))
            .build()?;
        info!(threads, queue_limit = config.queue_limit, "proving pool started");
        Ok(Self {
            pool,
            queue_limit: config.queue_limit,
            occupancy: Arc::new(Occupancy::default()),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Queues `job`, or fails with [`ProverError::Busy`] when the limit is
    /// reached and [`ProverError::Cancelled`] after shutdown.
    pub fn try_spawn<F>(&self, job: F) -> Result<(), ProverError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_shut_down() {
            return Err(ProverError::Cancelled);
        }
        {
            let mut jobs = self.occupancy.jobs.lock();
            if *jobs >= self.queue_limit {
                return Err(ProverError::Busy {
                    limit: self.queue_limit,
                });
            }
            *jobs += 1;
        }
        let admission = Admission(Arc::clone(&self.occupancy));
        self.pool.spawn(move || {
            let _admission = admission;
            job();
        });
        Ok(())
    }

    /// Flag polled by jobs between stages.
    pub fn cancellation(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Queued plus running jobs.
    pub fn occupancy(&self) -> usize {
        *self.occupancy.jobs.lock()
    }

    /// Stops admitting jobs and raises the cancellation flag.
    pub fn shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            info!(in_flight = self.occupancy(), "proving pool shutting down");
        }
    }

    /// Blocks until no job is queued or running, or `timeout` elapses.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let mut jobs = self.occupancy.jobs.lock();
        if *jobs == 0 {
            return true;
        }
        let result = self
            .occupancy
            .idle
            .wait_while_for(&mut jobs, |jobs| *jobs > 0, timeout);
        !result.timed_out() || *jobs == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn config(threads: usize, queue_limit: usize) -> WorkerConfig {
        WorkerConfig {
            threads,
            queue_limit,
            ..WorkerConfig::default()
        }
    }

    #[test]
    fn full_queue_reports_busy() {
        let pool = ProofWorkerPool::new(&config(1, 1)).unwrap();
        let (release, gate) = mpsc::channel::<()>();
        pool.try_spawn(move || {
            let _ = gate.recv();
        })
        .unwrap();
        assert_eq!(pool.try_spawn(|| {}), Err(ProverError::Busy { limit: 1 }));
        release.send(()).unwrap();
        assert!(pool.wait_idle(Duration::from_secs(5)));
        pool.try_spawn(|| {}).unwrap();
        assert!(pool.wait_idle(Duration::from_secs(5)));
    }

    #[test]
    fn shutdown_refuses_new_jobs() {
        let pool = ProofWorkerPool::new(&config(1, 4)).unwrap();
        let flag = pool.cancellation();
        pool.shutdown();
        assert!(flag.load(Ordering::Acquire));
        assert_eq!(pool.try_spawn(|| {}), Err(ProverError::Cancelled));
        assert!(pool.wait_idle(Duration::from_millis(10)));
    }
}
