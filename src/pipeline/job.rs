//! Per-request completion slots and the handles callers poll or wait on.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use super::outcome::{ProofOutcome, ProofReceipt, ProofStatus, RequestState};
use crate::ledger::RequestId;

#[derive(Debug)]
struct SlotState {
    state: RequestState,
    outcome: Option<ProofOutcome>,
    receipt: Option<ProofReceipt>,
}

/// Shared between the orchestrator, the proof job and every handle.
#[derive(Debug)]
pub(crate) struct JobSlot {
    request: RequestId,
    inner: Mutex<SlotState>,
    finished: Condvar,
}

impl JobSlot {
    pub(crate) fn new(request: RequestId) -> Arc<Self> {
        Arc::new(Self {
            request,
            inner: Mutex::new(SlotState {
                state: RequestState::Inferred,
                outcome: None,
                receipt: None,
            }),
            finished: Condvar::new(),
        })
    }

    /// Moves the request along its lifecycle; illegal transitions are ignored.
    pub(crate) fn advance(&self, next: RequestState) -> bool {
        let mut inner = self.inner.lock();
        if !inner.state.can_advance_to(next) {
            return false;
        }
        trace!(request = %self.request, from = ?inner.state, to = ?next, "request state");
        inner.state = next;
        true
    }

    /// Publishes the final outcome and wakes every waiter. Only the first
    /// call has an effect.
    pub(crate) fn finish(&self, outcome: ProofOutcome, receipt: Option<ProofReceipt>) {
        let mut inner = self.inner.lock();
        if inner.outcome.is_some() {
            return;
        }
        inner.state = RequestState::Finalized;
        inner.outcome = Some(outcome);
        inner.receipt = receipt;
        self.finished.notify_all();
    }

    fn status_locked(inner: &SlotState) -> ProofStatus {
        inner
            .outcome
            .as_ref()
            .map_or(ProofStatus::Pending, ProofStatus::from)
    }
}

/// Caller-side view of a submitted request's proof.
#[derive(Debug, Clone)]
pub struct ProofHandle {
    slot: Arc<JobSlot>,
}

impl ProofHandle {
    pub(crate) fn new(slot: Arc<JobSlot>) -> Self {
        Self { slot }
    }

    pub fn request_id(&self) -> RequestId {
        self.slot.request
    }

    pub fn state(&self) -> RequestState {
        self.slot.inner.lock().state
    }

    /// Non-blocking poll.
    pub fn status(&self) -> ProofStatus {
        JobSlot::status_locked(&self.slot.inner.lock())
    }

    /// Blocks until the request is finalized or `timeout` elapses; returns
    /// [`ProofStatus::Pending`] on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> ProofStatus {
        let deadline = Instant::now() + timeout;
        let mut inner = self.slot.inner.lock();
        while inner.outcome.is_none() {
            if self.slot.finished.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }
        JobSlot::status_locked(&inner)
    }

    /// Blocks until the request is finalized.
    pub fn wait(&self) -> ProofStatus {
        let mut inner = self.slot.inner.lock();
        while inner.outcome.is_none() {
            self.slot.finished.wait(&mut inner);
        }
        JobSlot::status_locked(&inner)
    }

    /// Proof bytes, public values and key digest of a verified proof.
    pub fn receipt(&self) -> Option<ProofReceipt> {
        self.slot.inner.lock().receipt.clone()
    }
}

/// Slots reachable by request id. In-flight requests always stay; finalized
/// ones are kept up to `retention`, oldest dropped first.
#[derive(Debug)]
pub(crate) struct JobTable {
    slots: HashMap<RequestId, Arc<JobSlot>>,
    finished: VecDeque<RequestId>,
    retention: usize,
}

impl JobTable {
    pub(crate) fn new(retention: usize) -> Self {
        Self {
            slots: HashMap::new(),
            finished: VecDeque::new(),
            retention,
        }
    }

    pub(crate) fn insert(&mut self, slot: Arc<JobSlot>) {
        self.slots.insert(slot.request, slot);
    }

    pub(crate) fn get(&self, request: &RequestId) -> Option<Arc<JobSlot>> {
        self.slots.get(request).cloned()
    }

    /// Marks `request` finalized and drops the oldest finalized slots beyond
    /// the retention.
    pub(crate) fn retire(&mut self, request: RequestId) {
        if !self.slots.contains_key(&request) {
            return;
        }
        self.finished.push_back(request);
        while self.finished.len() > self.retention {
            if let Some(oldest) = self.finished.pop_front() {
                self.slots.remove(&oldest);
            }
        }
    }

    pub(crate) fn forget(&mut self, requests: &[RequestId]) {
        for request in requests {
            self.slots.remove(request);
        }
        let slots = &self.slots;
        self.finished.retain(|request| slots.contains_key(request));
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn waiters_see_the_first_outcome() {
        let slot = JobSlot::new(RequestId(1));
        let handle = ProofHandle::new(Arc::clone(&slot));
        assert_eq!(handle.wait_timeout(Duration::from_millis(5)), ProofStatus::Pending);

        let waiter = {
            let handle = handle.clone();
            thread::spawn(move || handle.wait())
        };
        assert!(slot.advance(RequestState::GateEvaluated));
        assert!(slot.advance(RequestState::ProofAttempted));
        slot.finish(ProofOutcome::Succeeded, None);
        slot.finish(ProofOutcome::Abandoned, None);

        assert_eq!(waiter.join().unwrap(), ProofStatus::Verified);
        assert_eq!(handle.status(), ProofStatus::Verified);
        assert_eq!(handle.state(), RequestState::Finalized);
    }

    #[test]
    fn illegal_transition_is_refused() {
        let slot = JobSlot::new(RequestId(2));
        assert!(!slot.advance(RequestState::ProofAttempted));
        assert_eq!(slot.inner.lock().state, RequestState::Inferred);
    }

    #[test]
    fn table_keeps_in_flight_and_recent_slots() {
        let mut table = JobTable::new(2);
        for id in 0..4 {
            table.insert(JobSlot::new(RequestId(id)));
        }
        for id in 1..4 {
            table.retire(RequestId(id));
        }
        assert!(table.get(&RequestId(0)).is_some());
        assert!(table.get(&RequestId(1)).is_none());
        assert_eq!(table.len(), 3);

        table.forget(&[RequestId(0), RequestId(2)]);
        assert_eq!(table.len(), 1);
        assert!(table.get(&RequestId(3)).is_some());
        table.retire(RequestId(2));
        assert_eq!(table.len(), 1);
    }
}
