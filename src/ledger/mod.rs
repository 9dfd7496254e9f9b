//! Outcome ledger.
//!
//! Each user owns an exclusive section holding the account and a reorder
//! buffer. Proof outcomes arrive tagged with the [`Ticket`] the sampling gate
//! issued and are applied strictly in ticket order, so concurrent completions
//! never lose or reorder counter updates. Every mutation is handed to the
//! configured [`AccountStore`] as a single [`LedgerChange`] while the lock
//! guarding the changed entry is held, so the store sees the changes of one
//! account or record in the order they were made.

pub mod account;
pub mod records;
pub mod store;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use account::{AccountStats, UserAccount, UserId};
pub use records::{RequestId, RequestRecord, VerificationStats};
pub use store::{AccountStore, JsonFileStore, LedgerChange, LedgerSnapshot, MemoryStore};

use crate::config::{PipelineConfig, DEFAULT_REQUEST_RETENTION};
use crate::gate::{GateDecision, InvalidConfigurationError, ProofThreshold, Ticket};
use crate::model::{Classification, ModelIdentity};
use crate::pipeline::ProofOutcome;
use crate::utils::unix_timestamp;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("unknown user {user}")]
    UnknownUser { user: UserId },
    #[error("account for user {user} already exists")]
    DuplicateUser { user: UserId },
    #[error("unknown request {request}")]
    UnknownRequest { request: RequestId },
    #[error(transparent)]
    InvalidThreshold(#[from] InvalidConfigurationError),
    #[error("ticket {sequence} of user {user} was already recorded or never issued")]
    UnexpectedTicket { user: UserId, sequence: u64 },
    #[error("ledger storage error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl LedgerError {
    pub(crate) fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        LedgerError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

#[derive(Debug)]
struct Section {
    account: UserAccount,
    /// Next ticket sequence to apply.
    next_sequence: u64,
    /// Outcomes that arrived ahead of an earlier ticket.
    pending: BTreeMap<u64, ProofOutcome>,
}

impl Section {
    fn new(account: UserAccount) -> Self {
        Self {
            next_sequence: account.sampling_counter() + 1,
            account,
            pending: BTreeMap::new(),
        }
    }

    /// Buffers `outcome` and applies every consecutive ready outcome.
    /// Returns whether any counter changed.
    fn accept(&mut self, sequence: u64, outcome: ProofOutcome) -> Result<bool, LedgerError> {
        if sequence < self.next_sequence
            || sequence > self.account.sampling_counter()
            || self.pending.contains_key(&sequence)
        {
            return Err(LedgerError::UnexpectedTicket {
                user: self.account.user(),
                sequence,
            });
        }
        self.pending.insert(sequence, outcome);

        let mut changed = false;
        while let Some(outcome) = self.pending.remove(&self.next_sequence) {
            if outcome.is_attempted() {
                self.account.apply_attempt(outcome.is_success());
                changed = true;
            }
            self.next_sequence += 1;
        }
        Ok(changed)
    }
}

#[derive(Debug, Default)]
struct Requests {
    records: BTreeMap<RequestId, RequestRecord>,
    by_user: HashMap<UserId, BTreeSet<RequestId>>,
    next_id: u64,
}

impl Requests {
    fn insert(&mut self, record: RequestRecord) {
        self.by_user.entry(record.user_id).or_default().insert(record.id);
        self.records.insert(record.id, record);
    }

    fn remove(&mut self, id: RequestId) -> Option<RequestRecord> {
        let record = self.records.remove(&id)?;
        if let Some(ids) = self.by_user.get_mut(&record.user_id) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_user.remove(&record.user_id);
            }
        }
        Some(record)
    }

    fn of_user(&self, user: UserId) -> impl Iterator<Item = &RequestRecord> + '_ {
        self.by_user
            .get(&user)
            .into_iter()
            .flatten()
            .filter_map(|id| self.records.get(id))
    }

    /// Oldest ids of `user` beyond the newest `retention`.
    fn overflow(&self, user: UserId, retention: usize) -> Vec<RequestId> {
        match self.by_user.get(&user) {
            Some(ids) if retention > 0 && ids.len() > retention => {
                ids.iter().take(ids.len() - retention).copied().collect()
            }
            _ => Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct OutcomeLedger {
    store: Box<dyn AccountStore>,
    default_threshold: ProofThreshold,
    request_retention: usize,
    sections: RwLock<HashMap<UserId, Arc<Mutex<Section>>>>,
    requests: Mutex<Requests>,
}

impl OutcomeLedger {
    /// Restores the ledger from `store`.
    pub fn open(
        store: Box<dyn AccountStore>,
        default_threshold: ProofThreshold,
    ) -> Result<Self, LedgerError> {
        let snapshot = store.load()?;
        let sections = snapshot
            .accounts
            .into_iter()
            .map(|mut account| {
                account.normalize();
                (account.user(), Arc::new(Mutex::new(Section::new(account))))
            })
            .collect::<HashMap<_, _>>();
        let mut requests = Requests::default();
        for record in snapshot.requests {
            requests.next_id = requests.next_id.max(record.id.0 + 1);
            requests.insert(record);
        }
        requests.next_id = requests.next_id.max(snapshot.next_request_id);
        info!(
            accounts = sections.len(),
            requests = requests.records.len(),
            "ledger restored"
        );
        Ok(Self {
            store,
            default_threshold,
            request_retention: DEFAULT_REQUEST_RETENTION,
            sections: RwLock::new(sections),
            requests: Mutex::new(requests),
        })
    }

    pub fn in_memory(default_threshold: ProofThreshold) -> Self {
        Self {
            store: Box::new(MemoryStore::new()),
            default_threshold,
            request_retention: DEFAULT_REQUEST_RETENTION,
            sections: RwLock::new(HashMap::new()),
            requests: Mutex::new(Requests::default()),
        }
    }

    /// Change-log ledger when `ledger.path` is set, in-memory otherwise.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, LedgerError> {
        let threshold = ProofThreshold::new(i64::from(config.default_threshold))?;
        let ledger = match &config.ledger.path {
            Some(path) => Self::open(Box::new(JsonFileStore::open(path)?), threshold)?,
            None => Self::in_memory(threshold),
        };
        Ok(ledger.with_request_retention(config.ledger.request_retention))
    }

    /// Request records kept per user; `0` keeps every record.
    pub fn with_request_retention(mut self, retention: usize) -> Self {
        self.request_retention = retention;
        self
    }

    pub fn default_threshold(&self) -> ProofThreshold {
        self.default_threshold
    }

    pub fn users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.sections.read().keys().copied().collect();
        users.sort_unstable();
        users
    }

    /// Creates an account with the default threshold.
    pub fn create_account(&self, user: UserId) -> Result<UserAccount, LedgerError> {
        let account = UserAccount::new(user, self.default_threshold);
        {
            let mut sections = self.sections.write();
            if sections.contains_key(&user) {
                return Err(LedgerError::DuplicateUser { user });
            }
            self.save_account(&account)?;
            sections.insert(user, Arc::new(Mutex::new(Section::new(account.clone()))));
        }
        info!(user = %user, threshold = %self.default_threshold, "account created");
        Ok(account)
    }

    /// Validates before touching any state; applies from the next request.
    pub fn set_threshold(&self, user: UserId, value: i64) -> Result<ProofThreshold, LedgerError> {
        let threshold = ProofThreshold::new(value)?;
        let section = self.section(user)?;
        let mut section = section.lock();
        let previous = section.account.proof_threshold();
        section.account.set_threshold(threshold);
        if let Err(err) = self.save_account(&section.account) {
            section.account.set_threshold(previous);
            return Err(err);
        }
        info!(user = %user, threshold = %threshold, "proof threshold updated");
        Ok(threshold)
    }

    pub fn account(&self, user: UserId) -> Result<UserAccount, LedgerError> {
        Ok(self.section(user)?.lock().account.clone())
    }

    /// Advances the sampling counter and lets `decide` pick whether the
    /// request is proved, within the user's exclusive section. The advance
    /// is durable before a ticket is issued; if it cannot be stored the
    /// counter is rewound and no ticket exists.
    pub fn advance_counter<F>(&self, user: UserId, decide: F) -> Result<GateDecision, LedgerError>
    where
        F: FnOnce(u64, ProofThreshold) -> bool,
    {
        let section = self.section(user)?;
        let mut section = section.lock();
        let sequence = section.account.advance();
        if let Err(err) = self.save_account(&section.account) {
            section.account.rewind();
            return Err(err);
        }
        Ok(GateDecision {
            ticket: Ticket { user, sequence },
            fire: decide(sequence, section.account.proof_threshold()),
        })
    }

    /// Hands the final outcome of `ticket` to the sequencer. Only ticket
    /// errors are returned; a change the store refuses stays in memory and is
    /// carried by the account's next stored change.
    pub fn record(&self, ticket: &Ticket, outcome: &ProofOutcome) -> Result<(), LedgerError> {
        let section = self.section(ticket.user)?;
        let mut section = section.lock();
        if section.accept(ticket.sequence, outcome.clone())? {
            self.save_or_warn(LedgerChange::Account {
                account: section.account.clone(),
            });
        }
        debug!(user = %ticket.user, sequence = ticket.sequence, outcome = %outcome, "outcome recorded");
        Ok(())
    }

    /// Records the outcome and folds it into the request record. A record
    /// evicted or deleted while its proof ran is skipped.
    pub fn complete(
        &self,
        ticket: &Ticket,
        request: RequestId,
        outcome: &ProofOutcome,
    ) -> Result<(), LedgerError> {
        self.record(ticket, outcome)?;
        if !self.update_request(request, outcome) {
            debug!(user = %ticket.user, %request, "request record gone before completion");
        }
        Ok(())
    }

    pub fn read_stats(&self, user: UserId) -> Result<AccountStats, LedgerError> {
        let account = self.account(user)?;
        let failed = self
            .requests
            .lock()
            .of_user(user)
            .filter(|record| record.failed_verification())
            .count() as u64;
        Ok(AccountStats::new(&account, failed))
    }

    /// Stores a new pending request record, evicting the user's oldest
    /// records beyond the retention limit.
    pub fn append_request(
        &self,
        user: UserId,
        model: ModelIdentity,
        image_reference: String,
        classification: Option<Classification>,
    ) -> Result<RequestId, LedgerError> {
        self.section(user)?;
        let mut requests = self.requests.lock();
        let id = RequestId(requests.next_id);
        let record = RequestRecord {
            id,
            user_id: user,
            model_type: model,
            image_reference,
            classification_result: classification,
            proof_generated: false,
            proof_verified: None,
            created_at: unix_timestamp(),
        };
        self.store.apply(&LedgerChange::Request {
            record: record.clone(),
        })?;
        requests.next_id += 1;
        requests.insert(record);

        let evicted = requests.overflow(user, self.request_retention);
        if !evicted.is_empty() {
            for id in &evicted {
                requests.remove(*id);
            }
            debug!(user = %user, evicted = evicted.len(), "request records evicted");
            self.save_or_warn(LedgerChange::Removed { ids: evicted });
        }
        Ok(id)
    }

    pub fn finalize_request(&self, request: RequestId, outcome: &ProofOutcome) -> Result<(), LedgerError> {
        if self.update_request(request, outcome) {
            Ok(())
        } else {
            Err(LedgerError::UnknownRequest { request })
        }
    }

    /// Drops a record whose request never received a ticket.
    pub(crate) fn discard_request(&self, request: RequestId) {
        let mut requests = self.requests.lock();
        if requests.remove(request).is_some() {
            self.save_or_warn(LedgerChange::Removed { ids: vec![request] });
        }
    }

    pub fn request(&self, request: RequestId) -> Option<RequestRecord> {
        self.requests.lock().records.get(&request).cloned()
    }

    pub fn requests(&self, user: UserId, verified_only: bool) -> Vec<RequestRecord> {
        self.filter_requests(user, |record| !verified_only || record.proof_verified == Some(true))
    }

    pub fn failed_verifications(&self, user: UserId) -> Vec<RequestRecord> {
        self.filter_requests(user, RequestRecord::failed_verification)
    }

    pub fn pending_proofs(&self, user: UserId) -> Vec<RequestRecord> {
        self.filter_requests(user, RequestRecord::pending_proof)
    }

    pub fn verification_stats(&self, user: UserId) -> VerificationStats {
        VerificationStats::collect(self.requests.lock().of_user(user))
    }

    /// Deletes the user's request records, or only those with a generated
    /// proof. Returns the removed ids; nothing is removed if the deletion
    /// cannot be stored.
    pub fn delete_requests(&self, user: UserId, generated_only: bool) -> Result<Vec<RequestId>, LedgerError> {
        let mut requests = self.requests.lock();
        let ids: Vec<RequestId> = requests
            .of_user(user)
            .filter(|record| !generated_only || record.proof_generated)
            .map(|record| record.id)
            .collect();
        if !ids.is_empty() {
            self.store.apply(&LedgerChange::Removed { ids: ids.clone() })?;
            for id in &ids {
                requests.remove(*id);
            }
        }
        info!(user = %user, removed = ids.len(), generated_only, "request records deleted");
        Ok(ids)
    }

    /// Stores every account again and compacts the store.
    pub fn flush(&self) -> Result<(), LedgerError> {
        let sections: Vec<Arc<Mutex<Section>>> = self.sections.read().values().cloned().collect();
        for section in sections {
            self.save_account(&section.lock().account)?;
        }
        self.store.compact()
    }

    fn section(&self, user: UserId) -> Result<Arc<Mutex<Section>>, LedgerError> {
        self.sections
            .read()
            .get(&user)
            .cloned()
            .ok_or(LedgerError::UnknownUser { user })
    }

    /// Applies `outcome` to the record; false when the record is gone.
    fn update_request(&self, request: RequestId, outcome: &ProofOutcome) -> bool {
        let mut requests = self.requests.lock();
        let Some(record) = requests.records.get_mut(&request) else {
            return false;
        };
        let before = record.clone();
        record.apply(outcome);
        if *record != before {
            let record = record.clone();
            self.save_or_warn(LedgerChange::Request { record });
        }
        true
    }

    fn filter_requests<F>(&self, user: UserId, keep: F) -> Vec<RequestRecord>
    where
        F: Fn(&RequestRecord) -> bool,
    {
        self.requests
            .lock()
            .of_user(user)
            .filter(|record| keep(record))
            .cloned()
            .collect()
    }

    fn save_account(&self, account: &UserAccount) -> Result<(), LedgerError> {
        self.store.apply(&LedgerChange::Account {
            account: account.clone(),
        })
    }

    fn save_or_warn(&self, change: LedgerChange) {
        if let Err(err) = self.store.apply(&change) {
            warn!(error = %err, "ledger change not stored");
        }
    }
}
