//! Ledger persistence backends.
//!
//! The ledger hands every mutation to its store as a [`LedgerChange`]. Each
//! change carries the full new state of one account or one request record,
//! so replaying changes in append order rebuilds the ledger and a later
//! change for the same key supersedes earlier ones.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::account::{UserAccount, UserId};
use super::records::{RequestId, RequestRecord};
use super::LedgerError;

/// Log lines tolerated before the first compaction.
pub const MIN_COMPACTION_LINES: usize = 1024;

/// Full persisted ledger state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub accounts: Vec<UserAccount>,
    pub requests: Vec<RequestRecord>,
    pub next_request_id: u64,
}

/// One ledger mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerChange {
    Account { account: UserAccount },
    Request { record: RequestRecord },
    Removed { ids: Vec<RequestId> },
    /// Keeps request ids monotonic across compactions that drop removed ids.
    Cursor { next_request_id: u64 },
}

/// Durable storage for ledger changes.
pub trait AccountStore: Send + Sync + std::fmt::Debug {
    /// State rebuilt from every applied change; empty if nothing was stored.
    fn load(&self) -> Result<LedgerSnapshot, LedgerError>;

    /// Durably records one change. On error the change is not part of the
    /// stored state.
    fn apply(&self, change: &LedgerChange) -> Result<(), LedgerError>;

    /// Rewrites the backing storage to the minimal set of changes.
    fn compact(&self) -> Result<(), LedgerError> {
        Ok(())
    }
}

impl<S: AccountStore + ?Sized> AccountStore for Arc<S> {
    fn load(&self) -> Result<LedgerSnapshot, LedgerError> {
        (**self).load()
    }

    fn apply(&self, change: &LedgerChange) -> Result<(), LedgerError> {
        (**self).apply(change)
    }

    fn compact(&self) -> Result<(), LedgerError> {
        (**self).compact()
    }
}

/// Latest value per key.
#[derive(Debug, Default)]
struct LedgerState {
    accounts: BTreeMap<UserId, UserAccount>,
    requests: BTreeMap<RequestId, RequestRecord>,
    next_request_id: u64,
}

impl LedgerState {
    fn apply(&mut self, change: &LedgerChange) {
        match change {
            LedgerChange::Account { account } => {
                self.accounts.insert(account.user(), account.clone());
            }
            LedgerChange::Request { record } => {
                self.next_request_id = self.next_request_id.max(record.id.0 + 1);
                self.requests.insert(record.id, record.clone());
            }
            LedgerChange::Removed { ids } => {
                for id in ids {
                    self.next_request_id = self.next_request_id.max(id.0 + 1);
                    self.requests.remove(id);
                }
            }
            LedgerChange::Cursor { next_request_id } => {
                self.next_request_id = self.next_request_id.max(*next_request_id);
            }
        }
    }

    /// Entries a compacted log holds.
    fn live(&self) -> usize {
        self.accounts.len() + self.requests.len() + 1
    }

    fn changes(&self) -> impl Iterator<Item = LedgerChange> + '_ {
        let cursor = LedgerChange::Cursor {
            next_request_id: self.next_request_id,
        };
        std::iter::once(cursor)
            .chain(
                self.accounts
                    .values()
                    .map(|account| LedgerChange::Account { account: account.clone() }),
            )
            .chain(
                self.requests
                    .values()
                    .map(|record| LedgerChange::Request { record: record.clone() }),
            )
    }

    fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            accounts: self.accounts.values().cloned().collect(),
            requests: self.requests.values().cloned().collect(),
            next_request_id: self.next_request_id,
        }
    }
}

/// Keeps the applied state in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<LedgerState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccountStore for MemoryStore {
    fn load(&self) -> Result<LedgerSnapshot, LedgerError> {
        Ok(self.state.lock().snapshot())
    }

    fn apply(&self, change: &LedgerChange) -> Result<(), LedgerError> {
        self.state.lock().apply(change);
        Ok(())
    }
}

#[derive(Debug)]
struct LogState {
    state: LedgerState,
    file: File,
    lines: usize,
}

/// Append-only JSON-lines change log.
///
/// Each change is one line. Once the log holds more than twice the live
/// entries it is rewritten through a sibling temp file and a rename, so a
/// crash leaves either the old or the compacted log. A torn final line left
/// by a crash mid-append is dropped on open.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    inner: Mutex<LogState>,
}

impl JsonFileStore {
    /// Opens the log at `path`, creating parent directories, and replays it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let directory = parent_dir(&path);
        fs::create_dir_all(directory).map_err(|source| LedgerError::io(directory, source))?;

        let (state, lines, torn) = replay(&path)?;
        let file = append_handle(&path)?;
        let store = Self {
            path,
            inner: Mutex::new(LogState { state, file, lines }),
        };
        if torn {
            warn!(path = %store.path.display(), "dropping torn ledger log tail");
            store.compact()?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines currently in the log.
    pub fn lines(&self) -> usize {
        self.inner.lock().lines
    }

    fn compact_locked(&self, log: &mut LogState) -> Result<(), LedgerError> {
        let directory = parent_dir(&self.path);
        let file = NamedTempFile::new_in(directory).map_err(|source| LedgerError::io(directory, source))?;
        let mut writer = BufWriter::new(file);
        let mut lines = 0;
        for change in log.state.changes() {
            let mut line = serde_json::to_vec(&change)?;
            line.push(b'\n');
            writer
                .write_all(&line)
                .map_err(|source| LedgerError::io(&self.path, source))?;
            lines += 1;
        }
        let file = writer
            .into_inner()
            .map_err(|err| LedgerError::io(&self.path, err.into_error()))?;
        file.as_file()
            .sync_all()
            .map_err(|source| LedgerError::io(file.path(), source))?;
        file.persist(&self.path)
            .map_err(|err| LedgerError::io(&self.path, err.error))?;

        log.file = append_handle(&self.path)?;
        debug!(path = %self.path.display(), from = log.lines, to = lines, "ledger log compacted");
        log.lines = lines;
        Ok(())
    }
}

impl AccountStore for JsonFileStore {
    fn load(&self) -> Result<LedgerSnapshot, LedgerError> {
        Ok(self.inner.lock().state.snapshot())
    }

    fn apply(&self, change: &LedgerChange) -> Result<(), LedgerError> {
        let mut line = serde_json::to_vec(change)?;
        line.push(b'\n');
        let mut log = self.inner.lock();
        if let Err(source) = log.file.write_all(&line) {
            // A partial line would corrupt every later append.
            if let Err(err) = self.compact_locked(&mut log) {
                warn!(path = %self.path.display(), error = %err, "ledger log rewrite failed");
            }
            return Err(LedgerError::io(&self.path, source));
        }
        log.state.apply(change);
        log.lines += 1;

        if log.lines > (2 * log.state.live()).max(MIN_COMPACTION_LINES) {
            // The change is already durable; a failed rewrite only delays
            // compaction.
            if let Err(err) = self.compact_locked(&mut log) {
                warn!(path = %self.path.display(), error = %err, "ledger log compaction failed");
            }
        }
        Ok(())
    }

    fn compact(&self) -> Result<(), LedgerError> {
        let mut log = self.inner.lock();
        self.compact_locked(&mut log)
    }
}

fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

fn append_handle(path: &Path) -> Result<File, LedgerError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LedgerError::io(path, source))
}

/// Rebuilds the state from the log at `path`. Returns the state, the number
/// of intact lines and whether an unterminated last line was dropped.
fn replay(path: &Path) -> Result<(LedgerState, usize, bool), LedgerError> {
    let mut state = LedgerState::default();
    if !path.exists() {
        return Ok((state, 0, false));
    }
    let raw = fs::read_to_string(path).map_err(|source| LedgerError::io(path, source))?;
    let (complete, tail) = match raw.rfind('\n') {
        Some(end) => raw.split_at(end + 1),
        None => ("", raw.as_str()),
    };

    let mut lines = 0;
    for line in complete.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let change: LedgerChange = serde_json::from_str(line)?;
        state.apply(&change);
        lines += 1;
    }

    let torn = !tail.trim().is_empty();
    if torn {
        if let Ok(change) = serde_json::from_str::<LedgerChange>(tail) {
            state.apply(&change);
            lines += 1;
        }
    }
    Ok((state, lines, torn))
}
