//! Worker registry: per-worker bookkeeping and the expiry-ordered waiting set.
//!
//! The registry is owned by the broker's event loop and never shared, so it
//! carries no locks. Every entry is keyed by the worker's routing identity.

use chrono::{DateTime, Utc};
use majordomo_types::message::Message;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// A client request queued for a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    /// Routing identity of the client that sent the request.
    pub client_id: String,
    /// Payload frames, untouched.
    pub payload: Message,
}

/// Bookkeeping for one registered worker.
#[derive(Debug)]
pub struct WorkerEntry {
    pub identity: String,
    /// The worker is purged once `now` reaches this instant.
    pub expiry: Instant,
    /// Wall-clock registration time, for diagnostics.
    pub registered_at: DateTime<Utc>,
    /// Requests not yet handed to the worker, oldest first.
    pub pending: VecDeque<PendingRequest>,
    /// Tie-breaker of this entry's waiting-set key.
    seq: u64,
}

impl WorkerEntry {
    fn waiting_key(&self) -> (Instant, u64, String) {
        (self.expiry, self.seq, self.identity.clone())
    }
}

/// All known workers, plus the waiting set ordered by ascending expiry.
#[derive(Debug)]
pub struct WorkerRegistry {
    workers: HashMap<String, WorkerEntry>,
    waiting: BTreeSet<(Instant, u64, String)>,
    next_seq: u64,
    expiry: Duration,
}

impl WorkerRegistry {
    /// Create an empty registry; entries live for `expiry` past their last sign of life.
    pub fn new(expiry: Duration) -> Self {
        Self {
            workers: HashMap::new(),
            waiting: BTreeSet::new(),
            next_seq: 0,
            expiry,
        }
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Register a new worker and put it at the tail of the waiting set.
    ///
    /// Returns `false` (and changes nothing) when the identity is already known.
    pub fn register(&mut self, identity: &str, now: Instant) -> bool {
        debug_assert!(!identity.is_empty(), "worker identity must not be empty");
        if self.workers.contains_key(identity) {
            return false;
        }
        let entry = WorkerEntry {
            identity: identity.to_string(),
            expiry: now + self.expiry,
            registered_at: Utc::now(),
            pending: VecDeque::new(),
            seq: self.next_seq(),
        };
        self.waiting.insert(entry.waiting_key());
        self.workers.insert(identity.to_string(), entry);
        true
    }

    /// Push a worker's expiry to `now + expiry` and move it to the tail of the
    /// waiting set. Returns `false` for unknown identities.
    pub fn refresh(&mut self, identity: &str, now: Instant) -> bool {
        let seq = self.next_seq();
        let Some(entry) = self.workers.get_mut(identity) else {
            return false;
        };
        self.waiting.remove(&entry.waiting_key());
        entry.expiry = now + self.expiry;
        entry.seq = seq;
        self.waiting.insert(entry.waiting_key());
        true
    }

    /// Remove a worker from the registry and the waiting set.
    pub fn remove(&mut self, identity: &str) -> Option<WorkerEntry> {
        let entry = self.workers.remove(identity)?;
        self.waiting.remove(&entry.waiting_key());
        Some(entry)
    }

    /// Remove every worker whose expiry has passed.
    ///
    /// Walks the waiting set from the lowest expiry and stops at the first
    /// entry that is still alive.
    pub fn purge(&mut self, now: Instant) -> Vec<WorkerEntry> {
        let mut purged = Vec::new();
        while let Some((expiry, _, identity)) = self.waiting.first().cloned() {
            if expiry > now {
                break;
            }
            if let Some(entry) = self.remove(&identity) {
                debug!(identity = %entry.identity, "Purging expired worker");
                purged.push(entry);
            } else {
                // A key without an entry cannot be refreshed; drop it.
                self.waiting.pop_first();
            }
        }
        purged
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.workers.contains_key(identity)
    }

    pub fn get(&self, identity: &str) -> Option<&WorkerEntry> {
        self.workers.get(identity)
    }

    pub fn get_mut(&mut self, identity: &str) -> Option<&mut WorkerEntry> {
        self.workers.get_mut(identity)
    }

    /// Identities in the waiting set, lowest expiry first.
    pub fn waiting(&self) -> impl Iterator<Item = &str> {
        self.waiting.iter().map(|(_, _, identity)| identity.as_str())
    }

    /// Expiries in waiting-set order.
    pub fn waiting_expiries(&self) -> impl Iterator<Item = Instant> + '_ {
        self.waiting.iter().map(|(expiry, _, _)| *expiry)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
