//! Pending request table.
//!
//! Removing an entry from the table is what settles it: whoever removes the
//! entry owns its result sender, so a request is settled exactly once no
//! matter how responses, timeouts and teardown race.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;

use crate::error::Result;
use crate::identifiers::{RequestId, RequestIdCounter};
use crate::protocol::Message;

use super::options::ResolveIf;

// ============================================================================
// PendingRequest
// ============================================================================

/// One request awaiting its answer.
pub(crate) struct PendingRequest {
    /// Distinguishes entries that reuse an id across teardowns.
    ticket: u64,
    /// Command name, for logs.
    pub command: String,
    /// Custom settlement predicate.
    resolve_if: Option<ResolveIf>,
    /// Result channel.
    settle: oneshot::Sender<Result<Message>>,
    /// When the request was registered.
    pub created_at: Instant,
}

impl PendingRequest {
    /// Delivers the result to the waiting caller.
    pub fn settle(self, result: Result<Message>) {
        let _ = self.settle.send(result);
    }
}

// ============================================================================
// PendingTable
// ============================================================================

/// Id counter plus the map of pending requests.
#[derive(Default)]
pub(crate) struct PendingTable {
    counter: RequestIdCounter,
    next_ticket: u64,
    entries: FxHashMap<RequestId, PendingRequest>,
}

impl PendingTable {
    /// Registers a request under a fresh id.
    ///
    /// Ids still pending after a counter wraparound are skipped.
    pub fn register(
        &mut self,
        command: String,
        resolve_if: Option<ResolveIf>,
    ) -> (RequestId, u64, oneshot::Receiver<Result<Message>>) {
        let id = loop {
            let candidate = self.counter.next_id();
            if !self.entries.contains_key(&candidate) {
                break candidate;
            }
        };

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let (tx, rx) = oneshot::channel();

        self.entries.insert(
            id,
            PendingRequest {
                ticket,
                command,
                resolve_if,
                settle: tx,
                created_at: Instant::now(),
            },
        );

        (id, ticket, rx)
    }

    /// Returns the ticket and predicate of a pending id.
    pub fn matcher(&self, id: RequestId) -> Option<(u64, Option<ResolveIf>)> {
        self.entries
            .get(&id)
            .map(|entry| (entry.ticket, entry.resolve_if.clone()))
    }

    /// Removes an entry if it is still the one identified by `ticket`.
    pub fn take(&mut self, id: RequestId, ticket: u64) -> Option<PendingRequest> {
        match self.entries.get(&id) {
            Some(entry) if entry.ticket == ticket => self.entries.remove(&id),
            _ => None,
        }
    }

    /// Removes and returns every entry.
    pub fn drain(&mut self) -> Vec<PendingRequest> {
        self.entries.drain().map(|(_, entry)| entry).collect()
    }

    /// Restarts the id sequence.
    #[inline]
    pub fn reset_counter(&mut self) {
        self.counter.reset();
    }

    /// Returns `true` if `id` is pending.
    #[cfg(test)]
    pub fn contains(&self, id: RequestId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Returns the number of pending requests.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

// ============================================================================
// PendingGuard
// ============================================================================

/// Removes its entry when the awaiting call exits, however it exits.
pub(crate) struct PendingGuard {
    table: Arc<Mutex<PendingTable>>,
    id: RequestId,
    ticket: u64,
}

impl PendingGuard {
    /// Creates a guard for a registered entry.
    pub fn new(table: Arc<Mutex<PendingTable>>, id: RequestId, ticket: u64) -> Self {
        Self { table, id, ticket }
    }

    /// Removes the entry now, returning it if nobody settled it yet.
    pub fn take(&self) -> Option<PendingRequest> {
        self.table.lock().take(self.id, self.ticket)
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        // Release the lock before the entry's sender is dropped
        let entry = self.take();
        drop(entry);
    }
}

// ============================================================================
// Tests
// ============================================================================
