//! Pending-transaction table
//!
//! Tracks commands awaiting a peer response. Each outstanding command is
//! keyed by its transaction label and remembers the PDU id it carried: a
//! response only resolves the entry when both match, so a late response
//! arriving after the label was reused for a different PDU is dropped
//! instead of being delivered to the wrong caller.
//!
//! Callers receive a oneshot receiver when the command is registered and
//! get exactly one outcome through it: the decoded reply, `TimedOut` when
//! the deadline passes, or `Cancelled` when the session tears down.

use std::collections::HashMap;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{AvrcpError, Result};
use crate::protocol::types::PduId;

/// One command awaiting its response
#[derive(Debug)]
struct PendingTransaction<T> {
    pdu_id: PduId,
    deadline: Instant,
    responder: oneshot::Sender<Result<T>>,
}

/// Outstanding commands for one channel, keyed by transaction label
#[derive(Debug)]
pub struct TransactionTable<T> {
    pending: HashMap<u8, PendingTransaction<T>>,
}

impl<T> TransactionTable<T> {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Register an outstanding command and get the receiver its outcome
    /// will be delivered on
    pub fn insert(
        &mut self,
        label: u8,
        pdu_id: PduId,
        deadline: Instant,
    ) -> oneshot::Receiver<Result<T>> {
        let (tx, rx) = oneshot::channel();
        self.insert_with(label, pdu_id, deadline, tx);
        rx
    }

    /// Register an outstanding command delivering on an existing sender
    ///
    /// Used when a queued command finally gets a label and its caller
    /// already holds the receiver.
    pub fn insert_with(
        &mut self,
        label: u8,
        pdu_id: PduId,
        deadline: Instant,
        responder: oneshot::Sender<Result<T>>,
    ) {
        let prior = self.pending.insert(
            label,
            PendingTransaction {
                pdu_id,
                deadline,
                responder,
            },
        );
        if prior.is_some() {
            // the allocator hands out free labels only, so this is a bug
            warn!(label, "replaced an outstanding transaction");
        }
    }

    /// Deliver a response for the given label
    ///
    /// Resolves and removes the entry only when the response's PDU id
    /// matches the one the command carried; a mismatch means the response
    /// belongs to an already-expired use of the label and is dropped.
    /// Returns true when the entry was resolved, so the caller can
    /// release the label.
    pub fn resolve(&mut self, label: u8, pdu_id: PduId, reply: Result<T>) -> bool {
        match self.pending.get(&label) {
            Some(entry) if entry.pdu_id == pdu_id => {
                if let Some(entry) = self.pending.remove(&label) {
                    // the caller may have given up on the receiver
                    let _ = entry.responder.send(reply);
                }
                true
            }
            Some(entry) => {
                debug!(
                    label,
                    expected = ?entry.pdu_id,
                    got = ?pdu_id,
                    "response PDU id does not match outstanding command, dropping"
                );
                false
            }
            None => {
                debug!(label, got = ?pdu_id, "response for unknown label, dropping");
                false
            }
        }
    }

    /// Fail the entry on `label` regardless of its PDU id
    ///
    /// Used for GeneralReject responses, which name the offending
    /// transaction by label only.
    pub fn fail(&mut self, label: u8, err: AvrcpError) -> bool {
        match self.pending.remove(&label) {
            Some(entry) => {
                let _ = entry.responder.send(Err(err));
                true
            }
            None => false,
        }
    }

    /// Fail every entry whose deadline has passed
    ///
    /// Returns the labels that expired so the caller can release them.
    pub fn expire_overdue(&mut self, now: Instant) -> Vec<u8> {
        let expired: Vec<u8> = self
            .pending
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(label, _)| *label)
            .collect();
        for label in &expired {
            if let Some(entry) = self.pending.remove(label) {
                debug!(label, pdu_id = ?entry.pdu_id, "transaction timed out");
                let _ = entry.responder.send(Err(AvrcpError::TimedOut));
            }
        }
        expired
    }

    /// The earliest deadline among outstanding commands
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|entry| entry.deadline).min()
    }

    /// Fail every outstanding command with `Cancelled`
    ///
    /// Returns the labels that were outstanding.
    pub fn cancel_all(&mut self) -> Vec<u8> {
        let labels: Vec<u8> = self.pending.keys().copied().collect();
        for entry in self.pending.drain() {
            let _ = entry.1.responder.send(Err(AvrcpError::Cancelled));
        }
        labels
    }

    pub fn contains(&self, label: u8) -> bool {
        self.pending.contains_key(&label)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<T> Default for TransactionTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn test_resolve_delivers_to_matching_label_and_pdu() {
        let mut table: TransactionTable<u32> = TransactionTable::new();
        let mut rx = table.insert(3, PduId::GetPlayStatus, far());

        assert!(table.resolve(3, PduId::GetPlayStatus, Ok(42)));
        assert_eq!(rx.try_recv().unwrap().unwrap(), 42);
        assert!(table.is_empty());
    }

    #[test]
    fn test_mismatched_pdu_is_dropped_and_entry_survives() {
        let mut table: TransactionTable<u32> = TransactionTable::new();
        let mut rx = table.insert(3, PduId::GetFolderItems, far());

        assert!(!table.resolve(3, PduId::GetPlayStatus, Ok(1)));
        assert!(table.contains(3));
        assert!(rx.try_recv().is_err());

        assert!(table.resolve(3, PduId::GetFolderItems, Ok(2)));
        assert_eq!(rx.try_recv().unwrap().unwrap(), 2);
    }

    #[test]
    fn test_unknown_label_is_dropped() {
        let mut table: TransactionTable<u32> = TransactionTable::new();
        assert!(!table.resolve(7, PduId::GetPlayStatus, Ok(1)));
    }

    #[test]
    fn test_expiry_fails_overdue_entries_only() {
        let mut table: TransactionTable<u32> = TransactionTable::new();
        let now = Instant::now();
        let mut rx_old = table.insert(1, PduId::GetPlayStatus, now);
        let mut rx_new = table.insert(2, PduId::GetCapabilities, far());

        let mut expired = table.expire_overdue(now + Duration::from_millis(1));
        expired.sort_unstable();
        assert_eq!(expired, vec![1]);
        assert!(matches!(
            rx_old.try_recv().unwrap(),
            Err(AvrcpError::TimedOut)
        ));
        assert!(rx_new.try_recv().is_err());
        assert!(table.contains(2));
    }

    #[test]
    fn test_next_deadline_is_earliest() {
        let mut table: TransactionTable<u32> = TransactionTable::new();
        let now = Instant::now();
        let _rx1 = table.insert(1, PduId::GetPlayStatus, now + Duration::from_secs(5));
        let _rx2 = table.insert(2, PduId::GetCapabilities, now + Duration::from_secs(2));

        assert_eq!(table.next_deadline(), Some(now + Duration::from_secs(2)));
    }

    #[test]
    fn test_cancel_all_fails_everything() {
        let mut table: TransactionTable<u32> = TransactionTable::new();
        let mut rx1 = table.insert(1, PduId::GetPlayStatus, far());
        let mut rx2 = table.insert(2, PduId::Search, far());

        let mut labels = table.cancel_all();
        labels.sort_unstable();
        assert_eq!(labels, vec![1, 2]);
        assert!(matches!(rx1.try_recv().unwrap(), Err(AvrcpError::Cancelled)));
        assert!(matches!(rx2.try_recv().unwrap(), Err(AvrcpError::Cancelled)));
        assert!(table.is_empty());
    }
}
