//! Browsing cursor
//!
//! Stateful folder-navigation position for the browsing channel: current
//! scope, folder UID path (root = empty) and the UID counter the peer
//! last reported.
//!
//! ChangePath is two-phase: the cursor records the intended move when the
//! command goes out and only commits it when the peer confirms success.
//! A rejected move rolls back, so the cursor never diverges from the
//! peer's actual folder position.
//!
//! The UID counter is the peer's content-generation token. Any response
//! or event carrying a different counter than the one stored invalidates
//! the cursor: it resets to the root and the caller re-browses.

use crate::error::{AvrcpError, RejectReason, Result};
use crate::protocol::types::{Direction, Scope, Uid};
use tracing::{debug, warn};

/// An uncommitted ChangePath move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingMove {
    Up,
    Down(Uid),
}

/// Folder-navigation cursor for one session
#[derive(Debug)]
pub struct BrowsingCursor {
    scope: Scope,
    path: Vec<Uid>,
    uid_counter: Option<u16>,
    pending: Option<PendingMove>,
}

impl BrowsingCursor {
    /// Create a cursor at the root of the virtual filesystem
    pub fn new() -> Self {
        Self {
            scope: Scope::VirtualFileSystem,
            path: Vec::new(),
            uid_counter: None,
            pending: None,
        }
    }

    /// The scope browsing commands are issued in
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Switch scope; the folder path only applies to the virtual filesystem
    pub fn set_scope(&mut self, scope: Scope) {
        self.scope = scope;
    }

    /// The committed folder path, root first
    pub fn path(&self) -> &[Uid] {
        &self.path
    }

    /// Folder depth below the root
    pub fn depth(&self) -> usize {
        self.path.len()
    }

    /// Whether the cursor sits at the root folder
    pub fn is_at_root(&self) -> bool {
        self.path.is_empty()
    }

    /// The stored UID counter, zero before the peer reported one
    ///
    /// Zero is what browsing commands carry when no counter is known yet;
    /// database-unaware peers use zero throughout.
    pub fn uid_counter(&self) -> u16 {
        self.uid_counter.unwrap_or(0)
    }

    /// Record an intended move before the ChangePath command goes out
    ///
    /// # Errors
    ///
    /// - `InvalidDirection` for Up at the root
    /// - `Rejected(Policy)` when a move is already awaiting confirmation
    /// - `Decode` for Down without a folder UID
    pub fn begin_move(&mut self, direction: Direction, folder_uid: Option<Uid>) -> Result<()> {
        if self.pending.is_some() {
            return Err(AvrcpError::Rejected(RejectReason::Policy(
                "a path change is already awaiting confirmation".to_string(),
            )));
        }
        let pending = match direction {
            Direction::Up => {
                if self.path.is_empty() {
                    return Err(AvrcpError::InvalidDirection);
                }
                PendingMove::Up
            }
            Direction::Down => PendingMove::Down(
                folder_uid.ok_or_else(|| AvrcpError::decode("ChangePath(Down) needs a folder UID"))?,
            ),
        };
        self.pending = Some(pending);
        Ok(())
    }

    /// Commit the pending move after the peer confirmed success
    ///
    /// Returns false (and logs) when no move was pending.
    pub fn commit_move(&mut self) -> bool {
        match self.pending.take() {
            Some(PendingMove::Up) => {
                self.path.pop();
                debug!(depth = self.path.len(), "path change committed (up)");
                true
            }
            Some(PendingMove::Down(uid)) => {
                self.path.push(uid);
                debug!(depth = self.path.len(), %uid, "path change committed (down)");
                true
            }
            None => {
                warn!("path-change confirmation with no move pending");
                false
            }
        }
    }

    /// Discard the pending move after the peer rejected it
    pub fn rollback_move(&mut self) {
        if self.pending.take().is_some() {
            debug!("path change rolled back");
        }
    }

    /// Check a UID counter carried in a response or event
    ///
    /// The first observed counter is stored. A later mismatch means the
    /// peer's content tree changed: the cursor resets to the root and the
    /// caller gets `UidCounterStale` so it can re-browse.
    pub fn observe_uid_counter(&mut self, counter: u16) -> Result<()> {
        match self.uid_counter {
            None => {
                self.uid_counter = Some(counter);
                Ok(())
            }
            Some(stored) if stored == counter => Ok(()),
            Some(stored) => {
                warn!(stored, reported = counter, "UID counter changed; cursor invalidated");
                self.invalidate();
                self.uid_counter = Some(counter);
                Err(AvrcpError::UidCounterStale {
                    expected: stored,
                    actual: counter,
                })
            }
        }
    }

    /// Reset to the root and forget the UID counter
    pub fn invalidate(&mut self) {
        self.path.clear();
        self.pending = None;
        self.uid_counter = None;
    }

    /// Validate a GetFolderItems index range locally
    ///
    /// Indices are inclusive and 0-based. `total` is the item count the
    /// peer last reported, when known; requests starting beyond it fail
    /// without contacting the peer.
    pub fn validate_range(start: u32, end: u32, total: Option<u32>) -> Result<()> {
        if start > end {
            return Err(AvrcpError::range(format!(
                "start {} exceeds end {}",
                start, end
            )));
        }
        if let Some(total) = total {
            if start >= total {
                return Err(AvrcpError::range(format!(
                    "start {} beyond reported item count {}",
                    start, total
                )));
            }
        }
        Ok(())
    }
}

impl Default for BrowsingCursor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(n: u8) -> Uid {
        Uid::new([0, 0, 0, 0, 0, 0, 0, n])
    }

    #[test]
    fn test_down_commits_only_on_confirmation() {
        let mut cursor = BrowsingCursor::new();
        cursor.begin_move(Direction::Down, Some(uid(1))).unwrap();
        // not yet committed
        assert!(cursor.is_at_root());

        assert!(cursor.commit_move());
        assert_eq!(cursor.path(), &[uid(1)]);
    }

    #[test]
    fn test_rejected_down_rolls_back() {
        let mut cursor = BrowsingCursor::new();
        cursor.begin_move(Direction::Down, Some(uid(1))).unwrap();
        cursor.rollback_move();
        assert!(cursor.is_at_root());
        // a new move can start afterwards
        cursor.begin_move(Direction::Down, Some(uid(2))).unwrap();
    }

    #[test]
    fn test_up_at_root_fails() {
        let mut cursor = BrowsingCursor::new();
        assert!(matches!(
            cursor.begin_move(Direction::Up, None),
            Err(AvrcpError::InvalidDirection)
        ));
    }

    #[test]
    fn test_up_pops_committed_path() {
        let mut cursor = BrowsingCursor::new();
        cursor.begin_move(Direction::Down, Some(uid(1))).unwrap();
        cursor.commit_move();
        cursor.begin_move(Direction::Down, Some(uid(2))).unwrap();
        cursor.commit_move();
        assert_eq!(cursor.depth(), 2);

        cursor.begin_move(Direction::Up, None).unwrap();
        cursor.commit_move();
        assert_eq!(cursor.path(), &[uid(1)]);
    }

    #[test]
    fn test_concurrent_moves_rejected() {
        let mut cursor = BrowsingCursor::new();
        cursor.begin_move(Direction::Down, Some(uid(1))).unwrap();
        assert!(cursor.begin_move(Direction::Down, Some(uid(2))).is_err());
    }

    #[test]
    fn test_uid_counter_mismatch_invalidates() {
        let mut cursor = BrowsingCursor::new();
        cursor.observe_uid_counter(5).unwrap();
        cursor.begin_move(Direction::Down, Some(uid(1))).unwrap();
        cursor.commit_move();
        assert_eq!(cursor.depth(), 1);

        let err = cursor.observe_uid_counter(6).unwrap_err();
        assert!(matches!(
            err,
            AvrcpError::UidCounterStale {
                expected: 5,
                actual: 6
            }
        ));
        assert!(cursor.is_at_root());
        // the new counter is adopted for the re-browse
        assert_eq!(cursor.uid_counter(), 6);
        cursor.observe_uid_counter(6).unwrap();
    }

    #[test]
    fn test_range_validation() {
        assert!(BrowsingCursor::validate_range(0, 10, None).is_ok());
        assert!(BrowsingCursor::validate_range(5, 2, None).is_err());
        assert!(BrowsingCursor::validate_range(10, 20, Some(10)).is_err());
        assert!(BrowsingCursor::validate_range(9, 20, Some(10)).is_ok());
    }
}
