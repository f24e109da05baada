//! Transaction label allocator
//!
//! AVCTP gives each command a 4-bit transaction label so responses can be
//! paired with the command they answer. Sixteen labels exist per session;
//! a label must not be reissued until its transaction resolves.

use tracing::trace;

/// Number of transaction labels per session
pub const LABEL_COUNT: u8 = 16;

/// Round-robin allocator over the sixteen 4-bit labels
///
/// Labels are handed out in rotating order rather than lowest-free-first
/// so a label that just resolved is the last one to be reissued, which
/// keeps late responses from colliding with a fresh transaction in the
/// common case.
#[derive(Debug, Clone)]
pub struct LabelAllocator {
    in_use: u16,
    next: u8,
}

impl LabelAllocator {
    /// Create an allocator with all sixteen labels free
    pub fn new() -> Self {
        Self { in_use: 0, next: 0 }
    }

    /// Allocate a label, or `None` when all sixteen are outstanding
    pub fn allocate(&mut self) -> Option<u8> {
        if self.in_use == u16::MAX {
            return None;
        }
        // at least one bit is clear, so this loop terminates
        loop {
            let label = self.next;
            self.next = (self.next + 1) % LABEL_COUNT;
            if self.in_use & (1 << label) == 0 {
                self.in_use |= 1 << label;
                trace!(label, "allocated transaction label");
                return Some(label);
            }
        }
    }

    /// Release a label back to the pool
    ///
    /// Releasing a label that is not in use is a logic error upstream but
    /// harmless here; the bit is simply cleared again.
    pub fn release(&mut self, label: u8) {
        debug_assert!(label < LABEL_COUNT);
        self.in_use &= !(1 << (label & 0x0f));
        trace!(label, "released transaction label");
    }

    /// Whether the label is currently outstanding
    pub fn is_in_use(&self, label: u8) -> bool {
        label < LABEL_COUNT && self.in_use & (1 << label) != 0
    }

    /// Number of outstanding labels
    pub fn outstanding(&self) -> u32 {
        self.in_use.count_ones()
    }

    /// Release every label
    pub fn clear(&mut self) {
        self.in_use = 0;
    }
}

impl Default for LabelAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_allocates_all_sixteen_unique() {
        let mut alloc = LabelAllocator::new();
        let mut seen = HashSet::new();
        for _ in 0..16 {
            let label = alloc.allocate().expect("labels available");
            assert!(label < LABEL_COUNT);
            assert!(seen.insert(label), "label {} issued twice", label);
        }
        assert_eq!(alloc.outstanding(), 16);
        assert_eq!(alloc.allocate(), None);
    }

    #[test]
    fn test_release_makes_label_available_again() {
        let mut alloc = LabelAllocator::new();
        for _ in 0..16 {
            alloc.allocate().unwrap();
        }
        alloc.release(5);
        assert!(!alloc.is_in_use(5));
        assert_eq!(alloc.allocate(), Some(5));
        assert_eq!(alloc.allocate(), None);
    }

    #[test]
    fn test_round_robin_avoids_immediate_reuse() {
        let mut alloc = LabelAllocator::new();
        let a = alloc.allocate().unwrap();
        alloc.release(a);
        let b = alloc.allocate().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_interleaved_allocate_release_never_duplicates() {
        let mut alloc = LabelAllocator::new();
        let mut live = HashSet::new();
        for round in 0u32..200 {
            if round % 3 == 0 {
                if let Some(&label) = live.iter().next() {
                    live.remove(&label);
                    alloc.release(label);
                }
            } else if let Some(label) = alloc.allocate() {
                assert!(live.insert(label), "label {} issued while live", label);
            } else {
                assert_eq!(live.len(), 16);
            }
        }
    }

    #[test]
    fn test_clear() {
        let mut alloc = LabelAllocator::new();
        for _ in 0..10 {
            alloc.allocate().unwrap();
        }
        alloc.clear();
        assert_eq!(alloc.outstanding(), 0);
    }
}
