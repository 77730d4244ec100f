//! Sequence numbers for echo suppression

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-orchestrator sequence counter
///
/// Every repository write is tagged with a fresh number; a change event that
/// carries the most recently used number is the orchestrator's own echo.
#[derive(Debug, Default)]
pub struct SequenceContext {
    counter: AtomicU64,
    last_processed: AtomicU64,
}

impl SequenceContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next number and remember it as the last used
    pub fn next(&self) -> u64 {
        let seq = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.last_processed.store(seq, Ordering::SeqCst);
        seq
    }

    pub fn last_processed(&self) -> u64 {
        self.last_processed.load(Ordering::SeqCst)
    }

    /// Only the last used number counts; `None` never does
    pub fn is_own(&self, source_seq: Option<u64>) -> bool {
        source_seq.is_some_and(|seq| seq != 0 && seq == self.last_processed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_detection() {
        let seq = SequenceContext::new();
        assert!(!seq.is_own(None));
        assert!(!seq.is_own(Some(0)));

        let first = seq.next();
        assert!(seq.is_own(Some(first)));
        let second = seq.next();
        assert!(second > first);
        assert!(!seq.is_own(Some(first)));
        assert!(seq.is_own(Some(second)));
        assert!(!seq.is_own(None));
    }
}
