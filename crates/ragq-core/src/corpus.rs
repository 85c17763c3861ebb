use std::sync::atomic::{AtomicU64, Ordering};

use crate::traits::CorpusVersionSource;

/// Monotonic corpus version held by whoever ingests chunks.
#[derive(Debug, Default)]
pub struct CorpusVersion {
    current: AtomicU64,
}

impl CorpusVersion {
    pub fn new(start: u64) -> Self {
        Self { current: AtomicU64::new(start) }
    }

    /// Record a corpus mutation and return the new version.
    pub fn bump(&self) -> u64 {
        self.current.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }
}

impl CorpusVersionSource for CorpusVersion {
    fn corpus_version(&self) -> u64 {
        self.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_is_monotonic() {
        let v = CorpusVersion::new(3);
        assert_eq!(v.corpus_version(), 3);
        assert_eq!(v.bump(), 4);
        assert_eq!(v.bump(), 5);
        assert_eq!(v.current(), 5);
    }
}
