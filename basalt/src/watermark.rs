use std::collections::BTreeMap;

use crate::Timestamp;

/// Tracks the read timestamps of live transactions as an ordered multiset
/// and exposes the oldest one, which bounds version-chain garbage
/// collection.
pub struct Watermark {
    commit_ts: Timestamp,
    watermark: Timestamp,
    current_reads: BTreeMap<Timestamp, u32>,
}

impl Watermark {
    pub fn new(commit_ts: Timestamp) -> Self {
        Self {
            commit_ts,
            watermark: commit_ts,
            current_reads: BTreeMap::new(),
        }
    }

    /// Registers a transaction's read timestamp. Registering a timestamp
    /// below the latest commit is a caller bug.
    pub fn add_txn(&mut self, read_ts: Timestamp) {
        assert!(
            read_ts >= self.commit_ts,
            "read ts {read_ts} < commit ts {}",
            self.commit_ts
        );
        *self.current_reads.entry(read_ts).or_insert(0) += 1;
        self.watermark = *self
            .current_reads
            .keys()
            .next()
            .expect("just inserted a read ts");
    }

    pub fn remove_txn(&mut self, read_ts: Timestamp) {
        let Some(count) = self.current_reads.get_mut(&read_ts) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            self.current_reads.remove(&read_ts);
            self.watermark = match self.current_reads.keys().next() {
                Some(&min) => min,
                None => self.commit_ts,
            };
        }
    }

    pub fn update_commit_ts(&mut self, commit_ts: Timestamp) {
        self.commit_ts = commit_ts;
        if self.current_reads.is_empty() {
            self.watermark = commit_ts;
        }
    }

    /// The oldest read timestamp any live transaction still depends on, or
    /// the latest commit timestamp when none are live.
    pub fn watermark(&self) -> Timestamp {
        self.watermark
    }

    pub fn latest_commit_ts(&self) -> Timestamp {
        self.commit_ts
    }
}
