//! Retention-bounded log of change records for one board.
//!
//! The log is a value: the registry publishes it next to the snapshot it
//! ends at and replaces both together, so a reader aggregating from an
//! older log is never disturbed by trimming.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::changes::{ChangeRecord, aggregate, diff};
use crate::error::{BoardError, Result};
use crate::snapshot::BoardSnapshot;

/// Ordered (oldest to newest) change records, capped at `retention`.
#[derive(Debug, Clone)]
pub struct ChangeLog {
    records: VecDeque<Arc<ChangeRecord>>,
    retention: usize,
}

impl ChangeLog {
    /// Create an empty log that keeps at least one record.
    #[must_use]
    pub fn new(retention: usize) -> Self {
        Self {
            records: VecDeque::new(),
            retention: retention.max(1),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub const fn retention(&self) -> usize {
        self.retention
    }

    /// Oldest version a client can still request changes from.
    #[must_use]
    pub fn oldest_version(&self) -> Option<u64> {
        self.records.front().map(|r| r.from_version)
    }

    /// Version the newest record ends at.
    #[must_use]
    pub fn latest_version(&self) -> Option<u64> {
        self.records.back().map(|r| r.to_version)
    }

    pub fn records(&self) -> impl Iterator<Item = &ChangeRecord> {
        self.records.iter().map(|r| &**r)
    }

    /// Append a record, dropping the oldest entries beyond retention.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::StaleView`] when `record` does not start where
    /// the newest record ends.
    pub fn append(&mut self, record: ChangeRecord) -> Result<()> {
        self.push(Arc::new(record))
    }

    /// Diff `previous` against `current` and append the result.
    ///
    /// # Errors
    ///
    /// See [`Self::append`].
    pub fn record_and_append(
        &mut self,
        previous: &BoardSnapshot,
        current: &BoardSnapshot,
    ) -> Result<Arc<ChangeRecord>> {
        let record = Arc::new(diff(previous, current));
        self.push(Arc::clone(&record))?;
        Ok(record)
    }

    fn push(&mut self, record: Arc<ChangeRecord>) -> Result<()> {
        if let Some(latest) = self.latest_version() {
            if record.from_version != latest || record.to_version <= latest {
                return Err(BoardError::StaleView {
                    board: record.board.clone(),
                    requested: record.from_version,
                    oldest: self.oldest_version().unwrap_or(latest),
                    current: latest,
                });
            }
        }

        self.records.push_back(record);
        while self.records.len() > self.retention {
            self.records.pop_front();
        }
        Ok(())
    }

    /// Aggregate every retained record after `from_version` up to `current`.
    ///
    /// `from_version == current.version` yields an empty record.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::StaleView`] if `from_version` is older than the
    /// retained window, newer than `current`, or if the retained records do
    /// not form an unbroken chain ending at `current.version`.
    pub fn changes_since(&self, from_version: u64, current: &BoardSnapshot) -> Result<ChangeRecord> {
        if from_version == current.version {
            return Ok(ChangeRecord::empty(current.code.clone(), from_version));
        }

        let stale = || BoardError::StaleView {
            board: current.code.clone(),
            requested: from_version,
            oldest: self.oldest_version().unwrap_or(current.version),
            current: current.version,
        };

        if from_version > current.version {
            return Err(stale());
        }

        let start = self
            .records
            .iter()
            .position(|r| r.from_version == from_version)
            .ok_or_else(stale)?;

        let window: Vec<&ChangeRecord> = self.records.range(start..).map(|r| &**r).collect();
        let contiguous = window
            .windows(2)
            .all(|pair| pair[0].to_version == pair[1].from_version);
        let ends_at_current = window
            .last()
            .is_some_and(|r| r.to_version == current.version);
        if !contiguous || !ends_at_current {
            return Err(stale());
        }

        Ok(aggregate(from_version, window, current))
    }
}
