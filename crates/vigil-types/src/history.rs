//! Restart history — bounded in-memory record of recovery procedures.
//!
//! The orchestrator consults this buffer for its cooldown and
//! rolling-hour rate limit. Records are never persisted; the buffer is
//! owned by the monitor loop.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::{Layer, NodeId, RestartScope};

/// How a recovery procedure ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartOutcome {
    Success,
    Failed,
    Skipped,
}

/// One executed (or skipped) recovery procedure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartRecord {
    pub scope: RestartScope,
    pub layer: Option<Layer>,
    pub node_ids: Vec<NodeId>,
    /// Unix timestamp (seconds) when the procedure began.
    pub started_at: u64,
    /// Unix timestamp (seconds) when the procedure ended.
    pub finished_at: u64,
    pub outcome: RestartOutcome,
}

/// Bounded ring buffer of restart records.
///
/// The default capacity comfortably covers an hour of history at the
/// maximum permitted restart rate. Skipped records are kept for
/// diagnostics but do not count toward cooldown or rate limiting.
#[derive(Debug, Clone, Default)]
pub struct RestartHistory {
    records: VecDeque<RestartRecord>,
    capacity: usize,
}

impl RestartHistory {
    pub const DEFAULT_CAPACITY: usize = 64;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(Self::DEFAULT_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    /// Append a record, evicting when full.
    ///
    /// Skipped records are evicted before attempted ones so that a long
    /// run of cooldown skips cannot push rate-limit-relevant history out
    /// of the buffer.
    pub fn record(&mut self, record: RestartRecord) {
        if self.records.len() == self.capacity {
            match self
                .records
                .iter()
                .position(|r| r.outcome == RestartOutcome::Skipped)
            {
                Some(i) => {
                    self.records.remove(i);
                }
                None => {
                    self.records.pop_front();
                }
            }
        }
        self.records.push_back(record);
    }

    /// When the most recent attempted procedure finished.
    ///
    /// Skipped records do not count: a skip must not extend the
    /// cooldown window.
    pub fn last_action_finished_at(&self) -> Option<u64> {
        self.records
            .iter()
            .filter(|r| r.outcome != RestartOutcome::Skipped)
            .map(|r| r.finished_at)
            .max()
    }

    /// Number of attempted procedures started in the trailing window.
    pub fn actions_started_within(&self, window_secs: u64, now: u64) -> usize {
        let cutoff = now.saturating_sub(window_secs);
        self.records
            .iter()
            .filter(|r| r.outcome != RestartOutcome::Skipped && r.started_at >= cutoff)
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RestartRecord> {
        self.records.iter()
    }
}
