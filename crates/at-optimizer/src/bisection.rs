//! Search primitives for ordinal settings whose success is monotonic.
//!
//! Both types only decide what to probe next; running the probe is the
//! caller's job.

use serde::Serialize;

use at_types::{config_error, AtResult};

/// Integer bisection over `[0, max]` for the largest value that succeeds.
///
/// `low` is assumed to succeed and `high` is assumed to fail. The initial
/// `high` is one past `max` and is never probed itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchRange {
    low: u32,
    high: u32,
    max: u32,
    best_working: u32,
    pending: Option<u32>,
    probes: usize,
}

impl SearchRange {
    pub fn new(max: u32) -> Self {
        Self {
            low: 0,
            high: max.saturating_add(1),
            max,
            best_working: 0,
            pending: None,
            probes: 0,
        }
    }

    /// Next value to probe, or `None` once the range has collapsed.
    ///
    /// The midpoint rounds toward `high` when it would equal `low`, so every
    /// probe shrinks the range.
    pub fn next_probe(&mut self) -> Option<u32> {
        loop {
            if self.low >= self.high {
                self.pending = None;
                return None;
            }
            let mut mid = self.low + (self.high - self.low) / 2;
            if mid == self.low {
                mid = self.high;
            }
            if mid > self.max {
                self.high = mid - 1;
                continue;
            }
            self.pending = Some(mid);
            return Some(mid);
        }
    }

    /// Record the outcome of the value returned by the last
    /// [`next_probe`](Self::next_probe). Ignored when nothing is pending.
    pub fn record(&mut self, success: bool) {
        let Some(mid) = self.pending.take() else {
            return;
        };
        self.probes += 1;
        if success {
            self.low = mid;
            self.best_working = mid;
        } else {
            self.high = mid - 1;
        }
    }

    pub fn best_working(&self) -> u32 {
        self.best_working
    }

    pub fn is_done(&self) -> bool {
        self.low >= self.high
    }

    pub fn probes(&self) -> usize {
        self.probes
    }

    pub fn bounds(&self) -> (u32, u32) {
        (self.low, self.high)
    }
}

/// Candidate values tried from largest to smallest; the first that passes
/// wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DescendingCandidates {
    candidates: Vec<u32>,
    position: usize,
    accepted: Option<u32>,
}

impl DescendingCandidates {
    /// Sorts descending and drops duplicates. An empty list is a
    /// configuration error.
    pub fn new(mut candidates: Vec<u32>) -> AtResult<Self> {
        if candidates.is_empty() {
            return Err(config_error!("candidate list is empty"));
        }
        candidates.sort_unstable_by(|a, b| b.cmp(a));
        candidates.dedup();
        Ok(Self {
            candidates,
            position: 0,
            accepted: None,
        })
    }

    pub fn candidates(&self) -> &[u32] {
        &self.candidates
    }

    /// Next candidate to try, or `None` once one was accepted or all failed.
    pub fn next_candidate(&self) -> Option<u32> {
        if self.accepted.is_some() {
            return None;
        }
        self.candidates.get(self.position).copied()
    }

    pub fn record(&mut self, success: bool) {
        let Some(candidate) = self.next_candidate() else {
            return;
        };
        if success {
            self.accepted = Some(candidate);
        } else {
            self.position += 1;
        }
    }

    pub fn accepted(&self) -> Option<u32> {
        self.accepted
    }

    /// Accepted value, or the smallest candidate when none passed.
    pub fn resolved(&self) -> u32 {
        self.accepted
            .or_else(|| self.candidates.last().copied())
            .unwrap_or_default()
    }
}
