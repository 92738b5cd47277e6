//! Position controller: the authoritative cursor into the script.
//!
//! Only commits move the cursor, and only forward, by at most the look-ahead bound. Between
//! commits confidence decays linearly to zero, which drives the host's green/yellow/orange/none
//! indicator.

use std::ops::RangeInclusive;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::{Error, Result};

/// Confidence at or above which the band is [`ConfidenceBand::Locked`].
const LOCKED_THRESHOLD: f32 = 0.66;

/// Confidence at or above which the band is [`ConfidenceBand::Confirming`].
const CONFIRMING_THRESHOLD: f32 = 0.33;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConfidenceBand {
    Locked,
    Confirming,
    Searching,
    None,
}

impl ConfidenceBand {
    pub fn from_value(value: f32) -> Self {
        if value >= LOCKED_THRESHOLD {
            Self::Locked
        } else if value >= CONFIRMING_THRESHOLD {
            Self::Confirming
        } else if value > 0.0 {
            Self::Searching
        } else {
            Self::None
        }
    }
}

/// Continuous confidence plus its display band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceLevel {
    pub value: f32,
    pub band: ConfidenceBand,
}

impl ConfidenceLevel {
    pub fn new(value: f32) -> Self {
        let value = value.clamp(0.0, 1.0);
        Self {
            value,
            band: ConfidenceBand::from_value(value),
        }
    }
}

/// Command for the host to scroll the script to a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollTo {
    pub line_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionState {
    pub current_line_index: usize,
    pub confidence: f32,
    pub last_update_at: Duration,
}

#[derive(Debug)]
pub struct PositionController {
    state: PositionState,
    look_ahead_lines: usize,
    decay: Duration,

    // `None` until the first commit (or after re-anchoring to the top of a new script).
    last_committed: Option<usize>,
}

impl PositionController {
    /// Start a session at line 0 with full confidence.
    pub fn new(look_ahead_lines: usize, decay: Duration, now: Duration) -> Self {
        Self {
            state: PositionState {
                current_line_index: 0,
                confidence: 1.0,
                last_update_at: now,
            },
            look_ahead_lines,
            decay,
            last_committed: None,
        }
    }

    pub fn state(&self) -> &PositionState {
        &self.state
    }

    pub fn last_committed(&self) -> Option<usize> {
        self.last_committed
    }

    pub fn reconfigure(&mut self, look_ahead_lines: usize, decay: Duration) {
        self.look_ahead_lines = look_ahead_lines;
        self.decay = decay;
    }

    /// Lines eligible for matching: the current line and up to `look_ahead_lines` after it.
    pub fn search_range(&self, line_count: usize) -> Option<RangeInclusive<usize>> {
        let start = self.state.current_line_index;
        if start >= line_count {
            return None;
        }
        let end = start
            .saturating_add(self.look_ahead_lines)
            .min(line_count - 1);
        Some(start..=end)
    }

    /// Move the cursor to a committed line and produce the scroll command for it.
    ///
    /// Rejected with [`Error::CommitRejected`] (and nothing changes) when the target is behind
    /// the cursor, was already committed, or lies beyond the look-ahead bound.
    pub fn on_commit(&mut self, line_index: usize, now: Duration) -> Result<ScrollTo> {
        let current = self.state.current_line_index;
        let reject = |reason: &'static str| {
            warn!(target_line = line_index, current, reason, "commit rejected");
            Err(Error::CommitRejected {
                target: line_index,
                current,
                reason,
            })
        };

        if line_index < current {
            return reject("target is behind the current line");
        }
        if self.last_committed.is_some_and(|last| line_index <= last) {
            return reject("target was already committed");
        }
        if line_index - current > self.look_ahead_lines {
            return reject("target is beyond the look-ahead bound");
        }

        self.state = PositionState {
            current_line_index: line_index,
            confidence: 1.0,
            last_update_at: now,
        };
        self.last_committed = Some(line_index);
        info!(line_index, "scroll");
        Ok(ScrollTo { line_index })
    }

    /// Decay confidence for the time elapsed since the last commit.
    pub fn tick(&mut self, now: Duration) -> ConfidenceLevel {
        let elapsed = now.saturating_sub(self.state.last_update_at);
        let remaining = if self.decay.is_zero() {
            0.0
        } else {
            1.0 - elapsed.as_secs_f32() / self.decay.as_secs_f32()
        };
        self.state.confidence = remaining.clamp(0.0, 1.0);
        ConfidenceLevel::new(self.state.confidence)
    }

    /// Point the cursor at `line_index` in a freshly segmented script.
    ///
    /// With `anchored` the line counts as committed (the performer is known to be there), so it
    /// will not be re-triggered. Otherwise the controller behaves as at session start.
    pub fn reanchor(&mut self, line_index: usize, anchored: bool) {
        self.state.current_line_index = line_index;
        self.last_committed = anchored.then_some(line_index);
        info!(line_index, anchored, "re-anchored");
    }
}
