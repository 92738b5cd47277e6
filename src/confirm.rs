//! Confirmation state machine.
//!
//! Turns the best candidate of each scoring pass into committed position changes:
//! - a candidate at or above `instant_accept_score` commits on the pass it appears
//! - a weaker candidate waits out `confirm_window` before committing
//! - a pending candidate whose score climbs past `instant_accept_score` commits early
//! - a pending candidate that stops matching is abandoned
//!
//! After a commit the machine stays `Locked` on the committed line for one scoring pass (or until
//! `confirm_window` has passed, whichever comes first) so the transcript tail that produced the
//! commit cannot fire it again. A candidate for a later line is not held back by the lock: it is
//! handled as if the machine were idle, so a burst that finishes one line and reads the next in a
//! single update moves the cursor twice.
//!
//! Deadlines are not waited on here. Entering `PendingConfirm` hands back a [`Deadline`] that the
//! driver schedules; when it fires, [`ConfirmationMachine::on_deadline`] checks its generation
//! against the live pending match so a deadline outlived by a newer decision is dropped as stale.

use std::time::Duration;

use tracing::debug;

use crate::matcher::MatchCandidate;
use crate::opts::Opts;
use crate::{Error, Result};

/// Scoring passes to ignore right after a commit.
const LOCK_PASSES: u32 = 1;

/// A scheduled confirmation deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    pub at: Duration,

    /// Identifies the pending match this deadline belongs to.
    pub generation: u64,
}

/// Working memory while a candidate accumulates certainty.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingMatch {
    pub candidate: MatchCandidate,
    pub best_score_so_far: f32,
    pub deadline: Deadline,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfirmState {
    Idle,
    PendingConfirm(PendingMatch),
    Locked {
        line_index: usize,
        passes_left: u32,
        until: Duration,
    },
}

/// What a scoring pass decided.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
    /// Nothing for the driver to do.
    None,

    /// Move the cursor to this candidate's line.
    Commit(MatchCandidate),

    /// A new pending match started; call back at this deadline.
    Schedule(Deadline),
}

#[derive(Debug)]
pub struct ConfirmationMachine {
    state: ConfirmState,
    instant_accept_score: f32,
    min_score: f32,
    confirm_window: Duration,
    next_generation: u64,
}

impl ConfirmationMachine {
    pub fn new(opts: &Opts) -> Self {
        Self {
            state: ConfirmState::Idle,
            instant_accept_score: opts.instant_accept_score,
            min_score: opts.min_score,
            confirm_window: opts.confirm_window_duration(),
            next_generation: 0,
        }
    }

    pub fn state(&self) -> &ConfirmState {
        &self.state
    }

    /// Apply new thresholds. Any pending match is dropped, since it was judged by the old ones.
    pub fn reconfigure(&mut self, opts: &Opts) {
        self.instant_accept_score = opts.instant_accept_score;
        self.min_score = opts.min_score;
        self.confirm_window = opts.confirm_window_duration();
        self.cancel();
    }

    /// Feed the best candidate of one scoring pass (or `None` when nothing was eligible).
    pub fn on_pass(&mut self, best: Option<MatchCandidate>, now: Duration) -> Transition {
        // A deadline that came due before this input resolves first.
        if let Some(committed) = self.expire(now) {
            return Transition::Commit(committed);
        }
        if let ConfirmState::Locked { line_index, until, .. } = self.state {
            let moved_on = best.is_some_and(|c| c.line_index > line_index);
            if now >= until || moved_on {
                self.state = ConfirmState::Idle;
            }
        }

        match self.state {
            ConfirmState::Locked {
                line_index,
                passes_left,
                until,
            } => {
                let passes_left = passes_left.saturating_sub(1);
                self.state = if passes_left == 0 {
                    ConfirmState::Idle
                } else {
                    ConfirmState::Locked {
                        line_index,
                        passes_left,
                        until,
                    }
                };
                if let Some(c) = best {
                    debug!(line_index = c.line_index, score = c.score, "locked, ignoring candidate");
                }
                Transition::None
            }

            ConfirmState::Idle => match best {
                None => Transition::None,
                Some(c) if c.score >= self.instant_accept_score => self.commit(c, now),
                Some(c) => {
                    let deadline = Deadline {
                        at: now + self.confirm_window,
                        generation: self.next_generation,
                    };
                    self.next_generation += 1;
                    debug!(
                        line_index = c.line_index,
                        score = c.score,
                        generation = deadline.generation,
                        "pending confirmation"
                    );
                    self.state = ConfirmState::PendingConfirm(PendingMatch {
                        candidate: c,
                        best_score_so_far: c.score,
                        deadline,
                    });
                    Transition::Schedule(deadline)
                }
            },

            ConfirmState::PendingConfirm(mut pending) => match best {
                None => {
                    debug!(
                        line_index = pending.candidate.line_index,
                        "candidate stopped matching, abandoning"
                    );
                    self.state = ConfirmState::Idle;
                    Transition::None
                }

                Some(c) if c.line_index == pending.candidate.line_index => {
                    // Equal scores are not an improvement.
                    if c.score > pending.best_score_so_far {
                        pending.best_score_so_far = c.score;
                        pending.candidate.score = c.score;
                        pending.candidate.last_word_ordinal = c.last_word_ordinal;
                        if pending.best_score_so_far >= self.instant_accept_score {
                            debug!(
                                line_index = c.line_index,
                                score = c.score,
                                "score improved past instant accept"
                            );
                            return self.commit(pending.candidate, now);
                        }
                        self.state = ConfirmState::PendingConfirm(pending);
                    }
                    Transition::None
                }

                Some(c) if c.score >= self.instant_accept_score => self.commit(c, now),

                Some(c) => {
                    // The most recently observed line takes over the pending slot. The deadline
                    // stays, bounding the delay from the first observation.
                    debug!(
                        from = pending.candidate.line_index,
                        to = c.line_index,
                        "pending candidate superseded"
                    );
                    pending.candidate = c;
                    pending.best_score_so_far = c.score;
                    self.state = ConfirmState::PendingConfirm(pending);
                    Transition::None
                }
            },
        }
    }

    /// Handle a scheduled deadline firing.
    ///
    /// Returns [`Error::StaleDeadline`] when the deadline no longer belongs to the pending match.
    /// A deadline delivered early (clock skew) is not stale; it simply does nothing yet.
    pub fn on_deadline(
        &mut self,
        deadline: Deadline,
        now: Duration,
    ) -> Result<Option<MatchCandidate>> {
        match self.state {
            ConfirmState::PendingConfirm(pending)
                if pending.deadline.generation == deadline.generation =>
            {
                Ok(self.expire(now))
            }
            _ => Err(Error::StaleDeadline {
                generation: deadline.generation,
            }),
        }
    }

    /// Commit the pending match if its deadline has passed.
    pub fn expire(&mut self, now: Duration) -> Option<MatchCandidate> {
        let ConfirmState::PendingConfirm(pending) = self.state else {
            return None;
        };
        if now < pending.deadline.at {
            return None;
        }

        if pending.best_score_so_far < self.min_score {
            self.state = ConfirmState::Idle;
            return None;
        }

        match self.commit(pending.candidate, now) {
            Transition::Commit(c) => Some(c),
            _ => None,
        }
    }

    /// Drop any pending match. Outstanding deadlines become stale.
    pub fn cancel(&mut self) {
        self.state = ConfirmState::Idle;
    }

    fn commit(&mut self, candidate: MatchCandidate, now: Duration) -> Transition {
        self.state = ConfirmState::Locked {
            line_index: candidate.line_index,
            passes_left: LOCK_PASSES,
            until: now + self.confirm_window,
        };
        Transition::Commit(candidate)
    }
}
