//! The transcript side of the engine: a bounded look-behind window of recognized words, and the
//! differ that turns the recognizer's "everything so far" strings into window updates.
//!
//! Recognizers deliver the whole current utterance on every update and may revise the last few
//! words as they go ("I went to the stir" → "I went to the store"). The differ compares each
//! update with the previous one, retracts superseded words that are still in the window, and
//! pushes only what is new.

use std::time::Duration;

use tracing::debug;

use crate::normalize::tokenize;
use crate::{Error, Result};

/// A recognized, normalized word and when it arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptWord {
    pub text: String,
    pub at: Duration,

    /// Session-wide sequence number. Never reused, even after a retraction.
    pub ordinal: u64,
}

/// Bounded, time-ordered buffer of the most recent words.
///
/// Owned by exactly one engine; the matcher only ever sees a read-only snapshot.
#[derive(Debug)]
pub struct TranscriptWindow {
    capacity: usize,
    words: Vec<TranscriptWord>,
    next_ordinal: u64,
    last_at: Option<Duration>,
}

impl TranscriptWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            words: Vec::with_capacity(capacity + 1),
            next_ordinal: 0,
            last_at: None,
        }
    }

    /// Append a word and evict from the front until the window fits its bound.
    ///
    /// Words from one recognizer update share a timestamp, so equal timestamps are accepted;
    /// going back in time is not. Returns the word's ordinal.
    pub fn push(&mut self, word: impl Into<String>, at: Duration) -> Result<u64> {
        if let Some(previous) = self.last_at {
            if at < previous {
                return Err(Error::OutOfOrderUpdate {
                    previous,
                    received: at,
                });
            }
        }

        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        self.last_at = Some(at);
        self.words.push(TranscriptWord {
            text: word.into(),
            at,
            ordinal,
        });
        self.evict();
        Ok(ordinal)
    }

    /// Current words, oldest first.
    pub fn snapshot(&self) -> &[TranscriptWord] {
        &self.words
    }

    /// Drop every buffered word whose ordinal is `ordinal` or later.
    ///
    /// Returns how many words were removed.
    pub fn retract_from(&mut self, ordinal: u64) -> usize {
        let keep = self.words.partition_point(|w| w.ordinal < ordinal);
        let removed = self.words.len() - keep;
        self.words.truncate(keep);
        removed
    }

    /// Change the look-behind bound, evicting immediately if the window shrank.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.evict();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Release all buffered words. Ordinals keep counting up.
    pub fn clear(&mut self) {
        self.words.clear();
    }

    fn evict(&mut self) {
        if self.words.len() > self.capacity {
            let excess = self.words.len() - self.capacity;
            self.words.drain(..excess);
        }
    }
}

/// What one recognizer update changed in the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ingested {
    /// Previously pushed words withdrawn because the recognizer revised them.
    pub retracted: usize,

    /// Newly pushed words.
    pub appended: usize,

    /// The update did not continue the previous utterance at all.
    pub new_utterance: bool,
}

/// Diffs successive full-utterance transcripts into window pushes.
#[derive(Debug, Default)]
pub struct TranscriptDiffer {
    previous: Vec<String>,

    // Ordinal each word of `previous` received when it was pushed.
    ordinals: Vec<u64>,

    last_update_at: Option<Duration>,
}

impl TranscriptDiffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one recognizer update to `window`.
    ///
    /// Updates must arrive with strictly increasing timestamps; anything else is rejected with
    /// [`Error::OutOfOrderUpdate`] and leaves all state untouched. Empty updates change nothing.
    pub fn ingest(
        &mut self,
        text: &str,
        at: Duration,
        window: &mut TranscriptWindow,
    ) -> Result<Ingested> {
        if let Some(previous) = self.last_update_at {
            if at <= previous {
                return Err(Error::OutOfOrderUpdate {
                    previous,
                    received: at,
                });
            }
        }

        let tokens = tokenize(text);
        if tokens.is_empty() {
            debug!(?at, "ignoring empty transcript update");
            return Ok(Ingested::default());
        }
        self.last_update_at = Some(at);

        let common = self
            .previous
            .iter()
            .zip(&tokens)
            .take_while(|(a, b)| a == b)
            .count();

        let mut ingested = Ingested::default();
        if common == 0 && !self.previous.is_empty() {
            // Nothing in common: the recognizer started a new utterance. Words already heard stay
            // in the window as history.
            ingested.new_utterance = true;
            self.previous.clear();
            self.ordinals.clear();
        } else if common < self.previous.len() {
            ingested.retracted = window.retract_from(self.ordinals[common]);
            self.previous.truncate(common);
            self.ordinals.truncate(common);
        }

        for word in &tokens[self.previous.len()..] {
            let ordinal = window.push(word.clone(), at)?;
            self.previous.push(word.clone());
            self.ordinals.push(ordinal);
            ingested.appended += 1;
        }

        Ok(ingested)
    }

    /// Forget the current utterance; the next update is diffed against nothing.
    pub fn reset_utterance(&mut self) {
        self.previous.clear();
        self.ordinals.clear();
    }
}
