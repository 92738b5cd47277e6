//! Matcher/scorer: how well does the tail of the transcript match the start of each upcoming
//! script line?
//!
//! For every candidate line we look for the longest run of the line's leading words that the
//! performer has said, in order, near the end of the look-behind window. The recognizer tends to
//! insert filler ("um", "like", a mis-heard syllable), so a run may skip a couple of transcript
//! words. The score then blends:
//! - coverage: how much of the line the run covers
//! - recency: how many words have been spoken since the run ended
//!
//! Lines behind the cursor are never scored, so a phrase the performer repeats from earlier in
//! the script cannot pull the cursor backward.
//!
//! Words that already moved (or held) the cursor are tracked with a [`Watermark`]. The committed
//! line may keep extending a run across it, but every later line must match on words spoken after
//! it, so a refrain that repeats the committed line is matched on its own words.

use std::ops::RangeInclusive;
use std::time::Duration;

use serde::Serialize;

use crate::script::ScriptLine;
use crate::transcript::TranscriptWord;

/// Total transcript words a prefix run may skip over.
const MAX_FILLER_SKIPS: usize = 2;

/// Score lost per skipped filler word.
const FILLER_PENALTY: f32 = 0.05;

/// Words spoken after a run before its recency bonus is fully gone.
const STALE_HORIZON_WORDS: usize = 4;

/// Share of the score that depends on recency. A fully stale run keeps `1 - RECENCY_WEIGHT` of
/// its coverage.
const RECENCY_WEIGHT: f32 = 0.5;

/// One scored line, produced fresh on every scoring pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
    pub line_index: usize,

    /// Clamped to `[0, 1]`.
    pub score: f32,

    /// When this line was first seen above the minimum score.
    pub first_seen_at: Duration,

    /// Ordinal of the last transcript word the run used.
    #[serde(skip)]
    pub last_word_ordinal: u64,
}

/// Transcript words already spent on moving or holding the cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Watermark {
    /// Ordinal of the last word consumed by a commit or a hold.
    pub consumed_through: Option<u64>,

    /// The line those words were consumed for.
    pub committed_line: Option<usize>,
}

impl Watermark {
    /// Whether a run over the words with ordinals `first..=last` may be scored for `line_index`.
    fn admits(&self, line_index: usize, first: u64, last: u64) -> bool {
        let Some(mark) = self.consumed_through else {
            return true;
        };
        if self.committed_line.is_some_and(|line| line_index <= line) {
            last > mark
        } else {
            first > mark
        }
    }
}

/// The best in-order prefix run of a line found in the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixRun {
    /// Window position of the first matched word.
    pub start: usize,

    /// Number of leading line words matched.
    pub len: usize,

    /// Window position of the last matched word.
    pub end: usize,

    /// Transcript words skipped inside the run.
    pub skipped: usize,
}

impl PrefixRun {
    /// Words spoken after the run ended.
    fn staleness(&self, window_len: usize) -> usize {
        window_len - 1 - self.end
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Matcher {
    required_prefix_matches: usize,
    min_score: f32,
}

impl Matcher {
    pub fn new(required_prefix_matches: usize, min_score: f32) -> Self {
        Self {
            required_prefix_matches,
            min_score,
        }
    }

    /// Score every line in `range` against `window`.
    ///
    /// Only candidates with a long enough prefix run and a score of at least `min_score` are
    /// returned. Runs the `watermark` does not admit are never considered, so consumed words
    /// cannot produce another commit.
    pub fn score(
        &self,
        window: &[TranscriptWord],
        lines: &[ScriptLine],
        range: RangeInclusive<usize>,
        watermark: Watermark,
        now: Duration,
    ) -> Vec<MatchCandidate> {
        let Some(lines) = lines.get(range) else {
            return Vec::new();
        };

        lines
            .iter()
            .filter_map(|line| {
                let run = best_run(&line.words, window, |run| {
                    watermark.admits(
                        line.index,
                        window[run.start].ordinal,
                        window[run.end].ordinal,
                    )
                })?;
                if run.len < self.required_prefix_matches {
                    return None;
                }
                let last_word_ordinal = window[run.end].ordinal;

                let score = score_run(&run, line.len(), window.len());
                if score < self.min_score {
                    return None;
                }

                Some(MatchCandidate {
                    line_index: line.index,
                    score,
                    first_seen_at: now,
                    last_word_ordinal,
                })
            })
            .collect()
    }
}

/// Pick the highest score; ties go to the lowest line index.
pub fn best_candidate(candidates: &[MatchCandidate]) -> Option<MatchCandidate> {
    candidates.iter().copied().reduce(|best, c| {
        if c.score > best.score || (c.score == best.score && c.line_index < best.line_index) {
            c
        } else {
            best
        }
    })
}

/// Find the longest run of `line`'s leading words in `window`, preferring runs that end later
/// (fresher) and then runs that skip less.
pub fn prefix_run(line: &[String], window: &[TranscriptWord]) -> Option<PrefixRun> {
    best_run(line, window, |_| true)
}

/// [`prefix_run`] restricted to the runs `accept` lets through.
fn best_run(
    line: &[String],
    window: &[TranscriptWord],
    accept: impl Fn(&PrefixRun) -> bool,
) -> Option<PrefixRun> {
    let first = line.first()?;

    let mut best: Option<PrefixRun> = None;
    for start in 0..window.len() {
        if window[start].text != *first {
            continue;
        }

        let run = extend_run(line, window, start);
        if !accept(&run) {
            continue;
        }
        let better = match best {
            None => true,
            Some(b) => (run.len, run.end, std::cmp::Reverse(run.skipped))
                > (b.len, b.end, std::cmp::Reverse(b.skipped)),
        };
        if better {
            best = Some(run);
        }
    }

    best
}

fn extend_run(line: &[String], window: &[TranscriptWord], start: usize) -> PrefixRun {
    let mut run = PrefixRun {
        start,
        len: 1,
        end: start,
        skipped: 0,
    };

    let mut pos = start + 1;
    while run.len < line.len() && pos < window.len() {
        let wanted = &line[run.len];
        let budget = MAX_FILLER_SKIPS - run.skipped;

        // Look for the next line word, allowing up to `budget` inserted words before it.
        let Some(offset) = window[pos..]
            .iter()
            .take(budget + 1)
            .position(|w| w.text == *wanted)
        else {
            break;
        };

        run.skipped += offset;
        run.end = pos + offset;
        run.len += 1;
        pos = run.end + 1;
    }

    run
}

fn score_run(run: &PrefixRun, line_len: usize, window_len: usize) -> f32 {
    let coverage = run.len as f32 / line_len as f32;
    let stale = run.staleness(window_len).min(STALE_HORIZON_WORDS) as f32;
    let recency = 1.0 - RECENCY_WEIGHT * stale / STALE_HORIZON_WORDS as f32;
    let score = coverage * recency - FILLER_PENALTY * run.skipped as f32;
    score.clamp(0.0, 1.0)
}
