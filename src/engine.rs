//! The alignment engine: one performance session's worth of state, driven by explicit calls.
//!
//! `AlignmentEngine` wires the pieces together in data-flow order:
//! transcript update → window → matcher → confirmation machine → position controller.
//!
//! It is a plain single-writer value with no interior mutability, threads or clocks. Time is
//! passed in by the driver (the [`crate::session`] actor in production, [`crate::replay`] and
//! tests in simulated time) as a `Duration` since the session started. Nothing here blocks: a
//! pending confirmation surfaces as a [`Deadline`] in the returned [`Step`], and the driver calls
//! [`AlignmentEngine::on_deadline`] when it comes due.
//!
//! Input anomalies and consistency violations are logged and dropped here; the only error a
//! caller ever sees is invalid configuration.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::Result;
use crate::confirm::{ConfirmState, ConfirmationMachine, Deadline, Transition};
use crate::matcher::{MatchCandidate, Matcher, Watermark, best_candidate};
use crate::opts::Opts;
use crate::position::{ConfidenceLevel, PositionController, PositionState, ScrollTo};
use crate::script::{ScriptLine, SourceBlockId, segment, segment_blocks};
use crate::transcript::{TranscriptDiffer, TranscriptWindow};

/// Something the host UI should react to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    /// Scroll to a newly committed line. At most one per commit.
    ScrollTo(ScrollTo),

    /// Current confidence, reported on every step.
    Confidence(ConfidenceLevel),

    /// The script was reloaded and the cursor moved to this line of the new segmentation.
    Reanchored(ScrollTo),
}

/// Result of one engine call.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Events in emission order; always ends with a `Confidence` event.
    pub events: Vec<EngineEvent>,

    /// A confirmation deadline the driver must deliver back via `on_deadline`.
    pub schedule: Option<Deadline>,
}

impl Step {
    fn empty() -> Self {
        Self {
            events: Vec::new(),
            schedule: None,
        }
    }

    pub fn scroll(&self) -> Option<ScrollTo> {
        self.events.iter().find_map(|e| match e {
            EngineEvent::ScrollTo(s) => Some(*s),
            _ => None,
        })
    }

    pub fn confidence(&self) -> Option<ConfidenceLevel> {
        self.events.iter().rev().find_map(|e| match e {
            EngineEvent::Confidence(c) => Some(*c),
            _ => None,
        })
    }
}

/// Script content as the host supplied it, kept so a `chunkWordTarget` change can re-segment.
#[derive(Debug, Clone)]
enum ScriptSource {
    Text(String),
    Blocks(Vec<(SourceBlockId, String)>),
}

impl ScriptSource {
    fn segment(&self, chunk_word_target: usize) -> Vec<ScriptLine> {
        match self {
            ScriptSource::Text(text) => segment(text, chunk_word_target),
            ScriptSource::Blocks(blocks) => segment_blocks(
                blocks.iter().map(|(id, text)| (*id, text.as_str())),
                chunk_word_target,
            ),
        }
    }
}

pub struct AlignmentEngine {
    opts: Opts,
    source: ScriptSource,
    lines: Arc<[ScriptLine]>,

    window: TranscriptWindow,
    differ: TranscriptDiffer,
    matcher: Matcher,
    confirm: ConfirmationMachine,
    position: PositionController,

    // Ordinal of the last transcript word consumed by a commit or a hold.
    consumed_through: Option<u64>,
}

impl AlignmentEngine {
    /// Start a session over plain script text. `now` is the session's time origin (usually
    /// `Duration::ZERO`).
    pub fn new(opts: Opts, script_text: &str, now: Duration) -> Result<Self> {
        Self::with_source(opts, ScriptSource::Text(script_text.to_owned()), now)
    }

    /// Start a session over blocks from a host document model.
    pub fn with_blocks<I, S>(opts: Opts, blocks: I, now: Duration) -> Result<Self>
    where
        I: IntoIterator<Item = (SourceBlockId, S)>,
        S: Into<String>,
    {
        let blocks = blocks.into_iter().map(|(id, s)| (id, s.into())).collect();
        Self::with_source(opts, ScriptSource::Blocks(blocks), now)
    }

    fn with_source(opts: Opts, source: ScriptSource, now: Duration) -> Result<Self> {
        opts.validate()?;

        let lines: Arc<[ScriptLine]> = source.segment(opts.chunk_word_target).into();
        info!(lines = lines.len(), "session started");

        Ok(Self {
            window: TranscriptWindow::new(opts.look_behind_words),
            differ: TranscriptDiffer::new(),
            matcher: Matcher::new(opts.required_prefix_matches, opts.min_score),
            confirm: ConfirmationMachine::new(&opts),
            position: PositionController::new(
                opts.look_ahead_lines,
                opts.confidence_decay_duration(),
                now,
            ),
            consumed_through: None,
            lines,
            source,
            opts,
        })
    }

    pub fn opts(&self) -> &Opts {
        &self.opts
    }

    /// The segmented script. Shared, read-only.
    pub fn lines(&self) -> &Arc<[ScriptLine]> {
        &self.lines
    }

    pub fn position(&self) -> &PositionState {
        self.position.state()
    }

    pub fn confirm_state(&self) -> &ConfirmState {
        self.confirm.state()
    }

    /// Feed a recognizer update (the full text of the current utterance so far).
    pub fn on_transcript(&mut self, text: &str, now: Duration) -> Step {
        let mut step = Step::empty();

        match self.differ.ingest(text, now, &mut self.window) {
            Err(err) => {
                warn!(%err, "dropping transcript update");
            }
            Ok(ingested) if ingested.appended == 0 && ingested.retracted == 0 => {}
            Ok(ingested) => {
                debug!(
                    appended = ingested.appended,
                    retracted = ingested.retracted,
                    new_utterance = ingested.new_utterance,
                    "transcript updated"
                );
                let best = self.best_candidate(now);
                let transition = self.confirm.on_pass(best, now);
                self.apply(transition, now, &mut step);
            }
        }

        self.finish(step, now)
    }

    /// Deliver a deadline previously returned in [`Step::schedule`].
    pub fn on_deadline(&mut self, deadline: Deadline, now: Duration) -> Step {
        let mut step = Step::empty();

        match self.confirm.on_deadline(deadline, now) {
            Ok(Some(candidate)) => self.commit(candidate, now, &mut step),
            Ok(None) => {}
            Err(err) => debug!(%err, "dropping deadline"),
        }

        self.finish(step, now)
    }

    /// Periodic tick: confidence decay and confirmation expiry.
    pub fn tick(&mut self, now: Duration) -> Step {
        let mut step = Step::empty();
        if let Some(candidate) = self.confirm.expire(now) {
            self.commit(candidate, now, &mut step);
        }
        self.finish(step, now)
    }

    /// The recognizer started a new utterance; diff the next update against nothing.
    pub fn reset_utterance(&mut self) {
        self.differ.reset_utterance();
    }

    /// Replace the script with edited content and re-anchor the cursor.
    pub fn load_script(&mut self, script_text: &str, now: Duration) -> Step {
        self.replace_source(ScriptSource::Text(script_text.to_owned()), now)
    }

    /// Replace the script with edited blocks and re-anchor the cursor.
    pub fn load_blocks<I, S>(&mut self, blocks: I, now: Duration) -> Step
    where
        I: IntoIterator<Item = (SourceBlockId, S)>,
        S: Into<String>,
    {
        let blocks = blocks.into_iter().map(|(id, s)| (id, s.into())).collect();
        self.replace_source(ScriptSource::Blocks(blocks), now)
    }

    /// Apply new options. Invalid options are rejected and the engine keeps its old ones.
    ///
    /// A changed `chunkWordTarget` re-segments the script, which re-anchors the cursor.
    pub fn reconfigure(&mut self, opts: Opts, now: Duration) -> Result<Step> {
        opts.validate()?;

        let resegment = opts.chunk_word_target != self.opts.chunk_word_target;
        self.window.set_capacity(opts.look_behind_words);
        self.matcher = Matcher::new(opts.required_prefix_matches, opts.min_score);
        self.confirm.reconfigure(&opts);
        self.position
            .reconfigure(opts.look_ahead_lines, opts.confidence_decay_duration());
        self.opts = opts;
        info!(opts = ?self.opts, "reconfigured");

        if resegment {
            let source = self.source.clone();
            return Ok(self.replace_source(source, now));
        }
        Ok(self.finish(Step::empty(), now))
    }

    fn replace_source(&mut self, source: ScriptSource, now: Duration) -> Step {
        let lines: Arc<[ScriptLine]> = source.segment(self.opts.chunk_word_target).into();

        let old_index = self.position.state().current_line_index;
        let anchor = self
            .lines
            .get(old_index)
            .and_then(|old| nearest_equal_line(&lines, &old.words, old_index));

        // Words heard against the old script do not count toward the new one.
        self.window.clear();
        self.confirm.cancel();
        let line_index = anchor.unwrap_or(0);
        self.position.reanchor(line_index, anchor.is_some());
        self.lines = lines;
        self.source = source;

        let mut step = Step::empty();
        step.events
            .push(EngineEvent::Reanchored(ScrollTo { line_index }));
        self.finish(step, now)
    }

    fn best_candidate(&mut self, now: Duration) -> Option<MatchCandidate> {
        let range = self.position.search_range(self.lines.len())?;
        let last_committed = self.position.last_committed();
        let watermark = Watermark {
            consumed_through: self.consumed_through,
            committed_line: last_committed,
        };
        let candidates = self
            .matcher
            .score(self.window.snapshot(), &self.lines, range, watermark, now);

        let (held, ahead): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|c| last_committed.is_some_and(|last| c.line_index <= last));
        let ahead = best_candidate(&ahead);

        // Still on a line we already committed, and no later line reads as well: hold position,
        // and mark the words as consumed so a later line has to match on words after them.
        // A tie goes to the later line, which is how a repeated line gets its turn.
        if let Some(hold) = best_candidate(&held) {
            if ahead.is_none_or(|a| hold.score > a.score) {
                debug!(
                    line_index = hold.line_index,
                    score = hold.score,
                    "holding on committed line"
                );
                self.consumed_through = Some(hold.last_word_ordinal);
                return None;
            }
        }

        ahead
    }

    fn apply(&mut self, transition: Transition, now: Duration, step: &mut Step) {
        match transition {
            Transition::None => {}
            Transition::Commit(candidate) => self.commit(candidate, now, step),
            Transition::Schedule(deadline) => step.schedule = Some(deadline),
        }
    }

    fn commit(&mut self, candidate: MatchCandidate, now: Duration, step: &mut Step) {
        // Rejections are logged by the controller.
        if let Ok(scroll) = self.position.on_commit(candidate.line_index, now) {
            debug!(
                line_index = candidate.line_index,
                score = candidate.score,
                latency_ms = now.saturating_sub(candidate.first_seen_at).as_millis() as u64,
                "committed"
            );
            self.consumed_through = Some(candidate.last_word_ordinal);
            step.events.push(EngineEvent::ScrollTo(scroll));
        }
    }

    fn finish(&mut self, mut step: Step, now: Duration) -> Step {
        let confidence = self.position.tick(now);
        step.events.push(EngineEvent::Confidence(confidence));
        step
    }
}

/// Find the line in `lines` with exactly `words`, closest to `near`.
fn nearest_equal_line(lines: &[ScriptLine], words: &[String], near: usize) -> Option<usize> {
    lines
        .iter()
        .filter(|l| l.words == words)
        .min_by_key(|l| l.index.abs_diff(near))
        .map(|l| l.index)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = "tell me about your day\nso anyway I went to the store\nand bought some milk";

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn engine() -> AlignmentEngine {
        AlignmentEngine::new(Opts::default(), SCRIPT, Duration::ZERO).expect("valid engine")
    }

    /// Speak `text` one word at a time, `gap` apart, starting at `start`.
    fn speak(
        engine: &mut AlignmentEngine,
        text: &str,
        start: Duration,
        gap: Duration,
    ) -> Vec<Step> {
        let words: Vec<&str> = text.split_whitespace().collect();
        (1..=words.len())
            .map(|n| engine.on_transcript(&words[..n].join(" "), start + gap * n as u32))
            .collect()
    }

    #[test]
    fn rejects_invalid_configuration() {
        let opts = Opts {
            min_score: -1.0,
            ..Opts::default()
        };
        assert!(AlignmentEngine::new(opts, SCRIPT, Duration::ZERO).is_err());
    }

    #[test]
    fn exact_line_commits_instantly() {
        let mut e = engine();
        let step = e.on_transcript("so anyway i went to the store", ms(100));
        assert_eq!(step.scroll(), Some(ScrollTo { line_index: 1 }));
        assert_eq!(step.schedule, None);
        assert_eq!(e.position().current_line_index, 1);
    }

    #[test]
    fn word_by_word_reading_commits_once() {
        let mut e = engine();
        let steps = speak(&mut e, "so anyway i went to the store", ms(0), ms(100));
        let scrolls: Vec<ScrollTo> = steps.iter().filter_map(Step::scroll).collect();
        assert_eq!(scrolls, vec![ScrollTo { line_index: 1 }]);
        assert_eq!(e.position().current_line_index, 1);
    }

    #[test]
    fn reading_through_consecutive_lines_commits_each_once() {
        let mut e = engine();
        let steps = speak(
            &mut e,
            "so anyway i went to the store and bought some milk",
            ms(0),
            ms(20),
        );
        let scrolls: Vec<ScrollTo> = steps.iter().filter_map(Step::scroll).collect();
        assert_eq!(
            scrolls,
            vec![ScrollTo { line_index: 1 }, ScrollTo { line_index: 2 }]
        );
    }

    #[test]
    fn every_step_reports_confidence() {
        let mut e = engine();
        let step = e.on_transcript("uh", ms(10));
        assert!(matches!(
            step.events.last(),
            Some(EngineEvent::Confidence(_))
        ));
        assert!(e.tick(ms(20)).confidence().is_some());
    }

    #[test]
    fn mid_score_schedules_a_deadline_then_commits() {
        let mut e = engine();
        let step = e.on_transcript("so anyway i", ms(100));
        let deadline = step.schedule.expect("pending confirmation");
        assert_eq!(deadline.at, ms(180));
        assert_eq!(step.scroll(), None);

        let step = e.on_deadline(deadline, ms(180));
        assert_eq!(step.scroll(), Some(ScrollTo { line_index: 1 }));
    }

    #[test]
    fn tick_expires_a_due_confirmation() {
        let mut e = engine();
        e.on_transcript("so anyway i", ms(100));
        assert_eq!(e.tick(ms(150)).scroll(), None);
        assert_eq!(e.tick(ms(200)).scroll(), Some(ScrollTo { line_index: 1 }));
    }

    #[test]
    fn out_of_order_updates_are_ignored() {
        let mut e = engine();
        e.on_transcript("so anyway", ms(200));
        let step = e.on_transcript("so anyway i went to the store", ms(100));
        assert_eq!(step.scroll(), None);
        assert_eq!(e.position().current_line_index, 0);
    }

    #[test]
    fn repeating_the_committed_line_does_not_recommit() {
        let mut e = engine();
        speak(&mut e, "so anyway i went to the store", ms(0), ms(100));
        e.reset_utterance();
        let steps = speak(&mut e, "so anyway i went to the store", ms(1000), ms(100));
        assert!(steps.iter().all(|s| s.scroll().is_none()));
        assert_eq!(e.position().current_line_index, 1);
    }

    #[test]
    fn stale_deadline_after_a_different_commit_is_dropped() {
        let mut e = engine();
        let deadline = e
            .on_transcript("tell me about", ms(100))
            .schedule
            .expect("pending on line 0");

        // Line 1 is read fully before the deadline fires and wins instantly.
        let step = e.on_transcript(
            "tell me about so anyway i went to the store",
            ms(150),
        );
        assert_eq!(step.scroll(), Some(ScrollTo { line_index: 1 }));

        let late = e.on_deadline(deadline, ms(180));
        assert_eq!(late.scroll(), None);
        assert_eq!(e.position().current_line_index, 1);
    }

    #[test]
    fn reload_reanchors_on_matching_content() {
        let mut e = engine();
        speak(&mut e, "so anyway i went to the store", ms(0), ms(100));

        let step = e.load_script(
            "a brand new opening line\ntell me about your day\nso anyway I went to the store\nand bought some milk",
            ms(1000),
        );
        assert_eq!(
            step.events.first(),
            Some(&EngineEvent::Reanchored(ScrollTo { line_index: 2 }))
        );
        assert_eq!(e.position().current_line_index, 2);
        assert_eq!(e.lines().len(), 4);

        let steps = speak(&mut e, "and bought some milk", ms(1100), ms(100));
        let scrolls: Vec<ScrollTo> = steps.iter().filter_map(Step::scroll).collect();
        assert_eq!(scrolls, vec![ScrollTo { line_index: 3 }]);
    }

    #[test]
    fn words_heard_before_a_reload_do_not_match_the_new_script() {
        let mut e = engine();
        e.on_transcript("so anyway i", ms(100));
        e.load_script("so anyway I went to the store\nand bought some milk", ms(150));
        assert_eq!(*e.confirm_state(), ConfirmState::Idle);

        // Only "went" is new; "so anyway i" was heard against the old script.
        let step = e.on_transcript("so anyway i went", ms(600));
        assert_eq!(step.schedule, None);
        assert_eq!(step.scroll(), None);
        assert_eq!(e.tick(ms(2000)).scroll(), None);
        assert_eq!(e.position().current_line_index, 0);
    }

    #[test]
    fn a_repeated_line_commits_on_its_own_reading() {
        let mut e = AlignmentEngine::new(
            Opts::default(),
            "we will rock you\nwe will rock you\nand then we go home",
            Duration::ZERO,
        )
        .expect("valid engine");

        let mut committed = Vec::new();
        let words: Vec<&str> = "we will rock you we will rock you and then"
            .split_whitespace()
            .collect();
        for n in 1..=words.len() {
            let at = ms(200 * n as u64);
            let step = e.on_transcript(&words[..n].join(" "), at);
            committed.extend(step.scroll().map(|s| s.line_index));
            if let Some(deadline) = step.schedule {
                let fired = e.on_deadline(deadline, deadline.at);
                committed.extend(fired.scroll().map(|s| s.line_index));
            }
        }
        assert_eq!(committed, vec![0, 1, 2]);
    }

    #[test]
    fn reload_without_matching_content_returns_to_the_top() {
        let mut e = engine();
        speak(&mut e, "so anyway i went to the store", ms(0), ms(100));
        let step = e.load_script("completely different\nscript content here", ms(1000));
        assert_eq!(
            step.events.first(),
            Some(&EngineEvent::Reanchored(ScrollTo { line_index: 0 }))
        );
        assert_eq!(e.position().current_line_index, 0);
    }

    #[test]
    fn reconfigure_rejects_invalid_options_and_keeps_old_ones() {
        let mut e = engine();
        let bad = Opts {
            look_ahead_lines: 0,
            ..Opts::default()
        };
        assert!(e.reconfigure(bad, ms(10)).is_err());
        assert_eq!(e.opts(), &Opts::default());
    }

    #[test]
    fn reconfigure_with_new_chunk_target_resegments() -> anyhow::Result<()> {
        let mut e = engine();
        let opts = Opts {
            chunk_word_target: 4,
            ..Opts::default()
        };
        let step = e.reconfigure(opts, ms(10))?;
        assert!(matches!(
            step.events.first(),
            Some(EngineEvent::Reanchored(_))
        ));
        // "tell me about your day" (5) and "so anyway i went to the store" (7) split in two.
        assert_eq!(e.lines().len(), 5);
        Ok(())
    }

    #[test]
    fn block_sessions_keep_source_ids() -> anyhow::Result<()> {
        let e = AlignmentEngine::with_blocks(
            Opts::default(),
            [(SourceBlockId(7), "first card"), (SourceBlockId(9), "second card")],
            Duration::ZERO,
        )?;
        let blocks: Vec<SourceBlockId> = e.lines().iter().map(|l| l.source_block).collect();
        assert_eq!(blocks, vec![SourceBlockId(7), SourceBlockId(9)]);
        Ok(())
    }

    #[test]
    fn events_serialize_with_a_type_tag() -> anyhow::Result<()> {
        let json = serde_json::to_string(&EngineEvent::ScrollTo(ScrollTo { line_index: 3 }))?;
        assert_eq!(json, r#"{"type":"scrollTo","lineIndex":3}"#);
        Ok(())
    }
}
