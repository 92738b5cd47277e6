//! Deterministic replay of a recorded recognizer session.
//!
//! A replay file is JSON lines, one entry per line, each stamped with milliseconds since session
//! start:
//!
//! ```text
//! {"atMs": 0,    "text": "four score"}
//! {"atMs": 120,  "text": "four score and seven"}
//! {"atMs": 900,  "reset": true}
//! {"atMs": 2400, "script": "New opening line\nSecond line"}
//! ```
//!
//! Entries carry exactly one of `text` (a recognizer update), `script` (replace the script) or
//! `reset: true` (the recognizer began a new utterance). Blank lines are ignored.
//!
//! The driver runs the engine on a simulated clock: ticks and confirmation deadlines fire at
//! their own timestamps, interleaved with the entries, so the output does not depend on how fast
//! the machine is.

use std::io::BufRead;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::{AlignmentEngine, EngineEvent, Step};
use crate::session::Timers;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayAction {
    Transcript(String),
    LoadScript(String),
    ResetUtterance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayEntry {
    pub at: Duration,
    pub action: ReplayAction,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawEntry {
    at_ms: u64,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    script: Option<String>,
    #[serde(default)]
    reset: bool,
}

impl RawEntry {
    fn into_entry(self, line: usize) -> Result<ReplayEntry> {
        let action = match (self.text, self.script, self.reset) {
            (Some(text), None, false) => ReplayAction::Transcript(text),
            (None, Some(script), false) => ReplayAction::LoadScript(script),
            (None, None, true) => ReplayAction::ResetUtterance,
            _ => {
                return Err(Error::Replay {
                    line,
                    message: "expected exactly one of `text`, `script` or `reset`".into(),
                });
            }
        };

        Ok(ReplayEntry {
            at: Duration::from_millis(self.at_ms),
            action,
        })
    }
}

/// Parse a JSON-lines replay. Errors carry the 1-based line number.
pub fn read_replay<R: BufRead>(r: R) -> Result<Vec<ReplayEntry>> {
    let mut entries = Vec::new();
    for (idx, line) in r.lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let raw: RawEntry = serde_json::from_str(trimmed).map_err(|e| Error::Replay {
            line: line_no,
            message: e.to_string(),
        })?;
        entries.push(raw.into_entry(line_no)?);
    }
    Ok(entries)
}

/// An engine event with the simulated time it was produced at.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimedEvent {
    pub at_ms: u64,
    pub event: EngineEvent,
}

/// Drive `engine` through `entries`, then keep the clock running for `drain` so pending
/// confirmations resolve and confidence decays.
///
/// The engine should have been created at time zero.
pub fn replay(
    engine: &mut AlignmentEngine,
    entries: &[ReplayEntry],
    drain: Duration,
) -> Vec<TimedEvent> {
    let mut timers = Timers::simulated(engine.opts().tick_interval_duration(), Duration::ZERO);
    let mut out = Vec::new();
    let mut clock = Duration::ZERO;

    for entry in entries {
        fire_due(engine, &mut timers, entry.at, &mut out);
        clock = clock.max(entry.at);

        let step = match &entry.action {
            ReplayAction::Transcript(text) => engine.on_transcript(text, entry.at),
            ReplayAction::LoadScript(text) => {
                timers.cancel_deadline();
                engine.load_script(text, entry.at)
            }
            ReplayAction::ResetUtterance => {
                engine.reset_utterance();
                continue;
            }
        };
        record(&mut timers, &mut out, entry.at, step);
    }

    fire_due(engine, &mut timers, clock + drain, &mut out);
    debug!(entries = entries.len(), events = out.len(), "replay finished");
    out
}

fn fire_due(
    engine: &mut AlignmentEngine,
    timers: &mut Timers,
    until: Duration,
    out: &mut Vec<TimedEvent>,
) {
    while let Some(timer) = timers.pop_due(until) {
        let at = timer.at();
        let step = timer.fire(engine, at);
        record(timers, out, at, step);
    }
}

fn record(timers: &mut Timers, out: &mut Vec<TimedEvent>, at: Duration, step: Step) {
    timers.observe(&step);
    let at_ms = u64::try_from(at.as_millis()).unwrap_or(u64::MAX);
    out.extend(
        step.events
            .into_iter()
            .map(|event| TimedEvent { at_ms, event }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opts::Opts;

    fn scrolls(events: &[TimedEvent]) -> Vec<(u64, usize)> {
        events
            .iter()
            .filter_map(|e| match e.event {
                EngineEvent::ScrollTo(s) => Some((e.at_ms, s.line_index)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn parses_each_entry_kind_and_skips_blank_lines() -> anyhow::Result<()> {
        let input = r#"{"atMs": 0, "text": "hello there"}

{"atMs": 40, "reset": true}
{"atMs": 90, "script": "one two\nthree four"}
"#;
        let entries = read_replay(input.as_bytes())?;
        assert_eq!(
            entries,
            vec![
                ReplayEntry {
                    at: Duration::ZERO,
                    action: ReplayAction::Transcript("hello there".into()),
                },
                ReplayEntry {
                    at: Duration::from_millis(40),
                    action: ReplayAction::ResetUtterance,
                },
                ReplayEntry {
                    at: Duration::from_millis(90),
                    action: ReplayAction::LoadScript("one two\nthree four".into()),
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn malformed_lines_report_their_line_number() {
        let input = "{\"atMs\": 0, \"text\": \"a\"}\n{\"atMs\": \"soon\"}\n";
        let err = read_replay(input.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Replay { line: 2, .. }), "{err:?}");
    }

    #[test]
    fn entries_need_exactly_one_action() {
        let input = r#"{"atMs": 0, "text": "a", "script": "b"}"#;
        let err = read_replay(input.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::Replay { line: 1, .. }), "{err:?}");

        let input = r#"{"atMs": 0}"#;
        assert!(read_replay(input.as_bytes()).is_err());
    }

    #[test]
    fn pending_confirmation_resolves_at_its_deadline() -> anyhow::Result<()> {
        let script = "tell me about your day\nso anyway I went to the store";
        let mut engine = AlignmentEngine::new(Opts::default(), script, Duration::ZERO)?;
        // Three of seven words on line 1 scores 0.43: confirming, not instant.
        let entries = vec![ReplayEntry {
            at: Duration::from_millis(100),
            action: ReplayAction::Transcript("so anyway i".into()),
        }];

        let events = replay(&mut engine, &entries, Duration::from_millis(200));
        assert_eq!(scrolls(&events), vec![(180, 1)]);
        Ok(())
    }

    #[test]
    fn ticks_report_confidence_on_the_simulated_clock() -> anyhow::Result<()> {
        let mut engine = AlignmentEngine::new(Opts::default(), "one two three", Duration::ZERO)?;
        let events = replay(&mut engine, &[], Duration::from_millis(120));
        let stamps: Vec<u64> = events.iter().map(|e| e.at_ms).collect();
        assert_eq!(stamps, vec![50, 100]);
        assert!(
            events
                .iter()
                .all(|e| matches!(e.event, EngineEvent::Confidence(_)))
        );
        Ok(())
    }

    #[test]
    fn timed_events_serialize_with_camel_case_keys() -> anyhow::Result<()> {
        let ev = TimedEvent {
            at_ms: 250,
            event: EngineEvent::ScrollTo(crate::position::ScrollTo { line_index: 2 }),
        };
        assert_eq!(
            serde_json::to_string(&ev)?,
            r#"{"atMs":250,"event":{"type":"scrollTo","lineIndex":2}}"#
        );
        Ok(())
    }
}
