use std::io::Read;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Options that control how the alignment engine tracks a performer through a script.
///
/// This struct represents *library-level configuration*, not CLI flags or a settings store.
/// Hosts construct it (or load it from JSON) and hand it to the engine explicitly:
/// - at construction (`AlignmentEngine::new`, `SessionHandle::start`)
/// - via `AlignmentEngine::reconfigure` when the user changes a setting mid-session
///
/// Field names serialize in camelCase (`instantAcceptScore`, `confirmWindow`, ...). Missing
/// fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct Opts {
    /// Score at or above which a candidate commits on the same scoring pass.
    pub instant_accept_score: f32,

    /// How long (seconds) a mid-confidence candidate must hold before it commits.
    pub confirm_window: f64,

    /// Candidates scoring below this are discarded before they reach the state machine.
    pub min_score: f32,

    /// Minimum number of leading line words that must be heard in order.
    pub required_prefix_matches: usize,

    /// Size of the transcript look-behind window, in words.
    pub look_behind_words: usize,

    /// Number of lines past the current line that are eligible for matching.
    pub look_ahead_lines: usize,

    /// Target words per script chunk.
    pub chunk_word_target: usize,

    /// Time (seconds) for confidence to fall from 1.0 to 0.0 without a commit.
    pub confidence_decay: f64,

    /// Period (seconds) of the session's decay/expiry tick.
    pub tick_interval: f64,
}

impl Opts {
    pub const DEFAULT_INSTANT_ACCEPT_SCORE: f32 = 0.75;
    pub const DEFAULT_CONFIRM_WINDOW_SECS: f64 = 0.08;
    pub const DEFAULT_MIN_SCORE: f32 = 0.32;
    pub const DEFAULT_REQUIRED_PREFIX_MATCHES: usize = 2;
    pub const DEFAULT_LOOK_BEHIND_WORDS: usize = 18;
    pub const DEFAULT_LOOK_AHEAD_LINES: usize = 12;
    pub const DEFAULT_CHUNK_WORD_TARGET: usize = 8;
    pub const DEFAULT_CONFIDENCE_DECAY_SECS: f64 = 4.0;
    pub const DEFAULT_TICK_INTERVAL_SECS: f64 = 0.05;

    /// Parse and validate options from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let opts: Opts = serde_json::from_str(json)?;
        opts.validate()?;
        Ok(opts)
    }

    /// Parse and validate options from a JSON reader (e.g. a config file).
    pub fn from_reader<R: Read>(r: R) -> Result<Self> {
        let opts: Opts = serde_json::from_reader(r)?;
        opts.validate()?;
        Ok(opts)
    }

    /// Check every option; the engine refuses to start with anything this rejects.
    pub fn validate(&self) -> Result<()> {
        check_unit_score("instantAcceptScore", self.instant_accept_score)?;
        check_unit_score("minScore", self.min_score)?;
        if self.min_score > self.instant_accept_score {
            return Err(Error::invalid_config(
                "minScore",
                format!(
                    "{} exceeds instantAcceptScore {}",
                    self.min_score, self.instant_accept_score
                ),
            ));
        }

        secs_to_duration("confirmWindow", self.confirm_window)?;
        check_positive_secs("confidenceDecay", self.confidence_decay)?;
        check_positive_secs("tickInterval", self.tick_interval)?;

        if self.required_prefix_matches == 0 {
            return Err(Error::invalid_config(
                "requiredPrefixMatches",
                "must be at least 1",
            ));
        }
        if self.look_behind_words < self.required_prefix_matches {
            return Err(Error::invalid_config(
                "lookBehindWords",
                format!(
                    "{} is smaller than requiredPrefixMatches {}",
                    self.look_behind_words, self.required_prefix_matches
                ),
            ));
        }
        if self.look_ahead_lines == 0 {
            return Err(Error::invalid_config("lookAheadLines", "must be at least 1"));
        }
        if self.chunk_word_target == 0 {
            return Err(Error::invalid_config("chunkWordTarget", "must be at least 1"));
        }

        Ok(())
    }

    /// `confirm_window` as a `Duration`. Only meaningful on validated options.
    pub fn confirm_window_duration(&self) -> Duration {
        secs_to_nanos(self.confirm_window).unwrap_or_default()
    }

    /// `confidence_decay` as a `Duration`. Only meaningful on validated options.
    pub fn confidence_decay_duration(&self) -> Duration {
        secs_to_nanos(self.confidence_decay).unwrap_or_default()
    }

    /// `tick_interval` as a `Duration`. Only meaningful on validated options.
    pub fn tick_interval_duration(&self) -> Duration {
        secs_to_nanos(self.tick_interval).unwrap_or_default()
    }
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            instant_accept_score: Self::DEFAULT_INSTANT_ACCEPT_SCORE,
            confirm_window: Self::DEFAULT_CONFIRM_WINDOW_SECS,
            min_score: Self::DEFAULT_MIN_SCORE,
            required_prefix_matches: Self::DEFAULT_REQUIRED_PREFIX_MATCHES,
            look_behind_words: Self::DEFAULT_LOOK_BEHIND_WORDS,
            look_ahead_lines: Self::DEFAULT_LOOK_AHEAD_LINES,
            chunk_word_target: Self::DEFAULT_CHUNK_WORD_TARGET,
            confidence_decay: Self::DEFAULT_CONFIDENCE_DECAY_SECS,
            tick_interval: Self::DEFAULT_TICK_INTERVAL_SECS,
        }
    }
}

fn check_unit_score(field: &'static str, value: f32) -> Result<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(Error::invalid_config(
            field,
            format!("{value} is outside [0, 1]"),
        ));
    }
    Ok(())
}

/// Convert seconds to a `Duration`, rounding to the nearest nanosecond so decimal settings like
/// `0.08` land on exact millisecond values.
fn secs_to_nanos(secs: f64) -> Option<Duration> {
    let nanos = (secs * 1e9).round();
    if !nanos.is_finite() || nanos < 0.0 || nanos > u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(nanos as u64))
}

fn secs_to_duration(field: &'static str, secs: f64) -> Result<Duration> {
    secs_to_nanos(secs)
        .ok_or_else(|| Error::invalid_config(field, format!("{secs} is not a valid duration")))
}

fn check_positive_secs(field: &'static str, secs: f64) -> Result<()> {
    if secs_to_duration(field, secs)?.is_zero() {
        return Err(Error::invalid_config(field, "must be greater than zero"));
    }
    Ok(())
}
