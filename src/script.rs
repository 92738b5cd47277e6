//! Script segmentation.
//!
//! A performance script is turned into an ordered list of short [`ScriptLine`] chunks. These are
//! the match candidates: small enough that a few spoken words cover a meaningful share of a line,
//! large enough that natural phrases stay together.
//!
//! Segmentation is deterministic. Re-segmenting edited content produces a brand new list whose
//! indices have no relation to the old one; the engine re-anchors the cursor when that happens.

use serde::Serialize;

use crate::normalize::tokenize;

/// Opaque reference back to the script unit a line came from.
///
/// For plain text this is the 0-based source line number. Hosts with their own document model
/// pass their block ids through [`segment_blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SourceBlockId(pub u64);

/// One match candidate. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptLine {
    /// 0-based position in the segmented script.
    pub index: usize,

    /// Normalized tokens, never empty.
    pub words: Vec<String>,

    /// The script unit this chunk was cut from.
    pub source_block: SourceBlockId,
}

impl ScriptLine {
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Segment plain script text, one source block per text line.
///
/// Blank (or punctuation-only) lines produce no chunks but still consume a block id, so block ids
/// always equal the source line number.
pub fn segment(script_text: &str, chunk_word_target: usize) -> Vec<ScriptLine> {
    segment_blocks(
        script_text
            .lines()
            .enumerate()
            .map(|(n, line)| (SourceBlockId(n as u64), line)),
        chunk_word_target,
    )
}

/// Segment pre-split script blocks supplied by a host document model.
///
/// Each block is split on its own line breaks first, then every line longer than
/// `chunk_word_target` words is cut at word boundaries into near-equal chunks.
pub fn segment_blocks<'a, I>(blocks: I, chunk_word_target: usize) -> Vec<ScriptLine>
where
    I: IntoIterator<Item = (SourceBlockId, &'a str)>,
{
    let target = chunk_word_target.max(1);
    let mut lines = Vec::new();

    for (block, text) in blocks {
        for raw_line in text.lines() {
            let words = tokenize(raw_line);
            for chunk in balanced_chunks(words, target) {
                lines.push(ScriptLine {
                    index: lines.len(),
                    words: chunk,
                    source_block: block,
                });
            }
        }
    }

    lines
}

/// Split `words` into `ceil(n / target)` chunks whose sizes differ by at most one.
///
/// Balancing avoids leaving a one-word tail chunk, which could never reach the required prefix
/// run on its own.
fn balanced_chunks(words: Vec<String>, target: usize) -> Vec<Vec<String>> {
    let n = words.len();
    if n == 0 {
        return Vec::new();
    }
    if n <= target {
        return vec![words];
    }

    let chunks = n.div_ceil(target);
    let base = n / chunks;
    let extra = n % chunks;

    let mut out = Vec::with_capacity(chunks);
    let mut rest = words.into_iter();
    for i in 0..chunks {
        // The first `extra` chunks take one more word.
        let size = base + usize::from(i < extra);
        out.push(rest.by_ref().take(size).collect());
    }
    out
}
