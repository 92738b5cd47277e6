//! Ingestion-time token normalization.
//!
//! Script text and recognizer output go through the same function exactly once, when they enter
//! the engine, so every later comparison is a plain string equality:
//! - lower-case
//! - punctuation stripped (`don't` → `dont`, `store.` → `store`)
//! - dashes and slashes separate words (`well-known` → `well`, `known`)
//! - whitespace collapsed

/// Split `text` into normalized word tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        if ch.is_alphanumeric() {
            current.extend(ch.to_lowercase());
        } else if is_separator(ch) {
            flush(&mut words, &mut current);
        }
        // Anything else is punctuation inside a word and is dropped.
    }
    flush(&mut words, &mut current);

    words
}

fn is_separator(ch: char) -> bool {
    ch.is_whitespace() || matches!(ch, '-' | '–' | '—' | '/' | '\\' | '_')
}

fn flush(words: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        words.push(std::mem::take(current));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_strips_punctuation() {
        assert_eq!(
            tokenize("So, anyway... I went to the STORE!"),
            vec!["so", "anyway", "i", "went", "to", "the", "store"]
        );
    }

    #[test]
    fn apostrophes_join_and_dashes_split() {
        assert_eq!(
            tokenize("Don't  stop—it's well-known"),
            vec!["dont", "stop", "its", "well", "known"]
        );
    }

    #[test]
    fn blank_and_punctuation_only_input_yields_nothing() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("  \t\n ").is_empty());
        assert!(tokenize("... !? --").is_empty());
    }

    #[test]
    fn keeps_digits_and_non_ascii_letters() {
        assert_eq!(tokenize("Café No. 9"), vec!["café", "no", "9"]);
    }
}
