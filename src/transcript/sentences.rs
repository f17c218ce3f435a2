//! Sentence boundary handling shared by the assembler and the detector.

use once_cell::sync::Lazy;
use regex::Regex;

/// A complete sentence: text up to terminal punctuation, optionally
/// followed by closing quotes or brackets.
pub static SENTENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[^.!?]+[.!?]+(?:["')\]]+)?"#).expect("sentence regex"));

/// Split `text` into complete sentences plus a trailing carryover with no
/// sentence terminator.
pub fn split_complete(text: &str) -> (Vec<String>, String) {
    let mut sentences = Vec::new();
    let mut consumed = 0;
    for m in SENTENCE_RE.find_iter(text) {
        let sentence = m.as_str().trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
        consumed = m.end();
    }
    let carryover = text[consumed..].trim().to_string();
    (sentences, carryover)
}

/// Split `text` into sentence-shaped pieces, keeping an unterminated tail
/// as a final piece.
pub fn split_all(text: &str) -> Vec<String> {
    let (mut sentences, carryover) = split_complete(text);
    if !carryover.is_empty() {
        sentences.push(carryover);
    }
    sentences
}

/// True when the text contains at least one complete sentence boundary.
pub fn has_boundary(text: &str) -> bool {
    SENTENCE_RE.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_terminated_sentences() {
        let (sentences, tail) = split_complete("First one. Second one! And a tail");
        assert_eq!(sentences, vec!["First one.", "Second one!"]);
        assert_eq!(tail, "And a tail");
    }

    #[test]
    fn keeps_closing_quotes_with_the_sentence() {
        let (sentences, tail) = split_complete(r#"He said "stop." Then left"#);
        assert_eq!(sentences, vec![r#"He said "stop.""#]);
        assert_eq!(tail, "Then left");
    }

    #[test]
    fn no_boundary_is_all_carryover() {
        let (sentences, tail) = split_complete("no punctuation here");
        assert!(sentences.is_empty());
        assert_eq!(tail, "no punctuation here");
    }

    #[test]
    fn split_all_includes_unterminated_tail() {
        let pieces = split_all("Done. half finished");
        assert_eq!(pieces, vec!["Done.", "half finished"]);
    }

    #[test]
    fn question_and_exclamation_runs_stay_attached() {
        let (sentences, tail) = split_complete("Really?! Yes. next");
        assert_eq!(sentences, vec!["Really?!", "Yes."]);
        assert_eq!(tail, "next");
    }

    #[test]
    fn empty_input_yields_nothing() {
        let (sentences, tail) = split_complete("");
        assert!(sentences.is_empty());
        assert!(tail.is_empty());
        assert!(!has_boundary(""));
    }

    #[test]
    fn boundary_detection_matches_splitting() {
        assert!(has_boundary("It ends here. Leftover"));
        assert!(!has_boundary("still going with no terminator"));
    }
}
