//! The parse ladder (§4.6): six strategies, first success wins. Pre-parse
//! escape repair runs before strategies 1-5; plain-text wrap (strategy 6)
//! is reserved for callers that opt in (reply generation only).

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("static regex"));
static FENCED_BARE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```\s*(.*?)\s*```").expect("static regex"));
static GREEDY_BRACES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("static regex"));

/// Collapses invalid JSON escape sequences: a backslash followed by any
/// character not in `{",\\,/,b,f,n,r,t,u}` drops the backslash.
pub fn repair_escapes(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some(&next) if matches!(next, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' | 'u') => {
                out.push(c);
                out.push(next);
                chars.next();
            }
            Some(&next) => {
                out.push(next);
                chars.next();
            }
            None => out.push(c),
        }
    }
    out
}

fn try_parse(candidate: &str) -> Option<Value> {
    serde_json::from_str(candidate).ok()
}

/// Strategy 5: scan character by character tracking brace depth and string
/// context (escape-aware), collecting every top-level `{...}` region.
fn stack_candidates(raw: &str) -> Vec<&str> {
    let mut candidates = Vec::new();
    let mut depth: i32 = 0;
    let mut start = None;
    let mut in_string = false;
    let mut escape = false;

    for (i, c) in raw.char_indices() {
        if in_string {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        candidates.push(&raw[s..=i]);
                    }
                } else if depth < 0 {
                    depth = 0;
                }
            }
            _ => {}
        }
    }
    candidates
}

/// Outcome of running the ladder: the parsed value, and whether it came
/// from the plain-text wrap fallback.
pub struct LadderOutcome {
    pub value: Value,
    pub wrapped: bool,
}

/// Runs the parse ladder. `allow_wrap` gates strategy 6 (plain-text wrap),
/// which only applies to reply generation per §4.6.
pub fn run_ladder(raw: &str, allow_wrap: bool, wrap_threshold: usize) -> Option<LadderOutcome> {
    let repaired = repair_escapes(raw);

    if let Some(value) = try_parse(&repaired) {
        return Some(LadderOutcome { value, wrapped: false });
    }

    if let Some(captures) = FENCED_JSON.captures(&repaired) {
        if let Some(value) = try_parse(&captures[1]) {
            return Some(LadderOutcome { value, wrapped: false });
        }
    }

    if let Some(captures) = FENCED_BARE.captures(&repaired) {
        if let Some(value) = try_parse(&captures[1]) {
            return Some(LadderOutcome { value, wrapped: false });
        }
    }

    if let Some(matched) = GREEDY_BRACES.find(&repaired) {
        if let Some(value) = try_parse(matched.as_str()) {
            return Some(LadderOutcome { value, wrapped: false });
        }
    }

    for candidate in stack_candidates(&repaired) {
        if let Some(value) = try_parse(candidate) {
            return Some(LadderOutcome { value, wrapped: false });
        }
    }

    if allow_wrap {
        let trimmed = raw.trim();
        if trimmed.len() < wrap_threshold && !trimmed.contains('{') {
            let wrapped = serde_json::json!({
                "replies": [{ "text": trimmed, "strategy": "direct_response" }]
            });
            return Some(LadderOutcome { value: wrapped, wrapped: true });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repair_escapes_drops_backslash_before_unrecognized_char() {
        let raw = r#"{"text": "a \[b\] c"}"#;
        let repaired = repair_escapes(raw);
        assert_eq!(repaired, r#"{"text": "a [b] c"}"#);
    }

    #[test]
    fn repair_escapes_keeps_recognized_sequences() {
        let raw = r#"{"text": "line\nbreak"}"#;
        assert_eq!(repair_escapes(raw), raw);
    }

    #[test]
    fn direct_parse_wins_when_valid() {
        let outcome = run_ladder(r#"{"a":1}"#, false, 500).unwrap();
        assert!(!outcome.wrapped);
        assert_eq!(outcome.value["a"], 1);
    }

    #[test]
    fn fenced_json_block_is_extracted() {
        let raw = "here is the result:\n```json\n{\"a\":2}\n```\nthanks";
        let outcome = run_ladder(raw, false, 500).unwrap();
        assert_eq!(outcome.value["a"], 2);
    }

    #[test]
    fn bare_fence_is_extracted_when_no_json_tag() {
        let raw = "```\n{\"a\":3}\n```";
        let outcome = run_ladder(raw, false, 500).unwrap();
        assert_eq!(outcome.value["a"], 3);
    }

    #[test]
    fn greedy_braces_extract_trailing_chatter() {
        let raw = "Sure! {\"a\":4} hope that helps";
        let outcome = run_ladder(raw, false, 500).unwrap();
        assert_eq!(outcome.value["a"], 4);
    }

    #[test]
    fn stack_based_extraction_finds_first_valid_top_level_object() {
        let raw = "noise { not json } then {\"a\":5} trailing";
        let outcome = run_ladder(raw, false, 500).unwrap();
        assert_eq!(outcome.value["a"], 5);
    }

    #[test]
    fn plain_text_wrap_only_applies_when_allowed() {
        let raw = "好的，我明白了。";
        assert!(run_ladder(raw, false, 500).is_none());

        let outcome = run_ladder(raw, true, 500).unwrap();
        assert!(outcome.wrapped);
        assert_eq!(outcome.value["replies"][0]["text"], raw);
        assert_eq!(outcome.value["replies"][0]["strategy"], "direct_response");
    }

    #[test]
    fn plain_text_wrap_does_not_apply_above_threshold_or_with_braces() {
        assert!(run_ladder("short but has a { brace", true, 500).is_none());
        let long_text = "x".repeat(600);
        assert!(run_ladder(&long_text, true, 500).is_none());
    }
}
