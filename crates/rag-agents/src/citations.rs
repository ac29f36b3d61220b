//! Citation diagnostics for generated answers.
//!
//! Answers cite sources positionally as `[Source N]`. These checks only
//! annotate a validation result; they never decide whether an answer is valid.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// `[Source 3]`, `[source  12]`
    static ref SOURCE_MARKER: Regex = Regex::new(r"(?i)\[source\s+(\d+)\]").unwrap();
}

/// Source numbers cited in `answer`, in order of first appearance
pub fn cited_sources(answer: &str) -> Vec<u64> {
    let mut seen = Vec::new();
    for caps in SOURCE_MARKER.captures_iter(answer) {
        let n = caps[1].parse::<u64>().unwrap_or(u64::MAX);
        if !seen.contains(&n) {
            seen.push(n);
        }
    }
    seen
}

/// Notes about dangling markers (0 or beyond `source_count`) and about an
/// answer that cites nothing although sources were supplied.
pub fn check(answer: &str, source_count: usize) -> Vec<String> {
    let cited = cited_sources(answer);
    let mut notes = Vec::new();

    let dangling: Vec<String> = cited
        .iter()
        .filter(|&&n| n == 0 || n > source_count as u64)
        .map(|n| {
            if *n == u64::MAX {
                "out-of-range".to_string()
            } else {
                n.to_string()
            }
        })
        .collect();
    if !dangling.is_empty() {
        notes.push(format!(
            "cites missing source(s) {} of {}",
            dangling.join(", "),
            source_count
        ));
    }

    if cited.is_empty() && source_count > 0 {
        notes.push(format!("no citations although {} source(s) were provided", source_count));
    }

    notes
}
