//! Tokenization shared by the index and the reranker
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, HashSet};

lazy_static! {
    /// Runs of letters and digits
    static ref TERM: Regex = Regex::new(r"[\p{L}\p{N}]+").unwrap();

    /// Function words that carry no retrieval signal
    static ref STOPWORDS: HashSet<&'static str> = [
        "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from",
        "how", "i", "if", "in", "is", "it", "me", "my", "of", "on", "or", "the", "this", "to",
        "what", "when", "where", "which", "with", "you", "your",
    ]
    .into_iter()
    .collect();
}

/// Lower-cased content terms of `text`, in order, stopwords removed.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    TERM.find_iter(&lowered)
        .map(|m| m.as_str())
        .filter(|t| !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

pub fn term_frequencies(text: &str) -> HashMap<String, f32> {
    let mut tf = HashMap::new();
    for term in tokenize(text) {
        *tf.entry(term).or_insert(0.0) += 1.0;
    }
    tf
}

pub fn norm(tf: &HashMap<String, f32>) -> f32 {
    tf.values().map(|v| v * v).sum::<f32>().sqrt()
}

/// Cosine similarity of two term-frequency vectors, 0 when either is empty
pub fn cosine(a: &HashMap<String, f32>, b: &HashMap<String, f32>) -> f32 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f32 = small
        .iter()
        .filter_map(|(term, x)| large.get(term).map(|y| x * y))
        .sum();
    let denom = norm(a) * norm(b);
    if denom == 0.0 {
        0.0
    } else {
        (dot / denom).clamp(0.0, 1.0)
    }
}
