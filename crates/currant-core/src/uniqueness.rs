//! Name-based distinctiveness of a test within a testset.
//!
//! Names are split into word tokens, synonyms are folded together, and every
//! name becomes a token frequency vector over the batch vocabulary. A name's
//! uniqueness is its mean cosine dissimilarity to every other name.

use std::collections::{BTreeMap, BTreeSet, HashMap};

const TEST_SYNONYMS: &[&str] = &[
    "tests",
    "testing",
    "tester",
    "assert",
    "asserting",
    "check",
    "assess",
    "checking",
];

const EQUAL_SYNONYMS: &[&str] = &["equally", "same", "equivalent", "equals"];

const ERROR_SYNONYMS: &[&str] = &[
    "fail",
    "failure",
    "exception",
    "invalid",
    "fault",
    "faulty",
    "flaw",
    "mistake",
    "wrong",
    "incorrect",
    "miss",
];

/// Uniqueness score per distinct name. Input order does not matter.
pub fn uniqueness_scores<S: AsRef<str>>(names: &[S]) -> HashMap<String, f64> {
    let unique: BTreeSet<&str> = names.iter().map(|n| n.as_ref()).collect();

    let tokens: BTreeMap<&str, Vec<String>> =
        unique.iter().map(|n| (*n, canonical_tokens(n))).collect();

    let vocabulary: BTreeSet<&str> = tokens
        .values()
        .flat_map(|t| t.iter().map(String::as_str))
        .collect();

    let vectors: BTreeMap<&str, Vec<f64>> = tokens
        .iter()
        .map(|(name, toks)| {
            let v = vocabulary
                .iter()
                .map(|word| toks.iter().filter(|t| t.as_str() == *word).count() as f64)
                .collect();
            (*name, v)
        })
        .collect();

    let count = vectors.len();
    let mut out = HashMap::with_capacity(count);
    for (name, v1) in &vectors {
        let sum: f64 = vectors
            .iter()
            .filter(|(other, _)| *other != name)
            .map(|(_, v2)| 1.0 - cosine_similarity(v1, v2))
            .sum();
        let score = if count > 2 {
            sum / (count as f64 - 1.0)
        } else {
            sum
        };
        out.insert(name.to_string(), score);
    }
    out
}

/// Lowercased word tokens with synonyms folded and empties removed.
pub fn canonical_tokens(name: &str) -> Vec<String> {
    split_words(name)
        .into_iter()
        .map(|t| canonicalize(&t.to_lowercase()))
        .filter(|t| !t.is_empty())
        .collect()
}

fn canonicalize(token: &str) -> String {
    if TEST_SYNONYMS.contains(&token) || token.contains("test") {
        return "test".to_string();
    }
    if EQUAL_SYNONYMS.contains(&token) {
        return "equal".to_string();
    }
    if ERROR_SYNONYMS.contains(&token) {
        return "error".to_string();
    }
    token.to_string()
}

/// Splits at camelCase humps, letter/digit transitions, `_` and `.`.
///
/// `parseHTTPResponse2xx` -> `parse`, `HTTP`, `Response`, `2`, `xx`.
pub fn split_words(name: &str) -> Vec<String> {
    let chars: Vec<char> = name.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if c == '_' || c == '.' {
            words.push(std::mem::take(&mut current));
            continue;
        }
        if i > 0 && is_boundary(chars[i - 1], c, chars.get(i + 1).copied()) {
            words.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    words.push(current);
    words.retain(|w| !w.is_empty());
    words
}

fn is_boundary(prev: char, c: char, next: Option<char>) -> bool {
    let upper_or_digit = |x: char| x.is_ascii_uppercase() || x.is_ascii_digit();

    // lower (or other) -> Upper/digit
    if upper_or_digit(c) && !upper_or_digit(prev) {
        return true;
    }
    // UPPER -> digit
    if c.is_ascii_digit() && prev.is_ascii_uppercase() {
        return true;
    }
    // digit -> letter
    if c.is_ascii_alphabetic() && prev.is_ascii_digit() {
        return true;
    }
    // end of an acronym: "HTTPResponse" splits before "Re"
    c.is_ascii_uppercase() && next.is_some_and(|n| n.is_ascii_lowercase())
}

/// Cosine of two equally sized vectors; 0.0 when either has zero norm.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_camel_case_digits_and_separators() {
        assert_eq!(split_words("testAddItem"), vec!["test", "Add", "Item"]);
        assert_eq!(
            split_words("test_case_number12Package"),
            vec!["test", "case", "number", "12", "Package"]
        );
        assert_eq!(
            split_words("com.acme.parseHTTPResponse2xx"),
            vec!["com", "acme", "parse", "HTTP", "Response", "2", "xx"]
        );
        assert_eq!(split_words("ABC12"), vec!["ABC", "12"]);
    }

    #[test]
    fn folds_synonyms() {
        assert_eq!(
            canonical_tokens("checkSameWhenFailure"),
            vec!["test", "equal", "when", "error"]
        );
        assert_eq!(canonical_tokens("MyTestsuite"), vec!["my", "test"]);
        assert_eq!(canonical_tokens("__"), Vec::<String>::new());
    }

    #[test]
    fn shared_prefix_halves_similarity() {
        let scores = uniqueness_scores(&["testA", "testB", "testC"]);
        // all three reduce to [test, x] with distinct x: cosine 0.5 each pair
        for v in scores.values() {
            assert!((v - 0.5).abs() < 1e-12);
        }
    }

    #[test]
    fn two_names_use_raw_sum() {
        let scores = uniqueness_scores(&["alphaOne", "betaTwo"]);
        assert_eq!(scores["alphaOne"], 1.0);
        assert_eq!(scores["betaTwo"], 1.0);
    }

    #[test]
    fn single_name_scores_zero() {
        let scores = uniqueness_scores(&["testLogin"]);
        assert_eq!(scores["testLogin"], 0.0);
    }

    #[test]
    fn order_independent() {
        let a = uniqueness_scores(&["testAdd", "testSubtract", "loginWorks", "testAddTwice"]);
        let b = uniqueness_scores(&["testAddTwice", "loginWorks", "testSubtract", "testAdd"]);
        assert_eq!(a, b);
    }

    #[test]
    fn more_distinct_names_score_higher() {
        let s = uniqueness_scores(&["testAddOne", "testAddTwo", "renderChart"]);
        assert!(s["renderChart"] > s["testAddOne"]);
    }

    #[test]
    fn cosine_zero_norm_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-12);
    }
}
