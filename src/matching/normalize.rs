// src/matching/normalize.rs
use once_cell::sync::Lazy;
use regex::Regex;

/// Status markers that registries and exports append to names. They carry no
/// identity and must not block an exact match.
pub const NOISE_MARKERS: [&str; 3] = ["inactive", "deprecated", "closed"];

static NOISE_REGEX: Lazy<Regex> = Lazy::new(|| {
    let pattern = format!(r"(?i)\(\s*(?:{})\s*\)", NOISE_MARKERS.join("|"));
    Regex::new(&pattern).expect("noise marker pattern is valid")
});

static WHITESPACE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// Exact-match normalization: strip noise markers, collapse whitespace, trim.
/// Case is preserved.
pub fn normalize_exact(value: &str) -> String {
    let stripped = NOISE_REGEX.replace_all(value, " ");
    WHITESPACE_REGEX
        .replace_all(stripped.trim(), " ")
        .into_owned()
}

/// Fuzzy-match folding: exact normalization, then lowercase with punctuation
/// turned into word breaks.
pub fn normalize_fuzzy(value: &str) -> String {
    let exact = normalize_exact(value).to_lowercase().replace('&', " and ");
    let folded: String = exact
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}
