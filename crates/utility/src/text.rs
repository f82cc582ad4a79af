use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};

lazy_static! {
    static ref NBSP_AFFIX: Regex = RegexBuilder::new(r"^(?:&nbsp;)+|(?:&nbsp;)+$")
        .case_insensitive(true)
        .build()
        .unwrap();
}

/// Trims whitespace and repeated `&nbsp;` entities from both ends.
pub fn trim(s: &str) -> String {
    NBSP_AFFIX.replace_all(s.trim(), "").trim().to_owned()
}

/// Lowercases the string and upper-cases the first letter of each word.
/// A word starts at the beginning of the string or after a non-word character.
pub fn camel_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars().flat_map(|c| c.to_lowercase()) {
        let is_word_char = c.is_alphanumeric() || c == '_';
        if at_word_start && is_word_char {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = !is_word_char;
    }
    out
}

/// Returns the block starting at the first occurrence of `begin` (inclusive)
/// and ending just before the first occurrence of `end` after it (exclusive).
/// Empty if either marker is missing.
pub fn extract_block(s: &str, begin: &str, end: &str) -> String {
    let Some(start) = s.find(begin) else {
        return String::new();
    };
    let search_from = start + begin.len();
    match s[search_from..].find(end) {
        Some(relative_end) => s[start..search_from + relative_end].to_owned(),
        None => String::new(),
    }
}

pub fn split_skip_empty_parts(s: &str, separator: &str) -> Vec<String> {
    s.split(separator)
        .filter(|part| !part.is_empty())
        .map(|part| part.to_owned())
        .collect()
}
