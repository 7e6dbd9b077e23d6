//! Text canonicalization, shingling and content hashing.
//!
//! Every value that enters the store, and every query value, goes through
//! [`canonicalize`] so exact comparisons and token statistics agree.

use sha2::{Digest, Sha256};
use smallvec::SmallVec;

/// Length of a shingle in characters.
pub const SHINGLE_LEN: usize = 3;

const ID_SEPARATOR: u8 = 0x1f;

/// Shingles of a single token. Short tokens produce one or two shingles.
pub type Shingles = SmallVec<[String; 4]>;

/// Fold ASCII letters to upper case, drop everything that is not an ASCII
/// letter, digit, space or tab, then trim surrounding whitespace.
pub fn canonicalize(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter_map(|c| match c {
            'a'..='z' => Some(c.to_ascii_uppercase()),
            'A'..='Z' | '0'..='9' | ' ' | '\t' => Some(c),
            _ => None,
        })
        .collect();
    cleaned.trim().to_string()
}

/// Split a raw line on `delimiter` and canonicalize each cell.
///
/// Lines shorter than `width` are padded with empty trailing cells.
pub fn split_line(line: &str, delimiter: char, width: usize) -> Vec<String> {
    let line = line.trim_end_matches(['\n', '\r']);
    let mut cells: Vec<String> = line.split(delimiter).map(canonicalize).collect();
    if cells.len() < width {
        cells.resize(width, String::new());
    }
    cells
}

/// Whitespace tokens of a canonical value.
#[inline]
pub fn tokens(value: &str) -> impl Iterator<Item = &str> {
    value.split_whitespace()
}

/// 3-character shingles of `text`.
///
/// - one character `a` gives `aaa`
/// - two characters `ab` give `aab` and `abb`
/// - longer text gives its distinct sliding windows in first-seen order
pub fn shingles(text: &str) -> Shingles {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Shingles::new();
    match chars.as_slice() {
        [] => {}
        [a] => out.push([*a, *a, *a].iter().collect()),
        [a, b] => {
            out.push([*a, *a, *b].iter().collect());
            out.push([*a, *b, *b].iter().collect());
        }
        _ => {
            for window in chars.windows(SHINGLE_LEN) {
                let gram: String = window.iter().collect();
                if !out.contains(&gram) {
                    out.push(gram);
                }
            }
        }
    }
    out
}

/// Stable content hash over an ordered list of canonical values.
pub fn content_hash<'a, I>(values: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut hasher = Sha256::new();
    for value in values {
        hasher.update(value.as_bytes());
        hasher.update([ID_SEPARATOR]);
    }
    let digest = hasher.finalize();
    digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Identifier for a named persisted object (shards, count rows).
pub fn name_hash(name: &str) -> String {
    content_hash(std::iter::once(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_folds_and_strips() {
        assert_eq!(canonicalize("  Acme Inc.  "), "ACME INC");
        assert_eq!(canonicalize("O'Brien & Sons, LLC"), "OBRIEN  SONS LLC");
        assert_eq!(canonicalize("caf\u{e9}"), "CAF");
        assert_eq!(canonicalize("a\tb"), "A\tB");
    }

    #[test]
    fn test_split_line_pads_short_lines() {
        let cells = split_line("acme\tca\n", '\t', 4);
        assert_eq!(cells, vec!["ACME", "CA", "", ""]);
    }

    #[test]
    fn test_split_line_keeps_punctuation_delimiter() {
        let cells = split_line("acme inc.,ca", ',', 2);
        assert_eq!(cells, vec!["ACME INC", "CA"]);
    }

    #[test]
    fn test_shingle_rule() {
        assert_eq!(shingles("a").to_vec(), vec!["aaa"]);
        assert_eq!(shingles("ab").to_vec(), vec!["aab", "abb"]);
        assert_eq!(shingles("cat").to_vec(), vec!["cat"]);
        assert_eq!(shingles("aaaa").to_vec(), vec!["aaa"]);
        assert!(shingles("").is_empty());
    }

    #[test]
    fn test_content_hash_is_stable_and_order_sensitive() {
        let a = content_hash(["ACME", "CA"]);
        assert_eq!(a, content_hash(["ACME", "CA"]));
        assert_ne!(a, content_hash(["CA", "ACME"]));
        assert_ne!(content_hash(["AB", "C"]), content_hash(["A", "BC"]));
        assert_eq!(a.len(), 32);
    }
}
