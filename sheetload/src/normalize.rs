//! Column header normalization
//!
//! Turns spreadsheet column titles into warehouse-safe names. Rules apply in
//! a fixed order to each name independently:
//!
//! 1. punctuation `’ ' " / \ ( ) [ ] { } : ; , .` becomes `_`
//! 2. `é è ê` become `e`, `â` becomes `a`, `ô` becomes `o`
//! 3. leading and trailing whitespace is stripped
//! 4. everything is lowercased
//!
//! Names are not deduplicated.

use std::collections::HashSet;

use tracing::{debug, warn};

/// Characters replaced with `_`
pub const PUNCTUATION: &[char] = &['’', '\'', '"', '/', '\\', '(', ')', '[', ']', '{', '}', ':', ';', ',', '.'];

/// Map an accented character to its ASCII letter, if it is one we fold
fn fold_accent(c: char) -> Option<char> {
    match c {
        'é' | 'è' | 'ê' | 'É' | 'È' | 'Ê' => Some('e'),
        'â' | 'Â' => Some('a'),
        'ô' | 'Ô' => Some('o'),
        _ => None,
    }
}

/// Normalize a single column name
pub fn normalize_header(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| {
            if PUNCTUATION.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .map(|c| fold_accent(c).unwrap_or(c))
        .collect();

    replaced.trim().to_lowercase()
}

/// Normalize a header row, preserving length and order
pub fn normalize_headers<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    debug!(count = raw.len(), "normalize_headers: called");
    let normalized: Vec<String> = raw.iter().map(|h| normalize_header(h.as_ref())).collect();

    let mut seen = HashSet::new();
    for name in &normalized {
        if !seen.insert(name.as_str()) {
            warn!(column = %name, "Duplicate column name after normalization");
        }
    }

    normalized
}
