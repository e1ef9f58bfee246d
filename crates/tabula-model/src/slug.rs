//! Storage-safe identifiers derived from display labels.
//!
//! A slug is lowercase ASCII alphanumerics and `_`, never starts with a digit and is never empty.
//! Labels that normalize to the same slug are disambiguated with `_1`, `_2`, ... suffixes so a
//! set of labels always maps onto a set of distinct slugs.

use std::collections::HashSet;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

const EMPTY_SLUG: &str = "column";

pub fn slugify(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut pending_separator = false;
    for ch in label.nfkd().filter(|c| !is_combining_mark(*c)) {
        if ch.is_ascii_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }

    if out.is_empty() {
        return EMPTY_SLUG.to_string();
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Slugify `label`, appending the first free numeric suffix when the base slug is taken.
pub fn unique_slug(label: &str, is_taken: impl Fn(&str) -> bool) -> String {
    let base = slugify(label);
    if !is_taken(&base) {
        return base;
    }
    let mut n = 1usize;
    loop {
        let candidate = format!("{base}_{n}");
        if !is_taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Assign a distinct slug to every label, avoiding the slugs in `taken`.
///
/// The result is index-aligned with `labels`.
pub fn assign_slugs<'a>(
    labels: impl IntoIterator<Item = &'a str>,
    taken: &HashSet<String>,
) -> Vec<String> {
    let mut used = taken.clone();
    let mut out = Vec::new();
    for label in labels {
        let slug = unique_slug(label, |s| used.contains(s));
        used.insert(slug.clone());
        out.push(slug);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn slugify_normalizes_case_punctuation_and_accents() {
        assert_eq!(slugify("Net Income"), "net_income");
        assert_eq!(slugify("net-income"), "net_income");
        assert_eq!(slugify("  Café (EUR) "), "cafe_eur");
        assert_eq!(slugify("2012 total"), "_2012_total");
        assert_eq!(slugify("???"), "column");
    }

    #[test]
    fn colliding_labels_get_suffixes() {
        let slugs = assign_slugs(["Net Income", "net-income", "NET_INCOME"], &HashSet::new());
        assert_eq!(slugs, vec!["net_income", "net_income_1", "net_income_2"]);
    }

    #[test]
    fn taken_slugs_are_skipped() {
        let taken: HashSet<String> = ["price".to_string()].into_iter().collect();
        assert_eq!(assign_slugs(["Price"], &taken), vec!["price_1"]);
    }
}
