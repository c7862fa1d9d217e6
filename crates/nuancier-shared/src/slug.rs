//! Slug generation.
//!
//! A slug is the URL-safe identifier derived from a display name: ASCII,
//! lower-case, with every run of other characters collapsed into a single
//! hyphen.  Generation is pure; uniqueness is resolved by the store.

use unicode_normalization::UnicodeNormalization;

use crate::constants::{DEFAULT_COLOR_SLUG, DEFAULT_GROUP_SLUG, MAX_SLUG_LEN};

/// Room kept at the end of a base slug for a `-NNNNNN` collision suffix.
const SUFFIX_RESERVE: usize = 8;

/// Which entity a slug is generated for.  Only affects the fallback token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlugKind {
    Group,
    Color,
}

impl SlugKind {
    pub fn fallback(&self) -> &'static str {
        match self {
            SlugKind::Group => DEFAULT_GROUP_SLUG,
            SlugKind::Color => DEFAULT_COLOR_SLUG,
        }
    }
}

/// Derive the base slug for `display_name`.
///
/// Accented letters are transliterated by NFKD decomposition followed by
/// dropping the non-ASCII combining marks, so `"Façades"` becomes
/// `"facades"`.  Input with nothing left after that falls back to the kind's
/// default token.
pub fn generate_base(display_name: &str, kind: SlugKind) -> String {
    let mut slug = String::with_capacity(display_name.len());
    let mut pending_separator = false;

    for ch in display_name.nfkd().filter(char::is_ascii) {
        let ch = ch.to_ascii_lowercase();
        if ch.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('-');
            }
            pending_separator = false;
            slug.push(ch);
        } else {
            pending_separator = true;
        }
    }

    let max_base = MAX_SLUG_LEN - SUFFIX_RESERVE;
    if slug.len() > max_base {
        slug.truncate(max_base);
        while slug.ends_with('-') {
            slug.pop();
        }
    }

    if slug.is_empty() {
        kind.fallback().to_string()
    } else {
        slug
    }
}

/// The `n`-th collision candidate for `base` (`n >= 2`).
pub fn suffixed(base: &str, n: u32) -> String {
    format!("{base}-{n}")
}

/// Whether `slug` has the shape produced by [`generate_base`] / [`suffixed`].
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug.len() <= MAX_SLUG_LEN
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--")
        && slug
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_hyphenates() {
        assert_eq!(generate_base("Bleu Nuit", SlugKind::Color), "bleu-nuit");
        assert_eq!(generate_base("  Bleu   Nuit  ", SlugKind::Color), "bleu-nuit");
    }

    #[test]
    fn punctuation_runs_collapse() {
        assert_eq!(generate_base("Rock'n'Roll!!", SlugKind::Color), "rock-n-roll");
        assert_eq!(generate_base("chêne_clair -- mat", SlugKind::Color), "chene-clair-mat");
    }

    #[test]
    fn transliterates_accents() {
        assert_eq!(generate_base("Façades", SlugKind::Group), "facades");
        assert_eq!(generate_base("Érable Doré", SlugKind::Color), "erable-dore");
    }

    #[test]
    fn empty_input_uses_fallback() {
        assert_eq!(generate_base("", SlugKind::Group), "group");
        assert_eq!(generate_base("!!! ???", SlugKind::Color), "color");
        assert_eq!(generate_base("日本", SlugKind::Color), "color");
    }

    #[test]
    fn long_names_leave_room_for_suffix() {
        let name = "a".repeat(400);
        let base = generate_base(&name, SlugKind::Color);
        assert!(base.len() <= MAX_SLUG_LEN - SUFFIX_RESERVE);
        assert!(is_valid_slug(&suffixed(&base, 999_999)));
    }

    #[test]
    fn generated_slugs_are_valid() {
        for name in ["Sky", "Blanc Polaire 2", "  -x- ", "Œuvre"] {
            assert!(is_valid_slug(&generate_base(name, SlugKind::Color)), "{name}");
        }
        assert!(!is_valid_slug("Bad Slug"));
        assert!(!is_valid_slug("-lead"));
    }

    #[test]
    fn suffix_format() {
        assert_eq!(suffixed("avocado", 2), "avocado-2");
    }
}
