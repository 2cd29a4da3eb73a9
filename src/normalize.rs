//! Canonical matching keys for raw names.
//!
//! Reference tables and input records are both keyed through [`normalize`], so the
//! same cleanup applies on both sides of every join. The rules run in a fixed order
//! because later rules see the output of earlier ones: removing the apostrophe in
//! `O' Brien` leaves a lone `o` token that the isolated-letter rule then drops.

use regex::Regex;
use std::sync::LazyLock;

/// Honorific and generational suffixes, matched as whole tokens that follow whitespace.
static SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s+(?:jr|sr|ii|iii|iv|dds|md|phd)(?:\s|$)")
        .expect("suffix pattern is a valid regular expression")
});

/// Cleans one raw name into its lookup key.
///
/// Total over arbitrary input: characters not named by a rule pass through untouched.
pub fn normalize(raw: &str) -> String {
    let lowered = raw.to_lowercase();

    let mut cleaned = String::with_capacity(lowered.len());
    for ch in lowered.chars() {
        match ch {
            '\'' | '\u{2019}' => {}
            '"' => cleaned.push(' '),
            other => cleaned.push(other),
        }
    }

    // Edge whitespace would otherwise make the first or last token look interior.
    let without_suffixes = strip_suffixes(cleaned.trim());
    let without_initials = strip_isolated_letters(&without_suffixes);

    without_initials
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// Batch form of [`normalize`]; output order and length match the input.
pub fn normalize_all<'a, I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    names.into_iter().map(normalize).collect()
}

fn strip_suffixes(name: &str) -> String {
    // A match consumes its trailing space, so adjacent suffixes ("jr iii") need a second pass.
    let mut current = name.to_string();
    loop {
        let next = SUFFIX_RE.replace_all(&current, " ").into_owned();
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Drops single ASCII-letter tokens that are neither the first nor the last token,
/// so a name cannot be reduced to nothing.
fn strip_isolated_letters(name: &str) -> String {
    let tokens: Vec<(usize, &str)> = tokens_with_offsets(name).collect();
    let last = tokens.len().saturating_sub(1);
    let mut out = String::with_capacity(name.len());
    let mut cursor = 0;
    for (position, &(start, token)) in tokens.iter().enumerate() {
        let interior = position > 0 && position < last;
        let single_letter = token.len() == 1 && token.as_bytes()[0].is_ascii_lowercase();
        if interior && single_letter {
            out.push_str(&name[cursor..start]);
            cursor = start + token.len();
        }
    }
    out.push_str(&name[cursor..]);
    out
}

fn tokens_with_offsets(name: &str) -> impl Iterator<Item = (usize, &str)> {
    name.split(char::is_whitespace)
        .scan(0usize, |offset, piece| {
            let start = *offset;
            // The separator is one whitespace char; its byte width varies for Unicode spaces.
            let sep_len = name[start + piece.len()..]
                .chars()
                .next()
                .map_or(0, char::len_utf8);
            *offset = start + piece.len() + sep_len;
            Some((start, piece))
        })
        .filter(|(_, piece)| !piece.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_drops_apostrophes() {
        assert_eq!(normalize("O'Brien"), "obrien");
        assert_eq!(normalize("o'brien"), normalize("O'BRIEN"));
        assert_eq!(normalize("D\u{2019}Angelo"), "dangelo");
    }

    #[test]
    fn apostrophe_with_space_leaves_lone_letter_that_is_removed() {
        assert_eq!(normalize("Mary O' Brien"), "marybrien");
        assert_eq!(normalize("Ann D' Arcy"), "annarcy");
    }

    #[test]
    fn double_quotes_become_token_breaks() {
        assert_eq!(normalize("John \"J\" Smith"), "johnsmith");
    }

    #[test]
    fn suffixes_are_removed_as_whole_tokens() {
        assert_eq!(normalize("John Smith Jr"), normalize("John Smith"));
        assert_eq!(normalize("Smith III"), "smith");
        assert_eq!(normalize("Smith Jr III"), "smith");
        assert_eq!(normalize("Jane Doe PhD"), "janedoe");
        assert_eq!(normalize("Smith Jr Jones"), "smithjones");
        // Not a suffix when it is a prefix of a longer token.
        assert_eq!(normalize("Alan Mdonald"), "alanmdonald");
        // A leading token is never treated as a suffix.
        assert_eq!(normalize("Md"), "md");
    }

    #[test]
    fn isolated_initials_are_removed_but_edges_survive() {
        assert_eq!(normalize("John Q Public"), "johnpublic");
        assert_eq!(normalize("A"), "a");
        assert_eq!(normalize("A B"), "ab");
        assert_eq!(normalize("x a b y"), "xy");
    }

    #[test]
    fn edge_whitespace_does_not_expose_edge_tokens() {
        assert_eq!(normalize(" A "), "a");
        assert_eq!(normalize(" Jr"), "jr");
        assert_eq!(normalize(" A B"), normalize("A B"));
        assert_eq!(normalize("\tJohn Q Public \n"), "johnpublic");
        // The suffix rule can leave trailing space; the token before it is still last.
        assert_eq!(normalize("John Q Jr"), "johnq");
        assert_eq!(normalize("\"J\" Smith"), "jsmith");
    }

    #[test]
    fn unknown_characters_pass_through() {
        assert_eq!(normalize("Núñez-García"), "núñez-garcía");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn normalization_is_idempotent() {
        let samples = [
            "O'Brien",
            "John Smith Jr",
            "  Mary   Ann  ",
            "x a b y",
            "\"Doc\" Holliday",
            "Van Der Berg IV",
            "Núñez\u{3000}q\u{3000}García",
        ];
        for raw in samples {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn batch_form_preserves_order_and_cardinality() {
        let out = normalize_all(["Smith", "", "O'Neil"]);
        assert_eq!(out, vec!["smith", "", "oneil"]);
    }
}
