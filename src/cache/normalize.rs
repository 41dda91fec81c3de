use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

// Letters and digits in any script survive; `_` does not.
static NON_WORD_CHAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[^\p{Alphabetic}\p{N}\s]").expect("punctuation pattern is valid")
});

/// Canonical form of a user query, used for exact matching and as part of the
/// entry key.
///
/// Steps run in a fixed order: lowercase, trim, collapse whitespace runs to a
/// single space, then strip everything that is not a letter, digit or
/// whitespace. Punctuation is removed after collapsing, so `"a - b"` becomes
/// `"a  b"` with two spaces.
pub fn normalize_query(text: &str) -> String {
    let lowered = text.to_lowercase();
    let collapsed = WHITESPACE_RUN.replace_all(lowered.trim(), " ");
    NON_WORD_CHAR.replace_all(&collapsed, "").into_owned()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::question_mark("What are your hours?", "what are your hours")]
    #[case::surrounding_whitespace("  Hello   World  ", "hello world")]
    #[case::tabs_and_newlines("hello\t\n world", "hello world")]
    #[case::punctuation("Hi!!! How's it going?", "hi hows it going")]
    #[case::digits_kept("Room 101, please.", "room 101 please")]
    #[case::underscore_stripped("snake_case", "snakecase")]
    #[case::unicode_letters("Ça va? Über-cool!", "ça va übercool")]
    #[case::non_latin("Привет, мир!", "привет мир")]
    #[case::punctuation_after_collapse("a - b", "a  b")]
    #[case::only_punctuation("?!...", "")]
    #[case::empty("", "")]
    fn test_normalize_query(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_query(input), expected);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for input in ["What are your hours?", "  MiXeD   case!! ", "Ça va?"] {
            let once = normalize_query(input);
            assert_eq!(normalize_query(&once), once);
        }
    }

    #[test]
    fn test_case_and_punctuation_variants_collide() {
        assert_eq!(
            normalize_query("What are your hours?"),
            normalize_query("what are your hours")
        );
    }
}
