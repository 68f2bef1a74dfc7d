//! Categorical value canonicalization.
//!
//! Provides a deterministic pipeline that folds equivalent spellings of
//! a label into one canonical form, so "t-storm", "T-Storm " and
//! "Thunderstorms" all land in the same stratum.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use accident_risk_accident_models::states;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Regex to collapse runs of whitespace into a single space.
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Regex matching a slash with any surrounding whitespace.
static SLASH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*/\s*").expect("valid regex"));

/// Maps weather abbreviations and plural forms to a canonical token.
static WEATHER_TOKENS: LazyLock<BTreeMap<&'static str, &'static str>> = LazyLock::new(|| {
    BTreeMap::from([
        ("T-STORM", "THUNDERSTORM"),
        ("T-STORMS", "THUNDERSTORM"),
        ("TSTORM", "THUNDERSTORM"),
        ("TSTORMS", "THUNDERSTORM"),
        ("THUNDERSTORMS", "THUNDERSTORM"),
        ("LT", "LIGHT"),
        ("HVY", "HEAVY"),
        ("SHWRS", "SHOWERS"),
        ("SHOWER", "SHOWERS"),
        ("VCNTY", "VICINITY"),
    ])
});

/// Maps whole weather phrases (after token expansion) to the label they
/// are reported under.
static WEATHER_PHRASES: LazyLock<BTreeMap<&'static str, &'static str>> = LazyLock::new(|| {
    BTreeMap::from([
        ("CLEAR", "FAIR"),
        ("OVERCAST CLOUDS", "OVERCAST"),
        ("THUNDERSTORM IN THE VICINITY", "THUNDER IN THE VICINITY"),
        ("FOGGY", "FOG"),
        ("HAZY", "HAZE"),
        ("SNOWING", "SNOW"),
        ("RAINY", "RAIN"),
    ])
});

/// Words kept in lowercase by [`title_case`] when they are not the first
/// word of the label.
const SMALL_WORDS: &[&str] = &["a", "and", "in", "of", "on", "the", "with"];

/// A base canonicalization rule for text and categorical columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Canonicalizer {
    /// Leave the value untouched apart from trimming.
    #[default]
    None,
    /// Trim and collapse internal whitespace.
    Trim,
    /// Trim, collapse whitespace, and uppercase.
    Upper,
    /// Trim, collapse whitespace, and capitalize every word.
    Title,
    /// Fold state names and lowercase codes into two-letter codes.
    StateCode,
    /// Fold weather condition spellings into canonical labels.
    Weather,
}

impl Canonicalizer {
    /// Applies the rule to a raw cell.
    ///
    /// Returns `None` when the value is empty after trimming.
    #[must_use]
    pub fn apply(self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        let value = match self {
            Self::None => trimmed.to_string(),
            Self::Trim => collapse_whitespace(trimmed),
            Self::Upper => collapse_whitespace(trimmed).to_uppercase(),
            Self::Title => title_case(&collapse_whitespace(trimmed), false),
            Self::StateCode => state_code(trimmed),
            Self::Weather => weather_condition(trimmed),
        };

        Some(value)
    }
}

/// Collapses runs of whitespace into a single space.
#[must_use]
pub fn collapse_whitespace(input: &str) -> String {
    WHITESPACE_RE.replace_all(input.trim(), " ").into_owned()
}

/// Key used to compare synonym entries: uppercase with collapsed
/// whitespace.
#[must_use]
pub fn synonym_key(input: &str) -> String {
    collapse_whitespace(input).to_uppercase()
}

/// Capitalizes the first letter of every word and lowercases the rest.
///
/// A letter is a word start when the preceding character is not
/// alphabetic, so `"winston-salem"` becomes `"Winston-Salem"`. With
/// `keep_small_words` set, words in [`SMALL_WORDS`] stay lowercase unless
/// they open the label.
#[must_use]
pub fn title_case(input: &str, keep_small_words: bool) -> String {
    input
        .split(' ')
        .enumerate()
        .map(|(i, word)| {
            let lower = word.to_lowercase();
            if keep_small_words && i > 0 && SMALL_WORDS.contains(&lower.as_str()) {
                return lower;
            }
            let mut out = String::with_capacity(lower.len());
            let mut prev_alpha = false;
            for c in lower.chars() {
                if c.is_alphabetic() && !prev_alpha {
                    out.extend(c.to_uppercase());
                } else {
                    out.push(c);
                }
                prev_alpha = c.is_alphabetic() || c == '\'';
            }
            out
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalizes a US state value into a two-letter code.
///
/// Two-letter values are uppercased as-is; full names are looked up in the
/// state table. Anything else is returned uppercased so it fails the
/// validator's domain check instead of disappearing.
#[must_use]
pub fn state_code(input: &str) -> String {
    let trimmed = collapse_whitespace(input);
    if trimmed.len() == 2 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        return trimmed.to_uppercase();
    }
    states::code_for_name(&trimmed).map_or_else(|| trimmed.to_uppercase(), str::to_string)
}

/// Normalizes a weather condition label.
///
/// The pipeline:
/// 1. Uppercase and collapse whitespace
/// 2. Put single spaces around `/` separators ("Fair/Windy" → "FAIR / WINDY")
/// 3. Expand abbreviations (T-STORM→THUNDERSTORM, LT→LIGHT, etc.)
/// 4. Fold whole-phrase synonyms (CLEAR→FAIR)
/// 5. Title-case, keeping connective words lowercase
#[must_use]
pub fn weather_condition(input: &str) -> String {
    let upper = collapse_whitespace(input).to_uppercase();
    let spaced = SLASH_RE.replace_all(&upper, " / ");

    let expanded = spaced
        .split(' ')
        .map(|token| WEATHER_TOKENS.get(token).copied().unwrap_or(token))
        .collect::<Vec<_>>()
        .join(" ");

    let folded = WEATHER_PHRASES
        .get(expanded.as_str())
        .map_or(expanded.as_str(), |canonical| *canonical);

    title_case(folded, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_values_are_missing() {
        assert_eq!(Canonicalizer::Trim.apply("   "), None);
        assert_eq!(Canonicalizer::Weather.apply(""), None);
    }

    #[test]
    fn trims_and_collapses() {
        assert_eq!(Canonicalizer::Trim.apply("  Los   Angeles "), Some("Los Angeles".to_string()));
        assert_eq!(Canonicalizer::Upper.apply(" i-5  n "), Some("I-5 N".to_string()));
        assert_eq!(Canonicalizer::None.apply(" A-1 "), Some("A-1".to_string()));
    }

    #[test]
    fn title_cases_words() {
        assert_eq!(title_case("WINSTON-SALEM", false), "Winston-Salem");
        assert_eq!(title_case("o'fallon", false), "O'fallon");
        assert_eq!(title_case("lake in the hills", false), "Lake In The Hills");
        assert_eq!(title_case("THUNDER IN THE VICINITY", true), "Thunder in the Vicinity");
    }

    #[test]
    fn folds_state_spellings() {
        assert_eq!(state_code("ca"), "CA");
        assert_eq!(state_code(" Texas "), "TX");
        assert_eq!(state_code("new  york"), "NY");
        assert_eq!(state_code("Puerto Rico"), "PR");
        assert_eq!(state_code("Cal"), "CAL");
    }

    #[test]
    fn folds_weather_spellings() {
        assert_eq!(weather_condition("T-Storm"), "Thunderstorm");
        assert_eq!(weather_condition("thunderstorms"), "Thunderstorm");
        assert_eq!(weather_condition("Heavy T-Storm"), "Heavy Thunderstorm");
        assert_eq!(weather_condition("Clear"), "Fair");
        assert_eq!(weather_condition("fair/windy"), "Fair / Windy");
        assert_eq!(weather_condition("Cloudy  /  Windy"), "Cloudy / Windy");
        assert_eq!(weather_condition("LIGHT RAIN WITH THUNDER"), "Light Rain with Thunder");
        assert_eq!(weather_condition("Lt Snow"), "Light Snow");
    }
}
