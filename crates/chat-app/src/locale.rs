//! Interface locales and the title collation used by alphabetical sorting.
//!
//! Collation is locale-aware in the way users of the two supported languages expect: the
//! locale's own script sorts first, case is ignored at the primary level, and `ё` is a
//! variant of `е` rather than a separate letter.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Ru,
}

impl Locale {
    /// Accepts BCP-47-like tags such as `ru`, `ru-RU` or `en_US`; anything else is English.
    pub fn from_tag(tag: &str) -> Self {
        let language = tag
            .trim()
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match language.as_str() {
            "ru" => Self::Ru,
            _ => Self::En,
        }
    }

    pub fn as_tag(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Ru => "ru",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum CharClass {
    Space,
    Symbol,
    Digit,
    Latin,
    Cyrillic,
    OtherLetter,
}

fn class_rank(locale: Locale, class: CharClass) -> u8 {
    match (locale, class) {
        (_, CharClass::Space) => 0,
        (_, CharClass::Symbol) => 1,
        (_, CharClass::Digit) => 2,
        (Locale::En, CharClass::Latin) | (Locale::Ru, CharClass::Cyrillic) => 3,
        (Locale::En, CharClass::Cyrillic) | (Locale::Ru, CharClass::Latin) => 4,
        (_, CharClass::OtherLetter) => 5,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Weights {
    primary: (u8, u32),
    secondary: u8,
    tertiary: u8,
}

fn weights(locale: Locale, character: char) -> Weights {
    let lower = character.to_lowercase().next().unwrap_or(character);
    let tertiary = u8::from(lower != character);
    let (class, base, secondary) = match lower {
        'ё' => (CharClass::Cyrillic, 'е', 1),
        'а'..='я' => (CharClass::Cyrillic, lower, 0),
        'a'..='z' => (CharClass::Latin, lower, 0),
        '0'..='9' => (CharClass::Digit, lower, 0),
        _ if lower.is_whitespace() => (CharClass::Space, ' ', 0),
        _ if lower.is_alphabetic() => (CharClass::OtherLetter, lower, 0),
        _ => (CharClass::Symbol, lower, 0),
    };

    Weights {
        primary: (class_rank(locale, class), base as u32),
        secondary,
        tertiary,
    }
}

/// Three-level comparison: letters first, then `ё`/`е`, then case, then raw code points.
pub fn collate(locale: Locale, left: &str, right: &str) -> Ordering {
    let left_weights = left.chars().map(|c| weights(locale, c)).collect::<Vec<_>>();
    let right_weights = right.chars().map(|c| weights(locale, c)).collect::<Vec<_>>();

    let primary = left_weights
        .iter()
        .map(|weight| weight.primary)
        .cmp(right_weights.iter().map(|weight| weight.primary));
    primary
        .then_with(|| {
            left_weights
                .iter()
                .map(|weight| weight.secondary)
                .cmp(right_weights.iter().map(|weight| weight.secondary))
        })
        .then_with(|| {
            left_weights
                .iter()
                .map(|weight| weight.tertiary)
                .cmp(right_weights.iter().map(|weight| weight.tertiary))
        })
        .then_with(|| left.cmp(right))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(locale: Locale, titles: &[&str]) -> Vec<String> {
        let mut titles = titles.iter().map(|title| title.to_string()).collect::<Vec<_>>();
        titles.sort_by(|left, right| collate(locale, left, right));
        titles
    }

    #[test]
    fn each_locale_puts_its_own_script_first() {
        let titles = ["Банан", "Apple", "Вишня"];
        assert_eq!(sorted(Locale::Ru, &titles), ["Банан", "Вишня", "Apple"]);
        assert_eq!(sorted(Locale::En, &titles), ["Apple", "Банан", "Вишня"]);
    }

    #[test]
    fn case_is_ignored_before_letters_are_exhausted() {
        assert_eq!(
            sorted(Locale::En, &["banana", "Apple", "apple", "Cherry"]),
            ["apple", "Apple", "banana", "Cherry"]
        );
    }

    #[test]
    fn yo_sorts_as_a_variant_of_ye() {
        assert_eq!(
            sorted(Locale::Ru, &["Ёж", "Еда", "Ель", "Жук"]),
            ["Еда", "Ёж", "Ель", "Жук"]
        );
    }

    #[test]
    fn digits_sort_before_letters() {
        assert_eq!(
            sorted(Locale::Ru, &["Zed", "2024 plan", "Арка"]),
            ["2024 plan", "Арка", "Zed"]
        );
    }

    #[test]
    fn locale_tags_are_parsed_leniently() {
        assert_eq!(Locale::from_tag("ru-RU"), Locale::Ru);
        assert_eq!(Locale::from_tag("RU"), Locale::Ru);
        assert_eq!(Locale::from_tag("en_US"), Locale::En);
        assert_eq!(Locale::from_tag(""), Locale::En);
    }
}
