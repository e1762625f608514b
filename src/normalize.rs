//! Input normalization applied before recognition.
//!
//! Two independent steps:
//! - number replacement (`75` -> `seventy five`), delegated to a locale-specific
//!   [`NumberReplacer`];
//! - a case transform whose reach is chosen by [`CasingScope`]: the text handed
//!   to the engine, the text echoed back in events, or both.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Case transform for query text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Casing {
    Upper,
    Lower,
    #[default]
    Ignore,
}

impl Casing {
    pub fn apply(&self, text: &str) -> String {
        match self {
            Casing::Upper => text.to_uppercase(),
            Casing::Lower => text.to_lowercase(),
            Casing::Ignore => text.to_string(),
        }
    }
}

/// Which text the [`Casing`] transform is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CasingScope {
    /// Only the text passed to the engine; events echo the uncased input.
    #[default]
    Engine,
    /// Only the text echoed in outbound events.
    Echo,
    Both,
}

impl CasingScope {
    pub fn applies_to_engine(&self) -> bool {
        matches!(self, CasingScope::Engine | CasingScope::Both)
    }

    pub fn applies_to_echo(&self) -> bool {
        matches!(self, CasingScope::Echo | CasingScope::Both)
    }
}

/// Replaces numeric tokens with their spoken form. Input is whitespace tokenized.
pub trait NumberReplacer: Send + Sync {
    fn replace_numbers(&self, words: &[&str]) -> Vec<String>;
}

/// Built-in replacer for a language code, if one exists.
pub fn replacer_for_language(language: &str) -> Option<Arc<dyn NumberReplacer>> {
    let base = language
        .split(|c: char| c == '_' || c == '-')
        .next()
        .unwrap_or(language)
        .to_lowercase();
    match base.as_str() {
        "en" => Some(Arc::new(EnglishNumbers)),
        _ => None,
    }
}

// ─── English cardinals ─────────────────────────────────────────────────────

const ONES: [&str; 20] = [
    "zero",
    "one",
    "two",
    "three",
    "four",
    "five",
    "six",
    "seven",
    "eight",
    "nine",
    "ten",
    "eleven",
    "twelve",
    "thirteen",
    "fourteen",
    "fifteen",
    "sixteen",
    "seventeen",
    "eighteen",
    "nineteen",
];

const TENS: [&str; 10] = [
    "", "", "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
];

const SCALES: [(u64, &str); 3] = [
    (1_000_000_000, "billion"),
    (1_000_000, "million"),
    (1_000, "thousand"),
];

/// Largest magnitude spelled out; anything bigger is left as digits.
const MAX_SPOKEN: u64 = 999_999_999_999;

/// English cardinal numbers ("one hundred and twenty three").
pub struct EnglishNumbers;

impl EnglishNumbers {
    /// Spell out an integer, or `None` if it is out of range.
    pub fn to_words(value: i64) -> Option<Vec<String>> {
        let magnitude = value.unsigned_abs();
        if magnitude > MAX_SPOKEN {
            return None;
        }

        let mut words: Vec<String> = Vec::new();
        if value < 0 {
            words.push("minus".into());
        }
        if magnitude == 0 {
            words.push(ONES[0].into());
            return Some(words);
        }

        let mut rest = magnitude;
        let mut has_higher = false;
        for (scale, name) in SCALES {
            let group = rest / scale;
            if group > 0 {
                push_group(&mut words, group);
                words.push(name.into());
                has_higher = true;
            }
            rest %= scale;
        }

        if rest > 0 {
            if has_higher && rest < 100 {
                words.push("and".into());
            }
            push_group(&mut words, rest);
        }

        Some(words)
    }

    /// Parse the longest run of number words at the start of `words`.
    ///
    /// Returns the value and how many words were consumed, or `None` when
    /// nothing parses or the value does not fit in an `i64`.
    pub fn parse_words<S: AsRef<str>>(words: &[S]) -> Option<(i64, usize)> {
        let mut negative = false;
        let mut index = 0;
        if let Some(first) = words.first() {
            if matches!(first.as_ref().to_lowercase().as_str(), "minus" | "negative") {
                negative = true;
                index = 1;
            }
        }

        let mut total: i64 = 0;
        let mut current: i64 = 0;
        let mut consumed = 0;

        while let Some(word) = words.get(index) {
            let word = word.as_ref().to_lowercase();
            if let Some(v) = ONES.iter().position(|w| *w == word) {
                current = current.checked_add(v as i64)?;
            } else if let Some(v) = TENS.iter().position(|w| !w.is_empty() && *w == word) {
                current = current.checked_add(10 * v as i64)?;
            } else if word == "hundred" {
                current = current.max(1).checked_mul(100)?;
            } else if let Some((scale, _)) = SCALES.iter().find(|(_, name)| *name == word) {
                let scale = i64::try_from(*scale).ok()?;
                total = total.checked_add(current.max(1).checked_mul(scale)?)?;
                current = 0;
            } else if word == "and" && consumed > 0 {
                // Only part of the number if more number words follow.
                index += 1;
                continue;
            } else {
                break;
            }
            index += 1;
            consumed = index;
        }

        if consumed == 0 {
            return None;
        }

        let value = total.checked_add(current)?;
        Some((if negative { -value } else { value }, consumed))
    }
}

fn push_group(words: &mut Vec<String>, group: u64) {
    let hundreds = group / 100;
    let below = group % 100;
    if hundreds > 0 {
        words.push(ONES[hundreds as usize].into());
        words.push("hundred".into());
        if below > 0 {
            words.push("and".into());
        }
    }
    if below > 0 {
        push_below_hundred(words, below);
    }
}

fn push_below_hundred(words: &mut Vec<String>, n: u64) {
    if n < 20 {
        words.push(ONES[n as usize].into());
    } else {
        words.push(TENS[(n / 10) as usize].into());
        if n % 10 > 0 {
            words.push(ONES[(n % 10) as usize].into());
        }
    }
}

fn parse_integer_token(word: &str) -> Option<i64> {
    let digits = word.strip_prefix('-').unwrap_or(word);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    word.parse().ok()
}

impl NumberReplacer for EnglishNumbers {
    fn replace_numbers(&self, words: &[&str]) -> Vec<String> {
        let mut out = Vec::with_capacity(words.len());
        for word in words {
            match parse_integer_token(word).and_then(EnglishNumbers::to_words) {
                Some(spoken) => out.extend(spoken),
                None => out.push(word.to_string()),
            }
        }
        out
    }
}
