//! Text clean-up applied before a synthesis request.
//!
//! Markdown markup is removed so it is not read aloud, and backends that
//! stumble over grouped digits get numbers spelled out in English words.

use regex::{Captures, Regex};
use std::sync::OnceLock;

const ONES: [&str; 20] = [
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
    "eleven", "twelve", "thirteen", "fourteen", "fifteen", "sixteen", "seventeen", "eighteen",
    "nineteen",
];
const TENS: [&str; 10] = [
    "", "", "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
];
// u64 tops out below one sextillion.
const SCALES: [&str; 7] = [
    "",
    "thousand",
    "million",
    "billion",
    "trillion",
    "quadrillion",
    "quintillion",
];

/// Numbers this short are spoken fine as digits.
const MAX_VERBATIM_NUMBER_LEN: usize = 2;

/// Clean `text` for speech: optionally spell out numbers, strip markdown, and
/// collapse whitespace. Numbers are handled first so markup around them is
/// removed afterwards.
pub fn prepare_text(text: &str, spell_numbers: bool) -> String {
    let text = if spell_numbers {
        spell_out_numbers(text)
    } else {
        text.to_string()
    };
    strip_markdown(&text)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Replace digit groups such as `1,234.5` with words. Matches of one or two
/// characters stay as digits; commas are dropped before spelling.
pub fn spell_out_numbers(text: &str) -> String {
    static NUMBER_RE: OnceLock<Regex> = OnceLock::new();
    let re = NUMBER_RE
        .get_or_init(|| Regex::new(r"\d+(,\d{3})*(\.\d+)?").expect("number regex should compile"));
    re.replace_all(text, |caps: &Captures<'_>| {
        let raw = &caps[0];
        if raw.len() <= MAX_VERBATIM_NUMBER_LEN {
            return raw.to_string();
        }
        number_to_words(&raw.replace(',', "")).unwrap_or_else(|| raw.to_string())
    })
    .into_owned()
}

/// `None` when the whole part does not fit in a `u64`.
fn number_to_words(digits: &str) -> Option<String> {
    let (whole, fraction) = match digits.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (digits, None),
    };
    let mut words = integer_to_words(whole.parse().ok()?);
    if let Some(fraction) = fraction {
        words.push_str(" point");
        for digit in fraction.chars() {
            words.push(' ');
            words.push_str(ONES[digit.to_digit(10)? as usize]);
        }
    }
    Some(words)
}

fn integer_to_words(value: u64) -> String {
    if value == 0 {
        return ONES[0].to_string();
    }
    let mut groups = Vec::new();
    let mut rest = value;
    while rest > 0 {
        groups.push((rest % 1000) as usize);
        rest /= 1000;
    }

    let mut parts = Vec::new();
    for (scale, &group) in groups.iter().enumerate().rev() {
        if group == 0 {
            continue;
        }
        let mut part = below_thousand(group);
        if scale > 0 {
            part.push(' ');
            part.push_str(SCALES[scale]);
        }
        parts.push(part);
    }

    // "one thousand and five", but "one thousand, two hundred".
    let tail = groups[0];
    let and_tail = groups.len() > 1 && tail > 0 && tail < 100;
    let last = parts.len() - 1;
    let mut out = String::new();
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            out.push_str(if index == last && and_tail { " and " } else { ", " });
        }
        out.push_str(part);
    }
    out
}

fn below_thousand(n: usize) -> String {
    let (hundreds, rest) = (n / 100, n % 100);
    match (hundreds, rest) {
        (0, rest) => below_hundred(rest),
        (hundreds, 0) => format!("{} hundred", ONES[hundreds]),
        (hundreds, rest) => format!("{} hundred and {}", ONES[hundreds], below_hundred(rest)),
    }
}

fn below_hundred(n: usize) -> String {
    if n < ONES.len() {
        return ONES[n].to_string();
    }
    match n % 10 {
        0 => TENS[n / 10].to_string(),
        unit => format!("{}-{}", TENS[n / 10], ONES[unit]),
    }
}

/// Remove markdown markup and keep the readable text. Fenced code keeps its
/// contents, thematic breaks are dropped, and link targets are discarded.
pub fn strip_markdown(input: &str) -> String {
    let mut lines = Vec::new();
    let mut in_fence = false;
    for line in input.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            lines.push(line.to_string());
            continue;
        }
        if is_thematic_break(trimmed) {
            continue;
        }
        lines.push(strip_inline(strip_block_prefixes(line)));
    }
    lines.join("\n")
}

/// Headings, quotes, and list markers. Nested prefixes (`> - item`) are all removed.
fn strip_block_prefixes(line: &str) -> &str {
    static BLOCK_PREFIX_RE: OnceLock<Regex> = OnceLock::new();
    let re = BLOCK_PREFIX_RE.get_or_init(|| {
        Regex::new(r"^\s*(?:#{1,6}\s+|>\s?|[-*+]\s+|\d+[.)]\s+)")
            .expect("block prefix regex should compile")
    });
    let mut body = line;
    while let Some(found) = re.find(body) {
        if found.is_empty() {
            break;
        }
        body = &body[found.end()..];
    }
    body
}

fn is_thematic_break(line: &str) -> bool {
    let marks: Vec<char> = line.chars().filter(|c| !c.is_whitespace()).collect();
    marks.len() >= 3 && matches!(marks[0], '-' | '*' | '_') && marks.iter().all(|&c| c == marks[0])
}

fn strip_inline(line: &str) -> String {
    static INLINE_RES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    let rules = INLINE_RES.get_or_init(|| {
        [
            (r"!\[([^\]]*)\]\([^)]*\)", "$1"),
            (r"\[([^\]]+)\]\([^)]*\)", "$1"),
            (r"`+([^`]+)`+", "$1"),
            (r"\*\*([^*]+)\*\*", "$1"),
            (r"__([^_]+)__", "$1"),
            (r"~~([^~]+)~~", "$1"),
            (r"\*([^\s*](?:[^*]*[^\s*])?)\*", "$1"),
            // Word-internal underscores (snake_case) are left alone.
            (r"(^|[^\w])_([^\s_](?:[^_]*[^\s_])?)_([^\w]|$)", "${1}${2}${3}"),
            (r"</?[A-Za-z][^>]*>", ""),
        ]
        .into_iter()
        .map(|(pattern, replacement)| {
            (
                Regex::new(pattern).expect("markdown regex should compile"),
                replacement,
            )
        })
        .collect()
    });
    let mut text = line.to_string();
    for (re, replacement) in rules {
        text = re.replace_all(&text, *replacement).into_owned();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_numbers_stay_as_digits() {
        assert_eq!(spell_out_numbers("dock at pad 7 or 12"), "dock at pad 7 or 12");
        assert_eq!(spell_out_numbers("9."), "9.");
    }

    #[test]
    fn grouped_numbers_are_spelled_without_commas() {
        assert_eq!(
            spell_out_numbers("1,234 credits"),
            "one thousand, two hundred and thirty-four credits"
        );
        assert_eq!(spell_out_numbers("1,000,000"), "one million");
        assert_eq!(spell_out_numbers("1005"), "one thousand and five");
        assert_eq!(spell_out_numbers("2,100"), "two thousand, one hundred");
        assert_eq!(spell_out_numbers("100"), "one hundred");
        assert_eq!(spell_out_numbers("340"), "three hundred and forty");
    }

    #[test]
    fn decimals_read_digit_by_digit() {
        assert_eq!(spell_out_numbers("3.14"), "three point one four");
        assert_eq!(spell_out_numbers("1.5 ly"), "one point five ly");
        assert_eq!(spell_out_numbers("12,500.05"), "twelve thousand, five hundred point zero five");
    }

    #[test]
    fn numbers_too_large_are_kept() {
        let huge = "123456789012345678901234";
        assert_eq!(spell_out_numbers(huge), huge);
        assert_eq!(
            spell_out_numbers("18446744073709551615"),
            "eighteen quintillion, four hundred and forty-six quadrillion, seven hundred and forty-four trillion, seventy-three billion, seven hundred and nine million, five hundred and fifty-one thousand, six hundred and fifteen"
        );
    }

    #[test]
    fn markdown_markup_is_removed() {
        assert_eq!(strip_markdown("# Heading"), "Heading");
        assert_eq!(strip_markdown("**Fuel** is *low*"), "Fuel is low");
        assert_eq!(strip_markdown("__hull__ at ~~90%~~ 80%"), "hull at 90% 80%");
        assert_eq!(strip_markdown("see [the map](https://example.com)"), "see the map");
        assert_eq!(strip_markdown("![radar](r.png) ahead"), "radar ahead");
        assert_eq!(strip_markdown("run `jump` now"), "run jump now");
        assert_eq!(strip_markdown("> - first\n2. second"), "first\nsecond");
        assert_eq!(strip_markdown("above\n---\nbelow"), "above\nbelow");
        assert_eq!(strip_markdown("<b>alert</b>"), "alert");
    }

    #[test]
    fn plain_symbols_survive_stripping() {
        assert_eq!(strip_markdown("2 * 3 * 4"), "2 * 3 * 4");
        assert_eq!(strip_markdown("call fuel_scoop_rate"), "call fuel_scoop_rate");
        assert_eq!(strip_markdown("a _quiet_ run"), "a quiet run");
    }

    #[test]
    fn fenced_code_keeps_contents() {
        assert_eq!(strip_markdown("```rust\nlet x = 1;\n```\ndone"), "let x = 1;\ndone");
    }

    #[test]
    fn prepare_text_collapses_whitespace() {
        assert_eq!(
            prepare_text("## Status\n\n**Cargo:** 1,250 tons", true),
            "Status Cargo: one thousand, two hundred and fifty tons"
        );
        assert_eq!(
            prepare_text("## Status\n\n**Cargo:** 1,250 tons", false),
            "Status Cargo: 1,250 tons"
        );
        assert_eq!(prepare_text("---\n\n", true), "");
    }
}
