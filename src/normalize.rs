//! Text normalization for localization cells.
//!
//! Cells coming out of spreadsheets carry carriage-return debris and inline
//! game codes (`{ItemName}`, `<PAColor0xffe9bd23>`, `</b>` ...). The codes
//! must not influence similarity, yet they must come back untouched in the
//! translated output. `extract_codes` swaps each code for a positional
//! placeholder delimited by two private-use characters; `restore_codes`
//! puts them back.
use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

/// Reserved code patterns, in priority order.
const CODE_PATTERNS: &[&str] = &[
    // {Item1}, {0}, {AuctionPrice:Silver}
    r"\{[^{}\n]*\}",
    // <PAColor0xffe9bd23>, <PAOldColor>, </b>, <br/>
    r"</?[A-Za-z][^<>\n]*>",
];

/// Placeholder delimiters. Input containing these characters is not
/// guaranteed to round-trip.
pub const PLACEHOLDER_OPEN: char = '\u{E000}';
pub const PLACEHOLDER_CLOSE: char = '\u{E001}';

/// Spreadsheet exports escape a stray CR as this literal.
const EXCEL_CR_ESCAPE: &str = "_x000D_";

static CODE_REGEX: Lazy<Regex> = Lazy::new(|| {
    let alternation = CODE_PATTERNS
        .iter()
        .map(|p| format!("(?:{p})"))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&alternation).expect("code patterns are valid")
});

static PLACEHOLDER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new("\u{E000}([0-9]+)\u{E001}").expect("placeholder pattern is valid"));

/// Clean a raw cell value: drop CR artifacts and surrounding whitespace.
///
/// Accepts anything printable so numeric or boolean cells never fail here.
pub fn clean<T: fmt::Display + ?Sized>(raw: &T) -> String {
    let mut text = raw.to_string();
    // removing one escape can splice together another
    while text.contains(EXCEL_CR_ESCAPE) {
        text = text.replace(EXCEL_CR_ESCAPE, "");
    }
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    text.trim().to_string()
}

/// Non-empty, trimmed lines of `text`.
pub fn non_empty_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty())
}

/// Number of non-empty lines, the quantity pool classification compares.
#[must_use]
pub fn line_count(text: &str) -> usize {
    non_empty_lines(text).count()
}

/// Text with its code tokens replaced by positional placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText {
    text: String,
    tokens: Vec<String>,
    leading: usize,
}

impl NormalizedText {
    /// Placeholder text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Extracted tokens, first occurrence first.
    #[must_use]
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Tokens sitting at the very start of the string (only whitespace
    /// before or between them).
    #[must_use]
    pub fn leading_tokens(&self) -> &[String] {
        &self.tokens[..self.leading]
    }

    /// The verbatim prefix formed by the leading tokens, including the
    /// whitespace that followed them in the original.
    #[must_use]
    pub fn leading_prefix(&self) -> String {
        if self.leading == 0 {
            return String::new();
        }
        let mut end = 0;
        for (n, caps) in PLACEHOLDER_REGEX.captures_iter(&self.text).enumerate() {
            if n == self.leading {
                break;
            }
            if let Some(m) = caps.get(0) {
                end = m.end();
            }
        }
        let rest = &self.text[end..];
        let ws = rest.len() - rest.trim_start().len();
        fill_placeholders(&self.text[..end + ws], |i| self.tokens.get(i).map(String::as_str))
    }

    /// Text used for embedding: placeholders dropped, whitespace collapsed.
    #[must_use]
    pub fn key(&self) -> String {
        let stripped = PLACEHOLDER_REGEX.replace_all(&self.text, " ");
        stripped.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[must_use]
    pub fn has_codes(&self) -> bool {
        !self.tokens.is_empty()
    }
}

/// Replace every reserved code in `text` with a positional placeholder.
pub fn extract_codes(text: &str) -> NormalizedText {
    let mut out = String::with_capacity(text.len());
    let mut tokens = Vec::new();
    let mut leading = 0;
    let mut at_start = true;
    let mut last = 0;

    for m in CODE_REGEX.find_iter(text) {
        let gap = &text[last..m.start()];
        if at_start && gap.trim().is_empty() {
            leading += 1;
        } else {
            at_start = false;
        }
        out.push_str(gap);
        out.push(PLACEHOLDER_OPEN);
        out.push_str(&tokens.len().to_string());
        out.push(PLACEHOLDER_CLOSE);
        tokens.push(m.as_str().to_string());
        last = m.end();
    }
    out.push_str(&text[last..]);

    NormalizedText {
        text: out,
        tokens,
        leading,
    }
}

/// Put the extracted tokens back where they came from.
#[must_use]
pub fn restore_codes(normalized: &NormalizedText) -> String {
    fill_placeholders(&normalized.text, |i| {
        normalized.tokens.get(i).map(String::as_str)
    })
}

/// Restore `target` (a matched translation) using the query's codes.
///
/// A target token equal to the entry source's i-th token is replaced by the
/// query's i-th token, so `{Item1} 획득` → `Obtained {Item1}` can serve a
/// query `{Item2} 획득`. If none of the query's leading tokens survive in
/// the result, the query's verbatim prefix is prepended.
#[must_use]
pub fn transfer_codes(
    query: &NormalizedText,
    entry_source: &NormalizedText,
    target: &NormalizedText,
) -> String {
    let mut substitutions: HashMap<&str, &str> = HashMap::new();
    for (from, to) in entry_source.tokens.iter().zip(query.tokens.iter()) {
        substitutions.entry(from.as_str()).or_insert(to.as_str());
    }

    let restored = fill_placeholders(&target.text, |i| {
        target
            .tokens
            .get(i)
            .map(|t| substitutions.get(t.as_str()).copied().unwrap_or(t.as_str()))
    });

    let leading = query.leading_tokens();
    if !leading.is_empty() && !leading.iter().any(|t| restored.contains(t.as_str())) {
        return format!("{}{restored}", query.leading_prefix());
    }
    restored
}

fn fill_placeholders<'a>(text: &str, lookup: impl Fn(usize) -> Option<&'a str>) -> String {
    PLACEHOLDER_REGEX
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let whole = &caps[0];
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(&lookup)
                .unwrap_or(whole)
                .to_string()
        })
        .into_owned()
}
