//! Display helpers for archive messages
//!
//! Mailing list archives carry a lot of transport noise: list footers,
//! `[swift-evolution]` subject tags, obfuscated sender addresses. These
//! functions strip it for display. None of them touch the cache.

use std::ops::Range;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::types::Message;

static FOOTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)_{47}.*$").expect("valid footer regex"));

static LEADING_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[.*?\]").expect("valid tag regex"));

static BRACKET_LABELS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\[[^\]]*\]\s*)+").expect("valid label regex"));

static ISSUE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^([a-z]+-[0-9]+):?").expect("valid issue key regex"));

static WITHIN_PARENS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\((.*)\)").expect("valid name regex"));

/// RFC 2822 style, as written in the archive's `Date:` headers
const SOURCE_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";
const DISPLAY_DATE_FORMAT: &str = "%-d %b";

/// Senders whose name the archive failed to decode
const UNDECODED_NAME_PREFIX: &str = "=?utf-8?";

#[derive(Debug, Clone, Default)]
pub struct EmailFormatter;

impl EmailFormatter {
    pub fn new() -> Self {
        Self
    }

    /// Drops the list footer and everything after it.
    pub fn format_content(&self, content: &str) -> String {
        FOOTER.replace(content, "").into_owned()
    }

    /// `[swift-evolution] Proposal` → `Proposal`
    pub fn format_subject(&self, subject: &str) -> String {
        LEADING_TAG.replace(subject, "").trim().to_string()
    }

    /// Leading bracketed labels followed by the issue key, if any.
    pub fn labels_in_subject(&self, subject: &str) -> Vec<String> {
        let mut labels = bracket_labels(subject);
        if let Some(key) = issue_key(subject) {
            labels.push(key);
        }
        labels
    }

    /// Subject text with every label removed. A subject that is nothing but
    /// an issue key keeps the key.
    pub fn subject_without_labels(&self, subject: &str) -> String {
        let without_brackets = strip_bracket_labels(subject);
        let without_key = ISSUE_KEY.replace(&without_brackets, "").trim().to_string();

        if without_key.is_empty() {
            without_brackets
        } else {
            without_key
        }
    }

    /// Display name out of an archive `from` value such as
    /// `jane at example.com (Jane Appleseed)`.
    pub fn format_name(&self, from: &str) -> String {
        let name = WITHIN_PARENS
            .captures(from)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .unwrap_or(from);

        if name.starts_with(UNDECODED_NAME_PREFIX) {
            String::new()
        } else {
            name.to_string()
        }
    }

    pub fn parse_source_date(&self, date: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_str(date.trim(), SOURCE_DATE_FORMAT)
            .ok()
            .map(|d| d.with_timezone(&Utc))
    }

    /// Short day and month, e.g. `25 Feb`
    pub fn format_date(&self, date: &DateTime<Utc>) -> String {
        date.format(DISPLAY_DATE_FORMAT).to_string()
    }

    /// Byte ranges of consecutive quoted (`>`) lines, each including the
    /// trailing newline of its last line.
    pub fn quote_ranges(&self, content: &str) -> Vec<Range<usize>> {
        let mut ranges: Vec<Range<usize>> = Vec::new();
        let mut offset = 0;

        for line in content.split_inclusive('\n') {
            let end = offset + line.len();

            if line.trim_start().starts_with('>') {
                match ranges.last_mut() {
                    Some(last) if last.end == offset => last.end = end,
                    _ => ranges.push(offset..end),
                }
            }

            offset = end;
        }

        ranges
    }

    /// Splits content into alternating static and quoted regions. The
    /// regions cover the whole text in order and none is empty.
    pub fn text_regions(&self, content: &str) -> Vec<TextRegion> {
        let mut regions = Vec::new();
        let mut cursor = 0;

        for quoted in self.quote_ranges(content) {
            if quoted.start > cursor {
                regions.push(TextRegion::new(RegionKind::Static, cursor..quoted.start));
            }
            cursor = quoted.end;
            regions.push(TextRegion::new(RegionKind::Quoted, quoted));
        }

        if cursor < content.len() {
            regions.push(TextRegion::new(RegionKind::Static, cursor..content.len()));
        }

        regions
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionKind {
    /// Shown as is
    Static,
    /// Quoted reply text, collapsed by default
    Quoted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextRegion {
    pub kind: RegionKind,
    pub range: Range<usize>,
}

impl TextRegion {
    fn new(kind: RegionKind, range: Range<usize>) -> Self {
        Self { kind, range }
    }

    /// `None` when `content` is not the text the region was computed from
    pub fn text<'a>(&self, content: &'a str) -> Option<&'a str> {
        content.get(self.range.clone())
    }
}

/// Where a search phrase was found in a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMatch {
    Subject,
    From,
    Content,
}

impl SearchMatch {
    /// Subject wins over sender. Anything else the archive matched on is
    /// taken to be in the body.
    pub fn classify(message: &Message, phrase: &str) -> Self {
        let needle = phrase.to_lowercase();

        if message.subject.to_lowercase().contains(&needle) {
            SearchMatch::Subject
        } else if message.from.to_lowercase().contains(&needle) {
            SearchMatch::From
        } else {
            SearchMatch::Content
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SearchMatch::Subject => "subject",
            SearchMatch::From => "from",
            SearchMatch::Content => "content",
        }
    }
}

fn bracket_labels(subject: &str) -> Vec<String> {
    let Some(found) = BRACKET_LABELS.find(subject) else {
        return Vec::new();
    };

    found
        .as_str()
        .split(']')
        .map(|label| label.replace('[', "").trim().to_string())
        .filter(|label| !label.is_empty())
        .collect()
}

fn strip_bracket_labels(subject: &str) -> String {
    BRACKET_LABELS.replace(subject, "").trim().to_string()
}

// Bracketed labels conventionally come first, so the key is looked for
// after them.
fn issue_key(subject: &str) -> Option<String> {
    let rest = strip_bracket_labels(subject);
    ISSUE_KEY
        .find(&rest)
        .map(|m| m.as_str().trim_matches(':').to_string())
}
