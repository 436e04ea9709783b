//! Final message assembly: content conversion, mention rewriting and the
//! provenance header prepended to every published message.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::convert::{is_code_fence, ContentConverter};
use crate::model::{PostId, ThreadId};

/// Timestamps further ahead than this are treated as corrupt source data.
const MAX_FUTURE_YEARS: i64 = 10;
const SECONDS_PER_YEAR: i64 = 365 * 24 * 60 * 60;

lazy_static! {
    static ref MENTION: Regex = Regex::new(r"@([a-zA-Z0-9_-]*[a-zA-Z]+[a-zA-Z0-9_-]*)\b").unwrap();
    static ref EMAIL_ADDRESS: Regex =
        Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").unwrap();
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("message author is empty")]
    EmptyAuthor,
    #[error("thread id must be positive, got {0}")]
    InvalidThreadId(i64),
    #[error("timestamp {0} is negative")]
    NegativeTimestamp(i64),
    #[error("timestamp {0} lies too far in the future")]
    FutureTimestamp(i64),
}

/// Provenance of one published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub author: String,
    /// Unix seconds.
    pub posted_at: i64,
    pub thread_id: i64,
    pub post_id: PostId,
}

impl MessageHeader {
    pub fn new(author: impl Into<String>, posted_at: i64, thread_id: ThreadId, post_id: PostId) -> Self {
        Self {
            author: author.into(),
            posted_at,
            thread_id: i64::try_from(thread_id).unwrap_or(i64::MAX),
            post_id,
        }
    }
}

/// Rewrites `@name` mentions to bold names.
///
/// Email addresses and lines inside fenced code blocks are left alone, and a
/// name must contain at least one letter so `@123` stays as written.
pub fn convert_mentions(text: &str) -> String {
    let mut in_fence = false;
    let mut lines = Vec::new();
    for line in text.split('\n') {
        if is_code_fence(line) {
            in_fence = !in_fence;
            lines.push(line.to_string());
        } else if in_fence {
            lines.push(line.to_string());
        } else {
            lines.push(convert_line_mentions(line));
        }
    }
    lines.join("\n")
}

fn convert_line_mentions(line: &str) -> String {
    let emails: Vec<(usize, usize)> = EMAIL_ADDRESS
        .find_iter(line)
        .map(|m| (m.start(), m.end()))
        .collect();

    let mut output = String::with_capacity(line.len());
    let mut cursor = 0;
    for caps in MENTION.captures_iter(line) {
        let Some(whole) = caps.get(0) else { continue };
        let inside_email = emails
            .iter()
            .any(|&(start, end)| whole.start() >= start && whole.start() < end);
        if inside_email {
            continue;
        }
        output.push_str(&line[cursor..whole.start()]);
        output.push_str("**");
        output.push_str(&caps[1]);
        output.push_str("**");
        cursor = whole.end();
    }
    output.push_str(&line[cursor..]);
    output
}

#[derive(Debug, Clone, Default)]
pub struct MessageFormatter {
    converter: ContentConverter,
}

impl MessageFormatter {
    pub fn new(converter: ContentConverter) -> Self {
        Self { converter }
    }

    /// Converts raw markup and rewrites mentions. Attachment tokens survive.
    pub fn render_content(&self, raw: &str) -> String {
        convert_mentions(&self.converter.convert(raw))
    }

    pub fn format_message(&self, header: &MessageHeader, content: &str) -> Result<String, FormatError> {
        self.format_message_at(header, content, Utc::now())
    }

    /// Same as [`format_message`](Self::format_message) with an explicit
    /// reference time for the future-timestamp check.
    pub fn format_message_at(
        &self,
        header: &MessageHeader,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<String, FormatError> {
        let author = header.author.trim();
        if author.is_empty() {
            return Err(FormatError::EmptyAuthor);
        }
        if header.thread_id <= 0 {
            return Err(FormatError::InvalidThreadId(header.thread_id));
        }
        if header.posted_at < 0 {
            return Err(FormatError::NegativeTimestamp(header.posted_at));
        }
        let horizon = now.timestamp().saturating_add(MAX_FUTURE_YEARS * SECONDS_PER_YEAR);
        if header.posted_at > horizon {
            return Err(FormatError::FutureTimestamp(header.posted_at));
        }
        let posted = DateTime::<Utc>::from_timestamp(header.posted_at, 0)
            .ok_or(FormatError::FutureTimestamp(header.posted_at))?;

        Ok(format!(
            "---\nAuthor: **{author}**\nPosted: {}\nOriginal Thread ID: {}\nOriginal Post ID: {}\n---\n\n{content}",
            posted.format("%Y-%m-%d %H:%M:%S UTC"),
            header.thread_id,
            header.post_id,
        ))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn mentions_become_bold() {
        assert_eq!(convert_mentions("Hello @john"), "Hello **john**");
        assert_eq!(convert_mentions("@a_b-c and @x1"), "**a_b-c** and **x1**");
    }

    #[test]
    fn emails_and_numeric_handles_are_untouched() {
        assert_eq!(convert_mentions("mail me at john@example.com"), "mail me at john@example.com");
        assert_eq!(convert_mentions("ticket @123"), "ticket @123");
    }

    #[test]
    fn fenced_code_keeps_mentions() {
        let text = "hi @ann\n```\n@decorator\n```\nbye @bob";
        assert_eq!(convert_mentions(text), "hi **ann**\n```\n@decorator\n```\nbye **bob**");

        let quoted = "> ```\n> @decorator\n> ```\n> @ann";
        assert_eq!(convert_mentions(quoted), "> ```\n> @decorator\n> ```\n> **ann**");
    }

    #[test]
    fn header_layout() {
        let formatter = MessageFormatter::default();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let header = MessageHeader::new("alice", 1_700_000_000, 12, 34);
        let message = formatter.format_message_at(&header, "body", now).unwrap();
        assert_eq!(
            message,
            "---\nAuthor: **alice**\nPosted: 2023-11-14 22:13:20 UTC\nOriginal Thread ID: 12\nOriginal Post ID: 34\n---\n\nbody"
        );
    }

    #[test]
    fn invalid_headers_are_rejected() {
        let formatter = MessageFormatter::default();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let blank = MessageHeader::new("  ", 10, 1, 1);
        assert_eq!(formatter.format_message_at(&blank, "", now), Err(FormatError::EmptyAuthor));

        let mut zero_thread = MessageHeader::new("a", 10, 1, 1);
        zero_thread.thread_id = 0;
        assert_eq!(
            formatter.format_message_at(&zero_thread, "", now),
            Err(FormatError::InvalidThreadId(0))
        );

        let negative = MessageHeader::new("a", -1, 1, 1);
        assert_eq!(
            formatter.format_message_at(&negative, "", now),
            Err(FormatError::NegativeTimestamp(-1))
        );

        let far = now.timestamp() + 11 * SECONDS_PER_YEAR;
        let future = MessageHeader::new("a", far, 1, 1);
        assert_eq!(
            formatter.format_message_at(&future, "", now),
            Err(FormatError::FutureTimestamp(far))
        );
    }

    #[test]
    fn empty_content_is_allowed() {
        let formatter = MessageFormatter::default();
        let header = MessageHeader::new("a", 0, 1, 1);
        let message = formatter.format_message(&header, "").unwrap();
        assert!(message.ends_with("---\n\n"));
    }
}
