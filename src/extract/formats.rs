//! Quote dialect table: boundary patterns plus pseudo-header extractors.
//!
//! The table is compiled once on first use and never mutated afterwards.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;

use crate::message::split_recipients;

/// Quoting conventions recognized inside body text, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteFormat {
    /// `From:` / `Sent:` / `To:` / `Subject:` block, optionally behind
    /// `-----Original Message-----` or an underscore rule.
    Outlook,
    /// `---------- Forwarded message ---------` followed by a header block.
    Forwarded,
    /// `On <date> at <time>, <person> wrote:`
    Gmail,
    /// `On <date>, <person> wrote:` without a clock time.
    GenericWrote,
}

/// Pseudo-headers and nested text recovered from a quote boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotedHeader {
    pub sender: String,
    pub date_text: String,
    pub recipients: Vec<String>,
    pub cc: Vec<String>,
    pub subject: Option<String>,
    pub content: String,
}

pub(crate) struct Dialect {
    pub format: QuoteFormat,
    pub boundary: Regex,
    /// Receives the boundary captures and the text from the boundary start onward.
    pub extract: fn(&Captures<'_>, &str) -> Option<QuotedHeader>,
}

pub(crate) static DIALECTS: Lazy<Vec<Dialect>> = Lazy::new(|| {
    vec![
        Dialect {
            format: QuoteFormat::Outlook,
            boundary: Regex::new(
                r"(?mi)^[ \t]*(?:(?:-{2,}[ \t]*Original Message[ \t]*-{2,}|_{6,})[ \t]*\n(?:[ \t]*\n)*[ \t]*)?\*{0,2}From:\*{0,2}[ \t]*[^\n]*\S[^\n]*\n(?:[^\n]*\n){0,2}?[ \t]*\*{0,2}(?:Sent|Date):",
            )
            .expect("valid Outlook boundary pattern"),
            extract: extract_header_block,
        },
        Dialect {
            format: QuoteFormat::Forwarded,
            boundary: Regex::new(
                r"(?mi)^[ \t]*(?:-{2,}[ \t]*Forwarded message[ \t]*-{2,}|Begin forwarded message:)[ \t]*$",
            )
            .expect("valid forwarded boundary pattern"),
            extract: extract_header_block,
        },
        Dialect {
            format: QuoteFormat::Gmail,
            boundary: Regex::new(
                r"(?m)^[ \t]*On[ \t]+(?P<date>[^\n]*?\d{1,2}:\d{2}(?::\d{2})?(?:[ \t]*[AaPp]\.?[Mm]\.?)?)[ \t]*,?[ \t]*(?P<who>[^\n]*?)[ \t]*\n?[ \t]*wrote:[ \t]*$",
            )
            .expect("valid Gmail boundary pattern"),
            extract: extract_attribution,
        },
        Dialect {
            format: QuoteFormat::GenericWrote,
            boundary: Regex::new(
                r"(?m)^[ \t]*On[ \t]+(?P<date>[^\n]+),[ \t]*(?P<who>[^,\n]+?)[ \t]+wrote:[ \t]*$",
            )
            .expect("valid generic attribution pattern"),
            extract: extract_attribution,
        },
    ]
});

static HEADER_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[ \t]*\*{0,2}(From|Sent|Date|To|Cc|Subject):\*{0,2}[ \t]*(.*)$")
        .expect("valid header line pattern")
});

/// `On ... wrote:` forms. The nested content is everything after the attribution line.
fn extract_attribution(caps: &Captures<'_>, block: &str) -> Option<QuotedHeader> {
    let whole = caps.get(0)?;
    let date_text = caps.name("date")?.as_str().trim().to_string();
    let sender = clean_sender(caps.name("who")?.as_str());

    // A date without a single digit is a sentence, not an attribution.
    if !date_text.chars().any(|c| c.is_ascii_digit()) || !is_plausible_sender(&sender) {
        return None;
    }

    let rest = block.get(whole.end() - whole.start()..).unwrap_or("");
    Some(QuotedHeader {
        sender,
        date_text,
        content: strip_quote_level(rest.trim_start_matches('\n')),
        ..Default::default()
    })
}

/// Outlook and forwarded blocks: parse `Key: value` lines up to the first blank line.
fn extract_header_block(_caps: &Captures<'_>, block: &str) -> Option<QuotedHeader> {
    let mut header = QuotedHeader::default();
    let mut to_field = String::new();
    let mut cc_field = String::new();
    let mut last_key: Option<String> = None;
    let mut started = false;
    let mut consumed = 0usize;

    for line in block.split_inclusive('\n') {
        let text = line.trim_end_matches('\n');

        if let Some(caps) = HEADER_LINE.captures(text) {
            started = true;
            let key = caps[1].to_ascii_lowercase();
            let value = caps[2].trim().to_string();
            match key.as_str() {
                "from" => header.sender = clean_sender(&value),
                "sent" | "date" => header.date_text = value,
                "to" => to_field = value,
                "cc" => cc_field = value,
                "subject" => header.subject = Some(value),
                _ => {}
            }
            last_key = Some(key);
        } else if !started {
            // Separator rule or blank lines in front of the block.
            if !text.trim().is_empty() && consumed > 0 {
                return None;
            }
        } else if text.trim().is_empty() {
            consumed += line.len();
            break;
        } else {
            // Wrapped address lists continue on the following line.
            match last_key.as_deref() {
                Some("to") => {
                    to_field.push(' ');
                    to_field.push_str(text.trim());
                }
                Some("cc") => {
                    cc_field.push(' ');
                    cc_field.push_str(text.trim());
                }
                _ => break,
            }
        }
        consumed += line.len();
    }

    if header.sender.is_empty() || header.date_text.is_empty() || !is_plausible_sender(&header.sender) {
        return None;
    }

    header.recipients = split_recipients(&to_field);
    header.cc = split_recipients(&cc_field);
    header.content = strip_quote_level(block.get(consumed..).unwrap_or(""));
    Some(header)
}

fn clean_sender(raw: &str) -> String {
    raw.replace('"', "").trim().trim_end_matches(',').trim().to_string()
}

fn is_plausible_sender(sender: &str) -> bool {
    !sender.is_empty() && sender.len() <= 200 && sender.chars().any(char::is_alphanumeric)
}

/// Removes one level of `>` quoting from every line that carries it.
pub fn strip_quote_level(text: &str) -> String {
    text.lines()
        .map(|line| {
            let trimmed = line.trim_start();
            match trimmed.strip_prefix('>') {
                Some(rest) => rest.strip_prefix(' ').unwrap_or(rest),
                None => line,
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
