//! Plain-text normalization of message bodies.
//!
//! HTML is converted with `html2text` (falling back to tag stripping), then
//! quote markers are removed and whitespace is collapsed. Every function here is
//! deterministic and infallible.

use html2text::render::TrivialDecorator;
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;

/// Wrap width handed to `html2text`. Wide enough that attribution lines stay on one line.
const HTML_WRAP_WIDTH: usize = 400;

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag pattern"));
static BLOCK_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<\s*(?:br|/p|/div|/tr|/li|/h[1-6])\s*/?>").expect("valid block tag pattern")
});
static SCRIPT_OR_STYLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style)\b.*?</(?:script|style)\s*>").expect("valid script pattern")
});
static QUOTE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[ \t]*(?:>[ \t]?)+").expect("valid quote prefix pattern"));
static INNER_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\u{a0}]+").expect("valid whitespace pattern"));
static SUBJECT_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(?:re|fw|fwd)\s*:\s*").expect("valid subject prefix pattern"));

/// Converts an HTML body to plain text.
///
/// Link targets, emphasis markers and quote prefixes are left out, so an
/// address inside `<a href="mailto:..">` comes through as the bare address.
pub fn to_plain_text(html: &str) -> String {
    match html2text::from_read_with_decorator(html.as_bytes(), HTML_WRAP_WIDTH, TrivialDecorator::new()) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to convert HTML body, falling back to tag stripping: {}", e);
            strip_tags(html)
        }
    }
}

/// Crude HTML-to-text conversion: drops scripts and tags, decodes common entities.
pub fn strip_tags(html: &str) -> String {
    let without_scripts = SCRIPT_OR_STYLE.replace_all(html, "");
    let with_breaks = BLOCK_TAG.replace_all(&without_scripts, "\n");
    let text = TAG.replace_all(&with_breaks, "");
    decode_entities(&text)
}

/// Decodes the named entities that commonly survive in mail bodies, plus numeric ones.
pub fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').filter(|&end| end <= 10).and_then(|end| {
            let entity = &tail[1..end];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" | "#39" => Some('\''),
                "nbsp" => Some(' '),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|c| (c, end))
        });

        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Produces the final plain-text form of a body.
///
/// Strips quote markers, collapses whitespace runs inside lines, trims line
/// ends, keeps at most one blank line in a row and trims the whole text.
pub fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<String> = Vec::new();
    let mut blank_run = false;

    for line in unified.lines() {
        let unquoted = QUOTE_PREFIX.replace(line, "");
        let collapsed = INNER_WS.replace_all(&unquoted, " ");
        let cleaned = collapsed.trim();

        if cleaned.is_empty() {
            if !blank_run && !lines.is_empty() {
                lines.push(String::new());
            }
            blank_run = true;
        } else {
            lines.push(cleaned.to_string());
            blank_run = false;
        }
    }

    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    let result = lines.join("\n");
    debug!("Normalized {} bytes of content to {} bytes", text.len(), result.len());
    result
}

/// Removes repeated `Re:`/`Fw:`/`Fwd:` prefixes.
pub fn strip_subject_prefixes(subject: &str) -> String {
    let mut current = subject.trim().to_string();
    loop {
        let next = SUBJECT_PREFIX.replace(&current, "").into_owned();
        if next == current {
            return current;
        }
        current = next;
    }
}
