//! Normalized message model shared by every pipeline stage.

use chrono::{DateTime, FixedOffset};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::Diagnostic;
use crate::extract::QuoteFormat;

/// Maximum nesting depth for both MIME-embedded and quote-extracted messages.
/// The root message sits at depth 0.
pub const MAX_NESTING_DEPTH: usize = 8;

/// How a message was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "format", rename_all = "snake_case")]
pub enum Provenance {
    Root,
    MimeEmbedded,
    PatternExtracted(QuoteFormat),
}

/// Whether `Message::content` still holds HTML markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Plain,
    Html,
}

/// A file attached to a message. Kept or dropped together with its owner.
#[derive(Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for AttachmentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentRef")
            .field("filename", &self.filename)
            .field("content_type", &self.content_type)
            .field("len", &self.data.len())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    /// Discovery position, unique within one input. Used as the stable tie-break.
    pub position: usize,
    pub date: Option<DateTime<FixedOffset>>,
    pub sender: String,
    pub recipients: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub content: String,
    pub content_kind: ContentKind,
    pub attachments: Vec<AttachmentRef>,
    pub provenance: Provenance,
    pub depth: usize,
}

impl Message {
    /// An empty message at the given depth; positions are assigned later.
    pub fn empty(provenance: Provenance, depth: usize) -> Self {
        Self {
            position: 0,
            date: None,
            sender: String::new(),
            recipients: Vec::new(),
            cc: Vec::new(),
            subject: String::new(),
            content: String::new(),
            content_kind: ContentKind::Plain,
            attachments: Vec::new(),
            provenance,
            depth,
        }
    }

    /// Bare address from the sender field, lower-cased, if one is present.
    pub fn sender_address(&self) -> Option<String> {
        address_of(&self.sender)
    }
}

/// Extracts the address part of `Name <addr>` or a bare `addr`.
pub fn address_of(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if let (Some(start), Some(end)) = (trimmed.rfind('<'), trimmed.rfind('>')) {
        if start < end {
            let addr = trimmed[start + 1..end].trim();
            if addr.contains('@') {
                return Some(addr.to_ascii_lowercase());
            }
        }
    }
    trimmed
        .split_whitespace()
        .find(|word| word.contains('@'))
        .map(|word| {
            word.trim_matches(|c: char| c == '<' || c == '>' || c == '"' || c == ',' || c == ';')
                .to_ascii_lowercase()
        })
}

static QUOTED_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]*)""#).expect("valid quoted name pattern"));
static NAME_ADDR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:^|[;,])\s*([^<>",;]+?)\s*<([^>]+)>"#).expect("valid name-address pattern")
});
static BARE_ADDR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid address pattern")
});

/// Splits a free-text `To:`/`Cc:` value into `Name <addr>`, bare `addr` or bare name items.
///
/// Tolerates wrapped lines, mixed `,`/`;` separators and quoted names containing
/// commas. Order of appearance is kept and duplicates are dropped.
pub fn split_recipients(field: &str) -> Vec<String> {
    let unquoted = QUOTED_NAME.replace_all(field, |caps: &regex::Captures| caps[1].replace([',', ';'], " "));
    let glued = unquoted.split_whitespace().collect::<Vec<_>>().join(" ");
    if glued.is_empty() {
        return Vec::new();
    }

    let mut found: Vec<(usize, String)> = Vec::new();
    let mut masked = glued.clone().into_bytes();

    for caps in NAME_ADDR.captures_iter(&glued) {
        let (Some(whole), Some(name), Some(addr)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        found.push((whole.start(), format!("{} <{}>", name.as_str().trim(), addr.as_str().trim())));
        for byte in &mut masked[whole.start()..whole.end()] {
            *byte = b',';
        }
    }

    let masked = String::from_utf8_lossy(&masked).into_owned();
    let mut offset = 0;
    for piece in masked.split([',', ';']) {
        let start = offset;
        offset += piece.len() + 1;
        let trimmed = piece.trim();
        if trimmed.is_empty() {
            continue;
        }
        let item = BARE_ADDR
            .find(trimmed)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| trimmed.to_string());
        found.push((start, item));
    }

    found.sort_by_key(|(start, _)| *start);
    let mut seen = std::collections::HashSet::new();
    found
        .into_iter()
        .map(|(_, item)| item)
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// A message as discovered by the loader, before flattening.
#[derive(Debug, Clone)]
pub struct MessageTree {
    pub message: Message,
    pub embedded: Vec<MessageTree>,
    /// Set when embedded parts were left unexpanded because of the depth limit.
    pub truncated: bool,
    /// A `Date:` header that was present but could not be interpreted.
    pub unparsed_date: Option<String>,
}

impl MessageTree {
    pub fn leaf(message: Message) -> Self {
        Self {
            message,
            embedded: Vec::new(),
            truncated: false,
            unparsed_date: None,
        }
    }

    /// Pre-order walk with an explicit stack, assigning discovery positions from 0.
    ///
    /// Conditions recorded by the loader come back as diagnostics bound to the
    /// positions just assigned.
    pub fn flatten(self) -> (Vec<Message>, Vec<Diagnostic>) {
        let mut out = Vec::new();
        let mut diagnostics = Vec::new();
        let mut stack = vec![self];

        while let Some(node) = stack.pop() {
            let MessageTree {
                mut message,
                embedded,
                truncated,
                unparsed_date,
            } = node;
            message.position = out.len();
            if let Some(raw) = unparsed_date {
                diagnostics.push(Diagnostic::DateParse {
                    position: message.position,
                    raw,
                });
            }
            if truncated {
                diagnostics.push(Diagnostic::DepthLimitExceeded {
                    position: message.position,
                    depth: message.depth,
                });
            }
            out.push(message);
            // Reverse so the first embedded part is visited next.
            stack.extend(embedded.into_iter().rev());
        }

        (out, diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_of_variants() {
        assert_eq!(
            address_of("Alice Johnson <Alice@Example.com>").as_deref(),
            Some("alice@example.com")
        );
        assert_eq!(address_of("bob@example.com").as_deref(), Some("bob@example.com"));
        assert_eq!(address_of("Alice Johnson"), None);
        assert_eq!(address_of(""), None);
    }

    #[test]
    fn test_split_recipients_mixed_separators() {
        let field = "Bob Smith <bob@example.com>; carol@example.com,\r\n  Dave Jones";
        assert_eq!(
            split_recipients(field),
            vec!["Bob Smith <bob@example.com>", "carol@example.com", "Dave Jones"]
        );
    }

    #[test]
    fn test_split_recipients_quoted_comma_and_duplicates() {
        let field = "\"Doe, John\" <john@example.com>, john@example.com, \"Doe, John\" <john@example.com>";
        assert_eq!(
            split_recipients(field),
            vec!["Doe John <john@example.com>", "john@example.com"]
        );
        assert!(split_recipients("   ").is_empty());
    }

    #[test]
    fn test_flatten_assigns_preorder_positions() {
        let mut root = MessageTree::leaf(Message::empty(Provenance::Root, 0));
        root.message.subject = "root".into();

        let mut first = MessageTree::leaf(Message::empty(Provenance::MimeEmbedded, 1));
        first.message.subject = "first".into();
        let mut nested = MessageTree::leaf(Message::empty(Provenance::MimeEmbedded, 2));
        nested.message.subject = "nested".into();
        nested.truncated = true;
        nested.unparsed_date = Some("someday".into());
        first.embedded.push(nested);

        let mut second = MessageTree::leaf(Message::empty(Provenance::MimeEmbedded, 1));
        second.message.subject = "second".into();

        root.embedded.push(first);
        root.embedded.push(second);

        let (messages, diagnostics) = root.flatten();
        let subjects: Vec<_> = messages.iter().map(|m| m.subject.as_str()).collect();
        assert_eq!(subjects, vec!["root", "first", "nested", "second"]);
        let positions: Vec<_> = messages.iter().map(|m| m.position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3]);
        assert_eq!(
            diagnostics,
            vec![
                Diagnostic::DateParse {
                    position: 2,
                    raw: "someday".into()
                },
                Diagnostic::DepthLimitExceeded {
                    position: 2,
                    depth: 2
                },
            ]
        );
    }
}
