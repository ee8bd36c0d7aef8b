//! Runs every stage for one raw input buffer.

use log::{debug, info, warn};

use crate::assemble::{SortOrder, Thread, ThreadAssembler};
use crate::dedup::{Deduplicator, Fingerprinted, DEFAULT_THRESHOLD};
use crate::error::Result;
use crate::extract::ThreadExtractor;
use crate::fingerprint::SimHashFingerprinter;
use crate::loader::MessageLoader;
use crate::message::{ContentKind, Message};
use crate::normalize;

/// Engine-facing settings for one reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub order: SortOrder,
    pub threshold: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            order: SortOrder::Ascending,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Reconstructs the deduplicated, ordered thread contained in `raw`.
///
/// Fails only when the input is not a message at all or the threshold is out
/// of range; everything else is recorded in `Thread::diagnostics`.
pub fn process(raw: &[u8], config: &EngineConfig) -> Result<Thread> {
    let deduplicator = Deduplicator::new(config.threshold)?;
    let tree = MessageLoader::load(raw)?;
    let (loaded, mut diagnostics) = tree.flatten();
    debug!("Loaded {} message(s) from MIME structure", loaded.len());

    let mut next_position = loaded.len();
    let mut messages: Vec<Message> = Vec::with_capacity(loaded.len());

    for mut message in loaded {
        message.content = message.content.replace("\r\n", "\n");
        if message.content_kind == ContentKind::Html {
            message.content = normalize::to_plain_text(&message.content);
            message.content_kind = ContentKind::Plain;
        }

        let quoted = ThreadExtractor::expand(&mut message, &mut next_position, &mut diagnostics);
        messages.push(message);
        messages.extend(quoted);
    }

    let fingerprinter = SimHashFingerprinter::default();
    let entries: Vec<Fingerprinted> = messages
        .into_iter()
        .map(|mut message| {
            message.content = normalize::normalize(&message.content);
            let fingerprint = fingerprinter.fingerprint(&message);
            Fingerprinted { message, fingerprint }
        })
        .collect();
    let discovered = entries.len();

    let deduplicated = deduplicator.deduplicate(entries);
    if !diagnostics.is_empty() {
        warn!("{} non-fatal diagnostic(s) while reconstructing thread", diagnostics.len());
        for diagnostic in &diagnostics {
            debug!("Diagnostic: {}", diagnostic);
        }
    }

    let thread = ThreadAssembler::assemble(deduplicated, config.order, diagnostics);
    info!(
        "Reconstructed thread: {} message(s) discovered, {} kept, {} duplicate(s) dropped",
        discovered,
        thread.len(),
        thread.duplicates_dropped()
    );

    Ok(thread)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Diagnostic, ThreadError};
    use crate::message::Provenance;

    #[test]
    fn test_message_without_quotes_is_a_single_leaf() {
        let raw = "From: Bob <bob@example.com>\r\nSubject: Hello\r\nDate: Mon, 15 Jan 2024 09:30:00 +0000\r\n\r\nJust checking in.\r\nNothing quoted here.\r\n";
        let thread = process(raw.as_bytes(), &EngineConfig::default()).expect("pipeline runs");

        assert_eq!(thread.len(), 1);
        let message = &thread.entries[0].message;
        assert_eq!(message.provenance, Provenance::Root);
        assert_eq!(message.content, "Just checking in.\nNothing quoted here.");
        assert!(thread.diagnostics.is_empty());
        assert_eq!(thread.duplicates_dropped(), 0);
    }

    #[test]
    fn test_html_body_is_converted_before_extraction() {
        let raw = "From: a@example.com\r\nSubject: Html\r\nContent-Type: text/html; charset=utf-8\r\n\r\n<p>Hello <b>there</b></p>\r\n";
        let thread = process(raw.as_bytes(), &EngineConfig::default()).expect("pipeline runs");

        let message = &thread.entries[0].message;
        assert_eq!(message.content_kind, ContentKind::Plain);
        assert!(message.content.contains("Hello"));
        assert!(!message.content.contains("<p>"));
    }

    #[test]
    fn test_html_quoted_reply_keeps_plain_sender_address() {
        let raw = "From: Bob <bob@example.com>\r\n\
Subject: Re: Ship date\r\n\
Date: Tue, 16 Jan 2024 10:00:00 +0000\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<div dir=\"ltr\">Sounds good.</div><div class=\"gmail_quote\"><div class=\"gmail_attr\">On Mon, Jan 15, 2024 at 9:30 AM Alice Johnson &lt;<a href=\"mailto:alice@example.com\">alice@example.com</a>&gt; wrote:<br></div><blockquote class=\"gmail_quote\">Can we ship on Friday?<br>QA is done.</blockquote></div>\r\n";
        let thread = process(raw.as_bytes(), &EngineConfig::default()).expect("pipeline runs");

        assert_eq!(thread.len(), 2);
        let quoted = thread
            .messages()
            .find(|m| matches!(m.provenance, Provenance::PatternExtracted(_)))
            .expect("quoted reply extracted");
        assert_eq!(quoted.sender, "Alice Johnson <alice@example.com>");
        assert_eq!(quoted.sender_address(), Some("alice@example.com".to_string()));
        assert_eq!(quoted.content, "Can we ship on Friday?\nQA is done.");
        for message in thread.messages() {
            assert!(!message.content.contains("mailto:"), "{}", message.content);
            assert!(!message.content.contains("[1]"), "{}", message.content);
        }
    }

    #[test]
    fn test_quoted_reply_becomes_its_own_message() {
        let raw = "From: Bob <bob@example.com>\r\n\
Subject: Re: Release\r\n\
Date: Tue, 16 Jan 2024 10:00:00 +0000\r\n\
\r\n\
Sounds good.\r\n\
\r\n\
On Monday, January 15, 2024 at 9:30 AM, Alice Johnson wrote:\r\n\
> Can we ship the release on Friday?\r\n";
        let thread = process(raw.as_bytes(), &EngineConfig::default()).expect("pipeline runs");

        assert_eq!(thread.len(), 2);
        assert_eq!(thread.entries[0].message.sender, "Alice Johnson");
        assert_eq!(thread.entries[0].message.content, "Can we ship the release on Friday?");
        assert_eq!(thread.entries[0].message.subject, "Release");
        assert_eq!(thread.entries[1].message.content, "Sounds good.");

        let descending = EngineConfig {
            order: SortOrder::Descending,
            ..EngineConfig::default()
        };
        let reversed = process(raw.as_bytes(), &descending).expect("pipeline runs");
        assert_eq!(reversed.entries[0].message.sender, "Bob <bob@example.com>");
    }

    #[test]
    fn test_quoted_copy_of_embedded_message_is_deduplicated() {
        let raw = "From: Bob <bob@example.com>\r\n\
Subject: Fwd: Budget\r\n\
Date: Wed, 17 Jan 2024 10:00:00 +0000\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"b1\"\r\n\
\r\n\
--b1\r\n\
Content-Type: text/plain\r\n\
\r\n\
See Alice's note.\r\n\
\r\n\
On Tue, Jan 16, 2024 at 9:00 AM Alice <alice@example.com> wrote:\r\n\
> The budget is approved for the second quarter.\r\n\
> Please book the vendors.\r\n\
--b1\r\n\
Content-Type: message/rfc822\r\n\
\r\n\
From: Alice <alice@example.com>\r\n\
Subject: Budget\r\n\
Date: Tue, 16 Jan 2024 09:00:00 +0000\r\n\
\r\n\
The budget is approved for the second quarter.\r\n\
Please book the vendors.\r\n\
--b1--\r\n";
        let thread = process(raw.as_bytes(), &EngineConfig::default()).expect("pipeline runs");

        assert_eq!(thread.len(), 2, "entries: {:?}", thread.entries);
        assert_eq!(thread.duplicates_dropped(), 1);
        // Equal dates: the MIME copy was discovered first.
        assert_eq!(thread.entries[0].message.provenance, Provenance::MimeEmbedded);
        assert_eq!(thread.entries[0].duplicates, 1);
    }

    #[test]
    fn test_threshold_zero_keeps_everything_distinct() {
        let raw = "From: a@example.com\r\nSubject: One\r\n\r\nFirst.\r\n\r\nOn 2024-01-15 09:30, Bob wrote:\r\n> Second.\r\n";
        let config = EngineConfig {
            threshold: 0,
            ..EngineConfig::default()
        };
        let thread = process(raw.as_bytes(), &config).expect("pipeline runs");
        assert_eq!(thread.len(), 2);
    }

    #[test]
    fn test_errors_and_diagnostics() {
        let bad_threshold = EngineConfig {
            threshold: 65,
            ..EngineConfig::default()
        };
        assert!(matches!(
            process(b"From: a@example.com\r\n\r\nx", &bad_threshold),
            Err(ThreadError::InvalidThreshold(65))
        ));
        assert!(matches!(
            process(b"", &EngineConfig::default()),
            Err(ThreadError::Parse(_))
        ));

        let raw = "From: a@example.com\r\nDate: not a date\r\n\r\nBody\r\n";
        let thread = process(raw.as_bytes(), &EngineConfig::default()).expect("pipeline runs");
        assert!(matches!(thread.diagnostics.as_slice(), [Diagnostic::DateParse { position: 0, .. }]));
    }
}
