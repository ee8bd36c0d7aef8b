use super::*;
use crate::error::Diagnostic;
use chrono::{Datelike, Timelike};

const SIMPLE: &str = "From: Alice Johnson <alice@example.com>\r\n\
To: Bob <bob@example.com>, carol@example.com\r\n\
Cc: \"Doe, Dana\" <dana@example.com>\r\n\
Subject: Launch plan\r\n\
Date: Mon, 15 Jan 2024 09:30:00 +0000\r\n\
\r\n\
Hi all,\r\n\
The launch is on Friday.\r\n";

#[test]
fn test_load_simple_message() {
    let tree = MessageLoader::load(SIMPLE.as_bytes()).expect("simple message should load");
    let message = &tree.message;

    assert_eq!(message.provenance, Provenance::Root);
    assert_eq!(message.depth, 0);
    assert_eq!(message.sender, "Alice Johnson <alice@example.com>");
    assert_eq!(message.recipients, vec!["Bob <bob@example.com>", "carol@example.com"]);
    assert_eq!(message.cc, vec!["Doe, Dana <dana@example.com>"]);
    assert_eq!(message.subject, "Launch plan");
    assert_eq!(message.content_kind, ContentKind::Plain);
    assert!(message.content.contains("The launch is on Friday."));

    let date = message.date.expect("date should parse");
    assert_eq!((date.year(), date.month(), date.day(), date.hour()), (2024, 1, 15, 9));
    assert!(tree.embedded.is_empty());
    assert!(tree.unparsed_date.is_none());
}

#[test]
fn test_headers_are_case_insensitive_and_optional() {
    let raw = "SUBJECT: shouting\r\nfrom: quiet@example.com\r\n\r\nBody only.\r\n";
    let tree = MessageLoader::load(raw.as_bytes()).expect("message should load");

    assert_eq!(tree.message.subject, "shouting");
    assert_eq!(tree.message.sender, "quiet@example.com");
    assert!(tree.message.recipients.is_empty());
    assert!(tree.message.cc.is_empty());
    assert!(tree.message.date.is_none());
    assert!(tree.unparsed_date.is_none());
}

#[test]
fn test_unparseable_date_is_recorded() {
    let raw = "From: a@example.com\r\nDate: the day after tomorrow\r\n\r\nBody\r\n";
    let tree = MessageLoader::load(raw.as_bytes()).expect("message should load");

    assert!(tree.message.date.is_none());
    assert_eq!(tree.unparsed_date.as_deref(), Some("the day after tomorrow"));

    let (_, diagnostics) = tree.flatten();
    assert_eq!(
        diagnostics,
        vec![Diagnostic::DateParse {
            position: 0,
            raw: "the day after tomorrow".to_string()
        }]
    );
}

#[test]
fn test_encoded_word_subject_is_decoded() {
    let raw = "From: a@example.com\r\nSubject: =?UTF-8?B?Q2Fmw6kgbWVldGluZw==?=\r\n\r\nBody\r\n";
    let tree = MessageLoader::load(raw.as_bytes()).expect("message should load");
    assert_eq!(tree.message.subject, "Café meeting");
}

#[test]
fn test_multipart_alternative_prefers_plain() {
    let raw = "From: a@example.com\r\n\
Subject: Alt\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/alternative; boundary=\"alt-boundary\"\r\n\
\r\n\
--alt-boundary\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
This is the plain text part.\r\n\
--alt-boundary\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<html><body><div>This is HTML content.</div></body></html>\r\n\
--alt-boundary--\r\n";

    let tree = MessageLoader::load(raw.as_bytes()).expect("message should load");
    assert_eq!(tree.message.content_kind, ContentKind::Plain);
    assert!(tree.message.content.contains("This is the plain text part."));
    assert!(!tree.message.content.contains("<div>"));
    assert!(tree.message.attachments.is_empty());
}

#[test]
fn test_html_only_body_is_kept_as_html() {
    let raw = "From: a@example.com\r\n\
Subject: Html\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>Hello <b>there</b></p>\r\n";

    let tree = MessageLoader::load(raw.as_bytes()).expect("message should load");
    assert_eq!(tree.message.content_kind, ContentKind::Html);
    assert!(tree.message.content.contains("<p>Hello <b>there</b></p>"));
}

#[test]
fn test_unknown_charset_degrades_gracefully() {
    let raw = "From: a@example.com\r\n\
Content-Type: text/plain; charset=\"x-made-up\"\r\n\
\r\n\
Hello anyway\r\n";

    let tree = MessageLoader::load(raw.as_bytes()).expect("message should load");
    assert!(tree.message.content.contains("Hello anyway"));
}

#[test]
fn test_attachments_are_collected() {
    let raw = "From: a@example.com\r\n\
Subject: Report\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"mix-boundary\"\r\n\
\r\n\
--mix-boundary\r\n\
Content-Type: text/plain\r\n\
\r\n\
See attached.\r\n\
--mix-boundary\r\n\
Content-Type: application/pdf; name=\"report.pdf\"\r\n\
Content-Disposition: attachment; filename=\"report.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
SGVsbG8gUERG\r\n\
--mix-boundary\r\n\
Content-Type: image/png\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
iVBORw==\r\n\
--mix-boundary--\r\n";

    let tree = MessageLoader::load(raw.as_bytes()).expect("message should load");
    let attachments = &tree.message.attachments;

    assert_eq!(attachments.len(), 2);
    assert_eq!(attachments[0].filename, "report.pdf");
    assert_eq!(attachments[0].content_type, "application/pdf");
    assert_eq!(attachments[0].data, b"Hello PDF".to_vec());
    assert_eq!(attachments[1].filename, "attachment-2.bin");
    assert_eq!(attachments[1].content_type, "image/png");
    assert!(tree.message.content.contains("See attached."));
}

#[test]
fn test_embedded_message_is_parsed() {
    let raw = "From: forwarder@example.com\r\n\
Subject: Fwd: Original\r\n\
Date: Tue, 16 Jan 2024 10:00:00 +0000\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"outer-boundary\"\r\n\
\r\n\
--outer-boundary\r\n\
Content-Type: text/plain\r\n\
\r\n\
Forwarding this along.\r\n\
--outer-boundary\r\n\
Content-Type: message/rfc822\r\n\
\r\n\
From: original@example.com\r\n\
Subject: Original\r\n\
Date: Mon, 15 Jan 2024 09:00:00 +0000\r\n\
\r\n\
The original text.\r\n\
--outer-boundary--\r\n";

    let tree = MessageLoader::load(raw.as_bytes()).expect("message should load");
    assert_eq!(tree.embedded.len(), 1);

    let embedded = &tree.embedded[0].message;
    assert_eq!(embedded.provenance, Provenance::MimeEmbedded);
    assert_eq!(embedded.depth, 1);
    assert_eq!(embedded.sender, "original@example.com");
    assert_eq!(embedded.subject, "Original");
    assert!(embedded.content.contains("The original text."));
    assert!(!tree.message.content.contains("The original text."));

    let (messages, diagnostics) = tree.flatten();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].position, 1);
    assert!(diagnostics.is_empty());
}

fn nested_message(level: usize, total: usize) -> String {
    if level == total {
        return "From: leaf@example.com\r\nSubject: leaf\r\n\r\nLeaf body\r\n".to_string();
    }
    format!(
        "From: level{level}@example.com\r\n\
Subject: level {level}\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"bnd-{level}-x\"\r\n\
\r\n\
--bnd-{level}-x\r\n\
Content-Type: text/plain\r\n\
\r\n\
Level {level}\r\n\
--bnd-{level}-x\r\n\
Content-Type: message/rfc822\r\n\
\r\n\
{inner}\r\n\
--bnd-{level}-x--\r\n",
        level = level,
        inner = nested_message(level + 1, total)
    )
}

#[test]
fn test_depth_limit_truncates_embedding() {
    let raw = nested_message(0, MAX_NESTING_DEPTH + 2);
    let tree = MessageLoader::load(raw.as_bytes()).expect("nested message should load");
    let (messages, diagnostics) = tree.flatten();

    assert_eq!(messages.len(), MAX_NESTING_DEPTH + 1);
    assert_eq!(messages.iter().map(|m| m.depth).max(), Some(MAX_NESTING_DEPTH));

    let deepest = messages.last().expect("deepest message");
    assert_eq!(deepest.depth, MAX_NESTING_DEPTH);
    assert_eq!(deepest.attachments.len(), 1);
    assert_eq!(deepest.attachments[0].filename, "embedded-1.eml");
    assert_eq!(
        diagnostics,
        vec![Diagnostic::DepthLimitExceeded {
            position: MAX_NESTING_DEPTH,
            depth: MAX_NESTING_DEPTH
        }]
    );
}

#[test]
fn test_structurally_unreadable_input_is_a_parse_error() {
    assert!(matches!(MessageLoader::load(b""), Err(ThreadError::Parse(_))));
    assert!(matches!(MessageLoader::load(b"  \r\n "), Err(ThreadError::Parse(_))));
    assert!(matches!(
        MessageLoader::load(b"\r\n\r\njust a body"),
        Err(ThreadError::Parse(_))
    ));
}
