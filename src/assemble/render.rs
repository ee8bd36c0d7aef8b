use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, FixedOffset};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use super::{SortOrder, Thread};
use crate::dedup::Cluster;
use crate::error::Diagnostic;
use crate::message::{ContentKind, Provenance};

static UNSAFE_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w.-]").expect("valid filename pattern"));

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Attachment bytes with the file name the document links to.
#[derive(Debug, Clone)]
pub struct RenderedAttachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct RenderedThread {
    pub document: String,
    pub attachments: Vec<RenderedAttachment>,
    pub report: ThreadReport,
}

impl RenderedThread {
    pub fn report_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.report)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadReport {
    pub order: SortOrder,
    pub messages: Vec<MessageReport>,
    pub clusters: Vec<Cluster>,
    pub duplicates_dropped: usize,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageReport {
    pub position: usize,
    pub date: Option<DateTime<FixedOffset>>,
    pub sender: String,
    pub recipients: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub provenance: Provenance,
    pub depth: usize,
    pub content_kind: ContentKind,
    pub fingerprint: String,
    pub duplicates: usize,
    pub attachments: Vec<String>,
}

/// Replaces anything other than word characters, `.` and `-` with `_`.
/// Directory components are dropped and a dot-only name becomes `attachment`.
pub fn sanitize_filename(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name);
    let cleaned = UNSAFE_FILENAME_CHARS.replace_all(base, "_").into_owned();
    if cleaned.chars().all(|c| c == '.') {
        return "attachment".to_string();
    }
    cleaned
}

fn unique_filename(name: String, used: &mut HashSet<String>) -> String {
    if used.insert(name.clone()) {
        return name;
    }
    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name.as_str(), ""),
    };
    let mut n = 2;
    loop {
        let candidate = format!("{}_{}{}", stem, n, ext);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Renders the thread as a Markdown document plus its attachment files.
pub fn render_markdown(thread: &Thread) -> RenderedThread {
    let mut document = String::from("# Email Thread\n\n");
    let mut attachments = Vec::new();
    let mut used = HashSet::new();
    let mut messages = Vec::with_capacity(thread.len());

    for (idx, entry) in thread.entries.iter().enumerate() {
        let message = &entry.message;
        let date = message
            .date
            .map(|d| d.format(DATE_FORMAT).to_string())
            .unwrap_or_else(|| "unknown".to_string());

        document.push_str(&format!("## Email {}\n\n", idx + 1));
        document.push_str(&format!("**Date**: {}\n\n", date));
        document.push_str(&format!("**From**: {}\n\n", message.sender));
        document.push_str(&format!("**To**: {}\n\n", message.recipients.join(", ")));
        document.push_str(&format!("**CC**: {}\n\n", message.cc.join(", ")));
        document.push_str(&format!("**Subject**: {}\n\n", message.subject));
        document.push_str("### Content\n\n");
        document.push_str(message.content.trim());
        document.push_str("\n\n");

        let mut names = Vec::with_capacity(message.attachments.len());
        if !message.attachments.is_empty() {
            document.push_str("### Attachments\n\n");
            for attachment in &message.attachments {
                let filename = unique_filename(sanitize_filename(&attachment.filename), &mut used);
                document.push_str(&format!("- [{}]({})\n", filename, filename));
                names.push(filename.clone());
                attachments.push(RenderedAttachment {
                    filename,
                    content_type: attachment.content_type.clone(),
                    data: attachment.data.clone(),
                });
            }
            document.push('\n');
        }

        document.push_str("---\n\n");

        messages.push(MessageReport {
            position: message.position,
            date: message.date,
            sender: message.sender.clone(),
            recipients: message.recipients.clone(),
            cc: message.cc.clone(),
            subject: message.subject.clone(),
            provenance: message.provenance,
            depth: message.depth,
            content_kind: message.content_kind,
            fingerprint: entry.fingerprint.to_hex(),
            duplicates: entry.duplicates,
            attachments: names,
        });
    }

    let report = ThreadReport {
        order: thread.order,
        messages,
        clusters: thread.clusters.clone(),
        duplicates_dropped: thread.duplicates_dropped(),
        diagnostics: thread.diagnostics.clone(),
    };

    RenderedThread {
        document,
        attachments,
        report,
    }
}
