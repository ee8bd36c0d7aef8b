//! Parses raw message bytes into a [`MessageTree`].
//!
//! Headers, the preferred text body and attachments come from `mailparse`.
//! `message/rfc822` parts are parsed again as embedded messages, one level per
//! recursion, until [`MAX_NESTING_DEPTH`] is reached.

use log::{debug, warn};
use mailparse::{DispositionType, MailAddr, MailHeaderMap, ParsedMail};

use crate::dates;
use crate::error::{Result, ThreadError};
use crate::message::{
    split_recipients, AttachmentRef, ContentKind, Message, MessageTree, Provenance, MAX_NESTING_DEPTH,
};

/// Bodies and attachments gathered from one message's MIME parts.
#[derive(Default)]
struct Collected {
    plain: Vec<String>,
    html: Vec<String>,
    attachments: Vec<AttachmentRef>,
    embedded: Vec<Vec<u8>>,
}

/// A namespace struct for message loading.
pub struct MessageLoader;

impl MessageLoader {
    /// Parses `raw` into the root message and its MIME-embedded descendants.
    ///
    /// Only input that cannot be read as a message at all is an error; missing
    /// headers, odd charsets and broken encoded-words degrade to empty or lossy
    /// values.
    pub fn load(raw: &[u8]) -> Result<MessageTree> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(ThreadError::Parse("input is empty".to_string()));
        }

        let parsed = mailparse::parse_mail(raw).map_err(|e| ThreadError::Parse(e.to_string()))?;
        if parsed.headers.is_empty() {
            return Err(ThreadError::Parse("no header fields found".to_string()));
        }

        Ok(Self::build(&parsed, Provenance::Root, 0))
    }

    fn build(parsed: &ParsedMail<'_>, provenance: Provenance, depth: usize) -> MessageTree {
        let mut message = Message::empty(provenance, depth);
        let headers = &parsed.headers;

        message.subject = headers.get_first_value("Subject").unwrap_or_default().trim().to_string();
        message.sender = headers
            .get_first_value("From")
            .map(|from| parse_addresses(&from).into_iter().next().unwrap_or_else(|| from.trim().to_string()))
            .unwrap_or_default();
        message.recipients = headers
            .get_first_value("To")
            .map(|to| parse_addresses(&to))
            .unwrap_or_default();
        message.cc = headers
            .get_first_value("Cc")
            .map(|cc| parse_addresses(&cc))
            .unwrap_or_default();

        let mut unparsed_date = None;
        if let Some(raw_date) = headers.get_first_value("Date") {
            message.date = dates::parse_header_date(&raw_date);
            if message.date.is_none() && !raw_date.trim().is_empty() {
                warn!("Unparseable Date header '{}', treating message as undated", raw_date);
                unparsed_date = Some(raw_date.trim().to_string());
            }
        }

        let mut collected = Collected::default();
        collect_parts(parsed, &mut collected);

        if !collected.plain.is_empty() {
            message.content = collected.plain.join("\n");
            message.content_kind = ContentKind::Plain;
        } else if let Some(html) = collected.html.into_iter().next() {
            message.content = html;
            message.content_kind = ContentKind::Html;
        }
        message.attachments = collected.attachments;

        let mut tree = MessageTree::leaf(message);
        tree.unparsed_date = unparsed_date;

        for (index, bytes) in collected.embedded.into_iter().enumerate() {
            let fallback_name = format!("embedded-{}.eml", index + 1);

            if depth + 1 > MAX_NESTING_DEPTH {
                warn!(
                    "Embedded message at depth {} exceeds the nesting limit, keeping it as {}",
                    depth + 1,
                    fallback_name
                );
                tree.truncated = true;
                tree.message.attachments.push(embedded_attachment(fallback_name, bytes));
                continue;
            }

            match mailparse::parse_mail(&bytes) {
                Ok(child) if !child.headers.is_empty() => {
                    debug!("Parsing embedded message {} at depth {}", index + 1, depth + 1);
                    tree.embedded.push(Self::build(&child, Provenance::MimeEmbedded, depth + 1));
                }
                Ok(_) => {
                    warn!("Embedded message has no headers, keeping it as {}", fallback_name);
                    tree.message.attachments.push(embedded_attachment(fallback_name, bytes));
                }
                Err(e) => {
                    warn!("Failed to parse embedded message ({}), keeping it as {}", e, fallback_name);
                    tree.message.attachments.push(embedded_attachment(fallback_name, bytes));
                }
            }
        }

        tree
    }
}

fn embedded_attachment(filename: String, data: Vec<u8>) -> AttachmentRef {
    AttachmentRef {
        filename,
        content_type: "message/rfc822".to_string(),
        data,
    }
}

/// Walks the MIME tree. Embedded messages are collected as raw bytes and not descended into.
fn collect_parts(part: &ParsedMail<'_>, out: &mut Collected) {
    let mime = part.ctype.mimetype.to_ascii_lowercase();

    if mime == "message/rfc822" {
        match part.get_body_raw() {
            Ok(bytes) => out.embedded.push(bytes),
            Err(e) => warn!("Failed to decode embedded message part: {}", e),
        }
        return;
    }

    if !part.subparts.is_empty() {
        for child in &part.subparts {
            collect_parts(child, out);
        }
        return;
    }

    let disposition = part.get_content_disposition();
    let filename = disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .map(|name| decode_header_value(name))
        .filter(|name| !name.trim().is_empty());
    let is_attachment =
        matches!(disposition.disposition, DispositionType::Attachment) || filename.is_some();

    if !is_attachment && mime.starts_with("text/") {
        match mime.as_str() {
            "text/plain" => out.plain.push(body_text(part)),
            "text/html" => out.html.push(body_text(part)),
            other => debug!("Skipping inline {} part", other),
        }
        return;
    }

    match part.get_body_raw() {
        Ok(data) if !data.is_empty() => {
            let filename = filename.unwrap_or_else(|| format!("attachment-{}.bin", out.attachments.len() + 1));
            debug!("Collected attachment '{}' ({}, {} bytes)", filename, mime, data.len());
            out.attachments.push(AttachmentRef {
                filename,
                content_type: mime,
                data,
            });
        }
        Ok(_) => debug!("Skipping empty {} part", mime),
        Err(e) => warn!("Failed to decode {} attachment: {}", mime, e),
    }
}

/// Decoded text of a part, lossy when the declared charset or transfer encoding is broken.
fn body_text(part: &ParsedMail<'_>) -> String {
    match part.get_body() {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to decode body ({}), falling back to lossy UTF-8", e);
            part.get_body_raw()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default()
        }
    }
}

/// Decodes RFC 2047 encoded-words in a parameter value by parsing it as a header.
fn decode_header_value(value: &str) -> String {
    let synthetic = format!("X-Value: {}", value);
    match mailparse::parse_header(synthetic.as_bytes()) {
        Ok((header, _)) => header.get_value(),
        Err(_) => value.to_string(),
    }
}

/// Splits an address header into `Name <addr>` / `addr` items.
fn parse_addresses(value: &str) -> Vec<String> {
    if value.trim().is_empty() {
        return Vec::new();
    }

    match mailparse::addrparse(value) {
        Ok(list) => {
            let mut out: Vec<String> = Vec::new();
            for addr in list.iter() {
                match addr {
                    MailAddr::Single(info) => out.push(format_single(&info.display_name, &info.addr)),
                    MailAddr::Group(group) => out.extend(
                        group
                            .addrs
                            .iter()
                            .map(|info| format_single(&info.display_name, &info.addr)),
                    ),
                }
            }
            let mut seen = std::collections::HashSet::new();
            out.retain(|item| seen.insert(item.clone()));
            out
        }
        Err(e) => {
            debug!("addrparse failed for '{}' ({}), splitting loosely", value, e);
            split_recipients(value)
        }
    }
}

fn format_single(display_name: &Option<String>, addr: &str) -> String {
    match display_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => format!("{} <{}>", name, addr),
        _ => addr.to_string(),
    }
}

#[cfg(test)]
mod tests;
