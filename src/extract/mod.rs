//! Discovers messages quoted inline in body text.
//!
//! Each dialect in the fixed priority table is scanned over the body; the
//! boundary with the earliest offset wins, ties going to the higher-priority
//! dialect. Text before the boundary stays with the parent, the rest becomes a
//! pattern-extracted sub-message which is scanned again, up to
//! [`MAX_NESTING_DEPTH`].

mod formats;

pub use formats::{strip_quote_level, QuoteFormat, QuotedHeader};

use log::{debug, warn};
use regex::Captures;

use crate::dates;
use crate::error::Diagnostic;
use crate::message::{Message, Provenance, MAX_NESTING_DEPTH};
use crate::normalize::strip_subject_prefixes;
use formats::{Dialect, DIALECTS};

/// A candidate quote boundary inside a body.
pub struct Boundary<'t> {
    pub format: QuoteFormat,
    pub start: usize,
    pub end: usize,
    dialect: &'static Dialect,
    captures: Captures<'t>,
}

impl Boundary<'_> {
    /// Runs the dialect's extractor on the text starting at this boundary.
    pub fn extract(&self, text: &str) -> Option<QuotedHeader> {
        (self.dialect.extract)(&self.captures, &text[self.start..])
    }
}

/// Next known match of one dialect.
enum Lookahead<'t> {
    Unsearched,
    Found(Captures<'t>),
    Exhausted,
}

/// Scans a body for boundaries, remembering each dialect's next match.
///
/// A dialect is searched again only once the scan has moved past its cached
/// match, so skipping many inert boundaries stays linear in the body length.
pub struct BoundaryScanner<'t> {
    text: &'t str,
    next: Vec<Lookahead<'t>>,
}

impl<'t> BoundaryScanner<'t> {
    pub fn new(text: &'t str) -> Self {
        Self {
            text,
            next: DIALECTS.iter().map(|_| Lookahead::Unsearched).collect(),
        }
    }

    /// Finds the earliest boundary at or after `from`, across every dialect.
    pub fn next_from(&mut self, from: usize) -> Option<Boundary<'t>> {
        let mut best: Option<(usize, usize)> = None;

        for (idx, dialect) in DIALECTS.iter().enumerate() {
            let stale = match &self.next[idx] {
                Lookahead::Unsearched => true,
                Lookahead::Found(caps) => caps.get(0).map_or(true, |m| m.start() < from),
                Lookahead::Exhausted => false,
            };
            if stale {
                self.next[idx] = match dialect.boundary.captures_at(self.text, from) {
                    Some(caps) => Lookahead::Found(caps),
                    None => Lookahead::Exhausted,
                };
            }

            let Lookahead::Found(caps) = &self.next[idx] else {
                continue;
            };
            let Some(start) = caps.get(0).map(|m| m.start()) else {
                continue;
            };
            // Strictly earlier only: the table order decides ties.
            if best.map_or(true, |(_, s)| start < s) {
                best = Some((idx, start));
            }
        }

        let (idx, _) = best?;
        let Lookahead::Found(captures) = std::mem::replace(&mut self.next[idx], Lookahead::Unsearched) else {
            return None;
        };
        let whole = captures.get(0)?;
        Some(Boundary {
            format: DIALECTS[idx].format,
            start: whole.start(),
            end: whole.end(),
            dialect: &DIALECTS[idx],
            captures,
        })
    }
}

/// Finds the earliest boundary at or after `from`, across every dialect.
pub fn find_boundary(text: &str, from: usize) -> Option<Boundary<'_>> {
    BoundaryScanner::new(text).next_from(from)
}

/// Namespace for splitting pattern-quoted messages out of a parent.
pub struct ThreadExtractor;

impl ThreadExtractor {
    /// Splits quoted messages out of `parent.content`.
    ///
    /// The parent keeps the text before the first confident boundary. Returned
    /// messages are in discovery order and take positions from `next_position`.
    /// Non-fatal conditions are appended to `diagnostics`.
    pub fn expand(
        parent: &mut Message,
        next_position: &mut usize,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Vec<Message> {
        let mut discovered = Vec::new();
        Self::expand_into(parent, next_position, diagnostics, &mut discovered);
        discovered
    }

    fn expand_into(
        parent: &mut Message,
        next_position: &mut usize,
        diagnostics: &mut Vec<Diagnostic>,
        discovered: &mut Vec<Message>,
    ) {
        let content = std::mem::take(&mut parent.content);
        let split = {
            let mut scanner = BoundaryScanner::new(&content);
            let mut from = 0;
            loop {
                let Some(boundary) = scanner.next_from(from) else {
                    break None;
                };

                if parent.depth >= MAX_NESTING_DEPTH {
                    warn!(
                        "Message {} reached depth {}; leaving quoted {:?} block unexpanded",
                        parent.position, parent.depth, boundary.format
                    );
                    diagnostics.push(Diagnostic::DepthLimitExceeded {
                        position: parent.position,
                        depth: parent.depth,
                    });
                    break None;
                }

                match boundary.extract(&content) {
                    Some(header) => break Some((boundary.format, boundary.start, header)),
                    None => {
                        debug!(
                            "Message {}: {:?} boundary at {} has no recoverable sender/date, keeping it inert",
                            parent.position, boundary.format, boundary.start
                        );
                        diagnostics.push(Diagnostic::PatternAmbiguity {
                            position: parent.position,
                            format: boundary.format,
                            offset: boundary.start,
                        });
                        from = boundary.end;
                    }
                }
            }
        };

        let Some((format, start, header)) = split else {
            parent.content = content;
            return;
        };

        parent.content = content[..start].trim_end().to_string();

        let mut child = Message::empty(Provenance::PatternExtracted(format), parent.depth + 1);
        child.position = *next_position;
        *next_position += 1;
        child.date = dates::parse_loose(&header.date_text);
        if child.date.is_none() {
            debug!(
                "Message {}: unparseable quoted date '{}'",
                child.position, header.date_text
            );
            diagnostics.push(Diagnostic::DateParse {
                position: child.position,
                raw: header.date_text.clone(),
            });
        }
        child.sender = header.sender;
        child.recipients = header.recipients;
        child.cc = header.cc;
        child.subject = header
            .subject
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| strip_subject_prefixes(&parent.subject));
        child.content = header.content;

        debug!(
            "Message {}: extracted {:?} sub-message {} from '{}'",
            parent.position, format, child.position, child.sender
        );

        // Descendants land after the child so discovery order stays pre-order.
        let slot = discovered.len();
        Self::expand_into(&mut child, next_position, diagnostics, discovered);
        discovered.insert(slot, child);
    }
}
