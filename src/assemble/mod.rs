//! Orders surviving messages into a [`Thread`] and renders it.

mod render;

pub use render::{
    render_markdown, sanitize_filename, MessageReport, RenderedAttachment, RenderedThread, ThreadReport,
};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dedup::{Cluster, Deduplicated, Survivor};
use crate::error::Diagnostic;
use crate::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ascending" | "asc" => Ok(SortOrder::Ascending),
            "descending" | "desc" => Ok(SortOrder::Descending),
            other => Err(format!("unknown sort order '{}', expected ascending or descending", other)),
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Ascending => write!(f, "ascending"),
            SortOrder::Descending => write!(f, "descending"),
        }
    }
}

/// The reconstructed, deduplicated and ordered thread for one input.
#[derive(Debug, Clone)]
pub struct Thread {
    pub order: SortOrder,
    pub entries: Vec<Survivor>,
    pub clusters: Vec<Cluster>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Thread {
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().map(|e| &e.message)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of messages dropped as duplicates.
    pub fn duplicates_dropped(&self) -> usize {
        self.clusters.iter().map(Cluster::duplicates).sum()
    }
}

/// Namespace for ordering cluster representatives.
pub struct ThreadAssembler;

impl ThreadAssembler {
    /// Sorts entries in place.
    ///
    /// Dated entries are ordered by date then position; descending is the exact
    /// reverse of that. Undated entries always follow, by position.
    pub fn order(entries: &mut Vec<Survivor>, order: SortOrder) {
        let (mut dated, mut undated): (Vec<Survivor>, Vec<Survivor>) =
            entries.drain(..).partition(|e| e.message.date.is_some());

        dated.sort_by(|a, b| {
            a.message
                .date
                .cmp(&b.message.date)
                .then(a.message.position.cmp(&b.message.position))
        });
        if order == SortOrder::Descending {
            dated.reverse();
        }
        undated.sort_by_key(|e| e.message.position);

        entries.extend(dated);
        entries.extend(undated);
    }

    pub fn assemble(deduplicated: Deduplicated, order: SortOrder, diagnostics: Vec<Diagnostic>) -> Thread {
        let Deduplicated {
            mut survivors,
            clusters,
        } = deduplicated;
        Self::order(&mut survivors, order);

        Thread {
            order,
            entries: survivors,
            clusters,
            diagnostics,
        }
    }
}
