//! Near-duplicate clustering over SimHash fingerprints.
//!
//! Every pair of fingerprints within the threshold is joined in a disjoint-set
//! forest, so clusters are the transitive closure of "close enough". Each
//! cluster keeps one representative; the rest are dropped and counted.

use std::cmp::Ordering;

use log::debug;
use serde::Serialize;

use crate::error::{Result, ThreadError};
use crate::fingerprint::Fingerprint;
use crate::message::Message;

pub const DEFAULT_THRESHOLD: u32 = 8;
pub const MAX_THRESHOLD: u32 = 64;

/// A message paired with the fingerprint computed from its final content.
#[derive(Debug, Clone)]
pub struct Fingerprinted {
    pub message: Message,
    pub fingerprint: Fingerprint,
}

/// Members of one cluster, by discovery position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cluster {
    pub representative: usize,
    /// Sorted ascending; always contains `representative`.
    pub members: Vec<usize>,
}

impl Cluster {
    /// Number of members dropped in favour of the representative.
    pub fn duplicates(&self) -> usize {
        self.members.len() - 1
    }
}

/// A cluster representative that survives into the thread.
#[derive(Debug, Clone)]
pub struct Survivor {
    pub message: Message,
    pub fingerprint: Fingerprint,
    pub duplicates: usize,
}

#[derive(Debug, Clone)]
pub struct Deduplicated {
    /// Representatives in discovery order.
    pub survivors: Vec<Survivor>,
    /// Clusters ordered by their first member.
    pub clusters: Vec<Cluster>,
}

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            Ordering::Less => self.parent[ra] = rb,
            Ordering::Greater => self.parent[rb] = ra,
            Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// Whether `a` should represent a cluster instead of `b`.
///
/// Later dates win and any date beats none; otherwise the earlier discovery
/// position wins.
pub fn outranks(a: &Message, b: &Message) -> bool {
    match (a.date, b.date) {
        (Some(da), Some(db)) if da != db => da > db,
        (Some(_), None) => true,
        (None, Some(_)) => false,
        _ => a.position < b.position,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Deduplicator {
    threshold: u32,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl Deduplicator {
    pub fn new(threshold: u32) -> Result<Self> {
        if threshold > MAX_THRESHOLD {
            return Err(ThreadError::InvalidThreshold(threshold));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Groups fingerprint indices into clusters. Quadratic in the input size.
    ///
    /// Groups are ordered by their smallest index and each group is sorted.
    pub fn group(&self, fingerprints: &[Fingerprint]) -> Vec<Vec<usize>> {
        let mut set = DisjointSet::new(fingerprints.len());

        for i in 0..fingerprints.len() {
            for j in (i + 1)..fingerprints.len() {
                if fingerprints[i].distance(&fingerprints[j]) <= self.threshold {
                    set.union(i, j);
                }
            }
        }

        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut slot_of_root = vec![usize::MAX; fingerprints.len()];
        for i in 0..fingerprints.len() {
            let root = set.find(i);
            if slot_of_root[root] == usize::MAX {
                slot_of_root[root] = groups.len();
                groups.push(Vec::new());
            }
            groups[slot_of_root[root]].push(i);
        }
        groups
    }

    /// Keeps one representative per cluster and drops the rest.
    pub fn deduplicate(&self, entries: Vec<Fingerprinted>) -> Deduplicated {
        let fingerprints: Vec<Fingerprint> = entries.iter().map(|e| e.fingerprint).collect();
        let groups = self.group(&fingerprints);

        let mut slots: Vec<Option<Fingerprinted>> = entries.into_iter().map(Some).collect();
        let mut survivors = Vec::with_capacity(groups.len());
        let mut clusters = Vec::with_capacity(groups.len());

        for group in groups {
            let mut best = group[0];
            for &candidate in &group[1..] {
                if let (Some(c), Some(b)) = (&slots[candidate], &slots[best]) {
                    if outranks(&c.message, &b.message) {
                        best = candidate;
                    }
                }
            }

            let mut members: Vec<usize> = group
                .iter()
                .filter_map(|&i| slots[i].as_ref().map(|e| e.message.position))
                .collect();
            members.sort_unstable();

            let Some(winner) = slots[best].take() else {
                continue;
            };
            let cluster = Cluster {
                representative: winner.message.position,
                members,
            };
            if cluster.duplicates() > 0 {
                debug!(
                    "Message {} represents cluster {:?} ({} duplicate(s) dropped)",
                    cluster.representative,
                    cluster.members,
                    cluster.duplicates()
                );
            }

            survivors.push(Survivor {
                message: winner.message,
                fingerprint: winner.fingerprint,
                duplicates: cluster.duplicates(),
            });
            clusters.push(cluster);
        }

        survivors.sort_by_key(|s| s.message.position);
        Deduplicated { survivors, clusters }
    }
}
