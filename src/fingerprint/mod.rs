//! SimHash content fingerprints.
//!
//! Tokens come from three zones with fixed weights: subject, sender and the
//! first lines of normalized content. Each token is hashed with SHA-256
//! (first 8 bytes), so fingerprints are stable across platforms and releases.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::message::Message;
use crate::normalize::strip_subject_prefixes;

pub const SUBJECT_WEIGHT: i64 = 3;
pub const SENDER_WEIGHT: i64 = 2;
pub const CONTENT_WEIGHT: i64 = 1;
/// Number of normalized content lines that contribute tokens.
pub const CONTENT_LINES: usize = 20;

/// 64-bit fingerprint bound to one message position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Fingerprint {
    position: usize,
    #[serde(serialize_with = "serialize_hex")]
    value: u64,
}

impl Fingerprint {
    pub fn new(position: usize, value: u64) -> Self {
        Self { position, value }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn distance(&self, other: &Fingerprint) -> u32 {
        hamming_distance(self.value, other.value)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.value.to_be_bytes())
    }
}

fn serialize_hex<S: serde::Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(value.to_be_bytes()))
}

/// Count of differing bit positions.
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Stable 64-bit hash of a token.
pub fn token_hash(token: &str) -> u64 {
    let digest = Sha256::digest(token.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Folds weighted tokens into a SimHash value. The result does not depend on token order.
pub fn simhash<'a, I>(tokens: I) -> u64
where
    I: IntoIterator<Item = (&'a str, i64)>,
{
    let mut sums = [0i64; 64];

    for (token, weight) in tokens {
        let h = token_hash(token);
        for (bit, sum) in sums.iter_mut().enumerate() {
            if (h >> bit) & 1 == 1 {
                *sum += weight;
            } else {
                *sum -= weight;
            }
        }
    }

    sums.iter()
        .enumerate()
        .filter(|(_, sum)| **sum > 0)
        .fold(0u64, |acc, (bit, _)| acc | (1 << bit))
}

#[derive(Debug, Clone)]
pub struct SimHashFingerprinter {
    pub subject_weight: i64,
    pub sender_weight: i64,
    pub content_weight: i64,
    pub content_lines: usize,
}

impl Default for SimHashFingerprinter {
    fn default() -> Self {
        Self {
            subject_weight: SUBJECT_WEIGHT,
            sender_weight: SENDER_WEIGHT,
            content_weight: CONTENT_WEIGHT,
            content_lines: CONTENT_LINES,
        }
    }
}

impl SimHashFingerprinter {
    /// Weighted token multiset for a message. Repeated tokens accumulate weight.
    pub fn tokens(&self, message: &Message) -> BTreeMap<String, i64> {
        let mut tokens = BTreeMap::new();

        for word in words(&strip_subject_prefixes(&message.subject)) {
            *tokens.entry(format!("s:{}", word)).or_insert(0) += self.subject_weight;
        }

        let sender_name = match message.sender.rfind('<') {
            Some(idx) => &message.sender[..idx],
            None if message.sender.contains('@') => "",
            None => message.sender.as_str(),
        };
        for word in words(sender_name) {
            *tokens.entry(format!("f:{}", word)).or_insert(0) += self.sender_weight;
        }
        if let Some(addr) = message.sender_address() {
            *tokens.entry(format!("f:{}", addr)).or_insert(0) += self.sender_weight;
        }

        for line in message.content.lines().take(self.content_lines) {
            for word in words(line) {
                *tokens.entry(format!("c:{}", word)).or_insert(0) += self.content_weight;
            }
        }

        tokens
    }

    /// Fingerprints a message whose content has already been normalized.
    pub fn fingerprint(&self, message: &Message) -> Fingerprint {
        let tokens = self.tokens(message);
        let value = simhash(tokens.iter().map(|(token, weight)| (token.as_str(), *weight)));
        Fingerprint::new(message.position, value)
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
}
