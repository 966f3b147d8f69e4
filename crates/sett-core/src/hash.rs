//! Content hashing for change detection
//!
//! The hash covers the entity kind and its defining span text. Line endings
//! are normalized to `\n` and trailing whitespace on each line is dropped.
//! Everything else, including indentation and blank lines, is significant.
//! Positions are not part of the hash, so an entity that only moved keeps
//! its hash.

use sha2::{Digest, Sha256};

use crate::model::{ContentHash, EntityKind};

/// Compute the content hash of an entity span.
pub fn content_hash(kind: EntityKind, span_text: &str) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0u8]);
    for line in normalize_lines(span_text) {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    ContentHash(format!("{:x}", hasher.finalize()))
}

fn normalize_lines(text: &str) -> impl Iterator<Item = &str> {
    // `lines()` already strips a trailing `\r`
    text.lines().map(|line| line.trim_end())
}
