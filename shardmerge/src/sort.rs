//! Natural (numeric-aware) ordering of shard file names.
//!
//! Upstream shards are named by batch index without zero padding, so
//! `rnn_fwd_10` must sort after `rnn_fwd_9`.

use std::cmp::Ordering;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Chunk {
    /// Digit run with leading zeros stripped
    Number(String),
    Text(String),
}

impl Ord for Chunk {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // Compare by magnitude first so arbitrarily long runs never overflow
            (Chunk::Number(a), Chunk::Number(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Chunk::Text(a), Chunk::Text(b)) => a.cmp(b),
            (Chunk::Number(_), Chunk::Text(_)) => Ordering::Less,
            (Chunk::Text(_), Chunk::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for Chunk {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sort key splitting a name into alternating text and number runs
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct NaturalKey(Vec<Chunk>);

impl NaturalKey {
    pub fn new(name: &str) -> Self {
        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut in_digits = false;

        for ch in name.chars() {
            let is_digit = ch.is_ascii_digit();
            if !current.is_empty() && is_digit != in_digits {
                chunks.push(Self::finish(std::mem::take(&mut current), in_digits));
            }
            in_digits = is_digit;
            current.push(ch);
        }
        if !current.is_empty() {
            chunks.push(Self::finish(current, in_digits));
        }

        NaturalKey(chunks)
    }

    /// Key of a path's file name (falls back to the whole path)
    pub fn for_path(path: &Path) -> Self {
        match path.file_name() {
            Some(name) => Self::new(&name.to_string_lossy()),
            None => Self::new(&path.to_string_lossy()),
        }
    }

    fn finish(run: String, digits: bool) -> Chunk {
        if digits {
            let trimmed = run.trim_start_matches('0');
            Chunk::Number(if trimmed.is_empty() { "0".to_string() } else { trimmed.to_string() })
        } else {
            Chunk::Text(run.to_lowercase())
        }
    }
}

/// Last digit run of a file name, read as the shard ordinal
pub fn ordinal_of(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_string_lossy();
    let end = name.rfind(|c: char| c.is_ascii_digit())? + 1;
    let start = name[..end]
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);
    name[start..end].parse().ok()
}
