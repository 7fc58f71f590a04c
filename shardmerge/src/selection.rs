//! Dataset kinds and recurrent pass directions.
//!
//! Both are parsed once at the boundary (CLI or caller) from short or long
//! tokens. Everything downstream works with the typed values.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Which side of the matching task a shard set belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DatasetKind {
    Query,
    Candidate,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 2] = [DatasetKind::Query, DatasetKind::Candidate];

    /// Plural name used for output artifacts and the default input directory
    pub fn plural(&self) -> &'static str {
        match self {
            DatasetKind::Query => "queries",
            DatasetKind::Candidate => "candidates",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Query => "query",
            DatasetKind::Candidate => "candidate",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "q" | "query" | "queries" => Ok(DatasetKind::Query),
            "c" | "candidate" | "candidates" => Ok(DatasetKind::Candidate),
            other => Err(Error::Configuration(format!(
                "unknown dataset kind '{}' (expected q/query or c/candidate)",
                other
            ))),
        }
    }
}

/// Direction in which the recurrent encoder traversed the sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PassDirection {
    Forward,
    Backward,
}

impl PassDirection {
    pub const ALL: [PassDirection; 2] = [PassDirection::Forward, PassDirection::Backward];

    /// Token embedded in upstream shard file names (`rnn_fwd_3`)
    pub fn shard_token(&self) -> &'static str {
        match self {
            PassDirection::Forward => "fwd",
            PassDirection::Backward => "bwd",
        }
    }

    /// Label used in combined artifact names (`queries_forward.pt`)
    pub fn as_str(&self) -> &'static str {
        match self {
            PassDirection::Forward => "forward",
            PassDirection::Backward => "backward",
        }
    }
}

impl fmt::Display for PassDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PassDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fwd" | "forward" => Ok(PassDirection::Forward),
            "bwd" | "backward" => Ok(PassDirection::Backward),
            other => Err(Error::Configuration(format!(
                "unknown pass direction '{}' (expected fwd/forward or bwd/backward)",
                other
            ))),
        }
    }
}
