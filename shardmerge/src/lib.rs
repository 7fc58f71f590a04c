//! shardmerge: combine per-batch encoder shards into single artifacts
//!
//! An upstream recurrent encoder writes one vector shard (`rnn_fwd_<n>` /
//! `rnn_bwd_<n>`) and one id shard (`rnn_indxs_<n>`) per batch, for the
//! queries and candidates datasets. This crate concatenates each series in
//! batch order into one NPY artifact per (dataset kind, pass direction) and
//! exports the matching item strings.

pub mod config;
pub mod device;
pub mod error;
pub mod items;
pub mod manifest;
pub mod merge;
pub mod npy;
pub mod paths;
pub mod pipeline;
pub mod selection;
pub mod sort;

pub use config::RunConfig;
pub use device::{resolve_device, Device};
pub use error::{Error, Result};
pub use items::ItemTable;
pub use manifest::OutputManifest;
pub use merge::{CombinedArtifact, MergeSummary, Shard, ShardLayout, ShardMerger, ShardSet};
pub use npy::Dtype;
pub use paths::{MergePaths, PathSpec};
pub use pipeline::{combine_pair, combine_vecs, CombineOptions};
pub use selection::{DatasetKind, PassDirection};
pub use sort::NaturalKey;
