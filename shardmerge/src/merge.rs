//! Shard discovery, ordering and concatenation.
//!
//! A merge runs in two passes over a [`ShardSet`]:
//! 1. Read every shard's NPY header to learn row counts, dtype and trailing
//!    shape ([`ShardLayout`]).
//! 2. Allocate the combined buffer once and copy each shard's rows into it in
//!    natural order.
//!
//! The combined array is persisted atomically and dropped before the caller
//! starts the next merge.

use std::fs::File;
use std::path::{Path, PathBuf};

use ndarray::{ArrayD, Axis, IxDyn};
use ndarray_npy::{ReadNpyExt, ReadableElement, WriteNpyExt};
use serde::{Deserialize, Serialize};

use crate::device::Device;
use crate::error::{Error, Result};
use crate::npy::{read_npy_header, write_atomic, Dtype};
use crate::sort::{ordinal_of, NaturalKey};

/// Default number of shards between progress log lines
pub const DEFAULT_PRINT_EVERY: usize = 500;

/// One batch file produced by the encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub path: PathBuf,
    /// Batch index parsed from the file name
    pub ordinal: Option<u64>,
}

impl Shard {
    pub fn new(path: PathBuf) -> Self {
        let ordinal = ordinal_of(&path);
        Self { path, ordinal }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.to_string_lossy().to_string())
    }
}

/// Shards matching one glob pattern, in natural file-name order
#[derive(Debug, Clone)]
pub struct ShardSet {
    pattern: String,
    shards: Vec<Shard>,
}

impl ShardSet {
    /// List the files matching `pattern` and order them
    pub fn discover(pattern: &str) -> Result<Self> {
        let mut paths = Vec::new();
        for entry in glob::glob(pattern)? {
            let path = entry.map_err(std::io::Error::from)?;
            if path.is_file() {
                paths.push(path);
            }
        }
        Ok(Self::from_paths(pattern, paths))
    }

    /// Build a set from paths in any enumeration order
    pub fn from_paths(pattern: impl Into<String>, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut keyed: Vec<(NaturalKey, Shard)> = paths
            .into_iter()
            .map(|path| (NaturalKey::for_path(&path), Shard::new(path)))
            .collect();
        keyed.sort_by(|(ka, a), (kb, b)| ka.cmp(kb).then_with(|| a.path.cmp(&b.path)));

        Self {
            pattern: pattern.into(),
            shards: keyed.into_iter().map(|(_, shard)| shard).collect(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn shards(&self) -> &[Shard] {
        &self.shards
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Read every shard header and check the shards can be concatenated
    pub fn layout(&self) -> Result<ShardLayout> {
        let mut layout = ShardLayout::default();
        let mut total_rows = 0usize;

        for shard in &self.shards {
            let header = read_npy_header(&shard.path)?;
            let dtype = Dtype::from_descr(&header.descr).ok_or_else(|| {
                Error::shard_read(
                    &shard.path,
                    format!("unsupported dtype '{}'", header.descr),
                )
            })?;
            let (rows, trailing) = header
                .shape
                .split_first()
                .ok_or_else(|| Error::shard_read(&shard.path, "scalar shard has no row axis"))?;

            match layout.dtype {
                None => {
                    layout.dtype = Some(dtype);
                    layout.trailing_shape = trailing.to_vec();
                }
                Some(expected) if expected != dtype => {
                    return Err(Error::shard_read(
                        &shard.path,
                        format!("dtype {} differs from {}", dtype.descr(), expected.descr()),
                    ));
                }
                Some(_) if layout.trailing_shape != trailing => {
                    return Err(Error::shard_read(
                        &shard.path,
                        format!(
                            "row shape {:?} differs from {:?}",
                            trailing, layout.trailing_shape
                        ),
                    ));
                }
                Some(_) => {}
            }
            total_rows = total_rows.checked_add(*rows).ok_or_else(|| {
                Error::shard_read(&shard.path, "combined row count overflows")
            })?;
            layout.rows.push(*rows);
        }

        if layout.combined_len().is_none() {
            return Err(Error::shard_read(
                &self.pattern,
                format!(
                    "combined shape ({}, {:?}) overflows",
                    total_rows, layout.trailing_shape
                ),
            ));
        }
        Ok(layout)
    }
}

/// Header-derived shape information for a shard set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardLayout {
    /// Common element type; `None` for an empty set
    pub dtype: Option<Dtype>,
    /// Shape of a single row
    pub trailing_shape: Vec<usize>,
    /// Row count per shard, in set order
    pub rows: Vec<usize>,
}

impl ShardLayout {
    pub fn total_rows(&self) -> usize {
        self.rows.iter().fold(0, |acc, &rows| acc.saturating_add(rows))
    }

    fn combined_shape(&self) -> Vec<usize> {
        let mut shape = Vec::with_capacity(1 + self.trailing_shape.len());
        shape.push(self.total_rows());
        shape.extend_from_slice(&self.trailing_shape);
        shape
    }

    /// Element count of the combined array, `None` on overflow
    fn combined_len(&self) -> Option<usize> {
        self.rows
            .iter()
            .try_fold(0usize, |acc, &rows| acc.checked_add(rows))?
            .checked_mul(
                self.trailing_shape
                    .iter()
                    .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))?,
            )
    }
}

/// Row-wise concatenation of a shard set
#[derive(Debug, Clone, PartialEq)]
pub enum CombinedArtifact {
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
}

impl CombinedArtifact {
    /// Zero-row artifact of shape `(0,)`
    pub fn empty(dtype: Dtype) -> Self {
        let shape = IxDyn(&[0]);
        match dtype {
            Dtype::F32 => CombinedArtifact::F32(ArrayD::from_elem(shape, 0.0)),
            Dtype::F64 => CombinedArtifact::F64(ArrayD::from_elem(shape, 0.0)),
            Dtype::I32 => CombinedArtifact::I32(ArrayD::from_elem(shape, 0)),
            Dtype::I64 => CombinedArtifact::I64(ArrayD::from_elem(shape, 0)),
        }
    }

    pub fn dtype(&self) -> Dtype {
        match self {
            CombinedArtifact::F32(_) => Dtype::F32,
            CombinedArtifact::F64(_) => Dtype::F64,
            CombinedArtifact::I32(_) => Dtype::I32,
            CombinedArtifact::I64(_) => Dtype::I64,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            CombinedArtifact::F32(a) => a.shape(),
            CombinedArtifact::F64(a) => a.shape(),
            CombinedArtifact::I32(a) => a.shape(),
            CombinedArtifact::I64(a) => a.shape(),
        }
    }

    pub fn rows(&self) -> usize {
        self.shape().first().copied().unwrap_or(0)
    }

    /// Persist as NPY via a temp file and rename
    pub fn write_npy(&self, dest: &Path) -> Result<()> {
        write_atomic(dest, |writer| {
            match self {
                CombinedArtifact::F32(a) => a.write_npy(writer)?,
                CombinedArtifact::F64(a) => a.write_npy(writer)?,
                CombinedArtifact::I32(a) => a.write_npy(writer)?,
                CombinedArtifact::I64(a) => a.write_npy(writer)?,
            }
            Ok(())
        })
    }

    /// Load a combined artifact previously written by [`write_npy`](Self::write_npy)
    pub fn read_npy(path: &Path) -> Result<Self> {
        let header = read_npy_header(path)?;
        let dtype = Dtype::from_descr(&header.descr).ok_or_else(|| {
            Error::shard_read(path, format!("unsupported dtype '{}'", header.descr))
        })?;
        let file = File::open(path)?;
        Ok(match dtype {
            Dtype::F32 => CombinedArtifact::F32(ArrayD::read_npy(file)?),
            Dtype::F64 => CombinedArtifact::F64(ArrayD::read_npy(file)?),
            Dtype::I32 => CombinedArtifact::I32(ArrayD::read_npy(file)?),
            Dtype::I64 => CombinedArtifact::I64(ArrayD::read_npy(file)?),
        })
    }
}

/// Per-shard provenance recorded in the output manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRecord {
    pub file: String,
    pub rows: usize,
}

/// What one persisted merge produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSummary {
    pub path: PathBuf,
    pub pattern: String,
    pub dtype: String,
    pub shape: Vec<usize>,
    pub rows: usize,
    pub shards: Vec<ShardRecord>,
}

/// Concatenates shard sets into combined artifacts
#[derive(Debug, Clone)]
pub struct ShardMerger {
    device: Device,
    print_every: usize,
    show_progress: bool,
}

impl ShardMerger {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            print_every: DEFAULT_PRINT_EVERY,
            show_progress: false,
        }
    }

    /// Log every `n`th shard; 0 disables the log lines
    pub fn with_print_every(mut self, n: usize) -> Self {
        self.print_every = n;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Merge a shard set, reading headers first
    pub fn merge(&self, set: &ShardSet, fallback: Dtype) -> Result<CombinedArtifact> {
        let layout = set.layout()?;
        self.merge_with_layout(set, &layout, fallback)
    }

    /// Merge a shard set whose layout is already known.
    ///
    /// An empty set yields a `(0,)` artifact of the `fallback` dtype.
    pub fn merge_with_layout(
        &self,
        set: &ShardSet,
        layout: &ShardLayout,
        fallback: Dtype,
    ) -> Result<CombinedArtifact> {
        let Some(dtype) = layout.dtype else {
            tracing::warn!(pattern = %set.pattern(), "No shards matched; producing an empty artifact");
            return Ok(CombinedArtifact::empty(fallback));
        };

        tracing::info!(
            pattern = %set.pattern(),
            shards = set.len(),
            rows = layout.total_rows(),
            device = %self.device,
            "Merging shards"
        );
        if !self.device.is_host() {
            tracing::debug!(device = %self.device, "NPY shards are materialised in host memory");
        }

        Ok(match dtype {
            Dtype::F32 => CombinedArtifact::F32(self.merge_typed(set, layout)?),
            Dtype::F64 => CombinedArtifact::F64(self.merge_typed(set, layout)?),
            Dtype::I32 => CombinedArtifact::I32(self.merge_typed(set, layout)?),
            Dtype::I64 => CombinedArtifact::I64(self.merge_typed(set, layout)?),
        })
    }

    fn merge_typed<T>(&self, set: &ShardSet, layout: &ShardLayout) -> Result<ArrayD<T>>
    where
        T: ReadableElement + Clone,
    {
        let combined_shape = layout.combined_shape();
        let len = layout.combined_len().ok_or_else(|| {
            Error::shard_read(
                set.pattern(),
                format!("combined shape {:?} overflows", combined_shape),
            )
        })?;
        let mut data: Vec<T> = Vec::new();
        data.try_reserve_exact(len).map_err(|e| {
            Error::shard_read(
                set.pattern(),
                format!("cannot allocate {} elements: {}", len, e),
            )
        })?;

        let progress = if self.show_progress {
            let bar = indicatif::ProgressBar::new(set.len() as u64);
            bar.set_message("Combining shards...");
            Some(bar)
        } else {
            None
        };

        for (i, (shard, &expected_rows)) in set.shards().iter().zip(&layout.rows).enumerate() {
            if self.print_every > 0 && i % self.print_every == 0 {
                tracing::info!("{:07} {}", i, shard.path.display());
            }

            let file = File::open(&shard.path)
                .map_err(|e| Error::shard_read(&shard.path, format!("failed to open: {}", e)))?;
            let array = ArrayD::<T>::read_npy(file)
                .map_err(|e| Error::shard_read(&shard.path, e.to_string()))?;

            if array.ndim() == 0
                || array.len_of(Axis(0)) != expected_rows
                || array.shape()[1..] != layout.trailing_shape[..]
            {
                return Err(Error::shard_read(
                    &shard.path,
                    format!(
                        "shape {:?} does not match header-derived ({}, {:?})",
                        array.shape(),
                        expected_rows,
                        layout.trailing_shape
                    ),
                ));
            }

            match array.as_slice() {
                Some(slice) => data.extend_from_slice(slice),
                None => data.extend(array.iter().cloned()),
            }

            if let Some(ref bar) = progress {
                bar.inc(1);
            }
        }

        if let Some(bar) = progress {
            bar.finish_and_clear();
        }

        ArrayD::from_shape_vec(IxDyn(&combined_shape), data).map_err(|e| {
            Error::shard_read(
                set.pattern(),
                format!("failed to assemble combined array: {}", e),
            )
        })
    }

    /// Merge, persist to `dest`, and release the combined array
    pub fn merge_to(
        &self,
        set: &ShardSet,
        layout: &ShardLayout,
        fallback: Dtype,
        dest: &Path,
    ) -> Result<MergeSummary> {
        let artifact = self.merge_with_layout(set, layout, fallback)?;
        artifact.write_npy(dest)?;

        let summary = MergeSummary {
            path: dest.to_path_buf(),
            pattern: set.pattern().to_string(),
            dtype: artifact.dtype().descr().to_string(),
            shape: artifact.shape().to_vec(),
            rows: artifact.rows(),
            shards: set
                .shards()
                .iter()
                .zip(&layout.rows)
                .map(|(shard, &rows)| ShardRecord {
                    file: shard.file_name(),
                    rows,
                })
                .collect(),
        };
        drop(artifact);

        tracing::info!(path = %dest.display(), rows = summary.rows, "Saved combined artifact");
        Ok(summary)
    }
}
