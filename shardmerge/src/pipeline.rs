//! End-to-end combine flow over the requested (kind, pass) pairs.
//!
//! Pairs run strictly one after another. Within a pair, both shard sets and
//! the item table are inspected and cross-checked before anything is written;
//! then vectors, ids, items and the manifest are persisted in that order.

use std::path::PathBuf;
use std::time::Instant;

use crate::config::{copy_config_to, locate_config_file};
use crate::device::{resolve_device, Device};
use crate::error::{Error, Result};
use crate::items::ItemTable;
use crate::manifest::OutputManifest;
use crate::merge::{ShardLayout, ShardMerger, ShardSet, DEFAULT_PRINT_EVERY};
use crate::npy::Dtype;
use crate::paths::{MergePaths, PathSpec};
use crate::selection::{DatasetKind, PassDirection};

/// Parameters of a combine run
#[derive(Debug, Clone)]
pub struct CombineOptions {
    pub kinds: Vec<DatasetKind>,
    pub passes: Vec<PassDirection>,
    /// Directory the dataset directories are resolved against
    pub input_root: PathBuf,
    /// Dataset directory name override (default: `queries` / `candidates`)
    pub dataset_dirname: Option<String>,
    pub input_scenario: String,
    pub output_parent: PathBuf,
    pub output_scenario: String,
    /// Explicit device; skips reading it from the run config
    pub device: Option<Device>,
    /// Explicit run config; otherwise discovered in the input directory
    pub config_path: Option<PathBuf>,
    /// Export `s1_unicode`/`s1` from the item table
    pub extract_items: bool,
    /// Reject pairs whose vectors, ids and items disagree on row counts
    pub check_alignment: bool,
    pub print_every: usize,
    pub show_progress: bool,
}

impl CombineOptions {
    pub fn new(input_scenario: impl Into<String>, output_scenario: impl Into<String>) -> Self {
        Self {
            kinds: DatasetKind::ALL.to_vec(),
            passes: PassDirection::ALL.to_vec(),
            input_root: PathBuf::from("."),
            dataset_dirname: None,
            input_scenario: input_scenario.into(),
            output_parent: PathBuf::from("combined"),
            output_scenario: output_scenario.into(),
            device: None,
            config_path: None,
            extract_items: true,
            check_alignment: true,
            print_every: DEFAULT_PRINT_EVERY,
            show_progress: false,
        }
    }

    fn path_spec(&self) -> PathSpec<'_> {
        PathSpec {
            input_root: &self.input_root,
            dataset_dirname: self.dataset_dirname.as_deref(),
            input_scenario: &self.input_scenario,
            output_parent: &self.output_parent,
            output_scenario: &self.output_scenario,
        }
    }
}

/// Combine every requested pair.
///
/// Stops at the first failing pair; outputs of pairs that already finished
/// stay on disk.
pub fn combine_vecs(options: &CombineOptions) -> Result<Vec<OutputManifest>> {
    let start = Instant::now();
    let spec = options.path_spec();

    let mut manifests = Vec::with_capacity(options.kinds.len() * options.passes.len());
    for &kind in &options.kinds {
        for &pass in &options.passes {
            let paths = MergePaths::resolve(kind, pass, &spec);
            let manifest =
                combine_pair(options, &paths).map_err(|e| e.for_pair(paths.pair_label()))?;
            manifests.push(manifest);
        }
    }

    tracing::info!("--- {:.3} seconds ---", start.elapsed().as_secs_f64());
    Ok(manifests)
}

/// Combine a single (kind, pass) pair
pub fn combine_pair(options: &CombineOptions, paths: &MergePaths) -> Result<OutputManifest> {
    tracing::info!(pair = %paths.pair_label(), "Combining");
    paths.ensure_output_dir()?;

    // An ambiguous config directory only matters when the device comes from it
    let config_file = match locate_config_file(options.config_path.as_deref(), &paths.input_dir) {
        Ok(found) => found,
        Err(e) if options.device.is_some() => {
            tracing::warn!("Skipping config copy: {}", e);
            None
        }
        Err(e) => return Err(e),
    };
    let copied_config = config_file
        .as_deref()
        .and_then(|path| copy_config_to(path, &paths.output_dir));
    let device = resolve_device(
        options.device.as_ref(),
        config_file.as_deref(),
        &paths.input_dir,
    )?;

    let vector_set = ShardSet::discover(&paths.vector_glob)?;
    let id_set = ShardSet::discover(&paths.id_glob)?;
    let vector_layout = vector_set.layout()?;
    let id_layout = id_set.layout()?;

    let items = if options.extract_items {
        Some(ItemTable::read(&paths.table_path)?)
    } else {
        None
    };

    if options.check_alignment {
        check_alignment(&vector_layout, &id_layout, items.as_ref())?;
    }

    let merger = ShardMerger::new(device.clone())
        .with_print_every(options.print_every)
        .with_progress(options.show_progress);

    tracing::info!("-- Combine vectors");
    let vectors = merger.merge_to(&vector_set, &vector_layout, Dtype::F32, &paths.vectors_out)?;

    tracing::info!("-- Combine IDs");
    let ids = merger.merge_to(&id_set, &id_layout, Dtype::I64, &paths.ids_out)?;

    let items_path = match items {
        Some(table) => {
            table.write_npy(&paths.items_out)?;
            tracing::info!(path = %paths.items_out.display(), rows = table.len(), "Saved item strings");
            Some(paths.items_out.clone())
        }
        None => None,
    };

    let manifest = OutputManifest {
        kind: paths.kind.to_string(),
        pass: paths.pass.to_string(),
        device: device.to_string(),
        vectors,
        ids,
        items: items_path,
        config: copied_config,
    };
    manifest.save(&paths.manifest_out)?;

    Ok(manifest)
}

/// Check that vectors, ids and items line up row for row
pub fn check_alignment(
    vectors: &ShardLayout,
    ids: &ShardLayout,
    items: Option<&ItemTable>,
) -> Result<()> {
    if vectors.rows.len() != ids.rows.len() {
        return Err(Error::Alignment(format!(
            "{} vector shards but {} id shards",
            vectors.rows.len(),
            ids.rows.len()
        )));
    }

    if let Some(pos) = vectors.rows.iter().zip(&ids.rows).position(|(v, i)| v != i) {
        return Err(Error::Alignment(format!(
            "shard {} has {} vector rows but {} id rows",
            pos, vectors.rows[pos], ids.rows[pos]
        )));
    }

    if let Some(table) = items {
        if table.len() != vectors.total_rows() {
            return Err(Error::Alignment(format!(
                "item table has {} rows but combined vectors have {}",
                table.len(),
                vectors.total_rows()
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(rows: &[usize]) -> ShardLayout {
        ShardLayout {
            dtype: Some(Dtype::F32),
            trailing_shape: vec![4],
            rows: rows.to_vec(),
        }
    }

    fn table(n: usize) -> ItemTable {
        ItemTable {
            normalized: (0..n).map(|i| i.to_string()).collect(),
            raw: (0..n).map(|i| i.to_string()).collect(),
        }
    }

    #[test]
    fn test_alignment_ok() {
        check_alignment(&layout(&[2, 3]), &layout(&[2, 3]), Some(&table(5))).unwrap();
        check_alignment(&layout(&[]), &layout(&[]), None).unwrap();
    }

    #[test]
    fn test_alignment_shard_count_mismatch() {
        let err = check_alignment(&layout(&[2, 3]), &layout(&[5]), None).unwrap_err();
        assert!(matches!(err, Error::Alignment(_)));
    }

    #[test]
    fn test_alignment_per_shard_mismatch() {
        let err = check_alignment(&layout(&[2, 3]), &layout(&[3, 2]), None).unwrap_err();
        assert!(err.to_string().contains("shard 0"));
    }

    #[test]
    fn test_alignment_items_mismatch() {
        let err = check_alignment(&layout(&[2, 3]), &layout(&[2, 3]), Some(&table(4))).unwrap_err();
        assert!(err.to_string().contains("item table has 4 rows"));
    }

    #[test]
    fn test_default_options() {
        let options = CombineOptions::new("test", "run1");
        assert_eq!(options.kinds, vec![DatasetKind::Query, DatasetKind::Candidate]);
        assert_eq!(options.passes, vec![PassDirection::Forward, PassDirection::Backward]);
        assert_eq!(options.output_parent, PathBuf::from("combined"));
        assert!(options.extract_items);
        assert!(options.check_alignment);
        assert_eq!(options.print_every, DEFAULT_PRINT_EVERY);
    }
}
