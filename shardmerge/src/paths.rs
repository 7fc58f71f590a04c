//! Input and output path layout for one (dataset kind, pass direction) pair.
//!
//! Input layout:
//! - `<dir>/<scenario>/embed_<dir>/rnn_<fwd|bwd>*` vector shards
//! - `<dir>/<scenario>/embed_<dir>/rnn_indxs*` id shards
//! - `<dir>/<scenario>/<dir>.df` item table
//!
//! Output layout under `<output_parent>/<output_scenario>/`:
//! - `{queries|candidates}_{forward|backward}.pt` and the `_id.pt`,
//!   `_items.npy`, `_manifest.json` companions

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::selection::{DatasetKind, PassDirection};

const ID_SHARD_PREFIX: &str = "rnn_indxs";

/// Everything needed to locate inputs and outputs for one pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSpec<'a> {
    /// Root the relative dataset directory is resolved against
    pub input_root: &'a Path,
    /// Dataset directory name; defaults to `queries` / `candidates`
    pub dataset_dirname: Option<&'a str>,
    pub input_scenario: &'a str,
    pub output_parent: &'a Path,
    pub output_scenario: &'a str,
}

/// Resolved paths for one (kind, pass) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePaths {
    pub kind: DatasetKind,
    pub pass: PassDirection,
    /// `<dir>/<scenario>`, where the run config and item table live
    pub input_dir: PathBuf,
    pub vector_glob: String,
    pub id_glob: String,
    pub table_path: PathBuf,
    pub output_dir: PathBuf,
    pub vectors_out: PathBuf,
    pub ids_out: PathBuf,
    pub items_out: PathBuf,
    pub manifest_out: PathBuf,
}

impl MergePaths {
    pub fn resolve(kind: DatasetKind, pass: PassDirection, spec: &PathSpec<'_>) -> Self {
        let dirname = spec.dataset_dirname.unwrap_or(kind.plural());
        let input_dir = spec.input_root.join(dirname).join(spec.input_scenario);
        let embed_dir = input_dir.join(format!("embed_{}", dirname));

        let vector_glob = glob_pattern(&embed_dir, &format!("rnn_{}*", pass.shard_token()));
        let id_glob = glob_pattern(&embed_dir, &format!("{}*", ID_SHARD_PREFIX));
        let table_path = input_dir.join(format!("{}.df", dirname));

        let output_dir = spec.output_parent.join(spec.output_scenario);
        let stem = format!("{}_{}", kind.plural(), pass.as_str());

        Self {
            kind,
            pass,
            vectors_out: output_dir.join(format!("{}.pt", stem)),
            ids_out: output_dir.join(format!("{}_id.pt", stem)),
            items_out: output_dir.join(format!("{}_items.npy", stem)),
            manifest_out: output_dir.join(format!("{}_manifest.json", stem)),
            input_dir,
            vector_glob,
            id_glob,
            table_path,
            output_dir,
        }
    }

    /// `kind/pass` label used in logs and errors
    pub fn pair_label(&self) -> String {
        format!("{}/{}", self.kind, self.pass)
    }

    /// Create the output directory; succeeds if it already exists
    pub fn ensure_output_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.output_dir)?;
        Ok(())
    }
}

/// Join a file pattern onto a directory, escaping glob metacharacters in the
/// directory part so only the file pattern is interpreted.
fn glob_pattern(dir: &Path, file_pattern: &str) -> String {
    let escaped = glob::Pattern::escape(&dir.to_string_lossy());
    format!("{}{}{}", escaped, std::path::MAIN_SEPARATOR, file_pattern)
}
