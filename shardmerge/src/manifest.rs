//! Provenance record written next to each pair's combined artifacts.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::merge::MergeSummary;
use crate::npy::write_atomic;

/// Files written for one (kind, pass) pair and where they came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputManifest {
    pub kind: String,
    pub pass: String,
    pub device: String,
    pub vectors: MergeSummary,
    pub ids: MergeSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<PathBuf>,
}

impl OutputManifest {
    /// Every artifact path recorded in the manifest
    pub fn written_paths(&self) -> Vec<&Path> {
        let mut paths = vec![self.vectors.path.as_path(), self.ids.path.as_path()];
        paths.extend(self.items.as_deref());
        paths.extend(self.config.as_deref());
        paths
    }

    /// Save atomically as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, |writer| {
            serde_json::to_writer_pretty(writer, self)?;
            Ok(())
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::ShardRecord;
    use tempfile::TempDir;

    fn summary(path: &str, rows: usize) -> MergeSummary {
        MergeSummary {
            path: PathBuf::from(path),
            pattern: "q/test/embed_q/rnn_fwd*".into(),
            dtype: "<f4".into(),
            shape: vec![rows, 8],
            rows,
            shards: vec![ShardRecord {
                file: "rnn_fwd_0".into(),
                rows,
            }],
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queries_forward_manifest.json");
        let manifest = OutputManifest {
            kind: "query".into(),
            pass: "forward".into(),
            device: "cpu".into(),
            vectors: summary("out/queries_forward.pt", 4),
            ids: summary("out/queries_forward_id.pt", 4),
            items: None,
            config: Some(PathBuf::from("out/run.json")),
        };
        manifest.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("\"items\""));

        let loaded = OutputManifest::load(&path).unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.written_paths().len(), 3);
    }
}
