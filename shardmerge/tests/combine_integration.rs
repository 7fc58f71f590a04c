//! Integration tests for the full combine flow.
//!
//! Each test builds a dataset directory tree in a temp dir the way the encoder
//! lays it out, runs `combine_vecs`, and inspects the written artifacts.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use ndarray::{arr1, Array1, Array2, Axis};
use ndarray_npy::WriteNpyExt;
use shardmerge::{
    combine_vecs, CombineOptions, CombinedArtifact, DatasetKind, Device, Error, OutputManifest,
    PassDirection, ShardMerger, ShardSet,
};
use tempfile::TempDir;

const DIM: usize = 3;

/// Vector rows whose first column is the global row number
fn vector_rows(start: usize, rows: usize) -> Array2<f32> {
    Array2::from_shape_fn((rows, DIM), |(r, c)| {
        if c == 0 {
            (start + r) as f32
        } else {
            c as f32 / 10.0
        }
    })
}

fn id_rows(start: usize, rows: usize) -> Array1<i64> {
    Array1::from_iter((start..start + rows).map(|i| i as i64))
}

struct Dataset {
    root: TempDir,
}

impl Dataset {
    fn new() -> Self {
        Self {
            root: TempDir::new().unwrap(),
        }
    }

    fn root(&self) -> &Path {
        self.root.path()
    }

    fn input_dir(&self, dirname: &str) -> PathBuf {
        self.root().join(dirname).join("test")
    }

    fn embed_dir(&self, dirname: &str) -> PathBuf {
        let dir = self.input_dir(dirname).join(format!("embed_{}", dirname));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Write vector and id shards with the given per-shard row counts, in
    /// the given creation order
    fn write_shards(&self, dirname: &str, token: &str, rows: &[usize], order: &[usize]) {
        let embed = self.embed_dir(dirname);
        let starts: Vec<usize> = rows
            .iter()
            .scan(0, |acc, &r| {
                let s = *acc;
                *acc += r;
                Some(s)
            })
            .collect();

        for &i in order {
            vector_rows(starts[i], rows[i])
                .write_npy(File::create(embed.join(format!("rnn_{}_{}", token, i))).unwrap())
                .unwrap();
            id_rows(starts[i], rows[i])
                .write_npy(File::create(embed.join(format!("rnn_indxs_{}", i))).unwrap())
                .unwrap();
        }
    }

    fn write_items(&self, dirname: &str, count: usize) {
        let mut lines = String::new();
        for i in 0..count {
            lines.push_str(&format!(
                "{{\"s1_unicode\": \"item {}\", \"s1\": \"Item {}\"}}\n",
                i, i
            ));
        }
        fs::create_dir_all(self.input_dir(dirname)).unwrap();
        fs::write(self.input_dir(dirname).join(format!("{}.df", dirname)), lines).unwrap();
    }

    fn write_config(&self, dirname: &str, name: &str, content: &str) {
        fs::create_dir_all(self.input_dir(dirname)).unwrap();
        fs::write(self.input_dir(dirname).join(name), content).unwrap();
    }

    fn options(&self) -> CombineOptions {
        let mut options = CombineOptions::new("test", "run1");
        options.input_root = self.root().to_path_buf();
        options.output_parent = self.root().join("combined");
        options
    }

    fn output(&self, name: &str) -> PathBuf {
        self.root().join("combined").join("run1").join(name)
    }
}

fn first_column(artifact: &CombinedArtifact) -> Vec<f32> {
    match artifact {
        CombinedArtifact::F32(a) => a.index_axis(Axis(1), 0).iter().copied().collect(),
        other => panic!("expected f32 vectors, got {:?}", other.dtype()),
    }
}

fn ids(artifact: &CombinedArtifact) -> Vec<i64> {
    match artifact {
        CombinedArtifact::I64(a) => a.iter().copied().collect(),
        other => panic!("expected i64 ids, got {:?}", other.dtype()),
    }
}

#[test]
fn test_query_forward_two_shards() {
    let data = Dataset::new();
    data.write_shards("queries", "fwd", &[2, 3], &[1, 0]);
    data.write_items("queries", 5);

    let mut options = data.options();
    options.kinds = vec![DatasetKind::Query];
    options.passes = vec![PassDirection::Forward];
    options.device = Some(Device::Cpu);

    let manifests = combine_vecs(&options).unwrap();
    assert_eq!(manifests.len(), 1);

    let vectors = CombinedArtifact::read_npy(&data.output("queries_forward.pt")).unwrap();
    assert_eq!(vectors.shape(), &[5, DIM]);
    assert_eq!(first_column(&vectors), vec![0.0, 1.0, 2.0, 3.0, 4.0]);

    let id_artifact = CombinedArtifact::read_npy(&data.output("queries_forward_id.pt")).unwrap();
    assert_eq!(ids(&id_artifact), vec![0, 1, 2, 3, 4]);

    assert!(data.output("queries_forward_items.npy").is_file());
    assert!(data.output("queries_forward_manifest.json").is_file());
    assert!(!data.output("queries_backward.pt").exists());
}

#[test]
fn test_ordering_with_unpadded_batch_indices() {
    let data = Dataset::new();
    let rows: Vec<usize> = (0..=10).map(|i| 1 + i % 3).collect();
    // Create files in reverse so enumeration order carries no information
    let order: Vec<usize> = (0..=10).rev().collect();
    data.write_shards("queries", "fwd", &rows, &order);

    let mut options = data.options();
    options.kinds = vec![DatasetKind::Query];
    options.passes = vec![PassDirection::Forward];
    options.device = Some(Device::Cpu);
    options.extract_items = false;

    combine_vecs(&options).unwrap();

    let total: usize = rows.iter().sum();
    let vectors = CombinedArtifact::read_npy(&data.output("queries_forward.pt")).unwrap();
    let expected: Vec<f32> = (0..total).map(|i| i as f32).collect();
    assert_eq!(first_column(&vectors), expected);

    let id_artifact = CombinedArtifact::read_npy(&data.output("queries_forward_id.pt")).unwrap();
    assert_eq!(ids(&id_artifact), (0..total as i64).collect::<Vec<_>>());
}

#[test]
fn test_shuffled_presentation_order() {
    let data = Dataset::new();
    let rows = vec![1; 10];
    data.write_shards("queries", "fwd", &rows, &(0..10).collect::<Vec<_>>());
    let embed = data.embed_dir("queries");

    let shuffled = [7, 2, 9, 0, 4, 1, 8, 3, 6, 5]
        .iter()
        .map(|i| embed.join(format!("rnn_fwd_{}", i)));
    let set = ShardSet::from_paths("shuffled", shuffled);
    let ordinals: Vec<_> = set.shards().iter().filter_map(|s| s.ordinal).collect();
    assert_eq!(ordinals, (0..10).collect::<Vec<_>>());

    let merged = ShardMerger::new(Device::Cpu)
        .merge(&set, shardmerge::Dtype::F32)
        .unwrap();
    assert_eq!(
        first_column(&merged),
        (0..10).map(|i| i as f32).collect::<Vec<_>>()
    );
}

#[test]
fn test_all_pairs_and_rerun_overwrites() {
    let data = Dataset::new();
    data.write_shards("queries", "fwd", &[2, 2], &[0, 1]);
    data.write_shards("queries", "bwd", &[2, 2], &[0, 1]);
    data.write_shards("candidates", "fwd", &[3], &[0]);
    data.write_shards("candidates", "bwd", &[3], &[0]);
    data.write_items("queries", 4);
    data.write_items("candidates", 3);
    data.write_config("queries", "input.json", r#"{"general": {"device": "cpu"}}"#);
    data.write_config("candidates", "input.toml", "[general]\ndevice = \"cuda:0\"\n");

    let options = data.options();
    let first = combine_vecs(&options).unwrap();
    assert_eq!(first.len(), 4);
    assert_eq!(first[0].device, "cpu");
    assert_eq!(first[2].device, "cuda:0");

    // Provenance copies of both configs
    assert!(data.output("input.json").is_file());
    assert!(data.output("input.toml").is_file());

    let before = fs::read(data.output("candidates_backward.pt")).unwrap();
    let second = combine_vecs(&options).unwrap();
    assert_eq!(first, second);
    assert_eq!(fs::read(data.output("candidates_backward.pt")).unwrap(), before);

    let manifest =
        OutputManifest::load(&data.output("candidates_backward_manifest.json")).unwrap();
    assert_eq!(manifest.vectors.rows, 3);
    assert_eq!(manifest.ids.shards.len(), 1);
    assert_eq!(manifest.ids.shards[0].file, "rnn_indxs_0");
}

#[test]
fn test_device_from_encoder_yaml_config() {
    let data = Dataset::new();
    data.write_shards("queries", "fwd", &[2], &[0]);
    data.write_config(
        "queries",
        "input_dfm.yaml",
        "general:\n  device: \"cpu\"\n  use_gpu: false\n",
    );

    let mut options = data.options();
    options.kinds = vec![DatasetKind::Query];
    options.passes = vec![PassDirection::Forward];
    options.extract_items = false;

    let manifests = combine_vecs(&options).unwrap();
    assert_eq!(manifests[0].device, "cpu");
    assert!(data.output("input_dfm.yaml").is_file());
    assert!(data.output("queries_forward.pt").is_file());
}

#[test]
fn test_empty_glob_produces_empty_artifacts() {
    let data = Dataset::new();
    data.embed_dir("queries");

    let mut options = data.options();
    options.kinds = vec![DatasetKind::Query];
    options.passes = vec![PassDirection::Backward];
    options.device = Some(Device::Cpu);
    options.extract_items = false;

    let manifests = combine_vecs(&options).unwrap();
    assert_eq!(manifests[0].vectors.rows, 0);

    let vectors = CombinedArtifact::read_npy(&data.output("queries_backward.pt")).unwrap();
    assert_eq!(vectors.shape(), &[0]);
    let id_artifact = CombinedArtifact::read_npy(&data.output("queries_backward_id.pt")).unwrap();
    assert_eq!(id_artifact, CombinedArtifact::I64(arr1::<i64>(&[]).into_dyn()));
}

#[test]
fn test_missing_device_names_failing_pair() {
    let data = Dataset::new();
    data.write_shards("queries", "fwd", &[1], &[0]);

    let mut options = data.options();
    options.kinds = vec![DatasetKind::Query];
    options.passes = vec![PassDirection::Forward];
    options.extract_items = false;

    let err = combine_vecs(&options).unwrap_err();
    match &err {
        Error::Pair { pair, source } => {
            assert_eq!(pair, "query/forward");
            assert!(matches!(**source, Error::Configuration(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!data.output("queries_forward.pt").exists());
}

#[test]
fn test_corrupt_shard_aborts_later_pairs_only() {
    let data = Dataset::new();
    data.write_shards("queries", "fwd", &[2], &[0]);
    data.write_shards("queries", "bwd", &[2], &[0]);
    fs::write(data.embed_dir("queries").join("rnn_bwd_1"), b"garbage").unwrap();

    let mut options = data.options();
    options.kinds = vec![DatasetKind::Query];
    options.device = Some(Device::Cpu);
    options.extract_items = false;

    let err = combine_vecs(&options).unwrap_err();
    let Error::Pair { pair, source } = err else {
        panic!("expected pair error");
    };
    assert_eq!(pair, "query/backward");
    assert!(matches!(*source, Error::ShardRead { .. }));

    assert!(data.output("queries_forward.pt").is_file());
    assert!(!data.output("queries_backward.pt").exists());
}

#[test]
fn test_item_row_mismatch_is_rejected_before_writing() {
    let data = Dataset::new();
    data.write_shards("queries", "fwd", &[2, 3], &[0, 1]);
    data.write_items("queries", 4);

    let mut options = data.options();
    options.kinds = vec![DatasetKind::Query];
    options.passes = vec![PassDirection::Forward];
    options.device = Some(Device::Cpu);

    let err = combine_vecs(&options).unwrap_err();
    let Error::Pair { source, .. } = err else {
        panic!("expected pair error");
    };
    assert!(matches!(*source, Error::Alignment(_)));
    assert!(!data.output("queries_forward.pt").exists());

    options.check_alignment = false;
    combine_vecs(&options).unwrap();
    assert!(data.output("queries_forward_items.npy").is_file());
}

#[test]
fn test_id_merge_independent_of_vectors() {
    let data = Dataset::new();
    data.write_shards("queries", "fwd", &[2, 3], &[0, 1]);
    // Remove the vector shards entirely; ids still merge on their own
    for i in 0..2 {
        fs::remove_file(data.embed_dir("queries").join(format!("rnn_fwd_{}", i))).unwrap();
    }

    let pattern = format!("{}/rnn_indxs*", data.embed_dir("queries").display());
    let set = ShardSet::discover(&pattern).unwrap();
    let merged = ShardMerger::new(Device::Cpu)
        .merge(&set, shardmerge::Dtype::I64)
        .unwrap();
    assert_eq!(ids(&merged), vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_custom_dirname_and_explicit_config() {
    let data = Dataset::new();
    data.write_shards("places", "bwd", &[1, 1], &[1, 0]);
    let config = data.root().join("elsewhere.json");
    fs::write(&config, r#"{"general": {"device": "mps"}}"#).unwrap();

    let mut options = data.options();
    options.kinds = vec![DatasetKind::Candidate];
    options.passes = vec![PassDirection::Backward];
    options.dataset_dirname = Some("places".into());
    options.config_path = Some(config);
    options.extract_items = false;

    let manifests = combine_vecs(&options).unwrap();
    assert_eq!(manifests[0].device, "mps");
    assert!(data.output("candidates_backward.pt").is_file());
    assert!(data.output("elsewhere.json").is_file());
}
