use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shardmerge::{combine_vecs, CombineOptions, DatasetKind, Device, PassDirection};

const MAIN_HELP: &str = "\
EXAMPLES:
    # Combine forward and backward vectors for queries and candidates
    combine-vecs --input-scenario test --output-scenario test

    # Only candidates, forward pass, on an explicit device
    combine-vecs -k c -p fwd --input-scenario test --output-scenario test --device cpu

    # Skip exporting item strings
    combine-vecs --input-scenario test --output-scenario test --no-items

LAYOUT:
    Reads  <dir>/<input-scenario>/embed_<dir>/rnn_{fwd,bwd,indxs}*
    Writes <output-par-dir>/<output-scenario>/{queries,candidates}_{forward,backward}*.

ENVIRONMENT:
    RUST_LOG overrides the log filter (default: shardmerge=info,combine_vecs=info)";

#[derive(Parser, Debug)]
#[command(
    name = "combine-vecs",
    version,
    about = "Combine per-batch RNN vector and id shards into single artifacts",
    after_help = MAIN_HELP
)]
struct Cli {
    /// Dataset kinds to combine (q/query, c/candidate)
    #[arg(
        short = 'k',
        long = "qc-modes",
        visible_alias = "qc",
        value_delimiter = ',',
        default_value = "q,c",
        value_parser = parse_kind
    )]
    kinds: Vec<DatasetKind>,

    /// Recurrent passes to combine (fwd/forward, bwd/backward)
    #[arg(
        short = 'p',
        long = "rnn-passes",
        value_delimiter = ',',
        default_value = "fwd,bwd",
        value_parser = parse_pass
    )]
    passes: Vec<PassDirection>,

    /// Scenario directory the shards were written under
    #[arg(long, visible_alias = "isc")]
    input_scenario: String,

    /// Scenario directory to write combined artifacts under
    #[arg(long, visible_alias = "osc")]
    output_scenario: String,

    /// Parent directory for combined outputs
    #[arg(long, visible_alias = "opd", default_value = "combined")]
    output_par_dir: PathBuf,

    /// Dataset directory name (default: queries / candidates)
    #[arg(long, visible_alias = "qcd")]
    query_candidate_dirname: Option<String>,

    /// Run config to read the device from and copy next to the outputs
    #[arg(long, visible_alias = "fp")]
    input_file_path: Option<PathBuf>,

    /// Root the dataset directories are resolved against
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Load device (cpu, cuda, cuda:N, mps); read from the run config if omitted
    #[arg(long, value_parser = parse_device)]
    device: Option<Device>,

    /// Do not export item strings from the dataset table
    #[arg(long)]
    no_items: bool,

    /// Log every N-th shard while merging (0 disables)
    #[arg(long, default_value_t = shardmerge::merge::DEFAULT_PRINT_EVERY)]
    print_every: usize,

    /// Show a progress bar per merge
    #[arg(long)]
    progress: bool,

    /// Write outputs even when vectors, ids and items disagree on row counts
    #[arg(long)]
    no_alignment_check: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_kind(s: &str) -> std::result::Result<DatasetKind, String> {
    s.parse().map_err(|e: shardmerge::Error| e.to_string())
}

fn parse_pass(s: &str) -> std::result::Result<PassDirection, String> {
    s.parse().map_err(|e: shardmerge::Error| e.to_string())
}

fn parse_device(s: &str) -> std::result::Result<Device, String> {
    s.parse().map_err(|e: shardmerge::Error| e.to_string())
}

impl Cli {
    fn into_options(self) -> CombineOptions {
        let mut options = CombineOptions::new(self.input_scenario, self.output_scenario);
        options.kinds = dedup(self.kinds);
        options.passes = dedup(self.passes);
        options.input_root = self.root;
        options.dataset_dirname = self.query_candidate_dirname;
        options.output_parent = self.output_par_dir;
        options.device = self.device;
        options.config_path = self.input_file_path;
        options.extract_items = !self.no_items;
        options.check_alignment = !self.no_alignment_check;
        options.print_every = self.print_every;
        options.show_progress = self.progress;
        options
    }
}

fn dedup<T: PartialEq>(values: Vec<T>) -> Vec<T> {
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        if !out.contains(&value) {
            out.push(value);
        }
    }
    out
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "shardmerge=debug,combine_vecs=debug"
    } else {
        "shardmerge=info,combine_vecs=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let options = cli.into_options();
    let manifests = combine_vecs(&options).context("Failed to combine shards")?;

    for manifest in &manifests {
        tracing::info!(
            kind = %manifest.kind,
            pass = %manifest.pass,
            vectors = manifest.vectors.rows,
            ids = manifest.ids.rows,
            "Done"
        );
        for path in manifest.written_paths() {
            tracing::debug!(path = %path.display(), "Wrote");
        }
    }
    Ok(())
}
