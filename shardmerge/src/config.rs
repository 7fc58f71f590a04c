//! Per-run configuration files.
//!
//! The encoder that produces the shards leaves its run configuration next to
//! the dataset. Only `general.device` is consumed here; every other field is
//! ignored. YAML (the encoder's native format), JSON and TOML files are
//! recognised by extension.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// File extensions treated as run configuration files
pub const CONFIG_EXTENSIONS: &[&str] = &["yaml", "yml", "json", "toml"];

/// The subset of the encoder's run configuration read by this crate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub general: GeneralSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

impl RunConfig {
    /// Load a run configuration, choosing the parser from the file extension
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config {}: {}", path.display(), e))
        })?;

        match extension_of(path).as_deref() {
            Some("yaml" | "yml") => Ok(serde_yaml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some("toml") => Ok(toml::from_str(&content)?),
            _ => Err(Error::Configuration(format!(
                "Unsupported config format for {} (expected one of {:?})",
                path.display(),
                CONFIG_EXTENSIONS
            ))),
        }
    }

    pub fn device(&self) -> Option<&str> {
        self.general.device.as_deref()
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

fn is_config_file(path: &Path) -> bool {
    path.is_file()
        && extension_of(path).is_some_and(|ext| CONFIG_EXTENSIONS.contains(&ext.as_str()))
}

/// Find the run configuration file in `dir`.
///
/// Returns `None` when the directory holds no candidate (or does not exist),
/// and a configuration error when more than one candidate is present.
pub fn discover_config_file(dir: &Path) -> Result<Option<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut found: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| is_config_file(path))
        .collect();
    found.sort();

    match found.len() {
        0 => Ok(None),
        1 => Ok(found.pop()),
        _ => Err(Error::Configuration(format!(
            "Found {} config files in {}, pass one explicitly: {:?}",
            found.len(),
            dir.display(),
            found
        ))),
    }
}

/// Pick the explicit config path if given, otherwise discover one in `input_dir`
pub fn locate_config_file(explicit: Option<&Path>, input_dir: &Path) -> Result<Option<PathBuf>> {
    match explicit {
        Some(path) => Ok(Some(path.to_path_buf())),
        None => discover_config_file(input_dir),
    }
}

/// Copy the config file into the output directory for provenance.
///
/// Best effort: failures are logged and swallowed.
pub fn copy_config_to(config_path: &Path, output_dir: &Path) -> Option<PathBuf> {
    let file_name = config_path.file_name()?;
    let dest = output_dir.join(file_name);
    match fs::copy(config_path, &dest) {
        Ok(_) => {
            tracing::debug!(from = %config_path.display(), to = %dest.display(), "copied run config");
            Some(dest)
        }
        Err(e) => {
            tracing::warn!(
                "Failed to copy config {} into {}: {}",
                config_path.display(),
                output_dir.display(),
                e
            );
            None
        }
    }
}
