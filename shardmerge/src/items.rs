//! Item strings aligned with the combined vectors.
//!
//! The dataset's item table holds one row per encoded string. Two of its
//! columns are exported: the normalised form (`s1_unicode`) and the raw form
//! (`s1`). The table is stored either as Apache Parquet or as JSON Lines; the
//! format is detected from the file's leading bytes.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::npy::{write_atomic, write_unicode_rows};

/// Column holding the normalised string
pub const NORMALIZED_COLUMN: &str = "s1_unicode";
/// Column holding the raw string
pub const RAW_COLUMN: &str = "s1";

const PARQUET_MAGIC: &[u8; 4] = b"PAR1";

/// The two exported columns of a dataset's item table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemTable {
    pub normalized: Vec<String>,
    pub raw: Vec<String>,
}

impl ItemTable {
    pub fn len(&self) -> usize {
        self.normalized.len()
    }

    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }

    fn push(&mut self, normalized: String, raw: String) {
        self.normalized.push(normalized);
        self.raw.push(raw);
    }

    /// Read the table at `path`, detecting Parquet by its magic bytes
    pub fn read(path: &Path) -> Result<Self> {
        let mut file = File::open(path).map_err(|e| {
            Error::ItemTable(format!("Failed to open item table {}: {}", path.display(), e))
        })?;

        let mut magic = [0u8; 4];
        let is_parquet = match file.read_exact(&mut magic) {
            Ok(()) => &magic == PARQUET_MAGIC,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => false,
            Err(e) => return Err(e.into()),
        };

        let table = if is_parquet {
            Self::read_parquet(path)?
        } else {
            Self::read_json_lines(path)?
        };

        tracing::debug!(path = %path.display(), rows = table.len(), "Read item table");
        Ok(table)
    }

    fn read_parquet(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let reader = SerializedFileReader::new(file)?;

        let mut table = ItemTable::default();
        for (idx, row) in reader.get_row_iter(None)?.enumerate() {
            let row = row?;
            let mut normalized = None;
            let mut raw = None;
            for (name, field) in row.get_column_iter() {
                if name == NORMALIZED_COLUMN {
                    normalized = field_to_string(field);
                } else if name == RAW_COLUMN {
                    raw = field_to_string(field);
                }
            }
            table.push(
                require(normalized, NORMALIZED_COLUMN, idx, path)?,
                require(raw, RAW_COLUMN, idx, path)?,
            );
        }
        Ok(table)
    }

    fn read_json_lines(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);

        let mut table = ItemTable::default();
        let mut idx = 0usize;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(&line).map_err(|e| {
                Error::ItemTable(format!(
                    "Invalid JSON on row {} of {}: {}",
                    idx,
                    path.display(),
                    e
                ))
            })?;
            let normalized = value.get(NORMALIZED_COLUMN).and_then(json_to_string);
            let raw = value.get(RAW_COLUMN).and_then(json_to_string);
            table.push(
                require(normalized, NORMALIZED_COLUMN, idx, path)?,
                require(raw, RAW_COLUMN, idx, path)?,
            );
            idx += 1;
        }
        Ok(table)
    }

    /// Persist as a `(rows, 2)` fixed-width unicode NPY array
    pub fn write_npy(&self, dest: &Path) -> Result<()> {
        let rows: Vec<[&str; 2]> = self
            .normalized
            .iter()
            .zip(&self.raw)
            .map(|(n, r)| [n.as_str(), r.as_str()])
            .collect();
        write_atomic(dest, |writer| write_unicode_rows(writer, &rows))
    }
}

fn field_to_string(field: &Field) -> Option<String> {
    match field {
        Field::Str(s) => Some(s.clone()),
        Field::Null => None,
        other => Some(other.to_string()),
    }
}

fn json_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn require(value: Option<String>, column: &str, row: usize, path: &Path) -> Result<String> {
    value.ok_or_else(|| {
        Error::ItemTable(format!(
            "Row {} of {} has no '{}' value",
            row,
            path.display(),
            column
        ))
    })
}
