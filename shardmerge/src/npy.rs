//! NPY header inspection and raw writers.
//!
//! Headers are read through a memory map so shard shapes and dtypes can be
//! collected before any data is loaded. The raw writer covers the fixed-width
//! unicode arrays that `ndarray-npy` cannot produce.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::error::{Error, Result};

/// NPY file magic bytes
const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// Element types accepted in shard files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dtype {
    F32,
    F64,
    I32,
    I64,
}

impl Dtype {
    pub fn from_descr(descr: &str) -> Option<Self> {
        match descr {
            "<f4" => Some(Dtype::F32),
            "<f8" => Some(Dtype::F64),
            "<i4" => Some(Dtype::I32),
            "<i8" => Some(Dtype::I64),
            _ => None,
        }
    }

    pub fn descr(&self) -> &'static str {
        match self {
            Dtype::F32 => "<f4",
            Dtype::F64 => "<f8",
            Dtype::I32 => "<i4",
            Dtype::I64 => "<i8",
        }
    }

    pub fn item_size(&self) -> usize {
        match self {
            Dtype::F32 | Dtype::I32 => 4,
            Dtype::F64 | Dtype::I64 => 8,
        }
    }
}

/// Parsed NPY header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpyHeader {
    pub descr: String,
    pub shape: Vec<usize>,
    pub fortran_order: bool,
    /// Byte offset where array data starts
    pub data_offset: usize,
}

impl NpyHeader {
    /// Element count of the declared shape, `None` if it overflows `usize`
    pub fn num_elements(&self) -> Option<usize> {
        self.shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
    }

    /// Bytes the file must hold for `dtype` data, header included
    fn required_len(&self, dtype: Dtype) -> Option<usize> {
        self.num_elements()?
            .checked_mul(dtype.item_size())?
            .checked_add(self.data_offset)
    }
}

/// Read the header of an NPY file without touching its data.
///
/// Also checks that the file is long enough to hold the declared data when
/// the dtype is one of the supported shard types.
pub fn read_npy_header(path: &Path) -> Result<NpyHeader> {
    let file = File::open(path)
        .map_err(|e| Error::shard_read(path, format!("failed to open: {}", e)))?;
    let mmap = unsafe {
        Mmap::map(&file).map_err(|e| Error::shard_read(path, format!("failed to mmap: {}", e)))?
    };

    let header = parse_npy_header(&mmap).map_err(|reason| Error::shard_read(path, reason))?;

    if let Some(dtype) = Dtype::from_descr(&header.descr) {
        let expected = header.required_len(dtype).ok_or_else(|| {
            Error::shard_read(path, format!("shape {:?} overflows", header.shape))
        })?;
        if mmap.len() < expected {
            return Err(Error::shard_read(
                path,
                format!(
                    "truncated data: expected at least {} bytes, found {}",
                    expected,
                    mmap.len()
                ),
            ));
        }
    }

    Ok(header)
}

/// Parse the preamble and the header dict, e.g.
/// `{'descr': '<f4', 'fortran_order': False, 'shape': (3, 4), }`
fn parse_npy_header(bytes: &[u8]) -> std::result::Result<NpyHeader, String> {
    if !bytes.starts_with(NPY_MAGIC) {
        return Err("invalid NPY magic".into());
    }

    // v1 stores the dict length as u16, v2 and v3 as u32
    let data_start = match bytes.get(6) {
        Some(1) => 10,
        Some(2 | 3) => 12,
        Some(v) => return Err(format!("unsupported NPY version: {}", v)),
        None => return Err("file too small for NPY header".into()),
    };
    let dict_len = bytes
        .get(8..data_start)
        .ok_or("file too small for NPY header")?
        .iter()
        .rev()
        .fold(0usize, |acc, &b| (acc << 8) | usize::from(b));
    let data_offset = data_start + dict_len;
    let dict = bytes
        .get(data_start..data_offset)
        .ok_or("NPY header exceeds file size")?;
    let dict = std::str::from_utf8(dict)
        .map_err(|e| format!("invalid NPY header encoding: {}", e))?;

    let descr = dict_entry(dict, "descr")?
        .trim_matches(|c| c == '\'' || c == '"')
        .to_string();
    let fortran_order = match dict_entry(dict, "fortran_order")? {
        "True" => true,
        "False" => false,
        other => return Err(format!("invalid fortran_order '{}'", other)),
    };
    let shape = dict_entry(dict, "shape")?
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split(',')
        .map(str::trim)
        .filter(|dim| !dim.is_empty())
        .map(|dim| {
            dim.parse::<usize>()
                .map_err(|e| format!("invalid shape dimension '{}': {}", dim, e))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(NpyHeader {
        descr,
        shape,
        fortran_order,
        data_offset,
    })
}

/// Raw text of the value stored under `key` in a header dict
fn dict_entry<'a>(dict: &'a str, key: &str) -> std::result::Result<&'a str, String> {
    let quoted = format!("'{}'", key);
    let start = dict
        .find(&quoted)
        .ok_or_else(|| format!("no '{}' in NPY header", key))?;
    let value = dict[start + quoted.len()..]
        .trim_start()
        .strip_prefix(':')
        .ok_or_else(|| format!("malformed '{}' in NPY header", key))?
        .trim_start();

    let end = match value.chars().next() {
        Some('(') => value.find(')').map(|i| i + 1),
        Some(quote @ ('\'' | '"')) => value[1..].find(quote).map(|i| i + 2),
        Some(_) => value.find([',', '}']),
        None => None,
    }
    .ok_or_else(|| format!("unterminated '{}' in NPY header", key))?;
    Ok(value[..end].trim())
}

/// Write an NPY v1.0 header; returns its size in bytes
pub fn write_npy_header(writer: &mut impl Write, descr: &str, shape: &[usize]) -> Result<usize> {
    let shape_str = match shape {
        [single] => format!("({},)", single),
        dims => format!(
            "({})",
            dims.iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    let header_dict = format!(
        "{{'descr': '{}', 'fortran_order': False, 'shape': {}, }}",
        descr, shape_str
    );

    // Pad to 64-byte alignment, newline terminated
    let padding = (64 - ((10 + header_dict.len() + 1) % 64)) % 64;
    let padded_header = format!("{}{}\n", header_dict, " ".repeat(padding));

    writer.write_all(NPY_MAGIC)?;
    writer.write_all(&[1, 0])?;
    writer.write_all(&(padded_header.len() as u16).to_le_bytes())?;
    writer.write_all(padded_header.as_bytes())?;

    Ok(10 + padded_header.len())
}

/// Write rows of strings as a NumPy fixed-width unicode (`<U{n}`) array of
/// shape `(rows, N)`.
pub fn write_unicode_rows<const N: usize>(writer: &mut impl Write, rows: &[[&str; N]]) -> Result<()> {
    let width = rows
        .iter()
        .flat_map(|row| row.iter())
        .map(|s| s.chars().count())
        .max()
        .unwrap_or(0)
        .max(1);

    write_npy_header(writer, &format!("<U{}", width), &[rows.len(), N])?;

    for row in rows {
        for value in row {
            let mut written = 0;
            for ch in value.chars() {
                writer.write_all(&(ch as u32).to_le_bytes())?;
                written += 1;
            }
            for _ in written..width {
                writer.write_all(&0u32.to_le_bytes())?;
            }
        }
    }
    Ok(())
}

fn temp_path_for(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write a file through a temporary sibling and rename it into place, so
/// `dest` holds either its previous content or the complete new content.
pub fn write_atomic<F>(dest: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let temp_path = temp_path_for(dest);
    let file = File::create(&temp_path)?;
    let mut writer = BufWriter::new(file);

    let written = write(&mut writer).and_then(|_| {
        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    fs::rename(&temp_path, dest)?;
    Ok(())
}
