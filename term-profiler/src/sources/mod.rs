//! File registration for the DataFusion engine.
//!
//! Each data file is registered as a table named after its file id so that
//! profiling and grouping SQL can address it directly. Format and compression
//! are detected from the file name.

use std::path::{Path, PathBuf};

use datafusion::datasource::file_format::file_compression_type::FileCompressionType;
use datafusion::prelude::{CsvReadOptions, NdJsonReadOptions, ParquetReadOptions, SessionContext};
use datafusion::sql::TableReference;
use tracing::{debug, instrument};

use crate::error::{ProfilerError, Result};

/// Supported tabular file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Tsv,
    Parquet,
    Json,
}

impl FileFormat {
    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "csv" => Some(Self::Csv),
            "tsv" => Some(Self::Tsv),
            "parquet" | "pq" => Some(Self::Parquet),
            "json" | "jsonl" | "ndjson" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Tsv => "tsv",
            Self::Parquet => "parquet",
            Self::Json => "json",
        }
    }
}

/// Common compression formats supported by file sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    /// No compression
    None,
    /// Gzip compression
    Gzip,
    /// Zstandard compression
    Zstd,
    /// Bzip2 compression
    Bzip2,
}

impl CompressionType {
    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "gz" | "gzip" => Some(Self::Gzip),
            "zst" | "zstd" => Some(Self::Zstd),
            "bz2" | "bzip2" => Some(Self::Bzip2),
            _ => None,
        }
    }

    fn to_datafusion(self) -> FileCompressionType {
        match self {
            Self::None => FileCompressionType::UNCOMPRESSED,
            Self::Gzip => FileCompressionType::GZIP,
            Self::Zstd => FileCompressionType::ZSTD,
            Self::Bzip2 => FileCompressionType::BZIP2,
        }
    }
}

/// Format, compression and the literal suffix DataFusion should filter on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedFormat {
    pub format: FileFormat,
    pub compression: CompressionType,
    /// Suffix of the file name starting at the format extension (`.csv.gz`)
    pub extension: String,
}

/// Detects format and compression from a path such as `prices.csv.gz`.
pub fn detect_format(path: &Path) -> Result<DetectedFormat> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ProfilerError::data_source("file", format!("Invalid path: {path:?}")))?;

    let parts: Vec<&str> = name.split('.').collect();
    let mut compression = CompressionType::None;
    let mut end = parts.len();
    if end > 2 {
        if let Some(c) = CompressionType::from_extension(&parts[end - 1].to_ascii_lowercase()) {
            compression = c;
            end -= 1;
        }
    }

    let format = (end > 1)
        .then(|| FileFormat::from_extension(&parts[end - 1].to_ascii_lowercase()))
        .flatten()
        .ok_or_else(|| {
            ProfilerError::data_source("file", format!("Unsupported file format: {name}"))
        })?;

    let extension = format!(".{}", parts[end - 1..].join("."));
    Ok(DetectedFormat {
        format,
        compression,
        extension,
    })
}

/// Identifier used for a file throughout a run: its file name.
pub fn file_id(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Registers a data file with the session under `table_name`.
///
/// The name is registered verbatim, so file ids containing dots stay a single
/// identifier.
#[instrument(skip(ctx))]
pub async fn register_file(ctx: &SessionContext, path: &Path, table_name: &str) -> Result<()> {
    if !path.exists() {
        return Err(ProfilerError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("File not found: {}", path.display()),
        )));
    }

    let detected = detect_format(path)?;
    let location = path.to_string_lossy();

    match detected.format {
        FileFormat::Csv | FileFormat::Tsv => {
            let delimiter = if detected.format == FileFormat::Tsv {
                b'\t'
            } else {
                b','
            };
            let options = CsvReadOptions::new()
                .has_header(true)
                .delimiter(delimiter)
                .file_extension(&detected.extension)
                .file_compression_type(detected.compression.to_datafusion());
            ctx.register_csv(TableReference::bare(table_name), location.as_ref(), options)
                .await?;
        }
        FileFormat::Parquet => {
            let options = ParquetReadOptions {
                file_extension: &detected.extension,
                ..Default::default()
            };
            ctx.register_parquet(TableReference::bare(table_name), location.as_ref(), options)
                .await?;
        }
        FileFormat::Json => {
            let options = NdJsonReadOptions::default()
                .file_extension(&detected.extension)
                .file_compression_type(detected.compression.to_datafusion());
            ctx.register_json(TableReference::bare(table_name), location.as_ref(), options)
                .await?;
        }
    }

    debug!(
        table = table_name,
        format = detected.format.as_str(),
        "Registered data file"
    );
    Ok(())
}

/// Expands glob patterns into existing file paths, keeping literal paths as given.
pub fn expand_globs(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for pattern in patterns {
        if !pattern.contains(['*', '?', '[']) {
            paths.push(PathBuf::from(pattern));
            continue;
        }

        let matches = glob::glob(pattern).map_err(|e| {
            ProfilerError::Configuration(format!("Invalid glob pattern '{pattern}': {e}"))
        })?;

        for entry in matches {
            let path = entry.map_err(|e| ProfilerError::Io(e.into_error()))?;
            if path.is_file() {
                paths.push(path);
            }
        }
    }

    if paths.is_empty() {
        return Err(ProfilerError::data_source(
            "file",
            "No files found matching patterns",
        ));
    }

    paths.sort();
    paths.dedup();
    Ok(paths)
}
