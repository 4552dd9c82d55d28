use super::Dataset;
use anyhow::{Context as _, Result};
use bytes::Bytes;
use polars::prelude::*;
use std::path::Path;

/// Environment override for the Parquet row group size
pub const ROW_GROUP_SIZE_ENV: &str = "GEOETL_PARQUET_ROW_GROUP_SIZE";

/// Read a CSV file with a header row, inferring the schema.
pub fn read_csv(path: &Path) -> Result<DataFrame> {
    if !path.is_file() {
        anyhow::bail!("CSV file not found: {}", path.display());
    }
    LazyCsvReader::new(path)
        .with_infer_schema_length(Some(10000))
        .with_has_header(true)
        .finish()?
        .collect()
        .with_context(|| format!("Failed to read CSV {}", path.display()))
}

/// Read a Parquet file, as a geo dataset when it carries GeoParquet metadata.
pub fn read_parquet(path: &Path) -> Result<Dataset> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to open Parquet file {}", path.display()))?;
    parquet_from_bytes(Bytes::from(bytes))
        .with_context(|| format!("Failed to read Parquet {}", path.display()))
}

/// Decode an in-memory Parquet file.
#[cfg(feature = "geo")]
pub fn parquet_from_bytes(bytes: Bytes) -> Result<Dataset> {
    use crate::geo::geoparquet;

    let metadata = geoparquet::read_metadata(&bytes)?;
    let frame = ParquetReader::new(std::io::Cursor::new(bytes)).finish()?;
    let Some(metadata) = metadata else {
        return Ok(Dataset::Table(frame));
    };

    match geoparquet::into_geo_table(frame, &metadata) {
        Ok(geo) => Ok(Dataset::Geo(geo)),
        Err(frame) => {
            tracing::warn!(
                "GeoParquet column '{}' is not WKB, loading as a plain table",
                metadata.primary_column
            );
            Ok(Dataset::Table(frame))
        }
    }
}

/// Decode an in-memory Parquet file.
#[cfg(not(feature = "geo"))]
pub fn parquet_from_bytes(bytes: Bytes) -> Result<Dataset> {
    let frame = ParquetReader::new(std::io::Cursor::new(bytes)).finish()?;
    Ok(Dataset::Table(frame))
}

/// Read a join lookup table: Parquet by extension, CSV otherwise.
pub fn read_lookup(path: &Path) -> Result<DataFrame> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "parquet" | "pq" => Ok(read_parquet(path)?.into_frame()),
        _ => read_csv(path),
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

/// Write CSV with a header row. Geometries are written as text.
pub fn write_csv(dataset: &Dataset, path: &Path) -> Result<()> {
    let mut frame = match dataset {
        Dataset::Table(df) => df.clone(),
        Dataset::Geo(geo) => geo.to_text_frame()?,
    };

    create_parent(path)?;
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create CSV file {}", path.display()))?;
    CsvWriter::new(file)
        .include_header(true)
        .finish(&mut frame)
        .context("Failed to write CSV file")?;
    Ok(())
}

/// Encode a dataset as Parquet (GeoParquet for geo datasets).
#[cfg(feature = "geo")]
pub fn encode_parquet(dataset: &Dataset, row_group_size: usize) -> Result<Vec<u8>> {
    match dataset {
        Dataset::Geo(geo) => Ok(crate::geo::geoparquet::write(geo, row_group_size)?),
        Dataset::Table(df) => encode_plain_parquet(df, row_group_size),
    }
}

/// Encode a dataset as Parquet.
#[cfg(not(feature = "geo"))]
pub fn encode_parquet(dataset: &Dataset, row_group_size: usize) -> Result<Vec<u8>> {
    if dataset.is_geospatial() {
        tracing::warn!("Built without the `geo` feature, writing geometries as plain WKB");
    }
    encode_plain_parquet(dataset.frame(), row_group_size)
}

fn encode_plain_parquet(df: &DataFrame, row_group_size: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ParquetWriter::new(&mut buf)
        .with_row_group_size(Some(row_group_size))
        .finish(&mut df.clone())
        .context("Failed to encode Parquet")?;
    Ok(buf)
}

pub fn write_parquet(dataset: &Dataset, path: &Path, row_group_size: usize) -> Result<()> {
    let buf = encode_parquet(dataset, row_group_size)?;
    create_parent(path)?;
    std::fs::write(path, buf)
        .with_context(|| format!("Failed to write Parquet file {}", path.display()))
}

/// Row group size for a Parquet write.
///
/// The environment variable wins over the configured value; without either,
/// wide tables get smaller row groups.
pub fn parquet_row_group_size(configured: Option<usize>, column_count: usize) -> usize {
    if let Ok(env_val) = std::env::var(ROW_GROUP_SIZE_ENV)
        && let Ok(parsed) = env_val.parse::<usize>()
        && parsed > 0
    {
        return parsed;
    }
    configured
        .filter(|n| *n > 0)
        .unwrap_or(if column_count >= 100 { 16_384 } else { 32_768 })
}
