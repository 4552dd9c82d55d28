//! Object storage access.
//!
//! URLs are resolved with `object_store::parse_url_opts`, so any scheme the
//! enabled backends understand works: `s3://`, `gs://`, `az://`, `https://`
//! and `file://`. Credentials come from the usual environment variables or
//! from the configured storage options.

use super::{Dataset, block_on, io};
use anyhow::{Context as _, Result};
use bytes::Bytes;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use std::collections::BTreeMap;
use url::Url;

/// Storage options forwarded to the object-store builder
pub type StorageOptions = BTreeMap<String, String>;

/// Resolve an object URL into a store and a path within it.
pub fn parse_location(url: &str, options: &StorageOptions) -> Result<(Box<dyn ObjectStore>, Path)> {
    let parsed = Url::parse(url).with_context(|| format!("Invalid object URL '{url}'"))?;
    object_store::parse_url_opts(&parsed, options.iter())
        .with_context(|| format!("Unsupported object URL '{url}'"))
}

/// Download an object.
pub fn fetch(url: &str, options: &StorageOptions) -> Result<Bytes> {
    let (store, path) = parse_location(url, options)?;
    tracing::debug!("Fetching {url}");
    block_on(async {
        store
            .get(&path)
            .await?
            .bytes()
            .await
            .with_context(|| format!("Failed to download '{url}'"))
    })?
}

/// Upload an object, replacing any existing one.
pub fn put(url: &str, options: &StorageOptions, data: Vec<u8>) -> Result<()> {
    let (store, path) = parse_location(url, options)?;
    let size = data.len();
    block_on(async {
        store
            .put(&path, PutPayload::from(data))
            .await
            .with_context(|| format!("Failed to upload '{url}'"))
    })??;
    tracing::debug!("Uploaded {size} bytes to {url}");
    Ok(())
}

/// Read a Parquet object, geospatial when it carries GeoParquet metadata.
pub fn read_parquet(url: &str, options: &StorageOptions) -> Result<Dataset> {
    let bytes = fetch(url, options)?;
    io::parquet_from_bytes(bytes).with_context(|| format!("Failed to read Parquet '{url}'"))
}

/// Write a dataset as a Parquet object.
pub fn write_parquet(
    dataset: &Dataset,
    url: &str,
    options: &StorageOptions,
    row_group_size: usize,
) -> Result<()> {
    let buf = io::encode_parquet(dataset, row_group_size)?;
    put(url, options, buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn file_url(path: &std::path::Path) -> String {
        Url::from_file_path(path)
            .expect("absolute path")
            .to_string()
    }

    #[test]
    fn test_file_round_trip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let url = file_url(&dir.path().join("bucket").join("data.parquet"));
        let options = StorageOptions::new();

        let df = df!("id" => [1i64, 2, 3], "val" => [1.5f64, 2.5, 3.5])?;
        write_parquet(&Dataset::Table(df.clone()), &url, &options, 1024)?;

        let back = read_parquet(&url, &options)?;
        assert!(back.frame().equals(&df));
        Ok(())
    }

    #[test]
    fn test_missing_object() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = file_url(&dir.path().join("absent.parquet"));
        assert!(fetch(&url, &StorageOptions::new()).is_err());
    }

    #[test]
    fn test_invalid_url() {
        let err = parse_location("not a url", &StorageOptions::new()).unwrap_err();
        assert!(err.to_string().contains("Invalid object URL"), "{err}");
    }
}
