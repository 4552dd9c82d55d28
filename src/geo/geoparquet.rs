//! GeoParquet metadata.
//!
//! A GeoParquet file is an ordinary Parquet file whose footer carries a
//! `geo` key holding JSON that names the geometry columns, their encoding
//! and their CRS. polars reads and writes the data itself; this module only
//! reads the footer, and on write re-emits the polars output through the
//! arrow writer so the key can be attached.

use super::{GeoTable, ewkb};
use crate::error::{EtlError, Result};
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::{ArrowReaderOptions, ParquetRecordBatchReaderBuilder};
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader as _, SerializedFileReader};
use parquet::format::KeyValue;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Footer key under which the metadata lives
pub const GEO_KEY: &str = "geo";

pub const SPEC_VERSION: &str = "1.1.0";

const WKB_ENCODING: &str = "WKB";

/// File-level `geo` metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoMetadata {
    pub version: String,
    pub primary_column: String,
    pub columns: BTreeMap<String, GeoColumn>,
}

/// Per-column `geo` metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoColumn {
    pub encoding: String,
    #[serde(default)]
    pub geometry_types: Vec<String>,
    /// PROJJSON, an `AUTHORITY:CODE` string, or `null` for an unknown CRS.
    /// A missing key means OGC:CRS84.
    #[serde(default = "default_crs")]
    pub crs: Value,
}

fn default_crs() -> Value {
    Value::String("OGC:CRS84".to_owned())
}

impl GeoColumn {
    fn wkb(epsg: Option<u32>) -> Self {
        Self {
            encoding: WKB_ENCODING.to_owned(),
            geometry_types: Vec::new(),
            crs: epsg.map_or(Value::Null, |code| {
                json!({ "id": { "authority": "EPSG", "code": code } })
            }),
        }
    }

    /// EPSG code of the column CRS, if it can be identified
    pub fn epsg(&self) -> Option<u32> {
        match &self.crs {
            Value::String(s) => epsg_from_identifier(s),
            Value::Object(obj) => {
                let id = obj.get("id")?;
                let authority = id.get("authority")?.as_str()?;
                let code = match id.get("code")? {
                    Value::Number(n) => n.to_string(),
                    Value::String(s) => s.clone(),
                    _ => return None,
                };
                epsg_from_identifier(&format!("{authority}:{code}"))
            }
            _ => None,
        }
    }

    pub fn is_wkb(&self) -> bool {
        self.encoding.eq_ignore_ascii_case(WKB_ENCODING)
    }
}

fn epsg_from_identifier(s: &str) -> Option<u32> {
    let (authority, code) = s.split_once(':')?;
    match authority.to_ascii_uppercase().as_str() {
        "EPSG" => code.trim().parse().ok(),
        "OGC" if code.eq_ignore_ascii_case("CRS84") => Some(4326),
        _ => None,
    }
}

impl GeoMetadata {
    /// Metadata describing a single WKB geometry column
    pub fn for_table(table: &GeoTable) -> Self {
        let name = table.geometry_column().to_owned();
        let mut columns = BTreeMap::new();
        columns.insert(name.clone(), GeoColumn::wkb(table.epsg()));
        Self {
            version: SPEC_VERSION.to_owned(),
            primary_column: name,
            columns,
        }
    }

    pub fn primary(&self) -> Option<&GeoColumn> {
        self.columns.get(&self.primary_column)
    }
}

/// Read the `geo` footer key of an in-memory Parquet file.
///
/// Returns `Ok(None)` for plain Parquet files.
///
/// # Errors
///
/// Fails if the footer cannot be read or the `geo` value is not valid
/// GeoParquet JSON.
pub fn read_metadata(file: &Bytes) -> Result<Option<GeoMetadata>> {
    let reader = SerializedFileReader::new(file.clone())?;
    let Some(kv) = reader.metadata().file_metadata().key_value_metadata() else {
        return Ok(None);
    };
    let Some(raw) = kv
        .iter()
        .find(|entry| entry.key == GEO_KEY)
        .and_then(|entry| entry.value.as_deref())
    else {
        return Ok(None);
    };
    serde_json::from_str(raw)
        .map(Some)
        .map_err(|e| EtlError::DataProcessing(format!("Invalid GeoParquet metadata: {e}")))
}

/// Wrap a frame read from a GeoParquet file as a [`GeoTable`].
///
/// Returns the frame unchanged (as `Err`) when the primary column is not a
/// WKB binary column this crate can work with.
pub fn into_geo_table(
    frame: DataFrame,
    metadata: &GeoMetadata,
) -> std::result::Result<GeoTable, DataFrame> {
    let Some(column) = metadata.primary() else {
        return Err(frame);
    };
    let is_binary = frame
        .column(&metadata.primary_column)
        .is_ok_and(|c| c.dtype() == &DataType::Binary);
    if !column.is_wkb() || !is_binary {
        return Err(frame);
    }
    Ok(GeoTable {
        frame,
        geometry: metadata.primary_column.clone(),
        epsg: column.epsg(),
    })
}

/// Encode a geometry table as GeoParquet.
///
/// # Errors
///
/// Fails if polars or the arrow writer reject the data.
pub fn write(table: &GeoTable, row_group_size: usize) -> Result<Vec<u8>> {
    let mut frame = strip_srids(table)?;

    let mut plain = Vec::new();
    ParquetWriter::new(&mut plain)
        .with_row_group_size(Some(row_group_size))
        .finish(&mut frame)?;

    let metadata = serde_json::to_string(&GeoMetadata::for_table(table))?;
    let props = WriterProperties::builder()
        .set_max_row_group_size(row_group_size)
        .set_key_value_metadata(Some(vec![KeyValue::new(GEO_KEY.to_owned(), metadata)]))
        .build();

    let options = ArrowReaderOptions::new().with_skip_arrow_metadata(true);
    let builder =
        ParquetRecordBatchReaderBuilder::try_new_with_options(Bytes::from(plain), options)?;
    let schema = builder.schema().clone();
    let reader = builder.build()?;

    let mut out = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut out, schema, Some(props))?;
    for batch in reader {
        writer.write(&batch.map_err(ParquetError::from)?)?;
    }
    writer.close()?;
    Ok(out)
}

/// GeoParquet requires ISO WKB, so any EWKB SRID left on a value is dropped.
fn strip_srids(table: &GeoTable) -> Result<DataFrame> {
    let cleaned = table
        .geometries()?
        .into_iter()
        .map(|g| {
            g.map(|bytes| ewkb::strip_srid(bytes).map(|(wkb, _)| wkb))
                .transpose()
        })
        .collect::<Result<Vec<_>>>()?;
    table
        .clone()
        .with_geometries(cleaned, table.epsg())
        .map(GeoTable::into_frame)
}
