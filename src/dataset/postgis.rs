//! PostGIS reader and writer.
//!
//! Each call opens one connection and closes it when done. Query results are
//! decoded column by column from the server's type names; geometry values
//! arrive as EWKB, their SRID becomes the table CRS and the values are kept
//! as plain WKB.
//!
//! `DATE` and `TIMESTAMP`/`TIMESTAMPTZ` become polars dates and microsecond
//! datetimes (timestamps with a zone are normalized to UTC). `NUMERIC`,
//! `UUID` and `JSON`/`JSONB` are loaded as their text form.

use super::{Dataset, block_on};
use crate::geo::{GeoTable, ewkb};
use anyhow::{Context as _, Result};
use polars::prelude::*;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use chrono::Datelike as _;
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::types::{BigDecimal, JsonValue, Uuid};
use sqlx::{Column as _, Connection as _, Executor as _, Row as _, Statement as _, TypeInfo as _};
use std::str::FromStr as _;
use std::time::Duration;

const COPY_CHUNK_ROWS: usize = 10_000;

/// `NaiveDate::num_days_from_ce` of 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Accept SQLAlchemy-style URLs (`postgresql+psycopg2://...`) by dropping
/// the driver suffix from the scheme.
pub fn normalize_url(url: &str) -> String {
    match url.split_once("://") {
        Some((scheme, rest)) => {
            let scheme = scheme.split_once('+').map_or(scheme, |(base, _)| base);
            format!("{scheme}://{rest}")
        }
        None => url.to_owned(),
    }
}

/// The URL with its password replaced, for log lines.
pub fn redact(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ignored = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "<invalid database url>".to_owned(),
    }
}

async fn connect(url: &str, timeout: Duration) -> Result<PgConnection> {
    let options = PgConnectOptions::from_str(&normalize_url(url))
        .with_context(|| format!("Invalid database URL {}", redact(url)))?;
    tokio::time::timeout(timeout, PgConnection::connect_with(&options))
        .await
        .with_context(|| {
            format!(
                "Failed to connect to PostgreSQL (timeout after {}s)",
                timeout.as_secs()
            )
        })?
        .with_context(|| format!("Failed to connect to {}", redact(url)))
}

/// Run `sql` and load the result as a geo dataset.
///
/// The first `geometry` or `geography` column becomes the geometry column.
pub fn read_query(url: &str, sql: &str, timeout: Duration) -> Result<Dataset> {
    tracing::debug!("Querying {}", redact(url));
    block_on(async {
        let mut conn = connect(url, timeout).await?;
        let result = query_frame(&mut conn, sql).await;
        conn.close().await.ok();
        result
    })?
}

enum ColumnValues {
    Bool(Vec<Option<bool>>),
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
    /// Days since the Unix epoch
    Date(Vec<Option<i32>>),
    /// Microseconds since the Unix epoch, UTC
    Datetime(Vec<Option<i64>>),
    Bytes(Vec<Option<Vec<u8>>>),
    Geometry(Vec<Option<Vec<u8>>>),
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

impl ColumnValues {
    fn for_type(column: &str, type_name: &str) -> Result<Self> {
        Ok(match type_name.to_ascii_uppercase().as_str() {
            "BOOL" => Self::Bool(Vec::new()),
            "INT2" | "INT4" | "INT8" => Self::Int(Vec::new()),
            "FLOAT4" | "FLOAT8" => Self::Float(Vec::new()),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "NUMERIC" | "UUID" | "JSON" | "JSONB" => {
                Self::Text(Vec::new())
            }
            "DATE" => Self::Date(Vec::new()),
            "TIMESTAMP" | "TIMESTAMPTZ" => Self::Datetime(Vec::new()),
            "BYTEA" => Self::Bytes(Vec::new()),
            "GEOMETRY" | "GEOGRAPHY" => Self::Geometry(Vec::new()),
            other => anyhow::bail!(
                "Column '{column}' has unsupported type {other}; cast it in the query \
                 (for example `{column}::text` or `{column}::float8`)"
            ),
        })
    }

    fn push(&mut self, row: &PgRow, idx: usize, type_name: &str) -> Result<()> {
        match self {
            Self::Bool(v) => v.push(row.try_get(idx)?),
            Self::Int(v) => v.push(match type_name {
                "INT2" => row.try_get::<Option<i16>, _>(idx)?.map(i64::from),
                "INT4" => row.try_get::<Option<i32>, _>(idx)?.map(i64::from),
                _ => row.try_get(idx)?,
            }),
            Self::Float(v) => v.push(match type_name {
                "FLOAT4" => row.try_get::<Option<f32>, _>(idx)?.map(f64::from),
                _ => row.try_get(idx)?,
            }),
            Self::Text(v) => v.push(match type_name {
                "NUMERIC" => row
                    .try_get::<Option<BigDecimal>, _>(idx)?
                    .map(|d| d.to_string()),
                "UUID" => row.try_get::<Option<Uuid>, _>(idx)?.map(|u| u.to_string()),
                "JSON" | "JSONB" => row
                    .try_get::<Option<JsonValue>, _>(idx)?
                    .map(|j| j.to_string()),
                _ => row.try_get(idx)?,
            }),
            Self::Date(v) => v.push(
                row.try_get::<Option<NaiveDate>, _>(idx)?
                    .map(days_since_epoch),
            ),
            Self::Datetime(v) => v.push(match type_name {
                "TIMESTAMPTZ" => row
                    .try_get::<Option<DateTime<Utc>>, _>(idx)?
                    .map(|t| t.timestamp_micros()),
                _ => row
                    .try_get::<Option<NaiveDateTime>, _>(idx)?
                    .map(|t| t.and_utc().timestamp_micros()),
            }),
            Self::Bytes(v) | Self::Geometry(v) => v.push(row.try_get_unchecked(idx)?),
        }
        Ok(())
    }

    fn into_series(self, name: &str) -> Result<Series> {
        let name = PlSmallStr::from(name);
        Ok(match self {
            Self::Bool(v) => Series::new(name, v),
            Self::Int(v) => Series::new(name, v),
            Self::Float(v) => Series::new(name, v),
            Self::Text(v) => Series::new(name, v),
            Self::Date(v) => Series::new(name, v).cast(&DataType::Date)?,
            Self::Datetime(v) => Series::new(name, v)
                .cast(&DataType::Datetime(TimeUnit::Microseconds, None))?,
            Self::Bytes(v) | Self::Geometry(v) => {
                let mut ca: BinaryChunked = v.into_iter().collect();
                ca.rename(name);
                ca.into_series()
            }
        })
    }
}

async fn query_frame(conn: &mut PgConnection, sql: &str) -> Result<Dataset> {
    let statement = conn
        .prepare(sql)
        .await
        .context("Failed to prepare PostGIS query")?;
    let columns: Vec<(String, String)> = statement
        .columns()
        .iter()
        .map(|c| (c.name().to_owned(), c.type_info().name().to_ascii_uppercase()))
        .collect();

    let mut values = columns
        .iter()
        .map(|(name, ty)| ColumnValues::for_type(name, ty))
        .collect::<Result<Vec<_>>>()?;

    let rows = sqlx::query(sql)
        .fetch_all(&mut *conn)
        .await
        .context("Failed to execute PostGIS query")?;
    for row in &rows {
        for (idx, (column, (_, ty))) in values.iter_mut().zip(&columns).enumerate() {
            column.push(row, idx, ty)?;
        }
    }

    let mut geometry: Option<(String, Option<u32>)> = None;
    let mut series = Vec::with_capacity(columns.len());
    for (values, (name, _)) in values.into_iter().zip(&columns) {
        let values = match values {
            ColumnValues::Geometry(raw) => {
                let (wkb, srid) = split_srids(raw)?;
                if geometry.is_none() {
                    geometry = Some((name.clone(), srid));
                }
                ColumnValues::Geometry(wkb)
            }
            other => other,
        };
        series.push(Column::from(values.into_series(name)?));
    }

    let frame = DataFrame::new(series)?;
    let Some((name, srid)) = geometry else {
        anyhow::bail!("PostGIS query returned no geometry column");
    };
    tracing::debug!("Loaded {} rows, geometry column '{name}'", frame.height());
    Ok(Dataset::Geo(GeoTable::new(frame, name, srid)?))
}

/// Strip EWKB SRIDs; the first SRID found is the column's.
fn split_srids(raw: Vec<Option<Vec<u8>>>) -> Result<(Vec<Option<Vec<u8>>>, Option<u32>)> {
    let mut srid = None;
    let mut wkb = Vec::with_capacity(raw.len());
    for value in raw {
        wkb.push(match value {
            Some(bytes) => {
                let (plain, value_srid) = ewkb::strip_srid(&bytes)?;
                srid = srid.or(value_srid);
                Some(plain)
            }
            None => None,
        });
    }
    Ok((wkb, srid))
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// `table` or `schema.table`, each part quoted
fn table_identifier(table: &str) -> String {
    match table.split_once('.') {
        Some((schema, name)) if !schema.is_empty() => format!("{}.{}", quote(schema), quote(name)),
        _ => quote(table),
    }
}

fn sql_type(dtype: &DataType) -> &'static str {
    match dtype {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => "BIGINT",
        DataType::Float32 | DataType::Float64 => "DOUBLE PRECISION",
        DataType::Boolean => "BOOLEAN",
        DataType::Date => "DATE",
        DataType::Datetime(_, _) => "TIMESTAMPTZ",
        DataType::Binary => "BYTEA",
        _ => "TEXT",
    }
}

fn create_table_sql(identifier: &str, dataset: &Dataset) -> String {
    let geometry = match dataset {
        Dataset::Geo(geo) => Some(geo.geometry_column()),
        Dataset::Table(_) => None,
    };
    let definitions: Vec<String> = dataset
        .frame()
        .schema()
        .iter()
        .map(|(name, dtype)| {
            let ty = if Some(name.as_str()) == geometry {
                match dataset.epsg() {
                    Some(srid) => format!("geometry(Geometry, {srid})"),
                    None => "geometry".to_owned(),
                }
            } else {
                sql_type(dtype).to_owned()
            };
            format!("{} {ty}", quote(name))
        })
        .collect();
    format!("CREATE TABLE {identifier} ({})", definitions.join(", "))
}

/// Frame ready for `COPY ... (FORMAT csv)`: geometries as hex EWKB, other
/// binary columns as bytea hex.
fn copy_frame(dataset: &Dataset) -> Result<DataFrame> {
    let mut frame = dataset.frame().clone();
    let geometry = match dataset {
        Dataset::Geo(geo) => Some(geo.geometry_column().to_owned()),
        Dataset::Table(_) => None,
    };

    let binary: Vec<String> = frame
        .schema()
        .iter()
        .filter(|(_, dtype)| **dtype == DataType::Binary)
        .map(|(name, _)| name.to_string())
        .collect();

    for name in binary {
        let is_geometry = geometry.as_deref() == Some(name.as_str());
        let text = frame
            .column(&name)?
            .as_materialized_series()
            .binary()?
            .into_iter()
            .map(|value| {
                value
                    .map(|bytes| match (is_geometry, dataset.epsg()) {
                        (true, Some(srid)) => ewkb::with_srid(bytes, srid).map(|b| ewkb::to_hex(&b)),
                        (true, None) => Ok(ewkb::to_hex(bytes)),
                        (false, _) => Ok(format!("\\x{}", ewkb::to_hex(bytes))),
                    })
                    .transpose()
            })
            .collect::<crate::error::Result<Vec<Option<String>>>>()?;
        let mut ca: StringChunked = text.into_iter().collect();
        ca.rename(name.as_str().into());
        frame.with_column(ca.into_series())?;
    }
    Ok(frame)
}

/// Write `dataset` to `table`, dropping any existing table of that name.
///
/// Drop, create and load happen in one transaction, so a failed load leaves
/// the previous table in place.
pub fn replace_table(url: &str, table: &str, dataset: &Dataset, timeout: Duration) -> Result<()> {
    let identifier = table_identifier(table);
    let create = create_table_sql(&identifier, dataset);
    let frame = copy_frame(dataset)?;

    tracing::debug!("Replacing {identifier} on {}", redact(url));
    block_on(async {
        let mut conn = connect(url, timeout).await?;
        let mut tx = conn.begin().await.context("Failed to start transaction")?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {identifier}"))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to drop table '{identifier}'"))?;
        sqlx::query(&create)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to create table '{identifier}'"))?;

        let mut writer = tx
            .copy_in_raw(&format!(
                "COPY {identifier} FROM STDIN WITH (FORMAT csv, NULL '')"
            ))
            .await
            .context("Failed to initiate COPY command")?;

        let height = frame.height();
        for offset in (0..height).step_by(COPY_CHUNK_ROWS) {
            let len = COPY_CHUNK_ROWS.min(height - offset);
            let mut chunk = frame.slice(i64::try_from(offset)?, len);

            let mut buf = Vec::new();
            CsvWriter::new(&mut buf)
                .include_header(false)
                .with_separator(b',')
                .with_null_value(String::new())
                .finish(&mut chunk)
                .context("Failed to serialize dataframe chunk to CSV")?;

            writer
                .send(buf)
                .await
                .context("Failed to send data chunk via COPY")?;
        }
        writer
            .finish()
            .await
            .context("Failed to finish COPY command")?;

        tx.commit().await.context("Failed to commit")?;
        conn.close().await.ok();
        Ok::<_, anyhow::Error>(())
    })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::DEFAULT_GEOMETRY_COLUMN;

    fn point_wkb(x: f64, y: f64) -> Vec<u8> {
        let mut v = vec![1u8];
        v.extend_from_slice(&1u32.to_le_bytes());
        v.extend_from_slice(&x.to_le_bytes());
        v.extend_from_slice(&y.to_le_bytes());
        v
    }

    fn geo_dataset(epsg: Option<u32>) -> Dataset {
        let geoms: BinaryChunked = [Some(point_wkb(1.0, 2.0)), None].into_iter().collect();
        let mut geoms = geoms.into_series();
        geoms.rename(DEFAULT_GEOMETRY_COLUMN.into());
        let ids = Series::new("id".into(), [1i32, 2]);
        let frame = DataFrame::new(vec![ids.into(), geoms.into()]).expect("frame");
        Dataset::Geo(GeoTable::new(frame, DEFAULT_GEOMETRY_COLUMN, epsg).expect("geo"))
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("postgresql+psycopg2://u:p@localhost:5432/gis"),
            "postgresql://u:p@localhost:5432/gis"
        );
        assert_eq!(
            normalize_url("postgres://localhost/gis"),
            "postgres://localhost/gis"
        );
    }

    #[test]
    fn test_redact() {
        let redacted = redact("postgres://user:secret@db:5432/gis");
        assert!(!redacted.contains("secret"), "{redacted}");
        assert!(redacted.contains("user"), "{redacted}");
        assert_eq!(redact("not a url"), "<invalid database url>");
    }

    #[test]
    fn test_create_table_sql() {
        let sql = create_table_sql(&table_identifier("public.parcels"), &geo_dataset(Some(2154)));
        assert_eq!(
            sql,
            r#"CREATE TABLE "public"."parcels" ("id" BIGINT, "geometry" geometry(Geometry, 2154))"#
        );
    }

    #[test]
    fn test_copy_frame_hex_ewkb() {
        let frame = copy_frame(&geo_dataset(Some(4326))).expect("copy frame");
        let geom = frame.column("geometry").expect("column");
        let geom = geom.as_materialized_series().str().expect("text");
        let hex = geom.get(0).expect("value");
        // little endian point with the SRID flag, then SRID 4326 (0x10E6)
        assert!(hex.starts_with("0101000020E6100000"), "{hex}");
        assert_eq!(geom.get(1), None);
    }

    #[test]
    fn test_unsupported_type_suggests_cast() {
        let Err(err) = ColumnValues::for_type("span", "INTERVAL") else {
            panic!("INTERVAL should be rejected");
        };
        assert!(err.to_string().contains("span::text"), "{err}");
    }

    #[test]
    fn test_common_column_types_are_supported() {
        let cases = [
            ("BOOL", DataType::Boolean),
            ("INT4", DataType::Int64),
            ("FLOAT4", DataType::Float64),
            ("VARCHAR", DataType::String),
            ("NUMERIC", DataType::String),
            ("UUID", DataType::String),
            ("JSONB", DataType::String),
            ("DATE", DataType::Date),
            (
                "TIMESTAMPTZ",
                DataType::Datetime(TimeUnit::Microseconds, None),
            ),
            ("BYTEA", DataType::Binary),
        ];
        for (type_name, dtype) in cases {
            let values = ColumnValues::for_type("c", type_name).expect(type_name);
            let series = values.into_series("c").expect("series");
            assert_eq!(series.dtype(), &dtype, "{type_name}");
        }
    }

    #[test]
    fn test_date_and_timestamp_values() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).expect("date");
        assert_eq!(days_since_epoch(date), 19_723);
        assert_eq!(days_since_epoch(NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch")), 0);

        let series = ColumnValues::Date(vec![Some(days_since_epoch(date)), None])
            .into_series("day")
            .expect("series");
        assert_eq!(series.null_count(), 1);
        assert_eq!(series.dtype(), &DataType::Date);

        let stamp = date.and_hms_opt(12, 0, 0).expect("time");
        let micros = stamp.and_utc().timestamp_micros();
        let series = ColumnValues::Datetime(vec![Some(micros)])
            .into_series("at")
            .expect("series");
        let text = series.cast(&DataType::String).expect("text");
        let text = text.str().expect("str").get(0).expect("value").to_owned();
        assert!(text.starts_with("2024-01-01 12:00:00"), "{text}");
    }

    #[test]
    #[ignore = "requires DATABASE_URL pointing at a PostGIS database"]
    fn test_replace_table_round_trip() -> Result<()> {
        let url = std::env::var("DATABASE_URL")?;
        let timeout = Duration::from_secs(10);
        let table = "geoetl_replace_test";

        replace_table(&url, table, &geo_dataset(Some(4326)), timeout)?;
        replace_table(&url, table, &geo_dataset(Some(4326)), timeout)?;

        let back = read_query(&url, &format!("SELECT id, geometry FROM {table}"), timeout)?;
        assert_eq!(back.height(), 2, "second write replaced the first");
        assert_eq!(back.epsg(), Some(4326));
        Ok(())
    }
}
