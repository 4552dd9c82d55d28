//! Step vocabulary.
//!
//! A workflow file stores each step as a flat JSON object whose `type` key
//! names the step kind. [`StepRecord`] keeps that object exactly as read;
//! [`Step`] is the typed form, decoded on demand with [`Step::decode`].

use crate::error::{EtlError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;

/// Key that holds the step kind inside a record
pub const TYPE_KEY: &str = "type";

/// EPSG codes the builder and `validate_workflow` accept for reproject.
///
/// Decoding takes any `u32`: a reproject on a plain table never looks at
/// the code.
pub const EPSG_RANGE: std::ops::RangeInclusive<u32> = 1000..=999_999;

/// What a step does to the current dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepRole {
    /// Produces the dataset from an external system
    Source,
    /// Maps the current dataset to a new one
    Transform,
    /// Persists the current dataset
    Sink,
}

/// Step kinds, one per `type` value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    CsvSource,
    ParquetSource,
    PostgisSource,
    CloudSource,
    Filter,
    Reproject,
    Join,
    CsvSink,
    ParquetSink,
    PostgisSink,
    CloudSink,
}

impl StepKind {
    pub const ALL: [Self; 11] = [
        Self::CsvSource,
        Self::ParquetSource,
        Self::PostgisSource,
        Self::CloudSource,
        Self::Filter,
        Self::Reproject,
        Self::Join,
        Self::CsvSink,
        Self::ParquetSink,
        Self::PostgisSink,
        Self::CloudSink,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CsvSource => "csv_source",
            Self::ParquetSource => "parquet_source",
            Self::PostgisSource => "postgis_source",
            Self::CloudSource => "cloud_source",
            Self::Filter => "filter",
            Self::Reproject => "reproject",
            Self::Join => "join",
            Self::CsvSink => "csv_sink",
            Self::ParquetSink => "parquet_sink",
            Self::PostgisSink => "postgis_sink",
            Self::CloudSink => "cloud_sink",
        }
    }

    /// Name shown to users ("CSV Source", "Reproject", ...)
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::CsvSource => "CSV Source",
            Self::ParquetSource => "Parquet Source",
            Self::PostgisSource => "PostGIS Source",
            Self::CloudSource => "Cloud Source",
            Self::Filter => "Filter",
            Self::Reproject => "Reproject",
            Self::Join => "Join",
            Self::CsvSink => "CSV Sink",
            Self::ParquetSink => "Parquet Sink",
            Self::PostgisSink => "PostGIS Sink",
            Self::CloudSink => "Cloud Sink",
        }
    }

    pub fn parse_kind(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }

    pub fn role(&self) -> StepRole {
        match self {
            Self::CsvSource | Self::ParquetSource | Self::PostgisSource | Self::CloudSource => {
                StepRole::Source
            }
            Self::Filter | Self::Reproject | Self::Join => StepRole::Transform,
            Self::CsvSink | Self::ParquetSink | Self::PostgisSink | Self::CloudSink => {
                StepRole::Sink
            }
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single pipeline step, carrying exactly the fields its kind requires.
///
/// Serializes to the flat record layout of the workflow file:
///
/// ```
/// use geoetl::pipeline::Step;
///
/// let step = Step::Filter { expr: "val > 10".to_owned() };
/// let json = serde_json::to_string(&step).unwrap();
/// assert_eq!(json, r#"{"type":"filter","expr":"val > 10"}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    /// Read a CSV file with a header row
    CsvSource { path: String },

    /// Read a (Geo)Parquet file
    ParquetSource { path: String },

    /// Run a query against PostGIS and load its result as a geospatial table
    PostgisSource { url: String, sql: String },

    /// Fetch a (Geo)Parquet object from object storage
    CloudSource { url: String },

    /// Keep rows matching a SQL predicate, e.g. `val > 10 AND name = 'a'`
    Filter { expr: String },

    /// Transform geometries to the given EPSG code
    Reproject { epsg: u32 },

    /// Left join a lookup table on `left` (current) = `right` (lookup)
    Join {
        path: String,
        left: String,
        right: String,
    },

    /// Write CSV with a header and no index column
    CsvSink { path: String },

    /// Write (Geo)Parquet
    ParquetSink { path: String },

    /// Replace a PostGIS table with the dataset
    PostgisSink { url: String, table: String },

    /// Write (Geo)Parquet to object storage
    CloudSink { url: String },
}

impl Step {
    pub fn kind(&self) -> StepKind {
        match self {
            Self::CsvSource { .. } => StepKind::CsvSource,
            Self::ParquetSource { .. } => StepKind::ParquetSource,
            Self::PostgisSource { .. } => StepKind::PostgisSource,
            Self::CloudSource { .. } => StepKind::CloudSource,
            Self::Filter { .. } => StepKind::Filter,
            Self::Reproject { .. } => StepKind::Reproject,
            Self::Join { .. } => StepKind::Join,
            Self::CsvSink { .. } => StepKind::CsvSink,
            Self::ParquetSink { .. } => StepKind::ParquetSink,
            Self::PostgisSink { .. } => StepKind::PostgisSink,
            Self::CloudSink { .. } => StepKind::CloudSink,
        }
    }

    pub fn role(&self) -> StepRole {
        self.kind().role()
    }

    /// Decode a typed step from a raw record.
    ///
    /// # Errors
    ///
    /// Returns [`EtlError::UnknownStep`] for a missing or unrecognized
    /// `type`, [`EtlError::MissingField`] when a required field is absent
    /// and [`EtlError::InvalidField`] when a field has the wrong shape.
    pub fn decode(record: &StepRecord) -> Result<Self> {
        let kind = record.kind()?;
        let f = FieldReader { record, kind };

        Ok(match kind {
            StepKind::CsvSource => Self::CsvSource {
                path: f.string("path")?,
            },
            StepKind::ParquetSource => Self::ParquetSource {
                path: f.string("path")?,
            },
            StepKind::PostgisSource => Self::PostgisSource {
                url: f.string("url")?,
                sql: f.string("sql")?,
            },
            StepKind::CloudSource => Self::CloudSource {
                url: f.string("url")?,
            },
            StepKind::Filter => Self::Filter {
                expr: f.string("expr")?,
            },
            StepKind::Reproject => Self::Reproject {
                epsg: f.epsg("epsg")?,
            },
            StepKind::Join => Self::Join {
                path: f.string("path")?,
                left: f.string("left")?,
                right: f.string("right")?,
            },
            StepKind::CsvSink => Self::CsvSink {
                path: f.string("path")?,
            },
            StepKind::ParquetSink => Self::ParquetSink {
                path: f.string("path")?,
            },
            StepKind::PostgisSink => Self::PostgisSink {
                url: f.string("url")?,
                table: f.string("table")?,
            },
            StepKind::CloudSink => Self::CloudSink {
                url: f.string("url")?,
            },
        })
    }

    /// Encode to the flat record stored in workflow files
    pub fn to_record(&self) -> StepRecord {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => StepRecord(map),
            // Internally tagged enums of string/integer fields always serialize to objects.
            _ => StepRecord::default(),
        }
    }

    /// Out-of-range EPSG code of a reproject step, if any
    pub fn epsg_out_of_range(&self) -> Option<u32> {
        match self {
            Self::Reproject { epsg } if !EPSG_RANGE.contains(epsg) => Some(*epsg),
            _ => None,
        }
    }

    /// Short human-readable label for step lists
    pub fn label(&self) -> String {
        match self {
            Self::CsvSource { path } => format!("CSV Source: {}", file_name(path)),
            Self::ParquetSource { path } => format!("Parquet Source: {}", file_name(path)),
            Self::PostgisSource { sql, .. } => format!("PostGIS Source: {}", truncate(sql, 30)),
            Self::CloudSource { url } => format!("Cloud Source: {}", truncate(url, 40)),
            Self::Filter { expr } => format!("Filter: {expr}"),
            Self::Reproject { epsg } => format!("Reproject → EPSG:{epsg}"),
            Self::Join { left, right, .. } => format!("Join on {left}={right}"),
            Self::CsvSink { path } => format!("CSV Sink: {}", file_name(path)),
            Self::ParquetSink { path } => format!("Parquet Sink: {}", file_name(path)),
            Self::PostgisSink { table, .. } => format!("PostGIS Sink: {table}"),
            Self::CloudSink { url } => format!("Cloud Sink: {}", truncate(url, 40)),
        }
    }
}

/// One step exactly as stored in a workflow document.
///
/// Records are never validated on load: unknown kinds and missing fields
/// survive a load/save round trip untouched and only fail when decoded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepRecord(pub Map<String, Value>);

impl StepRecord {
    /// The raw `type` value, if it is a string
    pub fn kind_str(&self) -> Option<&str> {
        self.0.get(TYPE_KEY).and_then(Value::as_str)
    }

    /// The decoded kind
    ///
    /// # Errors
    ///
    /// Returns [`EtlError::UnknownStep`] if `type` is absent or unrecognized.
    pub fn kind(&self) -> Result<StepKind> {
        let raw = self.kind_str().ok_or_else(|| EtlError::UnknownStep {
            kind: self
                .0
                .get(TYPE_KEY)
                .map_or_else(|| "<missing>".to_owned(), ToString::to_string),
        })?;
        StepKind::parse_kind(raw).ok_or_else(|| EtlError::UnknownStep {
            kind: raw.to_owned(),
        })
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }
}

impl From<Step> for StepRecord {
    fn from(step: Step) -> Self {
        step.to_record()
    }
}

impl From<&Step> for StepRecord {
    fn from(step: &Step) -> Self {
        step.to_record()
    }
}

struct FieldReader<'a> {
    record: &'a StepRecord,
    kind: StepKind,
}

impl FieldReader<'_> {
    fn value(&self, field: &'static str) -> Result<&Value> {
        match self.record.get(field) {
            None | Some(Value::Null) => Err(EtlError::MissingField {
                kind: self.kind.as_str().to_owned(),
                field,
            }),
            Some(v) => Ok(v),
        }
    }

    fn invalid(&self, field: &'static str, reason: impl Into<String>) -> EtlError {
        EtlError::InvalidField {
            kind: self.kind.as_str().to_owned(),
            field,
            reason: reason.into(),
        }
    }

    fn string(&self, field: &'static str) -> Result<String> {
        match self.value(field)? {
            Value::String(s) => Ok(s.clone()),
            other => Err(self.invalid(field, format!("expected a string, found {other}"))),
        }
    }

    fn epsg(&self, field: &'static str) -> Result<u32> {
        match self.value(field)? {
            Value::Number(n) => n
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| self.invalid(field, format!("{n} is not a valid EPSG code"))),
            Value::String(s) => {
                let digits = s.trim();
                let digits = digits
                    .strip_prefix("EPSG:")
                    .or_else(|| digits.strip_prefix("epsg:"))
                    .unwrap_or(digits);
                digits
                    .parse::<u32>()
                    .map_err(|_| self.invalid(field, format!("'{s}' is not a valid EPSG code")))
            }
            other => Err(self.invalid(field, format!("expected an integer, found {other}"))),
        }
    }
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map_or_else(|| path.to_owned(), |n| n.to_string_lossy().into_owned())
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> StepRecord {
        serde_json::from_value(value).expect("record")
    }

    #[test]
    fn test_encode_uses_type_key() {
        let step = Step::Join {
            path: "/data/lookup.parquet".to_owned(),
            left: "id".to_owned(),
            right: "code".to_owned(),
        };
        let rec = step.to_record();
        assert_eq!(rec.kind_str(), Some("join"));
        assert_eq!(rec.get("left"), Some(&json!("id")));
        assert_eq!(Step::decode(&rec).expect("decode"), step);
    }

    #[test]
    fn test_decode_missing_field() {
        let rec = record(json!({"type": "postgis_sink", "url": "postgres://localhost/db"}));
        let err = Step::decode(&rec).unwrap_err();
        assert!(matches!(
            err,
            EtlError::MissingField {
                field: "table",
                ..
            }
        ));
    }

    #[test]
    fn test_decode_unknown_kind() {
        let rec = record(json!({"type": "unknown_step", "path": "x"}));
        let err = Step::decode(&rec).unwrap_err();
        assert!(matches!(err, EtlError::UnknownStep { kind } if kind == "unknown_step"));

        let rec = record(json!({"path": "x"}));
        assert!(matches!(
            Step::decode(&rec).unwrap_err(),
            EtlError::UnknownStep { .. }
        ));
    }

    #[test]
    fn test_decode_epsg_forms() {
        let as_int = record(json!({"type": "reproject", "epsg": 3857}));
        let as_str = record(json!({"type": "reproject", "epsg": "EPSG:3857"}));
        assert_eq!(
            Step::decode(&as_int).expect("int"),
            Step::Reproject { epsg: 3857 }
        );
        assert_eq!(
            Step::decode(&as_str).expect("str"),
            Step::Reproject { epsg: 3857 }
        );

        let too_small = record(json!({"type": "reproject", "epsg": 12}));
        let step = Step::decode(&too_small).expect("any u32 decodes");
        assert_eq!(step.epsg_out_of_range(), Some(12));
        assert_eq!(Step::Reproject { epsg: 3857 }.epsg_out_of_range(), None);

        let negative = record(json!({"type": "reproject", "epsg": -1}));
        assert!(matches!(
            Step::decode(&negative).unwrap_err(),
            EtlError::InvalidField { field: "epsg", .. }
        ));

        let wrong_type = record(json!({"type": "reproject", "epsg": [4326]}));
        assert!(Step::decode(&wrong_type).is_err());
    }

    #[test]
    fn test_string_field_type_checked() {
        let rec = record(json!({"type": "filter", "expr": 10}));
        assert!(matches!(
            Step::decode(&rec).unwrap_err(),
            EtlError::InvalidField { field: "expr", .. }
        ));
    }

    #[test]
    fn test_roles() {
        assert_eq!(StepKind::CloudSource.role(), StepRole::Source);
        assert_eq!(StepKind::Join.role(), StepRole::Transform);
        assert_eq!(StepKind::PostgisSink.role(), StepRole::Sink);
        for kind in StepKind::ALL {
            assert_eq!(StepKind::parse_kind(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_labels() {
        let src = Step::CsvSource {
            path: "/tmp/in/parcels.csv".to_owned(),
        };
        assert_eq!(src.label(), "CSV Source: parcels.csv");
        assert_eq!(
            Step::Reproject { epsg: 4326 }.label(),
            "Reproject → EPSG:4326"
        );
        let long_sql = Step::PostgisSource {
            url: "postgres://u:p@h/db".to_owned(),
            sql: "SELECT id, geom FROM parcels WHERE area > 1000".to_owned(),
        };
        assert_eq!(long_sql.label(), "PostGIS Source: SELECT id, geom FROM parcels W");
    }
}
