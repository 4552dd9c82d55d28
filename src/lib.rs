//! # geoetl - linear ETL pipelines for tabular and geospatial data
//!
//! A workflow is an ordered list of steps. One source step loads a dataset,
//! transforms (filter, reproject, join) replace it, and sinks write it out.
//! Datasets come from and go to CSV, Parquet/GeoParquet, PostGIS tables and
//! cloud object stores.
//!
//! ## Quick Start
//!
//! ```no_run
//! use geoetl::pipeline::{Interpreter, TracingFeedback, run_workflow_file};
//! use std::path::Path;
//!
//! let report = run_workflow_file(
//!     Path::new("workflow.json"),
//!     &Interpreter::default(),
//!     &mut TracingFeedback,
//! )?;
//! println!("{}", report.summary());
//! # Ok::<(), geoetl::error::EtlError>(())
//! ```
//!
//! A workflow file is a JSON array of step records:
//!
//! ```json
//! [
//!   {"type": "csv_source", "path": "parcels.csv"},
//!   {"type": "filter", "expr": "area > 100"},
//!   {"type": "csv_sink", "path": "large_parcels.csv"}
//! ]
//! ```
//!
//! ## Core Modules
//!
//! - [`pipeline`]: step model, workflow files, interpreter, run policies,
//!   background jobs and the workflow builder
//! - [`dataset`]: the current dataset and its readers and writers
//!   - [`dataset::postgis`]: PostGIS queries and table replacement
//!   - [`dataset::cloud`]: object-store Parquet I/O
//! - [`geo`]: geometry columns, EWKB helpers, GeoParquet and reprojection
//! - [`config`]: `config.json` loading
//! - [`error`]: error types and handling utilities
//! - [`logging`]: tracing setup for the binary
//!
//! ## Features
//!
//! - `geo` (default): GeoParquet metadata, WKT output and CRS reprojection
//!   through PROJ. Without it, geometry columns are carried as opaque
//!   binary values.

#![warn(clippy::all, rust_2018_idioms)]

pub mod config;
pub mod dataset;
pub mod error;
pub mod geo;
pub mod logging;
pub mod pipeline;
