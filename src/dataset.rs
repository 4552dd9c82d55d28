//! The value threaded through a pipeline run.
//!
//! A [`Dataset`] is either a plain polars table or a [`GeoTable`]. Readers
//! and writers for each storage backend live in the submodules; every one of
//! them opens its file handle, connection or object-store client on entry
//! and drops it before returning.

pub mod cloud;
pub mod io;
pub mod postgis;

use crate::error::Result;
use crate::geo::GeoTable;
use polars::prelude::*;
use std::future::Future;

/// Tabular or geo-tabular data
#[derive(Debug, Clone)]
pub enum Dataset {
    Table(DataFrame),
    Geo(GeoTable),
}

impl Dataset {
    pub fn frame(&self) -> &DataFrame {
        match self {
            Self::Table(df) => df,
            Self::Geo(geo) => geo.frame(),
        }
    }

    pub fn into_frame(self) -> DataFrame {
        match self {
            Self::Table(df) => df,
            Self::Geo(geo) => geo.into_frame(),
        }
    }

    pub fn height(&self) -> usize {
        self.frame().height()
    }

    pub fn width(&self) -> usize {
        self.frame().width()
    }

    pub fn is_geospatial(&self) -> bool {
        matches!(self, Self::Geo(_))
    }

    /// EPSG code of a geo dataset; `None` for plain tables or unknown CRS
    pub fn epsg(&self) -> Option<u32> {
        match self {
            Self::Table(_) => None,
            Self::Geo(geo) => geo.epsg(),
        }
    }

    /// Apply a frame-to-frame operation, keeping geometry metadata intact.
    ///
    /// # Errors
    ///
    /// Propagates the error of `f`, or fails if `f` dropped the geometry
    /// column of a geo dataset.
    pub fn map_frame<F>(self, f: F) -> Result<Self>
    where
        F: FnOnce(DataFrame) -> Result<DataFrame>,
    {
        match self {
            Self::Table(df) => f(df).map(Self::Table),
            Self::Geo(geo) => {
                let frame = f(geo.frame().clone())?;
                geo.with_frame(frame).map(Self::Geo)
            }
        }
    }
}

impl From<DataFrame> for Dataset {
    fn from(df: DataFrame) -> Self {
        Self::Table(df)
    }
}

impl From<GeoTable> for Dataset {
    fn from(geo: GeoTable) -> Self {
        Self::Geo(geo)
    }
}

/// Drive an async client call to completion on a runtime that lives only as
/// long as the call.
pub(crate) fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(future))
}
