//! Geospatial tables.
//!
//! A [`GeoTable`] is a polars `DataFrame` with one binary column of WKB
//! geometries and an optional EPSG code. Everything that needs PROJ or a
//! geometry codec lives behind the `geo` Cargo feature; without it, geo
//! tables can still be loaded from PostGIS and written back, but not
//! reprojected or rendered as WKT.

pub mod ewkb;
#[cfg(feature = "geo")]
pub mod geoparquet;
#[cfg(feature = "geo")]
pub mod reproject;

use crate::error::{EtlError, Result};
use polars::prelude::*;

/// Default geometry column name (GeoPandas and GeoParquet convention)
pub const DEFAULT_GEOMETRY_COLUMN: &str = "geometry";

/// `EPSG:<code>` as understood by PROJ
pub fn epsg_name(code: u32) -> String {
    format!("EPSG:{code}")
}

/// Tabular data with a WKB geometry column and a coordinate reference system
#[derive(Debug, Clone)]
pub struct GeoTable {
    frame: DataFrame,
    geometry: String,
    epsg: Option<u32>,
}

impl GeoTable {
    /// Wrap a frame whose `geometry` column holds WKB.
    ///
    /// # Errors
    ///
    /// Fails if the column is missing or is not binary.
    pub fn new(frame: DataFrame, geometry: impl Into<String>, epsg: Option<u32>) -> Result<Self> {
        let geometry = geometry.into();
        check_geometry_column(&frame, &geometry)?;
        Ok(Self {
            frame,
            geometry,
            epsg,
        })
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn geometry_column(&self) -> &str {
        &self.geometry
    }

    pub fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    pub fn into_frame(self) -> DataFrame {
        self.frame
    }

    /// Replace the frame, keeping geometry column and CRS.
    ///
    /// # Errors
    ///
    /// Fails if the new frame no longer carries the geometry column.
    pub fn with_frame(self, frame: DataFrame) -> Result<Self> {
        Self::new(frame, self.geometry, self.epsg)
    }

    /// Replace the geometry values and CRS, keeping every other column.
    ///
    /// # Errors
    ///
    /// Fails if `wkb` does not have one entry per row.
    pub fn with_geometries(mut self, wkb: Vec<Option<Vec<u8>>>, epsg: Option<u32>) -> Result<Self> {
        if wkb.len() != self.frame.height() {
            return Err(EtlError::Geometry(format!(
                "expected {} geometries, got {}",
                self.frame.height(),
                wkb.len()
            )));
        }
        let mut ca: BinaryChunked = wkb.into_iter().collect();
        ca.rename(self.geometry.as_str().into());
        self.frame.with_column(ca.into_series())?;
        self.epsg = epsg;
        Ok(self)
    }

    /// The raw WKB values of the geometry column
    ///
    /// # Errors
    ///
    /// Fails if the column is not binary.
    pub fn geometries(&self) -> Result<Vec<Option<&[u8]>>> {
        Ok(self
            .frame
            .column(&self.geometry)?
            .as_materialized_series()
            .binary()?
            .into_iter()
            .collect())
    }

    /// Copy of the frame with the geometry column rendered as text, for
    /// formats without a binary type. WKT when the `geo` feature is on,
    /// hex WKB otherwise.
    ///
    /// # Errors
    ///
    /// Fails if a geometry cannot be decoded.
    pub fn to_text_frame(&self) -> Result<DataFrame> {
        let text = self
            .geometries()?
            .into_iter()
            .map(|g| g.map(geometry_text).transpose())
            .collect::<Result<Vec<Option<String>>>>()?;
        let mut ca: StringChunked = text.into_iter().collect();
        ca.rename(self.geometry.as_str().into());

        let mut frame = self.frame.clone();
        frame.with_column(ca.into_series())?;
        Ok(frame)
    }
}

fn check_geometry_column(frame: &DataFrame, name: &str) -> Result<()> {
    let column = frame.column(name).map_err(|_| {
        EtlError::Geometry(format!("geometry column '{name}' not found"))
    })?;
    if column.dtype() != &DataType::Binary {
        return Err(EtlError::Geometry(format!(
            "geometry column '{name}' must hold WKB bytes, found {}",
            column.dtype()
        )));
    }
    Ok(())
}

#[cfg(feature = "geo")]
fn geometry_text(wkb: &[u8]) -> Result<String> {
    use geozero::ToWkt as _;
    use geozero::wkb::Ewkb;

    Ok(Ewkb(wkb.to_vec()).to_wkt()?)
}

#[cfg(not(feature = "geo"))]
fn geometry_text(wkb: &[u8]) -> Result<String> {
    Ok(ewkb::to_hex(wkb))
}
