//! Coordinate reference system transformation of geometry columns.
//!
//! Every vertex of every geometry is pushed through one PROJ pipeline built
//! for the `(source, target)` pair. PROJ is asked for the visualization axis
//! order, so geographic CRSs are handled as `(lon, lat)` like everywhere
//! else in the crate.

use super::{GeoTable, epsg_name};
use crate::error::{EtlError, Result};
use geo::MapCoords as _;
use geozero::wkb::Wkb;
use geozero::{CoordDimensions, ToGeo as _, ToWkb as _};
use proj::Proj;

/// Transform a geometry table into `target_epsg`.
///
/// A table already in the target CRS is returned unchanged. Null geometries
/// stay null. Transformed geometries are written as 2D WKB: Z and M values
/// are dropped.
///
/// # Errors
///
/// Fails when the table has no CRS, when PROJ does not know either code,
/// or when a vertex cannot be transformed.
pub fn reproject(table: GeoTable, target_epsg: u32) -> Result<GeoTable> {
    let Some(source_epsg) = table.epsg() else {
        return Err(EtlError::Geometry(
            "cannot reproject a geometry column without a CRS".to_owned(),
        ));
    };
    if source_epsg == target_epsg {
        return Ok(table);
    }

    let from = epsg_name(source_epsg);
    let to = epsg_name(target_epsg);
    let proj = Proj::new_known_crs(&from, &to, None).map_err(|e| {
        EtlError::Geometry(format!("Failed to create projection from {from} to {to}: {e}"))
    })?;

    let transformed = table
        .geometries()?
        .into_iter()
        .map(|wkb| wkb.map(|bytes| transform_wkb(&proj, bytes)).transpose())
        .collect::<Result<Vec<_>>>()?;

    table.with_geometries(transformed, Some(target_epsg))
}

/// Transform every vertex in the XY plane; the output carries no Z or M.
fn transform_wkb(proj: &Proj, bytes: &[u8]) -> Result<Vec<u8>> {
    let geometry = Wkb(bytes.to_vec()).to_geo()?;
    let projected = geometry.try_map_coords(|c| {
        proj.convert((c.x, c.y))
            .map(|(x, y)| geo::Coord { x, y })
    })?;
    Ok(projected.to_wkb(CoordDimensions::xy())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::DEFAULT_GEOMETRY_COLUMN;
    use polars::prelude::*;

    fn point_wkb(x: f64, y: f64) -> Vec<u8> {
        let mut v = vec![1u8];
        v.extend_from_slice(&1u32.to_le_bytes());
        v.extend_from_slice(&x.to_le_bytes());
        v.extend_from_slice(&y.to_le_bytes());
        v
    }

    fn read_point(wkb: &[u8]) -> (f64, f64) {
        match Wkb(wkb.to_vec()).to_geo().expect("decode") {
            geo::Geometry::Point(p) => (p.x(), p.y()),
            other => panic!("expected a point, got {other:?}"),
        }
    }

    fn table(epsg: Option<u32>) -> GeoTable {
        let geoms: BinaryChunked = [Some(point_wkb(10.0, 50.0)), None].into_iter().collect();
        let mut geoms = geoms.into_series();
        geoms.rename(DEFAULT_GEOMETRY_COLUMN.into());
        let ids = Series::new("id".into(), [1i32, 2]);
        let frame = DataFrame::new(vec![ids.into(), geoms.into()]).expect("frame");
        GeoTable::new(frame, DEFAULT_GEOMETRY_COLUMN, epsg).expect("table")
    }

    #[test]
    fn test_wgs84_to_web_mercator() {
        let out = reproject(table(Some(4326)), 3857).expect("reproject");
        assert_eq!(out.epsg(), Some(3857));

        let geoms = out.geometries().expect("geometries");
        assert!(geoms[1].is_none(), "null geometry stays null");

        let (x, y) = read_point(geoms[0].expect("point"));
        assert!((x - 1_113_194.907_932_736).abs() < 0.01, "x = {x}");
        assert!((y - 6_446_275.841_017_161).abs() < 0.01, "y = {y}");
    }

    #[test]
    fn test_output_is_two_dimensional() {
        // ISO WKB PointZ (type 1001)
        let mut point_z = vec![1u8];
        point_z.extend_from_slice(&1001u32.to_le_bytes());
        for v in [10.0f64, 50.0, 250.0] {
            point_z.extend_from_slice(&v.to_le_bytes());
        }

        let proj = Proj::new_known_crs("EPSG:4326", "EPSG:3857", None).expect("proj");
        let out = transform_wkb(&proj, &point_z).expect("transform");
        let header = crate::geo::ewkb::parse_header(&out).expect("header");
        assert_eq!(header.type_word, 1);
        assert_eq!(out.len(), 21, "byte order, type word and two ordinates");

        let (x, _) = read_point(&out);
        assert!((x - 1_113_194.907_932_736).abs() < 0.01, "x = {x}");
    }

    #[test]
    fn test_same_crs_is_untouched() {
        let out = reproject(table(Some(4326)), 4326).expect("reproject");
        let (x, y) = read_point(out.geometries().expect("geometries")[0].expect("point"));
        assert_eq!((x, y), (10.0, 50.0));
    }

    #[test]
    fn test_missing_crs_is_an_error() {
        let err = reproject(table(None), 3857).unwrap_err();
        assert!(err.to_string().contains("without a CRS"), "{err}");
    }
}
