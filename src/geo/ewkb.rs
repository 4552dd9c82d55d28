//! Top-level WKB / EWKB header rewriting.
//!
//! PostGIS sends geometries as EWKB: ordinary WKB whose type word may carry
//! an SRID flag followed by a 4-byte SRID. Geometry columns are stored as
//! plain WKB inside a [`GeoTable`](super::GeoTable), so the header is
//! rewritten on the way in and out of the database. Nested geometries never
//! carry an SRID, so only the outermost header is touched.

use crate::error::{EtlError, Result};

const SRID_FLAG: u32 = 0x2000_0000;
const HEADER_LEN: usize = 5;

/// Decoded outermost header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub little_endian: bool,
    /// Type word with the SRID flag cleared
    pub type_word: u32,
    pub srid: Option<u32>,
}

impl Header {
    /// Byte length of the header including the optional SRID
    pub fn byte_len(&self) -> usize {
        if self.srid.is_some() {
            HEADER_LEN + 4
        } else {
            HEADER_LEN
        }
    }
}

fn read_u32(bytes: &[u8], at: usize, little_endian: bool) -> Result<u32> {
    let raw: [u8; 4] = bytes
        .get(at..at + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| EtlError::Geometry("truncated WKB header".to_owned()))?;
    Ok(if little_endian {
        u32::from_le_bytes(raw)
    } else {
        u32::from_be_bytes(raw)
    })
}

fn write_u32(value: u32, little_endian: bool) -> [u8; 4] {
    if little_endian {
        value.to_le_bytes()
    } else {
        value.to_be_bytes()
    }
}

/// Parse the outermost (E)WKB header.
///
/// # Errors
///
/// Fails on an unknown byte-order marker or a truncated buffer.
pub fn parse_header(bytes: &[u8]) -> Result<Header> {
    let little_endian = match bytes.first() {
        Some(0) => false,
        Some(1) => true,
        Some(other) => {
            return Err(EtlError::Geometry(format!(
                "invalid WKB byte order marker {other}"
            )));
        }
        None => return Err(EtlError::Geometry("empty WKB value".to_owned())),
    };

    let word = read_u32(bytes, 1, little_endian)?;
    let srid = if word & SRID_FLAG == 0 {
        None
    } else {
        Some(read_u32(bytes, HEADER_LEN, little_endian)?)
    };

    Ok(Header {
        little_endian,
        type_word: word & !SRID_FLAG,
        srid,
    })
}

/// Remove the SRID from an EWKB value, returning WKB and the SRID (if any).
///
/// A SRID of 0 means "unknown" in PostGIS and is reported as `None`.
///
/// # Errors
///
/// Fails if the header cannot be parsed.
pub fn strip_srid(ewkb: &[u8]) -> Result<(Vec<u8>, Option<u32>)> {
    let header = parse_header(ewkb)?;
    let Some(srid) = header.srid else {
        return Ok((ewkb.to_vec(), None));
    };

    let mut out = Vec::with_capacity(ewkb.len() - 4);
    out.push(u8::from(header.little_endian));
    out.extend_from_slice(&write_u32(header.type_word, header.little_endian));
    out.extend_from_slice(ewkb.get(header.byte_len()..).unwrap_or_default());
    Ok((out, (srid != 0).then_some(srid)))
}

/// Add (or replace) the SRID of a WKB value, producing EWKB.
///
/// # Errors
///
/// Fails if the header cannot be parsed.
pub fn with_srid(wkb: &[u8], srid: u32) -> Result<Vec<u8>> {
    let header = parse_header(wkb)?;
    let mut out = Vec::with_capacity(wkb.len() + 4);
    out.push(u8::from(header.little_endian));
    out.extend_from_slice(&write_u32(
        header.type_word | SRID_FLAG,
        header.little_endian,
    ));
    out.extend_from_slice(&write_u32(srid, header.little_endian));
    out.extend_from_slice(wkb.get(header.byte_len()..).unwrap_or_default());
    Ok(out)
}

/// Upper-case hex, the text form PostGIS accepts for geometry input
pub fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;

    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
            let _ = write!(s, "{b:02X}");
            s
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point_wkb(x: f64, y: f64) -> Vec<u8> {
        let mut v = vec![1u8];
        v.extend_from_slice(&1u32.to_le_bytes());
        v.extend_from_slice(&x.to_le_bytes());
        v.extend_from_slice(&y.to_le_bytes());
        v
    }

    #[test]
    fn test_srid_round_trip() {
        let wkb = point_wkb(10.0, 20.0);
        let ewkb = with_srid(&wkb, 4326).expect("with_srid");
        assert_eq!(ewkb.len(), wkb.len() + 4);

        let header = parse_header(&ewkb).expect("header");
        assert_eq!(header.srid, Some(4326));
        assert_eq!(header.type_word, 1);

        let (plain, srid) = strip_srid(&ewkb).expect("strip");
        assert_eq!(plain, wkb);
        assert_eq!(srid, Some(4326));
    }

    #[test]
    fn test_big_endian_header() {
        let mut ewkb = vec![0u8];
        ewkb.extend_from_slice(&(1u32 | SRID_FLAG).to_be_bytes());
        ewkb.extend_from_slice(&3857u32.to_be_bytes());
        ewkb.extend_from_slice(&1.5f64.to_be_bytes());
        ewkb.extend_from_slice(&2.5f64.to_be_bytes());

        let (plain, srid) = strip_srid(&ewkb).expect("strip");
        assert_eq!(srid, Some(3857));
        assert_eq!(plain.len(), 21);
        assert_eq!(parse_header(&plain).expect("header").srid, None);
    }

    #[test]
    fn test_zero_srid_is_unknown() {
        let ewkb = with_srid(&point_wkb(0.0, 0.0), 0).expect("with_srid");
        assert_eq!(strip_srid(&ewkb).expect("strip").1, None);
    }

    #[test]
    fn test_invalid_headers() {
        assert!(parse_header(&[]).is_err());
        assert!(parse_header(&[7, 1, 0, 0, 0]).is_err());
        assert!(parse_header(&[1, 1, 0]).is_err());
    }

    #[test]
    fn test_hex() {
        assert_eq!(to_hex(&[0x01, 0xAB, 0x00]), "01AB00");
    }
}
