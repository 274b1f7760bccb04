//! Coordinate reference system handling
//!
//! Thin wrapper around proj4rs for the handful of EPSG codes AHN data and its
//! boundary datasets come in. proj4rs works in radians for geographic CRS; the
//! wrapper converts so callers always use native units (degrees or metres).

use geo::{Coord, MapCoords, Polygon, Rect};
use proj4rs::Proj;

use crate::core::error::{Error, Result};

/// proj definitions for the supported EPSG codes
fn proj_string(epsg: u32) -> Option<&'static str> {
    let def = match epsg {
        4326 => "+proj=longlat +datum=WGS84 +no_defs",
        4258 => "+proj=longlat +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +no_defs",
        3857 => "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +nadgrids=@null +no_defs",
        28992 => "+proj=sterea +lat_0=52.15616055555555 +lon_0=5.38763888888889 +k=0.9999079 +x_0=155000 +y_0=463000 +ellps=bessel +towgs84=565.417,50.3319,465.552,-0.398957,0.343988,-1.8774,4.0725 +units=m +no_defs",
        25831 => "+proj=utm +zone=31 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs",
        25832 => "+proj=utm +zone=32 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs",
        32631 => "+proj=utm +zone=31 +datum=WGS84 +units=m +no_defs",
        32632 => "+proj=utm +zone=32 +datum=WGS84 +units=m +no_defs",
        _ => return None,
    };
    Some(def)
}

/// Parse the CRS spellings found in GeoJSON files and on the command line.
///
/// Accepts `EPSG:28992`, `epsg:28992`, `28992`, `urn:ogc:def:crs:EPSG::28992`
/// and the OGC CRS84 urn (which is WGS84 lon/lat).
pub fn parse_epsg(crs: &str) -> Result<u32> {
    let trimmed = crs.trim();
    if trimmed.ends_with("CRS84") {
        return Ok(4326);
    }
    trimmed
        .rsplit(':')
        .next()
        .and_then(|code| code.parse::<u32>().ok())
        .ok_or_else(|| Error::InvalidConfiguration(format!("Unrecognised CRS identifier '{crs}'")))
}

/// Reprojection between two EPSG codes
pub struct CrsTransform {
    source_epsg: u32,
    target_epsg: u32,
    projs: Option<(Proj, Proj)>,
    source_is_geographic: bool,
    target_is_geographic: bool,
}

impl std::fmt::Debug for CrsTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrsTransform")
            .field("source_epsg", &self.source_epsg)
            .field("target_epsg", &self.target_epsg)
            .finish_non_exhaustive()
    }
}

impl CrsTransform {
    /// Create a transform from `source_epsg` to `target_epsg`.
    ///
    /// Identical codes give an identity transform that never touches proj4rs.
    pub fn new(source_epsg: u32, target_epsg: u32) -> Result<Self> {
        if source_epsg == target_epsg {
            return Ok(Self {
                source_epsg,
                target_epsg,
                projs: None,
                source_is_geographic: false,
                target_is_geographic: false,
            });
        }

        let source = load_proj(source_epsg)?;
        let target = load_proj(target_epsg)?;
        let source_is_geographic = source.is_latlong();
        let target_is_geographic = target.is_latlong();

        Ok(Self {
            source_epsg,
            target_epsg,
            projs: Some((source, target)),
            source_is_geographic,
            target_is_geographic,
        })
    }

    pub fn source_epsg(&self) -> u32 {
        self.source_epsg
    }

    pub fn target_epsg(&self) -> u32 {
        self.target_epsg
    }

    pub fn is_identity(&self) -> bool {
        self.projs.is_none()
    }

    /// Transform one coordinate pair.
    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let Some((source, target)) = &self.projs else {
            return Ok((x, y));
        };

        let mut point = if self.source_is_geographic {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };

        proj4rs::transform::transform(source, target, &mut point).map_err(|e| {
            Error::InvalidConfiguration(format!(
                "EPSG:{} -> EPSG:{} failed for ({x}, {y}): {e}",
                self.source_epsg, self.target_epsg
            ))
        })?;

        if self.target_is_geographic {
            Ok((point.0.to_degrees(), point.1.to_degrees()))
        } else {
            Ok((point.0, point.1))
        }
    }

    /// Reproject every vertex of a polygon.
    pub fn transform_polygon(&self, polygon: &Polygon<f64>) -> Result<Polygon<f64>> {
        if self.is_identity() {
            return Ok(polygon.clone());
        }
        polygon.try_map_coords(|c: Coord<f64>| {
            let (x, y) = self.transform(c.x, c.y)?;
            Ok(Coord { x, y })
        })
    }

    /// Reproject a rectangle by its four corners and return their envelope.
    pub fn transform_rect(&self, rect: &Rect<f64>) -> Result<Rect<f64>> {
        if self.is_identity() {
            return Ok(*rect);
        }
        let (min, max) = (rect.min(), rect.max());
        let corners = [(min.x, min.y), (max.x, min.y), (max.x, max.y), (min.x, max.y)];

        let mut lo = Coord { x: f64::INFINITY, y: f64::INFINITY };
        let mut hi = Coord { x: f64::NEG_INFINITY, y: f64::NEG_INFINITY };
        for (x, y) in corners {
            let (tx, ty) = self.transform(x, y)?;
            lo.x = lo.x.min(tx);
            lo.y = lo.y.min(ty);
            hi.x = hi.x.max(tx);
            hi.y = hi.y.max(ty);
        }
        Ok(Rect::new(lo, hi))
    }
}

fn load_proj(epsg: u32) -> Result<Proj> {
    let def = proj_string(epsg)
        .ok_or_else(|| Error::InvalidConfiguration(format!("EPSG:{epsg} is not supported")))?;
    Proj::from_proj_string(def)
        .map_err(|e| Error::InvalidConfiguration(format!("Invalid projection EPSG:{epsg}: {e}")))
}
