//! Region-polygon and tile-grid tables
//!
//! Both tables are supplied to the core ready-made. The GeoJSON loaders cover
//! the usual source (municipality boundaries and the AHN subunit grid).

use geo::{BoundingRect, Geometry, Polygon, Rect};
use geojson::{FeatureCollection, GeoJson};
use serde_json::Value;

use crate::core::crs::parse_epsg;
use crate::core::error::{suggest_region, Error, Result};
use crate::core::raster::ClipPolygon;

/// Property holding the municipality name in the boundary dataset
pub const DEFAULT_REGION_PROPERTY: &str = "name";

/// Property holding the tile identifier in the AHN subunit grid
pub const DEFAULT_TILE_PROPERTY: &str = "AHN_subuni";

/// One named region and its boundary
#[derive(Debug, Clone)]
pub struct Region {
    pub name: String,
    pub polygon: Polygon<f64>,
}

/// Named region boundaries, all in one CRS
#[derive(Debug, Clone)]
pub struct RegionTable {
    epsg: u32,
    regions: Vec<Region>,
}

impl RegionTable {
    pub fn new(epsg: u32, regions: Vec<Region>) -> Self {
        Self { epsg, regions }
    }

    /// Load from a GeoJSON FeatureCollection, naming regions by `name_property`.
    pub fn from_geojson(text: &str, name_property: &str) -> Result<Self> {
        let (epsg, rows) = read_features(text, name_property)?;
        let regions = rows
            .into_iter()
            .map(|(name, polygon)| Region { name, polygon })
            .collect();
        Ok(Self { epsg, regions })
    }

    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.regions.iter().map(|r| r.name.as_str())
    }

    /// Case-insensitive exact lookup.
    pub fn find(&self, name: &str) -> Result<&Region> {
        let wanted = name.to_lowercase();
        self.regions
            .iter()
            .find(|r| r.name.to_lowercase() == wanted)
            .ok_or_else(|| Error::RegionNotFound {
                name: name.to_string(),
                suggestion: suggest_region(name, self.names()),
            })
    }

    /// The region's boundary as a clip polygon in the table's CRS.
    pub fn clip_polygon(&self, name: &str) -> Result<ClipPolygon> {
        let region = self.find(name)?;
        ClipPolygon::new(region.polygon.clone(), self.epsg)
    }
}

/// Footprint of one acquisition tile
#[derive(Debug, Clone)]
pub struct TileFootprint {
    pub id: String,
    pub footprint: Polygon<f64>,
    pub bounds: Rect<f64>,
}

/// The fixed acquisition grid, in table order
#[derive(Debug, Clone)]
pub struct TileGrid {
    epsg: u32,
    tiles: Vec<TileFootprint>,
}

impl TileGrid {
    /// Build from `(id, footprint)` rows; rows without a bounding box are skipped.
    pub fn new(epsg: u32, rows: Vec<(String, Polygon<f64>)>) -> Self {
        let tiles = rows
            .into_iter()
            .filter_map(|(id, footprint)| {
                let bounds = footprint.bounding_rect()?;
                Some(TileFootprint { id, footprint, bounds })
            })
            .collect();
        Self { epsg, tiles }
    }

    /// Load from a GeoJSON FeatureCollection, identifying tiles by `id_property`.
    pub fn from_geojson(text: &str, id_property: &str) -> Result<Self> {
        let (epsg, rows) = read_features(text, id_property)?;
        Ok(Self::new(epsg, rows))
    }

    pub fn epsg(&self) -> u32 {
        self.epsg
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TileFootprint> {
        self.tiles.iter()
    }

    pub fn get(&self, id: &str) -> Option<&TileFootprint> {
        self.tiles.iter().find(|t| t.id == id)
    }
}

/// Load a user clip boundary: a Geometry, a Feature, or a FeatureCollection
/// holding exactly one feature. `epsg` overrides the file's own CRS.
pub fn clip_polygon_from_geojson(text: &str, epsg: Option<u32>) -> Result<ClipPolygon> {
    let geojson: GeoJson = text
        .parse()
        .map_err(|e| Error::InvalidConfiguration(format!("Invalid GeoJSON: {e}")))?;

    let (file_epsg, geometry) = match geojson {
        GeoJson::Geometry(geometry) => (4326, Some(geometry)),
        GeoJson::Feature(feature) => (4326, feature.geometry),
        GeoJson::FeatureCollection(collection) => {
            let file_epsg = collection_epsg(&collection)?;
            let count = collection.features.len();
            if count != 1 {
                return Err(Error::UnsupportedGeometry(format!(
                    "clip file holds {count} features; exactly one is supported"
                )));
            }
            let geometry = collection.features.into_iter().next().and_then(|f| f.geometry);
            (file_epsg, geometry)
        }
    };

    let geometry = geometry
        .ok_or_else(|| Error::InvalidConfiguration("clip feature has no geometry".to_string()))?;
    let geometry = Geometry::<f64>::try_from(geometry.value)
        .map_err(|e| Error::InvalidConfiguration(format!("Bad clip geometry: {e}")))?;
    ClipPolygon::new(single_polygon("clip", geometry)?, epsg.unwrap_or(file_epsg))
}

/// Parse a FeatureCollection into `(key, polygon)` rows plus its EPSG code.
fn read_features(text: &str, key_property: &str) -> Result<(u32, Vec<(String, Polygon<f64>)>)> {
    let geojson: GeoJson = text
        .parse()
        .map_err(|e| Error::InvalidConfiguration(format!("Invalid GeoJSON: {e}")))?;
    let collection = FeatureCollection::try_from(geojson)
        .map_err(|e| Error::InvalidConfiguration(format!("Expected a FeatureCollection: {e}")))?;

    let epsg = collection_epsg(&collection)?;

    let mut rows = Vec::with_capacity(collection.features.len());
    for feature in collection.features {
        let key = match feature.property(key_property) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(Error::InvalidConfiguration(format!(
                    "Feature without a '{key_property}' property"
                )))
            }
        };
        let Some(geometry) = feature.geometry else {
            continue;
        };
        let geometry = Geometry::<f64>::try_from(geometry.value)
            .map_err(|e| Error::InvalidConfiguration(format!("Bad geometry for '{key}': {e}")))?;
        rows.push((key.clone(), single_polygon(&key, geometry)?));
    }

    Ok((epsg, rows))
}

/// CRS from the legacy `crs` member; GeoJSON without one is WGS84.
fn collection_epsg(collection: &FeatureCollection) -> Result<u32> {
    let name = collection
        .foreign_members
        .as_ref()
        .and_then(|m| m.get("crs"))
        .and_then(|crs| crs.get("properties"))
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str);
    match name {
        Some(name) => parse_epsg(name),
        None => Ok(4326),
    }
}

/// Unwrap a geometry into exactly one polygon.
fn single_polygon(key: &str, geometry: Geometry<f64>) -> Result<Polygon<f64>> {
    match geometry {
        Geometry::Polygon(p) => Ok(p),
        Geometry::MultiPolygon(mut mp) if mp.0.len() == 1 => Ok(mp.0.remove(0)),
        Geometry::MultiPolygon(mp) => Err(Error::UnsupportedGeometry(format!(
            "'{key}' has {} polygon parts; only single polygons are supported",
            mp.0.len()
        ))),
        _ => Err(Error::UnsupportedGeometry(format!("'{key}' is not a polygon"))),
    }
}
