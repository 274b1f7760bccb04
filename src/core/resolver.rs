//! Tile resolution
//!
//! Maps an area of interest onto the identifiers of the acquisition tiles that
//! cover it. Named regions use a full polygon overlay against the tile
//! footprints; bounding boxes use the cheaper window test on footprint bounds.

use std::collections::HashSet;
use std::fmt;

use geo::{Area, BooleanOps, Centroid, Coord, LineString, Polygon, Rect};

use crate::core::crs::CrsTransform;
use crate::core::error::{Error, Result};
use crate::core::raster::ClipPolygon;
use crate::core::tables::{RegionTable, TileGrid};

/// Vertices of the polygon standing in for a radius circle
const CIRCLE_SEGMENTS: usize = 64;

/// Opaque tile key, e.g. `37EN1_15`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId(String);

impl TileId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TileId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Resolved tiles: no duplicates, kept in tile-grid order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileSet {
    ids: Vec<TileId>,
}

impl TileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identifier; returns false if it was already present.
    pub fn insert(&mut self, id: TileId) -> bool {
        if self.ids.contains(&id) {
            return false;
        }
        self.ids.push(id);
        true
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|t| t.as_str() == id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TileId> {
        self.ids.iter()
    }
}

impl FromIterator<TileId> for TileSet {
    fn from_iter<I: IntoIterator<Item = TileId>>(iter: I) -> Self {
        let mut seen = HashSet::new();
        let ids = iter
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();
        Self { ids }
    }
}

impl IntoIterator for TileSet {
    type Item = TileId;
    type IntoIter = std::vec::IntoIter<TileId>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.into_iter()
    }
}

impl<'a> IntoIterator for &'a TileSet {
    type Item = &'a TileId;
    type IntoIter = std::slice::Iter<'a, TileId>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.iter()
    }
}

/// What a run covers; exactly one variant per run
#[derive(Debug, Clone, PartialEq)]
pub enum AreaOfInterest {
    /// A region looked up by name in the region table
    NamedRegion(String),
    /// `[min_x, min_y, max_x, max_y]` in `epsg`
    BoundingBox { bounds: [f64; 4], epsg: u32 },
    /// Everything within `distance` target-CRS units of the region's centroid
    RadiusAroundRegion { name: String, distance: f64 },
}

impl AreaOfInterest {
    /// Catch malformed input before any table work is done.
    pub fn validate(&self) -> Result<()> {
        match self {
            AreaOfInterest::NamedRegion(_) => Ok(()),
            AreaOfInterest::BoundingBox { bounds, .. } => {
                let [min_x, min_y, max_x, max_y] = *bounds;
                if bounds.iter().any(|v| !v.is_finite()) || min_x >= max_x || min_y >= max_y {
                    return Err(Error::InvalidConfiguration(format!(
                        "bounding box must be min_x,min_y,max_x,max_y with min < max, got {min_x},{min_y},{max_x},{max_y}"
                    )));
                }
                Ok(())
            }
            AreaOfInterest::RadiusAroundRegion { distance, .. } => {
                if !(distance.is_finite() && *distance > 0.0) {
                    return Err(Error::InvalidConfiguration(format!(
                        "radius must be positive, got {distance}"
                    )));
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for AreaOfInterest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AreaOfInterest::NamedRegion(name) => write!(f, "region '{name}'"),
            AreaOfInterest::BoundingBox { bounds, epsg } => write!(
                f,
                "bounding box {},{},{},{} (EPSG:{epsg})",
                bounds[0], bounds[1], bounds[2], bounds[3]
            ),
            AreaOfInterest::RadiusAroundRegion { name, distance } => {
                write!(f, "{distance} around region '{name}'")
            }
        }
    }
}

/// Resolves areas of interest against a region table and a tile grid
#[derive(Debug)]
pub struct TileResolver<'a> {
    regions: &'a RegionTable,
    grid: &'a TileGrid,
    target_epsg: u32,
}

impl<'a> TileResolver<'a> {
    pub fn new(regions: &'a RegionTable, grid: &'a TileGrid, target_epsg: u32) -> Self {
        Self {
            regions,
            grid,
            target_epsg,
        }
    }

    /// Identifiers of every tile covering `area`, in grid order.
    ///
    /// An empty set is a valid answer; the caller decides whether it is fatal.
    pub fn resolve(&self, area: &AreaOfInterest) -> Result<TileSet> {
        area.validate()?;

        let tiles = match area {
            AreaOfInterest::NamedRegion(name) => {
                let region = self.regions.clip_polygon(name)?;
                self.overlay(&region.to_epsg(self.grid.epsg())?)
            }
            AreaOfInterest::BoundingBox { bounds, epsg } => {
                let [min_x, min_y, max_x, max_y] = *bounds;
                let rect = Rect::new(Coord { x: min_x, y: min_y }, Coord { x: max_x, y: max_y });
                let window = CrsTransform::new(*epsg, self.grid.epsg())?.transform_rect(&rect)?;
                self.window(&window)
            }
            AreaOfInterest::RadiusAroundRegion { name, distance } => {
                let (cx, cy) = self.region_centroid(name)?;
                let circle = ClipPolygon::new(circle(cx, cy, *distance), self.target_epsg)?;
                self.overlay(&circle.to_epsg(self.grid.epsg())?)
            }
        };

        log::info!("Resolved {} tile(s) for {}", tiles.len(), area);
        Ok(tiles)
    }

    /// The named region's boundary in the target CRS.
    pub fn region_polygon(&self, name: &str) -> Result<ClipPolygon> {
        self.regions.clip_polygon(name)?.to_epsg(self.target_epsg)
    }

    /// Centroid of the named region in the target CRS.
    pub fn region_centroid(&self, name: &str) -> Result<(f64, f64)> {
        let region = self.region_polygon(name)?;
        let centroid = region
            .polygon()
            .centroid()
            .ok_or_else(|| Error::DegeneratePolygon(format!("region '{name}' has no centroid")))?;
        Ok((centroid.x(), centroid.y()))
    }

    /// Tiles whose footprint shares a non-zero area with `polygon` (grid CRS).
    fn overlay(&self, polygon: &ClipPolygon) -> TileSet {
        let Some(bounds) = polygon.bounds() else {
            return TileSet::new();
        };
        self.grid
            .iter()
            .filter(|tile| rects_overlap(&tile.bounds, &bounds))
            .filter(|tile| tile.footprint.intersection(polygon.polygon()).unsigned_area() > 0.0)
            .map(|tile| TileId::new(tile.id.clone()))
            .collect()
    }

    /// Tiles whose footprint bounds touch `window` (grid CRS).
    fn window(&self, window: &Rect<f64>) -> TileSet {
        self.grid
            .iter()
            .filter(|tile| rects_overlap(&tile.bounds, window))
            .map(|tile| TileId::new(tile.id.clone()))
            .collect()
    }
}

/// Closed-interval rectangle overlap.
fn rects_overlap(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    a.min().x <= b.max().x
        && a.max().x >= b.min().x
        && a.min().y <= b.max().y
        && a.max().y >= b.min().y
}

/// Regular polygon circumscribing a circle, so every tile the circle
/// reaches is selected.
fn circle(cx: f64, cy: f64, radius: f64) -> Polygon<f64> {
    let step = std::f64::consts::TAU / CIRCLE_SEGMENTS as f64;
    let vertex_radius = radius / (step / 2.0).cos();
    let ring: Vec<Coord<f64>> = (0..CIRCLE_SEGMENTS)
        .map(|i| {
            let angle = step * i as f64;
            Coord {
                x: cx + vertex_radius * angle.cos(),
                y: cy + vertex_radius * angle.sin(),
            }
        })
        .collect();
    Polygon::new(LineString::from(ring), vec![])
}
