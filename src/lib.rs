//! # ahn-dl
//!
//! Fetch AHN elevation point-cloud tiles for an area of interest, filter and
//! clip every tile, and merge the survivors into one LAS/LAZ file.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ahn_dl::{AreaOfInterest, Config, RegionTable, RunRequest, TileGrid};
//!
//! # async fn example() -> ahn_dl::Result<()> {
//! let regions = RegionTable::from_geojson(&std::fs::read_to_string("municipalities.geojson")?, "name")?;
//! let grid = TileGrid::from_geojson(&std::fs::read_to_string("ahn_subunits.geojson")?, "AHN_subuni")?;
//!
//! let request = RunRequest::new(AreaOfInterest::NamedRegion("Delft".into()), "delft.laz");
//! let points = ahn_dl::run(&Config::default(), &regions, &grid, request).await?;
//! println!("{points} points written");
//! # Ok(())
//! # }
//! ```
//!
//! The stages are also available on their own: [`resolve_tiles`],
//! [`fetch_tiles`], [`run_pipeline`] and [`merge_and_write`].

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

pub mod core;

pub use crate::core::config::{Config, DEFAULT_BASE_URL, RD_NEW_EPSG};
pub use crate::core::crs::{parse_epsg, CrsTransform};
pub use crate::core::error::{Error, Result};
pub use crate::core::fetcher::{Fetcher, ProgressCallback};
pub use crate::core::merge::{
    check_output, merge_and_write, scan_headers, GlobalHeader, MergeWriter,
};
pub use crate::core::pipeline::{run_pipeline, Pipeline, Stage};
pub use crate::core::raster::{rasterize, ClipPolygon, GeoTransform, RasterMask};
pub use crate::core::resolver::{AreaOfInterest, TileId, TileResolver, TileSet};
pub use crate::core::tables::{
    clip_polygon_from_geojson, Region, RegionTable, TileFootprint, TileGrid,
    DEFAULT_REGION_PROPERTY, DEFAULT_TILE_PROPERTY,
};
pub use crate::core::tile::{PointRecord, PointTile, TileHeader};

/// Classification codes used in AHN point clouds
pub const AHN_CLASSES: [(u8, &str); 8] = [
    (0, "Created, never classified"),
    (1, "Unclassified"),
    (2, "Ground"),
    (6, "Building"),
    (7, "Low point (noise)"),
    (9, "Water"),
    (14, "High tension"),
    (26, "Civil structure"),
];

/// Resolve an area of interest to tile identifiers.
///
/// An empty set is not an error here; [`run`] turns it into [`Error::NoTiles`].
pub fn resolve_tiles(
    regions: &RegionTable,
    grid: &TileGrid,
    area: &AreaOfInterest,
    target_epsg: u32,
) -> Result<TileSet> {
    TileResolver::new(regions, grid, target_epsg).resolve(area)
}

/// Download `urls` into `config.staging_dir`, all or nothing.
pub async fn fetch_tiles(urls: &[String], config: &Config) -> Result<HashMap<String, PathBuf>> {
    Fetcher::new(config.clone())?.fetch(urls).await
}

/// Everything one run needs besides the configuration and the tables
#[derive(Clone)]
pub struct RunRequest {
    pub area: AreaOfInterest,
    pub output: PathBuf,
    pub include_classes: BTreeSet<u8>,
    pub exclude_classes: BTreeSet<u8>,
    /// Keep every n-th point
    pub decimate: Option<usize>,
    /// Clip points to the area itself (region outline, box or circle)
    pub clip_to_area: bool,
    /// Extra polygon to clip by, in any supported CRS
    pub clip_polygon: Option<ClipPolygon>,
    /// Replace an existing output file
    pub force: bool,
    pub progress: Option<ProgressCallback>,
}

impl RunRequest {
    pub fn new(area: AreaOfInterest, output: impl Into<PathBuf>) -> Self {
        Self {
            area,
            output: output.into(),
            include_classes: BTreeSet::new(),
            exclude_classes: BTreeSet::new(),
            decimate: None,
            clip_to_area: true,
            clip_polygon: None,
            force: false,
            progress: None,
        }
    }
}

/// Build the filter pipeline for a request. Region lookups and rasterization
/// happen here, so their errors surface before any network activity.
pub fn build_pipeline(
    resolver: &TileResolver<'_>,
    config: &Config,
    request: &RunRequest,
) -> Result<Pipeline> {
    request.area.validate()?;

    let mut stages = Vec::new();
    if let Some(step) = request.decimate {
        stages.push(Stage::Decimate(step));
    }
    if !request.include_classes.is_empty() {
        stages.push(Stage::IncludeClasses(request.include_classes.clone()));
    }
    if !request.exclude_classes.is_empty() {
        stages.push(Stage::ExcludeClasses(request.exclude_classes.clone()));
    }

    if request.clip_to_area {
        match &request.area {
            AreaOfInterest::NamedRegion(name) => {
                let outline = resolver.region_polygon(name)?;
                stages.push(Stage::ClipByPolygon(rasterize(&outline, config.raster_resolution)?));
            }
            AreaOfInterest::BoundingBox { bounds, epsg } => {
                let [min_x, min_y, max_x, max_y] = *bounds;
                let rect = geo::Rect::new((min_x, min_y), (max_x, max_y));
                let rect = CrsTransform::new(*epsg, config.target_epsg)?.transform_rect(&rect)?;
                stages.push(Stage::ClipByBoundingBox {
                    bounds: [rect.min().x, rect.min().y, rect.max().x, rect.max().y],
                });
            }
            AreaOfInterest::RadiusAroundRegion { name, distance } => {
                stages.push(Stage::ClipByRadius {
                    center: resolver.region_centroid(name)?,
                    radius: *distance,
                });
            }
        }
    }

    if let Some(polygon) = &request.clip_polygon {
        let polygon = polygon.to_epsg(config.target_epsg)?;
        stages.push(Stage::ClipByPolygon(rasterize(&polygon, config.raster_resolution)?));
    }

    Pipeline::new(stages)
}

/// Resolve, fetch, filter and merge. Returns the number of points written.
///
/// A run either leaves exactly one complete output file or none at all, and
/// never leaves staged tiles behind.
pub async fn run(
    config: &Config,
    regions: &RegionTable,
    grid: &TileGrid,
    request: RunRequest,
) -> Result<u64> {
    config.validate()?;
    check_output(&request.output, request.force)?;

    let resolver = TileResolver::new(regions, grid, config.target_epsg);
    let pipeline = build_pipeline(&resolver, config, &request)?;

    let tiles = resolver.resolve(&request.area)?;
    if tiles.is_empty() {
        return Err(Error::NoTiles(request.area.to_string()));
    }

    let urls: Vec<String> = tiles.iter().map(|id| config.tile_url(id.as_str())).collect();
    let mut fetcher = Fetcher::new(config.clone())?;
    if let Some(progress) = request.progress.clone() {
        fetcher = fetcher.with_progress(progress);
    }
    let mut staged = fetcher.fetch(&urls).await?;

    // Merge in resolution order; the first tile fixes the output offset.
    let paths: Vec<PathBuf> = urls.iter().filter_map(|url| staged.remove(url)).collect();
    let output = request.output.clone();
    tokio::task::spawn_blocking(move || merge_and_write(&paths, &pipeline, &output))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
}
