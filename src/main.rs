//! # ahn-dl CLI
//!
//! Command-line front end for the ahn-dl library: pick an area, fetch the AHN
//! tiles that cover it, filter and clip them into one LAS/LAZ file.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use ahn_dl::{
    clip_polygon_from_geojson, AreaOfInterest, Config, RegionTable, RunRequest, TileGrid,
    AHN_CLASSES, DEFAULT_BASE_URL, DEFAULT_REGION_PROPERTY, DEFAULT_TILE_PROPERTY, RD_NEW_EPSG,
};
use anyhow::{bail, Context};
use clap::Parser;
use log::{error, info};

mod cli;

/// Command-line interface for ahn-dl
#[derive(Parser, Debug)]
#[command(name = "ahn-dl")]
#[command(about = "Download, filter and merge AHN point-cloud tiles")]
#[command(long_about = "Fetches the AHN tiles covering an area and merges them into one file:
  ahn-dl -c Delft -o delft.laz --regions gemeenten.geojson --tiles ahn_subunits.geojson
  ahn-dl -b 84592.7,444443.1,86312.1,446712.3 -o box.laz ...
  ahn-dl -c Delft -r 500 -i 2,6 -o centre.laz ...

Classes: 0 created/never classified, 1 unclassified, 2 ground, 6 building,
7 low point (noise), 9 water, 14 high tension, 26 civil structure")]
#[command(version)]
struct Cli {
    /// Output file (.las or .laz)
    #[arg(short, long)]
    output: PathBuf,

    /// Municipality to fetch
    #[arg(short, long, conflicts_with = "bbox")]
    city: Option<String>,

    /// Bounding box as min_x,min_y,max_x,max_y
    #[arg(short, long, allow_hyphen_values = true)]
    bbox: Option<String>,

    /// EPSG code of the bounding box
    #[arg(long, default_value_t = RD_NEW_EPSG)]
    bbox_epsg: u32,

    /// Only keep points within this distance of the city's centroid
    #[arg(short, long, requires = "city")]
    radius: Option<f64>,

    /// Comma-separated classes to keep
    #[arg(short, long, value_delimiter = ',')]
    include_class: Vec<u8>,

    /// Comma-separated classes to drop
    #[arg(short, long, value_delimiter = ',')]
    exclude_class: Vec<u8>,

    /// Keep every n-th point
    #[arg(short, long)]
    decimate: Option<usize>,

    /// Select tiles by city but do not clip points to its boundary
    #[arg(long)]
    no_clip_city: bool,

    /// GeoJSON polygon to clip the points with
    #[arg(long)]
    clip_file: Option<PathBuf>,

    /// EPSG code of the clip file, overriding its own CRS
    #[arg(long, requires = "clip_file")]
    epsg: Option<u32>,

    /// GeoJSON with municipality boundaries
    #[arg(long)]
    regions: PathBuf,

    /// Property holding the municipality name
    #[arg(long, default_value = DEFAULT_REGION_PROPERTY)]
    region_property: String,

    /// GeoJSON with the AHN tile grid
    #[arg(long)]
    tiles: PathBuf,

    /// Property holding the tile identifier
    #[arg(long, default_value = DEFAULT_TILE_PROPERTY)]
    tile_property: String,

    /// Where the tiles are downloaded from
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Concurrent downloads
    #[arg(short, long, default_value_t = 8)]
    workers: usize,

    /// Raster cell size used for polygon clipping, in metres
    #[arg(long, default_value_t = 10.0)]
    resolution: f64,

    /// Directory for downloaded tiles
    #[arg(long)]
    staging_dir: Option<PathBuf>,

    /// Overwrite the output file if it exists
    #[arg(short, long)]
    force: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "info" }),
    )
    .target(env_logger::Target::Stderr)
    .init();

    if let Err(e) = run(cli).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    info!("ahn-dl v{} starting...", env!("CARGO_PKG_VERSION"));

    let area = area_of_interest(&cli)?;
    let include = known_classes(&cli.include_class).context("--include-class")?;
    let exclude = known_classes(&cli.exclude_class).context("--exclude-class")?;

    let mut config = Config {
        base_url: cli.base_url.clone(),
        max_workers: cli.workers,
        raster_resolution: cli.resolution,
        ..Default::default()
    };
    if let Some(dir) = &cli.staging_dir {
        config.staging_dir = dir.clone();
    }

    let regions = RegionTable::from_geojson(&read(&cli.regions)?, &cli.region_property)?;
    let grid = TileGrid::from_geojson(&read(&cli.tiles)?, &cli.tile_property)?;
    info!(
        "Loaded {} regions (EPSG:{}) and {} tiles (EPSG:{})",
        regions.len(),
        regions.epsg(),
        grid.len(),
        grid.epsg()
    );

    let mut request = RunRequest::new(area, &cli.output);
    request.include_classes = include;
    request.exclude_classes = exclude;
    request.decimate = cli.decimate;
    request.force = cli.force;
    request.clip_to_area = !(cli.no_clip_city && cli.city.is_some() && cli.radius.is_none());
    if let Some(path) = &cli.clip_file {
        request.clip_polygon = Some(clip_polygon_from_geojson(&read(path)?, cli.epsg)?);
    }

    let progress = cli::ProgressManager::new(0, &format!("Fetching tiles for {}", request.area));
    request.progress = Some(progress.callback());

    let points = ahn_dl::run(&config, &regions, &grid, request).await?;
    info!("Done: {points} points written to {}", cli.output.display());
    Ok(())
}

fn area_of_interest(cli: &Cli) -> anyhow::Result<AreaOfInterest> {
    match (&cli.city, &cli.bbox, cli.radius) {
        (Some(city), None, Some(distance)) => Ok(AreaOfInterest::RadiusAroundRegion {
            name: city.clone(),
            distance,
        }),
        (Some(city), None, None) => Ok(AreaOfInterest::NamedRegion(city.clone())),
        (None, Some(bbox), None) => Ok(AreaOfInterest::BoundingBox {
            bounds: parse_bbox(bbox)?,
            epsg: cli.bbox_epsg,
        }),
        _ => bail!("specify exactly one of --city or --bbox"),
    }
}

fn parse_bbox(text: &str) -> anyhow::Result<[f64; 4]> {
    let values = text
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid bounding box '{text}'"))?;
    match values.as_slice() {
        &[min_x, min_y, max_x, max_y] => Ok([min_x, min_y, max_x, max_y]),
        _ => bail!("bounding box needs four values min_x,min_y,max_x,max_y, got '{text}'"),
    }
}

fn known_classes(classes: &[u8]) -> anyhow::Result<BTreeSet<u8>> {
    for class in classes {
        if !AHN_CLASSES.iter().any(|(code, _)| code == class) {
            let known: Vec<String> = AHN_CLASSES
                .iter()
                .map(|(code, name)| format!("{code}:{name}"))
                .collect();
            bail!("class {class} is not an AHN class ({})", known.join(", "));
        }
    }
    Ok(classes.iter().copied().collect())
}

fn read(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}
