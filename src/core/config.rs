//! Run configuration for ahn-dl
//!
//! Plain values with sensible defaults; the CLI maps its flags onto these.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;

use crate::core::error::{Error, Result};

/// Default GeoTiles mirror of the AHN4 subunit tiles
pub const DEFAULT_BASE_URL: &str = "https://geotiles.citg.tudelft.nl/AHN4_T/";

/// Amersfoort / RD New, the planar reference of every AHN product
pub const RD_NEW_EPSG: u32 = 28992;

/// Configuration for a fetch-filter-merge run
#[derive(Debug, Clone)]
pub struct Config {
    /// Prefix that the tile identifier is appended to
    pub base_url: String,

    /// File extension of the remote tiles, without the dot
    pub extension: String,

    /// Maximum number of concurrent transfers
    pub max_workers: usize,

    /// Size of the buffer each transfer streams through
    pub chunk_size: usize,

    /// Ground units per raster cell when rasterizing clip polygons
    pub raster_resolution: f64,

    /// EPSG code all clip geometry is reprojected to
    pub target_epsg: u32,

    /// Retries after the first attempt, for connection and timeout failures only
    pub max_retries: u32,

    /// Delay before the first retry; doubles on every further attempt
    pub base_retry_delay: Duration,

    /// TCP connect timeout
    pub connect_timeout: Duration,

    /// Longest a single body read may stall before the transfer is abandoned
    pub read_timeout: Duration,

    /// Directory downloaded tiles are staged in
    pub staging_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            extension: "LAZ".to_string(),
            max_workers: 8,
            chunk_size: 1024 * 1024,
            raster_resolution: 10.0,
            target_epsg: RD_NEW_EPSG,
            max_retries: 3,
            base_retry_delay: Duration::from_millis(1000),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
            staging_dir: std::env::temp_dir(),
        }
    }
}

impl Config {
    /// Download URL of one tile: `{base_url}{tile_id}.{extension}`
    pub fn tile_url(&self, tile_id: &str) -> String {
        format!("{}{}.{}", self.base_url, tile_id, self.extension)
    }

    /// Reject settings no run could succeed with, before any I/O happens.
    pub fn validate(&self) -> Result<()> {
        validate_base_url(&self.base_url)?;
        if self.max_workers == 0 {
            return Err(Error::InvalidConfiguration(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfiguration(
                "chunk_size must be at least 1 byte".to_string(),
            ));
        }
        if !(self.raster_resolution.is_finite() && self.raster_resolution > 0.0) {
            return Err(Error::InvalidConfiguration(format!(
                "raster resolution must be positive, got {}",
                self.raster_resolution
            )));
        }
        Ok(())
    }
}

/// A base URL needs a scheme, a host and a path.
pub fn validate_base_url(base_url: &str) -> Result<Url> {
    let url = Url::parse(base_url).map_err(|_| Error::InvalidUrl(base_url.to_string()))?;
    let has_host = url.host_str().is_some_and(|h| !h.is_empty());
    // Url normalises "https://host" to path "/", so look at the raw text.
    let has_path = base_url
        .split_once("://")
        .is_some_and(|(_, rest)| rest.contains('/'));
    if url.cannot_be_a_base() || !has_host || !has_path {
        return Err(Error::InvalidUrl(base_url.to_string()));
    }
    Ok(url)
}
