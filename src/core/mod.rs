//! Core library modules for ahn-dl
//!
//! Leaf-first: geometry tables and CRS handling, tile resolution, fetching,
//! rasterization, the point filter pipeline and the streaming merge.

pub mod config;
pub mod crs;
pub mod error;
pub mod fetcher;
pub mod merge;
pub mod pipeline;
pub mod raster;
pub mod resolver;
pub mod tables;
pub mod tile;
