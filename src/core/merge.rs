//! Streaming merge writer
//!
//! Merging runs in two passes over the staged tiles. The header scan reads only
//! headers and folds them into a finished [`GlobalHeader`]: the first tile's
//! offset and scale become the output's, bounds are the union of all tiles.
//! The write pass then decodes, filters and writes one tile at a time, moving
//! every surviving point from its tile's offset onto the global one.
//!
//! The output is written to a temporary file next to the destination and only
//! renamed into place once every tile has been written.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use las::point::Format;
use las::{Builder, Transform, Vector, Version, Write as _, Writer};
use tempfile::TempPath;

use crate::core::error::{Error, Result};
use crate::core::fetcher::remove_staged;
use crate::core::pipeline::{run_pipeline, Pipeline};
use crate::core::tile::{PointRecord, PointTile, TileHeader};

/// Running header folded over every tile, finalized before any point is written
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalHeader {
    pub offset: Vector<f64>,
    pub scale: Vector<f64>,
    pub min: Vector<f64>,
    pub max: Vector<f64>,
    pub format: Format,
    pub version: Version,
    /// Points across all tiles, before filtering
    pub source_points: u64,
    pub tiles: usize,
}

impl GlobalHeader {
    /// Start from the first tile; its offset is the global origin.
    pub fn from_first(header: &TileHeader) -> Self {
        Self {
            offset: header.offset,
            scale: header.scale,
            min: header.min,
            max: header.max,
            format: header.format.clone(),
            version: header.version,
            source_points: header.point_count,
            tiles: 1,
        }
    }

    /// Fold in another tile's header.
    pub fn absorb(&mut self, header: &TileHeader) -> Result<()> {
        if !same_layout(&self.format, &header.format) {
            return Err(Error::InvalidConfiguration(format!(
                "tiles mix point formats ({:?} vs {:?})",
                self.format, header.format
            )));
        }
        self.min.x = self.min.x.min(header.min.x);
        self.min.y = self.min.y.min(header.min.y);
        self.min.z = self.min.z.min(header.min.z);
        self.max.x = self.max.x.max(header.max.x);
        self.max.y = self.max.y.max(header.max.y);
        self.max.z = self.max.z.max(header.max.z);
        self.source_points += header.point_count;
        self.tiles += 1;
        Ok(())
    }

    /// Re-express a tile record against the global offset.
    ///
    /// The record's scaled integers are shifted by the offset delta, so a
    /// point whose tile offset differs from the global one by a whole number
    /// of scale steps keeps its exact coordinates.
    pub fn reconcile(&self, tile: &TileHeader, record: &PointRecord) -> Result<las::Point> {
        let delta = Vector {
            x: self.offset.x - tile.offset.x,
            y: self.offset.y - tile.offset.y,
            z: self.offset.z - tile.offset.z,
        };
        let ix = shift(record.x, tile.scale.x, delta.x, self.scale.x)?;
        let iy = shift(record.y, tile.scale.y, delta.y, self.scale.y)?;
        let iz = shift(record.z, tile.scale.z, delta.z, self.scale.z)?;

        let mut point = record.attributes.clone();
        point.x = self.offset.x + f64::from(ix) * self.scale.x;
        point.y = self.offset.y + f64::from(iy) * self.scale.y;
        point.z = self.offset.z + f64::from(iz) * self.scale.z;
        Ok(point)
    }

    fn las_header(&self, compress: bool) -> Result<las::Header> {
        let mut builder = Builder::from(self.version);
        builder.point_format = self.format.clone();
        builder.point_format.is_compressed = compress;
        builder.transforms = Vector {
            x: Transform { scale: self.scale.x, offset: self.offset.x },
            y: Transform { scale: self.scale.y, offset: self.offset.y },
            z: Transform { scale: self.scale.z, offset: self.offset.z },
        };
        builder.generating_software = format!("ahn-dl {}", env!("CARGO_PKG_VERSION"));
        Ok(builder.into_header()?)
    }
}

/// `(n * tile_scale - delta) / global_scale`, rounded to the output grid.
fn shift(n: i32, tile_scale: f64, delta: f64, global_scale: f64) -> Result<i32> {
    TileHeader::quantize(f64::from(n) * tile_scale - delta, 0.0, global_scale)
}

fn same_layout(a: &Format, b: &Format) -> bool {
    let (mut a, mut b) = (a.clone(), b.clone());
    a.is_compressed = false;
    b.is_compressed = false;
    a == b
}

/// Header-only pass over the staged tiles, in merge order.
pub fn scan_headers(paths: &[PathBuf]) -> Result<GlobalHeader> {
    let mut paths = paths.iter();
    let first = paths
        .next()
        .ok_or_else(|| Error::NoTiles("the merge input".to_string()))?;

    let mut global = GlobalHeader::from_first(&TileHeader::read(first)?);
    for path in paths {
        global.absorb(&TileHeader::read(path)?)?;
    }

    log::info!(
        "Global header: {} tiles, {} source points, bounds ({:.2}, {:.2}, {:.2}) - ({:.2}, {:.2}, {:.2})",
        global.tiles,
        global.source_points,
        global.min.x,
        global.min.y,
        global.min.z,
        global.max.x,
        global.max.y,
        global.max.z
    );
    Ok(global)
}

enum State {
    Uninitialized,
    HeaderEstablished(GlobalHeader),
    Writing {
        header: GlobalHeader,
        writer: Writer<BufWriter<File>>,
        temp: TempPath,
    },
    Closed,
}

/// Single-output writer: `Uninitialized -> HeaderEstablished -> Writing -> Closed`
///
/// Dropping a writer that was never finished removes its temporary file.
pub struct MergeWriter {
    output: PathBuf,
    state: State,
    written: u64,
}

impl MergeWriter {
    pub fn new(output: &Path) -> Self {
        Self {
            output: output.to_path_buf(),
            state: State::Uninitialized,
            written: 0,
        }
    }

    /// Fix the output header. Only valid once, before any tile is written.
    pub fn establish(&mut self, header: GlobalHeader) -> Result<()> {
        match self.state {
            State::Uninitialized => {
                self.state = State::HeaderEstablished(header);
                Ok(())
            }
            _ => Err(invalid_state("establish", "the header is already set")),
        }
    }

    /// Append a filtered tile. Empty tiles are skipped.
    pub fn write_tile(&mut self, tile: &PointTile) -> Result<u64> {
        if tile.is_empty() {
            return Ok(0);
        }
        self.open()?;

        let State::Writing { header, writer, .. } = &mut self.state else {
            return Err(invalid_state("write", "the writer is not open"));
        };
        for record in &tile.points {
            writer.write(header.reconcile(&tile.header, record)?)?;
        }

        let count = tile.len() as u64;
        self.written += count;
        Ok(count)
    }

    /// Close the output and move it into place. Returns the points written.
    pub fn finish(mut self) -> Result<u64> {
        self.open()?;

        match std::mem::replace(&mut self.state, State::Closed) {
            State::Writing {
                mut writer, temp, ..
            } => {
                writer.close()?;
                drop(writer);
                temp.persist(&self.output).map_err(|e| Error::Io(e.error))?;
                log::info!("Wrote {} points to {}", self.written, self.output.display());
                Ok(self.written)
            }
            _ => Err(invalid_state("finish", "the writer is not open")),
        }
    }

    /// HeaderEstablished -> Writing
    fn open(&mut self) -> Result<()> {
        let header = match &self.state {
            State::HeaderEstablished(header) => header,
            State::Writing { .. } => return Ok(()),
            State::Uninitialized => {
                return Err(invalid_state("write", "no header has been established"))
            }
            State::Closed => return Err(invalid_state("write", "the writer is closed")),
        };

        let dir = match self.output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let (file, temp) = tempfile::Builder::new()
            .prefix(".ahn-dl-")
            .suffix(".part")
            .tempfile_in(&dir)?
            .into_parts();
        let writer = Writer::new(BufWriter::new(file), header.las_header(is_laz(&self.output))?)?;

        self.state = State::Writing {
            header: header.clone(),
            writer,
            temp,
        };
        Ok(())
    }
}

fn invalid_state(action: &str, why: &str) -> Error {
    Error::InvalidConfiguration(format!("cannot {action} output: {why}"))
}

fn is_laz(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("laz"))
}

/// Refuse to clobber an existing output unless `force`; the directory must exist.
pub fn check_output(output: &Path, force: bool) -> Result<()> {
    if let Some(dir) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !dir.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Output directory does not exist: {}", dir.display()),
            )));
        }
    }
    if output.exists() {
        if !force {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("File already exists: {} (use --force to overwrite)", output.display()),
            )));
        }
        log::warn!("Overwriting existing file: {}", output.display());
    }
    Ok(())
}

/// Filter every staged tile in order and merge the survivors into `output`.
///
/// Staged tiles are deleted afterwards whether or not the merge succeeded.
pub fn merge_and_write(tiles: &[PathBuf], pipeline: &Pipeline, output: &Path) -> Result<u64> {
    let result = merge_tiles(tiles, pipeline, output);
    remove_staged(tiles);
    result
}

fn merge_tiles(tiles: &[PathBuf], pipeline: &Pipeline, output: &Path) -> Result<u64> {
    let global = scan_headers(tiles)?;

    let mut writer = MergeWriter::new(output);
    writer.establish(global)?;

    for (i, path) in tiles.iter().enumerate() {
        let tile = run_pipeline(PointTile::read(path)?, pipeline);
        if tile.is_empty() {
            log::info!("[{}/{}] {}: no points left, skipped", i + 1, tiles.len(), path.display());
            continue;
        }
        let count = writer.write_tile(&tile)?;
        log::info!("[{}/{}] {}: {} points", i + 1, tiles.len(), path.display(), count);
    }

    writer.finish()
}
