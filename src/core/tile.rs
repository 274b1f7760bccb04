//! Point tiles
//!
//! One downloaded LAS/LAZ file, decoded. Coordinates are kept as the file's
//! scaled integers so that offset reconciliation during the merge is explicit.

use std::path::Path;

use las::point::Format;
use las::{Read as _, Reader, Vector, Version};

use crate::core::error::{Error, Result};

/// Header fields the pipeline and the merge care about
#[derive(Debug, Clone, PartialEq)]
pub struct TileHeader {
    pub offset: Vector<f64>,
    pub scale: Vector<f64>,
    pub min: Vector<f64>,
    pub max: Vector<f64>,
    pub point_count: u64,
    pub format: Format,
    pub version: Version,
}

impl TileHeader {
    /// Read only the header of a tile; no point records are decoded.
    pub fn read(path: &Path) -> Result<Self> {
        let reader = open(path)?;
        Ok(Self::from_las(reader.header()))
    }

    fn from_las(header: &las::Header) -> Self {
        let transforms = header.transforms();
        let bounds = header.bounds();
        Self {
            offset: Vector {
                x: transforms.x.offset,
                y: transforms.y.offset,
                z: transforms.z.offset,
            },
            scale: Vector {
                x: transforms.x.scale,
                y: transforms.y.scale,
                z: transforms.z.scale,
            },
            min: bounds.min,
            max: bounds.max,
            point_count: header.number_of_points(),
            format: header.point_format().clone(),
            version: header.version(),
        }
    }

    /// Ground coordinates of a record.
    pub fn to_ground(&self, record: &PointRecord) -> (f64, f64, f64) {
        (
            self.offset.x + f64::from(record.x) * self.scale.x,
            self.offset.y + f64::from(record.y) * self.scale.y,
            self.offset.z + f64::from(record.z) * self.scale.z,
        )
    }

    /// Scaled integer for a ground coordinate along one axis.
    pub fn quantize(value: f64, offset: f64, scale: f64) -> Result<i32> {
        let n = ((value - offset) / scale).round();
        if !n.is_finite() || n < f64::from(i32::MIN) || n > f64::from(i32::MAX) {
            return Err(Error::PointCloud(format!(
                "coordinate {value} does not fit offset {offset} / scale {scale}"
            )));
        }
        Ok(n as i32)
    }
}

/// One point record: scaled integer position, classification, everything else
#[derive(Debug, Clone, PartialEq)]
pub struct PointRecord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub classification: u8,
    /// Format-defined fields (intensity, returns, GPS time, colour, extra bytes)
    pub attributes: las::Point,
}

/// A decoded tile, exclusively owned by whoever is processing it
#[derive(Debug, Clone)]
pub struct PointTile {
    pub header: TileHeader,
    pub points: Vec<PointRecord>,
}

impl PointTile {
    /// Decode every point of a LAS/LAZ file.
    pub fn read(path: &Path) -> Result<Self> {
        let mut reader = open(path)?;
        let header = TileHeader::from_las(reader.header());

        let mut points = Vec::with_capacity(header.point_count as usize);
        for point in reader.points() {
            let point = point?;
            points.push(PointRecord {
                x: TileHeader::quantize(point.x, header.offset.x, header.scale.x)?,
                y: TileHeader::quantize(point.y, header.offset.y, header.scale.y)?,
                z: TileHeader::quantize(point.z, header.offset.z, header.scale.z)?,
                classification: u8::from(point.classification),
                attributes: point,
            });
        }

        log::debug!("Decoded {} points from {}", points.len(), path.display());
        Ok(Self { header, points })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Ground x/y of the point at `index`.
    pub fn xy(&self, index: usize) -> (f64, f64) {
        let (x, y, _) = self.header.to_ground(&self.points[index]);
        (x, y)
    }
}

fn open(path: &Path) -> Result<Reader<'static>> {
    Reader::from_path(path).map_err(|e| {
        Error::PointCloud(format!("Failed to open {}: {e}", path.display()))
    })
}
