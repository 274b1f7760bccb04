//! Point filter pipeline
//!
//! Stages are plain descriptors. A [`Pipeline`] validates them once and keeps
//! them in the fixed application order:
//!
//!   bounding-box clip -> decimate -> include -> exclude -> polygon/radius clip
//!
//! Decimation is ordinal, so the order changes which points survive; it is part
//! of the output contract. Stages only decide which rows survive, they never
//! touch point values.

use std::collections::BTreeSet;

use crate::core::error::{Error, Result};
use crate::core::raster::RasterMask;
use crate::core::tile::{PointRecord, PointTile, TileHeader};

/// One filtering step
#[derive(Debug, Clone)]
pub enum Stage {
    /// Keep points inside `[min_x, max_x] x [min_y, max_y]`, edges included
    ClipByBoundingBox { bounds: [f64; 4] },
    /// Keep every `step`-th point by position
    Decimate(usize),
    /// Keep points whose class is in the set; an empty set keeps everything
    IncludeClasses(BTreeSet<u8>),
    /// Drop points whose class is in the set
    ExcludeClasses(BTreeSet<u8>),
    /// Keep points that land on an occupied cell of the mask
    ClipByPolygon(RasterMask),
    /// Keep points within `radius` of `center`, boundary included
    ClipByRadius { center: (f64, f64), radius: f64 },
}

impl Stage {
    fn rank(&self) -> u8 {
        match self {
            Stage::ClipByBoundingBox { .. } => 0,
            Stage::Decimate(_) => 1,
            Stage::IncludeClasses(_) => 2,
            Stage::ExcludeClasses(_) => 3,
            Stage::ClipByPolygon(_) | Stage::ClipByRadius { .. } => 4,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Stage::ClipByBoundingBox { .. } => "bbox",
            Stage::Decimate(_) => "decimate",
            Stage::IncludeClasses(_) => "include",
            Stage::ExcludeClasses(_) => "exclude",
            Stage::ClipByPolygon(_) => "polygon",
            Stage::ClipByRadius { .. } => "radius",
        }
    }
}

/// A validated, ordered list of stages
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Validate `stages` and put them in application order.
    ///
    /// Polygon and radius clips share the last slot and keep the order given.
    pub fn new(mut stages: Vec<Stage>) -> Result<Self> {
        let mut include = BTreeSet::new();
        let mut exclude = BTreeSet::new();

        for stage in &stages {
            match stage {
                Stage::Decimate(step) if *step < 1 => {
                    return Err(Error::InvalidConfiguration(
                        "decimation step must be at least 1".to_string(),
                    ));
                }
                Stage::ClipByBoundingBox { bounds } => {
                    let [min_x, min_y, max_x, max_y] = *bounds;
                    if bounds.iter().any(|v| !v.is_finite()) || min_x > max_x || min_y > max_y {
                        return Err(Error::InvalidConfiguration(format!(
                            "malformed clip box {min_x},{min_y},{max_x},{max_y}"
                        )));
                    }
                }
                Stage::ClipByRadius { radius, .. } if !(radius.is_finite() && *radius >= 0.0) => {
                    return Err(Error::InvalidConfiguration(format!(
                        "clip radius must be non-negative, got {radius}"
                    )));
                }
                Stage::IncludeClasses(classes) => include.extend(classes.iter().copied()),
                Stage::ExcludeClasses(classes) => exclude.extend(classes.iter().copied()),
                _ => {}
            }
        }

        let overlap: Vec<u8> = include.intersection(&exclude).copied().collect();
        if !overlap.is_empty() {
            return Err(Error::InvalidConfiguration(format!(
                "classes {overlap:?} are both included and excluded"
            )));
        }

        stages.sort_by_key(Stage::rank);
        Ok(Self { stages })
    }

    /// A pipeline that keeps every point.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// Apply every stage of `pipeline` to `tile` and return the survivors.
pub fn run_pipeline(tile: PointTile, pipeline: &Pipeline) -> PointTile {
    let PointTile { header, mut points } = tile;
    let before = points.len();

    for stage in pipeline.stages() {
        apply(stage, &header, &mut points);
        log::debug!("after {}: {} points", stage.name(), points.len());
    }

    log::debug!("pipeline kept {} of {} points", points.len(), before);
    PointTile { header, points }
}

fn apply(stage: &Stage, header: &TileHeader, points: &mut Vec<PointRecord>) {
    let xy = |p: &PointRecord| {
        let (x, y, _) = header.to_ground(p);
        (x, y)
    };

    match stage {
        Stage::ClipByBoundingBox { bounds } => {
            let [min_x, min_y, max_x, max_y] = *bounds;
            points.retain(|p| {
                let (x, y) = xy(p);
                x >= min_x && x <= max_x && y >= min_y && y <= max_y
            });
        }
        Stage::Decimate(step) => {
            let mut position = 0usize;
            points.retain(|_| {
                let keep = position % step == 0;
                position += 1;
                keep
            });
        }
        Stage::IncludeClasses(classes) => {
            if !classes.is_empty() {
                points.retain(|p| classes.contains(&p.classification));
            }
        }
        Stage::ExcludeClasses(classes) => {
            points.retain(|p| !classes.contains(&p.classification));
        }
        Stage::ClipByPolygon(mask) => {
            points.retain(|p| {
                let (x, y) = xy(p);
                mask.covers(x, y)
            });
        }
        Stage::ClipByRadius { center, radius } => {
            let r2 = radius * radius;
            points.retain(|p| {
                let (x, y) = xy(p);
                let (dx, dy) = (x - center.0, y - center.1);
                dx * dx + dy * dy <= r2
            });
        }
    }
}
