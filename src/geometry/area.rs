use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::road::RoadMatrix;
use crate::wire::{WireError, parse_i32};

/// Errors raised when building an [`Area`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    #[error("world name must not be empty")]
    EmptyWorld,
    #[error("world name '{0}' must not contain ':'")]
    InvalidWorld(String),
    #[error("cylinder needs a positive width and length, got {width}x{length}")]
    DegenerateCylinder { width: i64, length: i64 },
    #[error("a road needs at least one column")]
    EmptyRoad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AreaShape {
    Cuboid,
    Cylinder,
    /// Free-form set of block columns between two heights.
    Road,
    /// Covers the whole world. Only used by world-level default settings.
    Infinite,
}

impl AreaShape {
    pub fn wire_name(self) -> &'static str {
        match self {
            AreaShape::Cuboid => "CUBOID",
            AreaShape::Cylinder => "CYLINDER",
            AreaShape::Road => "ROAD",
            AreaShape::Infinite => "INFINITE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// A region of block coordinates inside one world.
///
/// Bounds are inclusive and always normalized (`min <= max` on every axis).
/// A cylinder is the elliptic column inscribed in its XZ bounding box. A
/// road keeps its columns in `road` and its box is their tight bound.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Area {
    shape: AreaShape,
    world: String,
    min: BlockPos,
    max: BlockPos,
    #[serde(default)]
    road: Option<RoadMatrix>,
}

fn check_world(world: &str) -> Result<(), GeometryError> {
    if world.is_empty() {
        return Err(GeometryError::EmptyWorld);
    }
    if world.contains(':') {
        return Err(GeometryError::InvalidWorld(world.to_string()));
    }
    Ok(())
}

impl Area {
    /// Build a cuboid from two arbitrary corners.
    pub fn cuboid(
        world: &str,
        x1: i32,
        y1: i32,
        z1: i32,
        x2: i32,
        y2: i32,
        z2: i32,
    ) -> Result<Self, GeometryError> {
        Self::bounded(AreaShape::Cuboid, world, x1, y1, z1, x2, y2, z2)
    }

    /// Build a cylinder inscribed in the box spanned by two corners.
    pub fn cylinder(
        world: &str,
        x1: i32,
        y1: i32,
        z1: i32,
        x2: i32,
        y2: i32,
        z2: i32,
    ) -> Result<Self, GeometryError> {
        let width = (x1 as i64 - x2 as i64).abs();
        let length = (z1 as i64 - z2 as i64).abs();
        if width == 0 || length == 0 {
            return Err(GeometryError::DegenerateCylinder { width, length });
        }
        Self::bounded(AreaShape::Cylinder, world, x1, y1, z1, x2, y2, z2)
    }

    pub fn infinite(world: &str) -> Result<Self, GeometryError> {
        check_world(world)?;
        Ok(Self {
            shape: AreaShape::Infinite,
            world: world.to_string(),
            min: BlockPos::new(i32::MIN, i32::MIN, i32::MIN),
            max: BlockPos::new(i32::MAX, i32::MAX, i32::MAX),
            road: None,
        })
    }

    /// Build a road from its columns, spanning `y1..=y2`.
    pub fn road(world: &str, y1: i32, y2: i32, road: RoadMatrix) -> Result<Self, GeometryError> {
        check_world(world)?;
        let (x1, z1, x2, z2) = road.bounds().ok_or(GeometryError::EmptyRoad)?;
        Ok(Self {
            shape: AreaShape::Road,
            world: world.to_string(),
            min: BlockPos::new(x1, y1.min(y2), z1),
            max: BlockPos::new(x2, y1.max(y2), z2),
            road: Some(road),
        })
    }

    fn bounded(
        shape: AreaShape,
        world: &str,
        x1: i32,
        y1: i32,
        z1: i32,
        x2: i32,
        y2: i32,
        z2: i32,
    ) -> Result<Self, GeometryError> {
        check_world(world)?;
        Ok(Self {
            shape,
            world: world.to_string(),
            min: BlockPos::new(x1.min(x2), y1.min(y2), z1.min(z2)),
            max: BlockPos::new(x1.max(x2), y1.max(y2), z1.max(z2)),
            road: None,
        })
    }

    pub fn shape(&self) -> AreaShape {
        self.shape
    }

    pub fn world(&self) -> &str {
        &self.world
    }

    pub fn min(&self) -> BlockPos {
        self.min
    }

    pub fn max(&self) -> BlockPos {
        self.max
    }

    /// Columns of a road area.
    pub fn road_matrix(&self) -> Option<&RoadMatrix> {
        self.road.as_ref()
    }

    pub fn is_infinite(&self) -> bool {
        self.shape == AreaShape::Infinite
    }

    /// Inclusive axis-aligned box enclosing the area.
    pub fn bounding_box(&self) -> (BlockPos, BlockPos) {
        (self.min, self.max)
    }

    /// Inclusive Z range of the block column at `x`, if any. For a road
    /// this is only the bounding range; use [`Area::covers_column`].
    fn z_span(&self, x: i32) -> Option<(i32, i32)> {
        if x < self.min.x || x > self.max.x {
            return None;
        }
        match self.shape {
            AreaShape::Cuboid | AreaShape::Infinite | AreaShape::Road => {
                Some((self.min.z, self.max.z))
            }
            AreaShape::Cylinder => {
                let cx = (self.min.x as f64 + self.max.x as f64) / 2.0;
                let rx = (self.max.x as f64 - self.min.x as f64) / 2.0;
                let cz = (self.min.z as f64 + self.max.z as f64) / 2.0;
                let rz = (self.max.z as f64 - self.min.z as f64) / 2.0;
                let dx = (x as f64 - cx) / rx;
                let half = rz * (1.0 - dx * dx).max(0.0).sqrt();
                let lo = ((cz - half).round() as i32).max(self.min.z);
                let hi = ((cz + half).round() as i32).min(self.max.z);
                Some((lo, hi))
            }
        }
    }

    /// True iff the footprint includes the column (x, z), ignoring height.
    fn covers_column(&self, x: i32, z: i32) -> bool {
        match &self.road {
            Some(road) => road.contains(x, z),
            None => self.z_span(x).is_some_and(|(lo, hi)| z >= lo && z <= hi),
        }
    }

    /// True iff the block lies inside the area (bounds inclusive).
    pub fn contains_point(&self, world: &str, x: i32, y: i32, z: i32) -> bool {
        if self.world != world || y < self.min.y || y > self.max.y {
            return false;
        }
        self.covers_column(x, z)
    }

    /// True iff both areas share at least one block.
    pub fn intersects(&self, other: &Area) -> bool {
        if self.world != other.world {
            return false;
        }
        if self.is_infinite() || other.is_infinite() {
            return true;
        }
        if self.max.y < other.min.y || other.max.y < self.min.y {
            return false;
        }
        let x_lo = self.min.x.max(other.min.x);
        let x_hi = self.max.x.min(other.max.x);
        if x_lo > x_hi {
            return false;
        }
        match (&self.road, &other.road) {
            (Some(road), _) => return road.points().any(|(x, z)| other.covers_column(x, z)),
            (None, Some(road)) => return road.points().any(|(x, z)| self.covers_column(x, z)),
            (None, None) => {}
        }
        if self.shape == AreaShape::Cuboid && other.shape == AreaShape::Cuboid {
            return self.min.z <= other.max.z && other.min.z <= self.max.z;
        }
        (x_lo..=x_hi).any(|x| match (self.z_span(x), other.z_span(x)) {
            (Some((a_lo, a_hi)), Some((b_lo, b_hi))) => a_lo <= b_hi && b_lo <= a_hi,
            _ => false,
        })
    }

    /// True iff every block of `other` lies inside `self`. Touching the
    /// boundary counts as contained.
    pub fn contains_area(&self, other: &Area) -> bool {
        if self.world != other.world {
            return false;
        }
        if self.is_infinite() {
            return true;
        }
        if other.is_infinite() {
            return false;
        }
        if other.min.y < self.min.y || other.max.y > self.max.y {
            return false;
        }
        if other.min.x < self.min.x || other.max.x > self.max.x {
            return false;
        }
        if other.min.z < self.min.z || other.max.z > self.max.z {
            return false;
        }
        if let Some(road) = &other.road {
            return road.points().all(|(x, z)| self.covers_column(x, z));
        }
        if self.road.is_some() {
            return (other.min.x..=other.max.x).all(|x| match other.z_span(x) {
                Some((lo, hi)) => (lo..=hi).all(|z| self.covers_column(x, z)),
                None => true,
            });
        }
        if self.shape == AreaShape::Cuboid && other.shape == AreaShape::Cuboid {
            return true;
        }
        (other.min.x..=other.max.x).all(|x| match (self.z_span(x), other.z_span(x)) {
            (Some((a_lo, a_hi)), Some((b_lo, b_hi))) => b_lo >= a_lo && b_hi <= a_hi,
            (_, None) => true,
            (None, Some(_)) => false,
        })
    }

    /// Number of blocks covered, `None` for infinite areas. Saturates at
    /// `u64::MAX` for world-sized areas.
    pub fn volume(&self) -> Option<u64> {
        if self.is_infinite() {
            return None;
        }
        let height = (self.max.y as i64 - self.min.y as i64 + 1) as u64;
        let surface = match (&self.road, self.shape) {
            (Some(road), _) => road.count_points(),
            (None, AreaShape::Cuboid) => {
                let width = (self.max.x as i64 - self.min.x as i64 + 1) as u64;
                let length = (self.max.z as i64 - self.min.z as i64 + 1) as u64;
                width.saturating_mul(length)
            }
            (None, _) => (self.min.x..=self.max.x)
                .filter_map(|x| self.z_span(x))
                .map(|(lo, hi)| (hi as i64 - lo as i64 + 1) as u64)
                .fold(0u64, u64::saturating_add),
        };
        Some(surface.saturating_mul(height))
    }

    pub fn to_wire(&self) -> String {
        if let Some(road) = &self.road {
            return format!(
                "{}:{}:{}:{}:{}",
                AreaShape::Road.wire_name(),
                self.world,
                self.min.y,
                self.max.y,
                road.to_wire()
            );
        }
        match self.shape {
            AreaShape::Infinite => format!("{}:{}", self.shape.wire_name(), self.world),
            shape => format!(
                "{}:{}:{}:{}:{}:{}:{}:{}",
                shape.wire_name(),
                self.world,
                self.min.x,
                self.min.y,
                self.min.z,
                self.max.x,
                self.max.y,
                self.max.z
            ),
        }
    }

    pub fn from_wire(value: &str) -> Result<Self, WireError> {
        let parts: Vec<&str> = value.split(':').collect();
        let geometry = |e: GeometryError| WireError::Geometry(e.to_string());
        match parts.as_slice() {
            [] | [""] => Err(WireError::Empty),
            ["INFINITE", world] => Self::infinite(world).map_err(geometry),
            [kind @ ("CUBOID" | "CYLINDER"), world, x1, y1, z1, x2, y2, z2] => {
                let (x1, y1, z1) = (parse_i32(x1)?, parse_i32(y1)?, parse_i32(z1)?);
                let (x2, y2, z2) = (parse_i32(x2)?, parse_i32(y2)?, parse_i32(z2)?);
                if *kind == "CUBOID" {
                    Self::cuboid(world, x1, y1, z1, x2, y2, z2).map_err(geometry)
                } else {
                    Self::cylinder(world, x1, y1, z1, x2, y2, z2).map_err(geometry)
                }
            }
            ["ROAD", world, y1, y2, columns @ ..] if !columns.is_empty() => {
                let road = RoadMatrix::from_wire_fields(columns)?;
                Self::road(world, parse_i32(y1)?, parse_i32(y2)?, road).map_err(geometry)
            }
            ["ROAD", ..] => Err(WireError::FieldCount {
                expected: 7,
                got: parts.len(),
                value: value.to_string(),
            }),
            ["CUBOID" | "CYLINDER", ..] => Err(WireError::FieldCount {
                expected: 8,
                got: parts.len(),
                value: value.to_string(),
            }),
            [kind, ..] => Err(WireError::UnknownKind {
                kind: "area",
                value: kind.to_string(),
            }),
        }
    }
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}
