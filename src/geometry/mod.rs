pub mod area;
pub mod road;

pub use area::{Area, AreaShape, BlockPos, GeometryError};
pub use road::RoadMatrix;
