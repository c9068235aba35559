//! Online-learned SD-tree: a spatial k-d partition whose leaves each learn a
//! directional radiance distribution over the sphere.

pub mod alias_table;
pub mod direction;
pub mod direction_map;
pub mod guider;
pub mod quad_tree;
pub mod spatial_tree;

pub use direction::{DirectionSampler, DirectionTrainer};
pub use guider::{Guider, Record, RecordBatchBuilder};
pub use quad_tree::QuadTree;
pub use spatial_tree::{IterationStats, SamplerIndex, SpatialTree};
