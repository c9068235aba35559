//! Path tracer with an online-learned SD-tree guiding scattering directions.

pub mod bounds;
pub mod film;
pub mod guiding;
pub mod integrator;
pub mod options;
pub mod sampler;
pub mod scene;
pub mod scheduler;

pub use bounds::Bounds;
pub use options::{GuidingOptions, RenderOptions};
pub use scheduler::{GuidedRenderScheduler, RenderOutput};
