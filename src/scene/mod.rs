// src/scene/mod.rs

//! Scene model and the render pipeline that composites it.

pub mod pacing;
pub mod pipeline;
pub mod registry;
pub mod transform;
pub mod viewport;

pub use pacing::FramePacer;
pub use pipeline::RenderPipeline;
pub use registry::{SceneEntry, SceneRegistry};
pub use transform::{Offset, Rectangle, Scale, Transform, ValueRanges};
pub use viewport::{Viewport, ViewportStrategy};
