// src/gpu/mod.rs

//! The graphics device seam.
//!
//! `GpuDevice` is the narrow set of operations the importer and the render
//! pipeline need from EGL/GLES: dmabuf capability queries, image
//! creation/destruction, context ownership, textures and the three draw
//! primitives of the two render stages. `egl::EglDevice` implements it on real
//! drivers; `mock::MockGpu` records calls for tests.
//!
//! Every draw-side call requires the context to be current on the calling
//! thread. `ContextGuard` makes that a scoped resource.

pub mod egl;
pub mod gles;
#[cfg(test)]
pub mod mock;

use anyhow::Result;
use log::warn;
use std::sync::{Mutex, MutexGuard};

use crate::error::lock_or_recover;
use crate::scene::viewport::Viewport;

/// Identity of an imported image. `INVALID` is the not-imported sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ImageId(pub u64);

impl ImageId {
    pub const INVALID: ImageId = ImageId(0);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

/// Name of a texture owned by the device. 0 is never a live texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TextureId(pub u32);

impl TextureId {
    pub const INVALID: TextureId = TextureId(0);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

/// Single-plane dmabuf description handed to the driver at import time.
/// The descriptor is borrowed; the driver duplicates what it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaBufAttributes {
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub fd: i32,
    pub offset: u32,
    pub pitch: u32,
    pub modifier: u64,
}

/// One entry of the driver's modifier list for a format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModifierInfo {
    pub modifier: u64,
    /// The layout can only be sampled through an external texture target.
    pub external_only: bool,
}

pub trait GpuDevice: Send + Sync {
    /// Formats the driver can import as dmabufs.
    fn dmabuf_formats(&self) -> Result<Vec<u32>>;

    /// Layout modifiers the driver can import for `format`.
    fn dmabuf_modifiers(&self, format: u32) -> Result<Vec<ModifierInfo>>;

    fn create_image(&self, attrs: &DmaBufAttributes) -> Result<ImageId>;

    fn destroy_image(&self, image: ImageId) -> Result<()>;

    fn make_current(&self) -> Result<()>;

    fn release_current(&self) -> Result<()>;

    /// Largest viewport the device accepts, `(width, height)`.
    fn max_viewport_dims(&self) -> (i32, i32);

    /// Allocates an RGBA texture usable as a render target.
    fn create_texture(&self, width: u32, height: u32) -> Result<TextureId>;

    fn destroy_texture(&self, texture: TextureId) -> Result<()>;

    /// Stage 1: samples `image` through the external target and draws it into
    /// `target` within `viewport`. Depth and blending are off.
    fn draw_external(&self, image: ImageId, target: TextureId, viewport: &Viewport) -> Result<()>;

    /// Stage 2 setup: default framebuffer, alpha blending, depth test, depth
    /// and colour cleared (opaque black).
    fn begin_scene(&self, width: u32, height: u32) -> Result<()>;

    /// Stage 2: draws one layer at `depth` (clip space, -1 near, 1 far).
    fn draw_layer(
        &self,
        texture: TextureId,
        viewport: &Viewport,
        depth: f32,
        opacity: f32,
    ) -> Result<()>;

    fn end_scene(&self) -> Result<()>;

    fn swap_buffers(&self) -> Result<()>;

    /// Blocks until previously submitted work has finished on the GPU.
    fn wait_idle(&self) -> Result<()>;
}

/// Holds the graphics context current on this thread.
///
/// Acquiring takes the context lock and makes the context current; dropping
/// releases the context and then the lock, on every exit path.
pub struct ContextGuard<'a> {
    device: &'a dyn GpuDevice,
    _lock: MutexGuard<'a, ()>,
}

impl<'a> ContextGuard<'a> {
    pub fn acquire(device: &'a dyn GpuDevice, lock: &'a Mutex<()>) -> Result<Self> {
        let guard = lock_or_recover(lock, "graphics context");
        device.make_current()?;
        Ok(ContextGuard {
            device,
            _lock: guard,
        })
    }

    pub fn device(&self) -> &'a dyn GpuDevice {
        self.device
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.device.release_current() {
            warn!("ContextGuard: failed to release context: {:#}", e);
        }
    }
}
