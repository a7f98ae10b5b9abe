// src/buffer.rs

//! GPU buffer ownership.
//!
//! A `BufferHandle` pairs the allocator's native buffer object with the
//! descriptor exported from it. The handle owns both: the descriptor is
//! closed exactly once when the handle drops, and the native object is freed
//! after it. Anything that needs the descriptor elsewhere (an image import,
//! another process) borrows it or receives a duplicate.

use anyhow::{Context, Result};
use log::{debug, error};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::{Mutex, MutexGuard};

use crate::error::lock_or_recover;
use crate::gpu::ImageId;

/// Geometry and layout of a buffer, as both the allocator and the graphics
/// driver understand it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferInfo {
    pub width: u32,
    pub height: u32,
    /// Bytes per row of the first plane.
    pub stride: u32,
    /// DRM fourcc code.
    pub format: u32,
    /// DRM format modifier describing the memory layout.
    pub modifier: u64,
}

/// An allocator-owned buffer object. Dropping it frees the allocation.
pub trait NativeBuffer: Send + Sync {
    fn info(&self) -> BufferInfo;

    /// Exports a new descriptor referring to the buffer memory.
    fn export_descriptor(&self) -> Result<OwnedFd>;
}

pub struct BufferHandle {
    // Declared first so the descriptor closes before the allocation is freed.
    descriptor: Option<OwnedFd>,
    native: Option<Box<dyn NativeBuffer>>,
    info: BufferInfo,
    image: Mutex<ImageId>,
}

impl BufferHandle {
    /// Takes ownership of `native` and exports its descriptor. A failed export
    /// is logged and leaves the handle valid but not DMA-ready.
    pub fn new(native: Box<dyn NativeBuffer>) -> Self {
        let info = native.info();
        let descriptor = match native.export_descriptor() {
            Ok(fd) => Some(fd),
            Err(e) => {
                error!("BufferHandle: failed to export descriptor: {:#}", e);
                None
            }
        };
        BufferHandle {
            descriptor,
            native: Some(native),
            info,
            image: Mutex::new(ImageId::INVALID),
        }
    }

    pub fn info(&self) -> BufferInfo {
        self.info
    }

    pub fn descriptor(&self) -> Option<BorrowedFd<'_>> {
        self.descriptor.as_ref().map(|fd| fd.as_fd())
    }

    pub fn raw_descriptor(&self) -> Option<RawFd> {
        self.descriptor.as_ref().map(|fd| fd.as_raw_fd())
    }

    /// Duplicates the descriptor for handing to someone else. The original
    /// stays owned by this handle.
    pub fn duplicate_descriptor(&self) -> Result<OwnedFd> {
        self.descriptor
            .as_ref()
            .context("Buffer has no exported descriptor")?
            .try_clone()
            .context("Failed to duplicate buffer descriptor")
    }

    /// The native buffer object is present.
    pub fn is_valid(&self) -> bool {
        self.native.is_some()
    }

    /// Valid and the descriptor is open.
    pub fn is_dma_ready(&self) -> bool {
        self.is_valid() && self.descriptor.is_some()
    }

    /// DMA-ready and an image is bound.
    pub fn is_render_ready(&self) -> bool {
        self.is_dma_ready() && self.image().is_valid()
    }

    pub fn image(&self) -> ImageId {
        *lock_or_recover(&self.image, "BufferHandle image")
    }

    /// Locks the image binding. Holding the guard serializes imports of this
    /// buffer, so a handle is never bound to two images at once.
    pub fn image_slot(&self) -> MutexGuard<'_, ImageId> {
        lock_or_recover(&self.image, "BufferHandle image")
    }
}

impl Drop for BufferHandle {
    fn drop(&mut self) {
        let image = self.image();
        if image.is_valid() {
            // The owner must export the image before letting the buffer go.
            error!("BufferHandle: dropped while still bound to image {:?}", image);
        }
        if let Some(fd) = self.descriptor.take() {
            debug!("BufferHandle: closing descriptor {}", fd.as_raw_fd());
            drop(fd);
        }
        self.native.take();
    }
}

impl std::fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferHandle")
            .field("info", &self.info)
            .field("descriptor", &self.raw_descriptor())
            .field("image", &self.image())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::headless::MemoryBuffer;
    use test_log::test;

    #[test]
    fn it_should_be_dma_ready_but_not_render_ready_after_creation() -> Result<()> {
        let handle = BufferHandle::new(Box::new(MemoryBuffer::allocate(64, 32)?));
        assert!(handle.is_valid());
        assert!(handle.is_dma_ready());
        assert!(!handle.is_render_ready());
        assert_eq!(handle.info().stride, 64 * 4);
        Ok(())
    }

    #[test]
    fn it_should_become_render_ready_once_an_image_is_bound() -> Result<()> {
        let handle = BufferHandle::new(Box::new(MemoryBuffer::allocate(8, 8)?));
        *handle.image_slot() = ImageId(7);
        assert!(handle.is_render_ready());
        *handle.image_slot() = ImageId::INVALID;
        Ok(())
    }

    #[test]
    fn it_should_hand_out_duplicates_not_the_original_descriptor() -> Result<()> {
        let handle = BufferHandle::new(Box::new(MemoryBuffer::allocate(8, 8)?));
        let original = handle.raw_descriptor();
        let dup = handle.duplicate_descriptor()?;
        assert_ne!(Some(dup.as_raw_fd()), original);
        drop(dup);
        assert!(handle.is_dma_ready());
        Ok(())
    }
}
