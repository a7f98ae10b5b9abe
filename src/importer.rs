// src/importer.rs

//! Image Importer.
//!
//! Turns a client's dmabuf into an image the graphics device can sample.
//! A buffer is only imported when its format is one both the display side
//! and the driver accept, and its layout modifier is one the driver lists
//! for that format. Failure is not fatal: the caller keeps the buffer as
//! "not yet composable" and asks again on the next composite request.

use anyhow::{bail, Context, Result};
use log::{debug, error};
use std::sync::Arc;

use crate::buffer::{BufferHandle, BufferInfo};
use crate::gpu::{DmaBufAttributes, GpuDevice, ImageId};
use crate::platform::Platform;

pub struct ImageImporter {
    device: Arc<dyn GpuDevice>,
    platform: Arc<dyn Platform>,
}

impl ImageImporter {
    pub fn new(device: Arc<dyn GpuDevice>, platform: Arc<dyn Platform>) -> Self {
        ImageImporter { device, platform }
    }

    /// Checks `info` against the format and modifier lists of both sides.
    pub fn validate(&self, info: &BufferInfo) -> Result<()> {
        let display = self
            .platform
            .display_formats()
            .context("Failed to query display formats")?;
        if !display.contains(&info.format) {
            bail!(
                "format {:#010x} is not supported by the {} display",
                info.format,
                self.platform.name()
            );
        }

        let driver = self
            .device
            .dmabuf_formats()
            .context("Failed to query dmabuf formats")?;
        if !driver.contains(&info.format) {
            bail!("format {:#010x} is not importable by the driver", info.format);
        }

        // Every modifier the driver lists can be sampled through the external
        // target, which is the only way stage 1 samples an import.
        let modifiers = self
            .device
            .dmabuf_modifiers(info.format)
            .context("Failed to query dmabuf modifiers")?;
        if !modifiers.iter().any(|m| m.modifier == info.modifier) {
            bail!(
                "modifier {:#018x} is not importable for format {:#010x}",
                info.modifier,
                info.format
            );
        }
        Ok(())
    }

    /// Creates an image from `handle`. Returns `ImageId::INVALID` on any
    /// failure, after logging it. Does not bind the image to the handle;
    /// the caller does that under the handle's image slot.
    pub fn import(&self, handle: &BufferHandle) -> ImageId {
        match self.try_import(handle) {
            Ok(image) => {
                debug!("ImageImporter: imported {:?} from {:?}", image, handle);
                image
            }
            Err(e) => {
                error!("ImageImporter: import failed: {:#}", e);
                ImageId::INVALID
            }
        }
    }

    fn try_import(&self, handle: &BufferHandle) -> Result<ImageId> {
        if !handle.is_dma_ready() {
            bail!("buffer is not DMA-ready");
        }
        let fd = handle
            .raw_descriptor()
            .context("buffer has no descriptor")?;
        let info = handle.info();
        self.validate(&info)?;

        self.device.create_image(&DmaBufAttributes {
            width: info.width,
            height: info.height,
            format: info.format,
            fd,
            offset: 0,
            pitch: info.stride,
            modifier: info.modifier,
        })
    }

    /// Destroys `image` if it is live and returns the invalid sentinel, so
    /// the caller can write the result straight back into its slot. The
    /// buffer's descriptor is left open.
    pub fn export(&self, image: ImageId) -> ImageId {
        if image.is_valid() {
            match self.device.destroy_image(image) {
                Ok(()) => debug!("ImageImporter: destroyed {:?}", image),
                Err(e) => error!("ImageImporter: failed to destroy {:?}: {:#}", image, e),
            }
        }
        ImageId::INVALID
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::mock::MockGpu;
    use crate::gpu::ModifierInfo;
    use crate::platform::headless::{HeadlessPlatform, MemoryBuffer};
    use crate::platform::{DRM_FORMAT_ARGB8888, DRM_FORMAT_MOD_LINEAR, DRM_FORMAT_XRGB8888};
    use test_log::test;

    fn importer_with(gpu: Arc<MockGpu>) -> ImageImporter {
        ImageImporter::new(gpu, Arc::new(HeadlessPlatform::new(1920, 1080, 60)))
    }

    fn handle(width: u32, height: u32) -> Result<BufferHandle> {
        Ok(BufferHandle::new(Box::new(MemoryBuffer::allocate(width, height)?)))
    }

    #[test]
    fn it_should_leave_nothing_behind_after_import_then_export() -> Result<()> {
        let gpu = Arc::new(MockGpu::new());
        let importer = importer_with(gpu.clone());
        let buffer = handle(320, 240)?;

        let image = importer.import(&buffer);
        assert!(image.is_valid());
        assert_eq!(gpu.live_images(), 1);

        assert_eq!(importer.export(image), ImageId::INVALID);
        assert_eq!(gpu.live_images(), 0);
        assert!(gpu.violations().is_empty());
        assert!(buffer.is_dma_ready());
        Ok(())
    }

    #[test]
    fn it_should_pass_the_buffer_layout_to_the_driver() -> Result<()> {
        let gpu = Arc::new(MockGpu::new());
        let importer = importer_with(gpu.clone());
        let buffer = handle(100, 50)?;

        let image = importer.import(&buffer);
        let imported = gpu.imported();
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].pitch, 400);
        assert_eq!(imported[0].offset, 0);
        assert_eq!(imported[0].format, DRM_FORMAT_ARGB8888);
        assert_eq!(Some(imported[0].fd), buffer.raw_descriptor());
        importer.export(image);
        Ok(())
    }

    #[test]
    fn it_should_treat_export_of_an_invalid_image_as_a_no_op() {
        let gpu = Arc::new(MockGpu::new());
        let importer = importer_with(gpu.clone());
        assert_eq!(importer.export(ImageId::INVALID), ImageId::INVALID);
        assert!(gpu.violations().is_empty());
    }

    #[test]
    fn it_should_reject_a_format_the_driver_cannot_import() -> Result<()> {
        let gpu = Arc::new(MockGpu::with_caps(
            vec![DRM_FORMAT_XRGB8888],
            vec![ModifierInfo {
                modifier: DRM_FORMAT_MOD_LINEAR,
                external_only: false,
            }],
        ));
        let importer = importer_with(gpu.clone());
        assert_eq!(importer.import(&handle(16, 16)?), ImageId::INVALID);
        assert_eq!(gpu.live_images(), 0);
        Ok(())
    }

    #[test]
    fn it_should_reject_an_unlisted_modifier() -> Result<()> {
        let tiled = 0x0100_0000_0000_0001;
        let gpu = Arc::new(MockGpu::with_caps(
            vec![DRM_FORMAT_ARGB8888],
            vec![ModifierInfo {
                modifier: tiled,
                external_only: true,
            }],
        ));
        let importer = importer_with(gpu.clone());
        let buffer = handle(16, 16)?;
        assert!(importer.validate(&buffer.info()).is_err());
        assert_eq!(importer.import(&buffer), ImageId::INVALID);
        Ok(())
    }

    #[test]
    fn it_should_report_driver_failures_as_invalid() -> Result<()> {
        let gpu = Arc::new(MockGpu::new());
        gpu.set_fail_imports(true);
        let importer = importer_with(gpu.clone());
        assert_eq!(importer.import(&handle(16, 16)?), ImageId::INVALID);
        Ok(())
    }
}
