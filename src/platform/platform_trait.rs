// src/platform/platform_trait.rs
//
// Defines the `Platform` trait, which abstracts over the display hardware the
// compositor scans out to and the allocator its client buffers come from.

use anyhow::Result;
use std::ffi::c_void;

use crate::buffer::NativeBuffer;
use crate::platform::resolution::ScreenResolution;

/// The active output mode, sampled by the render pipeline when it needs a
/// resolution-dependent value (pacing interval, viewport extents).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputMode {
    pub width: u32,
    pub height: u32,
    pub refresh_hz: u32,
    pub interlaced: bool,
}

impl OutputMode {
    pub fn resolution(&self) -> ScreenResolution {
        ScreenResolution::from_mode(self.height, self.refresh_hz, self.interlaced)
    }
}

/// A display platform: output query, buffer allocation, render target and
/// scan-out.
///
/// The compositor receives one explicitly constructed platform and shares it
/// with every client surface; nothing reaches for a global instance.
pub trait Platform: Send + Sync {
    /// Short backend name for log lines.
    fn name(&self) -> &'static str;

    fn output_mode(&self) -> OutputMode;

    /// Pixel formats (DRM fourcc) the display side can scan out or sample.
    fn display_formats(&self) -> Result<Vec<u32>>;

    /// Allocates a client buffer of the given size in the platform's
    /// preferred format and layout.
    fn create_buffer(&self, width: u32, height: u32) -> Result<Box<dyn NativeBuffer>>;

    /// `EGLNativeDisplayType` for this platform; null selects the default
    /// display.
    fn native_display(&self) -> *mut c_void;

    /// `EGLNativeWindowType` to render into; null means the platform has no
    /// window and the graphics device renders offscreen.
    fn native_window(&self) -> *mut c_void;

    /// EGL platform enum for `eglGetPlatformDisplay`, when one applies.
    fn egl_platform(&self) -> Option<u32>;

    /// Scans out the buffer most recently completed by the graphics device.
    /// Called after the device has swapped.
    fn page_flip(&self) -> Result<()>;
}
