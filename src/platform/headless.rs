// src/platform/headless.rs

//! A platform with no display attached.
//!
//! Client buffers are anonymous `memfd` regions in a linear ARGB8888 layout,
//! which is enough for the descriptor exchange to work end to end and for a
//! software EGL driver to import them. Page flips only count.

use anyhow::{Context, Result};
use log::{debug, trace};
use std::ffi::c_void;
use std::io;
use std::os::fd::{FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::buffer::{BufferInfo, NativeBuffer};
use crate::platform::{
    OutputMode, Platform, DRM_FORMAT_ABGR8888, DRM_FORMAT_ARGB8888, DRM_FORMAT_MOD_LINEAR,
    DRM_FORMAT_XBGR8888, DRM_FORMAT_XRGB8888,
};

const BYTES_PER_PIXEL: u32 = 4;

/// A linear buffer living in an anonymous memory file.
#[derive(Debug)]
pub struct MemoryBuffer {
    memory: OwnedFd,
    info: BufferInfo,
}

impl MemoryBuffer {
    pub fn allocate(width: u32, height: u32) -> Result<Self> {
        let stride = width
            .checked_mul(BYTES_PER_PIXEL)
            .context("Buffer stride overflows")?;
        let len = (stride as u64) * (height as u64);

        // SAFETY: the name is a valid NUL-terminated string and the flags are
        // plain constants.
        let raw = unsafe { libc::memfd_create(c"compositor-buffer".as_ptr(), libc::MFD_CLOEXEC) };
        if raw < 0 {
            return Err(io::Error::last_os_error()).context("memfd_create failed");
        }
        // SAFETY: memfd_create returned a fresh descriptor we own.
        let memory = unsafe { OwnedFd::from_raw_fd(raw) };

        // SAFETY: `memory` is an open memfd.
        if unsafe { libc::ftruncate(raw, len as libc::off_t) } < 0 {
            return Err(io::Error::last_os_error())
                .with_context(|| format!("ftruncate to {} bytes failed", len));
        }

        trace!("MemoryBuffer: allocated {}x{} ({} bytes)", width, height, len);
        Ok(MemoryBuffer {
            memory,
            info: BufferInfo {
                width,
                height,
                stride,
                format: DRM_FORMAT_ARGB8888,
                modifier: DRM_FORMAT_MOD_LINEAR,
            },
        })
    }
}

impl NativeBuffer for MemoryBuffer {
    fn info(&self) -> BufferInfo {
        self.info
    }

    fn export_descriptor(&self) -> Result<OwnedFd> {
        self.memory
            .try_clone()
            .context("Failed to export memory buffer descriptor")
    }
}

pub struct HeadlessPlatform {
    mode: OutputMode,
    flips: AtomicU64,
}

impl HeadlessPlatform {
    pub fn new(width: u32, height: u32, refresh_hz: u32) -> Self {
        HeadlessPlatform {
            mode: OutputMode {
                width,
                height,
                refresh_hz,
                interlaced: false,
            },
            flips: AtomicU64::new(0),
        }
    }

    /// Number of page flips requested so far.
    pub fn flip_count(&self) -> u64 {
        self.flips.load(Ordering::Relaxed)
    }
}

impl Platform for HeadlessPlatform {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn output_mode(&self) -> OutputMode {
        self.mode
    }

    fn display_formats(&self) -> Result<Vec<u32>> {
        Ok(vec![
            DRM_FORMAT_ARGB8888,
            DRM_FORMAT_XRGB8888,
            DRM_FORMAT_ABGR8888,
            DRM_FORMAT_XBGR8888,
        ])
    }

    fn create_buffer(&self, width: u32, height: u32) -> Result<Box<dyn NativeBuffer>> {
        Ok(Box::new(MemoryBuffer::allocate(width, height)?))
    }

    fn native_display(&self) -> *mut c_void {
        std::ptr::null_mut()
    }

    fn native_window(&self) -> *mut c_void {
        std::ptr::null_mut()
    }

    fn egl_platform(&self) -> Option<u32> {
        None
    }

    fn page_flip(&self) -> Result<()> {
        let n = self.flips.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("HeadlessPlatform: flip #{}", n);
        Ok(())
    }
}
