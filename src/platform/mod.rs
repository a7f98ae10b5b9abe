// src/platform/mod.rs

//! Display platforms.
//!
//! `kms` drives real hardware through DRM/KMS with GBM allocations. `headless`
//! stands in where there is no display: buffers are anonymous memory
//! descriptors and nothing is scanned out.

pub mod headless;
pub mod kms;
pub mod platform_trait;
pub mod resolution;

pub use platform_trait::{OutputMode, Platform};
pub use resolution::ScreenResolution;

use anyhow::Result;
use log::info;
use std::sync::Arc;

use crate::config::{PlatformBackend, PlatformConfig};

/// Builds a DRM fourcc code from its four characters.
pub const fn fourcc(a: u8, b: u8, c: u8, d: u8) -> u32 {
    (a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24)
}

pub const DRM_FORMAT_ARGB8888: u32 = fourcc(b'A', b'R', b'2', b'4');
pub const DRM_FORMAT_XRGB8888: u32 = fourcc(b'X', b'R', b'2', b'4');
pub const DRM_FORMAT_ABGR8888: u32 = fourcc(b'A', b'B', b'2', b'4');
pub const DRM_FORMAT_XBGR8888: u32 = fourcc(b'X', b'B', b'2', b'4');

pub const DRM_FORMAT_MOD_LINEAR: u64 = 0;
pub const DRM_FORMAT_MOD_INVALID: u64 = 0x00ff_ffff_ffff_ffff;

/// Opens the platform selected by `config`.
pub fn open(config: &PlatformConfig) -> Result<Arc<dyn Platform>> {
    let platform: Arc<dyn Platform> = match config.backend {
        PlatformBackend::Kms => Arc::new(kms::KmsPlatform::open(&config.device)?),
        PlatformBackend::Headless => Arc::new(headless::HeadlessPlatform::new(
            config.headless_width,
            config.headless_height,
            config.headless_refresh_hz,
        )),
    };
    let mode = platform.output_mode();
    info!(
        "Platform: {} backend, output {}x{}@{}{}",
        platform.name(),
        mode.width,
        mode.height,
        mode.refresh_hz,
        if mode.interlaced { "i" } else { "p" }
    );
    Ok(platform)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_should_encode_fourcc_little_endian() {
        assert_eq!(DRM_FORMAT_ARGB8888, 0x3432_5241);
        assert_eq!(DRM_FORMAT_XRGB8888, 0x3432_5258);
    }
}
