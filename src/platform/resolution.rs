// src/platform/resolution.rs

//! Named screen resolutions and their mode parameters.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The set of output resolutions the compositor reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ScreenResolution {
    #[default]
    Unknown,
    R480i,
    R480p,
    R720p,
    R720p50Hz,
    R1080p24Hz,
    R1080i50Hz,
    R1080p50Hz,
    R1080p60Hz,
    R2160p50Hz,
    R2160p60Hz,
}

impl ScreenResolution {
    /// Classifies an output mode. Combinations without a named resolution map
    /// to `Unknown`.
    pub fn from_mode(height: u32, refresh_hz: u32, interlaced: bool) -> Self {
        use ScreenResolution::*;

        if interlaced {
            return match (height, refresh_hz) {
                (480, _) => R480i,
                (1080, 50) => R1080i50Hz,
                _ => Unknown,
            };
        }

        match (height, refresh_hz) {
            (480, _) => R480p,
            (720, 50) => R720p50Hz,
            (720, _) => R720p,
            (1080, 24) => R1080p24Hz,
            (1080, 50) => R1080p50Hz,
            (1080, 60) => R1080p60Hz,
            (2160, 50) => R2160p50Hz,
            (2160, 60) => R2160p60Hz,
            _ => Unknown,
        }
    }

    /// Horizontal pixel count; 0 where none is defined.
    pub fn width(self) -> u32 {
        use ScreenResolution::*;
        match self {
            R480p => 720,
            R720p | R720p50Hz => 1280,
            R1080p24Hz | R1080i50Hz | R1080p50Hz | R1080p60Hz => 1920,
            R2160p50Hz | R2160p60Hz => 3840,
            R480i | Unknown => 0,
        }
    }

    /// Vertical pixel count; 0 for `Unknown`.
    pub fn height(self) -> u32 {
        use ScreenResolution::*;
        match self {
            R480i | R480p => 480,
            R720p | R720p50Hz => 720,
            R1080p24Hz | R1080i50Hz | R1080p50Hz | R1080p60Hz => 1080,
            R2160p50Hz | R2160p60Hz => 2160,
            Unknown => 0,
        }
    }

    /// Passes per second the render loop targets at this resolution.
    pub fn refresh_rate(self) -> u32 {
        use ScreenResolution::*;
        match self {
            R1080p24Hz => 24,
            R720p50Hz | R1080i50Hz | R1080p50Hz | R2160p50Hz => 50,
            R480i | R480p | R720p | R1080p60Hz | R2160p60Hz | Unknown => 60,
        }
    }
}

impl fmt::Display for ScreenResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ScreenResolution::*;
        let name = match self {
            Unknown => "unknown",
            R480i => "480i",
            R480p => "480p",
            R720p => "720p",
            R720p50Hz => "720p50Hz",
            R1080p24Hz => "1080p24Hz",
            R1080i50Hz => "1080i50Hz",
            R1080p50Hz => "1080p50Hz",
            R1080p60Hz => "1080p60Hz",
            R2160p50Hz => "2160p50Hz",
            R2160p60Hz => "2160p60Hz",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::ScreenResolution::*;
    use super::*;

    #[test]
    fn it_should_classify_progressive_modes() {
        assert_eq!(ScreenResolution::from_mode(480, 60, false), R480p);
        assert_eq!(ScreenResolution::from_mode(720, 50, false), R720p50Hz);
        assert_eq!(ScreenResolution::from_mode(720, 60, false), R720p);
        assert_eq!(ScreenResolution::from_mode(1080, 24, false), R1080p24Hz);
        assert_eq!(ScreenResolution::from_mode(1080, 60, false), R1080p60Hz);
        assert_eq!(ScreenResolution::from_mode(2160, 50, false), R2160p50Hz);
        assert_eq!(ScreenResolution::from_mode(1080, 30, false), Unknown);
        assert_eq!(ScreenResolution::from_mode(768, 60, false), Unknown);
    }

    #[test]
    fn it_should_classify_interlaced_modes() {
        assert_eq!(ScreenResolution::from_mode(480, 30, true), R480i);
        assert_eq!(ScreenResolution::from_mode(1080, 50, true), R1080i50Hz);
        assert_eq!(ScreenResolution::from_mode(1080, 60, true), Unknown);
    }

    #[test]
    fn it_should_report_dimensions_and_refresh() {
        assert_eq!((R720p50Hz.width(), R720p50Hz.height()), (1280, 720));
        assert_eq!((R2160p60Hz.width(), R2160p60Hz.height()), (3840, 2160));
        assert_eq!(R480i.width(), 0);
        assert_eq!(Unknown.height(), 0);
        assert_eq!(R1080p24Hz.refresh_rate(), 24);
        assert_eq!(R1080i50Hz.refresh_rate(), 50);
        assert_eq!(Unknown.refresh_rate(), 60);
    }
}
